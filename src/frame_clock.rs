//! # 帧时钟适配层
//!
//! ## 设计思路
//!
//! 会话用宿主的“每帧回调”来驱动动画节奏，这里只定义一个很薄的接口：
//! 注册一次性回调、取消回调。回调参数是宿主给出的帧时间戳（自时钟起点的时长）。
//!
//! ## 实现思路
//!
//! - `ManualFrameClock`：由宿主在每个 vsync 调用 `tick(timestamp)` 泵送，测试同样使用它。
//! - `TokioFrameClock`：没有宿主调度器时，在 `LocalSet` 上按固定间隔自驱动；
//!   只在有待触发回调时运行，空闲即退出。
//! - 回调在 `tick` 内执行，执行期间新注册的回调留到下一次 `tick`。

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

use crate::config::ImageStreamConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameCallbackId(u64);

pub type FrameCallback = Box<dyn FnOnce(Duration)>;

pub trait FrameClock {
    /// 注册一次性帧回调。实现不得在本调用内同步触发回调。
    fn schedule_frame(&self, callback: FrameCallback) -> FrameCallbackId;

    /// 取消尚未触发的回调；已触发或未知的 id 静默忽略。
    fn cancel_frame(&self, id: FrameCallbackId);
}

/// 由外部泵送的帧时钟。
#[derive(Default)]
pub struct ManualFrameClock {
    next_id: Cell<u64>,
    pending: RefCell<Vec<(FrameCallbackId, FrameCallback)>>,
    scheduled_total: Cell<usize>,
}

impl ManualFrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// 触发当前所有待执行回调，返回触发数量。
    pub fn tick(&self, timestamp: Duration) -> usize {
        let due = std::mem::take(&mut *self.pending.borrow_mut());
        let count = due.len();
        for (_, callback) in due {
            callback(timestamp);
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    /// 累计注册次数（含已取消的）。
    pub fn scheduled_total(&self) -> usize {
        self.scheduled_total.get()
    }
}

impl FrameClock for ManualFrameClock {
    fn schedule_frame(&self, callback: FrameCallback) -> FrameCallbackId {
        let id = FrameCallbackId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.scheduled_total.set(self.scheduled_total.get() + 1);
        self.pending.borrow_mut().push((id, callback));
        id
    }

    fn cancel_frame(&self, id: FrameCallbackId) {
        let removed = {
            let mut pending = self.pending.borrow_mut();
            pending
                .iter()
                .position(|(pending_id, _)| *pending_id == id)
                .map(|pos| pending.remove(pos))
        };
        drop(removed);
    }
}

/// 在 tokio `LocalSet` 上按固定间隔自驱动的帧时钟。
///
/// 必须在 `LocalSet` 上下文中使用：首次注册回调时会 `spawn_local` 一个节拍任务。
pub struct TokioFrameClock {
    callbacks: Rc<ManualFrameClock>,
    interval: Duration,
    origin: Instant,
    running: Rc<Cell<bool>>,
}

impl TokioFrameClock {
    pub fn new(interval: Duration) -> Self {
        Self {
            callbacks: Rc::new(ManualFrameClock::new()),
            interval: interval.max(Duration::from_millis(1)),
            origin: Instant::now(),
            running: Rc::new(Cell::new(false)),
        }
    }

    pub fn from_config(config: &ImageStreamConfig) -> Self {
        Self::new(Duration::from_millis(config.frame_interval_ms))
    }

    fn start_ticker(&self) {
        self.running.set(true);

        let callbacks = Rc::clone(&self.callbacks);
        let running = Rc::clone(&self.running);
        let origin = self.origin;
        let period = self.interval;

        tokio::task::spawn_local(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // 第一次 tick 立即返回，跳过它让首帧落在一个完整间隔之后。
            interval.tick().await;

            loop {
                interval.tick().await;
                callbacks.tick(origin.elapsed());
                if callbacks.pending_count() == 0 {
                    running.set(false);
                    log::trace!("帧时钟空闲，节拍任务退出");
                    break;
                }
            }
        });
    }
}

impl FrameClock for TokioFrameClock {
    fn schedule_frame(&self, callback: FrameCallback) -> FrameCallbackId {
        let id = self.callbacks.schedule_frame(callback);
        if !self.running.get() {
            self.start_ticker();
        }
        id
    }

    fn cancel_frame(&self, id: FrameCallbackId) {
        self.callbacks.cancel_frame(id);
    }
}
