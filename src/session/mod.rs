//! # 解码会话（DecodeSession）
//!
//! ## 设计思路
//!
//! 一个会话拥有一条解码管线，服务一个 `ImageKey` 的全部监听器：
//!
//! ```text
//! New ─▶ LoadingCodec ─┬─▶ SingleFrameReady
//!                      ├─▶ AnimatingFrame(n) ◀─┐ 帧时钟
//!                      └─▶ DimensionOnly       │
//!                                 └────────────┘
//! 最后一个监听器卸载 ─▶ TornDown（可再次挂载，重新进入 LoadingCodec）
//! ```
//!
//! - 所有状态在协调线程上变更，用 `Rc<RefCell<..>>` 持有，不加锁。
//! - 挂起点只有三处：codec 初始化、取帧/查尺寸、帧时钟回调。
//! - 调用任何外部代码（监听器、codec、时钟、占位图）前都先释放 `RefCell` 借用，
//!   外部代码可以安全地重入会话（例如在回调里卸载自己）。
//!
//! ## 实现思路
//!
//! - 异步结果回到会话时先做“过期检查”：codec 句柄必须仍是当前句柄（`Rc::ptr_eq`），
//!   codec 初始化结果必须属于当前代际；否则直接丢弃。
//! - 会话通过 `Weak` 自引用把自己交给异步任务、帧回调与占位图监听器，
//!   这些地方都不延长会话寿命。
//! - 错误只做非致命上报；codec 解析/解码错误每代际只向诊断通道报一次，监听器每次失败都会收到 `on_error`。
//!
//! ## 子模块
//!
//! - `decode`：codec 初始化、尺寸单元、像素单元
//! - `animation`：帧时钟节奏与重复次数判断
//! - `placeholder`：占位图的首帧消费与卸载

mod animation;
mod decode;
mod placeholder;

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::cache::metadata::ImageInfo;
use crate::cache::registry;
use crate::codec::{self, Codec, CodecProvider, DecodedFrame};
use crate::diagnostics::{self, ErrorReport};
use crate::error::{ImageStreamError, ListenerError};
use crate::frame_clock::{FrameCallbackId, FrameClock};
use crate::key::ImageKey;
use crate::listener::{ImageFrame, ImageStream, ImageStreamListener, ListenerSet, ListenerToken};

use placeholder::PlaceholderAttachment;

/// 会话可变状态。只在协调线程上借用，借用期间不调用外部代码。
#[derive(Default)]
struct SessionState {
    listeners: ListenerSet,
    codec: Option<Rc<dyn Codec>>,
    codec_loading: bool,
    /// 每次拆除 +1，用来识别过期的 codec 初始化结果。
    generation: u64,
    decode_in_flight: bool,
    next_frame: Option<DecodedFrame>,
    current_image: Option<ImageFrame>,
    shown_timestamp: Option<Duration>,
    frame_duration: Duration,
    emitted_frames: u32,
    is_multiframe: bool,
    /// 兼作“已注册帧回调”标志。
    frame_callback: Option<FrameCallbackId>,
    error_reported: bool,
    image_info: Option<ImageInfo>,
    placeholder: Option<PlaceholderAttachment>,
    placeholder_done: bool,
}

impl SessionState {
    fn reset_animation(&mut self) {
        self.next_frame = None;
        self.shown_timestamp = None;
        self.frame_duration = Duration::ZERO;
        self.emitted_frames = 0;
        self.is_multiframe = false;
    }
}

/// 一个图片键的解码会话。
///
/// 必须在 tokio `LocalSet` 上下文中创建与使用。
pub struct DecodeSession {
    key: ImageKey,
    codec_provider: Rc<dyn CodecProvider>,
    clock: Rc<dyn FrameClock>,
    weak_self: Weak<DecodeSession>,
    state: RefCell<SessionState>,
}

impl DecodeSession {
    /// 创建会话：按需开始加载占位图，并立即请求 codec 初始化。
    ///
    /// 新会话在第一个监听器挂载时才登记到活跃会话表。
    pub fn new(key: ImageKey, codec_provider: Rc<dyn CodecProvider>, clock: Rc<dyn FrameClock>) -> Rc<Self> {
        log::debug!(
            "🆕 创建解码会话 - 来源: {} 仅尺寸: {}",
            codec::redact_locator_for_log(key.locator()),
            key.is_dimension_only()
        );

        let session = Rc::new_cyclic(|weak_self| Self {
            key,
            codec_provider,
            clock,
            weak_self: weak_self.clone(),
            state: RefCell::new(SessionState::default()),
        });

        session.start_placeholder();
        session.load_codec();
        session
    }

    pub fn key(&self) -> &ImageKey {
        &self.key
    }

    pub fn listener_count(&self) -> usize {
        self.state.borrow().listeners.len()
    }

    /// 已确认为多帧且 codec 仍在。
    pub fn is_animating(&self) -> bool {
        let state = self.state.borrow();
        state.is_multiframe && state.codec.is_some()
    }

    /// 最近一次展示的图像（可能是占位图）。
    pub fn current_image(&self) -> Option<ImageFrame> {
        self.state.borrow().current_image.clone()
    }

    pub fn image_info(&self) -> Option<ImageInfo> {
        self.state.borrow().image_info
    }

    pub fn emitted_frame_count(&self) -> u32 {
        self.state.borrow().emitted_frames
    }

    /// 拆除会话：取消帧回调与 codec，清空帧与元数据状态，卸载占位图，并从活跃会话表移除。
    ///
    /// 可重复调用；拆除后再次挂载会重新进入加载阶段。
    pub fn teardown(&self) {
        let (callback, codec, placeholder) = {
            let mut state = self.state.borrow_mut();
            state.generation += 1;
            state.codec_loading = false;
            state.decode_in_flight = false;
            state.current_image = None;
            state.image_info = None;
            state.error_reported = false;
            state.placeholder_done = false;
            state.reset_animation();
            (state.frame_callback.take(), state.codec.take(), state.placeholder.take())
        };

        if let Some(id) = callback {
            self.clock.cancel_frame(id);
        }
        if let Some(codec) = codec {
            codec.cancel();
            log::debug!("🧹 会话已拆除并取消 codec: {}", codec::redact_locator_for_log(self.key.locator()));
        }
        if let Some(attachment) = placeholder {
            attachment.detach();
        }
        if let Some(session) = self.weak_self.upgrade() {
            registry::unregister(&self.key, &session);
        }
    }

    /// codec 已丢失、没有在途加载、没有缓冲帧也没有待触发回调时，需要重建。
    fn needs_recreation(&self) -> bool {
        let state = self.state.borrow();
        if self.key.is_dimension_only() && state.image_info.is_some() {
            return false;
        }
        state.codec.is_none() && !state.codec_loading && state.next_frame.is_none() && state.frame_callback.is_none()
    }

    fn recreate(&self) {
        log::debug!("🔁 重建 codec: {}", codec::redact_locator_for_log(self.key.locator()));
        self.state.borrow_mut().reset_animation();
        self.start_placeholder();
        self.load_codec();
    }

    /// 向全部监听器分发图像。回调失败逐个上报，不影响其他监听器。
    fn emit_image(&self, frame: &ImageFrame) {
        let listeners = self.state.borrow().listeners.snapshot();
        for listener in listeners {
            if let Err(err) = listener.on_image(frame, false) {
                self.report_listener_error(err);
            }
        }
    }

    fn emit_dimensions(&self, info: &ImageInfo) {
        if !info.is_well_formed() {
            log::warn!(
                "⚠️ 忽略不合法的尺寸元数据 - 来源: {} 记录: {:?}",
                codec::redact_locator_for_log(self.key.locator()),
                info.to_fields()
            );
            return;
        }

        let listeners = self.state.borrow().listeners.snapshot();
        for listener in listeners {
            if let Err(err) = listener.on_dimensions(info) {
                self.report_listener_error(err);
            }
        }
    }

    /// 新监听器挂载时同步补发已有结果。
    fn deliver_current(&self, listener: &Rc<dyn ImageStreamListener>) {
        let (image, info) = {
            let state = self.state.borrow();
            (state.current_image.clone(), state.image_info)
        };

        let result = if self.key.is_dimension_only() {
            match info.filter(ImageInfo::is_well_formed) {
                Some(info) => listener.on_dimensions(&info),
                None => Ok(()),
            }
        } else {
            match image {
                Some(image) => listener.on_image(&image, true),
                None => Ok(()),
            }
        };

        if let Err(err) = result {
            self.report_listener_error(err);
        }
    }

    fn report_listener_error(&self, source: ListenerError) {
        let error = ImageStreamError::Listener {
            locator: self.key.locator().to_string(),
            source,
        };
        diagnostics::report_error(
            ErrorReport::new("通知图片监听器", error)
                .silent()
                .with_info("locator", codec::redact_locator_for_log(self.key.locator())),
        );
    }

    /// 上报 codec 解析/解码失败。
    ///
    /// 诊断通道同一代际只收到一次；监听器的 `on_error` 每次失败都会通知，
    /// 包括重建失败时新挂载的监听器。
    fn report_failure(&self, context: &str, error: ImageStreamError) {
        let first_report = {
            let mut state = self.state.borrow_mut();
            !std::mem::replace(&mut state.error_reported, true)
        };
        if first_report {
            diagnostics::report_error(
                ErrorReport::new(context, error.clone())
                    .silent()
                    .with_info("locator", codec::redact_locator_for_log(self.key.locator()))
                    .with_info("dimension_only", self.key.is_dimension_only().to_string()),
            );
        } else {
            log::debug!("重复错误不再上报诊断 - [{}] {}", error.code(), error);
        }

        let listeners = self.state.borrow().listeners.snapshot();
        for listener in listeners {
            listener.on_error(&error);
        }
    }
}

impl ImageStream for DecodeSession {
    fn add_listener(&self, listener: Rc<dyn ImageStreamListener>) -> ListenerToken {
        let (token, was_empty) = {
            let mut state = self.state.borrow_mut();
            let was_empty = state.listeners.is_empty();
            (state.listeners.insert(Rc::clone(&listener)), was_empty)
        };

        if was_empty {
            if let Some(session) = self.weak_self.upgrade() {
                if !registry::register(self.key.clone(), session) {
                    log::warn!(
                        "⚠️ 会话未能登记，将独立解码: {}",
                        codec::redact_locator_for_log(self.key.locator())
                    );
                }
            }
        }

        self.deliver_current(&listener);

        // 同步补发期间监听器可能已经卸载自己并拆除了会话。
        if self.state.borrow().listeners.is_empty() {
            return token;
        }

        if self.needs_recreation() {
            self.recreate();
        } else if was_empty && self.state.borrow().codec.is_some() {
            self.decode_next_unit();
        }

        token
    }

    fn remove_listener(&self, token: ListenerToken) {
        let (removed, now_empty) = {
            let mut state = self.state.borrow_mut();
            let removed = state.listeners.remove(token);
            (removed, state.listeners.is_empty())
        };

        if removed.is_none() {
            log::trace!("忽略未知的监听器凭证: {:?}", token);
            return;
        }
        drop(removed);

        if now_empty {
            self.teardown();
        }
    }
}

impl fmt::Debug for DecodeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("DecodeSession");
        debug.field("key", &self.key);
        if let Ok(state) = self.state.try_borrow() {
            debug
                .field("listeners", &state.listeners.len())
                .field("codec", &state.codec.is_some())
                .field("emitted_frames", &state.emitted_frames)
                .field("generation", &state.generation);
        }
        debug.finish()
    }
}
