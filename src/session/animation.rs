//! 动画节奏。
//!
//! 帧时钟每次回调时判断缓冲帧是否到期：首帧立即展示，之后必须等上一帧的请求时长走完；
//! 未到期就在下一次回调再检查，节奏由帧时钟决定，不另设定时器。
//!
//! 重复次数判断保留 `completed_cycles <= repetition_count`：重复次数为 N 的动画
//! 实际播放 N+1 轮，与既有宿主行为保持一致。

use std::time::Duration;

use crate::cache::metadata::ImageInfo;
use crate::listener::ImageFrame;

use super::DecodeSession;

/// 缓冲帧是否可以展示。
pub(crate) fn frame_due(shown_timestamp: Option<Duration>, now: Duration, previous_duration: Duration) -> bool {
    match shown_timestamp {
        None => true,
        Some(shown) => now.saturating_sub(shown) >= previous_duration,
    }
}

/// 已展示 `emitted_frames` 帧后是否继续解码下一帧。
pub(crate) fn should_continue(emitted_frames: u32, frame_count: u32, repetition_count: i32) -> bool {
    if repetition_count == ImageInfo::REPEAT_INFINITE {
        return true;
    }
    if frame_count == 0 {
        return false;
    }
    let completed_cycles = i64::from(emitted_frames / frame_count);
    completed_cycles <= i64::from(repetition_count)
}

impl DecodeSession {
    /// 注册一次帧回调（挂起点 3）。已有待触发回调时不重复注册。
    pub(super) fn schedule_frame_callback(&self) {
        if self.state.borrow().frame_callback.is_some() {
            return;
        }

        let weak = self.weak_self.clone();
        let id = self.clock.schedule_frame(Box::new(move |timestamp| {
            if let Some(session) = weak.upgrade() {
                session.handle_frame_tick(timestamp);
            }
        }));
        self.state.borrow_mut().frame_callback = Some(id);
    }

    fn handle_frame_tick(&self, timestamp: Duration) {
        let due = {
            let mut state = self.state.borrow_mut();
            state.frame_callback = None;
            if state.listeners.is_empty() || state.next_frame.is_none() {
                return;
            }
            frame_due(state.shown_timestamp, timestamp, state.frame_duration)
        };

        if !due {
            self.schedule_frame_callback();
            return;
        }

        let emitted = {
            let mut state = self.state.borrow_mut();
            state.next_frame.take().map(|frame| {
                let image = ImageFrame::new(frame.image, self.key.scale());
                state.current_image = Some(image.clone());
                state.shown_timestamp = Some(timestamp);
                state.frame_duration = frame.duration;
                state.emitted_frames += 1;
                (image, state.emitted_frames, state.codec.clone())
            })
        };
        let Some((image, emitted_frames, codec)) = emitted else {
            return;
        };

        log::trace!("🎬 展示第 {} 帧 @ {:?}", emitted_frames, timestamp);
        self.detach_placeholder();
        self.emit_image(&image);

        let Some(codec) = codec else {
            return;
        };
        if should_continue(emitted_frames, codec.frame_count(), codec.repetition_count()) {
            self.decode_frame();
        } else {
            log::debug!("⏹️ 动画播放结束，共展示 {} 帧", emitted_frames);
        }
    }
}
