//! codec 初始化与解码单元。
//!
//! 每个异步结果回到协调线程后先做过期检查，再修改会话状态。

use std::rc::Rc;

use crate::cache::metadata::{self, ImageInfo};
use crate::codec::{self, Codec, DecodedFrame};
use crate::error::{CodecError, ImageStreamError};
use crate::listener::ImageFrame;

use super::{DecodeSession, SessionState};

fn is_current(state: &SessionState, codec: &Rc<dyn Codec>) -> bool {
    state
        .codec
        .as_ref()
        .map(|current| Rc::ptr_eq(current, codec))
        .unwrap_or(false)
}

impl DecodeSession {
    /// 请求 codec 初始化（挂起点 1）。
    ///
    /// 仅尺寸请求命中元数据缓存时不创建 codec，直接采用缓存结果。
    pub(super) fn load_codec(&self) {
        if self.key.is_dimension_only() {
            if let Some(info) = metadata::cached_info(&self.key.metadata_key()) {
                log::trace!("🗂️ 元数据缓存命中，跳过 codec: {}", self.key.locator());
                let has_listeners = {
                    let mut state = self.state.borrow_mut();
                    state.image_info = Some(info);
                    !state.listeners.is_empty()
                };
                if has_listeners {
                    self.emit_dimensions(&info);
                }
                return;
            }
        }

        let generation = {
            let mut state = self.state.borrow_mut();
            state.codec_loading = true;
            state.generation
        };

        let pending = self.codec_provider.instantiate(&self.key.codec_request());
        let weak = self.weak_self.clone();

        tokio::task::spawn_local(async move {
            let result = pending.await;
            match weak.upgrade() {
                Some(session) => session.on_codec_ready(generation, result),
                None => {
                    if let Ok(codec) = result {
                        codec.cancel();
                    }
                }
            }
        });
    }

    fn on_codec_ready(&self, generation: u64, result: Result<Rc<dyn Codec>, CodecError>) {
        let current = {
            let mut state = self.state.borrow_mut();
            let current = state.generation == generation;
            if current {
                state.codec_loading = false;
            }
            current
        };

        if !current {
            log::debug!("丢弃过期的 codec 初始化结果: {}", codec::redact_locator_for_log(self.key.locator()));
            if let Ok(stale) = result {
                stale.cancel();
            }
            return;
        }

        match result {
            Err(source) => {
                let error = ImageStreamError::CodecResolution {
                    locator: self.key.locator().to_string(),
                    source,
                };
                self.report_failure("解析图片 codec", error);
            }
            Ok(ready) => {
                log::debug!(
                    "✅ codec 就绪 - 来源: {} 帧数: {}",
                    codec::redact_locator_for_log(self.key.locator()),
                    ready.frame_count()
                );
                let has_listeners = {
                    let mut state = self.state.borrow_mut();
                    state.codec = Some(ready);
                    !state.listeners.is_empty()
                };
                if has_listeners {
                    self.decode_next_unit();
                }
            }
        }
    }

    pub(super) fn decode_next_unit(&self) {
        if self.key.is_dimension_only() {
            self.decode_dimensions();
        } else {
            self.decode_frame();
        }
    }

    /// 尺寸单元：会话缓存 → 元数据缓存 → codec 查询。
    fn decode_dimensions(&self) {
        if self.state.borrow().image_info.is_some() {
            return;
        }

        if let Some(info) = metadata::cached_info(&self.key.metadata_key()) {
            log::trace!("🗂️ 元数据缓存命中: {}", self.key.locator());
            self.state.borrow_mut().image_info = Some(info);
            self.emit_dimensions(&info);
            return;
        }

        let Some(codec) = self.begin_decode() else {
            return;
        };

        let pending = codec.image_info();
        let weak = self.weak_self.clone();
        tokio::task::spawn_local(async move {
            let result = pending.await;
            if let Some(session) = weak.upgrade() {
                session.on_dimensions_ready(&codec, result);
            }
        });
    }

    fn on_dimensions_ready(&self, codec: &Rc<dyn Codec>, result: Result<Option<ImageInfo>, CodecError>) {
        if !self.finish_decode(codec) {
            return;
        }

        match result {
            Ok(Some(info)) => {
                self.state.borrow_mut().image_info = Some(info);
                metadata::store_info(self.key.metadata_key(), info);
                self.emit_dimensions(&info);
            }
            Ok(None) => {
                log::debug!("codec 未提供尺寸元数据: {}", codec::redact_locator_for_log(self.key.locator()));
            }
            Err(source) => self.fail_decode("查询图片尺寸", source),
        }
    }

    /// 像素单元：取下一帧（挂起点 2）。
    pub(super) fn decode_frame(&self) {
        let Some(codec) = self.begin_decode() else {
            return;
        };

        let pending = codec.next_frame();
        let weak = self.weak_self.clone();
        tokio::task::spawn_local(async move {
            let result = pending.await;
            if let Some(session) = weak.upgrade() {
                session.on_frame_decoded(&codec, result);
            }
        });
    }

    fn on_frame_decoded(&self, codec: &Rc<dyn Codec>, result: Result<DecodedFrame, CodecError>) {
        if !self.finish_decode(codec) {
            return;
        }

        let frame = match result {
            Ok(frame) => frame,
            Err(source) => {
                self.fail_decode("解码图片帧", source);
                return;
            }
        };

        let frame_count = codec.frame_count();
        if frame_count <= 1 {
            self.apply_single_frame(frame);
            return;
        }

        let first_frame = {
            let state = self.state.borrow();
            !state.is_multiframe
        };
        if first_frame {
            let info = ImageInfo {
                width: frame.image.width(),
                height: frame.image.height(),
                frame_count,
                total_duration_ms: codec.total_duration().as_millis() as u64,
                repetition_count: codec.repetition_count(),
            };
            {
                let mut state = self.state.borrow_mut();
                state.is_multiframe = true;
                state.image_info = Some(info);
            }
            metadata::store_info(self.key.metadata_key(), info);
        }

        self.state.borrow_mut().next_frame = Some(frame);
        self.schedule_frame_callback();
    }

    /// 静态图：直接展示，写入元数据后不再调度。
    fn apply_single_frame(&self, frame: DecodedFrame) {
        let image = ImageFrame::new(frame.image, self.key.scale());
        let info = ImageInfo::single_frame(image.width(), image.height());

        {
            let mut state = self.state.borrow_mut();
            state.current_image = Some(image.clone());
            state.image_info = Some(info);
            state.emitted_frames += 1;
        }
        metadata::store_info(self.key.metadata_key(), info);

        self.detach_placeholder();
        self.emit_image(&image);
    }

    /// 标记一次解码在途，返回当前 codec。已有在途解码或没有 codec 时返回 `None`。
    fn begin_decode(&self) -> Option<Rc<dyn Codec>> {
        let mut state = self.state.borrow_mut();
        if state.decode_in_flight {
            return None;
        }
        let codec = state.codec.clone()?;
        state.decode_in_flight = true;
        Some(codec)
    }

    /// 解码结果回到协调线程。codec 已被替换时返回 `false`，结果作废。
    fn finish_decode(&self, codec: &Rc<dyn Codec>) -> bool {
        let mut state = self.state.borrow_mut();
        if !is_current(&state, codec) {
            log::debug!("丢弃过期 codec 的解码结果: {}", codec::redact_locator_for_log(self.key.locator()));
            return false;
        }
        state.decode_in_flight = false;
        true
    }

    /// 解码失败：丢弃 codec 并上报，等待下一次挂载触发重建。
    fn fail_decode(&self, context: &str, source: CodecError) {
        let dropped = self.state.borrow_mut().codec.take();
        if let Some(codec) = dropped {
            codec.cancel();
        }

        let error = ImageStreamError::FrameDecode {
            locator: self.key.locator().to_string(),
            source,
        };
        self.report_failure(context, error);
    }
}
