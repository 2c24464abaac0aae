//! 占位图。
//!
//! 会话只消费占位图流的第一帧：尚未展示真实帧时把它作为当前图像分发，随后凭 token 卸载。
//! 占位图监听器通过 `Weak` 回指会话，不形成引用环。

use std::rc::{Rc, Weak};

use crate::diagnostics::{self, ErrorReport};
use crate::error::{ImageStreamError, ListenerError};
use crate::listener::{ImageFrame, ImageStream, ImageStreamListener, ListenerToken};

use super::DecodeSession;

/// 会话对占位图流的挂载。
pub(super) struct PlaceholderAttachment {
    stream: Rc<dyn ImageStream>,
    token: ListenerToken,
}

impl PlaceholderAttachment {
    pub(super) fn detach(self) {
        self.stream.remove_listener(self.token);
    }
}

struct PlaceholderListener {
    session: Weak<DecodeSession>,
}

impl ImageStreamListener for PlaceholderListener {
    fn on_image(&self, frame: &ImageFrame, _synchronous: bool) -> Result<(), ListenerError> {
        if let Some(session) = self.session.upgrade() {
            session.apply_placeholder(frame);
        }
        Ok(())
    }

    fn on_error(&self, error: &ImageStreamError) {
        if let Some(session) = self.session.upgrade() {
            session.report_placeholder_error(error);
        }
    }
}

impl DecodeSession {
    /// 配置了占位图、不是仅尺寸请求、也还没有任何图像时开始加载占位图。
    pub(super) fn start_placeholder(&self) {
        if self.key.is_dimension_only() {
            return;
        }
        let Some(provider) = self.key.placeholder().cloned() else {
            return;
        };
        {
            let mut state = self.state.borrow_mut();
            if state.placeholder.is_some() || state.current_image.is_some() {
                return;
            }
            state.placeholder_done = false;
        }

        let configuration = self.key.configuration().cloned().unwrap_or_default();
        let stream = provider.resolve(&configuration);
        let listener: Rc<dyn ImageStreamListener> = Rc::new(PlaceholderListener {
            session: self.weak_self.clone(),
        });
        let token = stream.add_listener(listener);

        let attachment = PlaceholderAttachment { stream, token };
        let done = self.state.borrow().placeholder_done;
        if done {
            // 挂载时已同步拿到首帧。
            attachment.detach();
        } else {
            self.state.borrow_mut().placeholder = Some(attachment);
        }
    }

    fn apply_placeholder(&self, frame: &ImageFrame) {
        let show = {
            let mut state = self.state.borrow_mut();
            if state.placeholder_done {
                return;
            }
            state.placeholder_done = true;
            let show = state.current_image.is_none();
            if show {
                state.current_image = Some(frame.clone());
            }
            show
        };

        log::debug!("🖼️ 占位图就绪 - 展示: {}", show);
        self.detach_placeholder();
        if show {
            self.emit_image(frame);
        }
    }

    /// 卸载占位图流；未挂载时无操作。
    pub(super) fn detach_placeholder(&self) {
        let attachment = {
            let mut state = self.state.borrow_mut();
            state.placeholder_done = true;
            state.placeholder.take()
        };
        if let Some(attachment) = attachment {
            attachment.detach();
        }
    }

    fn report_placeholder_error(&self, error: &ImageStreamError) {
        let error = ImageStreamError::Placeholder {
            locator: self.key.locator().to_string(),
            message: error.to_string(),
        };
        diagnostics::report_error(ErrorReport::new("加载占位图", error).silent());
    }
}
