//! # 外部图片提供者
//!
//! ## 设计思路
//!
//! 使用方按 `ImageKey` 请求图片流：活跃会话表里已有同键会话时直接复用，
//! 否则用提供者持有的 codec 提供者与帧时钟创建新会话。
//! 仅尺寸请求通过 `resolve_dimensions` 绑定尺寸配置，与像素请求互不共享会话。
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use ext_image_stream::key::ImageKey;
//! use ext_image_stream::listener::{FnListener, ImageStream};
//! use ext_image_stream::provider::ExternalImageProvider;
//!
//! # async fn demo() {
//! let provider = ExternalImageProvider::with_defaults();
//! let session = provider.resolve(&ImageKey::new("/tmp/photo.png").with_target_size(Some(256), None));
//! let token = session.add_listener(FnListener::new(|frame, _| {
//!     log::info!("{}x{}", frame.width(), frame.height());
//!     Ok(())
//! }).into_rc());
//! // ...
//! session.remove_listener(token);
//! # }
//! ```

use std::rc::Rc;

use crate::cache::metadata::{self, ImageInfo};
use crate::cache::registry;
use crate::codec::{self, CodecProvider, ImageCrateCodecProvider};
use crate::config;
use crate::frame_clock::{FrameClock, TokioFrameClock};
use crate::key::{ImageConfiguration, ImageKey};
use crate::listener::{ImageStream, PlaceholderProvider};
use crate::session::DecodeSession;

#[derive(Clone)]
pub struct ExternalImageProvider {
    codec_provider: Rc<dyn CodecProvider>,
    clock: Rc<dyn FrameClock>,
}

impl ExternalImageProvider {
    pub fn new(codec_provider: Rc<dyn CodecProvider>, clock: Rc<dyn FrameClock>) -> Self {
        Self { codec_provider, clock }
    }

    /// 内置 `image` codec + 按配置间隔自驱动的帧时钟。需要在 `LocalSet` 中使用。
    pub fn with_defaults() -> Self {
        let config = config::config_snapshot();
        Self::new(
            Rc::new(ImageCrateCodecProvider::with_config(config.clone())),
            Rc::new(TokioFrameClock::from_config(&config)),
        )
    }

    /// 复用同键的活跃会话或尚未挂载的新会话，否则创建新会话。
    pub fn resolve(&self, key: &ImageKey) -> Rc<DecodeSession> {
        if let Some(session) = registry::lookup_or_pending(key) {
            log::debug!("♻️ 复用解码会话: {}", codec::redact_locator_for_log(key.locator()));
            return session;
        }
        let session = DecodeSession::new(key.clone(), Rc::clone(&self.codec_provider), Rc::clone(&self.clock));
        registry::track_pending(key.clone(), &session);
        session
    }

    /// 以仅尺寸配置解析，监听器通过 `on_dimensions` 接收元数据。
    pub fn resolve_dimensions(&self, key: &ImageKey) -> Rc<DecodeSession> {
        self.resolve(&key.with_configuration(ImageConfiguration::for_dimensions()))
    }

    /// 只查元数据缓存，不触发解码。
    pub fn cached_dimensions(&self, key: &ImageKey) -> Option<ImageInfo> {
        metadata::cached_info(&key.metadata_key())
    }

    /// 移除该键的元数据缓存条目（例如来源文件已变化）。
    pub fn evict_metadata(&self, key: &ImageKey) -> Option<ImageInfo> {
        metadata::evict_info(&key.metadata_key())
    }
}

/// 以另一个外部图片作为占位图（例如缩略图）。
pub struct KeyedPlaceholder {
    provider: ExternalImageProvider,
    key: ImageKey,
}

impl KeyedPlaceholder {
    pub fn new(provider: ExternalImageProvider, key: ImageKey) -> Self {
        Self { provider, key }
    }
}

impl PlaceholderProvider for KeyedPlaceholder {
    fn resolve(&self, configuration: &ImageConfiguration) -> Rc<dyn ImageStream> {
        self.provider.resolve(&self.key.with_configuration(configuration.clone()))
    }
}
