//! # 监听器与图片流契约
//!
//! ## 设计思路
//!
//! 会话只维护**一份**自己拥有的监听器集合，通过 `add_listener` / `remove_listener`
//! 暴露；宿主框架的“流完成器”基类在这里变成一个被实现的 trait（`ImageStream`），
//! 不依赖任何隐藏的内部状态。
//!
//! - 每次挂载返回稳定的 `ListenerToken`，卸载只凭 token，不需要重新构造“等价”的回调对象。
//! - 回调返回 `Result`，失败由会话逐个隔离并上报。
//! - 分发前先复制快照，回调内部增删监听器不会影响本轮遍历。

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use image::RgbaImage;

use crate::cache::metadata::ImageInfo;
use crate::error::{ImageStreamError, ListenerError};
use crate::key::ImageConfiguration;

/// 交给监听器的一帧图像。
///
/// 像素数据以 `Arc` 共享，同一帧分发给多个监听器不会复制。
#[derive(Clone)]
pub struct ImageFrame {
    image: Arc<RgbaImage>,
    scale: f64,
}

impl ImageFrame {
    pub fn new(image: Arc<RgbaImage>, scale: f64) -> Self {
        Self { image, scale }
    }

    pub fn image(&self) -> &Arc<RgbaImage> {
        &self.image
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// 两帧是否共享同一块像素缓冲。
    pub fn same_image(&self, other: &ImageFrame) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }
}

impl fmt::Debug for ImageFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageFrame")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("scale", &self.scale)
            .finish()
    }
}

/// 挂载凭证，卸载时原样交回。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(u64);

impl ListenerToken {
    /// 供自行实现 `ImageStream` 的图片流（例如宿主占位图）构造凭证。
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// 图片流监听器。
///
/// 所有回调都在协调线程上同步调用。
pub trait ImageStreamListener {
    /// 收到完整图像。`synchronous` 为 `true` 表示在挂载调用内部立即补发。
    fn on_image(&self, frame: &ImageFrame, synchronous: bool) -> Result<(), ListenerError>;

    /// 收到尺寸/动画元数据（仅尺寸模式）。
    fn on_dimensions(&self, _info: &ImageInfo) -> Result<(), ListenerError> {
        Ok(())
    }

    fn on_error(&self, _error: &ImageStreamError) {}
}

type ImageCallback = Box<dyn Fn(&ImageFrame, bool) -> Result<(), ListenerError>>;
type DimensionCallback = Box<dyn Fn(&ImageInfo) -> Result<(), ListenerError>>;
type ErrorCallback = Box<dyn Fn(&ImageStreamError)>;

/// 由闭包组装的监听器。
///
/// # 示例
/// ```rust
/// use ext_image_stream::listener::FnListener;
///
/// let listener = FnListener::new(|frame, _sync| {
///     println!("{}x{}", frame.width(), frame.height());
///     Ok(())
/// })
/// .with_dimensions(|info| {
///     println!("frames={}", info.frame_count);
///     Ok(())
/// })
/// .into_rc();
/// # let _ = listener;
/// ```
pub struct FnListener {
    on_image: ImageCallback,
    on_dimensions: Option<DimensionCallback>,
    on_error: Option<ErrorCallback>,
}

impl FnListener {
    pub fn new<F>(on_image: F) -> Self
    where
        F: Fn(&ImageFrame, bool) -> Result<(), ListenerError> + 'static,
    {
        Self {
            on_image: Box::new(on_image),
            on_dimensions: None,
            on_error: None,
        }
    }

    pub fn with_dimensions<F>(mut self, on_dimensions: F) -> Self
    where
        F: Fn(&ImageInfo) -> Result<(), ListenerError> + 'static,
    {
        self.on_dimensions = Some(Box::new(on_dimensions));
        self
    }

    pub fn with_error<F>(mut self, on_error: F) -> Self
    where
        F: Fn(&ImageStreamError) + 'static,
    {
        self.on_error = Some(Box::new(on_error));
        self
    }

    pub fn into_rc(self) -> Rc<dyn ImageStreamListener> {
        Rc::new(self)
    }
}

impl ImageStreamListener for FnListener {
    fn on_image(&self, frame: &ImageFrame, synchronous: bool) -> Result<(), ListenerError> {
        (self.on_image)(frame, synchronous)
    }

    fn on_dimensions(&self, info: &ImageInfo) -> Result<(), ListenerError> {
        match &self.on_dimensions {
            Some(callback) => callback(info),
            None => Ok(()),
        }
    }

    fn on_error(&self, error: &ImageStreamError) {
        if let Some(callback) = &self.on_error {
            callback(error);
        }
    }
}

/// 可监听的图片流。
pub trait ImageStream {
    fn add_listener(&self, listener: Rc<dyn ImageStreamListener>) -> ListenerToken;

    /// 未知 token 静默忽略。
    fn remove_listener(&self, token: ListenerToken);
}

/// 占位图提供者：按配置解析出自己的图片流。
///
/// 会话只消费其中第一帧，随后凭 token 卸载。
pub trait PlaceholderProvider {
    fn resolve(&self, configuration: &ImageConfiguration) -> Rc<dyn ImageStream>;
}

/// 会话持有的监听器集合。
///
/// token 单调递增，跨会话代际也不复用。
#[derive(Default)]
pub(crate) struct ListenerSet {
    next_token: u64,
    entries: Vec<(ListenerToken, Rc<dyn ImageStreamListener>)>,
}

impl ListenerSet {
    pub(crate) fn insert(&mut self, listener: Rc<dyn ImageStreamListener>) -> ListenerToken {
        let token = ListenerToken(self.next_token);
        self.next_token += 1;
        self.entries.push((token, listener));
        token
    }

    pub(crate) fn remove(&mut self, token: ListenerToken) -> Option<Rc<dyn ImageStreamListener>> {
        let pos = self.entries.iter().position(|(t, _)| *t == token)?;
        Some(self.entries.swap_remove(pos).1)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, listener: &Rc<dyn ImageStreamListener>) -> bool {
        self.entries.iter().any(|(_, l)| Rc::ptr_eq(l, listener))
    }

    pub(crate) fn snapshot(&self) -> Vec<Rc<dyn ImageStreamListener>> {
        self.entries.iter().map(|(_, l)| Rc::clone(l)).collect()
    }
}
