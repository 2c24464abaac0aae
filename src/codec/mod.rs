//! # 编解码器契约与内置实现
//!
//! ## 设计思路
//!
//! 会话不关心图片如何解码，只依赖两个 trait：
//!
//! - `CodecProvider`：根据定位符与解码参数构建 codec（异步，挂起点 1）。
//! - `Codec`：逐帧取图 / 查询尺寸元数据（异步，挂起点 2），以及取消。
//!
//! 所有 future 都是 `!Send` 的本地 future，由协调线程上的 `LocalSet` 驱动；
//! codec 可以把真正的解码放到别的执行上下文，但结果必须回到协调线程后才交给会话。
//!
//! ## 模块划分
//!
//! - `loader`：从文件路径 / `file://` / `data:` URL 读取原始字节并校验签名
//! - `pipeline`：解码（含动图逐帧）、像素与内存限制、缩放到目标尺寸
//! - `image_codec`：基于 `image` crate 的内置 `CodecProvider`

mod image_codec;
mod loader;
mod pipeline;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;

use crate::cache::metadata::ImageInfo;
use crate::error::CodecError;

pub use image_codec::{ImageCrateCodec, ImageCrateCodecProvider};
pub use loader::RawImageData;
pub(crate) use loader::redact_locator_for_log;

/// 协调线程上的装箱 future。
pub type LocalBoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// 构建 codec 所需的参数。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecRequest {
    pub locator: String,
    pub target_width: Option<u32>,
    pub target_height: Option<u32>,
    pub parameters: BTreeMap<String, String>,
    /// 只需要尺寸/动画元数据；codec 可以跳过像素解码。
    pub dimension_only: bool,
}

impl CodecRequest {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            target_width: None,
            target_height: None,
            parameters: BTreeMap::new(),
            dimension_only: false,
        }
    }
}

/// 解码出的一帧及其请求的展示时长。
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub image: Arc<RgbaImage>,
    pub duration: Duration,
}

pub trait Codec {
    fn frame_count(&self) -> u32;

    /// -1 无限循环，0 播放一次，N 重复 N 次。
    fn repetition_count(&self) -> i32;

    /// 整段动画时长；单帧图为 0。
    fn total_duration(&self) -> Duration;

    /// 取下一帧；到达末帧后从头循环。
    fn next_frame(&self) -> LocalBoxFuture<'static, Result<DecodedFrame, CodecError>>;

    /// 查询轻量尺寸元数据；无法提供时返回 `Ok(None)`。
    fn image_info(&self) -> LocalBoxFuture<'static, Result<Option<ImageInfo>, CodecError>>;

    /// 通知 codec 放弃在途工作。可重复调用。
    fn cancel(&self);
}

pub trait CodecProvider {
    fn instantiate(&self, request: &CodecRequest) -> LocalBoxFuture<'static, Result<Rc<dyn Codec>, CodecError>>;
}
