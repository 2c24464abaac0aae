//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 图片流子系统内的所有错误都是“非致命”的：它嵌在更大的 UI 宿主里，
//! 任何解码失败都不应该让宿主进程崩溃。因此这里把错误分成两层：
//!
//! - `CodecError`：编解码器（含内置 `image` 解码器）返回的底层错误。
//! - `ImageStreamError`：会话对外报告的错误分类（codec 解析失败 / 帧解码失败 /
//!   监听器回调失败 / 占位图失败），最终进入诊断通道。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息，调用侧可按分支匹配。
//! - 不提供 `From<CodecError> for ImageStreamError`：同一个 codec 错误落在哪个
//!   分类，由会话根据所处阶段决定。
//! - 监听器回调返回 `ListenerError`，由会话逐个隔离并上报。

/// 编解码器错误。
///
/// 由 [`crate::codec::CodecProvider`] 与 [`crate::codec::Codec`] 的实现返回。
#[derive(Debug, Clone, thiserror::Error)]
pub enum CodecError {
    /// 源数据无法读取（文件不存在、data URL 解析失败等）。
    #[error("来源错误：{0}")]
    Source(String),

    #[error("格式错误：{0}")]
    InvalidFormat(String),

    #[error("解码错误：{0}")]
    Decode(String),

    /// 超出像素数 / 内存 / 文件体积上限。
    #[error("资源限制：{0}")]
    ResourceLimit(String),

    /// codec 已被取消，在途结果不再有效。
    #[error("解码已取消")]
    Cancelled,

    /// 后台执行上下文异常（例如阻塞任务 panic 或被中止）。
    #[error("运行时错误：{0}")]
    Runtime(String),
}

/// 监听器回调失败。
///
/// 会话会捕获并上报，不会影响其他监听器，也不会改变会话自身状态。
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// 会话对外报告的错误分类。
#[derive(Debug, Clone, thiserror::Error)]
pub enum ImageStreamError {
    /// codec 无法构建；每个会话代际只报告一次，会话保持可挂载但静止。
    #[error("codec 解析失败（{locator}）：{source}")]
    CodecResolution {
        locator: String,
        #[source]
        source: CodecError,
    },

    /// 取帧或查询尺寸信息时失败；该会话停止解码直到下一次重建。
    #[error("帧解码失败（{locator}）：{source}")]
    FrameDecode {
        locator: String,
        #[source]
        source: CodecError,
    },

    /// 使用方提供的回调返回错误。
    #[error("监听器回调失败（{locator}）：{source}")]
    Listener {
        locator: String,
        #[source]
        source: ListenerError,
    },

    /// 占位图流报告的错误。
    #[error("占位图加载失败（{locator}）：{message}")]
    Placeholder { locator: String, message: String },
}

impl ImageStreamError {
    /// 稳定的错误码，便于日志检索与测试断言。
    pub fn code(&self) -> &'static str {
        match self {
            Self::CodecResolution { .. } => "codec_resolution",
            Self::FrameDecode { .. } => "frame_decode",
            Self::Listener { .. } => "listener_callback",
            Self::Placeholder { .. } => "placeholder",
        }
    }

    pub fn locator(&self) -> &str {
        match self {
            Self::CodecResolution { locator, .. }
            | Self::FrameDecode { locator, .. }
            | Self::Listener { locator, .. }
            | Self::Placeholder { locator, .. } => locator,
        }
    }
}
