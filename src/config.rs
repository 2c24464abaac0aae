//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有“可调策略”集中到 `ImageStreamConfig`，保证运行时行为可观测、可调整、可测试。
//! 解码档位（quality / balanced / speed）作为高层语义，映射到底层缩放滤镜。
//!
//! ## 实现思路
//!
//! - `Default` 提供生产可用的平衡配置（尺寸元数据缓存容量 200）。
//! - 进程级配置放在 `Lazy<RwLock<_>>` 中，首次访问时初始化，从不显式销毁。
//! - `apply_runtime_settings` 从宿主的 JSON 设置对象读取少量字段，并做范围钳制。
//! - 单次解码使用“同一配置快照”，避免处理中途配置漂移。

use std::sync::RwLock;

use image::imageops::FilterType;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

pub const DEFAULT_METADATA_CACHE_CAPACITY: usize = 200;
const METADATA_CACHE_CAPACITY_MIN: usize = 16;
const METADATA_CACHE_CAPACITY_MAX: usize = 4096;

/// 图片流配置。
///
/// 字段覆盖元数据缓存、内置 codec 的读取/解码限制与缩放策略、默认帧时钟间隔。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImageStreamConfig {
    /// 尺寸元数据 LRU 缓存容量。
    pub metadata_cache_capacity: usize,
    /// 读取原始字节时允许的最大体积（字节）。
    pub max_file_size: u64,
    /// 单帧解码后的像素上限（`width * height`）。
    pub max_decoded_pixels: u64,
    /// 全部帧解码后的预计内存上限（按 RGBA 估算，字节）。
    pub max_decoded_bytes: u64,
    /// 缩放到目标尺寸时使用的档位。
    pub decode_profile: DecodeProfile,
    /// `TokioFrameClock` 的帧间隔（毫秒）。
    pub frame_interval_ms: u64,
}

impl Default for ImageStreamConfig {
    fn default() -> Self {
        Self {
            metadata_cache_capacity: DEFAULT_METADATA_CACHE_CAPACITY,
            max_file_size: 50 * 1024 * 1024,
            max_decoded_pixels: 40_000_000,
            max_decoded_bytes: 256 * 1024 * 1024,
            decode_profile: DecodeProfile::Balanced,
            frame_interval_ms: 16,
        }
    }
}

impl ImageStreamConfig {
    /// 当前档位对应的缩放滤镜。
    pub fn resize_filter(&self) -> FilterType {
        self.decode_profile.resize_filter()
    }
}

/// 解码档位（面向产品语义）。
///
/// - `Quality`：尽量保真
/// - `Balanced`：质量与性能平衡
/// - `Speed`：优先解码速度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeProfile {
    Quality,
    Balanced,
    Speed,
}

impl DecodeProfile {
    /// 从外部字符串解析档位。
    ///
    /// # 示例
    /// ```rust
    /// use ext_image_stream::config::DecodeProfile;
    ///
    /// let p = DecodeProfile::parse("Balanced")?;
    /// assert_eq!(p.as_str(), "balanced");
    /// # Ok::<(), ext_image_stream::error::CodecError>(())
    /// ```
    pub fn parse(profile: &str) -> Result<Self, CodecError> {
        match profile.trim().to_lowercase().as_str() {
            "quality" => Ok(Self::Quality),
            "balanced" => Ok(Self::Balanced),
            "speed" => Ok(Self::Speed),
            other => Err(CodecError::InvalidFormat(format!(
                "未知解码档位：{}（可选：quality / balanced / speed）",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quality => "quality",
            Self::Balanced => "balanced",
            Self::Speed => "speed",
        }
    }

    pub fn resize_filter(self) -> FilterType {
        match self {
            Self::Quality => FilterType::CatmullRom,
            Self::Balanced => FilterType::Triangle,
            Self::Speed => FilterType::Nearest,
        }
    }
}

static GLOBAL_CONFIG: Lazy<RwLock<ImageStreamConfig>> =
    Lazy::new(|| RwLock::new(ImageStreamConfig::default()));

/// 获取进程级配置快照。
///
/// 锁中毒时继续使用恢复数据：配置只是普通值，不存在半写入状态。
pub fn config_snapshot() -> ImageStreamConfig {
    match GLOBAL_CONFIG.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => {
            log::warn!("图片流配置读锁中毒，继续使用恢复数据");
            poisoned.into_inner().clone()
        }
    }
}

/// 整体替换进程级配置。
pub fn set_global_config(config: ImageStreamConfig) {
    let mut guard = match GLOBAL_CONFIG.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *guard = config;
}

pub(crate) fn normalize_metadata_cache_capacity(value: usize) -> usize {
    value.clamp(METADATA_CACHE_CAPACITY_MIN, METADATA_CACHE_CAPACITY_MAX)
}

/// 从宿主设置对象更新运行时配置。
///
/// 识别字段：`metadataCacheCapacity`（钳制到 16~4096）、`decodeProfile`。
/// 未知或非法取值保持原配置，并记录警告。
///
/// 已创建的元数据缓存不会被立即缩容，新容量只在缓存首次创建时生效。
pub fn apply_runtime_settings(settings: &serde_json::Value) {
    let mut config = config_snapshot();

    if let Some(capacity) = settings.get("metadataCacheCapacity").and_then(|v| v.as_u64()) {
        let normalized = normalize_metadata_cache_capacity(capacity as usize);
        config.metadata_cache_capacity = normalized;
        log::debug!("🗂️ 尺寸元数据缓存容量已更新: {}", normalized);
    }

    if let Some(profile) = settings.get("decodeProfile").and_then(|v| v.as_str()) {
        match DecodeProfile::parse(profile) {
            Ok(profile) => {
                config.decode_profile = profile;
                log::debug!("⚙️ 解码档位已更新: {}", profile.as_str());
            }
            Err(err) => log::warn!("忽略非法解码档位设置: {}", err),
        }
    }

    set_global_config(config);
}
