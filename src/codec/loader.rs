//! # 加载与校验模块
//!
//! ## 设计思路
//!
//! 统一处理内置 codec 支持的几种定位符，并在“尽可能早”的阶段执行输入校验，
//! 尽快失败，减少不必要的内存与 CPU 消耗。
//!
//! ## 实现思路
//!
//! - `data:image/...;base64,`：估算解码后体积 → 超限直接拒绝 → 解码。
//! - `file://` 与普通路径：存在性 + metadata 体积限制 + 读取。
//! - `http(s)://`：内置 codec 不做网络请求，直接报来源错误。
//! - 最后统一用 `infer` 校验文件签名必须是图片。
//!
//! 本模块是同步代码，由调用方放到阻塞线程池执行。

use std::path::Path;

use base64::{Engine as _, engine::general_purpose};

use crate::config::ImageStreamConfig;
use crate::error::CodecError;

/// 加载阶段输出：原始字节与来源标识。
pub struct RawImageData {
    pub bytes: Vec<u8>,
    /// 来源提示（用于日志与诊断）。
    pub source_hint: &'static str,
}

/// 按定位符加载原始字节。
pub(crate) fn load_source(locator: &str, config: &ImageStreamConfig) -> Result<RawImageData, CodecError> {
    let trimmed = locator.trim();

    if trimmed.starts_with("data:") {
        return load_from_data_url(trimmed, config);
    }

    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Err(CodecError::Source(format!(
            "内置 codec 不支持网络地址：{}",
            redact_locator_for_log(trimmed)
        )));
    }

    let path = trimmed.strip_prefix("file://").unwrap_or(trimmed);
    load_from_file(path, config)
}

fn load_from_data_url(data: &str, config: &ImageStreamConfig) -> Result<RawImageData, CodecError> {
    log::debug!("📝 开始解析 data URL 图片");

    let bytes = parse_base64_with_limit(data, config.max_file_size)?;
    validate_image_signature(&bytes)?;

    Ok(RawImageData {
        bytes,
        source_hint: "data-url",
    })
}

fn load_from_file(path: &str, config: &ImageStreamConfig) -> Result<RawImageData, CodecError> {
    log::debug!("📁 开始读取本地图片 - 路径: {}", path);

    let file_path = Path::new(path);
    if !file_path.exists() {
        return Err(CodecError::Source(format!("文件不存在：{}", path)));
    }

    let metadata = std::fs::metadata(file_path)
        .map_err(|e| CodecError::Source(format!("无法读取文件信息：{}", e)))?;

    if metadata.len() > config.max_file_size {
        return Err(CodecError::ResourceLimit(format!(
            "文件过大：{:.2} MB（限制：{:.2} MB）",
            metadata.len() as f64 / 1024.0 / 1024.0,
            config.max_file_size as f64 / 1024.0 / 1024.0
        )));
    }

    let bytes = std::fs::read(file_path)
        .map_err(|e| CodecError::Source(format!("无法读取图片文件：{}", e)))?;
    validate_image_signature(&bytes)?;

    Ok(RawImageData {
        bytes,
        source_hint: "file",
    })
}

fn estimate_base64_decoded_upper_bound_len(base64_data: &str) -> Result<u64, CodecError> {
    let len = base64_data.trim().len() as u64;
    let groups = len
        .checked_add(3)
        .ok_or_else(|| CodecError::ResourceLimit("Base64 输入长度溢出".to_string()))?
        / 4;

    groups
        .checked_mul(3)
        .ok_or_else(|| CodecError::ResourceLimit("Base64 解码体积估算溢出".to_string()))
}

/// 解析 `data:image/...;base64,` 形式的定位符。
fn parse_base64_with_limit(data: &str, max_file_size: u64) -> Result<Vec<u8>, CodecError> {
    let normalized = data.trim();

    if !normalized.starts_with("data:image/") {
        return Err(CodecError::InvalidFormat("data URL 必须是 image/* 类型".to_string()));
    }

    let base64_start = normalized
        .find(";base64,")
        .ok_or_else(|| CodecError::InvalidFormat("缺少 base64 标记".to_string()))?;
    let base64_data = &normalized[base64_start + 8..];
    let estimated_len = estimate_base64_decoded_upper_bound_len(base64_data)?;

    if estimated_len > max_file_size {
        return Err(CodecError::ResourceLimit(format!(
            "Base64 预计解码体积过大：{:.2} MB（限制：{:.2} MB）",
            estimated_len as f64 / 1024.0 / 1024.0,
            max_file_size as f64 / 1024.0 / 1024.0
        )));
    }

    general_purpose::STANDARD
        .decode(base64_data.trim())
        .map_err(|e| CodecError::Decode(format!("Base64 解码失败：{}", e)))
}

fn validate_image_signature(bytes: &[u8]) -> Result<(), CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::InvalidFormat("图片内容为空".to_string()));
    }

    let kind = infer::get(bytes)
        .ok_or_else(|| CodecError::InvalidFormat("无法识别图片类型".to_string()))?;

    if kind.matcher_type() != infer::MatcherType::Image {
        return Err(CodecError::InvalidFormat(format!(
            "文件签名不是图片类型：{}",
            kind.mime_type()
        )));
    }

    Ok(())
}

/// 日志中只保留定位符的前缀，避免把整段 base64 或查询参数打进日志。
pub(crate) fn redact_locator_for_log(locator: &str) -> String {
    if let Some(comma) = locator.find(',').filter(|_| locator.starts_with("data:")) {
        return format!("{},<{} bytes>", &locator[..comma], locator.len() - comma - 1);
    }

    let end = locator.find(['?', '#']).unwrap_or(locator.len());
    locator[..end].to_string()
}
