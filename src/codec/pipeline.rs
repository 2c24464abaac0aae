//! # 解码与变换流水线模块
//!
//! ## 设计思路
//!
//! 将“字节 → 帧序列”的过程集中管理，并在关键节点增加资源上限控制。
//! 优先读取 header 做尺寸检查，再进行完整解码，降低恶意输入触发高内存开销的风险。
//!
//! ## 实现思路
//!
//! 1. 猜测格式并读取 header 尺寸，按像素上限快速拒绝
//! 2. 判断是否为动图（GIF / 动态 WebP / APNG）
//! 3. 静态图：完整解码 → 缩放到目标尺寸 → RGBA
//! 4. 动图：逐帧解码，每帧之间检查取消标志，累计内存估算
//! 5. 缩放优先走 `fast_image_resize`，失败回退 `image::imageops::resize`

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use fast_image_resize as fr;
use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::codecs::webp::WebPDecoder;
use image::imageops::FilterType;
use image::{AnimationDecoder, Frame, Frames, ImageFormat, RgbaImage};

use super::loader::RawImageData;
use super::{CodecRequest, DecodedFrame};
use crate::config::ImageStreamConfig;
use crate::error::CodecError;

/// header 探测结果。
#[derive(Debug, Clone, Copy)]
pub(crate) struct SourceProbe {
    pub(crate) format: ImageFormat,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) animated: bool,
}

/// 读取格式与 header 尺寸，并校验像素上限。
pub(crate) fn probe(raw: &RawImageData, config: &ImageStreamConfig) -> Result<SourceProbe, CodecError> {
    let format = image::guess_format(&raw.bytes)
        .map_err(|e| CodecError::InvalidFormat(format!("不支持的图片格式：{}", e)))?;

    let (width, height) = inspect_dimensions_from_memory(&raw.bytes)?;
    validate_pixel_limits(config, width, height)?;

    let animated = match format {
        ImageFormat::Gif => true,
        ImageFormat::WebP => WebPDecoder::new(Cursor::new(raw.bytes.as_slice()))
            .map(|decoder| decoder.has_animation())
            .map_err(|e| CodecError::InvalidFormat(format!("无法读取 WebP 头：{}", e)))?,
        ImageFormat::Png => PngDecoder::new(Cursor::new(raw.bytes.as_slice()))
            .and_then(|decoder| decoder.is_apng())
            .map_err(|e| CodecError::InvalidFormat(format!("无法读取 PNG 头：{}", e)))?,
        _ => false,
    };

    log::debug!(
        "🔍 图片探测 - 来源: {} 格式: {:?} 尺寸: {}x{} 动图: {}",
        raw.source_hint,
        format,
        width,
        height,
        animated
    );

    Ok(SourceProbe {
        format,
        width,
        height,
        animated,
    })
}

/// 按请求计算输出尺寸。
///
/// 只给一边时按原始比例推算另一边；不放大；结果至少 1 像素。
pub(crate) fn target_size(width: u32, height: u32, request: &CodecRequest) -> (u32, u32) {
    let scale_to = |value: u32, num: u32, den: u32| -> u32 {
        ((value as u64 * num as u64) / den.max(1) as u64).max(1) as u32
    };

    match (request.target_width, request.target_height) {
        (None, None) => (width, height),
        (Some(w), None) => {
            let w = w.clamp(1, width.max(1));
            (w, scale_to(height, w, width))
        }
        (None, Some(h)) => {
            let h = h.clamp(1, height.max(1));
            (scale_to(width, h, height), h)
        }
        (Some(w), Some(h)) => (w.clamp(1, width.max(1)), h.clamp(1, height.max(1))),
    }
}

/// 解码静态图为单帧。
pub(crate) fn decode_still(
    raw: &RawImageData,
    probe: &SourceProbe,
    request: &CodecRequest,
    config: &ImageStreamConfig,
) -> Result<DecodedFrame, CodecError> {
    let (target_width, target_height) = target_size(probe.width, probe.height, request);
    validate_decoded_memory_limits(config, target_width as u64 * target_height as u64 * 4)?;

    let decoded = image::load_from_memory_with_format(&raw.bytes, probe.format)
        .map_err(|e| CodecError::Decode(format!("图片解码失败：{}", e)))?;
    validate_pixel_limits(config, decoded.width(), decoded.height())?;

    let rgba = resize_rgba(decoded.to_rgba8(), target_width, target_height, config.resize_filter());

    log::info!(
        "✅ 图片解码成功 - 来源: {} 原始尺寸: {}x{} 输出尺寸: {}x{}",
        raw.source_hint,
        probe.width,
        probe.height,
        rgba.width(),
        rgba.height()
    );

    Ok(DecodedFrame {
        image: Arc::new(rgba),
        duration: Duration::ZERO,
    })
}

/// 逐帧解码动图。
///
/// 每帧之间检查 `cancelled`，被取消时返回 `CodecError::Cancelled`。
pub(crate) fn decode_animation(
    raw: &RawImageData,
    probe: &SourceProbe,
    request: &CodecRequest,
    config: &ImageStreamConfig,
    cancelled: &AtomicBool,
) -> Result<Vec<DecodedFrame>, CodecError> {
    let frames = animation_frames(raw, probe)?;

    let (target_width, target_height) = target_size(probe.width, probe.height, request);
    let frame_bytes = target_width as u64 * target_height as u64 * 4;
    let filter = config.resize_filter();

    let mut decoded = Vec::new();
    let mut total_bytes: u64 = 0;

    for frame in frames {
        if cancelled.load(Ordering::Acquire) {
            log::debug!("⏹️ 动图解码已取消 - 已解码 {} 帧", decoded.len());
            return Err(CodecError::Cancelled);
        }

        let frame = frame.map_err(|e| CodecError::Decode(format!("动图帧解码失败：{}", e)))?;

        total_bytes = total_bytes.saturating_add(frame_bytes);
        validate_decoded_memory_limits(config, total_bytes)?;

        let duration = frame_delay(&frame);
        let rgba = resize_rgba(frame.into_buffer(), target_width, target_height, filter);

        decoded.push(DecodedFrame {
            image: Arc::new(rgba),
            duration,
        });
    }

    if decoded.is_empty() {
        return Err(CodecError::Decode("动图不包含任何帧".to_string()));
    }

    log::info!(
        "✅ 动图解码成功 - 来源: {} 帧数: {} 输出尺寸: {}x{}",
        raw.source_hint,
        decoded.len(),
        target_width,
        target_height
    );

    Ok(decoded)
}

/// 动图摘要：帧数与整段时长。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AnimationSummary {
    pub(crate) frame_count: u32,
    pub(crate) total_duration: Duration,
}

/// 只统计帧数与时长，不保留任何像素缓冲。
///
/// 内存上限按单帧画布估算：同一时刻只存在一帧。
pub(crate) fn scan_animation(
    raw: &RawImageData,
    probe: &SourceProbe,
    config: &ImageStreamConfig,
    cancelled: &AtomicBool,
) -> Result<AnimationSummary, CodecError> {
    validate_decoded_memory_limits(config, probe.width as u64 * probe.height as u64 * 4)?;

    let mut summary = AnimationSummary {
        frame_count: 0,
        total_duration: Duration::ZERO,
    };

    for frame in animation_frames(raw, probe)? {
        if cancelled.load(Ordering::Acquire) {
            return Err(CodecError::Cancelled);
        }
        let frame = frame.map_err(|e| CodecError::Decode(format!("动图帧解码失败：{}", e)))?;
        summary.frame_count += 1;
        summary.total_duration += frame_delay(&frame);
    }

    if summary.frame_count == 0 {
        return Err(CodecError::Decode("动图不包含任何帧".to_string()));
    }

    log::debug!(
        "🔍 动图摘要 - 来源: {} 帧数: {} 时长: {}ms",
        raw.source_hint,
        summary.frame_count,
        summary.total_duration.as_millis()
    );

    Ok(summary)
}

fn animation_frames<'a>(raw: &'a RawImageData, probe: &SourceProbe) -> Result<Frames<'a>, CodecError> {
    let cursor = Cursor::new(raw.bytes.as_slice());
    let frames = match probe.format {
        ImageFormat::Gif => GifDecoder::new(cursor)
            .map_err(|e| CodecError::Decode(format!("GIF 解码器初始化失败：{}", e)))?
            .into_frames(),
        ImageFormat::WebP => WebPDecoder::new(cursor)
            .map_err(|e| CodecError::Decode(format!("WebP 解码器初始化失败：{}", e)))?
            .into_frames(),
        ImageFormat::Png => PngDecoder::new(cursor)
            .and_then(|decoder| decoder.apng())
            .map_err(|e| CodecError::Decode(format!("APNG 解码器初始化失败：{}", e)))?
            .into_frames(),
        other => {
            return Err(CodecError::InvalidFormat(format!("{:?} 不是动图格式", other)));
        }
    };
    Ok(frames)
}

fn frame_delay(frame: &Frame) -> Duration {
    let (numer, denom) = frame.delay().numer_denom_ms();
    Duration::from_micros(numer as u64 * 1000 / denom.max(1) as u64)
}

/// 仅通过内存中的图片头信息读取宽高。
fn inspect_dimensions_from_memory(bytes: &[u8]) -> Result<(u32, u32), CodecError> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| CodecError::InvalidFormat(format!("无法识别图片格式：{}", e)))?;

    reader
        .into_dimensions()
        .map_err(|e| CodecError::InvalidFormat(format!("无法读取图片尺寸：{}", e)))
}

fn validate_pixel_limits(config: &ImageStreamConfig, width: u32, height: u32) -> Result<(), CodecError> {
    let pixels = (width as u64)
        .checked_mul(height as u64)
        .ok_or_else(|| CodecError::ResourceLimit("图片像素数溢出".to_string()))?;

    if pixels > config.max_decoded_pixels {
        return Err(CodecError::ResourceLimit(format!(
            "图片像素过大：{} 像素（限制：{} 像素）",
            pixels, config.max_decoded_pixels
        )));
    }

    Ok(())
}

fn validate_decoded_memory_limits(config: &ImageStreamConfig, estimated: u64) -> Result<(), CodecError> {
    if estimated > config.max_decoded_bytes {
        return Err(CodecError::ResourceLimit(format!(
            "图片解码预计内存过大：{:.2} MB（限制：{:.2} MB）",
            estimated as f64 / 1024.0 / 1024.0,
            config.max_decoded_bytes as f64 / 1024.0 / 1024.0
        )));
    }

    Ok(())
}

fn resize_rgba(image: RgbaImage, target_width: u32, target_height: u32, filter: FilterType) -> RgbaImage {
    if image.width() == target_width && image.height() == target_height {
        return image;
    }

    match resize_with_fast_image_resize(&image, target_width, target_height, filter) {
        Ok(resized) => resized,
        Err(err) => {
            log::warn!("⚠️ fast_image_resize 缩放失败，回退 imageops::resize：{}", err);
            image::imageops::resize(&image, target_width, target_height, filter)
        }
    }
}

fn resize_with_fast_image_resize(
    image: &RgbaImage,
    target_width: u32,
    target_height: u32,
    filter: FilterType,
) -> Result<RgbaImage, CodecError> {
    let src_image = fr::images::Image::from_vec_u8(
        image.width(),
        image.height(),
        image.as_raw().clone(),
        fr::PixelType::U8x4,
    )
    .map_err(|e| CodecError::Decode(format!("构建源图像缓冲失败：{}", e)))?;

    let mut dst_image = fr::images::Image::new(target_width, target_height, fr::PixelType::U8x4);

    let mut resizer = fr::Resizer::new();
    let options = fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(to_fast_filter(filter)));

    resizer
        .resize(&src_image, &mut dst_image, Some(&options))
        .map_err(|e| CodecError::Decode(format!("fast_image_resize 执行失败：{}", e)))?;

    RgbaImage::from_raw(target_width, target_height, dst_image.into_vec())
        .ok_or_else(|| CodecError::Decode("fast_image_resize 输出缓冲长度异常".to_string()))
}

fn to_fast_filter(filter: FilterType) -> fr::FilterType {
    match filter {
        FilterType::Nearest => fr::FilterType::Box,
        FilterType::Triangle => fr::FilterType::Bilinear,
        FilterType::CatmullRom => fr::FilterType::CatmullRom,
        FilterType::Gaussian => fr::FilterType::Mitchell,
        FilterType::Lanczos3 => fr::FilterType::Lanczos3,
    }
}
