//! # 内置 codec（基于 `image` crate）
//!
//! ## 设计思路
//!
//! 没有宿主解码引擎时，用 `image` crate 提供一个可直接使用的 `CodecProvider`。
//! 所有阻塞工作（读文件、解码、缩放）都放在 `spawn_blocking` 上执行，
//! 结果通过 await join handle 回到协调线程。
//!
//! ## 实现思路
//!
//! - `instantiate`：读取字节 + 探测 header；动图在此阶段逐帧解码（需要确定帧数）。
//! - 仅尺寸请求的动图只统计帧数与时长，不保留像素；静态图同样不在此阶段解码。
//!   这两种情况的像素都延迟到第一次 `next_frame` 才解码。
//! - `cancel` 置位共享标志：动图逐帧解码与后续 `next_frame` 都会检查它。
//! - 目前无法从 `image` 读取 GIF/WebP 的循环次数，动图一律按无限循环（-1）报告。

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::loader::{self, RawImageData};
use super::pipeline::{self, SourceProbe};
use super::{Codec, CodecProvider, CodecRequest, DecodedFrame, LocalBoxFuture};
use crate::cache::metadata::ImageInfo;
use crate::config::{self, ImageStreamConfig};
use crate::error::CodecError;

/// 基于 `image` crate 的 codec 提供者。
///
/// 未指定配置时，每次实例化读取进程级配置快照。
#[derive(Debug, Clone, Default)]
pub struct ImageCrateCodecProvider {
    config: Option<ImageStreamConfig>,
}

impl ImageCrateCodecProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ImageStreamConfig) -> Self {
        Self { config: Some(config) }
    }
}

impl CodecProvider for ImageCrateCodecProvider {
    fn instantiate(&self, request: &CodecRequest) -> LocalBoxFuture<'static, Result<Rc<dyn Codec>, CodecError>> {
        let request = request.clone();
        let config = self.config.clone().unwrap_or_else(config::config_snapshot);

        Box::pin(async move {
            let started = Instant::now();
            let cancelled = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&cancelled);
            let locator_for_log = loader::redact_locator_for_log(&request.locator);

            let prepared = tokio::task::spawn_blocking(move || prepare(request, config, &flag))
                .await
                .map_err(|e| CodecError::Runtime(format!("解码任务异常：{}", e)))??;

            log::info!(
                "🎞️ codec 就绪 - 来源: {} 帧数: {} 耗时: {}ms",
                locator_for_log,
                prepared.info.frame_count,
                started.elapsed().as_millis()
            );

            Ok(Rc::new(ImageCrateCodec::new(prepared, cancelled)) as Rc<dyn Codec>)
        })
    }
}

/// 阻塞线程上完成的准备工作。
struct PreparedSource {
    info: ImageInfo,
    frames: FrameSource,
}

enum FrameSource {
    /// 尚未解码：保留原始字节，首次取帧时解码（静态图单帧，动图全部帧）。
    Pending {
        raw: Arc<RawImageData>,
        probe: SourceProbe,
        request: CodecRequest,
        config: ImageStreamConfig,
    },
    Decoded(Vec<DecodedFrame>),
}

fn prepare(request: CodecRequest, config: ImageStreamConfig, cancelled: &AtomicBool) -> Result<PreparedSource, CodecError> {
    let raw = loader::load_source(&request.locator, &config)?;
    let probe = pipeline::probe(&raw, &config)?;

    if probe.animated && request.dimension_only {
        let summary = pipeline::scan_animation(&raw, &probe, &config, cancelled)?;
        let (width, height) = pipeline::target_size(probe.width, probe.height, &request);
        let info = ImageInfo {
            width,
            height,
            frame_count: summary.frame_count,
            total_duration_ms: summary.total_duration.as_millis() as u64,
            repetition_count: ImageInfo::REPEAT_INFINITE,
        };
        return Ok(PreparedSource {
            info,
            frames: FrameSource::Pending {
                raw: Arc::new(raw),
                probe,
                request,
                config,
            },
        });
    }

    if probe.animated {
        let frames = pipeline::decode_animation(&raw, &probe, &request, &config, cancelled)?;
        let first = &frames[0].image;
        let total: Duration = frames.iter().map(|f| f.duration).sum();
        let info = ImageInfo {
            width: first.width(),
            height: first.height(),
            frame_count: frames.len() as u32,
            total_duration_ms: total.as_millis() as u64,
            repetition_count: ImageInfo::REPEAT_INFINITE,
        };
        return Ok(PreparedSource {
            info,
            frames: FrameSource::Decoded(frames),
        });
    }

    let (width, height) = pipeline::target_size(probe.width, probe.height, &request);
    Ok(PreparedSource {
        info: ImageInfo::single_frame(width, height),
        frames: FrameSource::Pending {
            raw: Arc::new(raw),
            probe,
            request,
            config,
        },
    })
}

/// 内置 codec 句柄。
pub struct ImageCrateCodec {
    info: ImageInfo,
    frames: Rc<RefCell<FrameSource>>,
    cursor: Rc<Cell<usize>>,
    cancelled: Arc<AtomicBool>,
}

impl ImageCrateCodec {
    fn new(prepared: PreparedSource, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            info: prepared.info,
            frames: Rc::new(RefCell::new(prepared.frames)),
            cursor: Rc::new(Cell::new(0)),
            cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Codec for ImageCrateCodec {
    fn frame_count(&self) -> u32 {
        self.info.frame_count
    }

    fn repetition_count(&self) -> i32 {
        self.info.repetition_count
    }

    fn total_duration(&self) -> Duration {
        Duration::from_millis(self.info.total_duration_ms)
    }

    fn next_frame(&self) -> LocalBoxFuture<'static, Result<DecodedFrame, CodecError>> {
        let frames = Rc::clone(&self.frames);
        let cursor = Rc::clone(&self.cursor);
        let cancelled = Arc::clone(&self.cancelled);

        Box::pin(async move {
            if cancelled.load(Ordering::Acquire) {
                return Err(CodecError::Cancelled);
            }

            let pending = match &*frames.borrow() {
                FrameSource::Decoded(decoded) => {
                    let index = cursor.get() % decoded.len();
                    cursor.set(index + 1);
                    return Ok(decoded[index].clone());
                }
                FrameSource::Pending {
                    raw,
                    probe,
                    request,
                    config,
                } => (Arc::clone(raw), *probe, request.clone(), config.clone()),
            };

            let (raw, probe, request, config) = pending;
            let flag = Arc::clone(&cancelled);
            let decoded = tokio::task::spawn_blocking(move || {
                if probe.animated {
                    pipeline::decode_animation(&raw, &probe, &request, &config, &flag)
                } else {
                    pipeline::decode_still(&raw, &probe, &request, &config).map(|frame| vec![frame])
                }
            })
            .await
            .map_err(|e| CodecError::Runtime(format!("解码任务异常：{}", e)))??;

            if cancelled.load(Ordering::Acquire) {
                return Err(CodecError::Cancelled);
            }

            let first = decoded[0].clone();
            *frames.borrow_mut() = FrameSource::Decoded(decoded);
            cursor.set(1);
            Ok(first)
        })
    }

    fn image_info(&self) -> LocalBoxFuture<'static, Result<Option<ImageInfo>, CodecError>> {
        let info = self.info;
        Box::pin(std::future::ready(Ok(Some(info))))
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{Engine as _, engine::general_purpose};
    use image::codecs::gif::{GifEncoder, Repeat};
    use image::{Delay, DynamicImage, Frame, ImageBuffer, ImageFormat, Rgba};
    use std::io::Cursor;

    fn data_url(bytes: &[u8], mime: &str) -> String {
        format!("data:{};base64,{}", mime, general_purpose::STANDARD.encode(bytes))
    }

    fn png_locator(width: u32, height: u32) -> String {
        let img = ImageBuffer::from_pixel(width, height, Rgba([1u8, 2, 3, 255]));
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("failed to encode test png");
        data_url(&cursor.into_inner(), "image/png")
    }

    fn gif_locator(delays_ms: &[u32]) -> String {
        let mut bytes = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut bytes);
            encoder.set_repeat(Repeat::Infinite).expect("set repeat failed");
            for (i, delay) in delays_ms.iter().enumerate() {
                let shade = (i * 60) as u8;
                let buffer = ImageBuffer::from_pixel(6, 6, Rgba([shade, 0, 0, 255]));
                let frame = Frame::from_parts(buffer, 0, 0, Delay::from_numer_denom_ms(*delay, 1));
                encoder.encode_frame(frame).expect("encode gif frame failed");
            }
        }
        data_url(&bytes, "image/gif")
    }

    #[tokio::test]
    async fn still_image_reports_info_before_pixel_decode() {
        let provider = ImageCrateCodecProvider::new();
        let mut request = CodecRequest::new(png_locator(40, 20));
        request.target_width = Some(10);

        let codec = provider.instantiate(&request).await.expect("instantiate should succeed");
        let info = codec.image_info().await.expect("info should succeed").expect("info should exist");

        assert_eq!(info, ImageInfo::single_frame(10, 5));
        assert_eq!(codec.frame_count(), 1);

        let frame = codec.next_frame().await.expect("frame should decode");
        assert_eq!((frame.image.width(), frame.image.height()), (10, 5));
    }

    #[tokio::test]
    async fn animated_gif_cycles_frames_and_sums_duration() {
        let provider = ImageCrateCodecProvider::new();
        let codec = provider
            .instantiate(&CodecRequest::new(gif_locator(&[100, 40, 60])))
            .await
            .expect("instantiate should succeed");

        assert_eq!(codec.frame_count(), 3);
        assert_eq!(codec.repetition_count(), ImageInfo::REPEAT_INFINITE);
        assert_eq!(codec.total_duration(), Duration::from_millis(200));

        let mut delays = Vec::new();
        for _ in 0..4 {
            let frame = codec.next_frame().await.expect("frame should decode");
            delays.push(frame.duration.as_millis());
        }
        assert_eq!(delays, vec![100, 40, 60, 100]);
    }

    #[tokio::test]
    async fn dimension_request_on_animation_keeps_no_pixels() {
        // 单帧 6x6 RGBA 为 144 字节，全部帧解码会超出上限。
        let provider = ImageCrateCodecProvider::with_config(ImageStreamConfig {
            max_decoded_bytes: 200,
            ..ImageStreamConfig::default()
        });
        let mut request = CodecRequest::new(gif_locator(&[100, 40, 60]));
        request.dimension_only = true;

        let codec = provider.instantiate(&request).await.expect("instantiate should succeed");
        let info = codec.image_info().await.expect("info should succeed").expect("info should exist");

        assert_eq!(info.frame_count, 3);
        assert_eq!(info.total_duration_ms, 200);
        assert_eq!((info.width, info.height), (6, 6));
        assert!(matches!(codec.next_frame().await, Err(CodecError::ResourceLimit(_))));
    }

    #[tokio::test]
    async fn dimension_codec_decodes_frames_lazily_when_asked() {
        let provider = ImageCrateCodecProvider::new();
        let mut request = CodecRequest::new(gif_locator(&[100, 40]));
        request.dimension_only = true;

        let codec = provider.instantiate(&request).await.expect("instantiate should succeed");
        let delays: Vec<_> = [
            codec.next_frame().await.expect("first frame should decode"),
            codec.next_frame().await.expect("second frame should decode"),
            codec.next_frame().await.expect("frames should cycle"),
        ]
        .iter()
        .map(|frame| frame.duration.as_millis())
        .collect();

        assert_eq!(delays, vec![100, 40, 100]);
    }

    #[tokio::test]
    async fn cancelled_codec_refuses_next_frame() {
        let provider = ImageCrateCodecProvider::new();
        let codec = provider
            .instantiate(&CodecRequest::new(png_locator(4, 4)))
            .await
            .expect("instantiate should succeed");

        codec.cancel();
        codec.cancel();

        assert!(matches!(codec.next_frame().await, Err(CodecError::Cancelled)));
    }

    #[tokio::test]
    async fn unreadable_locator_fails_instantiation() {
        let provider = ImageCrateCodecProvider::new();
        let result = provider.instantiate(&CodecRequest::new("/no/such/image.png")).await;

        assert!(matches!(result, Err(CodecError::Source(_))));
    }
}
