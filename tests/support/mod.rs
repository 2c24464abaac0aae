#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use ext_image_stream::cache::metadata::ImageInfo;
use ext_image_stream::codec::{Codec, CodecProvider, CodecRequest, DecodedFrame, LocalBoxFuture};
use ext_image_stream::diagnostics::{self, DiagnosticsSink, ErrorReport};
use ext_image_stream::error::{CodecError, ImageStreamError, ListenerError};
use ext_image_stream::key::ImageConfiguration;
use ext_image_stream::listener::{ImageFrame, ImageStream, ImageStreamListener, ListenerToken, PlaceholderProvider};
use image::{Rgba, RgbaImage};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 在单线程运行时 + `LocalSet` 上执行测试主体。
pub fn run_local<F: Future>(future: F) -> F::Output {
    init_logging();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("build test runtime failed");
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, future)
}

/// 让出足够多次，使已就绪的本地任务全部跑完。
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// 等待条件成立（用于依赖阻塞线程池的内置 codec）。
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..2000 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}

// ---------------------------------------------------------------------------
// Mock codec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MockSpec {
    pub width: u32,
    pub height: u32,
    pub frame_durations: Vec<Duration>,
    pub repetition_count: i32,
    /// 覆盖 `image_info()` 的返回值；`None` 时按帧数据推导。
    pub info_override: Option<Option<ImageInfo>>,
}

impl MockSpec {
    pub fn still(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_durations: vec![Duration::ZERO],
            repetition_count: ImageInfo::REPEAT_INFINITE,
            info_override: None,
        }
    }

    pub fn animated(durations_ms: &[u64], repetition_count: i32) -> Self {
        Self {
            width: 4,
            height: 4,
            frame_durations: durations_ms.iter().map(|ms| Duration::from_millis(*ms)).collect(),
            repetition_count,
            info_override: None,
        }
    }

    pub fn with_info(mut self, info: Option<ImageInfo>) -> Self {
        self.info_override = Some(info);
        self
    }

    pub fn derived_info(&self) -> ImageInfo {
        ImageInfo {
            width: self.width,
            height: self.height,
            frame_count: self.frame_durations.len() as u32,
            total_duration_ms: self.frame_durations.iter().sum::<Duration>().as_millis() as u64,
            repetition_count: self.repetition_count,
        }
    }
}

#[derive(Debug, Default)]
pub struct CodecStats {
    pub next_frame_calls: Cell<usize>,
    pub image_info_calls: Cell<usize>,
    pub cancel_calls: Cell<usize>,
    pub outstanding: Cell<usize>,
    pub max_outstanding: Cell<usize>,
}

impl CodecStats {
    fn begin(&self) {
        self.outstanding.set(self.outstanding.get() + 1);
        self.max_outstanding.set(self.max_outstanding.get().max(self.outstanding.get()));
    }

    fn end(&self) {
        self.outstanding.set(self.outstanding.get() - 1);
    }
}

/// 可在测试中放行的闸门。关闭时在途 future 持续让出。
#[derive(Debug, Clone, Default)]
pub struct Gate(Rc<Cell<bool>>);

impl Gate {
    pub fn close(&self) {
        self.0.set(true);
    }

    pub fn open(&self) {
        self.0.set(false);
    }

    async fn pass(&self) {
        tokio::task::yield_now().await;
        while self.0.get() {
            tokio::task::yield_now().await;
        }
    }
}

pub struct MockCodec {
    pub index: usize,
    frames: Vec<DecodedFrame>,
    spec: MockSpec,
    cursor: Cell<usize>,
    decode_gate: Gate,
    fail_decode: Rc<Cell<bool>>,
    pub stats: Rc<CodecStats>,
}

impl MockCodec {
    /// 第 `index` 帧的像素缓冲（与分发给监听器的是同一个 `Arc`）。
    pub fn frame_image(&self, index: usize) -> Arc<RgbaImage> {
        Arc::clone(&self.frames[index].image)
    }
}

impl Codec for MockCodec {
    fn frame_count(&self) -> u32 {
        self.frames.len() as u32
    }

    fn repetition_count(&self) -> i32 {
        self.spec.repetition_count
    }

    fn total_duration(&self) -> Duration {
        self.frames.iter().map(|frame| frame.duration).sum()
    }

    fn next_frame(&self) -> LocalBoxFuture<'static, Result<DecodedFrame, CodecError>> {
        self.stats.next_frame_calls.set(self.stats.next_frame_calls.get() + 1);
        self.stats.begin();

        let index = self.cursor.get() % self.frames.len();
        self.cursor.set(index + 1);
        let frame = self.frames[index].clone();
        let stats = Rc::clone(&self.stats);
        let gate = self.decode_gate.clone();
        let fail = Rc::clone(&self.fail_decode);

        Box::pin(async move {
            gate.pass().await;
            stats.end();
            if fail.get() {
                Err(CodecError::Decode("mock frame failure".to_string()))
            } else {
                Ok(frame)
            }
        })
    }

    fn image_info(&self) -> LocalBoxFuture<'static, Result<Option<ImageInfo>, CodecError>> {
        self.stats.image_info_calls.set(self.stats.image_info_calls.get() + 1);
        self.stats.begin();

        let info = self.spec.info_override.unwrap_or_else(|| Some(self.spec.derived_info()));
        let stats = Rc::clone(&self.stats);
        let gate = self.decode_gate.clone();
        let fail = Rc::clone(&self.fail_decode);

        Box::pin(async move {
            gate.pass().await;
            stats.end();
            if fail.get() {
                Err(CodecError::Decode("mock info failure".to_string()))
            } else {
                Ok(info)
            }
        })
    }

    fn cancel(&self) {
        self.stats.cancel_calls.set(self.stats.cancel_calls.get() + 1);
    }
}

pub struct MockCodecProvider {
    spec: RefCell<MockSpec>,
    pub failures_remaining: Cell<usize>,
    pub instantiate_gate: Gate,
    pub decode_gate: Gate,
    pub fail_decode: Rc<Cell<bool>>,
    instantiate_calls: Cell<usize>,
    requests: RefCell<Vec<CodecRequest>>,
    codecs: RefCell<Vec<Rc<MockCodec>>>,
}

impl MockCodecProvider {
    pub fn new(spec: MockSpec) -> Rc<Self> {
        Rc::new(Self {
            spec: RefCell::new(spec),
            failures_remaining: Cell::new(0),
            instantiate_gate: Gate::default(),
            decode_gate: Gate::default(),
            fail_decode: Rc::new(Cell::new(false)),
            instantiate_calls: Cell::new(0),
            requests: RefCell::new(Vec::new()),
            codecs: RefCell::new(Vec::new()),
        })
    }

    pub fn fail_next_instantiations(&self, count: usize) {
        self.failures_remaining.set(count);
    }

    pub fn instantiate_calls(&self) -> usize {
        self.instantiate_calls.get()
    }

    pub fn requests(&self) -> Vec<CodecRequest> {
        self.requests.borrow().clone()
    }

    pub fn codec_count(&self) -> usize {
        self.codecs.borrow().len()
    }

    pub fn codec(&self, index: usize) -> Rc<MockCodec> {
        Rc::clone(&self.codecs.borrow()[index])
    }

    fn build_codec(&self) -> Rc<MockCodec> {
        let spec = self.spec.borrow().clone();
        let index = self.codecs.borrow().len();
        let frames = spec
            .frame_durations
            .iter()
            .enumerate()
            .map(|(i, duration)| DecodedFrame {
                image: Arc::new(RgbaImage::from_pixel(spec.width, spec.height, Rgba([i as u8, index as u8, 0, 255]))),
                duration: *duration,
            })
            .collect();

        let codec = Rc::new(MockCodec {
            index,
            frames,
            spec,
            cursor: Cell::new(0),
            decode_gate: self.decode_gate.clone(),
            fail_decode: Rc::clone(&self.fail_decode),
            stats: Rc::new(CodecStats::default()),
        });
        self.codecs.borrow_mut().push(Rc::clone(&codec));
        codec
    }
}

impl CodecProvider for MockCodecProvider {
    fn instantiate(&self, request: &CodecRequest) -> LocalBoxFuture<'static, Result<Rc<dyn Codec>, CodecError>> {
        self.instantiate_calls.set(self.instantiate_calls.get() + 1);
        self.requests.borrow_mut().push(request.clone());

        let result: Result<Rc<dyn Codec>, CodecError> = if self.failures_remaining.get() > 0 {
            self.failures_remaining.set(self.failures_remaining.get() - 1);
            Err(CodecError::Source("mock resolution failure".to_string()))
        } else {
            Ok(self.build_codec())
        };
        let gate = self.instantiate_gate.clone();

        Box::pin(async move {
            gate.pass().await;
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Diagnostics and listeners
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    reports: RefCell<Vec<ErrorReport>>,
}

impl RecordingSink {
    /// 安装到当前线程并返回句柄。
    pub fn install() -> Rc<Self> {
        let sink = Rc::new(Self::default());
        diagnostics::set_diagnostics_sink(Rc::clone(&sink) as Rc<dyn DiagnosticsSink>);
        sink
    }

    pub fn codes(&self) -> Vec<&'static str> {
        self.reports.borrow().iter().map(|report| report.error.code()).collect()
    }

    pub fn len(&self) -> usize {
        self.reports.borrow().len()
    }

    pub fn all_silent(&self) -> bool {
        self.reports.borrow().iter().all(|report| report.silent)
    }
}

impl DiagnosticsSink for RecordingSink {
    fn report(&self, report: &ErrorReport) {
        self.reports.borrow_mut().push(report.clone());
    }
}

#[derive(Default)]
pub struct RecordingListener {
    pub images: RefCell<Vec<ImageFrame>>,
    pub synchronous: RefCell<Vec<bool>>,
    pub dimensions: RefCell<Vec<ImageInfo>>,
    pub errors: RefCell<Vec<&'static str>>,
    pub fail_images: Cell<bool>,
    /// 收到图像时记录的外部时间戳。
    pub clock_now: Rc<Cell<Duration>>,
    pub image_times: RefCell<Vec<Duration>>,
}

impl RecordingListener {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn failing() -> Rc<Self> {
        let listener = Self::new();
        listener.fail_images.set(true);
        listener
    }

    pub fn with_clock(clock_now: Rc<Cell<Duration>>) -> Rc<Self> {
        Rc::new(Self {
            clock_now,
            ..Self::default()
        })
    }

    pub fn as_listener(self: &Rc<Self>) -> Rc<dyn ImageStreamListener> {
        Rc::clone(self) as Rc<dyn ImageStreamListener>
    }

    pub fn image_count(&self) -> usize {
        self.images.borrow().len()
    }

    pub fn dimension_count(&self) -> usize {
        self.dimensions.borrow().len()
    }
}

impl ImageStreamListener for RecordingListener {
    fn on_image(&self, frame: &ImageFrame, synchronous: bool) -> Result<(), ListenerError> {
        self.images.borrow_mut().push(frame.clone());
        self.synchronous.borrow_mut().push(synchronous);
        self.image_times.borrow_mut().push(self.clock_now.get());
        if self.fail_images.get() {
            return Err(ListenerError::new("recording listener configured to fail"));
        }
        Ok(())
    }

    fn on_dimensions(&self, info: &ImageInfo) -> Result<(), ListenerError> {
        self.dimensions.borrow_mut().push(*info);
        Ok(())
    }

    fn on_error(&self, error: &ImageStreamError) {
        self.errors.borrow_mut().push(error.code());
    }
}

// ---------------------------------------------------------------------------
// Placeholder
// ---------------------------------------------------------------------------

/// 手动控制的占位图流。
#[derive(Default)]
pub struct StubPlaceholderStream {
    /// 非空时在挂载时同步交付这一帧。
    pub immediate: RefCell<Option<ImageFrame>>,
    listeners: RefCell<Vec<(ListenerToken, Rc<dyn ImageStreamListener>)>>,
    next_token: Cell<u64>,
    pub removed: Cell<usize>,
}

impl StubPlaceholderStream {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn with_immediate(width: u32, height: u32) -> Rc<Self> {
        let stream = Self::new();
        *stream.immediate.borrow_mut() = Some(placeholder_frame(width, height));
        stream
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// 向当前挂载的监听器推送一帧。
    pub fn push(&self, frame: &ImageFrame) {
        let listeners: Vec<_> = self.listeners.borrow().iter().map(|(_, l)| Rc::clone(l)).collect();
        for listener in listeners {
            let _ = listener.on_image(frame, false);
        }
    }
}

impl ImageStream for StubPlaceholderStream {
    fn add_listener(&self, listener: Rc<dyn ImageStreamListener>) -> ListenerToken {
        let token = ListenerToken::new(self.next_token.get());
        self.next_token.set(self.next_token.get() + 1);
        self.listeners.borrow_mut().push((token, Rc::clone(&listener)));

        let immediate = self.immediate.borrow().clone();
        if let Some(frame) = immediate {
            let _ = listener.on_image(&frame, true);
        }
        token
    }

    fn remove_listener(&self, token: ListenerToken) {
        let mut listeners = self.listeners.borrow_mut();
        if let Some(pos) = listeners.iter().position(|(t, _)| *t == token) {
            listeners.remove(pos);
            self.removed.set(self.removed.get() + 1);
        }
    }
}

pub struct StubPlaceholderProvider {
    pub stream: Rc<StubPlaceholderStream>,
    pub resolve_calls: Cell<usize>,
}

impl StubPlaceholderProvider {
    pub fn new(stream: Rc<StubPlaceholderStream>) -> Rc<Self> {
        Rc::new(Self {
            stream,
            resolve_calls: Cell::new(0),
        })
    }
}

impl PlaceholderProvider for StubPlaceholderProvider {
    fn resolve(&self, _configuration: &ImageConfiguration) -> Rc<dyn ImageStream> {
        self.resolve_calls.set(self.resolve_calls.get() + 1);
        Rc::clone(&self.stream) as Rc<dyn ImageStream>
    }
}

pub fn placeholder_frame(width: u32, height: u32) -> ImageFrame {
    ImageFrame::new(Arc::new(RgbaImage::from_pixel(width, height, Rgba([9, 9, 9, 255]))), 1.0)
}
