//! 测试用假实现: 取流、解码、服务、纹理

use crate::config::StreamInfo;
use crate::host::{PixelFormat, TextureId, TextureSurface};
use crate::pipeline::frame_decoder::i420_len;
use crate::pipeline::{
    DecodeStatus, DecoderFactory, Frame, FrameDecoder, FrameSink, MediaKind, MediaSource, Sample,
    SampleFormat, SampleSink, SourceFactory, VideoDecoder,
};
use crate::query::{Camera, VmsClient};
use crate::timeline::{AnalyticsEvent, MotionEvent, Segment, Timerange};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub fn stream_info(name: &str) -> StreamInfo {
    StreamInfo {
        name: name.to_string(),
        source_url: format!("rtsp://127.0.0.1:10554/{}", name),
        camera_id: format!("cam-{}", name),
        motion_detection_enabled: false,
    }
}

/// 灰色 I420 样本
pub fn i420_sample(width: u16, height: u16, stream_start_ms: i64, pts_ms: i64) -> Sample {
    let (w, h) = (width as usize, height as usize);
    let mut data = vec![90u8; w * h];
    data.resize(i420_len(w, h), 128);
    Sample {
        media: MediaKind::Video,
        format: SampleFormat::I420 { width, height },
        key: true,
        pts_ms,
        stream_start_ms,
        data: Arc::new(data),
        still: false,
    }
}

pub fn tiny_jpeg() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(16, 8, image::Rgb([40, 80, 120]));
    let mut out = Vec::new();
    let _ = img.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Jpeg);
    out
}

// ========== 取流 ==========

pub struct FakeSourceHandle {
    sink: SampleSink,
    running: AtomicBool,
    urls: Mutex<Vec<String>>,
    stops: AtomicUsize,
}

impl FakeSourceHandle {
    pub fn push(&self, sample: Sample) {
        (self.sink)(sample)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 上游断开: 不再产出样本, 也没有人调用 stop
    pub fn hang_up(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

struct FakeSource(Arc<FakeSourceHandle>);

impl MediaSource for FakeSource {
    fn play(&mut self, url: &str) -> Result<()> {
        self.0.urls.lock().push(url.to_string());
        self.0.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.0.stops.fetch_add(1, Ordering::SeqCst);
        self.0.running.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeSources {
    created: Mutex<Vec<Arc<FakeSourceHandle>>>,
}

impl FakeSources {
    pub fn last(&self) -> Option<Arc<FakeSourceHandle>> {
        self.created.lock().last().cloned()
    }

    pub fn count(&self) -> usize {
        self.created.lock().len()
    }
}

impl SourceFactory for FakeSources {
    fn create(&self, sink: SampleSink) -> Box<dyn MediaSource> {
        let handle = Arc::new(FakeSourceHandle {
            sink,
            running: AtomicBool::new(false),
            urls: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
        });
        self.created.lock().push(handle.clone());
        Box::new(FakeSource(handle))
    }
}

// ========== 解码 ==========

/// 每次解码都等待测试放行
pub struct GatedDecoders {
    started_tx: Sender<()>,
    started_rx: Receiver<()>,
    gate_tx: Sender<()>,
    gate_rx: Receiver<()>,
}

impl GatedDecoders {
    pub fn new() -> Self {
        let (started_tx, started_rx) = unbounded();
        let (gate_tx, gate_rx) = unbounded();
        Self {
            started_tx,
            started_rx,
            gate_tx,
            gate_rx,
        }
    }

    pub fn factory(&self) -> Arc<dyn DecoderFactory> {
        Arc::new(GatedFactory {
            started: self.started_tx.clone(),
            gate: self.gate_rx.clone(),
        })
    }

    pub fn wait_started(&self) {
        self.started_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("decoder never started");
    }

    pub fn release(&self) {
        let _ = self.gate_tx.send(());
    }
}

struct GatedFactory {
    started: Sender<()>,
    gate: Receiver<()>,
}

impl DecoderFactory for GatedFactory {
    fn create(&self, _format: &SampleFormat) -> Result<Box<dyn VideoDecoder>> {
        Ok(Box::new(GatedDecoder {
            inner: FrameDecoder::new(),
            started: self.started.clone(),
            gate: self.gate.clone(),
        }))
    }
}

struct GatedDecoder {
    inner: FrameDecoder,
    started: Sender<()>,
    gate: Receiver<()>,
}

impl VideoDecoder for GatedDecoder {
    fn attach(&mut self, sample: &Sample) -> Result<()> {
        self.inner.attach(sample)
    }

    fn decode(&mut self) -> Result<DecodeStatus> {
        let _ = self.started.send(());
        if self.gate.recv_timeout(Duration::from_secs(10)).is_err() {
            bail!("gate timed out");
        }
        self.inner.decode()
    }

    fn input_size(&self) -> Option<(u16, u16)> {
        self.inner.input_size()
    }

    fn rgb24(&mut self, width: u16, height: u16) -> Result<Vec<u8>> {
        self.inner.rgb24(width, height)
    }
}

/// 每个样本先返回 `need_more` 次 NeedMore 才有输出
pub struct StubbornDecoders {
    need_more: usize,
    calls: Arc<AtomicUsize>,
}

impl StubbornDecoders {
    pub fn new(need_more: usize) -> Arc<Self> {
        Arc::new(Self {
            need_more,
            calls: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DecoderFactory for StubbornDecoders {
    fn create(&self, _format: &SampleFormat) -> Result<Box<dyn VideoDecoder>> {
        Ok(Box::new(StubbornDecoder {
            inner: FrameDecoder::new(),
            need_more: self.need_more,
            pending: 0,
            calls: self.calls.clone(),
        }))
    }
}

struct StubbornDecoder {
    inner: FrameDecoder,
    need_more: usize,
    pending: usize,
    calls: Arc<AtomicUsize>,
}

impl VideoDecoder for StubbornDecoder {
    fn attach(&mut self, sample: &Sample) -> Result<()> {
        self.pending = self.need_more;
        self.inner.attach(sample)
    }

    fn decode(&mut self) -> Result<DecodeStatus> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.pending > 0 {
            self.pending -= 1;
            return Ok(DecodeStatus::NeedMore);
        }
        self.inner.decode()
    }

    fn input_size(&self) -> Option<(u16, u16)> {
        self.inner.input_size()
    }

    fn rgb24(&mut self, width: u16, height: u16) -> Result<Vec<u8>> {
        self.inner.rgb24(width, height)
    }
}

// ========== 帧接收 ==========

#[derive(Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<(String, Frame)>>,
}

impl RecordingSink {
    pub fn frames(&self) -> Vec<(String, Frame)> {
        self.frames.lock().clone()
    }

    pub fn wait_for(&self, count: usize, timeout: Duration) -> Vec<(String, Frame)> {
        let deadline = Instant::now() + timeout;
        loop {
            let frames = self.frames();
            if frames.len() >= count {
                return frames;
            }
            assert!(
                Instant::now() < deadline,
                "expected {} frames, got {}",
                count,
                frames.len()
            );
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}

impl FrameSink for RecordingSink {
    fn post_video_frame(&self, name: &str, frame: Frame) {
        self.frames.lock().push((name.to_string(), frame));
    }
}

// ========== 服务 ==========

#[derive(Debug, Clone, PartialEq)]
pub struct ExportCall {
    pub camera_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub file_name: String,
}

pub struct FakeVms {
    failing: AtomicBool,
    export_ok: AtomicBool,
    exports: Mutex<Vec<ExportCall>>,
    key_frames: AtomicUsize,
}

impl Default for FakeVms {
    fn default() -> Self {
        Self {
            failing: AtomicBool::new(false),
            export_ok: AtomicBool::new(true),
            exports: Mutex::new(Vec::new()),
            key_frames: AtomicUsize::new(0),
        }
    }
}

impl FakeVms {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_export_ok(&self, ok: bool) {
        self.export_ok.store(ok, Ordering::SeqCst);
    }

    pub fn exports(&self) -> Vec<ExportCall> {
        self.exports.lock().clone()
    }

    pub fn key_frame_count(&self) -> usize {
        self.key_frames.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("service unavailable");
        }
        Ok(())
    }
}

impl VmsClient for FakeVms {
    fn cameras(&self) -> Result<Vec<Camera>> {
        self.check()?;
        Ok(vec![Camera {
            id: "cam-1".into(),
            friendly_name: "Front Door".into(),
            ipv4: "10.0.0.9".into(),
            do_motion_detection: true,
        }])
    }

    fn segments(&self, _camera_id: &str, range: Timerange) -> Result<Vec<Segment>> {
        self.check()?;
        Ok(vec![Segment {
            start: range.start(),
            end: range.end(),
        }])
    }

    fn motion_events(&self, _camera_id: &str, range: Timerange) -> Result<Vec<MotionEvent>> {
        self.check()?;
        Ok(vec![MotionEvent {
            start: range.start(),
            end: range.start(),
            motion_level: 12,
            stddev: 3,
        }])
    }

    fn analytics(
        &self,
        _camera_id: &str,
        _range: Timerange,
        _stream_tag: Option<&str>,
    ) -> Result<Vec<AnalyticsEvent>> {
        self.check()?;
        Ok(Vec::new())
    }

    fn key_frame(
        &self,
        _camera_id: &str,
        _at: DateTime<Utc>,
        _width: u16,
        _height: u16,
    ) -> Result<Vec<u8>> {
        self.check()?;
        self.key_frames.fetch_add(1, Ordering::SeqCst);
        Ok(tiny_jpeg())
    }

    fn export(
        &self,
        camera_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        file_name: &str,
    ) -> Result<bool> {
        self.check()?;
        self.exports.lock().push(ExportCall {
            camera_id: camera_id.to_string(),
            start,
            end,
            file_name: file_name.to_string(),
        });
        Ok(self.export_ok.load(Ordering::SeqCst))
    }
}

// ========== 纹理 ==========

#[derive(Default)]
pub struct FakeSurface {
    next: u64,
    pub created: Vec<(TextureId, PixelFormat, u16, u16)>,
    pub updated: Vec<TextureId>,
    pub destroyed: Vec<TextureId>,
}

impl TextureSurface for FakeSurface {
    fn create_streaming(&mut self, format: PixelFormat, width: u16, height: u16) -> Result<TextureId> {
        self.next += 1;
        let id = TextureId(self.next);
        self.created.push((id, format, width, height));
        Ok(id)
    }

    fn update(&mut self, texture: TextureId, _data: &[u8]) -> Result<()> {
        self.updated.push(texture);
        Ok(())
    }

    fn destroy(&mut self, texture: TextureId) {
        self.destroyed.push(texture);
    }
}
