/// 单路流水线状态
/// Owns one stream's source, its pending-sample queue and the decode worker.
///
/// 工作线程在对象销毁前必定已退出: `Drop` 先停止取流再等待线程结束。
/// 因此销毁不能发生在解码线程交付帧所需的锁内。
use super::{
    DecodeStatus, DecoderFactory, Frame, FrameSink, MediaKind, MediaSource, PipelineEnv, Sample,
    SampleFormat, SampleSink, VideoDecoder,
};
use crate::config::StreamInfo;
use crate::query::api::to_iso8601;
use crate::query::VmsClient;
use crate::timeline::Timerange;
use crate::validate::ValidationError;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

// ========== 公共常量 ==========
pub const PENDING_SAMPLE_CAPACITY: usize = 64;
/// 解码完成时队列中仍有这么多样本则丢弃该帧
pub const BACKLOG_DROP_THRESHOLD: usize = 2;
/// 关键帧预览可能需要多次解码才有输出
pub const STILL_DECODE_ATTEMPTS: usize = 10;

/// 按请求框等比缩放, 宽高向下取整到8的倍数
pub fn aspect_correct(stream_w: u16, stream_h: u16, req_w: u16, req_h: u16) -> (u16, u16) {
    if req_w == 0 || req_h == 0 {
        return (stream_w, stream_h);
    }
    if stream_w == 0 || stream_h == 0 {
        return (req_w, req_h);
    }
    let (sw, sh) = (stream_w as f64, stream_h as f64);
    let (rw, rh) = (req_w as f64, req_h as f64);
    let scale = if rw / rh < sw / sh { rw / sw } else { rh / sh };
    let w = (sw * scale + 0.5) as u32;
    let h = (sh * scale + 0.5) as u32;
    let align = |v: u32| ((v / 8).max(1) * 8).min(u16::MAX as u32) as u16;
    (align(w), align(h))
}

/// 取流回调与工作线程共享的部分
struct Shared {
    name: String,
    geometry: Mutex<(u16, u16)>,
    samples: Sender<Sample>,
    last_v_pts: AtomicI64,
    last_a_pts: AtomicI64,
    has_audio: AtomicBool,
    failed: AtomicBool,
    last_video_sample: Mutex<Option<Sample>>,
}

impl Shared {
    /// 取流线程回调: 记录时间戳并入队
    fn accept(&self, sample: Sample) {
        match sample.media {
            MediaKind::Audio => {
                self.has_audio.store(true, Ordering::Relaxed);
                self.last_a_pts.store(sample.pts_ms, Ordering::Relaxed);
            }
            MediaKind::Video => {
                self.last_v_pts
                    .store(sample.absolute_pts_ms(), Ordering::Relaxed);
                self.enqueue(sample);
            }
        }
    }

    fn enqueue(&self, sample: Sample) {
        match self.samples.try_send(sample) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("⚠️ [{}] 样本队列已满, 丢弃", self.name),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PlaybackWindow {
    last_control_bar_pos: Option<DateTime<Utc>>,
    range: Option<Timerange>,
}

pub struct PipelineState {
    info: StreamInfo,
    shared: Arc<Shared>,
    source: Mutex<Box<dyn MediaSource>>,
    vms: Arc<dyn VmsClient>,
    playback: Mutex<PlaybackWindow>,
    /// 已请求播放且尚未 stop; 上游自行断开不会清除
    active: AtomicBool,
    v_pts_at_check: AtomicI64,
    a_pts_at_check: AtomicI64,
    shutdown: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl PipelineState {
    pub fn new(
        info: StreamInfo,
        width: u16,
        height: u16,
        env: &PipelineEnv,
        frames: Weak<dyn FrameSink>,
    ) -> Result<Self> {
        let (samples_tx, samples_rx) = bounded(PENDING_SAMPLE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = unbounded::<()>();

        let shared = Arc::new(Shared {
            name: info.name.clone(),
            geometry: Mutex::new((width, height)),
            samples: samples_tx,
            last_v_pts: AtomicI64::new(0),
            last_a_pts: AtomicI64::new(0),
            has_audio: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            last_video_sample: Mutex::new(None),
        });

        let worker = Worker {
            shared: shared.clone(),
            samples: samples_rx,
            shutdown: shutdown_rx,
            decoders: env.decoders.clone(),
            decoder: None,
            frames,
        };
        let handle = thread::Builder::new()
            .name(format!("pipeline-{}", info.name))
            .spawn(move || worker.run())
            .context("启动解码线程失败")?;

        let sink_shared = shared.clone();
        let sink: SampleSink = Arc::new(move |sample| sink_shared.accept(sample));
        let source = env.sources.create(sink);

        info!("🎬 [{}] 创建流水线 {}x{}", info.name, width, height);
        Ok(Self {
            info,
            shared,
            source: Mutex::new(source),
            vms: env.vms.clone(),
            playback: Mutex::new(PlaybackWindow::default()),
            active: AtomicBool::new(false),
            v_pts_at_check: AtomicI64::new(0),
            a_pts_at_check: AtomicI64::new(0),
            shutdown: Some(shutdown_tx),
            worker: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// 直播: 直接使用流地址
    pub fn play_live(&self) -> Result<()> {
        info!("📺 [{}] 直播 {}", self.info.name, self.info.source_url);
        self.start(&self.info.source_url)
    }

    /// 回放: 从最后一次拖动的位置播放到当前可见范围的终点
    pub fn play(&self) -> Result<()> {
        let window = *self.playback.lock();
        let Some(range) = window.range else {
            bail!("[{}] 没有可见时间范围", self.info.name);
        };
        let start = window.last_control_bar_pos.unwrap_or(range.start());
        let end = range.end();
        if start >= end {
            return Err(ValidationError::InvertedRange { start, end }.into());
        }
        let url = format!(
            "{}_{}_{}",
            self.info.source_url,
            to_iso8601(start, false),
            to_iso8601(end, false)
        );
        info!("⏯️ [{}] 回放 {}", self.info.name, url);
        self.start(&url)
    }

    fn start(&self, url: &str) -> Result<()> {
        let mut source = self.source.lock();
        source.play(url)?;
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn stop(&self) {
        let mut source = self.source.lock();
        self.active.store(false, Ordering::SeqCst);
        source.stop();
    }

    /// 播放意图而非上游状态: 断流的直播仍算运行中, 交给存活检测处理
    pub fn running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// 解码器创建失败等不可恢复错误
    pub fn failed(&self) -> bool {
        self.shared.failed.load(Ordering::Relaxed)
    }

    pub fn size(&self) -> (u16, u16) {
        *self.shared.geometry.lock()
    }

    /// 更新输出尺寸, 并重新提交最后一个样本以立刻得到新尺寸的帧
    pub fn resize(&self, width: u16, height: u16) {
        {
            let mut geometry = self.shared.geometry.lock();
            if *geometry == (width, height) {
                return;
            }
            *geometry = (width, height);
        }
        debug!("🔍 [{}] 调整尺寸 {}x{}", self.info.name, width, height);
        let last = self.shared.last_video_sample.lock().clone();
        if let Some(sample) = last {
            self.shared.enqueue(sample);
        }
    }

    /// 拖动预览: 取回该时间点的关键帧并单独解码
    pub fn control_bar(&self, pos: DateTime<Utc>) -> Result<()> {
        self.playback.lock().last_control_bar_pos = Some(pos);
        let (width, height) = self.size();
        let data = self
            .vms
            .key_frame(&self.info.camera_id, pos, width, height)
            .with_context(|| format!("[{}] 获取关键帧失败", self.info.name))?;
        if data.is_empty() {
            bail!("[{}] 关键帧为空", self.info.name);
        }
        self.shared.enqueue(Sample {
            media: MediaKind::Video,
            format: SampleFormat::Jpeg,
            key: true,
            pts_ms: pos.timestamp_millis(),
            stream_start_ms: 0,
            data: Arc::new(data),
            still: true,
        });
        Ok(())
    }

    pub fn last_control_bar_pos(&self) -> Option<DateTime<Utc>> {
        self.playback.lock().last_control_bar_pos
    }

    pub fn update_range(&self, range: Timerange) {
        self.playback.lock().range = Some(range);
    }

    pub fn range(&self) -> Option<Timerange> {
        self.playback.lock().range
    }

    // ========== 存活检测 ==========

    pub fn last_v_pts(&self) -> i64 {
        self.shared.last_v_pts.load(Ordering::Relaxed)
    }

    pub fn last_a_pts(&self) -> i64 {
        self.shared.last_a_pts.load(Ordering::Relaxed)
    }

    pub fn has_audio(&self) -> bool {
        self.shared.has_audio.load(Ordering::Relaxed)
    }

    pub fn v_pts_at_check(&self) -> i64 {
        self.v_pts_at_check.load(Ordering::Relaxed)
    }

    pub fn set_v_pts_at_check(&self, pts: i64) {
        self.v_pts_at_check.store(pts, Ordering::Relaxed);
    }

    pub fn a_pts_at_check(&self) -> i64 {
        self.a_pts_at_check.load(Ordering::Relaxed)
    }

    pub fn set_a_pts_at_check(&self, pts: i64) {
        self.a_pts_at_check.store(pts, Ordering::Relaxed);
    }

    /// 与上次检查点比较; 时间戳没有前进则判定为卡死, 否则更新检查点
    pub fn check_liveness(&self) -> bool {
        let v = self.last_v_pts();
        let a = self.last_a_pts();
        let stalled =
            v == self.v_pts_at_check() || (self.has_audio() && a == self.a_pts_at_check());
        if !stalled {
            self.set_v_pts_at_check(v);
            self.set_a_pts_at_check(a);
        }
        !stalled
    }
}

impl Drop for PipelineState {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        self.source.get_mut().stop();
        drop(self.shutdown.take());
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("❌ [{}] 解码线程异常退出", self.info.name);
            }
        }
        debug!("🗑️ [{}] 流水线已销毁", self.info.name);
    }
}

/// 解码线程: FIFO取样本, 解码, 交付
struct Worker {
    shared: Arc<Shared>,
    samples: Receiver<Sample>,
    shutdown: Receiver<()>,
    decoders: Arc<dyn DecoderFactory>,
    decoder: Option<Box<dyn VideoDecoder>>,
    frames: Weak<dyn FrameSink>,
}

impl Worker {
    fn run(mut self) {
        debug!("✅ [{}] 解码线程启动", self.shared.name);
        loop {
            select! {
                recv(self.samples) -> msg => match msg {
                    Ok(sample) => self.process(sample),
                    Err(_) => break,
                },
                recv(self.shutdown) -> _ => break,
            }
        }
        debug!("✅ [{}] 解码线程退出", self.shared.name);
    }

    fn process(&mut self, sample: Sample) {
        if sample.media != MediaKind::Video || self.shared.failed.load(Ordering::Relaxed) {
            return;
        }
        *self.shared.last_video_sample.lock() = Some(sample.clone());

        let mut decoder = match self.decoder.take() {
            Some(decoder) => decoder,
            None => match self.decoders.create(&sample.format) {
                Ok(decoder) => decoder,
                Err(e) => {
                    error!("❌ [{}] {:#}", self.shared.name, e);
                    self.shared.failed.store(true, Ordering::Relaxed);
                    return;
                }
            },
        };

        if let Err(e) = decoder.attach(&sample) {
            warn!("⚠️ [{}] 样本提交失败: {:#}", self.shared.name, e);
            self.decoder = Some(decoder);
            return;
        }

        let attempts = if sample.still { STILL_DECODE_ATTEMPTS } else { 1 };
        for _ in 0..attempts {
            match decoder.decode() {
                Ok(DecodeStatus::HasOutput) => {
                    let backlog = self.samples.len();
                    if backlog < BACKLOG_DROP_THRESHOLD {
                        if let Err(e) = self.forward(decoder.as_mut(), sample.absolute_pts_ms()) {
                            warn!("⚠️ [{}] 交付帧失败: {:#}", self.shared.name, e);
                        }
                    } else {
                        debug!("⏭️ [{}] 积压 {} 个样本, 丢弃帧", self.shared.name, backlog);
                    }
                    break;
                }
                Ok(DecodeStatus::NeedMore) => continue,
                Err(e) => {
                    warn!("⚠️ [{}] 解码失败: {:#}", self.shared.name, e);
                    break;
                }
            }
        }
        self.decoder = Some(decoder);
    }

    fn forward(&self, decoder: &mut dyn VideoDecoder, pts_ms: i64) -> Result<()> {
        let (in_w, in_h) = decoder.input_size().context("解码器没有输出尺寸")?;
        let (req_w, req_h) = *self.shared.geometry.lock();
        let (width, height) = aspect_correct(in_w, in_h, req_w, req_h);
        let buffer = decoder.rgb24(width, height)?;
        let Some(sink) = self.frames.upgrade() else {
            return Ok(());
        };
        sink.post_video_frame(
            &self.shared.name,
            Frame {
                buffer,
                width,
                height,
                original_width: in_w,
                original_height: in_h,
                pts_ms,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        i420_sample, stream_info, FakeSources, FakeVms, GatedDecoders, RecordingSink,
        StubbornDecoders,
    };
    use crate::pipeline::FrameDecoderFactory;
    use chrono::{Duration, TimeZone};
    use std::time::Duration as StdDuration;

    fn env(sources: Arc<FakeSources>, decoders: Arc<dyn DecoderFactory>) -> PipelineEnv {
        PipelineEnv {
            sources,
            decoders,
            vms: Arc::new(FakeVms::default()),
        }
    }

    fn weak(sink: &Arc<RecordingSink>) -> Weak<dyn FrameSink> {
        let weak: Weak<RecordingSink> = Arc::downgrade(sink);
        weak
    }

    #[test]
    fn test_aspect_correct() {
        assert_eq!(aspect_correct(1920, 1080, 800, 600), (800, 448));
        assert_eq!(aspect_correct(640, 480, 1920, 1080), (1440, 1080));
        assert_eq!(aspect_correct(1920, 1080, 0, 0), (1920, 1080));
        assert_eq!(aspect_correct(0, 0, 320, 240), (320, 240));
        // 至少8像素
        assert_eq!(aspect_correct(4000, 10, 400, 300), (400, 8));
    }

    #[test]
    fn test_decodes_and_posts_aspect_corrected() {
        let sources = Arc::new(FakeSources::default());
        let sink = Arc::new(RecordingSink::default());
        let pipe = PipelineState::new(
            stream_info("0_onebyone_0"),
            160,
            160,
            &env(sources.clone(), Arc::new(FrameDecoderFactory)),
            weak(&sink),
        )
        .unwrap();
        pipe.play_live().unwrap();
        assert!(pipe.running());

        let source = sources.last().unwrap();
        assert_eq!(source.urls(), vec!["rtsp://127.0.0.1:10554/0_onebyone_0"]);
        source.push(i420_sample(64, 32, 1_000, 500));

        let frames = sink.wait_for(1, StdDuration::from_secs(5));
        let (name, frame) = &frames[0];
        assert_eq!(name, "0_onebyone_0");
        assert_eq!((frame.width, frame.height), (160, 80));
        assert_eq!((frame.original_width, frame.original_height), (64, 32));
        assert_eq!(frame.pts_ms, 1_500);
        assert_eq!(frame.buffer.len(), 160 * 80 * 3);
        assert_eq!(pipe.last_v_pts(), 1_500);
    }

    #[test]
    fn test_backpressure_drops_while_backlogged() {
        let sources = Arc::new(FakeSources::default());
        let sink = Arc::new(RecordingSink::default());
        let gated = GatedDecoders::new();
        let pipe = PipelineState::new(
            stream_info("0_onebyone_0"),
            64,
            32,
            &env(sources.clone(), gated.factory()),
            weak(&sink),
        )
        .unwrap();
        pipe.play_live().unwrap();
        let source = sources.last().unwrap();

        source.push(i420_sample(64, 32, 0, 1));
        gated.wait_started();
        // 第一帧解码期间再来两个样本
        source.push(i420_sample(64, 32, 0, 2));
        source.push(i420_sample(64, 32, 0, 3));

        gated.release();
        gated.wait_started();
        gated.release();
        gated.wait_started();
        gated.release();

        let frames = sink.wait_for(2, StdDuration::from_secs(5));
        let pts: Vec<i64> = frames.iter().map(|(_, f)| f.pts_ms).collect();
        assert_eq!(pts, vec![2, 3]);
        drop(pipe);
        assert_eq!(sink.frames().len(), 2);
    }

    #[test]
    fn test_resize_resubmits_last_sample() {
        let sources = Arc::new(FakeSources::default());
        let sink = Arc::new(RecordingSink::default());
        let pipe = PipelineState::new(
            stream_info("0_twobytwo_1"),
            64,
            32,
            &env(sources.clone(), Arc::new(FrameDecoderFactory)),
            weak(&sink),
        )
        .unwrap();
        pipe.play_live().unwrap();
        sources.last().unwrap().push(i420_sample(64, 32, 0, 10));
        sink.wait_for(1, StdDuration::from_secs(5));

        pipe.resize(32, 16);
        let frames = sink.wait_for(2, StdDuration::from_secs(5));
        assert_eq!((frames[1].1.width, frames[1].1.height), (32, 16));
        // 尺寸未变不重复提交
        pipe.resize(32, 16);
        assert_eq!(pipe.size(), (32, 16));
    }

    #[test]
    fn test_unsupported_codec_marks_failed() {
        let sources = Arc::new(FakeSources::default());
        let sink = Arc::new(RecordingSink::default());
        let pipe = PipelineState::new(
            stream_info("0_onebyone_0"),
            64,
            32,
            &env(sources.clone(), Arc::new(FrameDecoderFactory)),
            weak(&sink),
        )
        .unwrap();
        pipe.play_live().unwrap();
        let mut sample = i420_sample(64, 32, 0, 1);
        sample.format = SampleFormat::Encoded {
            codec: "vp9".into(),
        };
        sources.last().unwrap().push(sample);

        let deadline = std::time::Instant::now() + StdDuration::from_secs(5);
        while !pipe.failed() {
            assert!(std::time::Instant::now() < deadline);
            thread::sleep(StdDuration::from_millis(2));
        }
        assert!(sink.frames().is_empty());
    }

    #[test]
    fn test_play_url_uses_scrub_position() {
        let sources = Arc::new(FakeSources::default());
        let sink = Arc::new(RecordingSink::default());
        let pipe = PipelineState::new(
            stream_info("0_onebyone_0"),
            64,
            32,
            &env(sources.clone(), Arc::new(FrameDecoderFactory)),
            weak(&sink),
        )
        .unwrap();
        assert!(pipe.play().is_err());

        let start = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        pipe.update_range(Timerange::new(start, start + Duration::minutes(20)).unwrap());
        pipe.control_bar(start + Duration::minutes(5)).unwrap();
        pipe.play().unwrap();

        let urls = sources.last().unwrap().urls();
        assert_eq!(
            urls.last().unwrap(),
            "rtsp://127.0.0.1:10554/0_onebyone_0_2024-03-01T10:05:00.000_2024-03-01T10:20:00.000"
        );
        // 关键帧预览也被解码交付
        let frames = sink.wait_for(1, StdDuration::from_secs(5));
        assert_eq!(frames[0].1.pts_ms, (start + Duration::minutes(5)).timestamp_millis());
    }

    fn wait_for_calls(decoders: &StubbornDecoders, calls: usize) {
        let deadline = std::time::Instant::now() + StdDuration::from_secs(5);
        while decoders.calls() < calls {
            assert!(std::time::Instant::now() < deadline);
            thread::sleep(StdDuration::from_millis(2));
        }
        // 给工作线程留出多余尝试的机会
        thread::sleep(StdDuration::from_millis(50));
    }

    fn still_pipe(decoders: Arc<StubbornDecoders>, sink: &Arc<RecordingSink>) -> PipelineState {
        PipelineState::new(
            stream_info("0_onebyone_0"),
            64,
            32,
            &env(Arc::new(FakeSources::default()), decoders),
            weak(sink),
        )
        .unwrap()
    }

    #[test]
    fn test_still_retries_until_decoder_has_output() {
        let decoders = StubbornDecoders::new(STILL_DECODE_ATTEMPTS - 1);
        let sink = Arc::new(RecordingSink::default());
        let pipe = still_pipe(decoders.clone(), &sink);

        let pos = Utc.with_ymd_and_hms(2024, 3, 1, 10, 5, 0).unwrap();
        pipe.control_bar(pos).unwrap();
        let frames = sink.wait_for(1, StdDuration::from_secs(5));
        assert_eq!(frames[0].1.pts_ms, pos.timestamp_millis());
        assert_eq!(decoders.calls(), STILL_DECODE_ATTEMPTS);
    }

    #[test]
    fn test_still_gives_up_after_bounded_attempts() {
        let decoders = StubbornDecoders::new(STILL_DECODE_ATTEMPTS);
        let sink = Arc::new(RecordingSink::default());
        let pipe = still_pipe(decoders.clone(), &sink);

        pipe.control_bar(Utc::now()).unwrap();
        wait_for_calls(&decoders, STILL_DECODE_ATTEMPTS);
        assert_eq!(decoders.calls(), STILL_DECODE_ATTEMPTS);
        assert!(sink.frames().is_empty());
    }

    #[test]
    fn test_streamed_sample_gets_single_attempt() {
        let decoders = StubbornDecoders::new(1);
        let sources = Arc::new(FakeSources::default());
        let sink = Arc::new(RecordingSink::default());
        let pipe = PipelineState::new(
            stream_info("0_onebyone_0"),
            64,
            32,
            &env(sources.clone(), decoders.clone()),
            weak(&sink),
        )
        .unwrap();
        pipe.play_live().unwrap();
        sources.last().unwrap().push(i420_sample(64, 32, 0, 1));

        wait_for_calls(&decoders, 1);
        assert_eq!(decoders.calls(), 1);
        assert!(sink.frames().is_empty());
    }

    #[test]
    fn test_running_follows_play_and_stop_not_upstream() {
        let sources = Arc::new(FakeSources::default());
        let sink = Arc::new(RecordingSink::default());
        let pipe = PipelineState::new(
            stream_info("0_onebyone_0"),
            64,
            32,
            &env(sources.clone(), Arc::new(FrameDecoderFactory)),
            weak(&sink),
        )
        .unwrap();
        assert!(!pipe.running());
        pipe.play_live().unwrap();
        let source = sources.last().unwrap();

        // 上游断开后仍视为运行中, 由存活检测判定卡死
        source.hang_up();
        assert!(pipe.running());
        assert!(!pipe.check_liveness());

        pipe.stop();
        assert!(!pipe.running());
        assert_eq!(source.stop_count(), 1);
    }

    #[test]
    fn test_liveness_checkpoint() {
        let sources = Arc::new(FakeSources::default());
        let sink = Arc::new(RecordingSink::default());
        let pipe = PipelineState::new(
            stream_info("0_onebyone_0"),
            64,
            32,
            &env(sources.clone(), Arc::new(FrameDecoderFactory)),
            weak(&sink),
        )
        .unwrap();
        pipe.play_live().unwrap();
        // 从未收到帧
        assert!(!pipe.check_liveness());

        sources.last().unwrap().push(i420_sample(64, 32, 100, 0));
        assert!(pipe.check_liveness());
        assert_eq!(pipe.v_pts_at_check(), 100);
        assert!(!pipe.check_liveness());
    }

    #[test]
    fn test_drop_stops_source() {
        let sources = Arc::new(FakeSources::default());
        let sink = Arc::new(RecordingSink::default());
        let pipe = PipelineState::new(
            stream_info("0_onebyone_0"),
            64,
            32,
            &env(sources.clone(), Arc::new(FrameDecoderFactory)),
            weak(&sink),
        )
        .unwrap();
        pipe.play_live().unwrap();
        let source = sources.last().unwrap();
        drop(pipe);
        assert!(!source.is_running());
        assert!(source.stop_count() >= 1);
    }
}
