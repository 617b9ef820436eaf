/// FFmpeg取流模块
/// ez-ffmpeg backed media source producing raw I420 samples.
use super::{MediaKind, MediaSource, Sample, SampleFormat, SampleSink, SourceFactory};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Frame, Input};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

/// RTSP socket 超时 (微秒)
const RTSP_TIMEOUT_US: &str = "5000000";
const FALLBACK_TIME_BASE: (i32, i32) = (1, 90_000);
/// AV_FRAME_FLAG_KEY
const FRAME_FLAG_KEY: i32 = 1 << 1;

pub struct FfmpegSourceFactory;

impl SourceFactory for FfmpegSourceFactory {
    fn create(&self, sink: SampleSink) -> Box<dyn MediaSource> {
        Box::new(FfmpegSource::new(sink))
    }
}

/// 每次 `play()` 启动一个新的解码线程; 代数ID变化后旧线程在下一帧退出
pub struct FfmpegSource {
    sink: SampleSink,
    generation: Arc<AtomicUsize>,
}

impl FfmpegSource {
    pub fn new(sink: SampleSink) -> Self {
        Self {
            sink,
            generation: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl MediaSource for FfmpegSource {
    fn play(&mut self, url: &str) -> Result<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let filter = SampleFilter::new(generation, self.generation.clone(), self.sink.clone());
        let url = url.to_string();
        thread::Builder::new()
            .name(format!("ffmpeg-source-{}", generation))
            .spawn(move || {
                info!("🎬 取流启动 (Gen: {}): {}", generation, url);
                match run_context(&url, filter) {
                    Ok(()) => info!("✅ 取流结束 (Gen: {})", generation),
                    Err(e) => warn!("❌ 取流失败 (Gen: {}): {:#}", generation, e),
                }
            })
            .context("启动取流线程失败")?;
        Ok(())
    }

    fn stop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

fn run_context(url: &str, filter: SampleFilter) -> Result<()> {
    let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
    let pipe = pipe.filter("sample", Box::new(filter));
    let out = create_null_output().add_frame_pipeline(pipe);

    let mut input = Input::new(url);
    if url.starts_with("rtsp://") {
        input = input.set_input_opts(
            [
                ("rtsp_transport", "tcp"),
                ("rtsp_flags", "prefer_tcp"),
                ("timeout", RTSP_TIMEOUT_US),
            ]
            .into(),
        );
    }

    let ctx = FfmpegContext::builder()
        .input(input)
        .filter_desc("format=yuv420p")
        .output(out)
        .build()
        .map_err(|e| anyhow!("构建失败: {}", e))?;

    let sch = ctx.start().map_err(|e| anyhow!("启动失败: {}", e))?;
    sch.wait().map_err(|e| anyhow!("解码中断: {}", e))?;
    Ok(())
}

/// 把解码后的 YUV420P 帧打包成紧凑样本交给流水线
struct SampleFilter {
    generation: usize,
    current: Arc<AtomicUsize>,
    sink: SampleSink,
    stream_start_ms: Option<i64>,
    total_frames: usize,
    dropped_frames: usize,
    count: usize,
    last: Instant,
}

impl SampleFilter {
    fn new(generation: usize, current: Arc<AtomicUsize>, sink: SampleSink) -> Self {
        Self {
            generation,
            current,
            sink,
            stream_start_ms: None,
            total_frames: 0,
            dropped_frames: 0,
            count: 0,
            last: Instant::now(),
        }
    }

    fn drop_frame(&mut self, reason: &str) -> Result<Option<Frame>, String> {
        self.dropped_frames += 1;
        if self.total_frames <= 10 {
            debug!("⚠️ 丢弃帧 #{}: {}", self.total_frames, reason);
        }
        Ok(None)
    }
}

impl FrameFilter for SampleFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        debug!("✅ 取流过滤器启动 (Gen: {})", self.generation);
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        // 代数ID过期则停止
        if self.current.load(Ordering::SeqCst) != self.generation {
            return Err("Source stopped".to_string());
        }

        self.total_frames += 1;
        let sample = unsafe {
            if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
                return self.drop_frame("空帧/损坏帧");
            }
            let raw = &*frame.as_ptr();
            let w = raw.width as usize;
            let h = raw.height as usize;
            if w == 0 || h == 0 || w > 4096 || h > 4096 {
                return self.drop_frame("非法分辨率");
            }
            // 缺少参考帧、无效比特流
            if raw.decode_error_flags & 0x03 != 0 {
                return self.drop_frame("解码错误标志");
            }

            let y_plane = raw.data[0];
            let u_plane = raw.data[1];
            let v_plane = raw.data[2];
            let y_stride = raw.linesize[0] as usize;
            let uv_stride = raw.linesize[1] as usize;
            let uv_w = w.div_ceil(2);
            let uv_h = h.div_ceil(2);
            if y_plane.is_null() || u_plane.is_null() || v_plane.is_null() {
                return self.drop_frame("YUV指针为空");
            }
            if y_stride < w || uv_stride < uv_w {
                return self.drop_frame("步长异常");
            }

            // 去掉行填充
            let mut data = Vec::with_capacity(w * h + 2 * uv_w * uv_h);
            for row in 0..h {
                let src = std::slice::from_raw_parts(y_plane.add(row * y_stride), w);
                data.extend_from_slice(src);
            }
            for plane in [u_plane, v_plane] {
                for row in 0..uv_h {
                    let src = std::slice::from_raw_parts(plane.add(row * uv_stride), uv_w);
                    data.extend_from_slice(src);
                }
            }

            let (num, den) = if raw.time_base.den > 0 && raw.time_base.num > 0 {
                (raw.time_base.num, raw.time_base.den)
            } else {
                FALLBACK_TIME_BASE
            };
            let pts = if raw.best_effort_timestamp != i64::MIN {
                raw.best_effort_timestamp
            } else {
                raw.pts
            };
            let pts_ms = if pts == i64::MIN {
                0
            } else {
                (pts as i128 * num as i128 * 1000 / den as i128) as i64
            };

            // 首帧时把流起点对齐到墙钟
            let stream_start_ms = *self
                .stream_start_ms
                .get_or_insert_with(|| Utc::now().timestamp_millis() - pts_ms);

            Sample {
                media: MediaKind::Video,
                format: SampleFormat::I420 {
                    width: w as u16,
                    height: h as u16,
                },
                key: raw.flags & FRAME_FLAG_KEY != 0,
                pts_ms,
                stream_start_ms,
                data: Arc::new(data),
                still: false,
            }
        };

        (self.sink)(sample);

        self.count += 1;
        let elapsed = self.last.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            let drop_rate = self.dropped_frames as f64 / self.total_frames as f64 * 100.0;
            debug!(
                "📺 取流统计 (Gen: {}): {:.1}fps | 总帧{} | 丢弃{} ({:.1}%)",
                self.generation,
                self.count as f64 / elapsed,
                self.total_frames,
                self.dropped_frames,
                drop_rate
            );
            self.last = Instant::now();
            self.count = 0;
        }

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        debug!("✅ 取流过滤器退出 (Gen: {})", self.generation);
    }
}
