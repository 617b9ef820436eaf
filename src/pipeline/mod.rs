//! 单路流水线: 取流 → 解码 → RGB24帧
//! Per-stream decode pipeline and the collaborator traits it is built from.

pub mod ffmpeg_source;
pub mod frame_decoder;
pub mod state;

pub use ffmpeg_source::{FfmpegSource, FfmpegSourceFactory};
pub use frame_decoder::{FrameDecoder, FrameDecoderFactory};
pub use state::{aspect_correct, PipelineState};

use crate::query::VmsClient;
use anyhow::Result;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

/// 样本负载格式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleFormat {
    /// 已解码的 YUV420P 平面数据, 行无填充
    I420 { width: u16, height: u16 },
    /// 关键帧静态图
    Jpeg,
    /// 未解码的压缩数据
    Encoded { codec: String },
    /// 音频, 只用于时间戳跟踪
    Audio,
}

/// 取流端交给流水线的样本
#[derive(Debug, Clone)]
pub struct Sample {
    pub media: MediaKind,
    pub format: SampleFormat,
    pub key: bool,
    /// 相对流起点的时间戳 (毫秒)
    pub pts_ms: i64,
    /// 流起点的绝对时间 (毫秒)
    pub stream_start_ms: i64,
    pub data: Arc<Vec<u8>>,
    /// 拖动预览的单帧, 不属于连续流
    pub still: bool,
}

impl Sample {
    /// 绝对时间戳 = 流起点 + 相对pts
    pub fn absolute_pts_ms(&self) -> i64 {
        self.stream_start_ms.saturating_add(self.pts_ms)
    }
}

/// 解码完成的RGB24帧, 渲染线程取走后上传纹理
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub buffer: Vec<u8>,
    pub width: u16,
    pub height: u16,
    pub original_width: u16,
    pub original_height: u16,
    /// 绝对时间 (毫秒)
    pub pts_ms: i64,
}

pub type SampleSink = Arc<dyn Fn(Sample) + Send + Sync>;

/// 外部取流库: 给定URL后通过回调持续产出样本
/// 上游出错或结束时只是不再产出样本, 由存活检测发现
pub trait MediaSource: Send {
    fn play(&mut self, url: &str) -> Result<()>;

    /// 只发出停止信号, 不阻塞
    fn stop(&mut self);
}

pub trait SourceFactory: Send + Sync {
    fn create(&self, sink: SampleSink) -> Box<dyn MediaSource>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    HasOutput,
    NeedMore,
}

pub trait VideoDecoder: Send {
    fn attach(&mut self, sample: &Sample) -> Result<()>;

    fn decode(&mut self) -> Result<DecodeStatus>;

    /// 最近一次输出的原始尺寸
    fn input_size(&self) -> Option<(u16, u16)>;

    /// 最近一次输出缩放到指定尺寸的RGB24数据
    fn rgb24(&mut self, width: u16, height: u16) -> Result<Vec<u8>>;
}

/// 首个视频样本到达时按格式创建解码器; 不支持的格式返回错误
pub trait DecoderFactory: Send + Sync {
    fn create(&self, format: &SampleFormat) -> Result<Box<dyn VideoDecoder>>;
}

/// 解码线程向上交付帧
pub trait FrameSink: Send + Sync {
    fn post_video_frame(&self, name: &str, frame: Frame);
}

/// 创建流水线所需的外部协作者
#[derive(Clone)]
pub struct PipelineEnv {
    pub sources: Arc<dyn SourceFactory>,
    pub decoders: Arc<dyn DecoderFactory>,
    pub vms: Arc<dyn VmsClient>,
}

impl PipelineEnv {
    /// ez-ffmpeg 取流 + 内置解码器
    pub fn ffmpeg(vms: Arc<dyn VmsClient>) -> Self {
        Self {
            sources: Arc::new(FfmpegSourceFactory),
            decoders: Arc::new(FrameDecoderFactory),
            vms,
        }
    }
}
