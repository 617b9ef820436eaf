//! 元数据服务HTTP接口
//!
//! 每次调用新建连接, 固定10秒超时, 不在这一层重试。

use crate::config::ServiceAddr;
use crate::timeline::{AnalyticsEvent, Detection, MotionEvent, Segment};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::io::Read;
use std::time::Duration;
use tracing::warn;

// ========== 公共常量 ==========
pub const IO_TIMEOUT: Duration = Duration::from_millis(10_000);
/// 单帧图片的最大字节数
const MAX_FRAME_BYTES: u64 = 32 * 1024 * 1024;
const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// 服务端已分配的摄像头
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Camera {
    pub id: String,
    pub friendly_name: String,
    pub ipv4: String,
    pub do_motion_detection: bool,
}

// ========== 时间格式 ==========

/// `YYYY-MM-DDTHH:MM:SS.mmm`, 毫秒向下取整; `utc_suffix` 时追加 `Z`
pub fn to_iso8601(t: DateTime<Utc>, utc_suffix: bool) -> String {
    let mut s = t.format(ISO_FORMAT).to_string();
    if utc_suffix {
        s.push('Z');
    }
    s
}

/// 接受 `Z`、`±HH:MM` 偏移或无后缀 (视为UTC)
pub fn from_iso8601(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(s.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S%.f")
        .with_context(|| format!("无法解析时间: {}", s))?;
    Ok(naive.and_utc())
}

// ========== 应答结构 ==========

#[derive(Deserialize)]
struct CamerasReply {
    #[serde(default)]
    cameras: Vec<CameraRecord>,
}

#[derive(Deserialize)]
struct CameraRecord {
    #[serde(default)]
    id: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    friendly_name: String,
    #[serde(default)]
    ipv4: String,
    #[serde(default)]
    do_motion_detection: bool,
}

#[derive(Deserialize)]
struct SegmentsReply {
    #[serde(default)]
    segments: Vec<SpanRecord>,
}

#[derive(Deserialize)]
struct SpanRecord {
    start_time: String,
    end_time: String,
}

#[derive(Deserialize)]
struct MotionReply {
    #[serde(default)]
    motion_events: Vec<MotionRecord>,
}

#[derive(Deserialize)]
struct MotionRecord {
    start_time: String,
    end_time: String,
    #[serde(default)]
    motion: u8,
    #[serde(default)]
    stddev: u8,
}

#[derive(Deserialize)]
struct AnalyticsReply {
    #[serde(default)]
    analytics: Vec<AnalyticsRecord>,
}

#[derive(Deserialize)]
struct AnalyticsRecord {
    motion_start_time: String,
    motion_end_time: String,
    #[serde(default)]
    total_detections: u32,
    #[serde(default)]
    detections: Vec<DetectionRecord>,
}

#[derive(Deserialize)]
struct DetectionRecord {
    class_name: String,
    confidence: f32,
    timestamp: String,
}

// ========== 应答解析 ==========

/// 起点晚于终点的记录丢弃
fn ordered(kind: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    if start > end {
        warn!("⚠️ 丢弃{}: 起点 {} 晚于终点 {}", kind, start, end);
        return false;
    }
    true
}

pub fn parse_cameras(body: &str) -> Result<Vec<Camera>> {
    let reply: CamerasReply = serde_json::from_str(body).context("摄像头列表格式错误")?;
    Ok(reply
        .cameras
        .into_iter()
        .filter(|c| c.state == "assigned")
        .map(|c| Camera {
            id: c.id,
            friendly_name: c.friendly_name,
            ipv4: c.ipv4,
            do_motion_detection: c.do_motion_detection,
        })
        .collect())
}

pub fn parse_segments(body: &str) -> Result<Vec<Segment>> {
    let reply: SegmentsReply = serde_json::from_str(body).context("片段列表格式错误")?;
    let mut segments = Vec::with_capacity(reply.segments.len());
    for s in reply.segments {
        let start = from_iso8601(&s.start_time)?;
        let end = from_iso8601(&s.end_time)?;
        if ordered("片段", start, end) {
            segments.push(Segment { start, end });
        }
    }
    Ok(segments)
}

pub fn parse_motion_events(body: &str) -> Result<Vec<MotionEvent>> {
    let reply: MotionReply = serde_json::from_str(body).context("运动事件格式错误")?;
    let mut events = Vec::with_capacity(reply.motion_events.len());
    for m in reply.motion_events {
        let start = from_iso8601(&m.start_time)?;
        let end = from_iso8601(&m.end_time)?;
        if ordered("运动事件", start, end) {
            events.push(MotionEvent {
                start,
                end,
                motion_level: m.motion,
                stddev: m.stddev,
            });
        }
    }
    Ok(events)
}

pub fn parse_analytics(body: &str) -> Result<Vec<AnalyticsEvent>> {
    let reply: AnalyticsReply = serde_json::from_str(body).context("分析事件格式错误")?;
    reply
        .analytics
        .into_iter()
        .map(|a| {
            let detections = a
                .detections
                .into_iter()
                .map(|d| {
                    Ok(Detection {
                        class_name: d.class_name,
                        confidence: d.confidence,
                        timestamp: from_iso8601(&d.timestamp)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(AnalyticsEvent {
                motion_start_time: from_iso8601(&a.motion_start_time)?,
                motion_end_time: from_iso8601(&a.motion_end_time)?,
                total_detections: a.total_detections,
                detections,
            })
        })
        .collect()
}

// ========== 请求 ==========

fn agent() -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(IO_TIMEOUT).build()
}

fn get(addr: &ServiceAddr, path: &str) -> ureq::Request {
    agent().get(&format!("{}{}", addr.base_url(), path))
}

fn call(request: ureq::Request) -> Result<ureq::Response> {
    let url = request.url().to_string();
    match request.call() {
        Ok(resp) => Ok(resp),
        Err(ureq::Error::Status(code, _)) => Err(anyhow!("HTTP {} from {}", code, url)),
        Err(e) => Err(anyhow::Error::new(e).context(format!("请求失败: {}", url))),
    }
}

fn call_text(request: ureq::Request) -> Result<String> {
    call(request)?.into_string().context("读取应答失败")
}

fn ranged(request: ureq::Request, camera_id: &str, start: &str, end: &str) -> ureq::Request {
    request
        .query("camera_id", camera_id)
        .query("start_time", start)
        .query("end_time", end)
}

pub fn query_cameras(addr: &ServiceAddr) -> Result<Vec<Camera>> {
    parse_cameras(&call_text(get(addr, "/cameras"))?)
}

pub fn query_segments(
    addr: &ServiceAddr,
    camera_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Segment>> {
    let request = ranged(
        get(addr, "/contents"),
        camera_id,
        &to_iso8601(start, false),
        &to_iso8601(end, false),
    );
    parse_segments(&call_text(request)?)
}

pub fn query_motion_events(
    addr: &ServiceAddr,
    camera_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<MotionEvent>> {
    let request = ranged(
        get(addr, "/motion_events"),
        camera_id,
        &to_iso8601(start, false),
        &to_iso8601(end, false),
    );
    parse_motion_events(&call_text(request)?)
}

pub fn query_analytics(
    addr: &ServiceAddr,
    camera_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    stream_tag: Option<&str>,
) -> Result<Vec<AnalyticsEvent>> {
    let mut request = ranged(
        get(addr, "/analytics"),
        camera_id,
        &to_iso8601(start, true),
        &to_iso8601(end, true),
    );
    if let Some(tag) = stream_tag.filter(|t| !t.is_empty()) {
        request = request.query("stream_tag", tag);
    }
    parse_analytics(&call_text(request)?)
}

/// 服务端渲染的关键帧静态图 (JPEG)
pub fn query_key_frame(
    addr: &ServiceAddr,
    camera_id: &str,
    at: DateTime<Utc>,
    width: u16,
    height: u16,
) -> Result<Vec<u8>> {
    let request = get(addr, "/jpg")
        .query("camera_id", camera_id)
        .query("start_time", &to_iso8601(at, false))
        .query("width", &width.to_string())
        .query("height", &height.to_string());
    let mut body = Vec::new();
    call(request)?
        .into_reader()
        .take(MAX_FRAME_BYTES)
        .read_to_end(&mut body)
        .context("读取关键帧失败")?;
    Ok(body)
}

/// 请求服务端导出片段; 非2xx应答返回 `Ok(false)`
pub fn trigger_export(
    addr: &ServiceAddr,
    camera_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    file_name: &str,
) -> Result<bool> {
    let request = ranged(
        get(addr, "/export"),
        camera_id,
        &to_iso8601(start, false),
        &to_iso8601(end, false),
    )
    .query("file_name", file_name);
    match request.call() {
        Ok(_) => Ok(true),
        Err(ureq::Error::Status(code, _)) => {
            tracing::warn!("⚠️ 导出被拒绝: HTTP {}", code);
            Ok(false)
        }
        Err(e) => Err(anyhow::Error::new(e).context("导出请求失败")),
    }
}
