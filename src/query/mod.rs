//! 元数据服务查询层
//! Query layer against the remote metadata/control service.

pub mod api;
pub mod poller;

pub use api::Camera;
pub use poller::{CameraPoller, ServiceStatus};

use crate::config::{ConfigureState, ServiceAddr};
use crate::timeline::{AnalyticsEvent, MotionEvent, Segment, TimelineData, Timerange};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

/// 主机依赖的服务接口, 测试中可替换为假实现
pub trait VmsClient: Send + Sync {
    fn cameras(&self) -> Result<Vec<Camera>>;

    fn segments(&self, camera_id: &str, range: Timerange) -> Result<Vec<Segment>>;

    fn motion_events(&self, camera_id: &str, range: Timerange) -> Result<Vec<MotionEvent>>;

    fn analytics(
        &self,
        camera_id: &str,
        range: Timerange,
        stream_tag: Option<&str>,
    ) -> Result<Vec<AnalyticsEvent>>;

    /// 指定时间点的关键帧图片
    fn key_frame(&self, camera_id: &str, at: DateTime<Utc>, width: u16, height: u16)
        -> Result<Vec<u8>>;

    fn export(
        &self,
        camera_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        file_name: &str,
    ) -> Result<bool>;

    /// 三类叠加数据全部成功才返回
    fn timeline_data(&self, camera_id: &str, range: Timerange) -> Result<TimelineData> {
        Ok(TimelineData {
            segments: self.segments(camera_id, range).context("查询片段失败")?,
            motion_events: self
                .motion_events(camera_id, range)
                .context("查询运动事件失败")?,
            analytics_events: self
                .analytics(camera_id, range, None)
                .context("查询分析事件失败")?,
        })
    }
}

/// 基于HTTP的实现; 每次调用都从共享配置读取服务地址
pub struct HttpVmsClient {
    config: Arc<RwLock<ConfigureState>>,
}

impl HttpVmsClient {
    pub fn new(config: Arc<RwLock<ConfigureState>>) -> Self {
        Self { config }
    }

    fn addr(&self) -> Result<ServiceAddr> {
        self.config
            .read()
            .service_addr()
            .context("service address not set")
    }
}

impl VmsClient for HttpVmsClient {
    fn cameras(&self) -> Result<Vec<Camera>> {
        api::query_cameras(&self.addr()?)
    }

    fn segments(&self, camera_id: &str, range: Timerange) -> Result<Vec<Segment>> {
        api::query_segments(&self.addr()?, camera_id, range.start(), range.end())
    }

    fn motion_events(&self, camera_id: &str, range: Timerange) -> Result<Vec<MotionEvent>> {
        api::query_motion_events(&self.addr()?, camera_id, range.start(), range.end())
    }

    fn analytics(
        &self,
        camera_id: &str,
        range: Timerange,
        stream_tag: Option<&str>,
    ) -> Result<Vec<AnalyticsEvent>> {
        api::query_analytics(
            &self.addr()?,
            camera_id,
            range.start(),
            range.end(),
            stream_tag,
        )
    }

    fn key_frame(
        &self,
        camera_id: &str,
        at: DateTime<Utc>,
        width: u16,
        height: u16,
    ) -> Result<Vec<u8>> {
        api::query_key_frame(&self.addr()?, camera_id, at, width, height)
    }

    fn export(
        &self,
        camera_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        file_name: &str,
    ) -> Result<bool> {
        api::trigger_export(&self.addr()?, camera_id, start, end, file_name)
    }
}
