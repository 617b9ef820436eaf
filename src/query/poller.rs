/// 后台摄像头轮询线程
/// Background camera-list poll publishing a connection status line.
use super::{Camera, VmsClient};
use anyhow::{Context, Result};
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const STATUS_CONNECTED: &str = "Connected to recording service.";
pub const STATUS_UNREACHABLE: &str = "Unable to communicate with recording service.";

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceStatus {
    pub cameras: Vec<Camera>,
    pub connected: bool,
    pub status_text: String,
}

pub struct CameraPoller {
    updates: Receiver<ServiceStatus>,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CameraPoller {
    pub fn spawn(client: Arc<dyn VmsClient>, interval: Duration) -> Result<Self> {
        let (tx, updates) = unbounded();
        let (stop, stop_rx) = unbounded::<()>();
        let handle = thread::Builder::new()
            .name("camera-poll".into())
            .spawn(move || poll_loop(client, interval, tx, stop_rx))
            .context("启动轮询线程失败")?;
        Ok(Self {
            updates,
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// 只保留最新的状态
    pub fn latest(&self) -> Option<ServiceStatus> {
        self.updates.try_iter().last()
    }
}

impl Drop for CameraPoller {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn poll_loop(
    client: Arc<dyn VmsClient>,
    interval: Duration,
    tx: Sender<ServiceStatus>,
    stop: Receiver<()>,
) {
    loop {
        let status = match client.cameras() {
            Ok(cameras) => {
                debug!("📷 摄像头列表: {} 个", cameras.len());
                ServiceStatus {
                    cameras,
                    connected: true,
                    status_text: STATUS_CONNECTED.to_string(),
                }
            }
            Err(e) => {
                warn!("⚠️ 查询摄像头失败: {:#}", e);
                ServiceStatus {
                    cameras: Vec::new(),
                    connected: false,
                    status_text: STATUS_UNREACHABLE.to_string(),
                }
            }
        };
        if tx.send(status).is_err() {
            break;
        }
        select! {
            recv(stop) -> _ => break,
            default(interval) => {}
        }
    }
}
