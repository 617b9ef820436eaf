//! 客户端配置 - 通过JSON文件持久化
//!
//! 记录元数据服务地址、当前布局以及每个布局槽位分配的摄像头。

use crate::query::api::Camera;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

// ========== 公共常量 ==========
pub const DEFAULT_SERVICE_HOST: &str = "127.0.0.1";
pub const DEFAULT_SERVICE_PORT: u16 = 10080;
pub const DEFAULT_RTSP_PORT: u16 = 10554;
pub const CONFIG_FILE_NAME: &str = "vision_cfg.json";
const APP_DIR: &str = "vision-wall";

/// 视频墙布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    #[default]
    OneByOne,
    TwoByTwo,
    FourByFour,
}

impl Layout {
    pub const ALL: [Layout; 3] = [Layout::OneByOne, Layout::TwoByTwo, Layout::FourByFour];

    pub fn as_str(&self) -> &'static str {
        match self {
            Layout::OneByOne => "onebyone",
            Layout::TwoByTwo => "twobytwo",
            Layout::FourByFour => "fourbyfour",
        }
    }

    /// 每行/列的格子数
    pub fn side(&self) -> usize {
        match self {
            Layout::OneByOne => 1,
            Layout::TwoByTwo => 2,
            Layout::FourByFour => 4,
        }
    }

    pub fn slots(&self) -> usize {
        self.side() * self.side()
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 某个槽位分配的流
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// `{window}_{layout}_{index}`, 唯一
    pub name: String,
    pub source_url: String,
    pub camera_id: String,
    #[serde(default)]
    pub motion_detection_enabled: bool,
}

impl StreamInfo {
    /// 由摄像头信息生成流地址 `rtsp://host:port/friendly_name`
    pub fn for_camera(name: String, host: &str, rtsp_port: u16, camera: &Camera) -> Self {
        let label = camera.friendly_name.replace(' ', "_");
        Self {
            name,
            source_url: format!("rtsp://{}:{}/{}", host, rtsp_port, label),
            camera_id: camera.id.clone(),
            motion_detection_enabled: camera.do_motion_detection,
        }
    }
}

/// 元数据服务地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAddr {
    pub host: String,
    pub port: u16,
}

impl ServiceAddr {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigureState {
    pub service_host: Option<String>,
    pub service_port: u16,
    pub rtsp_port: u16,
    pub current_layout: Layout,
    pub stream_map: BTreeMap<String, StreamInfo>,
    #[serde(skip)]
    need_save: bool,
}

impl Default for ConfigureState {
    fn default() -> Self {
        Self {
            service_host: Some(DEFAULT_SERVICE_HOST.to_string()),
            service_port: DEFAULT_SERVICE_PORT,
            rtsp_port: DEFAULT_RTSP_PORT,
            current_layout: Layout::default(),
            stream_map: BTreeMap::new(),
            need_save: false,
        }
    }
}

impl ConfigureState {
    /// 从JSON文件加载配置; 文件不存在时创建默认配置, 解析失败时使用默认值
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    warn!("⚠️ 配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("📝 配置文件不存在, 创建默认配置...");
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    warn!("❌ 保存默认配置失败: {:#}", e);
                }
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("创建目录失败: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("序列化配置失败")?;
        fs::write(path, json).with_context(|| format!("写入配置失败: {}", path.display()))?;
        info!("💾 配置已保存到 {}", path.display());
        Ok(())
    }

    /// 仅在有修改时保存
    pub fn save_if_needed(&mut self, path: &Path) -> Result<()> {
        if self.need_save {
            self.save(path)?;
            self.need_save = false;
        }
        Ok(())
    }

    pub fn need_save(&self) -> bool {
        self.need_save
    }

    pub fn service_addr(&self) -> Option<ServiceAddr> {
        let host = self.service_host.as_deref()?.trim();
        if host.is_empty() {
            return None;
        }
        Some(ServiceAddr {
            host: host.to_string(),
            port: self.service_port,
        })
    }

    pub fn set_service_host(&mut self, host: Option<String>) {
        self.service_host = host;
        self.need_save = true;
    }

    pub fn set_current_layout(&mut self, layout: Layout) {
        if self.current_layout != layout {
            self.current_layout = layout;
            self.need_save = true;
        }
    }

    /// 槽位名称 `{window}_{layout}_{index}`
    pub fn make_name(window: usize, layout: Layout, index: usize) -> String {
        format!("{}_{}_{}", window, layout, index)
    }

    /// 某个窗口在指定布局下的全部分配
    pub fn collect_stream_info(&self, window: usize, layout: Layout) -> Vec<StreamInfo> {
        let prefix = format!("{}_{}_", window, layout);
        self.stream_map
            .range(prefix.clone()..)
            .take_while(|(name, _)| name.starts_with(&prefix))
            .map(|(_, info)| info.clone())
            .collect()
    }

    pub fn stream_info(&self, name: &str) -> Option<&StreamInfo> {
        self.stream_map.get(name)
    }

    pub fn set_stream_info(&mut self, info: StreamInfo) {
        self.stream_map.insert(info.name.clone(), info);
        self.need_save = true;
    }

    pub fn unset_stream_info(&mut self, name: &str) -> Option<StreamInfo> {
        let removed = self.stream_map.remove(name);
        if removed.is_some() {
            self.need_save = true;
        }
        removed
    }
}

/// 应用数据目录 `<data_local_dir>/vision-wall`
pub fn top_dir() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .context("无法确定数据目录")?;
    Ok(base.join(APP_DIR))
}

/// 数据目录下的子目录 (exports / logs / config), 按需创建
pub fn sub_dir(name: &str) -> Result<PathBuf> {
    let dir = top_dir()?.join(name);
    fs::create_dir_all(&dir).with_context(|| format!("创建目录失败: {}", dir.display()))?;
    Ok(dir)
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(sub_dir("config")?.join(CONFIG_FILE_NAME))
}
