#![allow(clippy::type_complexity)]
pub mod config; // 配置与布局分配
pub mod host; // 流水线主机
pub mod pipeline; // 单路取流/解码
pub mod query; // 元数据服务查询
pub mod timeline; // 时间轴与控制条
pub mod validate; // 输入校验

#[cfg(test)]
mod testing;

pub use crate::config::{ConfigureState, Layout, StreamInfo};
pub use crate::host::{HostSettings, PipelineHost};
pub use crate::pipeline::PipelineEnv;
pub use crate::query::{HttpVmsClient, VmsClient};
pub use crate::timeline::{ControlBarEvent, ControlBarState, Timerange};
