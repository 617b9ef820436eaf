//! 时间轴模块: 时间范围、控制条状态机、叠加数据
//! Timeline: time ranges, the per-stream control bar and its overlays.

pub mod control_bar;
pub mod events;
pub mod timerange;

pub use control_bar::{
    ControlBarButton, ControlBarEvent, ControlBarState, ExportOutcome, ExportState, ScrubPointer,
};
pub use events::{AnalyticsEvent, Detection, MotionEvent, Segment, TimelineData};
pub use timerange::Timerange;

use chrono::{DateTime, Local, Utc};
use std::time::Duration;

// ========== 公共常量 ==========
/// 播放头刻度上限, 同时也是"直播边缘"
pub const PLAYHEAD_MAX: i32 = 1000;
pub const PLAYHEAD_MIN: i32 = 0;
pub const DEFAULT_TIMERANGE_MINUTES: u32 = 20;
/// 缩放按钮步长与下限 (分钟)
pub const ZOOM_STEP_MINUTES: u32 = 10;
pub const ZOOM_MIN_MINUTES: u32 = 10;
/// 平移按钮步长 (分钟)
pub const PAN_STEP_MINUTES: i64 = 10;
/// 点击导出时播放头前移的刻度
pub const EXPORT_PLAYHEAD_ADVANCE: i32 = 50;
pub const DATA_REFRESH_INTERVAL: Duration = Duration::from_millis(5000);
pub const LIVE_REFRESH_INTERVAL: Duration = Duration::from_millis(1000);
pub const EXPORT_ERROR_MESSAGE: &str = "Error encountered while exporting video.";

/// 播放头标签, 本地时间, 两行
pub fn playhead_label(t: DateTime<Utc>) -> String {
    t.with_timezone(&Local).format("%b %d, %Y\n%r").to_string()
}

/// 导出文件名取起始时间的本地时间
pub fn export_file_name(start: DateTime<Utc>) -> String {
    start
        .with_timezone(&Local)
        .format("%Y-%m-%d_%H-%M-%S.mov")
        .to_string()
}
