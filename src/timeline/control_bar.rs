/// 控制条状态机
/// Per-stream control bar: playhead, zoom window, overlays and export sub-state.
///
/// 只能由渲染线程修改; 与主机之间的交互通过 [`ControlBarEvent`] 传递。
use super::events::{AnalyticsEvent, MotionEvent, Segment, TimelineData};
use super::timerange::Timerange;
use super::{
    DATA_REFRESH_INTERVAL, DEFAULT_TIMERANGE_MINUTES, EXPORT_ERROR_MESSAGE,
    EXPORT_PLAYHEAD_ADVANCE, LIVE_REFRESH_INTERVAL, PAN_STEP_MINUTES, PLAYHEAD_MAX, PLAYHEAD_MIN,
    ZOOM_MIN_MINUTES, ZOOM_STEP_MINUTES,
};
use crate::validate::{self, ValidationError, MAX_TIMERANGE_MINUTES};
use chrono::{DateTime, Duration, Utc};
use std::time::Instant;
use tracing::{debug, warn};

/// 导出子状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportState {
    #[default]
    None,
    Configuring,
    Started,
    FinishedSuccess,
    FinishedError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlBarButton {
    Live,
    Play,
}

/// 控制条发往主机的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlBarEvent {
    /// 拖动播放头到某个时间点, 请求单帧预览
    Seek(DateTime<Utc>),
    Button(ControlBarButton),
    /// 重新查询当前范围的片段/运动/分析数据
    UpdateData,
    Export {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// 导出结束后交给界面处理的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportOutcome {
    /// 打开导出目录
    Saved,
    /// 弹出错误对话框
    Failed(&'static str),
}

/// 滑轨上的指针状态, `fraction` 为指针在滑轨内的相对位置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrubPointer {
    pub fraction: f32,
    pub inside: bool,
    pub down: bool,
}

#[derive(Debug, Clone)]
pub struct ControlBarState {
    playhead_pos: i32,
    timerange_minutes: u32,
    timerange: Timerange,
    dragging: bool,
    segments: Vec<Segment>,
    motion_events: Vec<MotionEvent>,
    analytics_events: Vec<AnalyticsEvent>,
    export_state: ExportState,
    export_start_time: Option<DateTime<Utc>>,
    need_update_data: bool,
    entered: bool,
    last_data_refresh: Option<Instant>,
    last_live_refresh: Option<Instant>,
}

impl ControlBarState {
    /// 初始为直播窗口 `[now - 20min, now]`, 播放头在直播边缘
    pub fn new(now: DateTime<Utc>) -> Self {
        let span = Duration::minutes(DEFAULT_TIMERANGE_MINUTES as i64);
        // 溢出时退化为零长度范围
        let timerange = Timerange::ending_at(now, span).unwrap_or(Timerange::instant(now));
        Self {
            playhead_pos: PLAYHEAD_MAX,
            timerange_minutes: DEFAULT_TIMERANGE_MINUTES,
            timerange,
            dragging: false,
            segments: Vec::new(),
            motion_events: Vec::new(),
            analytics_events: Vec::new(),
            export_state: ExportState::None,
            export_start_time: None,
            need_update_data: true,
            entered: false,
            last_data_refresh: None,
            last_live_refresh: None,
        }
    }

    // ========== 读取 ==========

    pub fn playhead_pos(&self) -> i32 {
        self.playhead_pos
    }

    pub fn timerange(&self) -> Timerange {
        self.timerange
    }

    pub fn timerange_minutes(&self) -> u32 {
        self.timerange_minutes
    }

    pub fn dragging(&self) -> bool {
        self.dragging
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn motion_events(&self) -> &[MotionEvent] {
        &self.motion_events
    }

    pub fn analytics_events(&self) -> &[AnalyticsEvent] {
        &self.analytics_events
    }

    pub fn export_state(&self) -> ExportState {
        self.export_state
    }

    pub fn export_start_time(&self) -> Option<DateTime<Utc>> {
        self.export_start_time
    }

    pub fn need_update_data(&self) -> bool {
        self.need_update_data
    }

    pub fn is_at_live(&self) -> bool {
        self.playhead_pos >= PLAYHEAD_MAX
    }

    /// 播放头对应的绝对时间
    pub fn playhead_time(&self) -> Option<DateTime<Utc>> {
        self.timerange
            .fraction_to_time(PLAYHEAD_MIN, PLAYHEAD_MAX, self.playhead_pos)
    }

    // ========== 范围操作 ==========

    pub fn live(&mut self) {
        self.live_at(Utc::now());
    }

    pub fn live_at(&mut self, now: DateTime<Utc>) {
        self.set_range_at(now, now);
        self.playhead_pos = PLAYHEAD_MAX;
    }

    pub fn set_range(&mut self, end_time: DateTime<Utc>) {
        self.set_range_at(end_time, Utc::now());
    }

    /// 结束时间晚于 `now` 时钳制到 `now`
    pub fn set_range_at(&mut self, end_time: DateTime<Utc>, now: DateTime<Utc>) {
        let end = end_time.min(now);
        match Timerange::ending_at(end, self.span()) {
            Some(range) => self.timerange = range,
            None => warn!("⚠️ 时间范围溢出, 保持原范围: end={}", end),
        }
        self.need_update_data = true;
    }

    pub fn set_timerange_minutes(&mut self, minutes: i64) -> Result<(), ValidationError> {
        self.set_timerange_minutes_at(minutes, Utc::now())
    }

    /// 以播放头所指时间为中心重新缩放窗口
    ///
    /// 所有中间值先计算完毕再一次性提交, 任何一步失败都保留原状态。
    pub fn set_timerange_minutes_at(
        &mut self,
        minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        let minutes = validate::timerange_minutes(minutes).map_err(|e| {
            warn!("⚠️ 缩放失败: {}", e);
            e
        })?;
        validate::positive_duration_ms(self.timerange.start(), self.timerange.end())?;
        let anchor = self
            .playhead_time()
            .ok_or(ValidationError::InvalidPlayhead(self.playhead_pos))?;

        let overflow = ValidationError::InvalidTimerangeMinutes(minutes as i64);
        let span = Duration::minutes(minutes as i64);
        let half = Duration::milliseconds(span.num_milliseconds() / 2);
        let end = anchor.checked_add_signed(half).ok_or(overflow.clone())?;
        let range = Timerange::ending_at(end.min(now), span).ok_or(overflow)?;
        let pos = range
            .time_to_fraction(anchor, PLAYHEAD_MIN, PLAYHEAD_MAX)
            .ok_or(ValidationError::InvalidDuration {
                start: range.start(),
                end: range.end(),
            })?;

        self.timerange_minutes = minutes;
        self.timerange = range;
        self.playhead_pos = pos;
        self.need_update_data = true;
        debug!(
            "🔍 缩放到 {} 分钟: [{}, {}] 播放头 {}",
            minutes,
            range.start(),
            range.end(),
            pos
        );
        Ok(())
    }

    pub fn zoom_in(&mut self) -> Result<(), ValidationError> {
        let minutes = self
            .timerange_minutes
            .saturating_sub(ZOOM_STEP_MINUTES)
            .max(ZOOM_MIN_MINUTES);
        if minutes == self.timerange_minutes {
            return Ok(());
        }
        self.set_timerange_minutes(minutes as i64)
    }

    pub fn zoom_out(&mut self) -> Result<(), ValidationError> {
        let minutes = (self.timerange_minutes + ZOOM_STEP_MINUTES).min(MAX_TIMERANGE_MINUTES);
        if minutes == self.timerange_minutes {
            return Ok(());
        }
        self.set_timerange_minutes(minutes as i64)
    }

    pub fn forward(&mut self, by: Duration) {
        self.forward_at(by, Utc::now());
    }

    /// 向前平移, 结束时间不会超过 `now`
    pub fn forward_at(&mut self, by: Duration, now: DateTime<Utc>) {
        let end = self.timerange.end();
        let shift = match end.checked_add_signed(by) {
            Some(moved) if moved <= now => by,
            _ => now - end,
        };
        self.pan(shift);
    }

    pub fn backward(&mut self, by: Duration) {
        self.pan(-by);
    }

    /// 平移按钮: 10分钟一步
    pub fn pan_forward(&mut self) {
        self.forward(Duration::minutes(PAN_STEP_MINUTES));
    }

    pub fn pan_backward(&mut self) {
        self.backward(Duration::minutes(PAN_STEP_MINUTES));
    }

    /// 平移范围并保持播放头的绝对时间
    fn pan(&mut self, shift: Duration) {
        let Some(anchor) = self.playhead_time() else {
            warn!("⚠️ 平移失败: 播放头位置无效 {}", self.playhead_pos);
            return;
        };
        let Some(range) = self.timerange.shifted(shift) else {
            warn!("⚠️ 平移溢出, 保持原范围");
            return;
        };
        let anchor = anchor.clamp(range.start(), range.end());
        if let Some(pos) = range.time_to_fraction(anchor, PLAYHEAD_MIN, PLAYHEAD_MAX) {
            self.playhead_pos = pos;
        }
        self.timerange = range;
        self.need_update_data = true;
    }

    // ========== 播放头交互 ==========

    /// 首次显示: 跳到直播并通知主机
    pub fn enter(&mut self, now: DateTime<Utc>) -> Vec<ControlBarEvent> {
        if self.entered {
            return Vec::new();
        }
        self.entered = true;
        self.live_at(now);
        vec![
            ControlBarEvent::Seek(self.timerange.end()),
            ControlBarEvent::Button(ControlBarButton::Live),
        ]
    }

    /// 指针在滑轨内按下开始拖动, 松开结束; 拖动中每次更新都发出 Seek
    pub fn pointer(&mut self, pointer: ScrubPointer) -> Option<ControlBarEvent> {
        if pointer.down && pointer.inside {
            self.dragging = true;
        }
        if !pointer.down {
            self.dragging = false;
            return None;
        }
        if !self.dragging || !pointer.fraction.is_finite() {
            return None;
        }
        let pos = (pointer.fraction * PLAYHEAD_MAX as f32) as i32;
        self.playhead_pos = pos.clamp(PLAYHEAD_MIN, PLAYHEAD_MAX);
        self.playhead_time().map(ControlBarEvent::Seek)
    }

    /// 直接设置播放头位置 (键盘或外部输入)
    pub fn set_playhead_pos(&mut self, pos: i32) -> Result<(), ValidationError> {
        self.playhead_pos = validate::playhead_position(pos)?;
        Ok(())
    }

    /// 播放中让播放头跟随解码帧的时间戳
    pub fn follow_frame(&mut self, pts: DateTime<Utc>, playing: bool) {
        if self.dragging || !playing {
            return;
        }
        if self.is_at_live() {
            self.playhead_pos = PLAYHEAD_MAX;
            return;
        }
        if self.timerange.contains(pts) {
            if let Some(pos) = self
                .timerange
                .time_to_fraction(pts, PLAYHEAD_MIN, PLAYHEAD_MAX)
            {
                self.playhead_pos = pos;
            }
        }
    }

    // ========== 周期刷新 ==========

    /// 每帧调用一次; 需要刷新数据时返回 `UpdateData`
    pub fn tick(&mut self, playing: bool, now: Instant) -> Option<ControlBarEvent> {
        self.tick_at(playing, now, Utc::now())
    }

    pub fn tick_at(
        &mut self,
        playing: bool,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Option<ControlBarEvent> {
        let following_live = self.is_at_live() && playing;

        if following_live && due(&mut self.last_live_refresh, now, LIVE_REFRESH_INTERVAL) {
            self.live_at(wall);
        }
        if due(&mut self.last_data_refresh, now, DATA_REFRESH_INTERVAL) && !following_live {
            self.need_update_data = true;
        }
        self.take_update_request()
    }

    pub fn take_update_request(&mut self) -> Option<ControlBarEvent> {
        if !self.need_update_data {
            return None;
        }
        self.need_update_data = false;
        Some(ControlBarEvent::UpdateData)
    }

    /// 整体替换叠加数据
    pub fn apply_timeline_data(&mut self, data: TimelineData) {
        self.segments = data.segments;
        self.motion_events = data.motion_events;
        self.analytics_events = data.analytics_events;
    }

    // ========== 导出 ==========

    /// NONE → CONFIGURING
    pub fn click_export(&mut self) -> bool {
        if self.export_state != ExportState::None {
            return false;
        }
        let Some(start) = self.playhead_time() else {
            return false;
        };
        self.export_start_time = Some(start);
        self.playhead_pos = (self.playhead_pos + EXPORT_PLAYHEAD_ADVANCE).min(PLAYHEAD_MAX);
        self.export_state = ExportState::Configuring;
        true
    }

    /// CONFIGURING → STARTED, 返回导出请求
    pub fn click_finish_export(&mut self) -> Option<ControlBarEvent> {
        if self.export_state != ExportState::Configuring {
            return None;
        }
        let start = self.export_start_time?;
        let end = self.playhead_time()?;
        self.export_state = ExportState::Started;
        Some(ControlBarEvent::Export {
            start: start.min(end),
            end: start.max(end),
        })
    }

    /// CONFIGURING → NONE
    pub fn cancel_export(&mut self) {
        if self.export_state == ExportState::Configuring {
            self.export_state = ExportState::None;
            self.export_start_time = None;
        }
    }

    /// STARTED → FINISHED_*; 由导出请求完成时调用
    pub fn finish_export(&mut self, success: bool) -> bool {
        if self.export_state != ExportState::Started {
            return false;
        }
        self.export_state = if success {
            ExportState::FinishedSuccess
        } else {
            ExportState::FinishedError
        };
        true
    }

    /// FINISHED_* → NONE, 交给界面处理一次
    pub fn take_export_outcome(&mut self) -> Option<ExportOutcome> {
        let outcome = match self.export_state {
            ExportState::FinishedSuccess => ExportOutcome::Saved,
            ExportState::FinishedError => ExportOutcome::Failed(EXPORT_ERROR_MESSAGE),
            _ => return None,
        };
        self.export_state = ExportState::None;
        self.export_start_time = None;
        Some(outcome)
    }

    fn span(&self) -> Duration {
        Duration::minutes(self.timerange_minutes as i64)
    }
}

fn due(last: &mut Option<Instant>, now: Instant, interval: std::time::Duration) -> bool {
    match last {
        Some(prev) if now.saturating_duration_since(*prev) < interval => false,
        _ => {
            *last = Some(now);
            true
        }
    }
}
