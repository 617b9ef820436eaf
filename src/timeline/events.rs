//! 时间轴叠加数据: 录像片段、运动事件、分析检测
//!
//! 每次范围查询整体替换, 不做增量合并。

use chrono::{DateTime, Utc};

/// 连续录制的片段
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MotionEvent {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub motion_level: u8,
    pub stddev: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsEvent {
    pub motion_start_time: DateTime<Utc>,
    pub motion_end_time: DateTime<Utc>,
    pub total_detections: u32,
    pub detections: Vec<Detection>,
}

impl Segment {
    /// 片段与 `[start, end]` 是否相交
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start <= end && start <= self.end
    }
}

impl AnalyticsEvent {
    /// 置信度最高的检测
    pub fn best_detection(&self) -> Option<&Detection> {
        self.detections
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }
}

/// 一次刷新取回的全部叠加数据
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimelineData {
    pub segments: Vec<Segment>,
    pub motion_events: Vec<MotionEvent>,
    pub analytics_events: Vec<AnalyticsEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_segment_overlap() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let seg = Segment {
            start: t,
            end: t + Duration::minutes(5),
        };
        assert!(seg.overlaps(t + Duration::minutes(4), t + Duration::minutes(9)));
        assert!(!seg.overlaps(t + Duration::minutes(6), t + Duration::minutes(9)));
    }

    #[test]
    fn test_best_detection() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let ev = AnalyticsEvent {
            motion_start_time: t,
            motion_end_time: t,
            total_detections: 2,
            detections: vec![
                Detection {
                    class_name: "car".into(),
                    confidence: 0.4,
                    timestamp: t,
                },
                Detection {
                    class_name: "person".into(),
                    confidence: 0.9,
                    timestamp: t,
                },
            ],
        };
        assert_eq!(ev.best_detection().map(|d| d.class_name.as_str()), Some("person"));
    }
}
