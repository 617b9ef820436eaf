//! 输入校验 - 尺寸、缓冲区、时间范围
//! Validation of frame geometry, buffer sizes and timeline inputs.
//!
//! 所有检查在使用前执行, 失败时记录日志并放弃操作, 不修改任何状态。

use crate::timeline::{PLAYHEAD_MAX, PLAYHEAD_MIN};
use chrono::{DateTime, Utc};
use thiserror::Error;

// ========== 公共常量 ==========
pub const MAX_FRAME_DIMENSION: u16 = 4096;
pub const MIN_ASPECT_RATIO: f64 = 0.1;
pub const MAX_ASPECT_RATIO: f64 = 10.0;
/// 缓冲区允许的额外填充 (10%)
pub const BUFFER_SLACK: f64 = 1.1;
pub const MIN_TIMERANGE_MINUTES: u32 = 1;
pub const MAX_TIMERANGE_MINUTES: u32 = 1440;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u16, height: u16 },
    #[error("buffer size {actual} does not match {width}x{height}x{channels}")]
    InvalidBufferSize {
        actual: usize,
        width: u16,
        height: u16,
        channels: usize,
    },
    #[error("non-positive duration between {start} and {end}")]
    InvalidDuration {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("timerange minutes {0} outside {MIN_TIMERANGE_MINUTES}..={MAX_TIMERANGE_MINUTES}")]
    InvalidTimerangeMinutes(i64),
    #[error("playhead position {0} outside {PLAYHEAD_MIN}..={PLAYHEAD_MAX}")]
    InvalidPlayhead(i32),
    #[error("range start {start} is after end {end}")]
    InvertedRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("empty stream name")]
    EmptyName,
}

/// 帧尺寸: 非零, 不超过4096, 宽高比在 0.1 ~ 10 之间
pub fn frame_dimensions(width: u16, height: u16) -> Result<(), ValidationError> {
    let invalid = ValidationError::InvalidDimensions { width, height };
    if width == 0 || height == 0 {
        return Err(invalid);
    }
    if width > MAX_FRAME_DIMENSION || height > MAX_FRAME_DIMENSION {
        return Err(invalid);
    }
    let aspect = width as f64 / height as f64;
    if !(MIN_ASPECT_RATIO..=MAX_ASPECT_RATIO).contains(&aspect) {
        return Err(invalid);
    }
    Ok(())
}

/// 缓冲区大小: 至少 w*h*channels, 最多多出10%的行对齐填充
pub fn buffer_size(
    actual: usize,
    width: u16,
    height: u16,
    channels: usize,
) -> Result<(), ValidationError> {
    let expected = width as usize * height as usize * channels;
    let ceiling = (expected as f64 * BUFFER_SLACK) as usize;
    if expected == 0 || actual < expected || actual > ceiling {
        return Err(ValidationError::InvalidBufferSize {
            actual,
            width,
            height,
            channels,
        });
    }
    Ok(())
}

pub fn timerange_minutes(minutes: i64) -> Result<u32, ValidationError> {
    if minutes < MIN_TIMERANGE_MINUTES as i64 || minutes > MAX_TIMERANGE_MINUTES as i64 {
        return Err(ValidationError::InvalidTimerangeMinutes(minutes));
    }
    Ok(minutes as u32)
}

pub fn playhead_position(pos: i32) -> Result<i32, ValidationError> {
    if !(PLAYHEAD_MIN..=PLAYHEAD_MAX).contains(&pos) {
        return Err(ValidationError::InvalidPlayhead(pos));
    }
    Ok(pos)
}

/// 正时长(毫秒); start >= end 时返回错误而不是零或负数
pub fn positive_duration_ms(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<i64, ValidationError> {
    let ms = (end - start).num_milliseconds();
    if ms <= 0 {
        return Err(ValidationError::InvalidDuration { start, end });
    }
    Ok(ms)
}
