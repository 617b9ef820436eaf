/// 时间范围: 播放头归一化位置 ↔ 绝对时间换算
/// Closed time interval with scrub-position conversion.
use crate::validate::ValidationError;
use chrono::{DateTime, Duration, Utc};

/// `start <= end` 在所有公共操作之后成立; 违反该约束的修改会被拒绝
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timerange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Timerange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvertedRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// 零长度范围 `[t, t]`
    pub fn instant(t: DateTime<Utc>) -> Self {
        Self { start: t, end: t }
    }

    /// `[end - span, end]`, 溢出时返回 None
    pub fn ending_at(end: DateTime<Utc>, span: Duration) -> Option<Self> {
        if span < Duration::zero() {
            return None;
        }
        let start = end.checked_sub_signed(span)?;
        Some(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn set_start(&mut self, start: DateTime<Utc>) -> Result<(), ValidationError> {
        self.set(start, self.end)
    }

    pub fn set_end(&mut self, end: DateTime<Utc>) -> Result<(), ValidationError> {
        self.set(self.start, end)
    }

    /// 同时修改两端, 平移时不会经过非法的中间状态
    pub fn set(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), ValidationError> {
        *self = Self::new(start, end)?;
        Ok(())
    }

    pub fn duration_milliseconds(&self) -> i64 {
        (self.end - self.start).num_milliseconds()
    }

    /// 平移整个范围
    pub fn shifted(&self, by: Duration) -> Option<Self> {
        Some(Self {
            start: self.start.checked_add_signed(by)?,
            end: self.end.checked_add_signed(by)?,
        })
    }

    /// `value ∈ [min, max]` 线性映射到 `[start, end]`
    ///
    /// `min >= max` 或 `value` 越界时返回 None。
    pub fn fraction_to_time(&self, min: i32, max: i32, value: i32) -> Option<DateTime<Utc>> {
        if min >= max || value < min || value > max {
            return None;
        }
        let span = (max - min) as i128;
        let offset = self.duration_milliseconds() as i128 * (value - min) as i128;
        let offset_ms = div_round(offset, span);
        self.start
            .checked_add_signed(Duration::milliseconds(offset_ms as i64))
    }

    /// 反向映射, 结果钳制到 `[min, max]`; 零时长范围没有定义, 返回 None
    pub fn time_to_fraction(&self, t: DateTime<Utc>, min: i32, max: i32) -> Option<i32> {
        if min >= max {
            return None;
        }
        let duration = self.duration_milliseconds();
        if duration <= 0 {
            return None;
        }
        let elapsed = (t - self.start).num_milliseconds() as i128;
        let scaled = div_round(elapsed * (max - min) as i128, duration as i128);
        let value = (scaled + min as i128).clamp(min as i128, max as i128);
        Some(value as i32)
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }
}

/// 四舍五入整数除法 (den > 0)
fn div_round(num: i128, den: i128) -> i128 {
    if num >= 0 {
        (num + den / 2) / den
    } else {
        -((-num + den / 2) / den)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_rejects_inverted_range() {
        let mut tr = Timerange::new(t0(), t0() + Duration::minutes(20)).unwrap();
        assert!(tr.set_start(t0() + Duration::minutes(21)).is_err());
        assert!(tr.set_end(t0() - Duration::seconds(1)).is_err());
        // 失败不修改原值
        assert_eq!(tr.start(), t0());
        assert_eq!(tr.duration_milliseconds(), 20 * 60 * 1000);
        assert!(Timerange::new(t0(), t0()).is_ok());
    }

    #[test]
    fn test_fraction_to_time() {
        let tr = Timerange::new(t0(), t0() + Duration::seconds(1000)).unwrap();
        assert_eq!(tr.fraction_to_time(0, 1000, 0), Some(t0()));
        assert_eq!(tr.fraction_to_time(0, 1000, 1000), Some(tr.end()));
        assert_eq!(
            tr.fraction_to_time(0, 1000, 250),
            Some(t0() + Duration::seconds(250))
        );
        // 非零下界按 (value-min)/(max-min) 计算
        assert_eq!(
            tr.fraction_to_time(100, 200, 150),
            Some(t0() + Duration::seconds(500))
        );
        assert_eq!(tr.fraction_to_time(0, 1000, 1001), None);
        assert_eq!(tr.fraction_to_time(10, 10, 10), None);
    }

    #[test]
    fn test_time_to_fraction_clamps() {
        let tr = Timerange::new(t0(), t0() + Duration::minutes(10)).unwrap();
        assert_eq!(tr.time_to_fraction(t0() + Duration::minutes(5), 0, 1000), Some(500));
        assert_eq!(tr.time_to_fraction(t0() - Duration::minutes(5), 0, 1000), Some(0));
        assert_eq!(tr.time_to_fraction(t0() + Duration::hours(1), 0, 1000), Some(1000));

        let empty = Timerange::new(t0(), t0()).unwrap();
        assert_eq!(empty.time_to_fraction(t0(), 0, 1000), None);
    }

    #[test]
    fn test_contains_is_inclusive() {
        let tr = Timerange::new(t0(), t0() + Duration::minutes(1)).unwrap();
        assert!(tr.contains(t0()));
        assert!(tr.contains(tr.end()));
        assert!(!tr.contains(tr.end() + Duration::milliseconds(1)));
    }

    #[test]
    fn test_scrub_round_trip() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let span_ms = rng.gen_range(1_000..86_400_000i64);
            let tr = Timerange::ending_at(t0(), Duration::milliseconds(span_ms)).unwrap();
            let t = tr.start() + Duration::milliseconds(rng.gen_range(0..=span_ms));
            let pos = tr.time_to_fraction(t, 0, 1000).unwrap();
            let back = tr.fraction_to_time(0, 1000, pos).unwrap();
            // 一个播放头刻度对应的时间
            let quantum = span_ms / 1000 + 1;
            assert!((back - t).num_milliseconds().abs() <= quantum);
        }
    }
}
