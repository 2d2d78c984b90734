//! 집계 스케줄 표현식.
//!
//! cron 5필드 중 분/시만 해석한다 (`분 시 * * *`). 각 필드는 `*`, 숫자,
//! `*/N` 중 하나이고 나머지 세 필드는 `*`여야 한다.

use chrono::{DateTime, Duration, DurationRound, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// 분/시 필드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Any,
    At(u32),
    Every(u32),
}

impl Field {
    fn parse(raw: &str, max: u32, name: &str) -> Result<Self, CoreError> {
        let invalid = |message: String| CoreError::Validation {
            field: format!("aggregation.schedule.{name}"),
            message,
        };

        if raw == "*" {
            return Ok(Self::Any);
        }
        if let Some(step) = raw.strip_prefix("*/") {
            let step: u32 = step
                .parse()
                .map_err(|_| invalid(format!("잘못된 간격: {raw}")))?;
            if step == 0 || step > max {
                return Err(invalid(format!("간격 범위 초과: {raw}")));
            }
            return Ok(Self::Every(step));
        }

        let value: u32 = raw
            .parse()
            .map_err(|_| invalid(format!("지원하지 않는 값: {raw}")))?;
        if value > max {
            return Err(invalid(format!("범위 초과: {value} > {max}")));
        }
        Ok(Self::At(value))
    }

    fn matches(&self, value: u32) -> bool {
        match self {
            Self::Any => true,
            Self::At(at) => *at == value,
            Self::Every(step) => value % step == 0,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::At(at) => write!(f, "{at}"),
            Self::Every(step) => write!(f, "*/{step}"),
        }
    }
}

/// 분/시 단위 반복 스케줄
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    minute: Field,
    hour: Field,
}

impl Schedule {
    /// 매시 정각
    pub fn hourly() -> Self {
        Self {
            minute: Field::At(0),
            hour: Field::Any,
        }
    }

    /// 해당 시각(분 단위)이 스케줄에 맞는지
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minute.matches(at.minute()) && self.hour.matches(at.hour())
    }

    /// `after` 이후(미포함) 첫 실행 시각
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let base = after
            .duration_trunc(Duration::minutes(1))
            .unwrap_or(after);
        let mut candidate = base + Duration::minutes(1);

        // 하루 안에 반드시 한 번은 맞는다
        for _ in 0..(24 * 60) {
            if self.matches(candidate) {
                return candidate;
            }
            candidate += Duration::minutes(1);
        }
        candidate
    }
}

impl FromStr for Schedule {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(CoreError::Validation {
                field: "aggregation.schedule".to_string(),
                message: format!("5개 필드가 필요함: {s}"),
            });
        }
        if parts[2..].iter().any(|part| *part != "*") {
            return Err(CoreError::Validation {
                field: "aggregation.schedule".to_string(),
                message: format!("일/월/요일 필드는 `*`만 지원: {s}"),
            });
        }

        Ok(Self {
            minute: Field::parse(parts[0], 59, "minute")?,
            hour: Field::parse(parts[1], 23, "hour")?,
        })
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} * * *", self.minute, self.hour)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn default_expression_is_hourly() {
        let schedule: Schedule = "0 * * * *".parse().unwrap();
        assert_eq!(schedule, Schedule::hourly());
        assert_eq!(schedule.to_string(), "0 * * * *");
    }

    #[test]
    fn next_after_rolls_to_next_hour() {
        let schedule = Schedule::hourly();
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(now),
            Utc.with_ymd_and_hms(2026, 5, 1, 11, 0, 0).unwrap()
        );

        let mid = Utc.with_ymd_and_hms(2026, 5, 1, 23, 30, 12).unwrap();
        assert_eq!(
            schedule.next_after(mid),
            Utc.with_ymd_and_hms(2026, 5, 2, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn fixed_hour_and_step() {
        let daily: Schedule = "15 3 * * *".parse().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 4, 0, 0).unwrap();
        assert_eq!(
            daily.next_after(now),
            Utc.with_ymd_and_hms(2026, 5, 2, 3, 15, 0).unwrap()
        );

        let every_ten: Schedule = "*/10 * * * *".parse().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 4, 1, 0).unwrap();
        assert_eq!(
            every_ten.next_after(now),
            Utc.with_ymd_and_hms(2026, 5, 1, 4, 10, 0).unwrap()
        );
    }

    #[test]
    fn rejects_unsupported_expressions() {
        assert!("0 * * * 1".parse::<Schedule>().is_err());
        assert!("61 * * * *".parse::<Schedule>().is_err());
        assert!("0 *".parse::<Schedule>().is_err());
        assert!("*/0 * * * *".parse::<Schedule>().is_err());
    }
}
