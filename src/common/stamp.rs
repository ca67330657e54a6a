//! 调用计时用的时间点

use std::ops::Add;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;

/// 同一时刻的墙上时间与单调时钟读数
///
/// 墙上时间写进记录用于展示；所有 `*_in_ms` 耗时只由单调时钟计算，
/// 不受系统时间回拨影响。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    pub wall: DateTime<Utc>,
    pub mono: Instant,
}

impl Stamp {
    pub fn now() -> Self {
        Self {
            wall: Utc::now(),
            mono: Instant::now(),
        }
    }

    /// 距离更早时间点的毫秒数
    pub fn millis_since(&self, earlier: &Stamp) -> i64 {
        let elapsed = self.mono.saturating_duration_since(earlier.mono);
        i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
    }
}

impl Add<Duration> for Stamp {
    type Output = Stamp;

    fn add(self, d: Duration) -> Stamp {
        let wall = TimeDelta::from_std(d)
            .ok()
            .and_then(|delta| self.wall.checked_add_signed(delta))
            .unwrap_or(self.wall);
        Stamp {
            wall,
            mono: self.mono + d,
        }
    }
}
