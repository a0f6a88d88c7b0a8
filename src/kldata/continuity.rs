//! 时间戳连续性检查
//!
//! 只检测不修复：发现的空洞、重复和乱序都以 [`SpacingViolation`] 的形式报告

use crate::klcommon::Candle;

/// 相邻两根K线之间的间距异常
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpacingViolation {
    /// 缺失了 `missing_periods` 根K线，`start_time..=end_time` 为缺失区间
    Gap {
        start_time: i64,
        end_time: i64,
        missing_periods: i64,
    },
    /// 同一时间戳出现多次
    Duplicate { timestamp: i64 },
    /// 时间戳倒退，或者间距不是周期的整数倍
    Misaligned { previous: i64, next: i64 },
}

impl SpacingViolation {
    pub fn describe(&self) -> String {
        match self {
            SpacingViolation::Gap {
                start_time,
                end_time,
                missing_periods,
            } => format!("空洞 {} ~ {}，缺失 {} 根", start_time, end_time, missing_periods),
            SpacingViolation::Duplicate { timestamp } => format!("重复时间戳 {}", timestamp),
            SpacingViolation::Misaligned { previous, next } => {
                format!("间距异常 {} -> {}", previous, next)
            }
        }
    }
}

/// 在时间戳序列中查找间距异常
pub fn find_gaps(timestamps: &[i64], interval_ms: i64) -> Vec<SpacingViolation> {
    let mut violations = Vec::new();

    if interval_ms <= 0 {
        return violations;
    }

    for pair in timestamps.windows(2) {
        let (current_time, next_time) = (pair[0], pair[1]);
        let delta = next_time - current_time;

        if delta == interval_ms {
            continue;
        }

        if delta == 0 {
            violations.push(SpacingViolation::Duplicate {
                timestamp: current_time,
            });
        } else if delta > 0 && delta % interval_ms == 0 {
            violations.push(SpacingViolation::Gap {
                start_time: current_time + interval_ms,
                end_time: next_time - interval_ms,
                missing_periods: delta / interval_ms - 1,
            });
        } else {
            violations.push(SpacingViolation::Misaligned {
                previous: current_time,
                next: next_time,
            });
        }
    }

    violations
}

/// 对K线序列做连续性检查
pub fn check_candles(candles: &[Candle], interval_ms: i64) -> Vec<SpacingViolation> {
    let timestamps: Vec<i64> = candles.iter().map(|c| c.timestamp).collect();
    find_gaps(&timestamps, interval_ms)
}
