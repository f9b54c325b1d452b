//! ⏰ Time heuristics: rounding, containment, and reading timestamps out of key names.
//!
//! 🧠 Knowledge graph:
//! - ALB writes one object per load balancer node every 5 minutes, and stamps the
//!   *end* of the interval into the key: `..._20220927T1235Z_...`.
//! - So every comparison against an ALB key happens on 5-minute boundaries:
//!   `since` rounds down, `until` rounds up, then plain containment.
//! - CF keys carry `YYYY-MM-DD-HH.` and are only ever used by the prefix optimizer.
//! - Pure functions, no I/O. The easiest module in the crate to trust. 🦆

use std::sync::LazyLock;

use chrono::{DateTime, DurationRound, NaiveDateTime, TimeDelta, Utc};
use regex::Regex;

use crate::error::S3sError;

/// 📏 The ALB delivery interval. Everything ALB-shaped snaps to this grid.
pub const LOG_BUCKET_MINUTES: i64 = 5;

/// 📏 [`LOG_BUCKET_MINUTES`] as a `TimeDelta`.
pub fn log_bucket() -> TimeDelta {
    TimeDelta::minutes(LOG_BUCKET_MINUTES)
}

static ALB_KEY_STAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"_(\d{8}T\d{4})Z_").expect("ALB key stamp pattern is a valid regex")
});

/// 🪟 A possibly one-sided, possibly absent time range.
///
/// Both bounds absent is the "zero range": no restriction at all, which is not the
/// same thing as a window that starts at the epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn new(since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        Self { since, until }
    }

    /// 🌌 No restriction whatsoever.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// ✅ True iff neither bound is set.
    pub fn is_zero_range(&self) -> bool {
        is_time_zero_range(self.since, self.until)
    }

    /// 🔲 Widens the window outward onto the `step` grid: since rounds down, until rounds up.
    pub fn rounded_to(&self, step: TimeDelta) -> Self {
        Self {
            since: self.since.map(|since| round_down_time(since, step)),
            until: self.until.map(|until| round_up_time(until, step)),
        }
    }

    /// 🎯 Plain inclusive containment. Absent bounds are vacuously satisfied.
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        is_time_within(t, self.since, self.until)
    }
}

/// ⬇️ Truncates `t` to a multiple of `step` (counted from the unix epoch).
///
/// A non-positive `step` or a timestamp chrono cannot represent in nanoseconds
/// leaves `t` untouched.
pub fn round_down_time(t: DateTime<Utc>, step: TimeDelta) -> DateTime<Utc> {
    t.duration_trunc(step).unwrap_or(t)
}

/// ⬆️ Smallest multiple of `step` that is `>= t`.
pub fn round_up_time(t: DateTime<Utc>, step: TimeDelta) -> DateTime<Utc> {
    let truncated = round_down_time(t, step);
    if truncated < t { truncated + step } else { t }
}

/// 🕳️ Both bounds absent.
pub fn is_time_zero_range(since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> bool {
    since.is_none() && until.is_none()
}

/// 🎯 `since <= t <= until`, skipping whichever bound is absent.
pub fn is_time_within(
    t: DateTime<Utc>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
) -> bool {
    since.is_none_or(|since| since <= t) && until.is_none_or(|until| t <= until)
}

/// 🗝️ Pulls the `_YYYYMMDDTHHMMZ_` stamp out of an ALB key as a UTC timestamp.
pub fn alb_key_end_time(key: &str) -> Result<DateTime<Utc>, S3sError> {
    let malformed = |reason: String| S3sError::MalformedKey {
        key: key.to_string(),
        reason,
    };

    let stamp = ALB_KEY_STAMP
        .captures(key)
        .and_then(|captures| captures.get(1))
        .ok_or_else(|| malformed("no _YYYYMMDDTHHMMZ_ timestamp segment".to_string()))?;

    NaiveDateTime::parse_from_str(stamp.as_str(), "%Y%m%dT%H%M")
        .map(|naive| naive.and_utc())
        .map_err(|e| malformed(format!("time parse failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const ALB_KEY: &str = "alb-logs/AWSLogs/aws-account-id/elasticloadbalancing/region/2022/09/27/aws-account-id_elasticloadbalancing_region_app.load-balancer-id_20220927T0000Z_192.168.1.1_123abc.log.gz";

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0)
            .single()
            .expect("💀 test timestamp should exist on the calendar")
    }

    #[test]
    fn the_one_where_round_up_snaps_to_the_next_five_minutes() {
        let cases = [
            (at(2022, 9, 28, 12, 34), at(2022, 9, 28, 12, 35)),
            (at(2022, 9, 28, 12, 35), at(2022, 9, 28, 12, 35)),
            (at(2022, 9, 28, 12, 36), at(2022, 9, 28, 12, 40)),
            (at(2022, 9, 28, 12, 39), at(2022, 9, 28, 12, 40)),
            (at(2022, 9, 28, 12, 40), at(2022, 9, 28, 12, 40)),
            (at(2022, 9, 28, 12, 41), at(2022, 9, 28, 12, 45)),
        ];
        for (input, want) in cases {
            assert_eq!(round_up_time(input, log_bucket()), want, "input {input}");
        }
    }

    #[test]
    fn the_one_where_round_down_snaps_to_the_previous_five_minutes() {
        let cases = [
            (at(2022, 9, 28, 12, 34), at(2022, 9, 28, 12, 30)),
            (at(2022, 9, 28, 12, 35), at(2022, 9, 28, 12, 35)),
            (at(2022, 9, 28, 12, 36), at(2022, 9, 28, 12, 35)),
            (at(2022, 9, 28, 12, 39), at(2022, 9, 28, 12, 35)),
            (at(2022, 9, 28, 12, 40), at(2022, 9, 28, 12, 40)),
            (at(2022, 9, 28, 12, 41), at(2022, 9, 28, 12, 40)),
        ];
        for (input, want) in cases {
            assert_eq!(round_down_time(input, log_bucket()), want, "input {input}");
        }
    }

    #[test]
    fn the_one_where_rounding_is_monotonic_and_idempotent() {
        let start = at(2022, 9, 28, 0, 0) + TimeDelta::seconds(7);
        for step in 0..(24 * 60) {
            let t = start + TimeDelta::minutes(step) + TimeDelta::seconds(step % 60);
            let up = round_up_time(t, log_bucket());
            let down = round_down_time(t, log_bucket());
            assert!(up >= t, "round up went backwards for {t}");
            assert!(down <= t, "round down went forwards for {t}");
            assert_eq!(round_up_time(up, log_bucket()), up);
            assert_eq!(round_down_time(down, log_bucket()), down);
        }
    }

    #[test]
    fn the_one_where_only_two_absent_bounds_make_a_zero_range() {
        let since = Some(at(2022, 9, 26, 0, 0));
        let until = Some(at(2022, 9, 28, 0, 0));
        assert!(!is_time_zero_range(since, until));
        assert!(!is_time_zero_range(None, until));
        assert!(!is_time_zero_range(since, None));
        assert!(is_time_zero_range(None, None));
        assert!(TimeWindow::unbounded().is_zero_range());
    }

    #[test]
    fn the_one_where_containment_is_inclusive_and_one_sided_bounds_are_vacuous() {
        let base = at(2022, 9, 26, 12, 34);
        let hour = TimeDelta::hours(1);
        let minute = TimeDelta::minutes(1);

        assert!(is_time_within(base, Some(base - hour), Some(base + hour)));
        assert!(is_time_within(base, Some(base - hour), Some(base)));
        assert!(is_time_within(base, Some(base), Some(base)));
        assert!(!is_time_within(base, Some(base + hour), Some(base + hour * 2)));
        assert!(!is_time_within(base, Some(base + minute), Some(base + minute * 2)));
        assert!(is_time_within(base, Some(base - minute * 4), None));
        assert!(!is_time_within(base, Some(base + minute), None));
        assert!(is_time_within(base, None, Some(base + minute)));
        assert!(!is_time_within(base, None, Some(base - minute * 5)));
        assert!(is_time_within(base, None, None));
    }

    #[test]
    fn the_one_where_the_rounded_window_forgives_a_few_minutes_either_side() {
        let base = at(2022, 9, 26, 12, 34);
        let window = TimeWindow::new(Some(base + TimeDelta::minutes(1)), None);
        assert!(!window.contains(base));
        // 12:35 rounds down to 12:35, 12:34 still misses
        assert!(!window.rounded_to(log_bucket()).contains(base));

        let window = TimeWindow::new(None, Some(base - TimeDelta::minutes(2)));
        // 12:32 rounds up to 12:35 and now covers 12:34
        assert!(window.rounded_to(log_bucket()).contains(base));
    }

    #[test]
    fn the_one_where_an_alb_key_gives_up_its_timestamp() {
        let key = ALB_KEY.replace("20220927T0000Z", "20220927T1234Z");
        assert_eq!(
            alb_key_end_time(&key).expect("💀 well-formed ALB key should parse"),
            at(2022, 9, 27, 12, 34)
        );
    }

    #[test]
    fn the_one_where_dotted_timestamps_are_rejected_as_malformed() {
        let key = ALB_KEY.replace("20220927T0000Z", "2022.09.27T00.00Z");
        let err = alb_key_end_time(&key).expect_err("💀 dotted stamp should not parse");
        assert!(matches!(err, S3sError::MalformedKey { .. }));
    }

    #[test]
    fn the_one_where_a_calendar_impossible_stamp_is_also_malformed() {
        let key = ALB_KEY.replace("20220927T0000Z", "20221345T9999Z");
        assert!(matches!(
            alb_key_end_time(&key),
            Err(S3sError::MalformedKey { .. })
        ));
    }

    #[test]
    fn the_one_where_alb_key_containment_matches_the_log_conventions() {
        let stamp = alb_key_end_time(ALB_KEY).expect("💀 fixture key should parse");
        let check = |since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>| {
            TimeWindow::new(since, until)
                .rounded_to(log_bucket())
                .contains(stamp)
        };

        assert!(check(Some(at(2022, 9, 26, 0, 0)), Some(at(2022, 9, 28, 0, 0))));
        assert!(check(Some(at(2022, 9, 27, 0, 0)), Some(at(2022, 9, 28, 0, 0))));
        assert!(!check(Some(at(2022, 9, 28, 0, 0)), Some(at(2022, 9, 29, 0, 0))));
        assert!(!check(Some(at(2022, 9, 28, 0, 0)), None));
        assert!(check(Some(at(2022, 9, 26, 0, 0)), None));
        assert!(!check(None, Some(at(2022, 9, 26, 0, 0))));
        assert!(check(None, Some(at(2022, 9, 29, 0, 0))));
    }
}
