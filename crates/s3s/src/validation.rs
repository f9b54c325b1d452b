//! ✅ Input validation, done once at the boundary before anything touches the network.
//!
//! 🧠 Knowledge graph:
//! - Paths: at least one, every one `s3://bucket[/prefix]`.
//! - Time options only make sense for ALB and CF logs, and for those at least one of
//!   `duration`, `since`, `until` is required.
//! - How the options turn into a [`TimeWindow`]:
//!   - duration alone: `[now - d, now]`
//!   - duration + since: `[since, since + d]`
//!   - duration + until: `[until - d, until]`
//!   - since and/or until alone: as given (one-sided windows are fine)
//! - A CF dry run needs an `until`: a CF key carries no end, so an open window would be
//!   estimated all the way up to "now".
//!
//! Every failure here is an [`S3sError::Validation`]. 🦆

use chrono::{DateTime, TimeDelta, Utc};

use crate::common::S3Path;
use crate::error::S3sError;
use crate::query::FormatType;
use crate::time_window::TimeWindow;

/// ⏰ The raw time flags, before they become a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeOptions {
    pub duration: Option<TimeDelta>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl TimeOptions {
    /// A zero duration counts as "not given".
    fn duration(&self) -> Option<TimeDelta> {
        self.duration.filter(|d| !d.is_zero())
    }

    fn is_empty(&self) -> bool {
        self.duration().is_none() && self.since.is_none() && self.until.is_none()
    }
}

/// 🗺️ Parses every path, refusing an empty list.
pub fn validate_paths<S: AsRef<str>>(raw: &[S]) -> Result<Vec<S3Path>, S3sError> {
    if raw.is_empty() {
        return Err(S3sError::validation("at least one s3://bucket/prefix path is required"));
    }
    raw.iter().map(|path| S3Path::parse(path.as_ref())).collect()
}

/// 🕰️ Checks the time flags against each other and against `now`.
pub fn check_time(format_type: FormatType, options: &TimeOptions, now: DateTime<Utc>) -> Result<(), S3sError> {
    if !format_type.is_log_format() {
        if options.is_empty() {
            return Ok(());
        }
        return Err(S3sError::validation(
            "--duration, --since and --until only apply to ALB and CloudFront logs",
        ));
    }

    if options.duration.is_some_and(|d| d < TimeDelta::zero()) {
        return Err(S3sError::validation("duration must not be negative"));
    }
    if options.is_empty() {
        return Err(S3sError::validation(
            "log queries need a time range: give --duration, --since or --until",
        ));
    }
    if options.since.is_some_and(|since| since > now) {
        return Err(S3sError::validation("--since is in the future"));
    }
    if let (Some(duration), Some(until)) = (options.duration(), options.until) {
        if until - duration > now {
            return Err(S3sError::validation("--until minus --duration is in the future"));
        }
    }
    if let (Some(since), Some(until)) = (options.since, options.until) {
        if options.duration().is_some() {
            return Err(S3sError::validation(
                "--duration cannot be combined with both --since and --until",
            ));
        }
        if since > until {
            return Err(S3sError::validation("--since is after --until"));
        }
    }
    Ok(())
}

/// 🪟 Validates the time flags and turns them into a window.
///
/// Non-log formats always get [`TimeWindow::unbounded`].
pub fn resolve_window(
    format_type: FormatType,
    options: &TimeOptions,
    now: DateTime<Utc>,
) -> Result<TimeWindow, S3sError> {
    check_time(format_type, options, now)?;
    if !format_type.is_log_format() {
        return Ok(TimeWindow::unbounded());
    }
    let window = match (options.duration(), options.since, options.until) {
        (Some(d), None, None) => TimeWindow::new(Some(now - d), Some(now)),
        (Some(d), Some(since), None) => TimeWindow::new(Some(since), Some(since + d)),
        (Some(d), None, Some(until)) => TimeWindow::new(Some(until - d), Some(until)),
        (_, since, until) => TimeWindow::new(since, until),
    };
    Ok(window)
}

/// 🧾 Rules that only apply to dry runs.
pub fn check_dry_run(format_type: FormatType, window: &TimeWindow) -> Result<(), S3sError> {
    if format_type == FormatType::CfLogs && window.since.is_some() && window.until.is_none() {
        return Err(S3sError::validation(
            "a CloudFront dry run with --since needs --until too, otherwise it would scan an unbounded range",
        ));
    }
    Ok(())
}
