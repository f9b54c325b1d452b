//! 🗺️ Prefix optimizer: turn "everything under this prefix" into "only the days, hours
//! and 5-minute slots the time window touches".
//!
//! 🧠 Knowledge graph:
//! - ALB keys look like
//!   `{A}2022/09/27{B}_20220927T1235Z_...`. `A` is everything before the date directory
//!   and `B` runs from the date directory to the timestamp. One sample key per input
//!   prefix is enough to learn `A` and `B`.
//! - CF keys look like `{dist}2022-09-27-12.xxxx.gz`. `{dist}` runs up to and including
//!   the distribution id and its dot.
//! - The cursor walks from `since` to `until` (inclusive) and always takes the coarsest
//!   step that does not run past `until`: a whole day from midnight, a whole hour from
//!   the top of the hour, otherwise a single slot. Each slot in the window ends up under
//!   exactly one generated prefix.
//! - An empty result means "no narrowing possible"; callers then keep their prefixes.
//!
//! ⚠️ The sample lookup is a single `ListObjectsV2` with `MaxKeys=1` per prefix. An empty
//! prefix cannot teach us the naming scheme, so it is an error, not a shrug. 🦆

use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use tracing::debug;

use crate::backends::ObjectStore;
use crate::common::S3Path;
use crate::error::S3sError;
use crate::keys::first_object;
use crate::query::FormatType;
use crate::time_window::{TimeWindow, log_bucket, round_down_time, round_up_time};

static ALB_KEY_LAYOUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*)\d{4}/\d{2}/\d{2}(.*)_\d{8}T\d{4}Z_").expect("ALB key layout pattern is a valid regex")
});

static CF_KEY_LAYOUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*)\d{4}-\d{2}-\d{2}-\d{2}\.").expect("CF key layout pattern is a valid regex")
});

/// 📐 How far one generated prefix reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Day,
    Hour,
    Slot,
}

impl Step {
    fn span(self) -> TimeDelta {
        match self {
            Step::Day => TimeDelta::days(1),
            Step::Hour => TimeDelta::hours(1),
            Step::Slot => log_bucket(),
        }
    }

    /// The coarsest step that starts on its own boundary and still fits before `until`.
    fn pick(cursor: DateTime<Utc>, until: DateTime<Utc>, finest: Step) -> Step {
        let remaining = until - cursor;
        let aligned = |step: Step| round_down_time(cursor, step.span()) == cursor;
        if remaining >= Step::Day.span() && aligned(Step::Day) {
            Step::Day
        } else if finest == Step::Hour || (remaining >= Step::Hour.span() && aligned(Step::Hour)) {
            Step::Hour
        } else {
            Step::Slot
        }
    }
}

fn no_match(path: &S3Path, reason: impl Into<String>) -> S3sError {
    S3sError::NoMatchingObject {
        bucket: path.bucket.clone(),
        prefix: path.prefix.clone(),
        reason: reason.into(),
    }
}

/// 🔀 ALB prefixes for `window`, learned from `sample_key` under `path`.
///
/// Both bounds are required. A one-sided window returns no prefixes, which leaves the
/// per-key filter to do the work.
pub fn alb_prefixes(path: &S3Path, sample_key: &str, window: &TimeWindow) -> Result<Vec<S3Path>, S3sError> {
    let (Some(since), Some(until)) = (window.since, window.until) else {
        return Ok(Vec::new());
    };
    let captures = ALB_KEY_LAYOUT
        .captures(sample_key)
        .ok_or_else(|| no_match(path, format!("'{sample_key}' does not look like an ALB log key")))?;
    let (head, tail) = (&captures[1], &captures[2]);

    let mut cursor = round_down_time(since, log_bucket());
    let until = round_up_time(until, log_bucket());

    let mut prefixes = Vec::new();
    while cursor <= until {
        let step = Step::pick(cursor, until, Step::Slot);
        let stamp = match step {
            Step::Day => cursor.format("%Y%m%d"),
            Step::Hour => cursor.format("%Y%m%dT%H"),
            Step::Slot => cursor.format("%Y%m%dT%H%MZ"),
        };
        prefixes.push(S3Path::new(
            &path.bucket,
            format!("{head}{}{tail}_{stamp}", cursor.format("%Y/%m/%d")),
        ));
        cursor += step.span();
    }
    Ok(prefixes)
}

/// 🔀 CF prefixes for `window`, learned from `sample_key` under `path`.
///
/// `until_default` stands in for a missing `until` (dry runs pass "now"). Without a
/// `since`, or without any `until`, nothing is generated.
pub fn cf_prefixes(
    path: &S3Path,
    sample_key: &str,
    window: &TimeWindow,
    until_default: Option<DateTime<Utc>>,
) -> Result<Vec<S3Path>, S3sError> {
    let (Some(since), Some(until)) = (window.since, window.until.or(until_default)) else {
        return Ok(Vec::new());
    };
    let captures = CF_KEY_LAYOUT
        .captures(sample_key)
        .ok_or_else(|| no_match(path, format!("'{sample_key}' does not look like a CloudFront log key")))?;
    let distribution = &captures[1];

    let mut cursor = round_down_time(since, Step::Hour.span());
    let mut prefixes = Vec::new();
    while cursor <= until {
        let step = Step::pick(cursor, until, Step::Hour);
        let stamp = match step {
            Step::Day => cursor.format("%Y-%m-%d"),
            Step::Hour | Step::Slot => cursor.format("%Y-%m-%d-%H."),
        };
        prefixes.push(S3Path::new(&path.bucket, format!("{distribution}{stamp}")));
        cursor += step.span();
    }
    Ok(prefixes)
}

/// 🧮 Whether [`optimize`] could generate anything at all for these inputs.
fn can_narrow(format_type: FormatType, window: &TimeWindow, until_default: Option<DateTime<Utc>>) -> bool {
    match format_type {
        FormatType::AlbLogs => window.since.is_some() && window.until.is_some(),
        FormatType::CfLogs => window.since.is_some() && window.until.or(until_default).is_some(),
        FormatType::Json | FormatType::Csv => false,
    }
}

/// 🚀 Replaces `paths` with time-narrowed prefixes for ALB and CF logs.
///
/// Returns an empty list when no narrowing applies. Looks at one sample key per path.
pub async fn optimize<S: ObjectStore + ?Sized>(
    store: &S,
    paths: &[S3Path],
    format_type: FormatType,
    window: &TimeWindow,
    until_default: Option<DateTime<Utc>>,
) -> Result<Vec<S3Path>> {
    if window.is_zero_range() || !can_narrow(format_type, window, until_default) {
        return Ok(Vec::new());
    }

    let mut narrowed = Vec::new();
    for path in paths {
        let sample = first_object(store, &path.bucket, &path.prefix)
            .await?
            .ok_or_else(|| no_match(path, "no objects under this prefix"))?;
        debug!("🔬 sample key for {path}: {}", sample.key);

        let prefixes = match format_type {
            FormatType::AlbLogs => alb_prefixes(path, &sample.key, window),
            FormatType::CfLogs => cf_prefixes(path, &sample.key, window, until_default),
            FormatType::Json | FormatType::Csv => Ok(Vec::new()),
        }
        .with_context(|| format!("💀 could not narrow {path} by time"))?;
        debug!("🗺️ {path} narrowed to {} prefixes", prefixes.len());
        narrowed.extend(prefixes);
    }
    Ok(narrowed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::in_mem::InMemoryStore;
    use crate::error::find_s3s_error;
    use chrono::TimeZone;

    const ALB_SAMPLE: &str = "alb-logs/AWSLogs/acct/elasticloadbalancing/region/2022/09/27/acct_elasticloadbalancing_region_app.lb-id_20220927T0000Z_192.168.1.1_123abc.log.gz";
    const ALB_HEAD: &str = "alb-logs/AWSLogs/acct/elasticloadbalancing/region/";
    const ALB_TAIL: &str = "/acct_elasticloadbalancing_region_app.lb-id";
    const CF_SAMPLE: &str = "cf-logs/E2ABCDEF.2022-09-27-00.a1b2c3d4.gz";

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0)
            .single()
            .expect("💀 test timestamp should exist on the calendar")
    }

    fn prefixes_of(paths: &[S3Path]) -> Vec<&str> {
        paths.iter().map(|p| p.prefix.as_str()).collect()
    }

    fn alb_key_for(t: DateTime<Utc>) -> String {
        format!(
            "{ALB_HEAD}{}{ALB_TAIL}_{}_192.168.1.1_123abc.log.gz",
            t.format("%Y/%m/%d"),
            t.format("%Y%m%dT%H%MZ")
        )
    }

    #[test]
    fn the_one_where_a_short_alb_window_goes_slot_by_slot() -> Result<()> {
        let the_path = S3Path::new("bucket", "alb-logs/");
        let the_window = TimeWindow::new(Some(at(2022, 9, 27, 12, 1)), Some(at(2022, 9, 27, 12, 14)));

        let the_prefixes = alb_prefixes(&the_path, ALB_SAMPLE, &the_window)?;
        let the_expected: Vec<String> = ["1200Z", "1205Z", "1210Z", "1215Z"]
            .iter()
            .map(|hm| format!("{ALB_HEAD}2022/09/27{ALB_TAIL}_20220927T{hm}"))
            .collect();
        assert_eq!(prefixes_of(&the_prefixes), the_expected);
        assert!(the_prefixes.iter().all(|p| p.bucket == "bucket"));
        Ok(())
    }

    #[test]
    fn the_one_where_a_long_alb_window_takes_days_and_hours() -> Result<()> {
        let the_path = S3Path::new("bucket", "alb-logs/");
        let the_window = TimeWindow::new(Some(at(2022, 9, 26, 23, 0)), Some(at(2022, 9, 28, 1, 0)));

        let the_prefixes = alb_prefixes(&the_path, ALB_SAMPLE, &the_window)?;
        assert_eq!(
            prefixes_of(&the_prefixes),
            [
                format!("{ALB_HEAD}2022/09/26{ALB_TAIL}_20220926T23"),
                format!("{ALB_HEAD}2022/09/27{ALB_TAIL}_20220927"),
                format!("{ALB_HEAD}2022/09/28{ALB_TAIL}_20220928T00"),
                format!("{ALB_HEAD}2022/09/28{ALB_TAIL}_20220928T0100Z"),
            ]
        );
        Ok(())
    }

    #[test]
    fn the_one_where_every_alb_slot_is_covered_exactly_once() -> Result<()> {
        let the_path = S3Path::new("bucket", "alb-logs/");
        for (since, until) in [
            (at(2022, 9, 26, 22, 37), at(2022, 9, 29, 3, 12)),
            (at(2022, 9, 27, 0, 0), at(2022, 9, 28, 0, 0)),
            (at(2022, 9, 27, 10, 55), at(2022, 9, 27, 12, 5)),
            (at(2022, 9, 27, 10, 0), at(2022, 9, 27, 10, 0)),
        ] {
            let the_window = TimeWindow::new(Some(since), Some(until));
            let the_prefixes = alb_prefixes(&the_path, ALB_SAMPLE, &the_window)?;
            let the_rounded = the_window.rounded_to(log_bucket());
            let (first, last) = (
                the_rounded.since.expect("💀 rounded since"),
                the_rounded.until.expect("💀 rounded until"),
            );

            let covering = |t: DateTime<Utc>| {
                let key = alb_key_for(t);
                the_prefixes.iter().filter(|p| key.starts_with(&p.prefix)).count()
            };
            let mut the_slot = first;
            while the_slot <= last {
                assert_eq!(covering(the_slot), 1, "slot {the_slot} in {since}..{until}");
                the_slot += log_bucket();
            }
            assert_eq!(covering(first - log_bucket()), 0, "slot before {since}");
            assert_eq!(covering(last + log_bucket()), 0, "slot after {until}");
        }
        Ok(())
    }

    #[test]
    fn the_one_where_a_one_sided_alb_window_narrows_nothing() -> Result<()> {
        let the_path = S3Path::new("bucket", "alb-logs/");
        let the_window = TimeWindow::new(Some(at(2022, 9, 27, 0, 0)), None);
        assert!(alb_prefixes(&the_path, ALB_SAMPLE, &the_window)?.is_empty());
        Ok(())
    }

    #[test]
    fn the_one_where_a_stranger_key_is_not_an_alb_log() {
        let the_path = S3Path::new("bucket", "alb-logs/");
        let the_window = TimeWindow::new(Some(at(2022, 9, 27, 0, 0)), Some(at(2022, 9, 27, 1, 0)));
        let err = alb_prefixes(&the_path, "alb-logs/readme.txt", &the_window)
            .expect_err("💀 a random key should not match the ALB layout");
        assert!(matches!(err, S3sError::NoMatchingObject { .. }));
    }

    #[test]
    fn the_one_where_cf_walks_hours_then_days() -> Result<()> {
        let the_path = S3Path::new("bucket", "cf-logs/");
        let the_window = TimeWindow::new(Some(at(2022, 9, 26, 22, 30)), Some(at(2022, 9, 28, 1, 0)));

        let the_prefixes = cf_prefixes(&the_path, CF_SAMPLE, &the_window, None)?;
        assert_eq!(
            prefixes_of(&the_prefixes),
            [
                "cf-logs/E2ABCDEF.2022-09-26-22.",
                "cf-logs/E2ABCDEF.2022-09-26-23.",
                "cf-logs/E2ABCDEF.2022-09-27",
                "cf-logs/E2ABCDEF.2022-09-28-00.",
                "cf-logs/E2ABCDEF.2022-09-28-01.",
            ]
        );
        Ok(())
    }

    #[test]
    fn the_one_where_cf_borrows_until_only_when_offered() -> Result<()> {
        let the_path = S3Path::new("bucket", "cf-logs/");
        let the_window = TimeWindow::new(Some(at(2022, 9, 27, 10, 0)), None);

        assert!(cf_prefixes(&the_path, CF_SAMPLE, &the_window, None)?.is_empty());
        let the_prefixes = cf_prefixes(&the_path, CF_SAMPLE, &the_window, Some(at(2022, 9, 27, 11, 30)))?;
        assert_eq!(
            prefixes_of(&the_prefixes),
            ["cf-logs/E2ABCDEF.2022-09-27-10.", "cf-logs/E2ABCDEF.2022-09-27-11."]
        );

        let the_window = TimeWindow::new(None, Some(at(2022, 9, 27, 10, 0)));
        assert!(cf_prefixes(&the_path, CF_SAMPLE, &the_window, Some(at(2022, 9, 28, 0, 0)))?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_optimize_samples_each_prefix() -> Result<()> {
        let the_store = InMemoryStore::new();
        the_store.put_object("bucket", ALB_SAMPLE, 10);
        let the_paths = [S3Path::new("bucket", "alb-logs/")];
        let the_window = TimeWindow::new(Some(at(2022, 9, 27, 12, 0)), Some(at(2022, 9, 27, 12, 5)));

        let the_narrowed = optimize(&the_store, &the_paths, FormatType::AlbLogs, &the_window, None).await?;
        assert_eq!(the_narrowed.len(), 2);
        assert_eq!(the_store.list_calls(), 1);

        let the_untouched = optimize(&the_store, &the_paths, FormatType::Json, &the_window, None).await?;
        assert!(the_untouched.is_empty());
        let the_untouched =
            optimize(&the_store, &the_paths, FormatType::AlbLogs, &TimeWindow::unbounded(), None).await?;
        assert!(the_untouched.is_empty());
        assert_eq!(the_store.list_calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_empty_prefix_cannot_teach_us_anything() {
        let the_store = InMemoryStore::new();
        the_store.create_bucket("bucket");
        let the_window = TimeWindow::new(Some(at(2022, 9, 27, 12, 0)), Some(at(2022, 9, 27, 13, 0)));

        let err = optimize(
            &the_store,
            &[S3Path::new("bucket", "cf-logs/")],
            FormatType::CfLogs,
            &the_window,
            None,
        )
        .await
        .expect_err("💀 an empty prefix has no sample key");
        assert!(matches!(find_s3s_error(&err), Some(S3sError::NoMatchingObject { .. })));
    }
}
