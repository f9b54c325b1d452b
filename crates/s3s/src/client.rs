//! 🚪 The front door of the library: one [`Client`] per process, many runs.
//!
//! A run goes: prefixes → time-narrowed prefixes (ALB/CF only) → enumeration →
//! queries or a dry-run tally. The [`Supervisor`] does the concurrent part, this module
//! decides what it gets fed.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::app_config::{AppConfig, RuntimeConfig};
use crate::backends::{AwsStore, SinkBackend, StoreBackend};
use crate::common::S3Path;
use crate::estimator::DryRunSummary;
use crate::error::S3sError;
use crate::keys::{self, KeyFilter};
use crate::prefix_optimizer::optimize;
use crate::query::QuerySpec;
use crate::supervisors::Supervisor;
use crate::time_window::TimeWindow;

/// 📝 Everything one invocation asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub paths: Vec<S3Path>,
    pub query: QuerySpec,
    pub window: TimeWindow,
    pub dry_run: bool,
}

/// 🏁 How a run ended, when it ended well.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Results went to the sink. `count` is the total in count mode.
    Streamed { objects: u64, count: Option<u64> },
    DryRun(DryRunSummary),
}

#[derive(Debug)]
pub struct Client {
    store: Arc<StoreBackend>,
    supervisor: Supervisor,
}

impl Client {
    /// ☁️ A client talking to AWS S3, configured from `config`.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;
        let store = AwsStore::new(&config.aws)
            .await
            .context("💀 could not build the S3 client")?;
        Ok(Self::with_store(StoreBackend::Aws(store), config.runtime.clone()))
    }

    /// 🧪 A client over any store. Tests hand it an in-memory one.
    pub fn with_store(store: StoreBackend, runtime: RuntimeConfig) -> Self {
        let store = Arc::new(store);
        Self {
            supervisor: Supervisor::new(store.clone(), runtime),
            store,
        }
    }

    /// 🚀 Runs the query, or estimates it when `request.dry_run` is set.
    pub async fn run(&self, request: &RunRequest, sink: &mut SinkBackend) -> Result<RunOutcome> {
        if request.dry_run {
            let summary = self
                .estimate(&request.paths, &request.query, &request.window)
                .await?;
            return Ok(RunOutcome::DryRun(summary));
        }

        let paths = self
            .resolve_paths(&request.paths, &request.query, &request.window, None)
            .await?;
        let filter = KeyFilter::for_format(request.query.format_type, request.window);
        let summary = self
            .supervisor
            .stream(paths, filter, Arc::new(request.query.clone()), sink)
            .await?;
        Ok(RunOutcome::Streamed {
            objects: summary.objects,
            count: summary.count,
        })
    }

    /// 🧾 Sizes up what [`Client::run`] would scan, without running a single query.
    ///
    /// CF windows without an `until` are estimated up to now.
    pub async fn estimate(
        &self,
        paths: &[S3Path],
        query: &QuerySpec,
        window: &TimeWindow,
    ) -> Result<DryRunSummary> {
        let paths = self
            .resolve_paths(paths, query, window, Some(Utc::now()))
            .await?;
        let filter = KeyFilter::for_format(query.format_type, *window);
        let summary = self.supervisor.tally(paths, filter).await?;
        info!(
            "🧾 dry run: {} objects, {} bytes",
            summary.total_objects, summary.total_bytes
        );
        Ok(summary)
    }

    /// 📂 The common prefixes directly under `path`.
    pub async fn list_dirs(&self, path: &S3Path) -> Result<Vec<String>> {
        keys::list_dirs(self.store.as_ref(), &path.bucket, &path.prefix).await
    }

    pub async fn list_buckets(&self) -> Result<Vec<String>> {
        keys::list_buckets(self.store.as_ref()).await
    }

    /// 🗺️ The prefixes a run should enumerate: narrowed when possible, as given otherwise.
    async fn resolve_paths(
        &self,
        paths: &[S3Path],
        query: &QuerySpec,
        window: &TimeWindow,
        until_default: Option<DateTime<Utc>>,
    ) -> Result<Vec<S3Path>> {
        if paths.is_empty() {
            return Err(S3sError::validation("at least one s3://bucket/prefix path is required").into());
        }
        let narrowed = optimize(self.store.as_ref(), paths, query.format_type, window, until_default).await?;
        if !narrowed.is_empty() {
            info!("🗺️ {} prefixes narrowed to {}", paths.len(), narrowed.len());
            return Ok(narrowed);
        }
        if query.format_type.is_log_format() && !window.is_zero_range() {
            warn!("⚠️ could not narrow by time, listing every key under the given prefixes");
        }
        Ok(paths.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemorySink;
    use crate::backends::in_mem::{InMemoryStore, SelectEvent};
    use crate::error::find_s3s_error;
    use crate::query::{FormatType, OutputFormat};
    use chrono::TimeZone;

    fn the_client(store: &InMemoryStore) -> Client {
        Client::with_store(
            StoreBackend::InMemory(store.clone()),
            RuntimeConfig {
                concurrency: 3,
                show_progress: false,
            },
        )
    }

    fn at(h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 9, 27, h, mi, 0)
            .single()
            .expect("💀 test timestamp should exist on the calendar")
    }

    fn alb_key(stamp: &str) -> String {
        format!("alb/AWSLogs/1/elasticloadbalancing/r/2022/09/27/1_elasticloadbalancing_r_app.lb_{stamp}_10.0.0.1_x.log.gz")
    }

    fn request(format_type: FormatType, paths: &[&str], dry_run: bool) -> RunRequest {
        RunRequest {
            paths: paths.iter().map(|p| S3Path::parse(p).expect("💀 test path")).collect(),
            query: QuerySpec::new(format_type, "SELECT * FROM S3Object s"),
            window: TimeWindow::unbounded(),
            dry_run,
        }
    }

    #[tokio::test]
    async fn the_one_where_a_dry_run_adds_up_to_six_hundred() -> Result<()> {
        let the_store = InMemoryStore::new();
        for (key, size) in [("logs/a.json", 100), ("logs/b.json", 200), ("logs/c.json", 300)] {
            the_store.put_object("bucket", key, size);
        }
        let the_witness = InMemorySink::new();
        let mut the_sink = SinkBackend::InMemory(the_witness.clone());

        let the_outcome = the_client(&the_store)
            .run(&request(FormatType::Json, &["s3://bucket/logs/"], true), &mut the_sink)
            .await?;

        assert_eq!(
            the_outcome,
            RunOutcome::DryRun(DryRunSummary {
                total_bytes: 600,
                total_objects: 3
            })
        );
        assert!(the_store.select_requests().is_empty());
        assert!(the_witness.contents().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_five_and_seven_come_out_as_twelve() -> Result<()> {
        let the_store = InMemoryStore::new();
        the_store.put_object_with_events("bucket", "logs/a.csv", 10, vec![SelectEvent::Records(b"5\n".to_vec())]);
        the_store.put_object_with_events("bucket", "logs/b.csv", 10, vec![SelectEvent::Records(b"7\n".to_vec())]);
        let the_witness = InMemorySink::new();
        let mut the_sink = SinkBackend::InMemory(the_witness.clone());
        let mut the_request = request(FormatType::Csv, &["s3://bucket/logs/"], false);
        the_request.query = QuerySpec::new(FormatType::Csv, "SELECT COUNT(*) FROM S3Object s")
            .with_count_mode(true)
            .with_output_format(OutputFormat::Csv);

        let the_outcome = the_client(&the_store).run(&the_request, &mut the_sink).await?;

        assert_eq!(the_outcome, RunOutcome::Streamed { objects: 2, count: Some(12) });
        assert_eq!(the_witness.contents_string(), "12\n");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_one_bad_object_sinks_the_whole_run() {
        let the_store = InMemoryStore::new();
        for i in 0..6 {
            the_store.put_object_with_events(
                "bucket",
                &format!("logs/{i}.json"),
                10,
                vec![SelectEvent::Records(b"{\"ok\":true}\n".to_vec())],
            );
        }
        the_store.put_object_with_events(
            "bucket",
            "logs/3.json",
            10,
            vec![SelectEvent::Fail("InternalError: we have no idea".to_string())],
        );
        let mut the_sink = SinkBackend::InMemory(InMemorySink::new());

        let err = the_client(&the_store)
            .run(&request(FormatType::Json, &["s3://bucket/logs/"], false), &mut the_sink)
            .await
            .expect_err("💀 a failing object should fail the run");
        assert!(matches!(find_s3s_error(&err), Some(S3sError::RemoteQuery { .. })));
    }

    #[tokio::test]
    async fn the_one_where_alb_runs_only_touch_the_narrowed_slots() -> Result<()> {
        let the_store = InMemoryStore::new();
        for stamp in ["20220927T1155Z", "20220927T1200Z", "20220927T1205Z", "20220927T1210Z"] {
            the_store.put_object_with_events(
                "bucket",
                &alb_key(stamp),
                50,
                vec![SelectEvent::Records(b"{\"_1\":\"http\"}\n".to_vec())],
            );
        }
        let mut the_request = request(FormatType::AlbLogs, &["s3://bucket/alb/"], false);
        the_request.window = TimeWindow::new(Some(at(12, 0)), Some(at(12, 5)));
        let the_witness = InMemorySink::new();
        let mut the_sink = SinkBackend::InMemory(the_witness.clone());

        let the_outcome = the_client(&the_store).run(&the_request, &mut the_sink).await?;
        assert_eq!(the_outcome, RunOutcome::Streamed { objects: 2, count: None });

        let mut the_queried: Vec<String> = the_store.select_requests().into_iter().map(|r| r.key).collect();
        the_queried.sort();
        assert_eq!(the_queried, [alb_key("20220927T1200Z"), alb_key("20220927T1205Z")]);
        assert!(the_witness.contents_string().lines().all(|line| line.starts_with("{\"type\":\"http\"")));

        the_request.dry_run = true;
        let the_estimate = the_client(&the_store).run(&the_request, &mut the_sink).await?;
        assert_eq!(
            the_estimate,
            RunOutcome::DryRun(DryRunSummary {
                total_bytes: 100,
                total_objects: 2
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_cf_estimate_runs_up_to_now() -> Result<()> {
        let the_store = InMemoryStore::new();
        the_store.put_object("bucket", "cf/E1.2022-09-27-10.a.gz", 10);
        the_store.put_object("bucket", "cf/E1.2022-09-27-11.b.gz", 20);
        let the_query = QuerySpec::new(FormatType::CfLogs, "SELECT * FROM S3Object s");
        let the_window = TimeWindow::new(Some(at(11, 0)), None);

        let the_summary = the_client(&the_store)
            .estimate(&[S3Path::new("bucket", "cf/")], &the_query, &the_window)
            .await?;
        assert_eq!(the_summary.total_objects, 1);
        assert_eq!(the_summary.total_bytes, 20);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_cf_window_with_only_an_end_keeps_every_prefix() -> Result<()> {
        let the_store = InMemoryStore::new();
        the_store.put_object("bucket", "cf/E1.2022-09-27-10.a.gz", 10);
        the_store.put_object("bucket", "cf/E1.2022-09-27-11.b.gz", 20);
        let the_query = QuerySpec::new(FormatType::CfLogs, "SELECT * FROM S3Object s");
        let the_paths = [S3Path::new("bucket", "cf/")];
        let the_window = TimeWindow::new(None, Some(at(10, 30)));

        let the_resolved = the_client(&the_store)
            .resolve_paths(&the_paths, &the_query, &the_window, None)
            .await?;
        assert_eq!(the_resolved, the_paths);

        let the_summary = the_client(&the_store)
            .estimate(&the_paths, &the_query, &the_window)
            .await?;
        assert_eq!(the_summary.total_objects, 2);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_ls_sees_buckets_and_dirs() -> Result<()> {
        let the_store = InMemoryStore::new();
        the_store.put_object("logs", "2022/a", 1);
        the_store.put_object("logs", "2023/b", 1);
        the_store.create_bucket("archive");
        let the_client = the_client(&the_store);

        assert_eq!(the_client.list_buckets().await?, ["archive", "logs"]);
        assert_eq!(the_client.list_dirs(&S3Path::new("logs", "")).await?, ["2022/", "2023/"]);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_no_paths_is_a_validation_error() {
        let the_store = InMemoryStore::new();
        let mut the_sink = SinkBackend::InMemory(InMemorySink::new());
        let err = the_client(&the_store)
            .run(&request(FormatType::Json, &[], false), &mut the_sink)
            .await
            .expect_err("💀 nothing to query");
        assert!(matches!(find_s3s_error(&err), Some(S3sError::Validation(_))));
    }
}
