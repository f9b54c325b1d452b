//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 "In a world where a hundred and fifty queries run at once..."
//! 🎬 "One supervisor dared to notice when one of them fell over."
//!
//! 📦 The Supervisor wires a run together and watches it:
//!
//! ```text
//! EnumerateWorker ──descriptors──▶ QueryWorker × N ──chunks──▶ collector ──▶ sink
//!        (1 sender)                  (N receivers, N senders)     (1 receiver)
//! ```
//!
//! 🧠 Knowledge graph:
//! - Both channels are bounded at `concurrency`, so a slow sink pushes back all the way
//!   to the listing calls.
//! - Each sender set has one owner. The enumeration worker drops the descriptor sender
//!   when it returns; the chunk channel closes when the last query worker returns. The
//!   supervisor drops its own copies before waiting.
//! - [`FailFast`] keeps the first error and cancels the shared token. Everything else
//!   winds down quietly and the first error is what the caller gets.
//! - The collector runs on the supervisor's own task, since it borrows the caller's sink.
//!
//! ⚠️ DO NOT MAKE THE WORKERS PUB. Like Fight Club, but for async tasks. 🦆

mod workers;

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app_config::RuntimeConfig;
use crate::backends::{Sink, SinkBackend, StoreBackend};
use crate::collectors::{ResultCollector, drain};
use crate::common::S3Path;
use crate::estimator::{DryRunSummary, tally};
use crate::keys::KeyFilter;
use crate::progress::ProgressMetrics;
use crate::query::QuerySpec;
use workers::{EnumerateWorker, QueryWorker, Worker};

/// 💥 First error wins. Recording it cancels the run.
#[derive(Debug)]
pub(crate) struct FailFast {
    cancel: CancellationToken,
    first: Mutex<Option<anyhow::Error>>,
}

impl FailFast {
    pub(crate) fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            first: Mutex::new(None),
        }
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 🚨 Records `err` unless something already failed, and cancels the run either way.
    pub(crate) fn trip(&self, err: anyhow::Error) {
        let mut first = self.first.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if first.is_none() {
            warn!("🚨 failing fast: {err:#}");
            *first = Some(err);
        } else {
            debug!("🔇 later failure ignored: {err:#}");
        }
        self.cancel.cancel();
    }

    pub(crate) fn take(&self) -> Option<anyhow::Error> {
        self.first.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take()
    }
}

/// 👀 Waits for every worker, tripping `fail_fast` as soon as one of them fails.
async fn watch(handles: Vec<JoinHandle<Result<()>>>, fail_fast: &FailFast) {
    let mut running: FuturesUnordered<_> = handles.into_iter().collect();
    while let Some(joined) = running.next().await {
        let outcome = joined.context("💀 a worker task panicked").and_then(|outcome| outcome);
        if let Err(err) = outcome {
            fail_fast.trip(err);
        }
    }
}

/// 📋 What a successful streamed run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StreamSummary {
    pub(crate) objects: u64,
    pub(crate) count: Option<u64>,
}

/// 📦 Runs the pipeline against one store with one runtime config.
#[derive(Debug)]
pub(crate) struct Supervisor {
    store: Arc<StoreBackend>,
    runtime: RuntimeConfig,
}

impl Supervisor {
    pub(crate) fn new(store: Arc<StoreBackend>, runtime: RuntimeConfig) -> Self {
        Self { store, runtime }
    }

    fn concurrency(&self) -> usize {
        self.runtime.concurrency.max(1)
    }

    /// 🚀 Enumerates, queries and collects. Returns the first error if anything failed.
    pub(crate) async fn stream(
        &self,
        paths: Vec<S3Path>,
        filter: KeyFilter,
        spec: Arc<QuerySpec>,
        sink: &mut SinkBackend,
    ) -> Result<StreamSummary> {
        let concurrency = self.concurrency();
        info!("🚀 querying {} prefixes with {concurrency} workers", paths.len());

        let fail_fast = FailFast::new();
        let progress = Arc::new(ProgressMetrics::new(self.runtime.show_progress));
        let (descriptor_tx, descriptor_rx) = async_channel::bounded(concurrency);
        let (chunk_tx, chunk_rx) = async_channel::bounded(concurrency);

        let mut handles = Vec::with_capacity(concurrency + 1);
        handles.push(
            EnumerateWorker::new(
                self.store.clone(),
                paths,
                filter,
                descriptor_tx,
                concurrency,
                fail_fast.token(),
            )
            .start(),
        );
        for id in 0..concurrency {
            handles.push(
                QueryWorker::new(
                    id,
                    self.store.clone(),
                    spec.clone(),
                    descriptor_rx.clone(),
                    chunk_tx.clone(),
                    progress.clone(),
                    fail_fast.token(),
                )
                .start(),
            );
        }
        // the workers hold every channel end that matters now
        drop(descriptor_rx);
        drop(chunk_tx);

        let collect = async {
            match drain(chunk_rx, ResultCollector::for_spec(&spec), sink).await {
                Ok(collector) => Some(collector),
                Err(err) => {
                    fail_fast.trip(err);
                    None
                }
            }
        };
        let (collector, ()) = tokio::join!(collect, watch(handles, &fail_fast));
        progress.finish();

        if let Some(err) = fail_fast.take() {
            if let Err(close_err) = sink.close().await {
                warn!("⚠️ could not close the sink after a failed run: {close_err:#}");
            }
            return Err(err);
        }
        let collector = collector.context("💀 the collector stopped without saying why")?;
        let count = collector.finish(sink).await?;
        let objects = progress.objects();
        info!("✅ {objects} objects queried");
        Ok(StreamSummary { objects, count })
    }

    /// 🧾 Enumerates exactly like [`Supervisor::stream`] but only adds up sizes.
    pub(crate) async fn tally(&self, paths: Vec<S3Path>, filter: KeyFilter) -> Result<DryRunSummary> {
        let concurrency = self.concurrency();
        let fail_fast = FailFast::new();
        let (descriptor_tx, descriptor_rx) = async_channel::bounded(concurrency);
        let handles = vec![
            EnumerateWorker::new(
                self.store.clone(),
                paths,
                filter,
                descriptor_tx,
                concurrency,
                fail_fast.token(),
            )
            .start(),
        ];

        let (summary, ()) = tokio::join!(tally(descriptor_rx), watch(handles, &fail_fast));
        match fail_fast.take() {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }
}
