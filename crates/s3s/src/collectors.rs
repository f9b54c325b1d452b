//! 📦 Collectors: the single place where query results meet the sink.
//!
//! 🧠 Knowledge graph:
//! - **Passthrough** (`ResultCollector::Passthrough`): every `Raw` chunk goes straight to
//!   the sink in arrival order. Chunks from one object stay in order, chunks from
//!   different objects interleave however the workers finish.
//! - **Count** (`ResultCollector::Count`): per-object counts are summed here, and only
//!   here. One line, `<total>\n`, is written when the run succeeds.
//! - One collector per run, owned by the supervisor's task, so the running total needs
//!   no locking.
//!
//! ```text
//! QueryWorker × N → chunk channel → drain() → collector.absorb() → sink.send()
//!                                             collector.finish() → sink.close()
//! ```
//!
//! 🦆 (the duck counts. slowly. but correctly.)

use anyhow::{Context, Result, bail};
use async_channel::Receiver;
use tracing::{debug, trace};

use crate::backends::{Sink, SinkBackend};
use crate::common::ResultChunk;
use crate::query::QuerySpec;

/// 📥 Merges result chunks into the sink, one way or the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResultCollector {
    Passthrough { forwarded_bytes: u64 },
    Count { total: u64 },
}

impl ResultCollector {
    pub(crate) fn for_spec(spec: &QuerySpec) -> Self {
        if spec.count_mode {
            ResultCollector::Count { total: 0 }
        } else {
            ResultCollector::Passthrough { forwarded_bytes: 0 }
        }
    }

    /// 🔄 Takes one chunk. Raw bytes are written immediately, counts are accumulated.
    pub(crate) async fn absorb(&mut self, chunk: ResultChunk, sink: &mut SinkBackend) -> Result<()> {
        match (self, chunk) {
            (ResultCollector::Passthrough { forwarded_bytes }, ResultChunk::Raw(bytes)) => {
                trace!("📬 forwarding {} bytes", bytes.len());
                *forwarded_bytes += bytes.len() as u64;
                sink.send(bytes).await.context("💀 the sink refused a result chunk")
            }
            (ResultCollector::Count { total }, ResultChunk::Count(n)) => {
                *total = total.saturating_add(n);
                Ok(())
            }
            (collector, chunk) => bail!("💀 {collector:?} cannot take {chunk:?}"),
        }
    }

    /// 🎬 Writes the count line (count mode only) and closes the sink.
    ///
    /// Returns the total in count mode, `None` otherwise.
    pub(crate) async fn finish(self, sink: &mut SinkBackend) -> Result<Option<u64>> {
        let total = match self {
            ResultCollector::Count { total } => {
                sink.send(format!("{total}\n").into_bytes())
                    .await
                    .context("💀 could not write the final count")?;
                Some(total)
            }
            ResultCollector::Passthrough { forwarded_bytes } => {
                debug!("📦 {forwarded_bytes} bytes of results forwarded");
                None
            }
        };
        sink.close().await.context("💀 could not close the sink")?;
        Ok(total)
    }
}

/// 🚰 Pulls chunks until every worker has dropped its sender.
pub(crate) async fn drain(
    rx: Receiver<ResultChunk>,
    mut collector: ResultCollector,
    sink: &mut SinkBackend,
) -> Result<ResultCollector> {
    while let Ok(chunk) = rx.recv().await {
        collector.absorb(chunk, sink).await?;
    }
    debug!("🏁 result channel closed, collector done");
    Ok(collector)
}
