//! 🔎 The QueryWorker: one descriptor in, one remote query out, chunks down the pipe.
//!
//! Every wait is raced against the run's cancellation token: the next descriptor, the
//! next payload (the result stream ends itself on cancel) and the send into the chunk
//! channel, which is where backpressure from a slow sink shows up.

use std::sync::Arc;

use anyhow::Result;
use async_channel::{Receiver, Sender};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::Worker;
use crate::backends::StoreBackend;
use crate::common::{ObjectDescriptor, ResultChunk};
use crate::progress::ProgressMetrics;
use crate::query::QuerySpec;
use crate::select::query_object;

#[derive(Debug)]
pub(crate) struct QueryWorker {
    id: usize,
    store: Arc<StoreBackend>,
    spec: Arc<QuerySpec>,
    rx: Receiver<ObjectDescriptor>,
    tx: Sender<ResultChunk>,
    progress: Arc<ProgressMetrics>,
    cancel: CancellationToken,
}

impl QueryWorker {
    pub(crate) fn new(
        id: usize,
        store: Arc<StoreBackend>,
        spec: Arc<QuerySpec>,
        rx: Receiver<ObjectDescriptor>,
        tx: Sender<ResultChunk>,
        progress: Arc<ProgressMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            store,
            spec,
            rx,
            tx,
            progress,
            cancel,
        }
    }

    /// 🔄 Queries one object to the end. `Ok(false)` means stop: cancelled, or nobody
    /// is collecting anymore.
    async fn query_one(&self, descriptor: &ObjectDescriptor) -> Result<bool> {
        debug!("🔎 worker {} querying {}", self.id, descriptor.uri());
        let mut chunks = query_object(self.store.as_ref(), descriptor, &self.spec, self.cancel.clone()).await?;

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(false),
                sent = self.tx.send(chunk) => {
                    if sent.is_err() {
                        return Ok(false);
                    }
                }
            }
        }
        if self.cancel.is_cancelled() {
            return Ok(false);
        }
        self.progress.object_queried(descriptor.size);
        Ok(true)
    }
}

impl Worker for QueryWorker {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            trace!("🧵 QueryWorker {} reporting for duty", self.id);
            loop {
                let descriptor = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    received = self.rx.recv() => match received {
                        Ok(descriptor) => descriptor,
                        // empty and closed: the enumeration is over
                        Err(_) => break,
                    },
                };
                if !self.query_one(&descriptor).await? {
                    break;
                }
            }
            trace!("🏁 QueryWorker {} clocking out", self.id);
            Ok(())
        })
    }
}
