//! 🗝️ The EnumerateWorker: turns prefixes into descriptors, a bounded number of
//! prefixes at a time.
//!
//! It owns the only descriptor [`Sender`]. When it returns, success or not, the sender
//! drops and the query workers see the channel close once it drains.

use std::sync::Arc;

use anyhow::Result;
use async_channel::Sender;
use futures::StreamExt;
use futures::stream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Worker;
use crate::backends::StoreBackend;
use crate::common::{ObjectDescriptor, S3Path};
use crate::keys::{KeyFilter, enumerate};

#[derive(Debug)]
pub(crate) struct EnumerateWorker {
    store: Arc<StoreBackend>,
    paths: Vec<S3Path>,
    filter: KeyFilter,
    tx: Sender<ObjectDescriptor>,
    concurrency: usize,
    cancel: CancellationToken,
}

impl EnumerateWorker {
    pub(crate) fn new(
        store: Arc<StoreBackend>,
        paths: Vec<S3Path>,
        filter: KeyFilter,
        tx: Sender<ObjectDescriptor>,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            paths,
            filter,
            tx,
            concurrency: concurrency.max(1),
            cancel,
        }
    }
}

impl Worker for EnumerateWorker {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            debug!("🗝️ EnumerateWorker started on {} prefixes", self.paths.len());
            let store: &StoreBackend = &self.store;
            let (filter, tx, cancel) = (&self.filter, &self.tx, &self.cancel);

            let mut listings = stream::iter(self.paths.iter().cloned())
                .map(|path| async move { enumerate(store, &path, filter, tx, cancel).await })
                .buffer_unordered(self.concurrency);

            let mut queued = 0u64;
            while let Some(listed) = listings.next().await {
                // first failure ends the worker; in-flight listings are dropped with it
                queued += listed?;
            }
            debug!("🏁 EnumerateWorker done, {queued} objects queued");
            Ok(())
        })
    }
}
