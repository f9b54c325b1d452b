//! 🔌 Backends: where the real I/O happens.
//!
//! ☁️ Object stores list and query. 🕳️ Sinks swallow whatever comes back.
//!
//! 🧠 Knowledge graph:
//! - [`ObjectStore`] is the upstream seam: paginated listing, bucket listing, and the
//!   remote query itself (submit, then read a stream of payloads).
//! - [`StoreBackend`] dispatches to AWS S3 or the in-memory store. Shared behind an `Arc`
//!   by every worker in a run.
//! - [`Sink`] is the downstream seam, [`SinkBackend`] dispatches to stdout, a file, or RAM.
//!   Exactly one collector owns the sink, so `&mut self` is fine.
//!
//! 🦆 The duck is here because every file must have one.

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::select::SelectRequest;

pub mod aws_s3;
pub mod file_sink;
pub mod in_mem;
pub mod stdout_sink;

pub use aws_s3::AwsStore;
pub use file_sink::FileSink;
pub use in_mem::{InMemorySink, InMemoryStore};
pub use stdout_sink::StdoutSink;

/// 📨 Raw record payloads from one remote query, in server order.
pub type PayloadStream = BoxStream<'static, Result<Vec<u8>>>;

// ===== ObjectStore Trait and Backend Enum =====

/// 📋 One page of a listing request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    pub bucket: String,
    pub prefix: String,
    pub delimiter: Option<String>,
    pub continuation_token: Option<String>,
    pub max_keys: Option<i32>,
}

impl ListRequest {
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    pub fn with_max_keys(mut self, max_keys: i32) -> Self {
        self.max_keys = Some(max_keys);
        self
    }

    pub fn with_continuation_token(mut self, token: Option<String>) -> Self {
        self.continuation_token = token;
        self
    }
}

/// 🗝️ A key and its size, straight from a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    pub key: String,
    pub size: u64,
}

/// 📄 What one listing call returned. `next_continuation_token` is set only when more pages exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ListedObject>,
    pub common_prefixes: Vec<String>,
    pub next_continuation_token: Option<String>,
}

/// ☁️ Somewhere objects live and can be queried in place.
///
/// # Contract
/// - `list_page` returns keys in ascending order, at most `max_keys` entries, and a
///   continuation token only when the listing is truncated.
/// - `select` fails fast when the request is rejected; failures after that arrive as
///   the final item of the stream.
/// - Failures carry an [`S3sError::RemoteQuery`](crate::error::S3sError::RemoteQuery) at
///   the root of the chain.
#[async_trait]
pub trait ObjectStore: std::fmt::Debug + Send + Sync {
    async fn list_page(&self, request: &ListRequest) -> Result<ListPage>;

    async fn list_buckets(&self) -> Result<Vec<String>>;

    /// 🔎 Submits a remote query and returns its record payloads.
    async fn select(&self, request: SelectRequest) -> Result<PayloadStream>;
}

/// 🎭 The store a run talks to.
#[derive(Debug)]
pub enum StoreBackend {
    Aws(AwsStore),
    InMemory(InMemoryStore),
}

#[async_trait]
impl ObjectStore for StoreBackend {
    async fn list_page(&self, request: &ListRequest) -> Result<ListPage> {
        match self {
            StoreBackend::Aws(store) => store.list_page(request).await,
            StoreBackend::InMemory(store) => store.list_page(request).await,
        }
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        match self {
            StoreBackend::Aws(store) => store.list_buckets().await,
            StoreBackend::InMemory(store) => store.list_buckets().await,
        }
    }

    async fn select(&self, request: SelectRequest) -> Result<PayloadStream> {
        match self {
            StoreBackend::Aws(store) => store.select(request).await,
            StoreBackend::InMemory(store) => store.select(request).await,
        }
    }
}

// ===== Sink Trait and Backend Enum =====

/// 🕳️ Where query output ends up.
///
/// # Contract
/// - `send` writes the bytes as given, in call order.
/// - `close` flushes. MUST be called, async drop is not a thing.
#[async_trait]
pub trait Sink: std::fmt::Debug + Send {
    async fn send(&mut self, payload: Vec<u8>) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

#[derive(Debug)]
pub enum SinkBackend {
    Stdout(StdoutSink),
    File(FileSink),
    InMemory(InMemorySink),
}

#[async_trait]
impl Sink for SinkBackend {
    async fn send(&mut self, payload: Vec<u8>) -> Result<()> {
        match self {
            SinkBackend::Stdout(sink) => sink.send(payload).await,
            SinkBackend::File(sink) => sink.send(payload).await,
            SinkBackend::InMemory(sink) => sink.send(payload).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            SinkBackend::Stdout(sink) => sink.close().await,
            SinkBackend::File(sink) => sink.close().await,
            SinkBackend::InMemory(sink) => sink.close().await,
        }
    }
}
