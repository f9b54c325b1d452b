//! # Previously, on s3s...
//!
//! 🎬 A bucket that lives entirely in RAM, gone the moment you blink.
//!
//! [`InMemoryStore`] is an [`ObjectStore`] for tests and local development. Objects
//! are registered with a size and a scripted list of query events. It does not parse
//! or evaluate SQL: `select` replays whatever events the object was given and records
//! the request so tests can look at it afterwards.
//!
//! [`InMemorySink`] collects everything it is sent behind an `Arc<Mutex<...>>` so a
//! test can hand it to the pipeline and still read it back.
//!
//! ⚠️ This is NOT for production. No network calls. No disk I/O. Just heap memory. 🦆

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;

use crate::backends::{ListPage, ListRequest, ListedObject, ObjectStore, PayloadStream, Sink};
use crate::error::S3sError;
use crate::select::SelectRequest;

/// 📜 One scripted event in an object's query stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectEvent {
    /// A data-bearing event.
    Records(Vec<u8>),
    /// The stream breaks here with this message.
    Fail(String),
}

#[derive(Debug, Clone)]
struct StoredObject {
    size: u64,
    events: Vec<SelectEvent>,
}

#[derive(Debug)]
struct StoreState {
    buckets: BTreeMap<String, BTreeMap<String, StoredObject>>,
    page_size: usize,
    failing_prefixes: Vec<(String, String, String)>,
    select_log: Vec<SelectRequest>,
    list_calls: usize,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            buckets: BTreeMap::new(),
            page_size: 1000,
            failing_prefixes: Vec::new(),
            select_log: Vec::new(),
            list_calls: 0,
        }
    }
}

/// 🪣 A RAM-backed object store. Clones share the same buckets.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

enum Entry {
    Object(ListedObject),
    Prefix(String),
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 📄 Caps every listing page at `page_size` entries, to make pagination visible.
    pub fn with_page_size(self, page_size: usize) -> Self {
        self.lock().page_size = page_size.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // a panicked test thread cannot leave the maps half-written, so poison is ignorable
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 🪣 Creates an empty bucket.
    pub fn create_bucket(&self, bucket: &str) {
        self.lock().buckets.entry(bucket.to_string()).or_default();
    }

    /// 📦 Registers an object with no query output.
    pub fn put_object(&self, bucket: &str, key: &str, size: u64) {
        self.put_object_with_events(bucket, key, size, Vec::new());
    }

    /// 📦 Registers an object whose queries replay `events`.
    pub fn put_object_with_events(&self, bucket: &str, key: &str, size: u64, events: Vec<SelectEvent>) {
        self.lock()
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), StoredObject { size, events });
    }

    /// 💀 Any listing whose prefix starts with `prefix` fails with `message`.
    pub fn fail_listing(&self, bucket: &str, prefix: &str, message: &str) {
        self.lock()
            .failing_prefixes
            .push((bucket.to_string(), prefix.to_string(), message.to_string()));
    }

    /// 🧾 Every select request received so far, in arrival order.
    pub fn select_requests(&self) -> Vec<SelectRequest> {
        self.lock().select_log.clone()
    }

    /// 🔢 How many `list_page` calls were made.
    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn list_page(&self, request: &ListRequest) -> Result<ListPage> {
        let mut state = self.lock();
        state.list_calls += 1;

        let target = format!("s3://{}/{}", request.bucket, request.prefix);
        if let Some((_, _, message)) = state
            .failing_prefixes
            .iter()
            .find(|(bucket, prefix, _)| *bucket == request.bucket && request.prefix.starts_with(prefix.as_str()))
        {
            return Err(S3sError::remote(target, message.clone()).into());
        }
        let objects = state
            .buckets
            .get(&request.bucket)
            .ok_or_else(|| S3sError::remote(target, "NoSuchBucket: the specified bucket does not exist"))?;

        // S3 folds everything past the first delimiter into a common prefix
        let mut entries: Vec<Entry> = Vec::new();
        for (key, object) in objects.range(request.prefix.clone()..) {
            let Some(rest) = key.strip_prefix(request.prefix.as_str()) else {
                break;
            };
            let folded = request
                .delimiter
                .as_deref()
                .filter(|d| !d.is_empty())
                .and_then(|d| rest.find(d).map(|idx| format!("{}{}", request.prefix, &rest[..idx + d.len()])));
            match folded {
                Some(common) => {
                    if !matches!(entries.last(), Some(Entry::Prefix(last)) if *last == common) {
                        entries.push(Entry::Prefix(common));
                    }
                }
                None => entries.push(Entry::Object(ListedObject {
                    key: key.clone(),
                    size: object.size,
                })),
            }
        }

        let start: usize = match &request.continuation_token {
            Some(token) => token.parse().map_err(|_| {
                S3sError::remote(
                    format!("s3://{}/{}", request.bucket, request.prefix),
                    "InvalidArgument: bad continuation token",
                )
            })?,
            None => 0,
        };
        let max_keys = request
            .max_keys
            .and_then(|m| usize::try_from(m).ok())
            .unwrap_or(usize::MAX)
            .min(state.page_size);
        let total = entries.len();
        let end = start.saturating_add(max_keys).min(total);

        let mut page = ListPage::default();
        for entry in entries.into_iter().take(end).skip(start) {
            match entry {
                Entry::Object(object) => page.objects.push(object),
                Entry::Prefix(prefix) => page.common_prefixes.push(prefix),
            }
        }
        if end < total {
            page.next_continuation_token = Some(end.to_string());
        }
        Ok(page)
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        Ok(self.lock().buckets.keys().cloned().collect())
    }

    async fn select(&self, request: SelectRequest) -> Result<PayloadStream> {
        let mut state = self.lock();
        let target = request.uri();
        let events = state
            .buckets
            .get(&request.bucket)
            .and_then(|objects| objects.get(&request.key))
            .map(|object| object.events.clone())
            .ok_or_else(|| S3sError::remote(target.clone(), "NoSuchKey: the specified key does not exist"))?;
        state.select_log.push(request);

        let payloads = events.into_iter().map(move |event| match event {
            SelectEvent::Records(bytes) => Ok(bytes),
            SelectEvent::Fail(message) => Err(anyhow::Error::from(S3sError::remote(target.clone(), message))),
        });
        Ok(stream::iter(payloads).boxed())
    }
}

/// 📦 A sink that never forgets. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct InMemorySink {
    received: Arc<Mutex<Vec<u8>>>,
    closed: Arc<Mutex<bool>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 📜 Everything received so far, concatenated.
    pub fn contents(&self) -> Vec<u8> {
        self.received
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// 📜 [`contents`](Self::contents) as text, lossily.
    pub fn contents_string(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.lock().map(|c| *c).unwrap_or(true)
    }
}

#[async_trait]
impl Sink for InMemorySink {
    async fn send(&mut self, payload: Vec<u8>) -> Result<()> {
        self.received
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend_from_slice(&payload);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        *self.closed.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = true;
        Ok(())
    }
}
