//! 🗝️ Key enumeration: turning `s3://bucket/prefix` into the objects under it.
//!
//! 🧠 Knowledge graph:
//! - [`enumerate`] walks every listing page under a prefix and pushes an
//!   [`ObjectDescriptor`] per surviving key into a bounded channel. It never closes the
//!   channel: the stage that owns the sender drops it once every prefix is done.
//! - [`KeyFilter`] decides which keys survive. ALB keys carry their own end timestamp,
//!   so they are checked one by one against the 5-minute-rounded window. CF keys are
//!   only ever narrowed by the prefix optimizer.
//! - Every suspension point (list call, channel send) races the cancellation token.
//! - [`first_object`], [`list_dirs`] and [`list_buckets`] are the small helpers the
//!   prefix optimizer and `ls` lean on. 🦆

use anyhow::{Context, Result};
use async_channel::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::backends::{ListRequest, ObjectStore};
use crate::common::{ObjectDescriptor, S3Path};
use crate::query::FormatType;
use crate::time_window::{TimeWindow, alb_key_end_time, log_bucket};

/// 🧹 Per-key admission rule applied during enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFilter {
    /// Every key is admitted.
    None,
    /// Keys are admitted when their `_YYYYMMDDTHHMMZ_` stamp lies in the window.
    Alb(TimeWindow),
    /// No per-key check. Narrowing happens in the prefix optimizer.
    Cf,
}

impl KeyFilter {
    /// 🎯 The filter a run over `format_type` should use.
    pub fn for_format(format_type: FormatType, window: TimeWindow) -> Self {
        match format_type {
            FormatType::AlbLogs if !window.is_zero_range() => {
                KeyFilter::Alb(window.rounded_to(log_bucket()))
            }
            FormatType::CfLogs => KeyFilter::Cf,
            FormatType::AlbLogs | FormatType::Json | FormatType::Csv => KeyFilter::None,
        }
    }

    /// ✅ Whether `key` should be queried. A malformed ALB key is an error, not a skip.
    ///
    /// The `Alb` window is expected to already be rounded; [`KeyFilter::for_format`]
    /// takes care of that.
    pub fn admits(&self, key: &str) -> Result<bool> {
        match self {
            KeyFilter::None | KeyFilter::Cf => Ok(true),
            KeyFilter::Alb(window) => Ok(window.contains(alb_key_end_time(key)?)),
        }
    }
}

/// 📋 Lists every object under `path`, filters it, and sends the survivors to `sender`.
///
/// Returns how many descriptors were sent. Cancellation, or a channel whose receivers
/// are all gone, ends the walk early without an error.
pub async fn enumerate<S: ObjectStore + ?Sized>(
    store: &S,
    path: &S3Path,
    filter: &KeyFilter,
    sender: &Sender<ObjectDescriptor>,
    cancel: &CancellationToken,
) -> Result<u64> {
    debug!("🗝️ enumerating {path}");
    let mut emitted = 0u64;
    let mut continuation_token = None;

    loop {
        let request = ListRequest::new(&path.bucket, &path.prefix)
            .with_continuation_token(continuation_token.take());
        let page = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(emitted),
            page = store.list_page(&request) => {
                page.with_context(|| format!("💀 listing {path} fell over"))?
            }
        };
        trace!(
            "📄 {} objects on this page of {path} (more: {})",
            page.objects.len(),
            page.next_continuation_token.is_some()
        );

        for object in page.objects {
            if !filter
                .admits(&object.key)
                .with_context(|| format!("💀 cannot filter keys under {path}"))?
            {
                continue;
            }
            let descriptor = ObjectDescriptor::new(&path.bucket, object.key, object.size);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(emitted),
                sent = sender.send(descriptor) => {
                    if sent.is_err() {
                        debug!("🚪 nobody is listening for {path} anymore, stopping");
                        return Ok(emitted);
                    }
                    emitted += 1;
                }
            }
        }

        continuation_token = page.next_continuation_token;
        if continuation_token.is_none() {
            break;
        }
    }

    debug!("✅ {path}: {emitted} objects queued");
    Ok(emitted)
}

/// 🔍 The first object under a prefix, if there is one.
pub async fn first_object<S: ObjectStore + ?Sized>(
    store: &S,
    bucket: &str,
    prefix: &str,
) -> Result<Option<ObjectDescriptor>> {
    let page = store
        .list_page(&ListRequest::new(bucket, prefix).with_max_keys(1))
        .await
        .with_context(|| format!("💀 could not peek into s3://{bucket}/{prefix}"))?;
    Ok(page
        .objects
        .into_iter()
        .next()
        .map(|object| ObjectDescriptor::new(bucket, object.key, object.size)))
}

/// 📂 The "directories" directly under `prefix`, split on `/`.
pub async fn list_dirs<S: ObjectStore + ?Sized>(
    store: &S,
    bucket: &str,
    prefix: &str,
) -> Result<Vec<String>> {
    let mut dirs = Vec::new();
    let mut continuation_token = None;
    loop {
        let request = ListRequest::new(bucket, prefix)
            .with_delimiter("/")
            .with_continuation_token(continuation_token.take());
        let page = store
            .list_page(&request)
            .await
            .with_context(|| format!("💀 could not list directories of s3://{bucket}/{prefix}"))?;
        dirs.extend(page.common_prefixes);
        continuation_token = page.next_continuation_token;
        if continuation_token.is_none() {
            return Ok(dirs);
        }
    }
}

/// 🪣 Every bucket the credentials can see.
pub async fn list_buckets<S: ObjectStore + ?Sized>(store: &S) -> Result<Vec<String>> {
    store
        .list_buckets()
        .await
        .context("💀 could not list buckets")
}
