//! 📦 Common types: the nouns every other module passes around.
//!
//! 🧠 Knowledge graph:
//! - [`S3Path`]: what the user typed, `s3://bucket/prefix`, parsed once at the boundary.
//! - [`ObjectDescriptor`]: one concrete object the enumerator found. Flows through the
//!   descriptor channel and is consumed by exactly one query worker.
//! - [`ResultChunk`]: what a query worker hands back. Raw bytes, or a count.
//!
//! Nothing in here is mutated after construction. 🦆

use std::fmt;

use crate::error::S3sError;

const S3_SCHEME: &str = "s3://";

/// 🪣 A bucket plus a key prefix. The prefix may be empty, meaning "the whole bucket".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct S3Path {
    pub bucket: String,
    pub prefix: String,
}

impl S3Path {
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    /// 🔍 Parses `s3://bucket[/prefix]`.
    ///
    /// Anything without the scheme or without a bucket name is a validation error.
    pub fn parse(raw: &str) -> Result<Self, S3sError> {
        let rest = raw.strip_prefix(S3_SCHEME).ok_or_else(|| {
            S3sError::validation(format!("'{raw}' is not an s3://bucket/prefix path"))
        })?;

        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(S3sError::validation(format!(
                "'{raw}' has no bucket name"
            )));
        }

        Ok(Self::new(bucket, prefix))
    }
}

impl fmt::Display for S3Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{S3_SCHEME}{}/{}", self.bucket, self.prefix)
    }
}

/// 🧾 One object to query. Immutable, consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDescriptor {
    pub bucket: String,
    pub key: String,
    /// 📏 bytes, as reported by the listing
    pub size: u64,
}

impl ObjectDescriptor {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, size: u64) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            size,
        }
    }

    /// 🔗 `s3://bucket/key`, for logs and error targets.
    pub fn uri(&self) -> String {
        format!("{S3_SCHEME}{}/{}", self.bucket, self.key)
    }
}

/// 📬 What comes back from one object's query stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultChunk {
    /// Bytes ready for the sink, in stream order.
    Raw(Vec<u8>),
    /// One per-object row count, summed by the collector.
    Count(u64),
}
