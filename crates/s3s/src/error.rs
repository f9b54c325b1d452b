//! 💀 Errors: the five ways a query run can end in tears.
//!
//! 🧠 Knowledge graph:
//! - Everything propagates as `anyhow::Result` with context layered on top, same as
//!   the rest of the crate.
//! - The *root* of a failing chain is an [`S3sError`] whenever the failure is one we
//!   understand. Callers (and tests) `downcast_ref::<S3sError>()` to learn which one.
//! - Nothing here is retried. The AWS client retries individual calls; the pipeline
//!   just gives up on the first failure and reports it. 🦆

use thiserror::Error;

/// 🏷️ The taxonomy of failure. One variant per way the world can disappoint us.
#[derive(Debug, Error)]
pub enum S3sError {
    /// 🚫 The caller handed us a combination of options that cannot work.
    /// Rejected before any I/O, shown to the user verbatim.
    #[error("invalid options: {0}")]
    Validation(String),

    /// 🔍 The prefix optimizer sampled a prefix and found nothing usable:
    /// either zero objects, or a key that doesn't follow the log naming convention.
    #[error("no matching object under s3://{bucket}/{prefix}: {reason}")]
    NoMatchingObject {
        bucket: String,
        prefix: String,
        reason: String,
    },

    /// 🗝️ A key was supposed to carry an embedded timestamp and didn't.
    #[error("malformed key '{key}': {reason}")]
    MalformedKey { key: String, reason: String },

    /// 🧾 The remote query returned something we could not parse.
    #[error("failed to parse query payload from s3://{bucket}/{key}: {reason}")]
    PayloadParse {
        bucket: String,
        key: String,
        reason: String,
    },

    /// ☁️ The storage provider said no. Network, permissions, throttling, the usual suspects.
    #[error("remote call failed for {target}: {message}")]
    RemoteQuery { target: String, message: String },
}

impl S3sError {
    /// 🔧 Shorthand for the most common construction site.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// ☁️ Shorthand for remote failures, where `target` is usually an `s3://` uri.
    pub fn remote(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RemoteQuery {
            target: target.into(),
            message: message.into(),
        }
    }
}

/// 🔎 Walks an `anyhow` chain and returns the first [`S3sError`] in it, if any.
///
/// Context layers sit on top of the root cause, so a plain `downcast_ref` on the
/// outer error would only see them. This digs.
pub fn find_s3s_error(err: &anyhow::Error) -> Option<&S3sError> {
    err.chain().find_map(|cause| cause.downcast_ref::<S3sError>())
}
