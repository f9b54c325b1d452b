//! 🪣 s3s: SQL over objects in S3, without downloading them.
//!
//! Prefixes go in, objects get enumerated (and, for ALB and CloudFront logs, pruned by
//! time), and one remote query per object runs concurrently. Results stream back into
//! a single sink.
//!
//! Start at [`Client`]. 🦆

pub mod app_config;
pub mod backends;
mod client;
mod collectors;
pub mod common;
pub mod error;
pub mod estimator;
pub mod keys;
pub mod prefix_optimizer;
pub mod progress;
pub mod query;
pub mod select;
mod supervisors;
pub mod time_window;
pub mod transforms;
pub mod validation;

pub use app_config::{AppConfig, ConfigOverrides, load_config};
pub use client::{Client, RunOutcome, RunRequest};
pub use common::{ObjectDescriptor, ResultChunk, S3Path};
pub use error::{S3sError, find_s3s_error};
pub use estimator::DryRunSummary;
pub use query::{FormatType, OutputFormat, QueryOptions, QuerySpec};
pub use time_window::TimeWindow;
