//! 🧵 Workers: the ones who actually do the work while the Supervisor takes all the
//! credit in the sprint retro.
//!
//! - [`EnumerateWorker`]: one per run. Lists every prefix (at most `concurrency` at a
//!   time) and owns the only descriptor sender.
//! - [`QueryWorker`]: `concurrency` of them. Each pulls one descriptor at a time and
//!   streams its results into the chunk channel.
//!
//! A worker reports failure by returning `Err` from its task. Cancellation is never an
//! error: a cancelled worker just stops and drops its channel ends. 🦆

use anyhow::Result;
use tokio::task::JoinHandle;

mod enumerate_worker;
mod query_worker;

pub(super) use enumerate_worker::EnumerateWorker;
pub(super) use query_worker::QueryWorker;

/// 🏗️ A background worker, that does work. duh.
pub(super) trait Worker {
    fn start(self) -> JoinHandle<Result<()>>;
}
