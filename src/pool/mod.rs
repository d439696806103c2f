//! pool
//!
//! Parallel conversion workers.
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────┐
//!                  │  Dispatcher  │◄──── exec / broadcast / stats
//!                  └──────┬───────┘
//!            job queue    │    control channels
//!        ┌────────────────┼────────────────┐
//!  ┌─────▼─────┐    ┌─────▼─────┐    ┌─────▼─────┐
//!  │ Worker 0  │    │ Worker 1  │    │ Worker N  │
//!  │ engine    │    │ engine    │    │ engine    │
//!  │ cache     │    │ cache     │    │ cache     │
//!  └───────────┘    └───────────┘    └───────────┘
//!                         ▲
//!                  ┌──────┴───────┐
//!                  │  Supervisor  │  restarts crashed workers
//!                  └──────────────┘
//! ```
//!
//! Workers are OS threads sharing nothing mutable: each owns its engine and
//! its own [`DirectoryCache`](crate::cache::DirectoryCache) over the template
//! directory. Their caches are refreshed only by broadcast.
//!
//! # Features
//!
//! - **Idle-pull dispatch**: one FIFO queue, the first idle worker takes the job
//! - **Broadcast**: fire-and-forget control messages, applied before the next job
//! - **Fault isolation**: a panicking job fails alone
//! - **Crash recovery**: crashed workers are replaced within a restart budget

mod dispatcher;
mod protocol;
mod worker;

use thiserror::Error;

pub use dispatcher::{Dispatcher, PoolOptions, PoolStats};
pub use protocol::{
    ControlMessage, ConversionJob, ConversionResult, TemplateSource, WorkerConstants,
};

/// Errors from the pool itself, as opposed to worker-reported results.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    /// The worker handling the job died before replying.
    #[error("worker crashed while handling the job")]
    WorkerCrashed {
        /// The worker, when known
        worker: Option<usize>,
    },

    /// The restart budget is spent and no worker is left.
    #[error("worker pool is degraded: no live workers")]
    Degraded,

    /// The pool is stopping or stopped.
    #[error("worker pool is shut down")]
    ShutDown,

    /// A worker thread could not be started.
    #[error("failed to start worker: {message}")]
    Spawn { message: String },
}
