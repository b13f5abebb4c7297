//! Pepflow - job and chunk orchestration for distributed spectra searches.
//!
//! A search job's input file is split into chunks, each chunk is searched on
//! a worker node and the per-chunk results are bundled into one archive. The
//! crate holds the state machine and control loops that drive that pipeline
//! over a priority message queue with visibility timeouts.
//!
//! # Core Concepts
//!
//! - **Job**: A [`Job`] moves through [`JobStatus`] from `Pending` to
//!   `Complete`; every transition is forward-only.
//!
//! - **Chunk**: A [`Chunk`] is one slice of a job's input, identified by its
//!   [`ChunkKey`] and timed by the node that searched it.
//!
//! - **Messages**: [`HeadMessage`] and [`NodeMessage`] are the JSON bodies
//!   exchanged over the `head` and `node` queues of a [`MessageQueue`].
//!
//! - **Dispatcher**: The head-side [`Dispatcher`](runtime::Dispatcher)
//!   applies state changes and periodically sweeps for stuck jobs.
//!
//! - **Node worker**: The [`NodeWorker`](runtime::NodeWorker) splits inputs,
//!   runs the [`Searcher`](runtime::Searcher) on chunks and packs results.
//!
//! # Feature Flags
//!
//! - `postgres` - PostgreSQL-backed message queue via sqlx
//! - `metrics` - Prometheus metrics support

/// Chunk records, chunk keys and completion checks.
pub mod chunk;

/// Configuration for message policies, thresholds, logging and persistence.
pub mod config;

/// Error types and retry classification.
pub mod error;

/// Core job definitions: identifiers, status machine and validation.
pub mod job;

/// Fetched message deliveries and their identifiers.
pub mod lease;

/// Job lifecycle operations shared by the dispatcher and submitters.
pub mod lifecycle;

/// Typed queue messages and their JSON encoding.
pub mod message;

#[cfg(feature = "metrics")]
/// Prometheus metrics.
pub mod metrics;

/// Worker node registry records.
pub mod node;

/// Object storage abstraction and key layout.
pub mod object_store;

#[cfg(feature = "postgres")]
/// PostgreSQL persistence implementation.
pub mod persistence;

/// Queue abstraction and typed outbox.
pub mod queue;

/// Error reporting and statistics submission seams.
pub mod reporter;

/// Control loops, builders and shutdown signaling.
pub mod runtime;

/// Per-searcher parameter sets.
pub mod search_config;

/// Record-aligned splitting of spectra files.
pub mod splitter;

/// Chunk timing aggregates and job statistics.
pub mod stats;

/// Entity persistence abstraction.
pub mod store;

/// Tracing setup and instrumentation helpers.
pub mod telemetry;

/// Node-side splitting of a job's input into chunks.
pub mod unpacker;

pub use chunk::*;
pub use config::*;
pub use error::{PipelineError, is_non_retryable, is_not_found};
pub use job::*;
pub use lease::*;
pub use message::*;
pub use queue::*;
