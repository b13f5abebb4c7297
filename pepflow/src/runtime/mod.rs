/// Builders wiring collaborators into the control loops.
pub mod builder;
/// Head-side loop: state changes and the stuck sweep.
pub mod dispatcher;
/// Graceful shutdown signaling.
pub mod shutdown;
/// Node-side loop: unpack, process and pack requests.
pub mod worker;

pub use builder::{DispatcherBuilder, NodeWorkerBuilder};
pub use dispatcher::{Dispatcher, PollOutcome, SweepReport};
pub use shutdown::{ShutdownToken, install_signal_handler};
pub use worker::{DispatchStatus, NodeWorker, Searcher};
