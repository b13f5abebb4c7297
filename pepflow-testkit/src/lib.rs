//! In-memory collaborators, fixtures and a wired pipeline for testing
//! pepflow without external services.

mod fixtures;
mod harness;
mod mock;
mod objects;
mod queue;
mod store;

pub use fixtures::*;
pub use harness::TestPipeline;
pub use mock::*;
pub use objects::InMemoryObjectStore;
pub use queue::{InMemoryMessageQueue, SentRecord};
pub use store::InMemoryEntityStore;
