/// PostgreSQL-backed message queue.
///
/// This module provides `PostgresMessageQueue`, a durable implementation of
/// the [`MessageQueue`](crate::queue::MessageQueue) trait.
pub mod postgres;

pub use postgres::PostgresMessageQueue;
