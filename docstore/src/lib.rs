//! docstore - serialized document-database access with automatic reconnect
//!
//! A single background task owns the database session. Callers talk to it
//! through a cloneable [`DocStore`] handle that feeds a bounded command queue;
//! commands run one at a time in arrival order. When a command fails the
//! session is replaced and the failed write runs again first, so writes
//! survive outages without callers having to retry.
//!
//! Find results come back as a [`ResultStream`] filled by a producer task that
//! runs alongside the dispatcher.

pub mod backend;
pub mod command;
pub mod config;
mod connection;
mod dispatcher;
pub mod error;
mod handle;
mod metrics;
pub mod stream;

pub use backend::{Backend, DocumentCursor, MemoryBackend, MongoBackend, Session};
pub use command::Namespace;
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use handle::DocStore;
pub use metrics::StoreMetrics;
pub use stream::ResultStream;
