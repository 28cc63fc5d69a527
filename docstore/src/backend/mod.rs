//! Database backends
//!
//! A [`Backend`] opens sessions; a [`Session`] is one live connection that the
//! dispatcher issues exactly one call against per command. The MongoDB backend
//! is the production one; the memory backend keeps documents in process and
//! is selected with a `memory://` address.

mod memory;
mod mongo;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use mongodb::bson::Document;

use crate::command::Namespace;
use crate::error::StoreResult;

pub use memory::MemoryBackend;
pub use mongo::MongoBackend;

/// Address prefix that selects the in-process backend
pub const MEMORY_SCHEME: &str = "memory://";

/// Documents produced by a find, in cursor order
pub type DocumentCursor = BoxStream<'static, StoreResult<Document>>;

/// Opens sessions to a database
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Open a new session; failures are connectivity errors
    async fn connect(&self, address: &str) -> StoreResult<Box<dyn Session>>;
}

/// One live connection to the database
///
/// Insert is idempotent on `_id`: a document that carries one replaces any
/// stored document with the same id instead of failing as a duplicate.
#[async_trait]
pub trait Session: Send + Sync {
    async fn insert(&self, ns: &Namespace, doc: &Document) -> StoreResult<()>;

    /// Replace the first document matching `query`, or insert `doc` when none matches
    async fn upsert(&self, ns: &Namespace, query: &Document, doc: &Document) -> StoreResult<()>;

    /// Remove the first document matching `query`; no match is not an error
    async fn remove(&self, ns: &Namespace, query: &Document) -> StoreResult<()>;

    async fn find(&self, ns: &Namespace, query: &Document) -> StoreResult<DocumentCursor>;

    /// Release the session
    async fn close(&self) {}
}

/// Pick the backend for an address
pub fn for_address(address: &str) -> Arc<dyn Backend> {
    if address.starts_with(MEMORY_SCHEME) {
        Arc::new(MemoryBackend::new())
    } else {
        Arc::new(MongoBackend)
    }
}
