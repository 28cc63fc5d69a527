//! In-process document backend
//!
//! Queries are matched by top-level field equality only. Every session opened
//! from one `MemoryBackend` sees the same data, so documents survive reconnects.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{Bson, Document, doc};
use tokio::sync::Mutex;
use tracing::debug;

use super::{Backend, DocumentCursor, Session};
use crate::command::Namespace;
use crate::error::StoreResult;

type Collections = HashMap<Namespace, Vec<Document>>;

/// Backend keeping every collection in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    data: Arc<Mutex<Collections>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents stored in a collection
    pub async fn count(&self, ns: &Namespace) -> usize {
        self.data.lock().await.get(ns).map(Vec::len).unwrap_or(0)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn connect(&self, address: &str) -> StoreResult<Box<dyn Session>> {
        debug!(%address, "MemoryBackend::connect: called");
        Ok(Box::new(MemorySession {
            data: self.data.clone(),
        }))
    }
}

struct MemorySession {
    data: Arc<Mutex<Collections>>,
}

fn matches(doc: &Document, query: &Document) -> bool {
    query.iter().all(|(field, value)| doc.get(field) == Some(value))
}

/// Copy of `doc` with `id` as its leading `_id` field
fn with_id(id: Bson, doc: &Document) -> Document {
    let mut out = doc! { "_id": id };
    for (field, value) in doc.iter().filter(|(k, _)| k.as_str() != "_id") {
        out.insert(field.clone(), value.clone());
    }
    out
}

#[async_trait]
impl Session for MemorySession {
    async fn insert(&self, ns: &Namespace, doc: &Document) -> StoreResult<()> {
        let mut data = self.data.lock().await;
        let docs = data.entry(ns.clone()).or_default();
        match doc.get("_id") {
            Some(id) => match docs.iter_mut().find(|d| d.get("_id") == Some(id)) {
                Some(existing) => *existing = doc.clone(),
                None => docs.push(doc.clone()),
            },
            None => docs.push(with_id(Bson::ObjectId(ObjectId::new()), doc)),
        }
        Ok(())
    }

    async fn upsert(&self, ns: &Namespace, query: &Document, doc: &Document) -> StoreResult<()> {
        let mut data = self.data.lock().await;
        let docs = data.entry(ns.clone()).or_default();
        match docs.iter_mut().find(|d| matches(d, query)) {
            Some(existing) => {
                let id = existing.get("_id").cloned();
                *existing = match (doc.get("_id"), id) {
                    (None, Some(id)) => with_id(id, doc),
                    _ => doc.clone(),
                };
            }
            None => {
                let id = doc
                    .get("_id")
                    .or_else(|| query.get("_id"))
                    .cloned()
                    .unwrap_or_else(|| Bson::ObjectId(ObjectId::new()));
                docs.push(with_id(id, doc));
            }
        }
        Ok(())
    }

    async fn remove(&self, ns: &Namespace, query: &Document) -> StoreResult<()> {
        let mut data = self.data.lock().await;
        if let Some(docs) = data.get_mut(ns) {
            if let Some(pos) = docs.iter().position(|d| matches(d, query)) {
                docs.remove(pos);
            }
        }
        Ok(())
    }

    async fn find(&self, ns: &Namespace, query: &Document) -> StoreResult<DocumentCursor> {
        let data = self.data.lock().await;
        let found: Vec<Document> = data
            .get(ns)
            .map(|docs| docs.iter().filter(|d| matches(d, query)).cloned().collect())
            .unwrap_or_default();
        Ok(futures::stream::iter(found.into_iter().map(Ok)).boxed())
    }
}
