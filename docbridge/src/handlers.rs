//! Database processors
//!
//! One processor per topic under a configurable prefix (`db::insert`,
//! `db::find`, ...). Each reads its parameters from the event payload, runs
//! the operation through the store and writes the outcome back into the
//! payload. Bad parameters and store errors become error headers; the event is
//! acknowledged either way.

use std::sync::Arc;

use async_trait::async_trait;
use docstore::DocStore;
use futures::StreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{Document, doc};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::bus::{Event, Processor, ProcessorRegistry};
use crate::convert::{document_to_json, json_to_document};

pub const DEFAULT_TOPIC_PREFIX: &str = "db";

const NEED_DOC: &str = "need db, collection and doc as parameters";
const NEED_ID: &str = "need db, collection and id as parameters";
const NEED_ID_AND_DOC: &str = "need db, collection, id and doc as parameters";
const NEED_QUERY: &str = "need db, collection and query as parameters";

/// Operation a processor performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbOp {
    Insert,
    Upsert,
    Remove,
    Find,
    Get,
}

impl DbOp {
    pub const ALL: [DbOp; 5] = [DbOp::Insert, DbOp::Upsert, DbOp::Remove, DbOp::Find, DbOp::Get];

    pub fn name(&self) -> &'static str {
        match self {
            DbOp::Insert => "insert",
            DbOp::Upsert => "upsert",
            DbOp::Remove => "remove",
            DbOp::Find => "find",
            DbOp::Get => "get",
        }
    }

    /// Topic this operation is served on
    pub fn topic(&self, prefix: &str) -> String {
        format!("{}::{}", prefix, self.name())
    }
}

/// Register all database processors under `prefix`
pub fn register_db_processors(registry: &mut ProcessorRegistry, store: DocStore, prefix: &str) {
    debug!(%prefix, "register_db_processors: called");
    for op in DbOp::ALL {
        registry.register_processor(
            op.topic(prefix),
            Arc::new(DbProcessor {
                store: store.clone(),
                op,
            }),
        );
    }
}

/// Processor running one database operation
pub struct DbProcessor {
    store: DocStore,
    op: DbOp,
}

impl DbProcessor {
    pub fn new(store: DocStore, op: DbOp) -> Self {
        Self { store, op }
    }
}

#[async_trait]
impl Processor for DbProcessor {
    async fn process(&self, event: &mut Event) {
        debug!(id = %event.id, op = self.op.name(), "process: called");
        let outcome = match self.op {
            DbOp::Insert => self.insert(event).await,
            DbOp::Upsert => self.upsert(event).await,
            DbOp::Remove => self.remove(event).await,
            DbOp::Find => self.find(event).await,
            DbOp::Get => self.get(event).await,
        };
        if let Err(message) = outcome {
            warn!(id = %event.id, op = self.op.name(), %message, "Event processing failed");
            event.add_error(message);
        }
    }
}

/// Payload fields shared by every operation
struct Target {
    db: String,
    collection: String,
}

fn target(event: &Event) -> Option<Target> {
    Some(Target {
        db: event.get_str("db")?.to_string(),
        collection: event.get_str("collection")?.to_string(),
    })
}

fn object_param(event: &Event, key: &str) -> Option<Map<String, Value>> {
    event.get_object(key).cloned()
}

/// `{"_id": <ObjectId>}` for the event's `id` parameter
fn id_query(id: &str) -> Result<Document, String> {
    let oid = ObjectId::parse_str(id).map_err(|e| format!("invalid id {id}: {e}"))?;
    Ok(doc! { "_id": oid })
}

impl DbProcessor {
    async fn insert(&self, event: &mut Event) -> Result<(), String> {
        let (Some(t), Some(object)) = (target(event), object_param(event, "doc")) else {
            return Err(NEED_DOC.to_string());
        };

        let oid = ObjectId::new();
        let mut doc = json_to_document(&object).map_err(|e| e.to_string())?;
        doc.insert("_id", oid);

        self.store
            .insert(&t.db, &t.collection, doc)
            .await
            .map_err(|e| e.to_string())?;
        event.set("id", Value::String(oid.to_hex()));
        Ok(())
    }

    async fn upsert(&self, event: &mut Event) -> Result<(), String> {
        let (Some(t), Some(id), Some(object)) = (
            target(event),
            event.get_str("id").map(str::to_string),
            object_param(event, "doc"),
        ) else {
            return Err(NEED_ID_AND_DOC.to_string());
        };

        let query = id_query(&id)?;
        let doc = json_to_document(&object).map_err(|e| e.to_string())?;

        self.store
            .upsert(&t.db, &t.collection, query, doc)
            .await
            .map_err(|e| e.to_string())?;
        event.set("success", Value::Bool(true));
        Ok(())
    }

    async fn remove(&self, event: &mut Event) -> Result<(), String> {
        let (Some(t), Some(id)) = (target(event), event.get_str("id").map(str::to_string)) else {
            return Err(NEED_ID.to_string());
        };

        let query = id_query(&id)?;
        self.store
            .remove(&t.db, &t.collection, query)
            .await
            .map_err(|e| e.to_string())?;
        event.set("success", Value::Bool(true));
        Ok(())
    }

    async fn find(&self, event: &mut Event) -> Result<(), String> {
        let (Some(t), Some(object)) = (target(event), object_param(event, "query")) else {
            return Err(NEED_QUERY.to_string());
        };

        let query = json_to_document(&object).map_err(|e| e.to_string())?;
        let mut stream = self
            .store
            .find(&t.db, &t.collection, query)
            .await
            .map_err(|e| e.to_string())?;

        let docs: Vec<Value> = stream.collect_all().await.iter().map(document_to_json).collect();
        debug!(id = %event.id, count = docs.len(), "find: collected results");
        event.set("docs", Value::Array(docs));
        Ok(())
    }

    async fn get(&self, event: &mut Event) -> Result<(), String> {
        let (Some(t), Some(id)) = (target(event), event.get_str("id").map(str::to_string)) else {
            return Err(NEED_ID.to_string());
        };

        let query = id_query(&id)?;
        let mut stream = self
            .store
            .find(&t.db, &t.collection, query)
            .await
            .map_err(|e| e.to_string())?;

        // Dropping the stream after the first document stops its producer
        let doc = stream.next().await.map(|d| document_to_json(&d)).unwrap_or(Value::Null);
        event.set("doc", doc);
        Ok(())
    }
}
