//! MongoDB backend

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use mongodb::bson::{Document, doc};
use mongodb::options::ReplaceOptions;
use mongodb::{Client, Collection};
use tracing::{debug, info};

use super::{Backend, DocumentCursor, Session};
use crate::command::Namespace;
use crate::error::{StoreError, StoreResult};

/// Opens sessions against a MongoDB deployment
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoBackend;

/// Turn a configured address into a connection string; bare hosts get the `mongodb://` scheme
pub fn connection_uri(address: &str) -> String {
    if address.starts_with("mongodb://") || address.starts_with("mongodb+srv://") {
        address.to_string()
    } else {
        format!("mongodb://{}", address)
    }
}

#[async_trait]
impl Backend for MongoBackend {
    async fn connect(&self, address: &str) -> StoreResult<Box<dyn Session>> {
        let uri = connection_uri(address);
        debug!(%uri, "MongoBackend::connect: called");

        let client = Client::with_uri_str(&uri)
            .await
            .map_err(|e| StoreError::Connect(e.to_string()))?;

        // Client construction is lazy, so ping the server before handing out a session
        client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| StoreError::Connect(e.to_string()))?;

        info!(%uri, "Connected to MongoDB");
        Ok(Box::new(MongoSession { client }))
    }
}

struct MongoSession {
    client: Client,
}

impl MongoSession {
    fn collection(&self, ns: &Namespace) -> Collection<Document> {
        self.client.database(&ns.db).collection::<Document>(&ns.collection)
    }

    fn upsert_options() -> ReplaceOptions {
        ReplaceOptions::builder().upsert(true).build()
    }
}

#[async_trait]
impl Session for MongoSession {
    async fn insert(&self, ns: &Namespace, doc: &Document) -> StoreResult<()> {
        let collection = self.collection(ns);
        match doc.get("_id") {
            Some(id) => {
                collection
                    .replace_one(doc! { "_id": id.clone() }, doc, Self::upsert_options())
                    .await?;
            }
            None => {
                collection.insert_one(doc, None).await?;
            }
        }
        Ok(())
    }

    async fn upsert(&self, ns: &Namespace, query: &Document, doc: &Document) -> StoreResult<()> {
        let result = self
            .collection(ns)
            .replace_one(query.clone(), doc, Self::upsert_options())
            .await?;
        debug!(%ns, matched = result.matched_count, upserted = result.upserted_id.is_some(), "MongoSession::upsert: done");
        Ok(())
    }

    async fn remove(&self, ns: &Namespace, query: &Document) -> StoreResult<()> {
        let result = self.collection(ns).delete_one(query.clone(), None).await?;
        debug!(%ns, deleted = result.deleted_count, "MongoSession::remove: done");
        Ok(())
    }

    async fn find(&self, ns: &Namespace, query: &Document) -> StoreResult<DocumentCursor> {
        let cursor = self.collection(ns).find(query.clone(), None).await?;
        Ok(cursor.map_err(StoreError::from).boxed())
    }

    async fn close(&self) {
        debug!("MongoSession::close: called");
        // Open cursors belong to result streams the caller may still hold
        self.client.clone().shutdown_immediate().await;
    }
}
