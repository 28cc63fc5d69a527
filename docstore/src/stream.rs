//! Find result streams
//!
//! Each successful find gets its own producer task that walks the database
//! cursor and pushes documents into a bounded channel. The consumer holds the
//! receiving end as a [`ResultStream`]. Dropping the stream closes the channel,
//! which stops the producer and drops the cursor.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use mongodb::bson::Document;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::backend::DocumentCursor;
use crate::command::Namespace;

/// Lazy, one-shot sequence of documents produced for a single find
#[derive(Debug)]
pub struct ResultStream {
    rx: mpsc::Receiver<Document>,
}

impl ResultStream {
    /// Next document, or None once the producer has finished
    pub async fn next_document(&mut self) -> Option<Document> {
        self.rx.recv().await
    }

    /// Drain every remaining document
    pub async fn collect_all(&mut self) -> Vec<Document> {
        let mut docs = Vec::new();
        while let Some(doc) = self.rx.recv().await {
            docs.push(doc);
        }
        docs
    }
}

impl Stream for ResultStream {
    type Item = Document;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Spawn the producer for a cursor and return the consumer side
pub(crate) fn spawn_producer(ns: Namespace, mut cursor: DocumentCursor, buffer: usize) -> ResultStream {
    let (tx, rx) = mpsc::channel(buffer.max(1));

    tokio::spawn(async move {
        let mut sent = 0usize;
        while let Some(item) = cursor.next().await {
            match item {
                Ok(doc) => {
                    if tx.send(doc).await.is_err() {
                        debug!(%ns, sent, "producer: stream dropped by consumer, closing cursor");
                        return;
                    }
                    sent += 1;
                }
                Err(e) => {
                    warn!(%ns, sent, error = %e, "producer: cursor failed, closing stream early");
                    return;
                }
            }
        }
        debug!(%ns, sent, "producer: cursor exhausted");
    });

    ResultStream { rx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use mongodb::bson::doc;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn cursor_of(docs: Vec<Document>) -> DocumentCursor {
        futures::stream::iter(docs.into_iter().map(Ok)).boxed()
    }

    #[tokio::test]
    async fn test_stream_yields_in_cursor_order_then_stays_empty() {
        let docs = vec![doc! { "n": 1 }, doc! { "n": 2 }, doc! { "n": 3 }];
        let mut stream = spawn_producer(Namespace::new("db", "c"), cursor_of(docs), 2);

        let drained = stream.collect_all().await;
        let ns: Vec<i32> = drained.iter().map(|d| d.get_i32("n").unwrap()).collect();
        assert_eq!(ns, vec![1, 2, 3]);

        assert!(stream.collect_all().await.is_empty());
        assert!(stream.next_document().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_closes_on_cursor_error() {
        let items: Vec<Result<Document, StoreError>> = vec![
            Ok(doc! { "n": 1 }),
            Err(StoreError::Operation("cursor killed".to_string())),
            Ok(doc! { "n": 2 }),
        ];
        let cursor = futures::stream::iter(items).boxed();
        let mut stream = spawn_producer(Namespace::new("db", "c"), cursor, 4);

        let drained = stream.collect_all().await;
        assert_eq!(drained.len(), 1);
    }

    #[tokio::test]
    async fn test_dropping_stream_stops_producer() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let cursor = futures::stream::iter(0..1000)
            .map(move |n| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, StoreError>(doc! { "n": n })
            })
            .boxed();

        let mut stream = spawn_producer(Namespace::new("db", "c"), cursor, 1);
        assert!(stream.next().await.is_some());
        drop(stream);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(pulled.load(Ordering::SeqCst) < 1000);
    }
}
