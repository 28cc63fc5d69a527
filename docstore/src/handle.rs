//! DocStore - handle to the connection manager task
//!
//! Cloneable; every clone feeds the same bounded queue. Mutating operations
//! are fire-and-forget once enqueued. Find fails fast while disconnected and
//! otherwise waits for the dispatcher's reply.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use mongodb::bson::Document;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{self, Backend};
use crate::command::{Command, Namespace};
use crate::config::StoreConfig;
use crate::connection::ConnectionManager;
use crate::dispatcher::Dispatcher;
use crate::error::{StoreError, StoreResult};
use crate::metrics::{Counters, StoreMetrics};
use crate::stream::ResultStream;

/// Handle to send commands to the store
#[derive(Clone)]
pub struct DocStore {
    tx: mpsc::Sender<Command>,
    connected: Arc<AtomicBool>,
    counters: Arc<Counters>,
    shutdown: Arc<watch::Sender<bool>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl DocStore {
    /// Spawn the store, picking the backend from the configured address
    pub fn spawn(config: StoreConfig) -> Self {
        let backend = backend::for_address(&config.address);
        Self::spawn_with_backend(config, backend)
    }

    /// Spawn the store on an explicit backend
    pub fn spawn_with_backend(config: StoreConfig, backend: Arc<dyn Backend>) -> Self {
        debug!(address = %config.address, queue_capacity = config.queue_capacity, "spawn_with_backend: called");
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        let dispatcher = Dispatcher::new(rx, config.result_buffer, counters.clone());
        let manager = ConnectionManager::new(
            backend,
            config,
            connected.clone(),
            counters.clone(),
            dispatcher,
            shutdown_rx,
        );
        let task = tokio::spawn(manager.run());

        info!("DocStore spawned");

        Self {
            tx,
            connected,
            counters,
            shutdown: Arc::new(shutdown_tx),
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Queue an insert; returns once the command is enqueued
    pub async fn insert(&self, db: &str, collection: &str, doc: Document) -> StoreResult<()> {
        debug!(%db, %collection, "insert: called");
        self.enqueue(Command::Insert {
            ns: Namespace::new(db, collection),
            doc,
            done: None,
        })
        .await
    }

    /// Queue an insert and wait until it has been applied
    pub async fn insert_confirmed(&self, db: &str, collection: &str, doc: Document) -> StoreResult<()> {
        debug!(%db, %collection, "insert_confirmed: called");
        let (done, done_rx) = oneshot::channel();
        self.enqueue(Command::Insert {
            ns: Namespace::new(db, collection),
            doc,
            done: Some(done),
        })
        .await?;
        done_rx.await.map_err(|_| StoreError::Closed)
    }

    /// Queue an upsert: replace the first match of `query`, or insert `doc`
    pub async fn upsert(&self, db: &str, collection: &str, query: Document, doc: Document) -> StoreResult<()> {
        debug!(%db, %collection, "upsert: called");
        self.enqueue(Command::Upsert {
            ns: Namespace::new(db, collection),
            query,
            doc,
            done: None,
        })
        .await
    }

    pub async fn upsert_confirmed(
        &self,
        db: &str,
        collection: &str,
        query: Document,
        doc: Document,
    ) -> StoreResult<()> {
        debug!(%db, %collection, "upsert_confirmed: called");
        let (done, done_rx) = oneshot::channel();
        self.enqueue(Command::Upsert {
            ns: Namespace::new(db, collection),
            query,
            doc,
            done: Some(done),
        })
        .await?;
        done_rx.await.map_err(|_| StoreError::Closed)
    }

    /// Queue a remove of the first document matching `query`
    pub async fn remove(&self, db: &str, collection: &str, query: Document) -> StoreResult<()> {
        debug!(%db, %collection, "remove: called");
        self.enqueue(Command::Remove {
            ns: Namespace::new(db, collection),
            query,
            done: None,
        })
        .await
    }

    pub async fn remove_confirmed(&self, db: &str, collection: &str, query: Document) -> StoreResult<()> {
        debug!(%db, %collection, "remove_confirmed: called");
        let (done, done_rx) = oneshot::channel();
        self.enqueue(Command::Remove {
            ns: Namespace::new(db, collection),
            query,
            done: Some(done),
        })
        .await?;
        done_rx.await.map_err(|_| StoreError::Closed)
    }

    /// Find documents matching `query`
    ///
    /// Fails with `NotConnected` without enqueueing anything when no session
    /// is up. Otherwise waits behind every earlier command for the reply.
    pub async fn find(&self, db: &str, collection: &str, query: Document) -> StoreResult<ResultStream> {
        debug!(%db, %collection, "find: called");
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        if !self.is_connected() {
            debug!(%db, %collection, "find: not connected");
            return Err(StoreError::NotConnected);
        }

        let (reply, reply_rx) = oneshot::channel();
        self.enqueue(Command::Find {
            ns: Namespace::new(db, collection),
            query,
            reply,
        })
        .await?;

        reply_rx.await.map_err(|_| StoreError::ChannelError)?
    }

    /// Whether a database session is currently up
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Commands waiting in the queue
    pub fn queue_depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn metrics(&self) -> StoreMetrics {
        self.counters.snapshot()
    }

    /// Stop the manager task and wait for it to finish
    ///
    /// Commands still queued are dropped. Every later operation fails with
    /// `Closed`. Calling close again is a no-op.
    pub async fn close(&self) {
        debug!("close: called");
        self.shutdown.send_replace(true);

        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Connection manager task ended abnormally");
            }
            info!("DocStore closed");
        }
    }

    fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn enqueue(&self, cmd: Command) -> StoreResult<()> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        self.tx.send(cmd).await.map_err(|_| StoreError::Closed)
    }
}
