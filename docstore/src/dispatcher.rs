//! Command dispatcher - the single writer to the database session
//!
//! Pulls commands off the queue one at a time and issues exactly one session
//! call per command. Any failure ends the loop so the connection manager can
//! replace the session. A failed mutating command goes to the back of the
//! backlog, behind every command that was waiting when it failed, so a write
//! that keeps failing cannot hold up later work. A failed find is answered
//! with the error and dropped.

use std::collections::VecDeque;
use std::sync::Arc;

use mongodb::bson::Document;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::backend::Session;
use crate::command::{Command, FindReply, Namespace};
use crate::error::StoreResult;
use crate::metrics::Counters;
use crate::stream::spawn_producer;

/// Why the command loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopExit {
    /// A command failed; the session must be replaced
    Failed,
    /// Shutdown was requested or every handle is gone
    Closed,
}

pub(crate) struct Dispatcher {
    rx: mpsc::Receiver<Command>,
    /// Commands taken off the queue to make room for a retry; served before the queue
    backlog: VecDeque<Command>,
    result_buffer: usize,
    counters: Arc<Counters>,
}

impl Dispatcher {
    pub(crate) fn new(rx: mpsc::Receiver<Command>, result_buffer: usize, counters: Arc<Counters>) -> Self {
        Self {
            rx,
            backlog: VecDeque::new(),
            result_buffer,
            counters,
        }
    }

    /// Run commands against `session` until one fails or the store closes
    pub(crate) async fn run(&mut self, session: &dyn Session, shutdown: &mut watch::Receiver<bool>) -> LoopExit {
        debug!(backlog = self.backlog.len(), "command_loop: started");

        loop {
            let Some(cmd) = self.next_command(shutdown).await else {
                debug!("command_loop: closed");
                return LoopExit::Closed;
            };

            debug!(kind = cmd.kind(), ns = %cmd.namespace(), "command_loop: executing");
            if let Err(exit) = self.execute(session, cmd).await {
                return exit;
            }
        }
    }

    /// The oldest backlog entry if any, else the next queued command
    async fn next_command(&mut self, shutdown: &mut watch::Receiver<bool>) -> Option<Command> {
        if *shutdown.borrow() {
            return None;
        }
        if let Some(cmd) = self.backlog.pop_front() {
            debug!(kind = cmd.kind(), ns = %cmd.namespace(), remaining = self.backlog.len(), "next_command: from backlog");
            return Some(cmd);
        }

        tokio::select! {
            biased;
            Ok(_) = shutdown.wait_for(|closed| *closed) => None,
            cmd = self.rx.recv() => cmd,
        }
    }

    async fn execute(&mut self, session: &dyn Session, cmd: Command) -> Result<(), LoopExit> {
        match cmd {
            Command::Insert { ns, doc, done } => {
                let result = session.insert(&ns, &doc).await;
                self.settle(result, Command::Insert { ns, doc, done })
            }
            Command::Upsert { ns, query, doc, done } => {
                let result = session.upsert(&ns, &query, &doc).await;
                self.settle(result, Command::Upsert { ns, query, doc, done })
            }
            Command::Remove { ns, query, done } => {
                let result = session.remove(&ns, &query).await;
                self.settle(result, Command::Remove { ns, query, done })
            }
            Command::Find { ns, query, reply } => self.find(session, ns, query, reply).await,
        }
    }

    /// Complete an applied mutation, or requeue it for the next session
    fn settle(&mut self, result: StoreResult<()>, cmd: Command) -> Result<(), LoopExit> {
        match result {
            Ok(()) => {
                Counters::bump(&self.counters.executed);
                cmd.complete();
                Ok(())
            }
            Err(e) => {
                warn!(
                    kind = cmd.kind(),
                    ns = %cmd.namespace(),
                    error = %e,
                    "Command failed, requeued for retry after reconnect"
                );
                Counters::bump(&self.counters.retried);
                self.requeue(cmd);
                Err(LoopExit::Failed)
            }
        }
    }

    /// Put a failed command behind everything already waiting
    ///
    /// With an empty backlog the queued commands are moved into it first. A
    /// non-empty backlog is only rotated, so it never holds more than one
    /// queue's worth of commands plus the retry.
    fn requeue(&mut self, cmd: Command) {
        if self.backlog.is_empty() {
            while let Ok(queued) = self.rx.try_recv() {
                self.backlog.push_back(queued);
            }
        }
        self.backlog.push_back(cmd);
    }

    async fn find(
        &mut self,
        session: &dyn Session,
        ns: Namespace,
        query: Document,
        reply: FindReply,
    ) -> Result<(), LoopExit> {
        match session.find(&ns, &query).await {
            Ok(cursor) => {
                Counters::bump(&self.counters.executed);
                Counters::bump(&self.counters.finds);
                let stream = spawn_producer(ns.clone(), cursor, self.result_buffer);
                if reply.send(Ok(stream)).is_err() {
                    debug!(%ns, "find: caller stopped waiting, dropping stream");
                }
                Ok(())
            }
            Err(e) => {
                warn!(%ns, error = %e, "Find failed, reporting to caller and reconnecting");
                let _ = reply.send(Err(e));
                Err(LoopExit::Failed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, DocumentCursor, MemoryBackend};
    use crate::error::StoreError;
    use async_trait::async_trait;
    use mongodb::bson::doc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::oneshot;

    /// Session whose calls fail while `broken` is set; upserts also fail with `reject_upserts`
    struct BrokenSession {
        inner: Box<dyn Session>,
        broken: AtomicBool,
        reject_upserts: bool,
    }

    impl BrokenSession {
        fn check(&self) -> StoreResult<()> {
            if self.broken.load(Ordering::SeqCst) {
                Err(StoreError::Operation("socket closed".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl Session for BrokenSession {
        async fn insert(&self, ns: &Namespace, doc: &Document) -> StoreResult<()> {
            self.check()?;
            self.inner.insert(ns, doc).await
        }

        async fn upsert(&self, ns: &Namespace, query: &Document, doc: &Document) -> StoreResult<()> {
            self.check()?;
            if self.reject_upserts {
                return Err(StoreError::Operation("cannot modify _id".to_string()));
            }
            self.inner.upsert(ns, query, doc).await
        }

        async fn remove(&self, ns: &Namespace, query: &Document) -> StoreResult<()> {
            self.check()?;
            self.inner.remove(ns, query).await
        }

        async fn find(&self, ns: &Namespace, query: &Document) -> StoreResult<DocumentCursor> {
            self.check()?;
            self.inner.find(ns, query).await
        }
    }

    async fn session(backend: &MemoryBackend, broken: bool) -> BrokenSession {
        BrokenSession {
            inner: backend.connect("memory://").await.unwrap(),
            broken: AtomicBool::new(broken),
            reject_upserts: false,
        }
    }

    fn dispatcher() -> (mpsc::Sender<Command>, Dispatcher) {
        let (tx, rx) = mpsc::channel(8);
        (tx, Dispatcher::new(rx, 4, Arc::new(Counters::default())))
    }

    fn insert(amount: i32) -> Command {
        Command::Insert {
            ns: Namespace::new("shop", "orders"),
            doc: doc! { "amount": amount },
            done: None,
        }
    }

    #[tokio::test]
    async fn test_runs_commands_until_closed() {
        let backend = MemoryBackend::new();
        let session = session(&backend, false).await;
        let (tx, mut dispatcher) = dispatcher();
        let (_shutdown_tx, mut shutdown) = watch::channel(false);

        tx.send(insert(1)).await.unwrap();
        tx.send(insert(2)).await.unwrap();
        drop(tx);

        assert_eq!(dispatcher.run(&session, &mut shutdown).await, LoopExit::Closed);
        assert_eq!(backend.count(&Namespace::new("shop", "orders")).await, 2);
        assert_eq!(dispatcher.counters.snapshot().executed, 2);
    }

    #[tokio::test]
    async fn test_failed_insert_is_requeued_behind_waiting_commands() {
        let backend = MemoryBackend::new();
        let (tx, mut dispatcher) = dispatcher();
        let (_shutdown_tx, mut shutdown) = watch::channel(false);

        tx.send(insert(1)).await.unwrap();
        tx.send(insert(2)).await.unwrap();

        let broken = session(&backend, true).await;
        assert_eq!(dispatcher.run(&broken, &mut shutdown).await, LoopExit::Failed);
        assert_eq!(dispatcher.backlog.len(), 2);
        assert_eq!(backend.count(&Namespace::new("shop", "orders")).await, 0);

        drop(tx);
        let healthy = session(&backend, false).await;
        assert_eq!(dispatcher.run(&healthy, &mut shutdown).await, LoopExit::Closed);

        let mut cursor = healthy.find(&Namespace::new("shop", "orders"), &doc! {}).await.unwrap();
        let mut amounts = Vec::new();
        while let Some(doc) = futures::StreamExt::next(&mut cursor).await {
            amounts.push(doc.unwrap().get_i32("amount").unwrap());
        }
        assert_eq!(amounts, vec![2, 1]);
        assert_eq!(dispatcher.counters.snapshot().retried, 1);
    }

    #[tokio::test]
    async fn test_write_that_always_fails_does_not_block_later_commands() {
        let backend = MemoryBackend::new();
        let (tx, mut dispatcher) = dispatcher();
        let (_shutdown_tx, mut shutdown) = watch::channel(false);
        let mut session = session(&backend, false).await;
        session.reject_upserts = true;

        tx.send(Command::Upsert {
            ns: Namespace::new("shop", "orders"),
            query: doc! { "_id": 1 },
            doc: doc! { "_id": 2 },
            done: None,
        })
        .await
        .unwrap();
        let (done, mut done_rx) = oneshot::channel();
        tx.send(Command::Insert {
            ns: Namespace::new("shop", "orders"),
            doc: doc! { "amount": 7 },
            done: Some(done),
        })
        .await
        .unwrap();

        // Each failed attempt ends the loop, as a reconnect would
        for _ in 0..3 {
            assert_eq!(dispatcher.run(&session, &mut shutdown).await, LoopExit::Failed);
            if done_rx.try_recv().is_ok() {
                break;
            }
        }

        assert_eq!(backend.count(&Namespace::new("shop", "orders")).await, 1);
        assert_eq!(dispatcher.backlog.len(), 1);
        assert_eq!(dispatcher.backlog[0].kind(), "upsert");
    }

    #[tokio::test]
    async fn test_failed_find_replies_error_and_is_not_retried() {
        let backend = MemoryBackend::new();
        let (tx, mut dispatcher) = dispatcher();
        let (_shutdown_tx, mut shutdown) = watch::channel(false);

        let (reply, reply_rx) = oneshot::channel();
        tx.send(Command::Find {
            ns: Namespace::new("shop", "orders"),
            query: doc! {},
            reply,
        })
        .await
        .unwrap();

        let broken = session(&backend, true).await;
        assert_eq!(dispatcher.run(&broken, &mut shutdown).await, LoopExit::Failed);
        assert!(matches!(reply_rx.await.unwrap(), Err(StoreError::Operation(_))));
        assert!(dispatcher.backlog.is_empty());
    }

    #[tokio::test]
    async fn test_completion_fires_after_apply() {
        let backend = MemoryBackend::new();
        let session = session(&backend, false).await;
        let (tx, mut dispatcher) = dispatcher();
        let (_shutdown_tx, mut shutdown) = watch::channel(false);

        let (done, done_rx) = oneshot::channel();
        tx.send(Command::Remove {
            ns: Namespace::new("shop", "orders"),
            query: doc! { "amount": 1 },
            done: Some(done),
        })
        .await
        .unwrap();
        drop(tx);

        dispatcher.run(&session, &mut shutdown).await;
        assert!(done_rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_loop() {
        let backend = MemoryBackend::new();
        let session = session(&backend, false).await;
        let (_tx, mut dispatcher) = dispatcher();
        let (shutdown_tx, mut shutdown) = watch::channel(false);

        shutdown_tx.send_replace(true);
        assert_eq!(dispatcher.run(&session, &mut shutdown).await, LoopExit::Closed);
    }
}
