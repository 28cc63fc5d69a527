//! Connection manager - owns the database session
//!
//! Runs on its own task: open a session, publish the connected flag, hand the
//! session to the dispatcher until its loop exits, then tear everything down
//! and start over. Connect failures are logged and retried forever; they are
//! never reported to callers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::config::StoreConfig;
use crate::dispatcher::{Dispatcher, LoopExit};
use crate::metrics::Counters;

pub(crate) struct ConnectionManager {
    backend: Arc<dyn Backend>,
    config: StoreConfig,
    connected: Arc<AtomicBool>,
    counters: Arc<Counters>,
    dispatcher: Dispatcher,
    shutdown: watch::Receiver<bool>,
}

impl ConnectionManager {
    pub(crate) fn new(
        backend: Arc<dyn Backend>,
        config: StoreConfig,
        connected: Arc<AtomicBool>,
        counters: Arc<Counters>,
        dispatcher: Dispatcher,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            backend,
            config,
            connected,
            counters,
            dispatcher,
            shutdown,
        }
    }

    /// Connect, serve, reconnect; returns only once the store is closed
    pub(crate) async fn run(mut self) {
        info!(address = %self.config.address, "ConnectionManager started");
        let base = self.config.reconnect_interval();
        let max = self.config.max_reconnect_interval();
        let mut delay = base;

        loop {
            Counters::bump(&self.counters.connect_attempts);
            debug!(address = %self.config.address, "run: connecting");

            let attempt = tokio::select! {
                biased;
                Ok(_) = self.shutdown.wait_for(|closed| *closed) => break,
                attempt = self.backend.connect(&self.config.address) => attempt,
            };

            let session = match attempt {
                Ok(session) => session,
                Err(e) => {
                    error!(
                        address = %self.config.address,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Error connecting to database"
                    );
                    if self.pause(delay).await {
                        break;
                    }
                    delay = (delay * 2).min(max);
                    continue;
                }
            };

            delay = base;
            Counters::bump(&self.counters.connects);
            self.connected.store(true, Ordering::Release);
            info!(address = %self.config.address, "Database session established");

            let exit = self.dispatcher.run(session.as_ref(), &mut self.shutdown).await;

            self.connected.store(false, Ordering::Release);
            // Teardown may wait on open result streams; it must not hold up the next session
            tokio::spawn(async move {
                session.close().await;
                debug!("run: previous session closed");
            });

            match exit {
                LoopExit::Closed => break,
                LoopExit::Failed => {
                    warn!(address = %self.config.address, "Session failed, reconnecting");
                    if self.pause(base).await {
                        break;
                    }
                }
            }
        }

        self.connected.store(false, Ordering::Release);
        info!("ConnectionManager stopped");
    }

    /// Sleep for `delay`; true when shutdown was requested meanwhile
    async fn pause(&mut self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            Ok(_) = self.shutdown.wait_for(|closed| *closed) => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }
}
