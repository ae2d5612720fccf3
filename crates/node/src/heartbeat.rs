//! Liveness reporting to the dispatcher.
//!
//! [`HeartbeatReporter`] sends one [`HeartbeatMessage`] per interval through a
//! [`HeartbeatSink`], from the end of bootstrap until its cancellation token
//! fires. The first beat goes out immediately. A failed beat is logged and
//! counted; the next tick is the retry. Nothing a sink returns can stop the
//! loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::NodeSettings;
use crate::shutdown::ManagedResource;

/// Transient reporting failure. Never fatal.
#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error("heartbeat transport error: {0}")]
    Transport(String),

    #[error("dispatcher rejected heartbeat with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Who this node is, as told to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub node_id: String,
    pub endpoint: String,
    pub model_name: String,
}

impl NodeIdentity {
    pub fn from_settings(settings: &NodeSettings) -> Self {
        Self {
            node_id: settings.node_id.clone(),
            endpoint: settings.announce_addr.clone(),
            model_name: settings.model_name.clone(),
        }
    }
}

/// Body of `POST /heartbeat`. Carries no acknowledgement state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    pub node_id: String,
    pub endpoint: String,
    pub model_name: String,
    /// RFC 3339, UTC.
    pub timestamp: String,
}

impl HeartbeatMessage {
    pub fn now(identity: &NodeIdentity) -> Self {
        Self {
            node_id: identity.node_id.clone(),
            endpoint: identity.endpoint.clone(),
            model_name: identity.model_name.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[async_trait]
pub trait HeartbeatSink: Send + Sync {
    async fn send(&self, message: &HeartbeatMessage) -> Result<(), HeartbeatError>;
}

#[derive(Debug, Default)]
pub struct HeartbeatStats {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    consecutive_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeartbeatSnapshot {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
}

impl HeartbeatStats {
    fn record_success(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Returns the consecutive failure count including this one.
    fn record_failure(&self) -> u64 {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> HeartbeatSnapshot {
        HeartbeatSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
        }
    }
}

pub struct HeartbeatReporter {
    sink: Arc<dyn HeartbeatSink>,
    identity: NodeIdentity,
    interval: Duration,
    stats: Arc<HeartbeatStats>,
}

impl HeartbeatReporter {
    pub fn new(sink: Arc<dyn HeartbeatSink>, identity: NodeIdentity, interval: Duration) -> Self {
        Self {
            sink,
            identity,
            interval,
            stats: Arc::new(HeartbeatStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<HeartbeatStats> {
        self.stats.clone()
    }

    /// Sends one beat and records the outcome.
    pub async fn tick(&self) -> Result<(), HeartbeatError> {
        let message = HeartbeatMessage::now(&self.identity);
        match self.sink.send(&message).await {
            Ok(()) => {
                self.stats.record_success();
                debug!(node_id = %message.node_id, "heartbeat delivered");
                Ok(())
            }
            Err(e) => {
                let consecutive = self.stats.record_failure();
                warn!(consecutive_failures = consecutive, "heartbeat failed: {}", e);
                Err(e)
            }
        }
    }

    /// Ticks every interval until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            node_id = %self.identity.node_id,
            "heartbeat started: every {:?}",
            self.interval
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    break;
                }
                _ = ticker.tick() => {
                    // Errors are already logged and counted.
                    let _ = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        res = self.tick() => res,
                    };
                }
            }
        }

        let stats = self.stats.snapshot();
        info!(
            attempts = stats.attempts,
            failures = stats.failures,
            "heartbeat stopped"
        );
    }

    /// Runs the reporter as a supervised task.
    pub fn spawn(self, cancel: CancellationToken) -> HeartbeatHandle {
        let stats = self.stats();
        let task = tokio::spawn(self.run(cancel.clone()));
        HeartbeatHandle {
            cancel,
            stats,
            task: Mutex::new(Some(task)),
        }
    }
}

/// Handle to a spawned reporter, joined at shutdown.
pub struct HeartbeatHandle {
    cancel: CancellationToken,
    stats: Arc<HeartbeatStats>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatHandle {
    pub fn stats(&self) -> HeartbeatSnapshot {
        self.stats.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.task.lock().as_ref().map_or(true, |t| t.is_finished())
    }

    /// Cancels the reporter and waits for the loop to exit.
    pub async fn stop(&self) -> Result<HeartbeatSnapshot, tokio::task::JoinError> {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.await?;
        }
        Ok(self.stats.snapshot())
    }
}

#[async_trait]
impl ManagedResource for HeartbeatHandle {
    fn name(&self) -> &str {
        "heartbeat"
    }

    async fn close(&self) -> anyhow::Result<()> {
        let stats = self.stop().await?;
        debug!(attempts = stats.attempts, "heartbeat joined");
        Ok(())
    }
}
