//! One-shot shutdown and ordered teardown.
//!
//! [`ShutdownCoordinator`] owns the node-wide [`CancellationToken`]. The first
//! trigger wins: it records the [`ShutdownReason`] and cancels the token, and
//! every later trigger is ignored. [`ShutdownCoordinator::unwind`] closes the
//! given resources strictly in order and runs at most once per coordinator;
//! a resource that fails to close is logged and the next one is still closed.
//! There is no forced-kill timeout.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
    Hangup,
    CtrlC,
    /// Triggered from inside the process.
    Requested,
    /// The RPC service stopped on its own.
    ServiceExited,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShutdownReason::Interrupt => "SIGINT",
            ShutdownReason::Terminate => "SIGTERM",
            ShutdownReason::Hangup => "SIGHUP",
            ShutdownReason::CtrlC => "ctrl-c",
            ShutdownReason::Requested => "requested",
            ShutdownReason::ServiceExited => "rpc service exited",
        };
        f.write_str(s)
    }
}

/// Something released during teardown.
#[async_trait]
pub trait ManagedResource: Send + Sync {
    fn name(&self) -> &str;

    async fn close(&self) -> anyhow::Result<()>;
}

/// What [`ShutdownCoordinator::unwind`] did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnwindReport {
    /// Resource names in the order they were closed.
    pub closed: Vec<String>,
    /// Resources whose close returned an error, with the message.
    pub failed: Vec<(String, String)>,
}

impl UnwindReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    reason: Mutex<Option<ShutdownReason>>,
    unwound: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Records `reason` and cancels the token. Returns `false` if shutdown
    /// was already triggered.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let mut slot = self.reason.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(reason);
        drop(slot);

        info!(%reason, "shutdown triggered");
        self.token.cancel();
        true
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.reason.lock()
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Blocks until the first termination signal or programmatic trigger and
    /// returns its reason. Later calls return the same reason immediately.
    pub async fn await_signal(&self) -> ShutdownReason {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => {}
            reason = os_signal() => {
                self.trigger(reason);
            }
        }
        self.reason().unwrap_or(ShutdownReason::Requested)
    }

    /// Closes `resources` in order. Only the first call does anything;
    /// later calls return `None`.
    pub async fn unwind(&self, resources: &[&dyn ManagedResource]) -> Option<UnwindReport> {
        if self.unwound.swap(true, Ordering::SeqCst) {
            warn!("teardown already ran, skipping");
            return None;
        }
        // Teardown implies shutdown, whoever got here first.
        self.trigger(ShutdownReason::Requested);

        let mut report = UnwindReport::default();
        for resource in resources {
            let name = resource.name().to_string();
            match resource.close().await {
                Ok(()) => info!(resource = %name, "closed"),
                Err(e) => {
                    warn!(resource = %name, "close failed: {:#}", e);
                    report.failed.push((name.clone(), format!("{:#}", e)));
                }
            }
            report.closed.push(name);
        }
        Some(report)
    }
}

#[cfg(unix)]
async fn os_signal() -> ShutdownReason {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut int, mut term) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(int), Ok(term)) => (int, term),
        _ => {
            warn!("failed to install signal handlers, waiting for programmatic shutdown only");
            return std::future::pending().await;
        }
    };

    // An inherited SIG_IGN (nohup, supervisors) must survive; registering a
    // stream would replace it.
    let mut hup = if hangup_ignored() {
        info!("SIGHUP is ignored by the parent, not listening for it");
        None
    } else {
        match signal(SignalKind::hangup()) {
            Ok(hup) => Some(hup),
            Err(e) => {
                warn!("failed to listen for SIGHUP: {}", e);
                None
            }
        }
    };

    tokio::select! {
        _ = int.recv() => ShutdownReason::Interrupt,
        _ = term.recv() => ShutdownReason::Terminate,
        Some(_) = async {
            match hup.as_mut() {
                Some(hup) => hup.recv().await,
                None => std::future::pending().await,
            }
        } => ShutdownReason::Hangup,
    }
}

/// Whether SIGHUP currently has the ignore disposition.
#[cfg(unix)]
fn hangup_ignored() -> bool {
    let mut current = std::mem::MaybeUninit::<libc::sigaction>::zeroed();
    // SAFETY: a null `act` only queries the disposition; `current` is a valid
    // out pointer for the duration of the call.
    let rc = unsafe { libc::sigaction(libc::SIGHUP, std::ptr::null(), current.as_mut_ptr()) };
    if rc != 0 {
        return false;
    }
    // SAFETY: sigaction succeeded and filled `current`.
    let current = unsafe { current.assume_init() };
    current.sa_sigaction == libc::SIG_IGN
}

#[cfg(not(unix))]
async fn os_signal() -> ShutdownReason {
    match tokio::signal::ctrl_c().await {
        Ok(()) => ShutdownReason::CtrlC,
        Err(e) => {
            warn!("failed to listen for ctrl-c: {}", e);
            std::future::pending().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    #[async_trait]
    impl ManagedResource for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn close(&self) -> anyhow::Result<()> {
            self.log.lock().push(self.name);
            if self.fail {
                anyhow::bail!("{} refused to close", self.name);
            }
            Ok(())
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>, fail: bool) -> Recorder {
        Recorder {
            name,
            log: log.clone(),
            fail,
        }
    }

    #[test]
    fn test_first_trigger_wins() {
        let c = ShutdownCoordinator::new();
        assert!(!c.is_triggered());
        assert!(c.trigger(ShutdownReason::Terminate));
        assert!(!c.trigger(ShutdownReason::Interrupt));
        assert!(!c.trigger(ShutdownReason::Requested));
        assert_eq!(c.reason(), Some(ShutdownReason::Terminate));
        assert!(c.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_await_signal_unblocks_on_trigger() {
        let c = Arc::new(ShutdownCoordinator::new());
        let waiter = {
            let c = c.clone();
            tokio::spawn(async move { c.await_signal().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        c.trigger(ShutdownReason::Hangup);
        c.trigger(ShutdownReason::Interrupt);
        let reason = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, ShutdownReason::Hangup);
        assert_eq!(c.await_signal().await, ShutdownReason::Hangup);
    }

    #[tokio::test]
    async fn test_unwind_in_order_once() {
        let c = ShutdownCoordinator::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let service = recorder("service", &log, false);
        let heartbeat = recorder("heartbeat", &log, false);
        let sink = recorder("log sink", &log, false);
        let persistence = recorder("persistence", &log, false);
        let resources: [&dyn ManagedResource; 4] = [&service, &heartbeat, &sink, &persistence];

        let report = c.unwind(&resources).await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.closed, ["service", "heartbeat", "log sink", "persistence"]);

        assert!(c.unwind(&resources).await.is_none());
        assert_eq!(
            *log.lock(),
            vec!["service", "heartbeat", "log sink", "persistence"]
        );
        assert!(c.is_triggered());
    }

    #[tokio::test]
    async fn test_unwind_continues_past_failure() {
        let c = ShutdownCoordinator::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let service = recorder("service", &log, true);
        let persistence = recorder("persistence", &log, false);

        let resources: [&dyn ManagedResource; 2] = [&service, &persistence];
        let report = c.unwind(&resources).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "service");
        assert_eq!(*log.lock(), vec!["service", "persistence"]);
    }

    #[tokio::test]
    async fn test_concurrent_unwind_runs_once() {
        let c = Arc::new(ShutdownCoordinator::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let c = c.clone();
            let r = recorder("persistence", &log, false);
            tasks.push(tokio::spawn(async move {
                let resources: [&dyn ManagedResource; 1] = [&r];
                c.unwind(&resources).await.is_some()
            }));
        }
        let mut ran = 0;
        for t in tasks {
            if t.await.unwrap() {
                ran += 1;
            }
        }
        assert_eq!(ran, 1);
        assert_eq!(log.lock().len(), 1);
    }
}
