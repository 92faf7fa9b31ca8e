//! Start/stop/wait plumbing shared by the supervisor and the reader.
//!
//! Each component owns a [`Lifecycle`]: a per-component action guard that
//! serialises `start`/`stop`, and a `watch` channel carrying the current
//! [`LifecycleState`] so any number of callers can wait for the terminal
//! outcome.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, watch};
use tracing::{debug, info, warn};

use crate::error::{CaptureError, Result};

// ── LifecycleState ───────────────────────────────────────────────

/// The current phase of a background component.
///
/// ```text
///  Idle ──► Starting ──► Running ──► Stopping ──► Stopped
///   ▲          │            │            │           │
///   │          ▼            ▼            ▼           │
///   │        Failed ◄───────┴────────────┘           │
///   └──────────┴── (start again) ◄───────────────────┘
/// ```
#[derive(Debug, Clone, Default)]
pub enum LifecycleState {
    /// Never started.
    #[default]
    Idle,
    /// `start` is provisioning.
    Starting,
    /// Background task is live.
    Running,
    /// `stop` has signalled the task and is waiting for it.
    Stopping,
    /// Task ended without error.
    Stopped,
    /// Start or the background task failed.
    Failed(CaptureError),
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Starting => write!(f, "Starting"),
            Self::Running => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Failed(_) => write!(f, "Failed"),
        }
    }
}

impl LifecycleState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns `true` when no background work is pending.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Idle | Self::Stopped | Self::Failed(_))
    }

    /// Outcome carried by a settled state.
    fn outcome(&self) -> Result<()> {
        match self {
            Self::Failed(e) => Err(e.clone()),
            _ => Ok(()),
        }
    }
}

// ── Lifecycle ────────────────────────────────────────────────────

/// Cloneable handle; the background task keeps one to report its outcome.
#[derive(Clone)]
pub struct Lifecycle {
    inner: Arc<Inner>,
}

struct Inner {
    component: &'static str,
    action: Mutex<()>,
    state: watch::Sender<LifecycleState>,
}

impl Lifecycle {
    pub fn new(component: &'static str) -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        Self {
            inner: Arc::new(Inner {
                component,
                action: Mutex::new(()),
                state,
            }),
        }
    }

    pub fn component(&self) -> &'static str {
        self.inner.component
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> LifecycleState {
        self.inner.state.borrow().clone()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.inner.state.subscribe()
    }

    /// Claim the action guard. Fails fast if a start or stop is in flight.
    pub fn try_begin(&self) -> Result<MutexGuard<'_, ()>> {
        self.inner
            .action
            .try_lock()
            .map_err(|_| self.already_running())
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Starting`.
    ///
    /// Valid from: `Idle`, `Stopped`, `Failed`.
    pub fn begin_start(&self) -> Result<()> {
        let accepted = self.inner.state.send_if_modified(|state| {
            if state.is_settled() {
                *state = LifecycleState::Starting;
                true
            } else {
                false
            }
        });
        if accepted {
            debug!(component = self.component(), "starting");
            Ok(())
        } else {
            Err(self.already_running())
        }
    }

    /// Transition `Starting` to `Running`.
    pub fn mark_running(&self) {
        self.inner.state.send_if_modified(|state| {
            if matches!(state, LifecycleState::Starting) {
                *state = LifecycleState::Running;
                true
            } else {
                false
            }
        });
        info!(component = self.component(), "running");
    }

    /// Transition `Running` to `Stopping`.
    ///
    /// Returns `false` when there is no live task to stop.
    pub fn begin_stop(&self) -> bool {
        self.inner.state.send_if_modified(|state| {
            if state.is_running() {
                *state = LifecycleState::Stopping;
                true
            } else {
                false
            }
        })
    }

    /// Record the terminal outcome of a start attempt or background task.
    pub fn finish(&self, outcome: Result<()>) {
        let next = match outcome {
            Ok(()) => {
                info!(component = self.component(), "stopped");
                LifecycleState::Stopped
            }
            Err(e) => {
                warn!(component = self.component(), error = %e, "failed");
                LifecycleState::Failed(e)
            }
        };
        self.inner.state.send_replace(next);
    }

    /// Resolve to the most recent terminal outcome. Returns immediately
    /// when the component is idle or already settled.
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.subscribe();
        match rx.wait_for(LifecycleState::is_settled).await {
            Ok(state) => state.outcome(),
            Err(_) => Err(CaptureError::Other(format!(
                "{} lifecycle closed",
                self.component()
            ))),
        }
    }

    fn already_running(&self) -> CaptureError {
        CaptureError::AlreadyRunning {
            component: self.component(),
        }
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("component", &self.component())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn valid_transitions() {
        let lc = Lifecycle::new("test");
        assert!(lc.state().is_settled());

        lc.begin_start().unwrap();
        assert!(matches!(lc.state(), LifecycleState::Starting));
        lc.mark_running();
        assert!(lc.state().is_running());

        assert!(lc.begin_stop());
        assert!(matches!(lc.state(), LifecycleState::Stopping));
        lc.finish(Ok(()));
        assert!(matches!(lc.state(), LifecycleState::Stopped));

        // Restart after a clean stop.
        lc.begin_start().unwrap();
    }

    #[test]
    fn start_while_running_is_rejected() {
        let lc = Lifecycle::new("test");
        lc.begin_start().unwrap();
        lc.mark_running();
        assert!(matches!(
            lc.begin_start(),
            Err(CaptureError::AlreadyRunning { component: "test" })
        ));
        assert!(!Lifecycle::new("idle").begin_stop());
    }

    #[test]
    fn action_guard_is_exclusive() {
        let lc = Lifecycle::new("test");
        let guard = lc.try_begin().unwrap();
        assert!(lc.try_begin().is_err());
        drop(guard);
        assert!(lc.try_begin().is_ok());
    }

    #[tokio::test]
    async fn wait_returns_latest_outcome() {
        let lc = Lifecycle::new("test");
        // Idle resolves immediately.
        lc.wait().await.unwrap();

        lc.begin_start().unwrap();
        lc.mark_running();

        let waiter = tokio::spawn({
            let lc = lc.clone();
            async move { lc.wait().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        lc.finish(Err(CaptureError::SupervisionTerminated));
        let outcome = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("timeout")
            .unwrap();
        assert!(matches!(outcome, Err(CaptureError::SupervisionTerminated)));

        // A later clean run replaces the stored failure.
        lc.begin_start().unwrap();
        lc.mark_running();
        lc.finish(Ok(()));
        lc.wait().await.unwrap();
    }
}
