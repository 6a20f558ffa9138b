//! Sandbox lifecycle state machine.
//!
//! ```text
//!            ContainerStarted            Stopped
//! creating ──────────────────▶ running ─────────▶ stopped
//!     │                           │
//!     │ ProvisioningFailed        │ TeardownFailed
//!     ▼                           ▼
//!   failed ◀──────────────────────┘
//! ```
//!
//! `stopped` and `failed` are terminal.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;

use code_play_core::types::{Sandbox, SandboxStatus};
use code_play_core::Error;

use crate::engine::ContainerHandle;

/// Events that drive the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The container was created and started under the given id.
    ContainerStarted { container_id: String },
    /// Container create or start failed.
    ProvisioningFailed,
    /// The container was stopped.
    Stopped,
    /// Stop or remove failed after cleanup attempts.
    TeardownFailed,
}

impl LifecycleEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::ContainerStarted { .. } => "container_started",
            Self::ProvisioningFailed => "provisioning_failed",
            Self::Stopped => "stopped",
            Self::TeardownFailed => "teardown_failed",
        }
    }
}

/// An event that is not legal in the current state.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal transition: {event} while {from}")]
pub struct IllegalTransition {
    pub from: SandboxStatus,
    pub event: &'static str,
}

impl From<IllegalTransition> for Error {
    fn from(err: IllegalTransition) -> Self {
        Error::internal(err.to_string())
    }
}

/// Pure transition function.
pub fn next_status(
    from: SandboxStatus,
    event: &LifecycleEvent,
) -> Result<SandboxStatus, IllegalTransition> {
    use SandboxStatus::{Creating, Failed, Running};

    match (from, event) {
        (Creating, LifecycleEvent::ContainerStarted { .. }) => Ok(Running),
        (Creating, LifecycleEvent::ProvisioningFailed) => Ok(Failed),
        (Running, LifecycleEvent::Stopped) => Ok(SandboxStatus::Stopped),
        (Running, LifecycleEvent::TeardownFailed) => Ok(Failed),
        (from, event) => Err(IllegalTransition {
            from,
            event: event.name(),
        }),
    }
}

/// How a stop request proceeds.
#[derive(Debug)]
pub enum StopTicket {
    /// Stop this container, then call [`Lifecycle::end_teardown`].
    Stop(ContainerHandle),
    /// Nothing to do; the sandbox is already stopped.
    Stopped,
    /// A stop or delete is in flight. Wait on the notify, then re-read the
    /// record for its outcome.
    Wait(Arc<Notify>),
}

/// Authoritative in-process state of one sandbox.
///
/// Always accessed under the sandbox's own lock; the lock is held for the
/// transition decision only, never across a container call.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    record: Sandbox,
    /// A stop or delete has been accepted; new work is refused.
    tearing_down: bool,
    /// The sandbox was deleted while still provisioning.
    discarded: bool,
    /// Woken when an in-flight stop or delete settles.
    teardown_done: Arc<Notify>,
}

impl Lifecycle {
    pub fn new(record: Sandbox) -> Self {
        Self {
            record,
            tearing_down: false,
            discarded: false,
            teardown_done: Arc::new(Notify::new()),
        }
    }

    pub fn record(&self) -> &Sandbox {
        &self.record
    }

    pub fn status(&self) -> SandboxStatus {
        self.record.status
    }

    pub fn container(&self) -> Option<ContainerHandle> {
        self.record.container_id.clone().map(ContainerHandle)
    }

    pub fn is_discarded(&self) -> bool {
        self.discarded
    }

    /// Apply an event, updating status (and container id on start).
    pub fn apply(&mut self, event: LifecycleEvent) -> Result<SandboxStatus, IllegalTransition> {
        let to = next_status(self.record.status, &event)?;
        if let LifecycleEvent::ContainerStarted { container_id } = event {
            self.record.container_id = Some(container_id);
        }
        self.record.set_status(to);
        Ok(to)
    }

    /// Container handle for exec/attach, or `NotRunning`.
    pub fn require_running(&self) -> Result<ContainerHandle, Error> {
        match (self.record.status, self.container()) {
            (SandboxStatus::Running, Some(handle)) if !self.tearing_down => Ok(handle),
            (status, _) => Err(Error::not_running(self.record.id.as_str(), status)),
        }
    }

    /// Accept a stop request.
    ///
    /// Sandboxes that never ran are `NotRunning`. A second request while a
    /// stop is under way gets [`StopTicket::Wait`] instead of a stale record.
    pub fn begin_stop(&mut self) -> Result<StopTicket, Error> {
        match (self.record.status, self.container()) {
            (SandboxStatus::Stopped, _) => Ok(StopTicket::Stopped),
            (SandboxStatus::Running, Some(_)) if self.tearing_down => {
                Ok(StopTicket::Wait(Arc::clone(&self.teardown_done)))
            }
            (SandboxStatus::Running, Some(handle)) => {
                self.tearing_down = true;
                Ok(StopTicket::Stop(handle))
            }
            (status, _) => Err(Error::not_running(self.record.id.as_str(), status)),
        }
    }

    /// Wake everyone waiting on an in-flight stop or delete.
    ///
    /// Call with the lock held, after the final status has been applied.
    pub fn end_teardown(&self) {
        self.teardown_done.notify_waiters();
    }

    /// Accept a delete request from any state.
    pub fn begin_delete(&mut self) -> Option<ContainerHandle> {
        self.tearing_down = true;
        self.discarded = true;
        self.container()
    }

    /// A delete failed; the sandbox stays addressable but is never reused.
    pub fn abort_delete(&mut self) {
        self.discarded = false;
        self.mark_failed();
    }

    /// Force `failed` after a teardown error, whatever the current state.
    pub fn mark_failed(&mut self) {
        if self.record.status != SandboxStatus::Failed {
            self.record.set_status(SandboxStatus::Failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use code_play_core::types::SandboxId;

    fn creating() -> Lifecycle {
        Lifecycle::new(Sandbox::new(SandboxId::from("sb-1"), "P1"))
    }

    fn running() -> Lifecycle {
        let mut lc = creating();
        lc.apply(LifecycleEvent::ContainerStarted {
            container_id: "c1".into(),
        })
        .unwrap();
        lc
    }

    #[test]
    fn test_transition_table() {
        use SandboxStatus::*;
        let started = LifecycleEvent::ContainerStarted {
            container_id: "c".into(),
        };
        assert_eq!(next_status(Creating, &started), Ok(Running));
        assert_eq!(
            next_status(Creating, &LifecycleEvent::ProvisioningFailed),
            Ok(Failed)
        );
        assert_eq!(next_status(Running, &LifecycleEvent::Stopped), Ok(Stopped));
        assert_eq!(
            next_status(Running, &LifecycleEvent::TeardownFailed),
            Ok(Failed)
        );
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        use SandboxStatus::*;
        let events = [
            LifecycleEvent::ContainerStarted {
                container_id: "c".into(),
            },
            LifecycleEvent::ProvisioningFailed,
            LifecycleEvent::Stopped,
            LifecycleEvent::TeardownFailed,
        ];
        for from in [Stopped, Failed] {
            for event in &events {
                assert!(next_status(from, event).is_err(), "{from} + {event:?}");
            }
        }
        // running can never be reached without passing through creating
        assert!(next_status(
            Running,
            &LifecycleEvent::ContainerStarted {
                container_id: "c".into()
            }
        )
        .is_err());
    }

    #[test]
    fn test_running_always_has_container() {
        let lc = running();
        assert_eq!(lc.status(), SandboxStatus::Running);
        assert_eq!(lc.require_running().unwrap(), ContainerHandle("c1".into()));
    }

    #[test]
    fn test_require_running_rejects_other_states() {
        let lc = creating();
        assert!(matches!(
            lc.require_running(),
            Err(Error::NotRunning {
                status: SandboxStatus::Creating,
                ..
            })
        ));
    }

    #[test]
    fn test_stop_refuses_new_work_and_is_idempotent() {
        let mut lc = running();
        assert!(matches!(
            lc.begin_stop().unwrap(),
            StopTicket::Stop(ContainerHandle(ref id)) if id == "c1"
        ));
        assert!(lc.require_running().is_err());
        assert!(matches!(lc.begin_stop().unwrap(), StopTicket::Wait(_)));

        lc.apply(LifecycleEvent::Stopped).unwrap();
        assert!(matches!(lc.begin_stop().unwrap(), StopTicket::Stopped));
    }

    #[tokio::test]
    async fn test_second_stop_waits_for_the_first() {
        let mut lc = running();
        assert!(matches!(lc.begin_stop().unwrap(), StopTicket::Stop(_)));
        let StopTicket::Wait(done) = lc.begin_stop().unwrap() else {
            panic!("expected to wait on the stop in flight");
        };
        let notified = done.notified();

        lc.apply(LifecycleEvent::TeardownFailed).unwrap();
        lc.end_teardown();
        notified.await;
        assert_eq!(lc.status(), SandboxStatus::Failed);
    }

    #[test]
    fn test_stop_before_running_is_not_running() {
        let mut lc = creating();
        assert!(matches!(lc.begin_stop(), Err(Error::NotRunning { .. })));
    }

    #[test]
    fn test_abort_delete_marks_failed() {
        let mut lc = running();
        assert!(lc.begin_delete().is_some());
        assert!(lc.is_discarded());
        lc.abort_delete();
        assert!(!lc.is_discarded());
        assert_eq!(lc.status(), SandboxStatus::Failed);
    }
}
