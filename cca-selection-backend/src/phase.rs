use core::fmt::{self, Display};
use core::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::info;

use crate::connections::ConnectionRegistry;
use crate::ledger::{Ledger, LedgerError};
use crate::protocol::ServerMessage;

/// Global admission phase.
///
/// `Closed` keeps students out entirely, `ReadOnly` lets them look but not change
/// anything and `Open` accepts choices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum Phase {
    Closed = 0,
    ReadOnly = 1,
    Open = 2,
}

impl Phase {
    const fn from_repr(value: u8) -> Self {
        match value {
            1 => Self::ReadOnly,
            2 => Self::Open,
            _ => Self::Closed,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::ReadOnly => "read-only",
            Self::Open => "open",
        }
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Phase> for i32 {
    fn from(value: Phase) -> Self {
        Self::from(value as u8)
    }
}

impl TryFrom<i32> for Phase {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Closed),
            1 => Ok(Self::ReadOnly),
            2 => Ok(Self::Open),
            other => Err(other),
        }
    }
}

/// The current phase plus the lock that serializes transitions.
///
/// Reads are a single atomic load. A transition first persists the new phase and
/// only then publishes it, so a failed write leaves the old phase in effect.
#[derive(Debug)]
pub struct AdmissionPhase {
    current: AtomicU8,
    transitions: Mutex<()>,
}

impl AdmissionPhase {
    #[must_use]
    pub fn new(initial: Phase) -> Self {
        Self {
            current: AtomicU8::new(initial as u8),
            transitions: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn current(&self) -> Phase {
        Phase::from_repr(self.current.load(Ordering::SeqCst))
    }

    /// Switches to `next` and returns the previous phase.
    ///
    /// Entering `Closed` cancels every connection, entering `ReadOnly` broadcasts
    /// `STOP` and entering `Open` broadcasts `START`. Repeating the current phase
    /// repeats its side effect.
    pub async fn transition<L: Ledger + ?Sized>(
        &self,
        next: Phase,
        ledger: &L,
        connections: &ConnectionRegistry,
    ) -> Result<Phase, LedgerError> {
        let _transition = self.transitions.lock().await;
        let previous = self.current();
        ledger.save_phase(next).await?;
        self.current.store(next as u8, Ordering::SeqCst);
        match next {
            Phase::Closed => {
                connections.cancel_all();
            }
            Phase::ReadOnly => {
                connections.broadcast(&ServerMessage::Stop);
            }
            Phase::Open => {
                connections.broadcast(&ServerMessage::Start);
            }
        }
        info!(%previous, %next, "admission phase changed");
        Ok(previous)
    }

    /// Blocks transitions while the returned guard lives. `None` unless the phase is `Closed`.
    pub async fn hold_closed(&self) -> Option<MutexGuard<'_, ()>> {
        let guard = self.transitions.lock().await;
        (self.current() == Phase::Closed).then_some(guard)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::ledger::memory::MemoryLedger;

    #[test]
    fn stored_values() {
        for phase in [Phase::Closed, Phase::ReadOnly, Phase::Open] {
            assert_eq!(Phase::try_from(i32::from(phase)), Ok(phase));
        }
        assert_eq!(Phase::try_from(3), Err(3));
    }

    #[test]
    fn wire_names() {
        assert_eq!(
            serde_json::to_string(&Phase::ReadOnly).unwrap(),
            "\"read-only\""
        );
        assert_eq!(
            serde_json::from_str::<Phase>("\"open\"").unwrap(),
            Phase::Open
        );
    }

    #[tokio::test]
    async fn transition_persists_before_publishing() {
        let ledger = MemoryLedger::new();
        let connections = ConnectionRegistry::new();
        let phase = AdmissionPhase::new(Phase::Closed);

        let previous = phase
            .transition(Phase::Open, &ledger, &connections)
            .await
            .unwrap();
        assert_eq!(previous, Phase::Closed);
        assert_eq!(phase.current(), Phase::Open);
        assert_eq!(ledger.stored_phase(), Some(Phase::Open));
    }

    #[tokio::test]
    async fn failed_persist_keeps_previous_phase() {
        let ledger = MemoryLedger::new();
        let connections = Arc::new(ConnectionRegistry::new());
        let (tx, mut rx) = mpsc::channel(4);
        let guard = connections.register("s1", "Y9", tx);
        let phase = AdmissionPhase::new(Phase::Open);
        ledger.set_unavailable(true);

        assert!(phase
            .transition(Phase::Closed, &ledger, &connections)
            .await
            .is_err());
        assert_eq!(phase.current(), Phase::Open);
        assert!(!guard.cancellation().is_cancelled());
        assert_eq!(connections.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn phase_changes_reach_connections() {
        let ledger = MemoryLedger::new();
        let connections = Arc::new(ConnectionRegistry::new());
        let (tx, mut rx) = mpsc::channel(4);
        let guard = connections.register("s1", "Y9", tx);
        let phase = AdmissionPhase::new(Phase::Open);

        phase
            .transition(Phase::ReadOnly, &ledger, &connections)
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(ServerMessage::Stop));
        phase
            .transition(Phase::Open, &ledger, &connections)
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(ServerMessage::Start));

        phase
            .transition(Phase::Closed, &ledger, &connections)
            .await
            .unwrap();
        assert!(guard.cancellation().is_cancelled());
        assert!(connections.is_empty());
    }

    #[tokio::test]
    async fn hold_closed_requires_closed() {
        let phase = AdmissionPhase::new(Phase::ReadOnly);
        assert!(phase.hold_closed().await.is_none());

        let phase = AdmissionPhase::new(Phase::Closed);
        assert!(phase.hold_closed().await.is_some());
    }
}
