use std::sync::{Arc, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::admission::AdmissionControl;
use crate::phase::Phase;

/// A phase change set to happen at `at`, in seconds since the unix epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTransition {
    pub phase: Phase,
    pub at: u64,
}

#[derive(Debug)]
pub(crate) struct Pending {
    transition: ScheduledTransition,
    cancel: CancellationToken,
}

fn delay_until(at: u64) -> Duration {
    let target = UNIX_EPOCH + Duration::from_secs(at);
    target
        .duration_since(SystemTime::now())
        .unwrap_or(Duration::ZERO)
}

impl AdmissionControl {
    /// Transitions to `transition.phase` once `transition.at` has passed, replacing
    /// any transition scheduled before. Times in the past fire right away.
    pub fn schedule(self: &Arc<Self>, transition: ScheduledTransition) {
        let cancel = CancellationToken::new();
        {
            let mut pending = self
                .schedule
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(replaced) = pending.replace(Pending {
                transition,
                cancel: cancel.clone(),
            }) {
                replaced.cancel.cancel();
            }
        }
        info!(phase = %transition.phase, at = transition.at, "scheduled phase change");

        let control = Arc::clone(self);
        tokio::spawn(async move {
            #[allow(clippy::redundant_pub_crate)]
            let due = tokio::select! {
                () = cancel.cancelled() => false,
                () = tokio::time::sleep(delay_until(transition.at)) => true,
            };
            if !due {
                return;
            }
            {
                let mut pending = control
                    .schedule
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                // replaced while waking up
                if cancel.is_cancelled() {
                    return;
                }
                *pending = None;
            }
            if let Err(err) = control.transition(transition.phase).await {
                error!(phase = %transition.phase, %err, "scheduled phase change failed");
            }
        });
    }

    /// Drops the pending scheduled transition, if any, and returns it.
    pub fn cancel_schedule(&self) -> Option<ScheduledTransition> {
        let pending = {
            let mut pending = self
                .schedule
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let taken = pending.take()?;
            taken.cancel.cancel();
            taken
        };
        info!(phase = %pending.transition.phase, at = pending.transition.at, "cancelled scheduled phase change");
        Some(pending.transition)
    }

    #[must_use]
    pub fn scheduled(&self) -> Option<ScheduledTransition> {
        self.schedule
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|pending| pending.transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohorts::Cohorts;
    use crate::ledger::memory::MemoryLedger;

    fn in_a_minute() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 60
    }

    async fn control() -> (Arc<MemoryLedger>, Arc<AdmissionControl>) {
        let ledger = Arc::new(MemoryLedger::new());
        let control = AdmissionControl::start(ledger.clone(), Cohorts::new("Staff"))
            .await
            .unwrap();
        (ledger, Arc::new(control))
    }

    #[tokio::test(start_paused = true)]
    async fn fires_when_due() {
        let (ledger, control) = control().await;
        let transition = ScheduledTransition {
            phase: Phase::Open,
            at: in_a_minute(),
        };
        control.schedule(transition);
        assert_eq!(control.scheduled(), Some(transition));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(control.phase(), Phase::Closed);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(control.phase(), Phase::Open);
        assert_eq!(ledger.stored_phase(), Some(Phase::Open));
        assert_eq!(control.scheduled(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn replaced_and_cancelled_schedules_never_fire() {
        let (_, control) = control().await;
        control.schedule(ScheduledTransition {
            phase: Phase::Open,
            at: in_a_minute(),
        });
        let read_only = ScheduledTransition {
            phase: Phase::ReadOnly,
            at: in_a_minute(),
        };
        control.schedule(read_only);
        assert_eq!(control.cancel_schedule(), Some(read_only));
        assert_eq!(control.cancel_schedule(), None);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(control.phase(), Phase::Closed);
    }
}
