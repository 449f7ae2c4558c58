use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::cohorts::Cohorts;
use crate::connections::ConnectionRegistry;
use crate::courses::{CourseGroup, CourseId, CourseRecord, CourseRegistry};
use crate::ledger::{Ledger, LedgerError};
use crate::phase::{AdmissionPhase, Phase};
use crate::schedule::Pending;

#[derive(thiserror::Error, Debug)]
pub enum ImportError {
    #[error("courses can only be replaced while selections are closed")]
    NotClosed,
    #[error("course {0} appears more than once")]
    DuplicateCourse(CourseId),
    #[error("course {course} belongs to unknown group {group}")]
    UnknownGroup { course: CourseId, group: CourseGroup },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Owns the in-memory course set, the admission phase and the live connections,
/// and keeps them consistent with the ledger.
pub struct AdmissionControl {
    pub(crate) courses: CourseRegistry,
    pub(crate) phase: AdmissionPhase,
    pub(crate) connections: Arc<ConnectionRegistry>,
    pub(crate) ledger: Arc<dyn Ledger>,
    pub(crate) cohorts: Cohorts,
    pub(crate) schedule: Mutex<Option<Pending>>,
}

impl AdmissionControl {
    /// Restores the persisted phase and the course set with its seat counts.
    pub async fn start(ledger: Arc<dyn Ledger>, cohorts: Cohorts) -> Result<Self, LedgerError> {
        let phase = ledger.load_phase().await?;
        let records = ledger.load_courses().await?;
        let courses = CourseRegistry::new();
        let loaded = records.len();
        courses.load(records);
        info!(%phase, courses = loaded, "restored admission state");
        Ok(Self {
            courses,
            phase: AdmissionPhase::new(phase),
            connections: Arc::new(ConnectionRegistry::new()),
            ledger,
            cohorts,
            schedule: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase.current()
    }

    #[must_use]
    pub const fn courses(&self) -> &CourseRegistry {
        &self.courses
    }

    #[must_use]
    pub const fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    #[must_use]
    pub const fn cohorts(&self) -> &Cohorts {
        &self.cohorts
    }

    /// Moves to `next` and returns the phase that was in effect before.
    pub async fn transition(&self, next: Phase) -> Result<Phase, LedgerError> {
        self.phase
            .transition(next, self.ledger.as_ref(), &self.connections)
            .await
    }

    /// Replaces every course, dropping all choices. Only allowed while `Closed`,
    /// and keeps the phase from changing until the new set is live.
    pub async fn import_courses(&self, records: Vec<CourseRecord>) -> Result<usize, ImportError> {
        let mut seen = HashSet::new();
        for record in &records {
            if !seen.insert(record.id) {
                return Err(ImportError::DuplicateCourse(record.id));
            }
            if !self.cohorts.has_course_group(&record.group) {
                return Err(ImportError::UnknownGroup {
                    course: record.id,
                    group: record.group.clone(),
                });
            }
        }

        let Some(_closed) = self.phase.hold_closed().await else {
            return Err(ImportError::NotClosed);
        };
        self.ledger.replace_courses(&records).await?;
        let reloaded = self.ledger.load_courses().await?;
        let imported = reloaded.len();
        self.courses.load(reloaded);
        info!(courses = imported, "imported courses");
        Ok(imported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::courses::tests::record;
    use crate::ledger::memory::MemoryLedger;
    use crate::ledger::SeatRequest;

    fn cohorts() -> Cohorts {
        Cohorts::new("Staff").with_course_group("MW1", "Monday/Wednesday 1")
    }

    #[tokio::test]
    async fn start_restores_seat_counts() {
        let ledger = Arc::new(MemoryLedger::with_courses([record(1, 3, "MW1")]));
        for user in ["a", "b"] {
            ledger
                .reserve_seat(&SeatRequest::now(user, CourseId(1), false))
                .await
                .unwrap();
        }
        ledger.save_phase(Phase::ReadOnly).await.unwrap();

        let control = AdmissionControl::start(ledger, cohorts()).await.unwrap();
        assert_eq!(control.phase(), Phase::ReadOnly);
        assert_eq!(control.courses().get(CourseId(1)).unwrap().selected(), 2);
    }

    #[tokio::test]
    async fn import_requires_closed() {
        let ledger = Arc::new(MemoryLedger::new());
        let control = AdmissionControl::start(ledger.clone(), cohorts())
            .await
            .unwrap();
        control.transition(Phase::ReadOnly).await.unwrap();

        assert!(matches!(
            control.import_courses(vec![record(1, 3, "MW1")]).await,
            Err(ImportError::NotClosed)
        ));
        assert!(control.courses().is_empty());
    }

    #[tokio::test]
    async fn import_validates_records() {
        let control = AdmissionControl::start(Arc::new(MemoryLedger::new()), cohorts())
            .await
            .unwrap();

        assert!(matches!(
            control
                .import_courses(vec![record(1, 3, "MW1"), record(1, 3, "MW1")])
                .await,
            Err(ImportError::DuplicateCourse(CourseId(1)))
        ));
        assert!(matches!(
            control.import_courses(vec![record(2, 3, "XX9")]).await,
            Err(ImportError::UnknownGroup { .. })
        ));
    }
}
