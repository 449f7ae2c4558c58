use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::admission::AdmissionControl;
use crate::courses::{Course, CourseGroup, CourseId, CourseType, SeatError, YearGroups};
use crate::ledger::{LedgerError, Reservation, SeatRequest};
use crate::phase::Phase;
use crate::protocol::RejectReason;
use crate::session::Identity;

const UNDO_ATTEMPTS: u32 = 3;
const UNDO_BACKOFF: Duration = Duration::from_millis(20);

#[derive(thiserror::Error, Debug)]
pub enum SelectionError {
    #[error("no such course {0}")]
    NotFound(CourseId),
    #[error("course {0} is full")]
    CourseFull(CourseId),
    #[error("selections are not open")]
    SelectionsClosed,
    #[error("course {course} conflicts with course {held} in the same group")]
    GroupConflict { course: CourseId, held: CourseId },
    #[error("course {0} is not offered to this year group")]
    Ineligible(CourseId),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<SeatError> for SelectionError {
    fn from(value: SeatError) -> Self {
        match value {
            SeatError::NotFound(course) => Self::NotFound(course),
            SeatError::CourseFull(course) => Self::CourseFull(course),
        }
    }
}

impl SelectionError {
    /// How the rejection is reported to the client. `None` for failures that are
    /// not the client's doing.
    #[must_use]
    pub const fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            Self::NotFound(_) => Some(RejectReason::NotFound),
            Self::CourseFull(_) => Some(RejectReason::Full),
            Self::SelectionsClosed => Some(RejectReason::Closed),
            Self::GroupConflict { .. } => Some(RejectReason::Group),
            Self::Ineligible(_) => Some(RejectReason::Ineligible),
            Self::Ledger(_) => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Choice {
    Selected,
    AlreadySelected,
}

/// What one connection knows about its student's choices. Other connections of the
/// same student may change the ledger behind its back, so rules are enforced by the
/// ledger and this is bookkeeping only.
#[derive(Clone, Debug)]
pub struct Enrollment {
    user_id: String,
    department: String,
    cohort: Option<YearGroups>,
    chosen: BTreeMap<CourseId, (CourseGroup, CourseType)>,
    types: HashMap<CourseType, u32>,
}

impl Enrollment {
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub fn department(&self) -> &str {
        &self.department
    }

    /// Chosen courses in ascending order.
    #[must_use]
    pub fn chosen(&self) -> Vec<CourseId> {
        self.chosen.keys().copied().collect()
    }

    #[must_use]
    pub fn count_of(&self, course_type: CourseType) -> u32 {
        self.types.get(&course_type).copied().unwrap_or_default()
    }

    fn record(&mut self, course: &Course) {
        if self
            .chosen
            .insert(course.id, (course.group.clone(), course.course_type))
            .is_none()
        {
            *self.types.entry(course.course_type).or_default() += 1;
        }
    }

    fn forget(&mut self, course: &Course) {
        if let Some((_, course_type)) = self.chosen.remove(&course.id) {
            if let Some(count) = self.types.get_mut(&course_type) {
                *count = count.saturating_sub(1);
            }
        }
    }
}

/// Outcome of applying a student's pre-selected courses.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PreselectReport {
    pub assigned: Vec<CourseId>,
    pub already_held: Vec<CourseId>,
    pub full: Vec<CourseId>,
    pub unknown: Vec<CourseId>,
}

impl AdmissionControl {
    /// Loads the choices `identity` already holds.
    pub async fn enroll(&self, identity: &Identity) -> Result<Enrollment, LedgerError> {
        let mut enrollment = Enrollment {
            user_id: identity.user_id.clone(),
            department: identity.department.clone(),
            cohort: self.cohorts.year_group(&identity.department),
            chosen: BTreeMap::new(),
            types: HashMap::new(),
        };
        for course_id in self.ledger.choices_of(&identity.user_id).await? {
            match self.courses.get(course_id) {
                Ok(course) => enrollment.record(&course),
                Err(_) => warn!(user = %identity.user_id, course = %course_id, "choice of unknown course"),
            }
        }
        Ok(enrollment)
    }

    pub async fn choose(
        &self,
        enrollment: &mut Enrollment,
        course_id: CourseId,
    ) -> Result<Choice, SelectionError> {
        if self.phase() != Phase::Open {
            return Err(SelectionError::SelectionsClosed);
        }
        let course = self.courses.get(course_id)?;
        if !enrollment
            .cohort
            .is_some_and(|cohort| course.year_groups.admits(cohort))
        {
            return Err(SelectionError::Ineligible(course_id));
        }
        self.claim(enrollment, &course, false).await
    }

    /// Returns whether a choice was removed.
    pub async fn unchoose(
        &self,
        enrollment: &mut Enrollment,
        course_id: CourseId,
    ) -> Result<bool, SelectionError> {
        if self.phase() != Phase::Open {
            return Err(SelectionError::SelectionsClosed);
        }
        let course = self.courses.get(course_id)?;
        let _seats = course.lock_seats().await;
        if !self
            .ledger
            .release_seat(&enrollment.user_id, course_id)
            .await?
        {
            enrollment.forget(&course);
            return Ok(false);
        }
        self.courses.decrement_seat(course_id)?;
        enrollment.forget(&course);
        Ok(true)
    }

    /// Assigns every pre-selected course of `student_id` that still has a seat,
    /// in ascending course order. Eligibility and group rules do not apply.
    pub async fn preselect(
        &self,
        enrollment: &mut Enrollment,
        student_id: &str,
    ) -> Result<PreselectReport, LedgerError> {
        let mut wanted = self.ledger.pre_selected(student_id).await?;
        wanted.sort_unstable();
        wanted.dedup();

        let mut report = PreselectReport::default();
        for course_id in wanted {
            let Ok(course) = self.courses.get(course_id) else {
                report.unknown.push(course_id);
                continue;
            };
            match self.claim(enrollment, &course, true).await {
                Ok(Choice::Selected) => report.assigned.push(course_id),
                Ok(Choice::AlreadySelected) => report.already_held.push(course_id),
                Err(SelectionError::CourseFull(_)) => report.full.push(course_id),
                Err(SelectionError::Ledger(err)) => return Err(err),
                Err(_) => report.unknown.push(course_id),
            }
        }
        if !report.assigned.is_empty() || !report.full.is_empty() {
            info!(student = student_id, ?report, "applied pre-selection");
        }
        Ok(report)
    }

    /// The ledger decides whether a seat is free; the in-memory count follows it.
    async fn claim(
        &self,
        enrollment: &mut Enrollment,
        course: &Course,
        forced: bool,
    ) -> Result<Choice, SelectionError> {
        let _seats = course.lock_seats().await;
        let request = SeatRequest::now(&enrollment.user_id, course.id, forced);
        match self.ledger.reserve_seat(&request).await? {
            Reservation::Inserted { taken } => {
                if let Err(err) = self.courses.increment_seat(course.id) {
                    warn!(
                        user = %enrollment.user_id,
                        course = %course.id,
                        %err,
                        "seat count disagrees with the ledger, undoing choice"
                    );
                    if self.undo_reservation(&enrollment.user_id, course.id).await {
                        return Err(err.into());
                    }
                    // the choice stays committed
                    course.resync(taken);
                }
                enrollment.record(course);
                Ok(Choice::Selected)
            }
            Reservation::AlreadySelected => {
                enrollment.record(course);
                Ok(Choice::AlreadySelected)
            }
            Reservation::GroupConflict { held } => {
                // chosen through another connection
                if let Ok(held) = self.courses.get(held) {
                    enrollment.record(&held);
                }
                Err(SelectionError::GroupConflict {
                    course: course.id,
                    held,
                })
            }
            Reservation::CourseFull => Err(SelectionError::CourseFull(course.id)),
            Reservation::UnknownCourse => Err(SelectionError::NotFound(course.id)),
        }
    }

    /// Deletes a choice the seat count could not follow. Returns whether it is gone.
    async fn undo_reservation(&self, user_id: &str, course: CourseId) -> bool {
        for attempt in 1..=UNDO_ATTEMPTS {
            match self.ledger.release_seat(user_id, course).await {
                Ok(_) => return true,
                Err(err) => {
                    error!(user = user_id, %course, attempt, %err, "failed to undo choice");
                    tokio::time::sleep(UNDO_BACKOFF * attempt).await;
                }
            }
        }
        false
    }
}
