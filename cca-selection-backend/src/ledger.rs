//! Durable ledger of course choices and the persisted admission phase.

pub mod memory;
pub mod postgres;

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use cca_selection_database::DatabaseError;
use diesel_async::pooled_connection::deadpool::PoolError;

use crate::courses::{CourseId, CourseRecord};
use crate::phase::Phase;

#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("timed out waiting for a database connection")]
    PoolTimeout,
    #[error("invalid admission phase {0} stored")]
    InvalidPhase(i32),
    #[error("invalid course {course} stored: {reason}")]
    InvalidCourse { course: CourseId, reason: String },
    #[error("ledger unavailable")]
    Unavailable,
}

impl From<diesel::result::Error> for LedgerError {
    fn from(value: diesel::result::Error) -> Self {
        Self::Database(value.into())
    }
}

impl From<PoolError> for LedgerError {
    fn from(value: PoolError) -> Self {
        Self::Database(value.into())
    }
}

/// One seat claim of `user_id` in `course`.
#[derive(Debug, Clone, Copy)]
pub struct SeatRequest<'a> {
    pub user_id: &'a str,
    pub course: CourseId,
    /// microseconds since the unix epoch
    pub selected_at: i64,
    /// assigned by pre-selection instead of chosen by the student
    pub forced: bool,
}

impl<'a> SeatRequest<'a> {
    #[must_use]
    pub fn now(user_id: &'a str, course: CourseId, forced: bool) -> Self {
        let selected_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| {
                i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX)
            });
        Self {
            user_id,
            course,
            selected_at,
            forced,
        }
    }
}

/// Outcome of [`Ledger::reserve_seat`]. Only `Inserted` took a new seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// `taken` counts the seats of the course including the new one.
    Inserted { taken: u32 },
    AlreadySelected,
    CourseFull,
    /// The user already holds `held` in the same course group.
    GroupConflict { held: CourseId },
    UnknownCourse,
}

/// A user that has signed in at least once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub department: String,
    pub confirmed: bool,
}

/// A student the school expects to sign in, keyed by student number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedStudent {
    pub id: i64,
    pub name: String,
}

#[async_trait]
pub trait Ledger: Send + Sync + 'static {
    /// All courses with `selected` set to the number of choice rows per course.
    async fn load_courses(&self) -> Result<Vec<CourseRecord>, LedgerError>;

    /// Drops every choice and course and stores `courses` instead, atomically.
    async fn replace_courses(&self, courses: &[CourseRecord]) -> Result<(), LedgerError>;

    /// Stores a choice if the course still has a free seat and, unless the request
    /// is forced, the user holds no other course of the same group.
    ///
    /// The checks and the insert happen in one transaction that locks the user and
    /// the course, so concurrent reservations never exceed the capacity and never
    /// put two courses of one group on the same user. A new choice withdraws the
    /// user's confirmation.
    async fn reserve_seat(&self, request: &SeatRequest<'_>) -> Result<Reservation, LedgerError>;

    /// Deletes a choice and withdraws the user's confirmation. Returns whether the
    /// choice existed.
    async fn release_seat(&self, user_id: &str, course: CourseId) -> Result<bool, LedgerError>;

    async fn choices_of(&self, user_id: &str) -> Result<Vec<CourseId>, LedgerError>;

    /// Courses assigned to a student ahead of time, in ascending order.
    async fn pre_selected(&self, student_id: &str) -> Result<Vec<CourseId>, LedgerError>;

    /// The persisted phase. Stores and returns [`Phase::Closed`] if none was persisted yet.
    async fn load_phase(&self) -> Result<Phase, LedgerError>;

    async fn save_phase(&self, phase: Phase) -> Result<(), LedgerError>;

    /// Marks the current choices of `user_id` as final. Returns whether the user exists.
    async fn confirm(&self, user_id: &str) -> Result<bool, LedgerError>;

    /// Every user that ever signed in, ordered by email address.
    async fn users(&self) -> Result<Vec<UserRecord>, LedgerError>;

    /// Ordered by student number.
    async fn expected_students(&self) -> Result<Vec<ExpectedStudent>, LedgerError>;
}
