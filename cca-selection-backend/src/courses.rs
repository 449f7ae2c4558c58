use core::fmt::{self, Display};
use core::num::ParseIntError;
use core::str::FromStr;
use core::sync::atomic::{AtomicU32, Ordering};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CourseId(pub i32);

impl Display for CourseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl FromStr for CourseId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CourseType {
    #[serde(rename = "Sport")]
    Sport,
    #[serde(rename = "Non-sport")]
    NonSport,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown course type {0:?}, expected \"Sport\" or \"Non-sport\"")]
pub struct UnknownCourseType(pub String);

impl CourseType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sport => "Sport",
            Self::NonSport => "Non-sport",
        }
    }
}

impl FromStr for CourseType {
    type Err = UnknownCourseType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Sport" => Ok(Self::Sport),
            "Non-sport" => Ok(Self::NonSport),
            other => Err(UnknownCourseType(other.to_owned())),
        }
    }
}

/// Handle of a course group, e.g. `MW1`. A student holds at most one course per group.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CourseGroup(pub String);

impl Display for CourseGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bitmask over the year groups (cohorts) of the school.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct YearGroups(pub u32);

impl YearGroups {
    #[must_use]
    pub const fn admits(self, cohort: Self) -> bool {
        self.0 & cohort.0 != 0
    }
}

/// A course as it is imported and persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseRecord {
    pub id: CourseId,
    pub title: String,
    #[serde(default)]
    pub teacher: String,
    #[serde(default)]
    pub location: String,
    pub max: u32,
    pub course_type: CourseType,
    pub group: CourseGroup,
    #[serde(default)]
    pub section_id: String,
    #[serde(default)]
    pub course_code: String,
    pub year_groups: YearGroups,
    /// Seats taken according to the ledger. Ignored on import.
    #[serde(default)]
    pub selected: u32,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatError {
    #[error("no such course {0}")]
    NotFound(CourseId),
    #[error("course {0} is full")]
    CourseFull(CourseId),
}

#[derive(Debug)]
pub struct Course {
    pub id: CourseId,
    pub title: String,
    pub teacher: String,
    pub location: String,
    pub max: u32,
    pub course_type: CourseType,
    pub group: CourseGroup,
    pub section_id: String,
    pub course_code: String,
    pub year_groups: YearGroups,
    selected: AtomicU32,
    /// Held across a ledger write and the matching count update.
    seats: Mutex<()>,
}

impl Course {
    #[must_use]
    pub fn selected(&self) -> u32 {
        self.selected.load(Ordering::Acquire)
    }

    /// Takes one seat if one is left and returns the new seat count.
    fn claim(&self) -> Result<u32, SeatError> {
        self.selected
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |selected| {
                (selected < self.max).then_some(selected + 1)
            })
            .map(|previous| previous + 1)
            .map_err(|_| SeatError::CourseFull(self.id))
    }

    /// Serializes seat changes of this course so the count follows the ledger
    /// in commit order.
    pub async fn lock_seats(&self) -> MutexGuard<'_, ()> {
        self.seats.lock().await
    }

    /// Overwrites the seat count with what the ledger holds.
    pub(crate) fn resync(&self, selected: u32) {
        let previous = self.selected.swap(selected, Ordering::AcqRel);
        warn!(course = %self.id, previous, selected, "resynchronized seat count");
    }

    /// Gives one seat back and returns the new seat count. Never goes below zero.
    fn release(&self) -> u32 {
        match self
            .selected
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |selected| {
                selected.checked_sub(1)
            }) {
            Ok(previous) => previous - 1,
            Err(_) => {
                warn!(course = %self.id, "seat count of course would become negative");
                0
            }
        }
    }

    #[must_use]
    pub fn to_record(&self) -> CourseRecord {
        CourseRecord {
            id: self.id,
            title: self.title.clone(),
            teacher: self.teacher.clone(),
            location: self.location.clone(),
            max: self.max,
            course_type: self.course_type,
            group: self.group.clone(),
            section_id: self.section_id.clone(),
            course_code: self.course_code.clone(),
            year_groups: self.year_groups,
            selected: self.selected(),
        }
    }
}

impl From<CourseRecord> for Course {
    fn from(record: CourseRecord) -> Self {
        Self {
            id: record.id,
            title: record.title,
            teacher: record.teacher,
            location: record.location,
            max: record.max,
            course_type: record.course_type,
            group: record.group,
            section_id: record.section_id,
            course_code: record.course_code,
            year_groups: record.year_groups,
            selected: AtomicU32::new(record.selected),
            seats: Mutex::new(()),
        }
    }
}

pub type CourseMap = HashMap<CourseId, Arc<Course>>;

/// Authoritative in-memory course set. Lookups clone an `Arc` of the current map so a
/// wholesale [`CourseRegistry::load`] never blocks readers for longer than a pointer swap.
#[derive(Debug, Default)]
pub struct CourseRegistry {
    courses: RwLock<Arc<CourseMap>>,
}

impl CourseRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole course set. Callers must hold the admission phase at `Closed`.
    pub fn load(&self, records: impl IntoIterator<Item = CourseRecord>) {
        let courses: CourseMap = records
            .into_iter()
            .map(|record| {
                if record.selected > record.max {
                    warn!(
                        course = %record.id,
                        selected = record.selected,
                        max = record.max,
                        "course is overbooked in the ledger"
                    );
                }
                (record.id, Arc::new(Course::from(record)))
            })
            .collect();
        *self
            .courses
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(courses);
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<CourseMap> {
        Arc::clone(&self.courses.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn get(&self, id: CourseId) -> Result<Arc<Course>, SeatError> {
        self.courses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(SeatError::NotFound(id))
    }

    pub fn increment_seat(&self, id: CourseId) -> Result<u32, SeatError> {
        self.get(id)?.claim()
    }

    pub fn decrement_seat(&self, id: CourseId) -> Result<u32, SeatError> {
        Ok(self.get(id)?.release())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.courses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    pub fn record(id: i32, max: u32, group: &str) -> CourseRecord {
        CourseRecord {
            id: CourseId(id),
            title: format!("Course {id}"),
            teacher: "Teacher".to_owned(),
            location: "Room".to_owned(),
            max,
            course_type: CourseType::NonSport,
            group: CourseGroup(group.to_owned()),
            section_id: String::new(),
            course_code: format!("C{id}"),
            year_groups: YearGroups(0b11),
            selected: 0,
        }
    }

    #[test]
    fn increment_stops_at_capacity() {
        let registry = CourseRegistry::new();
        registry.load([record(1, 2, "MW1")]);

        assert_eq!(registry.increment_seat(CourseId(1)), Ok(1));
        assert_eq!(registry.increment_seat(CourseId(1)), Ok(2));
        assert_eq!(
            registry.increment_seat(CourseId(1)),
            Err(SeatError::CourseFull(CourseId(1)))
        );
        assert_eq!(registry.get(CourseId(1)).map(|c| c.selected()), Ok(2));
    }

    #[test]
    fn decrement_never_goes_negative() {
        let registry = CourseRegistry::new();
        registry.load([record(1, 2, "MW1")]);

        assert_eq!(registry.decrement_seat(CourseId(1)), Ok(0));
        assert_eq!(registry.get(CourseId(1)).map(|c| c.selected()), Ok(0));
    }

    #[test]
    fn unknown_course() {
        let registry = CourseRegistry::new();
        assert_eq!(
            registry.increment_seat(CourseId(7)).unwrap_err(),
            SeatError::NotFound(CourseId(7))
        );
        assert_eq!(
            registry.decrement_seat(CourseId(7)).unwrap_err(),
            SeatError::NotFound(CourseId(7))
        );
    }

    #[test]
    fn load_replaces_everything() {
        let registry = CourseRegistry::new();
        registry.load([record(1, 2, "MW1"), record(2, 2, "MW1")]);
        registry.load([CourseRecord {
            selected: 1,
            ..record(3, 5, "TT1")
        }]);

        assert_eq!(registry.len(), 1);
        assert!(registry.get(CourseId(1)).is_err());
        assert_eq!(registry.get(CourseId(3)).map(|c| c.selected()), Ok(1));
    }

    #[test]
    fn concurrent_claims_never_overbook() {
        let registry = Arc::new(CourseRegistry::new());
        registry.load([record(1, 10, "MW1")]);

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.increment_seat(CourseId(1)).is_ok())
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|accepted| *accepted)
            .count();

        assert_eq!(accepted, 10);
        assert_eq!(registry.get(CourseId(1)).map(|c| c.selected()), Ok(10));
    }

    #[test]
    fn course_type_names() {
        assert_eq!("Sport".parse(), Ok(CourseType::Sport));
        assert_eq!("Non-sport".parse(), Ok(CourseType::NonSport));
        assert!("Chess".parse::<CourseType>().is_err());
    }
}
