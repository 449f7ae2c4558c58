use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{ExpectedStudent, Ledger, LedgerError, Reservation, SeatRequest, UserRecord};
use crate::courses::{CourseId, CourseRecord};
use crate::phase::Phase;
use crate::session::{Identity, SessionResolver};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoredChoice {
    pub selected_at: i64,
    pub forced: bool,
}

#[derive(Debug, Default)]
struct State {
    courses: BTreeMap<CourseId, CourseRecord>,
    choices: BTreeMap<(String, CourseId), StoredChoice>,
    phase: Option<Phase>,
    sessions: HashMap<String, Identity>,
    users: BTreeMap<String, UserRecord>,
    expected: BTreeMap<i64, String>,
    pre_selected: HashMap<String, BTreeSet<CourseId>>,
}

impl State {
    fn withdraw_confirmation(&mut self, user_id: &str) {
        if let Some(user) = self.users.get_mut(user_id) {
            user.confirmed = false;
        }
    }

    /// A course of the same group as `course` that `user_id` already holds.
    fn held_in_group(&self, user_id: &str, course: CourseId) -> Option<CourseId> {
        let group = &self.courses.get(&course)?.group;
        self.choices
            .keys()
            .filter(|(user, held)| user == user_id && *held != course)
            .map(|(_, held)| *held)
            .find(|held| {
                self.courses
                    .get(held)
                    .is_some_and(|held| &held.group == group)
            })
    }
}

/// Ledger kept in process memory, with the same semantics as the database one.
///
/// Used by tests and for running without a database. [`MemoryLedger::set_unavailable`]
/// makes every write fail without touching the stored state,
/// [`MemoryLedger::set_failing_releases`] only the deletion of choices.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
    unavailable: AtomicBool,
    failing_releases: AtomicBool,
    writes: AtomicU64,
}

impl MemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_courses(courses: impl IntoIterator<Item = CourseRecord>) -> Self {
        let ledger = Self::new();
        ledger.state().courses = courses
            .into_iter()
            .map(|course| (course.id, CourseRecord { selected: 0, ..course }))
            .collect();
        ledger
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn writable(&self) -> Result<MutexGuard<'_, State>, LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable);
        }
        Ok(self.state())
    }

    fn wrote(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_failing_releases(&self, failing: bool) {
        self.failing_releases.store(failing, Ordering::SeqCst);
    }

    /// Number of writes that changed the stored state.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Signs `identity` in under `token`, creating the user on first sign-in.
    pub fn add_session(&self, token: &str, identity: Identity) {
        let mut state = self.state();
        state
            .users
            .entry(identity.user_id.clone())
            .or_insert_with(|| UserRecord {
                id: identity.user_id.clone(),
                name: identity.name.clone(),
                email: identity.email.clone(),
                department: identity.department.clone(),
                confirmed: false,
            });
        state.sessions.insert(token.to_owned(), identity);
    }

    pub fn add_expected_student(&self, id: i64, name: &str) {
        self.state().expected.insert(id, name.to_owned());
    }

    #[must_use]
    pub fn is_confirmed(&self, user_id: &str) -> bool {
        self.state()
            .users
            .get(user_id)
            .is_some_and(|user| user.confirmed)
    }

    pub fn add_pre_selected(&self, student_id: &str, courses: impl IntoIterator<Item = CourseId>) {
        self.state()
            .pre_selected
            .entry(student_id.to_owned())
            .or_default()
            .extend(courses);
    }

    #[must_use]
    pub fn stored_phase(&self) -> Option<Phase> {
        self.state().phase
    }

    #[must_use]
    pub fn choice(&self, user_id: &str, course: CourseId) -> Option<StoredChoice> {
        self.state()
            .choices
            .get(&(user_id.to_owned(), course))
            .copied()
    }

    #[must_use]
    pub fn seats_taken(&self, course: CourseId) -> usize {
        self.state()
            .choices
            .keys()
            .filter(|(_, chosen)| *chosen == course)
            .count()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn load_courses(&self) -> Result<Vec<CourseRecord>, LedgerError> {
        let state = self.state();
        Ok(state
            .courses
            .values()
            .map(|course| {
                let taken = state
                    .choices
                    .keys()
                    .filter(|(_, chosen)| *chosen == course.id)
                    .count();
                CourseRecord {
                    selected: u32::try_from(taken).unwrap_or(u32::MAX),
                    ..course.clone()
                }
            })
            .collect())
    }

    async fn replace_courses(&self, courses: &[CourseRecord]) -> Result<(), LedgerError> {
        let mut state = self.writable()?;
        state.choices.clear();
        for user in state.users.values_mut() {
            user.confirmed = false;
        }
        state.courses = courses
            .iter()
            .map(|course| {
                (course.id, CourseRecord {
                    selected: 0,
                    ..course.clone()
                })
            })
            .collect();
        self.wrote();
        Ok(())
    }

    async fn reserve_seat(&self, request: &SeatRequest<'_>) -> Result<Reservation, LedgerError> {
        let mut state = self.writable()?;
        let Some(max) = state.courses.get(&request.course).map(|course| course.max) else {
            return Ok(Reservation::UnknownCourse);
        };
        let key = (request.user_id.to_owned(), request.course);
        if state.choices.contains_key(&key) {
            return Ok(Reservation::AlreadySelected);
        }
        if !request.forced {
            if let Some(held) = state.held_in_group(request.user_id, request.course) {
                return Ok(Reservation::GroupConflict { held });
            }
        }
        let taken = state
            .choices
            .keys()
            .filter(|(_, chosen)| *chosen == request.course)
            .count();
        if taken >= usize::try_from(max).unwrap_or(usize::MAX) {
            return Ok(Reservation::CourseFull);
        }
        state.choices.insert(key, StoredChoice {
            selected_at: request.selected_at,
            forced: request.forced,
        });
        state.withdraw_confirmation(request.user_id);
        self.wrote();
        Ok(Reservation::Inserted {
            taken: u32::try_from(taken + 1).unwrap_or(u32::MAX),
        })
    }

    async fn release_seat(&self, user_id: &str, course: CourseId) -> Result<bool, LedgerError> {
        if self.failing_releases.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable);
        }
        let mut state = self.writable()?;
        let removed = state
            .choices
            .remove(&(user_id.to_owned(), course))
            .is_some();
        if removed {
            state.withdraw_confirmation(user_id);
            self.wrote();
        }
        Ok(removed)
    }

    async fn choices_of(&self, user_id: &str) -> Result<Vec<CourseId>, LedgerError> {
        Ok(self
            .state()
            .choices
            .keys()
            .filter(|(user, _)| user == user_id)
            .map(|(_, course)| *course)
            .collect())
    }

    async fn pre_selected(&self, student_id: &str) -> Result<Vec<CourseId>, LedgerError> {
        Ok(self
            .state()
            .pre_selected
            .get(student_id)
            .map(|courses| courses.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn load_phase(&self) -> Result<Phase, LedgerError> {
        Ok(*self.state().phase.get_or_insert(Phase::Closed))
    }

    async fn save_phase(&self, phase: Phase) -> Result<(), LedgerError> {
        self.writable()?.phase = Some(phase);
        self.wrote();
        Ok(())
    }

    async fn confirm(&self, user_id: &str) -> Result<bool, LedgerError> {
        let mut state = self.writable()?;
        let Some(user) = state.users.get_mut(user_id) else {
            return Ok(false);
        };
        user.confirmed = true;
        self.wrote();
        Ok(true)
    }

    async fn users(&self) -> Result<Vec<UserRecord>, LedgerError> {
        let mut users: Vec<_> = self.state().users.values().cloned().collect();
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    async fn expected_students(&self) -> Result<Vec<ExpectedStudent>, LedgerError> {
        Ok(self
            .state()
            .expected
            .iter()
            .map(|(id, name)| ExpectedStudent {
                id: *id,
                name: name.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl SessionResolver for MemoryLedger {
    async fn resolve(&self, token: &str) -> Result<Option<Identity>, LedgerError> {
        Ok(self.state().sessions.get(token).cloned())
    }
}
