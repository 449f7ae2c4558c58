use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use cca_selection_database::models::{
    CourseRow, ExpectedStudentRow, NewChoice, UserRow, UserStatusRow,
};
use cca_selection_database::schema::{
    choices, courses, expected_students, misc, pre_selected, users,
};
use cca_selection_database::{DatabaseError, Pool};
use diesel::dsl::{count_star, exists};
use diesel::prelude::*;
use diesel_async::pooled_connection::deadpool::Object;
use diesel_async::scoped_futures::ScopedFutureExt as _;
use diesel_async::{AsyncConnection as _, AsyncPgConnection, RunQueryDsl};
use tracing::{debug, info};

use super::{ExpectedStudent, Ledger, LedgerError, Reservation, SeatRequest, UserRecord};
use crate::courses::{CourseGroup, CourseId, CourseRecord, YearGroups};
use crate::phase::Phase;
use crate::session::{Identity, SessionResolver};

const PHASE_KEY: &str = "state";
// postgres allows at most 65535 bind parameters per statement
const INSERT_CHUNK: usize = 1000;

#[derive(Clone)]
pub struct PgLedger {
    pool: Pool,
    checkout_timeout: Duration,
}

impl PgLedger {
    #[must_use]
    pub const fn new(pool: Pool, checkout_timeout: Duration) -> Self {
        Self {
            pool,
            checkout_timeout,
        }
    }

    async fn connection(&self) -> Result<Object<AsyncPgConnection>, LedgerError> {
        tokio::time::timeout(self.checkout_timeout, self.pool.get())
            .await
            .map_err(|_| LedgerError::PoolTimeout)?
            .map_err(|err| LedgerError::Database(DatabaseError::from(err)))
    }
}

fn course_record(row: CourseRow, selected: i64) -> Result<CourseRecord, LedgerError> {
    let course = CourseId(row.id);
    let invalid = |reason: String| LedgerError::InvalidCourse { course, reason };
    Ok(CourseRecord {
        id: course,
        max: u32::try_from(row.nmax).map_err(|_| invalid(format!("capacity {}", row.nmax)))?,
        course_type: row.ctype.parse().map_err(|err| invalid(format!("{err}")))?,
        year_groups: YearGroups(
            u32::try_from(row.year_groups)
                .map_err(|_| invalid(format!("year groups {}", row.year_groups)))?,
        ),
        selected: u32::try_from(selected).map_err(|_| invalid(format!("{selected} choices")))?,
        title: row.title,
        teacher: row.teacher,
        location: row.location,
        group: CourseGroup(row.cgroup),
        section_id: row.section_id,
        course_code: row.course_code,
    })
}

fn course_row(record: &CourseRecord) -> Result<CourseRow, LedgerError> {
    let invalid = |reason: String| LedgerError::InvalidCourse {
        course: record.id,
        reason,
    };
    Ok(CourseRow {
        id: record.id.0,
        nmax: i32::try_from(record.max).map_err(|_| invalid(format!("capacity {}", record.max)))?,
        title: record.title.clone(),
        teacher: record.teacher.clone(),
        location: record.location.clone(),
        ctype: record.course_type.as_str().to_owned(),
        cgroup: record.group.0.clone(),
        section_id: record.section_id.clone(),
        course_code: record.course_code.clone(),
        year_groups: i32::try_from(record.year_groups.0)
            .map_err(|_| invalid(format!("year groups {}", record.year_groups.0)))?,
    })
}

#[async_trait]
impl Ledger for PgLedger {
    async fn load_courses(&self) -> Result<Vec<CourseRecord>, LedgerError> {
        let mut connection = self.connection().await?;
        let rows = courses::table
            .select(CourseRow::as_select())
            .order(courses::id)
            .load(&mut connection)
            .await?;
        let selected: HashMap<i32, i64> = choices::table
            .group_by(choices::courseid)
            .select((choices::courseid, count_star()))
            .load::<(i32, i64)>(&mut connection)
            .await?
            .into_iter()
            .collect();
        rows.into_iter()
            .map(|row| {
                let taken = selected.get(&row.id).copied().unwrap_or_default();
                course_record(row, taken)
            })
            .collect()
    }

    async fn replace_courses(&self, records: &[CourseRecord]) -> Result<(), LedgerError> {
        let rows = records
            .iter()
            .map(course_row)
            .collect::<Result<Vec<_>, _>>()?;
        let mut connection = self.connection().await?;
        connection
            .transaction::<_, LedgerError, _>(|connection| {
                async move {
                    diesel::delete(choices::table).execute(connection).await?;
                    diesel::update(users::table)
                        .set(users::confirmed.eq(false))
                        .execute(connection)
                        .await?;
                    diesel::delete(courses::table).execute(connection).await?;
                    for chunk in rows.chunks(INSERT_CHUNK) {
                        diesel::insert_into(courses::table)
                            .values(chunk)
                            .execute(connection)
                            .await?;
                    }
                    Ok(())
                }
                .scope_boxed()
            })
            .await?;
        info!(courses = records.len(), "replaced all courses in the ledger");
        Ok(())
    }

    async fn reserve_seat(&self, request: &SeatRequest<'_>) -> Result<Reservation, LedgerError> {
        let mut connection = self.connection().await?;
        let reservation = connection
            .transaction::<_, LedgerError, _>(|connection| {
                async move {
                    // serializes the reservations of this user, then those of this course
                    users::table
                        .find(request.user_id)
                        .select(users::id)
                        .for_update()
                        .execute(connection)
                        .await?;
                    let Some((max, group)) = courses::table
                        .find(request.course.0)
                        .select((courses::nmax, courses::cgroup))
                        .for_update()
                        .get_result::<(i32, String)>(connection)
                        .await
                        .optional()?
                    else {
                        return Ok(Reservation::UnknownCourse);
                    };

                    let held = diesel::select(exists(
                        choices::table
                            .filter(choices::userid.eq(request.user_id))
                            .filter(choices::courseid.eq(request.course.0)),
                    ))
                    .get_result::<bool>(connection)
                    .await?;
                    if held {
                        return Ok(Reservation::AlreadySelected);
                    }

                    if !request.forced {
                        let conflict = choices::table
                            .inner_join(courses::table)
                            .filter(choices::userid.eq(request.user_id))
                            .filter(courses::cgroup.eq(&group))
                            .filter(choices::courseid.ne(request.course.0))
                            .select(choices::courseid)
                            .first::<i32>(connection)
                            .await
                            .optional()?;
                        if let Some(held) = conflict {
                            return Ok(Reservation::GroupConflict {
                                held: CourseId(held),
                            });
                        }
                    }

                    let taken = choices::table
                        .filter(choices::courseid.eq(request.course.0))
                        .select(count_star())
                        .get_result::<i64>(connection)
                        .await?;
                    if taken >= i64::from(max) {
                        return Ok(Reservation::CourseFull);
                    }

                    let inserted = diesel::insert_into(choices::table)
                        .values(NewChoice {
                            userid: request.user_id,
                            courseid: request.course.0,
                            seltime: request.selected_at,
                            forced: request.forced,
                        })
                        .on_conflict_do_nothing()
                        .execute(connection)
                        .await?;
                    if inserted == 0 {
                        return Ok(Reservation::AlreadySelected);
                    }
                    diesel::update(users::table.find(request.user_id))
                        .set(users::confirmed.eq(false))
                        .execute(connection)
                        .await?;
                    Ok(Reservation::Inserted {
                        taken: u32::try_from(taken + 1).unwrap_or(u32::MAX),
                    })
                }
                .scope_boxed()
            })
            .await?;
        debug!(user = request.user_id, course = %request.course, ?reservation, "reserve seat");
        Ok(reservation)
    }

    async fn release_seat(&self, user_id: &str, course: CourseId) -> Result<bool, LedgerError> {
        let mut connection = self.connection().await?;
        connection
            .transaction::<_, LedgerError, _>(|connection| {
                async move {
                    let deleted = diesel::delete(
                        choices::table
                            .filter(choices::userid.eq(user_id))
                            .filter(choices::courseid.eq(course.0)),
                    )
                    .execute(connection)
                    .await?;
                    if deleted == 0 {
                        return Ok(false);
                    }
                    diesel::update(users::table.find(user_id))
                        .set(users::confirmed.eq(false))
                        .execute(connection)
                        .await?;
                    Ok(true)
                }
                .scope_boxed()
            })
            .await
    }

    async fn choices_of(&self, user_id: &str) -> Result<Vec<CourseId>, LedgerError> {
        let mut connection = self.connection().await?;
        Ok(choices::table
            .filter(choices::userid.eq(user_id))
            .select(choices::courseid)
            .order(choices::courseid)
            .load::<i32>(&mut connection)
            .await?
            .into_iter()
            .map(CourseId)
            .collect())
    }

    async fn pre_selected(&self, student_id: &str) -> Result<Vec<CourseId>, LedgerError> {
        let mut connection = self.connection().await?;
        Ok(pre_selected::table
            .filter(pre_selected::student_id.eq(student_id))
            .select(pre_selected::course_id)
            .order(pre_selected::course_id)
            .load::<i32>(&mut connection)
            .await?
            .into_iter()
            .map(CourseId)
            .collect())
    }

    async fn load_phase(&self) -> Result<Phase, LedgerError> {
        let mut connection = self.connection().await?;
        let stored = misc::table
            .find(PHASE_KEY)
            .select(misc::value)
            .get_result::<i32>(&mut connection)
            .await
            .optional()?;
        let Some(stored) = stored else {
            diesel::insert_into(misc::table)
                .values((misc::key.eq(PHASE_KEY), misc::value.eq(i32::from(Phase::Closed))))
                .on_conflict_do_nothing()
                .execute(&mut connection)
                .await?;
            return Ok(Phase::Closed);
        };
        Phase::try_from(stored).map_err(LedgerError::InvalidPhase)
    }

    async fn save_phase(&self, phase: Phase) -> Result<(), LedgerError> {
        let mut connection = self.connection().await?;
        let value = i32::from(phase);
        diesel::insert_into(misc::table)
            .values((misc::key.eq(PHASE_KEY), misc::value.eq(value)))
            .on_conflict(misc::key)
            .do_update()
            .set(misc::value.eq(value))
            .execute(&mut connection)
            .await?;
        Ok(())
    }

    async fn confirm(&self, user_id: &str) -> Result<bool, LedgerError> {
        let mut connection = self.connection().await?;
        let updated = diesel::update(users::table.find(user_id))
            .set(users::confirmed.eq(true))
            .execute(&mut connection)
            .await?;
        Ok(updated != 0)
    }

    async fn users(&self) -> Result<Vec<UserRecord>, LedgerError> {
        let mut connection = self.connection().await?;
        Ok(users::table
            .select(UserStatusRow::as_select())
            .order(users::email)
            .load(&mut connection)
            .await?
            .into_iter()
            .map(|user| UserRecord {
                id: user.id,
                name: user.name,
                email: user.email,
                department: user.department,
                confirmed: user.confirmed,
            })
            .collect())
    }

    async fn expected_students(&self) -> Result<Vec<ExpectedStudent>, LedgerError> {
        let mut connection = self.connection().await?;
        Ok(expected_students::table
            .select(ExpectedStudentRow::as_select())
            .order(expected_students::id)
            .load(&mut connection)
            .await?
            .into_iter()
            .map(|student| ExpectedStudent {
                id: student.id,
                name: student.name,
            })
            .collect())
    }
}

#[async_trait]
impl SessionResolver for PgLedger {
    async fn resolve(&self, token: &str) -> Result<Option<Identity>, LedgerError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| {
                i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX)
            });
        let mut connection = self.connection().await?;
        let user = users::table
            .filter(users::session.eq(token))
            .filter(users::expr.gt(now))
            .select(UserRow::as_select())
            .get_result(&mut connection)
            .await
            .optional()?;
        Ok(user.map(|user| Identity {
            user_id: user.id,
            name: user.name,
            department: user.department,
            email: user.email,
        }))
    }
}
