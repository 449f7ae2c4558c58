use diesel::prelude::*;

use crate::schema::{choices, courses, expected_students, users};

#[derive(Queryable, Selectable, Insertable, Clone, Debug, PartialEq, Eq)]
#[diesel(table_name = courses)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CourseRow {
    pub id: i32,
    pub nmax: i32,
    pub title: String,
    pub teacher: String,
    pub location: String,
    pub ctype: String,
    pub cgroup: String,
    pub section_id: String,
    pub course_code: String,
    pub year_groups: i32,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = choices)]
pub struct NewChoice<'a> {
    pub userid: &'a str,
    pub courseid: i32,
    /// microseconds since the unix epoch
    pub seltime: i64,
    pub forced: bool,
}

#[derive(Queryable, Selectable, Clone, Debug)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub department: String,
}

#[derive(Queryable, Selectable, Clone, Debug)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserStatusRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub department: String,
    pub confirmed: bool,
}

#[derive(Queryable, Selectable, Clone, Debug)]
#[diesel(table_name = expected_students)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ExpectedStudentRow {
    pub id: i64,
    pub name: String,
}
