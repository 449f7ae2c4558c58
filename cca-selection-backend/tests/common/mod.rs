#![allow(dead_code)]

use std::sync::Arc;

use cca_selection_backend::admission::AdmissionControl;
use cca_selection_backend::cohorts::Cohorts;
use cca_selection_backend::courses::{CourseGroup, CourseId, CourseRecord, CourseType, YearGroups};
use cca_selection_backend::ledger::memory::MemoryLedger;
use cca_selection_backend::phase::Phase;
use cca_selection_backend::session::Identity;

pub fn course(id: i32, max: u32, group: &str) -> CourseRecord {
    CourseRecord {
        id: CourseId(id),
        title: format!("Course {id}"),
        teacher: "Teacher".to_owned(),
        location: "Room".to_owned(),
        max,
        course_type: CourseType::Sport,
        group: CourseGroup(group.to_owned()),
        section_id: String::new(),
        course_code: format!("C{id}"),
        year_groups: YearGroups(0b1),
        selected: 0,
    }
}

pub fn student(user_id: &str) -> Identity {
    Identity {
        user_id: user_id.to_owned(),
        name: user_id.to_uppercase(),
        department: "Y9".to_owned(),
        email: format!("s{user_id}@school.edu"),
    }
}

pub fn cohorts() -> Cohorts {
    Cohorts::new("Staff")
        .with_year_group("Y9", YearGroups(0b1))
        .with_course_group("MW1", "Monday/Wednesday 1")
        .with_course_group("TT1", "Tuesday/Thursday 1")
}

pub async fn control_in(
    phase: Phase,
    courses: Vec<CourseRecord>,
) -> (Arc<MemoryLedger>, Arc<AdmissionControl>) {
    cca_selection_telemetry::setup_test_telemetry();
    let ledger = Arc::new(MemoryLedger::with_courses(courses));
    let control = AdmissionControl::start(ledger.clone(), cohorts())
        .await
        .unwrap();
    control.transition(phase).await.unwrap();
    (ledger, Arc::new(control))
}
