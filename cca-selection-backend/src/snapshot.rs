use cca_selection_config::Requirements;
use serde::Serialize;

use crate::admission::AdmissionControl;
use crate::courses::{CourseGroup, CourseId, CourseType};
use crate::phase::Phase;
use crate::schedule::ScheduledTransition;
use crate::selection::{Enrollment, PreselectReport};
use crate::session::Identity;

/// Everything a client needs to render the course list.
#[derive(Debug, Serialize)]
pub struct Snapshot {
    pub phase: Phase,
    pub user: String,
    pub department: String,
    pub staff: bool,
    pub groups: Vec<GroupListing>,
    pub chosen: Vec<CourseId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Requirements>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preselected: Option<PreselectReport>,
    /// pending phase change, staff only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled: Option<ScheduledTransition>,
}

#[derive(Debug, Serialize)]
pub struct GroupListing {
    pub handle: CourseGroup,
    pub name: String,
    pub courses: Vec<CourseListing>,
}

#[derive(Debug, Serialize)]
pub struct CourseListing {
    pub id: CourseId,
    pub title: String,
    pub teacher: String,
    pub location: String,
    pub course_type: CourseType,
    pub selected: u32,
    pub max: u32,
}

impl AdmissionControl {
    /// Courses grouped by course group, both in ascending order. Students only see
    /// the courses open to their year group, and none while the phase is `Closed`.
    #[must_use]
    pub fn snapshot(&self, identity: &Identity, enrollment: Option<&Enrollment>) -> Snapshot {
        let phase = self.phase();
        let staff = self.cohorts.is_staff(&identity.department);
        let cohort = self.cohorts.year_group(&identity.department);

        let mut groups: Vec<GroupListing> = self
            .cohorts
            .course_groups()
            .map(|(handle, name)| GroupListing {
                handle: handle.clone(),
                name: name.to_owned(),
                courses: Vec::new(),
            })
            .collect();
        if staff || phase != Phase::Closed {
            let mut courses: Vec<_> = self.courses.snapshot().values().cloned().collect();
            courses.sort_unstable_by_key(|course| course.id);
            let visible = courses.into_iter().filter(|course| {
                staff || cohort.is_some_and(|cohort| course.year_groups.admits(cohort))
            });
            for course in visible {
                let listing = CourseListing {
                    id: course.id,
                    title: course.title.clone(),
                    teacher: course.teacher.clone(),
                    location: course.location.clone(),
                    course_type: course.course_type,
                    selected: course.selected(),
                    max: course.max,
                };
                if let Some(group) = groups.iter_mut().find(|group| group.handle == course.group) {
                    group.courses.push(listing);
                } else {
                    groups.push(GroupListing {
                        handle: course.group.clone(),
                        name: course.group.0.clone(),
                        courses: vec![listing],
                    });
                }
            }
        }

        Snapshot {
            phase,
            user: identity.name.clone(),
            department: identity.department.clone(),
            staff,
            groups,
            chosen: enrollment.map(Enrollment::chosen).unwrap_or_default(),
            requirements: self.cohorts.requirements(&identity.department),
            preselected: None,
            scheduled: if staff { self.scheduled() } else { None },
        }
    }
}
