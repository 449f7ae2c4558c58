use std::collections::{BTreeMap, HashMap};

use cca_selection_config::{Config, Requirements};

use crate::courses::{CourseGroup, YearGroups};

/// School structure the admission rules depend on: which department is staff,
/// which year groups a department belongs to and which course groups exist.
#[derive(Clone, Debug, Default)]
pub struct Cohorts {
    staff_department: String,
    year_groups: HashMap<String, YearGroups>,
    course_groups: BTreeMap<CourseGroup, String>,
    requirements: HashMap<String, Requirements>,
}

impl Cohorts {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            staff_department: config.staff_department.clone(),
            year_groups: config
                .year_groups
                .iter()
                .map(|(department, mask)| (department.clone(), YearGroups(*mask)))
                .collect(),
            course_groups: config
                .course_groups
                .iter()
                .map(|(handle, name)| (CourseGroup(handle.clone()), name.clone()))
                .collect(),
            requirements: config
                .requirements
                .iter()
                .map(|(department, requirements)| (department.clone(), *requirements))
                .collect(),
        }
    }

    #[must_use]
    pub fn new(staff_department: &str) -> Self {
        Self {
            staff_department: staff_department.to_owned(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_year_group(mut self, department: &str, year_groups: YearGroups) -> Self {
        self.year_groups.insert(department.to_owned(), year_groups);
        self
    }

    #[must_use]
    pub fn with_course_group(mut self, handle: &str, name: &str) -> Self {
        self.course_groups
            .insert(CourseGroup(handle.to_owned()), name.to_owned());
        self
    }

    #[must_use]
    pub fn with_requirements(mut self, department: &str, requirements: Requirements) -> Self {
        self.requirements.insert(department.to_owned(), requirements);
        self
    }

    #[must_use]
    pub fn is_staff(&self, department: &str) -> bool {
        department == self.staff_department
    }

    /// `None` for departments that are not a student year group.
    #[must_use]
    pub fn year_group(&self, department: &str) -> Option<YearGroups> {
        self.year_groups.get(department).copied()
    }

    #[must_use]
    pub fn requirements(&self, department: &str) -> Option<Requirements> {
        self.requirements.get(department).copied()
    }

    /// Configured course groups ordered by handle.
    pub fn course_groups(&self) -> impl Iterator<Item = (&CourseGroup, &str)> {
        self.course_groups
            .iter()
            .map(|(handle, name)| (handle, name.as_str()))
    }

    #[must_use]
    pub fn has_course_group(&self, group: &CourseGroup) -> bool {
        self.course_groups.contains_key(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_from_config() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "url": "https://cca.example.org",
            "database_url": "postgres://localhost/cca",
            "staff_department": "Teachers",
            "year_groups": { "Y9": 1, "Y10": 2 },
            "course_groups": { "MW1": "Monday/Wednesday 1" },
            "requirements": { "Y9": { "sport": 1 } }
        }))
        .unwrap();
        let cohorts = Cohorts::from_config(&config);

        assert!(cohorts.is_staff("Teachers"));
        assert!(!cohorts.is_staff("Y9"));
        assert_eq!(cohorts.year_group("Y10"), Some(YearGroups(2)));
        assert_eq!(cohorts.year_group("Teachers"), None);
        assert!(cohorts.has_course_group(&CourseGroup("MW1".to_owned())));
        assert_eq!(
            cohorts.requirements("Y9"),
            Some(Requirements {
                sport: 1,
                non_sport: 0
            })
        );
    }
}
