use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use crate::admission::AdmissionControl;
use crate::courses::CourseType;
use crate::ledger::LedgerError;
use crate::phase::Phase;
use crate::session::{student_number, Identity};

#[derive(thiserror::Error, Debug)]
pub enum ConfirmError {
    #[error("selections are not open")]
    SelectionsClosed,
    #[error("{} courses required: {required}, chosen: {chosen}", .course_type.as_str())]
    Unmet {
        course_type: CourseType,
        required: u32,
        chosen: u32,
    },
    #[error("unknown user {0}")]
    UnknownUser(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Standing {
    Unconfirmed,
    NeverSignedIn,
}

/// A student still missing from the final course list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StudentStatus {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    pub standing: Standing,
}

fn parse_student_id(email: &str) -> Option<i64> {
    student_number(email)?.parse().ok()
}

impl AdmissionControl {
    /// Marks the choices of `identity` as final once they meet the requirements of
    /// their department. Any later change of choices withdraws the confirmation.
    pub async fn confirm(&self, identity: &Identity) -> Result<(), ConfirmError> {
        if self.phase() != Phase::Open {
            return Err(ConfirmError::SelectionsClosed);
        }
        let enrollment = self.enroll(identity).await?;
        let requirements = self
            .cohorts
            .requirements(&identity.department)
            .unwrap_or_default();
        for (course_type, required) in [
            (CourseType::Sport, requirements.sport),
            (CourseType::NonSport, requirements.non_sport),
        ] {
            let chosen = enrollment.count_of(course_type);
            if chosen < required {
                return Err(ConfirmError::Unmet {
                    course_type,
                    required,
                    chosen,
                });
            }
        }
        if !self.ledger.confirm(&identity.user_id).await? {
            return Err(ConfirmError::UnknownUser(identity.user_id.clone()));
        }
        info!(user = %identity.user_id, chosen = ?enrollment.chosen(), "choices confirmed");
        Ok(())
    }

    /// Students that signed in without confirming, followed by expected students
    /// that never signed in.
    pub async fn unconfirmed(&self) -> Result<Vec<StudentStatus>, LedgerError> {
        let mut never_signed_in: BTreeMap<i64, String> = self
            .ledger
            .expected_students()
            .await?
            .into_iter()
            .map(|student| (student.id, student.name))
            .collect();

        let mut report = Vec::new();
        for user in self.ledger.users().await? {
            if self.cohorts.is_staff(&user.department) {
                continue;
            }
            let student_id = parse_student_id(&user.email);
            if let Some(id) = student_id {
                never_signed_in.remove(&id);
            }
            if user.confirmed {
                continue;
            }
            report.push(StudentStatus {
                name: user.name,
                student_id,
                email: Some(user.email),
                department: Some(user.department),
                standing: Standing::Unconfirmed,
            });
        }
        report.extend(
            never_signed_in
                .into_iter()
                .map(|(id, name)| StudentStatus {
                    name,
                    student_id: Some(id),
                    email: None,
                    department: None,
                    standing: Standing::NeverSignedIn,
                }),
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cca_selection_config::Requirements;

    use super::*;
    use crate::cohorts::Cohorts;
    use crate::courses::tests::record;
    use crate::courses::{CourseId, CourseRecord, YearGroups};
    use crate::ledger::Ledger;
    use crate::ledger::memory::MemoryLedger;

    fn identity(user_id: &str, department: &str, email: &str) -> Identity {
        Identity {
            user_id: user_id.to_owned(),
            name: user_id.to_uppercase(),
            department: department.to_owned(),
            email: email.to_owned(),
        }
    }

    async fn control(phase: Phase) -> (Arc<MemoryLedger>, AdmissionControl) {
        let ledger = Arc::new(MemoryLedger::with_courses([
            CourseRecord {
                course_type: CourseType::Sport,
                ..record(1, 5, "MW1")
            },
            record(2, 5, "TT1"),
        ]));
        let cohorts = Cohorts::new("Staff")
            .with_year_group("Y9", YearGroups(0b01))
            .with_requirements(
                "Y9",
                Requirements {
                    sport: 1,
                    non_sport: 1,
                },
            );
        let control = AdmissionControl::start(ledger.clone(), cohorts)
            .await
            .unwrap();
        control.transition(phase).await.unwrap();
        (ledger, control)
    }

    #[tokio::test]
    async fn confirm_requires_met_requirements() {
        let (ledger, control) = control(Phase::Open).await;
        let student = identity("a", "Y9", "s1001@school.edu");
        ledger.add_session("token", student.clone());
        let mut enrollment = control.enroll(&student).await.unwrap();
        control.choose(&mut enrollment, CourseId(1)).await.unwrap();

        assert!(matches!(
            control.confirm(&student).await,
            Err(ConfirmError::Unmet {
                course_type: CourseType::NonSport,
                required: 1,
                chosen: 0
            })
        ));
        assert!(!ledger.is_confirmed("a"));

        control.choose(&mut enrollment, CourseId(2)).await.unwrap();
        control.confirm(&student).await.unwrap();
        assert!(ledger.is_confirmed("a"));

        control.unchoose(&mut enrollment, CourseId(2)).await.unwrap();
        assert!(!ledger.is_confirmed("a"));
    }

    #[tokio::test]
    async fn confirm_only_while_open() {
        let (ledger, control) = control(Phase::ReadOnly).await;
        let student = identity("a", "Y9", "s1001@school.edu");
        ledger.add_session("token", student.clone());

        assert!(matches!(
            control.confirm(&student).await,
            Err(ConfirmError::SelectionsClosed)
        ));
    }

    #[tokio::test]
    async fn report_lists_unconfirmed_and_absent_students() {
        let (ledger, control) = control(Phase::Open).await;
        ledger.add_expected_student(1001, "Confirmed Student");
        ledger.add_expected_student(1002, "Pending Student");
        ledger.add_expected_student(1003, "Absent Student");
        ledger.add_session("t1", identity("a", "Y9", "s1001@school.edu"));
        ledger.add_session("t2", identity("b", "Y9", "S1002@school.edu"));
        ledger.add_session("t3", identity("staff", "Staff", "teacher@school.edu"));
        ledger.confirm("a").await.unwrap();

        let report = control.unconfirmed().await.unwrap();
        assert_eq!(report, vec![
            StudentStatus {
                name: "B".to_owned(),
                student_id: Some(1002),
                email: Some("S1002@school.edu".to_owned()),
                department: Some("Y9".to_owned()),
                standing: Standing::Unconfirmed,
            },
            StudentStatus {
                name: "Absent Student".to_owned(),
                student_id: Some(1003),
                email: None,
                department: None,
                standing: Standing::NeverSignedIn,
            },
        ]);
    }
}
