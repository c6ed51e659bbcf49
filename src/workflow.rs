//! Single-grade registration with threshold alerting.
//!
//! The grade is the primary artifact: once it is written, failures to look up
//! the enrollment, the threshold or the guardians only suppress alerting. The
//! one exception is a breaching grade whose student has no guardian on file,
//! which fails the call after the grade has been committed.

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::directory::Directories;
use crate::error::{Error, Result};
use crate::message;
use crate::models::{
    Alert, AlertKind, EnrollmentInfo, Grade, GradeRequest, Guardian, OutboxMessage, Registration,
    Role, Submitter, ThresholdDefinition,
};
use crate::store::Stores;
use crate::threshold::is_below_threshold;

/// A lookup result the caller may already hold.
#[derive(Debug, Clone, PartialEq)]
pub enum Prefetched<T> {
    /// Not looked up yet; the workflow resolves it itself.
    Absent,
    Found(T),
    /// Looked up without a usable answer; alerting is skipped.
    Missing,
}

impl<T> Default for Prefetched<T> {
    fn default() -> Self {
        Prefetched::Absent
    }
}

impl<T> From<Option<T>> for Prefetched<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Prefetched::Found(value),
            None => Prefetched::Missing,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Prefetch {
    pub enrollment: Prefetched<EnrollmentInfo>,
    pub threshold: Prefetched<ThresholdDefinition>,
}

#[derive(Clone)]
pub struct RegisterGradeWorkflow {
    pub(crate) stores: Stores,
    pub(crate) directories: Directories,
}

impl RegisterGradeWorkflow {
    pub fn new(stores: Stores, directories: Directories) -> Self {
        RegisterGradeWorkflow {
            stores,
            directories,
        }
    }

    /// Registers one grade on behalf of an authenticated submitter.
    ///
    /// Teachers may only grade enrollments of their assigned classes.
    pub async fn submit(
        &self,
        submitter: &Submitter,
        request: &GradeRequest,
    ) -> Result<Registration> {
        submitter.role.ensure_can_grade()?;

        let mut prefetch = Prefetch::default();
        if submitter.role == Role::Teacher {
            let enrollment = self
                .directories
                .enrollment(&request.enrollment_id, &submitter.token)
                .await?
                .ok_or_else(|| {
                    Error::NotFound(format!("enrollment not found: {}", request.enrollment_id))
                })?;
            let classes = self
                .directories
                .classes_for_teacher(&submitter.user_id, &submitter.token)
                .await?;
            if !classes.contains(&enrollment.class_id) {
                return Err(Error::Authorization(format!(
                    "teacher {} is not assigned to class {}",
                    submitter.user_id, enrollment.class_id
                )));
            }
            prefetch.enrollment = Prefetched::Found(enrollment);
        }

        self.register(request, &submitter.user_id, &submitter.token, prefetch)
            .await
    }

    /// Persists the grade and, when it breaches its threshold, records one
    /// alert and one pending email per guardian with an address.
    pub async fn register(
        &self,
        request: &GradeRequest,
        registered_by: &str,
        token: &str,
        prefetch: Prefetch,
    ) -> Result<Registration> {
        let value = request.validate()?;
        if !self
            .stores
            .grades
            .evaluation_type_exists(&request.evaluation_type_id)
            .await?
        {
            return Err(Error::NotFound(format!(
                "evaluation type not found: {}",
                request.evaluation_type_id
            )));
        }

        let candidate = Grade {
            id: Uuid::new_v4(),
            enrollment_id: request.enrollment_id.clone(),
            evaluation_type_id: request.evaluation_type_id.clone(),
            period_id: request.period_id.clone(),
            scale_id: request.scale_id.clone(),
            value,
            weight: request.weight,
            notes: request.notes.clone(),
            grading_column: request.grading_column().to_string(),
            registered_on: Utc::now().date_naive(),
            registered_by: registered_by.to_string(),
        };
        let grade = self.stores.grades.upsert(&candidate).await?;
        info!(
            grade_id = %grade.id,
            enrollment_id = %grade.enrollment_id,
            value = %grade.value,
            "Grade persisted"
        );

        let no_alert = |grade: Grade| Registration {
            grade,
            alert_generated: false,
            notifications_pending: 0,
        };

        let Some(enrollment) = self.resolve_enrollment(&grade, token, prefetch.enrollment).await
        else {
            return Ok(no_alert(grade));
        };
        let Some(threshold) = self.resolve_threshold(&grade, token, prefetch.threshold).await
        else {
            return Ok(no_alert(grade));
        };
        if !is_below_threshold(&grade.value, &threshold) {
            debug!(grade_id = %grade.id, "Grade meets threshold");
            return Ok(no_alert(grade));
        }

        let student_id = enrollment.student_id.as_str();
        let guardians = match self.directories.guardians_of_student(student_id, token).await {
            Ok(guardians) => guardians,
            Err(e) => {
                warn!(
                    grade_id = %grade.id,
                    student_id,
                    error = %e,
                    "Guardian lookup failed, skipping alert"
                );
                return Ok(no_alert(grade));
            }
        };
        if guardians.is_empty() {
            return Err(Error::Validation(format!(
                "student {student_id} has no guardian on file; \
                 a graded student must have at least one guardian"
            )));
        }

        let notifications_pending = self
            .raise_alert(&grade, student_id, &threshold, &guardians)
            .await?;

        Ok(Registration {
            grade,
            alert_generated: true,
            notifications_pending,
        })
    }

    async fn resolve_enrollment(
        &self,
        grade: &Grade,
        token: &str,
        prefetched: Prefetched<EnrollmentInfo>,
    ) -> Option<EnrollmentInfo> {
        let enrollment = match prefetched {
            Prefetched::Found(enrollment) => Some(enrollment),
            Prefetched::Missing => None,
            Prefetched::Absent => {
                match self.directories.enrollment(&grade.enrollment_id, token).await {
                    Ok(Some(enrollment)) => Some(enrollment),
                    Ok(None) => {
                        warn!(
                            grade_id = %grade.id,
                            enrollment_id = %grade.enrollment_id,
                            "Enrollment unknown, skipping alert evaluation"
                        );
                        None
                    }
                    Err(e) => {
                        warn!(
                            grade_id = %grade.id,
                            error = %e,
                            "Enrollment lookup failed, skipping alert evaluation"
                        );
                        None
                    }
                }
            }
        };
        enrollment.filter(|enrollment| !enrollment.student_id.is_empty())
    }

    async fn resolve_threshold(
        &self,
        grade: &Grade,
        token: &str,
        prefetched: Prefetched<ThresholdDefinition>,
    ) -> Option<ThresholdDefinition> {
        match prefetched {
            Prefetched::Found(threshold) => Some(threshold),
            Prefetched::Missing => None,
            Prefetched::Absent => match self.directories.threshold(&grade.scale_id, token).await {
                Ok(threshold) => {
                    if threshold.is_none() {
                        debug!(scale_id = %grade.scale_id, "No threshold configured for scale");
                    }
                    threshold
                }
                Err(e) => {
                    warn!(
                        grade_id = %grade.id,
                        scale_id = %grade.scale_id,
                        error = %e,
                        "Threshold lookup failed, skipping alert evaluation"
                    );
                    None
                }
            },
        }
    }

    /// Records the alert, then one outbox message per guardian with an email.
    /// Returns how many messages were enqueued.
    async fn raise_alert(
        &self,
        grade: &Grade,
        student_id: &str,
        threshold: &ThresholdDefinition,
        guardians: &[Guardian],
    ) -> Result<usize> {
        let alert = self
            .stores
            .alerts
            .create(&Alert {
                id: Uuid::new_v4(),
                grade_id: grade.id,
                student_id: student_id.to_string(),
                guardian_id: None,
                kind: AlertKind::LowGrade,
                message: message::alert_message(&grade.value),
                read: false,
                read_at: None,
                created_at: Utc::now(),
            })
            .await?;
        info!(alert_id = %alert.id, grade_id = %grade.id, student_id, "Low grade alert created");

        let mut enqueued = 0;
        for guardian in guardians {
            let Some(email) = guardian.usable_email() else {
                debug!(guardian_id = %guardian.id, "Guardian has no email, skipping");
                continue;
            };
            let outbound = OutboxMessage::pending_email(
                alert.id,
                email,
                message::LOW_GRADE_SUBJECT.to_string(),
                message::guardian_email_body(guardian, student_id, &grade.value, threshold),
            );
            let stored = self.stores.outbox.create(&outbound).await?;
            debug!(outbox_id = %stored.id, recipient = %stored.recipient, "Notification enqueued");
            enqueued += 1;
        }

        Ok(enqueued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::memory::{MemoryStore, StaticDirectory};
    use crate::models::{GradeValue, OutboxState};
    use std::sync::Arc;
    use std::time::Duration;

    const TOKEN: &str = "token";

    fn request(enrollment: &str, numeric: Option<f64>) -> GradeRequest {
        GradeRequest {
            enrollment_id: enrollment.to_string(),
            evaluation_type_id: "EXAM".to_string(),
            period_id: "P1".to_string(),
            scale_id: "S1".to_string(),
            numeric_value: numeric,
            ..GradeRequest::default()
        }
    }

    fn directory() -> StaticDirectory {
        StaticDirectory::default()
            .with_enrollment("E1", "C1", "A1")
            .with_numeric_threshold("S1", 11.0)
            .with_guardian("A1", "G1", Some("g1@example.com"), "Rosa Diaz")
            .with_teacher_classes("T1", &["C1"])
    }

    fn build(directory: StaticDirectory) -> (RegisterGradeWorkflow, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::with_evaluation_types(["EXAM", "QUIZ"]));
        let workflow = RegisterGradeWorkflow::new(
            Stores::shared(store.clone()),
            Directories::shared(Arc::new(directory), Duration::from_millis(200)),
        );
        (workflow, store)
    }

    fn submitter(role: Role) -> Submitter {
        Submitter {
            user_id: "T1".to_string(),
            role,
            token: TOKEN.to_string(),
        }
    }

    #[tokio::test]
    async fn low_grade_enqueues_email_for_guardian() {
        let (workflow, store) = build(directory());

        let registration = workflow
            .register(&request("E1", Some(9.0)), "T1", TOKEN, Prefetch::default())
            .await
            .unwrap();

        assert!(registration.alert_generated);
        assert_eq!(registration.notifications_pending, 1);
        let outbox = store.outbox_messages();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].recipient, "g1@example.com");
        assert_eq!(outbox[0].state, OutboxState::Pending);
        assert_eq!(outbox[0].attempts, 0);

        let alerts = store.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].grade_id, registration.grade.id);
        assert_eq!(alerts[0].student_id, "A1");
        assert_eq!(alerts[0].guardian_id, None);
        assert_eq!(outbox[0].alert_id, alerts[0].id);
    }

    #[tokio::test]
    async fn missing_or_double_value_writes_nothing() {
        let directory = directory();
        let (workflow, store) = build(directory.clone());

        let neither = workflow
            .register(&request("E1", None), "T1", TOKEN, Prefetch::default())
            .await
            .unwrap_err();
        assert_eq!(neither.kind(), ErrorKind::Validation);

        let both = GradeRequest {
            literal_value: Some("B".to_string()),
            ..request("E1", Some(12.0))
        };
        let err = workflow
            .register(&both, "T1", TOKEN, Prefetch::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert!(store.grades().is_empty());
        assert!(directory.lookups().is_empty());
    }

    #[tokio::test]
    async fn reregistering_tuple_updates_the_same_grade() {
        let (workflow, store) = build(directory());

        let first = workflow
            .register(&request("E1", Some(14.0)), "T1", TOKEN, Prefetch::default())
            .await
            .unwrap();
        let second = workflow
            .register(&request("E1", Some(16.0)), "T1", TOKEN, Prefetch::default())
            .await
            .unwrap();

        assert_eq!(first.grade.id, second.grade.id);
        let grades = store.grades();
        assert_eq!(grades.len(), 1);
        assert_eq!(grades[0].value, GradeValue::Numeric(16.0));
    }

    #[tokio::test]
    async fn passing_grade_creates_no_alert() {
        let (workflow, store) = build(directory());

        let registration = workflow
            .register(&request("E1", Some(12.0)), "T1", TOKEN, Prefetch::default())
            .await
            .unwrap();

        assert!(!registration.alert_generated);
        assert_eq!(registration.notifications_pending, 0);
        assert!(store.alerts().is_empty());
        assert!(store.outbox_messages().is_empty());
    }

    #[tokio::test]
    async fn no_guardian_fails_after_grade_is_committed() {
        let directory = StaticDirectory::default()
            .with_enrollment("E2", "C1", "A2")
            .with_numeric_threshold("S1", 11.0);
        let (workflow, store) = build(directory);

        let err = workflow
            .register(&request("E2", Some(10.0)), "T1", TOKEN, Prefetch::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("guardian"));

        let grades = store.grades();
        assert_eq!(grades.len(), 1);
        let reread = workflow.stores.grades.find(grades[0].id).await.unwrap();
        assert_eq!(reread.unwrap().value, GradeValue::Numeric(10.0));
        assert!(store.outbox_messages().is_empty());
    }

    #[tokio::test]
    async fn guardians_without_email_are_skipped() {
        let directory = directory().with_guardian("A1", "G2", None, "Luis Diaz");
        let (workflow, store) = build(directory);

        let registration = workflow
            .register(&request("E1", Some(10.0)), "T1", TOKEN, Prefetch::default())
            .await
            .unwrap();

        assert_eq!(registration.notifications_pending, 1);
        assert_eq!(store.outbox_messages().len(), 1);
        assert_eq!(store.alerts().len(), 1);
    }

    #[tokio::test]
    async fn failed_lookups_degrade_to_no_alert() {
        let unknown_enrollment = StaticDirectory::default()
            .with_numeric_threshold("S1", 11.0)
            .unavailable("E1");
        let (workflow, store) = build(unknown_enrollment);
        let registration = workflow
            .register(&request("E1", Some(3.0)), "T1", TOKEN, Prefetch::default())
            .await
            .unwrap();
        assert!(!registration.alert_generated);
        assert_eq!(store.grades().len(), 1);

        let slow_threshold = directory().with_slow_key("S1", Duration::from_secs(5));
        let (workflow, store) = build(slow_threshold);
        let registration = workflow
            .register(&request("E1", Some(3.0)), "T1", TOKEN, Prefetch::default())
            .await
            .unwrap();
        assert!(!registration.alert_generated);
        assert!(store.alerts().is_empty());
    }

    #[tokio::test]
    async fn guardian_lookup_failure_skips_alert() {
        let (workflow, store) = build(directory().unavailable("A1"));

        let registration = workflow
            .register(&request("E1", Some(3.0)), "T1", TOKEN, Prefetch::default())
            .await
            .unwrap();

        assert!(!registration.alert_generated);
        assert_eq!(registration.notifications_pending, 0);
        assert_eq!(store.grades().len(), 1);
        assert!(store.alerts().is_empty());
        assert!(store.outbox_messages().is_empty());
    }

    #[tokio::test]
    async fn prefetched_values_skip_lookups() {
        let directory = directory();
        let (workflow, _store) = build(directory.clone());
        let prefetch = Prefetch {
            enrollment: Prefetched::Found(EnrollmentInfo {
                class_id: "C1".to_string(),
                student_id: "A1".to_string(),
            }),
            threshold: Prefetched::Missing,
        };

        let registration = workflow
            .register(&request("E1", Some(1.0)), "T1", TOKEN, prefetch)
            .await
            .unwrap();

        assert!(!registration.alert_generated);
        assert!(directory.lookups().is_empty());
    }

    #[tokio::test]
    async fn unknown_evaluation_type_is_not_found() {
        let (workflow, store) = build(directory());
        let exam = GradeRequest {
            evaluation_type_id: "ORAL".to_string(),
            ..request("E1", Some(15.0))
        };

        let err = workflow
            .register(&exam, "T1", TOKEN, Prefetch::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(store.grades().is_empty());
    }

    #[tokio::test]
    async fn literal_grades_compare_by_equality() {
        let directory = directory().with_literal_threshold("L1", "A");
        let (workflow, store) = build(directory);
        let literal = |value: &str| GradeRequest {
            scale_id: "L1".to_string(),
            literal_value: Some(value.to_string()),
            grading_column: Some(format!("N-{value}")),
            ..request("E1", None)
        };

        let passing = workflow
            .register(&literal("A"), "T1", TOKEN, Prefetch::default())
            .await
            .unwrap();
        let failing = workflow
            .register(&literal("C"), "T1", TOKEN, Prefetch::default())
            .await
            .unwrap();

        assert!(!passing.alert_generated);
        assert!(failing.alert_generated);
        assert_eq!(store.alerts().len(), 1);
    }

    #[tokio::test]
    async fn submit_checks_teacher_assignment() {
        let directory = directory().with_enrollment("E5", "C9", "A1");
        let (workflow, store) = build(directory);

        let err = workflow
            .submit(&submitter(Role::Teacher), &request("E5", Some(15.0)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert!(store.grades().is_empty());

        let missing = workflow
            .submit(&submitter(Role::Teacher), &request("E404", Some(15.0)))
            .await
            .unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        let allowed = workflow
            .submit(&submitter(Role::Teacher), &request("E1", Some(9.0)))
            .await
            .unwrap();
        assert_eq!(allowed.notifications_pending, 1);

        let admin = workflow
            .submit(&submitter(Role::Admin), &request("E5", Some(15.0)))
            .await
            .unwrap();
        assert!(!admin.alert_generated);
    }

    struct RejectingOutbox;

    #[async_trait::async_trait]
    impl crate::store::OutboxStore for RejectingOutbox {
        async fn create(&self, _message: &OutboxMessage) -> anyhow::Result<OutboxMessage> {
            anyhow::bail!("outbox table is read-only")
        }

        async fn pending(&self, _limit: usize) -> anyhow::Result<Vec<OutboxMessage>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn outbox_write_failure_is_propagated() {
        let store = Arc::new(MemoryStore::with_evaluation_types(["EXAM"]));
        let stores = Stores {
            outbox: Arc::new(RejectingOutbox),
            ..Stores::shared(store.clone())
        };
        let workflow = RegisterGradeWorkflow::new(
            stores,
            Directories::shared(Arc::new(directory()), Duration::from_millis(200)),
        );

        let err = workflow
            .register(&request("E1", Some(4.0)), "T1", TOKEN, Prefetch::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Store);
        assert!(err.to_string().contains("read-only"));
        assert_eq!(store.grades().len(), 1);
        assert_eq!(store.alerts().len(), 1);
    }

    #[tokio::test]
    async fn submit_rejects_non_grading_roles() {
        let (workflow, store) = build(directory());

        let err = workflow
            .submit(
                &submitter(Role::Other("PADRE".to_string())),
                &request("E1", Some(15.0)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert!(store.grades().is_empty());
    }
}
