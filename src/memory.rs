//! In-process implementations of the stores and directories.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::directory::{DirectoryError, EnrollmentDirectory, GuardianDirectory, ThresholdDirectory};
use crate::models::{
    Alert, EnrollmentInfo, Grade, Guardian, OutboxMessage, OutboxState, ThresholdDefinition,
};
use crate::store::{AlertStore, GradeStore, OutboxStore};

#[derive(Default)]
pub struct MemoryStore {
    evaluation_types: Mutex<HashSet<String>>,
    grades: Mutex<Vec<Grade>>,
    alerts: Mutex<Vec<Alert>>,
    outbox: Mutex<Vec<OutboxMessage>>,
}

impl MemoryStore {
    pub fn with_evaluation_types<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = MemoryStore::default();
        store
            .evaluation_types
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(ids.into_iter().map(Into::into));
        store
    }

    pub fn grades(&self) -> Vec<Grade> {
        self.grades
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn outbox_messages(&self) -> Vec<OutboxMessage> {
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl GradeStore for MemoryStore {
    async fn upsert(&self, grade: &Grade) -> anyhow::Result<Grade> {
        let mut grades = self.grades.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = grades
            .iter_mut()
            .find(|stored| stored.logical_key() == grade.logical_key())
        {
            let id = existing.id;
            *existing = Grade {
                id,
                ..grade.clone()
            };
            return Ok(existing.clone());
        }

        grades.push(grade.clone());
        Ok(grade.clone())
    }

    async fn find(&self, id: Uuid) -> anyhow::Result<Option<Grade>> {
        let grades = self.grades.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(grades.iter().find(|grade| grade.id == id).cloned())
    }

    async fn evaluation_type_exists(&self, id: &str) -> anyhow::Result<bool> {
        let types = self
            .evaluation_types
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(types.contains(id))
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn create(&self, alert: &Alert) -> anyhow::Result<Alert> {
        let mut alerts = self.alerts.lock().unwrap_or_else(PoisonError::into_inner);
        let grade_known = self
            .grades
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|grade| grade.id == alert.grade_id);
        if !grade_known {
            anyhow::bail!("alert {} references unknown grade {}", alert.id, alert.grade_id);
        }
        alerts.push(alert.clone());
        Ok(alert.clone())
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn create(&self, message: &OutboxMessage) -> anyhow::Result<OutboxMessage> {
        let alert_known = self
            .alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|alert| alert.id == message.alert_id);
        if !alert_known {
            anyhow::bail!(
                "outbox message {} references unknown alert {}",
                message.id,
                message.alert_id
            );
        }
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(message.clone())
    }

    async fn pending(&self, limit: usize) -> anyhow::Result<Vec<OutboxMessage>> {
        let outbox = self.outbox.lock().unwrap_or_else(PoisonError::into_inner);
        let mut pending: Vec<OutboxMessage> = outbox
            .iter()
            .filter(|message| message.state == OutboxState::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|message| message.created_at);
        pending.truncate(limit);
        Ok(pending)
    }
}

/// Directory answering from fixed tables.
///
/// Keys registered with [`StaticDirectory::unavailable`] fail every lookup, and
/// keys registered with [`StaticDirectory::with_slow_key`] sleep before answering.
#[derive(Clone, Default)]
pub struct StaticDirectory {
    enrollments: HashMap<String, EnrollmentInfo>,
    guardians: HashMap<String, Vec<Guardian>>,
    thresholds: HashMap<String, ThresholdDefinition>,
    teacher_classes: HashMap<String, Vec<String>>,
    unavailable: HashSet<String>,
    slow_keys: HashMap<String, Duration>,
    delay: Option<Duration>,
    lookups: Arc<Mutex<Vec<String>>>,
}

impl StaticDirectory {
    pub fn with_enrollment(
        mut self,
        enrollment_id: &str,
        class_id: &str,
        student_id: &str,
    ) -> Self {
        self.enrollments.insert(
            enrollment_id.to_string(),
            EnrollmentInfo {
                class_id: class_id.to_string(),
                student_id: student_id.to_string(),
            },
        );
        self
    }

    pub fn with_guardian(
        mut self,
        student_id: &str,
        guardian_id: &str,
        email: Option<&str>,
        name: &str,
    ) -> Self {
        self.guardians
            .entry(student_id.to_string())
            .or_default()
            .push(Guardian {
                id: guardian_id.to_string(),
                email: email.map(str::to_string),
                name: name.to_string(),
            });
        self
    }

    pub fn with_numeric_threshold(mut self, scale_id: &str, minimum: f64) -> Self {
        self.thresholds.insert(
            scale_id.to_string(),
            ThresholdDefinition {
                scale_id: scale_id.to_string(),
                min_numeric: Some(minimum),
                min_literal: None,
            },
        );
        self
    }

    pub fn with_literal_threshold(mut self, scale_id: &str, minimum: &str) -> Self {
        self.thresholds.insert(
            scale_id.to_string(),
            ThresholdDefinition {
                scale_id: scale_id.to_string(),
                min_numeric: None,
                min_literal: Some(minimum.to_string()),
            },
        );
        self
    }

    pub fn with_teacher_classes(mut self, teacher_id: &str, class_ids: &[&str]) -> Self {
        self.teacher_classes.insert(
            teacher_id.to_string(),
            class_ids.iter().map(|id| id.to_string()).collect(),
        );
        self
    }

    pub fn unavailable(mut self, key: &str) -> Self {
        self.unavailable.insert(key.to_string());
        self
    }

    pub fn with_slow_key(mut self, key: &str, delay: Duration) -> Self {
        self.slow_keys.insert(key.to_string(), delay);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every lookup served so far, as `kind:key`.
    pub fn lookups(&self) -> Vec<String> {
        self.lookups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn serve(&self, kind: &str, key: &str) -> Result<(), DirectoryError> {
        self.lookups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("{kind}:{key}"));

        if let Some(delay) = self.slow_keys.get(key).copied().or(self.delay) {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.contains(key) {
            return Err(DirectoryError::Unavailable(format!(
                "{kind} service refused lookup for {key}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl GuardianDirectory for StaticDirectory {
    async fn guardians_of_student(
        &self,
        student_id: &str,
        _token: &str,
    ) -> Result<Vec<Guardian>, DirectoryError> {
        self.serve("guardians", student_id).await?;
        Ok(self.guardians.get(student_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl EnrollmentDirectory for StaticDirectory {
    async fn enrollment(
        &self,
        enrollment_id: &str,
        _token: &str,
    ) -> Result<Option<EnrollmentInfo>, DirectoryError> {
        self.serve("enrollment", enrollment_id).await?;
        Ok(self.enrollments.get(enrollment_id).cloned())
    }

    async fn classes_for_teacher(
        &self,
        teacher_id: &str,
        _token: &str,
    ) -> Result<Vec<String>, DirectoryError> {
        self.serve("classes", teacher_id).await?;
        Ok(self
            .teacher_classes
            .get(teacher_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ThresholdDirectory for StaticDirectory {
    async fn threshold(
        &self,
        scale_id: &str,
        _token: &str,
    ) -> Result<Option<ThresholdDefinition>, DirectoryError> {
        self.serve("threshold", scale_id).await?;
        Ok(self.thresholds.get(scale_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GradeValue;
    use chrono::Utc;

    fn grade(column: &str, value: f64) -> Grade {
        Grade {
            id: Uuid::new_v4(),
            enrollment_id: "E1".to_string(),
            evaluation_type_id: "EXAM".to_string(),
            period_id: "P1".to_string(),
            scale_id: "S1".to_string(),
            value: GradeValue::Numeric(value),
            weight: None,
            notes: None,
            grading_column: column.to_string(),
            registered_on: Utc::now().date_naive(),
            registered_by: "T1".to_string(),
        }
    }

    #[tokio::test]
    async fn upsert_keeps_one_row_per_logical_key() {
        let store = MemoryStore::with_evaluation_types(["EXAM"]);
        let first = store.upsert(&grade("N1", 10.0)).await.unwrap();
        let second = store.upsert(&grade("N1", 15.0)).await.unwrap();
        let other_column = store.upsert(&grade("N2", 8.0)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.value, GradeValue::Numeric(15.0));
        assert_ne!(other_column.id, first.id);
        assert_eq!(store.grades().len(), 2);
        assert_eq!(
            store.find(first.id).await.unwrap().unwrap().value,
            GradeValue::Numeric(15.0)
        );
    }

    #[tokio::test]
    async fn alerts_require_a_stored_grade() {
        let store = MemoryStore::default();
        let alert = Alert {
            id: Uuid::new_v4(),
            grade_id: Uuid::new_v4(),
            student_id: "A1".to_string(),
            guardian_id: None,
            kind: crate::models::AlertKind::LowGrade,
            message: "Grade below threshold: 3".to_string(),
            read: false,
            read_at: None,
            created_at: Utc::now(),
        };
        assert!(AlertStore::create(&store, &alert).await.is_err());
        assert!(store.alerts().is_empty());
    }

    #[tokio::test]
    async fn static_directory_records_and_fails_lookups() {
        let directory = StaticDirectory::default()
            .with_enrollment("E1", "C1", "A1")
            .unavailable("E2");

        assert!(directory.enrollment("E1", "t").await.unwrap().is_some());
        assert!(directory.enrollment("E2", "t").await.is_err());
        assert!(directory.guardians_of_student("A1", "t").await.unwrap().is_empty());
        assert_eq!(
            directory.lookups(),
            vec!["enrollment:E1", "enrollment:E2", "guardians:A1"]
        );
    }
}
