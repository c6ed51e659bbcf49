//! Lookups against sibling services.
//!
//! A "not found" answer is a successful lookup (`Ok(None)` or an empty list);
//! `Err` means the lookup itself failed and the answer is unknown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{EnrollmentInfo, Guardian, ThresholdDefinition};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DirectoryError {
    #[error("{lookup} timed out after {after:?}")]
    Timeout { lookup: String, after: Duration },

    #[error("{0}")]
    Unavailable(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait GuardianDirectory: Send + Sync {
    async fn guardians_of_student(
        &self,
        student_id: &str,
        token: &str,
    ) -> Result<Vec<Guardian>, DirectoryError>;
}

#[async_trait]
pub trait EnrollmentDirectory: Send + Sync {
    async fn enrollment(
        &self,
        enrollment_id: &str,
        token: &str,
    ) -> Result<Option<EnrollmentInfo>, DirectoryError>;

    async fn classes_for_teacher(
        &self,
        teacher_id: &str,
        token: &str,
    ) -> Result<Vec<String>, DirectoryError>;
}

#[async_trait]
pub trait ThresholdDirectory: Send + Sync {
    /// Most specific threshold configured for the scale, if any.
    async fn threshold(
        &self,
        scale_id: &str,
        token: &str,
    ) -> Result<Option<ThresholdDefinition>, DirectoryError>;
}

/// The three directories plus the per-call time budget applied to each lookup.
#[derive(Clone)]
pub struct Directories {
    pub guardians: Arc<dyn GuardianDirectory>,
    pub enrollments: Arc<dyn EnrollmentDirectory>,
    pub thresholds: Arc<dyn ThresholdDirectory>,
    pub timeout: Duration,
}

impl Directories {
    pub fn shared<D>(directory: Arc<D>, timeout: Duration) -> Self
    where
        D: GuardianDirectory + EnrollmentDirectory + ThresholdDirectory + 'static,
    {
        Directories {
            guardians: directory.clone(),
            enrollments: directory.clone(),
            thresholds: directory,
            timeout,
        }
    }

    pub async fn guardians_of_student(
        &self,
        student_id: &str,
        token: &str,
    ) -> Result<Vec<Guardian>, DirectoryError> {
        self.bounded(
            || format!("guardian lookup for student {student_id}"),
            self.guardians.guardians_of_student(student_id, token),
        )
        .await
    }

    pub async fn enrollment(
        &self,
        enrollment_id: &str,
        token: &str,
    ) -> Result<Option<EnrollmentInfo>, DirectoryError> {
        self.bounded(
            || format!("enrollment lookup for {enrollment_id}"),
            self.enrollments.enrollment(enrollment_id, token),
        )
        .await
    }

    pub async fn classes_for_teacher(
        &self,
        teacher_id: &str,
        token: &str,
    ) -> Result<Vec<String>, DirectoryError> {
        self.bounded(
            || format!("class lookup for teacher {teacher_id}"),
            self.enrollments.classes_for_teacher(teacher_id, token),
        )
        .await
    }

    pub async fn threshold(
        &self,
        scale_id: &str,
        token: &str,
    ) -> Result<Option<ThresholdDefinition>, DirectoryError> {
        self.bounded(
            || format!("threshold lookup for scale {scale_id}"),
            self.thresholds.threshold(scale_id, token),
        )
        .await
    }

    async fn bounded<T, F>(
        &self,
        lookup: impl FnOnce() -> String,
        call: F,
    ) -> Result<T, DirectoryError>
    where
        F: Future<Output = Result<T, DirectoryError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(DirectoryError::Timeout {
                lookup: lookup(),
                after: self.timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::StaticDirectory;

    #[tokio::test]
    async fn slow_lookups_time_out() {
        let directory = StaticDirectory::default()
            .with_enrollment("E1", "C1", "A1")
            .with_delay(Duration::from_millis(500));
        let directories = Directories::shared(Arc::new(directory), Duration::from_millis(20));

        let err = directories.enrollment("E1", "token").await.unwrap_err();
        assert!(matches!(err, DirectoryError::Timeout { .. }));
        assert!(err.to_string().contains("enrollment lookup for E1"));
    }

    #[tokio::test]
    async fn fast_lookups_pass_through() {
        let directory = StaticDirectory::default()
            .with_enrollment("E1", "C1", "A1")
            .with_teacher_classes("T1", &["C1", "C2"]);
        let directories = Directories::shared(Arc::new(directory), Duration::from_secs(1));

        let enrollment = directories.enrollment("E1", "token").await.unwrap();
        assert_eq!(
            enrollment,
            Some(EnrollmentInfo {
                class_id: "C1".to_string(),
                student_id: "A1".to_string(),
            })
        );
        assert_eq!(directories.enrollment("E9", "token").await.unwrap(), None);
        assert_eq!(
            directories.classes_for_teacher("T1", "token").await.unwrap(),
            vec!["C1".to_string(), "C2".to_string()]
        );
    }
}
