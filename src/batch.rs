//! Gradebook submissions: many grades from one submitter, processed with
//! bounded concurrency and per-item isolation.
//!
//! Enrollments and thresholds referenced by the batch are resolved once per
//! distinct id before any item runs; the resulting maps are read-only and
//! borrowed by every item. An item whose lookup failed is reported as a
//! transient error instead of being registered without alerting.

use std::collections::{BTreeSet, HashMap, HashSet};

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::directory::DirectoryError;
use crate::error::{Error, Result};
use crate::models::{
    BatchItemResult, BatchRequest, EnrollmentInfo, GradeRequest, Role, Submitter,
    ThresholdDefinition,
};
use crate::workflow::{Prefetch, Prefetched, RegisterGradeWorkflow};

pub const DEFAULT_CONCURRENCY: usize = 8;

/// Which classes the submitter may grade.
#[derive(Debug)]
enum ClassScope {
    Unrestricted,
    Assigned(HashSet<String>),
    /// The teacher's classes could not be resolved; nothing can be authorized.
    Unverified(String),
}

type Lookup<T> = std::result::Result<Option<T>, DirectoryError>;

struct BatchCaches {
    scope: ClassScope,
    enrollments: HashMap<String, Lookup<EnrollmentInfo>>,
    thresholds: HashMap<String, Lookup<ThresholdDefinition>>,
}

#[derive(Clone)]
pub struct BatchRegisterWorkflow {
    workflow: RegisterGradeWorkflow,
    concurrency: usize,
}

impl BatchRegisterWorkflow {
    pub fn new(workflow: RegisterGradeWorkflow, concurrency: usize) -> Self {
        BatchRegisterWorkflow {
            workflow,
            concurrency: concurrency.max(1),
        }
    }

    /// Runs every item of the batch and reports one result per item, in input order.
    ///
    /// Only a submitter without a grading role fails the whole call.
    pub async fn run(
        &self,
        submitter: &Submitter,
        batch: &BatchRequest,
    ) -> Result<Vec<BatchItemResult>> {
        submitter.role.ensure_can_grade()?;
        if let Some(key) = &batch.idempotency_key {
            debug!(idempotency_key = %key, "Idempotency key supplied but not enforced");
        }
        info!(
            user_id = %submitter.user_id,
            items = batch.items.len(),
            "Processing grade batch"
        );

        // One warm-up at a time so at most `concurrency` lookups are in flight.
        let scope = self.class_scope(submitter).await;
        let enrollments = self.warm_enrollments(&batch.items, &submitter.token).await;
        let thresholds = self.warm_thresholds(&batch.items, &submitter.token).await;
        let caches = BatchCaches {
            scope,
            enrollments,
            thresholds,
        };

        let results: Vec<BatchItemResult> = stream::iter(batch.items.iter().enumerate())
            .map(|(index, request)| self.process_item(index, request, submitter, &caches))
            .buffered(self.concurrency)
            .collect()
            .await;

        let succeeded = results.iter().filter(|result| result.is_ok()).count();
        info!(
            user_id = %submitter.user_id,
            succeeded,
            failed = results.len() - succeeded,
            "Grade batch finished"
        );
        Ok(results)
    }

    async fn class_scope(&self, submitter: &Submitter) -> ClassScope {
        if submitter.role != Role::Teacher {
            return ClassScope::Unrestricted;
        }
        match self
            .workflow
            .directories
            .classes_for_teacher(&submitter.user_id, &submitter.token)
            .await
        {
            Ok(classes) => ClassScope::Assigned(classes.into_iter().collect()),
            Err(e) => {
                warn!(
                    user_id = %submitter.user_id,
                    error = %e,
                    "Could not resolve teacher classes"
                );
                ClassScope::Unverified(e.to_string())
            }
        }
    }

    async fn warm_enrollments(
        &self,
        items: &[GradeRequest],
        token: &str,
    ) -> HashMap<String, Lookup<EnrollmentInfo>> {
        let ids: BTreeSet<&str> = items
            .iter()
            .map(|item| item.enrollment_id.as_str())
            .collect();
        let directories = &self.workflow.directories;

        stream::iter(ids)
            .map(|id| async move { (id, directories.enrollment(id, token).await) })
            .buffer_unordered(self.concurrency)
            .map(|(id, lookup)| {
                match &lookup {
                    Ok(None) => debug!(enrollment_id = id, "Enrollment not found"),
                    Err(e) => warn!(enrollment_id = id, error = %e, "Enrollment lookup failed"),
                    Ok(Some(_)) => {}
                }
                (id.to_string(), lookup)
            })
            .collect()
            .await
    }

    async fn warm_thresholds(
        &self,
        items: &[GradeRequest],
        token: &str,
    ) -> HashMap<String, Lookup<ThresholdDefinition>> {
        let ids: BTreeSet<&str> = items.iter().map(|item| item.scale_id.as_str()).collect();
        let directories = &self.workflow.directories;

        stream::iter(ids)
            .map(|id| async move { (id, directories.threshold(id, token).await) })
            .buffer_unordered(self.concurrency)
            .map(|(id, lookup)| {
                if let Err(e) = &lookup {
                    warn!(scale_id = id, error = %e, "Threshold lookup failed");
                }
                (id.to_string(), lookup)
            })
            .collect()
            .await
    }

    async fn process_item(
        &self,
        index: usize,
        request: &GradeRequest,
        submitter: &Submitter,
        caches: &BatchCaches,
    ) -> BatchItemResult {
        match self.register_item(request, submitter, caches).await {
            Ok(grade_id) => BatchItemResult::Ok { grade_id },
            Err(e) => {
                warn!(
                    item = index,
                    enrollment_id = %request.enrollment_id,
                    error = %e,
                    "Batch item failed"
                );
                BatchItemResult::failed(&e)
            }
        }
    }

    async fn register_item(
        &self,
        request: &GradeRequest,
        submitter: &Submitter,
        caches: &BatchCaches,
    ) -> Result<uuid::Uuid> {
        let enrollment = match caches.enrollments.get(&request.enrollment_id) {
            Some(Ok(Some(enrollment))) => enrollment,
            Some(Err(e)) => return Err(Error::Transient(e.clone())),
            Some(Ok(None)) | None => {
                return Err(Error::NotFound(format!(
                    "enrollment not found: {}",
                    request.enrollment_id
                )));
            }
        };

        match &caches.scope {
            ClassScope::Unrestricted => {}
            ClassScope::Assigned(classes) if classes.contains(&enrollment.class_id) => {}
            ClassScope::Assigned(_) => {
                return Err(Error::Authorization(format!(
                    "teacher {} is not assigned to class {}",
                    submitter.user_id, enrollment.class_id
                )));
            }
            ClassScope::Unverified(reason) => {
                return Err(Error::Authorization(format!(
                    "could not verify classes of teacher {}: {reason}",
                    submitter.user_id
                )));
            }
        }

        let threshold = match caches.thresholds.get(&request.scale_id) {
            Some(Ok(threshold)) => Prefetched::from(threshold.clone()),
            Some(Err(e)) => return Err(Error::Transient(e.clone())),
            None => Prefetched::Absent,
        };
        let prefetch = Prefetch {
            enrollment: Prefetched::Found(enrollment.clone()),
            threshold,
        };

        let registration = self
            .workflow
            .register(request, &submitter.user_id, &submitter.token, prefetch)
            .await?;
        Ok(registration.grade.id)
    }
}
