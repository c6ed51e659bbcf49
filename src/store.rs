//! Persistence seams for grades, alerts and the notification outbox.
//!
//! Every method is a single persist-and-return; there is no transaction
//! spanning two stores.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Alert, Grade, OutboxMessage};

#[async_trait]
pub trait GradeStore: Send + Sync {
    /// Inserts the grade, or updates the non-deleted row holding the same
    /// (enrollment, evaluation type, period, grading column). Returns the stored row.
    async fn upsert(&self, grade: &Grade) -> anyhow::Result<Grade>;

    async fn find(&self, id: Uuid) -> anyhow::Result<Option<Grade>>;

    async fn evaluation_type_exists(&self, id: &str) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn create(&self, alert: &Alert) -> anyhow::Result<Alert>;
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn create(&self, message: &OutboxMessage) -> anyhow::Result<OutboxMessage>;

    /// Oldest pending messages first.
    async fn pending(&self, limit: usize) -> anyhow::Result<Vec<OutboxMessage>>;
}

#[derive(Clone)]
pub struct Stores {
    pub grades: Arc<dyn GradeStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub outbox: Arc<dyn OutboxStore>,
}

impl Stores {
    /// Uses one backend for all three stores.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: GradeStore + AlertStore + OutboxStore + 'static,
    {
        Stores {
            grades: store.clone(),
            alerts: store.clone(),
            outbox: store,
        }
    }
}
