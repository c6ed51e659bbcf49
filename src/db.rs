use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{Alert, Grade, GradeValue, OutboxMessage};
use crate::store::{AlertStore, GradeStore, OutboxStore};

const GRADE_COLUMNS: &str = "id, enrollment_id, evaluation_type_id, period_id, scale_id, \
     numeric_value, literal_value, weight, notes, grading_column, registered_on, registered_by";

const OUTBOX_COLUMNS: &str = "id, channel, recipient, subject, body, alert_id, state, \
     attempts, last_error, sent_at, created_at";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let evaluation_types = vec![
        ("EXAM", "Exam", Some(0.4)),
        ("QUIZ", "Quiz", Some(0.2)),
        ("PROJECT", "Project", Some(0.3)),
        ("HOMEWORK", "Homework", None),
    ];

    for (code, name, default_weight) in evaluation_types {
        sqlx::query(
            r#"
            INSERT INTO grade_alerts.evaluation_types (id, code, name, default_weight)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, default_weight = EXCLUDED.default_weight
            "#,
        )
        .bind(code)
        .bind(code)
        .bind(name)
        .bind(default_weight)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Postgres-backed grade, alert and outbox store. Every call commits on its own.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }
}

fn grade_from_row(row: &PgRow) -> anyhow::Result<Grade> {
    let id: Uuid = row.get("id");
    let numeric: Option<f64> = row.get("numeric_value");
    let literal: Option<String> = row.get("literal_value");
    let value = match (numeric, literal) {
        (Some(value), None) => GradeValue::Numeric(value),
        (None, Some(value)) => GradeValue::Literal(value),
        _ => anyhow::bail!("grade {id} does not hold exactly one value"),
    };

    Ok(Grade {
        id,
        enrollment_id: row.get("enrollment_id"),
        evaluation_type_id: row.get("evaluation_type_id"),
        period_id: row.get("period_id"),
        scale_id: row.get("scale_id"),
        value,
        weight: row.get("weight"),
        notes: row.get("notes"),
        grading_column: row.get("grading_column"),
        registered_on: row.get("registered_on"),
        registered_by: row.get("registered_by"),
    })
}

fn outbox_from_row(row: &PgRow) -> anyhow::Result<OutboxMessage> {
    let channel: String = row.get("channel");
    let state: String = row.get("state");

    Ok(OutboxMessage {
        id: row.get("id"),
        channel: channel.parse()?,
        recipient: row.get("recipient"),
        subject: row.get("subject"),
        body: row.get("body"),
        alert_id: row.get("alert_id"),
        state: state.parse()?,
        attempts: row.get("attempts"),
        last_error: row.get("last_error"),
        sent_at: row.get("sent_at"),
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl GradeStore for PgStore {
    async fn upsert(&self, grade: &Grade) -> anyhow::Result<Grade> {
        let query = format!(
            r#"
            INSERT INTO grade_alerts.grades
            (id, enrollment_id, evaluation_type_id, period_id, scale_id,
             numeric_value, literal_value, weight, notes, grading_column,
             registered_on, registered_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (enrollment_id, evaluation_type_id, period_id, grading_column)
            WHERE NOT is_deleted
            DO UPDATE SET
                scale_id = EXCLUDED.scale_id,
                numeric_value = EXCLUDED.numeric_value,
                literal_value = EXCLUDED.literal_value,
                weight = EXCLUDED.weight,
                notes = EXCLUDED.notes,
                registered_on = EXCLUDED.registered_on,
                registered_by = EXCLUDED.registered_by,
                updated_at = now()
            RETURNING {GRADE_COLUMNS}
            "#
        );

        let row = sqlx::query(&query)
            .bind(grade.id)
            .bind(&grade.enrollment_id)
            .bind(&grade.evaluation_type_id)
            .bind(&grade.period_id)
            .bind(&grade.scale_id)
            .bind(grade.value.numeric())
            .bind(grade.value.literal())
            .bind(grade.weight)
            .bind(&grade.notes)
            .bind(&grade.grading_column)
            .bind(grade.registered_on)
            .bind(&grade.registered_by)
            .fetch_one(&self.pool)
            .await
            .context("failed to upsert grade")?;

        grade_from_row(&row)
    }

    async fn find(&self, id: Uuid) -> anyhow::Result<Option<Grade>> {
        let query = format!(
            "SELECT {GRADE_COLUMNS} FROM grade_alerts.grades WHERE id = $1 AND NOT is_deleted"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(grade_from_row).transpose()
    }

    async fn evaluation_type_exists(&self, id: &str) -> anyhow::Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM grade_alerts.evaluation_types \
             WHERE id = $1 AND status = 'ACTIVE') AS present",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("present"))
    }
}

#[async_trait]
impl AlertStore for PgStore {
    async fn create(&self, alert: &Alert) -> anyhow::Result<Alert> {
        sqlx::query(
            r#"
            INSERT INTO grade_alerts.alerts
            (id, grade_id, student_id, guardian_id, kind, message, read, read_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(alert.id)
        .bind(alert.grade_id)
        .bind(&alert.student_id)
        .bind(&alert.guardian_id)
        .bind(alert.kind.as_str())
        .bind(&alert.message)
        .bind(alert.read)
        .bind(alert.read_at)
        .bind(alert.created_at)
        .execute(&self.pool)
        .await
        .context("failed to insert alert")?;

        Ok(alert.clone())
    }
}

#[async_trait]
impl OutboxStore for PgStore {
    async fn create(&self, message: &OutboxMessage) -> anyhow::Result<OutboxMessage> {
        let query = format!(
            r#"
            INSERT INTO grade_alerts.outbox_messages
            (id, channel, recipient, subject, body, alert_id, state, attempts, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {OUTBOX_COLUMNS}
            "#
        );

        let row = sqlx::query(&query)
            .bind(message.id)
            .bind(message.channel.as_str())
            .bind(&message.recipient)
            .bind(&message.subject)
            .bind(&message.body)
            .bind(message.alert_id)
            .bind(message.state.as_str())
            .bind(message.attempts)
            .bind(message.created_at)
            .fetch_one(&self.pool)
            .await
            .context("failed to enqueue outbox message")?;

        outbox_from_row(&row)
    }

    async fn pending(&self, limit: usize) -> anyhow::Result<Vec<OutboxMessage>> {
        let query = format!(
            "SELECT {OUTBOX_COLUMNS} FROM grade_alerts.outbox_messages \
             WHERE state = 'PENDING' ORDER BY created_at LIMIT $1"
        );
        let rows = sqlx::query(&query)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(outbox_from_row).collect()
    }
}
