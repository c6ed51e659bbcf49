use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, ErrorKind, Result};

pub const DEFAULT_GRADING_COLUMN: &str = "N1";

/// A recorded grade value: exactly one of numeric or literal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GradeValue {
    Numeric(f64),
    Literal(String),
}

impl GradeValue {
    pub fn numeric(&self) -> Option<f64> {
        match self {
            GradeValue::Numeric(value) => Some(*value),
            GradeValue::Literal(_) => None,
        }
    }

    pub fn literal(&self) -> Option<&str> {
        match self {
            GradeValue::Numeric(_) => None,
            GradeValue::Literal(value) => Some(value),
        }
    }
}

impl fmt::Display for GradeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GradeValue::Numeric(value) => write!(f, "{value}"),
            GradeValue::Literal(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub id: Uuid,
    pub enrollment_id: String,
    pub evaluation_type_id: String,
    pub period_id: String,
    pub scale_id: String,
    pub value: GradeValue,
    pub weight: Option<f64>,
    pub notes: Option<String>,
    pub grading_column: String,
    pub registered_on: NaiveDate,
    pub registered_by: String,
}

impl Grade {
    /// The tuple that identifies one logical grade among non-deleted rows.
    pub fn logical_key(&self) -> (&str, &str, &str, &str) {
        (
            &self.enrollment_id,
            &self.evaluation_type_id,
            &self.period_id,
            &self.grading_column,
        )
    }
}

/// Inbound shape of one grade registration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRequest {
    pub enrollment_id: String,
    pub evaluation_type_id: String,
    pub period_id: String,
    pub scale_id: String,
    pub numeric_value: Option<f64>,
    pub literal_value: Option<String>,
    pub weight: Option<f64>,
    pub notes: Option<String>,
    pub grading_column: Option<String>,
}

impl GradeRequest {
    /// Checks the request shape and returns the single supplied value.
    pub fn validate(&self) -> Result<GradeValue> {
        for (field, value) in [
            ("enrollment id", &self.enrollment_id),
            ("evaluation type id", &self.evaluation_type_id),
            ("period id", &self.period_id),
            ("scale id", &self.scale_id),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Validation(format!("{field} must not be empty")));
            }
        }

        let literal = self
            .literal_value
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());

        match (self.numeric_value, literal) {
            (Some(_), Some(_)) => Err(Error::Validation(
                "supply either a numeric or a literal value, not both".to_string(),
            )),
            (None, None) => Err(Error::Validation(
                "a numeric or literal value is required".to_string(),
            )),
            (Some(value), None) if !value.is_finite() => Err(Error::Validation(format!(
                "numeric value {value} is not a finite number"
            ))),
            (Some(value), None) => Ok(GradeValue::Numeric(value)),
            (None, Some(value)) => Ok(GradeValue::Literal(value.to_string())),
        }
    }

    pub fn grading_column(&self) -> &str {
        self.grading_column
            .as_deref()
            .map(str::trim)
            .filter(|column| !column.is_empty())
            .unwrap_or(DEFAULT_GRADING_COLUMN)
    }
}

/// Minimum acceptable value for a grading scale, as resolved by the academic service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdDefinition {
    pub scale_id: String,
    pub min_numeric: Option<f64>,
    pub min_literal: Option<String>,
}

impl ThresholdDefinition {
    pub fn minimum(&self) -> Option<String> {
        self.min_numeric
            .map(|value| value.to_string())
            .or_else(|| self.min_literal.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentInfo {
    pub class_id: String,
    pub student_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guardian {
    pub id: String,
    pub email: Option<String>,
    pub name: String,
}

impl Guardian {
    pub fn usable_email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertKind {
    #[serde(rename = "LOW_GRADE")]
    LowGrade,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::LowGrade => "LOW_GRADE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: Uuid,
    pub grade_id: Uuid,
    pub student_id: String,
    pub guardian_id: Option<String>,
    pub kind: AlertKind,
    pub message: String,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Channel {
    #[serde(rename = "EMAIL")]
    Email,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "EMAIL",
        }
    }
}

impl FromStr for Channel {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value {
            "EMAIL" => Ok(Channel::Email),
            other => anyhow::bail!("unknown outbox channel {other}"),
        }
    }
}

/// Delivery state of an outbox message. Only the drain worker moves it past `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxState {
    Pending,
    Processing,
    Sent,
    Failed,
}

impl OutboxState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxState::Pending => "PENDING",
            OutboxState::Processing => "PROCESSING",
            OutboxState::Sent => "SENT",
            OutboxState::Failed => "FAILED",
        }
    }
}

impl FromStr for OutboxState {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value {
            "PENDING" => Ok(OutboxState::Pending),
            "PROCESSING" => Ok(OutboxState::Processing),
            "SENT" => Ok(OutboxState::Sent),
            "FAILED" => Ok(OutboxState::Failed),
            other => anyhow::bail!("unknown outbox state {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxMessage {
    pub id: Uuid,
    pub channel: Channel,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub alert_id: Uuid,
    pub state: OutboxState,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OutboxMessage {
    pub fn pending_email(alert_id: Uuid, recipient: &str, subject: String, body: String) -> Self {
        OutboxMessage {
            id: Uuid::new_v4(),
            channel: Channel::Email,
            recipient: recipient.to_string(),
            subject,
            body,
            alert_id,
            state: OutboxState::Pending,
            attempts: 0,
            last_error: None,
            sent_at: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Teacher,
    Admin,
    Other(String),
}

impl Role {
    pub fn can_grade(&self) -> bool {
        matches!(self, Role::Teacher | Role::Admin)
    }

    pub fn ensure_can_grade(&self) -> Result<()> {
        if self.can_grade() {
            Ok(())
        } else {
            Err(Error::Authorization(format!(
                "role {self} may not register grades"
            )))
        }
    }
}

impl FromStr for Role {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match value.trim().to_ascii_lowercase().as_str() {
            "teacher" | "docente" => Role::Teacher,
            "admin" | "administrator" => Role::Admin,
            _ => Role::Other(value.trim().to_string()),
        })
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Teacher => f.write_str("teacher"),
            Role::Admin => f.write_str("admin"),
            Role::Other(name) => f.write_str(name),
        }
    }
}

/// The authenticated caller of a registration.
#[derive(Debug, Clone)]
pub struct Submitter {
    pub user_id: String,
    pub role: Role,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub grade: Grade,
    pub alert_generated: bool,
    pub notifications_pending: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub items: Vec<GradeRequest>,
    /// Accepted for API compatibility; duplicate batches are not detected.
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BatchItemResult {
    Ok {
        #[serde(rename = "gradeId")]
        grade_id: Uuid,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl BatchItemResult {
    pub fn failed(err: &Error) -> Self {
        BatchItemResult::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, BatchItemResult::Ok { .. })
    }
}
