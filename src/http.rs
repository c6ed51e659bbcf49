// Directory clients for the people and academic services
//
// Both services answer JSON over HTTP and expect the caller's bearer token.
// 404 means "nothing on file"; any other failure is reported as unavailable.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::directory::{DirectoryError, EnrollmentDirectory, GuardianDirectory, ThresholdDirectory};
use crate::models::{EnrollmentInfo, Guardian, ThresholdDefinition};

#[derive(Debug, Deserialize)]
struct EnrollmentPayload {
    alumno_id: Option<String>,
    clase_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RelationsPayload {
    #[serde(default)]
    relaciones: Vec<RelationEntry>,
}

/// The people service nests the guardian under `padre`; older deployments
/// return the guardian record directly.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RelationEntry {
    Nested { padre: GuardianPayload },
    Flat(GuardianPayload),
}

#[derive(Debug, Deserialize)]
struct GuardianPayload {
    id: String,
    email: Option<String>,
    #[serde(default)]
    nombres: Option<String>,
    #[serde(default)]
    apellido_paterno: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ThresholdsPayload {
    #[serde(default)]
    umbrales: Vec<ThresholdPayload>,
}

#[derive(Debug, Deserialize)]
struct ThresholdPayload {
    valor_minimo_numerico: Option<f64>,
    valor_minimo_literal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClassesPayload {
    #[serde(default)]
    clases: Vec<ClassPayload>,
}

#[derive(Debug, Deserialize)]
struct ClassPayload {
    id: String,
}

impl From<GuardianPayload> for Guardian {
    fn from(payload: GuardianPayload) -> Self {
        let name = [payload.nombres, payload.apellido_paterno]
            .into_iter()
            .flatten()
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        Guardian {
            id: payload.id,
            email: payload.email,
            name,
        }
    }
}

fn build_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(concat!("grade-alerts/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()?)
}

/// GET `url` and decode the body; `Ok(None)` on 404.
async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    query: &[(&str, &str)],
    token: &str,
) -> Result<Option<T>, DirectoryError> {
    debug!("GET {}", url);

    let response = client
        .get(url)
        .query(query)
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| DirectoryError::Unavailable(format!("request to {url} failed: {e}")))?;

    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !response.status().is_success() {
        return Err(DirectoryError::Unavailable(format!(
            "{url} returned {}",
            response.status()
        )));
    }

    response
        .json::<T>()
        .await
        .map(Some)
        .map_err(|e| DirectoryError::Malformed(format!("{url}: {e}")))
}

fn trimmed(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Enrollments and guardian relations live in the people service.
pub struct PeopleServiceClient {
    client: reqwest::Client,
    base_url: String,
}

impl PeopleServiceClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: trimmed(base_url),
        })
    }

    pub async fn guardians_of_student(
        &self,
        student_id: &str,
        token: &str,
    ) -> Result<Vec<Guardian>, DirectoryError> {
        let url = format!("{}/v1/relaciones/alumno/{}", self.base_url, student_id);
        let payload: Option<RelationsPayload> = get_json(&self.client, &url, &[], token).await?;

        Ok(payload.map(guardians_from).unwrap_or_default())
    }

    pub async fn enrollment(
        &self,
        enrollment_id: &str,
        token: &str,
    ) -> Result<Option<EnrollmentInfo>, DirectoryError> {
        let url = format!("{}/v1/matriculas/{}", self.base_url, enrollment_id);
        let payload: Option<EnrollmentPayload> = get_json(&self.client, &url, &[], token).await?;

        Ok(payload.and_then(enrollment_from))
    }
}

fn guardians_from(payload: RelationsPayload) -> Vec<Guardian> {
    payload
        .relaciones
        .into_iter()
        .map(|entry| match entry {
            RelationEntry::Nested { padre } => padre.into(),
            RelationEntry::Flat(guardian) => guardian.into(),
        })
        .collect()
}

fn enrollment_from(payload: EnrollmentPayload) -> Option<EnrollmentInfo> {
    match (payload.clase_id, payload.alumno_id) {
        (Some(class_id), Some(student_id)) => Some(EnrollmentInfo {
            class_id,
            student_id,
        }),
        _ => None,
    }
}

/// Thresholds and class assignments live in the academic service.
pub struct AcademicServiceClient {
    client: reqwest::Client,
    base_url: String,
}

impl AcademicServiceClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: trimmed(base_url),
        })
    }

    pub async fn classes_for_teacher(
        &self,
        teacher_id: &str,
        token: &str,
    ) -> Result<Vec<String>, DirectoryError> {
        let url = format!("{}/v1/admin/clases", self.base_url);
        let payload: Option<ClassesPayload> = get_json(
            &self.client,
            &url,
            &[("docente_id", teacher_id), ("limit", "100")],
            token,
        )
        .await?;

        Ok(payload
            .map(|payload| payload.clases.into_iter().map(|class| class.id).collect())
            .unwrap_or_default())
    }

    /// The academic service orders matches most specific first.
    pub async fn threshold(
        &self,
        scale_id: &str,
        token: &str,
    ) -> Result<Option<ThresholdDefinition>, DirectoryError> {
        let url = format!("{}/v1/umbrales", self.base_url);
        let payload: Option<ThresholdsPayload> =
            get_json(&self.client, &url, &[("escala_id", scale_id)], token).await?;

        Ok(payload.and_then(|payload| threshold_from(scale_id, payload)))
    }
}

fn threshold_from(scale_id: &str, payload: ThresholdsPayload) -> Option<ThresholdDefinition> {
    payload
        .umbrales
        .into_iter()
        .next()
        .map(|threshold| ThresholdDefinition {
            scale_id: scale_id.to_string(),
            min_numeric: threshold.valor_minimo_numerico,
            min_literal: threshold.valor_minimo_literal,
        })
}

/// Routes each lookup to the service that owns the data.
pub struct ServiceDirectory {
    pub people: PeopleServiceClient,
    pub academic: AcademicServiceClient,
}

#[async_trait]
impl GuardianDirectory for ServiceDirectory {
    async fn guardians_of_student(
        &self,
        student_id: &str,
        token: &str,
    ) -> Result<Vec<Guardian>, DirectoryError> {
        self.people.guardians_of_student(student_id, token).await
    }
}

#[async_trait]
impl EnrollmentDirectory for ServiceDirectory {
    async fn enrollment(
        &self,
        enrollment_id: &str,
        token: &str,
    ) -> Result<Option<EnrollmentInfo>, DirectoryError> {
        self.people.enrollment(enrollment_id, token).await
    }

    async fn classes_for_teacher(
        &self,
        teacher_id: &str,
        token: &str,
    ) -> Result<Vec<String>, DirectoryError> {
        self.academic.classes_for_teacher(teacher_id, token).await
    }
}

#[async_trait]
impl ThresholdDirectory for ServiceDirectory {
    async fn threshold(
        &self,
        scale_id: &str,
        token: &str,
    ) -> Result<Option<ThresholdDefinition>, DirectoryError> {
        self.academic.threshold(scale_id, token).await
    }
}
