//! reqwest-backed implementation of [`EhrClient`].
//!
//! Talks to the clinical gateway over JSON. Requests carry the bearer token
//! in the `Authorization` header and the practice identifier in `x-tenant-id`;
//! every path embeds or filters by the patient identifier.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::types::{
    Condition, DocumentRef, EncounterStatus, Observation, PatientDemographics, ProcedureRecord,
    ServiceRequest,
};
use crate::{EhrClient, EhrError, EhrResult};

/// HTTP client for the external clinical gateway.
#[derive(Clone)]
pub struct HttpEhrClient {
    http: reqwest::Client,
    base_url: String,
}

/// Wire shape of the encounter status endpoint.
#[derive(Debug, Deserialize)]
struct EncounterStatusWire {
    status: String,
}

impl HttpEhrClient {
    /// Create a new client against `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Issue a GET and decode the JSON body.
    ///
    /// # Errors
    ///
    /// Maps the expected failure modes onto [`EhrError`]:
    /// - transport failures become [`EhrError::Network`],
    /// - 401/403 become [`EhrError::Unauthorized`],
    /// - 404 becomes [`EhrError::NotFound`],
    /// - other non-success statuses and undecodable bodies become
    ///   [`EhrError::InvalidResponse`].
    async fn get_json<T: DeserializeOwned>(
        &self,
        token: &str,
        tenant_id: &str,
        path_and_query: &str,
    ) -> EhrResult<T> {
        let url = format!("{}{}", self.base_url, path_and_query);

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header("x-tenant-id", tenant_id)
            .send()
            .await
            .map_err(|e| EhrError::Network(format!("GET {path_and_query}: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            tracing::warn!(%status, path = path_and_query, "clinical gateway rejected credentials");
            return Err(EhrError::Unauthorized(format!(
                "GET {path_and_query} returned {status}"
            )));
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            tracing::debug!(path = path_and_query, "clinical resource not found");
            return Err(EhrError::NotFound(path_and_query.to_string()));
        }
        if !status.is_success() {
            tracing::warn!(%status, path = path_and_query, "unexpected clinical gateway response");
            return Err(EhrError::InvalidResponse(format!(
                "GET {path_and_query} returned {status}"
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| EhrError::InvalidResponse(format!("GET {path_and_query}: {e}")))
    }
}

#[async_trait]
impl EhrClient for HttpEhrClient {
    async fn patient(
        &self,
        token: &str,
        tenant_id: &str,
        patient_id: &str,
    ) -> EhrResult<PatientDemographics> {
        self.get_json(token, tenant_id, &format!("/patients/{patient_id}"))
            .await
    }

    async fn encounter_status(
        &self,
        token: &str,
        tenant_id: &str,
        patient_id: &str,
        encounter_id: &str,
    ) -> EhrResult<EncounterStatus> {
        let wire: EncounterStatusWire = self
            .get_json(
                token,
                tenant_id,
                &format!("/patients/{patient_id}/encounters/{encounter_id}/status"),
            )
            .await?;
        Ok(EncounterStatus::from_wire(&wire.status))
    }

    async fn active_conditions(
        &self,
        token: &str,
        tenant_id: &str,
        patient_id: &str,
    ) -> EhrResult<Vec<Condition>> {
        self.get_json(
            token,
            tenant_id,
            &format!("/patients/{patient_id}/conditions?clinical-status=active"),
        )
        .await
    }

    async fn observations_since(
        &self,
        token: &str,
        tenant_id: &str,
        patient_id: &str,
        since: DateTime<Utc>,
    ) -> EhrResult<Vec<Observation>> {
        self.get_json(
            token,
            tenant_id,
            &format!(
                "/patients/{patient_id}/observations?since={}",
                since.to_rfc3339()
            ),
        )
        .await
    }

    async fn procedures_since(
        &self,
        token: &str,
        tenant_id: &str,
        patient_id: &str,
        since: DateTime<Utc>,
    ) -> EhrResult<Vec<ProcedureRecord>> {
        self.get_json(
            token,
            tenant_id,
            &format!(
                "/patients/{patient_id}/procedures?since={}",
                since.to_rfc3339()
            ),
        )
        .await
    }

    async fn documents(
        &self,
        token: &str,
        tenant_id: &str,
        patient_id: &str,
    ) -> EhrResult<Vec<DocumentRef>> {
        self.get_json(token, tenant_id, &format!("/patients/{patient_id}/documents"))
            .await
    }

    async fn service_requests_for_encounter(
        &self,
        token: &str,
        tenant_id: &str,
        patient_id: &str,
        encounter_id: &str,
    ) -> EhrResult<Vec<ServiceRequest>> {
        self.get_json(
            token,
            tenant_id,
            &format!("/patients/{patient_id}/service-requests?encounter={encounter_id}"),
        )
        .await
    }
}
