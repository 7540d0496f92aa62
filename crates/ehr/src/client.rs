//! The data-access collaborator trait.
//!
//! Every query is scoped to a single patient (and, where applicable, a
//! tenant); the external API offers no global queries, so none are modelled
//! here. Implementations receive a bearer token per call rather than owning
//! token acquisition themselves.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{
    Condition, DocumentRef, EncounterStatus, Observation, PatientDemographics, ProcedureRecord,
    ServiceRequest,
};
use crate::EhrResult;

/// Patient-scoped clinical queries against the external EHR.
///
/// All methods are independent so callers can issue them concurrently; the
/// trait is object-safe so tests can substitute fakes.
#[async_trait]
pub trait EhrClient: Send + Sync {
    /// Fetch patient demographics.
    async fn patient(
        &self,
        token: &str,
        tenant_id: &str,
        patient_id: &str,
    ) -> EhrResult<PatientDemographics>;

    /// Fetch the current status of one encounter for one patient.
    async fn encounter_status(
        &self,
        token: &str,
        tenant_id: &str,
        patient_id: &str,
        encounter_id: &str,
    ) -> EhrResult<EncounterStatus>;

    /// Fetch conditions with an active clinical status.
    async fn active_conditions(
        &self,
        token: &str,
        tenant_id: &str,
        patient_id: &str,
    ) -> EhrResult<Vec<Condition>>;

    /// Fetch observations recorded since `since`.
    async fn observations_since(
        &self,
        token: &str,
        tenant_id: &str,
        patient_id: &str,
        since: DateTime<Utc>,
    ) -> EhrResult<Vec<Observation>>;

    /// Fetch procedures performed since `since`.
    async fn procedures_since(
        &self,
        token: &str,
        tenant_id: &str,
        patient_id: &str,
        since: DateTime<Utc>,
    ) -> EhrResult<Vec<ProcedureRecord>>;

    /// Fetch document references with extracted text.
    async fn documents(
        &self,
        token: &str,
        tenant_id: &str,
        patient_id: &str,
    ) -> EhrResult<Vec<DocumentRef>>;

    /// Fetch service requests placed during one encounter.
    async fn service_requests_for_encounter(
        &self,
        token: &str,
        tenant_id: &str,
        patient_id: &str,
        encounter_id: &str,
    ) -> EhrResult<Vec<ServiceRequest>>;
}
