//! The external AI analysis collaborator.
//!
//! Consumed as an opaque "analyse this bundle for this procedure code" call
//! returning structured PA form data. The orchestrator never retries a
//! failed analysis on its own; retries happen through explicit re-hydration.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::aggregate::ClinicalBundle;
use crate::{OrchestratorError, OrchestratorResult};

/// Status of one policy criterion in the supporting evidence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceStatus {
    Met,
    NotMet,
    Unclear,
}

/// Evidence item supporting a policy criterion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub criterion_id: String,
    pub status: EvidenceStatus,
    pub evidence: String,
    pub source: String,
    pub confidence: f64,
}

/// Overall recommendation from the analysis service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Approve,
    NeedInfo,
    ManualReview,
}

/// Structured PA form data returned by the analysis service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaFormData {
    pub patient_name: String,
    pub patient_dob: String,
    pub member_id: String,
    pub diagnosis_codes: Vec<String>,
    pub procedure_code: String,
    pub clinical_summary: String,
    pub supporting_evidence: Vec<EvidenceItem>,
    pub recommendation: Recommendation,
    pub confidence_score: f64,
    #[serde(default)]
    pub field_mappings: HashMap<String, String>,
    #[serde(default)]
    pub policy_id: Option<String>,
    #[serde(default)]
    pub lcd_reference: Option<String>,
}

impl PaFormData {
    /// Names of required fields the analysis could not populate.
    ///
    /// An empty result means the form is ready for review; anything else
    /// parks the work item in `MissingData` until re-hydration finds the
    /// evidence.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.patient_name.trim().is_empty() || self.patient_name == "Unknown" {
            missing.push("patient_name");
        }
        if self.patient_dob.trim().is_empty() {
            missing.push("patient_dob");
        }
        if self.member_id.trim().is_empty() || self.member_id == "Unknown" {
            missing.push("member_id");
        }
        if self.diagnosis_codes.is_empty() {
            missing.push("diagnosis_codes");
        }
        if self.procedure_code.trim().is_empty() {
            missing.push("procedure_code");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

/// Opaque analysis call over a hydrated bundle.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    /// Analyse the bundle for one target procedure code.
    async fn analyze(
        &self,
        bundle: &ClinicalBundle,
        procedure_code: &str,
    ) -> OrchestratorResult<PaFormData>;
}

/// Wire shape of the analysis request.
#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    patient_id: &'a str,
    procedure_code: &'a str,
    clinical_data: &'a ClinicalBundle,
}

/// reqwest-backed client for the analysis service.
pub struct HttpAnalysisClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAnalysisClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl AnalysisClient for HttpAnalysisClient {
    async fn analyze(
        &self,
        bundle: &ClinicalBundle,
        procedure_code: &str,
    ) -> OrchestratorResult<PaFormData> {
        let url = format!("{}/analyze", self.base_url);
        let request = AnalyzeRequest {
            patient_id: &bundle.patient_id,
            procedure_code,
            clinical_data: bundle,
        };

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| OrchestratorError::Network(format!("analysis call: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OrchestratorError::InvalidResponse(format!(
                "analysis service returned {status}"
            )));
        }

        response
            .json::<PaFormData>()
            .await
            .map_err(|e| OrchestratorError::InvalidResponse(format!("analysis response: {e}")))
    }
}

/// Caching decorator over any [`AnalysisClient`].
///
/// Composition rather than inheritance: wraps the underlying client behind
/// the same trait so caching can be toggled at construction time without
/// touching the client itself. Keyed by a content hash of the serialised
/// bundle plus the procedure code, so a re-hydration that fetched new
/// clinical data always reaches the underlying client while an unchanged
/// bundle is answered from cache.
pub struct CachedAnalysisClient {
    inner: Arc<dyn AnalysisClient>,
    cache: DashMap<(u64, String), PaFormData>,
}

impl CachedAnalysisClient {
    pub fn new(inner: Arc<dyn AnalysisClient>) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    /// Content hash of the bundle as the analysis service would see it.
    fn bundle_hash(bundle: &ClinicalBundle) -> OrchestratorResult<u64> {
        use std::hash::{Hash, Hasher};

        let serialised = serde_json::to_string(bundle)
            .map_err(|e| OrchestratorError::Unexpected(format!("bundle serialisation: {e}")))?;
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        serialised.hash(&mut hasher);
        Ok(hasher.finish())
    }
}

#[async_trait]
impl AnalysisClient for CachedAnalysisClient {
    async fn analyze(
        &self,
        bundle: &ClinicalBundle,
        procedure_code: &str,
    ) -> OrchestratorResult<PaFormData> {
        let key = (Self::bundle_hash(bundle)?, procedure_code.to_string());
        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!(
                patient_id = %bundle.patient_id,
                procedure_code,
                "analysis cache hit"
            );
            return Ok(cached.clone());
        }

        let form = self.inner.analyze(bundle, procedure_code).await?;
        self.cache.insert(key, form.clone());
        Ok(form)
    }
}
