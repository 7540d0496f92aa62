//! Clinical context hydration.
//!
//! Fans out the patient-scoped sub-queries concurrently and joins them into
//! one [`ClinicalBundle`]. Total latency is bounded by the slowest single
//! call, not their sum; each sub-query is a remote round trip.

use std::sync::Arc;

use chrono::{Months, Utc};
use serde::Serialize;

use ehr::{
    Condition, DocumentRef, EhrClient, EhrError, Observation, PatientDemographics,
    ProcedureRecord, ServiceRequest,
};

use crate::auth::{CallContext, TokenStrategyResolver};
use crate::OrchestratorResult;

/// Lookback windows for history queries.
#[derive(Clone, Debug)]
pub struct AggregatorConfig {
    pub observation_lookback_months: u32,
    pub procedure_lookback_months: u32,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            observation_lookback_months: 12,
            procedure_lookback_months: 24,
        }
    }
}

/// Aggregated clinical context for one patient.
///
/// Produced fresh per hydration and owned by the in-flight processing
/// operation; never persisted.
#[derive(Clone, Debug, Serialize)]
pub struct ClinicalBundle {
    pub patient_id: String,
    pub patient: Option<PatientDemographics>,
    pub conditions: Vec<Condition>,
    pub observations: Vec<Observation>,
    pub procedures: Vec<ProcedureRecord>,
    pub documents: Vec<DocumentRef>,
    pub service_requests: Vec<ServiceRequest>,
}

/// Fan-out aggregator over the EHR data-access collaborator.
pub struct ClinicalDataAggregator {
    ehr: Arc<dyn EhrClient>,
    tokens: Arc<TokenStrategyResolver>,
    config: AggregatorConfig,
}

impl ClinicalDataAggregator {
    pub fn new(
        ehr: Arc<dyn EhrClient>,
        tokens: Arc<TokenStrategyResolver>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            ehr,
            tokens,
            config,
        }
    }

    /// Hydrate the clinical context for one patient.
    ///
    /// The sub-queries run concurrently and are joined before returning.
    /// Demographics absence is logged but non-fatal; optional sub-query
    /// failures degrade to empty lists with a warning.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::Unauthorized`] when token acquisition fails,
    /// - any error from the patient lookup other than not-found (a hard
    ///   network failure on the primary lookup fails the aggregation).
    pub async fn aggregate(
        &self,
        ctx: &CallContext,
        patient_id: &str,
        encounter_id: Option<&str>,
    ) -> OrchestratorResult<ClinicalBundle> {
        let token = self.tokens.acquire(ctx).await?;
        let token = token.as_str();
        let tenant = ctx.tenant_id.as_str();

        let now = Utc::now();
        let observations_since = now
            .checked_sub_months(Months::new(self.config.observation_lookback_months))
            .unwrap_or(now);
        let procedures_since = now
            .checked_sub_months(Months::new(self.config.procedure_lookback_months))
            .unwrap_or(now);

        let service_requests = async {
            match encounter_id {
                Some(encounter_id) => {
                    self.ehr
                        .service_requests_for_encounter(token, tenant, patient_id, encounter_id)
                        .await
                }
                None => Ok(Vec::new()),
            }
        };

        let (patient, conditions, observations, procedures, documents, service_requests) = tokio::join!(
            self.ehr.patient(token, tenant, patient_id),
            self.ehr.active_conditions(token, tenant, patient_id),
            self.ehr
                .observations_since(token, tenant, patient_id, observations_since),
            self.ehr
                .procedures_since(token, tenant, patient_id, procedures_since),
            self.ehr.documents(token, tenant, patient_id),
            service_requests,
        );

        let patient = match patient {
            Ok(p) => Some(p),
            Err(EhrError::NotFound(_)) => {
                tracing::warn!(patient_id, "no demographics on file, continuing without");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let bundle = ClinicalBundle {
            patient_id: patient_id.to_string(),
            patient,
            conditions: fall_back("conditions", patient_id, conditions),
            observations: fall_back("observations", patient_id, observations),
            procedures: fall_back("procedures", patient_id, procedures),
            documents: fall_back("documents", patient_id, documents),
            service_requests: fall_back("service requests", patient_id, service_requests),
        };

        tracing::info!(
            patient_id,
            has_demographics = bundle.patient.is_some(),
            conditions = bundle.conditions.len(),
            observations = bundle.observations.len(),
            procedures = bundle.procedures.len(),
            documents = bundle.documents.len(),
            service_requests = bundle.service_requests.len(),
            "clinical context hydrated"
        );

        Ok(bundle)
    }
}

/// Degrade a failed optional sub-query to an empty list.
fn fall_back<T>(label: &str, patient_id: &str, result: Result<Vec<T>, EhrError>) -> Vec<T> {
    match result {
        Ok(items) => items,
        Err(e) => {
            tracing::warn!(patient_id, error = %e, "failed to fetch {label}, continuing with none");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ContextTokenStrategy;
    use crate::OrchestratorError;
    use async_trait::async_trait;
    use chrono::DateTime;
    use ehr::{EhrResult, EncounterStatus};

    /// Scripted EHR fake: one field per sub-query.
    #[derive(Default)]
    struct FakeEhr {
        patient: Option<Result<PatientDemographics, fn() -> EhrError>>,
        conditions_fail: bool,
    }

    fn demographics() -> PatientDemographics {
        PatientDemographics {
            id: "P1".into(),
            name: "Sarah Williams".into(),
            birth_date: Some("1992-03-20".into()),
            gender: Some("female".into()),
            member_id: Some("M-100".into()),
        }
    }

    #[async_trait]
    impl EhrClient for FakeEhr {
        async fn patient(
            &self,
            _token: &str,
            _tenant_id: &str,
            _patient_id: &str,
        ) -> EhrResult<PatientDemographics> {
            match &self.patient {
                Some(Ok(p)) => Ok(p.clone()),
                Some(Err(make)) => Err(make()),
                None => Err(EhrError::NotFound("patient".into())),
            }
        }

        async fn encounter_status(
            &self,
            _token: &str,
            _tenant_id: &str,
            _patient_id: &str,
            _encounter_id: &str,
        ) -> EhrResult<EncounterStatus> {
            Ok(EncounterStatus::InProgress)
        }

        async fn active_conditions(
            &self,
            _token: &str,
            _tenant_id: &str,
            _patient_id: &str,
        ) -> EhrResult<Vec<Condition>> {
            if self.conditions_fail {
                return Err(EhrError::Network("conditions down".into()));
            }
            Ok(Vec::new())
        }

        async fn observations_since(
            &self,
            _token: &str,
            _tenant_id: &str,
            _patient_id: &str,
            _since: DateTime<Utc>,
        ) -> EhrResult<Vec<Observation>> {
            Ok(Vec::new())
        }

        async fn procedures_since(
            &self,
            _token: &str,
            _tenant_id: &str,
            _patient_id: &str,
            _since: DateTime<Utc>,
        ) -> EhrResult<Vec<ProcedureRecord>> {
            Ok(Vec::new())
        }

        async fn documents(
            &self,
            _token: &str,
            _tenant_id: &str,
            _patient_id: &str,
        ) -> EhrResult<Vec<DocumentRef>> {
            Ok(Vec::new())
        }

        async fn service_requests_for_encounter(
            &self,
            _token: &str,
            _tenant_id: &str,
            _patient_id: &str,
            _encounter_id: &str,
        ) -> EhrResult<Vec<ServiceRequest>> {
            Ok(Vec::new())
        }
    }

    fn aggregator(ehr: FakeEhr) -> ClinicalDataAggregator {
        // Tests supply the token inline so no network strategy is needed.
        let tokens = Arc::new(TokenStrategyResolver::new(vec![Arc::new(
            ContextTokenStrategy,
        )]));
        ClinicalDataAggregator::new(Arc::new(ehr), tokens, AggregatorConfig::default())
    }

    fn ctx() -> CallContext {
        CallContext::with_token("tenant-1", "test-token")
    }

    #[tokio::test]
    async fn empty_resources_still_yield_a_successful_bundle() {
        let fake = FakeEhr {
            patient: Some(Ok(demographics())),
            ..Default::default()
        };

        let bundle = aggregator(fake)
            .aggregate(&ctx(), "P1", Some("enc-1"))
            .await
            .expect("aggregate");

        assert_eq!(bundle.patient_id, "P1");
        assert!(bundle.patient.is_some());
        assert!(bundle.conditions.is_empty());
        assert!(bundle.observations.is_empty());
        assert!(bundle.procedures.is_empty());
        assert!(bundle.documents.is_empty());
        assert!(bundle.service_requests.is_empty());
    }

    #[tokio::test]
    async fn missing_demographics_is_non_fatal() {
        let bundle = aggregator(FakeEhr::default())
            .aggregate(&ctx(), "P1", None)
            .await
            .expect("aggregate");
        assert!(bundle.patient.is_none());
    }

    #[tokio::test]
    async fn network_failure_on_patient_lookup_fails_the_aggregation() {
        let fake = FakeEhr {
            patient: Some(Err(|| EhrError::Network("gateway unreachable".into()))),
            ..Default::default()
        };

        let err = aggregator(fake)
            .aggregate(&ctx(), "P1", None)
            .await
            .expect_err("must fail");
        assert!(matches!(err, OrchestratorError::Network(_)));
    }

    #[tokio::test]
    async fn optional_subquery_failure_degrades_to_empty() {
        let fake = FakeEhr {
            patient: Some(Ok(demographics())),
            conditions_fail: true,
        };

        let bundle = aggregator(fake)
            .aggregate(&ctx(), "P1", None)
            .await
            .expect("aggregate despite failing sub-query");
        assert!(bundle.conditions.is_empty());
    }

    #[tokio::test]
    async fn token_failure_surfaces_as_unauthorized() {
        // Context strategy registered but no inbound token on the call.
        let fake = FakeEhr::default();
        let err = aggregator(fake)
            .aggregate(&CallContext::autonomous("tenant-1"), "P1", None)
            .await
            .expect_err("must fail");
        assert!(matches!(err, OrchestratorError::Unauthorized(_)));
    }
}
