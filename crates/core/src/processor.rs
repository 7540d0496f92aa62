//! Consumes completion events and drives work items through the PA lifecycle.
//!
//! Per event: hydrate clinical context, find a qualifying order, call the
//! analysis collaborator, and transition the work item. Analysis failures
//! leave the work item in its prior state; there is no automatic retry
//! inside this subsystem, only explicit re-hydration.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::aggregate::ClinicalDataAggregator;
use crate::analysis::AnalysisClient;
use crate::auth::CallContext;
use crate::notify::{Notification, NotificationHub, NotificationKind};
use crate::poller::EncounterCompletedEvent;
use crate::workitem::{WorkItem, WorkItemStatus, WorkItemStore};
use crate::{OrchestratorError, OrchestratorResult};

/// Procedure codes that plausibly require prior authorisation.
#[derive(Clone, Debug)]
pub struct ProcessorConfig {
    pub pa_required_codes: HashSet<String>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        // Lumbar-spine MRI family; extend via configuration.
        let pa_required_codes = ["72148", "72149", "72158"]
            .into_iter()
            .map(String::from)
            .collect();
        Self { pa_required_codes }
    }
}

/// Drives one work item per completion event.
pub struct EncounterProcessor {
    aggregator: ClinicalDataAggregator,
    analysis: Arc<dyn AnalysisClient>,
    store: Arc<WorkItemStore>,
    hub: Arc<NotificationHub>,
    config: ProcessorConfig,
}

impl EncounterProcessor {
    pub fn new(
        aggregator: ClinicalDataAggregator,
        analysis: Arc<dyn AnalysisClient>,
        store: Arc<WorkItemStore>,
        hub: Arc<NotificationHub>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            aggregator,
            analysis,
            store,
            hub,
            config,
        }
    }

    /// Consume completion events until the channel closes or shutdown fires.
    ///
    /// A failed event is logged and broadcast as a processing failure; the
    /// work item keeps its prior state and waits for explicit re-hydration.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<EncounterCompletedEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!("encounter processor started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("encounter processor shutting down");
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if let Err(e) = self.process(&event).await {
                        tracing::error!(
                            patient_id = %event.patient_id,
                            work_item = %event.work_item_id,
                            error = %e,
                            "processing failed, work item keeps its prior state"
                        );
                        self.hub.write(Notification {
                            kind: NotificationKind::ProcessingFailed,
                            transaction_id: event.work_item_id,
                            encounter_id: event.encounter_id.clone(),
                            patient_id: event.patient_id.clone(),
                            message: "update failed, try rehydrating".into(),
                        });
                    }
                }
            }
        }
    }

    /// Process one completion event.
    ///
    /// A cancelled or entered-in-error encounter has nothing to authorise:
    /// its work item auto-closes without hydration or analysis.
    pub async fn process(&self, event: &EncounterCompletedEvent) -> OrchestratorResult<()> {
        if !event.status.is_finished() {
            let updated = self
                .store
                .transition(event.work_item_id, WorkItemStatus::NoPaRequired)?;
            self.hub.write(Notification {
                kind: NotificationKind::WorkItemStatusChanged,
                transaction_id: updated.id,
                encounter_id: event.encounter_id.clone(),
                patient_id: event.patient_id.clone(),
                message: format!("encounter {}, auto-closing work item", event.status),
            });
            return Ok(());
        }

        let ctx = CallContext::autonomous(&event.tenant_id);
        self.evaluate(&ctx, event.work_item_id, &event.patient_id, &event.encounter_id)
            .await?;
        Ok(())
    }

    /// Re-run hydration and analysis for an existing work item.
    ///
    /// Accepts an optional externally supplied token for preview/testing
    /// contexts; without one the client-credentials strategy applies.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::NotFound`] for an unknown work item,
    /// - [`OrchestratorError::Validation`] when the item is already terminal.
    pub async fn rehydrate(
        &self,
        work_item_id: Uuid,
        inbound_token: Option<String>,
    ) -> OrchestratorResult<WorkItem> {
        let item = self
            .store
            .get(work_item_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("work item {work_item_id}")))?;

        if item.status.is_terminal() {
            return Err(OrchestratorError::Validation(format!(
                "work item {work_item_id} is {} and cannot be re-hydrated",
                item.status
            )));
        }

        let ctx = CallContext {
            tenant_id: item.tenant_id.clone(),
            inbound_token,
        };
        self.evaluate(&ctx, work_item_id, &item.patient_id, &item.encounter_id)
            .await
    }

    /// The shared hydrate → filter → analyse → transition pipeline.
    async fn evaluate(
        &self,
        ctx: &CallContext,
        work_item_id: Uuid,
        patient_id: &str,
        encounter_id: &str,
    ) -> OrchestratorResult<WorkItem> {
        let bundle = self
            .aggregator
            .aggregate(ctx, patient_id, Some(encounter_id))
            .await?;

        let qualifying = bundle
            .service_requests
            .iter()
            .find(|sr| self.config.pa_required_codes.contains(&sr.code));

        let updated = match qualifying {
            None => {
                tracing::info!(
                    patient_id,
                    encounter_id,
                    "no qualifying order found, auto-closing work item"
                );
                self.settle(work_item_id, WorkItemStatus::NoPaRequired)?
            }
            Some(order) => {
                // Analysis errors propagate here before any mutation, so a
                // failed call leaves the work item untouched.
                let form = self.analysis.analyze(&bundle, &order.code).await?;

                self.store
                    .set_order(work_item_id, order.id.clone(), order.code.clone())?;

                let missing = form.missing_fields();
                let next = if missing.is_empty() {
                    WorkItemStatus::ReadyForReview
                } else {
                    tracing::info!(
                        patient_id,
                        ?missing,
                        "required PA evidence absent, parking work item"
                    );
                    WorkItemStatus::MissingData
                };
                self.settle(work_item_id, next)?
            }
        };

        self.hub.write(Notification {
            kind: NotificationKind::WorkItemStatusChanged,
            transaction_id: updated.id,
            encounter_id: encounter_id.to_string(),
            patient_id: patient_id.to_string(),
            message: format!("work item is now {}", updated.status),
        });

        Ok(updated)
    }

    /// Apply a computed outcome, keeping the current status when the state
    /// graph forbids the move.
    ///
    /// The graph is monotonic: an item already in `ready_for_review` never
    /// regresses to `missing_data` or `no_pa_required` because a later
    /// re-evaluation came back thinner. The re-evaluation is then a no-op on
    /// status and the unchanged item is returned.
    fn settle(&self, work_item_id: Uuid, next: WorkItemStatus) -> OrchestratorResult<WorkItem> {
        let current = self
            .store
            .get(work_item_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("work item {work_item_id}")))?;

        if !current.status.can_transition_to(next) {
            tracing::info!(
                work_item = %work_item_id,
                current = %current.status,
                requested = %next,
                "re-evaluation would regress the work item, keeping current status"
            );
            return Ok(current);
        }

        self.store.transition(work_item_id, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{AggregatorConfig, ClinicalBundle};
    use crate::analysis::PaFormData;
    use crate::auth::{ContextTokenStrategy, TokenStrategy, TokenStrategyResolver};
    use crate::workitem::NewWorkItem;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use ehr::{
        Condition, DocumentRef, EhrClient, EhrResult, EncounterStatus, Observation,
        PatientDemographics, ProcedureRecord, ServiceRequest,
    };
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// EHR fake returning a fixed set of service requests.
    struct OrdersEhr {
        service_requests: Vec<ServiceRequest>,
    }

    #[async_trait]
    impl EhrClient for OrdersEhr {
        async fn patient(
            &self,
            _token: &str,
            _tenant_id: &str,
            _patient_id: &str,
        ) -> EhrResult<PatientDemographics> {
            Ok(PatientDemographics {
                id: "P1".into(),
                name: "Sarah Williams".into(),
                birth_date: Some("1992-03-20".into()),
                gender: None,
                member_id: Some("M-100".into()),
            })
        }

        async fn encounter_status(
            &self,
            _token: &str,
            _tenant_id: &str,
            _patient_id: &str,
            _encounter_id: &str,
        ) -> EhrResult<EncounterStatus> {
            Ok(EncounterStatus::Finished)
        }

        async fn active_conditions(
            &self,
            _token: &str,
            _tenant_id: &str,
            _patient_id: &str,
        ) -> EhrResult<Vec<Condition>> {
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
            Ok(self.service_requests.clone())
        }
    }

    /// Analysis fake replaying scripted outcomes.
    struct ScriptedAnalysis {
        outcomes: Mutex<Vec<OrchestratorResult<PaFormData>>>,
    }

    impl ScriptedAnalysis {
        fn new(outcomes: Vec<OrchestratorResult<PaFormData>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
            }
        }
    }

    #[async_trait]
    impl AnalysisClient for ScriptedAnalysis {
        async fn analyze(
            &self,
            _bundle: &ClinicalBundle,
            procedure_code: &str,
        ) -> OrchestratorResult<PaFormData> {
            self.outcomes
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(complete_form(procedure_code)))
        }
    }

    struct StaticTokenStrategy;

    #[async_trait]
    impl TokenStrategy for StaticTokenStrategy {
        fn can_handle(&self, _ctx: &CallContext) -> bool {
            true
        }

        async fn acquire(
            &self,
            _ctx: &CallContext,
        ) -> crate::auth::AuthResult<crate::auth::AccessToken> {
            Ok(crate::auth::AccessToken::new("static-token"))
        }
    }

    fn complete_form(procedure_code: &str) -> PaFormData {
        PaFormData {
            patient_name: "Sarah Williams".into(),
            patient_dob: "1992-03-20".into(),
            member_id: "M-100".into(),
            diagnosis_codes: vec!["M54.16".into()],
            procedure_code: procedure_code.into(),
            clinical_summary: "summary".into(),
            supporting_evidence: Vec::new(),
            recommendation: crate::analysis::Recommendation::Approve,
            confidence_score: 0.9,
            field_mappings: HashMap::new(),
            policy_id: None,
            lcd_reference: None,
        }
    }

    fn incomplete_form(procedure_code: &str) -> PaFormData {
        let mut form = complete_form(procedure_code);
        form.member_id = "Unknown".into();
        form
    }

    fn mri_order() -> ServiceRequest {
        ServiceRequest {
            id: "sr-1".into(),
            code: "72148".into(),
            display: Some("MRI lumbar spine".into()),
            status: Some("active".into()),
            encounter_id: Some("E1".into()),
        }
    }

    fn non_pa_order() -> ServiceRequest {
        ServiceRequest {
            id: "sr-2".into(),
            code: "99213".into(),
            display: Some("office visit".into()),
            status: Some("active".into()),
            encounter_id: Some("E1".into()),
        }
    }

    struct Harness {
        processor: EncounterProcessor,
        store: Arc<WorkItemStore>,
        hub: Arc<NotificationHub>,
    }

    fn harness(
        service_requests: Vec<ServiceRequest>,
        outcomes: Vec<OrchestratorResult<PaFormData>>,
    ) -> Harness {
        let tokens = Arc::new(TokenStrategyResolver::new(vec![
            Arc::new(ContextTokenStrategy),
            Arc::new(StaticTokenStrategy),
        ]));
        let aggregator = ClinicalDataAggregator::new(
            Arc::new(OrdersEhr { service_requests }),
            tokens,
            AggregatorConfig::default(),
        );
        let store = Arc::new(WorkItemStore::new());
        let hub = Arc::new(NotificationHub::new());
        let processor = EncounterProcessor::new(
            aggregator,
            Arc::new(ScriptedAnalysis::new(outcomes)),
            store.clone(),
            hub.clone(),
            ProcessorConfig::default(),
        );
        Harness {
            processor,
            store,
            hub,
        }
    }

    fn pending_item(store: &WorkItemStore) -> Uuid {
        store
            .create(NewWorkItem {
                encounter_id: "E1".into(),
                patient_id: "P1".into(),
                tenant_id: "tenant-1".into(),
                procedure_code: None,
            })
            .id
    }

    fn event(work_item_id: Uuid) -> EncounterCompletedEvent {
        EncounterCompletedEvent {
            patient_id: "P1".into(),
            encounter_id: "E1".into(),
            tenant_id: "tenant-1".into(),
            work_item_id,
            status: EncounterStatus::Finished,
        }
    }

    #[tokio::test]
    async fn no_qualifying_order_auto_closes_the_item() {
        let h = harness(vec![non_pa_order()], vec![]);
        let id = pending_item(&h.store);
        let mut sub = h.hub.subscribe();

        h.processor.process(&event(id)).await.expect("process");

        let item = h.store.get(id).expect("item");
        assert_eq!(item.status, WorkItemStatus::NoPaRequired);

        let n = sub.recv().await.expect("notification");
        assert_eq!(n.kind, NotificationKind::WorkItemStatusChanged);
        assert_eq!(n.transaction_id, id);
    }

    #[tokio::test]
    async fn complete_form_reaches_ready_for_review() {
        let h = harness(vec![mri_order()], vec![Ok(complete_form("72148"))]);
        let id = pending_item(&h.store);

        h.processor.process(&event(id)).await.expect("process");

        let item = h.store.get(id).expect("item");
        assert_eq!(item.status, WorkItemStatus::ReadyForReview);
        assert_eq!(item.service_request_id.as_deref(), Some("sr-1"));
        assert_eq!(item.procedure_code.as_deref(), Some("72148"));
    }

    #[tokio::test]
    async fn incomplete_form_parks_the_item_in_missing_data() {
        let h = harness(vec![mri_order()], vec![Ok(incomplete_form("72148"))]);
        let id = pending_item(&h.store);

        h.processor.process(&event(id)).await.expect("process");
        assert_eq!(
            h.store.get(id).expect("item").status,
            WorkItemStatus::MissingData
        );
    }

    #[tokio::test]
    async fn analysis_failure_leaves_the_item_untouched() {
        let h = harness(
            vec![mri_order()],
            vec![Err(OrchestratorError::Network("analysis down".into()))],
        );
        let id = pending_item(&h.store);

        let err = h.processor.process(&event(id)).await.expect_err("fails");
        assert!(matches!(err, OrchestratorError::Network(_)));

        let item = h.store.get(id).expect("item");
        assert_eq!(
            item.status,
            WorkItemStatus::Pending,
            "no partial transition on analysis failure"
        );
        assert!(item.updated_at.is_none(), "no partial mutation either");
        assert!(item.service_request_id.is_none());
        assert!(item.procedure_code.is_none());
    }

    #[tokio::test]
    async fn cancelled_encounter_auto_closes_the_item_without_analysis() {
        let h = harness(vec![], vec![]);
        let id = pending_item(&h.store);
        let mut sub = h.hub.subscribe();

        let mut ev = event(id);
        ev.status = EncounterStatus::Cancelled;
        h.processor.process(&ev).await.expect("process");

        assert_eq!(
            h.store.get(id).expect("item").status,
            WorkItemStatus::NoPaRequired
        );
        let n = sub.recv().await.expect("notification");
        assert_eq!(n.message, "encounter cancelled, auto-closing work item");
    }

    #[tokio::test]
    async fn rehydration_recovers_missing_data_when_evidence_appears() {
        // First pass incomplete, second pass (re-hydration) complete.
        let h = harness(
            vec![mri_order()],
            vec![Ok(complete_form("72148")), Ok(incomplete_form("72148"))],
        );
        let id = pending_item(&h.store);

        h.processor.process(&event(id)).await.expect("first pass");
        assert_eq!(
            h.store.get(id).expect("item").status,
            WorkItemStatus::MissingData
        );

        let updated = h
            .processor
            .rehydrate(id, None)
            .await
            .expect("re-hydration");
        assert_eq!(updated.status, WorkItemStatus::ReadyForReview);
    }

    #[tokio::test]
    async fn unfruitful_rehydration_stays_in_missing_data() {
        let h = harness(
            vec![mri_order()],
            vec![Ok(incomplete_form("72148")), Ok(incomplete_form("72148"))],
        );
        let id = pending_item(&h.store);

        h.processor.process(&event(id)).await.expect("first pass");
        let updated = h
            .processor
            .rehydrate(id, None)
            .await
            .expect("re-hydration");
        assert_eq!(updated.status, WorkItemStatus::MissingData);
    }

    #[tokio::test]
    async fn rehydration_never_regresses_ready_for_review() {
        // First pass complete, re-hydration incomplete: the item keeps
        // ready_for_review instead of failing with an illegal transition.
        let h = harness(
            vec![mri_order()],
            vec![Ok(incomplete_form("72148")), Ok(complete_form("72148"))],
        );
        let id = pending_item(&h.store);

        h.processor.process(&event(id)).await.expect("first pass");
        assert_eq!(
            h.store.get(id).expect("item").status,
            WorkItemStatus::ReadyForReview
        );

        let kept = h
            .processor
            .rehydrate(id, None)
            .await
            .expect("re-hydration must not error");
        assert_eq!(kept.status, WorkItemStatus::ReadyForReview);
    }

    #[tokio::test]
    async fn rehydrating_a_terminal_item_is_rejected() {
        let h = harness(vec![non_pa_order()], vec![]);
        let id = pending_item(&h.store);
        h.processor.process(&event(id)).await.expect("process");

        let err = h
            .processor
            .rehydrate(id, None)
            .await
            .expect_err("terminal item");
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }

    #[tokio::test]
    async fn rehydrating_an_unknown_item_is_not_found() {
        let h = harness(vec![], vec![]);
        let err = h
            .processor
            .rehydrate(Uuid::new_v4(), None)
            .await
            .expect_err("unknown item");
        assert!(matches!(err, OrchestratorError::NotFound(_)));
    }

    #[tokio::test]
    async fn run_loop_reports_processing_failures_on_the_hub() {
        let h = harness(
            vec![mri_order()],
            vec![Err(OrchestratorError::Network("analysis down".into()))],
        );
        let id = pending_item(&h.store);
        let mut sub = h.hub.subscribe();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::new(h.processor).run(event_rx, shutdown_rx));

        event_tx.send(event(id)).expect("send event");
        let n = sub.recv().await.expect("failure notification");
        assert_eq!(n.kind, NotificationKind::ProcessingFailed);
        assert_eq!(n.message, "update failed, try rehydrating");

        shutdown_tx.send(true).expect("shutdown");
        handle.await.expect("processor task exits");
    }
}
