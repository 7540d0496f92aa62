//! Background encounter-completion detection.
//!
//! The external API has no push notifications, so a long-lived loop scans
//! every active registration on a fixed cadence and issues one patient-scoped
//! status query each. Completion is detected at most once per registration:
//! the registration is removed from the registry before the event is sent,
//! so a second cycle can never observe it again.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use ehr::{EhrClient, EncounterStatus};

use crate::auth::{CallContext, TokenStrategyResolver};
use crate::registry::{PatientRegistry, RegisteredPatient};
use crate::OrchestratorResult;

/// An encounter that reached a terminal status, published exactly once per
/// registration.
///
/// `status` tells the consumer how the encounter ended: only `finished`
/// encounters are worth analysing, a cancelled or entered-in-error encounter
/// just closes its work item.
#[derive(Clone, Debug)]
pub struct EncounterCompletedEvent {
    pub patient_id: String,
    pub encounter_id: String,
    pub tenant_id: String,
    pub work_item_id: Uuid,
    pub status: EncounterStatus,
}

/// Poll cadence knobs.
///
/// The external API charges a rate-limit budget, so both the cycle interval
/// and the optional per-call stagger are caller-supplied rather than
/// hardcoded.
#[derive(Clone, Debug)]
pub struct PollerConfig {
    /// Time between scan cycles.
    pub interval: Duration,
    /// Optional pause between per-patient status queries within one cycle.
    pub stagger: Option<Duration>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(4),
            stagger: None,
        }
    }
}

/// Scans the registry and emits [`EncounterCompletedEvent`]s.
pub struct EncounterPoller {
    registry: Arc<PatientRegistry>,
    ehr: Arc<dyn EhrClient>,
    tokens: Arc<TokenStrategyResolver>,
    events: mpsc::UnboundedSender<EncounterCompletedEvent>,
    config: PollerConfig,
}

impl EncounterPoller {
    pub fn new(
        registry: Arc<PatientRegistry>,
        ehr: Arc<dyn EhrClient>,
        tokens: Arc<TokenStrategyResolver>,
        events: mpsc::UnboundedSender<EncounterCompletedEvent>,
        config: PollerConfig,
    ) -> Self {
        Self {
            registry,
            ehr,
            tokens,
            events,
            config,
        }
    }

    /// Run the polling loop until the shutdown signal fires.
    ///
    /// Per-patient failures are logged and leave the registration in place
    /// for the next cycle; only cancellation stops the loop.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        tracing::info!(interval = ?self.config.interval, "encounter poller started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("encounter poller shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.scan().await;
                }
            }
        }
    }

    /// One scan cycle over all active registrations.
    async fn scan(&self) {
        for registration in self.registry.active() {
            if let Some(stagger) = self.config.stagger {
                tokio::time::sleep(stagger).await;
            }

            if let Err(e) = self.check(&registration).await {
                tracing::warn!(
                    patient_id = %registration.patient_id,
                    encounter_id = %registration.encounter_id,
                    error = %e,
                    "poll failed, patient stays registered for the next cycle"
                );
            }
        }
    }

    /// Check one registration's encounter status.
    async fn check(&self, registration: &RegisteredPatient) -> OrchestratorResult<()> {
        let ctx = CallContext::autonomous(&registration.tenant_id);
        let token = self.tokens.acquire(&ctx).await?;

        let status = self
            .ehr
            .encounter_status(
                token.as_str(),
                &registration.tenant_id,
                &registration.patient_id,
                &registration.encounter_id,
            )
            .await?;

        if status.is_terminal() {
            // Remove first: whoever gets the registration back owns the one
            // and only completion event for it.
            if let Some(removed) = self.registry.unregister(&registration.patient_id) {
                tracing::info!(
                    patient_id = %removed.patient_id,
                    encounter_id = %removed.encounter_id,
                    %status,
                    "encounter reached a terminal status, handing off"
                );
                let event = EncounterCompletedEvent {
                    patient_id: removed.patient_id,
                    encounter_id: removed.encounter_id,
                    tenant_id: removed.tenant_id,
                    work_item_id: removed.work_item_id,
                    status,
                };
                // Receiver gone means we are shutting down; nothing to do.
                let _ = self.events.send(event);
            }
        } else {
            self.registry
                .record_poll(&registration.patient_id, Utc::now(), status);
        }

        Ok(())
    }
}
