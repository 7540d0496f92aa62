//! Work items and the PA lifecycle state machine.
//!
//! A work item is the durable audit record for one prior-authorisation
//! request. Status changes go through [`WorkItemStore::transition`], which
//! validates the state graph; nothing ever re-enters `Pending` and terminal
//! states accept no further transitions.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{OrchestratorError, OrchestratorResult};

/// Lifecycle status of a PA work item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    /// Initial status, assigned at registration.
    Pending,
    /// Terminal: no qualifying order was found, the item auto-closed.
    NoPaRequired,
    /// All required form fields are populated; awaiting user review.
    ReadyForReview,
    /// Required evidence is absent; re-hydration may complete it.
    MissingData,
    /// Terminal: the user declared the request unsubmittable.
    PayerRequirementsNotMet,
    /// Terminal: the user approved and the document was written back.
    Submitted,
}

impl WorkItemStatus {
    /// Whether this status accepts no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkItemStatus::NoPaRequired
                | WorkItemStatus::PayerRequirementsNotMet
                | WorkItemStatus::Submitted
        )
    }

    /// Whether the state graph permits moving from `self` to `next`.
    ///
    /// `MissingData` and `ReadyForReview` permit same-state refreshes so a
    /// re-hydration that changes nothing still bumps `updated_at`; terminal
    /// states reject even self-transitions.
    pub fn can_transition_to(self, next: WorkItemStatus) -> bool {
        use WorkItemStatus::*;
        match self {
            Pending => matches!(next, NoPaRequired | ReadyForReview | MissingData),
            MissingData => matches!(next, MissingData | ReadyForReview | PayerRequirementsNotMet),
            ReadyForReview => matches!(next, ReadyForReview | Submitted),
            NoPaRequired | PayerRequirementsNotMet | Submitted => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkItemStatus::Pending => "pending",
            WorkItemStatus::NoPaRequired => "no_pa_required",
            WorkItemStatus::ReadyForReview => "ready_for_review",
            WorkItemStatus::MissingData => "missing_data",
            WorkItemStatus::PayerRequirementsNotMet => "payer_requirements_not_met",
            WorkItemStatus::Submitted => "submitted",
        }
    }
}

impl std::fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkItemStatus {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WorkItemStatus::Pending),
            "no_pa_required" => Ok(WorkItemStatus::NoPaRequired),
            "ready_for_review" => Ok(WorkItemStatus::ReadyForReview),
            "missing_data" => Ok(WorkItemStatus::MissingData),
            "payer_requirements_not_met" => Ok(WorkItemStatus::PayerRequirementsNotMet),
            "submitted" => Ok(WorkItemStatus::Submitted),
            other => Err(OrchestratorError::Validation(format!(
                "unknown work item status '{other}'"
            ))),
        }
    }
}

/// Durable record tracking one PA request through its lifecycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Uuid,
    pub encounter_id: String,
    pub patient_id: String,
    pub tenant_id: String,
    pub service_request_id: Option<String>,
    pub procedure_code: Option<String>,
    pub status: WorkItemStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Fields supplied when creating a work item.
#[derive(Clone, Debug)]
pub struct NewWorkItem {
    pub encounter_id: String,
    pub patient_id: String,
    pub tenant_id: String,
    pub procedure_code: Option<String>,
}

/// Concurrent store of work items, keyed by id.
///
/// All status mutation goes through [`WorkItemStore::transition`]; callers
/// never mutate a work item's status directly.
#[derive(Default)]
pub struct WorkItemStore {
    items: DashMap<Uuid, WorkItem>,
}

impl WorkItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new work item in `Pending` status.
    pub fn create(&self, new: NewWorkItem) -> WorkItem {
        let item = WorkItem {
            id: Uuid::new_v4(),
            encounter_id: new.encounter_id,
            patient_id: new.patient_id,
            tenant_id: new.tenant_id,
            service_request_id: None,
            procedure_code: new.procedure_code,
            status: WorkItemStatus::Pending,
            created_at: Utc::now(),
            updated_at: None,
        };
        self.items.insert(item.id, item.clone());
        item
    }

    pub fn get(&self, id: Uuid) -> Option<WorkItem> {
        self.items.get(&id).map(|e| e.value().clone())
    }

    pub fn list(&self) -> Vec<WorkItem> {
        self.items.iter().map(|e| e.value().clone()).collect()
    }

    /// Move a work item to `next`, validating the state graph.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] for an unknown id and
    /// [`OrchestratorError::Validation`] when the graph forbids the move.
    pub fn transition(&self, id: Uuid, next: WorkItemStatus) -> OrchestratorResult<WorkItem> {
        let mut entry = self
            .items
            .get_mut(&id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("work item {id}")))?;

        if !entry.status.can_transition_to(next) {
            return Err(OrchestratorError::Validation(format!(
                "illegal transition from {} to {}",
                entry.status, next
            )));
        }

        entry.status = next;
        entry.updated_at = Some(Utc::now());
        tracing::info!(work_item = %id, status = %next, "work item transitioned");
        Ok(entry.clone())
    }

    /// Record the qualifying order on a work item.
    pub fn set_order(
        &self,
        id: Uuid,
        service_request_id: impl Into<String>,
        procedure_code: impl Into<String>,
    ) -> OrchestratorResult<()> {
        let mut entry = self
            .items
            .get_mut(&id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("work item {id}")))?;
        entry.service_request_id = Some(service_request_id.into());
        entry.procedure_code = Some(procedure_code.into());
        entry.updated_at = Some(Utc::now());
        Ok(())
    }

    /// Administrative removal of a work item.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] when no such item exists.
    pub fn delete(&self, id: Uuid) -> OrchestratorResult<()> {
        self.items
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| OrchestratorError::NotFound(format!("work item {id}")))
    }
}
