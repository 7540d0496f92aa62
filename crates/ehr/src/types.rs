//! Domain-level clinical record types.
//!
//! These are the typed records returned by the EHR data-access collaborator.
//! Vendor-specific FHIR field mapping happens on the gateway side; this crate
//! only models the flat shapes the orchestrator needs.

use serde::{Deserialize, Serialize};

/// Lifecycle status of an encounter in the external EHR.
///
/// Only `Finished` triggers downstream processing; the remaining variants are
/// tracked so the poller can record what it last observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncounterStatus {
    /// Encounter is planned but has not started.
    Planned,
    /// Encounter is currently in progress.
    InProgress,
    /// Encounter has been suspended.
    OnHold,
    /// Encounter has ended.
    Finished,
    /// Encounter was cancelled before or during the visit.
    Cancelled,
    /// Encounter was recorded in error.
    EnteredInError,
    /// Any status string this crate does not recognise.
    Unknown,
}

impl EncounterStatus {
    /// Parse from the external API's wire string.
    ///
    /// Unrecognised values map to [`EncounterStatus::Unknown`] rather than an
    /// error; the poller treats them as "not finished yet".
    pub fn from_wire(s: &str) -> Self {
        match s {
            "planned" => EncounterStatus::Planned,
            "in-progress" => EncounterStatus::InProgress,
            "on-hold" => EncounterStatus::OnHold,
            "finished" => EncounterStatus::Finished,
            "cancelled" => EncounterStatus::Cancelled,
            "entered-in-error" => EncounterStatus::EnteredInError,
            _ => EncounterStatus::Unknown,
        }
    }

    /// Convert to the external API's wire string.
    pub fn to_wire(self) -> &'static str {
        match self {
            EncounterStatus::Planned => "planned",
            EncounterStatus::InProgress => "in-progress",
            EncounterStatus::OnHold => "on-hold",
            EncounterStatus::Finished => "finished",
            EncounterStatus::Cancelled => "cancelled",
            EncounterStatus::EnteredInError => "entered-in-error",
            EncounterStatus::Unknown => "unknown",
        }
    }

    /// Whether this status marks the encounter as complete.
    pub fn is_finished(self) -> bool {
        matches!(self, EncounterStatus::Finished)
    }

    /// Whether this status ends the encounter's lifecycle.
    ///
    /// Cancelled and entered-in-error encounters are over just as finished
    /// ones are; they will never produce anything to authorise, so there is
    /// no point polling them further.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EncounterStatus::Finished | EncounterStatus::Cancelled | EncounterStatus::EnteredInError
        )
    }
}

impl std::fmt::Display for EncounterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_wire())
    }
}

/// Patient demographic information.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct PatientDemographics {
    pub id: String,
    pub name: String,
    #[serde(rename = "birthDate", skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(rename = "memberId", skip_serializing_if = "Option::is_none")]
    pub member_id: Option<String>,
}

/// Clinical condition (diagnosis).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Condition {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(rename = "clinicalStatus", skip_serializing_if = "Option::is_none")]
    pub clinical_status: Option<String>,
}

/// Clinical observation (lab result, vital sign).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Observation {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(rename = "effectiveDate", skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<String>,
}

/// Clinical procedure already performed.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProcedureRecord {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(rename = "performedDate", skip_serializing_if = "Option::is_none")]
    pub performed_date: Option<String>,
}

/// Reference to a clinical document with its extracted text.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct DocumentRef {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "contentType", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// An order placed during an encounter.
///
/// Service requests carry the procedure codes that may require prior
/// authorisation.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServiceRequest {
    pub id: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(rename = "encounterId", skip_serializing_if = "Option::is_none")]
    pub encounter_id: Option<String>,
}
