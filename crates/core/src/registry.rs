//! Durable record of patients being monitored for encounter completion.
//!
//! Backed by a concurrent map so the poller can scan while new registrations
//! arrive through the API; callers never take locks of their own. One active
//! registration per patient at a time.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ehr::EncounterStatus;
use uuid::Uuid;

use crate::{OrchestratorError, OrchestratorResult};

/// A patient currently being monitored for encounter completion.
#[derive(Clone, Debug)]
pub struct RegisteredPatient {
    pub patient_id: String,
    pub encounter_id: String,
    pub tenant_id: String,
    pub work_item_id: Uuid,
    pub registered_at: DateTime<Utc>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub current_encounter_status: Option<EncounterStatus>,
}

impl RegisteredPatient {
    pub fn new(
        patient_id: impl Into<String>,
        encounter_id: impl Into<String>,
        tenant_id: impl Into<String>,
        work_item_id: Uuid,
    ) -> Self {
        Self {
            patient_id: patient_id.into(),
            encounter_id: encounter_id.into(),
            tenant_id: tenant_id.into(),
            work_item_id,
            registered_at: Utc::now(),
            last_polled_at: None,
            current_encounter_status: None,
        }
    }
}

/// Concurrent registry of monitored patients, keyed by patient id.
#[derive(Default)]
pub struct PatientRegistry {
    patients: DashMap<String, RegisteredPatient>,
}

impl PatientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a patient for monitoring.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Conflict`] when the patient already has
    /// an active registration. The check-and-insert is atomic via the map's
    /// entry API, so two racing registrations cannot both succeed.
    pub fn register(&self, patient: RegisteredPatient) -> OrchestratorResult<()> {
        match self.patients.entry(patient.patient_id.clone()) {
            Entry::Occupied(_) => Err(OrchestratorError::Conflict(format!(
                "patient {} is already registered",
                patient.patient_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(patient);
                Ok(())
            }
        }
    }

    /// Remove a registration, returning it if present.
    ///
    /// The poller relies on this being atomic: whichever caller receives the
    /// removed registration is the only one allowed to emit a completion
    /// event for it.
    pub fn unregister(&self, patient_id: &str) -> Option<RegisteredPatient> {
        self.patients.remove(patient_id).map(|(_, reg)| reg)
    }

    /// Snapshot of all active registrations.
    pub fn active(&self) -> Vec<RegisteredPatient> {
        self.patients.iter().map(|e| e.value().clone()).collect()
    }

    /// Look up one registration.
    pub fn get(&self, patient_id: &str) -> Option<RegisteredPatient> {
        self.patients.get(patient_id).map(|e| e.value().clone())
    }

    /// Record the outcome of a poll cycle for one patient.
    ///
    /// Returns false (a safe no-op) when the patient is no longer
    /// registered, which happens when completion raced with this update.
    pub fn record_poll(
        &self,
        patient_id: &str,
        polled_at: DateTime<Utc>,
        status: EncounterStatus,
    ) -> bool {
        match self.patients.get_mut(patient_id) {
            Some(mut entry) => {
                entry.last_polled_at = Some(polled_at);
                entry.current_encounter_status = Some(status);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.patients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
    }
}
