//! # EHR
//!
//! Typed clinical records and the data-access collaborator for the external
//! EHR gateway.
//!
//! Responsibilities:
//! - Define domain-level types for the clinical resources the orchestrator
//!   consumes (demographics, conditions, observations, procedures, documents,
//!   service requests, encounter status)
//! - Define the [`EhrClient`] trait used as the seam between orchestration
//!   logic and the external clinical API
//! - Provide the reqwest-backed [`HttpEhrClient`] implementation
//!
//! **No orchestration concerns**: polling cadence, token strategy selection
//! and work-item lifecycle belong in `paflow-core`.

#![warn(rust_2018_idioms)]

pub mod client;
pub mod http;
pub mod types;

pub use client::EhrClient;
pub use http::HttpEhrClient;
pub use types::{
    Condition, DocumentRef, EncounterStatus, Observation, PatientDemographics, ProcedureRecord,
    ServiceRequest,
};

/// Errors returned by clinical-data queries.
///
/// Every variant maps an expected failure mode at the external boundary;
/// callers translate these into their own taxonomy rather than matching on
/// HTTP status codes.
#[derive(Debug, thiserror::Error)]
pub enum EhrError {
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("unauthorised: {0}")]
    Unauthorized(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

pub type EhrResult<T> = std::result::Result<T, EhrError>;
