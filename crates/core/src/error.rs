//! Orchestrator error taxonomy.
//!
//! Every external-boundary call (token acquisition, clinical query, analysis
//! call) returns one of these variants for its expected failure modes rather
//! than panicking; only genuine programming errors use `Unexpected`.

use crate::auth::AuthError;
use ehr::EhrError;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorised: {0}")]
    Unauthorized(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
    #[error("unexpected: {0}")]
    Unexpected(String),
}

pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

impl From<EhrError> for OrchestratorError {
    fn from(e: EhrError) -> Self {
        match e {
            EhrError::NotFound(msg) => OrchestratorError::NotFound(msg),
            EhrError::Unauthorized(msg) => OrchestratorError::Unauthorized(msg),
            EhrError::Network(msg) => OrchestratorError::Network(msg),
            EhrError::InvalidResponse(msg) => OrchestratorError::InvalidResponse(msg),
        }
    }
}

impl From<AuthError> for OrchestratorError {
    fn from(e: AuthError) -> Self {
        // Token problems of any kind surface to callers as an authorisation
        // failure; the detail stays in the message for the logs.
        OrchestratorError::Unauthorized(e.to_string())
    }
}
