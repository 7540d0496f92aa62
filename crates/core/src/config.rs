//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and passed into core
//! services; nothing in a request or poll path reads process-wide environment
//! variables, which keeps behaviour consistent across multi-threaded runtimes
//! and test harnesses.

use crate::aggregate::AggregatorConfig;
use crate::auth::ClientCredentialsConfig;
use crate::poller::PollerConfig;
use crate::processor::ProcessorConfig;
use crate::{OrchestratorError, OrchestratorResult};

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    ehr_base_url: String,
    analysis_base_url: String,
    credentials: ClientCredentialsConfig,
    poller: PollerConfig,
    aggregator: AggregatorConfig,
    processor: ProcessorConfig,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Validation`] when any endpoint URL or
    /// credential is empty.
    pub fn new(
        ehr_base_url: String,
        analysis_base_url: String,
        credentials: ClientCredentialsConfig,
        poller: PollerConfig,
        aggregator: AggregatorConfig,
        processor: ProcessorConfig,
    ) -> OrchestratorResult<Self> {
        for (name, value) in [
            ("ehr_base_url", ehr_base_url.as_str()),
            ("analysis_base_url", analysis_base_url.as_str()),
            ("token_url", credentials.token_url.as_str()),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
        ] {
            if value.trim().is_empty() {
                return Err(OrchestratorError::Validation(format!(
                    "{name} cannot be empty"
                )));
            }
        }

        Ok(Self {
            ehr_base_url,
            analysis_base_url,
            credentials,
            poller,
            aggregator,
            processor,
        })
    }

    pub fn ehr_base_url(&self) -> &str {
        &self.ehr_base_url
    }

    pub fn analysis_base_url(&self) -> &str {
        &self.analysis_base_url
    }

    pub fn credentials(&self) -> &ClientCredentialsConfig {
        &self.credentials
    }

    pub fn poller(&self) -> &PollerConfig {
        &self.poller
    }

    pub fn aggregator(&self) -> &AggregatorConfig {
        &self.aggregator
    }

    pub fn processor(&self) -> &ProcessorConfig {
        &self.processor
    }
}
