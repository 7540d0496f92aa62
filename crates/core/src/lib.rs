//! # Paflow Core
//!
//! Orchestration engine for prior-authorisation paperwork: watches clinical
//! encounters in an external EHR, hydrates clinical context once an encounter
//! completes, invokes the AI analysis collaborator, and tracks the resulting
//! PA request through its review/submission lifecycle.
//!
//! Components, leaves first:
//! - [`auth`]: token acquisition strategies and the resolver that picks one
//! - [`aggregate`]: fan-out hydration of clinical context
//! - [`registry`]: patients currently monitored for encounter completion
//! - [`poller`]: background loop detecting completed encounters
//! - [`analysis`]: the external analysis collaborator and its caching decorator
//! - [`processor`]: completion-event consumer driving the work-item lifecycle
//! - [`workitem`]: durable work items and the PA state machine
//! - [`notify`]: in-process broadcast to connected clients
//!
//! **No API concerns**: HTTP endpoints, SSE framing and API-key checks belong
//! in `api-rest`.

#![warn(rust_2018_idioms)]

pub mod aggregate;
pub mod analysis;
pub mod auth;
pub mod config;
pub mod error;
pub mod notify;
pub mod poller;
pub mod processor;
pub mod registry;
pub mod workitem;

pub use aggregate::{AggregatorConfig, ClinicalBundle, ClinicalDataAggregator};
pub use analysis::{
    AnalysisClient, CachedAnalysisClient, EvidenceItem, EvidenceStatus, HttpAnalysisClient,
    PaFormData, Recommendation,
};
pub use config::CoreConfig;
pub use error::{OrchestratorError, OrchestratorResult};
pub use notify::{Notification, NotificationHub, NotificationKind, Subscription};
pub use poller::{EncounterCompletedEvent, EncounterPoller, PollerConfig};
pub use processor::{EncounterProcessor, ProcessorConfig};
pub use registry::{PatientRegistry, RegisteredPatient};
pub use workitem::{NewWorkItem, WorkItem, WorkItemStatus, WorkItemStore};
