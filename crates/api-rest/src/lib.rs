//! # API REST
//!
//! REST API implementation for paflow.
//!
//! Handles:
//! - HTTP endpoints with axum (registrations, work items, re-hydration)
//! - Server-sent-events notification stream backed by the notification hub
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialisation, CORS, API-key checks)
//!
//! Orchestration logic lives in `paflow-core`; handlers translate between
//! HTTP and the core services.

#![warn(rust_2018_idioms)]

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::sse::{Event, KeepAlive, Sse},
    response::{Json, Response},
    routing::{delete, get, post, put},
    Router,
};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use paflow_core::{
    EncounterProcessor, NewWorkItem, Notification, NotificationHub, NotificationKind,
    OrchestratorError, PatientRegistry, RegisteredPatient, WorkItem, WorkItemStatus, WorkItemStore,
};

/// REST-edge configuration.
#[derive(Clone, Debug, Default)]
pub struct ApiConfig {
    /// Allowed CORS origins; empty means permissive (development default).
    pub cors_origins: Vec<String>,
    /// Expected `x-api-key` header value; `None` disables the check.
    pub api_key: Option<String>,
}

/// Application state shared across REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<PatientRegistry>,
    pub store: Arc<WorkItemStore>,
    pub processor: Arc<EncounterProcessor>,
    pub hub: Arc<NotificationHub>,
    pub config: Arc<ApiConfig>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        register_patient,
        unregister_patient,
        list_work_items,
        create_work_item,
        get_work_item,
        update_work_item_status,
        rehydrate_work_item,
        delete_work_item,
    ),
    components(schemas(
        HealthRes,
        RegisterPatientReq,
        RegisterPatientRes,
        CreateWorkItemReq,
        UpdateStatusReq,
        RehydrateReq,
        WorkItemRes,
        ListWorkItemsRes,
    ))
)]
struct ApiDoc;

// ============================================================================
// Wire DTOs
// ============================================================================

#[derive(Serialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

#[derive(Deserialize, ToSchema)]
pub struct RegisterPatientReq {
    pub patient_id: String,
    pub encounter_id: String,
    pub tenant_id: String,
}

#[derive(Serialize, ToSchema)]
pub struct RegisterPatientRes {
    pub work_item_id: String,
}

#[derive(Deserialize, ToSchema)]
pub struct CreateWorkItemReq {
    pub patient_id: String,
    pub encounter_id: String,
    pub tenant_id: String,
    pub procedure_code: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateStatusReq {
    pub status: String,
}

#[derive(Deserialize, ToSchema)]
pub struct RehydrateReq {
    /// Optional externally supplied bearer token for preview/testing
    /// contexts; without it the service acquires its own token.
    pub token: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct WorkItemRes {
    pub id: String,
    pub encounter_id: String,
    pub patient_id: String,
    pub tenant_id: String,
    pub service_request_id: Option<String>,
    pub procedure_code: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ListWorkItemsRes {
    pub work_items: Vec<WorkItemRes>,
}

impl From<WorkItem> for WorkItemRes {
    fn from(item: WorkItem) -> Self {
        Self {
            id: item.id.to_string(),
            encounter_id: item.encounter_id,
            patient_id: item.patient_id,
            tenant_id: item.tenant_id,
            service_request_id: item.service_request_id,
            procedure_code: item.procedure_code,
            status: item.status.to_string(),
            created_at: item.created_at.to_rfc3339(),
            updated_at: item.updated_at.map(|t| t.to_rfc3339()),
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Build the REST application router.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    let guarded = Router::new()
        .route("/registrations", post(register_patient))
        .route("/registrations/:patient_id", delete(unregister_patient))
        .route("/workitems", get(list_work_items).post(create_work_item))
        .route("/workitems/:id", get(get_work_item).delete(delete_work_item))
        .route("/workitems/:id/status", put(update_work_item_status))
        .route("/workitems/:id/rehydrate", post(rehydrate_work_item))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/notifications/stream", get(notifications_stream))
        .merge(guarded)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| o.parse::<HeaderValue>().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Validates the provided API key against the configured one.
///
/// Returns `Ok(())` when no key is configured or the header matches.
pub fn validate_api_key(provided: Option<&str>, expected: Option<&str>) -> Result<(), StatusCode> {
    match expected {
        None => Ok(()),
        Some(expected) => match provided {
            Some(provided) if provided == expected => Ok(()),
            _ => Err(StatusCode::UNAUTHORIZED),
        },
    }
}

async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());
    validate_api_key(provided, state.config.api_key.as_deref())?;
    Ok(next.run(req).await)
}

/// Translate an orchestrator error into an HTTP response.
///
/// Detail stays in the logs; clients get the status code and a generic
/// message so raw error text never leaks to the dashboard.
fn error_response(context: &str, e: OrchestratorError) -> (StatusCode, &'static str) {
    tracing::error!("{context} error: {e:?}");
    match e {
        OrchestratorError::NotFound(_) => (StatusCode::NOT_FOUND, "Not found"),
        OrchestratorError::Conflict(_) => (StatusCode::CONFLICT, "Conflict"),
        OrchestratorError::Validation(_) => (StatusCode::BAD_REQUEST, "Invalid request"),
        OrchestratorError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "Unauthorised"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
    }
}

// ============================================================================
// Handlers
// ============================================================================

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for the REST API.
#[axum::debug_handler]
async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "paflow REST API is alive".into(),
    })
}

#[utoipa::path(
    post,
    path = "/registrations",
    request_body = RegisterPatientReq,
    responses(
        (status = 201, description = "Patient registered", body = RegisterPatientRes),
        (status = 409, description = "Patient already registered"),
        (status = 500, description = "Internal server error")
    )
)]
/// Register a patient for encounter-completion monitoring.
///
/// Creates the pending work item and adds the patient to the poller's
/// registry in one step.
#[axum::debug_handler]
async fn register_patient(
    State(state): State<AppState>,
    Json(req): Json<RegisterPatientReq>,
) -> Result<(StatusCode, Json<RegisterPatientRes>), (StatusCode, &'static str)> {
    let item = state.store.create(NewWorkItem {
        encounter_id: req.encounter_id.clone(),
        patient_id: req.patient_id.clone(),
        tenant_id: req.tenant_id.clone(),
        procedure_code: None,
    });

    let registration =
        RegisteredPatient::new(req.patient_id.clone(), req.encounter_id, req.tenant_id, item.id);
    if let Err(e) = state.registry.register(registration) {
        // Roll back the work item so a failed registration leaves no orphan.
        let _ = state.store.delete(item.id);
        return Err(error_response("Register patient", e));
    }

    state.hub.write(Notification {
        kind: NotificationKind::PatientRegistered,
        transaction_id: item.id,
        encounter_id: item.encounter_id.clone(),
        patient_id: req.patient_id,
        message: "patient registered for encounter monitoring".into(),
    });

    Ok((
        StatusCode::CREATED,
        Json(RegisterPatientRes {
            work_item_id: item.id.to_string(),
        }),
    ))
}

#[utoipa::path(
    delete,
    path = "/registrations/{patient_id}",
    responses(
        (status = 204, description = "Registration removed"),
        (status = 404, description = "Patient not registered")
    )
)]
/// Stop monitoring a patient.
#[axum::debug_handler]
async fn unregister_patient(
    State(state): State<AppState>,
    AxumPath(patient_id): AxumPath<String>,
) -> Result<StatusCode, (StatusCode, &'static str)> {
    match state.registry.unregister(&patient_id) {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err((StatusCode::NOT_FOUND, "Not found")),
    }
}

#[utoipa::path(
    get,
    path = "/workitems",
    responses(
        (status = 200, description = "List of work items", body = ListWorkItemsRes)
    )
)]
/// List all PA work items.
#[axum::debug_handler]
async fn list_work_items(State(state): State<AppState>) -> Json<ListWorkItemsRes> {
    let work_items = state.store.list().into_iter().map(WorkItemRes::from).collect();
    Json(ListWorkItemsRes { work_items })
}

#[utoipa::path(
    post,
    path = "/workitems",
    request_body = CreateWorkItemReq,
    responses(
        (status = 201, description = "Work item created", body = WorkItemRes)
    )
)]
/// Create a work item explicitly, without registering the patient.
#[axum::debug_handler]
async fn create_work_item(
    State(state): State<AppState>,
    Json(req): Json<CreateWorkItemReq>,
) -> (StatusCode, Json<WorkItemRes>) {
    let item = state.store.create(NewWorkItem {
        encounter_id: req.encounter_id,
        patient_id: req.patient_id,
        tenant_id: req.tenant_id,
        procedure_code: req.procedure_code,
    });
    (StatusCode::CREATED, Json(item.into()))
}

#[utoipa::path(
    get,
    path = "/workitems/{id}",
    responses(
        (status = 200, description = "Work item", body = WorkItemRes),
        (status = 400, description = "Invalid work item id"),
        (status = 404, description = "Work item not found")
    )
)]
/// Fetch one work item.
#[axum::debug_handler]
async fn get_work_item(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<WorkItemRes>, (StatusCode, &'static str)> {
    let id = parse_work_item_id(&id)?;
    match state.store.get(id) {
        Some(item) => Ok(Json(item.into())),
        None => Err((StatusCode::NOT_FOUND, "Not found")),
    }
}

#[utoipa::path(
    put,
    path = "/workitems/{id}/status",
    request_body = UpdateStatusReq,
    responses(
        (status = 200, description = "Status updated", body = WorkItemRes),
        (status = 400, description = "Illegal transition or unknown status"),
        (status = 404, description = "Work item not found")
    )
)]
/// Transition a work item (user approves, declares unsubmittable, etc).
///
/// The state machine in the store validates the move; terminal work items
/// reject everything.
#[axum::debug_handler]
async fn update_work_item_status(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(req): Json<UpdateStatusReq>,
) -> Result<Json<WorkItemRes>, (StatusCode, &'static str)> {
    let id = parse_work_item_id(&id)?;
    let next: WorkItemStatus = req
        .status
        .parse()
        .map_err(|e| error_response("Update status", e))?;

    let item = state
        .store
        .transition(id, next)
        .map_err(|e| error_response("Update status", e))?;

    state.hub.write(Notification {
        kind: NotificationKind::WorkItemStatusChanged,
        transaction_id: item.id,
        encounter_id: item.encounter_id.clone(),
        patient_id: item.patient_id.clone(),
        message: format!("work item is now {}", item.status),
    });

    Ok(Json(item.into()))
}

#[utoipa::path(
    post,
    path = "/workitems/{id}/rehydrate",
    request_body = RehydrateReq,
    responses(
        (status = 200, description = "Work item re-evaluated", body = WorkItemRes),
        (status = 400, description = "Work item is terminal"),
        (status = 404, description = "Work item not found")
    )
)]
/// Re-hydrate clinical context and re-evaluate an existing work item.
#[axum::debug_handler]
async fn rehydrate_work_item(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(req): Json<RehydrateReq>,
) -> Result<Json<WorkItemRes>, (StatusCode, &'static str)> {
    let id = parse_work_item_id(&id)?;
    let item = state
        .processor
        .rehydrate(id, req.token)
        .await
        .map_err(|e| error_response("Rehydrate", e))?;
    Ok(Json(item.into()))
}

#[utoipa::path(
    delete,
    path = "/workitems/{id}",
    responses(
        (status = 204, description = "Work item deleted"),
        (status = 400, description = "Invalid work item id"),
        (status = 404, description = "Work item not found")
    )
)]
/// Administrative removal of a work item.
#[axum::debug_handler]
async fn delete_work_item(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<StatusCode, (StatusCode, &'static str)> {
    let id = parse_work_item_id(&id)?;
    state
        .store
        .delete(id)
        .map_err(|e| error_response("Delete work item", e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Long-lived notification stream, one subscription per connected client.
///
/// Backed directly by the hub's subscription primitive; a client that
/// reconnects has lost anything sent during the gap and should re-fetch
/// current state via the work-item queries.
#[axum::debug_handler]
async fn notifications_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = state.hub.subscribe().map(|notification| {
        let event = Event::default()
            .event("notification")
            .json_data(&notification)
            .unwrap_or_else(|e| {
                tracing::error!("failed to serialise notification: {e}");
                Event::default().comment("serialisation error")
            });
        Ok(event)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn parse_work_item_id(raw: &str) -> Result<Uuid, (StatusCode, &'static str)> {
    Uuid::parse_str(raw).map_err(|e| {
        tracing::error!("Invalid work item id: {e:?}");
        (StatusCode::BAD_REQUEST, "Invalid work item id")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_check_passes_when_unconfigured() {
        assert!(validate_api_key(None, None).is_ok());
        assert!(validate_api_key(Some("anything"), None).is_ok());
    }

    #[test]
    fn api_key_check_requires_exact_match() {
        assert!(validate_api_key(Some("secret"), Some("secret")).is_ok());
        assert_eq!(
            validate_api_key(Some("wrong"), Some("secret")),
            Err(StatusCode::UNAUTHORIZED)
        );
        assert_eq!(
            validate_api_key(None, Some("secret")),
            Err(StatusCode::UNAUTHORIZED)
        );
    }

    #[test]
    fn work_item_ids_must_be_uuids() {
        assert!(parse_work_item_id("not-a-uuid").is_err());
        assert!(parse_work_item_id("90a8d1ea-3180-41d9-adb0-70a834d4e0f6").is_ok());
    }
}
