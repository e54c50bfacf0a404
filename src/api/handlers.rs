use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::api::request::CallerContext;
use crate::error::{ApiError, ApiResult, EMPTY_VALUE};
use crate::logic::{RequestContext, ResourceService, ResponseBuilder, ResponseEnvelope, UpdateOutcome};
use crate::model::{AssociationKind, ModelRegistry, ResourceModel, ID_FIELD};
use crate::store::ResourceStore;

/// Shared handler state: the store, the model catalogue and the default page size.
pub struct AppState<S> {
    pub store: Arc<S>,
    pub registry: Arc<ModelRegistry>,
    pub default_limit: u32,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            registry: self.registry.clone(),
            default_limit: self.default_limit,
        }
    }
}

impl<S: ResourceStore> AppState<S> {
    pub fn new(store: Arc<S>, registry: Arc<ModelRegistry>, default_limit: u32) -> Self {
        Self {
            store,
            registry,
            default_limit,
        }
    }

    /// Resolve a resource segment (plural name). Unknown resources are NotFound.
    fn model(&self, resource: &str) -> ApiResult<&ResourceModel> {
        self.registry
            .resolve_plural(resource)
            .map(|model| model.as_ref())
            .ok_or_else(ApiError::not_found)
    }

    fn service<'a>(&'a self, model: &'a ResourceModel) -> ResourceService<'a, S> {
        ResourceService::new(&self.registry, self.store.as_ref(), model, self.default_limit)
    }

    fn responses<'a>(
        &'a self,
        model: &'a ResourceModel,
        request: &'a RequestContext,
    ) -> ResponseBuilder<'a> {
        ResponseBuilder::new(&self.registry, model, request)
    }
}

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// GET /{resource}
pub async fn index<S: ResourceStore + 'static>(
    State(state): State<AppState<S>>,
    Path(resource): Path<String>,
    caller: CallerContext,
    request: RequestContext,
) -> ApiResult<Json<ResponseEnvelope>> {
    let model = state.model(&resource)?;
    list(&state, model, &caller, &request).await
}

/// GET /{resource}/count
pub async fn count<S: ResourceStore + 'static>(
    State(state): State<AppState<S>>,
    Path(resource): Path<String>,
    caller: CallerContext,
    request: RequestContext,
) -> ApiResult<Json<ResponseEnvelope>> {
    let model = state.model(&resource)?;
    let total = state
        .service(model)
        .count(&request.criteria, &caller.defaults_for(model))
        .await?;
    if total == 0 {
        return Err(ApiError::not_found());
    }
    Ok(Json(state.responses(model, &request).count(total)))
}

/// GET /{resource}/search
pub async fn search<S: ResourceStore + 'static>(
    State(state): State<AppState<S>>,
    Path(resource): Path<String>,
    caller: CallerContext,
    request: RequestContext,
) -> ApiResult<Json<ResponseEnvelope>> {
    let model = state.model(&resource)?;
    let page = state
        .service(model)
        .search(&request.criteria, &caller.defaults_for(model))
        .await?;
    if page.rows.is_empty() {
        return Err(ApiError::not_found());
    }
    Ok(Json(state.responses(model, &request).collection(page)))
}

/// GET /{resource}/{id}
pub async fn show<S: ResourceStore + 'static>(
    State(state): State<AppState<S>>,
    Path((resource, id)): Path<(String, String)>,
    caller: CallerContext,
    request: RequestContext,
) -> ApiResult<Json<ResponseEnvelope>> {
    let model = state.model(&resource)?;
    let mut criteria = request.criteria.clone();
    caller.scope_criteria(model, &mut criteria);

    let record = state
        .service(model)
        .show(&id, &criteria)
        .await?
        .ok_or_else(ApiError::not_found)?;
    Ok(Json(state.responses(model, &request).single(record)))
}

/// POST /{resource}
///
/// Responds 201 with the stored record, or with an empty body when `body=false`.
pub async fn create<S: ResourceStore + 'static>(
    State(state): State<AppState<S>>,
    Path(resource): Path<String>,
    caller: CallerContext,
    request: RequestContext,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Response> {
    let model = state.model(&resource)?;
    let mut payload = json_body(payload)?;
    caller.scope_payload(model, &mut payload);

    let record = state.service(model).create(payload).await?;
    if suppress_body(&request) {
        return Ok(StatusCode::CREATED.into_response());
    }
    Ok((StatusCode::CREATED, Json(record)).into_response())
}

/// POST|PUT /{resource}/{id}
pub async fn update<S: ResourceStore + 'static>(
    State(state): State<AppState<S>>,
    Path((resource, id)): Path<(String, String)>,
    caller: CallerContext,
    request: RequestContext,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<ResponseEnvelope>> {
    let model = state.model(&resource)?;
    let mut payload = json_body(payload)?;
    caller.scope_payload(model, &mut payload);

    let mut criteria = request.criteria.clone();
    criteria.remove("body");
    criteria.insert(ID_FIELD, id);
    caller.scope_criteria(model, &mut criteria);

    let outcome = state
        .service(model)
        .update(&criteria, payload, suppress_body(&request))
        .await?;
    let responses = state.responses(model, &request);
    let envelope = match outcome {
        UpdateOutcome::Resource(record) => responses.single(record),
        UpdateOutcome::Suppressed { affected_rows } => responses.affected(affected_rows),
    };
    Ok(Json(envelope))
}

/// DELETE /{resource}/{id}
pub async fn delete<S: ResourceStore + 'static>(
    State(state): State<AppState<S>>,
    Path((resource, id)): Path<(String, String)>,
    caller: CallerContext,
    request: RequestContext,
) -> ApiResult<StatusCode> {
    let model = state.model(&resource)?;
    let mut criteria = request.criteria;
    criteria.insert(ID_FIELD, id);
    caller.scope_criteria(model, &mut criteria);

    state.service(model).delete(&criteria).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /{parent}/{parent_id}/{association}
///
/// Lists the children of an owned association by filtering the target on its foreign key.
pub async fn list_children<S: ResourceStore + 'static>(
    State(state): State<AppState<S>>,
    Path((parent, parent_id, association)): Path<(String, String, String)>,
    caller: CallerContext,
    request: RequestContext,
) -> ApiResult<Json<ResponseEnvelope>> {
    let parent = state.model(&parent)?;
    let assoc = parent
        .association(&association)
        .filter(|assoc| assoc.kind == AssociationKind::Owned)
        .ok_or_else(ApiError::not_found)?;
    let target = state
        .registry
        .resolve(&assoc.target)
        .map(|model| model.as_ref())
        .ok_or_else(ApiError::not_found)?;

    let mut criteria = request.criteria.clone();
    criteria.insert(assoc.foreign_key.clone(), parent_id);
    let request = RequestContext {
        criteria,
        ..request
    };
    list(&state, target, &caller, &request).await
}

async fn list<S: ResourceStore>(
    state: &AppState<S>,
    model: &ResourceModel,
    caller: &CallerContext,
    request: &RequestContext,
) -> ApiResult<Json<ResponseEnvelope>> {
    let page = state
        .service(model)
        .index(&request.criteria, &caller.defaults_for(model))
        .await?;
    if page.rows.is_empty() {
        return Err(ApiError::not_found());
    }
    Ok(Json(state.responses(model, request).collection(page)))
}

fn json_body(payload: Result<Json<Value>, JsonRejection>) -> ApiResult<Value> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::parsing(rejection.body_text(), "body", EMPTY_VALUE))
}

fn suppress_body(request: &RequestContext) -> bool {
    request.criteria.get("body") == Some("false")
}
