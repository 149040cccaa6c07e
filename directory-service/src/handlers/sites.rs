use super::status_for;
use crate::dtos::site::{CreateSiteRequest, GroupChangeRequest, MembershipRequest};
use crate::dtos::MessageResponse;
use crate::services::GroupRole;
use crate::startup::AppState;
use crate::utils::ValidatedJson;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::{Map, Value};
use service_core::error::AppError;
use service_core::resilience::{DeleteOutcome, SyncReport};

/// `{"<key>": [users that now hold the change], "report": [...]}`
fn role_change_response(key: &str, report: SyncReport<String>) -> Result<impl IntoResponse, AppError> {
    let changed: Vec<Value> = report
        .outcomes
        .iter()
        .filter(|o| o.is_success())
        .map(|o| Value::String(o.identity.clone()))
        .collect();
    let status = status_for(&report, StatusCode::OK);

    let mut body = Map::new();
    body.insert(key.to_string(), Value::Array(changed));
    body.insert(
        "report".to_string(),
        serde_json::to_value(&report).map_err(|e| AppError::InternalError(e.into()))?,
    );
    Ok((status, Json(Value::Object(body))))
}

pub async fn create_site(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreateSiteRequest>,
) -> Result<impl IntoResponse, AppError> {
    let created = state.sites.create(req).await?;
    let status = if created.is_complete() {
        StatusCode::CREATED
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(created)))
}

pub async fn delete_site(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let message = match state.sites.delete(&group_id).await? {
        DeleteOutcome::Deleted => format!("Group {} deleted and purged", group_id),
        DeleteOutcome::NotFound => format!("Group {} does not exist", group_id),
    };
    Ok(Json(MessageResponse::new(message)))
}

pub async fn set_membership(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    ValidatedJson(req): ValidatedJson<MembershipRequest>,
) -> Result<impl IntoResponse, AppError> {
    let changed = state.sites.set_membership(&group_id, req).await?;
    let status = if changed.is_complete() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(changed)))
}

pub async fn add_owners(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<GroupChangeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let report = state
        .sites
        .add_to_role(&req.group_id, GroupRole::Owner, &req.user_upns)
        .await?;
    role_change_response("addedOwners", report)
}

pub async fn remove_owners(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<GroupChangeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let report = state
        .sites
        .remove_from_role(&req.group_id, GroupRole::Owner, &req.user_upns)
        .await?;
    role_change_response("removedOwners", report)
}

pub async fn add_members(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<GroupChangeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let report = state
        .sites
        .add_to_role(&req.group_id, GroupRole::Member, &req.user_upns)
        .await?;
    role_change_response("addedMembers", report)
}

pub async fn remove_members(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<GroupChangeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let report = state
        .sites
        .remove_from_role(&req.group_id, GroupRole::Member, &req.user_upns)
        .await?;
    role_change_response("removedMembers", report)
}
