use super::status_for;
use crate::dtos::distribution_list::{CreateDistributionListRequest, UpdateDistributionListRequest};
use crate::dtos::MessageResponse;
use crate::startup::AppState;
use crate::utils::ValidatedJson;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use once_cell::sync::Lazy;
use regex::Regex;
use service_core::error::AppError;
use service_core::resilience::DeleteOutcome;

static DL_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9\-\._@=, ]+$").expect("dl id pattern is valid"));

fn check_dl_id(dl_id: &str) -> Result<(), AppError> {
    if DL_ID.is_match(dl_id) {
        Ok(())
    } else {
        Err(AppError::BadRequest(anyhow::anyhow!(
            "Invalid distribution list id '{}'",
            dl_id
        )))
    }
}

pub async fn create_distribution_list(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreateDistributionListRequest>,
) -> Result<impl IntoResponse, AppError> {
    let created = state.distribution_lists.create(req).await?;
    let status = status_for(&created.members, StatusCode::CREATED);
    Ok((status, Json(created)))
}

pub async fn get_distribution_list(
    State(state): State<AppState>,
    Path(dl_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    check_dl_id(&dl_id)?;
    let details = state.distribution_lists.get(&dl_id).await?;
    Ok(Json(details))
}

pub async fn update_distribution_list(
    State(state): State<AppState>,
    Path(dl_id): Path<String>,
    ValidatedJson(req): ValidatedJson<UpdateDistributionListRequest>,
) -> Result<impl IntoResponse, AppError> {
    check_dl_id(&dl_id)?;
    let updated = state.distribution_lists.update(&dl_id, req).await?;
    let status = status_for(&updated.members, StatusCode::OK);
    Ok((status, Json(updated)))
}

pub async fn delete_distribution_list(
    State(state): State<AppState>,
    Path(dl_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    check_dl_id(&dl_id)?;
    let message = match state.distribution_lists.delete(&dl_id).await? {
        DeleteOutcome::Deleted => format!("Distribution list '{}' deleted successfully", dl_id),
        DeleteOutcome::NotFound => format!("Distribution list '{}' does not exist", dl_id),
    };
    Ok(Json(MessageResponse::new(message)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dl_id_pattern() {
        assert!(check_dl_id("sales-team").is_ok());
        assert!(check_dl_id("sales.team@contoso.com").is_ok());
        assert!(check_dl_id("Sales Team, EU").is_ok());
        assert!(check_dl_id("sales/../team").is_err());
        assert!(check_dl_id("").is_err());
    }
}
