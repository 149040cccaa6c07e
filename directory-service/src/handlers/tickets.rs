use crate::dtos::ticket::{CreateTicketRequest, TicketResponse, UpdateTicketRequest};
use crate::startup::AppState;
use crate::utils::ValidatedJson;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

pub async fn create_ticket(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreateTicketRequest>,
) -> Result<impl IntoResponse, AppError> {
    let record = state.tickets.create(req.into()).await?;
    Ok((StatusCode::CREATED, Json(TicketResponse::from(record))))
}

pub async fn update_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<u64>,
    ValidatedJson(req): ValidatedJson<UpdateTicketRequest>,
) -> Result<impl IntoResponse, AppError> {
    let record = state.tickets.update(ticket_id, req.into()).await?;
    Ok(Json(TicketResponse::from(record)))
}
