use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::student_dto::{
        AnswerSheetResponse, SaveAnswerPayload, StartAttemptPayload, StudentWorksheetResponse,
    },
    error::Result,
    AppState,
};

#[axum::debug_handler]
pub async fn get_worksheet_by_code(
    State(state): State<AppState>,
    Path(join_code): Path<String>,
) -> Result<impl IntoResponse> {
    let published = state.worksheet_service.get_published_by_code(&join_code).await?;
    Ok(Json(StudentWorksheetResponse::from(published)))
}

#[axum::debug_handler]
pub async fn start_attempt(
    State(state): State<AppState>,
    Path(join_code): Path<String>,
    Json(payload): Json<StartAttemptPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let published = state.worksheet_service.get_published_by_code(&join_code).await?;
    let sheet = state.sheet_service.start_attempt(published.id, payload).await?;
    Ok((StatusCode::CREATED, Json(AnswerSheetResponse::from(sheet))))
}

#[axum::debug_handler]
pub async fn save_answer(
    State(state): State<AppState>,
    Path(sheet_id): Path<Uuid>,
    Json(payload): Json<SaveAnswerPayload>,
) -> Result<impl IntoResponse> {
    let sheet = state.sheet_service.save_answer(sheet_id, payload).await?;
    Ok(Json(AnswerSheetResponse::from(sheet)))
}

#[axum::debug_handler]
pub async fn submit_answer_sheet(
    State(state): State<AppState>,
    Path(sheet_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let sheet = state
        .sheet_service
        .submit(sheet_id, &state.grading_service, &state.grading_queue)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(AnswerSheetResponse::from(sheet))))
}

#[axum::debug_handler]
pub async fn get_answer_sheet(
    State(state): State<AppState>,
    Path(sheet_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let sheet = state.sheet_service.get_sheet(sheet_id).await?;
    Ok(Json(AnswerSheetResponse::from(sheet)))
}
