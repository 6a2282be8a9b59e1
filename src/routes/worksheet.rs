use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::authoring_dto::{
        CreateWorksheetPayload, InsertQuestionPayload, PublishedWorksheetResponse,
        RemoveQuestionQuery, ReorderQuestionsPayload, UpdateWorksheetPayload, WorksheetListQuery,
        WorksheetListResponse, WorksheetResponse,
    },
    dto::student_dto::AnswerSheetResponse,
    error::{Error, Result},
    AppState,
};

#[axum::debug_handler]
pub async fn create_worksheet(
    State(state): State<AppState>,
    Json(payload): Json<CreateWorksheetPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let worksheet = state.worksheet_service.create_worksheet(payload).await?;
    Ok((StatusCode::CREATED, Json(WorksheetResponse::from(worksheet))))
}

#[axum::debug_handler]
pub async fn list_worksheets(
    State(state): State<AppState>,
    Query(query): Query<WorksheetListQuery>,
) -> Result<impl IntoResponse> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let list = state.worksheet_service.list_worksheets(page, per_page).await?;
    Ok(Json(WorksheetListResponse::from(list)))
}

#[axum::debug_handler]
pub async fn get_worksheet(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let worksheet = state.worksheet_service.get_worksheet(id).await?;
    Ok(Json(WorksheetResponse::from(worksheet)))
}

#[axum::debug_handler]
pub async fn update_worksheet(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateWorksheetPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let worksheet = state.worksheet_service.update_worksheet(id, payload).await?;
    Ok(Json(WorksheetResponse::from(worksheet)))
}

#[axum::debug_handler]
pub async fn delete_worksheet(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    state.worksheet_service.delete_worksheet(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
pub async fn insert_question(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<InsertQuestionPayload>,
) -> Result<impl IntoResponse> {
    let worksheet = state.worksheet_service.insert_question(id, payload).await?;
    Ok(Json(WorksheetResponse::from(worksheet)))
}

#[axum::debug_handler]
pub async fn remove_question(
    State(state): State<AppState>,
    Path((id, order)): Path<(Uuid, i32)>,
    Query(query): Query<RemoveQuestionQuery>,
) -> Result<impl IntoResponse> {
    let path = query.parse_path()?;
    let worksheet = state
        .worksheet_service
        .remove_question(id, &path, order)
        .await?;
    Ok(Json(WorksheetResponse::from(worksheet)))
}

#[axum::debug_handler]
pub async fn reorder_questions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReorderQuestionsPayload>,
) -> Result<impl IntoResponse> {
    let worksheet = state.worksheet_service.reorder_questions(id, payload).await?;
    Ok(Json(WorksheetResponse::from(worksheet)))
}

#[axum::debug_handler]
pub async fn publish_worksheet(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let published = state.worksheet_service.publish(id).await?;
    Ok((
        StatusCode::CREATED,
        Json(PublishedWorksheetResponse::from(published)),
    ))
}

#[axum::debug_handler]
pub async fn list_answer_sheets(
    State(state): State<AppState>,
    Path(published_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    // 404 for an unknown publication rather than an empty list.
    state.worksheet_service.get_published_by_id(published_id).await?;
    let sheets = state.worksheet_service.list_answer_sheets(published_id).await?;
    let sheets: Vec<AnswerSheetResponse> =
        sheets.into_iter().map(AnswerSheetResponse::from).collect();
    Ok(Json(sheets))
}

/// Manually queues grading for a submitted sheet. Covers both re-running a
/// sheet that landed in `checking_failed` and grading on the teacher's
/// explicit request.
#[axum::debug_handler]
pub async fn check_answer_sheet(
    State(state): State<AppState>,
    Path(sheet_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let sheet = state.sheet_service.get_sheet(sheet_id).await?;
    match sheet.sheet_status()? {
        crate::models::answer_sheet::SheetStatus::Answering => {
            return Err(Error::Conflict(
                "Answer sheet has not been submitted yet".to_string(),
            ));
        }
        crate::models::answer_sheet::SheetStatus::Returned => {
            return Err(Error::Conflict(
                "Answer sheet has already been graded and returned".to_string(),
            ));
        }
        crate::models::answer_sheet::SheetStatus::CheckingFailed => {
            // Re-arm the pipeline; the queue worker picks it up from here.
            sqlx::query(r#"UPDATE answer_sheets SET status = 'checking', updated_at = NOW() WHERE id = $1 AND status = 'checking_failed'"#)
                .bind(sheet_id)
                .execute(&state.pool)
                .await?;
        }
        _ => {}
    }
    let job_id = state.grading_queue.enqueue(sheet_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "job_id": job_id, "answer_sheet_id": sheet_id })),
    ))
}
