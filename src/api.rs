use axum::{
    Router,
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    errors::{ApiError, ErrorContext},
    models::{Card, DueCursor},
    review_service::ReviewService,
    store::MAX_DUE_PAGE,
};

// Import logging macros
use crate::{log_api_start, log_api_success, log_api_warn};

#[derive(Clone)]
pub struct AppState {
    pub review_service: ReviewService,
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, (axum::http::StatusCode, Json<ApiResponse<()>>)>;

#[derive(Debug, Clone, Deserialize)]
pub struct EnsureCardRequest {
    pub user_id: Uuid,
    pub question_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitReviewRequest {
    pub user_id: Uuid,
    pub question_id: Uuid,
    /// 1 = Again, 2 = Hard, 3 = Good, 4 = Easy
    pub grade: i32,
    /// Review instant; defaults to the server clock when omitted.
    pub reviewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct DueParams {
    pub before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub after_due: Option<DateTime<Utc>>,
    pub after_question: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct DueCountParams {
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct DuePage {
    pub cards: Vec<Card>,
    /// Present while more pages may exist; feed back as `after_due` and
    /// `after_question` to resume.
    pub next_cursor: Option<DueCursor>,
}

#[derive(Debug, Serialize)]
pub struct DueCount {
    pub due: i64,
}

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

const DEFAULT_DUE_LIMIT: i64 = 100;

// Card endpoints

pub async fn ensure_card(
    State(state): State<AppState>,
    Json(request): Json<EnsureCardRequest>,
) -> ApiResult<Card> {
    log_api_start!("ensure_card", user_id = request.user_id, question_id = request.question_id);

    match state
        .review_service
        .ensure_card(request.user_id, request.question_id, Utc::now())
        .await
    {
        Ok(card) => {
            log_api_success!("ensure_card", question_id = card.question_id, "card ready");
            Ok(Json(ApiResponse::success(card)))
        }
        Err(e) => {
            let context = ErrorContext::new("ensure_card", "card")
                .with_id(&request.question_id.to_string());
            Err(ApiError::from(e).to_response_with_context(context))
        }
    }
}

pub async fn get_card(
    State(state): State<AppState>,
    Path((user_id, question_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Card> {
    log_api_start!("get_card", user_id = user_id, question_id = question_id);

    match state.review_service.get_card(user_id, question_id).await {
        Ok(Some(card)) => Ok(Json(ApiResponse::success(card))),
        Ok(None) => {
            log_api_warn!("get_card", question_id = question_id, "card not found");
            let error = ApiError::NotFound(format!(
                "No card for user '{user_id}' and question '{question_id}'"
            ));
            let context =
                ErrorContext::new("get_card", "card").with_id(&question_id.to_string());
            Err(error.to_response_with_context(context))
        }
        Err(e) => {
            let context =
                ErrorContext::new("get_card", "card").with_id(&question_id.to_string());
            Err(ApiError::from(e).to_response_with_context(context))
        }
    }
}

// Due-set endpoints

pub async fn get_due_cards(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(params): Query<DueParams>,
) -> ApiResult<DuePage> {
    log_api_start!("get_due_cards", user_id = user_id);

    let cursor = match (params.after_due, params.after_question) {
        (Some(due_date), Some(question_id)) => Some(DueCursor {
            due_date,
            question_id,
        }),
        (None, None) => None,
        _ => {
            let error = ApiError::ValidationError(
                "after_due and after_question must be supplied together".to_string(),
            );
            let context = ErrorContext::new("get_due_cards", "card");
            return Err(error.to_response_with_context(context));
        }
    };

    let before = params.before.unwrap_or_else(Utc::now);
    let limit = params
        .limit
        .unwrap_or(DEFAULT_DUE_LIMIT)
        .clamp(1, MAX_DUE_PAGE);

    match state
        .review_service
        .due_cards(user_id, before, limit, cursor.as_ref())
        .await
    {
        Ok(cards) => {
            log_api_success!("get_due_cards", count = cards.len(), "due cards retrieved");
            let next_cursor = if (cards.len() as i64) < limit {
                None
            } else {
                cards.last().map(DueCursor::from_card)
            };
            Ok(Json(ApiResponse::success(DuePage { cards, next_cursor })))
        }
        Err(e) => {
            let context = ErrorContext::new("get_due_cards", "card");
            Err(ApiError::from(e).to_response_with_context(context))
        }
    }
}

pub async fn get_due_count(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(params): Query<DueCountParams>,
) -> ApiResult<DueCount> {
    log_api_start!("get_due_count", user_id = user_id);

    let at = params.at.unwrap_or_else(Utc::now);
    match state.review_service.due_count(user_id, at).await {
        Ok(due) => Ok(Json(ApiResponse::success(DueCount { due }))),
        Err(e) => {
            let context = ErrorContext::new("get_due_count", "card");
            Err(ApiError::from(e).to_response_with_context(context))
        }
    }
}

// Review endpoints

pub async fn submit_review(
    State(state): State<AppState>,
    Json(request): Json<SubmitReviewRequest>,
) -> ApiResult<Card> {
    log_api_start!(
        "submit_review",
        user_id = request.user_id,
        question_id = request.question_id
    );

    let now = request.reviewed_at.unwrap_or_else(Utc::now);

    match state
        .review_service
        .record_review(request.user_id, request.question_id, request.grade, now)
        .await
    {
        Ok(card) => {
            log_api_success!(
                "submit_review",
                question_id = card.question_id,
                "review recorded"
            );
            Ok(Json(ApiResponse::success(card)))
        }
        Err(e) => {
            let context = ErrorContext::new("submit_review", "card")
                .with_id(&request.question_id.to_string());
            Err(ApiError::from(e).to_response_with_context(context))
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Card routes
        .route("/api/cards", post(ensure_card))
        .route("/api/users/:user_id/cards/due", get(get_due_cards))
        .route("/api/users/:user_id/cards/due/count", get(get_due_count))
        .route("/api/users/:user_id/cards/:question_id", get(get_card))
        // Review routes
        .route("/api/reviews", post(submit_review))
        .with_state(state)
}
