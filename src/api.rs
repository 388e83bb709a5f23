//! REST API server for the sidekick
//!
//! Exposes sessions, trading accounts and the research pipeline over HTTP.
//! Every response uses the `ApiResponse` envelope.

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Path, Request, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::SidekickError;
use crate::ledger::report::{format_history, format_status};
use crate::research::{QuestionAnswer, ResearchManager};
use crate::state::{AccountBook, SessionRegistry};
use crate::Result;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub message: String,
    #[serde(default)]
    pub success_criteria: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClarifyRequest {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub account_id: String,
    pub initial_deposit: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct TradeRequest {
    pub symbol: String,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct ResearchRequest {
    pub query: String,
    #[serde(default)]
    pub answers: Vec<QuestionAnswer>,
}

#[derive(Debug, Deserialize)]
pub struct QuestionsRequest {
    pub query: String,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type Reply = (StatusCode, Json<ApiResponse>);

/// HTTP status for each error kind
pub fn status_for(error: &SidekickError) -> StatusCode {
    use SidekickError::*;
    match error {
        InvalidAmount(_) | InvalidToolInput(_) | SerializationError(_) => StatusCode::BAD_REQUEST,
        AccountNotFound(_) | SessionNotFound(_) | UnknownSymbol(_) | ToolNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        AccountExists(_) | InvalidTransition { .. } | ClarificationNeeded(_) => StatusCode::CONFLICT,
        InsufficientFunds { .. } | InsufficientShares { .. } | RoundLimitExceeded(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        LlmError(_) | ToolFailure(_) | NotificationError(_) | HttpError(_) => StatusCode::BAD_GATEWAY,
        ConfigError(_) | IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reply<T: Serialize>(result: Result<T>) -> Reply {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                warn!(error = %e, %status, "Request failed");
            }
            (status, Json(ApiResponse::error(e.to_string())))
        }
    }
}

/// JSON body extractor whose rejections use the `ApiResponse` envelope
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = Reply;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => {
                let status = rejection.status();
                warn!(%status, "Rejected request body");
                Err((status, Json(ApiResponse::error(rejection.body_text()))))
            }
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub sessions: Arc<SessionRegistry>,
    pub accounts: Arc<AccountBook>,
    pub research: Arc<ResearchManager>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "sessions": state.sessions.len().await,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Session Endpoints
/// =============================

async fn create_session(State(state): State<ApiState>) -> Reply {
    let result = state.sessions.create().await;
    if let Ok(id) = &result {
        info!(session_id = %id, "Session created");
    }
    reply(result.map(|id| serde_json::json!({ "session_id": id })))
}

async fn post_message(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    ApiJson(req): ApiJson<MessageRequest>,
) -> Reply {
    info!(session_id = %id, "Received message");
    let result = async {
        let handle = state.sessions.get(id).await?;
        let mut sidekick = handle.lock().await;
        sidekick
            .submit(&req.message, req.success_criteria.as_deref().unwrap_or_default())
            .await
    }
    .await;
    reply(result)
}

async fn post_clarification(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    ApiJson(req): ApiJson<ClarifyRequest>,
) -> Reply {
    let result = async {
        let handle = state.sessions.get(id).await?;
        let mut sidekick = handle.lock().await;
        sidekick.clarify(&req.message).await
    }
    .await;
    reply(result)
}

async fn reset_session(State(state): State<ApiState>, Path(id): Path<Uuid>) -> Reply {
    let result = state.sessions.reset(id).await;
    reply(result.map(|new_id| serde_json::json!({ "session_id": new_id, "previous_session_id": id })))
}

async fn get_session(State(state): State<ApiState>, Path(id): Path<Uuid>) -> Reply {
    let result = async {
        let handle = state.sessions.get(id).await?;
        let sidekick = handle.lock().await;
        let runs = state.sessions.run_log().list_for_session(id).await?;
        Ok::<_, SidekickError>(serde_json::json!({
            "session": sidekick.session().view(),
            "runs": runs,
        }))
    }
    .await;
    reply(result)
}

async fn delete_session(State(state): State<ApiState>, Path(id): Path<Uuid>) -> Reply {
    let result = state.sessions.remove(id).await;
    reply(result.map(|()| serde_json::json!({ "session_id": id, "removed": true })))
}

/// =============================
/// Account Endpoints
/// =============================

async fn create_account(
    State(state): State<ApiState>,
    ApiJson(req): ApiJson<CreateAccountRequest>,
) -> Reply {
    reply(state.accounts.open(&req.account_id, req.initial_deposit).await)
}

async fn account_status(State(state): State<ApiState>, Path(id): Path<String>) -> Reply {
    let result = state.accounts.snapshot(&id).await.map(|snapshot| {
        serde_json::json!({
            "summary": format_status(&snapshot),
            "account": snapshot,
        })
    });
    reply(result)
}

async fn deposit(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<AmountRequest>,
) -> Reply {
    let result = state
        .accounts
        .update(&id, |account| {
            account.deposit(req.amount)?;
            account.snapshot()
        })
        .await;
    reply(result)
}

async fn withdraw(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<AmountRequest>,
) -> Reply {
    let result = state
        .accounts
        .update(&id, |account| {
            account.withdraw(req.amount)?;
            account.snapshot()
        })
        .await;
    reply(result)
}

async fn buy(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<TradeRequest>,
) -> Reply {
    let result = state
        .accounts
        .update(&id, |account| {
            account.buy(&req.symbol, req.quantity)?;
            account.snapshot()
        })
        .await;
    reply(result)
}

async fn sell(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<TradeRequest>,
) -> Reply {
    let result = state
        .accounts
        .update(&id, |account| {
            account.sell(&req.symbol, req.quantity)?;
            account.snapshot()
        })
        .await;
    reply(result)
}

async fn transactions(State(state): State<ApiState>, Path(id): Path<String>) -> Reply {
    let result = state
        .accounts
        .update(&id, |account| {
            Ok(serde_json::json!({
                "history": format_history(account.transactions()),
                "transactions": account.transactions(),
            }))
        })
        .await;
    reply(result)
}

/// =============================
/// Research Endpoints
/// =============================

async fn research_questions(
    State(state): State<ApiState>,
    ApiJson(req): ApiJson<QuestionsRequest>,
) -> Reply {
    reply(state.research.clarifying_questions(&req.query).await)
}

async fn run_research(State(state): State<ApiState>, ApiJson(req): ApiJson<ResearchRequest>) -> Reply {
    info!(query = %req.query, "Received research request");
    reply(state.research.run(&req.query, &req.answers).await)
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(delete_session))
        .route("/api/sessions/:id/messages", post(post_message))
        .route("/api/sessions/:id/clarify", post(post_clarification))
        .route("/api/sessions/:id/reset", post(reset_session))
        .route("/api/accounts", post(create_account))
        .route("/api/accounts/:id", get(account_status))
        .route("/api/accounts/:id/deposit", post(deposit))
        .route("/api/accounts/:id/withdraw", post(withdraw))
        .route("/api/accounts/:id/buy", post(buy))
        .route("/api/accounts/:id/sell", post(sell))
        .route("/api/accounts/:id/transactions", get(transactions))
        .route("/api/research", post(run_research))
        .route("/api/research/questions", post(research_questions))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
