//! HTTP routes for the master banker
//!
//! Keys appear colon-joined in the path (`/v1/accounts/camp:strat`).
//! Registry errors map to structured JSON with a stable kind tag.

use adbank_banker::MasterBanker;
use adbank_core::AccountKey;
use adbank_ledger::LedgerError;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;

use crate::dto::{
    BalanceRequest, BudgetMode, BudgetRequest, CreateAccountRequest, ErrorResponse,
    TransferRequest,
};

pub fn router(master: Arc<MasterBanker>) -> Router {
    Router::new()
        .route("/v1/accounts", post(create_account))
        .route("/v1/accounts/:key", get(get_account))
        .route("/v1/accounts/:key/subtree", get(get_subtree))
        .route("/v1/accounts/:key/budget", post(post_budget))
        .route("/v1/accounts/:key/balance", post(post_balance))
        .route("/v1/accounts/:key/shadow", post(post_shadow))
        .route("/v1/accounts/:key/transfer", post(post_transfer))
        .route("/v1/accounts/:key/close", post(post_close))
        .route("/v1/summary", get(get_summary))
        .route("/monitor/health", get(get_health))
        .with_state(master)
}

struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, kind: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: kind.to_string(),
                message: message.into(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        let status = match &err {
            LedgerError::UnknownAccount(_) | LedgerError::UnknownCommitment(_) => {
                StatusCode::NOT_FOUND
            }
            LedgerError::InsufficientFunds { .. }
            | LedgerError::AlreadyExists { .. }
            | LedgerError::DuplicateBid { .. }
            | LedgerError::AccountClosed(_)
            | LedgerError::CannotClose { .. } => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        };
        ApiError::new(status, err.kind(), err.to_string())
    }
}

fn parse_key(raw: &str) -> Result<AccountKey, ApiError> {
    raw.parse()
        .map_err(|e: adbank_core::KeyError| ApiError::new(StatusCode::BAD_REQUEST, "InvalidKey", e.to_string()))
}

async fn create_account(
    State(master): State<Arc<MasterBanker>>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let account = master.create_account(&req.key, req.account_type)?;
    Ok((StatusCode::CREATED, Json(account)))
}

async fn get_account(
    State(master): State<Arc<MasterBanker>>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let key = parse_key(&key)?;
    let account = master
        .account(&key)
        .ok_or(LedgerError::UnknownAccount(key))?;
    Ok(Json(account))
}

async fn get_subtree(
    State(master): State<Arc<MasterBanker>>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let key = parse_key(&key)?;
    let subtree = master.subtree(&key);
    if subtree.is_empty() {
        return Err(LedgerError::UnknownAccount(key).into());
    }
    Ok(Json(subtree))
}

async fn post_budget(
    State(master): State<Arc<MasterBanker>>,
    Path(key): Path<String>,
    Json(req): Json<BudgetRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let key = parse_key(&key)?;
    let account = match req.mode {
        BudgetMode::Set => master.set_budget(&key, &req.amount)?,
        BudgetMode::Add => master.add_budget(&key, &req.amount)?,
    };
    Ok(Json(account))
}

async fn post_balance(
    State(master): State<Arc<MasterBanker>>,
    Path(key): Path<String>,
    Json(req): Json<BalanceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let key = parse_key(&key)?;
    let account = master.set_balance(&key, &req.desired_balance, req.max_throttle)?;
    Ok(Json(account))
}

async fn post_shadow(
    State(master): State<Arc<MasterBanker>>,
    Path(key): Path<String>,
    Json(report): Json<adbank_ledger::SpendReport>,
) -> Result<impl IntoResponse, ApiError> {
    let key = parse_key(&key)?;
    let account = master.report_spend(&key, &report)?;
    Ok(Json(account))
}

async fn post_transfer(
    State(master): State<Arc<MasterBanker>>,
    Path(key): Path<String>,
    Json(req): Json<TransferRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let parent = parse_key(&key)?;
    let account = master.transfer_budget(&parent, &req.child_key, &req.amount)?;
    Ok(Json(account))
}

async fn post_close(
    State(master): State<Arc<MasterBanker>>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let key = parse_key(&key)?;
    let account = master.close_account(&key)?;
    Ok(Json(account))
}

async fn get_summary(State(master): State<Arc<MasterBanker>>) -> impl IntoResponse {
    Json(master.summary())
}

async fn get_health(State(master): State<Arc<MasterBanker>>) -> impl IntoResponse {
    let report = master.health();
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
