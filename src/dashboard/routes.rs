//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::engine::{Clock, PeriodSchedule};
use crate::storage::{AccountStore, BetStore, ResultStore};
use crate::types::{Bet, RoundResult};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub clock: Arc<dyn Clock>,
    pub schedule: PeriodSchedule,
    pub lockout_secs: u32,
    pub results: Arc<dyn ResultStore>,
    pub bets: Arc<dyn BetStore>,
    pub accounts: Arc<dyn AccountStore>,
    /// Default and maximum length of `/api/history`.
    pub history_limit: usize,
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodResponse {
    pub period: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub seconds_remaining: u32,
    pub betting_open: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub owner: String,
    pub balance: Decimal,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

fn store_failure(what: &str, e: anyhow::Error) -> StatusCode {
    warn!(error = %e, "Dashboard failed to read {what}");
    StatusCode::SERVICE_UNAVAILABLE
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/period
pub async fn get_period(State(state): State<AppState>) -> Json<PeriodResponse> {
    let now = state.clock.now();
    let period = state.schedule.period_at(now);
    let seconds_remaining = state.schedule.seconds_remaining(now);
    Json(PeriodResponse {
        period: period.id,
        start: period.start,
        end: period.end,
        seconds_remaining,
        betting_open: seconds_remaining > state.lockout_secs,
    })
}

/// GET /api/history?limit=N
pub async fn get_history(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<Vec<RoundResult>>, StatusCode> {
    let limit = q.limit.unwrap_or(state.history_limit).min(state.history_limit);
    state
        .results
        .recent(limit)
        .await
        .map(Json)
        .map_err(|e| store_failure("history", e))
}

/// GET /api/owners/:owner/bets?limit=N
pub async fn get_owner_bets(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<Vec<Bet>>, StatusCode> {
    let limit = q.limit.unwrap_or(50).min(200);
    state
        .bets
        .list_for_owner(&owner, limit)
        .await
        .map(Json)
        .map_err(|e| store_failure("bets", e))
}

/// GET /api/owners/:owner/balance
pub async fn get_owner_balance(
    State(state): State<AppState>,
    Path(owner): Path<String>,
) -> Result<Json<BalanceResponse>, StatusCode> {
    let balance = state
        .accounts
        .get_balance(&owner)
        .await
        .map_err(|e| store_failure("balance", e))?;
    Ok(Json(BalanceResponse { owner, balance }))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
