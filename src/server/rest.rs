//! REST handlers for the 8 `GET` endpoints of §6. Each one reads C4 (live
//! store) and/or C5 (persistence) and serializes the result directly; no
//! handler mutates anything.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::AppError;
use crate::model::{IpByteSummary, Packet, ProtocolCountSummary};

use super::AppState;

/// `GET /api/packets` — last `LIVE_PACKETS_PAGE_SIZE` live packets.
pub async fn get_packets(State(state): State<Arc<AppState>>) -> Json<Vec<Packet>> {
    Json(state.store.recent_packets(config::LIVE_PACKETS_PAGE_SIZE))
}

/// `GET /api/stats` — current `AggregateStats` including top talkers.
pub async fn get_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.stats(&state.ip_cache))
}

/// `GET /api/connections` — top 100 active connections by bytes.
pub async fn get_connections(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.connections())
}

/// `GET /api/interfaces` — every device libpcap can see.
pub async fn get_interfaces(
    State(_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(crate::capture::list_interfaces()?))
}

/// `GET /api/database` — `{enabled:false}` when disabled, else full info.
pub async fn get_database(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.db.info()?))
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    limit: Option<i64>,
    offset: Option<i64>,
    filter: Option<String>,
    country: Option<String>,
    exclude: Option<String>,
    start: Option<String>,
    end: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    packets: Vec<Packet>,
    total: u64,
    limit: i64,
    offset: i64,
}

/// `GET /api/history?limit=&offset=&filter=&country=&exclude=&start=&end=`.
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, AppError> {
    let limit = params.limit.unwrap_or(config::DEFAULT_HISTORY_LIMIT);
    let offset = params.offset.unwrap_or(0);
    let exclude_ips: Vec<String> = params
        .exclude
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let (packets, total) = state.db.query_packets(
        limit,
        offset,
        params.filter.as_deref(),
        params.country.as_deref(),
        &exclude_ips,
        params.start.as_deref(),
        params.end.as_deref(),
    )?;

    Ok(Json(HistoryResponse {
        packets,
        total,
        limit: limit.clamp(0, config::MAX_HISTORY_LIMIT),
        offset,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RangeParams {
    start: Option<String>,
    end: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStatsResponse {
    total_packets: u64,
    total_bytes: u64,
    protocols: Vec<ProtocolCountSummary>,
    top_ips: Vec<IpByteSummary>,
}

/// `GET /api/history/stats?start=&end=`.
pub async fn get_history_stats(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RangeParams>,
) -> Result<impl IntoResponse, AppError> {
    let (total_packets, total_bytes, protocols, top_ips) = state.db.stats(
        params.start.as_deref(),
        params.end.as_deref(),
        &state.ip_cache,
    )?;
    Ok(Json(HistoryStatsResponse {
        total_packets,
        total_bytes,
        protocols,
        top_ips,
    }))
}

/// `GET /api/countries` — sorted distinct non-empty country codes seen in persistence.
pub async fn get_countries(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.db.distinct_countries()?))
}
