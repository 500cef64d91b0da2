//! HTTP request handlers.

use super::AppState;
use crate::db::{DbError, MetricSummary, MetricType};
use crate::engine::LossQuality;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DEFAULT_ALERT_LIMIT: i64 = 100;
const MAX_ALERT_LIMIT: i64 = 1000;

// ============================================================================
// API: Targets
// ============================================================================

pub async fn handle_get_targets(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.monitor.target_states().await)
}

// ============================================================================
// API: Statistics
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    #[serde(default)]
    pub hours: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct StatisticsResponse {
    pub target: String,
    pub hours: i64,
    pub statistics: BTreeMap<MetricType, MetricSummary>,
}

pub async fn handle_get_statistics(
    State(state): State<AppState>,
    Path(target): Path<String>,
    Query(query): Query<StatisticsQuery>,
) -> impl IntoResponse {
    let hours = query.hours.unwrap_or(24);
    if hours <= 0 {
        return (StatusCode::BAD_REQUEST, "hours must be positive").into_response();
    }

    match state.monitor.get_statistics(&target, hours) {
        Ok(statistics) => Json(StatisticsResponse {
            target,
            hours,
            statistics,
        })
        .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// API: Metrics
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    pub target: String,
    pub metric_type: String,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
}

pub async fn handle_get_metrics(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> impl IntoResponse {
    let metric_type = match query.metric_type.parse::<MetricType>() {
        Ok(t) => t,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };

    let start = match parse_time(query.start.as_deref()) {
        Ok(t) => t,
        Err(msg) => return (StatusCode::BAD_REQUEST, msg).into_response(),
    };
    let end = match parse_time(query.end.as_deref()) {
        Ok(t) => t,
        Err(msg) => return (StatusCode::BAD_REQUEST, msg).into_response(),
    };

    match state.store.get_metrics(&query.target, metric_type, start, end) {
        Ok(metrics) => Json(metrics).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

fn parse_time(value: Option<&str>) -> Result<Option<DateTime<Utc>>, String> {
    match value {
        None | Some("") => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| format!("Invalid RFC 3339 time: {}", s)),
    }
}

// ============================================================================
// API: Alerts
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    #[serde(default)]
    pub unacknowledged: Option<bool>,
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn handle_get_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> impl IntoResponse {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ALERT_LIMIT)
        .clamp(1, MAX_ALERT_LIMIT);

    match state
        .store
        .get_alerts(query.unacknowledged.unwrap_or(false), limit)
    {
        Ok(alerts) => Json(alerts).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_acknowledge_alert(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.store.acknowledge_alert(id, Utc::now()) {
        Ok(alert) => {
            tracing::info!("Alert {} acknowledged", id);
            Json(alert).into_response()
        }
        Err(DbError::NotFound) => (StatusCode::NOT_FOUND, "Alert not found").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// API: Quality
// ============================================================================

#[derive(Debug, Serialize)]
pub struct QualityResponse {
    pub target: String,
    pub timestamp: DateTime<Utc>,
    pub packet_loss_pct: f64,
    pub quality: LossQuality,
    pub description: &'static str,
}

pub async fn handle_get_quality(
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> impl IntoResponse {
    match state.store.latest_metric(&target, MetricType::PacketLoss) {
        Ok(Some(metric)) => {
            let quality = LossQuality::classify(metric.value);
            Json(QualityResponse {
                target,
                timestamp: metric.timestamp,
                packet_loss_pct: metric.value,
                quality,
                description: quality.description(),
            })
            .into_response()
        }
        Ok(None) => (StatusCode::NOT_FOUND, "No packet loss data for target").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
