use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::DayPart;
use crate::services::availability::{self, SlotQuery};
use crate::state::AppState;

// GET /api/businesses/:id/slots
#[derive(Deserialize)]
pub struct SlotsParams {
    pub date: Option<String>,
    pub duration_min: Option<i64>,
    pub days: Option<i64>,
    pub limit: Option<usize>,
    pub day_part: Option<String>,
}

/// Read-only view of the availability calculator for operator tooling.
pub async fn get_slots(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(business_id): Path<String>,
    Query(params): Query<SlotsParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let day_part = match params.day_part.as_deref() {
        None => None,
        Some("morning") => Some(DayPart::Morning),
        Some("afternoon") => Some(DayPart::Afternoon),
        Some("evening") => Some(DayPart::Evening),
        Some(other) => {
            return Err(AppError::BadRequest(format!("unknown day_part: {other}")));
        }
    };

    let db = state.db.lock().unwrap();
    let business = queries::get_business(&db, &business_id)?
        .ok_or_else(|| AppError::NotFound(format!("business {business_id}")))?;
    let policy = queries::get_policy(&db, &business_id)?;

    let now = Utc::now();
    let today_local = now.with_timezone(&business.tz()).date_naive();
    let pivot_date = match &params.date {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|_| AppError::BadRequest(format!("invalid date: {s}")))?,
        None => today_local,
    };

    let query = SlotQuery {
        pivot_date,
        duration_minutes: params.duration_min.unwrap_or(60),
        days_horizon: params.days.unwrap_or(policy.booking_window_days),
        max_slots: params.limit.unwrap_or(20).min(100),
        day_part,
        exclude_appointment_id: None,
    };
    let slots = availability::find_slots(&db, &business, &policy, &query, now)?;

    Ok(Json(serde_json::to_value(slots).unwrap_or_default()))
}

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}
