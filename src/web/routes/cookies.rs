use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::ApiError;
use crate::credential::session::parse_netscape;
use crate::credential::tier::CookieTier;
use crate::web::state::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct RefreshQuery {
    pub(crate) tier: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateCookieReq {
    pub(crate) cookie_data: String,
}

fn counts_json(counts: &BTreeMap<CookieTier, usize>) -> Value {
    let map: serde_json::Map<String, Value> = counts
        .iter()
        .map(|(t, n)| (t.as_str().to_string(), json!(n)))
        .collect();
    Value::Object(map)
}

pub(crate) async fn refresh_cookies(
    State(state): State<AppState>,
    Query(q): Query<RefreshQuery>,
) -> Result<Json<Value>, ApiError> {
    let raw = q.tier.as_deref().map(str::trim).unwrap_or("all");
    let counts = if raw.is_empty() || raw.eq_ignore_ascii_case("all") {
        state.pool.force_refresh_all().await
    } else {
        let tier: CookieTier = raw.parse().map_err(ApiError::bad_request)?;
        let n = state.pool.force_refresh(tier).await;
        BTreeMap::from([(tier, n)])
    };
    info!(target: "web", "手动刷新 Cookie: {:?}", counts);
    Ok(Json(counts_json(&counts)))
}

pub(crate) async fn update_cookie(
    State(state): State<AppState>,
    Json(req): Json<UpdateCookieReq>,
) -> Result<Json<Value>, ApiError> {
    let parsed = parse_netscape(&req.cookie_data)
        .map_err(|e| ApiError::bad_request(format!("failed to parse cookie data: {e}")))?;
    let n = state.session.merge(parsed);
    Ok(Json(json!({
        "success": true,
        "message": format!("Successfully updated {n} cookies"),
    })))
}

pub(crate) fn cookie_counts(state: &AppState) -> Value {
    counts_json(&state.pool.counts())
}
