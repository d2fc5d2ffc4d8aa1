use axum::Json;
use axum::extract::{Path, Query, RawQuery, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ApiError, run_pipeline};
use crate::extractor::manifest::Quality;
use crate::extractor::page::format_size;
use crate::web::state::AppState;

const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

#[derive(Debug, Deserialize)]
pub(crate) struct M3u8Query {
    pub(crate) url: String,
    pub(crate) quality: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LocatorQuery {
    pub(crate) locator: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ShareQuery {
    pub(crate) url: String,
}

fn playlist(body: String) -> Response {
    ([(header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE)], body).into_response()
}

fn required(url: &str) -> Result<String, ApiError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ApiError::bad_request("url is required"));
    }
    Ok(url.to_string())
}

pub(crate) async fn get_m3u8(
    State(state): State<AppState>,
    Query(q): Query<M3u8Query>,
) -> Result<Response, ApiError> {
    let url = required(&q.url)?;
    let quality = match q.quality.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => raw.parse::<Quality>().map_err(ApiError::bad_request)?,
        None => state.default_quality,
    };

    let body = run_pipeline(&state, move |p, cancel| async move {
        p.extract(&url, quality, &cancel).await
    })
    .await?;
    Ok(playlist(body))
}

/// `/get_m3u8_stream_fast/<share url>`; the share URL's own query string arrives as ours.
pub(crate) async fn get_m3u8_stream_fast(
    State(state): State<AppState>,
    Path(url): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError> {
    let mut url = required(&url)?;
    if let Some(q) = query.filter(|q| !q.is_empty()) {
        url = format!("{url}?{q}");
    }
    let quality = state.default_quality;

    let body = run_pipeline(&state, move |p, cancel| async move {
        p.extract(&url, quality, &cancel).await
    })
    .await?;
    Ok(playlist(body))
}

pub(crate) async fn stream(
    State(state): State<AppState>,
    Query(q): Query<LocatorQuery>,
) -> Result<Response, ApiError> {
    let locator = required(&q.locator)?;
    let body = run_pipeline(&state, move |p, cancel| async move {
        p.refetch(&locator, &cancel).await
    })
    .await?;
    Ok(playlist(body))
}

pub(crate) async fn share_info(
    State(state): State<AppState>,
    Query(q): Query<ShareQuery>,
) -> Result<Json<Value>, ApiError> {
    let url = required(&q.url)?;
    let ctx = run_pipeline(&state, move |p, cancel| async move {
        p.share_info(&url, &cancel).await
    })
    .await?;

    Ok(Json(json!({
        "file_name": ctx.file_name,
        "size": ctx.size,
        "size_formatted": format_size(ctx.size),
        "thumbnail": ctx.thumbnail,
        "short_code": ctx.short_code,
        "fs_id": ctx.fs_id,
        "direct_link": ctx.direct_locator,
    })))
}
