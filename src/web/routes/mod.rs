pub(crate) mod cookies;
pub(crate) mod health;
pub(crate) mod stream;

use std::future::Future;
use std::sync::Arc;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::extractor::error::ExtractError;
use crate::extractor::pipeline::{ExtractionPipeline, run_isolated};
use crate::web::state::AppState;

/// JSON `{"error": ...}` with the status of the failure class.
#[derive(Debug)]
pub(crate) struct ApiError {
    pub(crate) status: StatusCode,
    pub(crate) message: String,
}

impl ApiError {
    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<ExtractError> for ApiError {
    fn from(e: ExtractError) -> Self {
        let status =
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(target: "web", "解析失败 ({}): {}", status.as_u16(), e);
        }
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Runs one pipeline operation isolated from the handler, bounded by `pipeline_timeout`.
pub(crate) async fn run_pipeline<T, F, Fut>(state: &AppState, op: F) -> Result<T, ApiError>
where
    F: FnOnce(Arc<ExtractionPipeline>, CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, ExtractError>> + Send + 'static,
    T: Send + 'static,
{
    let cancel = CancellationToken::new();
    let fut = op(state.pipeline.clone(), cancel.clone());
    run_isolated(fut, state.pipeline_timeout, cancel)
        .await
        .map_err(ApiError::from)
}
