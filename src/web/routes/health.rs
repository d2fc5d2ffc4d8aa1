use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use super::cookies::cookie_counts;
use crate::web::state::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub(crate) async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": VERSION,
        "cookies": cookie_counts(&state),
        "session_cookies": state.session.len(),
        "default_quality": state.default_quality.as_str(),
    }))
}
