use axum::Router;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{HeaderValue, Method, Request};
use axum::middleware::{Next, from_fn};
use axum::response::Response;
use axum::routing::{get, post};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

use super::routes;
use super::state::AppState;

pub(crate) fn build_router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/get_m3u8", get(routes::stream::get_m3u8))
        .route(
            "/get_m3u8_stream_fast/*url",
            get(routes::stream::get_m3u8_stream_fast),
        )
        .route("/stream", get(routes::stream::stream))
        .route("/share_info", get(routes::stream::share_info))
        .route("/refresh_cookies", get(routes::cookies::refresh_cookies))
        .route("/update_cookie", post(routes::cookies::update_cookie))
        .route("/health", get(routes::health::health))
        .layer(from_fn(access_log_mw))
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if origins.iter().any(|o| o.trim() == "*") {
        return base.allow_origin(Any);
    }

    let list: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o.trim()) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(target: "web", "忽略无效的 CORS 来源: {}", o);
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(list))
}

async fn access_log_mw(req: Request<axum::body::Body>, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let method = req.method().to_string();
    let ip = req
        .extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|c| c.0.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let resp = next.run(req).await;
    info!(target: "web_access", ip = %ip, method = %method, path = %path, status = %resp.status().as_u16(), "request");
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::StatusCode;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::base_system::retry::RetryPolicy;
    use crate::credential::pool::CookiePool;
    use crate::credential::pool::testing::{StaticSource, settings as pool_settings};
    use crate::credential::session::SessionCookies;
    use crate::credential::tier::CookieTier;
    use crate::extractor::http::testing::{ScriptedTransport, ok};
    use crate::extractor::http::{HttpRequest, HttpResponse, TransportError};
    use crate::extractor::manifest::{ManifestFetcher, ManifestSettings, Quality};
    use crate::extractor::pipeline::ExtractionPipeline;
    use crate::extractor::share::ShareResolver;
    use crate::extractor::share::testing::{resolver_step, settings as share_settings};

    const PLAYLIST: &str = "#EXTM3U\n#EXTINF:10,\nseg.ts\n";

    fn state() -> AppState {
        state_with(|req| {
            if req.url.contains("/share/streaming") {
                ok(PLAYLIST)
            } else {
                resolver_step(req)
            }
        })
    }

    fn state_with<H>(handler: H) -> AppState
    where
        H: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        let src = Arc::new(StaticSource::with(CookieTier::General, &["ndus=g1"]));
        src.set(CookieTier::DedicatedMedia, &["ndus=m1", "ndus=m2"]);
        let pool = Arc::new(CookiePool::new(src, pool_settings()));
        let session = Arc::new(SessionCookies::default());
        let t = Arc::new(ScriptedTransport::new(handler));

        let resolver = ShareResolver::new(
            pool.clone(),
            session.clone(),
            t.clone(),
            share_settings(&["https://mirror-a.example/s/{code}"]),
        );
        let manifests = ManifestFetcher::new(
            pool.clone(),
            t,
            ManifestSettings {
                stream_base: "https://stream.example".to_string(),
                site_origin: "https://api.example".to_string(),
                user_agent: "test-agent".to_string(),
                invalid_file_errnos: vec![31066],
                retry: RetryPolicy {
                    attempts: 1,
                    base_delay: Duration::from_millis(1),
                },
            },
        );

        AppState {
            pipeline: Arc::new(ExtractionPipeline::new(resolver, manifests)),
            pool,
            session,
            default_quality: Quality::P720,
            pipeline_timeout: Duration::from_secs(5),
        }
    }

    fn app(state: AppState) -> Router {
        build_router(state, &["http://localhost:3000".to_string()])
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_reports_counts_per_tier() {
        let st = state();
        st.pool.force_refresh_all().await;

        let resp = app(st).oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v = body_json(resp).await;
        assert_eq!(v["status"], "ok");
        assert_eq!(v["cookies"]["general"], 1);
        assert_eq!(v["cookies"]["media"], 2);
        assert_eq!(v["cookies"]["premium"], 0);
    }

    #[tokio::test]
    async fn get_m3u8_returns_playlist_content_type() {
        let resp = app(state())
            .oneshot(get(
                "/get_m3u8?url=https%3A%2F%2Fshare.example%2Fs%2F1AbCdEf23&quality=720",
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[axum::http::header::CONTENT_TYPE],
            "application/vnd.apple.mpegurl"
        );
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], PLAYLIST.as_bytes());
    }

    #[tokio::test]
    async fn unknown_quality_is_bad_request() {
        let resp = app(state())
            .oneshot(get("/get_m3u8?url=https%3A%2F%2Fshare.example%2Fs%2Fx&quality=4k"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(resp).await["error"].is_string());
    }

    #[tokio::test]
    async fn stream_fast_path_keeps_share_query() {
        let resp = app(state())
            .oneshot(get(
                "/get_m3u8_stream_fast/https://share.example/sharing/link?surl=1AbCdEf23",
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn refresh_single_tier_and_reject_unknown() {
        let resp = app(state())
            .oneshot(get("/refresh_cookies?tier=media"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v = body_json(resp).await;
        assert_eq!(v["media"], 2);
        assert!(v.get("general").is_none());

        let resp = app(state())
            .oneshot(get("/refresh_cookies?tier=vip"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn update_cookie_merges_into_session_jar() {
        let st = state();
        let session = st.session.clone();
        let payload = serde_json::json!({
            "cookie_data": "# Netscape HTTP Cookie File\n.terabox.app\tTRUE\t/\tFALSE\t0\tndus\tabc\n"
        });
        let req = Request::builder()
            .method("POST")
            .uri("/update_cookie")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap();

        let resp = app(st).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["success"], true);
        assert_eq!(session.header().as_deref(), Some("ndus=abc"));
    }

    #[tokio::test]
    async fn update_cookie_rejects_empty_data() {
        let req = Request::builder()
            .method("POST")
            .uri("/update_cookie")
            .header("content-type", "application/json")
            .body(Body::from(r##"{"cookie_data":"# nothing"}"##))
            .unwrap();
        let resp = app(state()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn multi_entry_share_maps_to_not_found() {
        let st = state_with(|req| {
            if req.url.contains("/share/list") {
                ok(r#"{"errno":0,"list":[{"fs_id":1},{"fs_id":2}]}"#)
            } else {
                resolver_step(req)
            }
        });
        let resp = app(st)
            .oneshot(get("/share_info?url=https%3A%2F%2Fshare.example%2Fs%2F1AbCdEf23"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let v = body_json(resp).await;
        assert!(v["error"].as_str().unwrap().contains("2 entries"));
    }

    #[tokio::test]
    async fn blank_locator_is_bad_request() {
        let resp = app(state()).oneshot(get("/stream?locator=%20")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
