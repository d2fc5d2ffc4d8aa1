//! HTTP 服务层：把解析流程与 Cookie 管理暴露为 REST 接口。

mod router;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::base_system::context::Config;
use crate::credential::pool::{CookiePool, PoolSettings};
use crate::credential::session::SessionCookies;
use crate::credential::source::{RemoteCredentialSource, RemoteSourceConfig};
use crate::credential::validator::CookieValidator;
use crate::extractor::http::{HttpTransport, ReqwestTransport};
use crate::extractor::pipeline::ExtractionPipeline;
use state::AppState;

const BIND_ENV: &str = "TERABOX_STREAM_ADDR";

pub fn run(config: Config) -> Result<()> {
    let bind_raw = std::env::var(BIND_ENV).unwrap_or_else(|_| config.bind_addr.clone());
    let bind_addrs: Vec<SocketAddr> = parse_bind_addrs(&bind_raw)?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(run_async(bind_addrs, config))
}

fn parse_bind_addr(raw: &str) -> Result<SocketAddr> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(anyhow!("empty bind addr"));
    }

    if let Ok(a) = s.parse::<SocketAddr>() {
        return Ok(a);
    }

    // IPv6 without brackets, e.g. "::1:8080": the last ':' segment is the port.
    if !s.starts_with('[')
        && let Some((host, port)) = s.rsplit_once(':')
        && host.contains(':')
        && !port.is_empty()
        && port.chars().all(|c| c.is_ascii_digit())
        && let Ok(a) = format!("[{host}]:{port}").parse::<SocketAddr>()
    {
        return Ok(a);
    }

    Err(anyhow!(
        "invalid bind address '{s}'. Use '0.0.0.0:8080' or '[::1]:8080'; separate several with commas"
    ))
}

fn parse_bind_addrs(raw: &str) -> Result<Vec<SocketAddr>> {
    let mut out = Vec::new();
    for part in raw.split([',', ';']).map(str::trim).filter(|s| !s.is_empty()) {
        let a = parse_bind_addr(part)?;
        if !out.contains(&a) {
            out.push(a);
        }
    }
    if out.is_empty() {
        return Err(anyhow!("no bind address configured (bind_addr / {BIND_ENV})"));
    }
    Ok(out)
}

async fn run_async(bind_addrs: Vec<SocketAddr>, config: Config) -> Result<()> {
    let transport: Arc<dyn HttpTransport> =
        Arc::new(ReqwestTransport::new(config.request_timeout())?);
    let source = Arc::new(RemoteCredentialSource::new(
        transport.clone(),
        RemoteSourceConfig::from_config(&config),
    ));
    let pool = Arc::new(CookiePool::new(source, PoolSettings::from_config(&config)));
    let session = Arc::new(SessionCookies::from_header(&config.session_cookie));
    if session.is_empty() {
        info!(target: "startup", "未配置会话 Cookie，转存将使用池中的 Cookie");
    }
    let pipeline = Arc::new(ExtractionPipeline::from_config(
        &config,
        pool.clone(),
        session.clone(),
        transport.clone(),
    ));

    let counts = pool.force_refresh_all().await;
    info!(target: "startup", "初始 Cookie 数量: {:?}", counts);
    for (tier, n) in &counts {
        if *n == 0 {
            warn!(target: "startup", "{} 层级没有可用 Cookie，相关请求将失败", tier);
        }
    }

    let shutdown = CancellationToken::new();
    let validator = Arc::new(CookieValidator::new(
        pool.clone(),
        transport,
        config.cookie_probe_url.clone(),
        config.user_agent.clone(),
    ));
    let validator_task = validator.spawn(
        Duration::from_secs(config.cookie_validate_interval),
        shutdown.child_token(),
    );

    let state = AppState {
        pipeline,
        pool,
        session,
        default_quality: config.quality(),
        pipeline_timeout: config.pipeline_timeout(),
    };

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
    }

    let mut servers = Vec::new();
    for bind in bind_addrs {
        let listener = match tokio::net::TcpListener::bind(bind).await {
            Ok(l) => l,
            Err(e) => {
                // [::] may already accept IPv4 on dual-stack hosts.
                if !servers.is_empty() && e.kind() == std::io::ErrorKind::AddrInUse {
                    warn!(target: "web", bind = %bind, error = %e, "bind failed (AddrInUse), likely covered by another listener; skipping");
                    continue;
                }
                return Err(anyhow!(e).context(format!("bind failed: {bind}")));
            }
        };

        info!(target: "web", "listening on http://{bind}/ (set {BIND_ENV} to override)");

        let app = router::build_router(state.clone(), &config.cors_origins);
        let shutdown = shutdown.clone();
        servers.push(tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
            })
            .await
        }));
    }

    if servers.is_empty() {
        shutdown.cancel();
        return Err(anyhow!("no listeners started (check bind_addr / {BIND_ENV})"));
    }

    for h in servers {
        h.await
            .map_err(|e| anyhow!("server task join failed: {e}"))?
            .map_err(|e| anyhow!(e))?;
    }

    shutdown.cancel();
    if let Err(e) = validator_task.await {
        warn!(target: "web", "validator task ended abnormally: {e}");
    }
    info!(target: "web", "服务已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(target: "web", "failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
    info!(target: "web", "收到退出信号，正在关闭");
}
