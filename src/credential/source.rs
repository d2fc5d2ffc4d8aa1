//! 远程 Cookie 文件拉取。失败时只记录日志并返回空列表，从不向调用方抛错。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::tier::{CookieTier, dedup_credentials};
use crate::base_system::context::Config;
use crate::base_system::retry::RetryPolicy;
use crate::extractor::http::{HttpRequest, HttpTransport, send_with_retry};

#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Newline-delimited credentials for `tier`, deduplicated; empty on any failure.
    async fn fetch(&self, tier: CookieTier) -> Vec<String>;
}

#[derive(Debug, Clone)]
pub struct RemoteSourceConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub paths: [String; 3],
    pub marker: String,
    pub retry: RetryPolicy,
}

impl RemoteSourceConfig {
    pub fn from_config(cfg: &Config) -> Self {
        let token = cfg.cookie_source_token.trim();
        Self {
            base_url: cfg.cookie_source_base.trim().trim_end_matches('/').to_string(),
            token: (!token.is_empty()).then(|| token.to_string()),
            paths: CookieTier::ALL.map(|t| cfg.cookie_path(t).trim_start_matches('/').to_string()),
            marker: cfg.session_marker.clone(),
            retry: cfg.retry_policy(),
        }
    }

    pub fn url_for(&self, tier: CookieTier) -> String {
        format!("{}/{}", self.base_url, self.paths[tier.index()])
    }
}

pub struct RemoteCredentialSource {
    transport: Arc<dyn HttpTransport>,
    config: RemoteSourceConfig,
}

impl RemoteCredentialSource {
    pub fn new(transport: Arc<dyn HttpTransport>, config: RemoteSourceConfig) -> Self {
        Self { transport, config }
    }
}

#[async_trait]
impl CredentialSource for RemoteCredentialSource {
    async fn fetch(&self, tier: CookieTier) -> Vec<String> {
        let url = self.config.url_for(tier);
        info!(target: "pool", "从远程拉取 {} Cookie: {}", tier, url);

        let mut req = HttpRequest::get(&url)
            .header("Accept", "application/vnd.github.v3.raw")
            .header("User-Agent", "TeraBox-Cookie-Fetcher");
        if let Some(token) = &self.config.token {
            req = req.header("Authorization", format!("token {token}"));
        }

        let resp = match send_with_retry(self.transport.as_ref(), req, self.config.retry).await {
            Ok(r) => r,
            Err(e) => {
                error!(target: "pool", "拉取 {} Cookie 失败: {}", tier, e);
                return Vec::new();
            }
        };

        if resp.status != 200 {
            error!(target: "pool", "拉取 {} Cookie 失败，状态码: {}", tier, resp.status);
            return Vec::new();
        }

        let cookies = dedup_credentials(resp.body.lines(), &self.config.marker);
        if cookies.is_empty() {
            warn!(target: "pool", "远程 {} Cookie 文件中没有有效 Cookie", tier);
        } else {
            info!(target: "pool", "成功拉取 {} 条 {} Cookie", cookies.len(), tier);
        }
        cookies
    }
}
