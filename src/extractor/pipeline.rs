//! 对外的单一入口：分享链接 + 清晰度 → m3u8 文本。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::error::ExtractError;
use super::http::HttpTransport;
use super::manifest::{ManifestFetcher, ManifestRequest, ManifestSettings, Quality};
use super::share::{ShareContext, ShareResolver, ShareSettings};
use crate::base_system::context::Config;
use crate::credential::pool::CookiePool;
use crate::credential::session::SessionCookies;

pub struct ExtractionPipeline {
    resolver: ShareResolver,
    manifests: ManifestFetcher,
}

impl ExtractionPipeline {
    pub fn new(resolver: ShareResolver, manifests: ManifestFetcher) -> Self {
        Self {
            resolver,
            manifests,
        }
    }

    pub fn from_config(
        cfg: &Config,
        pool: Arc<CookiePool>,
        session: Arc<SessionCookies>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self::new(
            ShareResolver::new(
                pool.clone(),
                session,
                transport.clone(),
                ShareSettings::from_config(cfg),
            ),
            ManifestFetcher::new(pool, transport, ManifestSettings::from_config(cfg)),
        )
    }

    pub async fn extract(
        &self,
        share_url: &str,
        quality: Quality,
        cancel: &CancellationToken,
    ) -> Result<String, ExtractError> {
        info!(target: "pipeline", "开始解析: {} ({}p)", share_url, quality);
        let ctx = self.resolver.resolve(share_url, cancel).await?;

        let locator = ManifestRequest::from_share(&ctx, quality)?.url(self.manifests.stream_base())?;
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }
        self.manifests.fetch(&locator, cancel).await
    }

    /// Replays the media-credential rotation against an already-signed streaming locator.
    pub async fn refetch(
        &self,
        locator: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ExtractError> {
        let locator = locator.trim();
        if locator.is_empty() {
            return Err(ExtractError::DataNotFound("empty streaming locator".into()));
        }
        self.manifests.fetch(locator, cancel).await
    }

    pub async fn share_info(
        &self,
        share_url: &str,
        cancel: &CancellationToken,
    ) -> Result<ShareContext, ExtractError> {
        self.resolver.resolve(share_url, cancel).await
    }
}

/// 在独立任务中运行一次解析：panic 转为 `Internal`，超时转为 `Cancelled`。
///
/// `cancel` is triggered on timeout and also when this future is dropped,
/// so the detached task stops at its next step.
pub async fn run_isolated<T, F>(
    fut: F,
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<T, ExtractError>
where
    F: Future<Output = Result<T, ExtractError>> + Send + 'static,
    T: Send + 'static,
{
    let _guard = cancel.clone().drop_guard();
    let mut handle = tokio::spawn(fut);

    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(res)) => res,
        Ok(Err(join)) => {
            error!(target: "pipeline", "解析任务异常退出: {}", join);
            Err(ExtractError::Internal("extraction task failed".into()))
        }
        Err(_) => {
            warn!(target: "pipeline", "解析超时（{}s），已取消", timeout.as_secs());
            cancel.cancel();
            Err(ExtractError::Cancelled)
        }
    }
}
