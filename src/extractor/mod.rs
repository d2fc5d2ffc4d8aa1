//! 分享链接 → m3u8 的解析流程：分享页握手、转存、直链解析、清单拉取。

pub mod error;
pub mod http;
pub mod manifest;
pub mod page;
pub mod pipeline;
pub mod share;
pub mod transfer_cache;

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::base_system::retry::RetryPolicy;
use error::ExtractError;
use http::{HttpRequest, HttpResponse, HttpTransport, send_with_retry};

/// Races `fut` against `cancel`; a cancelled token wins even if both are ready.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, ExtractError>
where
    F: Future<Output = Result<T, ExtractError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ExtractError::Cancelled),
        res = fut => res,
    }
}

/// One network call of the pipeline: connection-level retries, aborted by `cancel`.
pub(crate) async fn send(
    transport: &dyn HttpTransport,
    req: HttpRequest,
    retry: RetryPolicy,
    cancel: &CancellationToken,
) -> Result<HttpResponse, ExtractError> {
    cancellable(cancel, async {
        send_with_retry(transport, req, retry)
            .await
            .map_err(ExtractError::from)
    })
    .await
}
