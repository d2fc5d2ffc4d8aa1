//! m3u8 清单拉取：从直链推导参数，轮换专用 Cookie 请求清单。

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::error::ExtractError;
use super::http::{HttpRequest, HttpResponse, HttpTransport};
use super::send;
use super::share::ShareContext;
use crate::base_system::context::Config;
use crate::base_system::json_extract::{pick_i64, pick_string};
use crate::base_system::retry::RetryPolicy;
use crate::credential::pool::CookiePool;
use crate::credential::tier::CookieTier;

pub const MANIFEST_MAGIC: &str = "#EXTM3U";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Quality {
    P360,
    P480,
    #[default]
    P720,
    P1080,
}

impl Quality {
    pub fn as_str(self) -> &'static str {
        match self {
            Quality::P360 => "360",
            Quality::P480 => "480",
            Quality::P720 => "720",
            Quality::P1080 => "1080",
        }
    }

    pub fn stream_type(self) -> String {
        format!("M3U8_AUTO_{}", self.as_str())
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = s
            .strip_suffix('p')
            .or_else(|| s.strip_suffix('P'))
            .unwrap_or(s);
        match digits {
            "360" => Ok(Quality::P360),
            "480" => Ok(Quality::P480),
            "720" => Ok(Quality::P720),
            "1080" => Ok(Quality::P1080),
            other => Err(format!("unsupported quality: {other}")),
        }
    }
}

/// Parameters of one streaming-manifest request; immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRequest {
    pub uk: String,
    pub share_id: String,
    pub fid: String,
    pub sign: String,
    pub timestamp: String,
    pub js_token: String,
    pub quality: Quality,
}

impl ManifestRequest {
    pub fn from_share(ctx: &ShareContext, quality: Quality) -> Result<Self, ExtractError> {
        let (fid, sign, timestamp) = locator_params(&ctx.direct_locator)?;
        Ok(Self {
            uk: ctx.uk.clone(),
            share_id: ctx.share_id.clone(),
            fid,
            sign,
            timestamp,
            js_token: ctx.js_token.clone(),
            quality,
        })
    }

    pub fn url(&self, stream_base: &str) -> Result<String, ExtractError> {
        let stream_type = self.quality.stream_type();
        let base = format!("{}/share/streaming", stream_base.trim_end_matches('/'));
        Url::parse_with_params(
            &base,
            &[
                ("uk", self.uk.as_str()),
                ("shareid", self.share_id.as_str()),
                ("type", stream_type.as_str()),
                ("fid", self.fid.as_str()),
                ("sign", self.sign.as_str()),
                ("timestamp", self.timestamp.as_str()),
                ("jsToken", self.js_token.as_str()),
                ("esl", "1"),
                ("isplayer", "1"),
                ("ehps", "1"),
                ("clienttype", "0"),
                ("app_id", "250528"),
                ("web", "1"),
                ("channel", "dubox"),
            ],
        )
        .map(String::from)
        .map_err(|e| ExtractError::Internal(format!("bad stream url: {e}")))
    }
}

/// (fid, sign, time) from a direct locator, unwrapping a nested `url=` parameter when present.
/// `fid` is the third `-` field, `sign` the second.
fn locator_params(locator: &str) -> Result<(String, String, String), ExtractError> {
    let malformed = |what: &str| ExtractError::MalformedResponse(format!("direct locator: {what}"));

    let outer = Url::parse(locator).map_err(|_| malformed("not a URL"))?;
    let nested = outer
        .query_pairs()
        .find(|(k, _)| k == "url")
        .and_then(|(_, v)| Url::parse(&v).ok());
    let actual = nested.unwrap_or(outer);

    let param = |name: &str| {
        actual
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    };

    let fid = param("fid")
        .and_then(|v| v.split('-').nth(2).map(String::from))
        .filter(|v| !v.is_empty())
        .ok_or_else(|| malformed("fid missing"))?;
    let sign = param("sign")
        .and_then(|v| v.split('-').nth(1).map(String::from))
        .filter(|v| !v.is_empty())
        .ok_or_else(|| malformed("sign missing"))?;
    let time = param("time")
        .filter(|v| !v.is_empty())
        .ok_or_else(|| malformed("time missing"))?;

    Ok((fid, sign, time))
}

pub fn is_manifest(body: &str) -> bool {
    body.trim_start().starts_with(MANIFEST_MAGIC)
}

#[derive(Debug, Clone)]
pub struct ManifestSettings {
    pub stream_base: String,
    /// Sent as `Origin`, and with a trailing slash as `Referer`.
    pub site_origin: String,
    pub user_agent: String,
    pub invalid_file_errnos: Vec<i64>,
    pub retry: RetryPolicy,
}

impl ManifestSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            stream_base: cfg.stream_base.trim_end_matches('/').to_string(),
            site_origin: cfg.api_base.trim_end_matches('/').to_string(),
            user_agent: cfg.user_agent.clone(),
            invalid_file_errnos: cfg.invalid_file_errnos.clone(),
            retry: cfg.retry_policy(),
        }
    }

    /// JSON error body whose errno or errmsg says the file id itself is bad.
    pub fn invalid_file_signal(&self, body: &str) -> Option<String> {
        let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) else {
            return None;
        };
        let errno = pick_i64(&map, &["errno", "error_code"]);
        let errmsg = pick_string(&map, &["errmsg", "error_msg"]).unwrap_or_default();
        let lower = errmsg.to_ascii_lowercase();

        let by_errno = errno.is_some_and(|n| self.invalid_file_errnos.contains(&n));
        let by_msg = lower.contains("invalid fid") || lower.contains("fid is invalid");
        (by_errno || by_msg).then(|| format!("errno {}: {}", errno.unwrap_or_default(), errmsg))
    }
}

pub struct ManifestFetcher {
    pool: Arc<CookiePool>,
    transport: Arc<dyn HttpTransport>,
    settings: ManifestSettings,
}

impl ManifestFetcher {
    pub fn new(
        pool: Arc<CookiePool>,
        transport: Arc<dyn HttpTransport>,
        settings: ManifestSettings,
    ) -> Self {
        Self {
            pool,
            transport,
            settings,
        }
    }

    pub fn stream_base(&self) -> &str {
        &self.settings.stream_base
    }

    /// 依次用专用 Cookie 请求清单；尝试次数以进入循环时的池大小为上限。
    pub async fn fetch(
        &self,
        locator: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ExtractError> {
        let tier = CookieTier::DedicatedMedia;
        let bound = self.pool.prepare(tier).await;
        if bound == 0 {
            warn!(target: "manifest", "没有可用的 m3u8 专用 Cookie");
            return Err(ExtractError::CredentialExhausted(tier));
        }

        for attempt in 1..=bound {
            if cancel.is_cancelled() {
                return Err(ExtractError::Cancelled);
            }
            // The tier may have been emptied by eviction since the bound was captured.
            let Some((credential, index)) = self.pool.next_with_index(tier).await else {
                break;
            };
            debug!(
                target: "manifest",
                "第 {}/{} 次尝试，使用 Cookie #{}: {}",
                attempt,
                bound,
                index + 1,
                credential.masked()
            );

            let req = HttpRequest::get(locator)
                .header("User-Agent", self.settings.user_agent.as_str())
                .header("Accept", "*/*")
                .header("Referer", format!("{}/", self.settings.site_origin))
                .header("Origin", self.settings.site_origin.as_str())
                .header("Cookie", credential.value.as_str());

            let resp = match send(self.transport.as_ref(), req, self.settings.retry, cancel).await
            {
                Ok(r) => r,
                Err(ExtractError::Cancelled) => return Err(ExtractError::Cancelled),
                Err(e) => {
                    warn!(target: "manifest", "Cookie #{} 请求失败: {}", index + 1, e);
                    continue;
                }
            };

            if resp.status == 200 && is_manifest(&resp.body) {
                info!(target: "manifest", "Cookie #{} 成功获取 m3u8", index + 1);
                return Ok(resp.body);
            }
            if let Some(signal) = self.settings.invalid_file_signal(&resp.body) {
                warn!(target: "manifest", "文件 ID 无效，停止轮换 Cookie: {}", signal);
                return Err(ExtractError::InvalidTarget(signal));
            }
            warn!(
                target: "manifest",
                "Cookie #{} 未返回有效 m3u8（状态码 {}）: {}",
                index + 1,
                resp.status,
                snippet(&resp)
            );
        }

        warn!(target: "manifest", "所有 m3u8 专用 Cookie 均已尝试失败");
        Err(ExtractError::CredentialExhausted(tier))
    }
}

fn snippet(resp: &HttpResponse) -> String {
    resp.body.chars().take(200).collect()
}
