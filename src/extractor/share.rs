//! 分享链接解析：分享页 → 列表 → 转存 → HEAD 直链，失败时按顺序切换镜像域名。

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::error::ExtractError;
use super::http::{HttpRequest, HttpResponse, HttpTransport};
use super::page::{PageMarkers, looks_like_login};
use super::send;
use super::transfer_cache::TransferCache;
use crate::base_system::context::Config;
use crate::base_system::json_extract::{JsonMap, pick_flag, pick_i64, pick_string, pick_u64};
use crate::base_system::retry::RetryPolicy;
use crate::base_system::short_code::{normalize_input, parse_short_code};
use crate::credential::pool::CookiePool;
use crate::credential::session::SessionCookies;
use crate::credential::tier::{CookieTier, Credential};

const APP_ID: &str = "250528";
const PAGE_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

#[derive(Debug, Clone)]
pub struct ShareSettings {
    pub api_base: String,
    /// Candidate share pages; `{code}` is replaced with the short code.
    pub mirror_templates: Vec<String>,
    pub transfer_target_path: String,
    pub transfer_cache_ttl: Duration,
    pub user_agent: String,
    pub retry: RetryPolicy,
}

impl ShareSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            mirror_templates: cfg.mirror_templates.clone(),
            transfer_target_path: cfg.transfer_target_path.clone(),
            transfer_cache_ttl: Duration::from_secs(cfg.transfer_cache_ttl),
            user_agent: cfg.user_agent.clone(),
            retry: cfg.retry_policy(),
        }
    }
}

/// 一次解析过程中收集的信息，仅在单个请求内有效。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShareContext {
    pub js_token: String,
    pub trace_id: String,
    pub short_code: String,
    pub uk: String,
    pub share_id: String,
    pub fs_id: String,
    pub file_name: String,
    pub size: u64,
    pub thumbnail: Option<String>,
    pub dlink: String,
    /// Signed direct-download URL taken from the HEAD redirect.
    pub direct_locator: String,
}

/// 列表接口中唯一文件条目的字段。
struct ListedEntry {
    uk: String,
    share_id: String,
    fs_id: String,
    dlink: String,
    file_name: Option<String>,
    size: u64,
    thumbnail: Option<String>,
}

pub struct ShareResolver {
    pool: Arc<CookiePool>,
    session: Arc<SessionCookies>,
    transport: Arc<dyn HttpTransport>,
    transfers: TransferCache,
    settings: ShareSettings,
}

impl ShareResolver {
    pub fn new(
        pool: Arc<CookiePool>,
        session: Arc<SessionCookies>,
        transport: Arc<dyn HttpTransport>,
        settings: ShareSettings,
    ) -> Self {
        Self {
            pool,
            session,
            transport,
            transfers: TransferCache::new(settings.transfer_cache_ttl),
            settings,
        }
    }

    /// Ordered share pages to try: mirrors for the derived short code, then the input itself.
    pub fn candidates(&self, input: &str) -> Vec<String> {
        let normalized = normalize_input(input);
        let Some(code) = parse_short_code(&normalized) else {
            return vec![normalized];
        };

        let mut out: Vec<String> = self
            .settings
            .mirror_templates
            .iter()
            .map(|t| t.replace("{code}", &code))
            .collect();
        if !out.contains(&normalized) {
            out.push(normalized);
        }
        out
    }

    pub async fn resolve(
        &self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<ShareContext, ExtractError> {
        let candidates = self.candidates(input);
        let total = candidates.len();
        let mut last_err = None;

        for (i, url) in candidates.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ExtractError::Cancelled);
            }
            info!(target: "share", "尝试分享页 [{}/{}]: {}", i + 1, total, url);
            match self.attempt(&url, cancel).await {
                Ok(ctx) => {
                    info!(target: "share", "分享解析成功: {} ({})", ctx.file_name, ctx.short_code);
                    return Ok(ctx);
                }
                Err(e) if e.stops_mirror_loop() => {
                    warn!(target: "share", "分享解析失败，不再尝试其他镜像: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    warn!(target: "share", "分享页 {} 解析失败: {}", url, e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ExtractError::DataNotFound("no share page to try".into())))
    }

    async fn attempt(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<ShareContext, ExtractError> {
        let credential = self.credential().await?;
        debug!(target: "share", "使用 {} Cookie: {}", credential.tier, credential.masked());

        // 1. share page
        let page = self
            .send(
                HttpRequest::get(url)
                    .header("Accept", PAGE_ACCEPT)
                    .header("Cookie", credential.value.as_str()),
                cancel,
            )
            .await?;
        if looks_like_login(&page.body) {
            warn!(target: "share", "分享页返回登录页，Cookie 已失效，强制刷新通用 Cookie");
            self.pool.force_refresh(CookieTier::General).await;
            return Err(ExtractError::AuthenticationRejected);
        }
        if !page.is_success() {
            return Err(ExtractError::UpstreamUnavailable(format!(
                "share page returned {}",
                page.status
            )));
        }

        // 2. page markers
        let markers = PageMarkers::scrape(&page.body);
        if markers.js_token.is_empty() {
            return Err(ExtractError::MalformedResponse("anti-forgery token not found".into()));
        }
        if markers.trace_id.is_empty() {
            return Err(ExtractError::MalformedResponse("request trace id not found".into()));
        }

        // 3. short code, preferring the post-redirect URL
        let short_code = Some(page.url.as_str())
            .filter(|u| !u.is_empty())
            .and_then(parse_short_code)
            .or_else(|| parse_short_code(url))
            .ok_or_else(|| ExtractError::MalformedResponse("short code not found".into()))?;

        // 4. listing
        let entry = self
            .list(&markers, &short_code, &credential, cancel)
            .await?;

        // 5. transfer into the account behind the cookie actually sent
        let account_cookie = self
            .session
            .header()
            .unwrap_or_else(|| credential.value.clone());
        if self.transfers.contains(&short_code, &account_cookie) {
            debug!(target: "share", "{} 已在缓存有效期内转存到当前账号，跳过转存", short_code);
        } else {
            self.transfer(&markers, &entry, &account_cookie, cancel).await?;
            self.transfers.record(&short_code, &account_cookie);
        }

        // 6. direct locator
        let direct_locator = self.direct_locator(&entry.dlink, &credential, cancel).await?;

        Ok(ShareContext {
            js_token: markers.js_token,
            trace_id: markers.trace_id,
            short_code,
            uk: entry.uk,
            share_id: entry.share_id,
            fs_id: entry.fs_id,
            file_name: entry
                .file_name
                .or(markers.file_name)
                .unwrap_or_else(|| "Unknown_File".to_string()),
            size: entry.size,
            thumbnail: entry.thumbnail.or(markers.thumbnail),
            dlink: entry.dlink,
            direct_locator,
        })
    }

    /// General tier first, premium when the general tier has nothing.
    async fn credential(&self) -> Result<Credential, ExtractError> {
        if let Some(c) = self.pool.next(CookieTier::General).await {
            return Ok(c);
        }
        warn!(target: "share", "通用 Cookie 不可用，改用高级 Cookie");
        self.pool
            .next(CookieTier::Premium)
            .await
            .ok_or(ExtractError::CredentialExhausted(CookieTier::General))
    }

    async fn send(
        &self,
        req: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, ExtractError> {
        let req = req.header("User-Agent", self.settings.user_agent.as_str());
        send(self.transport.as_ref(), req, self.settings.retry, cancel).await
    }

    fn api_url(&self, path: &str, params: &[(&str, &str)]) -> Result<String, ExtractError> {
        Url::parse_with_params(&format!("{}{}", self.settings.api_base, path), params)
            .map(String::from)
            .map_err(|e| ExtractError::Internal(format!("bad api url: {e}")))
    }

    async fn list(
        &self,
        markers: &PageMarkers,
        short_code: &str,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<ListedEntry, ExtractError> {
        let url = self.api_url(
            "/share/list",
            &[
                ("app_id", APP_ID),
                ("web", "1"),
                ("channel", "0"),
                ("jsToken", markers.js_token.as_str()),
                ("dp-logid", markers.trace_id.as_str()),
                ("page", "1"),
                ("num", "1000"),
                ("by", "name"),
                ("order", "asc"),
                ("site_referer", ""),
                ("shorturl", short_code),
                ("root", "1"),
            ],
        )?;
        let resp = self
            .send(
                HttpRequest::get(url).header("Cookie", credential.value.as_str()),
                cancel,
            )
            .await?;
        let json = parse_object(&resp, "share list")?;

        let errno = pick_i64(&json, &["errno"]).unwrap_or(-1);
        if !resp.is_success() || errno != 0 {
            return Err(ExtractError::UpstreamUnavailable(format!(
                "share list failed: status {}, errno {}",
                resp.status, errno
            )));
        }

        let entries = json.get("list").and_then(Value::as_array).cloned().unwrap_or_default();
        let item = match entries.as_slice() {
            [] => return Err(ExtractError::DataNotFound("share has no entries".into())),
            [one] => one.as_object().cloned().unwrap_or_default(),
            many => {
                return Err(ExtractError::DataNotFound(format!(
                    "share holds {} entries, expected a single file",
                    many.len()
                )));
            }
        };
        if pick_flag(&item, "isdir") {
            return Err(ExtractError::DataNotFound("share entry is a folder".into()));
        }

        let fs_id = pick_string(&item, &["fs_id"])
            .ok_or_else(|| ExtractError::MalformedResponse("fs_id missing".into()))?;
        let dlink = pick_string(&item, &["dlink"])
            .ok_or_else(|| ExtractError::MalformedResponse("dlink missing".into()))?;
        let thumbnail = item
            .get("thumbs")
            .and_then(Value::as_object)
            .and_then(|t| pick_string(t, &["url3"]));

        Ok(ListedEntry {
            uk: pick_string(&json, &["uk"]).unwrap_or_default(),
            share_id: pick_string(&json, &["share_id", "shareid"]).unwrap_or_default(),
            fs_id,
            dlink,
            file_name: pick_string(&item, &["server_filename"]),
            size: pick_u64(&item, &["size"]).unwrap_or(0),
            thumbnail,
        })
    }

    async fn transfer(
        &self,
        markers: &PageMarkers,
        entry: &ListedEntry,
        account_cookie: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ExtractError> {
        let url = self.api_url(
            "/share/transfer",
            &[
                ("app_id", APP_ID),
                ("web", "1"),
                ("channel", "dubox"),
                ("clienttype", "0"),
                ("jsToken", markers.js_token.as_str()),
                ("dp-logid", markers.trace_id.as_str()),
                ("ondup", "newcopy"),
                ("async", "1"),
                ("scene", "purchased_list"),
                ("shareid", entry.share_id.as_str()),
                ("from", entry.uk.as_str()),
            ],
        )?;
        let form = vec![
            ("fsidlist".to_string(), format!("[{}]", entry.fs_id)),
            ("path".to_string(), self.settings.transfer_target_path.clone()),
        ];
        let resp = self
            .send(
                HttpRequest::post_form(url, form).header("Cookie", account_cookie),
                cancel,
            )
            .await?;
        let json = parse_object(&resp, "transfer")?;
        let errno = pick_i64(&json, &["errno"]).unwrap_or(-1);
        if !resp.is_success() || errno != 0 {
            return Err(ExtractError::UpstreamUnavailable(format!(
                "transfer failed: status {}, errno {}",
                resp.status, errno
            )));
        }
        info!(target: "share", "已转存到 {}", self.settings.transfer_target_path);
        Ok(())
    }

    async fn direct_locator(
        &self,
        dlink: &str,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<String, ExtractError> {
        let resp = self
            .send(
                HttpRequest::head(dlink)
                    .no_redirect()
                    .header("Cookie", credential.value.as_str()),
                cancel,
            )
            .await?;
        resp.header("location")
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .ok_or_else(|| {
                ExtractError::MalformedResponse(format!(
                    "download link returned {} without Location",
                    resp.status
                ))
            })
    }
}

fn parse_object(resp: &HttpResponse, what: &str) -> Result<JsonMap, ExtractError> {
    match serde_json::from_str::<Value>(&resp.body) {
        Ok(Value::Object(map)) => Ok(map),
        _ if !resp.is_success() => Err(ExtractError::UpstreamUnavailable(format!(
            "{what} returned {}",
            resp.status
        ))),
        _ => Err(ExtractError::MalformedResponse(format!("{what}: body is not a JSON object"))),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::extractor::http::TransportError;
    use crate::extractor::http::testing::{ok, redirect};

    pub(crate) const PAGE: &str = r#"<html><head><title>holiday_clip.mp4 - Share Files Online</title>
<meta property="og:image" content="https://thumb.example/t.jpg"></head>
<script>var t = "fn%28%22JSTOKEN42%22%29"; var l = "/x?dp-logid=55501&a=b";</script></html>"#;

    pub(crate) const DIRECT: &str =
        "https://d.example/file/abc?fid=4400012345-250528-998877&sign=FDTAER-a1b2c3d4-x&time=1700000000";

    pub(crate) fn single_entry_list() -> String {
        serde_json::json!({
            "errno": 0,
            "uk": 4400012345u64,
            "share_id": 31337,
            "list": [{
                "fs_id": 998877,
                "isdir": "0",
                "server_filename": "holiday_clip.mp4",
                "size": "10485760",
                "dlink": "https://d.example/dlink/998877",
                "thumbs": {"url3": "https://thumb.example/big.jpg"}
            }]
        })
        .to_string()
    }

    /// Happy-path upstream for every resolver step.
    pub(crate) fn resolver_step(req: &HttpRequest) -> Result<HttpResponse, TransportError> {
        if req.url.contains("/share/list") {
            ok(&single_entry_list())
        } else if req.url.contains("/share/transfer") {
            ok(r#"{"errno":0}"#)
        } else if req.url.contains("/dlink/") {
            redirect(DIRECT)
        } else {
            ok(PAGE)
        }
    }

    pub(crate) fn settings(mirrors: &[&str]) -> ShareSettings {
        ShareSettings {
            api_base: "https://api.example".to_string(),
            mirror_templates: mirrors.iter().map(|m| m.to_string()).collect(),
            transfer_target_path: "/".to_string(),
            transfer_cache_ttl: Duration::from_secs(3600),
            user_agent: "test-agent".to_string(),
            retry: RetryPolicy {
                attempts: 2,
                base_delay: Duration::from_millis(1),
            },
        }
    }
}
