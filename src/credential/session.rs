//! 转存步骤使用的会话 Cookie（不参与轮询），可通过 `/update_cookie` 热更新。

use std::collections::BTreeMap;
use std::sync::RwLock;

use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CookieFileError {
    #[error("no cookies found in cookie data")]
    Empty,
}

/// Parses a browser-exported Netscape cookie file into name → value pairs.
///
/// Each data line has at least seven whitespace separated fields:
/// domain, flag, path, secure, expiry, name, value. Comment lines are skipped,
/// except `#HttpOnly_` entries which are regular cookies with a prefix.
pub fn parse_netscape(text: &str) -> Result<BTreeMap<String, String>, CookieFileError> {
    let mut cookies = BTreeMap::new();

    for line in text.lines() {
        let mut line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("#HttpOnly_") {
            line = rest;
        } else if line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 7 {
            debug!(target: "web", "跳过无法解析的 Cookie 行");
            continue;
        }
        let (domain, name, value) = (parts[0], parts[5], parts[6]);
        debug!(target: "web", "解析 Cookie {} ({})", name, domain);
        cookies.insert(name.to_string(), value.to_string());
    }

    if cookies.is_empty() {
        return Err(CookieFileError::Empty);
    }
    Ok(cookies)
}

#[derive(Debug, Default)]
pub struct SessionCookies {
    jar: RwLock<BTreeMap<String, String>>,
}

impl SessionCookies {
    /// `a=b; c=d` 形式；无法解析的片段忽略。
    pub fn from_header(header: &str) -> Self {
        let jar = header
            .split(';')
            .filter_map(|pair| {
                let (k, v) = pair.split_once('=')?;
                let k = k.trim();
                (!k.is_empty()).then(|| (k.to_string(), v.trim().to_string()))
            })
            .collect();
        Self {
            jar: RwLock::new(jar),
        }
    }

    pub fn merge(&self, cookies: BTreeMap<String, String>) -> usize {
        let n = cookies.len();
        let mut jar = self.jar.write().unwrap_or_else(|p| p.into_inner());
        jar.extend(cookies);
        info!(target: "web", "会话 Cookie 已更新 {} 条，当前共 {} 条", n, jar.len());
        n
    }

    /// Renders the jar as a `Cookie` header value; None when empty.
    pub fn header(&self) -> Option<String> {
        let jar = self.jar.read().unwrap_or_else(|p| p.into_inner());
        if jar.is_empty() {
            return None;
        }
        Some(
            jar.iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn len(&self) -> usize {
        self.jar.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
