//! 把本地 Netscape 格式的 Cookie 文件推送到运行中服务的 `/update_cookie`。

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Value, json};
use thiserror::Error;

use crate::credential::session::{CookieFileError, parse_netscape};

#[derive(Debug, Error)]
pub enum PushError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cookie file rejected locally: {0}")]
    Parse(#[from] CookieFileError),
    #[error("push failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Reads the file, checks it holds at least one cookie line, then posts it as `{"cookie_data": ...}`.
/// Returns the server's reply message.
pub fn push_cookie_file(path: &Path, url: &str) -> Result<String, PushError> {
    let data = load_cookie_file(path)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("terabox-stream/", env!("CARGO_PKG_VERSION"))),
    );

    let client = Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(15))
        .build()?;

    let resp: Value = client
        .post(url)
        .json(&json!({ "cookie_data": data }))
        .send()?
        .error_for_status()?
        .json()?;

    Ok(resp
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| resp.to_string()))
}

fn load_cookie_file(path: &Path) -> Result<String, PushError> {
    let data = std::fs::read_to_string(path).map_err(|source| PushError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed = parse_netscape(&data)?;
    tracing::info!(target: "cookie_push", "{} 中解析到 {} 个 Cookie", path.display(), parsed.len());
    Ok(data)
}
