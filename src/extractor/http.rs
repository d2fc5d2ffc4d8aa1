//! 网络传输层：所有远程调用都经过 `HttpTransport`，测试时替换为脚本化实现。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, redirect};
use thiserror::Error;
use tracing::warn;

use crate::base_system::retry::{RetryPolicy, retry_async};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("request failed: {0}")]
    Other(String),
}

impl TransportError {
    /// 仅连接建立失败才值得本地重试。
    pub fn is_connection_level(&self) -> bool {
        matches!(self, TransportError::Connect(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else if e.is_timeout() {
            TransportError::Timeout(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub form: Option<Vec<(String, String)>>,
    pub follow_redirects: bool,
}

impl HttpRequest {
    fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            form: None,
            follow_redirects: true,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(Method::HEAD, url)
    }

    pub fn post_form(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        let mut req = Self::new(Method::POST, url);
        req.form = Some(form);
        req
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn no_redirect(mut self) -> Self {
        self.follow_redirects = false;
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    /// URL after redirects.
    pub url: String,
    /// Lower-cased header names.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, req: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// `send` with the connection-level retry policy applied.
pub async fn send_with_retry(
    transport: &dyn HttpTransport,
    req: HttpRequest,
    policy: RetryPolicy,
) -> Result<HttpResponse, TransportError> {
    retry_async(policy, TransportError::is_connection_level, |_| {
        transport.send(req.clone())
    })
    .await
}

pub struct ReqwestTransport {
    follow: Client,
    no_follow: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9"),
        );
        headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );

        let follow = Client::builder()
            .default_headers(headers.clone())
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        let no_follow = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Self { follow, no_follow })
    }
}

/// 任一请求头非法即整体失败，不会静默丢弃。
fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::new();
    for (k, v) in headers {
        let name = HeaderName::from_bytes(k.as_bytes());
        let value = HeaderValue::from_str(v);
        match (name, value) {
            (Ok(name), Ok(value)) => {
                map.append(name, value);
            }
            _ => {
                warn!(target: "http", "请求头 {} 含非法字符，放弃本次请求", k);
                return Err(TransportError::Other(format!("invalid header {k}")));
            }
        }
    }
    Ok(map)
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, req: HttpRequest) -> Result<HttpResponse, TransportError> {
        let client = if req.follow_redirects {
            &self.follow
        } else {
            &self.no_follow
        };

        let headers = header_map(&req.headers)?;
        let mut builder = client.request(req.method.clone(), &req.url).headers(headers);
        if let Some(form) = &req.form {
            builder = builder.form(form);
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let url = resp.url().to_string();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = if req.method == Method::HEAD {
            String::new()
        } else {
            resp.text().await?
        };

        Ok(HttpResponse {
            status,
            url,
            headers,
            body,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    type Handler = dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync;

    /// Answers every request with a closure and records what was sent.
    pub(crate) struct ScriptedTransport {
        handler: Box<Handler>,
        calls: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new<F>(handler: F) -> Self
        where
            F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
        {
            Self {
                handler: Box::new(handler),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn calls(&self) -> Vec<HttpRequest> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn count_matching(&self, needle: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.url.contains(needle))
                .count()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, req: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.calls.lock().unwrap().push(req.clone());
            (self.handler)(&req)
        }
    }

    pub(crate) fn ok(body: &str) -> Result<HttpResponse, TransportError> {
        status(200, body)
    }

    pub(crate) fn status(code: u16, body: &str) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse {
            status: code,
            url: String::new(),
            headers: HashMap::new(),
            body: body.to_string(),
        })
    }

    pub(crate) fn redirect(location: &str) -> Result<HttpResponse, TransportError> {
        let mut headers = HashMap::new();
        headers.insert("location".to_string(), location.to_string());
        Ok(HttpResponse {
            status: 302,
            url: String::new(),
            headers,
            body: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn connection_errors_are_retried() {
        let n = AtomicU32::new(0);
        let t = ScriptedTransport::new(move |_| {
            if n.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TransportError::Connect("refused".into()))
            } else {
                ok("fine")
            }
        });
        let resp = send_with_retry(&t, HttpRequest::get("http://x/"), fast())
            .await
            .unwrap();
        assert_eq!(resp.body, "fine");
        assert_eq!(t.calls().len(), 3);
    }

    #[tokio::test]
    async fn http_errors_and_timeouts_are_not_retried() {
        let t = ScriptedTransport::new(|_| status(503, "busy"));
        let resp = send_with_retry(&t, HttpRequest::get("http://x/"), fast())
            .await
            .unwrap();
        assert_eq!(resp.status, 503);
        assert_eq!(t.calls().len(), 1);

        let t = ScriptedTransport::new(|_| Err(TransportError::Timeout("slow".into())));
        assert!(
            send_with_retry(&t, HttpRequest::get("http://x/"), fast())
                .await
                .is_err()
        );
        assert_eq!(t.calls().len(), 1);
    }

    #[test]
    fn response_headers_are_case_insensitive() {
        let resp = redirect("https://d.example/file").unwrap();
        assert_eq!(resp.header("Location"), Some("https://d.example/file"));
        let req = HttpRequest::get("http://x/").header("Cookie", "ndus=1");
        assert_eq!(req.header_value("cookie"), Some("ndus=1"));
    }

    #[test]
    fn invalid_header_fails_the_request() {
        let good = vec![
            ("Cookie".to_string(), "ndus=1".to_string()),
            ("Referer".to_string(), "https://x/".to_string()),
        ];
        let map = header_map(&good).unwrap();
        assert_eq!(map.get("cookie").unwrap(), "ndus=1");
        assert_eq!(map.len(), 2);

        let bad = vec![("Cookie".to_string(), "ndus=1\nX-Injected: 1".to_string())];
        assert_eq!(
            header_map(&bad).unwrap_err(),
            TransportError::Other("invalid header Cookie".into())
        );

        let bad_name = vec![("Bad Name".to_string(), "v".to_string())];
        assert!(header_map(&bad_name).is_err());
    }
}
