//! 全局配置结构（Config）与默认值。
//!
//! 该模块同时提供生成 `config.yml` 的字段元信息。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::{ConfigError, ConfigSpec, FieldMeta};
use super::retry::RetryPolicy;
use crate::credential::tier::CookieTier;
use crate::extractor::manifest::Quality;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 服务配置
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    // 网络配置
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_pipeline_timeout")]
    pub pipeline_timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    // Cookie 池配置
    #[serde(default = "default_cookie_source_base")]
    pub cookie_source_base: String,
    #[serde(default)]
    pub cookie_source_token: String,
    #[serde(default = "default_general_cookie_path")]
    pub general_cookie_path: String,
    #[serde(default = "default_premium_cookie_path")]
    pub premium_cookie_path: String,
    #[serde(default = "default_media_cookie_path")]
    pub media_cookie_path: String,
    #[serde(default = "default_cookie_refresh_interval")]
    pub cookie_refresh_interval: u64,
    #[serde(default = "default_cookie_validate_interval")]
    pub cookie_validate_interval: u64,
    #[serde(default)]
    pub cookie_probe_url: String,
    #[serde(default = "default_session_marker")]
    pub session_marker: String,
    #[serde(default)]
    pub seed_general_cookies: Vec<String>,
    #[serde(default)]
    pub seed_premium_cookies: Vec<String>,
    #[serde(default)]
    pub seed_media_cookies: Vec<String>,
    #[serde(default)]
    pub session_cookie: String,

    // 解析配置
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_stream_base")]
    pub stream_base: String,
    #[serde(default = "default_mirror_templates")]
    pub mirror_templates: Vec<String>,
    #[serde(default = "default_transfer_target_path")]
    pub transfer_target_path: String,
    #[serde(default = "default_transfer_cache_ttl")]
    pub transfer_cache_ttl: u64,
    #[serde(default = "default_quality")]
    pub default_quality: String,
    #[serde(default = "default_invalid_file_errnos")]
    pub invalid_file_errnos: Vec<i64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            cors_origins: default_cors_origins(),
            request_timeout: default_request_timeout(),
            pipeline_timeout: default_pipeline_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_secs: default_retry_backoff_secs(),
            user_agent: default_user_agent(),
            cookie_source_base: default_cookie_source_base(),
            cookie_source_token: String::new(),
            general_cookie_path: default_general_cookie_path(),
            premium_cookie_path: default_premium_cookie_path(),
            media_cookie_path: default_media_cookie_path(),
            cookie_refresh_interval: default_cookie_refresh_interval(),
            cookie_validate_interval: default_cookie_validate_interval(),
            cookie_probe_url: String::new(),
            session_marker: default_session_marker(),
            seed_general_cookies: Vec::new(),
            seed_premium_cookies: Vec::new(),
            seed_media_cookies: Vec::new(),
            session_cookie: String::new(),
            api_base: default_api_base(),
            stream_base: default_stream_base(),
            mirror_templates: default_mirror_templates(),
            transfer_target_path: default_transfer_target_path(),
            transfer_cache_ttl: default_transfer_cache_ttl(),
            default_quality: default_quality(),
            invalid_file_errnos: default_invalid_file_errnos(),
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 27] = [
            FieldMeta {
                name: "bind_addr",
                description: "服务监听地址，多个地址用逗号分隔（环境变量 TERABOX_STREAM_ADDR 优先）",
            },
            FieldMeta {
                name: "cors_origins",
                description: "允许跨域访问的来源列表",
            },
            FieldMeta {
                name: "request_timeout",
                description: "单次请求超时时间（秒）",
            },
            FieldMeta {
                name: "pipeline_timeout",
                description: "一次完整解析的超时时间（秒）",
            },
            FieldMeta {
                name: "max_retries",
                description: "连接失败时的最大尝试次数",
            },
            FieldMeta {
                name: "retry_backoff_secs",
                description: "首次退避等待（秒），之后指数翻倍",
            },
            FieldMeta {
                name: "user_agent",
                description: "请求使用的 User-Agent",
            },
            FieldMeta {
                name: "cookie_source_base",
                description: "远程 Cookie 文件所在的 raw 地址前缀",
            },
            FieldMeta {
                name: "cookie_source_token",
                description: "访问私有仓库的 Token（如无可留空）",
            },
            FieldMeta {
                name: "general_cookie_path",
                description: "通用 Cookie 文件路径",
            },
            FieldMeta {
                name: "premium_cookie_path",
                description: "高级 Cookie 文件路径",
            },
            FieldMeta {
                name: "media_cookie_path",
                description: "拉取 m3u8 专用的 Cookie 文件路径",
            },
            FieldMeta {
                name: "cookie_refresh_interval",
                description: "Cookie 自动刷新间隔（秒）",
            },
            FieldMeta {
                name: "cookie_validate_interval",
                description: "后台 Cookie 校验间隔（秒）",
            },
            FieldMeta {
                name: "cookie_probe_url",
                description: "用于校验 Cookie 的公开分享链接（留空则不校验）",
            },
            FieldMeta {
                name: "session_marker",
                description: "有效 Cookie 必须包含的会话标记",
            },
            FieldMeta {
                name: "seed_general_cookies",
                description: "通用 Cookie 的静态兜底列表",
            },
            FieldMeta {
                name: "seed_premium_cookies",
                description: "高级 Cookie 的静态兜底列表",
            },
            FieldMeta {
                name: "seed_media_cookies",
                description: "m3u8 专用 Cookie 的静态兜底列表",
            },
            FieldMeta {
                name: "session_cookie",
                description: "转存使用的会话 Cookie（name=value; name=value），可通过 /update_cookie 更新",
            },
            FieldMeta {
                name: "api_base",
                description: "分享列表/转存接口域名",
            },
            FieldMeta {
                name: "stream_base",
                description: "m3u8 接口域名",
            },
            FieldMeta {
                name: "mirror_templates",
                description: "镜像分享页模板，{code} 会被替换为短链码，按顺序尝试",
            },
            FieldMeta {
                name: "transfer_target_path",
                description: "转存目标目录",
            },
            FieldMeta {
                name: "transfer_cache_ttl",
                description: "转存记录缓存时间（秒），期间同一分享不重复转存",
            },
            FieldMeta {
                name: "default_quality",
                description: "默认清晰度, 可选: [360, 480, 720, 1080]",
            },
            FieldMeta {
                name: "invalid_file_errnos",
                description: "表示文件 ID 无效的 errno 列表（命中后不再轮换 Cookie）",
            },
        ];
        &FIELDS
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.session_marker.trim().is_empty() {
            return Err(ConfigError::Validation(
                "session_marker 不能为空".to_string(),
            ));
        }
        if self.default_quality.parse::<Quality>().is_err() {
            return Err(ConfigError::Validation(format!(
                "default_quality 无效: {}",
                self.default_quality
            )));
        }
        if self.request_timeout == 0 {
            return Err(ConfigError::Validation(
                "request_timeout 必须大于 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout.max(1))
    }

    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline_timeout.max(self.request_timeout).max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.max_retries.max(1),
            base_delay: Duration::from_secs(self.retry_backoff_secs),
        }
    }

    pub fn cookie_path(&self, tier: CookieTier) -> &str {
        match tier {
            CookieTier::General => &self.general_cookie_path,
            CookieTier::Premium => &self.premium_cookie_path,
            CookieTier::DedicatedMedia => &self.media_cookie_path,
        }
    }

    pub fn seed_cookies(&self, tier: CookieTier) -> &[String] {
        match tier {
            CookieTier::General => &self.seed_general_cookies,
            CookieTier::Premium => &self.seed_premium_cookies,
            CookieTier::DedicatedMedia => &self.seed_media_cookies,
        }
    }

    pub fn quality(&self) -> Quality {
        self.default_quality.parse().unwrap_or_default()
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_cors_origins() -> Vec<String> {
    [
        "http://localhost",
        "http://localhost:3000",
        "http://127.0.0.1",
        "http://127.0.0.1:3000",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_pipeline_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_secs() -> u64 {
    2
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36".to_string()
}

fn default_cookie_source_base() -> String {
    "https://raw.githubusercontent.com/Ronnie7866/Cookie/main".to_string()
}

fn default_general_cookie_path() -> String {
    "teradl_I_bot-cookie.txt".to_string()
}

fn default_premium_cookie_path() -> String {
    "teradl_premium-cookie.txt".to_string()
}

fn default_media_cookie_path() -> String {
    "teradl_stream-cookie.txt".to_string()
}

fn default_cookie_refresh_interval() -> u64 {
    900
}

fn default_cookie_validate_interval() -> u64 {
    1800
}

fn default_session_marker() -> String {
    "ndus=".to_string()
}

fn default_api_base() -> String {
    "https://www.terabox.app".to_string()
}

fn default_stream_base() -> String {
    "https://www.1024tera.com".to_string()
}

fn default_mirror_templates() -> Vec<String> {
    [
        "https://www.1024tera.com/sharing/link?surl={code}",
        "https://1024terabox.com/s/{code}",
        "https://terabox.com/s/{code}",
        "https://www.terabox.com/sharing/link?surl={code}",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_transfer_target_path() -> String {
    "/".to_string()
}

fn default_transfer_cache_ttl() -> u64 {
    6 * 60 * 60
}

fn default_quality() -> String {
    "720".to_string()
}

fn default_invalid_file_errnos() -> Vec<i64> {
    vec![31066, 31362]
}
