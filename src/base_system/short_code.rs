//! 分享链接短码（surl）解析与规范化。

use regex::Regex;
use std::sync::OnceLock;
use url::Url;

static RE_PATH: OnceLock<Regex> = OnceLock::new();
static RE_BARE: OnceLock<Regex> = OnceLock::new();

fn re_path() -> &'static Regex {
    RE_PATH.get_or_init(|| Regex::new(r"/s/([A-Za-z0-9_-]+)").expect("compile RE_PATH"))
}

fn re_bare() -> &'static Regex {
    RE_BARE.get_or_init(|| Regex::new(r"[A-Za-z0-9_-]+").expect("compile RE_BARE"))
}

/// 部分分享链接变体会在前面多带一个 `1`。
pub fn strip_filler(s: &str) -> &str {
    s.strip_prefix('1').unwrap_or(s)
}

/// Normalizes raw user input: trims whitespace and drops the leading filler character.
pub fn normalize_input(input: &str) -> String {
    strip_filler(input.trim()).to_string()
}

/// 依次尝试：`surl` 查询参数 → `/s/<code>` 路径段 → 纯短码（仅当输入不是 URL）。
pub fn parse_short_code(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(url) = Url::parse(trimmed)
        && let Some((_, v)) = url.query_pairs().find(|(k, _)| k == "surl")
    {
        let code = strip_filler(v.trim());
        if !code.is_empty() {
            return Some(code.to_string());
        }
    }

    if let Some(caps) = re_path().captures(trimmed) {
        let code = strip_filler(caps.get(1).map(|m| m.as_str()).unwrap_or(""));
        if !code.is_empty() {
            return Some(code.to_string());
        }
    }

    if trimmed.contains("://") {
        return None;
    }

    re_bare()
        .find(trimmed)
        .map(|m| strip_filler(m.as_str()))
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}
