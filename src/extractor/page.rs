//! 分享页 HTML 的轻量抓取：定界符截取、登录页识别、文件名提取。

use regex::Regex;
use std::sync::OnceLock;

static RE_TITLE: OnceLock<Regex> = OnceLock::new();
static RE_META_DESC: OnceLock<Regex> = OnceLock::new();

fn re_title() -> &'static Regex {
    RE_TITLE.get_or_init(|| Regex::new(r"(?s)<title>(.*?)</title>").expect("compile RE_TITLE"))
}

fn re_meta_desc() -> &'static Regex {
    RE_META_DESC.get_or_init(|| {
        Regex::new(r#"<meta name="description" content="(.*?)">"#).expect("compile RE_META_DESC")
    })
}

/// Text strictly between the first `first` and the next `last` after it.
pub fn find_between<'a>(text: &'a str, first: &str, last: &str) -> Option<&'a str> {
    let start = text.find(first)? + first.len();
    let end = text[start..].find(last)? + start;
    Some(&text[start..end])
}

/// 页面同时出现 login 与 password（不区分大小写）即视为登录页。
pub fn looks_like_login(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("login") && lower.contains("password")
}

/// Values scraped from a share page; only the token and trace id are mandatory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMarkers {
    pub js_token: String,
    pub trace_id: String,
    pub thumbnail: Option<String>,
    pub file_name: Option<String>,
}

impl PageMarkers {
    pub fn scrape(body: &str) -> Self {
        let non_empty = |s: Option<&str>| s.map(str::trim).filter(|s| !s.is_empty()).map(String::from);
        Self {
            js_token: non_empty(find_between(body, "fn%28%22", "%22%29")).unwrap_or_default(),
            trace_id: non_empty(find_between(body, "dp-logid=", "&")).unwrap_or_default(),
            thumbnail: non_empty(find_between(body, "og:image\" content=\"", "\"")),
            file_name: file_name_from_page(body),
        }
    }
}

/// `<title>` 中 ` - ` 之前的部分，失败时退回 `<meta name="description">`。
pub fn file_name_from_page(body: &str) -> Option<String> {
    let head = |s: &str| {
        s.split(" - ")
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    re_title()
        .captures(body)
        .and_then(|c| c.get(1))
        .and_then(|m| head(m.as_str()))
        .or_else(|| {
            re_meta_desc()
                .captures(body)
                .and_then(|c| c.get(1))
                .and_then(|m| head(m.as_str()))
        })
}

pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GB", b / GB)
    } else if b >= MB {
        format!("{:.2} MB", b / MB)
    } else if b >= KB {
        format!("{:.2} KB", b / KB)
    } else {
        format!("{bytes} b")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><title>holiday_clip.mp4 - Share Files Online</title>
<meta property="og:image" content="https://thumb.example/t.jpg">
</head><body><script>var x = "fn%28%22TOKEN123%22%29"; var u = "/api?dp-logid=778899&x=1";</script></body></html>"#;

    #[test]
    fn scrapes_markers_from_share_page() {
        let m = PageMarkers::scrape(PAGE);
        assert_eq!(m.js_token, "TOKEN123");
        assert_eq!(m.trace_id, "778899");
        assert_eq!(m.thumbnail.as_deref(), Some("https://thumb.example/t.jpg"));
        assert_eq!(m.file_name.as_deref(), Some("holiday_clip.mp4"));
    }

    #[test]
    fn missing_markers_are_empty() {
        let m = PageMarkers::scrape("<html>nothing here</html>");
        assert!(m.js_token.is_empty());
        assert!(m.trace_id.is_empty());
        assert!(m.thumbnail.is_none());
    }

    #[test]
    fn meta_description_fallback() {
        let body = r#"<meta name="description" content="movie.mkv - Please input the code">"#;
        assert_eq!(file_name_from_page(body).as_deref(), Some("movie.mkv"));
    }

    #[test]
    fn login_detection_needs_both_markers() {
        assert!(looks_like_login("<form>LOGIN ... Password</form>"));
        assert!(!looks_like_login("login only"));
    }

    #[test]
    fn find_between_requires_closing_marker() {
        assert_eq!(find_between("a[b]c", "[", "]"), Some("b"));
        assert_eq!(find_between("a[b", "[", "]"), None);
    }

    #[test]
    fn sizes() {
        assert_eq!(format_size(512), "512 b");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(5 * 1024 * 1024 * 1024), "5.00 GB");
    }
}
