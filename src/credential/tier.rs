use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CookieTier {
    General,
    Premium,
    DedicatedMedia,
}

impl CookieTier {
    pub const ALL: [CookieTier; 3] = [
        CookieTier::General,
        CookieTier::Premium,
        CookieTier::DedicatedMedia,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CookieTier::General => "general",
            CookieTier::Premium => "premium",
            CookieTier::DedicatedMedia => "media",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            CookieTier::General => 0,
            CookieTier::Premium => 1,
            CookieTier::DedicatedMedia => 2,
        }
    }
}

impl fmt::Display for CookieTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CookieTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "general" => Ok(CookieTier::General),
            "premium" => Ok(CookieTier::Premium),
            "media" | "dedicated_media" => Ok(CookieTier::DedicatedMedia),
            other => Err(format!("unknown cookie tier: {other}")),
        }
    }
}

/// 一条 Cookie 及其所属层级。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub value: String,
    pub tier: CookieTier,
}

impl Credential {
    /// 日志里只显示前 30 个字符。
    pub fn masked(&self) -> String {
        mask(&self.value)
    }
}

pub fn mask(value: &str) -> String {
    match value.char_indices().nth(30) {
        Some((idx, _)) => format!("{}...", &value[..idx]),
        None => value.to_string(),
    }
}

/// Keeps lines that carry `marker`, trimmed, first occurrence wins.
pub fn dedup_credentials<I, S>(lines: I, marker: &str) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for line in lines {
        let line = line.as_ref().trim();
        if line.is_empty() || !line.contains(marker) {
            continue;
        }
        if seen.insert(line.to_string()) {
            out.push(line.to_string());
        }
    }
    out
}

/// (sequence, cursor, last refresh) of one tier; always mutated under the tier's mutex.
#[derive(Debug, Default)]
pub(crate) struct TierState {
    pub(crate) credentials: Vec<String>,
    pub(crate) cursor: usize,
    pub(crate) last_refresh: Option<Instant>,
}

impl TierState {
    /// Hands out the credential at the cursor and advances it; returns the pre-advance index.
    pub(crate) fn advance(&mut self) -> Option<(String, usize)> {
        if self.credentials.is_empty() {
            self.cursor = 0;
            return None;
        }
        if self.cursor >= self.credentials.len() {
            self.cursor = 0;
        }
        let index = self.cursor;
        let value = self.credentials[index].clone();
        self.cursor = (index + 1) % self.credentials.len();
        Some((value, index))
    }

    pub(crate) fn replace(&mut self, credentials: Vec<String>, now: Instant) {
        self.credentials = credentials;
        self.cursor = 0;
        self.last_refresh = Some(now);
    }

    pub(crate) fn is_due(&self, interval: Duration, now: Instant) -> bool {
        match self.last_refresh {
            None => true,
            Some(at) => now.saturating_duration_since(at) > interval,
        }
    }

    /// Removes every credential in `bad`; returns how many were removed.
    pub(crate) fn evict(&mut self, bad: &HashSet<String>) -> usize {
        let before = self.credentials.len();
        self.credentials.retain(|c| !bad.contains(c));
        if self.cursor >= self.credentials.len() {
            self.cursor = 0;
        }
        before - self.credentials.len()
    }
}
