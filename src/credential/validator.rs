//! 后台 Cookie 校验：定期用每条 Cookie 访问一个已知可访问的分享链接，
//! 只有确认返回登录页的 Cookie 才会被移除。

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::pool::CookiePool;
use super::tier::{CookieTier, mask};
use crate::extractor::http::{HttpRequest, HttpTransport};
use crate::extractor::page::looks_like_login;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Valid,
    /// Confirmed negative: the probe landed on a login page.
    Rejected,
    /// Network error or non-2xx; never grounds for eviction.
    Inconclusive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierReport {
    pub checked: usize,
    pub evicted: usize,
    pub inconclusive: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub tiers: Vec<(CookieTier, TierReport)>,
}

impl ValidationReport {
    pub fn evicted(&self) -> usize {
        self.tiers.iter().map(|(_, r)| r.evicted).sum()
    }
}

pub struct CookieValidator {
    pool: Arc<CookiePool>,
    transport: Arc<dyn HttpTransport>,
    probe_url: String,
    user_agent: String,
    running: AtomicBool,
}

/// Clears the reentrancy flag when a run finishes, even on early return.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl CookieValidator {
    pub fn new(
        pool: Arc<CookiePool>,
        transport: Arc<dyn HttpTransport>,
        probe_url: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            transport,
            probe_url: probe_url.into().trim().to_string(),
            user_agent: user_agent.into(),
            running: AtomicBool::new(false),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.probe_url.is_empty()
    }

    pub async fn probe(&self, cookie: &str) -> ProbeOutcome {
        let req = HttpRequest::get(&self.probe_url)
            .header("User-Agent", self.user_agent.as_str())
            .header("Cookie", cookie);

        match self.transport.send(req).await {
            Ok(resp) if looks_like_login(&resp.body) => ProbeOutcome::Rejected,
            Ok(resp) if resp.is_success() => ProbeOutcome::Valid,
            Ok(resp) => {
                debug!(target: "validator", "校验请求返回 {}，结果不确定", resp.status);
                ProbeOutcome::Inconclusive
            }
            Err(e) => {
                debug!(target: "validator", "校验请求失败（{}），结果不确定", e);
                ProbeOutcome::Inconclusive
            }
        }
    }

    /// 校验全部层级；若上一轮仍在进行则直接跳过并返回 None。
    pub async fn run_once(&self) -> Option<ValidationReport> {
        if !self.is_enabled() {
            return None;
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(target: "validator", "上一轮校验尚未结束，本轮跳过");
            return None;
        }
        let _guard = RunGuard(&self.running);

        let mut report = ValidationReport::default();
        for tier in CookieTier::ALL {
            report.tiers.push((tier, self.validate_tier(tier).await));
        }
        info!(
            target: "validator",
            "Cookie 校验完成，共移除 {} 条: {:?}",
            report.evicted(),
            report.tiers
        );
        Some(report)
    }

    async fn validate_tier(&self, tier: CookieTier) -> TierReport {
        let snapshot = self.pool.snapshot(tier);
        let mut report = TierReport {
            checked: snapshot.len(),
            ..TierReport::default()
        };
        let mut bad = HashSet::new();

        for cookie in snapshot {
            match self.probe(&cookie).await {
                ProbeOutcome::Valid => {}
                ProbeOutcome::Rejected => {
                    warn!(target: "validator", "{} Cookie 已失效: {}", tier, mask(&cookie));
                    bad.insert(cookie);
                }
                ProbeOutcome::Inconclusive => report.inconclusive += 1,
            }
        }

        report.evicted = self.pool.evict(tier, &bad);
        report
    }

    /// 以固定周期运行校验，直到 `cancel` 被触发。
    pub fn spawn(self: Arc<Self>, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            if !self.is_enabled() {
                info!(target: "validator", "未配置 cookie_probe_url，后台校验关闭");
                return;
            }
            let mut ticker = tokio::time::interval(period.max(Duration::from_secs(1)));
            // The first tick fires immediately; startup already refreshed every tier.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(target: "validator", "后台校验已停止");
                        break;
                    }
                    _ = ticker.tick() => {
                        let this = self.clone();
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = this.run_once() => {}
                        }
                    }
                }
            }
        })
    }
}
