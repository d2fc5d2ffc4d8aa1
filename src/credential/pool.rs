//! 线程安全的分层 Cookie 池。
//!
//! 每个层级独立持有 (列表, 游标, 上次刷新时间)，由各自的互斥锁保护；
//! 远程拉取不持锁进行，同一层级同时最多只有一个拉取在途（refresh gate）。

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::source::CredentialSource;
use super::tier::{CookieTier, Credential, TierState, dedup_credentials};
use crate::base_system::context::Config;

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub refresh_interval: Duration,
    /// 静态兜底列表，按 `CookieTier::index` 排列。
    pub seeds: [Vec<String>; 3],
}

impl PoolSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            refresh_interval: Duration::from_secs(cfg.cookie_refresh_interval),
            seeds: CookieTier::ALL.map(|t| dedup_credentials(cfg.seed_cookies(t), &cfg.session_marker)),
        }
    }
}

struct TierSlot {
    state: Mutex<TierState>,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl TierSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(TierState::default()),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }
}

pub struct CookiePool {
    slots: [TierSlot; 3],
    source: Arc<dyn CredentialSource>,
    settings: PoolSettings,
}

impl CookiePool {
    pub fn new(source: Arc<dyn CredentialSource>, settings: PoolSettings) -> Self {
        Self {
            slots: [TierSlot::new(), TierSlot::new(), TierSlot::new()],
            source,
            settings,
        }
    }

    fn lock(&self, tier: CookieTier) -> MutexGuard<'_, TierState> {
        self.slots[tier.index()]
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 轮询取下一个 Cookie；到期（或层级为空）时先尝试刷新。
    pub async fn next(&self, tier: CookieTier) -> Option<Credential> {
        self.next_with_index(tier).await.map(|(c, _)| c)
    }

    /// Like `next`, also returning the index the credential held before the cursor advanced.
    pub async fn next_with_index(&self, tier: CookieTier) -> Option<(Credential, usize)> {
        self.refresh_if_due(tier).await;

        let picked = self.lock(tier).advance();
        match picked {
            Some((value, index)) => {
                let credential = Credential { value, tier };
                debug!(
                    target: "pool",
                    "使用 {} Cookie #{}/{}: {}",
                    tier,
                    index + 1,
                    self.len(tier),
                    credential.masked()
                );
                Some((credential, index))
            }
            None => {
                warn!(target: "pool", "{} 层级没有可用 Cookie", tier);
                None
            }
        }
    }

    /// Refreshes if due and returns the tier size afterwards; used to bound rotation loops.
    pub async fn prepare(&self, tier: CookieTier) -> usize {
        self.refresh_if_due(tier).await;
        self.len(tier)
    }

    async fn refresh_if_due(&self, tier: CookieTier) {
        if !self.needs_refresh(tier) {
            return;
        }

        let _gate = self.slots[tier.index()].refresh_gate.lock().await;
        // Another task may have refreshed while we waited on the gate.
        if !self.needs_refresh(tier) {
            return;
        }

        let fetched = self.source.fetch(tier).await;
        let now = Instant::now();

        let mut state = self.lock(tier);
        if !fetched.is_empty() {
            info!(target: "pool", "{} Cookie 已刷新，共 {} 条", tier, fetched.len());
            state.replace(fetched, now);
        } else {
            // Failed fetch: keep what we have, try again next interval.
            state.last_refresh = Some(now);
            if state.credentials.is_empty() {
                self.apply_seeds(tier, &mut state);
            }
        }
    }

    fn needs_refresh(&self, tier: CookieTier) -> bool {
        let state = self.lock(tier);
        state.credentials.is_empty() || state.is_due(self.settings.refresh_interval, Instant::now())
    }

    fn apply_seeds(&self, tier: CookieTier, state: &mut TierState) {
        let seeds = &self.settings.seeds[tier.index()];
        if seeds.is_empty() {
            return;
        }
        warn!(target: "pool", "{} 没有有效 Cookie，使用配置中的兜底 Cookie（{} 条）", tier, seeds.len());
        state.credentials = seeds.clone();
        state.cursor = 0;
    }

    /// 跳过间隔检查立即刷新；返回刷新后的数量。
    pub async fn force_refresh(&self, tier: CookieTier) -> usize {
        info!(target: "pool", "强制刷新 {} Cookie", tier);
        let _gate = self.slots[tier.index()].refresh_gate.lock().await;
        let fetched = self.source.fetch(tier).await;
        let now = Instant::now();

        let mut state = self.lock(tier);
        if !fetched.is_empty() {
            state.replace(fetched, now);
        } else {
            state.last_refresh = Some(now);
            state.cursor = 0;
            if state.credentials.is_empty() {
                self.apply_seeds(tier, &mut state);
            }
        }
        state.credentials.len()
    }

    /// 并发刷新所有层级，互不阻塞。
    pub async fn force_refresh_all(&self) -> BTreeMap<CookieTier, usize> {
        let (general, premium, media) = tokio::join!(
            self.force_refresh(CookieTier::General),
            self.force_refresh(CookieTier::Premium),
            self.force_refresh(CookieTier::DedicatedMedia),
        );
        BTreeMap::from([
            (CookieTier::General, general),
            (CookieTier::Premium, premium),
            (CookieTier::DedicatedMedia, media),
        ])
    }

    /// Removes `bad` from `tier`; the cursor is reset when it falls out of range.
    pub fn evict(&self, tier: CookieTier, bad: &HashSet<String>) -> usize {
        if bad.is_empty() {
            return 0;
        }
        let removed = self.lock(tier).evict(bad);
        if removed > 0 {
            info!(target: "pool", "已从 {} 移除 {} 条失效 Cookie", tier, removed);
        }
        removed
    }

    pub fn len(&self, tier: CookieTier) -> usize {
        self.lock(tier).credentials.len()
    }

    #[cfg(test)]
    pub(crate) fn cursor(&self, tier: CookieTier) -> usize {
        self.lock(tier).cursor
    }

    pub fn snapshot(&self, tier: CookieTier) -> Vec<String> {
        self.lock(tier).credentials.clone()
    }

    pub fn counts(&self) -> BTreeMap<CookieTier, usize> {
        CookieTier::ALL.into_iter().map(|t| (t, self.len(t))).collect()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn round_robin_distributes_evenly() {
        let src = Arc::new(StaticSource::with(
            CookieTier::General,
            &["ndus=a", "ndus=b", "ndus=c"],
        ));
        let pool = CookiePool::new(src.clone(), settings());

        for n in 1..=3 {
            let mut hits: HashMap<String, usize> = HashMap::new();
            for _ in 0..(n * 3) {
                let c = pool.next(CookieTier::General).await.unwrap();
                *hits.entry(c.value).or_default() += 1;
            }
            assert_eq!(hits.len(), 3);
            assert!(hits.values().all(|&v| v == n), "uneven: {hits:?}");
        }
        // Only the initial (empty tier) refresh happened.
        assert_eq!(src.fetches(), 1);
    }

    #[tokio::test]
    async fn next_with_index_reports_pre_advance_index() {
        let src = Arc::new(StaticSource::with(CookieTier::DedicatedMedia, &["ndus=1", "ndus=2"]));
        let pool = CookiePool::new(src, settings());

        let (_, first) = pool.next_with_index(CookieTier::DedicatedMedia).await.unwrap();
        let (_, second) = pool.next_with_index(CookieTier::DedicatedMedia).await.unwrap();
        let (_, third) = pool.next_with_index(CookieTier::DedicatedMedia).await.unwrap();
        assert_eq!((first, second, third), (0, 1, 0));
    }

    #[tokio::test]
    async fn force_refresh_replaces_sequence_and_resets_cursor() {
        let src = Arc::new(StaticSource::with(CookieTier::General, &["ndus=a", "ndus=b"]));
        let pool = CookiePool::new(src.clone(), settings());
        pool.next(CookieTier::General).await.unwrap();
        assert_eq!(pool.cursor(CookieTier::General), 1);

        src.set(CookieTier::General, &["ndus=x", "ndus=y", "ndus=x", "junk"]);
        assert_eq!(pool.force_refresh(CookieTier::General).await, 2);
        assert_eq!(pool.cursor(CookieTier::General), 0);
        assert_eq!(
            pool.snapshot(CookieTier::General),
            vec!["ndus=x".to_string(), "ndus=y".to_string()]
        );
    }

    #[tokio::test]
    async fn empty_fetch_keeps_existing_sequence() {
        let src = Arc::new(StaticSource::with(CookieTier::Premium, &["ndus=p"]));
        let mut s = settings();
        s.seeds[CookieTier::Premium.index()] = vec!["ndus=seed".to_string()];
        let pool = CookiePool::new(src.clone(), s);
        pool.force_refresh(CookieTier::Premium).await;

        src.set(CookieTier::Premium, &[]);
        assert_eq!(pool.force_refresh(CookieTier::Premium).await, 1);
        assert_eq!(pool.snapshot(CookieTier::Premium), vec!["ndus=p".to_string()]);
    }

    #[tokio::test]
    async fn seeds_apply_only_when_tier_and_fetch_are_empty() {
        let src = Arc::new(StaticSource::default());
        let mut s = settings();
        s.seeds[CookieTier::General.index()] = vec!["ndus=seed".to_string()];
        let pool = CookiePool::new(src, s);

        let c = pool.next(CookieTier::General).await.unwrap();
        assert_eq!(c.value, "ndus=seed");
        assert!(pool.next(CookieTier::Premium).await.is_none());
    }

    #[tokio::test]
    async fn due_tier_is_refreshed_before_dispatch() {
        let src = Arc::new(StaticSource::with(CookieTier::General, &["ndus=old"]));
        let mut s = settings();
        s.refresh_interval = Duration::ZERO;
        let pool = CookiePool::new(src.clone(), s);

        assert_eq!(pool.next(CookieTier::General).await.unwrap().value, "ndus=old");
        src.set(CookieTier::General, &["ndus=new"]);
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(pool.next(CookieTier::General).await.unwrap().value, "ndus=new");
    }

    #[tokio::test]
    async fn eviction_bounds_cursor() {
        let src = Arc::new(StaticSource::with(
            CookieTier::General,
            &["ndus=a", "ndus=b", "ndus=c"],
        ));
        let pool = CookiePool::new(src, settings());
        pool.next(CookieTier::General).await;
        pool.next(CookieTier::General).await;

        let bad: HashSet<String> = ["ndus=c".to_string()].into_iter().collect();
        assert_eq!(pool.evict(CookieTier::General, &bad), 1);
        assert_eq!(pool.cursor(CookieTier::General), 0);
        assert_eq!(pool.next(CookieTier::General).await.unwrap().value, "ndus=a");
    }

    #[tokio::test]
    async fn concurrent_dispatch_never_repeats_an_index_within_a_round() {
        let values: Vec<String> = (0..8).map(|i| format!("ndus={i}")).collect();
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        let src = Arc::new(StaticSource::with(CookieTier::General, &refs));
        let pool = Arc::new(CookiePool::new(src, settings()));
        pool.force_refresh(CookieTier::General).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.next_with_index(CookieTier::General).await.unwrap().1
            }));
        }
        let mut seen = HashSet::new();
        for h in handles {
            assert!(seen.insert(h.await.unwrap()));
        }
        assert_eq!(seen.len(), 8);
    }

    fn prefix(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("ndus={i}")).collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn dispatch_stays_in_bounds_while_tier_shrinks() {
        let src = Arc::new(StaticSource::default());
        let initial = prefix(8);
        let refs: Vec<&str> = initial.iter().map(String::as_str).collect();
        src.set(CookieTier::General, &refs);
        let pool = Arc::new(CookiePool::new(src.clone(), settings()));
        pool.force_refresh(CookieTier::General).await;

        let mut dispatchers = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            dispatchers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..300 {
                    let (c, index) = pool.next_with_index(CookieTier::General).await.unwrap();
                    seen.push((c.value, index));
                    tokio::task::yield_now().await;
                }
                seen
            }));
        }

        // Eviction drops the last entry and every refresh serves a shorter prefix,
        // so the sequence is always `ndus=0..len` and an index names its own value.
        let mutator = {
            let pool = pool.clone();
            let src = src.clone();
            tokio::spawn(async move {
                for next_len in [6, 4, 2] {
                    let last = pool.len(CookieTier::General) - 1;
                    let bad: HashSet<String> = [format!("ndus={last}")].into_iter().collect();
                    assert_eq!(pool.evict(CookieTier::General, &bad), 1);
                    tokio::task::yield_now().await;

                    let values = prefix(next_len);
                    let refs: Vec<&str> = values.iter().map(String::as_str).collect();
                    src.set(CookieTier::General, &refs);
                    assert_eq!(pool.force_refresh(CookieTier::General).await, next_len);
                    tokio::task::yield_now().await;
                }
            })
        };

        mutator.await.unwrap();
        for h in dispatchers {
            for (value, index) in h.await.unwrap() {
                assert!(index < 8, "index {index} out of bounds");
                assert_eq!(value, format!("ndus={index}"));
            }
        }

        let len = pool.len(CookieTier::General);
        assert_eq!(len, 2);
        assert!(pool.cursor(CookieTier::General) < len);
        let (c, index) = pool.next_with_index(CookieTier::General).await.unwrap();
        assert!(index < len);
        assert_eq!(c.value, format!("ndus={index}"));
    }

    #[tokio::test]
    async fn refresh_all_reports_counts_per_tier() {
        let src = Arc::new(StaticSource::with(CookieTier::General, &["ndus=a"]));
        src.set(CookieTier::DedicatedMedia, &["ndus=m1", "ndus=m2"]);
        let pool = CookiePool::new(src, settings());

        let counts = pool.force_refresh_all().await;
        assert_eq!(counts[&CookieTier::General], 1);
        assert_eq!(counts[&CookieTier::Premium], 0);
        assert_eq!(counts[&CookieTier::DedicatedMedia], 2);
        assert_eq!(pool.counts(), counts);
    }
}
