//! 转存记录缓存：同一分享在有效期内对同一账号只转存一次。

use std::time::Duration;

use moka::sync::Cache;

/// (short code, cookie sent on the transfer); the transfer lands in that cookie's account.
type TransferKey = (String, String);

#[derive(Debug, Clone)]
pub struct TransferCache {
    /// None when the TTL is zero.
    entries: Option<Cache<TransferKey, ()>>,
}

impl TransferCache {
    pub fn new(ttl: Duration) -> Self {
        let entries = (!ttl.is_zero()).then(|| {
            Cache::builder()
                .max_capacity(10_000)
                .time_to_live(ttl)
                .build()
        });
        Self { entries }
    }

    pub fn contains(&self, short_code: &str, account_cookie: &str) -> bool {
        self.entries.as_ref().is_some_and(|c| {
            c.contains_key(&(short_code.to_string(), account_cookie.to_string()))
        })
    }

    pub fn record(&self, short_code: &str, account_cookie: &str) {
        if let Some(c) = &self.entries {
            c.insert((short_code.to_string(), account_cookie.to_string()), ());
        }
    }
}
