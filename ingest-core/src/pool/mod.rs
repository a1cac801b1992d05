pub mod cloudflare;
pub mod proxy;

use lru::LruCache;
use reqwest::Client;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

pub use cloudflare::{fetch_with_cloudflare_bypass, is_cloudflare_challenge, CURL_LIKE_USER_AGENT};
pub use proxy::{build_proxy_url, validate_proxy_url, ProxyError, ProxyKind};

/// Which partitioned cache a `Get` targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    General,
    Ai,
    UserAgentBound,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    proxy_url: Option<String>,
    user_agent: Option<String>,
}

/// Cached HTTP stack for a (proxy, UA) key. `Client` wraps an
/// `Arc` internally, so a clone handed to a caller stays valid for the
/// length of its request even if the pool later evicts this entry — the
/// underlying transport is only actually dropped once every reference,
/// borrowed or cached, goes away.
#[derive(Clone)]
pub struct PooledClient {
    pub client: Client,
    pub proxy_url: Option<String>,
    last_used: Instant,
}

struct Category {
    cache: Mutex<LruCache<PoolKey, PooledClient>>,
}

impl Category {
    fn new(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap()),
            )),
        }
    }

    fn len(&self) -> usize {
        self.cache.lock().expect("pool mutex poisoned").len()
    }

    fn flush(&self) {
        self.cache.lock().expect("pool mutex poisoned").clear();
    }
}

/// The shared HTTP client pool. One of only three globally
/// shared mutable pieces of process state, alongside the
/// progress tracker and the logger.
pub struct ClientPool {
    general: Category,
    ai: Category,
    user_agent_bound: Category,
    last_proxy: Mutex<Option<String>>,
}

const MAX_IDLE_CONNS_PER_HOST: usize = 20;
const IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(90);
const RESPONSE_HEADER_TIMEOUT: Duration = Duration::from_secs(30);
const RESPONSE_HEADER_TIMEOUT_AI: Duration = Duration::from_secs(60);
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

impl ClientPool {
    pub fn new(max_clients_per_pool: usize) -> Self {
        Self {
            general: Category::new(max_clients_per_pool),
            ai: Category::new(max_clients_per_pool),
            user_agent_bound: Category::new(max_clients_per_pool),
            last_proxy: Mutex::new(None),
        }
    }

    fn category(&self, kind: PoolKind) -> &Category {
        match kind {
            PoolKind::General => &self.general,
            PoolKind::Ai => &self.ai,
            PoolKind::UserAgentBound => &self.user_agent_bound,
        }
    }

    /// Returns the cached client for `(kind, proxy_url, user_agent)`,
    /// building and inserting one on a miss.
    pub fn get(
        &self,
        kind: PoolKind,
        proxy_url: Option<&str>,
        user_agent: Option<&str>,
    ) -> PooledClient {
        let key = PoolKey {
            proxy_url: proxy_url.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
        };

        let category = self.category(kind);
        {
            let mut cache = category.cache.lock().expect("pool mutex poisoned");
            if let Some(existing) = cache.get_mut(&key) {
                existing.last_used = Instant::now();
                return existing.clone();
            }
        }

        let built = build_client(kind, proxy_url, user_agent);
        let mut cache = category.cache.lock().expect("pool mutex poisoned");
        cache.put(key, built.clone());
        built
    }

    /// Flushes every cached client across all three categories when the
    /// proxy configuration changes — "simpler and safer than per-key
    /// invalidation".
    pub fn on_proxy_changed(&self, new_proxy_url: Option<&str>) {
        let mut last = self.last_proxy.lock().expect("pool mutex poisoned");
        let new_proxy = new_proxy_url.map(str::to_string);
        if *last != new_proxy {
            self.general.flush();
            self.ai.flush();
            self.user_agent_bound.flush();
            *last = new_proxy;
        }
    }

    pub fn len(&self, kind: PoolKind) -> usize {
        self.category(kind).len()
    }
}

fn build_client(kind: PoolKind, proxy_url: Option<&str>, user_agent: Option<&str>) -> PooledClient {
    let mut builder = Client::builder()
        .pool_idle_timeout(IDLE_CONN_TIMEOUT)
        .pool_max_idle_per_host(MAX_IDLE_CONNS_PER_HOST)
        .connect_timeout(TLS_HANDSHAKE_TIMEOUT)
        .min_tls_version(reqwest::tls::Version::TLS_1_2)
        .gzip(true)
        .brotli(true);

    builder = match kind {
        PoolKind::General | PoolKind::UserAgentBound => {
            builder.timeout(RESPONSE_HEADER_TIMEOUT)
        }
        PoolKind::Ai => builder.timeout(RESPONSE_HEADER_TIMEOUT_AI).http1_only(),
    };

    if let Some(ua) = user_agent {
        builder = builder.user_agent(ua.to_string());
    }

    let mut applied_proxy = None;
    if let Some(raw) = proxy_url {
        match validate_proxy_url(raw) {
            Ok(()) => match reqwest::Proxy::all(raw) {
                Ok(proxy) => {
                    builder = builder.proxy(proxy);
                    applied_proxy = Some(raw.to_string());
                }
                Err(e) => warn!(proxy = raw, error = %e, "failed to construct proxy, proceeding direct"),
            },
            Err(e) => warn!(proxy = raw, error = %e, "invalid proxy config, proceeding direct"),
        }
    }

    let client = builder
        .build()
        .unwrap_or_else(|_| Client::new());

    PooledClient {
        client,
        proxy_url: applied_proxy,
        last_used: Instant::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_cached_client_for_same_key() {
        let pool = ClientPool::new(50);
        let a = pool.get(PoolKind::General, None, None);
        let b = pool.get(PoolKind::General, None, None);
        assert_eq!(pool.len(PoolKind::General), 1);
        // Both calls return the same logical cache entry.
        assert_eq!(a.proxy_url, b.proxy_url);
    }

    #[test]
    fn evicts_lru_tail_when_capacity_exceeded() {
        let pool = ClientPool::new(2);
        pool.get(PoolKind::General, Some("http://proxy-a:8080"), None);
        pool.get(PoolKind::General, Some("http://proxy-b:8080"), None);
        assert_eq!(pool.len(PoolKind::General), 2);
        pool.get(PoolKind::General, Some("http://proxy-c:8080"), None);
        assert_eq!(pool.len(PoolKind::General), 2);
    }

    #[test]
    fn proxy_change_flushes_every_category() {
        let pool = ClientPool::new(50);
        pool.get(PoolKind::General, Some("http://proxy-a:8080"), None);
        pool.get(PoolKind::Ai, Some("http://proxy-a:8080"), None);
        assert_eq!(pool.len(PoolKind::General), 1);
        assert_eq!(pool.len(PoolKind::Ai), 1);

        pool.on_proxy_changed(Some("http://proxy-b:8080"));

        assert_eq!(pool.len(PoolKind::General), 0);
        assert_eq!(pool.len(PoolKind::Ai), 0);
    }

    #[test]
    fn repeated_proxy_change_is_a_no_op() {
        let pool = ClientPool::new(50);
        pool.on_proxy_changed(Some("http://proxy-a:8080"));
        pool.get(PoolKind::General, None, None);
        pool.on_proxy_changed(Some("http://proxy-a:8080"));
        assert_eq!(pool.len(PoolKind::General), 1);
    }

    #[test]
    fn invalid_proxy_falls_back_to_direct_without_panicking() {
        let pool = ClientPool::new(50);
        let pooled = pool.get(PoolKind::General, Some("not a url"), None);
        assert!(pooled.proxy_url.is_none());
    }
}
