use crate::net::fetch_text_with_retry;
use crate::pool::{ClientPool, PoolKind};
use domain::{
    DiscoveryProgressRecord, DiscoveryStage, Feed, FetchContext, Repository, SourceConfig, UserId,
};
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use url::Url;

const MAX_CONCURRENT_RSS_CHECKS: usize = 8;
const MAX_CONCURRENT_PATH_CHECKS: usize = 5;
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(15);
const DISCOVERY_RETRIES: u32 = 3;

const COMMON_RSS_PATHS: &[&str] = &[
    "/feed", "/feed/", "/rss", "/rss.xml", "/atom.xml", "/index.xml", "/feed.xml",
];

const FRIEND_LINK_CONTAINER_SELECTORS: &[&str] =
    &["a.friend-link", "a.blogroll", ".friends a", ".links a", "#blogroll a"];

/// Bounded friend-link discovery. States progress through
/// `fetching_homepage -> finding_friend_links -> fetching_friend_page ->
/// found_links -> checking_rss -> complete`, publishing a record at each
/// step so a poller can render a live progress bar the same way the
/// fetch scheduler's progress events do.
pub struct DiscoveryEngine {
    pool: Arc<ClientPool>,
}

#[derive(Debug, Clone)]
pub struct DiscoveredFeed {
    pub url: String,
    pub title: Option<String>,
}

impl DiscoveryEngine {
    pub fn new(pool: Arc<ClientPool>) -> Self {
        Self { pool }
    }

    /// Runs single-feed discovery, invoking `on_progress` for every stage
    /// transition.
    pub async fn discover_for_feed(
        &self,
        feed: &Feed,
        ctx: &FetchContext,
        mut on_progress: impl FnMut(DiscoveryProgressRecord),
    ) -> Vec<DiscoveredFeed> {
        let homepage = homepage_for(feed);
        let Some(homepage) = homepage else {
            return vec![];
        };

        on_progress(record(DiscoveryStage::FetchingHomepage, "fetching homepage", Some(&homepage), 0, 1, 0));
        let Ok(homepage_html) = self.fetch(&homepage, ctx).await else {
            return vec![];
        };

        on_progress(record(DiscoveryStage::FindingFriendLinks, "scanning for friend links", None, 0, 1, 0));
        let friend_links = extract_friend_links(&homepage_html, &homepage);

        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_RSS_CHECKS));
        let mut candidate_urls = std::collections::HashSet::new();
        candidate_urls.insert(homepage.clone());

        let total = friend_links.len();
        for (i, link) in friend_links.iter().enumerate() {
            on_progress(record(
                DiscoveryStage::FetchingFriendPage,
                "fetching friend page",
                Some(link),
                i,
                total,
                0,
            ));
            let permit = semaphore.clone().acquire_owned().await.ok();
            if let Ok(html) = self.fetch(link, ctx).await {
                for outbound in extract_friend_links(&html, link) {
                    candidate_urls.insert(outbound);
                }
            }
            drop(permit);
            candidate_urls.insert(link.clone());
        }

        on_progress(record(
            DiscoveryStage::FoundLinks,
            "found candidate sites",
            None,
            0,
            candidate_urls.len(),
            0,
        ));

        on_progress(record(DiscoveryStage::CheckingRss, "probing for feeds", None, 0, candidate_urls.len(), 0));
        let found = self.probe_candidates(candidate_urls.into_iter().collect(), ctx).await;

        on_progress(record(
            DiscoveryStage::Complete,
            "discovery complete",
            None,
            found.len(),
            found.len(),
            found.len(),
        ));
        found
    }

    /// Runs discovery across every feed owned by `user_id`, bounding total
    /// parallelism the same way as single-feed discovery.
    pub async fn discover_for_user(
        &self,
        repository: &dyn Repository,
        user_id: UserId,
        ctx: &FetchContext,
        mut on_progress: impl FnMut(DiscoveryProgressRecord),
    ) -> Vec<DiscoveredFeed> {
        let Ok(feeds) = repository.list_feeds_for_user(user_id).await else {
            return vec![];
        };

        let mut all_found = Vec::new();
        let total = feeds.len();
        for (i, feed) in feeds.iter().enumerate() {
            on_progress(record(
                DiscoveryStage::FetchingHomepage,
                "discovering feed",
                Some(&feed.id.to_string()),
                i,
                total,
                all_found.len(),
            ));
            let found = self.discover_for_feed(feed, ctx, |_| {}).await;
            all_found.extend(found);
        }

        on_progress(record(DiscoveryStage::Complete, "batch discovery complete", None, total, total, all_found.len()));
        all_found
    }

    async fn probe_candidates(&self, candidates: Vec<String>, ctx: &FetchContext) -> Vec<DiscoveredFeed> {
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_PATH_CHECKS));
        let mut handles = Vec::new();

        for base in candidates {
            let semaphore = semaphore.clone();
            let pool = self.pool.clone();
            let ctx = ctx.child();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                probe_one_candidate(&pool, &base, &ctx).await
            }));
        }

        let mut found = Vec::new();
        for handle in handles {
            if let Ok(Some(feed)) = handle.await {
                found.push(feed);
            }
        }
        found
    }

    async fn fetch(&self, url: &str, ctx: &FetchContext) -> domain::Result<String> {
        let pooled = self.pool.get(PoolKind::General, None, None);
        fetch_text_with_retry(&self.pool, None, &pooled.client, url, DISCOVERY_TIMEOUT, ctx, DISCOVERY_RETRIES).await
    }
}

async fn probe_one_candidate(pool: &ClientPool, base: &str, ctx: &FetchContext) -> Option<DiscoveredFeed> {
    let Ok(base_url) = Url::parse(base) else { return None };

    if let Some(feed) = try_parse_as_feed(pool, base, ctx).await {
        return Some(feed);
    }

    let mut candidates: Vec<String> =
        COMMON_RSS_PATHS.iter().filter_map(|path| base_url.join(path).ok()).map(|u| u.to_string()).collect();
    if let Ok(body) = fetch_via_pool(pool, base, ctx).await {
        candidates.extend(extract_alternate_links(&body, &base_url));
    }

    for candidate in candidates {
        let mut backoff = Duration::from_secs(1);
        for attempt in 0..3 {
            if let Some(feed) = try_parse_as_feed(pool, &candidate, ctx).await {
                return Some(feed);
            }
            if attempt < 2 {
                tokio::time::sleep(backoff).await;
                backoff += Duration::from_secs(1);
            }
        }
    }
    None
}

async fn fetch_via_pool(pool: &ClientPool, url: &str, ctx: &FetchContext) -> domain::Result<String> {
    let pooled = pool.get(PoolKind::General, None, None);
    fetch_text_with_retry(pool, None, &pooled.client, url, DISCOVERY_TIMEOUT, ctx, 0).await
}

/// Extracts `<link rel="alternate" type="application/rss+xml|atom+xml">`
/// hrefs from a candidate's homepage, resolved against its base URL.
fn extract_alternate_links(html: &str, base_url: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse(r#"link[rel="alternate"]"#) else { return vec![] };

    document
        .select(&selector)
        .filter(|el| {
            el.value()
                .attr("type")
                .map(|t| t.contains("rss") || t.contains("atom"))
                .unwrap_or(false)
        })
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| base_url.join(href).ok())
        .map(|u| u.to_string())
        .collect()
}

async fn try_parse_as_feed(pool: &ClientPool, url: &str, ctx: &FetchContext) -> Option<DiscoveredFeed> {
    let body = fetch_via_pool(pool, url, ctx).await.ok()?;
    let parsed = feed_rs::parser::parse(body.as_bytes()).ok()?;
    if parsed.entries.is_empty() {
        return None;
    }
    Some(DiscoveredFeed { url: url.to_string(), title: parsed.title.map(|t| t.content) })
}

fn homepage_for(feed: &Feed) -> Option<String> {
    match &feed.config {
        SourceConfig::Rss(rss) => Url::parse(&rss.url).ok().map(|u| format!("{}://{}", u.scheme(), u.authority())),
        SourceConfig::XPath(x) => Url::parse(&x.url).ok().map(|u| format!("{}://{}", u.scheme(), u.authority())),
        _ => None,
    }
}

fn extract_friend_links(html: &str, base: &str) -> Vec<String> {
    let Ok(base_url) = Url::parse(base) else { return vec![] };
    let document = Html::parse_document(html);
    let mut links = Vec::new();

    for selector_str in FRIEND_LINK_CONTAINER_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else { continue };
        for element in document.select(&selector) {
            if let Some(href) = element.value().attr("href") {
                if let Ok(resolved) = base_url.join(href) {
                    if resolved.scheme() == "http" || resolved.scheme() == "https" {
                        links.push(resolved.to_string());
                    }
                }
            }
        }
    }
    links
}

fn record(
    stage: DiscoveryStage,
    message: &str,
    detail: Option<&str>,
    current: usize,
    total: usize,
    found_count: usize,
) -> DiscoveryProgressRecord {
    DiscoveryProgressRecord {
        stage,
        message: message.to_string(),
        detail: detail.map(str::to_string),
        current,
        total,
        found_count,
    }
}
