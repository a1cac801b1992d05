use crate::net::fetch_text_with_retry;
use crate::pool::{ClientPool, PoolKind};
use chrono::Utc;
use domain::{
    FetchContext, FetchedFeed, IngestError, ParsedItem, Result, RssConfig, Source, SourceConfig,
    SourceType,
};
use feed_rs::parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_RETRIES: u32 = 2;

/// RSS/Atom over HTTP: a stateless `Source` impl that reads its
/// URL/timeout/proxy from `RssConfig` rather than holding them as fields.
pub struct RssSource {
    pool: Arc<ClientPool>,
}

impl RssSource {
    pub fn new(pool: Arc<ClientPool>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Source for RssSource {
    fn source_type(&self) -> SourceType {
        SourceType::Rss
    }

    fn validate(&self, config: &SourceConfig) -> Result<()> {
        let SourceConfig::Rss(rss) = config else {
            return Err(IngestError::Validation("not an rss config".to_string()));
        };
        url::Url::parse(&rss.url)
            .map_err(|e| IngestError::Validation(format!("invalid feed URL: {e}")))?;
        Ok(())
    }

    async fn fetch(&self, ctx: &FetchContext, config: &SourceConfig) -> Result<FetchedFeed> {
        let SourceConfig::Rss(rss) = config else {
            return Err(IngestError::Validation("not an rss config".to_string()));
        };

        let pooled = self.pool.get(
            PoolKind::General,
            rss.proxy.as_deref(),
            Some(rss.user_agent.as_deref().unwrap_or(BROWSER_USER_AGENT)),
        );
        let timeout = if rss.timeout.is_zero() { DEFAULT_TIMEOUT } else { rss.timeout };

        let body = fetch_text_with_retry(
            &self.pool,
            rss.proxy.as_deref(),
            &pooled.client,
            &rss.url,
            timeout,
            ctx,
            MAX_RETRIES,
        )
        .await?;
        parse_rss(&body)
    }
}

/// Parses raw RSS/Atom content into a `FetchedFeed`. Exposed for the
/// script adapter, which treats a script's stdout the same way.
pub fn parse_rss(content: &str) -> Result<FetchedFeed> {
    debug!(bytes = content.len(), "parsing rss/atom feed");
    let feed = parser::parse(content.as_bytes())
        .map_err(|e| IngestError::Parse(format!("failed to parse feed: {e}")))?;

    let title = feed.title.map(|t| t.content);
    let description = feed.description.map(|d| d.content);
    let link = feed.links.first().map(|l| l.href.clone());

    let items = feed
        .entries
        .into_iter()
        .filter_map(parse_entry)
        .collect::<Vec<_>>();

    Ok(FetchedFeed { title, link, description, items })
}

fn parse_entry(entry: feed_rs::model::Entry) -> Option<ParsedItem> {
    let url = entry.links.first()?.href.clone();
    let title = entry.title.map(|t| t.content).unwrap_or_else(|| "Untitled".to_string());
    let guid = if entry.id.is_empty() { None } else { Some(entry.id.clone()) };
    let content = entry
        .content
        .and_then(|c| c.body)
        .or_else(|| entry.summary.clone().map(|s| s.content));
    let author = entry.authors.first().map(|a| a.name.clone());
    let published_at = entry.published.map(|dt| dt.with_timezone(&Utc));
    let updated_at = entry.updated.map(|dt| dt.with_timezone(&Utc));
    let tags = entry.categories.into_iter().map(|c| c.term).collect();

    Some(ParsedItem { guid, url, title, content, author, published_at, updated_at, tags })
}
