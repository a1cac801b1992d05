use crate::net::fetch_text_with_retry;
use crate::pool::{ClientPool, PoolKind};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use domain::{
    FetchContext, FetchedFeed, IngestError, ParsedItem, Result, Source, SourceConfig, SourceType,
    XPathConfig,
};
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_RETRIES: u32 = 3;

const FALLBACK_DATE_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S %z",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d",
];

/// CSS-selector scraping adapter. Generalized here from extracting one article's body
/// text into extracting a full synthetic feed (title/items) from a page.
pub struct XPathSource {
    pool: Arc<ClientPool>,
}

impl XPathSource {
    pub fn new(pool: Arc<ClientPool>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Source for XPathSource {
    fn source_type(&self) -> SourceType {
        SourceType::XPath
    }

    fn validate(&self, config: &SourceConfig) -> Result<()> {
        let SourceConfig::XPath(x) = config else {
            return Err(IngestError::Validation("not an xpath config".to_string()));
        };
        Url::parse(&x.url).map_err(|e| IngestError::Validation(format!("invalid URL: {e}")))?;
        Selector::parse(&x.item_selector)
            .map_err(|e| IngestError::Validation(format!("invalid item_selector: {e:?}")))?;
        Selector::parse(&x.title_selector)
            .map_err(|e| IngestError::Validation(format!("invalid title_selector: {e:?}")))?;
        Selector::parse(&x.link_selector)
            .map_err(|e| IngestError::Validation(format!("invalid link_selector: {e:?}")))?;
        Ok(())
    }

    async fn fetch(&self, ctx: &FetchContext, config: &SourceConfig) -> Result<FetchedFeed> {
        let SourceConfig::XPath(x) = config else {
            return Err(IngestError::Validation("not an xpath config".to_string()));
        };

        let pooled = self.pool.get(PoolKind::General, x.proxy.as_deref(), x.user_agent.as_deref());
        let timeout = if x.timeout.is_zero() { DEFAULT_TIMEOUT } else { x.timeout };
        let body = fetch_text_with_retry(
            &self.pool,
            x.proxy.as_deref(),
            &pooled.client,
            &x.url,
            timeout,
            ctx,
            MAX_RETRIES,
        )
        .await?;

        let base = Url::parse(&x.url).map_err(|e| IngestError::Parse(e.to_string()))?;
        scrape(&body, &base, x)
    }
}

fn scrape(html: &str, base: &Url, config: &XPathConfig) -> Result<FetchedFeed> {
    let document = Html::parse_document(html);

    let item_selector = Selector::parse(&config.item_selector)
        .map_err(|e| IngestError::Parse(format!("{e:?}")))?;
    let title_selector = Selector::parse(&config.title_selector)
        .map_err(|e| IngestError::Parse(format!("{e:?}")))?;
    let link_selector = Selector::parse(&config.link_selector)
        .map_err(|e| IngestError::Parse(format!("{e:?}")))?;
    let content_selector = config
        .content_selector
        .as_deref()
        .map(Selector::parse)
        .transpose()
        .map_err(|e| IngestError::Parse(format!("{e:?}")))?;
    let date_selector = config
        .date_selector
        .as_deref()
        .map(Selector::parse)
        .transpose()
        .map_err(|e| IngestError::Parse(format!("{e:?}")))?;

    let page_title = document
        .select(&Selector::parse("title").unwrap())
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string());

    let mut items = Vec::new();
    for element in document.select(&item_selector) {
        let title = element
            .select(&title_selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_else(|| "Untitled".to_string());

        let Some(raw_link) = element
            .select(&link_selector)
            .next()
            .and_then(|el| el.value().attr("href").map(str::to_string).or_else(|| Some(el.text().collect::<String>())))
        else {
            continue;
        };
        let Ok(url) = base.join(raw_link.trim()) else { continue };

        let content = content_selector.as_ref().and_then(|sel| {
            element
                .select(sel)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
        });

        let published_at = date_selector.as_ref().and_then(|sel| {
            element
                .select(sel)
                .next()
                .map(|el| el.text().collect::<String>())
                .and_then(|raw| parse_date(raw.trim(), &config.date_formats))
        });

        items.push(ParsedItem {
            guid: None,
            url: url.to_string(),
            title,
            content,
            author: None,
            published_at,
            updated_at: None,
            tags: Vec::new(),
        });
    }

    Ok(FetchedFeed { title: page_title, link: Some(base.to_string()), description: None, items })
}

fn parse_date(raw: &str, configured_formats: &[String]) -> Option<DateTime<Utc>> {
    let formats = configured_formats
        .iter()
        .map(String::as_str)
        .chain(FALLBACK_DATE_FORMATS.iter().copied());

    for format in formats {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(DateTime::from_naive_utc_and_offset(date.and_hms_opt(0, 0, 0)?, Utc));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_HTML: &str = r#"<html><head><title>Blog</title></head><body>
    <div class="post">
      <h2 class="title">First post</h2>
      <a class="link" href="/posts/1">read</a>
      <div class="body">Body text</div>
      <span class="date">2024-01-15</span>
    </div>
    <div class="post">
      <h2 class="title">Second post</h2>
      <a class="link" href="https://blog.example.com/posts/2">read</a>
      <div class="body">More text</div>
      <span class="date">2024-02-20</span>
    </div>
    </body></html>"#;

    fn config() -> XPathConfig {
        XPathConfig {
            url: "https://blog.example.com/".to_string(),
            timeout: Duration::from_secs(5),
            proxy: None,
            user_agent: None,
            item_selector: "div.post".to_string(),
            title_selector: "h2.title".to_string(),
            link_selector: "a.link".to_string(),
            content_selector: Some("div.body".to_string()),
            date_selector: Some("span.date".to_string()),
            date_formats: vec![],
        }
    }

    #[test]
    fn extracts_items_with_resolved_relative_links() {
        let base = Url::parse("https://blog.example.com/").unwrap();
        let feed = scrape(SAMPLE_HTML, &base, &config()).unwrap();
        assert_eq!(feed.items.len(), 2);
        assert_eq!(feed.items[0].url, "https://blog.example.com/posts/1");
        assert_eq!(feed.items[1].url, "https://blog.example.com/posts/2");
    }

    #[test]
    fn extracts_title_content_and_date() {
        let base = Url::parse("https://blog.example.com/").unwrap();
        let feed = scrape(SAMPLE_HTML, &base, &config()).unwrap();
        assert_eq!(feed.items[0].title, "First post");
        assert_eq!(feed.items[0].content.as_deref(), Some("Body text"));
        assert!(feed.items[0].published_at.is_some());
    }

    #[test]
    fn skips_items_without_a_link() {
        let html = r#"<div class="post"><h2 class="title">No link</h2></div>"#;
        let base = Url::parse("https://blog.example.com/").unwrap();
        let feed = scrape(html, &base, &config()).unwrap();
        assert!(feed.items.is_empty());
    }

    #[test]
    fn date_parsing_tries_fallback_formats() {
        assert!(parse_date("Mon, 15 Jan 2024 10:00:00 +0000", &[]).is_some());
        assert!(parse_date("2024-01-15", &[]).is_some());
        assert!(parse_date("not a date", &[]).is_none());
    }
}
