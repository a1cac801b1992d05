mod rss;
mod script;
mod xpath;

pub use rss::RssSource;
pub use script::{resolve_script_path, ScriptSource};
pub use xpath::XPathSource;

use crate::pool::ClientPool;
use domain::{FetchContext, FetchedFeed, IngestError, Result, Source, SourceConfig, SourceType};
use std::sync::Arc;

/// Dispatches to the right `Source` by `SourceType`. `Email` is handled by
/// the sibling `mail-source` crate; the manager holds it as an opaque
/// `Source` trait object so `ingest-core` never depends on IMAP directly.
pub struct SourceManager {
    rss: RssSource,
    xpath: XPathSource,
    script: ScriptSource,
    email: Option<Arc<dyn Source>>,
}

impl SourceManager {
    pub fn new(pool: Arc<ClientPool>, scripts_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            rss: RssSource::new(pool.clone()),
            xpath: XPathSource::new(pool),
            script: ScriptSource::new(scripts_dir),
            email: None,
        }
    }

    pub fn with_email_source(mut self, email: Arc<dyn Source>) -> Self {
        self.email = Some(email);
        self
    }

    pub fn validate(&self, config: &SourceConfig) -> Result<()> {
        match config.source_type() {
            SourceType::Rss => self.rss.validate(config),
            SourceType::XPath => self.xpath.validate(config),
            SourceType::Script => self.script.validate(config),
            SourceType::Email => self.dispatch_email(|s| s.validate(config)),
            SourceType::FreshRssMirror => self.rss.validate(config),
        }
    }

    pub async fn fetch(&self, ctx: &FetchContext, config: &SourceConfig) -> Result<FetchedFeed> {
        match config.source_type() {
            SourceType::Rss | SourceType::FreshRssMirror => self.rss.fetch(ctx, config).await,
            SourceType::XPath => self.xpath.fetch(ctx, config).await,
            SourceType::Script => self.script.fetch(ctx, config).await,
            SourceType::Email => match &self.email {
                Some(email) => email.fetch(ctx, config).await,
                None => Err(IngestError::Validation(
                    "email source adapter not configured".to_string(),
                )),
            },
        }
    }

    fn dispatch_email<F: FnOnce(&dyn Source) -> Result<()>>(&self, f: F) -> Result<()> {
        match &self.email {
            Some(email) => f(email.as_ref()),
            None => Err(IngestError::Validation(
                "email source adapter not configured".to_string(),
            )),
        }
    }
}
