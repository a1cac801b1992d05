//! IMAP newsletter ingestion: TLS dial with a plaintext
//! fallback, an optional IMAP ID announcement, a UID-watermarked SEARCH,
//! and message -> item conversion. The `imap` crate is synchronous, so
//! every round trip runs on a blocking thread while the caller's
//! cancellation token and deadline wrap the whole call.
//!
//! A stateless `Source` impl that reads everything it needs from
//! `EmailConfig` rather than holding fixed credentials or connection state.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use domain::{EmailConfig, FetchContext, FetchedFeed, IngestError, ParsedItem, Result, Source, SourceConfig, SourceType};
use imap::Session;
use mail_parser::MessageParser;
use native_tls::TlsStream;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpStream;
use tracing::{debug, warn};

const SEARCH_WINDOW_DAYS: i64 = 30;
const FETCH_BATCH_SIZE: usize = 50;
const FETCH_ITEMS: &str = "(UID RFC822)";

#[derive(Default)]
pub struct EmailSource;

impl EmailSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Source for EmailSource {
    fn source_type(&self) -> SourceType {
        SourceType::Email
    }

    fn validate(&self, config: &SourceConfig) -> Result<()> {
        let SourceConfig::Email(email) = config else {
            return Err(IngestError::Validation("not an email config".to_string()));
        };
        if email.server.is_empty() {
            return Err(IngestError::Validation("email source requires a server".to_string()));
        }
        if email.port == 0 {
            return Err(IngestError::Validation("email source requires a non-zero port".to_string()));
        }
        if email.username.is_empty() {
            return Err(IngestError::Validation("email source requires a username".to_string()));
        }
        Ok(())
    }

    async fn fetch(&self, ctx: &FetchContext, config: &SourceConfig) -> Result<FetchedFeed> {
        let SourceConfig::Email(email) = config else {
            return Err(IngestError::Validation("not an email config".to_string()));
        };
        let email = email.clone();
        let worker = tokio::task::spawn_blocking(move || fetch_via_imap(&email));

        tokio::select! {
            _ = ctx.cancellation.cancelled() => Err(IngestError::Cancelled),
            outcome = tokio::time::timeout(ctx.deadline, worker) => match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => Err(IngestError::InternalBug(format!("imap worker panicked: {join_err}"))),
                Err(_elapsed) => Err(IngestError::NetworkTransient("imap fetch timed out".to_string())),
            },
        }
    }
}

fn fetch_via_imap(config: &EmailConfig) -> Result<FetchedFeed> {
    match dial_tls(config) {
        Ok(mut session) => {
            let result = run_session(&mut session, config);
            let _ = session.logout();
            result
        }
        Err(tls_err) => {
            warn!(server = %config.server, error = %tls_err, "imap TLS dial failed, falling back to plaintext");
            let mut session = dial_plain(config).map_err(|e| {
                IngestError::NetworkTransient(format!("imap plaintext dial to {} failed: {e}", config.server))
            })?;
            let result = run_session(&mut session, config);
            let _ = session.logout();
            result
        }
    }
}

fn dial_tls(config: &EmailConfig) -> imap::error::Result<Session<TlsStream<TcpStream>>> {
    let tls = native_tls::TlsConnector::new()
        .map_err(|e| imap::error::Error::Io(std::io::Error::other(e.to_string())))?;
    let client = imap::connect((config.server.as_str(), config.port), config.server.as_str(), &tls)?;
    login(client, config)
}

fn dial_plain(config: &EmailConfig) -> imap::error::Result<Session<TcpStream>> {
    let stream = TcpStream::connect((config.server.as_str(), config.port))?;
    let client = imap::Client::new(stream);
    login(client, config)
}

fn login<T: Read + Write>(client: imap::Client<T>, config: &EmailConfig) -> imap::error::Result<Session<T>> {
    client.login(&config.username, &config.password).map_err(|(e, _client)| e)
}

fn run_session<T: Read + Write>(session: &mut Session<T>, config: &EmailConfig) -> Result<FetchedFeed> {
    if let Some(id) = &config.imap_id {
        send_imap_id(session, id);
    }

    let mailbox = mailbox_name(config);
    session
        .select(mailbox)
        .map_err(|e| IngestError::NetworkTransient(format!("imap SELECT {mailbox} failed: {e}")))?;

    let query = search_query(config.uid_watermark, Utc::now());
    debug!(query = %query, "imap uid_search");

    let mut uids: Vec<u32> = session
        .uid_search(&query)
        .map_err(|e| IngestError::NetworkTransient(format!("imap SEARCH failed: {e}")))?
        .into_iter()
        .filter(|&uid| config.uid_watermark.map_or(true, |watermark| uid > watermark))
        .collect();
    uids.sort_unstable();

    let mut items = Vec::new();
    for batch in uids.chunks(FETCH_BATCH_SIZE) {
        let sequence_set = batch.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
        let fetches = session
            .uid_fetch(&sequence_set, FETCH_ITEMS)
            .map_err(|e| IngestError::NetworkTransient(format!("imap FETCH failed: {e}")))?;

        for fetch in fetches.iter() {
            let (Some(uid), Some(body)) = (fetch.uid, fetch.body()) else { continue };
            match parse_message(uid, body) {
                Some(item) => items.push(item),
                None => warn!(uid, "could not parse email body, skipping"),
            }
        }
    }

    Ok(FetchedFeed { title: Some(mailbox.to_string()), link: None, description: None, items })
}

fn mailbox_name(config: &EmailConfig) -> &str {
    if config.mailbox.is_empty() {
        "INBOX"
    } else {
        &config.mailbox
    }
}

/// `UID <watermark+1>:* SINCE <date>` when a watermark is set, else a bare
/// `SINCE <date>`.
fn search_query(uid_watermark: Option<u32>, now: DateTime<Utc>) -> String {
    let since = (now - ChronoDuration::days(SEARCH_WINDOW_DAYS)).format("%d-%b-%Y");
    match uid_watermark {
        Some(watermark) => format!("UID {}:* SINCE {}", watermark + 1, since),
        None => format!("SINCE {since}"),
    }
}

/// Best-effort IMAP ID announcement. Not every server accepts it and the
/// `imap` crate has no typed support for the extension, so a rejection is
/// logged and otherwise ignored rather than failing the fetch.
fn send_imap_id<T: Read + Write>(session: &mut Session<T>, id: &HashMap<String, String>) {
    if id.is_empty() {
        return;
    }
    let pairs = id.iter().map(|(k, v)| format!("\"{k}\" \"{v}\"")).collect::<Vec<_>>().join(" ");
    if let Err(e) = session.run_command_and_check_ok(&format!("ID ({pairs})")) {
        debug!(error = %e, "imap server rejected ID command, continuing without it");
    }
}

fn parse_message(uid: u32, body: &[u8]) -> Option<ParsedItem> {
    let message = MessageParser::default().parse(body)?;

    let title = message.subject().unwrap_or("(no subject)").to_string();
    let author = message
        .from()
        .and_then(|addrs| addrs.first())
        .and_then(|addr| addr.address.as_ref())
        .map(|addr| addr.to_string());
    let content = message
        .body_text(0)
        .map(|c| c.to_string())
        .or_else(|| message.body_html(0).map(|c| c.to_string()));

    let link = format!("email://{uid}");
    Some(ParsedItem {
        guid: Some(link.clone()),
        url: link,
        title,
        content,
        author,
        published_at: None,
        updated_at: None,
        tags: vec![],
    })
}
