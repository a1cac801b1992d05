//! Shared scaffolding for the integration tests in this crate: a
//! hand-rolled HTTP stub (a `TcpListener` responder standing in for
//! `wiremock`, since no mock-http crate is in the dependency graph) and a
//! minimal in-memory `Repository` fake.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Feed, FeedId, FreshRssConfig, ItemFields, ItemId, Repository, RepoResult, RepositoryError,
    UpsertOutcome, UserId, UserQuota,
};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

pub struct StubResponse {
    status: u16,
    body: String,
}

impl StubResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self { status: 200, body: body.into() }
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into() }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let reason = match self.status {
            200 => "OK",
            403 => "Forbidden",
            429 => "Too Many Requests",
            500 => "Internal Server Error",
            503 => "Service Unavailable",
            _ => "Unknown",
        };
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            reason,
            self.body.len(),
            self.body
        )
        .into_bytes()
    }
}

/// Serves each response in order to successive connections, then stops
/// accepting. One TCP connection per HTTP request, matching how `reqwest`
/// dials with `Connection: close`.
pub struct StubServer {
    addr: std::net::SocketAddr,
    shutdown: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StubServer {
    pub fn start(responses: Vec<StubResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub listener");
        let addr = listener.local_addr().expect("stub listener local_addr");
        let (tx, rx) = mpsc::channel();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let requests_writer = requests.clone();

        let handle = thread::spawn(move || {
            for response in responses {
                let Ok((mut stream, _)) = listener.accept() else { break };
                let mut buf = [0u8; 8192];
                let n = stream.read(&mut buf).unwrap_or(0);
                let request_line = String::from_utf8_lossy(&buf[..n])
                    .lines()
                    .next()
                    .unwrap_or("")
                    .to_string();
                requests_writer.lock().unwrap().push(request_line);
                let _ = stream.write_all(&response.to_bytes());
                let _ = stream.flush();
                if rx.try_recv().is_ok() {
                    break;
                }
            }
        });

        Self { addr, shutdown: Some(tx), handle: Some(handle), requests }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Request lines (e.g. `"POST /accounts/ClientLogin HTTP/1.1"`) seen so
    /// far, in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = TcpStream::connect(self.addr);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[derive(Default)]
pub struct FakeRepository {
    pub quota: Mutex<Option<UserQuota>>,
    pub freshrss: Mutex<Option<FreshRssConfig>>,
    pub upserts: Mutex<Vec<(FeedId, String)>>,
    pub watermarks: Mutex<Vec<(FeedId, u32)>>,
    pub last_fetch_errors: Mutex<Vec<(FeedId, Option<String>)>>,
}

impl FakeRepository {
    pub fn with_quota(concurrency: u32) -> Self {
        let repo = Self::default();
        *repo.quota.lock().unwrap() = Some(UserQuota {
            user_id: uuid::Uuid::new_v4(),
            max_feeds: 100,
            used_feeds: 0,
            max_ai_tokens: 0,
            used_ai_tokens: 0,
            max_feed_fetch_concurrency: concurrency,
            max_ai_concurrency: 1,
            max_translation_concurrency: 1,
        });
        repo
    }

    pub fn with_freshrss(server_url: &str) -> Self {
        let repo = Self::default();
        *repo.freshrss.lock().unwrap() = Some(FreshRssConfig {
            server_url: server_url.to_string(),
            username: "reader@example.com".to_string(),
            password: "secret".to_string(),
        });
        repo
    }
}

#[async_trait]
impl Repository for FakeRepository {
    async fn list_feeds_for_user(&self, _user_id: UserId) -> RepoResult<Vec<Feed>> {
        Ok(vec![])
    }

    async fn get_feed(&self, feed_id: FeedId) -> RepoResult<Feed> {
        Err(RepositoryError::FeedNotFound(feed_id))
    }

    async fn upsert_item(
        &self,
        feed_id: FeedId,
        stable_guid: &str,
        _fields: ItemFields,
    ) -> RepoResult<UpsertOutcome> {
        self.upserts.lock().unwrap().push((feed_id, stable_guid.to_string()));
        Ok(UpsertOutcome::Inserted)
    }

    async fn update_feed_last_fetch(
        &self,
        feed_id: FeedId,
        _when: DateTime<Utc>,
        error: Option<String>,
    ) -> RepoResult<()> {
        self.last_fetch_errors.lock().unwrap().push((feed_id, error));
        Ok(())
    }

    async fn update_email_watermark(&self, feed_id: FeedId, uid: u32) -> RepoResult<()> {
        self.watermarks.lock().unwrap().push((feed_id, uid));
        Ok(())
    }

    async fn mark_article_read(&self, _id: ItemId, _value: bool) -> RepoResult<bool> {
        Ok(false)
    }
    async fn mark_article_favorite(&self, _id: ItemId, _value: bool) -> RepoResult<bool> {
        Ok(false)
    }
    async fn mark_article_hidden(&self, _id: ItemId, _value: bool) -> RepoResult<bool> {
        Ok(false)
    }
    async fn mark_article_read_later(&self, _id: ItemId, _value: bool) -> RepoResult<bool> {
        Ok(false)
    }

    async fn get_freshrss_config(&self, _user_id: UserId) -> RepoResult<Option<FreshRssConfig>> {
        Ok(self.freshrss.lock().unwrap().clone())
    }

    async fn get_quota_for_user(&self, user_id: UserId) -> RepoResult<UserQuota> {
        match self.quota.lock().unwrap().clone() {
            Some(mut quota) => {
                quota.user_id = user_id;
                Ok(quota)
            }
            None => Ok(UserQuota {
                user_id,
                max_feeds: 10,
                used_feeds: 0,
                max_ai_tokens: 0,
                used_ai_tokens: 0,
                max_feed_fetch_concurrency: 4,
                max_ai_concurrency: 1,
                max_translation_concurrency: 1,
            }),
        }
    }

    async fn get_raw_user_setting(&self, _user_id: UserId, _key: &str) -> RepoResult<Option<String>> {
        Ok(None)
    }
    async fn get_raw_global_setting(&self, _key: &str) -> RepoResult<Option<String>> {
        Ok(None)
    }
    async fn get_raw_encrypted_user_setting(
        &self,
        _user_id: UserId,
        _key: &str,
    ) -> RepoResult<Option<String>> {
        Ok(None)
    }
    async fn get_raw_encrypted_global_setting(&self, _key: &str) -> RepoResult<Option<String>> {
        Ok(None)
    }
}

#[allow(dead_code)]
pub fn empty_imap_id() -> HashMap<String, String> {
    HashMap::new()
}
