use crate::pool::{fetch_with_cloudflare_bypass, is_cloudflare_challenge, ClientPool, PoolKind, CURL_LIKE_USER_AGENT};
use backoff::backoff::Backoff;
use backoff::exponential::ExponentialBackoff;
use domain::{FetchContext, IngestError, Result};
use std::time::Duration;
use tracing::warn;

/// Shared retryable GET used by the RSS, CSS/XPath, and discovery-engine
/// fetchers. Network errors and 429/5xx responses retry with simple
/// backoff up to `max_retries`; a 403 that looks like a Cloudflare
/// challenge is retried once with a curl-like user agent pulled from the
/// `UserAgentBound` pool partition before being treated as a rejection.
pub async fn fetch_text_with_retry(
    pool: &ClientPool,
    proxy_url: Option<&str>,
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
    ctx: &FetchContext,
    max_retries: u32,
) -> Result<String> {
    let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
        current_interval: Duration::from_millis(500),
        initial_interval: Duration::from_millis(500),
        max_interval: Duration::from_secs(5),
        multiplier: 2.0,
        max_elapsed_time: Some(Duration::from_secs(30)),
        ..Default::default()
    };

    let mut attempt = 0;
    loop {
        if ctx.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        match client.get(url).timeout(timeout).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response
                        .text()
                        .await
                        .map_err(|e| IngestError::NetworkTransient(e.to_string()));
                }
                if status.as_u16() == 429 || status.is_server_error() {
                    if attempt < max_retries {
                        if let Some(delay) = backoff.next_backoff() {
                            attempt += 1;
                            warn!(url, attempt, "retrying after HTTP {}: waiting {:?}", status, delay);
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }
                    return Err(IngestError::RemoteOverload { status: status.as_u16() });
                }
                let body = response.text().await.unwrap_or_default();
                if is_cloudflare_challenge(status, &body) {
                    let bypass = pool.get(PoolKind::UserAgentBound, proxy_url, Some(CURL_LIKE_USER_AGENT));
                    if let Ok((bypass_status, bypass_body)) =
                        fetch_with_cloudflare_bypass(&bypass.client, url, timeout).await
                    {
                        if bypass_status.is_success() {
                            return Ok(bypass_body);
                        }
                    }
                }
                return Err(IngestError::RemoteRejected {
                    status: status.as_u16(),
                    body_snippet: body.chars().take(200).collect(),
                });
            }
            Err(e) if e.is_timeout() || e.is_connect() => {
                if attempt < max_retries {
                    if let Some(delay) = backoff.next_backoff() {
                        attempt += 1;
                        warn!(url, attempt, "retrying after network error: {}", e);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                }
                return Err(IngestError::NetworkTransient(e.to_string()));
            }
            Err(e) => return Err(IngestError::NetworkTransient(e.to_string())),
        }
    }
}
