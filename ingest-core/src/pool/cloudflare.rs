use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

const CHALLENGE_MARKERS: &[&str] = &[
    "Checking your browser",
    "Cloudflare",
    "cf_chl_opt",
    "challenge-platform",
    "jschl-answer",
    "cf-browser-verification",
];

/// A minimal curl-like user agent string used for the bypass retry.
pub const CURL_LIKE_USER_AGENT: &str = "curl/8.11.1";

/// Detects a Cloudflare challenge page: a 403 whose body contains any of
/// the known challenge markers.
pub fn is_cloudflare_challenge(status: StatusCode, body: &str) -> bool {
    status == StatusCode::FORBIDDEN && CHALLENGE_MARKERS.iter().any(|m| body.contains(m))
}

/// Performs the request, retrying exactly once with a minimal curl-like
/// header set when the first response looks like a Cloudflare challenge.
/// If both attempts fail, the final body returned to the caller is
/// byte-identical to the first attempt's body.
pub async fn fetch_with_cloudflare_bypass(
    client: &Client,
    url: &str,
    timeout: Duration,
) -> reqwest::Result<(StatusCode, String)> {
    let first = client.get(url).timeout(timeout).send().await?;
    let first_status = first.status();
    let first_body = first.text().await?;

    if !is_cloudflare_challenge(first_status, &first_body) {
        return Ok((first_status, first_body));
    }

    debug!(url, "cloudflare challenge detected, retrying with curl-like headers");
    let retry = client
        .get(url)
        .timeout(timeout)
        .header("User-Agent", CURL_LIKE_USER_AGENT)
        .header("Accept", "*/*")
        .send()
        .await?;
    let retry_status = retry.status();
    let retry_body = retry.text().await?;

    if retry_status.is_success() {
        Ok((retry_status, retry_body))
    } else {
        // Preserve the first attempt's body verbatim on repeated failure.
        Ok((first_status, first_body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_known_challenge_markers() {
        for marker in CHALLENGE_MARKERS {
            assert!(is_cloudflare_challenge(
                StatusCode::FORBIDDEN,
                &format!("<html>{marker}</html>")
            ));
        }
    }

    #[test]
    fn ignores_403_without_markers() {
        assert!(!is_cloudflare_challenge(StatusCode::FORBIDDEN, "plain forbidden"));
    }

    #[test]
    fn ignores_non_403_even_with_markers() {
        assert!(!is_cloudflare_challenge(StatusCode::OK, "Cloudflare"));
    }
}
