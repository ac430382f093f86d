use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;

/// Hard cap on the feed body (4 MiB); the source serves a few hundred KB.
const MAX_FEED_SIZE: usize = 4 * 1024 * 1024;

/// Default request timeout for the feed GET.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Browser-like user agent; the feed host rejects obvious bot agents.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Errors raised while fetching the feed document.
///
/// Any of these aborts the current cycle's fetch step; nothing has been
/// written yet, so the next scheduler tick simply retries.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
}

/// Fetch the raw feed document.
///
/// One bounded-timeout GET against the fixed source URL. Non-2xx is a hard
/// failure — there is no partial parse of an error page. The body is read
/// through a stream with a running size check so a misbehaving server cannot
/// balloon memory.
pub async fn fetch_feed(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<Vec<u8>, FetchError> {
    let request = client
        .get(url)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .header(
            reqwest::header::ACCEPT,
            "application/xml,text/xml;q=0.9,*/*;q=0.8",
        );

    let response = tokio::time::timeout(timeout, request.send())
        .await
        .map_err(|_| FetchError::Timeout)?
        .map_err(FetchError::Network)?;

    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    read_limited_bytes(response, MAX_FEED_SIZE).await
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: trust Content-Length when present
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
