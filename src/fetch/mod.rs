mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::debug;

/// GETs `url` and returns the body. Non-2xx statuses are errors.
pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Bytes> {
    let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);

    let resp = client.execute(req).await?.error_for_status()?;
    let bytes = resp.bytes().await?;
    debug!(url, bytes = bytes.len(), "Fetched");
    Ok(bytes)
}

/// Appends the `cb` query parameter the live endpoint needs to bypass its CDN cache.
pub fn with_cache_buster(url: &str, now: DateTime<Utc>) -> String {
    let cb = now.timestamp_millis().rem_euclid(100_000_000);
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}cb={cb}")
}

/// Fetches `source` over HTTP when it looks like a URL, otherwise reads it
/// as a local file.
#[tracing::instrument(skip(client))]
pub async fn load_source<C: HttpClient>(client: &C, source: &str) -> Result<Bytes> {
    if source.starts_with("http") {
        fetch_bytes(client, source)
            .await
            .with_context(|| format!("fetching {source}"))
    } else {
        let bytes = tokio::fs::read(source)
            .await
            .with_context(|| format!("reading {source}"))?;
        Ok(Bytes::from(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct UnreachableClient;

    #[async_trait]
    impl HttpClient for UnreachableClient {
        async fn execute(&self, _req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            panic!("no request expected");
        }
    }

    #[test]
    fn test_cache_buster() {
        let now = Utc.timestamp_millis_opt(1_768_318_800_123).unwrap();

        assert_eq!(
            with_cache_buster("https://example.com/Data.json", now),
            "https://example.com/Data.json?cb=18800123"
        );
        assert_eq!(
            with_cache_buster("https://example.com/Data.json?v=2", now),
            "https://example.com/Data.json?v=2&cb=18800123"
        );
    }

    #[tokio::test]
    async fn test_load_source_reads_local_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"{\"speeds\": []}").unwrap();

        let bytes = load_source(&UnreachableClient, file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"{\"speeds\": []}");
    }

    #[tokio::test]
    async fn test_load_source_missing_file() {
        assert!(load_source(&UnreachableClient, "/nonexistent/payload.json")
            .await
            .is_err());
    }
}
