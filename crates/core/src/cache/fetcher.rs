//! # Fetcher
//!
//! The network side of the cache manager. `HttpFetcher` goes out over `reqwest`;
//! tests substitute their own implementation to simulate online/offline.

use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, PRAGMA};

use super::request::{CacheMode, CachedResponse, FetchRequest};
use crate::error::CacheError;

/// Performs network requests
///
/// Any HTTP status is a successful fetch; only transport failures are errors.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<CachedResponse, CacheError>;
}

/// `reqwest`-backed fetcher
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("harbor/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<CachedResponse, CacheError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        if request.cache_mode == CacheMode::Reload {
            builder = builder
                .header(CACHE_CONTROL, "no-cache")
                .header(PRAGMA, "no-cache");
        }

        let fetch_error = |e: reqwest::Error| CacheError::Fetch {
            url: request.url.to_string(),
            message: e.to_string(),
        };

        let response = builder.send().await.map_err(fetch_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(fetch_error)?.to_vec();

        tracing::trace!(url = %request.url, status, "Fetched");

        Ok(CachedResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn local_fetcher() -> HttpFetcher {
        HttpFetcher::with_client(reqwest::Client::builder().no_proxy().build().unwrap())
    }

    /// Answers one connection with `status` and returns the raw request head
    async fn serve_once(status: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/lib/immutable/app.js", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: text/plain\r\ncontent-length: 4\r\nconnection: close\r\n\r\nbody",
                status
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&head).to_lowercase()
        });
        (url, handle)
    }

    #[tokio::test]
    async fn test_error_status_is_a_successful_fetch() {
        let (url, server) = serve_once("503 Service Unavailable").await;
        let fetcher = local_fetcher();

        let response = fetcher.fetch(&FetchRequest::parse(&url).unwrap()).await.unwrap();

        assert_eq!(response.status, 503);
        assert_eq!(response.body, b"body");
        assert_eq!(response.header("content-type"), Some("text/plain"));
        assert!(!server.await.unwrap().contains("cache-control"));
    }

    #[tokio::test]
    async fn test_reload_bypasses_http_caches() {
        let (url, server) = serve_once("200 OK").await;
        let fetcher = local_fetcher();
        let request = FetchRequest::parse(&url)
            .unwrap()
            .with_cache_mode(CacheMode::Reload);

        assert!(fetcher.fetch(&request).await.unwrap().ok());

        let head = server.await.unwrap();
        assert!(head.contains("cache-control: no-cache"));
        assert!(head.contains("pragma: no-cache"));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_a_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = local_fetcher()
            .fetch(&FetchRequest::parse(&format!("http://{}/", addr)).unwrap())
            .await
            .unwrap_err();
        assert!(err.is_network());
    }
}
