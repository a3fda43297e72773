//! HTTP fetch collaborator.
//!
//! The worker only sees the `Fetcher` trait; `HttpFetcher` is the reqwest
//! implementation used by the binary. Tests plug in their own fetchers.

use std::time::Duration;

use reqwest::Client;

use crate::error::FetchError;

/// Raw outcome of one fetch: status and body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchedPage {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Retrieves pages for the worker.
///
/// CONTRACT:
/// - A non-success status is NOT an error at this level; the worker
///   decides what to do with it.
/// - `Err` is reserved for requests that never produced a response.
///
/// THREAD SAFETY:
/// - Must be Send + Sync
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, link: &str) -> Result<FetchedPage, FetchError>;
}

/// reqwest-backed fetcher with a fixed timeout and user agent.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, link: &str) -> Result<FetchedPage, FetchError> {
        log::debug!("GET {}", link);

        let response = self.client.get(link).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;

        log::debug!("GET {} -> {} ({} bytes)", link, status, body.len());
        Ok(FetchedPage::new(status, body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn success_range() {
        assert!(FetchedPage::new(200, "").is_success());
        assert!(FetchedPage::new(204, "").is_success());
        assert!(!FetchedPage::new(301, "").is_success());
        assert!(!FetchedPage::new(503, "").is_success());
    }

    #[tokio::test]
    async fn http_fetcher_returns_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/x"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new("test-agent", Duration::from_secs(5)).unwrap();

        let page = fetcher.fetch(&format!("{}/user/x", server.uri())).await.unwrap();
        assert_eq!(page.status, 200);
        assert_eq!(page.body, b"hello");

        let missing = fetcher.fetch(&format!("{}/gone", server.uri())).await.unwrap();
        assert_eq!(missing.status, 404);
        assert!(!missing.is_success());
    }

    #[tokio::test]
    async fn unreachable_host_is_an_error() {
        let fetcher = HttpFetcher::new("test-agent", Duration::from_secs(2)).unwrap();
        let result = fetcher.fetch("http://127.0.0.1:9/").await;
        assert!(matches!(result, Err(FetchError::Http(_))));
    }
}
