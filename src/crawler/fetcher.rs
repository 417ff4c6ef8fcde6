//! HTTP fetcher
//!
//! Owns the HTTP client and everything request-shaped: user agent,
//! per-language Accept-Language headers, timeouts, and a bounded retry on
//! transient failures. Fetch failures are returned to the caller, which
//! treats them as empty pages; a bad page degrades coverage, it never
//! aborts a crawl.

use crate::item::Lang;
use crate::site::PageRequest;
use reqwest::{redirect::Policy, Client, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// Browser-shaped user agent sent with every request
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_14_6) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/80.0.3987.149 Safari/537.36";

/// Per-request timeout
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection establishment timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total attempts per page (one retry on transient failure)
const MAX_ATTEMPTS: u32 = 2;

/// Delay between retry attempts
const RETRY_DELAY: Duration = Duration::from_millis(300);

/// A failed page fetch
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: StatusCode },

    #[error("Request failed for {url}: {source}")]
    Transport {
        url: String,
        source: reqwest::Error,
    },
}

/// HTTP fetcher for category pages
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    /// Builds a fetcher with the crawler's client configuration
    ///
    /// Redirects are not followed: a category URL that redirects is treated
    /// as a miss rather than silently crawling somewhere else.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(FETCH_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .redirect(Policy::none())
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Fetcher { client })
    }

    /// Fetches one page and returns its text
    ///
    /// Transient failures (transport errors, 5xx responses) are retried
    /// once after a short delay. Any other non-success status fails
    /// immediately.
    ///
    /// # Arguments
    ///
    /// * `request` - The page URL and query parameters
    /// * `lang` - Language dimension, used for the Accept-Language header
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The page body
    /// * `Err(FetchError)` - The fetch failed after retries
    pub async fn fetch(&self, request: &PageRequest, lang: Lang) -> Result<String, FetchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::debug!(
                "Fetch URL={} params={:?} attempt={}",
                request.url,
                request.params,
                attempt
            );

            match self.fetch_once(request, lang).await {
                Ok(body) => return Ok(body),
                Err(e) if attempt < MAX_ATTEMPTS && is_transient(&e) => {
                    tracing::debug!("Transient fetch failure for {}: {}", request.url, e);
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, request: &PageRequest, lang: Lang) -> Result<String, FetchError> {
        let response = self
            .client
            .get(&request.url)
            .query(&request.params)
            .header("Accept-Language", accept_language(lang))
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: request.url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: request.url.clone(),
                status,
            });
        }

        response.text().await.map_err(|source| FetchError::Transport {
            url: request.url.clone(),
            source,
        })
    }
}

fn is_transient(error: &FetchError) -> bool {
    match error {
        FetchError::Status { status, .. } => status.is_server_error(),
        FetchError::Transport { source, .. } => source.is_timeout() || source.is_connect(),
    }
}

/// Accept-Language header value for a crawl language
fn accept_language(lang: Lang) -> String {
    match lang {
        Lang::En => "en-GB,en;q=0.9,en-US;q=0.8".to_string(),
        Lang::Fr => "fr-FR;q=0.9,fr;q=0.8".to_string(),
        other => format!("{0};q=0.9", other.code()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{headers, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn page_request(url: String, params: Vec<(String, String)>) -> PageRequest {
        PageRequest { url, params }
    }

    #[test]
    fn test_accept_language_mapping() {
        assert_eq!(accept_language(Lang::En), "en-GB,en;q=0.9,en-US;q=0.8");
        assert_eq!(accept_language(Lang::De), "de;q=0.9");
    }

    #[tokio::test]
    async fn test_fetch_success_with_params() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cat/a/"))
            .and(query_param("brand", "42"))
            .and(headers("Accept-Language", vec!["fr-FR;q=0.9", "fr;q=0.8"]))
            .respond_with(ResponseTemplate::new(200).set_body_string("listing"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new().unwrap();
        let request = page_request(
            format!("{}/cat/a/", server.uri()),
            vec![("brand".to_string(), "42".to_string())],
        );

        let body = fetcher.fetch(&request, Lang::Fr).await.unwrap();
        assert_eq!(body, "listing");
    }

    #[tokio::test]
    async fn test_fetch_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cat/missing/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new().unwrap();
        let request = page_request(format!("{}/cat/missing/", server.uri()), vec![]);

        let result = fetcher.fetch(&request, Lang::En).await;
        assert!(matches!(
            result,
            Err(FetchError::Status { status, .. }) if status == StatusCode::NOT_FOUND
        ));
    }

    #[tokio::test]
    async fn test_fetch_retries_server_errors() {
        let server = MockServer::start().await;
        // First attempt hits the 500, the retry consumes the 200
        Mock::given(method("GET"))
            .and(path("/cat/flaky/"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/cat/flaky/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new().unwrap();
        let request = page_request(format!("{}/cat/flaky/", server.uri()), vec![]);

        let body = fetcher.fetch(&request, Lang::En).await.unwrap();
        assert_eq!(body, "recovered");
    }
}
