//! Remaining-quantity extraction for deal pages
//!
//! Fetches a deal's detail page and pulls the "N vouchers left" figure out of
//! its visible text. Every failure (network, timeout, bad status, no match)
//! collapses to `None` so one bad page never stops a refresh cycle.

use std::sync::OnceLock;
use std::time::Duration;

use futures::future::BoxFuture;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION};
use reqwest::Client;
use scraper::{Html, Node};
use thiserror::Error;
use tracing::{error, info, warn};

use super::DealDefinition;

/// Default timeout for a single page fetch
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// User agent sent with every page fetch; the rewards site rejects obvious bots
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Elements whose text is never shown to a visitor
const HIDDEN_ELEMENTS: [&str; 3] = ["script", "style", "template"];

/// Errors that can occur when fetching a deal page
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Request did not complete within the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Server answered with a non-success status
    #[error("Unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },
}

/// Configuration for the page fetcher
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Per-request timeout
    pub timeout: Duration,
    /// User-Agent header value
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_FETCH_TIMEOUT,
            user_agent: BROWSER_USER_AGENT.to_string(),
        }
    }
}

/// Retrieves the raw text of a remote document
pub trait DocumentFetcher: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, FetchError>>;
}

/// Produces the remaining quantity for a deal, or `None` if it cannot be determined
pub trait QuantitySource: Send + Sync {
    fn quantity<'a>(&'a self, deal: &'a DealDefinition) -> BoxFuture<'a, Option<u64>>;
}

/// Page fetcher backed by reqwest with browser-like headers
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Creates a fetcher with the given timeout and user agent
    pub fn new(config: &FetcherConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            timeout: config.timeout,
        })
    }

    async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response.text().await.map_err(|e| self.classify(e))
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::RequestFailed(err)
        }
    }
}

impl DocumentFetcher for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, FetchError>> {
        Box::pin(self.get_text(url))
    }
}

/// Extracts the remaining voucher count from deal pages
#[derive(Debug, Clone)]
pub struct QuantityExtractor<F = HttpFetcher> {
    fetcher: F,
}

impl<F: DocumentFetcher> QuantityExtractor<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }

    /// Fetches `url` and returns the first "N vouchers left" figure on the page
    ///
    /// Never fails: fetch errors and pages without a match both yield `None`.
    pub async fn extract(&self, url: &str, deal_id: &str) -> Option<u64> {
        info!(deal_id, url, "Fetching deal page");
        let body = match self.fetcher.fetch(url).await {
            Ok(body) => body,
            Err(e) => {
                error!(deal_id, error = %e, "Error fetching deal page");
                return None;
            }
        };

        match find_quantity(&visible_text(&body)) {
            Some(quantity) => {
                info!(deal_id, quantity, "Found remaining vouchers");
                Some(quantity)
            }
            None => {
                warn!(deal_id, "Could not parse quantity");
                None
            }
        }
    }
}

impl<F: DocumentFetcher> QuantitySource for QuantityExtractor<F> {
    fn quantity<'a>(&'a self, deal: &'a DealDefinition) -> BoxFuture<'a, Option<u64>> {
        Box::pin(self.extract(&deal.url, &deal.id))
    }
}

/// Concatenates every text node of an HTML document outside script, style and
/// template blocks
pub fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut text = String::new();

    for node in document.tree.root().descendants() {
        let Node::Text(fragment) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|element| HIDDEN_ELEMENTS.contains(&element.name()))
        });
        if !hidden {
            text.push_str(fragment);
        }
    }

    text
}

/// Returns the count from the first "N voucher(s) left" phrase, case-insensitive
pub fn find_quantity(text: &str) -> Option<u64> {
    let captures = quantity_pattern().captures(text)?;
    captures.get(1)?.as_str().parse().ok()
}

fn quantity_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(\d+)\s+vouchers?\s+left").expect("valid quantity pattern")
    })
}
