//! Outbound HTTP for the three upstream sources.
//!
//! Every request is a single GET with no retry and no rate limiting. An empty
//! body is fatal for the caller: the scrape pipeline aborts as a whole rather
//! than committing a partial dataset.

use crate::config::{CODE_PLACEHOLDER, Settings};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};
use url::Url;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("request to {url} failed: {source}")]
    Request { url: String, source: reqwest::Error },
    #[error("{url} answered with HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("{url} returned an empty body")]
    UpstreamEmpty { url: String },
}

/// Transport seam used by [`Upstream`].
///
/// Implementations return the body as-is; emptiness is judged by the caller.
pub trait Fetch {
    async fn get_text(&self, url: &Url) -> Result<String, FetchError>;
    async fn get_bytes(&self, url: &Url) -> Result<Vec<u8>, FetchError>;
}

/// [`Fetch`] over a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Build a client. `timeout` of `None` leaves the transport default in place.
    pub fn new(timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    async fn get(&self, url: &Url) -> Result<reqwest::Response, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(response)
    }
}

impl Fetch for HttpFetcher {
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn get_text(&self, url: &Url) -> Result<String, FetchError> {
        let body = self
            .get(url)
            .await?
            .text()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;
        debug!(bytes = body.len(), "Fetched text body");
        Ok(body)
    }

    #[instrument(level = "info", skip_all, fields(%url))]
    async fn get_bytes(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let body = self
            .get(url)
            .await?
            .bytes()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;
        debug!(bytes = body.len(), "Fetched binary body");
        Ok(body.to_vec())
    }
}

/// Resolved upstream endpoints.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub config: Url,
    /// Per-variant template; `{code}` is substituted at request time.
    pub country_count_template: String,
    pub variants_page: Url,
}

impl Endpoints {
    pub fn from_settings(settings: &Settings) -> Result<Self, FetchError> {
        Ok(Self {
            config: parse_url(&settings.config_url)?,
            country_count_template: settings.country_count_url.clone(),
            variants_page: parse_url(&settings.variants_page_url)?,
        })
    }

    /// The count endpoint for one variant code.
    pub fn country_count(&self, code: &str) -> Result<Url, FetchError> {
        parse_url(&self.country_count_template.replace(CODE_PLACEHOLDER, code))
    }
}

fn parse_url(raw: &str) -> Result<Url, FetchError> {
    Url::parse(raw).map_err(|source| FetchError::InvalidUrl {
        url: raw.to_string(),
        source,
    })
}

/// The three upstream sources behind one [`Fetch`] implementation.
#[derive(Debug, Clone)]
pub struct Upstream<F> {
    fetcher: F,
    endpoints: Endpoints,
}

impl<F: Fetch> Upstream<F> {
    pub fn new(fetcher: F, endpoints: Endpoints) -> Self {
        Self { fetcher, endpoints }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    #[cfg(test)]
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Fetch the variant configuration JSON as text.
    pub async fn fetch_config(&self) -> Result<String, FetchError> {
        let url = &self.endpoints.config;
        let body = self.fetcher.get_text(url).await?;
        non_empty_text(url, body)
    }

    /// Fetch the country count JSON for one variant code.
    pub async fn fetch_variant_counts(&self, code: &str) -> Result<String, FetchError> {
        let url = self.endpoints.country_count(code)?;
        let body = self.fetcher.get_text(&url).await?;
        non_empty_text(&url, body)
    }

    /// Fetch the agency page holding the classification tables.
    pub async fn fetch_html_page(&self) -> Result<Vec<u8>, FetchError> {
        let url = &self.endpoints.variants_page;
        let body = self.fetcher.get_bytes(url).await?;
        if body.is_empty() {
            return Err(FetchError::UpstreamEmpty {
                url: url.to_string(),
            });
        }
        info!(%url, bytes = body.len(), "Fetched variants page");
        Ok(body)
    }
}

fn non_empty_text(url: &Url, body: String) -> Result<String, FetchError> {
    if body.trim().is_empty() {
        return Err(FetchError::UpstreamEmpty {
            url: url.to_string(),
        });
    }
    Ok(body)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory [`Fetch`] keyed by full URL; unknown URLs answer with an empty body.
    #[derive(Debug, Default)]
    pub(crate) struct StaticFetch {
        pub(crate) bodies: HashMap<String, String>,
        pub(crate) requested: Mutex<Vec<String>>,
    }

    impl StaticFetch {
        pub(crate) fn with(mut self, url: &str, body: &str) -> Self {
            self.bodies.insert(url.to_string(), body.to_string());
            self
        }

        pub(crate) fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    impl Fetch for StaticFetch {
        async fn get_text(&self, url: &Url) -> Result<String, FetchError> {
            self.requested.lock().unwrap().push(url.to_string());
            Ok(self.bodies.get(url.as_str()).cloned().unwrap_or_default())
        }

        async fn get_bytes(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
            self.get_text(url).await.map(String::into_bytes)
        }
    }

    pub(crate) fn test_endpoints() -> Endpoints {
        Endpoints {
            config: Url::parse("https://data.test/config.json").unwrap(),
            country_count_template: "https://data.test/countryCount_{code}.json".to_string(),
            variants_page: Url::parse("https://agency.test/variants").unwrap(),
        }
    }

    #[test]
    fn test_country_count_substitutes_code() {
        let url = test_endpoints().country_count("al").unwrap();
        assert_eq!(url.as_str(), "https://data.test/countryCount_al.json");
    }

    #[test]
    fn test_endpoints_from_default_settings() {
        let endpoints = Endpoints::from_settings(&Settings::default()).unwrap();
        assert!(endpoints.config.as_str().ends_with("config.json"));
        assert!(
            endpoints
                .country_count("de")
                .unwrap()
                .as_str()
                .ends_with("countryCount_de.json")
        );
    }

    #[tokio::test]
    async fn test_empty_body_is_upstream_empty() {
        let upstream = Upstream::new(StaticFetch::default(), test_endpoints());
        let err = upstream.fetch_config().await.unwrap_err();
        assert!(matches!(err, FetchError::UpstreamEmpty { ref url } if url.ends_with("config.json")));

        let err = upstream.fetch_html_page().await.unwrap_err();
        assert!(matches!(err, FetchError::UpstreamEmpty { .. }));
    }

    #[tokio::test]
    async fn test_fetch_variant_counts_hits_templated_url() {
        let fetch = StaticFetch::default().with("https://data.test/countryCount_be.json", "[]");
        let upstream = Upstream::new(fetch, test_endpoints());
        assert_eq!(upstream.fetch_variant_counts("be").await.unwrap(), "[]");
    }
}
