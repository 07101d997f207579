//! Upstream sources and the scrape stages built on them.
//!
//! # Sources
//!
//! | Source | Module | Method | Notes |
//! |--------|--------|--------|-------|
//! | Mutation tracker config | [`gisaid`] | JSON decode, pattern fallback | Lists tracked variants |
//! | Mutation tracker counts | [`gisaid`] | JSON decode | One file per variant code |
//! | Agency variants page | [`ecdc`] | HTML tree query | One table per classification group |
//!
//! Both stages are strictly sequential and fail fast: the first empty body or
//! missing structure aborts the run, and nothing partial is handed back.

pub mod ecdc;
pub mod fetch;
pub mod gisaid;

use crate::models::Dataset;
use chrono::Utc;
use fetch::{Fetch, FetchError, Upstream};
use futures::stream::{self, StreamExt, TryStreamExt};
use gisaid::ExtractError;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// A scrape failure, tagged with the stage and source it happened in.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("fetching variant config failed: {0}")]
    ConfigFetch(#[source] FetchError),
    #[error("reading variant config failed: {0}")]
    ConfigExtract(#[source] ExtractError),
    #[error("fetching counts for variant `{variant}` failed: {source}")]
    CountsFetch { variant: String, source: FetchError },
    #[error("reading counts for variant `{variant}` failed: {source}")]
    CountsExtract { variant: String, source: ExtractError },
    #[error("fetching variants page failed: {0}")]
    PageFetch(#[source] FetchError),
    #[error("no table with class containing `{class_predicate}` on {url}")]
    NoTables { class_predicate: String, url: String },
}

impl ScrapeError {
    /// Short stage name for structured logs.
    pub fn stage(&self) -> &'static str {
        match self {
            ScrapeError::ConfigFetch(_) | ScrapeError::ConfigExtract(_) => "config",
            ScrapeError::CountsFetch { .. } | ScrapeError::CountsExtract { .. } => "counts",
            ScrapeError::PageFetch(_) | ScrapeError::NoTables { .. } => "tables",
        }
    }
}

/// Fetch the config, then every variant's counts, and assemble a [`Dataset`].
///
/// All variants are fetched before any is parsed. The first failure aborts the
/// whole run.
#[instrument(level = "info", skip_all)]
pub async fn scrape_dataset<F: Fetch>(upstream: &Upstream<F>) -> Result<Dataset, ScrapeError> {
    let config_text = upstream.fetch_config().await.map_err(ScrapeError::ConfigFetch)?;
    let variants = gisaid::extract_variants(&config_text).map_err(ScrapeError::ConfigExtract)?;
    let mut dataset = Dataset::with_variants(variants);

    let bodies: Vec<(usize, String)> = stream::iter(dataset.variants.iter().enumerate())
        .then(move |(i, variant)| async move {
            let body = upstream
                .fetch_variant_counts(&variant.code)
                .await
                .map_err(|source| ScrapeError::CountsFetch {
                    variant: variant.code.clone(),
                    source,
                })?;
            debug!(variant = %variant.code, bytes = body.len(), "Fetched country counts");
            Ok::<_, ScrapeError>((i, body))
        })
        .try_collect()
        .await?;

    for (i, body) in bodies {
        let variant = dataset.variants[i].clone();
        let stats = gisaid::extract_country_stats(&variant, &body).map_err(|source| ScrapeError::CountsExtract {
            variant: variant.code.clone(),
            source,
        })?;
        for stat in stats {
            dataset.record(&variant.code, stat);
        }
    }

    dataset.scraped_at = Some(Utc::now());
    info!(
        variants = dataset.variants.len(),
        countries = dataset.countries.len(),
        "Scrape complete"
    );
    Ok(dataset)
}

/// Fetch the agency page and extract the classification tables.
///
/// A page with no matching table is treated like an empty body.
#[instrument(level = "info", skip_all, fields(class_predicate = %class_predicate))]
pub async fn scrape_tables<F: Fetch>(upstream: &Upstream<F>, class_predicate: &str) -> Result<Vec<String>, ScrapeError> {
    let page = upstream.fetch_html_page().await.map_err(ScrapeError::PageFetch)?;
    let tables = ecdc::extract_tables(&page, class_predicate);
    if tables.is_empty() {
        return Err(ScrapeError::NoTables {
            class_predicate: class_predicate.to_string(),
            url: upstream.endpoints().variants_page.to_string(),
        });
    }
    Ok(tables)
}
