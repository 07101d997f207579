//! The scrape → store → render → publish cycle and the task that repeats it.
//!
//! A single task drives everything: a publication only ever follows a scrape
//! that succeeded in the same tick. When a scrape fails the previous dataset
//! stays current and nothing is sent for that tick.

use crate::channel::Channel;
use crate::config::Settings;
use crate::models::{Dataset, TableImage};
use crate::outputs::render::{HtmlRenderer, RenderError};
use crate::outputs::tables::format_table_groups;
use crate::publisher::{PublishError, PublishSummary, Publication, publish};
use crate::scrapers::fetch::{Endpoints, Fetch, FetchError, Upstream};
use crate::scrapers::{ScrapeError, scrape_dataset, scrape_tables};
use crate::store::SnapshotStore;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, instrument, warn};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("scrape failed: {0}")]
    Scrape(#[source] ScrapeError),
    #[error("table extraction failed: {0}")]
    Tables(#[source] ScrapeError),
    #[error("table rendering failed: {0}")]
    Render(#[from] RenderError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Shared pointer to the current [`Dataset`].
///
/// Readers get an `Arc` to an immutable dataset; a new scrape replaces the
/// pointer wholesale so a reader never sees a half-updated dataset.
#[derive(Debug, Clone, Default)]
pub struct DatasetHandle {
    inner: Arc<RwLock<Option<Arc<Dataset>>>>,
}

impl DatasetHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current(&self) -> Option<Arc<Dataset>> {
        self.inner.read().await.clone()
    }

    /// Install `dataset` as current and return it.
    pub async fn replace(&self, dataset: Dataset) -> Arc<Dataset> {
        let dataset = Arc::new(dataset);
        *self.inner.write().await = Some(Arc::clone(&dataset));
        dataset
    }

    /// Fill an empty handle from the snapshot. Returns whether a dataset is now loaded.
    pub async fn seed_from(&self, store: &SnapshotStore) -> bool {
        if self.current().await.is_some() {
            return true;
        }
        let dataset = store.load_or_empty().await;
        if dataset.is_empty() {
            return false;
        }
        self.replace(dataset).await;
        true
    }
}

/// Everything one cycle needs besides the channel.
#[derive(Debug)]
pub struct Pipeline<F, R> {
    upstream: Upstream<F>,
    renderer: R,
    store: SnapshotStore,
    table_class: String,
    image_dir: PathBuf,
    crop_images: bool,
    purge_window: usize,
}

impl<F: Fetch, R: HtmlRenderer> Pipeline<F, R> {
    pub fn from_settings(settings: &Settings, fetcher: F, renderer: R) -> Result<Self, FetchError> {
        Ok(Self {
            upstream: Upstream::new(fetcher, Endpoints::from_settings(settings)?),
            renderer,
            store: SnapshotStore::new(settings.snapshot_path.clone()),
            table_class: settings.table_class.clone(),
            image_dir: settings.image_dir.clone(),
            crop_images: settings.crop_images,
            purge_window: settings.purge_window,
        })
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Scrape a fresh dataset, make it current and persist it.
    ///
    /// A failed save is logged but does not undo the swap: the in-memory
    /// dataset is newer than anything on disk either way.
    #[instrument(level = "info", skip_all)]
    pub async fn refresh(&self, handle: &DatasetHandle) -> Result<Arc<Dataset>, CycleError> {
        let dataset = scrape_dataset(&self.upstream).await.map_err(CycleError::Scrape)?;
        let dataset = handle.replace(dataset).await;
        if let Err(e) = self.store.save(&dataset).await {
            error!(error = %e, "Scrape succeeded but the snapshot could not be saved");
        }
        Ok(dataset)
    }

    /// Fetch the agency page and render its classification tables.
    #[instrument(level = "info", skip_all)]
    pub async fn render_tables(&self) -> Result<Vec<TableImage>, CycleError> {
        let tables = scrape_tables(&self.upstream, &self.table_class)
            .await
            .map_err(CycleError::Tables)?;
        Ok(format_table_groups(&tables, &self.renderer, &self.image_dir, self.crop_images).await?)
    }

    /// Render tables, build the publication for `dataset` and send it.
    ///
    /// `fresh_scrape` adds the scrape confirmation after the disclaimer.
    pub async fn publish_dataset<C: Channel>(
        &self,
        dataset: &Dataset,
        fresh_scrape: bool,
        channel: &C,
    ) -> Result<PublishSummary, CycleError> {
        let tables = self.render_tables().await?;
        let mut publication = Publication::prepare(dataset, tables)?;
        if fresh_scrape {
            publication = publication.after_fresh_scrape();
        }
        Ok(publish(channel, &publication, self.purge_window).await?)
    }

    /// One full tick: refresh, then publish what was just scraped.
    #[instrument(level = "info", skip_all)]
    pub async fn run_cycle<C: Channel>(
        &self,
        handle: &DatasetHandle,
        channel: &C,
    ) -> Result<PublishSummary, CycleError> {
        let dataset = self.refresh(handle).await?;
        self.publish_dataset(&dataset, true, channel).await
    }

    /// Run [`Self::run_cycle`] every `period` until `shutdown` resolves.
    ///
    /// The first tick fires immediately. A failed cycle is logged and the
    /// loop waits for the next tick. Every tick publishes only what it scraped
    /// itself, so the stored snapshot is never republished from here. Returns
    /// the number of cycles started.
    #[instrument(level = "info", skip_all, fields(period = ?period))]
    pub async fn run_forever<C, S>(
        &self,
        handle: &DatasetHandle,
        channel: &C,
        period: Duration,
        shutdown: S,
    ) -> usize
    where
        C: Channel,
        S: Future<Output = ()>,
    {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut cycles = 0usize;
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(cycles, "Shutdown requested; stopping scheduler");
                    return cycles;
                }
                _ = ticker.tick() => {
                    cycles += 1;
                    match self.run_cycle(handle, channel).await {
                        Ok(summary) => info!(cycle = cycles, ?summary, "Cycle complete"),
                        Err(CycleError::Scrape(e)) => {
                            warn!(cycle = cycles, stage = e.stage(), error = %e, "Scrape failed; keeping previous dataset and skipping publication");
                        }
                        Err(e) => error!(cycle = cycles, error = %e, "Cycle failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::tests::{RecordingChannel, Sent};
    use crate::models::{CountryStat, Variant};
    use crate::outputs::render::tests::PaintRenderer;
    use crate::publisher::SCRAPE_COMPLETE;
    use crate::scrapers::fetch::tests::{StaticFetch, test_endpoints};
    use tempfile::TempDir;

    const CONFIG: &str = r#"{"tooltipName": {"al": "Alpha variant", "be": "Beta variant"}}"#;
    const AL: &str = r#"[{"country": "Peru", "percvui_last4wks": 62.3, "numcountrytotal_last4wks": 120}]"#;
    const BE: &str = r#"[{"country": "Japan", "percvui_last4wks": "4.0", "numcountrytotal_last4wks": 9}]"#;
    const PAGE: &str = r#"<html><body>
        <table class="table table-striped"><tr><td>a</td></tr></table>
        <table class="table"><tr><td>b</td></tr></table>
    </body></html>"#;

    fn full_fetch() -> StaticFetch {
        StaticFetch::default()
            .with("https://data.test/config.json", CONFIG)
            .with("https://data.test/countryCount_al.json", AL)
            .with("https://data.test/countryCount_be.json", BE)
            .with("https://agency.test/variants", PAGE)
    }

    fn pipeline(fetch: StaticFetch, dir: &TempDir) -> Pipeline<StaticFetch, PaintRenderer> {
        Pipeline {
            upstream: Upstream::new(fetch, test_endpoints()),
            renderer: PaintRenderer::default(),
            store: SnapshotStore::new(dir.path().join("snapshot.json")),
            table_class: "table".to_string(),
            image_dir: dir.path().join("tables"),
            crop_images: true,
            purge_window: 100,
        }
    }

    fn previous() -> Dataset {
        let mut ds = Dataset::with_variants(vec![Variant::new("old", "Old variant")]);
        ds.record(
            "old",
            CountryStat {
                country: "Chile".to_string(),
                percentage: 80.0,
                total_sequenced: 3,
            },
        );
        ds
    }

    #[tokio::test]
    async fn test_cycle_scrapes_saves_and_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(full_fetch(), &dir);
        let handle = DatasetHandle::new();
        let channel = RecordingChannel::default();

        let summary = pipeline.run_cycle(&handle, &channel).await.unwrap();
        assert_eq!(summary.countries, 2);
        assert_eq!(summary.tables, 2);

        let current = handle.current().await.unwrap();
        assert_eq!(current.percentage("be", "Japan"), 4.0);

        let saved = pipeline.store().load().await.unwrap();
        assert_eq!(saved.variants, current.variants);
        assert_eq!(saved.stats, current.stats);

        let sent = channel.sent();
        assert_eq!(sent[0], Sent::Purge(100));
        assert_eq!(sent[2], Sent::Text(SCRAPE_COMPLETE.to_string()));
        assert!(matches!(sent.last(), Some(Sent::Image(p)) if p.ends_with("table_1.png")));
    }

    #[tokio::test]
    async fn test_failed_scrape_keeps_previous_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let fetch = StaticFetch::default()
            .with("https://data.test/config.json", CONFIG)
            .with("https://data.test/countryCount_al.json", AL);
        let pipeline = pipeline(fetch, &dir);
        let handle = DatasetHandle::new();
        handle.replace(previous()).await;
        let channel = RecordingChannel::default();

        let err = pipeline.run_cycle(&handle, &channel).await.unwrap_err();
        assert!(matches!(err, CycleError::Scrape(_)));
        assert_eq!(*handle.current().await.unwrap(), previous());
        assert!(channel.sent().is_empty());
        assert!(!pipeline.store().path().exists());
    }

    #[tokio::test]
    async fn test_missing_tables_publish_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let fetch = full_fetch().with("https://agency.test/variants", "<html><p>moved</p></html>");
        let pipeline = pipeline(fetch, &dir);
        let handle = DatasetHandle::new();
        let channel = RecordingChannel::default();

        let err = pipeline.run_cycle(&handle, &channel).await.unwrap_err();
        assert!(matches!(err, CycleError::Tables(ScrapeError::NoTables { .. })));
        assert!(channel.sent().is_empty());
        // The scrape itself succeeded and stays current.
        assert!(handle.current().await.is_some());
    }

    #[tokio::test]
    async fn test_seed_from_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshot.json"));
        let handle = DatasetHandle::new();
        assert!(!handle.seed_from(&store).await);

        store.save(&previous()).await.unwrap();
        assert!(handle.seed_from(&store).await);
        assert_eq!(handle.current().await.unwrap().variants, previous().variants);
    }

    #[tokio::test]
    async fn test_run_forever_first_tick_is_immediate() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(full_fetch(), &dir);
        let handle = DatasetHandle::new();
        let channel = RecordingChannel::default();

        let shutdown = tokio::time::sleep(Duration::from_millis(200));
        let cycles = pipeline
            .run_forever(&handle, &channel, Duration::from_secs(3600), shutdown)
            .await;

        assert_eq!(cycles, 1);
        assert!(!channel.sent().is_empty());
    }

    #[tokio::test]
    async fn test_run_forever_never_republishes_old_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let fetch = StaticFetch::default().with("https://agency.test/variants", PAGE);
        let pipeline = pipeline(fetch, &dir);
        pipeline.store().save(&previous()).await.unwrap();
        let handle = DatasetHandle::new();
        let channel = RecordingChannel::default();

        let shutdown = tokio::time::sleep(Duration::from_millis(200));
        let cycles = pipeline
            .run_forever(&handle, &channel, Duration::from_secs(3600), shutdown)
            .await;

        assert_eq!(cycles, 1);
        assert!(channel.sent().is_empty());
        assert!(handle.current().await.is_none());
        assert_eq!(pipeline.store().load().await.unwrap(), previous());
    }
}
