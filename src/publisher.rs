//! Ordered publication of a digest to a [`Channel`].
//!
//! Everything that can fail before talking to the channel (formatting,
//! country resolution) happens in [`Publication::prepare`]. Only once a
//! publication is fully built is the channel history purged and the new
//! content sent:
//!
//! 1. purge up to `purge_window` recent messages
//! 2. disclaimer (one message), then a scrape confirmation when the data is fresh
//! 3. per country: header, then data
//! 4. confirmation line
//! 5. per table group: title, description, image

use crate::channel::{Channel, ChannelError};
use crate::countries::UnknownCountry;
use crate::models::{Dataset, TableImage};
use crate::outputs::report::{CountryBlock, format_country_report, format_disclaimer};
use thiserror::Error;
use tracing::{info, instrument};

pub const SCRAPE_COMPLETE: &str = "> GISAID has been scraped. :white_check_mark:";
pub const REPORT_COMPLETE: &str = "> All countries parsed. :white_check_mark:";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("nothing to publish: no dataset loaded (run a scrape first)")]
    EmptyDataset,
    #[error("report formatting failed: {0}")]
    Format(#[from] UnknownCountry),
    #[error("sending to channel failed: {0}")]
    Channel(#[from] ChannelError),
}

/// A fully formatted digest, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub disclaimer: String,
    /// Announce that the dataset was scraped for this publication.
    pub fresh_scrape: bool,
    pub countries: Vec<CountryBlock>,
    pub tables: Vec<TableImage>,
}

/// Counts of what was sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub purged: usize,
    pub countries: usize,
    pub tables: usize,
}

impl Publication {
    /// Format `dataset` and attach the rendered `tables`.
    ///
    /// An empty dataset is refused rather than published as a bare disclaimer.
    pub fn prepare(dataset: &Dataset, tables: Vec<TableImage>) -> Result<Self, PublishError> {
        if dataset.is_empty() {
            return Err(PublishError::EmptyDataset);
        }
        Ok(Self {
            disclaimer: format_disclaimer().join("\n"),
            fresh_scrape: false,
            countries: format_country_report(dataset)?,
            tables,
        })
    }

    /// Mark the dataset as scraped just now.
    pub fn after_fresh_scrape(mut self) -> Self {
        self.fresh_scrape = true;
        self
    }
}

/// Purge recent history, then send the whole publication in order.
#[instrument(level = "info", skip_all, fields(countries = publication.countries.len(), tables = publication.tables.len(), purge_window))]
pub async fn publish<C: Channel>(
    channel: &C,
    publication: &Publication,
    purge_window: usize,
) -> Result<PublishSummary, PublishError> {
    let purged = channel.purge_recent(purge_window).await?;

    channel.send_text(&publication.disclaimer).await?;
    if publication.fresh_scrape {
        channel.send_text(SCRAPE_COMPLETE).await?;
    }
    for block in &publication.countries {
        channel.send_text(&block.header).await?;
        channel.send_text(&block.data).await?;
    }
    channel.send_text(REPORT_COMPLETE).await?;

    for table in &publication.tables {
        channel.send_text(&table.group_title).await?;
        channel.send_text(&table.group_description).await?;
        channel.send_image(&table.rendered_path).await?;
    }

    let summary = PublishSummary {
        purged,
        countries: publication.countries.len(),
        tables: publication.tables.len(),
    };
    info!(?summary, "Published digest");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::tests::{RecordingChannel, Sent};
    use crate::models::{CountryStat, Variant};
    use std::path::PathBuf;

    fn dataset() -> Dataset {
        let mut ds = Dataset::with_variants(vec![Variant::new("al", "Alpha variant"), Variant::new("be", "Beta variant")]);
        for (country, pct) in [("Peru", 62.3), ("Chile", 0.0), ("Japan", 4.0)] {
            ds.record(
                "al",
                CountryStat {
                    country: country.to_string(),
                    percentage: pct,
                    total_sequenced: 10,
                },
            );
        }
        ds
    }

    fn table(i: usize) -> TableImage {
        TableImage {
            source_html: "<table></table>".to_string(),
            group_title: format!("title {i}"),
            group_description: format!("description {i}"),
            rendered_path: PathBuf::from(format!("tables/table_{i}.png")),
        }
    }

    #[tokio::test]
    async fn test_publish_order() {
        let publication = Publication::prepare(&dataset(), vec![table(0)]).unwrap();
        let channel = RecordingChannel::default();
        let summary = publish(&channel, &publication, 50).await.unwrap();

        assert_eq!(summary.countries, 2);
        assert_eq!(summary.tables, 1);

        let sent = channel.sent();
        assert_eq!(sent[0], Sent::Purge(50));
        assert!(matches!(&sent[1], Sent::Text(t) if t.starts_with("**> DISCLAIMER**\n")));
        assert!(matches!(&sent[2], Sent::Text(t) if t.contains("Peru")));
        assert!(matches!(&sent[3], Sent::Text(t) if t.contains("Alpha: **62.3**")));
        assert!(matches!(&sent[4], Sent::Text(t) if t.contains("Japan")));
        assert_eq!(sent[6], Sent::Text(REPORT_COMPLETE.to_string()));
        assert_eq!(sent[7], Sent::Text("title 0".to_string()));
        assert_eq!(sent[8], Sent::Text("description 0".to_string()));
        assert_eq!(sent[9], Sent::Image("tables/table_0.png".to_string()));
        assert_eq!(sent.len(), 10);
    }

    #[tokio::test]
    async fn test_fresh_scrape_is_announced_after_disclaimer() {
        let publication = Publication::prepare(&dataset(), vec![]).unwrap().after_fresh_scrape();
        let channel = RecordingChannel::default();
        publish(&channel, &publication, 10).await.unwrap();

        let sent = channel.sent();
        assert!(matches!(&sent[1], Sent::Text(t) if t.starts_with("**> DISCLAIMER**")));
        assert_eq!(sent[2], Sent::Text(SCRAPE_COMPLETE.to_string()));
        assert!(matches!(&sent[3], Sent::Text(t) if t.contains("Peru")));
        assert_eq!(sent.last(), Some(&Sent::Text(REPORT_COMPLETE.to_string())));
    }

    #[tokio::test]
    async fn test_snapshot_publication_has_no_scrape_notice() {
        let publication = Publication::prepare(&dataset(), vec![]).unwrap();
        let channel = RecordingChannel::default();
        publish(&channel, &publication, 10).await.unwrap();
        assert!(!channel.sent().contains(&Sent::Text(SCRAPE_COMPLETE.to_string())));
    }

    #[test]
    fn test_empty_dataset_is_refused() {
        let err = Publication::prepare(&Dataset::default(), vec![]).unwrap_err();
        assert!(matches!(err, PublishError::EmptyDataset));
    }

    #[test]
    fn test_unknown_country_fails_before_sending() {
        let mut ds = dataset();
        ds.record(
            "be",
            CountryStat {
                country: "Atlantis".to_string(),
                percentage: 5.0,
                total_sequenced: 1,
            },
        );
        assert!(matches!(
            Publication::prepare(&ds, vec![]),
            Err(PublishError::Format(_))
        ));
    }

    #[tokio::test]
    async fn test_channel_failure_stops_publication() {
        let publication = Publication::prepare(&dataset(), vec![]).unwrap();
        let channel = RecordingChannel {
            fail_at: Some(2),
            ..RecordingChannel::default()
        };
        let err = publish(&channel, &publication, 10).await.unwrap_err();
        assert!(matches!(err, PublishError::Channel(_)));
        assert_eq!(channel.sent().len(), 2);
    }
}
