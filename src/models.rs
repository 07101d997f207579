//! Data models for scraped variant statistics and extracted tables.
//!
//! This module defines the core data structures used throughout the application:
//! - [`Variant`]: A tracked lineage as advertised by the upstream config
//! - [`CountryStat`]: One `(variant, country)` share read from a count file
//! - [`CountryTotal`]: The 4-week submission total for a single country
//! - [`Dataset`]: The root aggregate built by one scrape and persisted as a snapshot
//! - [`TableImage`]: An extracted classification table paired with its group text
//!
//! A [`Dataset`] is always rebuilt wholesale. Partial datasets are never
//! committed: the scrape pipeline only hands one out once every source has
//! been read.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A named genomic lineage tracked by the upstream data.
///
/// # Fields
///
/// * `code` - Short machine key used in source URLs (`countryCount_{code}.json`)
/// * `label` - Display name; its first whitespace-delimited token is used as
///   the column header in reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    /// Short machine key, unique within a scrape.
    pub code: String,
    /// Human readable display name.
    pub label: String,
}

impl Variant {
    pub fn new(code: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            label: label.into(),
        }
    }

    /// The first whitespace-delimited token of the label, used as a column header.
    ///
    /// Falls back to the code when the label is blank.
    pub fn short_label(&self) -> &str {
        self.label.split_whitespace().next().unwrap_or(&self.code)
    }
}

/// One row of a per-variant country count file.
#[derive(Debug, Clone, PartialEq)]
pub struct CountryStat {
    pub country: String,
    /// Share of 4-week submissions attributed to the variant, in percent.
    pub percentage: f64,
    /// 4-week submission total for the country. Missing upstream values are 0.
    pub total_sequenced: u64,
}

/// 4-week submission total for one country.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryTotal {
    pub name: String,
    pub total_sequenced: u64,
}

/// The result of one complete scrape.
///
/// # Invariants
///
/// - Every key of `stats` is the code of an entry in `variants`.
/// - `countries` holds each name at most once, in first-seen order.
/// - A missing `(variant, country)` pair means a share of `0.0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Tracked variants in upstream order.
    pub variants: Vec<Variant>,
    /// Countries in the order they were first seen during the scrape.
    pub countries: Vec<CountryTotal>,
    /// `variant_code -> country_name -> percentage`.
    pub stats: BTreeMap<String, BTreeMap<String, f64>>,
    /// When the scrape finished. Informational only.
    #[serde(default)]
    pub scraped_at: Option<DateTime<Utc>>,
}

impl Dataset {
    /// Start a dataset for the given variants. Duplicate codes keep their first occurrence.
    pub fn with_variants(variants: Vec<Variant>) -> Self {
        Self {
            variants: variants.into_iter().unique_by(|v| v.code.clone()).collect(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty() && self.countries.is_empty() && self.stats.is_empty()
    }

    pub fn has_variant(&self, code: &str) -> bool {
        self.variants.iter().any(|v| v.code == code)
    }

    /// Record one country row for `variant_code`.
    ///
    /// The country is appended to `countries` on first sight; its total keeps
    /// the largest value reported by any variant file. Returns `false` (and
    /// records nothing) when the variant is unknown.
    pub fn record(&mut self, variant_code: &str, stat: CountryStat) -> bool {
        if !self.has_variant(variant_code) {
            return false;
        }

        match self.countries.iter_mut().find(|c| c.name == stat.country) {
            Some(existing) => {
                existing.total_sequenced = existing.total_sequenced.max(stat.total_sequenced);
            }
            None => self.countries.push(CountryTotal {
                name: stat.country.clone(),
                total_sequenced: stat.total_sequenced,
            }),
        }

        self.stats
            .entry(variant_code.to_string())
            .or_default()
            .insert(stat.country, stat.percentage);
        true
    }

    /// Share for a `(variant, country)` pair, `0.0` when absent.
    pub fn percentage(&self, variant_code: &str, country: &str) -> f64 {
        self.stats
            .get(variant_code)
            .and_then(|by_country| by_country.get(country))
            .copied()
            .unwrap_or(0.0)
    }

    /// Check the structural invariants, returning a description of the first violation.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(code) = self.stats.keys().find(|code| !self.has_variant(code)) {
            return Err(format!("stats reference unknown variant `{code}`"));
        }
        for (i, country) in self.countries.iter().enumerate() {
            if self.countries[..i].iter().any(|c| c.name == country.name) {
                return Err(format!("country `{}` listed twice", country.name));
            }
        }
        Ok(())
    }
}

/// One extracted HTML table, its group text and (once rendered) its image.
#[derive(Debug, Clone, PartialEq)]
pub struct TableImage {
    /// Styled HTML fragment for the table element.
    pub source_html: String,
    pub group_title: String,
    pub group_description: String,
    /// Where the rendered PNG was written.
    pub rendered_path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(country: &str, percentage: f64, total: u64) -> CountryStat {
        CountryStat {
            country: country.to_string(),
            percentage,
            total_sequenced: total,
        }
    }

    #[test]
    fn test_short_label_takes_first_token() {
        let v = Variant::new("al", "Alpha variant (B.1.1.7)");
        assert_eq!(v.short_label(), "Alpha");
        let blank = Variant::new("xx", "   ");
        assert_eq!(blank.short_label(), "xx");
    }

    #[test]
    fn test_with_variants_dedupes_codes() {
        let ds = Dataset::with_variants(vec![
            Variant::new("al", "Alpha"),
            Variant::new("be", "Beta"),
            Variant::new("al", "Alpha again"),
        ]);
        assert_eq!(ds.variants.len(), 2);
        assert_eq!(ds.variants[0].label, "Alpha");
    }

    #[test]
    fn test_record_keeps_first_seen_country_order() {
        let mut ds = Dataset::with_variants(vec![Variant::new("al", "Alpha"), Variant::new("be", "Beta")]);
        assert!(ds.record("al", stat("Peru", 10.0, 100)));
        assert!(ds.record("al", stat("Chile", 5.0, 50)));
        assert!(ds.record("be", stat("Peru", 20.0, 120)));

        let names: Vec<_> = ds.countries.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Peru", "Chile"]);
        assert_eq!(ds.countries[0].total_sequenced, 120);
        assert_eq!(ds.percentage("be", "Peru"), 20.0);
    }

    #[test]
    fn test_record_rejects_unknown_variant() {
        let mut ds = Dataset::with_variants(vec![Variant::new("al", "Alpha")]);
        assert!(!ds.record("zz", stat("Peru", 10.0, 1)));
        assert!(ds.countries.is_empty());
        assert!(ds.stats.is_empty());
    }

    #[test]
    fn test_missing_pair_is_zero() {
        let ds = Dataset::with_variants(vec![Variant::new("al", "Alpha")]);
        assert_eq!(ds.percentage("al", "Peru"), 0.0);
        assert_eq!(ds.percentage("nope", "Peru"), 0.0);
    }

    #[test]
    fn test_validate_flags_orphan_stats() {
        let mut ds = Dataset::with_variants(vec![Variant::new("al", "Alpha")]);
        ds.stats.entry("ghost".to_string()).or_default().insert("Peru".to_string(), 1.0);
        let err = ds.validate().unwrap_err();
        assert!(err.contains("ghost"));
    }

    #[test]
    fn test_dataset_serialization_roundtrip() {
        let mut ds = Dataset::with_variants(vec![Variant::new("al", "Alpha")]);
        ds.record("al", stat("Peru", 62.3, 120));
        let json = serde_json::to_string(&ds).unwrap();
        let back: Dataset = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ds);
    }
}
