//! Chat-ready text for the per-country variant report.
//!
//! Output is Discord-flavoured Markdown: `>` block quotes, `**bold**` for
//! emphasis and `:flag_xx:` shortcodes for flags.

use crate::countries::{UnknownCountry, flag_shortcode, to_iso2};
use crate::models::Dataset;
use tracing::{debug, info, instrument};

/// Shares at or above this value are emphasized.
pub const EMPHASIS_THRESHOLD: f64 = 50.0;

/// The formatted value of a share that rounds to nothing.
pub const ZERO_PERCENTAGE: &str = "0.0";

/// Header and data message for one country.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountryBlock {
    pub country: String,
    pub header: String,
    pub data: String,
}

/// The four fixed informational lines that open every report.
pub fn format_disclaimer() -> Vec<String> {
    vec![
        "**> DISCLAIMER**".to_string(),
        "> This bot scrapes the relative percentages of genome **submissions of the past 4 weeks** from the tracked variants to GISAID.".to_string(),
        "> Observed frequencies are subject to sampling and reporting biases and **do not** represent exact prevalence.".to_string(),
        "> See https://www.gisaid.org/hcov19-variants/ for more info.".to_string(),
    ]
}

/// Format a share with exactly one decimal.
pub fn format_percentage(value: f64) -> String {
    let formatted = format!("{value:.1}");
    // `-0.04` would otherwise print as "-0.0".
    if formatted == "-0.0" {
        ZERO_PERCENTAGE.to_string()
    } else {
        formatted
    }
}

/// Wrap a formatted share in bold when it parses at or above [`EMPHASIS_THRESHOLD`].
fn emphasize(formatted: &str) -> String {
    match formatted.parse::<f64>() {
        Ok(value) if value >= EMPHASIS_THRESHOLD => format!("**{formatted}**"),
        _ => formatted.to_string(),
    }
}

/// Build the header/data message pair for every country with a non-zero share.
///
/// Countries keep scrape order. A country whose formatted shares are all
/// `"0.0"` is skipped. A country name with no known region code aborts the
/// whole report.
#[instrument(level = "info", skip_all, fields(countries = dataset.countries.len(), variants = dataset.variants.len()))]
pub fn format_country_report(dataset: &Dataset) -> Result<Vec<CountryBlock>, UnknownCountry> {
    let mut blocks = Vec::new();

    for country in &dataset.countries {
        let percentages: Vec<String> = dataset
            .variants
            .iter()
            .map(|variant| format_percentage(dataset.percentage(&variant.code, &country.name)))
            .collect();

        if percentages.iter().all(|p| p == ZERO_PERCENTAGE) {
            debug!(country = %country.name, "Skipping country without any share");
            continue;
        }

        let iso = to_iso2(&country.name)?;
        let header = format!(
            "**> {} {}**  4-week total: {}",
            flag_shortcode(iso),
            country.name,
            country.total_sequenced
        );
        let data = format!(
            "> {}",
            dataset
                .variants
                .iter()
                .zip(&percentages)
                .map(|(variant, pct)| format!("{}: {}", variant.short_label(), emphasize(pct)))
                .collect::<Vec<_>>()
                .join("\t")
        );

        blocks.push(CountryBlock {
            country: country.name.clone(),
            header,
            data,
        });
    }

    info!(kept = blocks.len(), "Formatted country report");
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CountryStat, Variant};

    fn dataset(peru_alpha: f64) -> Dataset {
        let mut ds = Dataset::with_variants(vec![Variant::new("al", "Alpha variant"), Variant::new("be", "Beta variant")]);
        ds.record(
            "al",
            CountryStat {
                country: "Peru".to_string(),
                percentage: peru_alpha,
                total_sequenced: 120,
            },
        );
        ds
    }

    #[test]
    fn test_disclaimer_has_four_lines() {
        let lines = format_disclaimer();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("DISCLAIMER"));
    }

    #[test]
    fn test_format_percentage_one_decimal() {
        assert_eq!(format_percentage(0.0), "0.0");
        assert_eq!(format_percentage(62.34), "62.3");
        assert_eq!(format_percentage(5.0), "5.0");
        assert_eq!(format_percentage(100.0), "100.0");
        assert_eq!(format_percentage(0.04), "0.0");
        assert_eq!(format_percentage(-0.04), "0.0");
    }

    #[test]
    fn test_all_zero_country_is_excluded() {
        let blocks = format_country_report(&dataset(0.0)).unwrap();
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_country_with_share_is_included_and_emphasized() {
        let blocks = format_country_report(&dataset(62.3)).unwrap();
        assert_eq!(blocks.len(), 1);
        let block = &blocks[0];
        assert_eq!(block.country, "Peru");
        assert_eq!(block.header, "**> :flag_pe: Peru**  4-week total: 120");
        assert_eq!(block.data, "> Alpha: **62.3**\tBeta: 0.0");
    }

    #[test]
    fn test_emphasis_boundary() {
        let at = format_country_report(&dataset(50.0)).unwrap();
        assert!(at[0].data.contains("Alpha: **50.0**"));

        let below = format_country_report(&dataset(49.9)).unwrap();
        assert!(below[0].data.contains("Alpha: 49.9"));
        assert!(!below[0].data.contains("**"));
    }

    #[test]
    fn test_rounding_to_zero_excludes_country() {
        let blocks = format_country_report(&dataset(0.04)).unwrap();
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_unknown_country_aborts_report() {
        let mut ds = dataset(10.0);
        ds.record(
            "be",
            CountryStat {
                country: "Atlantis".to_string(),
                percentage: 3.0,
                total_sequenced: 1,
            },
        );
        let err = format_country_report(&ds).unwrap_err();
        assert_eq!(err.name, "Atlantis");
    }

    #[test]
    fn test_empty_dataset_yields_nothing() {
        assert!(format_country_report(&Dataset::default()).unwrap().is_empty());
    }
}
