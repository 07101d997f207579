//! Variant configuration and per-variant country counts.
//!
//! The mutation tracker publishes a `config.json` whose `tooltipName` object
//! maps short variant codes to display names, and one
//! `countryCount_{code}.json` array per variant:
//!
//! ```json
//! [{"country": "Peru", "percvui_last4wks": 62.3, "numcountrytotal_last4wks": 120}]
//! ```
//!
//! The config is decoded as JSON first. When upstream serves something that is
//! not strict JSON, a pattern match over the raw text is used instead, so the
//! extraction stays best-effort structural matching either way.

use crate::models::{CountryStat, Variant};
use crate::utils::truncate_for_log;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Key of the object mapping variant codes to display names.
pub const TOOLTIP_KEY: &str = "tooltipName";
pub const COUNTRY_FIELD: &str = "country";
pub const PERCENTAGE_FIELD: &str = "percvui_last4wks";
pub const TOTAL_FIELD: &str = "numcountrytotal_last4wks";

static TOOLTIP_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)"tooltipName"\s*:\s*\{(.+?)\}"#).expect("static regex"));
static TOOLTIP_PAIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""([A-Za-z0-9_.\-]+)"\s*:\s*"(.+?)""#).expect("static regex"));

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("expected structure not found: {what}")]
    NotFound { what: String },
    #[error("could not decode {context}: {source}")]
    Json {
        context: String,
        source: serde_json::Error,
    },
    #[error("{context}: element {index} has no usable `{field}`")]
    MissingField {
        context: String,
        index: usize,
        field: &'static str,
    },
}

/// Extract the ordered list of tracked variants from the config payload.
///
/// # Returns
///
/// Variants in source order, or [`ExtractError::NotFound`] when the
/// `tooltipName` object is absent or holds no `code: "label"` pairs.
#[instrument(level = "info", skip_all, fields(bytes = config_text.len()))]
pub fn extract_variants(config_text: &str) -> Result<Vec<Variant>, ExtractError> {
    let variants = match serde_json::from_str::<Value>(config_text) {
        Ok(value) => {
            let tooltip = find_key(&value, TOOLTIP_KEY).ok_or_else(|| ExtractError::NotFound {
                what: format!("`{TOOLTIP_KEY}` object in variant config"),
            })?;
            variants_from_object(tooltip)
        }
        Err(e) => {
            warn!(
                error = %e,
                preview = %truncate_for_log(config_text, 300),
                "Variant config is not strict JSON; falling back to pattern match"
            );
            variants_from_pattern(config_text)
        }
    };

    if variants.is_empty() {
        return Err(ExtractError::NotFound {
            what: format!("variant entries inside `{TOOLTIP_KEY}`"),
        });
    }

    info!(count = variants.len(), "Extracted variants");
    debug!(codes = ?variants.iter().map(|v| v.code.as_str()).collect::<Vec<_>>(), "Variant codes");
    Ok(variants)
}

/// Depth-first search for the first object stored under `key`.
fn find_key<'a>(value: &'a Value, key: &str) -> Option<&'a Map<String, Value>> {
    match value {
        Value::Object(map) => {
            if let Some(Value::Object(found)) = map.get(key) {
                return Some(found);
            }
            map.values().find_map(|v| find_key(v, key))
        }
        Value::Array(items) => items.iter().find_map(|v| find_key(v, key)),
        _ => None,
    }
}

fn variants_from_object(tooltip: &Map<String, Value>) -> Vec<Variant> {
    tooltip
        .iter()
        .filter_map(|(code, label)| match label {
            Value::String(label) if !code.trim().is_empty() => Some(Variant::new(code.trim(), label.trim())),
            _ => {
                debug!(%code, "Skipping non-string tooltip entry");
                None
            }
        })
        .collect()
}

fn variants_from_pattern(config_text: &str) -> Vec<Variant> {
    let Some(block) = TOOLTIP_BLOCK.captures(config_text).and_then(|c| c.get(1)) else {
        return Vec::new();
    };
    TOOLTIP_PAIR
        .captures_iter(block.as_str())
        .map(|c| Variant::new(&c[1], c[2].trim()))
        .collect()
}

/// Decode one `countryCount_{code}.json` payload.
///
/// Every element must carry `country` and `percvui_last4wks`; a missing or
/// unreadable `numcountrytotal_last4wks` counts as 0.
#[instrument(level = "info", skip_all, fields(variant = %variant.code))]
pub fn extract_country_stats(variant: &Variant, json_text: &str) -> Result<Vec<CountryStat>, ExtractError> {
    let context = format!("country counts for variant `{}`", variant.code);
    let rows: Vec<Value> = serde_json::from_str(json_text).map_err(|source| {
        warn!(preview = %truncate_for_log(json_text, 300), "Country count payload is not a JSON array");
        ExtractError::Json {
            context: context.clone(),
            source,
        }
    })?;

    let mut stats = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        let country = row
            .get(COUNTRY_FIELD)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ExtractError::MissingField {
                context: context.clone(),
                index,
                field: COUNTRY_FIELD,
            })?;

        let percentage = row
            .get(PERCENTAGE_FIELD)
            .and_then(as_f64)
            .ok_or_else(|| ExtractError::MissingField {
                context: context.clone(),
                index,
                field: PERCENTAGE_FIELD,
            })?;

        let total_sequenced = match row.get(TOTAL_FIELD) {
            None | Some(Value::Null) => 0,
            Some(raw) => as_u64(raw).unwrap_or_else(|| {
                warn!(%country, value = %raw, "Unreadable country total; using 0");
                0
            }),
        };

        stats.push(CountryStat {
            country: country.to_string(),
            percentage,
            total_sequenced,
        });
    }

    info!(rows = stats.len(), "Extracted country stats");
    Ok(stats)
}

fn as_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f.round() as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}
