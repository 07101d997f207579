//! Variant classification tables from the agency's variants page.
//!
//! The page carries one table per classification group (concern, interest,
//! under monitoring, de-escalated). Each matching `<table>` element is
//! serialized back to a flat HTML fragment with fixed inline border styling so
//! it renders legibly on its own.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info, instrument};

pub const TABLE_STYLE: &str = "border-collapse: collapse; font-family: sans-serif; font-size: 14px;";
pub const CELL_STYLE: &str = "border: 1px solid #444; padding: 4px 8px; text-align: left;";
pub const HEADER_STYLE: &str =
    "border: 1px solid #444; padding: 4px 8px; text-align: left; background-color: #e8e8e8;";

static TABLE_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<table\b").expect("static regex"));
static CELL_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<td\b").expect("static regex"));
static HEADER_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<th\b").expect("static regex"));
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Extract every `<table>` whose `class` attribute contains `class_predicate`.
///
/// # Returns
///
/// Styled HTML fragments in document order. An empty vector when nothing matches.
#[instrument(level = "info", skip(html_bytes), fields(bytes = html_bytes.len()))]
pub fn extract_tables(html_bytes: &[u8], class_predicate: &str) -> Vec<String> {
    let html = String::from_utf8_lossy(html_bytes);
    let document = Html::parse_document(&html);
    let table_selector = Selector::parse("table").expect("static selector");

    let tables: Vec<String> = document
        .select(&table_selector)
        .filter(|table| {
            table
                .value()
                .attr("class")
                .is_some_and(|class| class.contains(class_predicate))
        })
        .map(|table| style_table(&flatten(&table.html())))
        .collect();

    info!(count = tables.len(), class_predicate, "Extracted classification tables");
    debug!(sizes = ?tables.iter().map(String::len).collect::<Vec<_>>(), "Table fragment sizes");
    tables
}

/// Drop literal `\n` / `\t` / `\r` escapes and collapse raw whitespace runs to one space.
fn flatten(fragment: &str) -> String {
    let unescaped = fragment.replace("\\r", "").replace("\\n", "").replace("\\t", "");
    WHITESPACE_RUN.replace_all(&unescaped, " ").into_owned()
}

/// Prefix inline styles on the table, its header cells and its data cells.
///
/// Styles are inserted as the first attribute so they take precedence over any
/// `style` the source markup already carries.
fn style_table(fragment: &str) -> String {
    let styled = TABLE_OPEN.replace_all(fragment, format!(r#"<table style="{TABLE_STYLE}""#));
    let styled = HEADER_OPEN.replace_all(&styled, format!(r#"<th style="{HEADER_STYLE}""#));
    CELL_OPEN
        .replace_all(&styled, format!(r#"<td style="{CELL_STYLE}""#))
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
        <table class="layout"><tr><td>nav</td></tr></table>
        <table class="table table-striped">
            <thead><tr><th>Variant</th><th>Lineage</th></tr></thead>
            <tbody><tr><td>Delta</td><td>B.1.617.2</td></tr></tbody>
        </table>
        <table class="ecl-table"><tr><td>Omicron</td></tr></table>
        <table><tr><td>no class</td></tr></table>
    </body></html>"#;

    #[test]
    fn test_extract_tables_matches_partial_class() {
        let tables = extract_tables(PAGE.as_bytes(), "table");
        assert_eq!(tables.len(), 2);
        assert!(tables[0].contains("Delta"));
        assert!(tables[1].contains("Omicron"));
    }

    #[test]
    fn test_extract_tables_no_match() {
        assert!(extract_tables(PAGE.as_bytes(), "does-not-exist").is_empty());
    }

    #[test]
    fn test_fragments_are_flat_and_styled() {
        let tables = extract_tables(PAGE.as_bytes(), "table-striped");
        assert_eq!(tables.len(), 1);
        let t = &tables[0];
        assert!(!t.contains('\n'));
        assert!(!t.contains('\t'));
        assert!(t.starts_with(&format!(r#"<table style="{TABLE_STYLE}""#)));
        assert!(t.contains(&format!(r#"<th style="{HEADER_STYLE}">Variant"#)));
        assert!(t.contains(&format!(r#"<td style="{CELL_STYLE}">Delta"#)));
        // `<thead>` and `<tbody>` are left alone.
        assert!(t.contains("<thead>"));
        assert!(t.contains("<tbody>"));
    }

    #[test]
    fn test_flatten_strips_literal_escapes() {
        assert_eq!(flatten(r"<td>a\n\tb</td>"), "<td>ab</td>");
    }

    #[test]
    fn test_flatten_keeps_words_apart() {
        assert_eq!(flatten("<td>a\n\tb</td>"), "<td>a b</td>");
        assert_eq!(flatten("<td>Delta\r\nvariant</td>"), "<td>Delta variant</td>");
    }

    #[test]
    fn test_line_break_inside_cell_becomes_space() {
        let page = "<html><body><table class=\"table\"><tr><td>Delta\nvariant</td></tr></table></body></html>";
        let tables = extract_tables(page.as_bytes(), "table");
        assert_eq!(tables.len(), 1);
        assert!(tables[0].contains("Delta variant"));
    }
}
