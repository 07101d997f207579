//! Classification table groups: title, description and rendered image.
//!
//! Extracted tables are paired with [`TABLE_GROUPS`] by position. Surplus
//! tables or surplus descriptions are dropped, so the number of groups is
//! always `min(tables, descriptions)`.

use super::render::{HtmlRenderer, RenderError, crop_to_content, image_path_for};
use crate::models::TableImage;
use crate::utils::ensure_writable_dir;
use std::path::Path;
use tracing::{info, instrument};

/// `(title, description)` for each classification group, in page order.
pub const TABLE_GROUPS: [(&str, &str); 4] = [
    (
        "**> Variants of Concern**",
        "> Clear evidence of a significant impact on transmissibility, severity and/or immunity that is likely to affect the epidemiological situation.",
    ),
    (
        "**> Variants of Interest**",
        "> Evidence of genomic properties, epidemiological evidence or in-vitro evidence that could imply a significant impact on transmissibility, severity and/or immunity.",
    ),
    (
        "**> Variants under monitoring**",
        "> Detected as signals through epidemic intelligence or rule-based variant screening; some indication that they could have properties similar to a variant of concern, but weak or not yet assessed.",
    ),
    (
        "**> De-escalated variants**",
        "> No longer circulating, circulating for a long time without any impact on the overall epidemiological situation, or scientific evidence shows no concerning properties.",
    ),
];

/// Pair tables with their group text and render each one to `image_dir/table_{i}.png`.
///
/// When `crop` is set every image is trimmed to its content after rendering.
#[instrument(level = "info", skip_all, fields(tables = tables.len(), image_dir = %image_dir.display(), crop = crop))]
pub async fn format_table_groups<R: HtmlRenderer>(
    tables: &[String],
    renderer: &R,
    image_dir: &Path,
    crop: bool,
) -> Result<Vec<TableImage>, RenderError> {
    ensure_writable_dir(image_dir)
        .await
        .map_err(|source| RenderError::Io {
            path: image_dir.display().to_string(),
            source,
        })?;

    let mut groups = Vec::with_capacity(tables.len().min(TABLE_GROUPS.len()));
    for (index, (html, (title, description))) in tables.iter().zip(TABLE_GROUPS).enumerate() {
        let rendered_path = image_path_for(image_dir, index);
        renderer.render(html, &rendered_path).await?;
        if crop {
            crop_to_content(&rendered_path)?;
        }
        groups.push(TableImage {
            source_html: html.clone(),
            group_title: title.to_string(),
            group_description: description.to_string(),
            rendered_path,
        });
    }

    info!(groups = groups.len(), "Rendered table groups");
    Ok(groups)
}
