//! HTML fragment to PNG rendering, plus trimming the result to its content.
//!
//! Rendering shells out to an external HTML rasterizer (`wkhtmltoimage` by
//! default). The fragment is wrapped in a minimal standalone document and
//! written next to the target image first.

use crate::config::RendererSettings;
use image::{GenericImageView, ImageFormat, Rgba};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("could not write {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to execute {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} timed out after {timeout_secs}s")]
    Timeout { program: String, timeout_secs: u64 },
    #[error("{program} exited with status {status}: {stderr}")]
    Failed {
        program: String,
        status: i32,
        stderr: String,
    },
    #[error("{program} produced no image at {path}")]
    NoOutput { program: String, path: String },
    #[error("image {path} could not be processed: {source}")]
    Image {
        path: String,
        source: image::ImageError,
    },
}

/// Rendering seam: turn one HTML fragment into a PNG at `output`.
pub trait HtmlRenderer {
    async fn render(&self, html: &str, output: &Path) -> Result<(), RenderError>;
}

/// Wrap a fragment in a standalone UTF-8 document.
pub fn standalone_document(fragment: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"></head><body style=\"margin: 0; background: #ffffff;\">{fragment}</body></html>"
    )
}

/// Renderer backed by an external rasterizer invoked as `program [args..] <input.html> <output.png>`.
#[derive(Debug, Clone)]
pub struct ExternalRenderer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ExternalRenderer {
    pub fn from_settings(settings: &RendererSettings) -> Self {
        Self {
            program: settings.program.clone(),
            args: settings.args.clone(),
            timeout: Duration::from_secs(settings.timeout_secs.max(1)),
        }
    }
}

impl HtmlRenderer for ExternalRenderer {
    #[instrument(level = "info", skip_all, fields(program = %self.program, output = %output.display()))]
    async fn render(&self, html: &str, output: &Path) -> Result<(), RenderError> {
        let input = output.with_extension("html");
        tokio::fs::write(&input, standalone_document(html))
            .await
            .map_err(|source| RenderError::Io {
                path: input.display().to_string(),
                source,
            })?;

        let mut command = Command::new(&self.program);
        command.args(&self.args).arg(&input).arg(output);

        let result = timeout(self.timeout, command.output())
            .await
            .map_err(|_| RenderError::Timeout {
                program: self.program.clone(),
                timeout_secs: self.timeout.as_secs(),
            })?
            .map_err(|source| RenderError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if let Err(e) = tokio::fs::remove_file(&input).await {
            debug!(error = %e, "Could not remove intermediate HTML file");
        }

        if !result.status.success() {
            return Err(RenderError::Failed {
                program: self.program.clone(),
                status: result.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        if !output.exists() {
            return Err(RenderError::NoOutput {
                program: self.program.clone(),
                path: output.display().to_string(),
            });
        }

        info!("Rendered table image");
        Ok(())
    }
}

/// Smallest `(x, y, width, height)` box holding every pixel that differs from the top-left one.
///
/// `None` when the whole image is background.
pub fn content_bounds(img: &impl GenericImageView<Pixel = Rgba<u8>>) -> Option<(u32, u32, u32, u32)> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return None;
    }
    let background = img.get_pixel(0, 0);

    let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0u32, 0u32);
    for (x, y, pixel) in img.pixels() {
        if pixel != background {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    (min_x != u32::MAX).then(|| (min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

/// Crop the PNG at `path` in place to its content bounds.
///
/// An image that is entirely background is left untouched.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub fn crop_to_content(path: &Path) -> Result<(), RenderError> {
    let image_err = |source: image::ImageError| RenderError::Image {
        path: path.display().to_string(),
        source,
    };
    let img = image::open(path).map_err(image_err)?.to_rgba8();

    let Some((x, y, w, h)) = content_bounds(&img) else {
        warn!("Image is blank; leaving it uncropped");
        return Ok(());
    };
    if (x, y, w, h) == (0, 0, img.width(), img.height()) {
        debug!("Image already tight");
        return Ok(());
    }

    let cropped = image::imageops::crop_imm(&img, x, y, w, h).to_image();
    cropped
        .save_with_format(path, ImageFormat::Png)
        .map_err(image_err)?;
    info!(x, y, width = w, height = h, "Cropped image to content");
    Ok(())
}

/// File name for the rendered image of the table at `index`.
pub fn image_path_for(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("table_{index}.png"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::RgbaImage;

    /// Renderer that paints a fixed image instead of rasterizing HTML.
    #[derive(Debug, Default)]
    pub(crate) struct PaintRenderer {
        pub(crate) fail: bool,
    }

    impl HtmlRenderer for PaintRenderer {
        async fn render(&self, _html: &str, output: &Path) -> Result<(), RenderError> {
            if self.fail {
                return Err(RenderError::Failed {
                    program: "paint".to_string(),
                    status: 1,
                    stderr: "boom".to_string(),
                });
            }
            let mut img = RgbaImage::from_pixel(20, 10, Rgba([255, 255, 255, 255]));
            for x in 5..9 {
                for y in 2..6 {
                    img.put_pixel(x, y, Rgba([0, 0, 0, 255]));
                }
            }
            img.save_with_format(output, ImageFormat::Png).map_err(|source| RenderError::Image {
                path: output.display().to_string(),
                source,
            })
        }
    }

    #[test]
    fn test_content_bounds() {
        let mut img = RgbaImage::from_pixel(10, 8, Rgba([255, 255, 255, 255]));
        img.put_pixel(3, 2, Rgba([0, 0, 0, 255]));
        img.put_pixel(6, 5, Rgba([10, 10, 10, 255]));
        assert_eq!(content_bounds(&img), Some((3, 2, 4, 4)));
    }

    #[test]
    fn test_content_bounds_blank() {
        let img = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]));
        assert_eq!(content_bounds(&img), None);
    }

    #[tokio::test]
    async fn test_crop_to_content_shrinks_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.png");
        PaintRenderer::default().render("<table></table>", &path).await.unwrap();

        crop_to_content(&path).unwrap();
        let img = image::open(&path).unwrap();
        assert_eq!(img.dimensions(), (4, 4));
    }

    #[test]
    fn test_crop_blank_image_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.png");
        RgbaImage::from_pixel(6, 6, Rgba([255, 255, 255, 255]))
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();

        crop_to_content(&path).unwrap();
        assert_eq!(image::open(&path).unwrap().dimensions(), (6, 6));
    }

    #[test]
    fn test_standalone_document_wraps_fragment() {
        let doc = standalone_document("<table></table>");
        assert!(doc.starts_with("<!DOCTYPE html>"));
        assert!(doc.contains("<meta charset=\"utf-8\">"));
        assert!(doc.contains("<body style=\"margin: 0; background: #ffffff;\"><table></table></body>"));
    }

    #[test]
    fn test_image_path_for() {
        assert_eq!(image_path_for(Path::new("out"), 2), PathBuf::from("out/table_2.png"));
    }

    #[tokio::test]
    async fn test_external_renderer_reports_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = ExternalRenderer::from_settings(&RendererSettings {
            program: "definitely-not-a-real-rasterizer".to_string(),
            args: vec![],
            timeout_secs: 5,
        });
        let err = renderer
            .render("<table></table>", &dir.path().join("x.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Spawn { .. }));
    }
}
