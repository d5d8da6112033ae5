//! Render pages – per-request handles on the engine.
//!
//! A [`RenderPage`] is always closed: explicitly via [`RenderPage::close`] on
//! the normal paths, and from `Drop` on a detached task when the owning
//! future is cancelled before it gets there.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::compose::RenderedDocument;
use crate::engine::{EngineError, EnginePage};
use crate::error::{ForgeError, Result};
use crate::request::{PaperFormat, Theme};

/// Smallest margin handed to the engine, in CSS pixels.
pub const MIN_MARGIN_PX: f32 = 10.0;

/// CSS pixels per inch.
const PX_PER_INCH: f64 = 96.0;

/// Margins in CSS pixels, clamped to [`MIN_MARGIN_PX`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Margins {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

impl Margins {
    pub fn new(top: f32, right: f32, bottom: f32, left: f32) -> Self {
        let clamp = |px: f32| if px.is_finite() { px.max(MIN_MARGIN_PX) } else { MIN_MARGIN_PX };
        Self {
            top: clamp(top),
            right: clamp(right),
            bottom: clamp(bottom),
            left: clamp(left),
        }
    }

    /// `(top, right, bottom, left)` in inches.
    pub fn inches(&self) -> (f64, f64, f64, f64) {
        let inch = |px: f32| f64::from(px) / PX_PER_INCH;
        (inch(self.top), inch(self.right), inch(self.bottom), inch(self.left))
    }
}

/// Layout options for one print.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfOptions {
    pub paper: PaperFormat,
    pub landscape: bool,
    pub margins: Margins,
    pub print_background: bool,
    pub display_header_footer: bool,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self::from_theme(&Theme::default())
    }
}

impl PdfOptions {
    pub fn from_theme(theme: &Theme) -> Self {
        Self {
            paper: theme.paper,
            landscape: theme.landscape,
            margins: Margins::new(
                theme.margin_top,
                theme.margin_right,
                theme.margin_bottom,
                theme.margin_left,
            ),
            print_background: theme.print_background,
            display_header_footer: theme.display_header_footer,
        }
    }
}

/// Where the PDF goes.
pub enum PdfSink<'a> {
    /// Create (or truncate) a file at this path.
    Path(&'a Path),
    /// An already open file; the path is only used for error context.
    File(&'a Path, &'a mut tokio::fs::File),
    /// Write into an already open stream.
    Writer(&'a mut (dyn AsyncWrite + Unpin + Send)),
}

static NEXT_PAGE_ID: AtomicU64 = AtomicU64::new(1);

/// A scoped page obtained from [`crate::session::BrowserSession::acquire_page`].
pub struct RenderPage {
    id: u64,
    inner: Option<Box<dyn EnginePage>>,
}

impl RenderPage {
    pub(crate) fn new(inner: Box<dyn EnginePage>) -> Self {
        let id = NEXT_PAGE_ID.fetch_add(1, Ordering::Relaxed);
        log::debug!("Opened render page #{id}");
        Self {
            id,
            inner: Some(inner),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Load `document` and print it to `sink`. Returns the PDF size in bytes.
    /// No retry happens here.
    pub async fn render(
        &mut self,
        document: &RenderedDocument,
        options: &PdfOptions,
        sink: PdfSink<'_>,
    ) -> Result<u64> {
        let page = self
            .inner
            .as_mut()
            .ok_or_else(|| ForgeError::Render("page already closed".to_string()))?;

        match sink {
            PdfSink::Writer(out) => Ok(page.print_pdf(document.html(), options, out).await?),
            PdfSink::Path(path) => {
                let mut file = tokio::fs::File::create(path)
                    .await
                    .map_err(|source| artifact_error(path, source))?;
                print_to_file(page.as_mut(), document, options, path, &mut file).await
            }
            PdfSink::File(path, file) => {
                print_to_file(page.as_mut(), document, options, path, file).await
            }
        }
    }

    /// Close the engine page. Errors are logged, not returned: the page is
    /// gone from our side either way.
    pub async fn close(mut self) {
        if let Some(mut page) = self.inner.take() {
            close_page(self.id, page.as_mut()).await;
        }
    }
}

impl Drop for RenderPage {
    fn drop(&mut self) {
        let Some(mut page) = self.inner.take() else {
            return;
        };
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                log::debug!("Render page #{id} dropped without close; closing in background");
                handle.spawn(async move { close_page(id, page.as_mut()).await });
            }
            Err(_) => log::warn!("Render page #{id} dropped outside a runtime; engine page leaked"),
        }
    }
}

async fn print_to_file(
    page: &mut dyn EnginePage,
    document: &RenderedDocument,
    options: &PdfOptions,
    path: &Path,
    file: &mut tokio::fs::File,
) -> Result<u64> {
    let written = match page.print_pdf(document.html(), options, &mut *file).await {
        Ok(written) => written,
        Err(EngineError::Write(source)) => return Err(artifact_error(path, source)),
        Err(e) => return Err(e.into()),
    };
    file.flush().await.map_err(|source| artifact_error(path, source))?;
    Ok(written)
}

fn artifact_error(path: &Path, source: std::io::Error) -> ForgeError {
    ForgeError::ArtifactWrite {
        path: path.to_path_buf(),
        source,
    }
}

async fn close_page(id: u64, page: &mut dyn EnginePage) {
    match page.close().await {
        Ok(()) => log::debug!("Closed render page #{id}"),
        Err(e) => log::warn!("Failed to close render page #{id}: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn margins_are_clamped() {
        let m = Margins::new(0.0, 5.0, 40.0, f32::NAN);
        assert_eq!(m.top, MIN_MARGIN_PX);
        assert_eq!(m.right, MIN_MARGIN_PX);
        assert_eq!(m.bottom, 40.0);
        assert_eq!(m.left, MIN_MARGIN_PX);
    }

    #[test]
    fn margins_in_inches() {
        let (top, _, _, _) = Margins::new(96.0, 10.0, 10.0, 10.0).inches();
        assert!((top - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn options_follow_theme() {
        let theme = Theme {
            paper: PaperFormat::Letter,
            margin_top: 2.0,
            print_background: false,
            ..Theme::default()
        };
        let options = PdfOptions::from_theme(&theme);
        assert_eq!(options.paper, PaperFormat::Letter);
        assert_eq!(options.margins.top, MIN_MARGIN_PX);
        assert!(!options.print_background);
    }
}
