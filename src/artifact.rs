//! Artifact delivery – PDFs rendered straight to uniquely named files in a
//! dedicated temp directory, handed back as paths and streamed out with
//! delete-on-close semantics.
//!
//! Files that are never streamed (crash, client gone) are left for the
//! background sweep in [`crate::sweep`].

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use uuid::Uuid;

use crate::compose::RenderedDocument;
use crate::error::{ForgeError, Result};
use crate::page::{PdfOptions, PdfSink, RenderPage};
use crate::session::BrowserSession;

/// Longest sanitised stem kept from a name hint.
pub const MAX_STEM_LEN: usize = 80;

const ARTIFACT_EXTENSION: &str = "pdf";
const RESERVE_ATTEMPTS: usize = 8;

/// Replace every character outside `[A-Za-z0-9._-]` with `_`. Leading and
/// trailing dots are stripped so a hint can never name a hidden file or
/// climb out of the directory. Returns `None` when nothing useful is left.
pub fn sanitize_stem(hint: &str) -> Option<String> {
    let hint = hint.trim();
    let hint = match hint.len().checked_sub(4) {
        Some(cut) if hint.is_char_boundary(cut) && hint[cut..].eq_ignore_ascii_case(".pdf") => {
            &hint[..cut]
        }
        _ => hint,
    };

    let replaced: String = hint
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_STEM_LEN)
        .collect();

    let stem = replaced.trim_matches('.');
    if stem.chars().all(|c| c == '_') {
        None
    } else {
        Some(stem.to_string())
    }
}

/// `<stem>-<random>.pdf`, where the stem is the sanitised hint or a UTC
/// timestamp.
pub fn artifact_file_name(hint: Option<&str>) -> String {
    let stem = hint
        .and_then(sanitize_stem)
        .unwrap_or_else(|| chrono::Utc::now().format("%Y%m%d-%H%M%S%3f").to_string());
    let random = Uuid::new_v4().simple().to_string();
    format!("{stem}-{}.{ARTIFACT_EXTENSION}", &random[..12])
}

/// Owns the artifact directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    inspect_dir: Option<PathBuf>,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, inspect_dir: Option<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            inspect_dir,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the artifact directory if needed.
    pub async fn prepare(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ForgeError::io(&self.dir, e))
    }

    /// Create a new, empty artifact file. `create_new` makes the name ours even
    /// if another request drew the same random suffix.
    pub async fn reserve(&self, hint: Option<&str>) -> Result<(PathBuf, File)> {
        let mut last_error = None;
        for _ in 0..RESERVE_ATTEMPTS {
            let path = self.dir.join(artifact_file_name(hint));
            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => last_error = Some((path, e)),
                Err(source) => return Err(ForgeError::ArtifactWrite { path, source }),
            }
        }
        let (path, source) = last_error.unwrap_or_else(|| {
            (
                self.dir.clone(),
                io::Error::new(io::ErrorKind::AlreadyExists, "no free artifact name"),
            )
        });
        Err(ForgeError::ArtifactWrite { path, source })
    }

    /// Render `document` on a fresh page directly into a new artifact file.
    ///
    /// The page is closed on every path. On failure any partially written
    /// file is removed before the error is returned. If this future is
    /// dropped midway, the reserved file is removed on a detached task.
    pub async fn render_to_file(
        &self,
        session: &BrowserSession,
        document: &RenderedDocument,
        options: &PdfOptions,
        hint: Option<&str>,
    ) -> Result<Artifact> {
        let mut page = session.acquire_page().await?;
        let result = self.write_artifact(&mut page, document, options, hint).await;
        page.close().await;

        let pending = result?;
        self.keep_copy(&pending.path).await;
        Ok(pending.keep())
    }

    async fn write_artifact(
        &self,
        page: &mut RenderPage,
        document: &RenderedDocument,
        options: &PdfOptions,
        hint: Option<&str>,
    ) -> Result<PendingArtifact> {
        let (path, mut file) = self.reserve(hint).await?;
        let mut pending = PendingArtifact::new(path);
        let result = page
            .render(document, options, PdfSink::File(&pending.path, &mut file))
            .await;
        drop(file);

        match result {
            Ok(0) => {
                pending.discard().await;
                Err(ForgeError::Render("engine produced an empty PDF".to_string()))
            }
            Ok(len) => {
                log::debug!("Wrote artifact {} ({len} bytes)", pending.path.display());
                pending.len = len;
                Ok(pending)
            }
            Err(e) => {
                pending.discard().await;
                Err(e)
            }
        }
    }

    async fn keep_copy(&self, path: &Path) {
        let Some(dir) = &self.inspect_dir else {
            return;
        };
        let Some(name) = path.file_name() else {
            return;
        };
        let target = dir.join(name);
        let copied = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::copy(path, &target).await
        };
        if let Err(e) = copied.await {
            log::warn!("Could not copy artifact to {}: {e}", target.display());
        }
    }
}

/// A reserved artifact file that is not yet handed to the caller. Dropped
/// while still armed, it deletes the file.
struct PendingArtifact {
    path: PathBuf,
    len: u64,
    armed: bool,
}

impl PendingArtifact {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            len: 0,
            armed: true,
        }
    }

    fn keep(mut self) -> Artifact {
        self.armed = false;
        Artifact {
            path: std::mem::take(&mut self.path),
            len: self.len,
        }
    }

    async fn discard(mut self) {
        self.armed = false;
        remove_quietly(&self.path).await;
    }
}

impl Drop for PendingArtifact {
    fn drop(&mut self) {
        if self.armed {
            log::debug!("Render abandoned; removing {}", self.path.display());
            remove_detached(std::mem::take(&mut self.path));
        }
    }
}

/// A rendered PDF on disk, not yet streamed.
#[derive(Debug)]
pub struct Artifact {
    path: PathBuf,
    len: u64,
}

impl Artifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Open for streaming. The file is deleted when the stream is dropped,
    /// or right away if it cannot be opened.
    pub async fn open(self) -> Result<ArtifactStream> {
        match File::open(&self.path).await {
            Ok(file) => Ok(ArtifactStream {
                file: Some(file),
                path: self.path,
                removed: false,
            }),
            Err(e) => {
                remove_quietly(&self.path).await;
                Err(ForgeError::io(self.path, e))
            }
        }
    }

    /// Delete without streaming.
    pub async fn remove(self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ForgeError::io(self.path, e)),
        }
    }

    /// Give up ownership of the file; the caller is now responsible for it.
    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

/// Read side of an artifact. Dropping it deletes the file, whether the stream
/// was fully consumed or abandoned halfway. Deletion on drop runs on a
/// detached task when a runtime is available.
#[derive(Debug)]
pub struct ArtifactStream {
    file: Option<File>,
    path: PathBuf,
    removed: bool,
}

impl ArtifactStream {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy the whole artifact into `out`, then delete it. The file is gone
    /// by the time this returns, whether or not the copy succeeded.
    pub async fn stream_to<W>(mut self, out: &mut W) -> io::Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let copied = tokio::io::copy(&mut self, out).await;
        drop(self.file.take());
        self.removed = true;
        remove_quietly(&self.path).await;
        copied
    }
}

impl AsyncRead for ArtifactStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.file.as_mut() {
            Some(file) => Pin::new(file).poll_read(cx, buf),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl Drop for ArtifactStream {
    fn drop(&mut self) {
        // Close before unlinking; some platforms refuse to delete open files.
        drop(self.file.take());
        if !self.removed {
            remove_detached(std::mem::take(&mut self.path));
        }
    }
}

/// Delete `path` from a synchronous context. Runs on a spawned task when a
/// runtime is available so `Drop` never blocks a worker thread.
fn remove_detached(path: PathBuf) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { remove_quietly(&path).await });
        }
        Err(_) => match std::fs::remove_file(&path) {
            Ok(()) => log::debug!("Deleted artifact {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "Could not delete artifact {} (left for the sweep): {e}",
                path.display()
            ),
        },
    }
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => log::debug!("Deleted artifact {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!(
            "Could not delete artifact {} (left for the sweep): {e}",
            path.display()
        ),
    }
}
