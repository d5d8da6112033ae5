//! Pipeline – ties together resolution, slot rendering, composition, the
//! engine session and artifact delivery behind a single [`Forge`] handle.
//!
//! ```text
//! resolve ─▶ render slots (concurrently) ─▶ compose ─▶ acquire page ─▶ print ─▶ artifact
//!                   fonts + css ───────────────┘
//! ```
//!
//! Failures are classified into a [`RenderFailure`] and handed to the
//! registered [`FailureObserver`]s on a detached task, outside the render
//! path.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::artifact::{Artifact, ArtifactStore};
use crate::chrome::ChromeLauncher;
use crate::compose::{compose, RenderedDocument, RenderedSlots};
use crate::config::ForgeConfig;
use crate::engine::EngineLauncher;
use crate::error::{ErrorKind, ForgeError, RenderFailure, Result};
use crate::fonts::FontAssembler;
use crate::page::PdfOptions;
use crate::renderer::{FragmentRenderer, HandlebarsRenderer};
use crate::request::RenderRequest;
use crate::session::{BrowserSession, SessionStatus};
use crate::styles::StyleBundle;
use crate::sweep::{SweepReport, Sweeper};
use crate::templates::{self, SlotKind, TemplateSlotSet};

/// What observers learn about a failed render.
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub correlation_id: Uuid,
    pub kind: ErrorKind,
    pub family: String,
    pub document_kind: String,
    /// Full diagnostic message. Internal only.
    pub detail: String,
    pub occurred_at: DateTime<Utc>,
}

impl FailureReport {
    fn new(failure: &RenderFailure, family: &str, document_kind: &str) -> Self {
        Self {
            correlation_id: failure.correlation_id,
            kind: failure.kind(),
            family: family.to_string(),
            document_kind: document_kind.to_string(),
            detail: failure.error.to_string(),
            occurred_at: Utc::now(),
        }
    }
}

/// Notified after a render failure has been classified. Runs detached from
/// the failed request; a slow observer never delays the caller.
#[async_trait]
pub trait FailureObserver: Send + Sync {
    async fn on_failure(&self, report: &FailureReport);
}

/// Writes every failure report to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

#[async_trait]
impl FailureObserver for LogObserver {
    async fn on_failure(&self, report: &FailureReport) {
        log::warn!(
            target: "invoice_forge::failures",
            "[{}] {} render of {}/{} failed at {}: {}",
            report.correlation_id,
            report.kind,
            report.family,
            report.document_kind,
            report.occurred_at.to_rfc3339(),
            report.detail
        );
    }
}

pub struct ForgeBuilder {
    config: ForgeConfig,
    launcher: Option<Arc<dyn EngineLauncher>>,
    renderer: Option<Arc<dyn FragmentRenderer>>,
    observers: Vec<Arc<dyn FailureObserver>>,
}

impl ForgeBuilder {
    /// Replace the headless Chrome launcher.
    pub fn launcher(mut self, launcher: Arc<dyn EngineLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Replace the Handlebars renderer.
    pub fn renderer(mut self, renderer: Arc<dyn FragmentRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn FailureObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> Result<Forge> {
        self.config.validate()?;
        let config = self.config;

        let launcher: Arc<dyn EngineLauncher> = match self.launcher {
            Some(launcher) => launcher,
            None => Arc::new(ChromeLauncher::new(config.engine.clone())),
        };
        let renderer: Arc<dyn FragmentRenderer> = match self.renderer {
            Some(renderer) => renderer,
            None => Arc::new(HandlebarsRenderer::new(&config.template_dir)),
        };

        Ok(Forge {
            inner: Arc::new(Inner {
                fonts: FontAssembler::new(&config.font_dir),
                renderer,
                session: BrowserSession::new(launcher),
                artifacts: ArtifactStore::new(&config.temp_dir, config.inspect_dir.clone()),
                observers: self.observers.into(),
                shutdown: CancellationToken::new(),
                sweeper: Mutex::new(None),
                config,
            }),
        })
    }
}

struct Inner {
    config: ForgeConfig,
    fonts: FontAssembler,
    renderer: Arc<dyn FragmentRenderer>,
    session: BrowserSession,
    artifacts: ArtifactStore,
    observers: Arc<[Arc<dyn FailureObserver>]>,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// The rendering pipeline. Cheap to clone; clones share one engine session.
#[derive(Clone)]
pub struct Forge {
    inner: Arc<Inner>,
}

impl Forge {
    pub fn builder(config: ForgeConfig) -> ForgeBuilder {
        ForgeBuilder {
            config,
            launcher: None,
            renderer: None,
            observers: Vec::new(),
        }
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.inner.config
    }

    pub fn session(&self) -> &BrowserSession {
        &self.inner.session
    }

    pub fn session_status(&self) -> SessionStatus {
        self.inner.session.status()
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.inner.artifacts
    }

    /// Validate, resolve, render every slot and compose the final document.
    /// No engine is involved.
    pub async fn compose_document(&self, request: &RenderRequest) -> Result<RenderedDocument> {
        request.validate()?;
        let started = Instant::now();
        let slots = templates::resolve(&request.family, &request.kind);
        log::debug!(
            "Resolved {}/{} to {} slot(s)",
            slots.family,
            slots.kind,
            slots.len()
        );

        let font_faces = self.inner.fonts.font_faces(&request.theme.font).await;
        let (styles, rendered) = tokio::try_join!(
            StyleBundle::load(&self.inner.config.template_dir, &slots, font_faces),
            self.render_slots(&slots, request),
        )?;

        let document = compose(slots.kind, &styles, &request.theme, &rendered);
        log::debug!(
            "Composed {} bytes of HTML in {:?}",
            document.len(),
            started.elapsed()
        );
        Ok(document)
    }

    /// Render the slots concurrently. The first failure wins and the other
    /// renders are dropped; no partial slot set is ever returned.
    async fn render_slots(
        &self,
        slots: &TemplateSlotSet,
        request: &RenderRequest,
    ) -> Result<RenderedSlots> {
        let renderer = &self.inner.renderer;
        let fragments = try_join_all(slots.slots().map(|source| async move {
            let html = renderer.render(source, request).await?;
            Ok::<_, ForgeError>((source.slot, html))
        }))
        .await?;

        let mut rendered = RenderedSlots::default();
        for (slot, html) in fragments {
            match slot {
                SlotKind::Header => rendered.header = Some(html),
                SlotKind::Body => rendered.body = html,
                SlotKind::Footer => rendered.footer = Some(html),
            }
        }
        Ok(rendered)
    }

    /// Render `request` to a new artifact file and return it unstreamed.
    pub async fn render_to_file(
        &self,
        request: &RenderRequest,
    ) -> std::result::Result<Artifact, RenderFailure> {
        self.try_render(request)
            .await
            .map_err(|e| self.fail(&request.family, &request.kind, e))
    }

    /// Like [`Forge::render_to_file`], but the caller waits at most the
    /// configured render timeout.
    ///
    /// The render runs on its own task and is never aborted: on timeout the
    /// caller gets [`ForgeError::Timeout`] while the render finishes in the
    /// background, closes its page normally and deletes its artifact.
    pub async fn render_with_timeout(
        &self,
        request: RenderRequest,
    ) -> std::result::Result<Artifact, RenderFailure> {
        let Some(limit) = self.inner.config.render_timeout() else {
            return self.render_to_file(&request).await;
        };
        let (family, kind) = (request.family.clone(), request.kind.clone());

        let (tx, mut rx) = oneshot::channel();
        let forge = self.clone();
        tokio::spawn(async move {
            let result = forge.try_render(&request).await;
            if let Err(Ok(artifact)) = tx.send(result) {
                log::info!(
                    "Render of {} finished after its caller gave up; discarding it",
                    artifact.path().display()
                );
                discard(artifact).await;
            }
        });

        let error = match tokio::time::timeout(limit, &mut rx).await {
            Ok(Ok(Ok(artifact))) => return Ok(artifact),
            Ok(Ok(Err(e))) => e,
            Ok(Err(_)) => ForgeError::Render("render task ended without a result".to_string()),
            Err(_) => {
                rx.close();
                // The render may have completed in the instant before close().
                if let Ok(Ok(artifact)) = rx.try_recv() {
                    discard(artifact).await;
                }
                ForgeError::Timeout(limit)
            }
        };
        Err(self.fail(&family, &kind, error))
    }

    async fn try_render(&self, request: &RenderRequest) -> Result<Artifact> {
        if self.inner.shutdown.is_cancelled() {
            return Err(ForgeError::ShuttingDown);
        }
        let document = self.compose_document(request).await?;
        let options = PdfOptions::from_theme(&request.theme);

        self.inner.artifacts.prepare().await?;
        let started = Instant::now();
        let artifact = self
            .inner
            .artifacts
            .render_to_file(
                &self.inner.session,
                &document,
                &options,
                request.output_name.as_deref(),
            )
            .await?;
        log::debug!(
            "Printed {} ({} bytes) in {:?}",
            artifact.path().display(),
            artifact.len(),
            started.elapsed()
        );
        Ok(artifact)
    }

    fn fail(&self, family: &str, kind: &str, error: ForgeError) -> RenderFailure {
        let failure = RenderFailure::new(error);
        if failure.kind().is_client_error() {
            log::warn!("[{}] rejected request: {}", failure.correlation_id, failure.error);
        } else {
            log::error!("[{}] render failed: {}", failure.correlation_id, failure.error);
        }
        self.notify(FailureReport::new(&failure, family, kind));
        failure
    }

    fn notify(&self, report: FailureReport) {
        if self.inner.observers.is_empty() {
            return;
        }
        let observers = Arc::clone(&self.inner.observers);
        tokio::spawn(async move {
            for observer in observers.iter() {
                observer.on_failure(&report).await;
            }
        });
    }

    /// Start the background artifact sweep. Returns `false` if it is already
    /// running or the pipeline is shutting down.
    pub fn start_sweeper(&self) -> bool {
        let mut sweeper = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if sweeper.is_some() || self.inner.shutdown.is_cancelled() {
            return false;
        }
        let config = &self.inner.config;
        let handle = Sweeper::new(
            &config.temp_dir,
            config.sweep_interval(),
            config.max_artifact_age(),
        )
        .spawn(self.inner.shutdown.child_token());
        *sweeper = Some(handle);
        true
    }

    /// One immediate sweep pass over the artifact directory.
    pub async fn sweep_now(&self) -> io::Result<SweepReport> {
        let config = &self.inner.config;
        Sweeper::new(
            &config.temp_dir,
            config.sweep_interval(),
            config.max_artifact_age(),
        )
        .sweep_once(std::time::SystemTime::now(), Some(&self.inner.shutdown))
        .await
    }

    /// Stop the sweep, wait for it, then tear the engine session down.
    /// Renders started afterwards fail with [`ForgeError::ShuttingDown`].
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let sweeper = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = sweeper {
            if let Err(e) = handle.await {
                log::warn!("Artifact sweep ended abnormally: {e}");
            }
        }
        self.inner.session.shutdown().await;
    }
}

async fn discard(artifact: Artifact) {
    let path = artifact.path().to_path_buf();
    if let Err(e) = artifact.remove().await {
        log::warn!("Could not discard {} (left for the sweep): {e}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn report_carries_classification_and_context() {
        let failure = RenderFailure::new(ForgeError::ArtifactWrite {
            path: PathBuf::from("/tmp/x.pdf"),
            source: io::Error::new(io::ErrorKind::Other, "disk full"),
        });
        let report = FailureReport::new(&failure, "Standard", "Invoice");
        assert_eq!(report.correlation_id, failure.correlation_id);
        assert_eq!(report.kind, ErrorKind::ArtifactWrite);
        assert_eq!(report.family, "Standard");
        assert!(report.detail.contains("/tmp/x.pdf"));
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let config = ForgeConfig {
            sweep_interval_secs: 0,
            ..ForgeConfig::default()
        };
        let err = Forge::builder(config).build().err().expect("invalid config");
        assert!(matches!(err, ForgeError::Config(_)), "{err:?}");
    }

    #[tokio::test]
    async fn log_observer_accepts_reports() {
        let failure = RenderFailure::new(ForgeError::Timeout(std::time::Duration::from_secs(1)));
        LogObserver
            .on_failure(&FailureReport::new(&failure, "Modern", "Quote"))
            .await;
    }
}
