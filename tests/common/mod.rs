//! Shared fixtures: an in-process mock engine that counts launches and page
//! lifecycles, plus directory and request helpers.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use invoice_forge::engine::{EngineBrowser, EngineError, EngineLauncher, EnginePage};
use invoice_forge::page::PdfOptions;
use invoice_forge::renderer::{FragmentRenderer, HandlebarsRenderer};
use invoice_forge::templates::SlotSource;
use invoice_forge::{ForgeConfig, RenderRequest};

// =====================================================================
// Mock engine
// =====================================================================

#[derive(Default)]
pub struct EngineState {
    pub launches: AtomicUsize,
    pub browsers_closed: AtomicUsize,
    pub pages_opened: AtomicUsize,
    pub pages_closed: AtomicUsize,
    pub prints: AtomicUsize,
    /// Number of upcoming launches that fail.
    pub failing_launches: AtomicUsize,
    pub launch_delay_ms: AtomicU64,
    pub print_delay_ms: AtomicU64,
    pub fail_print: AtomicBool,
    pub last_html: Mutex<Option<String>>,
    current: Mutex<Option<Arc<MockBrowser>>>,
}

/// Cheap to clone; clones share counters and knobs.
#[derive(Clone, Default)]
pub struct MockEngine {
    pub state: Arc<EngineState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn launcher(&self) -> Arc<dyn EngineLauncher> {
        Arc::new(self.clone())
    }

    pub fn launches(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    pub fn pages_opened(&self) -> usize {
        self.state.pages_opened.load(Ordering::SeqCst)
    }

    pub fn pages_closed(&self) -> usize {
        self.state.pages_closed.load(Ordering::SeqCst)
    }

    pub fn browsers_closed(&self) -> usize {
        self.state.browsers_closed.load(Ordering::SeqCst)
    }

    pub fn set_launch_delay(&self, delay: Duration) {
        self.state
            .launch_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_print_delay(&self, delay: Duration) {
        self.state
            .print_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fail_next_launches(&self, n: usize) {
        self.state.failing_launches.store(n, Ordering::SeqCst);
    }

    pub fn fail_prints(&self, fail: bool) {
        self.state.fail_print.store(fail, Ordering::SeqCst);
    }

    /// Simulate the engine process exiting underneath the session.
    pub fn kill_browser(&self) {
        if let Some(browser) = self.state.current.lock().unwrap().as_ref() {
            browser.alive.store(false, Ordering::SeqCst);
        }
    }

    pub fn last_html(&self) -> Option<String> {
        self.state.last_html.lock().unwrap().clone()
    }

    /// Wait (bounded) until every opened page has been closed. Needed where
    /// pages are closed from `Drop` on a detached task.
    pub async fn wait_for_pages_closed(&self, expected: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.pages_closed() < expected {
            assert!(
                tokio::time::Instant::now() < deadline,
                "only {} of {expected} pages closed",
                self.pages_closed()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl EngineLauncher for MockEngine {
    async fn launch(&self) -> Result<Arc<dyn EngineBrowser>, EngineError> {
        self.state.launches.fetch_add(1, Ordering::SeqCst);
        let delay = self.state.launch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let failing = &self.state.failing_launches;
        if failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(EngineError::Launch("injected launch failure".into()));
        }

        let browser = Arc::new(MockBrowser {
            alive: AtomicBool::new(true),
            state: Arc::clone(&self.state),
        });
        *self.state.current.lock().unwrap() = Some(Arc::clone(&browser));
        Ok(browser)
    }
}

pub struct MockBrowser {
    alive: AtomicBool,
    state: Arc<EngineState>,
}

#[async_trait]
impl EngineBrowser for MockBrowser {
    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn new_page(&self) -> Result<Box<dyn EnginePage>, EngineError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(EngineError::Disconnected("mock browser is gone".into()));
        }
        self.state.pages_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockPage {
            state: Arc::clone(&self.state),
        }))
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.state.browsers_closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockPage {
    state: Arc<EngineState>,
}

#[async_trait]
impl EnginePage for MockPage {
    async fn print_pdf(
        &mut self,
        html: &str,
        _options: &PdfOptions,
        out: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, EngineError> {
        let delay = self.state.print_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.state.fail_print.load(Ordering::SeqCst) {
            return Err(EngineError::Protocol("injected print failure".into()));
        }

        self.state.prints.fetch_add(1, Ordering::SeqCst);
        *self.state.last_html.lock().unwrap() = Some(html.to_string());
        let pdf = format!("%PDF-1.7\n% {} bytes of html\n%%EOF\n", html.len());
        out.write_all(pdf.as_bytes()).await?;
        Ok(pdf.len() as u64)
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        self.state.pages_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =====================================================================
// Renderer wrapper
// =====================================================================

/// Delegates to Handlebars and records which sources were rendered.
pub struct CountingRenderer {
    inner: HandlebarsRenderer,
    pub rendered: Mutex<Vec<String>>,
}

impl CountingRenderer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: HandlebarsRenderer::new(root),
            rendered: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.rendered.lock().unwrap().clone()
    }
}

#[async_trait]
impl FragmentRenderer for CountingRenderer {
    async fn render(
        &self,
        source: &SlotSource,
        request: &RenderRequest,
    ) -> invoice_forge::Result<String> {
        self.rendered.lock().unwrap().push(source.id());
        self.inner.render(source, request).await
    }
}

// =====================================================================
// Directories and requests
// =====================================================================

/// The template tree shipped with the crate.
pub fn shipped_templates() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("templates")
}

/// Config rooted in `scratch`: shipped templates, a font directory holding a
/// single fake regular weight of the default family, and a private temp dir.
pub fn config_in(scratch: &Path) -> ForgeConfig {
    let fonts = scratch.join("fonts");
    std::fs::create_dir_all(fonts.join("Default")).unwrap();
    std::fs::write(fonts.join("Default/Default-Regular.ttf"), b"\x00\x01\x00\x00fake").unwrap();

    ForgeConfig {
        template_dir: shipped_templates(),
        font_dir: fonts,
        temp_dir: scratch.join("artifacts"),
        ..ForgeConfig::default()
    }
}

pub fn invoice_data() -> Value {
    json!({
        "number": "INV-2024-001",
        "date": "2024-03-01",
        "currency": "EUR",
        "total": 1234.5,
        "company": { "name": "Acme & Sons" },
        "customer": { "name": "Globex Corporation" },
        "items": [
            { "description": "Consulting", "quantity": 10, "unitPrice": 100.0, "total": 1000.0 },
            { "description": "Travel", "quantity": 1, "unitPrice": 234.5, "total": 234.5 }
        ]
    })
}

pub fn invoice_request(family: &str, kind: &str) -> RenderRequest {
    RenderRequest::new(family, kind, invoice_data())
}

pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    }
}

/// Wait (bounded) until `dir` holds no entries. Files abandoned by a dropped
/// render are removed on a detached task.
pub async fn wait_for_empty_dir(dir: &Path) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let left = files_in(dir);
        if left.is_empty() {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "files left behind: {left:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
