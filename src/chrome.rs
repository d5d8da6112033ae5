//! Headless Chrome engine, driven through the `headless_chrome` crate.
//!
//! The crate's API is blocking, so every call runs on tokio's blocking pool.
//! Printed PDFs are returned by Chrome as a stream and copied to the sink a
//! chunk at a time.

use std::ffi::OsStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STD, Engine as _};
use headless_chrome::protocol::cdp::{Page, IO};
use headless_chrome::{Browser, LaunchOptions, Tab};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::config::EngineConfig;
use crate::engine::{EngineBrowser, EngineError, EngineLauncher, EnginePage};
use crate::page::PdfOptions;

/// Bytes requested per `IO.read`.
const READ_CHUNK: u32 = 256 * 1024;
/// Chunks in flight between the reader thread and the sink.
const CHUNKS_IN_FLIGHT: usize = 4;

/// Launches a local Chrome/Chromium process.
pub struct ChromeLauncher {
    config: EngineConfig,
}

impl ChromeLauncher {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EngineLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Arc<dyn EngineBrowser>, EngineError> {
        let config = self.config.clone();
        let browser = blocking(move || launch_browser(&config)).await??;
        let version = {
            let browser = browser.clone();
            blocking(move || browser.get_version()).await?
        };
        match version {
            Ok(v) => log::info!("Launched {}", v.product),
            Err(e) => return Err(EngineError::Launch(format!("no response after launch: {e}"))),
        }
        Ok(Arc::new(ChromeBrowser {
            browser: Mutex::new(Some(browser)),
        }))
    }
}

fn launch_browser(config: &EngineConfig) -> Result<Browser, EngineError> {
    let args: Vec<&OsStr> = config.extra_args.iter().map(OsStr::new).collect();
    let options = LaunchOptions::default_builder()
        .headless(config.headless)
        .sandbox(config.sandbox)
        .window_size(Some((config.window_width, config.window_height)))
        .path(config.chrome_path.clone())
        .idle_browser_timeout(Duration::from_secs(config.idle_timeout_secs))
        .args(args)
        .build()
        .map_err(|e| EngineError::Launch(e.to_string()))?;
    Browser::new(options).map_err(|e| EngineError::Launch(e.to_string()))
}

pub struct ChromeBrowser {
    /// Taken on close; dropping the last handle terminates the process.
    browser: Mutex<Option<Browser>>,
}

impl ChromeBrowser {
    fn handle(&self) -> Option<Browser> {
        self.browser
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl EngineBrowser for ChromeBrowser {
    async fn is_alive(&self) -> bool {
        let Some(browser) = self.handle() else {
            return false;
        };
        matches!(blocking(move || browser.get_version()).await, Ok(Ok(_)))
    }

    async fn new_page(&self) -> Result<Box<dyn EnginePage>, EngineError> {
        let browser = self
            .handle()
            .ok_or_else(|| EngineError::Disconnected("browser closed".to_string()))?;
        let tab = blocking(move || browser.new_tab())
            .await?
            .map_err(|e| EngineError::Protocol(format!("could not open tab: {e}")))?;
        Ok(Box::new(ChromePage { tab }))
    }

    async fn close(&self) {
        let browser = self
            .browser
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(browser) = browser {
            if blocking(move || drop(browser)).await.is_err() {
                log::warn!("Chrome shutdown task panicked");
            }
        }
    }
}

pub struct ChromePage {
    tab: Arc<Tab>,
}

#[async_trait]
impl EnginePage for ChromePage {
    async fn print_pdf(
        &mut self,
        html: &str,
        options: &PdfOptions,
        out: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, EngineError> {
        let tab = Arc::clone(&self.tab);
        let html = html.to_string();
        let command = print_command(options);
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(CHUNKS_IN_FLIGHT);

        let reader = tokio::task::spawn_blocking(move || {
            load_html(&tab, &html)?;
            stream_pdf(&tab, command, &tx)
        });

        let mut written = 0u64;
        let mut write_error = None;
        while let Some(chunk) = rx.recv().await {
            if let Err(e) = out.write_all(&chunk).await {
                write_error = Some(e);
                break;
            }
            written += chunk.len() as u64;
        }
        // Stops the reader at its next send if the sink failed.
        drop(rx);

        let read = reader
            .await
            .map_err(|e| EngineError::Protocol(format!("engine task failed: {e}")))?;
        if let Some(e) = write_error {
            return Err(e.into());
        }
        read?;
        Ok(written)
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        let tab = Arc::clone(&self.tab);
        blocking(move || tab.close(true))
            .await?
            .map(|_| ())
            .map_err(|e| EngineError::Protocol(format!("could not close tab: {e}")))
    }
}

/// Replace the blank page's document with `html` and wait for web fonts.
fn load_html(tab: &Tab, html: &str) -> Result<(), EngineError> {
    let protocol = |e: &dyn std::fmt::Display| EngineError::Protocol(format!("load failed: {e}"));

    tab.navigate_to("about:blank")
        .and_then(|tab| tab.wait_until_navigated())
        .map_err(|e| protocol(&e))?;

    let literal = serde_json::to_string(html).map_err(|e| protocol(&e))?;
    let script = format!("document.open(); document.write({literal}); document.close(); true");
    tab.evaluate(&script, false).map_err(|e| protocol(&e))?;
    tab.evaluate("document.fonts.ready.then(() => true)", true)
        .map_err(|e| protocol(&e))?;
    Ok(())
}

/// Print the loaded page as a CDP stream and feed its chunks to `tx`. The
/// stream handle is closed whether or not reading succeeded.
fn stream_pdf(
    tab: &Tab,
    command: Page::PrintToPDF,
    tx: &mpsc::Sender<Vec<u8>>,
) -> Result<(), EngineError> {
    let printed = tab
        .call_method(command)
        .map_err(|e| EngineError::Protocol(format!("print failed: {e}")))?;
    let handle = printed
        .stream
        .ok_or_else(|| EngineError::Protocol("print returned no stream".to_string()))?;

    let result = read_stream(tab, &handle, tx);
    if let Err(e) = tab.call_method(IO::Close { handle }) {
        log::warn!("Could not close PDF stream: {e}");
    }
    result
}

fn read_stream(tab: &Tab, handle: &str, tx: &mpsc::Sender<Vec<u8>>) -> Result<(), EngineError> {
    loop {
        let read = tab
            .call_method(IO::Read {
                handle: handle.to_string(),
                offset: None,
                size: Some(READ_CHUNK),
            })
            .map_err(|e| EngineError::Protocol(format!("reading PDF stream failed: {e}")))?;
        let (chunk, eof) = decode_chunk(read)?;
        if !chunk.is_empty() && tx.blocking_send(chunk).is_err() {
            return Err(EngineError::Protocol("PDF sink went away".to_string()));
        }
        if eof {
            return Ok(());
        }
    }
}

fn decode_chunk(read: IO::ReadReturnObject) -> Result<(Vec<u8>, bool), EngineError> {
    let bytes = if read.base_64_encoded.unwrap_or(false) {
        BASE64_STD
            .decode(read.data.as_bytes())
            .map_err(|e| EngineError::Protocol(format!("bad PDF chunk: {e}")))?
    } else {
        read.data.into_bytes()
    };
    Ok((bytes, read.eof))
}

fn print_command(options: &PdfOptions) -> Page::PrintToPDF {
    let (width, height) = options.paper.size_inches();
    let (top, right, bottom, left) = options.margins.inches();
    Page::PrintToPDF {
        landscape: Some(options.landscape),
        display_header_footer: Some(options.display_header_footer),
        print_background: Some(options.print_background),
        scale: None,
        paper_width: Some(width),
        paper_height: Some(height),
        margin_top: Some(top),
        margin_bottom: Some(bottom),
        margin_left: Some(left),
        margin_right: Some(right),
        page_ranges: None,
        header_template: None,
        footer_template: None,
        prefer_css_page_size: None,
        transfer_mode: Some(Page::PrintToPDFTransfer_modeOption::ReturnAsStream),
        generate_tagged_pdf: None,
        generate_document_outline: None,
    }
}

async fn blocking<T, F>(f: F) -> Result<T, EngineError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EngineError::Protocol(format!("engine task failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::Margins;
    use crate::request::PaperFormat;

    #[test]
    fn print_command_requests_a_stream() {
        let options = PdfOptions {
            paper: PaperFormat::Letter,
            landscape: true,
            margins: Margins::new(96.0, 48.0, 96.0, 48.0),
            print_background: true,
            display_header_footer: false,
        };
        let command = print_command(&options);

        assert_eq!(
            command.transfer_mode,
            Some(Page::PrintToPDFTransfer_modeOption::ReturnAsStream)
        );
        assert_eq!(command.paper_width, Some(8.5));
        assert_eq!(command.paper_height, Some(11.0));
        assert_eq!(command.margin_top, Some(1.0));
        assert_eq!(command.margin_left, Some(0.5));
        assert_eq!(command.landscape, Some(true));
        assert_eq!(command.print_background, Some(true));
    }

    #[test]
    fn base64_chunks_are_decoded() {
        let read = IO::ReadReturnObject {
            base_64_encoded: Some(true),
            data: BASE64_STD.encode(b"%PDF-1.7\n\x00\xff"),
            eof: false,
        };
        let (bytes, eof) = decode_chunk(read).unwrap();
        assert_eq!(bytes, b"%PDF-1.7\n\x00\xff");
        assert!(!eof);
    }

    #[test]
    fn plain_chunks_pass_through() {
        let read = IO::ReadReturnObject {
            base_64_encoded: None,
            data: "%%EOF\n".to_string(),
            eof: true,
        };
        assert_eq!(decode_chunk(read).unwrap(), (b"%%EOF\n".to_vec(), true));
    }

    #[test]
    fn corrupt_chunk_is_a_protocol_error() {
        let read = IO::ReadReturnObject {
            base_64_encoded: Some(true),
            data: "not base64!".to_string(),
            eof: true,
        };
        assert!(matches!(decode_chunk(read), Err(EngineError::Protocol(_))));
    }
}
