//! Seams to the external rendering engine.
//!
//! The session and page modules only talk to these traits. The production
//! implementation lives in [`crate::chrome`]; tests plug in their own.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWrite;

use crate::error::ForgeError;
use crate::page::PdfOptions;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("launch failed: {0}")]
    Launch(String),

    #[error("connection lost: {0}")]
    Disconnected(String),

    #[error("{0}")]
    Protocol(String),

    #[error("write failed: {0}")]
    Write(#[from] std::io::Error),
}

impl From<EngineError> for ForgeError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Launch(msg) | EngineError::Disconnected(msg) => {
                ForgeError::EngineUnavailable(msg)
            }
            other => ForgeError::Render(other.to_string()),
        }
    }
}

/// Starts the engine process and returns a live connection.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn EngineBrowser>, EngineError>;
}

/// A live connection to the engine.
#[async_trait]
pub trait EngineBrowser: Send + Sync {
    /// Cheap liveness check.
    async fn is_alive(&self) -> bool;

    async fn new_page(&self) -> Result<Box<dyn EnginePage>, EngineError>;

    /// Terminate the engine. Called once on session teardown.
    async fn close(&self);
}

/// One engine page (tab). Owned by exactly one request.
#[async_trait]
pub trait EnginePage: Send {
    /// Load `html` and print it, writing the PDF to `out`. Returns the number
    /// of bytes written.
    async fn print_pdf(
        &mut self,
        html: &str,
        options: &PdfOptions,
        out: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, EngineError>;

    async fn close(&mut self) -> Result<(), EngineError>;
}
