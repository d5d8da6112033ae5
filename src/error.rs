//! Error taxonomy for the rendering pipeline.
//!
//! Every stage returns [`ForgeError`]. The boundary layer wraps failures in a
//! [`RenderFailure`], which pairs the error with a correlation id and only
//! exposes a generic message through `Display`.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::templates::SlotKind;

pub type Result<T> = std::result::Result<T, ForgeError>;

#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("template for {slot} slot not found: {source_id} ({})", .path.display())]
    TemplateNotFound {
        slot: SlotKind,
        source_id: String,
        path: PathBuf,
    },

    #[error("template for {slot} slot failed to compile or bind: {source_id}: {message}")]
    TemplateCompile {
        slot: SlotKind,
        source_id: String,
        message: String,
    },

    #[error("could not read stylesheet {}: {source}", .path.display())]
    StyleLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not load font file {}: {source}", .path.display())]
    FontLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rendering engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("rendering engine failed: {0}")]
    Render(String),

    #[error("could not write artifact {}: {source}", .path.display())]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("render did not finish within {0:?}")]
    Timeout(std::time::Duration),

    #[error("renderer is shutting down")]
    ShuttingDown,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Coarse classification used by the boundary layer and failure observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidRequest,
    TemplateNotFound,
    TemplateCompile,
    StyleLoad,
    FontLoad,
    EngineUnavailable,
    Render,
    ArtifactWrite,
    Timeout,
    ShuttingDown,
    Config,
    Io,
}

impl ErrorKind {
    /// Client errors are reported back as such; everything else is a server
    /// side failure.
    pub fn is_client_error(self) -> bool {
        matches!(self, ErrorKind::InvalidRequest)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::TemplateNotFound => "template_not_found",
            ErrorKind::TemplateCompile => "template_compile",
            ErrorKind::StyleLoad => "style_load",
            ErrorKind::FontLoad => "font_load",
            ErrorKind::EngineUnavailable => "engine_unavailable",
            ErrorKind::Render => "render",
            ErrorKind::ArtifactWrite => "artifact_write",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ShuttingDown => "shutting_down",
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ForgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ForgeError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ForgeError::TemplateNotFound { .. } => ErrorKind::TemplateNotFound,
            ForgeError::TemplateCompile { .. } => ErrorKind::TemplateCompile,
            ForgeError::StyleLoad { .. } => ErrorKind::StyleLoad,
            ForgeError::FontLoad { .. } => ErrorKind::FontLoad,
            ForgeError::EngineUnavailable(_) => ErrorKind::EngineUnavailable,
            ForgeError::Render(_) => ErrorKind::Render,
            ForgeError::ArtifactWrite { .. } => ErrorKind::ArtifactWrite,
            ForgeError::Timeout(_) => ErrorKind::Timeout,
            ForgeError::ShuttingDown => ErrorKind::ShuttingDown,
            ForgeError::Config(_) => ErrorKind::Config,
            ForgeError::Io { .. } => ErrorKind::Io,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ForgeError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A classified pipeline failure as seen by the caller.
///
/// `Display` is safe to show to end users: it carries the correlation id and
/// nothing else. The wrapped error keeps the full diagnostic context for logs.
#[derive(Debug)]
pub struct RenderFailure {
    pub correlation_id: Uuid,
    pub error: ForgeError,
}

impl RenderFailure {
    pub fn new(error: ForgeError) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            error,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

impl fmt::Display for RenderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind().is_client_error() {
            write!(f, "invalid render request (reference {})", self.correlation_id)
        } else {
            write!(f, "document rendering failed (reference {})", self.correlation_id)
        }
    }
}

impl std::error::Error for RenderFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
