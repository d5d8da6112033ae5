//! # invoice-forge – Template-driven invoice → PDF pipeline
//!
//! This crate turns structured document data into PDF files by composing
//! Handlebars fragments into one HTML document and printing it with a shared
//! headless browser. The pipeline stages are:
//!
//! 1. **Resolve** – (family, kind) → header/body/footer slots ([`templates`])
//! 2. **Render** – each slot's markup against the request data, concurrently ([`renderer`])
//! 3. **Style** – CSS fragments and cached `@font-face` blocks ([`styles`], [`fonts`])
//! 4. **Compose** – one complete HTML document ([`compose`])
//! 5. **Print** – a page from the shared engine session ([`session`], [`page`], [`chrome`])
//! 6. **Deliver** – a temp file streamed with delete-on-close, plus a background sweep ([`artifact`], [`sweep`])
//!
//! [`Forge`] wires the stages together.

pub mod artifact;
pub mod chrome;
pub mod compose;
pub mod config;
pub mod engine;
pub mod error;
pub mod fonts;
pub mod page;
pub mod pipeline;
pub mod renderer;
pub mod request;
pub mod session;
pub mod styles;
pub mod sweep;
pub mod templates;

// Re-exports for convenience
pub use artifact::{Artifact, ArtifactStream};
pub use config::ForgeConfig;
pub use error::{ErrorKind, ForgeError, RenderFailure, Result};
pub use pipeline::{FailureObserver, FailureReport, Forge, ForgeBuilder, LogObserver};
pub use request::{RenderRequest, Theme};
pub use templates::{resolve, DocumentKind, TemplateFamily, TemplateSlotSet};
