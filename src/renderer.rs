//! Slot rendering – binds a markup source against the request data.
//!
//! Markup sources are Handlebars templates on disk. They are compiled on first
//! use and kept in a shared registry, so concurrent renders of the same slot
//! only pay for compilation once (or, under a race, twice).

use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use handlebars::{
    handlebars_helper, Context, Handlebars, Helper, HelperResult, Output, RenderContext,
    RenderErrorReason,
};
use serde::Serialize;
use serde_json::Value;

use crate::error::{ForgeError, Result};
use crate::request::{RenderRequest, Theme};
use crate::templates::SlotSource;

/// Renders one slot to an HTML fragment. Implementations must be safe to call
/// concurrently for different slots of the same request.
#[async_trait]
pub trait FragmentRenderer: Send + Sync {
    async fn render(&self, source: &SlotSource, request: &RenderRequest) -> Result<String>;
}

/// What a template sees: `data.*`, `theme.*` and `document.*`.
#[derive(Debug, Serialize)]
pub struct RenderModel<'a> {
    pub data: &'a Value,
    pub theme: &'a Theme,
    pub document: DocumentInfo,
}

#[derive(Debug, Serialize)]
pub struct DocumentInfo {
    pub family: String,
    pub kind: String,
    pub title: &'static str,
    pub slot: &'static str,
}

impl<'a> RenderModel<'a> {
    pub fn new(source: &SlotSource, request: &'a RenderRequest) -> Self {
        let kind = crate::templates::DocumentKind::parse(&request.kind).unwrap_or_default();
        Self {
            data: &request.data,
            theme: &request.theme,
            document: DocumentInfo {
                family: source.family.to_string(),
                kind: kind.to_string(),
                title: kind.title(),
                slot: source.slot.as_str(),
            },
        }
    }
}

fn money_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let param = h
        .param(0)
        .ok_or(RenderErrorReason::ParamNotFoundForIndex("money", 0))?;
    let amount = param.value().as_f64().ok_or_else(|| {
        RenderErrorReason::Other(format!("money: expected a number, got {}", param.value()))
    })?;
    out.write(&format!("{amount:.2}"))?;
    Ok(())
}

handlebars_helper!(upper: |s: str| s.to_uppercase());

/// [`FragmentRenderer`] backed by Handlebars templates under a root directory.
///
/// Strict mode is on: a template that references a field the data does not
/// have fails with [`ForgeError::TemplateCompile`] instead of rendering blank.
pub struct HandlebarsRenderer {
    root: PathBuf,
    registry: RwLock<Handlebars<'static>>,
}

impl HandlebarsRenderer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_helper("money", Box::new(money_helper));
        registry.register_helper("upper", Box::new(upper));
        Self {
            root: root.into(),
            registry: RwLock::new(registry),
        }
    }

    fn is_compiled(&self, key: &str) -> bool {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .has_template(key)
    }

    async fn compile(&self, source: &SlotSource, key: &str) -> Result<()> {
        let path = self.root.join(source.relative_path());
        let markup = match tokio::fs::read_to_string(&path).await {
            Ok(markup) => markup,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ForgeError::TemplateNotFound {
                    slot: source.slot,
                    source_id: key.to_string(),
                    path,
                });
            }
            Err(e) => return Err(ForgeError::io(path, e)),
        };

        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register_template_string(key, markup)
            .map_err(|e| ForgeError::TemplateCompile {
                slot: source.slot,
                source_id: key.to_string(),
                message: e.to_string(),
            })?;
        log::debug!("Compiled template {key}");
        Ok(())
    }
}

#[async_trait]
impl FragmentRenderer for HandlebarsRenderer {
    async fn render(&self, source: &SlotSource, request: &RenderRequest) -> Result<String> {
        let key = source.id();
        if !self.is_compiled(&key) {
            self.compile(source, &key).await?;
        }

        let model = RenderModel::new(source, request);
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .render(&key, &model)
            .map_err(|e| ForgeError::TemplateCompile {
                slot: source.slot,
                source_id: key.clone(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::{resolve_slots, DocumentKind, TemplateFamily};
    use serde_json::json;
    use std::path::Path;

    fn write_template(root: &Path, family: &str, name: &str, markup: &str) {
        let dir = root.join(family);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{name}.hbs")), markup).unwrap();
    }

    fn request(data: Value) -> RenderRequest {
        RenderRequest::new("Standard", "Invoice", data)
    }

    #[tokio::test]
    async fn renders_with_helpers_and_escaping() {
        let tmp = tempfile::tempdir().unwrap();
        write_template(
            tmp.path(),
            "standard",
            "body",
            "<p>{{upper data.customer}}</p><p>{{money data.total}}</p><p>{{document.title}}</p>",
        );
        let renderer = HandlebarsRenderer::new(tmp.path());
        let slots = resolve_slots(TemplateFamily::Standard, DocumentKind::Invoice);

        let html = renderer
            .render(&slots.body, &request(json!({ "customer": "a & b", "total": 12.5 })))
            .await
            .unwrap();
        assert_eq!(html, "<p>A &amp; B</p><p>12.50</p><p>Invoice</p>");
    }

    #[tokio::test]
    async fn missing_markup_is_template_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let renderer = HandlebarsRenderer::new(tmp.path());
        let slots = resolve_slots(TemplateFamily::Standard, DocumentKind::Invoice);
        let header = slots.header.unwrap();

        let err = renderer.render(&header, &request(json!({}))).await.unwrap_err();
        match err {
            ForgeError::TemplateNotFound { slot, source_id, .. } => {
                assert_eq!(slot, crate::templates::SlotKind::Header);
                assert_eq!(source_id, "standard/header");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn syntax_error_is_template_compile() {
        let tmp = tempfile::tempdir().unwrap();
        write_template(tmp.path(), "standard", "body", "{{#each data.items}}<li>");
        let renderer = HandlebarsRenderer::new(tmp.path());
        let slots = resolve_slots(TemplateFamily::Standard, DocumentKind::Invoice);

        let err = renderer.render(&slots.body, &request(json!({}))).await.unwrap_err();
        assert!(matches!(err, ForgeError::TemplateCompile { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn missing_field_is_template_compile() {
        let tmp = tempfile::tempdir().unwrap();
        write_template(tmp.path(), "standard", "body", "<p>{{data.customer.name}}</p>");
        let renderer = HandlebarsRenderer::new(tmp.path());
        let slots = resolve_slots(TemplateFamily::Standard, DocumentKind::Invoice);

        let err = renderer
            .render(&slots.body, &request(json!({ "vendor": "x" })))
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::TemplateCompile { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn compiled_templates_are_reused() {
        let tmp = tempfile::tempdir().unwrap();
        write_template(tmp.path(), "standard", "body", "<p>{{data.n}}</p>");
        let renderer = HandlebarsRenderer::new(tmp.path());
        let slots = resolve_slots(TemplateFamily::Standard, DocumentKind::Invoice);

        renderer.render(&slots.body, &request(json!({ "n": 1 }))).await.unwrap();
        std::fs::remove_file(tmp.path().join("standard/body.hbs")).unwrap();
        let html = renderer.render(&slots.body, &request(json!({ "n": 2 }))).await.unwrap();
        assert_eq!(html, "<p>2</p>");
    }
}
