//! CSS fragment loading.
//!
//! Each family keeps its stylesheet split into named fragments under
//! `<template_dir>/<family>/css/`. A request gets one [`StyleBundle`]: the
//! fragments it needs plus the embedded font block.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{ForgeError, Result};
use crate::templates::{SlotKind, TemplateFamily, TemplateSlotSet};

/// Named CSS fragment of a family stylesheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CssFragment {
    Common,
    Header,
    Body,
    Footer,
    Background,
}

impl CssFragment {
    /// Concatenation order.
    pub const ORDER: [CssFragment; 5] = [
        CssFragment::Common,
        CssFragment::Header,
        CssFragment::Body,
        CssFragment::Footer,
        CssFragment::Background,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            CssFragment::Common => "common.css",
            CssFragment::Header => "header.css",
            CssFragment::Body => "body.css",
            CssFragment::Footer => "footer.css",
            CssFragment::Background => "background.css",
        }
    }

    pub fn path(self, template_dir: &Path, family: TemplateFamily) -> PathBuf {
        template_dir
            .join(family.dir_name())
            .join("css")
            .join(self.file_name())
    }

    /// Header and footer CSS is only pulled in when the slot exists.
    fn wanted_by(self, slots: &TemplateSlotSet) -> bool {
        match self {
            CssFragment::Header => slots.has(SlotKind::Header),
            CssFragment::Footer => slots.has(SlotKind::Footer),
            _ => true,
        }
    }
}

/// The styles for one request.
#[derive(Debug, Clone)]
pub struct StyleBundle {
    /// Shared, cached `@font-face` block.
    pub font_faces: Arc<str>,
    /// Fragments in [`CssFragment::ORDER`], missing ones omitted.
    pub fragments: Vec<(CssFragment, String)>,
}

impl StyleBundle {
    /// Read the fragments `slots` needs. A missing fragment file contributes
    /// nothing; any other read error fails the request.
    pub async fn load(
        template_dir: &Path,
        slots: &TemplateSlotSet,
        font_faces: Arc<str>,
    ) -> Result<Self> {
        let mut fragments = Vec::new();
        for fragment in CssFragment::ORDER {
            if !fragment.wanted_by(slots) {
                continue;
            }
            let path = fragment.path(template_dir, slots.family);
            match tokio::fs::read_to_string(&path).await {
                Ok(css) => fragments.push((fragment, css)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    log::debug!("No {} for {}, skipping", fragment.file_name(), slots.family);
                }
                Err(source) => return Err(ForgeError::StyleLoad { path, source }),
            }
        }
        Ok(Self {
            font_faces,
            fragments,
        })
    }

    /// All fragments concatenated in order.
    pub fn css(&self) -> String {
        let mut out = String::new();
        for (_, css) in &self.fragments {
            out.push_str(css);
            if !css.ends_with('\n') {
                out.push('\n');
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::{resolve_slots, DocumentKind};

    fn write_css(root: &Path, family: &str, name: &str, css: &str) {
        let dir = root.join(family).join("css");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(name), css).unwrap();
    }

    #[tokio::test]
    async fn concatenates_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        write_css(tmp.path(), "standard", "background.css", ".bg{}");
        write_css(tmp.path(), "standard", "common.css", ".common{}");
        write_css(tmp.path(), "standard", "footer.css", ".footer{}");
        write_css(tmp.path(), "standard", "header.css", ".header{}");

        let slots = resolve_slots(TemplateFamily::Standard, DocumentKind::Invoice);
        let bundle = StyleBundle::load(tmp.path(), &slots, Arc::from("")).await.unwrap();
        let kinds: Vec<CssFragment> = bundle.fragments.iter().map(|(k, _)| *k).collect();
        // body.css is missing and simply skipped.
        assert_eq!(
            kinds,
            vec![
                CssFragment::Common,
                CssFragment::Header,
                CssFragment::Footer,
                CssFragment::Background
            ]
        );
        assert_eq!(bundle.css(), ".common{}\n.header{}\n.footer{}\n.bg{}\n");
    }

    #[tokio::test]
    async fn body_only_slot_set_skips_header_and_footer_css() {
        let tmp = tempfile::tempdir().unwrap();
        write_css(tmp.path(), "standard", "header.css", ".header{}");
        write_css(tmp.path(), "standard", "body.css", ".body{}");

        let slots = resolve_slots(TemplateFamily::Standard, DocumentKind::Receipt);
        let bundle = StyleBundle::load(tmp.path(), &slots, Arc::from("")).await.unwrap();
        assert_eq!(bundle.css(), ".body{}\n");
    }

    #[tokio::test]
    async fn unreadable_fragment_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        // A directory where a file is expected cannot be read as text.
        std::fs::create_dir_all(tmp.path().join("compact/css/common.css")).unwrap();

        let slots = resolve_slots(TemplateFamily::Compact, DocumentKind::Invoice);
        let err = StyleBundle::load(tmp.path(), &slots, Arc::from("")).await.unwrap_err();
        assert!(matches!(err, ForgeError::StyleLoad { .. }));
    }
}
