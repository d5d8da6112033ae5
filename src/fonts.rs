//! Font embedding – builds `@font-face` blocks with each variant inlined as a
//! base64 data URI, so the rendering engine never has to resolve font URLs.
//!
//! Blocks are cached per family for the life of the process. The font
//! vocabulary is fixed, so the cache is bounded by [`FONT_FAMILIES`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64_STD, Engine as _};
use tokio::sync::OnceCell;

use crate::error::ForgeError;

/// A supported font family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FontFamily {
    /// Name used in requests (matched case-insensitively).
    pub name: &'static str,
    /// Directory under the font root, also the file name prefix.
    pub dir: &'static str,
    /// Family name emitted in CSS.
    pub css_name: &'static str,
    /// Generic fallback appended to the CSS font stack.
    pub generic: &'static str,
}

pub const DEFAULT_FAMILY: FontFamily = FontFamily {
    name: "Default",
    dir: "Default",
    css_name: "Forge Sans",
    generic: "sans-serif",
};

pub const FONT_FAMILIES: [FontFamily; 5] = [
    DEFAULT_FAMILY,
    FontFamily {
        name: "Roboto",
        dir: "Roboto",
        css_name: "Roboto",
        generic: "sans-serif",
    },
    FontFamily {
        name: "OpenSans",
        dir: "OpenSans",
        css_name: "Open Sans",
        generic: "sans-serif",
    },
    FontFamily {
        name: "Lato",
        dir: "Lato",
        css_name: "Lato",
        generic: "sans-serif",
    },
    FontFamily {
        name: "Merriweather",
        dir: "Merriweather",
        css_name: "Merriweather",
        generic: "serif",
    },
];

/// Look up a family by request name, falling back to [`DEFAULT_FAMILY`].
pub fn lookup_family(name: &str) -> FontFamily {
    let wanted: String = name.chars().filter(|c| !c.is_whitespace()).collect();
    FONT_FAMILIES
        .iter()
        .copied()
        .find(|f| f.name.eq_ignore_ascii_case(&wanted))
        .unwrap_or(DEFAULT_FAMILY)
}

impl FontFamily {
    /// CSS `font-family` value with the generic fallback.
    pub fn css_stack(&self) -> String {
        format!("'{}', {}", self.css_name, self.generic)
    }
}

/// One weight/style combination of a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FontVariant {
    pub suffix: &'static str,
    pub weight: u16,
    pub italic: bool,
}

pub const FONT_VARIANTS: [FontVariant; 6] = [
    FontVariant { suffix: "Light", weight: 300, italic: false },
    FontVariant { suffix: "Regular", weight: 400, italic: false },
    FontVariant { suffix: "Italic", weight: 400, italic: true },
    FontVariant { suffix: "Medium", weight: 500, italic: false },
    FontVariant { suffix: "Bold", weight: 700, italic: false },
    FontVariant { suffix: "BoldItalic", weight: 700, italic: true },
];

/// File extensions tried in order, with the CSS format hint and MIME type.
const FONT_FORMATS: [(&str, &str, &str); 4] = [
    ("woff2", "woff2", "font/woff2"),
    ("woff", "woff", "font/woff"),
    ("ttf", "truetype", "font/ttf"),
    ("otf", "opentype", "font/otf"),
];

/// Builds and caches `@font-face` blocks per family.
pub struct FontAssembler {
    root: PathBuf,
    cache: HashMap<&'static str, OnceCell<Arc<str>>>,
}

impl FontAssembler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let cache = FONT_FAMILIES
            .iter()
            .map(|f| (f.name, OnceCell::new()))
            .collect();
        Self {
            root: root.into(),
            cache,
        }
    }

    /// The `@font-face` block for `family`. The first call for a family reads
    /// and encodes its files; later calls (including concurrent ones) share
    /// the cached block. Unknown families resolve to the default family.
    pub async fn font_faces(&self, family: &str) -> Arc<str> {
        let family = lookup_family(family);
        // Every entry in FONT_FAMILIES has a cell.
        let cell = &self.cache[family.name];
        cell.get_or_init(|| async {
            let block = build_font_faces(&self.root, family).await;
            Arc::from(block)
        })
        .await
        .clone()
    }

    /// True if the block for `family` has already been built.
    pub fn is_cached(&self, family: &str) -> bool {
        let family = lookup_family(family);
        self.cache[family.name].initialized()
    }
}

async fn build_font_faces(root: &Path, family: FontFamily) -> String {
    let dir = root.join(family.dir);
    let mut block = String::new();
    let mut embedded = 0usize;

    for variant in FONT_VARIANTS {
        match load_variant(&dir, family, variant).await {
            Ok(Some(face)) => {
                block.push_str(&face);
                embedded += 1;
            }
            Ok(None) => {
                log::warn!(
                    "Font {} {} not found under {}; the document will lack this weight",
                    family.name,
                    variant.suffix,
                    dir.display()
                );
            }
            Err(e) => log::warn!("Skipping font variant: {e}"),
        }
    }

    log::debug!(
        "Built font-face block for {} ({embedded}/{} variants, {} bytes)",
        family.name,
        FONT_VARIANTS.len(),
        block.len()
    );
    block
}

/// Load one variant. `Ok(None)` means no file with a supported extension
/// exists; read failures of an existing file are reported as `FontLoad`.
async fn load_variant(
    dir: &Path,
    family: FontFamily,
    variant: FontVariant,
) -> Result<Option<String>, ForgeError> {
    for (ext, format, mime) in FONT_FORMATS {
        let path = dir.join(format!("{}-{}.{ext}", family.dir, variant.suffix));
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                return Ok(Some(font_face_rule(family, variant, format, mime, &bytes)));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(source) => return Err(ForgeError::FontLoad { path, source }),
        }
    }
    Ok(None)
}

fn font_face_rule(
    family: FontFamily,
    variant: FontVariant,
    format: &str,
    mime: &str,
    bytes: &[u8],
) -> String {
    format!(
        "@font-face {{ font-family: '{}'; font-style: {}; font-weight: {}; \
         src: url(data:{mime};base64,{}) format('{format}'); }}\n",
        family.css_name,
        if variant.italic { "italic" } else { "normal" },
        variant.weight,
        BASE64_STD.encode(bytes),
    )
}
