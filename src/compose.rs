//! Document composition – fonts, stylesheet, theme variables and the rendered
//! slots assembled into one HTML document.
//!
//! Pure string assembly. The body slot is mandatory by construction
//! ([`RenderedSlots::body`] is not optional), so composition cannot fail.

use std::fmt::Write as _;

use crate::fonts::lookup_family;
use crate::request::Theme;
use crate::styles::StyleBundle;
use crate::templates::{DocumentKind, SlotKind};

/// Added to every theme font size; PDF output reads small at screen sizes.
pub const FONT_SIZE_DELTA_PX: f32 = 2.0;

/// Rendered HTML fragments of one request, keyed by slot.
#[derive(Debug, Clone, Default)]
pub struct RenderedSlots {
    pub header: Option<String>,
    pub body: String,
    pub footer: Option<String>,
}

impl RenderedSlots {
    fn in_order(&self) -> impl Iterator<Item = (SlotKind, &str)> {
        let header = self.header.as_deref().map(|h| (SlotKind::Header, h));
        let footer = self.footer.as_deref().map(|f| (SlotKind::Footer, f));
        header
            .into_iter()
            .chain(std::iter::once((SlotKind::Body, self.body.as_str())))
            .chain(footer)
    }
}

/// The final HTML handed to the rendering engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    html: String,
}

impl RenderedDocument {
    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn len(&self) -> usize {
        self.html.len()
    }

    pub fn is_empty(&self) -> bool {
        self.html.is_empty()
    }

    pub fn into_html(self) -> String {
        self.html
    }
}

/// Build the complete document.
pub fn compose(
    kind: DocumentKind,
    styles: &StyleBundle,
    theme: &Theme,
    slots: &RenderedSlots,
) -> RenderedDocument {
    let mut html = String::with_capacity(
        styles.font_faces.len() + slots.body.len() + 4096,
    );

    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
    let _ = writeln!(html, "<title>{}</title>", kind.title());
    let _ = writeln!(html, "<style id=\"forge-fonts\">\n{}</style>", styles.font_faces);
    let _ = writeln!(html, "<style id=\"forge-styles\">\n{}</style>", styles.css());
    let _ = writeln!(html, "<style id=\"forge-theme\">\n{}</style>", theme_css(theme));
    html.push_str("</head>\n<body class=\"forge-document forge-background\">\n");

    for (slot, fragment) in slots.in_order() {
        let tag = match slot {
            SlotKind::Header => "header",
            SlotKind::Body => "main",
            SlotKind::Footer => "footer",
        };
        let _ = writeln!(
            html,
            "<{tag} class=\"forge-slot forge-{slot}\" data-slot=\"{slot}\">\n{fragment}\n</{tag}>"
        );
    }

    html.push_str("</body>\n</html>\n");
    RenderedDocument { html }
}

/// CSS variables derived from the theme.
pub fn theme_css(theme: &Theme) -> String {
    let family = lookup_family(&theme.font);
    let size = |px: f32| px + FONT_SIZE_DELTA_PX;
    let repeat = if theme.background_repeat {
        "repeat"
    } else {
        "no-repeat"
    };

    let mut css = String::new();
    css.push_str(":root {\n");
    let _ = writeln!(css, "  --forge-font-family: {};", family.css_stack());
    let _ = writeln!(css, "  --forge-font-size: {}px;", size(theme.font_size_default));
    let _ = writeln!(css, "  --forge-font-size-header: {}px;", size(theme.font_size_header));
    let _ = writeln!(css, "  --forge-font-size-footer: {}px;", size(theme.font_size_footer));
    let _ = writeln!(css, "  --forge-primary-color: {};", theme.primary_color);
    let _ = writeln!(css, "  --forge-secondary-color: {};", theme.secondary_color);
    css.push_str("}\n");
    css.push_str(
        "body { font-family: var(--forge-font-family); font-size: var(--forge-font-size); }\n",
    );
    css.push_str(".forge-header { font-size: var(--forge-font-size-header); }\n");
    css.push_str(".forge-footer { font-size: var(--forge-font-size-footer); }\n");
    let _ = writeln!(css, ".forge-background {{ background-repeat: {repeat}; }}");
    css
}
