//! Template resolution – maps a (family, document kind) pair onto the set of
//! named slots that make up the document.
//!
//! The mapping is a small decision table. It is total: unknown families fall
//! back to [`TemplateFamily::Standard`] and unknown kinds fall back to the
//! family's default wiring. Every slot set has exactly one body slot, which the
//! type enforces.

use std::fmt;

/// A named bundle of markup and CSS conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TemplateFamily {
    /// Standard business layout (default).
    #[default]
    Standard,
    /// Compact single-column layout, used for till receipts and slips.
    Compact,
    /// Modern layout with a coloured header band.
    Modern,
}

impl TemplateFamily {
    pub const ALL: [TemplateFamily; 3] = [
        TemplateFamily::Standard,
        TemplateFamily::Compact,
        TemplateFamily::Modern,
    ];

    /// Parse a family selector. Returns `None` for unknown names.
    pub fn parse(name: &str) -> Option<Self> {
        match normalize(name).as_str() {
            "standard" => Some(TemplateFamily::Standard),
            "compact" => Some(TemplateFamily::Compact),
            "modern" => Some(TemplateFamily::Modern),
            _ => None,
        }
    }

    /// Parse a family selector, falling back to the default family.
    pub fn resolve(name: &str) -> Self {
        Self::parse(name).unwrap_or_else(|| {
            log::debug!("Unknown template family '{name}', using {}", Self::default());
            Self::default()
        })
    }

    /// Directory name under the template root.
    pub fn dir_name(self) -> &'static str {
        match self {
            TemplateFamily::Standard => "standard",
            TemplateFamily::Compact => "compact",
            TemplateFamily::Modern => "modern",
        }
    }
}

impl fmt::Display for TemplateFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TemplateFamily::Standard => "Standard",
            TemplateFamily::Compact => "Compact",
            TemplateFamily::Modern => "Modern",
        };
        f.write_str(name)
    }
}

/// The sub-type of document being produced within a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DocumentKind {
    #[default]
    Invoice,
    Quote,
    PurchaseOrder,
    CreditNote,
    Receipt,
    DeliveryNote,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 6] = [
        DocumentKind::Invoice,
        DocumentKind::Quote,
        DocumentKind::PurchaseOrder,
        DocumentKind::CreditNote,
        DocumentKind::Receipt,
        DocumentKind::DeliveryNote,
    ];

    /// Parse a kind selector. Case, spaces, dashes and underscores are ignored
    /// so `purchase-order`, `Purchase Order` and `PurchaseOrder` all match.
    pub fn parse(name: &str) -> Option<Self> {
        match normalize(name).as_str() {
            "invoice" => Some(DocumentKind::Invoice),
            "quote" | "quotation" => Some(DocumentKind::Quote),
            "purchaseorder" => Some(DocumentKind::PurchaseOrder),
            "creditnote" => Some(DocumentKind::CreditNote),
            "receipt" => Some(DocumentKind::Receipt),
            "deliverynote" => Some(DocumentKind::DeliveryNote),
            _ => None,
        }
    }

    /// Human readable title, used as the document `<title>`.
    pub fn title(self) -> &'static str {
        match self {
            DocumentKind::Invoice => "Invoice",
            DocumentKind::Quote => "Quote",
            DocumentKind::PurchaseOrder => "Purchase Order",
            DocumentKind::CreditNote => "Credit Note",
            DocumentKind::Receipt => "Receipt",
            DocumentKind::DeliveryNote => "Delivery Note",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// A named region of the final document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Header,
    Body,
    Footer,
}

impl SlotKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SlotKind::Header => "header",
            SlotKind::Body => "body",
            SlotKind::Footer => "footer",
        }
    }
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one markup source: `<template_dir>/<family>/<name>.hbs`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotSource {
    pub slot: SlotKind,
    pub family: TemplateFamily,
    pub name: &'static str,
}

impl SlotSource {
    fn new(slot: SlotKind, family: TemplateFamily, name: &'static str) -> Self {
        Self { slot, family, name }
    }

    /// Stable identifier, also used as the compiled-template cache key.
    pub fn id(&self) -> String {
        format!("{}/{}", self.family.dir_name(), self.name)
    }

    /// Path relative to the template root.
    pub fn relative_path(&self) -> std::path::PathBuf {
        std::path::Path::new(self.family.dir_name()).join(format!("{}.hbs", self.name))
    }
}

/// The resolved slots for one request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSlotSet {
    pub family: TemplateFamily,
    pub kind: DocumentKind,
    pub header: Option<SlotSource>,
    pub body: SlotSource,
    pub footer: Option<SlotSource>,
}

impl TemplateSlotSet {
    /// Slots in document order (header, body, footer), skipping absent ones.
    pub fn slots(&self) -> impl Iterator<Item = &SlotSource> {
        self.header
            .iter()
            .chain(std::iter::once(&self.body))
            .chain(self.footer.iter())
    }

    pub fn has(&self, slot: SlotKind) -> bool {
        match slot {
            SlotKind::Header => self.header.is_some(),
            SlotKind::Body => true,
            SlotKind::Footer => self.footer.is_some(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots().count()
    }
}

/// Resolve the raw selectors carried by a request.
pub fn resolve(family: &str, kind: &str) -> TemplateSlotSet {
    let family = TemplateFamily::resolve(family);
    let kind = DocumentKind::parse(kind).unwrap_or_else(|| {
        log::debug!("Unknown document kind '{kind}', using the {family} default wiring");
        DocumentKind::default()
    });
    resolve_slots(family, kind)
}

/// The decision table.
pub fn resolve_slots(family: TemplateFamily, kind: DocumentKind) -> TemplateSlotSet {
    use DocumentKind::*;
    use SlotKind::{Body, Footer, Header};

    let slot = |slot, name| SlotSource::new(slot, family, name);
    let full = |header, body| (Some(slot(Header, header)), slot(Body, body), Some(slot(Footer, "footer")));

    let (header, body, footer) = match (family, kind) {
        (TemplateFamily::Standard, Receipt) => (None, slot(Body, "receipt"), None),
        (TemplateFamily::Standard, PurchaseOrder) => {
            full("purchase-order-header", "purchase-order-body")
        }
        (TemplateFamily::Standard, _) => full("header", "body"),

        (TemplateFamily::Compact, PurchaseOrder) => {
            (Some(slot(Header, "purchase-order-header")), slot(Body, "body"), None)
        }
        (TemplateFamily::Compact, _) => (None, slot(Body, "body"), None),

        (TemplateFamily::Modern, Receipt) => (None, slot(Body, "receipt"), None),
        (TemplateFamily::Modern, CreditNote) => full("credit-note-header", "body"),
        (TemplateFamily::Modern, _) => full("header", "body"),
    };

    TemplateSlotSet {
        family,
        kind,
        header,
        body,
        footer,
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(set: &TemplateSlotSet) -> Vec<(SlotKind, &'static str)> {
        set.slots().map(|s| (s.slot, s.name)).collect()
    }

    #[test]
    fn decision_table() {
        use SlotKind::*;
        let cases: Vec<(&str, &str, Vec<(SlotKind, &str)>)> = vec![
            ("Standard", "Invoice", vec![(Header, "header"), (Body, "body"), (Footer, "footer")]),
            ("Standard", "Quote", vec![(Header, "header"), (Body, "body"), (Footer, "footer")]),
            ("Standard", "Receipt", vec![(Body, "receipt")]),
            (
                "standard",
                "purchase-order",
                vec![
                    (Header, "purchase-order-header"),
                    (Body, "purchase-order-body"),
                    (Footer, "footer"),
                ],
            ),
            ("Compact", "Invoice", vec![(Body, "body")]),
            ("Compact", "Receipt", vec![(Body, "body")]),
            ("Compact", "PurchaseOrder", vec![(Header, "purchase-order-header"), (Body, "body")]),
            ("Modern", "Invoice", vec![(Header, "header"), (Body, "body"), (Footer, "footer")]),
            ("Modern", "Receipt", vec![(Body, "receipt")]),
            (
                "Modern",
                "Credit Note",
                vec![(Header, "credit-note-header"), (Body, "body"), (Footer, "footer")],
            ),
        ];

        for (family, kind, expected) in cases {
            let set = resolve(family, kind);
            assert_eq!(names(&set), expected, "({family}, {kind})");
        }
    }

    #[test]
    fn unknown_family_falls_back_to_standard() {
        let set = resolve("Baroque", "Receipt");
        assert_eq!(set.family, TemplateFamily::Standard);
        assert_eq!(names(&set), vec![(SlotKind::Body, "receipt")]);
    }

    #[test]
    fn unknown_kind_uses_family_default_wiring() {
        let set = resolve("Compact", "Manifesto");
        assert_eq!(set.kind, DocumentKind::Invoice);
        assert_eq!(names(&set), vec![(SlotKind::Body, "body")]);

        let set = resolve("Modern", "");
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn every_pair_has_exactly_one_body_slot() {
        let families = ["Standard", "Compact", "Modern", "", "unknown", "STANDARD"];
        let kinds = [
            "Invoice", "Quote", "PurchaseOrder", "CreditNote", "Receipt", "DeliveryNote", "", "???",
        ];
        for family in families {
            for kind in kinds {
                let set = resolve(family, kind);
                let bodies = set.slots().filter(|s| s.slot == SlotKind::Body).count();
                assert_eq!(bodies, 1, "({family}, {kind})");
                assert!(set.slots().all(|s| s.family == set.family));
            }
        }
    }

    #[test]
    fn slots_are_in_document_order() {
        let set = resolve_slots(TemplateFamily::Standard, DocumentKind::Invoice);
        let order: Vec<SlotKind> = set.slots().map(|s| s.slot).collect();
        assert_eq!(order, vec![SlotKind::Header, SlotKind::Body, SlotKind::Footer]);
        assert_eq!(set.body.id(), "standard/body");
        assert_eq!(
            set.body.relative_path(),
            std::path::Path::new("standard").join("body.hbs")
        );
    }
}
