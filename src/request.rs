//! Render request model as handed over by the boundary layer.
//!
//! The document payload itself is opaque JSON; the pipeline only reads the
//! selectors and the theme.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ForgeError, Result};

/// One render request. Never mutated by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    /// Template family selector, e.g. `Standard`.
    #[serde(default)]
    pub family: String,
    /// Document kind selector, e.g. `Invoice`.
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub theme: Theme,
    /// Preferred artifact file name (sanitised before use).
    #[serde(default)]
    pub output_name: Option<String>,
    /// The document data (company, customer, line items, ...).
    pub data: Value,
}

impl RenderRequest {
    pub fn new(family: impl Into<String>, kind: impl Into<String>, data: Value) -> Self {
        Self {
            family: family.into(),
            kind: kind.into(),
            theme: Theme::default(),
            output_name: None,
            data,
        }
    }

    pub fn with_theme(mut self, theme: Theme) -> Self {
        self.theme = theme;
        self
    }

    pub fn with_output_name(mut self, name: impl Into<String>) -> Self {
        self.output_name = Some(name.into());
        self
    }

    /// Parse a request from its JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ForgeError::InvalidRequest(e.to_string()))
    }

    /// Check the mandatory fields. Selectors are not checked here since
    /// unknown families and kinds fall back to defaults.
    pub fn validate(&self) -> Result<()> {
        if !self.data.is_object() {
            return Err(ForgeError::InvalidRequest(
                "document data must be a JSON object".to_string(),
            ));
        }
        self.theme.validate()
    }
}

/// Paper sizes understood by the rendering engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PaperFormat {
    #[default]
    A4,
    Letter,
    Legal,
}

impl PaperFormat {
    /// Width and height in inches (portrait).
    pub fn size_inches(self) -> (f64, f64) {
        match self {
            PaperFormat::A4 => (8.27, 11.69),
            PaperFormat::Letter => (8.5, 11.0),
            PaperFormat::Legal => (8.5, 14.0),
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "a4" => Some(PaperFormat::A4),
            "letter" => Some(PaperFormat::Letter),
            "legal" => Some(PaperFormat::Legal),
            _ => None,
        }
    }
}

/// Per-request presentation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Theme {
    /// Font family name; unknown names fall back to the default family.
    pub font: String,
    pub font_size_default: f32,
    pub font_size_header: f32,
    pub font_size_footer: f32,
    pub primary_color: String,
    pub secondary_color: String,
    /// Margins in CSS pixels.
    pub margin_top: f32,
    pub margin_right: f32,
    pub margin_bottom: f32,
    pub margin_left: f32,
    pub background_repeat: bool,
    pub paper: PaperFormat,
    pub landscape: bool,
    pub print_background: bool,
    pub display_header_footer: bool,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            font: "Default".to_string(),
            font_size_default: 14.0,
            font_size_header: 18.0,
            font_size_footer: 10.0,
            primary_color: "#1a365d".to_string(),
            secondary_color: "#4a5568".to_string(),
            margin_top: 40.0,
            margin_right: 40.0,
            margin_bottom: 40.0,
            margin_left: 40.0,
            background_repeat: false,
            paper: PaperFormat::A4,
            landscape: false,
            print_background: true,
            display_header_footer: false,
        }
    }
}

impl Theme {
    /// Build a theme from a flat settings map keyed by field name, starting
    /// from the defaults. Unknown keys are ignored.
    pub fn from_settings(settings: &HashMap<String, String>) -> Result<Self> {
        let mut theme = Theme::default();
        for (key, value) in settings {
            theme.apply_setting(key, value)?;
        }
        Ok(theme)
    }

    fn apply_setting(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "font" | "fontFamily" => self.font = value.trim().to_string(),
            "fontSizeDefault" => self.font_size_default = parse_number(key, value)?,
            "fontSizeHeader" => self.font_size_header = parse_number(key, value)?,
            "fontSizeFooter" => self.font_size_footer = parse_number(key, value)?,
            "primaryColor" => self.primary_color = value.trim().to_string(),
            "secondaryColor" => self.secondary_color = value.trim().to_string(),
            "marginTop" => self.margin_top = parse_number(key, value)?,
            "marginRight" => self.margin_right = parse_number(key, value)?,
            "marginBottom" => self.margin_bottom = parse_number(key, value)?,
            "marginLeft" => self.margin_left = parse_number(key, value)?,
            "backgroundRepeat" => self.background_repeat = parse_bool(key, value)?,
            "landscape" => self.landscape = parse_bool(key, value)?,
            "printBackground" => self.print_background = parse_bool(key, value)?,
            "displayHeaderFooter" => self.display_header_footer = parse_bool(key, value)?,
            "paper" => {
                self.paper = PaperFormat::parse(value).ok_or_else(|| {
                    ForgeError::InvalidRequest(format!("unknown paper format '{value}'"))
                })?
            }
            other => log::debug!("Ignoring unknown theme setting '{other}'"),
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (name, size) in [
            ("fontSizeDefault", self.font_size_default),
            ("fontSizeHeader", self.font_size_header),
            ("fontSizeFooter", self.font_size_footer),
        ] {
            if !size.is_finite() || size <= 0.0 {
                return Err(ForgeError::InvalidRequest(format!(
                    "{name} must be a positive number, got {size}"
                )));
            }
        }
        for (name, margin) in [
            ("marginTop", self.margin_top),
            ("marginRight", self.margin_right),
            ("marginBottom", self.margin_bottom),
            ("marginLeft", self.margin_left),
        ] {
            if !margin.is_finite() || margin < 0.0 {
                return Err(ForgeError::InvalidRequest(format!(
                    "{name} must not be negative, got {margin}"
                )));
            }
        }
        for (name, color) in [
            ("primaryColor", &self.primary_color),
            ("secondaryColor", &self.secondary_color),
        ] {
            if !is_hex_color(color) {
                return Err(ForgeError::InvalidRequest(format!(
                    "{name} must be a #rgb or #rrggbb colour, got '{color}'"
                )));
            }
        }
        Ok(())
    }
}

fn parse_number(key: &str, value: &str) -> Result<f32> {
    value
        .trim()
        .trim_end_matches("px")
        .parse::<f32>()
        .map_err(|_| ForgeError::InvalidRequest(format!("{key}: '{value}' is not a number")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ForgeError::InvalidRequest(format!(
            "{key}: '{value}' is not a boolean"
        ))),
    }
}

fn is_hex_color(value: &str) -> bool {
    match value.strip_prefix('#') {
        Some(hex) => matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}
