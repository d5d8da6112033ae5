//! Runtime configuration.
//!
//! Loaded from a JSON file and then overridden by a handful of environment
//! variables. Every field has a default so an empty `{}` is a valid config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    /// Root of the per-family markup and CSS tree.
    pub template_dir: PathBuf,
    /// Root of the per-family font directories.
    pub font_dir: PathBuf,
    /// Dedicated directory for temporary PDF artifacts.
    pub temp_dir: PathBuf,
    /// When set, every artifact is copied here after rendering.
    pub inspect_dir: Option<PathBuf>,
    pub sweep_interval_secs: u64,
    pub max_artifact_age_secs: u64,
    /// Caller-side wait limit for a single render; `None` waits forever.
    pub render_timeout_secs: Option<u64>,
    pub engine: EngineConfig,
}

/// Options for launching the external rendering engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Explicit browser binary; auto-detected when absent.
    pub chrome_path: Option<PathBuf>,
    pub headless: bool,
    pub sandbox: bool,
    /// The engine closes its connection after this long without traffic.
    pub idle_timeout_secs: u64,
    pub window_width: u32,
    pub window_height: u32,
    pub extra_args: Vec<String>,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            template_dir: PathBuf::from("templates"),
            font_dir: PathBuf::from("fonts"),
            temp_dir: std::env::temp_dir().join("invoice-forge"),
            inspect_dir: None,
            sweep_interval_secs: 30 * 60,
            max_artifact_age_secs: 2 * 60 * 60,
            render_timeout_secs: Some(120),
            engine: EngineConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: true,
            sandbox: true,
            idle_timeout_secs: 600,
            window_width: 1280,
            window_height: 1024,
            extra_args: Vec::new(),
        }
    }
}

impl ForgeConfig {
    /// Read a JSON config file, apply environment overrides and validate.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ForgeError::io(path, e))?;
        let mut config = Self::from_json(&text)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ForgeError::Config(e.to_string()))
    }

    /// Serialise to JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Override paths from `FORGE_*` / `CHROME_PATH` environment variables.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var_os(key).map(PathBuf::from));
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<PathBuf>) {
        if let Some(dir) = var("FORGE_TEMPLATE_DIR") {
            self.template_dir = dir;
        }
        if let Some(dir) = var("FORGE_FONT_DIR") {
            self.font_dir = dir;
        }
        if let Some(dir) = var("FORGE_TEMP_DIR") {
            self.temp_dir = dir;
        }
        if let Some(dir) = var("FORGE_INSPECT_DIR") {
            self.inspect_dir = Some(dir);
        }
        if let Some(path) = var("CHROME_PATH") {
            self.engine.chrome_path = Some(path);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval_secs == 0 {
            return Err(ForgeError::Config("sweep_interval_secs must be > 0".into()));
        }
        if self.max_artifact_age_secs == 0 {
            return Err(ForgeError::Config("max_artifact_age_secs must be > 0".into()));
        }
        if self.render_timeout_secs == Some(0) {
            return Err(ForgeError::Config("render_timeout_secs must be > 0".into()));
        }
        if self.temp_dir.as_os_str().is_empty() {
            return Err(ForgeError::Config("temp_dir must not be empty".into()));
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn max_artifact_age(&self) -> Duration {
        Duration::from_secs(self.max_artifact_age_secs)
    }

    pub fn render_timeout(&self) -> Option<Duration> {
        self.render_timeout_secs.map(Duration::from_secs)
    }
}
