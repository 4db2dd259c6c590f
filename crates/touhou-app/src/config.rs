//! Application configuration.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Config file read when no `--config` path is given.
pub const DEFAULT_CONFIG_FILE: &str = "touhou.toml";

/// Application configuration.
///
/// Every field has a default, so a TOML file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Directory holding `vert.spv` and `frag.spv`.
    pub shader_dir: PathBuf,
    /// Clear color, RGBA.
    pub clear_color: [f32; 4],
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Touhou Engine".to_string(),
            width: 800,
            height: 600,
            validation: cfg!(debug_assertions),
            shader_dir: PathBuf::from("shaders"),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the shader directory.
    pub fn with_shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_dir = dir.into();
        self
    }

    /// Set the clear color.
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("Invalid configuration")
    }

    /// Load from a file. A missing file yields the defaults; a malformed one is an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::info!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config =
            Self::from_toml(&text).with_context(|| format!("Failed to parse {}", path.display()))?;

        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }
}
