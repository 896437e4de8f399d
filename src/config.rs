//! Render configuration
//!
//! Uses RON (Rusty Object Notation) for human-readable config files. Every
//! field has a default, so partial files work fine.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("serialize error: {0}")]
    Serialize(#[from] ron::Error),
}

/// Renderer and demo settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Framebuffer width in pixels
    pub width: u32,
    /// Framebuffer height in pixels
    pub height: u32,
    /// Integer window scale for presentation
    pub window_scale: u32,
    /// Divide texture coordinates by w during transform and recover them
    /// per pixel (off = affine texturing)
    pub perspective_correct: bool,
    /// Floyd-Steinberg dithering on texture upload
    pub dither: bool,
    /// Generate full mip chains on texture upload
    pub generate_mips: bool,
    /// Background color (RGB, quantized on use)
    pub clear_color: (u8, u8, u8),
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            window_scale: 3,
            perspective_correct: true,
            dither: true,
            generate_mips: true,
            clear_color: (24, 24, 32),
        }
    }
}

impl RenderConfig {
    /// Load a config from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(ron::from_str(&contents)?)
    }

    /// Load from a RON file, falling back to defaults when the file does
    /// not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(&path) {
            Ok(config) => config,
            Err(ConfigError::Io(_)) => Self::default(),
            Err(e) => {
                log::warn!("bad config {}: {}; using defaults", path.as_ref().display(), e);
                Self::default()
            }
        }
    }

    /// Save the config to a RON file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let pretty = ron::ser::PrettyConfig::new().indentor("  ".to_string());
        let contents = ron::ser::to_string_pretty(self, pretty)?;
        fs::write(path, contents)?;
        Ok(())
    }
}
