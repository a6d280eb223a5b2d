//! Configuration for conglass overlay windows.
//!
//! This module provides:
//! - TOML configuration file loading from `~/.conglass/config.toml`
//! - The immutable `Settings` snapshot consumed at window construction
//! - `SettingsDelta`, the sparse form applied at "adjust" time
//!
//! # Configuration File
//!
//! ```toml
//! shell = "cmd.exe"
//!
//! font_name = "Courier New"
//! font_size = 10
//!
//! rows = 24
//! columns = 80
//! maximize = false
//!
//! snap_distance = 10
//! gutter_size = 2
//!
//! extended_chars = false
//! intensify = false
//! z_order = "normal"
//! ```
//!
//! The core consumes these values; parsing beyond TOML deserialization and
//! validating the shell command line are the host's problem.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Stacking order for an overlay window, applied by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ZOrder {
    Top,
    Bottom,
    #[default]
    Normal,
}

/// Immutable settings snapshot for one overlay window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Shell command to spawn in the hidden console.
    pub shell: String,
    /// Extra arguments appended to the shell command line.
    pub shell_arguments: String,

    /// Fixed-pitch font face.
    pub font_name: String,
    /// Font size in points.
    pub font_size: i32,

    /// Requested console rows; `None` means as many as fit.
    pub rows: Option<i32>,
    /// Requested console columns; `None` means as many as fit.
    pub columns: Option<i32>,
    /// Cover the whole work area instead of sizing to the console.
    pub maximize: bool,

    /// Pixel distance at which window edges snap to the work area.
    pub snap_distance: i32,
    /// Inner border width in pixels around the cell area.
    pub gutter_size: i32,

    /// Draw characters outside the printable classification too.
    pub extended_chars: bool,
    /// Force the foreground intensity bit on every non-zero color index.
    pub intensify: bool,

    pub z_order: ZOrder,

    /// Alpha the text texture is cleared to while the window is focused.
    pub active_pre_alpha: u8,
    /// Alpha the text texture is composed with while focused.
    pub active_post_alpha: u8,
    pub inactive_pre_alpha: u8,
    pub inactive_post_alpha: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            shell: "cmd.exe".to_string(),
            shell_arguments: String::new(),
            font_name: "Courier New".to_string(),
            font_size: 10,
            rows: Some(24),
            columns: Some(80),
            maximize: false,
            snap_distance: 10,
            gutter_size: 2,
            extended_chars: false,
            intensify: false,
            z_order: ZOrder::Normal,
            active_pre_alpha: 0x50,
            active_post_alpha: 0xff,
            inactive_pre_alpha: 0x50,
            inactive_post_alpha: 0x80,
        }
    }
}

impl Settings {
    /// Load settings from the default config file, falling back to the
    /// defaults when the file is absent or malformed.
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                match fs::read_to_string(&path) {
                    Ok(content) => match toml::from_str(&content) {
                        Ok(settings) => return settings,
                        Err(e) => warn!("ignoring malformed config {}: {}", path.display(), e),
                    },
                    Err(e) => warn!("unable to read config {}: {}", path.display(), e),
                }
            }
        }
        Self::default()
    }

    /// Parse settings from a TOML string layered over the defaults.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Requested console dimension; negative axes mean "maximum".
    pub fn console_dim(&self) -> crate::geometry::Dimension {
        crate::geometry::Dimension::new(self.columns.unwrap_or(-1), self.rows.unwrap_or(-1))
    }

    /// Apply a sparse adjustment in place.
    pub fn apply(&mut self, delta: &SettingsDelta) {
        if let Some(ref v) = delta.font_name {
            self.font_name = v.clone();
        }
        if let Some(v) = delta.font_size {
            self.font_size = v;
        }
        if let Some(v) = delta.rows {
            self.rows = Some(v);
        }
        if let Some(v) = delta.columns {
            self.columns = Some(v);
        }
        if let Some(v) = delta.maximize {
            self.maximize = v;
        }
        if let Some(v) = delta.snap_distance {
            self.snap_distance = v;
        }
        if let Some(v) = delta.gutter_size {
            self.gutter_size = v;
        }
        if let Some(v) = delta.extended_chars {
            self.extended_chars = v;
        }
        if let Some(v) = delta.intensify {
            self.intensify = v;
        }
        if let Some(v) = delta.z_order {
            self.z_order = v;
        }
        if let Some(v) = delta.active_pre_alpha {
            self.active_pre_alpha = v;
        }
        if let Some(v) = delta.active_post_alpha {
            self.active_post_alpha = v;
        }
        if let Some(v) = delta.inactive_pre_alpha {
            self.inactive_pre_alpha = v;
        }
        if let Some(v) = delta.inactive_post_alpha {
            self.inactive_post_alpha = v;
        }
    }

    fn config_path() -> Option<PathBuf> {
        let home = home_dir()?;
        let dir = home.join(".conglass");
        if !dir.exists() {
            let _ = fs::create_dir_all(&dir);
        }
        Some(dir.join("config.toml"))
    }
}

/// Sparse settings used by `--adjust` style requests: only the present
/// fields change the running window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsDelta {
    pub font_name: Option<String>,
    pub font_size: Option<i32>,
    pub rows: Option<i32>,
    pub columns: Option<i32>,
    pub maximize: Option<bool>,
    pub snap_distance: Option<i32>,
    pub gutter_size: Option<i32>,
    pub extended_chars: Option<bool>,
    pub intensify: Option<bool>,
    pub z_order: Option<ZOrder>,
    pub active_pre_alpha: Option<u8>,
    pub active_post_alpha: Option<u8>,
    pub inactive_pre_alpha: Option<u8>,
    pub inactive_post_alpha: Option<u8>,
}

impl SettingsDelta {
    /// True when the delta touches the font and device-dependent metrics
    /// must be rebuilt.
    pub fn changes_font(&self) -> bool {
        self.font_name.is_some() || self.font_size.is_some()
    }

    /// True when the delta changes the requested console size.
    pub fn changes_console_dim(&self) -> bool {
        self.rows.is_some() || self.columns.is_some() || self.maximize.is_some()
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}
