//! Desktop state the coordinator composes backgrounds from.
//!
//! The host queries monitors and wallpaper settings (that polling is I/O
//! plumbing outside this core) and hands the result over as an immutable
//! `DesktopSnapshot`. `WallpaperStamp` is how the hub decides that the
//! cached background textures are stale: the wallpaper identity or its
//! last-modified time changed.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::geometry::Rect;
use crate::gpu::device::Color;

/// Identity of one physical display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonitorId(pub u32);

/// One display and its desktop rectangle in virtual-screen coordinates.
#[derive(Debug, Clone, Copy)]
pub struct Monitor {
    pub id: MonitorId,
    pub rect: Rect,
}

/// Everything needed to build per-monitor background textures.
#[derive(Debug, Clone)]
pub struct DesktopSnapshot {
    pub monitors: Vec<Monitor>,
    /// Desktop background color behind (or instead of) the wallpaper.
    pub background_color: Color,
    /// Current wallpaper image, if any.
    pub wallpaper: Option<PathBuf>,
    /// Last-modified time of the wallpaper file, when known.
    pub wallpaper_modified: Option<SystemTime>,
}

impl DesktopSnapshot {
    /// A single-monitor snapshot with a solid background, handy as a
    /// starting point and in tests.
    pub fn solid(rect: Rect, background_color: Color) -> Self {
        Self {
            monitors: vec![Monitor {
                id: MonitorId(0),
                rect,
            }],
            background_color,
            wallpaper: None,
            wallpaper_modified: None,
        }
    }

    /// Set the wallpaper, picking up its current mtime from disk.
    pub fn with_wallpaper(mut self, path: PathBuf) -> Self {
        let stamp = WallpaperStamp::of(Some(&path));
        self.wallpaper_modified = stamp.modified;
        self.wallpaper = Some(path);
        self
    }

    pub fn stamp(&self) -> WallpaperStamp {
        WallpaperStamp::new(self.wallpaper.clone(), self.wallpaper_modified)
    }
}

/// Wallpaper identity plus content timestamp. Two equal stamps mean the
/// cached background textures can be kept; anything else forces a full
/// rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WallpaperStamp {
    path: Option<PathBuf>,
    modified: Option<SystemTime>,
}

impl WallpaperStamp {
    pub fn new(path: Option<PathBuf>, modified: Option<SystemTime>) -> Self {
        Self { path, modified }
    }

    /// Stamp the wallpaper at `path`, picking up its current mtime.
    pub fn of(path: Option<&Path>) -> Self {
        let modified = path.and_then(|p| fs::metadata(p).and_then(|m| m.modified()).ok());
        Self::new(path.map(Path::to_path_buf), modified)
    }
}
