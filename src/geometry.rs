//! Dimension and rectangle math for overlay windows.
//!
//! Everything here is pure arithmetic shared by the renderer (cell grid to
//! pixel sizing) and the window layer (work-area snapping, client/window
//! size reconciliation). Pixel and cell dimensions both use `Dimension`;
//! which one is meant is clear from context.

use serde::{Deserialize, Serialize};

/// A width/height pair, in pixels or in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub width: i32,
    pub height: i32,
}

impl Dimension {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Number of cells covered by this dimension.
    pub fn area(&self) -> usize {
        debug_assert!(self.width >= 0 && self.height >= 0);
        self.width as usize * self.height as usize
    }

    /// Component-wise minimum.
    pub fn min(self, other: Dimension) -> Dimension {
        Dimension::new(self.width.min(other.width), self.height.min(other.height))
    }

    /// Clamp a requested console dimension against the external maximum.
    ///
    /// A non-positive axis means "as large as possible", matching the
    /// settings sentinel. The result never exceeds `max` on either axis.
    pub fn clamp_to_max(self, max: Dimension) -> Dimension {
        let width = if self.width <= 0 || self.width > max.width {
            max.width
        } else {
            self.width
        };
        let height = if self.height <= 0 || self.height > max.height {
            max.height
        } else {
            self.height
        };
        Dimension::new(width, height)
    }

    /// Component-wise integer division, used to turn a pixel area into a
    /// cell count given the per-character cell size.
    pub fn cells_for(self, char_dim: Dimension) -> Dimension {
        assert!(char_dim.width > 0 && char_dim.height > 0);
        Dimension::new(self.width / char_dim.width, self.height / char_dim.height)
    }
}

/// A pixel position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Screen rectangle in pixel coordinates, half-open like Win32 RECTs are
/// in practice treated here: `right`/`bottom` are the far edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn dim(&self) -> Dimension {
        Dimension::new(self.width(), self.height())
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.left + dx, self.top + dy, self.right + dx, self.bottom + dy)
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }
}

/// Snap a window rectangle to the edges of `bounds` when it is within
/// `snap_distance` pixels. When both opposing edges are candidates the
/// nearer one wins; ties go to left/top.
pub fn snap_rect(window: &mut Rect, bounds: &Rect, snap_distance: i32) {
    let delta_left = window.left - bounds.left;
    let delta_right = window.right - bounds.right;
    let delta_top = window.top - bounds.top;
    let delta_bottom = window.bottom - bounds.bottom;

    if delta_left.abs() < snap_distance && delta_left.abs() <= delta_right.abs() {
        window.left -= delta_left;
        window.right -= delta_left;
    }
    if delta_right.abs() < snap_distance && delta_right.abs() < delta_left.abs() {
        window.left -= delta_right;
        window.right -= delta_right;
    }
    if delta_top.abs() < snap_distance && delta_top.abs() <= delta_bottom.abs() {
        window.top -= delta_top;
        window.bottom -= delta_top;
    }
    if delta_bottom.abs() < snap_distance && delta_bottom.abs() < delta_top.abs() {
        window.top -= delta_bottom;
        window.bottom -= delta_bottom;
    }
}

/// Pixel size of the client area for a console of `console_dim` cells with
/// the given per-character cell size and inner gutter.
pub fn calc_client_size(char_dim: Dimension, console_dim: Dimension, gutter_size: i32) -> Dimension {
    Dimension::new(
        console_dim.width * char_dim.width + 2 * gutter_size,
        console_dim.height * char_dim.height + 2 * gutter_size,
    )
}

/// Largest window dimension that fits in a work area.
pub fn max_window_dim(work_area: &Rect) -> Dimension {
    work_area.dim()
}

/// Client area usable for character cells once the gutter is subtracted
/// from every side.
pub fn usable_client_dim(client_dim: Dimension, gutter_size: i32) -> Dimension {
    Dimension::new(
        client_dim.width - 2 * gutter_size,
        client_dim.height - 2 * gutter_size,
    )
}
