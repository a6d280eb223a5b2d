//! The abstract compositor interface the overlay core renders through.
//!
//! The embedding application supplies the concrete implementation (the
//! original host is a Direct3D 9 device with sprite batching). The core
//! only needs the operations below, and it needs exactly one failure to be
//! distinguishable from all others: the device becoming unusable.

use thiserror::Error;

use crate::geometry::{Dimension, Point, Rect};

/// Packed ARGB color, alpha in the high byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color(pub u32);

impl Color {
    pub const fn argb(a: u8, r: u8, g: u8, b: u8) -> Self {
        Color(((a as u32) << 24) | ((r as u32) << 16) | ((g as u32) << 8) | b as u32)
    }

    /// Opaque color.
    pub const fn xrgb(r: u8, g: u8, b: u8) -> Self {
        Color::argb(0xff, r, g, b)
    }

    pub const fn alpha(self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub const WHITE: Color = Color::xrgb(0xff, 0xff, 0xff);
}

/// Handle to a device texture. Meaningless after a device reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// Handle to a per-window presentable target (swap chain back buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapTargetId(pub u32);

/// Handle to a device font object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FontId(pub u32);

/// Opaque identity of a host window a swap target presents into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub u64);

/// Font request: fixed-pitch face plus point size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontSpec {
    pub name: String,
    pub size: i32,
}

/// A created font together with its device-dependent cell metrics.
#[derive(Debug, Clone, Copy)]
pub struct FontHandle {
    pub id: FontId,
    /// Pixel size of one character cell in this font.
    pub char_dim: Dimension,
}

/// Where subsequent draw calls land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTarget {
    Texture(TextureId),
    SwapTarget(SwapTargetId),
}

/// Cooperative status of the shared device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Usable.
    Ready,
    /// Lost and not yet resettable; try again later.
    Lost,
    /// Lost but a `reset()` may now succeed.
    NotReset,
}

#[derive(Error, Debug)]
pub enum DeviceError {
    /// The device became unusable mid-operation. Recoverable through the
    /// coordinator's dispose/recover protocol, never by retrying the call.
    #[error("GPU device lost")]
    Lost,

    /// Any other backend failure. Fatal for the issuing window.
    #[error("GPU backend failure: {0}")]
    Backend(String),
}

impl DeviceError {
    pub fn is_lost(&self) -> bool {
        matches!(self, DeviceError::Lost)
    }
}

/// Operations the presentation backend must provide.
///
/// All resource handles are invalidated by `reset()`; the coordinator owns
/// the only legal call sequence around loss and reset.
pub trait Device {
    /// Poll whether the device is usable or how far along loss recovery
    /// can proceed.
    fn status(&mut self) -> DeviceStatus;

    /// Attempt to reset a lost device. Only meaningful after `status()`
    /// returned `NotReset`.
    fn reset(&mut self) -> Result<(), DeviceError>;

    fn create_texture(&mut self, dim: Dimension) -> Result<TextureId, DeviceError>;
    fn destroy_texture(&mut self, texture: TextureId);

    fn create_swap_target(
        &mut self,
        window: WindowHandle,
        dim: Dimension,
    ) -> Result<SwapTargetId, DeviceError>;
    fn destroy_swap_target(&mut self, target: SwapTargetId);

    fn create_font(&mut self, spec: &FontSpec) -> Result<FontHandle, DeviceError>;
    fn destroy_font(&mut self, font: FontId);

    fn set_render_target(&mut self, target: RenderTarget) -> Result<(), DeviceError>;
    fn clear(&mut self, color: Color) -> Result<(), DeviceError>;

    /// Fill a rectangle of the current target by stretching `fill`
    /// (normally the coordinator's white texture) modulated by `color`.
    fn draw_block(&mut self, fill: TextureId, rect: Rect, color: Color)
        -> Result<(), DeviceError>;

    /// Blit a texture (optionally a sub-rect) to `dest`, modulated by
    /// `color` including its alpha.
    fn draw_sprite(
        &mut self,
        texture: TextureId,
        src: Option<Rect>,
        dest: Point,
        color: Color,
    ) -> Result<(), DeviceError>;

    /// Draw one single-line text run starting at `origin`.
    fn draw_text(
        &mut self,
        font: FontId,
        text: &str,
        origin: Point,
        color: Color,
    ) -> Result<(), DeviceError>;

    /// Present a swap target to its window. `Err(DeviceError::Lost)` here
    /// is the canonical loss detection point.
    fn present(&mut self, target: SwapTargetId) -> Result<(), DeviceError>;

    /// Decode a wallpaper image into a texture, if the backend can. The
    /// default says it cannot, leaving backgrounds as solid color.
    fn load_wallpaper(&mut self, path: &std::path::Path) -> Option<TextureId> {
        let _ = path;
        None
    }
}
