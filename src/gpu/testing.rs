//! Recording device used by unit tests across the crate.

use crate::geometry::{Dimension, Point, Rect};
use crate::gpu::device::{
    Color, Device, DeviceError, DeviceStatus, FontHandle, FontId, FontSpec, RenderTarget,
    SwapTargetId, TextureId, WindowHandle,
};

/// Every observable call issued to the device, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceOp {
    Reset,
    CreateTexture(Dimension),
    DestroyTexture(TextureId),
    CreateSwapTarget(WindowHandle, Dimension),
    DestroySwapTarget(SwapTargetId),
    CreateFont(String),
    DestroyFont(FontId),
    SetTarget(RenderTarget),
    Clear(Color),
    Block(Rect, Color),
    Sprite(TextureId, Point, Color),
    Text {
        text: String,
        origin: Point,
        color: Color,
    },
    Present(SwapTargetId),
}

/// In-memory `Device` that records calls and can simulate loss.
pub struct RecordingDevice {
    ops: Vec<DeviceOp>,
    next_id: u32,
    status: DeviceStatus,
    /// When set, the next `present` fails with `DeviceError::Lost`.
    pub fail_next_present: bool,
    /// When set, the next `clear` fails with `DeviceError::Lost`,
    /// simulating loss caught mid-redraw rather than at present.
    pub fail_next_clear: bool,
    /// Fixed character-cell metrics reported for created fonts.
    pub char_dim: Dimension,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self {
            ops: Vec::new(),
            next_id: 1,
            status: DeviceStatus::Ready,
            fail_next_present: false,
            fail_next_clear: false,
            char_dim: Dimension::new(8, 16),
        }
    }

    pub fn ops(&self) -> &[DeviceOp] {
        &self.ops
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    pub fn set_status(&mut self, status: DeviceStatus) {
        self.status = status;
    }

    /// Text draw calls issued since the last `clear_ops`.
    pub fn text_draws(&self) -> Vec<(String, Color)> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DeviceOp::Text { text, color, .. } => Some((text.clone(), *color)),
                _ => None,
            })
            .collect()
    }

    /// Block draw calls (background rectangles and the cursor overlay).
    pub fn block_draws(&self) -> Vec<(Rect, Color)> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DeviceOp::Block(rect, color) => Some((*rect, *color)),
                _ => None,
            })
            .collect()
    }

    pub fn creation_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| {
                matches!(
                    op,
                    DeviceOp::CreateTexture(_)
                        | DeviceOp::CreateSwapTarget(..)
                        | DeviceOp::CreateFont(_)
                )
            })
            .count()
    }

    fn next(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl Device for RecordingDevice {
    fn status(&mut self) -> DeviceStatus {
        self.status
    }

    fn reset(&mut self) -> Result<(), DeviceError> {
        self.ops.push(DeviceOp::Reset);
        self.status = DeviceStatus::Ready;
        Ok(())
    }

    fn create_texture(&mut self, dim: Dimension) -> Result<TextureId, DeviceError> {
        self.ops.push(DeviceOp::CreateTexture(dim));
        Ok(TextureId(self.next()))
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        self.ops.push(DeviceOp::DestroyTexture(texture));
    }

    fn create_swap_target(
        &mut self,
        window: WindowHandle,
        dim: Dimension,
    ) -> Result<SwapTargetId, DeviceError> {
        self.ops.push(DeviceOp::CreateSwapTarget(window, dim));
        Ok(SwapTargetId(self.next()))
    }

    fn destroy_swap_target(&mut self, target: SwapTargetId) {
        self.ops.push(DeviceOp::DestroySwapTarget(target));
    }

    fn create_font(&mut self, spec: &FontSpec) -> Result<FontHandle, DeviceError> {
        self.ops.push(DeviceOp::CreateFont(spec.name.clone()));
        Ok(FontHandle {
            id: FontId(self.next()),
            char_dim: self.char_dim,
        })
    }

    fn destroy_font(&mut self, font: FontId) {
        self.ops.push(DeviceOp::DestroyFont(font));
    }

    fn set_render_target(&mut self, target: RenderTarget) -> Result<(), DeviceError> {
        self.ops.push(DeviceOp::SetTarget(target));
        Ok(())
    }

    fn clear(&mut self, color: Color) -> Result<(), DeviceError> {
        self.ops.push(DeviceOp::Clear(color));
        if self.fail_next_clear {
            self.fail_next_clear = false;
            self.status = DeviceStatus::Lost;
            return Err(DeviceError::Lost);
        }
        Ok(())
    }

    fn draw_block(
        &mut self,
        _fill: TextureId,
        rect: Rect,
        color: Color,
    ) -> Result<(), DeviceError> {
        self.ops.push(DeviceOp::Block(rect, color));
        Ok(())
    }

    fn draw_sprite(
        &mut self,
        texture: TextureId,
        _src: Option<Rect>,
        dest: Point,
        color: Color,
    ) -> Result<(), DeviceError> {
        self.ops.push(DeviceOp::Sprite(texture, dest, color));
        Ok(())
    }

    fn draw_text(
        &mut self,
        _font: FontId,
        text: &str,
        origin: Point,
        color: Color,
    ) -> Result<(), DeviceError> {
        self.ops.push(DeviceOp::Text {
            text: text.to_string(),
            origin,
            color,
        });
        Ok(())
    }

    fn present(&mut self, target: SwapTargetId) -> Result<(), DeviceError> {
        self.ops.push(DeviceOp::Present(target));
        if self.fail_next_present {
            self.fail_next_present = false;
            self.status = DeviceStatus::Lost;
            return Err(DeviceError::Lost);
        }
        Ok(())
    }
}
