//! GPU presentation boundary and shared-resource coordination.
//!
//! The concrete compositor (Direct3D, or anything else capable of textured
//! alpha-blended sprites) lives outside this crate; here are:
//!
//! - **device**: the `Device` trait the compositor must implement, with
//!   "device lost" as a failure signal distinct from everything else
//! - **color**: the 16-entry console color table and the intensify rule
//! - **coordinator**: the single shared device plus device-global
//!   resources, and the two-phase dispose/recover protocol

pub mod color;
pub mod coordinator;
pub mod device;

#[cfg(test)]
pub(crate) mod testing;

pub use color::{effective_fg_index, COLOR_TABLE, CONSOLE_COLORS};
pub use coordinator::{DeviceCoordinator, RecoverOutcome};
pub use device::{
    Color, Device, DeviceError, DeviceStatus, FontHandle, FontId, FontSpec, RenderTarget,
    SwapTargetId, TextureId, WindowHandle,
};
