//! conglass - alpha-blended GPU overlay rendering for a hidden console
//!
//! conglass mirrors the visible buffer of a Windows console that keeps
//! running hidden in the background, and paints it as a translucent,
//! GPU-composited overlay window. This crate is the synchronization and
//! rendering core; the window message pump, menu UI and the concrete GPU
//! backend are supplied by the embedding application.
//!
//! # Architecture
//!
//! ```text
//! Hub
//! ├── DeviceCoordinator (shared GPU device + device-global resources)
//! └── OverlayWindow (one per mirrored console)
//!     ├── ConsoleProcess (attach/detach session to the hidden console)
//!     └── TextRenderer
//!         ├── GridCache (front/back cell buffers + diff)
//!         └── plane batching (one text draw per row and color)
//! ```
//!
//! # Repaint tick
//!
//! Each timer tick, while the window is `Running`: lock the console,
//! reconcile its size, snapshot the visible cell grid, redraw the text
//! texture only if the grid changed, release the lock, then present. A
//! `present` that reports the device lost triggers the hub's coordinated
//! dispose/recover sweep across every window.

pub mod attach;
pub mod config;
pub mod desktop;
pub mod geometry;
pub mod gpu;
pub mod grid;
pub mod hub;
pub mod render;
pub mod window;

pub use attach::{AttachError, TerminalLock, TerminalSource};
pub use config::{Settings, SettingsDelta, ZOrder};
pub use desktop::{DesktopSnapshot, Monitor, MonitorId, WallpaperStamp};
pub use geometry::{Dimension, Point, Rect};
pub use gpu::coordinator::{DeviceCoordinator, RecoverOutcome};
pub use gpu::device::{
    Color, Device, DeviceError, DeviceStatus, FontHandle, FontSpec, RenderTarget, SwapTargetId,
    TextureId, WindowHandle,
};
pub use grid::{Attr, Cell, CellGrid, CursorPos, GridCache};
pub use hub::Hub;
pub use render::TextRenderer;
pub use window::{OverlayWindow, PaintOutcome, TickOutcome, WindowState};

#[cfg(windows)]
pub use attach::ConsoleProcess;
