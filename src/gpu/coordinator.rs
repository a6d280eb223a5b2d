//! Shared device ownership and the device-loss recovery protocol.
//!
//! One `DeviceCoordinator` serves every overlay window in the process. It
//! owns the device-global resources (the reusable white texture and the
//! per-monitor composited backgrounds) and the process-wide "device lost"
//! flag. Recovery is strictly ordered: every window releases its
//! per-window resources first, then the device is reset and the shared
//! resources rebuilt once, and only then may windows recreate their own
//! resources. The hub drives that sweep; the coordinator enforces the
//! middle step.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::desktop::{DesktopSnapshot, MonitorId};
use crate::geometry::{Dimension, Point};
use crate::gpu::device::{Color, Device, DeviceError, DeviceStatus, RenderTarget, TextureId};

/// Side length of the reusable solid-white texture blocks are drawn with.
const WHITE_TEXTURE_DIM: Dimension = Dimension::new(64, 64);

/// Result of one recovery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverOutcome {
    /// Device reset succeeded and shared resources were rebuilt; windows
    /// may now restore their per-window resources.
    Recovered,
    /// The device is still held elsewhere; nothing happened. Retry on a
    /// later tick, this is not an error.
    NotYet,
}

pub struct DeviceCoordinator<D: Device> {
    device: D,
    device_lost: bool,
    white_texture: Option<TextureId>,
    backgrounds: HashMap<MonitorId, TextureId>,
}

impl<D: Device> DeviceCoordinator<D> {
    /// Wrap a freshly created device and build the device-global
    /// resources.
    pub fn new(device: D, desktop: &DesktopSnapshot) -> Result<Self, DeviceError> {
        let mut coordinator = Self {
            device,
            device_lost: false,
            white_texture: None,
            backgrounds: HashMap::new(),
        };
        coordinator.build_shared(desktop)?;
        Ok(coordinator)
    }

    /// Whether the device is unusable. While set, no window may issue GPU
    /// work, even if its own resources still look valid.
    pub fn is_lost(&self) -> bool {
        self.device_lost
    }

    /// Record loss detected at present/draw time.
    pub fn mark_lost(&mut self) {
        if !self.device_lost {
            warn!("GPU device lost; suspending rendering until recovery");
        }
        self.device_lost = true;
    }

    /// Direct device access for draw calls and per-window resource
    /// management. Creation while the device is lost violates the
    /// recovery protocol; callers check `is_lost()` first.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Shared 64x64 white texture used for solid blocks.
    pub fn white_texture(&self) -> TextureId {
        self.white_texture
            .expect("white texture accessed while device resources are disposed")
    }

    /// Composited background for a monitor. Unknown monitors are a logic
    /// error: backgrounds are rebuilt for every monitor in the snapshot.
    pub fn background_texture(&self, monitor: MonitorId) -> TextureId {
        *self
            .backgrounds
            .get(&monitor)
            .unwrap_or_else(|| panic!("no background texture for monitor {:?}", monitor))
    }

    /// Create a render-target texture, optionally cleared to a color.
    pub fn create_texture(
        &mut self,
        dim: Dimension,
        clear: Option<Color>,
    ) -> Result<TextureId, DeviceError> {
        assert!(!self.device_lost, "texture creation while device is lost");
        let texture = self.device.create_texture(dim)?;
        if let Some(color) = clear {
            self.device.set_render_target(RenderTarget::Texture(texture))?;
            self.device.clear(color)?;
        }
        Ok(texture)
    }

    /// Throw away and rebuild every per-monitor background, e.g. after the
    /// wallpaper changed. Full rebuild, never an incremental patch.
    pub fn reset_background(&mut self, desktop: &DesktopSnapshot) -> Result<(), DeviceError> {
        assert!(!self.device_lost, "background rebuild while device is lost");
        self.release_backgrounds();
        self.build_backgrounds(desktop)
    }

    /// One attempt at the recovery protocol's middle phase. Must only be
    /// called after every window disposed its per-window resources.
    pub fn try_recover(&mut self, desktop: &DesktopSnapshot) -> Result<RecoverOutcome, DeviceError> {
        assert!(self.device_lost, "recovery attempted without device loss");
        match self.device.status() {
            DeviceStatus::NotReset => {
                debug!("device resettable; releasing shared resources");
                self.release_shared();
                self.device.reset()?;
                self.build_shared(desktop)?;
                self.device_lost = false;
                info!("GPU device recovered");
                Ok(RecoverOutcome::Recovered)
            }
            DeviceStatus::Lost => Ok(RecoverOutcome::NotYet),
            DeviceStatus::Ready => {
                // A device that reports ready was never lost; the flag and
                // the device disagree and continuing would corrupt the
                // resource bookkeeping.
                panic!("device reports ready while marked lost");
            }
        }
    }

    fn build_shared(&mut self, desktop: &DesktopSnapshot) -> Result<(), DeviceError> {
        let white = self.device.create_texture(WHITE_TEXTURE_DIM)?;
        self.device.set_render_target(RenderTarget::Texture(white))?;
        self.device.clear(Color::WHITE)?;
        self.white_texture = Some(white);
        self.build_backgrounds(desktop)
    }

    fn build_backgrounds(&mut self, desktop: &DesktopSnapshot) -> Result<(), DeviceError> {
        // Wallpaper decoding happens host-side; the backend hands the
        // decoded image in as a texture when it has one. The snapshot's
        // wallpaper path otherwise only feeds the staleness stamp.
        let wallpaper = desktop
            .wallpaper
            .as_deref()
            .and_then(|path| self.device.load_wallpaper(path));
        for monitor in &desktop.monitors {
            let texture = self.device.create_texture(monitor.rect.dim())?;
            self.device.set_render_target(RenderTarget::Texture(texture))?;
            self.device.clear(desktop.background_color)?;
            if let Some(wallpaper) = wallpaper {
                self.device
                    .draw_sprite(wallpaper, None, Point::new(0, 0), Color::WHITE)?;
            }
            self.backgrounds.insert(monitor.id, texture);
        }
        if let Some(wallpaper) = wallpaper {
            self.device.destroy_texture(wallpaper);
        }
        debug!(
            monitors = desktop.monitors.len(),
            "rebuilt background textures"
        );
        Ok(())
    }

    fn release_backgrounds(&mut self) {
        for (_, texture) in self.backgrounds.drain() {
            self.device.destroy_texture(texture);
        }
    }

    fn release_shared(&mut self) {
        self.release_backgrounds();
        if let Some(white) = self.white_texture.take() {
            self.device.destroy_texture(white);
        }
    }
}
