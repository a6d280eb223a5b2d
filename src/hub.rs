//! The hub: one per process, owning the device coordinator and every
//! overlay window.
//!
//! The hub is the only place that sees all windows at once, which is
//! exactly what the device-loss protocol needs: the dispose phase must
//! cover the whole window set before the shared device is reset, and no
//! window may recreate resources until the coordinator reports the
//! device usable again. It also owns the process-wide desktop state
//! (monitors, wallpaper) and the staleness stamp that decides when the
//! background textures get rebuilt.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::attach::TerminalSource;
use crate::config::{Settings, SettingsDelta};
use crate::desktop::{DesktopSnapshot, WallpaperStamp};
use crate::gpu::device::{Device, DeviceError, WindowHandle};
use crate::gpu::{DeviceCoordinator, RecoverOutcome};
use crate::window::{OverlayWindow, PaintOutcome, TickOutcome, WindowState};

pub struct Hub<D: Device> {
    coordinator: DeviceCoordinator<D>,
    windows: BTreeMap<u64, OverlayWindow>,
    settings: Settings,
    desktop: DesktopSnapshot,
    wallpaper_stamp: WallpaperStamp,
    next_handle: u64,
}

impl<D: Device> Hub<D> {
    pub fn new(
        device: D,
        settings: Settings,
        desktop: DesktopSnapshot,
    ) -> Result<Self, DeviceError> {
        let coordinator = DeviceCoordinator::new(device, &desktop)?;
        let wallpaper_stamp = desktop.stamp();
        Ok(Self {
            coordinator,
            windows: BTreeMap::new(),
            settings,
            desktop,
            wallpaper_stamp,
            next_handle: 1,
        })
    }

    pub fn coordinator(&mut self) -> &mut DeviceCoordinator<D> {
        &mut self.coordinator
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    pub fn window(&self, handle: WindowHandle) -> Option<&OverlayWindow> {
        self.windows.get(&handle.0)
    }

    /// Create a window mirroring `source` and bring it to Running. A
    /// source that is already gone still yields a window, in Closing,
    /// so the host tears it down through the normal path.
    pub fn add_window(&mut self, source: Box<dyn TerminalSource>) -> WindowHandle {
        let handle = WindowHandle(self.next_handle);
        self.next_handle += 1;
        let mut window = OverlayWindow::new(source, &self.settings, handle);
        match window.initialize(&mut self.coordinator, &self.settings, &self.desktop) {
            TickOutcome::Failed(e) => {
                warn!(handle = handle.0, error = %e, "window initialization failed");
                window.close_self();
            }
            TickOutcome::DeviceLost => {
                // Loss during init: the window joins the sweep with
                // everyone else and restores after recovery.
            }
            _ => {}
        }
        self.windows.insert(handle.0, window);
        handle
    }

    /// One timer tick for the whole window set. Returns the windows that
    /// requested closing; the host destroys them and reports back via
    /// [`window_destroyed`](Self::window_destroyed).
    pub fn on_tick(&mut self, now_ms: u64) -> Vec<WindowHandle> {
        if self.coordinator.is_lost() {
            self.recovery_sweep();
            return Vec::new();
        }

        let mut close_requests = Vec::new();
        for (id, window) in self.windows.iter_mut() {
            match window.on_timer(&mut self.coordinator) {
                TickOutcome::Idle => {}
                TickOutcome::Repaint => {
                    if window.on_paint(&mut self.coordinator, &self.desktop, now_ms)
                        == PaintOutcome::DeviceLost
                    {
                        // Everyone stops; the sweep runs next tick.
                        break;
                    }
                }
                TickOutcome::CloseRequested => close_requests.push(WindowHandle(*id)),
                TickOutcome::DeviceLost => break,
                TickOutcome::Failed(e) => {
                    warn!(handle = id, error = %e, "window tick failed");
                    close_requests.push(WindowHandle(*id));
                }
            }
        }
        close_requests
    }

    /// The device-loss protocol, in its one legal order: dispose every
    /// window's resources, reset the shared device, rebuild shared
    /// resources, then let windows recreate their own. A device that is
    /// not yet resettable aborts the cycle without error.
    fn recovery_sweep(&mut self) {
        for window in self.windows.values_mut() {
            window.dispose_resources(&mut self.coordinator);
        }
        match self.coordinator.try_recover(&self.desktop) {
            Ok(RecoverOutcome::NotYet) => {}
            Ok(RecoverOutcome::Recovered) => {
                for (id, window) in self.windows.iter_mut() {
                    if let Err(e) = window.restore_resources(&mut self.coordinator) {
                        warn!(handle = id, error = %e, "resource restore failed; closing window");
                        window.close_self();
                    } else {
                        window.invalidate();
                    }
                }
                info!(windows = self.windows.len(), "windows restored after device recovery");
            }
            Err(e) => {
                // Reset itself failed; stay lost and retry next tick.
                warn!(error = %e, "device reset failed");
                self.coordinator.mark_lost();
            }
        }
    }

    /// Desktop change notification (monitor layout, work area or
    /// wallpaper). The backgrounds are rebuilt only when the wallpaper
    /// identity or its modification time actually moved; windows always
    /// get to reconcile against the new work areas. Returns windows that
    /// requested closing while reconciling.
    pub fn on_desktop_change(
        &mut self,
        desktop: DesktopSnapshot,
    ) -> Result<Vec<WindowHandle>, DeviceError> {
        let stamp = desktop.stamp();
        let stale = stamp != self.wallpaper_stamp;
        self.desktop = desktop;
        if self.coordinator.is_lost() {
            // Recovery rebuilds everything from the stored snapshot anyway.
            return Ok(Vec::new());
        }

        if stale {
            info!("desktop background changed; rebuilding textures");
            self.wallpaper_stamp = stamp;
            if let Err(e) = self.coordinator.reset_background(&self.desktop) {
                if e.is_lost() {
                    self.coordinator.mark_lost();
                    return Ok(Vec::new());
                }
                return Err(e);
            }
            for window in self.windows.values_mut() {
                window.invalidate();
            }
        }

        let mut close_requests = Vec::new();
        for (id, window) in self.windows.iter_mut() {
            match window.on_workarea_change(&mut self.coordinator, &self.desktop) {
                TickOutcome::CloseRequested => close_requests.push(WindowHandle(*id)),
                TickOutcome::Failed(e) => {
                    warn!(handle = id, error = %e, "work-area reconcile failed");
                    close_requests.push(WindowHandle(*id));
                }
                _ => {}
            }
        }
        Ok(close_requests)
    }

    /// Apply a settings delta to the stored settings and every window.
    pub fn apply_settings(&mut self, delta: &SettingsDelta) -> Vec<WindowHandle> {
        self.settings.apply(delta);
        let mut close_requests = Vec::new();
        for (id, window) in self.windows.iter_mut() {
            match window.adjust(&mut self.coordinator, delta) {
                TickOutcome::CloseRequested => close_requests.push(WindowHandle(*id)),
                TickOutcome::Failed(e) => {
                    warn!(handle = id, error = %e, "settings adjust failed");
                    close_requests.push(WindowHandle(*id));
                }
                _ => {}
            }
        }
        close_requests
    }

    /// Host notification that a window object was destroyed. The window
    /// must have gone through its destroy hook and be Dead by now;
    /// removing a live window would leak its device resources.
    pub fn window_destroyed(&mut self, handle: WindowHandle) {
        if let Some(window) = self.windows.get_mut(&handle.0) {
            window.on_destroy(&mut self.coordinator);
            assert_eq!(window.state(), WindowState::Dead);
            self.windows.remove(&handle.0);
        }
    }
}
