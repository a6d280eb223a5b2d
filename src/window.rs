//! Per-window lifecycle: the state machine that sequences console
//! polling, resizes and painting for one overlay window.
//!
//! States and transitions:
//!
//! ```text
//! Initializing --> Running <--> Resetting
//!                     |
//!                     v
//!                  Closing --> Dead
//! ```
//!
//! Running is the only state in which timer polling and repainting do
//! anything. Resetting brackets every operation that touches GPU
//! resources (console resize, font change); re-entering it is a logic
//! error, not something to paper over. Closing is entered exactly once,
//! when the attached process is gone or the user closes the window, and
//! Dead only on the host's actual destroy notification.
//!
//! The window core is host-agnostic: the embedding message loop calls
//! `on_timer` / `on_paint` / `on_destroy` and reads back the outcome, the
//! window never dispatches host messages itself.

use tracing::{debug, info, warn};

use crate::attach::{AttachError, TerminalSource};
use crate::config::{Settings, SettingsDelta, ZOrder};
use crate::desktop::{DesktopSnapshot, MonitorId};
use crate::geometry::{max_window_dim, snap_rect, usable_client_dim, Dimension, Point, Rect};
use crate::gpu::device::{Device, DeviceError, SwapTargetId, WindowHandle};
use crate::gpu::DeviceCoordinator;
use crate::render::TextRenderer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Initializing,
    Running,
    Resetting,
    Closing,
    Dead,
}

/// What a timer tick amounted to.
#[derive(Debug)]
pub enum TickOutcome {
    /// Nothing to do (also returned outside Running).
    Idle,
    /// Something changed; the host should schedule a repaint.
    Repaint,
    /// The attached process is gone; the window entered Closing and the
    /// host should destroy it.
    CloseRequested,
    /// The device was lost mid-tick; the hub must run the recovery sweep.
    DeviceLost,
    /// Unclassified host failure, fatal for this window only.
    Failed(anyhow::Error),
}

/// What a paint request amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaintOutcome {
    Painted,
    /// Outside Running, or the device is lost; nothing was drawn.
    Skipped,
    /// Loss detected at present time; the hub must run the recovery
    /// sweep.
    DeviceLost,
}

/// Internal tick failure, folded into `TickOutcome` at the boundary.
enum TickError {
    Gone,
    Device(DeviceError),
    Host(anyhow::Error),
}

impl From<AttachError> for TickError {
    fn from(e: AttachError) -> Self {
        match e {
            AttachError::TargetGone => TickError::Gone,
            AttachError::Host(msg) => TickError::Host(anyhow::anyhow!(msg)),
        }
    }
}

impl From<DeviceError> for TickError {
    fn from(e: DeviceError) -> Self {
        TickError::Device(e)
    }
}

/// One overlay window mirroring one console process.
pub struct OverlayWindow {
    state: WindowState,
    source: Box<dyn TerminalSource>,
    renderer: TextRenderer,
    handle: WindowHandle,
    swap_target: Option<SwapTargetId>,
    monitor: MonitorId,
    rect: Rect,
    title: String,
    active: bool,
    maximize: bool,
    snap_distance: i32,
    z_order: ZOrder,
    active_post_alpha: u8,
    inactive_post_alpha: u8,
}

impl OverlayWindow {
    pub fn new(source: Box<dyn TerminalSource>, settings: &Settings, handle: WindowHandle) -> Self {
        Self {
            state: WindowState::Initializing,
            source,
            renderer: TextRenderer::new(settings),
            handle,
            swap_target: None,
            monitor: MonitorId(0),
            rect: Rect::new(0, 0, 0, 0),
            title: String::new(),
            active: false,
            maximize: settings.maximize,
            snap_distance: settings.snap_distance,
            z_order: settings.z_order,
            active_post_alpha: settings.active_post_alpha,
            inactive_post_alpha: settings.inactive_post_alpha,
        }
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    pub fn handle(&self) -> WindowHandle {
        self.handle
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Stacking order the host should place this window at.
    pub fn z_order(&self) -> ZOrder {
        self.z_order
    }

    /// Whole-window translucency the host applies to the layered window.
    pub fn post_alpha(&self) -> u8 {
        if self.active {
            self.active_post_alpha
        } else {
            self.inactive_post_alpha
        }
    }

    /// First resource creation and first external-size reconciliation.
    /// A target already gone here is the expected-termination case: the
    /// window moves straight to Closing and reports it, nothing fatal.
    pub fn initialize<D: Device>(
        &mut self,
        coordinator: &mut DeviceCoordinator<D>,
        settings: &Settings,
        desktop: &DesktopSnapshot,
    ) -> TickOutcome {
        assert_eq!(
            self.state,
            WindowState::Initializing,
            "window initialized twice"
        );
        match self.first_reconcile(coordinator, settings, desktop) {
            Ok(()) => {
                self.state = WindowState::Running;
                info!(handle = self.handle.0, "overlay window running");
                TickOutcome::Repaint
            }
            Err(e) => self.fold_error(coordinator, e),
        }
    }

    fn first_reconcile<D: Device>(
        &mut self,
        coordinator: &mut DeviceCoordinator<D>,
        settings: &Settings,
        desktop: &DesktopSnapshot,
    ) -> Result<(), TickError> {
        // Font first: character metrics decide every other dimension.
        self.renderer.ensure_font(coordinator)?;
        let char_dim = self.renderer.char_dim();

        let monitor = desktop
            .monitors
            .first()
            .ok_or_else(|| TickError::Host(anyhow::anyhow!("no monitors in desktop snapshot")))?;
        let monitor_rect = monitor.rect;
        self.monitor = monitor.id;
        let requested = if self.maximize {
            usable_client_dim(max_window_dim(&monitor_rect), self.renderer.gutter_size())
                .cells_for(char_dim)
        } else {
            settings.console_dim()
        };

        let grid = {
            let mut lock = self.source.lock()?;
            let actual = lock.resize(requested)?;
            self.renderer.set_console_dim(actual);
            self.title = lock.title()?;
            lock.snapshot()?
        };

        let client_dim = self.renderer.client_dim();
        self.rect = Rect::new(
            monitor_rect.left,
            monitor_rect.top,
            monitor_rect.left + client_dim.width,
            monitor_rect.top + client_dim.height,
        );
        self.renderer.resize_texture(coordinator, client_dim)?;
        self.swap_target = Some(
            coordinator
                .device_mut()
                .create_swap_target(self.handle, client_dim)?,
        );
        self.renderer.update(&grid, coordinator)?;
        Ok(())
    }

    /// Timer tick: liveness, size and title polling plus the snapshot
    /// read. Strictly ordered within the tick: attach, poll size,
    /// snapshot, render, detach. No-op outside Running.
    pub fn on_timer<D: Device>(&mut self, coordinator: &mut DeviceCoordinator<D>) -> TickOutcome {
        if self.state != WindowState::Running || coordinator.is_lost() {
            return TickOutcome::Idle;
        }
        match self.poll(coordinator) {
            Ok(true) => TickOutcome::Repaint,
            // Cursor blink still wants a repaint on unchanged ticks; the
            // compose pass is cheap, only the glyph redraw was skipped.
            Ok(false) => {
                if self.active {
                    TickOutcome::Repaint
                } else {
                    TickOutcome::Idle
                }
            }
            Err(e) => self.fold_error(coordinator, e),
        }
    }

    fn poll<D: Device>(
        &mut self,
        coordinator: &mut DeviceCoordinator<D>,
    ) -> Result<bool, TickError> {
        // The session spans exactly the reads, never the compose/present,
        // so the shell makes progress between ticks.
        let (grid, title, resized) = {
            let mut lock = self.source.lock()?;
            let size = lock.current_size()?;
            let resized = size != self.renderer.console_dim();
            let grid = lock.snapshot()?;
            let title = lock.title()?;
            (grid, title, resized)
        };

        if resized {
            self.begin_reset();
            let result = self.apply_console_size(coordinator, grid.dim());
            self.end_reset();
            result?;
        }
        if title != self.title {
            self.title = title;
        }
        Ok(self.renderer.update(&grid, coordinator)?)
    }

    /// Rebuild size-dependent GPU resources for a new console dimension.
    /// Caller holds the Resetting state.
    fn apply_console_size<D: Device>(
        &mut self,
        coordinator: &mut DeviceCoordinator<D>,
        dim: Dimension,
    ) -> Result<(), TickError> {
        debug_assert_eq!(self.state, WindowState::Resetting);
        self.renderer.set_console_dim(dim);
        let client_dim = self.renderer.client_dim();
        self.rect = Rect::new(
            self.rect.left,
            self.rect.top,
            self.rect.left + client_dim.width,
            self.rect.top + client_dim.height,
        );
        self.renderer.resize_texture(coordinator, client_dim)?;
        if let Some(target) = self.swap_target.take() {
            coordinator.device_mut().destroy_swap_target(target);
        }
        self.swap_target = Some(
            coordinator
                .device_mut()
                .create_swap_target(self.handle, client_dim)?,
        );
        Ok(())
    }

    /// Compose and present. No-op outside Running or while the device is
    /// lost; present is where loss is detected.
    pub fn on_paint<D: Device>(
        &mut self,
        coordinator: &mut DeviceCoordinator<D>,
        desktop: &DesktopSnapshot,
        now_ms: u64,
    ) -> PaintOutcome {
        if self.state != WindowState::Running || coordinator.is_lost() {
            return PaintOutcome::Skipped;
        }
        let target = self
            .swap_target
            .expect("running window has no swap target");
        let background = coordinator.background_texture(self.monitor);
        let monitor_rect = desktop
            .monitors
            .iter()
            .find(|m| m.id == self.monitor)
            .map(|m| m.rect)
            .unwrap_or_else(|| panic!("window on unknown monitor {:?}", self.monitor));
        let offset = Point::new(
            self.rect.left - monitor_rect.left,
            self.rect.top - monitor_rect.top,
        );

        let result = self
            .renderer
            .compose(coordinator, target, background, offset, self.active, now_ms)
            .and_then(|()| coordinator.device_mut().present(target));
        match result {
            Ok(()) => PaintOutcome::Painted,
            Err(e) if e.is_lost() => {
                coordinator.mark_lost();
                PaintOutcome::DeviceLost
            }
            Err(e) => {
                // Unclassified device failure: window-fatal, never
                // process-fatal.
                warn!(handle = self.handle.0, error = %e, "paint failed; closing window");
                self.close_self();
                PaintOutcome::Skipped
            }
        }
    }

    /// Apply a settings delta (font, alphas, console dimension, glyph
    /// policy). GPU-touching changes run inside Resetting.
    pub fn adjust<D: Device>(
        &mut self,
        coordinator: &mut DeviceCoordinator<D>,
        delta: &SettingsDelta,
    ) -> TickOutcome {
        if self.state != WindowState::Running {
            return TickOutcome::Idle;
        }
        if let Some(alpha) = delta.active_post_alpha {
            self.active_post_alpha = alpha;
        }
        if let Some(alpha) = delta.inactive_post_alpha {
            self.inactive_post_alpha = alpha;
        }
        if let Some(snap) = delta.snap_distance {
            self.snap_distance = snap;
        }
        if let Some(z_order) = delta.z_order {
            self.z_order = z_order;
        }
        if let Some(maximize) = delta.maximize {
            self.maximize = maximize;
        }

        self.begin_reset();
        let result = self.adjust_resources(coordinator, delta);
        self.end_reset();
        match result {
            Ok(()) => TickOutcome::Repaint,
            Err(e) => self.fold_error(coordinator, e),
        }
    }

    fn adjust_resources<D: Device>(
        &mut self,
        coordinator: &mut DeviceCoordinator<D>,
        delta: &SettingsDelta,
    ) -> Result<(), TickError> {
        let font_changed = self.renderer.adjust(delta, coordinator)?;
        let resize_to = if delta.changes_console_dim() {
            let mut dim = self.renderer.console_dim();
            if let Some(columns) = delta.columns {
                dim.width = columns;
            }
            if let Some(rows) = delta.rows {
                dim.height = rows;
            }
            let mut lock = self.source.lock()?;
            Some(lock.resize(dim)?)
        } else if font_changed {
            Some(self.renderer.console_dim())
        } else {
            None
        };
        if let Some(dim) = resize_to {
            self.apply_console_size(coordinator, dim)?;
        }
        Ok(())
    }

    /// Work-area change: a maximized window re-derives its console size
    /// from the new area; a floating one is pulled back inside it.
    pub fn on_workarea_change<D: Device>(
        &mut self,
        coordinator: &mut DeviceCoordinator<D>,
        desktop: &DesktopSnapshot,
    ) -> TickOutcome {
        if self.state != WindowState::Running {
            return TickOutcome::Idle;
        }
        let Some(monitor) = desktop.monitors.iter().find(|m| m.id == self.monitor) else {
            return TickOutcome::Idle;
        };
        let work_area = monitor.rect;

        if self.maximize {
            let requested =
                usable_client_dim(max_window_dim(&work_area), self.renderer.gutter_size())
                    .cells_for(self.renderer.char_dim());
            if requested == self.renderer.console_dim() {
                return TickOutcome::Idle;
            }
            self.begin_reset();
            let result = self.resize_console(coordinator, requested);
            self.end_reset();
            match result {
                Ok(()) => TickOutcome::Repaint,
                Err(e) => self.fold_error(coordinator, e),
            }
        } else {
            let dx = (work_area.right - self.rect.right).min(0)
                + (work_area.left - self.rect.left).max(0);
            let dy = (work_area.bottom - self.rect.bottom).min(0)
                + (work_area.top - self.rect.top).max(0);
            if dx == 0 && dy == 0 {
                return TickOutcome::Idle;
            }
            self.rect = self.rect.translate(dx, dy);
            TickOutcome::Repaint
        }
    }

    /// Resize the external console and the size-dependent resources.
    /// Caller holds the Resetting state.
    fn resize_console<D: Device>(
        &mut self,
        coordinator: &mut DeviceCoordinator<D>,
        requested: Dimension,
    ) -> Result<(), TickError> {
        let actual = {
            let mut lock = self.source.lock()?;
            lock.resize(requested)?
        };
        self.apply_console_size(coordinator, actual)
    }

    /// Move the window, snapping to the monitor's edges when close.
    pub fn move_to(&mut self, origin: Point, desktop: &DesktopSnapshot) {
        let dim = self.rect.dim();
        let mut rect = Rect::new(
            origin.x,
            origin.y,
            origin.x + dim.width,
            origin.y + dim.height,
        );
        if let Some(monitor) = desktop
            .monitors
            .iter()
            .find(|m| m.rect.contains(rect.left, rect.top))
        {
            snap_rect(&mut rect, &monitor.rect, self.snap_distance);
            self.monitor = monitor.id;
        }
        self.rect = rect;
    }

    /// Release per-window device resources, keeping logical state. Used
    /// by the loss-recovery sweep and by teardown.
    pub fn dispose_resources<D: Device>(&mut self, coordinator: &mut DeviceCoordinator<D>) {
        if let Some(target) = self.swap_target.take() {
            coordinator.device_mut().destroy_swap_target(target);
        }
        self.renderer.dispose_resources(coordinator);
    }

    /// Recreate per-window device resources after the coordinator
    /// reports the device usable again.
    pub fn restore_resources<D: Device>(
        &mut self,
        coordinator: &mut DeviceCoordinator<D>,
    ) -> Result<(), DeviceError> {
        assert!(
            !coordinator.is_lost(),
            "per-window resources restored while device is lost"
        );
        if self.state != WindowState::Running {
            return Ok(());
        }
        self.renderer.ensure_font(coordinator)?;
        let client_dim = self.renderer.client_dim();
        self.renderer.resize_texture(coordinator, client_dim)?;
        self.swap_target = Some(
            coordinator
                .device_mut()
                .create_swap_target(self.handle, client_dim)?,
        );
        Ok(())
    }

    /// Force a full glyph redraw on the next tick, e.g. after the
    /// backgrounds were rebuilt underneath this window.
    pub fn invalidate(&mut self) {
        self.renderer.invalidate();
    }

    /// Enter Closing exactly once; later calls are no-ops so racing
    /// close paths (process gone + user close) stay harmless.
    pub fn close_self(&mut self) {
        match self.state {
            WindowState::Closing | WindowState::Dead => {}
            _ => {
                debug!(handle = self.handle.0, "window closing");
                self.state = WindowState::Closing;
            }
        }
    }

    /// Host notification that the underlying window object is gone.
    pub fn on_destroy<D: Device>(&mut self, coordinator: &mut DeviceCoordinator<D>) {
        self.dispose_resources(coordinator);
        self.state = WindowState::Dead;
    }

    fn begin_reset(&mut self) {
        // A resize arriving while already resetting (e.g. a work-area
        // change mid-resize) is a sequencing bug upstream.
        assert!(
            self.state != WindowState::Resetting,
            "reset re-entered while already resetting"
        );
        assert_eq!(self.state, WindowState::Running, "reset outside Running");
        self.state = WindowState::Resetting;
    }

    fn end_reset(&mut self) {
        debug_assert_eq!(self.state, WindowState::Resetting);
        self.state = WindowState::Running;
    }

    fn fold_error<D: Device>(
        &mut self,
        coordinator: &mut DeviceCoordinator<D>,
        e: TickError,
    ) -> TickOutcome {
        match e {
            TickError::Gone => {
                // Expected termination, never logged as an error.
                self.close_self();
                TickOutcome::CloseRequested
            }
            TickError::Device(e) if e.is_lost() => {
                coordinator.mark_lost();
                TickOutcome::DeviceLost
            }
            TickError::Device(e) => {
                self.close_self();
                TickOutcome::Failed(anyhow::anyhow!(e))
            }
            TickError::Host(e) => {
                self.close_self();
                TickOutcome::Failed(e)
            }
        }
    }
}
