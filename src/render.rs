//! Glyph batch renderer: turns a cell grid into few draw calls.
//!
//! Text is the expensive thing, so two tricks keep the tick cheap:
//!
//! - the grid cache ([`GridCache`]) skips the whole redraw when nothing
//!   changed since the last committed frame, and
//! - within a redraw, glyphs are batched per (row, foreground color):
//!   every same-colored character in a row goes out in one text-draw
//!   call with blanks standing in for the other positions, bounding
//!   draw calls to rows x colors-present instead of rows x columns.
//!
//! The redraw lands in a per-window texture; [`TextRenderer::compose`]
//! then layers background, text (with the pre-compose alpha) and cursor
//! into the window's swap target. Presenting is the caller's job since
//! that is where device loss shows up.

use tracing::{debug, trace};

use crate::config::{Settings, SettingsDelta};
use crate::geometry::{calc_client_size, Dimension, Point, Rect};
use crate::gpu::color::{effective_fg_index, COLOR_TABLE, CONSOLE_COLORS};
use crate::gpu::device::{
    Color, Device, DeviceError, FontHandle, FontSpec, RenderTarget, SwapTargetId, TextureId,
};
use crate::gpu::DeviceCoordinator;
use crate::grid::{CellGrid, CursorPos, GridCache};

/// Cursor overlay color, translucent light grey.
const CURSOR_COLOR: Color = Color::argb(0xb0, 0xc0, 0xc0, 0xc0);

/// Cursor blink half-period in milliseconds.
const BLINK_PERIOD_MS: u64 = 500;

/// Time-based blink predicate, independent of repaint cadence.
pub fn blink_on(now_ms: u64) -> bool {
    (now_ms / BLINK_PERIOD_MS) % 2 == 0
}

/// Whether a cell contributes a visible glyph. NUL never does; outside
/// extended mode, control characters and whitespace are blanked too
/// (spaces carry no glyph, their background is pass one's job).
fn printable(ch: char, extended_chars: bool) -> bool {
    ch != '\0' && (extended_chars || (!ch.is_control() && !ch.is_whitespace()))
}

/// Per-window text renderer. Owns the grid cache, the font and the
/// texture the glyph passes render into; all of those except the cache
/// are device resources and go away during the loss protocol.
pub struct TextRenderer {
    cache: GridCache,
    console_dim: Dimension,
    cursor: CursorPos,
    font_spec: FontSpec,
    font: Option<FontHandle>,
    texture: Option<TextureId>,
    texture_dim: Dimension,
    gutter_size: i32,
    extended_chars: bool,
    intensify: bool,
    active_pre_alpha: u8,
    inactive_pre_alpha: u8,
}

impl TextRenderer {
    /// No device work happens here; resources are created by
    /// [`restore_resources`](Self::restore_resources) once the initial
    /// console size is known.
    pub fn new(settings: &Settings) -> Self {
        Self {
            cache: GridCache::new(),
            console_dim: Dimension::new(0, 0),
            cursor: CursorPos::default(),
            font_spec: FontSpec {
                name: settings.font_name.clone(),
                size: settings.font_size,
            },
            font: None,
            texture: None,
            texture_dim: Dimension::new(0, 0),
            gutter_size: settings.gutter_size,
            extended_chars: settings.extended_chars,
            intensify: settings.intensify,
            active_pre_alpha: settings.active_pre_alpha,
            inactive_pre_alpha: settings.inactive_pre_alpha,
        }
    }

    /// Pixel metrics of one character cell in the current font.
    pub fn char_dim(&self) -> Dimension {
        self.font
            .expect("font metrics queried while device resources are disposed")
            .char_dim
    }

    pub fn console_dim(&self) -> Dimension {
        self.console_dim
    }

    /// Client-area pixel size needed for the current console dimension.
    pub fn client_dim(&self) -> Dimension {
        calc_client_size(self.char_dim(), self.console_dim, self.gutter_size)
    }

    pub fn set_console_dim(&mut self, dim: Dimension) {
        if dim != self.console_dim {
            debug!(width = dim.width, height = dim.height, "console resized");
            self.console_dim = dim;
            self.cache.resize(dim);
        }
    }

    /// Force a full redraw on the next update.
    pub fn invalidate(&mut self) {
        self.cache.invalidate();
    }

    /// Toggling glyph policy changes what previously rendered cells look
    /// like, so the cached frame is no longer trustworthy.
    pub fn toggle_extended_chars(&mut self) {
        self.extended_chars = !self.extended_chars;
        self.cache.invalidate();
    }

    /// Apply a settings delta. Returns true when the font changed and the
    /// caller must re-derive window geometry from the new metrics.
    pub fn adjust<D: Device>(
        &mut self,
        delta: &SettingsDelta,
        coordinator: &mut DeviceCoordinator<D>,
    ) -> Result<bool, DeviceError> {
        if let Some(gutter) = delta.gutter_size {
            self.gutter_size = gutter;
        }
        if let Some(extended) = delta.extended_chars {
            self.extended_chars = extended;
        }
        if let Some(intensify) = delta.intensify {
            self.intensify = intensify;
        }
        if let Some(alpha) = delta.active_pre_alpha {
            self.active_pre_alpha = alpha;
        }
        if let Some(alpha) = delta.inactive_pre_alpha {
            self.inactive_pre_alpha = alpha;
        }
        let font_changed = delta.changes_font();
        if font_changed {
            if let Some(name) = &delta.font_name {
                self.font_spec.name = name.clone();
            }
            if let Some(size) = delta.font_size {
                self.font_spec.size = size;
            }
            if let Some(font) = self.font.take() {
                coordinator.device_mut().destroy_font(font.id);
            }
            self.font = Some(coordinator.device_mut().create_font(&self.font_spec)?);
        }
        self.cache.invalidate();
        Ok(font_changed)
    }

    pub fn gutter_size(&self) -> i32 {
        self.gutter_size
    }

    /// Create the font if it is missing. Character metrics come from the
    /// device, so this must happen before any client-size computation.
    pub fn ensure_font<D: Device>(
        &mut self,
        coordinator: &mut DeviceCoordinator<D>,
    ) -> Result<(), DeviceError> {
        if self.font.is_none() {
            self.font = Some(coordinator.device_mut().create_font(&self.font_spec)?);
        }
        Ok(())
    }

    /// Release the font and text texture. Logical state (cache contents,
    /// console dimension) survives so recovery can redraw without a new
    /// snapshot.
    pub fn dispose_resources<D: Device>(&mut self, coordinator: &mut DeviceCoordinator<D>) {
        if let Some(texture) = self.texture.take() {
            coordinator.device_mut().destroy_texture(texture);
        }
        if let Some(font) = self.font.take() {
            coordinator.device_mut().destroy_font(font.id);
        }
        self.cache.invalidate();
    }

    /// Ensure the text texture covers `client_dim`, recreating if needed.
    pub fn resize_texture<D: Device>(
        &mut self,
        coordinator: &mut DeviceCoordinator<D>,
        client_dim: Dimension,
    ) -> Result<(), DeviceError> {
        if self.texture.is_some() && self.texture_dim == client_dim {
            return Ok(());
        }
        if let Some(texture) = self.texture.take() {
            coordinator.device_mut().destroy_texture(texture);
        }
        self.texture = Some(coordinator.create_texture(client_dim, None)?);
        self.texture_dim = client_dim;
        self.cache.invalidate();
        Ok(())
    }

    /// Feed a fresh snapshot through the diff cache, redrawing the text
    /// texture only when something actually changed. Returns whether a
    /// redraw happened.
    pub fn update<D: Device>(
        &mut self,
        grid: &CellGrid,
        coordinator: &mut DeviceCoordinator<D>,
    ) -> Result<bool, DeviceError> {
        self.set_console_dim(grid.dim());
        self.cursor = grid.cursor;
        self.cache.write_snapshot(grid);
        if !self.cache.changed() {
            trace!("grid unchanged; skipping redraw");
            return Ok(false);
        }
        self.redraw(grid, coordinator)?;
        self.cache.commit();
        Ok(true)
    }

    /// Render the whole grid into the text texture.
    fn redraw<D: Device>(
        &mut self,
        grid: &CellGrid,
        coordinator: &mut DeviceCoordinator<D>,
    ) -> Result<(), DeviceError> {
        let texture = self
            .texture
            .expect("redraw issued while device resources are disposed");
        let font = self
            .font
            .expect("redraw issued while device resources are disposed");
        let char_dim = font.char_dim;
        let dim = grid.dim();
        let gutter = self.gutter_size;
        let white = coordinator.white_texture();
        let device = coordinator.device_mut();

        device.set_render_target(RenderTarget::Texture(texture))?;
        device.clear(Color::argb(0, 0, 0, 0))?;

        // Pass one: background fills, one block per cell with a non-zero
        // background index.
        for row in 0..dim.height {
            for col in 0..dim.width {
                let attr = grid.cell(col, row).attr;
                let bg = attr.bg_index();
                if bg == 0 {
                    continue;
                }
                let left = gutter + col * char_dim.width;
                let top = gutter + row * char_dim.height;
                let rect =
                    Rect::new(left, top, left + char_dim.width, top + char_dim.height);
                device.draw_block(white, rect, COLOR_TABLE[bg])?;
            }
        }

        // Pass two: one text run per (row, foreground color present).
        // The run starts at the first glyph of that color and pads every
        // other position with blanks through the end of the row, so
        // non-contiguous same-colored glyphs still land in a single call.
        let mut run = String::with_capacity(dim.width as usize);
        for row in 0..dim.height {
            for color_index in 0..CONSOLE_COLORS {
                let mut first_col = None;
                run.clear();
                for col in 0..dim.width {
                    let cell = grid.cell(col, row);
                    let visible = printable(cell.ch, self.extended_chars)
                        && cell.attr.fg_index() == color_index;
                    if first_col.is_none() {
                        if !visible {
                            continue;
                        }
                        first_col = Some(col);
                    }
                    run.push(if visible { cell.ch } else { ' ' });
                }
                let Some(first_col) = first_col else { continue };
                let color = COLOR_TABLE[effective_fg_index(color_index, self.intensify)];
                let origin = Point::new(
                    gutter + first_col * char_dim.width,
                    gutter + row * char_dim.height,
                );
                device.draw_text(font.id, &run, origin, color)?;
            }
        }
        Ok(())
    }

    /// Layer background, text and cursor into the window's swap target.
    /// `monitor_offset` is the window's client origin within its
    /// monitor's background texture; `now_ms` drives the cursor blink.
    pub fn compose<D: Device>(
        &mut self,
        coordinator: &mut DeviceCoordinator<D>,
        target: SwapTargetId,
        background: TextureId,
        monitor_offset: Point,
        active: bool,
        now_ms: u64,
    ) -> Result<(), DeviceError> {
        let texture = self
            .texture
            .expect("compose issued while device resources are disposed");
        let char_dim = self.char_dim();
        let pre_alpha = if active {
            self.active_pre_alpha
        } else {
            self.inactive_pre_alpha
        };
        let src = Rect::new(
            monitor_offset.x,
            monitor_offset.y,
            monitor_offset.x + self.texture_dim.width,
            monitor_offset.y + self.texture_dim.height,
        );
        let white = coordinator.white_texture();
        let device = coordinator.device_mut();

        device.set_render_target(RenderTarget::SwapTarget(target))?;
        device.draw_sprite(background, Some(src), Point::new(0, 0), Color::WHITE)?;
        device.draw_sprite(
            texture,
            None,
            Point::new(0, 0),
            Color::argb(pre_alpha, 0xff, 0xff, 0xff),
        )?;

        // Cursor overlay, only in the focused variant and only on the
        // visible half of the blink period. The cursor can sit outside
        // the viewport when the console is scrolled; off-grid positions
        // draw nothing.
        let cursor_visible = self.cursor.col >= 0
            && self.cursor.row >= 0
            && self.cursor.col < self.console_dim.width
            && self.cursor.row < self.console_dim.height;
        if active && cursor_visible && blink_on(now_ms) {
            let left = self.gutter_size + self.cursor.col * char_dim.width;
            let top = self.gutter_size + self.cursor.row * char_dim.height;
            let rect = Rect::new(left, top, left + char_dim.width, top + char_dim.height);
            device.draw_block(white, rect, CURSOR_COLOR)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desktop::DesktopSnapshot;
    use crate::gpu::testing::{DeviceOp, RecordingDevice};
    use crate::grid::{Attr, Cell};

    fn coordinator() -> DeviceCoordinator<RecordingDevice> {
        let desktop =
            DesktopSnapshot::solid(Rect::new(0, 0, 1920, 1080), Color::xrgb(0, 0, 0));
        DeviceCoordinator::new(RecordingDevice::new(), &desktop).unwrap()
    }

    fn renderer(coordinator: &mut DeviceCoordinator<RecordingDevice>) -> TextRenderer {
        let mut renderer = TextRenderer::new(&Settings::default());
        renderer.ensure_font(coordinator).unwrap();
        renderer
            .resize_texture(coordinator, Dimension::new(644, 388))
            .unwrap();
        renderer
    }

    /// 80x24 grid with a single red 'A' at the origin: no background
    /// blocks, exactly one text call carrying the 'A' plus blanks to the
    /// end of the row.
    #[test]
    fn single_red_glyph_is_one_text_call() {
        let mut coordinator = coordinator();
        let mut renderer = renderer(&mut coordinator);

        let mut grid = CellGrid::blank(Dimension::new(80, 24));
        *grid.cell_mut(0, 0) = Cell::new('A', Attr::from_indices(4, 0));
        coordinator.device_mut().clear_ops();

        assert!(renderer.update(&grid, &mut coordinator).unwrap());
        let device = coordinator.device_mut();
        assert!(device.block_draws().is_empty());
        let texts = device.text_draws();
        assert_eq!(texts.len(), 1);
        let (text, color) = &texts[0];
        assert_eq!(text.len(), 80);
        assert!(text.starts_with('A'));
        assert!(text[1..].chars().all(|c| c == ' '));
        assert_eq!(*color, COLOR_TABLE[4]);
    }

    #[test]
    fn unchanged_grid_skips_the_redraw() {
        let mut coordinator = coordinator();
        let mut renderer = renderer(&mut coordinator);
        let grid = {
            let mut g = CellGrid::blank(Dimension::new(80, 24));
            *g.cell_mut(3, 5) = Cell::new('x', Attr::from_indices(7, 0));
            g
        };

        assert!(renderer.update(&grid, &mut coordinator).unwrap());
        coordinator.device_mut().clear_ops();
        assert!(!renderer.update(&grid, &mut coordinator).unwrap());
        assert!(coordinator.device_mut().ops().is_empty());
    }

    #[test]
    fn one_cell_change_triggers_exactly_one_redraw() {
        let mut coordinator = coordinator();
        let mut renderer = renderer(&mut coordinator);
        let mut grid = CellGrid::blank(Dimension::new(80, 24));
        renderer.update(&grid, &mut coordinator).unwrap();

        *grid.cell_mut(10, 10) = Cell::new('q', Attr::from_indices(7, 0));
        assert!(renderer.update(&grid, &mut coordinator).unwrap());
        assert!(!renderer.update(&grid, &mut coordinator).unwrap());
    }

    #[test]
    fn intensify_promotes_foreground_indices() {
        let mut coordinator = coordinator();
        let mut renderer = renderer(&mut coordinator);
        let mut settings = Settings::default();
        settings.intensify = true;
        let mut intense = TextRenderer::new(&settings);
        intense.ensure_font(&mut coordinator).unwrap();
        intense
            .resize_texture(&mut coordinator, Dimension::new(644, 388))
            .unwrap();

        let mut grid = CellGrid::blank(Dimension::new(80, 24));
        *grid.cell_mut(0, 0) = Cell::new('A', Attr::from_indices(3, 0));

        coordinator.device_mut().clear_ops();
        renderer.update(&grid, &mut coordinator).unwrap();
        assert_eq!(
            coordinator.device_mut().text_draws()[0].1,
            COLOR_TABLE[3]
        );

        coordinator.device_mut().clear_ops();
        intense.update(&grid, &mut coordinator).unwrap();
        assert_eq!(
            coordinator.device_mut().text_draws()[0].1,
            COLOR_TABLE[11]
        );
    }

    #[test]
    fn draw_calls_bounded_by_rows_times_colors() {
        let mut coordinator = coordinator();
        let mut renderer = renderer(&mut coordinator);
        let dim = Dimension::new(80, 24);
        let mut grid = CellGrid::blank(dim);
        // Alternate two foreground colors across every cell of every row.
        for row in 0..dim.height {
            for col in 0..dim.width {
                let fg = if col % 2 == 0 { 7 } else { 10 };
                *grid.cell_mut(col, row) = Cell::new('#', Attr::from_indices(fg, 0));
            }
        }
        coordinator.device_mut().clear_ops();
        renderer.update(&grid, &mut coordinator).unwrap();
        assert_eq!(coordinator.device_mut().text_draws().len(), 24 * 2);
    }

    #[test]
    fn background_blocks_only_for_nonzero_background() {
        let mut coordinator = coordinator();
        let mut renderer = renderer(&mut coordinator);
        let mut grid = CellGrid::blank(Dimension::new(80, 24));
        *grid.cell_mut(2, 1) = Cell::new(' ', Attr::from_indices(7, 2));
        *grid.cell_mut(3, 1) = Cell::new(' ', Attr::from_indices(7, 2));

        coordinator.device_mut().clear_ops();
        renderer.update(&grid, &mut coordinator).unwrap();
        let blocks = coordinator.device_mut().block_draws();
        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(|(_, color)| *color == COLOR_TABLE[2]));
        // Spaces carry no glyph, so no text call was issued either.
        assert!(coordinator.device_mut().text_draws().is_empty());
    }

    #[test]
    fn toggling_extended_chars_invalidates_the_cache() {
        let mut coordinator = coordinator();
        let mut renderer = renderer(&mut coordinator);
        let grid = CellGrid::blank(Dimension::new(80, 24));
        renderer.update(&grid, &mut coordinator).unwrap();
        assert!(!renderer.update(&grid, &mut coordinator).unwrap());
        renderer.toggle_extended_chars();
        assert!(renderer.update(&grid, &mut coordinator).unwrap());
    }

    #[test]
    fn blink_predicate_is_period_based() {
        assert!(blink_on(0));
        assert!(blink_on(499));
        assert!(!blink_on(500));
        assert!(!blink_on(999));
        assert!(blink_on(1000));
    }

    #[test]
    fn cursor_drawn_only_when_active_and_blinking() {
        let mut coordinator = coordinator();
        let mut renderer = renderer(&mut coordinator);
        let grid = CellGrid::blank(Dimension::new(80, 24));
        renderer.update(&grid, &mut coordinator).unwrap();

        let target = coordinator
            .device_mut()
            .create_swap_target(crate::gpu::device::WindowHandle(1), Dimension::new(644, 388))
            .unwrap();
        let background = coordinator.background_texture(crate::desktop::MonitorId(0));

        coordinator.device_mut().clear_ops();
        renderer
            .compose(&mut coordinator, target, background, Point::new(0, 0), true, 0)
            .unwrap();
        let cursor_blocks = coordinator.device_mut().block_draws();
        assert_eq!(cursor_blocks.len(), 1);
        assert_eq!(cursor_blocks[0].1, Color::argb(0xb0, 0xc0, 0xc0, 0xc0));

        // Off half of the blink period.
        coordinator.device_mut().clear_ops();
        renderer
            .compose(&mut coordinator, target, background, Point::new(0, 0), true, 500)
            .unwrap();
        assert!(coordinator.device_mut().block_draws().is_empty());

        // Inactive windows never draw the cursor.
        coordinator.device_mut().clear_ops();
        renderer
            .compose(&mut coordinator, target, background, Point::new(0, 0), false, 0)
            .unwrap();
        assert!(coordinator.device_mut().block_draws().is_empty());
    }

    #[test]
    fn off_grid_cursor_draws_nothing() {
        let mut coordinator = coordinator();
        let mut renderer = renderer(&mut coordinator);
        // A scrolled console reports the cursor below the viewport.
        let mut grid = CellGrid::blank(Dimension::new(80, 24));
        grid.cursor = CursorPos { col: 0, row: 30 };
        renderer.update(&grid, &mut coordinator).unwrap();

        let target = coordinator
            .device_mut()
            .create_swap_target(crate::gpu::device::WindowHandle(1), Dimension::new(644, 388))
            .unwrap();
        let background = coordinator.background_texture(crate::desktop::MonitorId(0));

        coordinator.device_mut().clear_ops();
        renderer
            .compose(&mut coordinator, target, background, Point::new(0, 0), true, 0)
            .unwrap();
        assert!(coordinator.device_mut().block_draws().is_empty());

        // Above the viewport too.
        grid.cursor = CursorPos { col: 5, row: -1 };
        renderer.update(&grid, &mut coordinator).unwrap();
        coordinator.device_mut().clear_ops();
        renderer
            .compose(&mut coordinator, target, background, Point::new(0, 0), true, 0)
            .unwrap();
        assert!(coordinator.device_mut().block_draws().is_empty());
    }

    #[test]
    fn compose_uses_pre_alpha_for_the_text_layer() {
        let mut coordinator = coordinator();
        let mut renderer = renderer(&mut coordinator);
        let grid = CellGrid::blank(Dimension::new(80, 24));
        renderer.update(&grid, &mut coordinator).unwrap();
        let target = coordinator
            .device_mut()
            .create_swap_target(crate::gpu::device::WindowHandle(1), Dimension::new(644, 388))
            .unwrap();
        let background = coordinator.background_texture(crate::desktop::MonitorId(0));

        coordinator.device_mut().clear_ops();
        renderer
            .compose(&mut coordinator, target, background, Point::new(0, 0), false, 500)
            .unwrap();
        let sprite_alphas: Vec<u8> = coordinator
            .device_mut()
            .ops()
            .iter()
            .filter_map(|op| match op {
                DeviceOp::Sprite(_, _, color) => Some(color.alpha()),
                _ => None,
            })
            .collect();
        // Background opaque, text layer at the inactive pre-compose alpha.
        assert_eq!(sprite_alphas, vec![0xff, Settings::default().inactive_pre_alpha]);
    }
}
