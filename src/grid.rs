//! Console cell grid and the double-buffered diff cache.
//!
//! A `CellGrid` is one snapshot of the visible console buffer: a flat,
//! row-major vector of `Cell`s plus the cursor coordinate. `GridCache`
//! keeps the previously rendered grid next to the freshly fetched one so a
//! repaint tick can answer "did anything change?" with one linear compare,
//! which is far cheaper than an unconditional redraw.

use bitflags::bitflags;

use crate::geometry::Dimension;

bitflags! {
    /// Packed console character attribute: low nibble is the foreground
    /// color index, the next nibble the background color index. Bits above
    /// the two nibbles (underline, DBCS lead/trail flags and friends) are
    /// preserved but not interpreted here.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Attr: u16 {
        const FG_BLUE = 0x0001;
        const FG_GREEN = 0x0002;
        const FG_RED = 0x0004;
        const FG_INTENSITY = 0x0008;
        const BG_BLUE = 0x0010;
        const BG_GREEN = 0x0020;
        const BG_RED = 0x0040;
        const BG_INTENSITY = 0x0080;

        // Retain bits the console reports but we do not name.
        const _ = !0;
    }
}

impl Attr {
    /// Build an attribute from 4-bit foreground/background color indices.
    pub fn from_indices(fg: u8, bg: u8) -> Attr {
        debug_assert!(fg < 16 && bg < 16);
        Attr::from_bits_retain((fg as u16) | ((bg as u16) << 4))
    }

    /// Foreground color table index (0..16).
    pub fn fg_index(self) -> usize {
        (self.bits() & 0xf) as usize
    }

    /// Background color table index (0..16).
    pub fn bg_index(self) -> usize {
        ((self.bits() >> 4) & 0xf) as usize
    }
}

/// One character position in the console grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub ch: char,
    pub attr: Attr,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            ch: ' ',
            attr: Attr::empty(),
        }
    }
}

impl Cell {
    pub fn new(ch: char, attr: Attr) -> Self {
        Self { ch, attr }
    }
}

/// Cursor position within a grid, in cell coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CursorPos {
    pub col: i32,
    pub row: i32,
}

/// A snapshot of the visible console buffer.
///
/// Invariant: `cells.len() == dim.area()`, established at construction and
/// required by everything that consumes a grid.
#[derive(Debug, Clone)]
pub struct CellGrid {
    dim: Dimension,
    cells: Vec<Cell>,
    pub cursor: CursorPos,
}

impl CellGrid {
    /// An all-blank grid of the given size.
    pub fn blank(dim: Dimension) -> Self {
        Self {
            dim,
            cells: vec![Cell::default(); dim.area()],
            cursor: CursorPos::default(),
        }
    }

    /// Wrap an already-read cell vector. Panics if the length does not
    /// match the dimension; a mismatch is a bug in the snapshot reader.
    pub fn from_cells(dim: Dimension, cells: Vec<Cell>, cursor: CursorPos) -> Self {
        assert_eq!(
            cells.len(),
            dim.area(),
            "cell buffer length must equal rows*columns"
        );
        Self { dim, cells, cursor }
    }

    pub fn dim(&self) -> Dimension {
        self.dim
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cell(&self, col: i32, row: i32) -> Cell {
        debug_assert!(col >= 0 && col < self.dim.width);
        debug_assert!(row >= 0 && row < self.dim.height);
        self.cells[row as usize * self.dim.width as usize + col as usize]
    }

    pub fn cell_mut(&mut self, col: i32, row: i32) -> &mut Cell {
        debug_assert!(col >= 0 && col < self.dim.width);
        debug_assert!(row >= 0 && row < self.dim.height);
        &mut self.cells[row as usize * self.dim.width as usize + col as usize]
    }
}

/// Double-buffered cell storage with a validity flag.
///
/// `back` receives the most recent snapshot, `front` holds the last grid
/// that actually got rendered. `commit()` promotes back to front with an
/// O(1) swap once a redraw has completed. Capacity only ever grows so
/// oscillating resizes do not churn the allocator.
#[derive(Debug)]
pub struct GridCache {
    /// Cells in active use; the vectors may be larger.
    size: usize,
    valid: bool,
    back: Vec<Cell>,
    front: Vec<Cell>,
}

impl Default for GridCache {
    fn default() -> Self {
        Self::new()
    }
}

impl GridCache {
    pub fn new() -> Self {
        Self {
            size: 0,
            valid: false,
            back: Vec::new(),
            front: Vec::new(),
        }
    }

    /// Grow storage for a new console size and invalidate the cache.
    ///
    /// Shrinking only reduces the active size; previously cached cells
    /// beyond it stay in place until the next snapshot overwrites them.
    pub fn resize(&mut self, dim: Dimension) {
        self.size = dim.area();
        self.valid = false;
        assert_eq!(self.back.len(), self.front.len());
        if self.size > self.back.len() {
            self.back.reserve(self.size);
            self.back.resize(self.back.capacity(), Cell::default());
            self.front.resize(self.back.len(), Cell::default());
        }
    }

    /// Copy a freshly fetched grid into the back storage.
    pub fn write_snapshot(&mut self, grid: &CellGrid) {
        assert_eq!(
            grid.cells().len(),
            self.size,
            "snapshot size must match the cache size; resize first"
        );
        self.back[..self.size].copy_from_slice(grid.cells());
    }

    /// Mutable view of the active back cells, sized rows*columns. Used by
    /// snapshot readers that fill the buffer in place.
    pub fn back_mut(&mut self) -> &mut [Cell] {
        &mut self.back[..self.size]
    }

    /// Whether the back buffer differs from the last rendered grid.
    ///
    /// `false` only when the cache is valid and every active cell matches
    /// in both character and attribute.
    pub fn changed(&self) -> bool {
        assert_eq!(self.back.len(), self.front.len());
        if !self.valid {
            return true;
        }
        self.back[..self.size] != self.front[..self.size]
    }

    /// Promote the back buffer to be the comparison basis for the next
    /// tick. Called only after a render completed.
    pub fn commit(&mut self) {
        std::mem::swap(&mut self.back, &mut self.front);
        self.valid = true;
    }

    /// Force the next `changed()` to report true.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Active cell count (rows*columns of the current console size).
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_with(dim: Dimension, cells: &[(i32, i32, char, Attr)]) -> CellGrid {
        let mut grid = CellGrid::blank(dim);
        for &(col, row, ch, attr) in cells {
            *grid.cell_mut(col, row) = Cell::new(ch, attr);
        }
        grid
    }

    #[test]
    fn attr_nibbles_round_trip() {
        let attr = Attr::from_indices(0xC, 0x1);
        assert_eq!(attr.fg_index(), 0xC);
        assert_eq!(attr.bg_index(), 0x1);
        assert!(attr.contains(Attr::FG_INTENSITY));
        assert!(attr.contains(Attr::FG_RED));
        assert!(attr.contains(Attr::BG_BLUE));
    }

    #[test]
    fn attr_preserves_unnamed_bits() {
        // COMMON_LVB_UNDERSCORE
        let attr = Attr::from_bits_retain(0x8007);
        assert_eq!(attr.bits(), 0x8007);
        assert_eq!(attr.fg_index(), 7);
    }

    #[test]
    fn fresh_cache_always_reports_changed() {
        let dim = Dimension::new(4, 2);
        let mut cache = GridCache::new();
        cache.resize(dim);
        cache.write_snapshot(&CellGrid::blank(dim));
        assert!(cache.changed());
    }

    #[test]
    fn unchanged_after_commit_is_not_changed() {
        let dim = Dimension::new(80, 24);
        let grid = grid_with(dim, &[(3, 1, 'x', Attr::from_indices(7, 0))]);

        let mut cache = GridCache::new();
        cache.resize(dim);
        cache.write_snapshot(&grid);
        assert!(cache.changed());
        cache.commit();

        cache.write_snapshot(&grid);
        assert!(!cache.changed());
    }

    #[test]
    fn single_cell_delta_is_detected_then_settles() {
        let dim = Dimension::new(80, 24);
        let g1 = CellGrid::blank(dim);
        let g2 = grid_with(dim, &[(0, 0, 'A', Attr::from_indices(12, 0))]);

        let mut cache = GridCache::new();
        cache.resize(dim);
        cache.write_snapshot(&g1);
        cache.commit();

        cache.write_snapshot(&g2);
        assert!(cache.changed());
        cache.commit();

        cache.write_snapshot(&g2);
        assert!(!cache.changed());
    }

    #[test]
    fn attribute_only_delta_is_detected() {
        let dim = Dimension::new(10, 2);
        let g1 = grid_with(dim, &[(5, 1, 'q', Attr::from_indices(7, 0))]);
        let g2 = grid_with(dim, &[(5, 1, 'q', Attr::from_indices(15, 0))]);

        let mut cache = GridCache::new();
        cache.resize(dim);
        cache.write_snapshot(&g1);
        cache.commit();
        cache.write_snapshot(&g2);
        assert!(cache.changed());
    }

    #[test]
    fn resize_invalidates_and_grows_without_discarding() {
        let small = Dimension::new(4, 2);
        let mut cache = GridCache::new();
        cache.resize(small);
        let marker = Cell::new('Z', Attr::from_indices(10, 0));
        cache.back_mut()[0] = marker;
        cache.commit();
        assert!(cache.is_valid());

        cache.resize(Dimension::new(8, 4));
        assert!(!cache.is_valid());
        assert!(cache.changed());
        // Grown storage keeps prior content in place until the next
        // snapshot overwrites it; front held the marker after the commit.
        cache.commit();
        assert_eq!(cache.back_mut()[0], marker);
    }

    #[test]
    fn shrink_keeps_capacity() {
        let mut cache = GridCache::new();
        cache.resize(Dimension::new(100, 50));
        let grown = cache.back_mut().len();
        assert_eq!(grown, 5000);
        cache.resize(Dimension::new(10, 5));
        assert_eq!(cache.len(), 50);
        cache.resize(Dimension::new(100, 50));
        assert_eq!(cache.len(), 5000);
    }

    #[test]
    #[should_panic(expected = "snapshot size")]
    fn mismatched_snapshot_panics() {
        let mut cache = GridCache::new();
        cache.resize(Dimension::new(4, 2));
        cache.write_snapshot(&CellGrid::blank(Dimension::new(5, 2)));
    }

    #[test]
    #[should_panic(expected = "cell buffer length")]
    fn grid_length_invariant_is_enforced() {
        CellGrid::from_cells(Dimension::new(3, 3), vec![Cell::default(); 8], CursorPos::default());
    }
}
