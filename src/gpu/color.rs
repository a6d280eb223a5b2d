//! The 16-entry console color table.

use super::device::Color;

/// Number of distinct colors a console window can display.
pub const CONSOLE_COLORS: usize = 16;

/// Classic console palette, indexed by the 4-bit attribute nibbles. The
/// high bit of an index selects the intense half of the table.
pub const COLOR_TABLE: [Color; CONSOLE_COLORS] = [
    Color::xrgb(0x00, 0x00, 0x00),
    Color::xrgb(0x00, 0x00, 0x80),
    Color::xrgb(0x00, 0x80, 0x00),
    Color::xrgb(0x00, 0x80, 0x80),
    Color::xrgb(0x80, 0x00, 0x00),
    Color::xrgb(0x80, 0x00, 0x80),
    Color::xrgb(0x80, 0x80, 0x00),
    Color::xrgb(0xC0, 0xC0, 0xC0),
    Color::xrgb(0x80, 0x80, 0x80),
    Color::xrgb(0x00, 0x00, 0xFF),
    Color::xrgb(0x00, 0xFF, 0x00),
    Color::xrgb(0x00, 0xFF, 0xFF),
    Color::xrgb(0xFF, 0x00, 0x00),
    Color::xrgb(0xFF, 0x00, 0xFF),
    Color::xrgb(0xFF, 0xFF, 0x00),
    Color::xrgb(0xFF, 0xFF, 0xFF),
];

/// Foreground table index after the intensify policy. When enabled, every
/// non-zero foreground gets the intensity bit forced on, regardless of
/// what the console reported.
pub fn effective_fg_index(index: usize, intensify: bool) -> usize {
    debug_assert!(index < CONSOLE_COLORS);
    if intensify && index != 0 {
        index | 0x8
    } else {
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intensify_forces_high_bit() {
        assert_eq!(effective_fg_index(3, true), 11);
        assert_eq!(effective_fg_index(3, false), 3);
        assert_eq!(effective_fg_index(11, true), 11);
    }

    #[test]
    fn intensify_leaves_black_alone() {
        assert_eq!(effective_fg_index(0, true), 0);
    }
}
