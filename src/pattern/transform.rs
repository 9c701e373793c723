//! # Pattern Transforms
//!
//! Pure bitmap-to-bitmap functions used to build a computed pattern from a
//! base tile. Every function allocates a new [`Bitmap`]; inputs are never
//! mutated except the explicit `target` of [`tile`].
//!
//! | Function | Output size |
//! |----------|-------------|
//! | [`tile`] | `target` size |
//! | [`double`] | `2w` and/or `2h` |
//! | [`mirror_horizontal`] | `2w x h` |
//! | [`mirror_vertical`] | `w x 2h` |
//! | [`invert`] | unchanged |
//! | [`pad`] | `(left + w + right) x h` |
//!
//! None of these panic on well-formed bitmaps: they only copy indices that
//! already exist in the source.

use serde::{Deserialize, Serialize};

use crate::bitmap::Bitmap;

/// Horizontal placement of the tile inside the needle span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    Left,
    #[default]
    Center,
    Right,
}

impl Alignment {
    /// X offset of the tile's left edge inside a target of `target_width`.
    ///
    /// Negative when the tile is wider than the target.
    pub fn offset(self, target_width: usize, source_width: usize) -> i64 {
        let diff = target_width as i64 - source_width as i64;
        match self {
            Alignment::Left => 0,
            Alignment::Center => diff.div_euclid(2),
            Alignment::Right => diff,
        }
    }
}

/// Map a target coordinate onto a source axis of length `len`.
///
/// Wraps when `repeat` is set, otherwise returns `None` outside the source.
#[inline]
fn source_coord(coord: i64, len: usize, repeat: bool) -> Option<usize> {
    if len == 0 {
        return None;
    }
    if repeat {
        Some(coord.rem_euclid(len as i64) as usize)
    } else if (0..len as i64).contains(&coord) {
        Some(coord as usize)
    } else {
        None
    }
}

/// # Tile a source bitmap into a target
///
/// For every target cell, find the source cell after shifting by the
/// alignment offset. Axes with `repeat` set wrap modulo the source size;
/// other axes leave target cells outside the source untouched.
///
/// Vertically the tile is anchored to row 0: the bottom of the tile sits on
/// the bottom of the target, and it is the top that gets cut off or
/// repeated.
///
/// The source palette is copied onto the target.
pub fn tile(
    target: &mut Bitmap,
    source: &Bitmap,
    repeat_h: bool,
    repeat_v: bool,
    alignment: Alignment,
) {
    target.palette = source.palette.clone();
    if source.is_empty() {
        return;
    }

    let offset = alignment.offset(target.width, source.width);

    for ty in 0..target.height {
        // Distance from the bottom edge; with bottom-up storage this is `ty`.
        let Some(sy) = source_coord(ty as i64, source.height, repeat_v) else {
            continue;
        };
        for tx in 0..target.width {
            let Some(sx) = source_coord(tx as i64 - offset, source.width, repeat_h) else {
                continue;
            };
            if let Some(v) = source.get(sx, sy) {
                target.set(tx, ty, v);
            }
        }
    }
}

/// # Double columns and/or rows
///
/// Each source cell becomes a 2x1, 1x2 or 2x2 block. With both flags off
/// the result is a copy.
pub fn double(source: &Bitmap, double_cols: bool, double_rows: bool) -> Bitmap {
    let fx = if double_cols { 2 } else { 1 };
    let fy = if double_rows { 2 } else { 1 };
    let mut out = Bitmap::new(
        source.width.saturating_mul(fx),
        source.height.saturating_mul(fy),
        source.palette.clone(),
    );

    for y in 0..out.height {
        for x in 0..out.width {
            if let Some(v) = source.get(x / fx, y / fy) {
                out.set(x, y, v);
            }
        }
    }
    out
}

/// # Mirror horizontally
///
/// Double width: the source on the left, its left-right flip on the right.
pub fn mirror_horizontal(source: &Bitmap) -> Bitmap {
    let w = source.width;
    let mut out = Bitmap::new(w.saturating_mul(2), source.height, source.palette.clone());
    if out.is_empty() {
        return out;
    }

    for y in 0..source.height {
        for x in 0..w {
            if let Some(v) = source.get(x, y) {
                out.set(x, y, v);
                out.set(2 * w - 1 - x, y, v);
            }
        }
    }
    out
}

/// # Mirror vertically
///
/// Double height: the source in the bottom half, its top-bottom flip in
/// the top half.
pub fn mirror_vertical(source: &Bitmap) -> Bitmap {
    let h = source.height;
    let mut out = Bitmap::new(source.width, h.saturating_mul(2), source.palette.clone());
    if out.is_empty() {
        return out;
    }

    for y in 0..h {
        for x in 0..source.width {
            if let Some(v) = source.get(x, y) {
                out.set(x, y, v);
                out.set(x, 2 * h - 1 - y, v);
            }
        }
    }
    out
}

/// # Invert needle polarity
///
/// Flips 0 and 1. Only meaningful for two-color bitmaps; other indices are
/// copied unchanged.
pub fn invert(source: &Bitmap) -> Bitmap {
    let mut out = source.clone();
    for v in out.data.iter_mut() {
        *v = match *v {
            0 => 1,
            1 => 0,
            other => other,
        };
    }
    out.ensure_palette_len(2);
    out
}

/// # Pad with empty columns
///
/// Adds `left` columns before and `right` columns after the content, filled
/// with index 0. A width that does not fit yields an empty bitmap.
pub fn pad(source: &Bitmap, left: usize, right: usize) -> Bitmap {
    let width = source
        .width
        .checked_add(left)
        .and_then(|w| w.checked_add(right))
        .unwrap_or(usize::MAX);
    let mut out = Bitmap::new(width, source.height, source.palette.clone());
    if out.is_empty() || source.is_empty() {
        return out;
    }

    for y in 0..source.height {
        if let Some(row) = source.row(y) {
            let start = y * out.width + left;
            out.data[start..start + source.width].copy_from_slice(row);
        }
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::NEEDLE_PALETTE;
    use pretty_assertions::assert_eq;

    fn checker() -> Bitmap {
        Bitmap::from_rows(&[&[0, 1], &[1, 0]])
    }

    fn asymmetric() -> Bitmap {
        // row0 = [1,0,0], row1 = [1,1,0]
        Bitmap::from_rows(&[&[1, 0, 0], &[1, 1, 0]])
    }

    #[test]
    fn test_alignment_offsets() {
        assert_eq!(Alignment::Left.offset(10, 4), 0);
        assert_eq!(Alignment::Center.offset(10, 4), 3);
        assert_eq!(Alignment::Center.offset(9, 4), 2);
        assert_eq!(Alignment::Right.offset(10, 4), 6);
        // Tile wider than target floors toward negative infinity
        assert_eq!(Alignment::Center.offset(4, 7), -2);
    }

    #[test]
    fn test_tile_repeat_both_axes() {
        let mut target = Bitmap::new(6, 3, vec![[0, 0, 0]]);
        tile(&mut target, &checker(), true, true, Alignment::Left);

        assert_eq!(target.row(0), Some(&[0u8, 1, 0, 1, 0, 1][..]));
        assert_eq!(target.row(1), Some(&[1u8, 0, 1, 0, 1, 0][..]));
        assert_eq!(target.row(2), Some(&[0u8, 1, 0, 1, 0, 1][..]));
        assert_eq!(target.palette, NEEDLE_PALETTE.to_vec());
    }

    #[test]
    fn test_tile_no_repeat_leaves_cells_untouched() {
        let mut target = Bitmap::new(5, 3, NEEDLE_PALETTE.to_vec());
        tile(&mut target, &asymmetric(), false, false, Alignment::Left);

        assert_eq!(target.row(0), Some(&[1u8, 0, 0, 0, 0][..]));
        assert_eq!(target.row(1), Some(&[1u8, 1, 0, 0, 0][..]));
        assert_eq!(target.row(2), Some(&[0u8, 0, 0, 0, 0][..]));
    }

    #[test]
    fn test_tile_right_alignment() {
        let mut target = Bitmap::new(5, 1, NEEDLE_PALETTE.to_vec());
        tile(&mut target, &asymmetric(), false, false, Alignment::Right);
        assert_eq!(target.row(0), Some(&[0u8, 0, 1, 0, 0][..]));
    }

    #[test]
    fn test_tile_center_alignment_repeating() {
        // offset = (5 - 3) / 2 = 1, so target x=1 maps to source x=0
        let mut target = Bitmap::new(5, 1, NEEDLE_PALETTE.to_vec());
        tile(&mut target, &asymmetric(), true, false, Alignment::Center);
        assert_eq!(target.row(0), Some(&[0u8, 1, 0, 0, 1][..]));
    }

    #[test]
    fn test_tile_wider_source_is_cropped() {
        let wide = Bitmap::from_rows(&[&[1, 0, 1, 1, 0, 0]]);
        let mut target = Bitmap::new(2, 1, NEEDLE_PALETTE.to_vec());
        tile(&mut target, &wide, false, false, Alignment::Center);
        // offset = -2, target x=0 -> source x=2
        assert_eq!(target.row(0), Some(&[1u8, 1][..]));
    }

    #[test]
    fn test_tile_empty_source_is_noop() {
        let mut target = Bitmap::new(3, 1, NEEDLE_PALETTE.to_vec());
        tile(&mut target, &Bitmap::empty(), true, true, Alignment::Left);
        assert_eq!(target.data, vec![0, 0, 0]);
    }

    #[test]
    fn test_double_cols_only() {
        let out = double(&asymmetric(), true, false);
        assert_eq!((out.width, out.height), (6, 2));
        assert_eq!(out.row(0), Some(&[1u8, 1, 0, 0, 0, 0][..]));
        assert_eq!(out.row(1), Some(&[1u8, 1, 1, 1, 0, 0][..]));
    }

    #[test]
    fn test_double_rows_only() {
        let out = double(&asymmetric(), false, true);
        assert_eq!((out.width, out.height), (3, 4));
        assert_eq!(out.row(0), out.row(1));
        assert_eq!(out.row(2), Some(&[1u8, 1, 0][..]));
        assert_eq!(out.row(2), out.row(3));
    }

    #[test]
    fn test_double_both() {
        let out = double(&checker(), true, true);
        assert_eq!((out.width, out.height), (4, 4));
        assert_eq!(out.row(0), Some(&[0u8, 0, 1, 1][..]));
        assert_eq!(out.row(3), Some(&[1u8, 1, 0, 0][..]));
    }

    #[test]
    fn test_mirror_horizontal_doubles_width_and_is_symmetric() {
        let b = asymmetric();
        let out = mirror_horizontal(&b);

        assert_eq!(out.width, 2 * b.width);
        assert_eq!(out.height, b.height);
        for y in 0..out.height {
            for x in 0..out.width {
                assert_eq!(out.get(x, y), out.get(2 * b.width - 1 - x, y));
            }
        }
        assert_eq!(out.row(0), Some(&[1u8, 0, 0, 0, 0, 1][..]));
    }

    #[test]
    fn test_mirror_vertical_doubles_height_and_is_symmetric() {
        let b = asymmetric();
        let out = mirror_vertical(&b);

        assert_eq!(out.width, b.width);
        assert_eq!(out.height, 2 * b.height);
        for y in 0..out.height {
            assert_eq!(out.row(y), out.row(2 * b.height - 1 - y));
        }
        assert_eq!(out.row(0), b.row(0));
        assert_eq!(out.row(3), b.row(0));
    }

    #[test]
    fn test_invert_flips_needle_values() {
        let out = invert(&checker());
        assert_eq!(out.data, vec![1, 0, 0, 1]);
    }

    #[test]
    fn test_invert_leaves_other_indices() {
        let mut b = Bitmap::new(3, 1, vec![[0, 0, 0], [1, 1, 1], [2, 2, 2]]);
        b.data = vec![0, 1, 2];
        assert_eq!(invert(&b).data, vec![1, 0, 2]);
    }

    #[test]
    fn test_invert_grows_single_color_palette() {
        let b = Bitmap::new(2, 1, vec![[0, 0, 0]]);
        let out = invert(&b);
        assert_eq!(out.data, vec![1, 1]);
        assert!(out.validate().is_ok());
    }

    #[test]
    fn test_pad_shifts_content() {
        let out = pad(&checker(), 2, 1);
        assert_eq!((out.width, out.height), (5, 2));
        assert_eq!(out.row(0), Some(&[0u8, 0, 0, 1, 0][..]));
        assert_eq!(out.row(1), Some(&[0u8, 0, 1, 0, 0][..]));
    }

    #[test]
    fn test_pad_overflowing_width_is_empty() {
        assert!(pad(&checker(), usize::MAX, 1).is_empty());
        assert!(pad(&checker(), usize::MAX / 2, 0).is_empty());
    }

    #[test]
    fn test_pad_zero_is_copy() {
        let b = asymmetric();
        assert_eq!(pad(&b, 0, 0), b);
    }
}
