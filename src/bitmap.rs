//! # Palette-Indexed Bitmaps
//!
//! A [`Bitmap`] is a `width x height` grid of palette indices plus a color
//! table. It is the single data type flowing through the pattern pipeline:
//! the user's base tile, every intermediate transform result, and the final
//! computed needle-selection pattern.
//!
//! ## Coordinate System
//!
//! ```text
//!   Y (row number, knitting order)
//!   ▲
//!   │   row 2   ░█░█░█
//!   │   row 1   █░█░█░
//!   │   row 0   ░█░█░█   ← first row knitted
//!   │
//! (0,0) ──────────────────────► X (needle)
//! ```
//!
//! Cell `(x, y)` lives at `data[x + y * width]`. Row 0 is the **bottom**
//! row because patterns are authored in the order the machine knits them.
//!
//! ## Needle Domain
//!
//! Computed patterns only contain indices 0 and 1: 1 selects the needle,
//! 0 leaves it down.

use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;

use crate::error::KnitError;

/// RGB color triple.
pub type Rgb = [u8; 3];

/// Default two-color palette for needle selections (0 = black, 1 = white).
pub const NEEDLE_PALETTE: [Rgb; 2] = [[0, 0, 0], [255, 255, 255]];

/// Characters treated as a selected cell when parsing ASCII tiles.
const ASCII_SET: &[char] = &['#', '@', 'X', 'x', '1'];

/// Largest width or height accepted from a tile file or JSON.
pub const MAX_DIMENSION: usize = 4096;

/// Largest number of cells [`Bitmap::new`] will allocate.
pub const MAX_CELLS: usize = 1 << 26;

/// # Palette-Indexed Bitmap
///
/// Invariant: `data.len() == width * height` and every value of `data` is a
/// valid index into `palette`. Use [`Bitmap::validate`] on untrusted input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bitmap {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
    pub palette: Vec<Rgb>,
}

impl Bitmap {
    /// Create a bitmap filled with index 0.
    ///
    /// Sizes above [`MAX_CELLS`] (or that overflow) yield a 0x0 bitmap with
    /// the given palette.
    pub fn new(width: usize, height: usize, palette: Vec<Rgb>) -> Self {
        match width.checked_mul(height) {
            Some(cells) if cells <= MAX_CELLS => Self {
                width,
                height,
                data: vec![0; cells],
                palette,
            },
            _ => {
                log::warn!("Refusing to allocate a {}x{} bitmap", width, height);
                Self {
                    width: 0,
                    height: 0,
                    data: Vec::new(),
                    palette,
                }
            }
        }
    }

    /// Create a bitmap from bottom-up rows of indices with the needle palette.
    ///
    /// Rows shorter than the longest row are padded with 0.
    pub fn from_rows(rows: &[&[u8]]) -> Self {
        let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
        let mut bitmap = Self::new(width, rows.len(), NEEDLE_PALETTE.to_vec());
        for (y, row) in rows.iter().enumerate() {
            for (x, &v) in row.iter().enumerate() {
                bitmap.set(x, y, v);
            }
        }
        bitmap
    }

    /// The degenerate zero-sized bitmap.
    pub fn empty() -> Self {
        Self::new(0, 0, NEEDLE_PALETTE.to_vec())
    }

    /// True when the bitmap has no cells.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Palette index at `(x, y)`, or `None` when out of bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get(x + y * self.width).copied()
    }

    /// Set the palette index at `(x, y)`. Out-of-bounds writes are ignored.
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: u8) {
        if x < self.width && y < self.height {
            self.data[x + y * self.width] = value;
        }
    }

    /// Borrow row `y` (row 0 = bottom).
    pub fn row(&self, y: usize) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let start = y * self.width;
        self.data.get(start..start + self.width)
    }

    /// Grow the palette to at least `len` entries using the needle palette
    /// (then white) for the new slots.
    pub fn ensure_palette_len(&mut self, len: usize) {
        while self.palette.len() < len {
            let next = NEEDLE_PALETTE
                .get(self.palette.len())
                .copied()
                .unwrap_or([255, 255, 255]);
            self.palette.push(next);
        }
    }

    /// Check the structural invariants.
    pub fn validate(&self) -> Result<(), KnitError> {
        if self.width > MAX_DIMENSION || self.height > MAX_DIMENSION {
            return Err(KnitError::Pattern(format!(
                "{}x{} exceeds the {} cell limit per side",
                self.width, self.height, MAX_DIMENSION
            )));
        }
        if Some(self.data.len()) != self.width.checked_mul(self.height) {
            return Err(KnitError::Pattern(format!(
                "data length {} does not match {}x{}",
                self.data.len(),
                self.width,
                self.height
            )));
        }
        if let Some(bad) = self
            .data
            .iter()
            .find(|&&v| v as usize >= self.palette.len())
        {
            return Err(KnitError::Pattern(format!(
                "palette index {} out of range (palette has {} colors)",
                bad,
                self.palette.len()
            )));
        }
        Ok(())
    }

    // ========================================================================
    // LOADING
    // ========================================================================

    /// Parse an ASCII-art tile.
    ///
    /// `#`, `@`, `X`, `x` and `1` select a needle; anything else is 0.
    /// The **first line is the top row**, as it reads on screen.
    pub fn from_ascii(text: &str) -> Result<Self, KnitError> {
        let lines: Vec<&str> = text
            .lines()
            .map(|l| l.trim_end())
            .filter(|l| !l.is_empty())
            .collect();
        if lines.is_empty() {
            return Err(KnitError::Pattern("ASCII tile is empty".to_string()));
        }

        let rows: Vec<Vec<u8>> = lines
            .iter()
            .rev()
            .map(|line| {
                line.chars()
                    .map(|c| u8::from(ASCII_SET.contains(&c)))
                    .collect()
            })
            .collect();
        let refs: Vec<&[u8]> = rows.iter().map(Vec::as_slice).collect();
        Ok(Self::from_rows(&refs))
    }

    /// Parse a JSON bitmap and validate it.
    pub fn from_json(text: &str) -> Result<Self, KnitError> {
        let bitmap: Self = serde_json::from_str(text)?;
        bitmap.validate()?;
        Ok(bitmap)
    }

    /// Load a tile file; `.json` is parsed as JSON, anything else as ASCII.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, KnitError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&text),
            _ => Self::from_ascii(&text),
        }
    }

    // ========================================================================
    // PREVIEW OUTPUT
    // ========================================================================

    /// Render as ASCII art, top row first. Non-zero cells print as `#`.
    pub fn to_ascii(&self) -> String {
        let mut out = String::with_capacity((self.width + 1) * self.height);
        for y in (0..self.height).rev() {
            if let Some(row) = self.row(y) {
                out.extend(row.iter().map(|&v| if v == 0 { '.' } else { '#' }));
            }
            out.push('\n');
        }
        out
    }

    /// Encode as a PNG with one pixel per cell, scaled by `scale`.
    ///
    /// Row 0 is drawn at the bottom of the image.
    pub fn to_png(&self, scale: u32) -> Result<Vec<u8>, KnitError> {
        use image::{Rgb as Pixel, RgbImage};

        if self.is_empty() {
            return Err(KnitError::Image("cannot encode an empty bitmap".to_string()));
        }
        let scale = scale.max(1);
        let scaled = |len: usize| {
            u32::try_from(len)
                .ok()
                .and_then(|l| l.checked_mul(scale))
                .ok_or_else(|| {
                    KnitError::Image(format!(
                        "{}x{} at scale {} is too large",
                        self.width, self.height, scale
                    ))
                })
        };
        let mut img = RgbImage::new(scaled(self.width)?, scaled(self.height)?);

        for (px, py, pixel) in img.enumerate_pixels_mut() {
            let x = (px / scale) as usize;
            let y = self.height - 1 - (py / scale) as usize;
            let color = self
                .get(x, y)
                .and_then(|i| self.palette.get(i as usize))
                .copied()
                .unwrap_or([255, 0, 255]);
            *pixel = Pixel(color);
        }

        let mut png_bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut png_bytes), image::ImageFormat::Png)
            .map_err(|e| KnitError::Image(format!("PNG encoding failed: {}", e)))?;
        Ok(png_bytes)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_zero_filled() {
        let b = Bitmap::new(3, 2, NEEDLE_PALETTE.to_vec());
        assert_eq!(b.data, vec![0; 6]);
        assert!(!b.is_empty());
    }

    #[test]
    fn test_addressing_is_row_major_bottom_up() {
        let b = Bitmap::from_rows(&[&[0, 1], &[1, 0]]);
        assert_eq!(b.data, vec![0, 1, 1, 0]);
        assert_eq!(b.get(1, 0), Some(1));
        assert_eq!(b.get(0, 1), Some(1));
        assert_eq!(b.get(2, 0), None);
        assert_eq!(b.row(1), Some(&[1u8, 0][..]));
        assert_eq!(b.row(2), None);
    }

    #[test]
    fn test_set_out_of_bounds_is_ignored() {
        let mut b = Bitmap::new(2, 2, NEEDLE_PALETTE.to_vec());
        b.set(5, 5, 1);
        assert_eq!(b.data, vec![0; 4]);
    }

    #[test]
    fn test_ascii_top_line_is_top_row() {
        let b = Bitmap::from_ascii("#..\n.##\n").unwrap();
        assert_eq!(b.width, 3);
        assert_eq!(b.height, 2);
        assert_eq!(b.row(0), Some(&[0u8, 1, 1][..]));
        assert_eq!(b.row(1), Some(&[1u8, 0, 0][..]));
        assert_eq!(b.to_ascii(), "#..\n.##\n");
    }

    #[test]
    fn test_ascii_ragged_lines_are_padded() {
        let b = Bitmap::from_ascii("X\nxx@").unwrap();
        assert_eq!(b.width, 3);
        assert_eq!(b.row(1), Some(&[1u8, 0, 0][..]));
    }

    #[test]
    fn test_ascii_empty_is_error() {
        assert!(Bitmap::from_ascii("\n\n").is_err());
    }

    #[test]
    fn test_json_validation() {
        let ok = r#"{"width":2,"height":1,"data":[0,1],"palette":[[0,0,0],[255,255,255]]}"#;
        assert!(Bitmap::from_json(ok).is_ok());

        let bad_len = r#"{"width":2,"height":2,"data":[0,1],"palette":[[0,0,0]]}"#;
        assert!(Bitmap::from_json(bad_len).is_err());

        let bad_index = r#"{"width":2,"height":1,"data":[0,3],"palette":[[0,0,0],[1,1,1]]}"#;
        assert!(Bitmap::from_json(bad_index).is_err());
    }

    #[test]
    fn test_ensure_palette_len() {
        let mut b = Bitmap::new(1, 1, vec![[10, 20, 30]]);
        b.ensure_palette_len(2);
        assert_eq!(b.palette, vec![[10, 20, 30], [255, 255, 255]]);
        b.ensure_palette_len(1);
        assert_eq!(b.palette.len(), 2);
    }

    #[test]
    fn test_png_signature() {
        let b = Bitmap::from_rows(&[&[0, 1, 0]]);
        let png = b.to_png(2).unwrap();
        assert_eq!(&png[..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
    }

    #[test]
    fn test_new_rejects_oversized() {
        let b = Bitmap::new(usize::MAX, 2, NEEDLE_PALETTE.to_vec());
        assert!(b.is_empty());
        assert!(b.data.is_empty());

        let b = Bitmap::new(MAX_CELLS + 1, 1, NEEDLE_PALETTE.to_vec());
        assert!(b.is_empty());
    }

    #[test]
    fn test_json_oversized_dimensions_rejected() {
        let overflow = r#"{"width":18446744073709551615,"height":2,"data":[],"palette":[[0,0,0]]}"#;
        assert!(matches!(Bitmap::from_json(overflow), Err(KnitError::Pattern(_))));

        let wide = format!(
            r#"{{"width":{},"height":0,"data":[],"palette":[[0,0,0]]}}"#,
            MAX_DIMENSION + 1
        );
        assert!(matches!(Bitmap::from_json(&wide), Err(KnitError::Pattern(_))));
    }

    #[test]
    fn test_png_empty_is_error() {
        assert!(Bitmap::empty().to_png(1).is_err());
    }
}
