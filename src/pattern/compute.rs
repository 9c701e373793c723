//! # Pattern Computation
//!
//! Derives the needle-selection bitmap sent to the machine from the base
//! tile, a [`PatternConfig`] and the point cam positions.
//!
//! ## Pipeline
//!
//! The order is fixed; later steps operate on what earlier steps produced.
//!
//! ```text
//! base tile
//!   └─ double ─ mirror H ─ mirror V          (tile transforms)
//!        └─ tile into (width x height) canvas
//!             └─ force end needles ─ invert ─ pad margins
//!                                                  └─ computed pattern
//! ```
//!
//! `width = right cam - left cam - margin_left - margin_right`. When that is
//! not positive (or the height is zero) the result is [`Bitmap::empty`].
//! A cam span or height above [`MAX_DIMENSION`] also yields an empty pattern.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::transform::{self, Alignment};
use crate::bitmap::{Bitmap, MAX_DIMENSION};
use crate::error::KnitError;
use crate::knitting::KnittingState;

/// # Pattern Configuration
///
/// Replaced as a whole object whenever the user edits it. Field names match
/// the JSON saved by the pattern designer UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub double_cols: bool,
    pub double_rows: bool,
    /// Invert needle polarity after tiling
    pub negative: bool,
    pub mirror_horizontal: bool,
    pub mirror_vertical: bool,
    pub repeat_horizontal: bool,
    pub repeat_vertical: bool,
    pub alignment: Alignment,
    /// Always select the outermost needles (knit contrast yarn on the edges)
    #[serde(rename = "endNeedleSelection")]
    pub end_needle_selection: bool,
    #[serde(rename = "marginLeft")]
    pub margin_left: usize,
    #[serde(rename = "marginRight")]
    pub margin_right: usize,
    /// Pattern height in rows when `height_from_tile` is off
    pub height: usize,
    /// Use the transformed tile height instead of `height`
    #[serde(rename = "heightFromTile")]
    pub height_from_tile: bool,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            double_cols: false,
            double_rows: false,
            negative: false,
            mirror_horizontal: false,
            mirror_vertical: false,
            repeat_horizontal: true,
            repeat_vertical: true,
            alignment: Alignment::Center,
            end_needle_selection: false,
            margin_left: 0,
            margin_right: 0,
            height: 20,
            height_from_tile: true,
        }
    }
}

impl PatternConfig {
    /// Load a configuration from JSON; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, KnitError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject heights and margins no needle bed could use.
    pub fn validate(&self) -> Result<(), KnitError> {
        if self.height > MAX_DIMENSION {
            return Err(KnitError::Config(format!(
                "height {} exceeds {} rows",
                self.height, MAX_DIMENSION
            )));
        }
        if self.margin_left.saturating_add(self.margin_right) > MAX_DIMENSION {
            return Err(KnitError::Config(format!(
                "margins {} + {} exceed {} needles",
                self.margin_left, self.margin_right, MAX_DIMENSION
            )));
        }
        Ok(())
    }
}

/// Apply the tile transforms in their fixed order: double, mirror H, mirror V.
pub fn base_tile(base: &Bitmap, config: &PatternConfig) -> Bitmap {
    let mut tile = if config.double_cols || config.double_rows {
        transform::double(base, config.double_cols, config.double_rows)
    } else {
        base.clone()
    };
    if config.mirror_horizontal {
        tile = transform::mirror_horizontal(&tile);
    }
    if config.mirror_vertical {
        tile = transform::mirror_vertical(&tile);
    }
    tile
}

/// # Compute the needle-selection pattern
///
/// Pure; only `state.point_cams` is read from the knitting state. Returns
/// [`Bitmap::empty`] when the needle span minus margins is not positive.
pub fn compute_pattern(base: &Bitmap, config: &PatternConfig, state: &KnittingState) -> Bitmap {
    // 1. Width between the margins
    let span = match usize::try_from(state.span()) {
        Ok(span) if span <= MAX_DIMENSION => span,
        Ok(span) => {
            log::warn!("Cam span of {} needles is too wide to compute", span);
            return Bitmap::empty();
        }
        Err(_) => return Bitmap::empty(),
    };
    let margins = config.margin_left.saturating_add(config.margin_right);
    let width = match span.checked_sub(margins) {
        Some(width) if width > 0 => width,
        _ => return Bitmap::empty(),
    };

    // 2. Transformed tile
    let tile = base_tile(base, config);

    // 3. Effective height
    let height = if config.height_from_tile {
        tile.height
    } else {
        config.height
    };
    if height == 0 {
        return Bitmap::empty();
    }
    if height > MAX_DIMENSION {
        log::warn!("Pattern height {} exceeds {} rows", height, MAX_DIMENSION);
        return Bitmap::empty();
    }

    // 4. Tile into the canvas
    let mut pattern = Bitmap::new(width, height, tile.palette.clone());
    transform::tile(
        &mut pattern,
        &tile,
        config.repeat_horizontal,
        config.repeat_vertical,
        config.alignment,
    );

    // 5. End needles
    if config.end_needle_selection {
        pattern.ensure_palette_len(2);
        for y in 0..height {
            pattern.set(0, y, 1);
            pattern.set(width - 1, y, 1);
        }
    }

    // 6. Polarity
    if config.negative {
        pattern = transform::invert(&pattern);
    }

    // 7. Margins restore the full cam span
    if config.margin_left > 0 || config.margin_right > 0 {
        pattern = transform::pad(&pattern, config.margin_left, config.margin_right);
    }

    pattern
}

/// # Memoized pattern computation
///
/// Holds the inputs of the last computation and returns the cached result
/// while they compare equal. Cheap enough to query on every state change.
#[derive(Debug, Default)]
pub struct PatternCache {
    last: Option<CacheEntry>,
}

#[derive(Debug)]
struct CacheEntry {
    base: Bitmap,
    config: PatternConfig,
    point_cams: [i32; 2],
    pattern: Arc<Bitmap>,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the computed pattern, recomputing only when an input changed.
    pub fn get(
        &mut self,
        base: &Bitmap,
        config: &PatternConfig,
        state: &KnittingState,
    ) -> Arc<Bitmap> {
        if let Some(entry) = &self.last {
            if entry.point_cams == state.point_cams && entry.config == *config && entry.base == *base
            {
                return entry.pattern.clone();
            }
        }

        let pattern = Arc::new(compute_pattern(base, config, state));
        self.last = Some(CacheEntry {
            base: base.clone(),
            config: config.clone(),
            point_cams: state.point_cams,
            pattern: pattern.clone(),
        });
        pattern
    }

    /// Drop the cached result.
    pub fn clear(&mut self) {
        self.last = None;
    }
}

// ============================================================================
// TESTS
// ============================================================================
