//! # Pattern Engine
//!
//! Turns a small user-designed tile into the needle selections for every row
//! of the active needle span.
//!
//! - [`transform`]: pure bitmap transforms (tile, double, mirror, invert, pad)
//! - [`compute`]: the configurable pipeline and its memo cache
//! - [`row`]: per-pass row extraction with direction reversal
//!
//! ```
//! use knitstream::bitmap::Bitmap;
//! use knitstream::knitting::{CarriageSide, KnittingState};
//! use knitstream::pattern::{compute_pattern, select_row, Alignment, PatternConfig};
//!
//! let tile = Bitmap::from_rows(&[&[0, 1], &[1, 0]]);
//! let config = PatternConfig { alignment: Alignment::Left, ..Default::default() };
//! let state = KnittingState { point_cams: [0, 6], ..Default::default() };
//!
//! let pattern = compute_pattern(&tile, &config, &state);
//! let row = select_row(&pattern, 0, CarriageSide::Right).unwrap();
//! assert_eq!(row, vec![0, 1, 0, 1, 0, 1]);
//! ```

pub mod compute;
pub mod row;
pub mod transform;

pub use compute::{PatternCache, PatternConfig, base_tile, compute_pattern};
pub use row::select_row;
pub use transform::Alignment;
