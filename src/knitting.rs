//! # Knitting State
//!
//! The live machine-side state: where the point cams sit on the needle bed,
//! which end the carriage rests at, and how far through the pattern we are.

use serde::{Deserialize, Serialize};

use crate::machine::MachineConfig;

/// End of the needle bed the carriage currently rests at.
///
/// The carriage's next pass travels away from this side, so `Left` means
/// the next pass moves left to right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CarriageSide {
    #[default]
    Left,
    Right,
}

impl CarriageSide {
    /// The opposite side, where the carriage ends up after one pass.
    #[inline]
    pub fn toggle(self) -> Self {
        match self {
            CarriageSide::Left => CarriageSide::Right,
            CarriageSide::Right => CarriageSide::Left,
        }
    }
}

impl std::fmt::Display for CarriageSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CarriageSide::Left => write!(f, "left"),
            CarriageSide::Right => write!(f, "right"),
        }
    }
}

/// # Knitting State
///
/// `current_row_number` indexes the computed pattern bottom-up and wraps to
/// 0 at the pattern height. `total_rows` counts every completed pass since
/// the session began and never wraps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KnittingState {
    /// `[left, right]` needle positions of the point cams; `left < right`.
    pub point_cams: [i32; 2],
    pub carriage_side: CarriageSide,
    /// Interactive patterning active (rows are being streamed)
    pub patterning: bool,
    pub current_row_number: usize,
    pub total_rows: usize,
}

impl KnittingState {
    /// Number of needles between the point cams.
    #[inline]
    pub fn span(&self) -> i64 {
        i64::from(self.point_cams[1]) - i64::from(self.point_cams[0])
    }
}

impl Default for KnittingState {
    fn default() -> Self {
        Self {
            point_cams: MachineConfig::default().default_point_cams,
            carriage_side: CarriageSide::Left,
            patterning: false,
            current_row_number: 0,
            total_rows: 0,
        }
    }
}
