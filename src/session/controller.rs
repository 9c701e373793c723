//! # Knitting Session Controller
//!
//! Owns the three inputs of the pattern engine (base tile, pattern config,
//! knitting state) and decides when a row has to go out to the machine.
//!
//! ## Send Rule
//!
//! After every knitting-state replacement the controller compares against
//! the previous snapshot of `(patterning, current_row_number,
//! carriage_side)` and sends when:
//!
//! - patterning switched from off to on, or
//! - patterning is on and the row number or carriage side changed.
//!
//! [`Controller::complete_row`] applies side toggle, row advance and the
//! total counter as one replacement, so a completed pass yields exactly one
//! outgoing row.
//!
//! Everything here is synchronous; [`ConnectionSession`](super::ConnectionSession)
//! does the I/O.

use serde::Serialize;
use std::sync::Arc;

use crate::bitmap::Bitmap;
use crate::error::KnitError;
use crate::knitting::{CarriageSide, KnittingState};
use crate::pattern::{PatternCache, PatternConfig, select_row};

/// A row the controller decided to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingRow {
    pub row_number: usize,
    pub side: CarriageSide,
    /// Needle selections in carriage travel order
    pub needles: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    patterning: bool,
    current_row_number: usize,
    carriage_side: CarriageSide,
}

impl From<&KnittingState> for Snapshot {
    fn from(state: &KnittingState) -> Self {
        Self {
            patterning: state.patterning,
            current_row_number: state.current_row_number,
            carriage_side: state.carriage_side,
        }
    }
}

/// # Session Controller
#[derive(Debug)]
pub struct Controller {
    base: Bitmap,
    config: PatternConfig,
    state: KnittingState,
    cache: PatternCache,
    previous: Snapshot,
}

impl Default for Controller {
    fn default() -> Self {
        let base = Bitmap::from_rows(&[&[0, 1], &[1, 0]]);
        Self::new(base, PatternConfig::default(), KnittingState::default())
    }
}

impl Controller {
    pub fn new(base: Bitmap, config: PatternConfig, state: KnittingState) -> Self {
        let previous = Snapshot::from(&state);
        Self {
            base,
            config,
            state,
            cache: PatternCache::new(),
            previous,
        }
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn base_pattern(&self) -> &Bitmap {
        &self.base
    }

    pub fn pattern_config(&self) -> &PatternConfig {
        &self.config
    }

    pub fn knitting_state(&self) -> &KnittingState {
        &self.state
    }

    /// The memoized computed pattern for the current inputs.
    pub fn computed_pattern(&mut self) -> Arc<Bitmap> {
        self.cache.get(&self.base, &self.config, &self.state)
    }

    /// Needle selections for the current row and carriage side.
    ///
    /// Empty when the computed pattern is empty. A row number past the end
    /// of the pattern is clamped to the last row.
    pub fn current_row(&mut self) -> Vec<u8> {
        self.selected_row()
            .map(|(_, needles)| needles)
            .unwrap_or_default()
    }

    /// The clamped row index together with its needles.
    fn selected_row(&mut self) -> Option<(usize, Vec<u8>)> {
        let pattern = self.computed_pattern();
        if pattern.is_empty() {
            return None;
        }
        let row_number = self.state.current_row_number.min(pattern.height - 1);
        let needles = select_row(&pattern, row_number, self.state.carriage_side)?;
        Some((row_number, needles))
    }

    // ========================================================================
    // WHOLE-OBJECT REPLACEMENTS
    // ========================================================================

    /// Replace the base tile. Does not trigger a send.
    pub fn set_base_pattern(&mut self, base: Bitmap) -> Result<(), KnitError> {
        base.validate()?;
        self.base = base;
        Ok(())
    }

    /// Replace the pattern configuration. Does not trigger a send.
    pub fn set_pattern_config(&mut self, config: PatternConfig) -> Result<(), KnitError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Replace the knitting state and apply the send rule.
    pub fn set_knitting_state(&mut self, state: KnittingState) -> Option<OutgoingRow> {
        self.state = state;
        self.observe()
    }

    // ========================================================================
    // ACTIONS
    // ========================================================================

    /// Start streaming rows; sends the current row.
    pub fn start_patterning(&mut self) -> Option<OutgoingRow> {
        let state = KnittingState {
            patterning: true,
            ..self.state.clone()
        };
        self.set_knitting_state(state)
    }

    pub fn stop_patterning(&mut self) -> Option<OutgoingRow> {
        let state = KnittingState {
            patterning: false,
            ..self.state.clone()
        };
        self.set_knitting_state(state)
    }

    /// Jump to a row; wraps at the computed pattern height.
    pub fn set_row_number(&mut self, row_number: usize) -> Option<OutgoingRow> {
        let height = self.computed_pattern().height;
        let state = KnittingState {
            current_row_number: if height == 0 { 0 } else { row_number % height },
            ..self.state.clone()
        };
        self.set_knitting_state(state)
    }

    /// Move the point cams.
    pub fn set_point_cams(&mut self, left: i32, right: i32) -> Result<Option<OutgoingRow>, KnitError> {
        if left >= right {
            return Err(KnitError::Config(format!(
                "point cams must satisfy left < right (got {} and {})",
                left, right
            )));
        }
        let state = KnittingState {
            point_cams: [left, right],
            ..self.state.clone()
        };
        Ok(self.set_knitting_state(state))
    }

    /// # Row complete
    ///
    /// Called when the carriage leaves the CAMS range. While patterning:
    /// toggle the carriage side, advance the row (wrapping at the computed
    /// pattern height) and count the pass, all in one state replacement.
    /// Returns the next row to send. No-op when not patterning.
    pub fn complete_row(&mut self) -> Option<OutgoingRow> {
        if !self.state.patterning {
            return None;
        }

        let height = self.computed_pattern().height;
        let mut next_row = self.state.current_row_number.saturating_add(1);
        if next_row >= height {
            next_row = 0;
        }

        let state = KnittingState {
            carriage_side: self.state.carriage_side.toggle(),
            current_row_number: next_row,
            total_rows: self.state.total_rows.saturating_add(1),
            ..self.state.clone()
        };
        self.set_knitting_state(state)
    }

    /// Apply the send rule against the previous snapshot.
    fn observe(&mut self) -> Option<OutgoingRow> {
        let now = Snapshot::from(&self.state);
        let previous = std::mem::replace(&mut self.previous, now);

        let just_started = now.patterning && !previous.patterning;
        let moved = now.patterning
            && (now.current_row_number != previous.current_row_number
                || now.carriage_side != previous.carriage_side);
        if !(just_started || moved) {
            return None;
        }

        let Some((row_number, needles)) = self.selected_row() else {
            log::debug!("Computed pattern is empty, nothing to send");
            return None;
        };
        Some(OutgoingRow {
            row_number,
            side: self.state.carriage_side,
            needles,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
