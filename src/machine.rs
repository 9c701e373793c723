//! # Machine Configuration
//!
//! Hardware characteristics of supported knitting machines and the timing
//! constants of the retrofit controller.
//!
//! | Model | Needles | Baud | Settle delay |
//! |-------|---------|------|--------------|
//! | Silver Reed SK840 | 200 | 115200 | 50 ms |
//!
//! ```
//! use knitstream::machine::MachineConfig;
//!
//! let config = MachineConfig::SK840;
//! assert_eq!(config.max_row_needles, 200);
//! ```

use std::time::Duration;

/// # Machine Configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    /// Machine model name
    pub name: &'static str,

    /// Longest row the controller accepts in one `SET_ROW` command
    pub max_row_needles: usize,

    /// Serial line speed
    pub baud_rate: u32,

    /// Pause after a completed row before another row-complete is honored
    pub settle_delay_ms: u64,

    /// Point cam positions used when nothing else is configured
    pub default_point_cams: [i32; 2],
}

impl MachineConfig {
    /// # Silver Reed SK840 with the serial retrofit board
    pub const SK840: Self = Self {
        name: "Silver Reed SK840",
        max_row_needles: 200,
        baud_rate: 115_200,
        settle_delay_ms: 50,
        default_point_cams: [-20, 20],
    };

    #[inline]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self::SK840
    }
}
