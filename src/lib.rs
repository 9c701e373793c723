//! # knitstream - Knitting Machine Pattern Streamer
//!
//! knitstream drives a microcontroller-retrofitted knitting machine one row
//! at a time. It provides:
//!
//! - **Pattern engine**: tiling, mirroring, doubling and inversion of a small
//!   base tile across the needle span between the point cams
//! - **Protocol**: the row codec and the receive state machine for the
//!   controller's byte protocol
//! - **Session**: knitting state, the row send rule and the live connection
//! - **Transport**: raw serial TTY, plus an in-process simulated machine
//!
//! ## Quick Start
//!
//! ```no_run
//! use knitstream::{
//!     bitmap::Bitmap,
//!     knitting::KnittingState,
//!     pattern::PatternConfig,
//!     session::{ConnectionSession, Controller},
//!     transport::SerialTransport,
//!     MachineConfig,
//! };
//!
//! # async fn example() -> Result<(), knitstream::KnitError> {
//! let tile = Bitmap::from_ascii(".#\n#.")?;
//! let controller = Controller::new(tile, PatternConfig::default(), KnittingState::default());
//! let session = ConnectionSession::new(controller, MachineConfig::SK840);
//!
//! session.connect(&mut SerialTransport::new("/dev/ttyACM0")).await?;
//! session.start_patterning().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`bitmap`] | Palette-indexed bitmaps, ASCII/JSON/PNG I/O |
//! | [`pattern`] | Transforms, pattern computation, row selection |
//! | [`protocol`] | Row codec and receive state machine |
//! | [`knitting`] | Carriage side and knitting state |
//! | [`session`] | Controller and connection session |
//! | [`transport`] | Communication backends |
//! | [`machine`] | Machine configurations |
//! | [`server`] | HTTP control surface |
//! | [`error`] | Error types |
//!
//! ## Supported Machines
//!
//! Currently tested with:
//! - Silver Reed SK840 with the serial retrofit board (200 needles, 115200 baud)

pub mod bitmap;
pub mod error;
pub mod knitting;
pub mod machine;
pub mod pattern;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use bitmap::Bitmap;
pub use error::KnitError;
pub use machine::MachineConfig;
pub use session::ConnectionSession;
pub use transport::SerialTransport;
