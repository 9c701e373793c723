//! # Knitting Controller Protocol
//!
//! Byte-level protocol spoken between the host and the retrofit controller
//! at 115200 baud.
//!
//! - [`commands`]: tag constants and the row codec (host → device)
//! - [`receiver`]: framing state machine for device → host messages
//!
//! ```
//! use knitstream::protocol::{commands, receiver::{Message, Receiver}};
//!
//! let frame = commands::set_row(&[1, 0, 1, 1]).unwrap();
//! assert_eq!(frame, vec![0x02, 0x04, 0x0D]);
//!
//! let mut rx = Receiver::new();
//! assert_eq!(rx.feed_all(&[0x04, 0x04]), vec![Message::RowAck { length: 4 }]);
//! ```

pub mod commands;
pub mod receiver;

pub use commands::Command;
pub use receiver::{Direction, LogKind, Message, Receiver};
