//! # Device Message Receiver
//!
//! Byte-at-a-time state machine that turns the controller's output stream
//! into [`Message`]s.
//!
//! ## States
//!
//! ```text
//!            0x04            0x07            0x09            0x06
//!   IDLE ──────────► ACK_LEN  ─────► DIRECTION ────► NEEDLE ────► EXIT_COUNT
//!    ▲  │ 0x05 (emit)   │ 1 byte        │ 1 byte        │ 1 byte      │ 1 byte
//!    │  └──────┐        ▼               ▼               ▼             ▼
//!    │         └───── emit and return to IDLE ◄────────────────────────┘
//!    │
//!    │ 0x08
//!    └──► STRING_TYPE ─► STRING_LENGTH ─► STRING_DATA (N bytes) ─► emit
//! ```
//!
//! Unknown tags in `IDLE` are logged and dropped. Every payload state
//! consumes a bounded number of bytes, so the machine always drifts back to
//! `IDLE` and resynchronizes on well-formed input without a marker byte.

use super::commands::{
    CMD_CLEAR_ROW, CMD_SET_ROW, DIR_LEFT, MSG_ACK_ROW, MSG_CHANGE_DIRECTION, MSG_ENTER_CAMS,
    MSG_EXIT_CAMS, MSG_NEEDLE, MSG_STRING, STRING_ERROR,
};

/// Carriage travel direction reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Right,
    Left,
}

impl Direction {
    /// `0x01` is left; every other value reads as right.
    #[inline]
    pub fn from_byte(byte: u8) -> Self {
        if byte == DIR_LEFT {
            Direction::Left
        } else {
            Direction::Right
        }
    }
}

/// Severity of a device text message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Info,
    Error,
}

impl LogKind {
    #[inline]
    pub fn from_byte(byte: u8) -> Self {
        if byte == STRING_ERROR {
            LogKind::Error
        } else {
            LogKind::Info
        }
    }
}

/// A framed message from the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    RowAck { length: u8 },
    EnterCamsRange,
    /// Row complete; `needle_count` is the last needle index touched
    ExitCamsRange { needle_count: u8 },
    DirectionChanged { direction: Direction },
    LogString { kind: LogKind, text: String },
    NeedleEvent { index: u8 },
}

/// Receiver state; `Idle` expects a tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiveState {
    #[default]
    Idle,
    WaitingAckLength,
    WaitingDirection,
    WaitingStringType,
    WaitingStringLength,
    WaitingStringData,
    WaitingNeedleIndex,
    WaitingExitCamsCount,
}

/// # Message Receiver
///
/// ```
/// use knitstream::protocol::receiver::{Message, Receiver};
///
/// let mut rx = Receiver::new();
/// assert_eq!(rx.feed(0x06), None);
/// assert_eq!(rx.feed(0x2A), Some(Message::ExitCamsRange { needle_count: 42 }));
/// ```
#[derive(Debug, Default)]
pub struct Receiver {
    state: ReceiveState,
    string_kind: u8,
    expected_length: usize,
    buffer: String,
}

impl Receiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> ReceiveState {
        self.state
    }

    /// Return every variable to its initial value.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Consume one byte; returns a message when this byte completes one.
    pub fn feed(&mut self, byte: u8) -> Option<Message> {
        match self.state {
            ReceiveState::Idle => self.handle_tag(byte),
            ReceiveState::WaitingAckLength => {
                self.state = ReceiveState::Idle;
                Some(Message::RowAck { length: byte })
            }
            ReceiveState::WaitingDirection => {
                self.state = ReceiveState::Idle;
                Some(Message::DirectionChanged {
                    direction: Direction::from_byte(byte),
                })
            }
            ReceiveState::WaitingNeedleIndex => {
                self.state = ReceiveState::Idle;
                Some(Message::NeedleEvent { index: byte })
            }
            ReceiveState::WaitingExitCamsCount => {
                self.state = ReceiveState::Idle;
                Some(Message::ExitCamsRange { needle_count: byte })
            }
            ReceiveState::WaitingStringType => {
                self.string_kind = byte;
                self.state = ReceiveState::WaitingStringLength;
                None
            }
            ReceiveState::WaitingStringLength => {
                self.expected_length = byte as usize;
                self.buffer.clear();
                if self.expected_length == 0 {
                    return Some(self.finish_string());
                }
                self.state = ReceiveState::WaitingStringData;
                None
            }
            ReceiveState::WaitingStringData => {
                // One character per byte (Latin-1)
                self.buffer.push(char::from(byte));
                if self.buffer.chars().count() >= self.expected_length {
                    Some(self.finish_string())
                } else {
                    None
                }
            }
        }
    }

    /// Feed a chunk; returns every message it completes, in order.
    pub fn feed_all(&mut self, bytes: &[u8]) -> Vec<Message> {
        bytes.iter().filter_map(|&b| self.feed(b)).collect()
    }

    fn handle_tag(&mut self, byte: u8) -> Option<Message> {
        match byte {
            MSG_ACK_ROW => self.state = ReceiveState::WaitingAckLength,
            MSG_ENTER_CAMS => return Some(Message::EnterCamsRange),
            MSG_EXIT_CAMS => self.state = ReceiveState::WaitingExitCamsCount,
            MSG_CHANGE_DIRECTION => self.state = ReceiveState::WaitingDirection,
            MSG_STRING => self.state = ReceiveState::WaitingStringType,
            MSG_NEEDLE => self.state = ReceiveState::WaitingNeedleIndex,
            CMD_SET_ROW | CMD_CLEAR_ROW => {
                log::warn!("Received command 0x{:02x} from device (unexpected)", byte);
            }
            _ => {
                log::warn!("Unexpected byte: 0x{:02x}", byte);
            }
        }
        None
    }

    fn finish_string(&mut self) -> Message {
        self.state = ReceiveState::Idle;
        Message::LogString {
            kind: LogKind::from_byte(self.string_kind),
            text: std::mem::take(&mut self.buffer),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
