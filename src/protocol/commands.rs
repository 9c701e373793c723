//! # Knitting Controller Commands
//!
//! Byte constants of the host/controller serial protocol and the builders
//! for host-to-device commands.
//!
//! ## Protocol Overview
//!
//! Every frame starts with a one-byte tag. Host-to-device tags are `0x02`
//! and `0x03`; device-to-host tags are `0x04`..`0x09` (see
//! [`receiver`](super::receiver)).
//!
//! | Direction | Bytes | Meaning |
//! |-----------|-------|---------|
//! | host→device | `02 n packed...` | Set row (n needles, ⌈n/8⌉ packed bytes) |
//! | host→device | `03` | Clear current row |
//! | device→host | `04 len` | Row acknowledged |
//! | device→host | `05` | Carriage entered CAMS range |
//! | device→host | `06 count` | Carriage exited CAMS range (row complete) |
//! | device→host | `07 dir` | Direction changed (0 = right, 1 = left) |
//! | device→host | `08 type len bytes...` | Text (0 = info, 1 = error) |
//! | device→host | `09 idx` | Needle event |
//!
//! ## Bit Packing
//!
//! Needle selections are packed **LSB first**, unlike most raster formats:
//!
//! ```text
//! needle:  0 1 2 3 4 5 6 7 | 8 9 ...
//! byte 0:  b0 b1 ...    b7 | byte 1: b0 b1 ...
//!
//! [1,0,1,1] -> 0b0000_1101 = 0x0D
//! ```

use crate::error::KnitError;

// ============================================================================
// TAG CONSTANTS
// ============================================================================

/// Set row data: `[CMD, needle_count, packed...]`
pub const CMD_SET_ROW: u8 = 0x02;

/// Clear the controller's current row
pub const CMD_CLEAR_ROW: u8 = 0x03;

/// Row received by the controller: `[MSG, length]`
pub const MSG_ACK_ROW: u8 = 0x04;

/// Carriage entered the CAMS range
pub const MSG_ENTER_CAMS: u8 = 0x05;

/// Carriage exited the CAMS range, row complete: `[MSG, needle_count]`
pub const MSG_EXIT_CAMS: u8 = 0x06;

/// Carriage direction changed: `[MSG, direction]`
pub const MSG_CHANGE_DIRECTION: u8 = 0x07;

/// Text message: `[MSG, type, length, bytes...]`
pub const MSG_STRING: u8 = 0x08;

/// Needle passed: `[MSG, needle_index]`
pub const MSG_NEEDLE: u8 = 0x09;

/// Direction byte: carriage moving right
pub const DIR_RIGHT: u8 = 0x00;

/// Direction byte: carriage moving left
pub const DIR_LEFT: u8 = 0x01;

/// String type byte: informational
pub const STRING_INFO: u8 = 0x00;

/// String type byte: error
pub const STRING_ERROR: u8 = 0x01;

/// Physical needle bed limit; longer rows are rejected.
pub const MAX_ROW_NEEDLES: usize = 200;

// ============================================================================
// ROW CODEC
// ============================================================================

/// # Pack a row of needle selections
///
/// Needle `i` lands in byte `i / 8`, bit `i % 8`. Only the value 1 selects
/// a needle. The output is `⌈len / 8⌉` bytes long.
///
/// ## Errors
///
/// [`KnitError::InvalidRow`] when the row is longer than
/// [`MAX_ROW_NEEDLES`]. Nothing is truncated.
///
/// ```
/// use knitstream::protocol::commands::pack_row;
///
/// assert_eq!(pack_row(&[1, 0, 1, 1]).unwrap(), vec![0x0D]);
/// ```
pub fn pack_row(row: &[u8]) -> Result<Vec<u8>, KnitError> {
    if row.len() > MAX_ROW_NEEDLES {
        return Err(KnitError::InvalidRow(format!(
            "row has {} needles, max {}",
            row.len(),
            MAX_ROW_NEEDLES
        )));
    }

    let mut packed = vec![0u8; row.len().div_ceil(8)];
    for (i, _) in row.iter().enumerate().filter(|&(_, &v)| v == 1) {
        packed[i / 8] |= 1 << (i % 8);
    }
    Ok(packed)
}

/// # Unpack needle selections
///
/// Inverse of [`pack_row`]: reads `needle_count` bits LSB first.
///
/// ## Errors
///
/// [`KnitError::Protocol`] when `packed` is too short for `needle_count`.
pub fn unpack_row(needle_count: usize, packed: &[u8]) -> Result<Vec<u8>, KnitError> {
    if packed.len() < needle_count.div_ceil(8) {
        return Err(KnitError::Protocol(format!(
            "{} packed bytes cannot hold {} needles",
            packed.len(),
            needle_count
        )));
    }
    Ok((0..needle_count)
        .map(|i| (packed[i / 8] >> (i % 8)) & 1)
        .collect())
}

/// # Set Row (0x02 n packed...)
///
/// Frames a row for the controller. `n` carries the unpacked length so the
/// last, partially used byte can be decoded unambiguously.
///
/// ## Errors
///
/// [`KnitError::InvalidRow`] for empty rows and rows longer than
/// [`MAX_ROW_NEEDLES`]; checked before any bytes are produced.
///
/// ```
/// use knitstream::protocol::commands::set_row;
///
/// assert_eq!(set_row(&[1, 0, 1, 1]).unwrap(), vec![0x02, 0x04, 0x0D]);
/// ```
pub fn set_row(row: &[u8]) -> Result<Vec<u8>, KnitError> {
    if row.is_empty() {
        return Err(KnitError::InvalidRow("refusing to send an empty row".to_string()));
    }
    let packed = pack_row(row)?;

    let mut cmd = Vec::with_capacity(2 + packed.len());
    cmd.push(CMD_SET_ROW);
    cmd.push(row.len() as u8);
    cmd.extend(packed);
    Ok(cmd)
}

/// # Clear Row (0x03)
#[inline]
pub fn clear_row() -> Vec<u8> {
    vec![CMD_CLEAR_ROW]
}

/// Host-to-device command, as decoded from a byte frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetRow { needle_count: u8, packed: Vec<u8> },
    ClearRow,
}

impl Command {
    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Command::SetRow {
                needle_count,
                packed,
            } => {
                let mut out = vec![CMD_SET_ROW, *needle_count];
                out.extend(packed);
                out
            }
            Command::ClearRow => clear_row(),
        }
    }

    /// Parse one complete command frame, as the controller firmware would.
    pub fn parse(frame: &[u8]) -> Result<Self, KnitError> {
        match frame {
            [CMD_CLEAR_ROW] => Ok(Command::ClearRow),
            [CMD_SET_ROW, n, packed @ ..] if packed.len() == (*n as usize).div_ceil(8) => {
                Ok(Command::SetRow {
                    needle_count: *n,
                    packed: packed.to_vec(),
                })
            }
            _ => Err(KnitError::Protocol(format!("malformed command frame {:02X?}", frame))),
        }
    }

    /// Unpacked needle selections of a `SetRow`; empty for `ClearRow`.
    pub fn needles(&self) -> Result<Vec<u8>, KnitError> {
        match self {
            Command::SetRow {
                needle_count,
                packed,
            } => unpack_row(*needle_count as usize, packed),
            Command::ClearRow => Ok(Vec::new()),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
