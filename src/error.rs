//! # Error Types
//!
//! This module defines error types used throughout the knitstream library.

use thiserror::Error;

/// Main error type for knitstream operations
#[derive(Debug, Error)]
pub enum KnitError {
    /// Transport-level errors (open, read, write)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed or unexpected protocol data
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Row rejected before any I/O (empty, too long)
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    /// A write was attempted without an open connection
    #[error("Not connected to device")]
    NotConnected,

    /// Pattern loading or computation error
    #[error("Pattern error: {0}")]
    Pattern(String),

    /// Invalid configuration value
    #[error("Config error: {0}")]
    Config(String),

    /// Preview image encoding error
    #[error("Image error: {0}")]
    Image(String),

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
