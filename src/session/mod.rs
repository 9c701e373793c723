//! # Knitting Session
//!
//! - [`controller`]: synchronous pattern and knitting state, send rule
//! - [`connection`]: the live link to the machine built on top of it

pub mod connection;
pub mod controller;

pub use connection::{ConnectionSession, Lifecycle, RowCompleteGate, SessionEvent};
pub use controller::{Controller, OutgoingRow};
