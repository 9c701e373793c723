//! # Controller Transport Layer
//!
//! A [`Transport`] opens the duplex byte link to the knitting controller and
//! hands back independent read and write halves. The session owns both
//! halves until disconnect.
//!
//! ## Available Transports
//!
//! - [`serial`]: USB CDC / UART TTY in raw mode (Linux, macOS)
//! - [`simulator`]: in-process controller emulation for dry runs
//! - [`StreamTransport`]: wraps any already-open async stream pair

pub mod serial;
pub mod simulator;

pub use serial::SerialTransport;
pub use simulator::SimulatedMachine;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::KnitError;

/// Read half of an open link.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of an open link.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Opens the byte link to the controller.
#[async_trait]
pub trait Transport: Send {
    /// Open the link and return its read and write halves.
    async fn open(&mut self) -> Result<(BoxedReader, BoxedWriter), KnitError>;
}

/// # Pre-opened stream transport
///
/// Hands out a reader/writer pair supplied by the caller. Can be opened
/// once.
///
/// ```
/// use knitstream::transport::StreamTransport;
///
/// let (host, _device) = tokio::io::duplex(64);
/// let (reader, writer) = tokio::io::split(host);
/// let transport = StreamTransport::new(reader, writer);
/// # drop(transport);
/// ```
pub struct StreamTransport {
    halves: Option<(BoxedReader, BoxedWriter)>,
}

impl StreamTransport {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            halves: Some((Box::new(reader), Box::new(writer))),
        }
    }
}

#[async_trait]
impl Transport for StreamTransport {
    async fn open(&mut self) -> Result<(BoxedReader, BoxedWriter), KnitError> {
        self.halves
            .take()
            .ok_or_else(|| KnitError::Transport("stream already opened".to_string()))
    }
}
