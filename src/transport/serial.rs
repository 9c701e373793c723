//! # Serial TTY Transport
//!
//! Talks to the retrofit controller over its USB CDC (or UART) serial port.
//!
//! ## TTY Configuration
//!
//! The device is opened in raw mode so protocol bytes pass unmodified:
//!
//! - **No input processing**: IGNBRK, BRKINT, PARMRK, ISTRIP, INLCR, IGNCR,
//!   ICRNL, IXON, IXOFF, IXANY cleared
//! - **No output processing**: OPOST cleared
//! - **8N1**: CS8, no parity
//! - **No echo / non-canonical**: ECHO, ECHONL, ICANON, ISIG, IEXTEN cleared
//! - **Single-byte reads**: VMIN = 1, VTIME = 0
//!
//! XON/XOFF must be off: 0x11 and 0x13 can appear inside packed rows.
//!
//! ## Async I/O
//!
//! The descriptor is opened `O_NONBLOCK` and registered with the tokio
//! reactor through [`AsyncFd`], so a pending read holds no blocking-pool
//! thread and is cancelled by dropping it.
//!
//! ## Finding the Port
//!
//! ```bash
//! $ ls /dev/ttyACM* /dev/ttyUSB*
//! /dev/ttyACM0
//! # Linux needs the user in the dialout group
//! $ sudo usermod -aG dialout $USER
//! ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Write},
    pin::Pin,
    task::{Context, Poll, ready},
};
#[cfg(unix)]
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf, unix::AsyncFd};

use super::{BoxedReader, BoxedWriter, Transport};
use crate::error::KnitError;

/// Default serial device path
pub const DEFAULT_DEVICE: &str = "/dev/ttyACM0";

/// Default line speed
pub const DEFAULT_BAUD: u32 = 115_200;

/// # Serial Transport
///
/// ```no_run
/// use knitstream::transport::{SerialTransport, Transport};
///
/// # async fn example() -> Result<(), knitstream::error::KnitError> {
/// let mut transport = SerialTransport::new("/dev/ttyACM0");
/// let (reader, writer) = transport.open().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SerialTransport {
    device: PathBuf,
    baud_rate: u32,
}

impl SerialTransport {
    pub fn new<P: AsRef<Path>>(device: P) -> Self {
        Self {
            device: device.as_ref().to_path_buf(),
            baud_rate: DEFAULT_BAUD,
        }
    }

    /// Override the line speed (default 115200).
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn device(&self) -> &Path {
        &self.device
    }

    /// Open the TTY non-blocking and put it in raw mode.
    ///
    /// ## Errors
    ///
    /// - The device doesn't exist
    /// - Permission denied (may need the dialout group)
    /// - Unsupported baud rate or TTY configuration failure
    #[cfg(unix)]
    pub fn open_raw(&self) -> Result<File, KnitError> {
        use std::os::unix::fs::OpenOptionsExt;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&self.device)
            .map_err(|e| {
                KnitError::Transport(format!("Failed to open {}: {}", self.device.display(), e))
            })?;

        configure_tty_raw(&file, self.baud_rate)?;
        Ok(file)
    }
}

#[cfg(unix)]
#[async_trait]
impl Transport for SerialTransport {
    async fn open(&mut self) -> Result<(BoxedReader, BoxedWriter), KnitError> {
        let port = SerialPort::new(self.open_raw()?).map_err(|e| {
            KnitError::Transport(format!("Failed to register {}: {}", self.device.display(), e))
        })?;

        log::info!(
            "Opened {} at {} baud",
            self.device.display(),
            self.baud_rate
        );

        let (reader, writer) = tokio::io::split(port);
        Ok((Box::new(reader), Box::new(writer)))
    }
}

#[cfg(not(unix))]
#[async_trait]
impl Transport for SerialTransport {
    async fn open(&mut self) -> Result<(BoxedReader, BoxedWriter), KnitError> {
        Err(KnitError::Transport(format!(
            "Serial ports need a Unix host ({})",
            self.device.display()
        )))
    }
}

// ============================================================================
// REACTOR-DRIVEN PORT
// ============================================================================

/// A non-blocking descriptor driven by the tokio reactor.
#[cfg(unix)]
#[derive(Debug)]
pub struct SerialPort {
    fd: AsyncFd<File>,
}

#[cfg(unix)]
impl SerialPort {
    /// Register `file` with the reactor, switching it to non-blocking mode.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(file: File) -> io::Result<Self> {
        set_nonblocking(&file)?;
        Ok(Self {
            fd: AsyncFd::new(file)?,
        })
    }
}

#[cfg(unix)]
impl AsyncRead for SerialPort {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.fd.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| inner.get_ref().read(unfilled)) {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

#[cfg(unix)]
impl AsyncWrite for SerialPort {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.fd.poll_write_ready(cx))?;
            match guard.try_io(|inner| inner.get_ref().write(buf)) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    // Writes go straight to the driver; there is no user-space buffer.
    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(unix)]
fn set_nonblocking(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK == 0 {
        let result = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if result < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(unix)]
fn baud_constant(baud: u32) -> Result<libc::speed_t, KnitError> {
    Ok(match baud {
        9_600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        other => {
            return Err(KnitError::Config(format!("unsupported baud rate {}", other)));
        }
    })
}

#[cfg(unix)]
/// Put the TTY in raw 8N1 mode at `baud`.
fn configure_tty_raw(file: &File, baud: u32) -> Result<(), KnitError> {
    use std::mem::MaybeUninit;
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    let speed = baud_constant(baud)?;

    let mut termios = MaybeUninit::uninit();
    let result = unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) };
    if result != 0 {
        return Err(KnitError::Transport(format!(
            "tcgetattr failed: {}",
            io::Error::last_os_error()
        )));
    }
    let mut termios = unsafe { termios.assume_init() };

    termios.c_iflag &= !(libc::IGNBRK
        | libc::BRKINT
        | libc::PARMRK
        | libc::ISTRIP
        | libc::INLCR
        | libc::IGNCR
        | libc::ICRNL
        | libc::IXON
        | libc::IXOFF
        | libc::IXANY);
    termios.c_oflag &= !libc::OPOST;
    termios.c_lflag &= !(libc::ECHO | libc::ECHONL | libc::ICANON | libc::ISIG | libc::IEXTEN);
    termios.c_cflag &= !(libc::CSIZE | libc::PARENB);
    termios.c_cflag |= libc::CS8 | libc::CREAD | libc::CLOCAL;

    termios.c_cc[libc::VMIN] = 1;
    termios.c_cc[libc::VTIME] = 0;

    let result = unsafe {
        libc::cfsetispeed(&mut termios, speed) | libc::cfsetospeed(&mut termios, speed)
    };
    if result != 0 {
        return Err(KnitError::Transport(format!(
            "cfsetspeed failed: {}",
            io::Error::last_os_error()
        )));
    }

    let result = unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) };
    if result != 0 {
        return Err(KnitError::Transport(format!(
            "tcsetattr failed: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}
