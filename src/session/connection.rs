//! # Connection Session
//!
//! Owns one link to the knitting controller and everything that has to stay
//! consistent across it: the read loop, the writer, the row-complete gate
//! and the [`Controller`].
//!
//! ## Lifecycle
//!
//! ```text
//! Closed ──connect()──▶ Open ──disconnect()──▶ Closing ──▶ Closed
//!                        │
//!                        └── read EOF / I/O error ──────────▶ Closed
//! ```
//!
//! ## Concurrency
//!
//! | Resource | Guard |
//! |----------|-------|
//! | Writer | `tokio::sync::Mutex`; one frame on the wire at a time |
//! | Controller | `tokio::sync::Mutex`; single owner of all state, held until the row it produced is written |
//! | Row complete | [`RowCompleteGate`]; held for the settle delay |
//! | Read loop | `reading` flag plus task abort on disconnect |
//!
//! The receive state machine lives inside the read task, so every connect
//! starts from `Idle` with empty buffers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

use super::controller::{Controller, OutgoingRow};
use crate::bitmap::Bitmap;
use crate::error::KnitError;
use crate::knitting::KnittingState;
use crate::machine::MachineConfig;
use crate::pattern::PatternConfig;
use crate::protocol::commands;
use crate::protocol::receiver::{LogKind, Message, Receiver};
use crate::transport::{BoxedReader, BoxedWriter, Transport};

/// Capacity of the event channel; slow subscribers lag rather than block.
const EVENT_CAPACITY: usize = 64;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    Closed = 0,
    Open = 1,
    Closing = 2,
}

impl Lifecycle {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Lifecycle::Open,
            2 => Lifecycle::Closing,
            _ => Lifecycle::Closed,
        }
    }
}

/// Something subscribers may want to show the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A framed message arrived from the device
    Message(Message),
    /// A row was written to the device
    RowSent(OutgoingRow),
    /// The link closed (disconnect, EOF, or I/O error)
    Disconnected,
}

// ============================================================================
// ROW-COMPLETE GATE
// ============================================================================

/// Admits one row-complete at a time.
///
/// The guard returned by [`try_begin`](Self::try_begin) releases the gate on
/// drop, so every exit path reopens it.
///
/// State word: `generation << 1 | busy`. [`reset`](Self::reset) starts a new
/// generation, so a guard left over from a previous connection cannot reopen
/// the gate for the current one.
#[derive(Debug, Default)]
pub struct RowCompleteGate {
    state: Arc<AtomicU64>,
}

/// Held while a row-complete is being processed.
#[derive(Debug)]
pub struct RowCompleteGuard {
    state: Arc<AtomicU64>,
    generation: u64,
}

const GATE_BUSY: u64 = 1;

impl RowCompleteGate {
    /// Take the gate, or `None` if a row-complete is already in flight.
    pub fn try_begin(&self) -> Option<RowCompleteGuard> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current & GATE_BUSY != 0 {
                return None;
            }
            match self.state.compare_exchange(
                current,
                current | GATE_BUSY,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(RowCompleteGuard {
                        state: Arc::clone(&self.state),
                        generation: current >> 1,
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.state.load(Ordering::Acquire) & GATE_BUSY != 0
    }

    /// Reopen the gate and orphan any outstanding guard.
    pub fn reset(&self) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(((v >> 1).wrapping_add(1)) << 1)
            });
    }
}

impl Drop for RowCompleteGuard {
    fn drop(&mut self) {
        let held = self.generation << 1 | GATE_BUSY;
        let _ = self.state.compare_exchange(
            held,
            self.generation << 1,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

// ============================================================================
// SESSION
// ============================================================================

struct Inner {
    controller: Mutex<Controller>,
    machine: MachineConfig,
    events: broadcast::Sender<SessionEvent>,
    writer: Mutex<Option<BoxedWriter>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
    reading: AtomicBool,
    lifecycle: AtomicU8,
    row_gate: RowCompleteGate,
}

/// # Connection Session
///
/// Cheap to clone; clones share the same connection.
///
/// ```no_run
/// use knitstream::session::ConnectionSession;
/// use knitstream::transport::SerialTransport;
///
/// # async fn example() -> Result<(), knitstream::error::KnitError> {
/// let session = ConnectionSession::default();
/// session.connect(&mut SerialTransport::new("/dev/ttyACM0")).await?;
/// session.start_patterning().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionSession {
    inner: Arc<Inner>,
}

impl Default for ConnectionSession {
    fn default() -> Self {
        Self::new(Controller::default(), MachineConfig::default())
    }
}

impl std::fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("machine", &self.inner.machine.name)
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

impl ConnectionSession {
    pub fn new(controller: Controller, machine: MachineConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                controller: Mutex::new(controller),
                machine,
                events,
                writer: Mutex::new(None),
                read_task: Mutex::new(None),
                reading: AtomicBool::new(false),
                lifecycle: AtomicU8::new(Lifecycle::Closed as u8),
                row_gate: RowCompleteGate::default(),
            }),
        }
    }

    pub fn machine(&self) -> &MachineConfig {
        &self.inner.machine
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.inner.lifecycle.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.lifecycle() == Lifecycle::Open
    }

    /// Run `f` with exclusive access to the controller.
    pub async fn with_controller<R>(&self, f: impl FnOnce(&mut Controller) -> R) -> R {
        let mut controller = self.inner.controller.lock().await;
        f(&mut controller)
    }

    // ========================================================================
    // CONNECT / DISCONNECT
    // ========================================================================

    /// Open `transport` and start the read loop.
    ///
    /// Fails if a connection is already open or closing.
    pub async fn connect<T>(&self, transport: &mut T) -> Result<(), KnitError>
    where
        T: Transport + ?Sized,
    {
        if self.lifecycle() != Lifecycle::Closed {
            return Err(KnitError::Transport("already connected".to_string()));
        }

        // A read task cancelled by a failed write may still be winding down.
        let stale = self.inner.read_task.lock().await.take();
        if let Some(stale) = stale {
            stale.abort();
            let _ = stale.await;
        }

        self.inner
            .lifecycle
            .compare_exchange(
                Lifecycle::Closed as u8,
                Lifecycle::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| KnitError::Transport("already connected".to_string()))?;

        let (reader, writer) = match transport.open().await {
            Ok(halves) => halves,
            Err(e) => {
                self.inner
                    .lifecycle
                    .store(Lifecycle::Closed as u8, Ordering::Release);
                log::error!("Failed to connect: {}", e);
                return Err(e);
            }
        };

        *self.inner.writer.lock().await = Some(writer);
        self.inner.row_gate.reset();
        self.inner.reading.store(true, Ordering::Release);

        let session = self.clone();
        let handle = tokio::spawn(async move { session.read_loop(reader).await });
        *self.inner.read_task.lock().await = Some(handle);

        log::info!("Connected to {}", self.inner.machine.name);
        Ok(())
    }

    /// Close the connection.
    ///
    /// Stops the read loop, waits for an in-flight write, shuts the writer
    /// down and resets connection state. No-op when already closed.
    pub async fn disconnect(&self) {
        if self.lifecycle() == Lifecycle::Closed {
            return;
        }
        log::info!("Disconnecting");
        self.inner.reading.store(false, Ordering::Release);
        self.inner
            .lifecycle
            .store(Lifecycle::Closing as u8, Ordering::Release);

        // Taking the lock waits out any write in progress.
        let writer = self.inner.writer.lock().await.take();

        let read_task = self.inner.read_task.lock().await.take();
        if let Some(handle) = read_task {
            handle.abort();
            let _ = handle.await;
        }

        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                log::warn!("Error closing writer: {}", e);
            }
        }

        self.mark_closed();
    }

    /// Reset flags and notify subscribers; only the first call per
    /// connection broadcasts.
    fn mark_closed(&self) {
        self.inner.reading.store(false, Ordering::Release);
        self.inner.row_gate.reset();
        let previous = self
            .inner
            .lifecycle
            .swap(Lifecycle::Closed as u8, Ordering::AcqRel);
        if Lifecycle::from_u8(previous) != Lifecycle::Closed {
            log::info!("Connection closed");
            let _ = self.inner.events.send(SessionEvent::Disconnected);
        }
    }

    /// Tear down after a transport failure outside of `disconnect`.
    async fn fail(&self) {
        self.mark_closed();
        if let Some(handle) = self.inner.read_task.lock().await.take() {
            handle.abort();
        }
    }

    // ========================================================================
    // READ PATH
    // ========================================================================

    async fn read_loop(self, mut reader: BoxedReader) {
        let mut receiver = Receiver::new();
        let mut chunk = [0u8; 256];

        while self.inner.reading.load(Ordering::Acquire) {
            match reader.read(&mut chunk).await {
                Ok(0) => {
                    log::info!("Reader stream closed");
                    break;
                }
                Ok(n) => {
                    for &byte in &chunk[..n] {
                        if let Some(message) = receiver.feed(byte) {
                            self.dispatch(message).await;
                        }
                    }
                }
                Err(e) => {
                    log::error!("Error reading from device: {}", e);
                    break;
                }
            }
        }

        self.inner.writer.lock().await.take();
        self.mark_closed();
    }

    async fn dispatch(&self, message: Message) {
        match &message {
            Message::RowAck { length } => log::debug!("Row acknowledged ({} needles)", length),
            Message::EnterCamsRange => log::debug!("Carriage entered CAMS range"),
            Message::ExitCamsRange { needle_count } => {
                log::debug!("Carriage left CAMS range after needle {}", needle_count)
            }
            Message::DirectionChanged { direction } => {
                log::info!("Carriage direction changed: {:?}", direction)
            }
            Message::LogString {
                kind: LogKind::Error,
                text,
            } => log::error!("Device error: {}", text),
            Message::LogString {
                kind: LogKind::Info,
                text,
            } => log::info!("Device: {}", text),
            Message::NeedleEvent { index } => log::debug!("Needle {}", index),
        }

        let row_complete = matches!(message, Message::ExitCamsRange { .. });
        let _ = self.inner.events.send(SessionEvent::Message(message));

        if row_complete {
            self.handle_row_complete().await;
        }
    }

    /// Advance to the next row once per carriage pass.
    ///
    /// The gate stays closed for the machine's settle delay so a duplicate
    /// `ExitCamsRange` right behind the first one does nothing.
    async fn handle_row_complete(&self) {
        let Some(guard) = self.inner.row_gate.try_begin() else {
            log::debug!("Row complete already in progress, ignoring duplicate");
            return;
        };

        {
            let mut controller = self.inner.controller.lock().await;
            if !controller.knitting_state().patterning {
                return;
            }
            if let Some(row) = controller.complete_row() {
                if let Err(e) = self.send(row).await {
                    log::error!("Failed to send next row: {}", e);
                }
            }
        }

        let delay = self.inner.machine.settle_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            drop(guard);
        });
    }

    // ========================================================================
    // WRITE PATH
    // ========================================================================

    /// Send one row of needle selections as a `SET_ROW` frame.
    ///
    /// Empty or over-long rows are rejected before touching the link.
    pub async fn write_row(&self, needles: &[u8]) -> Result<(), KnitError> {
        let frame = commands::set_row(needles).inspect_err(|e| log::error!("{}", e))?;
        self.write_frame(&frame).await
    }

    /// Send `CLEAR_ROW`.
    pub async fn clear_row(&self) -> Result<(), KnitError> {
        self.write_frame(&commands::clear_row()).await
    }

    async fn write_frame(&self, frame: &[u8]) -> Result<(), KnitError> {
        let mut guard = self.inner.writer.lock().await;
        let writer = guard.as_mut().ok_or(KnitError::NotConnected)?;

        let result = async {
            writer.write_all(frame).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = result {
            log::error!("Error writing to device: {}", e);
            *guard = None;
            drop(guard);
            self.fail().await;
            return Err(KnitError::Transport(format!("write failed: {}", e)));
        }
        Ok(())
    }

    async fn send(&self, row: OutgoingRow) -> Result<(), KnitError> {
        log::info!(
            "Sending row {} ({} needles, carriage {})",
            row.row_number,
            row.needles.len(),
            row.side
        );
        self.write_row(&row.needles).await?;
        let _ = self.inner.events.send(SessionEvent::RowSent(row));
        Ok(())
    }

    // ========================================================================
    // STATE CHANGES
    // ========================================================================

    /// Apply a controller change and send whatever row it produced, if
    /// connected.
    ///
    /// The controller stays locked until the write finishes, so rows reach
    /// the wire in the order the state changes were made.
    async fn apply<F>(&self, f: F) -> Result<Option<OutgoingRow>, KnitError>
    where
        F: FnOnce(&mut Controller) -> Result<Option<OutgoingRow>, KnitError>,
    {
        let mut controller = self.inner.controller.lock().await;
        let row = f(&mut controller)?;
        if let Some(row) = &row {
            if self.is_connected() {
                self.send(row.clone()).await?;
            }
        }
        drop(controller);
        Ok(row)
    }

    pub async fn start_patterning(&self) -> Result<Option<OutgoingRow>, KnitError> {
        self.apply(|c| Ok(c.start_patterning())).await
    }

    pub async fn stop_patterning(&self) -> Result<Option<OutgoingRow>, KnitError> {
        self.apply(|c| Ok(c.stop_patterning())).await
    }

    pub async fn set_knitting_state(
        &self,
        state: KnittingState,
    ) -> Result<Option<OutgoingRow>, KnitError> {
        self.apply(|c| Ok(c.set_knitting_state(state))).await
    }

    pub async fn set_point_cams(
        &self,
        left: i32,
        right: i32,
    ) -> Result<Option<OutgoingRow>, KnitError> {
        self.apply(|c| c.set_point_cams(left, right)).await
    }

    pub async fn set_row_number(&self, row_number: usize) -> Result<Option<OutgoingRow>, KnitError> {
        self.apply(|c| Ok(c.set_row_number(row_number))).await
    }

    pub async fn set_pattern_config(&self, config: PatternConfig) -> Result<(), KnitError> {
        self.with_controller(|c| c.set_pattern_config(config)).await
    }

    pub async fn set_base_pattern(&self, base: Bitmap) -> Result<(), KnitError> {
        self.with_controller(|c| c.set_base_pattern(base)).await
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knitting::CarriageSide;
    use crate::pattern::Alignment;
    use crate::protocol::receiver::Direction;
    use crate::transport::StreamTransport;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::DuplexStream;

    const WAIT: Duration = Duration::from_secs(2);

    fn session() -> ConnectionSession {
        let base = Bitmap::from_rows(&[&[0, 1], &[1, 0]]);
        let config = PatternConfig {
            alignment: Alignment::Left,
            ..Default::default()
        };
        let state = KnittingState {
            point_cams: [0, 6],
            carriage_side: CarriageSide::Right,
            ..Default::default()
        };
        ConnectionSession::new(Controller::new(base, config, state), MachineConfig::SK840)
    }

    async fn connect(session: &ConnectionSession) -> DuplexStream {
        let (host, device) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(host);
        session
            .connect(&mut StreamTransport::new(reader, writer))
            .await
            .unwrap();
        device
    }

    async fn read_exact(device: &mut DuplexStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        tokio::time::timeout(WAIT, device.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf
    }

    async fn next_event(events: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap()
    }

    /// Everything the device receives until the link goes quiet.
    async fn drain(device: &mut DuplexStream) -> Vec<u8> {
        let mut wire = Vec::new();
        let mut chunk = [0u8; 256];
        while let Ok(Ok(n)) =
            tokio::time::timeout(Duration::from_millis(100), device.read(&mut chunk)).await
        {
            if n == 0 {
                break;
            }
            wire.extend_from_slice(&chunk[..n]);
        }
        wire
    }

    /// A link whose every write fails.
    struct BrokenPipe;

    impl tokio::io::AsyncWrite for BrokenPipe {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_write_row_frame() {
        let session = session();
        let mut device = connect(&session).await;

        session.write_row(&[1, 0, 1, 1]).await.unwrap();
        assert_eq!(read_exact(&mut device, 3).await, vec![0x02, 0x04, 0x0D]);

        session.clear_row().await.unwrap();
        assert_eq!(read_exact(&mut device, 1).await, vec![0x03]);
    }

    #[tokio::test]
    async fn test_invalid_rows_rejected_before_io() {
        let session = session();
        assert!(matches!(
            session.write_row(&[]).await,
            Err(KnitError::InvalidRow(_))
        ));
        assert!(matches!(
            session.write_row(&[1; 201]).await,
            Err(KnitError::InvalidRow(_))
        ));
        assert!(matches!(
            session.write_row(&[1]).await,
            Err(KnitError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_start_patterning_sends_row() {
        let session = session();
        let mut device = connect(&session).await;

        let row = session.start_patterning().await.unwrap().unwrap();
        assert_eq!(row.needles, vec![0, 1, 0, 1, 0, 1]);
        // 0b101010
        assert_eq!(read_exact(&mut device, 3).await, vec![0x02, 0x06, 0x2A]);
    }

    #[tokio::test]
    async fn test_duplicate_exit_advances_once() {
        let session = session();
        let mut events = session.subscribe();
        let mut device = connect(&session).await;

        session.start_patterning().await.unwrap();
        read_exact(&mut device, 3).await;

        device.write_all(&[0x06, 0x05, 0x06, 0x05]).await.unwrap();

        let mut exits = 0;
        let mut sent = Vec::new();
        while exits < 2 {
            match next_event(&mut events).await {
                SessionEvent::Message(Message::ExitCamsRange { .. }) => exits += 1,
                SessionEvent::RowSent(row) => sent.push(row),
                _ => {}
            }
        }
        // Well inside the 50 ms settle window
        tokio::time::sleep(Duration::from_millis(10)).await;

        let state = session.with_controller(|c| c.knitting_state().clone()).await;
        assert_eq!(state.total_rows, 1);
        assert_eq!(state.current_row_number, 1);
        assert_eq!(state.carriage_side, CarriageSide::Left);

        // Row 1 = [1,0,1,0,1,0], reversed for the left side
        assert_eq!(read_exact(&mut device, 3).await, vec![0x02, 0x06, 0x2A]);
        assert_eq!(sent.len(), 1);
    }

    #[tokio::test]
    async fn test_exit_ignored_when_not_patterning() {
        let session = session();
        let mut events = session.subscribe();
        let mut device = connect(&session).await;

        device.write_all(&[0x06, 0x05]).await.unwrap();
        assert_eq!(
            next_event(&mut events).await,
            SessionEvent::Message(Message::ExitCamsRange { needle_count: 5 })
        );
        tokio::time::sleep(Duration::from_millis(10)).await;

        let state = session.with_controller(|c| c.knitting_state().clone()).await;
        assert_eq!(state.total_rows, 0);
        assert!(!session.inner.row_gate.is_busy());
    }

    #[tokio::test]
    async fn test_device_messages_broadcast() {
        let session = session();
        let mut events = session.subscribe();
        let mut device = connect(&session).await;

        device
            .write_all(&[0x07, 0x01, 0x08, 0x01, 0x03, b'b', b'a', b'd'])
            .await
            .unwrap();

        assert_eq!(
            next_event(&mut events).await,
            SessionEvent::Message(Message::DirectionChanged {
                direction: Direction::Left
            })
        );
        assert_eq!(
            next_event(&mut events).await,
            SessionEvent::Message(Message::LogString {
                kind: LogKind::Error,
                text: "bad".to_string()
            })
        );
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_and_reconnect_start_clean() {
        let session = session();
        let mut events = session.subscribe();
        let mut device = connect(&session).await;

        // Half a string message, then hang up
        device.write_all(&[0x08, 0x00, 0x05, b'a']).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.disconnect().await;

        assert_eq!(session.lifecycle(), Lifecycle::Closed);
        assert_eq!(next_event(&mut events).await, SessionEvent::Disconnected);
        let mut rest = Vec::new();
        device.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert!(matches!(
            session.write_row(&[1]).await,
            Err(KnitError::NotConnected)
        ));

        let mut device = connect(&session).await;
        device.write_all(&[0x05]).await.unwrap();
        assert_eq!(
            next_event(&mut events).await,
            SessionEvent::Message(Message::EnterCamsRange)
        );
    }

    #[tokio::test]
    async fn test_device_hangup_tears_down() {
        let session = session();
        let mut events = session.subscribe();
        let device = connect(&session).await;

        drop(device);
        assert_eq!(next_event(&mut events).await, SessionEvent::Disconnected);
        assert_eq!(session.lifecycle(), Lifecycle::Closed);
        assert!(matches!(
            session.clear_row().await,
            Err(KnitError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_write_failure_tears_down() {
        let session = session();
        let mut events = session.subscribe();
        let (host, _device) = tokio::io::duplex(64);
        session
            .connect(&mut StreamTransport::new(host, BrokenPipe))
            .await
            .unwrap();

        assert!(matches!(
            session.write_row(&[1, 0, 1]).await,
            Err(KnitError::Transport(_))
        ));
        assert_eq!(session.lifecycle(), Lifecycle::Closed);
        assert_eq!(next_event(&mut events).await, SessionEvent::Disconnected);
        assert!(matches!(
            session.clear_row().await,
            Err(KnitError::NotConnected)
        ));

        // The failed link leaves nothing behind that blocks a new one
        let mut device = connect(&session).await;
        session.clear_row().await.unwrap();
        assert_eq!(read_exact(&mut device, 1).await, vec![0x03]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_changes_leave_current_row_on_wire() {
        // Sixteen distinct rows: row r selects the bits of r + 1
        let rows: Vec<Vec<u8>> = (1..=16u8)
            .map(|v| (0..6).map(|bit| (v >> bit) & 1).collect())
            .collect();
        let refs: Vec<&[u8]> = rows.iter().map(Vec::as_slice).collect();
        let config = PatternConfig {
            alignment: Alignment::Left,
            ..Default::default()
        };
        let state = KnittingState {
            point_cams: [0, 6],
            ..Default::default()
        };
        let session = ConnectionSession::new(
            Controller::new(Bitmap::from_rows(&refs), config, state),
            MachineConfig::SK840,
        );
        let mut device = connect(&session).await;
        session.start_patterning().await.unwrap();

        let mut tasks = Vec::new();
        for row in (0..16).rev() {
            let session = session.clone();
            tasks.push(tokio::spawn(async move {
                session.set_row_number(row).await.unwrap();
            }));
        }
        device.write_all(&[0x06, 0x05]).await.unwrap();
        for task in tasks {
            task.await.unwrap();
        }

        let wire = drain(&mut device).await;
        assert_eq!(wire.len() % 3, 0);
        let needles = session.with_controller(|c| c.current_row()).await;
        let expected = commands::set_row(&needles).unwrap();
        assert!(wire.ends_with(&expected), "{:02X?} vs {:02X?}", wire, expected);
    }

    #[tokio::test]
    async fn test_double_connect_rejected() {
        let session = session();
        let _device = connect(&session).await;

        let (host, _other) = tokio::io::duplex(16);
        let (r, w) = tokio::io::split(host);
        assert!(matches!(
            session.connect(&mut StreamTransport::new(r, w)).await,
            Err(KnitError::Transport(_))
        ));
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_state_changes_offline_do_not_write() {
        let session = session();
        let row = session.start_patterning().await.unwrap();
        assert!(row.is_some());
        assert!(session.set_point_cams(3, 3).await.is_err());
    }

    #[test]
    fn test_row_gate() {
        let gate = RowCompleteGate::default();
        let guard = gate.try_begin().unwrap();
        assert!(gate.is_busy());
        assert!(gate.try_begin().is_none());
        drop(guard);
        assert!(!gate.is_busy());
        assert!(gate.try_begin().is_some());
    }

    #[test]
    fn test_guard_from_before_reset_keeps_gate_closed() {
        let gate = RowCompleteGate::default();
        let stale = gate.try_begin().unwrap();

        gate.reset();
        assert!(!gate.is_busy());
        let current = gate.try_begin().unwrap();

        drop(stale);
        assert!(gate.is_busy());
        assert!(gate.try_begin().is_none());

        drop(current);
        assert!(!gate.is_busy());
    }
}
