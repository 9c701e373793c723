//! # Simulated Controller
//!
//! An in-process stand-in for the retrofit board, for dry runs without a
//! machine. It speaks the device side of the protocol:
//!
//! 1. Parses `SET_ROW` / `CLEAR_ROW` frames from the host, dropping junk
//!    bytes one at a time like the firmware does.
//! 2. Acknowledges every row with `04 len`.
//! 3. Optionally knits it: after `pass_time` it reports a direction change,
//!    CAMS entry, and CAMS exit (`06 count`), which drives the host to the
//!    next row.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use super::{BoxedReader, BoxedWriter, Transport};
use crate::error::KnitError;
use crate::protocol::commands::{
    CMD_CLEAR_ROW, CMD_SET_ROW, DIR_LEFT, DIR_RIGHT, MSG_ACK_ROW, MSG_CHANGE_DIRECTION,
    MSG_ENTER_CAMS, MSG_EXIT_CAMS, MSG_STRING, STRING_INFO,
};
use crate::protocol::Command;

/// # Simulated Machine
///
/// `passes` limits how many rows are knitted before the simulated carriage
/// stops (`None` = forever).
#[derive(Debug, Clone)]
pub struct SimulatedMachine {
    pub pass_time: Duration,
    pub passes: Option<usize>,
}

impl Default for SimulatedMachine {
    fn default() -> Self {
        Self {
            pass_time: Duration::from_millis(500),
            passes: None,
        }
    }
}

impl SimulatedMachine {
    pub fn new(pass_time: Duration, passes: Option<usize>) -> Self {
        Self { pass_time, passes }
    }
}

#[async_trait]
impl Transport for SimulatedMachine {
    async fn open(&mut self) -> Result<(BoxedReader, BoxedWriter), KnitError> {
        let (host, device) = tokio::io::duplex(1024);
        tokio::spawn(run_device(device, self.clone()));
        let (reader, writer) = tokio::io::split(host);
        Ok((Box::new(reader), Box::new(writer)))
    }
}

/// Take one complete command off the front of `buf`, if there is one.
///
/// Leading bytes that cannot start a command are discarded.
fn next_command(buf: &mut Vec<u8>) -> Option<Command> {
    loop {
        match buf.first().copied() {
            None => return None,
            Some(CMD_CLEAR_ROW) => {
                buf.remove(0);
                return Some(Command::ClearRow);
            }
            Some(CMD_SET_ROW) => {
                let n = *buf.get(1)? as usize;
                let total = 2 + n.div_ceil(8);
                if buf.len() < total {
                    return None;
                }
                let frame: Vec<u8> = buf.drain(..total).collect();
                return Command::parse(&frame).ok();
            }
            Some(_) => {
                buf.remove(0);
            }
        }
    }
}

async fn run_device(mut link: DuplexStream, sim: SimulatedMachine) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 256];
    let mut moving_left = false;
    let mut knitted = 0usize;

    let hello = b"simulator ready";
    let mut greeting = vec![MSG_STRING, STRING_INFO, hello.len() as u8];
    greeting.extend(hello);
    if link.write_all(&greeting).await.is_err() {
        return;
    }

    loop {
        let n = match link.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);

        while let Some(cmd) = next_command(&mut buf) {
            let Command::SetRow { needle_count, .. } = cmd else {
                continue;
            };
            if link.write_all(&[MSG_ACK_ROW, needle_count]).await.is_err() {
                return;
            }

            if sim.passes.is_some_and(|limit| knitted >= limit) {
                continue;
            }
            tokio::time::sleep(sim.pass_time).await;

            let dir = if moving_left { DIR_LEFT } else { DIR_RIGHT };
            moving_left = !moving_left;
            knitted += 1;
            let pass = [
                MSG_CHANGE_DIRECTION,
                dir,
                MSG_ENTER_CAMS,
                MSG_EXIT_CAMS,
                needle_count.saturating_sub(1),
            ];
            if link.write_all(&pass).await.is_err() {
                return;
            }
        }
    }
}
