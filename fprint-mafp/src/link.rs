//! Framed exchanges over a transport
//!
//! ```text
//! command:      host ── Cmd ──────────────► module
//!               host ◄────────── Answer ─── module
//! data answer:  host ◄──── Data … DataEnd ── module   (after the Answer)
//! data phase:   host ── Data … DataEnd ───► module
//!               host ◄────── DataAnswer ─── module
//! ```

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use fprint_transport::Transport;
use tokio::time::Instant;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use crate::codec::FrameCodec;
use crate::command::Command;
use crate::constants::{DEFAULT_ADDRESS, MAX_PAYLOAD_SIZE};
use crate::error::{Error, Result};
use crate::packet::{split_data, DataAssembler, Frame, Mark};
use crate::response::Answer;

/// A transport speaking MAFP frames
pub struct Link {
    transport: Box<dyn Transport>,
    codec: FrameCodec,
    rx: BytesMut,
    address: u32,
    data_chunk: usize,
}

impl Link {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            codec: FrameCodec::new(),
            rx: BytesMut::new(),
            address: DEFAULT_ADDRESS,
            data_chunk: MAX_PAYLOAD_SIZE,
        }
    }

    pub fn with_address(mut self, address: u32) -> Self {
        self.address = address;
        self
    }

    /// Largest payload per outgoing data frame
    pub fn with_data_chunk(mut self, chunk: usize) -> Self {
        self.data_chunk = chunk.clamp(1, MAX_PAYLOAD_SIZE);
        self
    }

    pub fn endpoint(&self) -> String {
        self.transport.endpoint()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub async fn connect(&mut self) -> Result<()> {
        if !self.transport.is_connected() {
            self.transport.connect().await?;
        }
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        self.rx.clear();
        self.transport.disconnect().await?;
        Ok(())
    }

    /// Drop buffered and queued input
    pub async fn drain(&mut self) -> Result<usize> {
        let buffered = self.rx.len();
        self.rx.clear();
        let queued = self.transport.drain().await?;
        if buffered + queued > 0 {
            debug!("Dropped {} stale bytes", buffered + queued);
        }
        Ok(buffered + queued)
    }

    pub async fn send_frame(&mut self, frame: Frame) -> Result<()> {
        let frame = frame.with_address(self.address);
        trace!("Sending: {:?}", frame);

        let mut buf = BytesMut::with_capacity(frame.size());
        self.codec.encode(frame, &mut buf)?;
        self.transport.send(&buf).await?;
        Ok(())
    }

    /// Receive the next frame, whatever its role
    pub async fn receive_frame(&mut self, timeout: Duration) -> Result<Frame> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.codec.decode(&mut self.rx) {
                Ok(Some(frame)) => {
                    trace!("Received: {:?}", frame);
                    return Ok(frame);
                }
                Ok(None) => {}
                Err(e) => {
                    self.rx.clear();
                    return Err(e);
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(fprint_transport::Error::ReadTimeout.into());
            }

            let chunk = self.transport.receive(remaining).await?;
            self.rx.extend_from_slice(&chunk);
        }
    }

    async fn expect(&mut self, mark: Mark, timeout: Duration) -> Result<Frame> {
        let frame = self.receive_frame(timeout).await?;
        if frame.mark != mark {
            return Err(Error::UnexpectedMark {
                expected: mark.name(),
                actual: frame.mark,
            });
        }
        Ok(frame)
    }

    /// Send a command and wait for its answer
    ///
    /// The result code is not checked; see [`Answer::check`].
    pub async fn command(
        &mut self,
        command: Command,
        params: &[u8],
        timeout: Duration,
    ) -> Result<Answer> {
        trace!("Command {} params={}", command, hex::encode(params));
        self.send_frame(Frame::command(command, params)).await?;

        let frame = self.expect(Mark::Answer, timeout).await?;
        let answer = Answer::from_frame(command, frame)?;
        trace!("Answer {} result=0x{:02X}", command, answer.result);
        Ok(answer)
    }

    /// Collect a `Data… DataEnd` transfer from the module
    pub async fn receive_data(&mut self, timeout: Duration) -> Result<Bytes> {
        let mut assembler = DataAssembler::new();
        loop {
            let frame = self.receive_frame(timeout).await?;
            if let Some(payload) = assembler.push(frame)? {
                trace!("Data transfer of {} frames, {} bytes", assembler.frames(), payload.len());
                return Ok(payload);
            }
        }
    }

    /// Send a command whose answer is followed by a data transfer
    ///
    /// Returns the answer and, if it was successful, the data.
    pub async fn command_with_data(
        &mut self,
        command: Command,
        params: &[u8],
        timeout: Duration,
        data_timeout: Duration,
    ) -> Result<(Answer, Bytes)> {
        let answer = self.command(command, params, timeout).await?;
        if !answer.is_success() {
            return Ok((answer, Bytes::new()));
        }

        let data = self.receive_data(data_timeout).await?;
        Ok((answer, data))
    }

    /// Send a data phase and wait for the module's data answer
    pub async fn send_data(
        &mut self,
        command: Command,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Answer> {
        for frame in split_data(self.address, payload, self.data_chunk) {
            self.send_frame(frame).await?;
        }

        let frame = self.expect(Mark::DataAnswer, timeout).await?;
        Answer::from_frame(command, frame)
    }
}
