//! Incremental packet decoder.
//!
//! Uses `bytes::BytesMut` to hold only the unconsumed tail of the input.
//! Implements a state machine that tolerates arbitrary chunk boundaries:
//!
//! ```text
//! detect ─┬─ NUL ──► header ─┬─► args ──► body ─┬─► bodyarg ───┐
//!         │                  │              ▲   ├─► bodytext ──┤
//!         │                  ├──────────────┘   └─► bodystream ┤
//!         │                  └─► packetSkip ───────────────────┤
//!         └─ other ─► admin ─┬─────────────────────────────────┤
//!                            └─► adminSkip ────────────────────┴─► detect
//! ```
//!
//! Malformed input is reported as a [`DecodeOutput::Fault`] and skipped;
//! decoding resumes at the next packet boundary.
//!
//! Streamed bodies are not buffered whole. The packet is emitted as soon as
//! its body starts, and each slice of body bytes is handed out as a
//! [`BodyWrite`] that the driver must complete before decoding again.
//!
//! # Example
//!
//! ```
//! use gearman_packet::protocol::{DecodeOutput, PacketDecoder};
//!
//! let mut decoder = PacketDecoder::default();
//! decoder.extend(b"\0RES\0\0\0\x06\0\0\0\0OK\n");
//!
//! let DecodeOutput::Packet(noop) = decoder.decode() else { panic!() };
//! assert_eq!(noop.type_name(), "NOOP");
//!
//! let DecodeOutput::Packet(ok) = decoder.decode() else { panic!() };
//! assert_eq!(ok.type_name(), "ok");
//!
//! assert!(matches!(decoder.decode(), DecodeOutput::NeedMoreInput));
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};

use super::admin::AdminLine;
use super::packet::{Args, Body, Packet, PacketKind};
use super::types::{AdminType, BodyKind, PacketType, Registry};
use super::wire_format::{
    Direction, Header, ARG_TERMINATOR, HEADER_TAIL_SIZE, LINE_TERMINATOR, MAX_ADMIN_LINE,
    MAX_ARG_SIZE,
};
use crate::body::{body_channel, BodySink};
use crate::error::{PacketError, Result};

/// Decoder settings.
#[derive(Debug, Clone, Default)]
pub struct DecoderConfig {
    /// Binary packets declaring a larger argument + body length are
    /// reported and skipped. `None` accepts any length.
    pub max_packet_size: Option<u32>,
}

/// Decoder state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Detect,
    Header,
    PacketSkip,
    Args,
    Body,
    BodyArg,
    BodyText,
    BodyStream,
    Admin,
    AdminSkip,
}

/// Result of running one state.
enum Step {
    /// Not enough buffered input.
    NeedMoreInput,
    /// Move to the given state.
    Advance(State),
    /// A body write is outstanding; move to the given state once it completes.
    Suspended(BodyWrite, State),
}

/// One item of decoder output.
#[derive(Debug)]
pub enum DecodeOutput {
    /// A decoded packet. Streamed bodies may still be filling.
    Packet(Packet),
    /// Malformed input was reported and skipped.
    Fault(PacketError),
    /// Body bytes to deliver before calling [`PacketDecoder::decode`] again.
    BodyWrite(BodyWrite),
    /// All buffered input has been consumed.
    NeedMoreInput,
}

/// Outstanding write of body bytes into a streamed body.
#[derive(Debug)]
pub struct BodyWrite {
    sink: BodySink,
    chunk: Bytes,
    last: bool,
}

impl BodyWrite {
    /// Bytes to deliver.
    #[inline]
    pub fn chunk(&self) -> &Bytes {
        &self.chunk
    }

    /// Whether this write completes the body.
    #[inline]
    pub fn is_last(&self) -> bool {
        self.last
    }

    /// Deliver the chunk, waiting until the body consumer accepts it.
    ///
    /// The final write closes the body. Returns `false` if the consumer was
    /// dropped and the chunk was discarded.
    pub async fn complete(self) -> bool {
        if self.chunk.is_empty() {
            return !self.sink.is_closed();
        }
        match self.sink.write(self.chunk).await {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!("Body consumer dropped, discarding body chunk");
                false
            }
        }
    }
}

/// Packet being decoded.
#[derive(Debug)]
struct InProgress {
    direction: Direction,
    packet_type: Arc<PacketType>,
    /// Declared argument + body length.
    length: u32,
    args: Args,
    /// Bytes consumed as NUL-terminated arguments.
    arg_bytes: u64,
    /// Arguments read so far.
    argc: usize,
    body_size: u64,
    /// Bytes of a streamed body handed out so far.
    body_read: u64,
    sink: Option<BodySink>,
}

impl InProgress {
    fn new(header: Header, packet_type: Arc<PacketType>) -> Self {
        Self {
            direction: header.direction,
            packet_type,
            length: header.length,
            args: Args::new(),
            arg_bytes: 0,
            argc: 0,
            body_size: 0,
            body_read: 0,
            sink: None,
        }
    }
}

/// Incremental decoder for the binary and admin protocols.
pub struct PacketDecoder {
    registry: Arc<Registry>,
    config: DecoderConfig,
    /// Unconsumed input.
    buffer: BytesMut,
    state: State,
    packet: Option<InProgress>,
    /// Bytes left to discard in `PacketSkip`.
    skip_remaining: u64,
    /// Packets and faults waiting to be returned.
    ready: VecDeque<DecodeOutput>,
}

impl PacketDecoder {
    /// Create a decoder over the given registry.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_config(registry, DecoderConfig::default())
    }

    /// Create a decoder with custom settings.
    pub fn with_config(registry: Arc<Registry>, config: DecoderConfig) -> Self {
        Self {
            registry,
            config,
            buffer: BytesMut::new(),
            state: State::Detect,
            packet: None,
            skip_remaining: 0,
            ready: VecDeque::new(),
        }
    }

    /// Append received bytes to the unconsumed tail.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Run the state machine until it has something to report.
    ///
    /// Call repeatedly until it returns [`DecodeOutput::NeedMoreInput`].
    /// A returned [`BodyWrite`] must be completed before the next call.
    pub fn decode(&mut self) -> DecodeOutput {
        loop {
            if let Some(output) = self.ready.pop_front() {
                return output;
            }

            match self.step() {
                Step::NeedMoreInput => return DecodeOutput::NeedMoreInput,
                Step::Advance(next) => self.state = next,
                Step::Suspended(write, next) => {
                    self.state = next;
                    return DecodeOutput::BodyWrite(write);
                }
            }
        }
    }

    /// Signal end of input.
    ///
    /// Fails with `Disconnected` if a packet was partially read. The partial
    /// packet is discarded and a streamed body still filling is closed short.
    pub fn finish(&mut self) -> Result<()> {
        let mid_packet = self.state != State::Detect;

        self.reset_packet();
        self.buffer.clear();
        self.skip_remaining = 0;
        self.state = State::Detect;

        if mid_packet {
            return Err(PacketError::Disconnected);
        }
        Ok(())
    }

    /// Number of buffered, unconsumed bytes.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the decoder sits between packets.
    pub fn is_idle(&self) -> bool {
        self.state == State::Detect && self.ready.is_empty()
    }

    /// Registry used to resolve type ids.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn step(&mut self) -> Step {
        match self.state {
            State::Detect => self.detect(),
            State::Header => self.header(),
            State::PacketSkip => self.packet_skip(),
            State::Args => self.args(),
            State::Body => self.body(),
            State::BodyArg => self.body_arg(),
            State::BodyText => self.body_text(),
            State::BodyStream => self.body_stream(),
            State::Admin => self.admin(),
            State::AdminSkip => self.admin_skip(),
        }
    }

    // ---------- Utilities

    fn fault(&mut self, err: PacketError) {
        self.ready.push_back(DecodeOutput::Fault(err));
    }

    fn reset_packet(&mut self) {
        self.packet = None;
    }

    fn end_packet(&mut self) -> Step {
        self.reset_packet();
        Step::Advance(State::Detect)
    }

    fn skip_packet(&mut self, length: u32) -> Step {
        self.skip_remaining = u64::from(length);
        Step::Advance(State::PacketSkip)
    }

    /// Queue the in-progress packet for output, moving its arguments out.
    fn emit_packet(&mut self, body: Option<Body>) {
        let Some(packet) = self.packet.as_mut() else {
            return;
        };
        let output = Packet {
            kind: PacketKind::binary(packet.direction, packet.packet_type.clone()),
            args: std::mem::take(&mut packet.args),
            body,
        };
        tracing::trace!(
            packet_type = %packet.packet_type.name,
            length = packet.length,
            "Decoded packet"
        );
        self.ready.push_back(DecodeOutput::Packet(output));
    }

    fn admin_type(&self, name: &str) -> Arc<AdminType> {
        self.registry
            .admin(name)
            .or_else(|| Registry::shared_default().admin(name))
            .unwrap_or_else(|| Arc::new(AdminType::new(name, &[])))
    }

    // ---------- States

    fn detect(&mut self) -> Step {
        match self.buffer.first().copied() {
            None => Step::NeedMoreInput,
            Some(0) => {
                self.buffer.advance(1);
                Step::Advance(State::Header)
            }
            Some(_) => Step::Advance(State::Admin),
        }
    }

    fn header(&mut self) -> Step {
        let header = match Header::decode_tail(&self.buffer) {
            None => return Step::NeedMoreInput,
            Some(Err(magic)) => {
                // Leave the bytes; detect will treat them as admin text.
                self.fault(PacketError::UnmatchedMagic(magic));
                return self.end_packet();
            }
            Some(Ok(header)) => header,
        };
        self.buffer.advance(HEADER_TAIL_SIZE);

        let Some(packet_type) = self.registry.by_id(header.type_id) else {
            let unknown = Arc::new(PacketType::unknown(header.type_id));
            tracing::debug!(
                packet_type = %unknown.name,
                length = header.length,
                "Skipping packet of unknown type"
            );
            self.fault(PacketError::UnknownPacketType(unknown));
            return self.skip_packet(header.length);
        };

        if let Some(max) = self.config.max_packet_size {
            if header.length > max {
                tracing::debug!(length = header.length, max, "Skipping oversized packet");
                self.fault(PacketError::PacketTooLarge {
                    size: u64::from(header.length),
                    max: u64::from(max),
                });
                return self.skip_packet(header.length);
            }
        }

        let scan_args = packet_type.terminated_args() > 0;
        self.packet = Some(InProgress::new(header, packet_type));

        if scan_args {
            Step::Advance(State::Args)
        } else {
            Step::Advance(State::Body)
        }
    }

    fn packet_skip(&mut self) -> Step {
        let available = self.buffer.len() as u64;
        if available >= self.skip_remaining {
            self.buffer.advance(self.skip_remaining as usize);
            self.skip_remaining = 0;
            return self.end_packet();
        }

        self.skip_remaining -= available;
        self.buffer.clear();
        Step::NeedMoreInput
    }

    fn args(&mut self) -> Step {
        let Some(packet) = self.packet.as_mut() else {
            return self.end_packet();
        };
        let wanted = packet.packet_type.terminated_args();

        loop {
            // Never scan past the declared length into the next packet.
            let remaining = u64::from(packet.length) - packet.arg_bytes;
            let window = (self.buffer.len() as u64)
                .min(MAX_ARG_SIZE as u64 + 1)
                .min(remaining) as usize;
            match self.buffer[..window]
                .iter()
                .position(|&b| b == ARG_TERMINATOR)
            {
                Some(end) => {
                    let value = self.buffer.split_to(end);
                    self.buffer.advance(1);
                    packet.arg_bytes += end as u64 + 1;
                    let name = packet.packet_type.args[packet.argc].clone();
                    packet.args.insert(name, String::from_utf8_lossy(&value));
                    packet.argc += 1;
                    if packet.argc == wanted {
                        return Step::Advance(State::Body);
                    }
                }
                None if window as u64 == remaining || window > MAX_ARG_SIZE => break,
                None => return Step::NeedMoreInput,
            }
        }

        let err = PacketError::UnterminatedArgument {
            packet_type: packet.packet_type.name.clone(),
            arg: packet.packet_type.args[packet.argc].clone(),
            index: packet.argc + 1,
        };
        tracing::debug!("Argument terminator not found, reading body anyway");
        self.fault(err);
        Step::Advance(State::Body)
    }

    fn body(&mut self) -> Step {
        let Some(packet) = self.packet.as_mut() else {
            return self.end_packet();
        };
        packet.body_size = u64::from(packet.length) - packet.arg_bytes;

        match packet.packet_type.body {
            BodyKind::None if packet.body_size == 0 => {
                if let Some(name) = packet.packet_type.body_arg() {
                    let name = name.to_string();
                    packet.args.insert(name, "");
                }
                self.emit_packet(None);
                self.end_packet()
            }
            BodyKind::None => Step::Advance(State::BodyArg),
            BodyKind::Text => Step::Advance(State::BodyText),
            BodyKind::Stream => {
                let (sink, stream) = body_channel(packet.body_size);
                packet.sink = Some(sink);
                packet.body_read = 0;
                self.emit_packet(Some(Body::Stream(stream)));
                Step::Advance(State::BodyStream)
            }
        }
    }

    fn body_arg(&mut self) -> Step {
        let Some(packet) = self.packet.as_mut() else {
            return self.end_packet();
        };
        let size = packet.body_size as usize;
        if self.buffer.len() < size {
            return Step::NeedMoreInput;
        }

        let value = self.buffer.split_to(size);
        if let Some(name) = packet.packet_type.body_arg() {
            let name = name.to_string();
            packet.args.insert(name, String::from_utf8_lossy(&value));
        }
        self.emit_packet(None);
        self.end_packet()
    }

    fn body_text(&mut self) -> Step {
        let Some(packet) = self.packet.as_ref() else {
            return self.end_packet();
        };
        let size = packet.body_size as usize;
        if self.buffer.len() < size {
            return Step::NeedMoreInput;
        }

        let value = self.buffer.split_to(size);
        let text = String::from_utf8_lossy(&value).into_owned();
        self.emit_packet(Some(Body::Text(text)));
        self.end_packet()
    }

    fn body_stream(&mut self) -> Step {
        let Some(packet) = self.packet.as_mut() else {
            return self.end_packet();
        };
        let remaining = packet.body_size - packet.body_read;
        let available = self.buffer.len() as u64;

        if available >= remaining {
            let chunk = self.buffer.split_to(remaining as usize).freeze();
            let sink = packet.sink.take();
            self.reset_packet();
            return match sink {
                Some(sink) => Step::Suspended(
                    BodyWrite {
                        sink,
                        chunk,
                        last: true,
                    },
                    State::Detect,
                ),
                None => Step::Advance(State::Detect),
            };
        }

        if available == 0 {
            return Step::NeedMoreInput;
        }

        let chunk = self.buffer.split().freeze();
        packet.body_read += available;
        match &packet.sink {
            Some(sink) => Step::Suspended(
                BodyWrite {
                    sink: sink.clone(),
                    chunk,
                    last: false,
                },
                State::BodyStream,
            ),
            None => Step::NeedMoreInput,
        }
    }

    fn admin(&mut self) -> Step {
        let window = self.buffer.len().min(MAX_ADMIN_LINE);
        let Some(end) = self.buffer[..window]
            .iter()
            .position(|&b| b == LINE_TERMINATOR)
        else {
            if window < MAX_ADMIN_LINE {
                return Step::NeedMoreInput;
            }
            tracing::debug!("Admin line too long, skipping to next newline");
            self.fault(PacketError::AdminLineTooLong(MAX_ADMIN_LINE));
            return Step::Advance(State::AdminSkip);
        };

        let raw = self.buffer.split_to(end);
        self.buffer.advance(1);

        let text = String::from_utf8_lossy(&raw);
        let line = AdminLine::parse(&text);
        let packet = Packet {
            kind: PacketKind::Admin(self.admin_type(line.type_name())),
            args: line.to_args(),
            body: None,
        };
        self.ready.push_back(DecodeOutput::Packet(packet));
        self.end_packet()
    }

    fn admin_skip(&mut self) -> Step {
        match self.buffer.iter().position(|&b| b == LINE_TERMINATOR) {
            Some(end) => {
                self.buffer.advance(end + 1);
                self.end_packet()
            }
            None => {
                self.buffer.clear();
                Step::NeedMoreInput
            }
        }
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::Detect => "detect",
            State::Header => "header",
            State::PacketSkip => "packetSkip",
            State::Args => "args",
            State::Body => "body",
            State::BodyArg => "bodyarg",
            State::BodyText => "bodytext",
            State::BodyStream => "bodystream",
            State::Admin => "admin",
            State::AdminSkip => "adminSkip",
        }
    }
}

impl Default for PacketDecoder {
    fn default() -> Self {
        Self::new(Registry::shared_default())
    }
}
