//! Packet encoder.
//!
//! Renders a [`Packet`] into wire bytes. Materialized packets encode to a
//! single buffer; packets with a streamed body encode to a head (header +
//! arguments) plus the body stream, which the caller relays afterwards
//! (see [`PacketWriter`](crate::writer::PacketWriter)).
//!
//! # Example
//!
//! ```
//! use gearman_packet::protocol::{encode, Encoded, Packet, Registry};
//!
//! let registry = Registry::with_default_types();
//! let packet = Packet::request(registry.packet_type("CAN_DO").unwrap())
//!     .with_arg("function", "reverse");
//!
//! match encode(packet).unwrap() {
//!     Encoded::Complete(bytes) => assert_eq!(&bytes[..], b"\0REQ\0\0\0\x01\0\0\0\x07reverse"),
//!     Encoded::Streaming { .. } => unreachable!(),
//! }
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::admin::render_admin;
use super::packet::{Args, Body, Packet, PacketKind};
use super::types::{BodyKind, PacketType};
use super::wire_format::{Direction, Header, ARG_TERMINATOR, HEADER_SIZE, MAX_ARG_SIZE};
use crate::body::BodyStream;
use crate::error::{PacketError, Result};

/// Output of [`encode`].
#[derive(Debug)]
pub enum Encoded {
    /// The whole packet.
    Complete(Bytes),
    /// Header and arguments, followed by a body still to be relayed.
    Streaming {
        head: Bytes,
        body: BodyStream,
        length: u64,
    },
}

/// Encoded body, before it is joined with the header.
#[derive(Debug)]
pub enum EncodedBody {
    Bytes(Bytes),
    Stream { body: BodyStream, length: u64 },
}

impl EncodedBody {
    /// Body length in bytes.
    pub fn len(&self) -> u64 {
        match self {
            EncodedBody::Bytes(b) => b.len() as u64,
            EncodedBody::Stream { length, .. } => *length,
        }
    }

    /// Check if the body is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encode an admin packet's line.
pub fn encode_admin(type_name: &str, args: &Args) -> Result<Bytes> {
    render_admin(type_name, args).map(Bytes::from)
}

/// Encode the 12-byte header for an argument + body length.
pub fn encode_header(
    direction: Direction,
    packet_type: &PacketType,
    length: u64,
) -> Result<[u8; HEADER_SIZE]> {
    let length = u32::try_from(length).map_err(|_| PacketError::PacketTooLarge {
        size: length,
        max: u64::from(u32::MAX),
    })?;
    Ok(Header::new(direction, packet_type.id, length).encode())
}

/// Encode the NUL-terminated arguments.
///
/// Missing arguments encode as empty strings. When the type has no body the
/// last argument is left out; it is sent by [`encode_body`] instead.
pub fn encode_args(packet_type: &PacketType, args: &Args) -> Result<BytesMut> {
    let count = packet_type.terminated_args();
    let mut buf = BytesMut::new();

    for name in &packet_type.args[..count] {
        let value = args.get(name).unwrap_or("");
        if value.len() > MAX_ARG_SIZE {
            return Err(PacketError::ArgumentTooLong {
                packet_type: packet_type.name.clone(),
                arg: name.clone(),
                len: value.len(),
            });
        }
        if value.as_bytes().contains(&ARG_TERMINATOR) {
            return Err(PacketError::ArgumentContainsTerminator {
                packet_type: packet_type.name.clone(),
                arg: name.clone(),
            });
        }
        buf.reserve(value.len() + 1);
        buf.put_slice(value.as_bytes());
        buf.put_u8(ARG_TERMINATOR);
    }

    Ok(buf)
}

/// Encode the body.
pub fn encode_body(
    packet_type: &PacketType,
    args: &Args,
    body: Option<Body>,
) -> Result<EncodedBody> {
    if let Some(name) = packet_type.body_arg() {
        let value = args.get(name).unwrap_or("");
        return Ok(EncodedBody::Bytes(Bytes::copy_from_slice(value.as_bytes())));
    }

    if packet_type.body == BodyKind::None {
        return Ok(EncodedBody::Bytes(Bytes::new()));
    }

    match body {
        None => Ok(EncodedBody::Bytes(Bytes::new())),
        Some(Body::Bytes(b)) => Ok(EncodedBody::Bytes(b)),
        Some(Body::Text(t)) => Ok(EncodedBody::Bytes(Bytes::from(t))),
        Some(Body::Stream(stream)) => match stream.length() {
            Some(length) => Ok(EncodedBody::Stream {
                body: stream,
                length,
            }),
            None => Err(PacketError::MissingBodyLength {
                packet_type: packet_type.name.clone(),
            }),
        },
    }
}

/// Encode a packet.
pub fn encode(packet: Packet) -> Result<Encoded> {
    let Packet { kind, args, body } = packet;

    let (direction, packet_type) = match kind {
        PacketKind::Admin(admin_type) => {
            return encode_admin(&admin_type.name, &args).map(Encoded::Complete);
        }
        PacketKind::Request(t) => (Direction::Request, t),
        PacketKind::Response(t) => (Direction::Response, t),
    };

    let arg_bytes = encode_args(&packet_type, &args)?;
    let body = encode_body(&packet_type, &args, body)?;
    let header = encode_header(
        direction,
        &packet_type,
        arg_bytes.len() as u64 + body.len(),
    )?;

    let mut head = BytesMut::with_capacity(HEADER_SIZE + arg_bytes.len());
    head.put_slice(&header);
    head.put_slice(&arg_bytes);

    tracing::trace!(
        packet_type = %packet_type.name,
        args_len = arg_bytes.len(),
        body_len = body.len(),
        "Encoding packet"
    );

    match body {
        EncodedBody::Bytes(b) => {
            head.put_slice(&b);
            Ok(Encoded::Complete(head.freeze()))
        }
        EncodedBody::Stream { body, length } => Ok(Encoded::Streaming {
            head: head.freeze(),
            body,
            length,
        }),
    }
}
