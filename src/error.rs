//! Error types for gearman-packet.

use std::sync::Arc;

use thiserror::Error;

use crate::protocol::PacketType;

/// How a [`PacketError`] should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The encoder rejected a packet. Nothing was written for it.
    Validation,
    /// The decoder saw malformed input and resynchronized.
    Protocol,
    /// The underlying transport or a consumer channel is gone.
    Fatal,
}

/// Main error type for all encode/decode operations.
#[derive(Debug, Error)]
pub enum PacketError {
    /// Packet type name not present in the registry.
    #[error("Unknown packet type name: {0}")]
    UnknownTypeName(String),

    /// Admin packet type the encoder does not know how to render.
    #[error("Unsupported admin packet type: {0}")]
    UnsupportedAdminType(String),

    /// Required admin argument was not set.
    #[error("Admin {packet_type} packet is missing required argument {arg}")]
    MissingArgument { packet_type: String, arg: String },

    /// Argument value exceeds the 64 byte wire limit.
    #[error("In a {packet_type} packet, argument {arg} is {len} bytes (maximum 64)")]
    ArgumentTooLong {
        packet_type: String,
        arg: String,
        len: usize,
    },

    /// Argument value holds the byte that terminates it on the wire.
    #[error("In a {packet_type} packet, argument {arg} contains its terminator byte")]
    ArgumentContainsTerminator { packet_type: String, arg: String },

    /// Streamed body was supplied without a known total length.
    #[error("{packet_type} packet has a streamed body without a declared length")]
    MissingBodyLength { packet_type: String },

    /// Packet length exceeds what the header can carry or the configured maximum.
    #[error("Packet exceeds maximum packet size ({size} > {max})")]
    PacketTooLarge { size: u64, max: u64 },

    /// A NUL byte was not followed by a known magic.
    #[error("Null found without known magic: {0:?}")]
    UnmatchedMagic([u8; 3]),

    /// Header declared a type id the registry does not know.
    #[error("Unknown packet type: {} ({})", .0.id, .0.name)]
    UnknownPacketType(Arc<PacketType>),

    /// No argument terminator within the argument size limit.
    #[error("In a {packet_type} packet, argument {arg} (#{index}) is missing or more than 64 bytes")]
    UnterminatedArgument {
        packet_type: String,
        arg: String,
        index: usize,
    },

    /// Admin line ran past the line size limit without a newline.
    #[error("An admin command went {0} bytes without a newline")]
    AdminLineTooLong(usize),

    /// Streamed body produced a different number of bytes than declared.
    #[error("Body length mismatch: declared {expected} bytes, got {actual}")]
    BodyLengthMismatch { expected: u64, actual: u64 },

    /// Input ended while a packet was partially read.
    #[error("Disconnected while mid-packet")]
    Disconnected,

    /// I/O error on the underlying byte stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The receiving side of a channel was dropped.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl PacketError {
    /// Category of this error.
    pub fn kind(&self) -> FaultKind {
        match self {
            PacketError::UnknownTypeName(_)
            | PacketError::UnsupportedAdminType(_)
            | PacketError::MissingArgument { .. }
            | PacketError::ArgumentTooLong { .. }
            | PacketError::ArgumentContainsTerminator { .. }
            | PacketError::MissingBodyLength { .. } => FaultKind::Validation,
            PacketError::PacketTooLarge { .. }
            | PacketError::UnmatchedMagic(_)
            | PacketError::UnknownPacketType(_)
            | PacketError::UnterminatedArgument { .. }
            | PacketError::AdminLineTooLong(_)
            | PacketError::BodyLengthMismatch { .. }
            | PacketError::Disconnected => FaultKind::Protocol,
            PacketError::Io(_) | PacketError::ConnectionClosed => FaultKind::Fatal,
        }
    }

    /// Whether the stage that reported this error can keep going.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        self.kind() != FaultKind::Fatal
    }
}

/// Result type alias using PacketError.
pub type Result<T> = std::result::Result<T, PacketError>;
