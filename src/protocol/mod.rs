//! Protocol module - type registry, wire format, and packet codec.
//!
//! This module implements the Gearman packet codec:
//! - Type registry mapping names and ids to descriptors
//! - 12-byte binary header encoding/decoding
//! - Admin text line classification and rendering
//! - Encoder producing wire bytes from packets
//! - Incremental decoder tolerating arbitrary chunk boundaries

mod admin;
mod decoder;
mod encoder;
mod packet;
mod types;
pub mod wire_format;

pub use admin::{names as admin_names, render_admin, AdminLine};
pub use decoder::{BodyWrite, DecodeOutput, DecoderConfig, PacketDecoder};
pub use encoder::{
    encode, encode_admin, encode_args, encode_body, encode_header, Encoded, EncodedBody,
};
pub use packet::{Args, Body, Packet, PacketKind};
pub use types::{AdminType, BodyKind, PacketType, Registry, TypeTable};
pub use wire_format::{
    Direction, Header, HEADER_SIZE, MAGIC_REQUEST, MAGIC_RESPONSE, MAX_ADMIN_LINE, MAX_ARG_SIZE,
};
