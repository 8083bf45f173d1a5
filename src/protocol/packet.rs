//! Packet struct with typed accessors.
//!
//! A packet is either a binary request/response tagged with its
//! [`PacketType`], or an admin text packet tagged with its [`AdminType`].
//!
//! # Example
//!
//! ```
//! use gearman_packet::protocol::{Packet, Registry};
//!
//! let registry = Registry::with_default_types();
//! let packet = Packet::request(registry.packet_type("CAN_DO").unwrap())
//!     .with_arg("function", "reverse");
//!
//! assert_eq!(packet.type_name(), "CAN_DO");
//! assert_eq!(packet.arg("function"), Some("reverse"));
//! ```

use std::sync::Arc;

use bytes::Bytes;

use super::types::{AdminType, PacketType};
use super::wire_format::Direction;
use crate::body::BodyStream;

/// Kind of packet, carrying its type descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketKind {
    /// Binary packet sent to the server.
    Request(Arc<PacketType>),
    /// Binary packet sent by the server.
    Response(Arc<PacketType>),
    /// Admin text packet.
    Admin(Arc<AdminType>),
}

impl PacketKind {
    /// Binary kind for the given direction.
    pub fn binary(direction: Direction, packet_type: Arc<PacketType>) -> Self {
        match direction {
            Direction::Request => PacketKind::Request(packet_type),
            Direction::Response => PacketKind::Response(packet_type),
        }
    }

    /// Type name of the descriptor.
    pub fn type_name(&self) -> &str {
        match self {
            PacketKind::Request(t) | PacketKind::Response(t) => &t.name,
            PacketKind::Admin(t) => &t.name,
        }
    }
}

/// Argument values by name, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args {
    entries: Vec<(String, String)>,
}

impl Args {
    /// Create an empty argument map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get an argument value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set an argument, replacing any existing value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Iterate over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of arguments set.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no arguments are set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Packet payload.
#[derive(Debug)]
pub enum Body {
    /// Materialized bytes.
    Bytes(Bytes),
    /// Materialized text.
    Text(String),
    /// Lazily produced bytes with a declared total length.
    Stream(BodyStream),
}

impl Body {
    /// Materialized content, or `None` for a stream.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Body::Bytes(b) => Some(b),
            Body::Text(t) => Some(t.as_bytes()),
            Body::Stream(_) => None,
        }
    }

    /// Total length in bytes, if known.
    pub fn len(&self) -> Option<u64> {
        match self {
            Body::Bytes(b) => Some(b.len() as u64),
            Body::Text(t) => Some(t.len() as u64),
            Body::Stream(s) => s.length(),
        }
    }

    /// Check if the body is known to be empty.
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Read the whole body, waiting for a stream to finish.
    pub async fn into_bytes(self) -> crate::error::Result<Bytes> {
        match self {
            Body::Bytes(b) => Ok(b),
            Body::Text(t) => Ok(Bytes::from(t)),
            Body::Stream(s) => s.to_bytes().await,
        }
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        Body::Bytes(b)
    }
}

impl From<Vec<u8>> for Body {
    fn from(b: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(b))
    }
}

impl From<&'static [u8]> for Body {
    fn from(b: &'static [u8]) -> Self {
        Body::Bytes(Bytes::from_static(b))
    }
}

impl From<String> for Body {
    fn from(t: String) -> Self {
        Body::Text(t)
    }
}

impl From<&str> for Body {
    fn from(t: &str) -> Self {
        Body::Text(t.to_string())
    }
}

impl From<BodyStream> for Body {
    fn from(s: BodyStream) -> Self {
        Body::Stream(s)
    }
}

/// A complete protocol packet.
#[derive(Debug)]
pub struct Packet {
    /// Kind and type descriptor.
    pub kind: PacketKind,
    /// Argument values.
    pub args: Args,
    /// Payload, for types that carry one.
    pub body: Option<Body>,
}

impl Packet {
    /// Create a packet with no arguments or body.
    pub fn new(kind: PacketKind) -> Self {
        Self {
            kind,
            args: Args::new(),
            body: None,
        }
    }

    /// Create a request packet.
    pub fn request(packet_type: Arc<PacketType>) -> Self {
        Self::new(PacketKind::Request(packet_type))
    }

    /// Create a response packet.
    pub fn response(packet_type: Arc<PacketType>) -> Self {
        Self::new(PacketKind::Response(packet_type))
    }

    /// Create an admin packet.
    pub fn admin(admin_type: Arc<AdminType>) -> Self {
        Self::new(PacketKind::Admin(admin_type))
    }

    /// Set an argument.
    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(name, value);
        self
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Type name of the packet.
    #[inline]
    pub fn type_name(&self) -> &str {
        self.kind.type_name()
    }

    /// Binary type descriptor, `None` for admin packets.
    pub fn packet_type(&self) -> Option<&Arc<PacketType>> {
        match &self.kind {
            PacketKind::Request(t) | PacketKind::Response(t) => Some(t),
            PacketKind::Admin(_) => None,
        }
    }

    /// Get an argument value.
    #[inline]
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args.get(name)
    }

    /// Check if this is a request.
    #[inline]
    pub fn is_request(&self) -> bool {
        matches!(self.kind, PacketKind::Request(_))
    }

    /// Check if this is a response.
    #[inline]
    pub fn is_response(&self) -> bool {
        matches!(self.kind, PacketKind::Response(_))
    }

    /// Check if this is an admin packet.
    #[inline]
    pub fn is_admin(&self) -> bool {
        matches!(self.kind, PacketKind::Admin(_))
    }

    /// Take the body out of the packet.
    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }
}
