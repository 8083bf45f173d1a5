//! # gearman-packet
//!
//! Streaming codec for the Gearman job-server wire protocol.
//!
//! The crate translates between a raw byte stream and discrete protocol
//! packets, in both directions, for both the binary packet protocol and the
//! line-oriented admin text protocol that share a connection.
//!
//! ## Architecture
//!
//! - **Protocol core** ([`protocol`]): type registry, encoder and an
//!   incremental decoder that tolerates arbitrary chunk boundaries
//! - **Body adapter** ([`body`]): single-slot channel turning pushed body
//!   bytes into a pulled stream
//! - **Drivers** ([`reader`], [`writer`]): tokio tasks running the codec over
//!   `AsyncRead`/`AsyncWrite`
//!
//! ## Example
//!
//! ```
//! use gearman_packet::protocol::{Packet, Registry};
//! use gearman_packet::{PacketReader, PacketWriter};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> gearman_packet::Result<()> {
//! let registry = Registry::shared_default();
//!
//! let mut writer = PacketWriter::new(Vec::new());
//! let packet = Packet::request(registry.packet_type("CAN_DO")?).with_arg("function", "reverse");
//! writer.send(packet).await?;
//!
//! let bytes = writer.into_inner();
//! let mut reader = PacketReader::new(&bytes[..], registry);
//! let decoded = reader.next().await.unwrap()?;
//! assert_eq!(decoded.arg("function"), Some("reverse"));
//! # Ok(())
//! # }
//! ```

pub mod body;
pub mod error;
pub mod protocol;
pub mod reader;
pub mod writer;

// Re-exports
pub use body::{body_channel, unsized_body_channel, BodyRead, BodySink, BodyStream};
pub use error::{FaultKind, PacketError, Result};
pub use protocol::{Packet, Registry};
pub use reader::{spawn_reader_task, PacketReader, ReaderConfig};
pub use writer::{spawn_writer_task, PacketWriter, WriterConfig, WriterHandle};
