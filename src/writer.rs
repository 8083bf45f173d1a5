//! Packet writer and dedicated writer task.
//!
//! [`PacketWriter`] encodes packets onto any `AsyncWrite`. Streamed bodies
//! are relayed chunk by chunk as the producer supplies them, so a large body
//! never needs to be held in memory.
//!
//! The writer always leaves the byte stream correctly framed. A streamed body
//! that produces more bytes than declared is truncated; one that produces
//! fewer is padded with zeros. Both are reported after the packet is written.
//!
//! # Architecture
//!
//! ```text
//! Producer 1 ─┐
//! Producer 2 ─┼─► mpsc::Sender<Packet> ─► Writer Task ─► AsyncWrite
//! Producer N ─┘                                │
//!                                              └─► faults
//! ```

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::body::BodyStream;
use crate::error::{PacketError, Result};
use crate::protocol::{encode, Encoded, Packet};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Zeros used to pad a short streamed body.
const PADDING: [u8; 1024] = [0; 1024];

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for the packet queue.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Encodes packets onto an async byte sink.
#[derive(Debug)]
pub struct PacketWriter<W> {
    writer: W,
}

impl<W> PacketWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Get a reference to the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Get a mutable reference to the underlying writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Unwrap the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Encode and write one packet.
    ///
    /// Validation faults are returned before anything is written. A streamed
    /// body whose length differs from the declared one is truncated or padded,
    /// then reported as `BodyLengthMismatch`. The writer stays usable after
    /// either.
    pub async fn send(&mut self, packet: Packet) -> Result<()> {
        match encode(packet)? {
            Encoded::Complete(bytes) => {
                self.writer.write_all(&bytes).await?;
                self.writer.flush().await?;
                Ok(())
            }
            Encoded::Streaming { head, body, length } => {
                self.writer.write_all(&head).await?;
                self.writer.flush().await?;
                self.relay(body, length).await
            }
        }
    }

    /// Relay a streamed body, writing exactly `length` bytes.
    async fn relay(&mut self, mut body: BodyStream, length: u64) -> Result<()> {
        let mut written: u64 = 0;

        while let Some(chunk) = body.chunk().await {
            let room = length - written;
            if room == 0 {
                // Keep draining so the producer is not left waiting.
                continue;
            }
            let take = room.min(chunk.len() as u64) as usize;
            self.write_chunk(chunk.slice(..take)).await?;
            written += take as u64;
        }

        let mut missing = length - written;
        while missing > 0 {
            let take = missing.min(PADDING.len() as u64) as usize;
            self.writer.write_all(&PADDING[..take]).await?;
            missing -= take as u64;
        }
        self.writer.flush().await?;

        let received = body.received();
        if received != length {
            return Err(PacketError::BodyLengthMismatch {
                expected: length,
                actual: received,
            });
        }

        tracing::trace!(length, "Relayed streamed body");
        Ok(())
    }

    async fn write_chunk(&mut self, chunk: Bytes) -> Result<()> {
        if !chunk.is_empty() {
            self.writer.write_all(&chunk).await?;
            self.writer.flush().await?;
        }
        Ok(())
    }
}

/// Handle for sending packets to the writer task.
///
/// This is cheaply cloneable and can be shared across multiple producers.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Packet>,
}

impl WriterHandle {
    /// Queue a packet for the writer task.
    ///
    /// Waits while the queue is full. Fails with `ConnectionClosed` once the
    /// task has ended.
    pub async fn send(&self, packet: Packet) -> Result<()> {
        self.tx
            .send(packet)
            .await
            .map_err(|_| PacketError::ConnectionClosed)
    }

    /// Check if the writer task has ended.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for sending packets.
///
/// # Returns
///
/// A tuple of `(WriterHandle, faults, JoinHandle)`. Recoverable faults are
/// delivered on `faults`; a fatal error ends the task and is returned from
/// its `JoinHandle`. Dropping every handle ends the task cleanly.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (
    WriterHandle,
    mpsc::UnboundedReceiver<PacketError>,
    JoinHandle<Result<()>>,
)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let (fault_tx, fault_rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(writer_loop(rx, PacketWriter::new(writer), fault_tx));

    (WriterHandle { tx }, fault_rx, task)
}

/// Spawn the writer task with default configuration.
pub fn spawn_writer_task_default<W>(
    writer: W,
) -> (
    WriterHandle,
    mpsc::UnboundedReceiver<PacketError>,
    JoinHandle<Result<()>>,
)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn_writer_task(writer, WriterConfig::default())
}

/// Main writer loop - receives packets and writes them in order.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<Packet>,
    mut writer: PacketWriter<W>,
    faults: mpsc::UnboundedSender<PacketError>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(packet) = rx.recv().await {
        let type_name = packet.type_name().to_string();

        if let Err(err) = writer.send(packet).await {
            if !err.is_recoverable() {
                tracing::error!(packet_type = %type_name, "Writer failed: {}", err);
                return Err(err);
            }
            tracing::warn!(packet_type = %type_name, "Packet fault: {}", err);
            // Nobody listening for faults is fine.
            let _ = faults.send(err);
        }
    }

    // Channel closed, clean shutdown
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::body_channel;
    use crate::protocol::Registry;
    use std::io::Cursor;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, BufWriter};

    fn cursor_writer() -> PacketWriter<Cursor<Vec<u8>>> {
        PacketWriter::new(Cursor::new(Vec::new()))
    }

    fn written(writer: &PacketWriter<Cursor<Vec<u8>>>) -> &[u8] {
        writer.get_ref().get_ref()
    }

    fn work_data(registry: &Registry) -> Packet {
        Packet::response(registry.packet_type("WORK_DATA").unwrap()).with_arg("job", "H:1")
    }

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[tokio::test]
    async fn test_send_complete_packet() {
        let registry = Registry::with_default_types();
        let mut writer = cursor_writer();

        let packet = Packet::request(registry.packet_type("CAN_DO").unwrap())
            .with_arg("function", "rev");
        writer.send(packet).await.unwrap();

        assert_eq!(written(&writer), b"\0REQ\0\0\0\x01\0\0\0\x03rev");
    }

    #[tokio::test]
    async fn test_send_streamed_body() {
        let registry = Registry::with_default_types();
        let mut writer = cursor_writer();

        let (sink, stream) = body_channel(4);
        tokio::spawn(async move {
            sink.write("te").await.unwrap();
            sink.write("st").await.unwrap();
        });

        writer
            .send(work_data(&registry).with_body(stream))
            .await
            .unwrap();

        let bytes = written(&writer);
        assert_eq!(&bytes[8..12], &8u32.to_be_bytes());
        assert_eq!(&bytes[12..], b"H:1\0test");
    }

    #[tokio::test]
    async fn test_short_body_is_padded() {
        let registry = Registry::with_default_types();
        let mut writer = cursor_writer();

        let (sink, stream) = body_channel(6);
        tokio::spawn(async move {
            sink.write("abc").await.unwrap();
        });

        let result = writer.send(work_data(&registry).with_body(stream)).await;
        assert!(matches!(
            result,
            Err(PacketError::BodyLengthMismatch {
                expected: 6,
                actual: 3
            })
        ));
        assert_eq!(&written(&writer)[12..], b"H:1\0abc\0\0\0");
    }

    #[tokio::test]
    async fn test_streamed_chunks_reach_peer_before_body_ends() {
        let registry = Registry::with_default_types();
        let (client, mut server) = duplex(4096);
        let mut writer = PacketWriter::new(BufWriter::new(client));

        let (sink, stream) = body_channel(4);
        let send = tokio::spawn(async move {
            writer
                .send(work_data(&registry).with_body(stream))
                .await
        });
        sink.write("te").await.unwrap();

        let mut buf = [0u8; 18];
        tokio::time::timeout(Duration::from_secs(1), server.read_exact(&mut buf))
            .await
            .expect("head and first chunk should be flushed")
            .unwrap();
        assert_eq!(&buf[..12], b"\0RES\0\0\0\x1c\0\0\0\x08");
        assert_eq!(&buf[12..], b"H:1\0te");

        sink.write("st").await.unwrap();
        drop(sink);
        send.await.unwrap().unwrap();

        let mut rest = [0u8; 2];
        server.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"st");
    }

    #[tokio::test]
    async fn test_long_body_is_truncated() {
        let registry = Registry::with_default_types();
        let mut writer = cursor_writer();

        let (sink, stream) = body_channel(2);
        tokio::spawn(async move {
            sink.write("ab").await.unwrap();
            sink.write("cd").await.unwrap();
        });

        let result = writer.send(work_data(&registry).with_body(stream)).await;
        assert!(matches!(
            result,
            Err(PacketError::BodyLengthMismatch {
                expected: 2,
                actual: 4
            })
        ));
        assert_eq!(&written(&writer)[12..], b"H:1\0ab");
    }

    #[tokio::test]
    async fn test_validation_fault_writes_nothing() {
        let registry = Registry::with_default_types();
        let mut writer = cursor_writer();

        let bad = Packet::request(registry.packet_type("SUBMIT_JOB").unwrap())
            .with_arg("function", "x".repeat(65));
        let result = writer.send(bad).await;
        assert!(matches!(result, Err(PacketError::ArgumentTooLong { .. })));
        assert!(written(&writer).is_empty());

        // Still usable.
        let noop = Packet::request(registry.packet_type("NOOP").unwrap());
        writer.send(noop).await.unwrap();
        assert_eq!(written(&writer).len(), 12);
    }

    #[tokio::test]
    async fn test_writer_task_sends_in_order() {
        let registry = Registry::with_default_types();
        let (client, mut server) = duplex(4096);
        let (handle, _faults, task) = spawn_writer_task_default(client);

        handle
            .send(Packet::request(registry.packet_type("GRAB_JOB").unwrap()))
            .await
            .unwrap();
        let ok = Packet::admin(registry.admin_type("ok").unwrap());
        handle.send(ok).await.unwrap();
        drop(handle);

        assert!(task.await.unwrap().is_ok());

        let mut buf = Vec::new();
        server.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"\0REQ\0\0\0\x09\0\0\0\0OK\n");
    }

    #[tokio::test]
    async fn test_writer_task_reports_faults() {
        let registry = Registry::with_default_types();
        let (client, mut server) = duplex(4096);
        let (handle, mut faults, task) = spawn_writer_task_default(client);

        let bad = Packet::admin(registry.admin_type("error").unwrap());
        handle.send(bad).await.unwrap();
        handle
            .send(Packet::response(registry.packet_type("NOOP").unwrap()))
            .await
            .unwrap();

        let fault = faults.recv().await.unwrap();
        assert!(matches!(fault, PacketError::MissingArgument { .. }));
        assert!(fault.is_recoverable());

        drop(handle);
        assert!(task.await.unwrap().is_ok());

        let mut buf = Vec::new();
        server.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"\0RES\0\0\0\x06\0\0\0\0");
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, _faults, task) = spawn_writer_task_default(client);

        // Drop the handle to close the channel
        drop(handle);

        // Writer task should complete cleanly
        let result = task.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_writer_task_ends_on_io_error() {
        let registry = Registry::with_default_types();
        let (client, server) = duplex(64);
        drop(server);
        let (handle, _faults, task) = spawn_writer_task_default(client);

        handle
            .send(Packet::request(registry.packet_type("NOOP").unwrap()))
            .await
            .unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(PacketError::Io(_))));
    }
}
