//! Packet reader and dedicated reader task.
//!
//! [`PacketReader`] feeds bytes from any `AsyncRead` into a
//! [`PacketDecoder`] and yields packets and faults in input order. Streamed
//! bodies are delivered through the packet's [`BodyStream`]; the reader
//! waits for the body consumer to accept each chunk before reading on, so a
//! slow consumer holds back the connection instead of growing a buffer.
//!
//! A packet with a streamed body must have its body read concurrently, or
//! dropped, before the next packet can be decoded.
//!
//! [`BodyStream`]: crate::body::BodyStream

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{PacketError, Result};
use crate::protocol::{DecodeOutput, DecoderConfig, Packet, PacketDecoder, Registry};

/// Default read buffer size.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Configuration for the reader.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Bytes requested per read.
    pub read_buffer_size: usize,
    /// Channel capacity for decoded packets.
    pub channel_capacity: usize,
    /// Decoder settings.
    pub decoder: DecoderConfig,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            decoder: DecoderConfig::default(),
        }
    }
}

/// Decodes packets from an async byte source.
pub struct PacketReader<R> {
    reader: R,
    decoder: PacketDecoder,
    buf: Vec<u8>,
    done: bool,
}

impl<R> PacketReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Create a reader with default settings.
    pub fn new(reader: R, registry: Arc<Registry>) -> Self {
        Self::with_config(reader, registry, ReaderConfig::default())
    }

    /// Create a reader with custom settings.
    pub fn with_config(reader: R, registry: Arc<Registry>, config: ReaderConfig) -> Self {
        Self {
            reader,
            decoder: PacketDecoder::with_config(registry, config.decoder),
            buf: vec![0u8; config.read_buffer_size.max(1)],
            done: false,
        }
    }

    /// Get the next packet or fault.
    ///
    /// Returns `None` once the source has ended and every packet has been
    /// returned. A source ending mid-packet yields `Err(Disconnected)` first.
    pub async fn next(&mut self) -> Option<Result<Packet>> {
        loop {
            match self.decoder.decode() {
                DecodeOutput::Packet(packet) => return Some(Ok(packet)),
                DecodeOutput::Fault(err) => {
                    tracing::warn!("Protocol fault: {}", err);
                    return Some(Err(err));
                }
                DecodeOutput::BodyWrite(write) => {
                    write.complete().await;
                    continue;
                }
                DecodeOutput::NeedMoreInput => {}
            }

            if self.done {
                return None;
            }

            let n = match self.reader.read(&mut self.buf).await {
                Ok(n) => n,
                Err(e) => {
                    self.done = true;
                    // Close any body still filling; the read error is reported instead.
                    let _ = self.decoder.finish();
                    return Some(Err(PacketError::Io(e)));
                }
            };

            if n == 0 {
                // Source closed
                self.done = true;
                if let Err(err) = self.decoder.finish() {
                    tracing::warn!("Protocol fault: {}", err);
                    return Some(Err(err));
                }
                return None;
            }

            tracing::trace!(bytes = n, "Read chunk");
            self.decoder.extend(&self.buf[..n]);
        }
    }

    /// Get a reference to the underlying reader.
    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    /// Unwrap the underlying reader. Buffered input is discarded.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Spawn a reader task that forwards packets and faults on a channel.
///
/// Recoverable faults are forwarded in order with the packets. An I/O error
/// ends the task and is returned from its `JoinHandle`. The task also ends
/// when the receiver is dropped.
pub fn spawn_reader_task<R>(
    reader: R,
    registry: Arc<Registry>,
    config: ReaderConfig,
) -> (mpsc::Receiver<Result<Packet>>, JoinHandle<Result<()>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let task = tokio::spawn(reader_loop(
        PacketReader::with_config(reader, registry, config),
        tx,
    ));
    (rx, task)
}

/// Main reader loop - drains the reader into the channel.
async fn reader_loop<R>(
    mut reader: PacketReader<R>,
    tx: mpsc::Sender<Result<Packet>>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    while let Some(item) = reader.next().await {
        if let Err(err) = &item {
            if !err.is_recoverable() {
                tracing::error!("Read loop error: {}", err);
                return item.map(|_| ());
            }
        }

        if tx.send(item).await.is_err() {
            tracing::debug!("Packet receiver dropped, stopping reader");
            return Ok(());
        }
    }

    // Connection closed
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Body;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{duplex, AsyncWriteExt, ReadBuf};

    /// Yields `data` once, then fails every read.
    struct FailAfter {
        data: Option<&'static [u8]>,
    }

    impl AsyncRead for FailAfter {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.data.take() {
                Some(data) => {
                    buf.put_slice(data);
                    Poll::Ready(Ok(()))
                }
                None => Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "reset",
                ))),
            }
        }
    }

    fn registry() -> Arc<Registry> {
        Registry::shared_default()
    }

    #[test]
    fn test_reader_config_default() {
        let config = ReaderConfig::default();
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert!(config.decoder.max_packet_size.is_none());
    }

    #[tokio::test]
    async fn test_reads_packets_until_eof() {
        let input: &[u8] = b"\0RES\0\0\0\x06\0\0\0\0OK\n";
        let mut reader = PacketReader::new(input, registry());

        let noop = reader.next().await.unwrap().unwrap();
        assert_eq!(noop.type_name(), "NOOP");
        let ok = reader.next().await.unwrap().unwrap();
        assert_eq!(ok.type_name(), "ok");
        assert!(reader.next().await.is_none());
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_packet_reports_disconnect() {
        let input: &[u8] = b"\0REQ\0\0\0\x01\0\0\0\x05re";
        let mut reader = PacketReader::new(input, registry());

        let result = reader.next().await.unwrap();
        assert!(matches!(result, Err(PacketError::Disconnected)));
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn test_read_error_ends_open_body() {
        let source = FailAfter {
            data: Some(b"\0RES\0\0\0\x1c\0\0\0\x08H:1\0te"),
        };
        let mut reader = PacketReader::new(source, registry());

        let mut packet = reader.next().await.unwrap().unwrap();
        assert_eq!(packet.type_name(), "WORK_DATA");
        let Some(Body::Stream(body)) = packet.take_body() else {
            panic!("expected a streamed body");
        };
        let body = tokio::spawn(body.to_bytes());

        let result = reader.next().await.unwrap();
        assert!(matches!(result, Err(PacketError::Io(_))));
        assert!(reader.next().await.is_none());

        let result = body.await.unwrap();
        assert!(matches!(
            result,
            Err(PacketError::BodyLengthMismatch {
                expected: 4,
                actual: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_small_read_buffer() {
        let input: &[u8] = b"\0REQ\0\0\0\x0c\0\0\0\x07H:1\x002\x005";
        let config = ReaderConfig {
            read_buffer_size: 3,
            ..Default::default()
        };
        let mut reader = PacketReader::with_config(input, registry(), config);

        let packet = reader.next().await.unwrap().unwrap();
        assert_eq!(packet.type_name(), "WORK_STATUS");
        assert_eq!(packet.arg("total"), Some("5"));
    }

    #[tokio::test]
    async fn test_streamed_body_through_reader() {
        let (mut client, server) = duplex(64);
        let (mut rx, task) = spawn_reader_task(server, registry(), ReaderConfig::default());

        client
            .write_all(b"\0RES\0\0\0\x1c\0\0\0\x08H:1\0")
            .await
            .unwrap();

        let mut packet = rx.recv().await.unwrap().unwrap();
        assert_eq!(packet.type_name(), "WORK_DATA");
        let Some(Body::Stream(body)) = packet.take_body() else {
            panic!("expected a streamed body");
        };
        let body = tokio::spawn(body.to_bytes());

        client.write_all(b"te").await.unwrap();
        client.write_all(b"st").await.unwrap();
        assert_eq!(&body.await.unwrap().unwrap()[..], b"test");

        drop(client);
        assert!(rx.recv().await.is_none());
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_reader_task_forwards_faults() {
        let (mut client, server) = duplex(256);
        let (mut rx, task) = spawn_reader_task(server, registry(), ReaderConfig::default());

        client
            .write_all(b"\0REQ\0\0\0\xff\0\0\0\x02xy\0RES\0\0\0\x0a\0\0\0\0")
            .await
            .unwrap();
        drop(client);

        let fault = rx.recv().await.unwrap();
        assert!(matches!(fault, Err(PacketError::UnknownPacketType(_))));
        let packet = rx.recv().await.unwrap().unwrap();
        assert_eq!(packet.type_name(), "NO_JOB");
        assert!(rx.recv().await.is_none());
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_reader_task_stops_when_receiver_dropped() {
        let (mut client, server) = duplex(64);
        let (rx, task) = spawn_reader_task(server, registry(), ReaderConfig::default());
        drop(rx);

        client.write_all(b"OK\n").await.unwrap();
        assert!(task.await.unwrap().is_ok());
    }
}
