//! Push-to-pull body adapter.
//!
//! Bridges a body producer to a body consumer through a single-slot
//! channel. The producer's [`BodySink::write`] resolves only once the chunk
//! has been accepted into the slot, so a slow consumer holds the producer
//! back without any unbounded buffering in between.
//!
//! # Example
//!
//! ```
//! use gearman_packet::body_channel;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (sink, stream) = body_channel(4);
//! tokio::spawn(async move {
//!     sink.write("te").await.unwrap();
//!     sink.write("st").await.unwrap();
//! });
//!
//! let body = stream.to_bytes().await.unwrap();
//! assert_eq!(&body[..], b"test");
//! # }
//! ```

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::error::{PacketError, Result};

/// Number of chunks the channel holds before `write` waits.
pub const BODY_SLOT_CAPACITY: usize = 1;

/// Create a body channel for a body of `length` bytes.
pub fn body_channel(length: u64) -> (BodySink, BodyStream) {
    let (tx, rx) = mpsc::channel(BODY_SLOT_CAPACITY);
    (BodySink { tx }, BodyStream::new(rx, Some(length)))
}

/// Create a body channel whose total length is not known up front.
///
/// Such a stream can be read, but the encoder refuses to send it.
pub fn unsized_body_channel() -> (BodySink, BodyStream) {
    let (tx, rx) = mpsc::channel(BODY_SLOT_CAPACITY);
    (BodySink { tx }, BodyStream::new(rx, None))
}

/// Producer half of a body channel.
///
/// Dropping every clone of the sink closes the body.
#[derive(Debug, Clone)]
pub struct BodySink {
    tx: mpsc::Sender<Bytes>,
}

impl BodySink {
    /// Write a chunk, waiting until the consumer has room for it.
    ///
    /// Returns `Err(ConnectionClosed)` if the consumer was dropped.
    pub async fn write(&self, chunk: impl Into<Bytes>) -> Result<()> {
        self.tx
            .send(chunk.into())
            .await
            .map_err(|_| PacketError::ConnectionClosed)
    }

    /// Check if the consumer has been dropped.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Close the body. Equivalent to dropping the sink.
    pub fn close(self) {}
}

/// Result of a non-blocking read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyRead {
    /// A chunk was available.
    Chunk(Bytes),
    /// Nothing buffered yet; the producer is still open.
    Pending,
    /// The producer closed and every chunk has been read.
    Closed,
}

/// Consumer half of a body channel, annotated with the expected length.
#[derive(Debug)]
pub struct BodyStream {
    rx: mpsc::Receiver<Bytes>,
    length: Option<u64>,
    received: u64,
}

impl BodyStream {
    fn new(rx: mpsc::Receiver<Bytes>, length: Option<u64>) -> Self {
        Self {
            rx,
            length,
            received: 0,
        }
    }

    /// A stream that yields `data` once and then ends.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let (tx, rx) = mpsc::channel(BODY_SLOT_CAPACITY);
        let length = data.len() as u64;
        if !data.is_empty() {
            // The slot is empty, so this cannot fail.
            let _ = tx.try_send(data);
        }
        Self::new(rx, Some(length))
    }

    /// Declared total length, if known.
    #[inline]
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// Bytes read from the stream so far.
    #[inline]
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Wait for the next chunk. `None` once the producer has closed.
    pub async fn chunk(&mut self) -> Option<Bytes> {
        let chunk = self.rx.recv().await?;
        self.received += chunk.len() as u64;
        Some(chunk)
    }

    /// Read the next chunk without waiting.
    pub fn try_chunk(&mut self) -> BodyRead {
        match self.rx.try_recv() {
            Ok(chunk) => {
                self.received += chunk.len() as u64;
                BodyRead::Chunk(chunk)
            }
            Err(mpsc::error::TryRecvError::Empty) => BodyRead::Pending,
            Err(mpsc::error::TryRecvError::Disconnected) => BodyRead::Closed,
        }
    }

    /// Read the whole body.
    ///
    /// Fails with `BodyLengthMismatch` if the producer closed after sending
    /// a different number of bytes than declared.
    pub async fn to_bytes(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.length.unwrap_or(0) as usize);
        while let Some(chunk) = self.chunk().await {
            buf.extend_from_slice(&chunk);
        }

        match self.length {
            Some(expected) if expected != self.received => Err(PacketError::BodyLengthMismatch {
                expected,
                actual: self.received,
            }),
            _ => Ok(buf.freeze()),
        }
    }
}
