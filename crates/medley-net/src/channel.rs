//! Length-prefixed message channel over an ordered byte stream.
//!
//! Every frame is a 4-byte big-endian length followed by a postcard-encoded
//! [`MedleyMessage`]. The read half buffers partial frames, so
//! [`FrameReader::recv`] can be cancelled (e.g. inside `tokio::select!`)
//! without losing bytes.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::NetError;
use crate::message::MedleyMessage;

/// Maximum frame payload: 16 MB. Entry batches are bounded by the sync
/// batch size, so this only trips on garbage input.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// Any ordered, reliable byte stream a peer connection can run on.
pub trait PeerStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> PeerStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Receiving half of a [`Channel`].
pub struct FrameReader {
    inner: Box<dyn AsyncRead + Send + Unpin>,
    buf: BytesMut,
}

impl FrameReader {
    pub fn new(inner: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            inner: Box::new(inner),
            buf: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Receive the next message.
    ///
    /// Returns `Ok(None)` when the peer closed the stream between frames.
    /// Cancel-safe: a partially received frame stays buffered.
    pub async fn recv(&mut self) -> Result<Option<MedleyMessage>, NetError> {
        loop {
            if let Some(message) = self.decode()? {
                return Ok(Some(message));
            }
            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(NetError::StreamClosed)
                };
            }
        }
    }

    /// Receive the next message, treating end of stream as an error.
    pub async fn expect(&mut self) -> Result<MedleyMessage, NetError> {
        self.recv().await?.ok_or(NetError::StreamClosed)
    }

    fn decode(&mut self) -> Result<Option<MedleyMessage>, NetError> {
        if self.buf.len() < LEN_PREFIX {
            return Ok(None);
        }
        let mut len_buf = [0u8; LEN_PREFIX];
        len_buf.copy_from_slice(&self.buf[..LEN_PREFIX]);
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(NetError::MessageTooLarge {
                len,
                max: MAX_MESSAGE_SIZE,
            });
        }
        if self.buf.len() < LEN_PREFIX + len {
            self.buf.reserve(LEN_PREFIX + len - self.buf.len());
            return Ok(None);
        }
        self.buf.advance(LEN_PREFIX);
        let payload = self.buf.split_to(len);
        let message: MedleyMessage = postcard::from_bytes(&payload)?;
        trace!(kind = message.kind(), len, "received frame");
        Ok(Some(message))
    }
}

/// Sending half of a [`Channel`].
pub struct FrameWriter {
    inner: Box<dyn AsyncWrite + Send + Unpin>,
}

impl FrameWriter {
    pub fn new(inner: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }

    /// Send one message as a single frame and flush it.
    pub async fn send(&mut self, message: &MedleyMessage) -> Result<(), NetError> {
        let payload = postcard::to_allocvec(message)?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(NetError::MessageTooLarge {
                len: payload.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let mut frame = Vec::with_capacity(LEN_PREFIX + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        trace!(kind = message.kind(), len = payload.len(), "sent frame");
        Ok(())
    }

    /// Close the write direction.
    pub async fn shutdown(&mut self) -> Result<(), NetError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// A bidirectional message channel to one peer.
pub struct Channel {
    reader: FrameReader,
    writer: FrameWriter,
    peer: String,
}

impl Channel {
    /// Wrap a connected stream. `peer` is a label for log lines.
    pub fn new(stream: impl PeerStream, peer: impl Into<String>) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            reader: FrameReader::new(read),
            writer: FrameWriter::new(write),
            peer: peer.into(),
        }
    }

    /// Two channels connected to each other through an in-memory pipe.
    pub fn memory_pair() -> (Channel, Channel) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (Channel::new(a, "memory-a"), Channel::new(b, "memory-b"))
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub async fn send(&mut self, message: &MedleyMessage) -> Result<(), NetError> {
        self.writer.send(message).await
    }

    pub async fn recv(&mut self) -> Result<Option<MedleyMessage>, NetError> {
        self.reader.recv().await
    }

    /// Receive a message, treating end of stream as an error.
    pub async fn expect(&mut self) -> Result<MedleyMessage, NetError> {
        self.reader.expect().await
    }

    pub fn reader_mut(&mut self) -> &mut FrameReader {
        &mut self.reader
    }

    pub fn writer_mut(&mut self) -> &mut FrameWriter {
        &mut self.writer
    }

    /// Borrow both halves at once so they can be driven concurrently.
    pub fn halves(&mut self) -> (&mut FrameReader, &mut FrameWriter) {
        (&mut self.reader, &mut self.writer)
    }

    /// Split into owned halves.
    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        (self.reader, self.writer)
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("peer", &self.peer).finish()
    }
}
