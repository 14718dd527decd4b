//! # Duplex message channel.
//!
//! [`ChannelTransport`] frames [`Message`]s as newline-delimited JSON over any
//! `AsyncRead`/`AsyncWrite` pair: a Unix socket between parent and child, or an
//! in-memory duplex pipe in tests.
//!
//! ```text
//!  parent                                  child
//!  TransportWriter ──► {json}\n ───────►  TransportReader
//!  TransportReader ◄── {json}\n ◄───────  TransportWriter
//! ```
//!
//! The two halves are independent so a session can read and write from separate tasks.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use super::message::Message;
use crate::error::TransportError;

/// Largest accepted frame.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const PAIR_BUFFER: usize = 64 * 1024;

type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Receiving half.
pub struct TransportReader {
    inner: FramedRead<BoxReader, LinesCodec>,
}

/// Sending half.
pub struct TransportWriter {
    inner: FramedWrite<BoxWriter, LinesCodec>,
}

/// Framed duplex channel between two processes.
pub struct ChannelTransport {
    reader: TransportReader,
    writer: TransportWriter,
}

impl ChannelTransport {
    /// Wraps a reader and a writer.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: BoxReader = Box::new(reader);
        let writer: BoxWriter = Box::new(writer);
        Self {
            reader: TransportReader {
                inner: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_FRAME_LEN)),
            },
            writer: TransportWriter {
                inner: FramedWrite::new(writer, LinesCodec::new_with_max_length(MAX_FRAME_LEN)),
            },
        }
    }

    /// Wraps a connected Unix stream.
    pub fn from_unix(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer)
    }

    /// Two connected in-memory endpoints.
    pub fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(PAIR_BUFFER);
        let (a_read, a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);
        (Self::new(a_read, a_write), Self::new(b_read, b_write))
    }

    pub fn split(self) -> (TransportReader, TransportWriter) {
        (self.reader, self.writer)
    }

    pub async fn send(&mut self, msg: &Message) -> Result<(), TransportError> {
        self.writer.send(msg).await
    }

    pub async fn recv(&mut self) -> Option<Result<Message, TransportError>> {
        self.reader.recv().await
    }
}

impl TransportReader {
    /// Next message; `None` once the peer closed its end.
    pub async fn recv(&mut self) -> Option<Result<Message, TransportError>> {
        let line = self.inner.next().await?;
        Some(
            line.map_err(TransportError::from)
                .and_then(|line| serde_json::from_str(&line).map_err(TransportError::from)),
        )
    }
}

impl TransportWriter {
    /// Writes and flushes one message.
    ///
    /// A message over [`MAX_FRAME_LEN`] is rejected with [`TransportError::Oversized`]
    /// and nothing is written; the peer would otherwise drop the whole stream.
    pub async fn send(&mut self, msg: &Message) -> Result<(), TransportError> {
        let line = serde_json::to_string(msg)?;
        if line.len() > MAX_FRAME_LEN {
            return Err(TransportError::Oversized {
                len: line.len(),
                max: MAX_FRAME_LEN,
            });
        }
        self.inner.send(line).await?;
        Ok(())
    }
}
