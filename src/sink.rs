//! Channel-backed byte sink feeding an HTTP response body.
//!
//! [`ResponseSink`] implements `AsyncWrite + Unpin` so the ZIP writer can
//! target it directly. Every write becomes one [`Bytes`] chunk on a bounded
//! `mpsc` channel whose receiving half is the response body stream:
//!
//! - A slow client fills the channel and `poll_write` stays pending until a
//!   slot frees up, which slows archive production down (backpressure).
//! - A dropped body (client disconnect) closes the channel and the next write
//!   fails with `BrokenPipe`.
//! - `poll_shutdown` closes the sender, which ends the body cleanly.
//! - [`SinkHandle::fail`] pushes an error item so the body terminates
//!   abnormally instead of looking like a complete, truncated archive.

use crate::error::ZipStreamError;
use bytes::Bytes;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::PollSender;

/// One item of the response body
pub type BodyChunk = io::Result<Bytes>;

/// Receiving half, usable with `axum::body::Body::from_stream`
pub type BodyStream = ReceiverStream<BodyChunk>;

/// Default number of chunks buffered between producer and client
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Writable end of a response body
pub struct ResponseSink {
    tx: PollSender<BodyChunk>,
    bytes_sent: u64,
}

/// Out-of-band control over the response body: failure signal and closure probe
#[derive(Clone)]
pub struct SinkHandle {
    tx: mpsc::Sender<BodyChunk>,
}

impl ResponseSink {
    /// Create a sink, its control handle and the body stream it feeds
    pub fn channel(capacity: usize) -> (ResponseSink, SinkHandle, BodyStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = ResponseSink {
            tx: PollSender::new(tx.clone()),
            bytes_sent: 0,
        };
        (sink, SinkHandle { tx }, ReceiverStream::new(rx))
    }

    /// Bytes accepted by the channel so far
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "response body receiver dropped")
}

impl AsyncWrite for ResponseSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        // Pending here is the backpressure point
        if ready!(self.tx.poll_reserve(cx)).is_err() {
            return Poll::Ready(Err(closed_error()));
        }
        if self
            .tx
            .send_item(Ok(Bytes::copy_from_slice(buf)))
            .is_err()
        {
            return Poll::Ready(Err(closed_error()));
        }

        self.bytes_sent += buf.len() as u64;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Every accepted write is already on the channel
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.tx.close();
        Poll::Ready(Ok(()))
    }
}

impl SinkHandle {
    /// Terminate the body with an error item.
    ///
    /// Returns `false` when the receiver is already gone.
    pub async fn fail(&self, err: &ZipStreamError) -> bool {
        self.tx
            .send(Err(io::Error::other(err.to_string())))
            .await
            .is_ok()
    }

    /// True once the body stream has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves when the body stream is dropped
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}
