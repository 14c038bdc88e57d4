//! Message bodies exchanged with the backend and the client
//!
//! A streamed body is a bounded `tokio::sync::mpsc` channel of chunks. The
//! producer blocks on `send` once the channel is full, so a slow consumer
//! slows the producer down.

use crate::error::Result;
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

/// Sending half of a streamed body
pub type BodySender = mpsc::Sender<Result<Bytes>>;

/// A response or request body
#[derive(Debug, Default)]
pub enum Body {
    /// No entity at all (for example a 304 or a HEAD response)
    #[default]
    Empty,
    /// A body that is already fully in memory
    Full(Bytes),
    /// A body whose chunks arrive over a channel
    Streaming(mpsc::Receiver<Result<Bytes>>),
}

impl Body {
    /// Create a body with no entity
    pub fn empty() -> Self {
        Body::Empty
    }

    /// Create a streamed body backed by a channel of `capacity` chunks
    pub fn channel(capacity: usize) -> (BodySender, Body) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Body::Streaming(rx))
    }

    /// Whether the message carries an entity, even a zero-length one
    pub fn has_entity(&self) -> bool {
        !matches!(self, Body::Empty)
    }

    /// Receive the next chunk
    ///
    /// Returns `None` once the body is exhausted. A `Full` body yields its
    /// bytes once.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes>> {
        match self {
            Body::Empty => None,
            Body::Full(bytes) => {
                let bytes = std::mem::take(bytes);
                *self = Body::Empty;
                if bytes.is_empty() {
                    None
                } else {
                    Some(Ok(bytes))
                }
            }
            Body::Streaming(rx) => rx.recv().await,
        }
    }

    /// Read the whole body into memory
    pub async fn collect(mut self) -> Result<Bytes> {
        if let Body::Full(bytes) = self {
            return Ok(bytes);
        }
        let mut buffer = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Full(bytes)
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Body::Full(Bytes::from_static(s.as_bytes()))
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Body::Full(Bytes::from(v))
    }
}
