//! # Peer Links
//!
//! One end of a WebSocket connection to another node. A link is split in
//! two on start:
//!
//! - a [`PeerHandle`], the cloneable sending side, which pushes frames into
//!   a bounded queue without ever waiting;
//! - a [`PeerReader`], which yields decoded [`PeerMessage`]s until the
//!   connection ends.
//!
//! A writer task drains the queue into the socket. It stops when the socket
//! errors or when every handle has been dropped, and closes the socket on
//! the way out.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace};

use super::message::PeerMessage;

/// Process-local numeric label for a link. Only used for bookkeeping and
/// logs; never sent on the wire.
pub type PeerId = u64;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("outbound queue full")]
    QueueFull,

    #[error("dial timed out after {0:?}")]
    DialTimeout(std::time::Duration),

    #[error("link closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// PeerHandle
// ---------------------------------------------------------------------------

/// Sending side of a link.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: PeerId,
    addr: String,
    outbound: mpsc::Sender<Message>,
}

impl PeerHandle {
    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Queue `frame` for this peer. Never blocks: a full queue returns
    /// [`PeerError::QueueFull`] and the frame is discarded.
    pub fn try_send(&self, frame: Message) -> Result<(), PeerError> {
        self.outbound.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => PeerError::QueueFull,
            TrySendError::Closed(_) => PeerError::Closed,
        })
    }

    pub fn send_message(&self, message: &PeerMessage) -> Result<(), PeerError> {
        self.try_send(message.to_frame()?)
    }

    /// `true` once the writer task has gone away.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// A handle over a bare queue with no writer task behind it.
    #[cfg(test)]
    pub(crate) fn detached(id: PeerId, addr: &str, outbound: mpsc::Sender<Message>) -> Self {
        Self {
            id,
            addr: addr.to_string(),
            outbound,
        }
    }
}

// ---------------------------------------------------------------------------
// PeerReader
// ---------------------------------------------------------------------------

/// Receiving side of a link.
pub struct PeerReader<S> {
    id: PeerId,
    stream: SplitStream<WebSocketStream<S>>,
}

impl<S> PeerReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Next well-formed message, or `None` once the link is finished.
    ///
    /// Text and binary frames are decoded alike. Frames that fail to decode
    /// are skipped. A close frame, a transport error, or the end of the
    /// stream finishes the link.
    pub async fn next_message(&mut self) -> Option<PeerMessage> {
        loop {
            let frame = match self.stream.next().await? {
                Ok(frame) => frame,
                Err(err) => {
                    debug!(peer = self.id, %err, "peer link error");
                    return None;
                }
            };

            let decoded = match &frame {
                Message::Text(text) => PeerMessage::decode(text.as_str()),
                Message::Binary(bytes) => PeerMessage::decode_slice(bytes),
                Message::Close(reason) => {
                    debug!(peer = self.id, ?reason, "peer sent close");
                    return None;
                }
                _ => continue,
            };

            match decoded {
                Ok(message) => {
                    trace!(peer = self.id, kind = message.kind(), "frame received");
                    return Some(message);
                }
                Err(err) => {
                    debug!(peer = self.id, %err, "dropping malformed frame");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// PeerLink
// ---------------------------------------------------------------------------

/// An established WebSocket connection that has not been started yet.
pub struct PeerLink<S> {
    id: PeerId,
    addr: String,
    ws: WebSocketStream<S>,
}

impl<S> PeerLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(id: PeerId, addr: impl Into<String>, ws: WebSocketStream<S>) -> Self {
        Self {
            id,
            addr: addr.into(),
            ws,
        }
    }

    /// Split the connection, spawn its writer task, and hand back both
    /// sides. Must be called from inside a tokio runtime.
    pub fn start(self, queue_capacity: usize) -> (PeerHandle, PeerReader<S>) {
        let (sink, stream) = self.ws.split();
        let (outbound, queue) = mpsc::channel(queue_capacity);

        tokio::spawn(write_loop(self.id, sink, queue));

        let handle = PeerHandle {
            id: self.id,
            addr: self.addr,
            outbound,
        };
        let reader = PeerReader {
            id: self.id,
            stream,
        };
        (handle, reader)
    }
}

async fn write_loop<S>(
    id: PeerId,
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut queue: mpsc::Receiver<Message>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(frame) = queue.recv().await {
        if let Err(err) = sink.send(frame).await {
            debug!(peer = id, %err, "peer write failed");
            break;
        }
    }
    // Dropping the receiver makes every later `try_send` report `Closed`.
    drop(queue);
    let _ = sink.close().await;
    debug!(peer = id, "peer writer stopped");
}
