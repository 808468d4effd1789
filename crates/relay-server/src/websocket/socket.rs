//! Socket abstraction written to by [`crate::session::SessionManager`].
//!
//! The session registry never touches an Axum `WebSocket` directly. Each
//! connection task owns the real socket and drains an [`OutboundQueue`]; the
//! registry holds the matching [`ChannelSocket`] and only enqueues.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use relay_core::{ConnectionId, TransportError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// Write side of one client connection.
pub trait SessionSocket: Send + Sync {
    /// Stable identity of the underlying connection.
    fn connection_id(&self) -> &ConnectionId;

    /// Whether frames can still be written.
    fn is_open(&self) -> bool;

    /// Queue a text frame.
    fn send_text(&self, text: Arc<String>) -> Result<(), TransportError>;

    /// Ask the connection to close with a WebSocket close code.
    fn close(&self, code: u16, reason: &str) -> Result<(), TransportError>;
}

/// Frame handed to the connection's writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Serialized JSON envelope.
    Text(Arc<String>),
    /// Close handshake; always the last frame.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Human-readable reason.
        reason: String,
    },
}

struct CloseSignal {
    token: CancellationToken,
    request: Mutex<Option<(u16, String)>>,
}

/// [`SessionSocket`] backed by a bounded mpsc queue.
pub struct ChannelSocket {
    id: ConnectionId,
    tx: mpsc::Sender<Arc<String>>,
    close: Arc<CloseSignal>,
    dropped_frames: AtomicU64,
}

/// Reader half of a [`ChannelSocket`], owned by the connection task.
pub struct OutboundQueue {
    rx: mpsc::Receiver<Arc<String>>,
    close: Arc<CloseSignal>,
    finished: bool,
}

/// Create a socket and its outbound queue with room for `capacity` frames.
pub fn channel_socket(id: ConnectionId, capacity: usize) -> (Arc<ChannelSocket>, OutboundQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let close = Arc::new(CloseSignal {
        token: CancellationToken::new(),
        request: Mutex::new(None),
    });
    let socket = Arc::new(ChannelSocket {
        id,
        tx,
        close: close.clone(),
        dropped_frames: AtomicU64::new(0),
    });
    let queue = OutboundQueue {
        rx,
        close,
        finished: false,
    };
    (socket, queue)
}

impl ChannelSocket {
    /// Frames dropped because the queue was full.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}

impl SessionSocket for ChannelSocket {
    fn connection_id(&self) -> &ConnectionId {
        &self.id
    }

    fn is_open(&self) -> bool {
        !self.close.token.is_cancelled() && !self.tx.is_closed()
    }

    fn send_text(&self, text: Arc<String>) -> Result<(), TransportError> {
        if self.close.token.is_cancelled() {
            return Err(TransportError::Closed);
        }
        match self.tx.try_send(text) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }

    fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        *self.close.request.lock() = Some((code, reason.to_owned()));
        self.close.token.cancel();
        Ok(())
    }
}

impl OutboundQueue {
    /// Next frame to write, or `None` once the queue is finished.
    ///
    /// Text frames already queued are delivered before a requested close.
    pub async fn next(&mut self) -> Option<OutboundFrame> {
        if self.finished {
            return None;
        }
        tokio::select! {
            biased;
            text = self.rx.recv() => match text {
                Some(text) => Some(OutboundFrame::Text(text)),
                None => {
                    self.finished = true;
                    None
                }
            },
            () = self.close.token.cancelled() => {
                self.finished = true;
                self.rx.close();
                let (code, reason) = self
                    .close
                    .request
                    .lock()
                    .take()
                    .unwrap_or((1000, String::new()));
                Some(OutboundFrame::Close { code, reason })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn make_socket(capacity: usize) -> (Arc<ChannelSocket>, OutboundQueue) {
        channel_socket(ConnectionId::from("conn_test"), capacity)
    }

    #[tokio::test]
    async fn frames_arrive_in_order() {
        let (socket, mut queue) = make_socket(8);
        for i in 0..3 {
            socket.send_text(Arc::new(format!("m{i}"))).unwrap();
        }
        for i in 0..3 {
            assert_eq!(queue.next().await, Some(OutboundFrame::Text(Arc::new(format!("m{i}")))));
        }
    }

    #[tokio::test]
    async fn full_queue_is_not_fatal() {
        let (socket, _queue) = make_socket(1);
        socket.send_text(Arc::new("a".into())).unwrap();
        let err = socket.send_text(Arc::new("b".into())).unwrap_err();
        assert_matches!(err, TransportError::QueueFull);
        assert!(!err.is_fatal());
        assert_eq!(socket.dropped_frames(), 1);
        assert!(socket.is_open());
    }

    #[tokio::test]
    async fn dropped_queue_closes_socket() {
        let (socket, queue) = make_socket(4);
        drop(queue);
        assert!(!socket.is_open());
        assert_matches!(socket.send_text(Arc::new("x".into())), Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn close_drains_pending_text_first() {
        let (socket, mut queue) = make_socket(4);
        socket.send_text(Arc::new("last words".into())).unwrap();
        socket.close(4000, "idle timeout").unwrap();

        assert!(!socket.is_open());
        assert_matches!(queue.next().await, Some(OutboundFrame::Text(t)) if *t == "last words");
        assert_eq!(
            queue.next().await,
            Some(OutboundFrame::Close {
                code: 4000,
                reason: "idle timeout".into()
            })
        );
        assert_eq!(queue.next().await, None);
    }

    #[tokio::test]
    async fn writes_after_close_are_rejected() {
        let (socket, _queue) = make_socket(4);
        socket.close(1000, "bye").unwrap();
        assert_matches!(socket.send_text(Arc::new("x".into())), Err(TransportError::Closed));
        assert_matches!(socket.close(1000, "again"), Err(TransportError::Closed));
    }
}
