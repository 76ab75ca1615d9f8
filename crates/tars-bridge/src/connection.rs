//! A single accepted display connection.
//!
//! Each connection runs as one task that owns its socket halves and its
//! decode buffer, so neither needs locking. Inbound frames are handed to the
//! server's handler in the order their delimiters arrive; outbound frames are
//! queued by the broadcaster and written in the order they were queued.

use bytes::Bytes;
use futures_util::StreamExt;
use tars_protocol::{Envelope, EnvelopeCodec};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::server::InboundHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) struct Connection {
    id: ConnectionId,
    stream: UnixStream,
    outbound: mpsc::UnboundedReceiver<Bytes>,
    handler: Option<InboundHandler>,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        stream: UnixStream,
        outbound: mpsc::UnboundedReceiver<Bytes>,
        handler: Option<InboundHandler>,
    ) -> Self {
        Self {
            id,
            stream,
            outbound,
            handler,
        }
    }

    /// Serve the connection until the peer closes it or it fails.
    ///
    /// A failed write is logged and does not end the connection; the read
    /// side is what decides when the peer is gone.
    pub(crate) async fn serve(self) -> Result<()> {
        let Self {
            id,
            stream,
            mut outbound,
            handler,
        } = self;

        let (read_half, mut write_half) = stream.into_split();
        let mut frames = FramedRead::new(read_half, EnvelopeCodec::new());

        loop {
            tokio::select! {
                frame = frames.next() => match frame {
                    Some(Ok(Envelope::Input(msg))) => {
                        debug!("[{}] Received input from display", id);
                        if let Some(handler) = &handler {
                            handler(msg.text);
                        }
                    }
                    Some(Ok(Envelope::Message(msg))) => {
                        trace!("[{}] Ignoring message envelope from display: {}", id, msg.text);
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                },
                Some(frame) = outbound.recv() => {
                    if let Err(e) = write_half.write_all(&frame).await {
                        warn!("[{}] Failed to send to display: {}", id, e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn recording_handler() -> (InboundHandler, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: InboundHandler = Arc::new(move |text| sink.lock().unwrap().push(text));
        (handler, seen)
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
        assert_eq!(a, a);
        assert_eq!(a.to_string().len(), 36);
    }

    #[tokio::test]
    async fn test_serve_delivers_inputs_in_order() {
        let (mut peer, server_side) = UnixStream::pair().unwrap();
        let (_tx, rx) = mpsc::unbounded_channel();
        let (handler, seen) = recording_handler();

        let task = tokio::spawn(
            Connection::new(ConnectionId::new(), server_side, rx, Some(handler)).serve(),
        );

        peer.write_all(b"{\"type\":\"input\",\"text\":\"one\"}\n{\"type\":\"in")
            .await
            .unwrap();
        peer.write_all(b"put\",\"text\":\"two\"}\nbroken\n{\"type\":\"message\",\"text\":\"x\",\"timestamp\":1}\n")
            .await
            .unwrap();
        peer.write_all(b"{\"type\":\"input\",\"text\":\"three\"}\n")
            .await
            .unwrap();
        drop(peer);

        task.await.unwrap().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_serve_without_handler_still_decodes() {
        let (mut peer, server_side) = UnixStream::pair().unwrap();
        let (_tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(Connection::new(ConnectionId::new(), server_side, rx, None).serve());

        peer.write_all(b"{\"type\":\"input\",\"text\":\"nobody listens\"}\n")
            .await
            .unwrap();
        drop(peer);

        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_serve_writes_queued_frames() {
        let (peer, server_side) = UnixStream::pair().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(Connection::new(ConnectionId::new(), server_side, rx, None).serve());

        tx.send(Bytes::from_static(b"first\n")).unwrap();
        tx.send(Bytes::from_static(b"second\n")).unwrap();

        let mut lines = BufReader::new(peer).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "first");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "second");

        drop(lines);
        task.await.unwrap().unwrap();
    }
}
