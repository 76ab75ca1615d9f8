//! Peer-side client for the TARS channel socket.
//!
//! This is what a display process does: connect, send `input` envelopes, and
//! read the `message` envelopes the bridge broadcasts.

use std::path::{Path, PathBuf};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;
use tracing::trace;

use crate::protocol::{Envelope, InboundMessage, OutboundMessage};
use crate::transport::{CodecError, EnvelopeCodec};

/// File name of the channel socket.
pub const SOCKET_NAME: &str = "tars-channel.sock";

/// Get the default socket path for the TARS channel.
///
/// Lives in the system temp directory rather than `$XDG_RUNTIME_DIR`: the
/// display usually runs as a different user and cannot enter another user's
/// runtime directory.
#[must_use]
pub fn socket_path() -> PathBuf {
    std::env::temp_dir().join(SOCKET_NAME)
}

/// Errors that can occur with the bridge client
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Connection closed")]
    ConnectionClosed,
}

type FramedSocket = Framed<UnixStream, EnvelopeCodec>;

/// Connection from a display peer to the bridge
#[derive(Debug)]
pub struct BridgeClient {
    framed: FramedSocket,
}

impl BridgeClient {
    /// Connect to the bridge at the default socket path.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Io` if the socket connection fails.
    pub async fn connect() -> Result<Self, ClientError> {
        Self::connect_to(socket_path()).await
    }

    /// Connect to the bridge at a custom socket path.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Io` if the socket connection fails.
    pub async fn connect_to(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path.as_ref()).await?;
        Ok(Self {
            framed: Framed::new(stream, EnvelopeCodec::new()),
        })
    }

    /// Send one `input` envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be written.
    pub async fn send_input(&mut self, text: impl Into<String>) -> Result<(), ClientError> {
        self.framed
            .send(Envelope::Input(InboundMessage::new(text)))
            .await?;
        Ok(())
    }

    /// Wait for the next `message` envelope from the bridge.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ConnectionClosed` when the bridge hangs up.
    pub async fn next_message(&mut self) -> Result<OutboundMessage, ClientError> {
        next_outbound(&mut self.framed).await
    }

    /// Split into independently usable send and receive halves.
    #[must_use]
    pub fn into_split(self) -> (InputSender, MessageReceiver) {
        let (sink, stream) = self.framed.split();
        (InputSender { sink }, MessageReceiver { stream })
    }
}

/// Sending half of a [`BridgeClient`]
pub struct InputSender {
    sink: SplitSink<FramedSocket, Envelope>,
}

impl InputSender {
    /// Send one `input` envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be written.
    pub async fn send_input(&mut self, text: impl Into<String>) -> Result<(), ClientError> {
        self.sink
            .send(Envelope::Input(InboundMessage::new(text)))
            .await?;
        Ok(())
    }
}

/// Receiving half of a [`BridgeClient`]
pub struct MessageReceiver {
    stream: SplitStream<FramedSocket>,
}

impl MessageReceiver {
    /// Wait for the next `message` envelope from the bridge.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ConnectionClosed` when the bridge hangs up.
    pub async fn next_message(&mut self) -> Result<OutboundMessage, ClientError> {
        next_outbound(&mut self.stream).await
    }
}

async fn next_outbound<S>(stream: &mut S) -> Result<OutboundMessage, ClientError>
where
    S: futures_util::Stream<Item = Result<Envelope, CodecError>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        match frame? {
            Envelope::Message(msg) => return Ok(msg),
            Envelope::Input(msg) => trace!("Ignoring input envelope from bridge: {}", msg.text),
        }
    }
    Err(ClientError::ConnectionClosed)
}
