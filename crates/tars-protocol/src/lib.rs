//! Wire protocol for the TARS channel socket.
//!
//! This crate provides the envelope types, the newline-delimited JSON codec,
//! and a peer-side client for talking to the bridge over a Unix socket.
//!
//! # Architecture
//!
//! - [`protocol`]: envelope types (`InboundMessage`, `OutboundMessage`, `Envelope`)
//! - [`transport`]: newline-delimited codec for message framing
//! - [`client`]: peer client used by display processes and the `tars` CLI
//!
//! # Example
//!
//! ```no_run
//! use tars_protocol::BridgeClient;
//!
//! # async fn example() -> Result<(), tars_protocol::ClientError> {
//! let mut client = BridgeClient::connect().await?;
//! client.send_input("what time is it?").await?;
//!
//! let reply = client.next_message().await?;
//! println!("{} (at {})", reply.text, reply.timestamp);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod protocol;
pub mod transport;

pub use client::{
    BridgeClient, ClientError, InputSender, MessageReceiver, SOCKET_NAME, socket_path,
};
pub use protocol::{Envelope, InboundMessage, OutboundMessage, now_millis};
pub use transport::{CodecError, EnvelopeCodec, MAX_LINE_LENGTH, encode_line, parse_line};
