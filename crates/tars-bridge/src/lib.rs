//! TARS bridge library providing the display socket server.
//!
//! This crate bridges a host messaging process and local display processes
//! over a Unix socket. Displays send `input` envelopes that are handed to the
//! host; host output is broadcast to every connected display as `message`
//! envelopes.

pub mod channel;
pub mod config;
pub(crate) mod connection;
pub mod error;
pub(crate) mod registry;
pub mod server;

pub use channel::{
    AccountSnapshot, CHANNEL_ID, ChannelAccount, ChannelCapabilities, DEFAULT_ACCOUNT_ID,
    OutboundReceipt, ResolvedAccount, RuntimeStatus, TarsChannel,
};
pub use config::{ChannelConfig, ConfigError};
pub use connection::ConnectionId;
pub use error::{BridgeError, Result};
pub use server::{InboundHandler, ServerOptions, ServerState, TarsServer};
