//! Host-facing channel adapter.
//!
//! A host messaging process sees the bridge as a chat channel with a single
//! account. [`ChannelAccount`] is the per-account lifecycle handle: it owns
//! the [`TarsServer`], routes display input into the host's delivery hook,
//! and tracks the runtime status the host reports.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tars_protocol::now_millis;
use tracing::{debug, error, info};

use crate::config::ChannelConfig;
use crate::error::{BridgeError, Result};
use crate::server::{ServerOptions, TarsServer};

pub const CHANNEL_ID: &str = "tars-channel";
pub const DEFAULT_ACCOUNT_ID: &str = "default";

/// Largest text the host should hand to a single `send_text` call.
pub const TEXT_CHUNK_LIMIT: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    Direct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingDefaults {
    pub min_chars: usize,
    pub idle_ms: u64,
}

/// What the channel supports, as advertised to the host.
#[allow(clippy::struct_excessive_bools)] // Flat capability flags the host reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelCapabilities {
    pub chat_types: &'static [&'static str],
    pub polls: bool,
    pub reactions: bool,
    pub threads: bool,
    pub media: bool,
    pub native_commands: bool,
    pub delivery_mode: DeliveryMode,
    pub text_chunk_limit: usize,
    pub block_streaming: StreamingDefaults,
}

impl ChannelCapabilities {
    #[must_use]
    pub const fn tars() -> Self {
        Self {
            chat_types: &["direct"],
            polls: false,
            reactions: false,
            threads: false,
            media: false,
            native_commands: false,
            delivery_mode: DeliveryMode::Direct,
            text_chunk_limit: TEXT_CHUNK_LIMIT,
            block_streaming: StreamingDefaults {
                min_chars: 100,
                idle_ms: 500,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAccount {
    pub account_id: String,
    pub enabled: bool,
    pub config: ChannelConfig,
}

impl ResolvedAccount {
    #[must_use]
    pub fn resolve(config: &ChannelConfig) -> Self {
        Self {
            account_id: DEFAULT_ACCOUNT_ID.to_string(),
            enabled: config.enabled,
            config: config.clone(),
        }
    }
}

/// Runtime status of one account, timestamps in Unix milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStatus {
    pub running: bool,
    pub last_start_at: Option<i64>,
    pub last_stop_at: Option<i64>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub account_id: String,
    pub enabled: bool,
    pub configured: bool,
    pub connected_clients: usize,
    #[serde(flatten)]
    pub runtime: RuntimeStatus,
}

/// Result of an outbound `send_text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundReceipt {
    pub channel: &'static str,
    pub message_id: String,
    pub delivered_to: usize,
}

/// Static channel descriptor.
pub struct TarsChannel;

impl TarsChannel {
    #[must_use]
    pub const fn capabilities() -> ChannelCapabilities {
        ChannelCapabilities::tars()
    }

    #[must_use]
    pub fn list_account_ids() -> Vec<String> {
        vec![DEFAULT_ACCOUNT_ID.to_string()]
    }

    #[must_use]
    pub fn resolve_account(config: &ChannelConfig) -> ResolvedAccount {
        ResolvedAccount::resolve(config)
    }

    /// Build the account handle and start its bridge.
    ///
    /// `deliver` is the host hook that pushes display input into the
    /// conversation pipeline.
    ///
    /// # Errors
    ///
    /// Returns the error from [`ChannelAccount::start`].
    pub async fn start_account<F>(account: ResolvedAccount, deliver: F) -> Result<ChannelAccount>
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let handle = ChannelAccount::new(account, deliver);
        handle.start().await?;
        Ok(handle)
    }
}

/// Per-account lifecycle handle owned by the host.
#[derive(Debug)]
pub struct ChannelAccount {
    account: ResolvedAccount,
    server: TarsServer,
    status: Mutex<RuntimeStatus>,
}

impl ChannelAccount {
    pub fn new<F>(account: ResolvedAccount, deliver: F) -> Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let account_id = account.account_id.clone();
        let options = ServerOptions::new()
            .socket_path(account.config.resolved_socket_path())
            .on_message(move |text| {
                info!("[{}] Received input from display", account_id);
                deliver(text);
            });

        Self {
            account,
            server: TarsServer::new(options),
            status: Mutex::new(RuntimeStatus::default()),
        }
    }

    #[must_use]
    pub fn account(&self) -> &ResolvedAccount {
        &self.account
    }

    #[must_use]
    pub fn server(&self) -> &TarsServer {
        &self.server
    }

    /// Start the bridge for this account.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::AccountDisabled` for a disabled account, or the
    /// server's bind error. Failures are also recorded as `last_error`.
    pub async fn start(&self) -> Result<()> {
        info!("[{}] Starting TARS channel", self.account.account_id);

        let result = if self.account.enabled {
            self.server.start().await
        } else {
            Err(BridgeError::AccountDisabled(self.account.account_id.clone()))
        };

        let mut status = self.status();
        match &result {
            Ok(()) => {
                status.running = true;
                status.last_start_at = Some(now_millis());
                status.last_error = None;
            }
            Err(e) => {
                error!("[{}] Failed to start: {}", self.account.account_id, e);
                status.last_error = Some(e.to_string());
            }
        }
        result
    }

    /// Stop the bridge. Safe to call when it is not running.
    pub async fn stop(&self) {
        info!("[{}] Stopping TARS channel", self.account.account_id);
        self.server.stop().await;

        let mut status = self.status();
        if status.running {
            status.running = false;
            status.last_stop_at = Some(now_millis());
        }
    }

    /// Broadcast host output to every connected display.
    pub fn send_text(&self, to: &str, text: &str) -> OutboundReceipt {
        let delivered_to = self.server.send_message(text);
        debug!(
            "[{}] Sent to {} ({} display(s))",
            self.account.account_id, to, delivered_to
        );

        OutboundReceipt {
            channel: CHANNEL_ID,
            message_id: format!("{CHANNEL_ID}-{}", now_millis()),
            delivered_to,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            account_id: self.account.account_id.clone(),
            enabled: self.account.enabled,
            configured: true,
            connected_clients: self.server.client_count(),
            runtime: self.status().clone(),
        }
    }

    fn status(&self) -> MutexGuard<'_, RuntimeStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
