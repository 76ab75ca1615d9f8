//! Socket server for the TARS bridge.
//!
//! Owns the listening socket and its file on disk, accepts display
//! connections, and broadcasts host output to every connected display.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tars_protocol::{Envelope, OutboundMessage, encode_line, socket_path};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, ConnectionId};
use crate::error::{BridgeError, Result};
use crate::registry::{BroadcastTarget, ConnectionRegistry};

/// Permissions for the socket file: any local user may connect.
const SOCKET_MODE: u32 = 0o666;

/// Callback invoked with the text of each `input` envelope.
pub type InboundHandler = Arc<dyn Fn(String) + Send + Sync>;

type SharedRegistry = Arc<Mutex<ConnectionRegistry>>;

/// Construction options for [`TarsServer`].
#[derive(Clone, Default)]
pub struct ServerOptions {
    /// Socket path; defaults to [`tars_protocol::socket_path`].
    pub socket_path: Option<PathBuf>,
    /// Receives the text of every inbound `input` envelope.
    pub on_message: Option<InboundHandler>,
}

impl ServerOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn on_message<F>(mut self, handler: F) -> Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(handler));
        self
    }
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("socket_path", &self.socket_path)
            .field("on_message", &self.on_message.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Listening,
}

struct Listener {
    accept_task: JoinHandle<()>,
    shutdown: oneshot::Sender<()>,
}

/// Unix socket server bridging the host and display peers.
///
/// `start` and `stop` are serialized by an internal lock, so a server can be
/// shared behind an `Arc` between the task that drives its lifecycle and the
/// tasks that broadcast through it.
pub struct TarsServer {
    socket_path: PathBuf,
    on_message: Option<InboundHandler>,
    registry: SharedRegistry,
    listener: AsyncMutex<Option<Listener>>,
}

impl TarsServer {
    #[must_use]
    pub fn new(options: ServerOptions) -> Self {
        Self {
            socket_path: options.socket_path.unwrap_or_else(socket_path),
            on_message: options.on_message,
            registry: Arc::new(Mutex::new(ConnectionRegistry::new())),
            listener: AsyncMutex::new(None),
        }
    }

    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub async fn state(&self) -> ServerState {
        if self.listener.lock().await.is_some() {
            ServerState::Listening
        } else {
            ServerState::Stopped
        }
    }

    pub async fn is_listening(&self) -> bool {
        self.state().await == ServerState::Listening
    }

    /// Bind the socket and start accepting display connections.
    ///
    /// A socket file left behind by an unclean shutdown is removed first.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::AlreadyListening` if the server is running, or
    /// `BridgeError::Bind` if the socket cannot be bound (another bridge is
    /// live on the path, permission denied, missing parent directory). The
    /// server stays stopped on error.
    pub async fn start(&self) -> Result<()> {
        let mut listener_slot = self.listener.lock().await;
        if listener_slot.is_some() {
            return Err(BridgeError::AlreadyListening(self.socket_path.clone()));
        }

        cleanup_stale_socket(&self.socket_path).await?;

        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| BridgeError::bind(&self.socket_path, e))?;
        info!("Socket server listening on {}", self.socket_path.display());

        set_socket_permissions(&self.socket_path);

        lock(&self.registry).open();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            shutdown_rx,
            self.registry.clone(),
            self.on_message.clone(),
        ));

        *listener_slot = Some(Listener {
            accept_task,
            shutdown: shutdown_tx,
        });

        Ok(())
    }

    /// Disconnect every display, close the socket, and remove the socket file.
    ///
    /// Connections are dropped without flushing. Calling this on a stopped
    /// server does nothing.
    pub async fn stop(&self) {
        let mut listener_slot = self.listener.lock().await;
        let Some(listener) = listener_slot.take() else {
            debug!("Stop requested but server is not listening");
            return;
        };

        let connections = lock(&self.registry).close();
        let count = connections.len();
        for task in connections {
            if let Err(e) = task.await
                && !e.is_cancelled()
            {
                warn!("Connection task failed during shutdown: {}", e);
            }
        }
        debug!("Closed {} display connection(s)", count);

        // The accept task may already be gone if it panicked
        let _ = listener.shutdown.send(());
        if let Err(e) = listener.accept_task.await {
            warn!("Accept task failed during shutdown: {}", e);
        }

        remove_socket_file(&self.socket_path);
        info!("Server stopped");
    }

    /// Broadcast `text` to every connected display.
    ///
    /// The message is serialized once and queued on each connection
    /// independently. Returns how many connections accepted the frame; a
    /// connection that could not is logged and left registered.
    pub fn send_message(&self, text: &str) -> usize {
        let envelope = Envelope::Message(OutboundMessage::new(text));
        let Ok(frame) = encode_line(&envelope)
            .inspect_err(|e| error!("Failed to encode outbound message: {}", e))
        else {
            return 0;
        };

        let targets = lock(&self.registry).targets();
        deliver(&targets, &frame)
    }

    /// Number of currently connected displays.
    #[must_use]
    pub fn client_count(&self) -> usize {
        lock(&self.registry).count()
    }
}

impl fmt::Debug for TarsServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TarsServer")
            .field("socket_path", &self.socket_path)
            .field("has_handler", &self.on_message.is_some())
            .field("clients", &self.client_count())
            .finish_non_exhaustive()
    }
}

impl Drop for TarsServer {
    fn drop(&mut self) {
        let Some(listener) = self.listener.get_mut().take() else {
            return;
        };

        debug!("Server dropped while listening, tearing down");
        lock(&self.registry).close();
        listener.accept_task.abort();
        remove_socket_file(&self.socket_path);
    }
}

fn lock(registry: &Mutex<ConnectionRegistry>) -> MutexGuard<'_, ConnectionRegistry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Queue `frame` on every target, independently of the others.
fn deliver(targets: &[BroadcastTarget], frame: &Bytes) -> usize {
    let mut delivered = 0;
    for target in targets {
        match target.sender.send(frame.clone()) {
            Ok(()) => delivered += 1,
            Err(_) => warn!(
                "[{}] Failed to send to display: connection is closing",
                target.id
            ),
        }
    }
    delivered
}

async fn cleanup_stale_socket(path: &Path) -> Result<()> {
    if std::fs::symlink_metadata(path).is_err() {
        return Ok(());
    }

    match UnixStream::connect(path).await {
        Ok(_) => {
            return Err(BridgeError::bind(
                path,
                io::Error::new(
                    io::ErrorKind::AddrInUse,
                    "another bridge is already listening",
                ),
            ));
        }
        Err(e) if is_stale(&e) => {}
        // A live listener with a full backlog also fails to connect
        Err(e) => return Err(BridgeError::bind(path, e)),
    }

    info!("Removing stale socket at {}", path.display());
    if let Err(e) = std::fs::remove_file(path) {
        // Bind will report the real problem
        warn!("Failed to remove stale socket {}: {}", path.display(), e);
    }
    Ok(())
}

/// Whether a failed connect proves nobody is listening on the path.
fn is_stale(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
    )
}

fn set_socket_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE)) {
        warn!(
            "Failed to set permissions on {}: {} (displays running as other users cannot connect)",
            path.display(),
            e
        );
    }
}

fn remove_socket_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed socket file {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove socket file {}: {}", path.display(), e),
    }
}

async fn accept_loop(
    listener: UnixListener,
    mut shutdown: oneshot::Receiver<()>,
    registry: SharedRegistry,
    handler: Option<InboundHandler>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => spawn_connection(stream, &registry, handler.clone()),
                Err(e) => error!("Accept error: {}", e),
            },
        }
    }

    drop(listener);
    debug!("Listener closed");
}

/// Registry entry owned by a connection task.
///
/// Removal happens on drop so a panicking handler or an aborted task still
/// leaves the registry.
struct Membership {
    id: ConnectionId,
    registry: SharedRegistry,
}

impl Drop for Membership {
    fn drop(&mut self) {
        if lock(&self.registry).remove(&self.id) {
            info!("[{}] Display disconnected", self.id);
        }
    }
}

fn spawn_connection(stream: UnixStream, registry: &SharedRegistry, handler: Option<InboundHandler>) {
    // Held across the spawn so the entry exists before the task can remove it
    let mut guard = lock(registry);
    if !guard.is_accepting() {
        debug!("Dropping connection accepted during shutdown");
        return;
    }

    let id = ConnectionId::new();
    let (tx, rx) = mpsc::unbounded_channel();
    let connection = Connection::new(id, stream, rx, handler);
    let membership = Membership {
        id,
        registry: registry.clone(),
    };

    let task = tokio::spawn(async move {
        let _membership = membership;
        info!("[{}] Display connected", id);
        if let Err(e) = connection.serve().await {
            error!("[{}] Socket error: {}", id, e);
        }
    });

    guard.add(id, tx, task);
}
