//! Process bootstrap: configuration, snapshot load, replication wiring, accept loop.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

use mfly_common::config::RuntimeConfig;
use mfly_common::error::{MflyError, MflyResult};
use mfly_common::ids::SessionId;
use mfly_replication::{AckCounter, ReplicationRole, ReplicationState};
use mfly_storage::{Store, read_snapshot_file};
use tracing::{debug, info, warn};

use crate::cli;
use crate::dispatch::{CommandRegistry, HandlerContext};
use crate::session::{ServerShared, spawn_client_session, spawn_upstream_session};

/// Parses flags, boots the server, and serves connections until the process exits.
///
/// # Errors
///
/// Returns configuration, snapshot, bind, or upstream-dial failures; the binary maps these to a
/// non-zero exit code.
pub fn run() -> MflyResult<()> {
    tracing_subscriber::fmt::init();
    let config = cli::parse_config()?;
    let app = ServerApp::bind(config)?;
    app.connect_upstream()?;
    app.run_accept_loop();
    Ok(())
}

/// One bound server instance.
pub struct ServerApp {
    shared: Arc<ServerShared>,
    listener: TcpListener,
}

impl ServerApp {
    /// Loads the boot snapshot, builds shared state, and binds the listener.
    ///
    /// # Errors
    ///
    /// Returns `MflyError::Snapshot` for malformed snapshot files and `MflyError::Io` when the
    /// listener cannot bind.
    pub fn bind(config: RuntimeConfig) -> MflyResult<Self> {
        let store = Arc::new(Store::new());
        let snapshot = read_snapshot_file(config.snapshot_path())?;
        if !snapshot.entries.is_empty() {
            info!(
                entries = snapshot.entries.len(),
                path = %config.snapshot_path().display(),
                "loaded boot snapshot"
            );
        }
        store.load_snapshot(snapshot);

        let role = config
            .replica_of
            .clone()
            .map_or(ReplicationRole::Primary, ReplicationRole::Replica);
        let replication = Arc::new(ReplicationState::new(role));
        let listener = TcpListener::bind(("0.0.0.0", config.port)).map_err(|error| {
            MflyError::Io(format!(
                "bind RESP listener on port {} failed: {error}",
                config.port
            ))
        })?;

        let shared = Arc::new(ServerShared {
            context: HandlerContext {
                store,
                replication,
                ack: Arc::new(AckCounter::default()),
                config: Arc::new(config),
            },
            registry: CommandRegistry::with_builtin_commands(),
        });
        Ok(Self { shared, listener })
    }

    /// Address the listener actually bound, useful with an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns `MflyError::Io` when the local address cannot be queried.
    pub fn local_addr(&self) -> MflyResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|error| MflyError::from_io(&error))
    }

    /// Dials the primary and starts the handshake session when running as a replica.
    ///
    /// # Errors
    ///
    /// Returns `MflyError::Io` when the primary cannot be reached.
    pub fn connect_upstream(&self) -> MflyResult<Option<SessionId>> {
        let Some(upstream) = self.shared.context.config.replica_of.clone() else {
            return Ok(None);
        };
        let socket = TcpStream::connect(upstream.dial_target()).map_err(|error| {
            MflyError::Io(format!(
                "dial primary {} failed: {error}",
                upstream.dial_target()
            ))
        })?;
        info!(upstream = %upstream.dial_target(), "attaching to primary");
        spawn_upstream_session(socket, Arc::clone(&self.shared)).map(Some)
    }

    /// Accepts connections forever, one session per socket.
    pub fn run_accept_loop(&self) {
        info!(
            port = self.shared.context.config.port,
            role = self.shared.context.replication.role().wire_label(),
            replid = self.shared.context.replication.replication_id(),
            "listening for connections"
        );
        for connection in self.listener.incoming() {
            match connection {
                Ok(socket) => {
                    let _ = socket.set_nodelay(true);
                    match spawn_client_session(socket, Arc::clone(&self.shared)) {
                        Ok(session_id) => debug!(session_id, "session started"),
                        Err(error) => warn!(%error, "failed to start session"),
                    }
                }
                Err(error) => warn!(%error, "accept connection failed"),
            }
        }
    }
}

#[cfg(test)]
#[path = "app_tests.rs"]
mod app_tests;
