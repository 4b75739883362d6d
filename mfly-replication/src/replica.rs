//! Replica records tracked by the primary.

use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use mfly_common::ids::SessionId;
use tracing::{debug, warn};

/// Outbound queue capacity per replica. The queue is effectively unbounded for normal traffic;
/// past this point backpressure comes from the OS socket buffer.
pub const OUTBOUND_QUEUE_LEN: usize = 1024;

/// Handshake progress of one tracked replica.
///
/// `Registered` on first `REPLCONF`, `Synced` once `PSYNC` completed the handshake, and
/// `Streaming` after the owning session attached its socket and buffered writes began flowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReplicaStage {
    /// `REPLCONF` seen; no full resync yet.
    Registered,
    /// Handshake complete; waiting for the session to hand over its socket.
    Synced,
    /// Socket attached; the background writer drains the queue.
    Streaming,
}

/// One replica as seen by the primary.
///
/// Writes pushed before the socket attaches accumulate in the outbound queue; the background
/// writer first receives the socket over a completion channel and then drains the queue in
/// arrival order.
#[derive(Debug)]
pub struct ReplicaHandle {
    session_id: SessionId,
    outbound: SyncSender<Vec<u8>>,
    socket_slot: Mutex<Option<Sender<TcpStream>>>,
    stage: Mutex<ReplicaStage>,
    acked_bytes: AtomicU64,
}

impl ReplicaHandle {
    /// Creates the record and spawns its background writer.
    #[must_use]
    pub fn spawn(session_id: SessionId) -> Arc<Self> {
        let (outbound, outbound_rx) = mpsc::sync_channel::<Vec<u8>>(OUTBOUND_QUEUE_LEN);
        let (socket_tx, socket_rx) = mpsc::channel::<TcpStream>();

        let handle = Arc::new(Self {
            session_id,
            outbound,
            socket_slot: Mutex::new(Some(socket_tx)),
            stage: Mutex::new(ReplicaStage::Registered),
            acked_bytes: AtomicU64::new(0),
        });

        let spawned = thread::Builder::new()
            .name(format!("mfly-replica-writer-{session_id}"))
            .spawn(move || replica_writer_loop(session_id, &socket_rx, &outbound_rx));
        if let Err(error) = spawned {
            warn!(session_id, %error, "failed to spawn replica writer");
        }
        handle
    }

    /// Session id of the connection this replica handshook on.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Enqueues one encoded frame for delivery.
    pub fn push(&self, frame: Vec<u8>) {
        if self.outbound.send(frame).is_err() {
            debug!(session_id = self.session_id, "replica writer is gone; dropping frame");
        }
    }

    /// Current handshake stage.
    #[must_use]
    pub fn stage(&self) -> ReplicaStage {
        *self.lock_stage()
    }

    /// Marks the handshake complete after `PSYNC`.
    pub fn mark_synced(&self) {
        let mut stage = self.lock_stage();
        if *stage == ReplicaStage::Registered {
            *stage = ReplicaStage::Synced;
        }
    }

    /// Returns whether the handshake completed but no socket was attached yet.
    #[must_use]
    pub fn needs_socket(&self) -> bool {
        *self.lock_stage() == ReplicaStage::Synced
    }

    /// Hands the session socket to the background writer; buffered frames start flowing.
    ///
    /// Returns whether this call performed the attachment.
    pub fn attach_socket(&self, socket: TcpStream) -> bool {
        let mut stage = self.lock_stage();
        if *stage != ReplicaStage::Synced {
            return false;
        }
        let Some(socket_tx) = self
            .socket_slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return false;
        };
        if socket_tx.send(socket).is_err() {
            warn!(session_id = self.session_id, "replica writer exited before attachment");
            return false;
        }
        *stage = ReplicaStage::Streaming;
        true
    }

    /// Records one acknowledged byte offset; the counter only moves forward.
    pub fn record_ack(&self, bytes: u64) {
        self.acked_bytes.fetch_max(bytes, Ordering::AcqRel);
    }

    /// Latest acknowledged byte offset.
    #[must_use]
    pub fn acked_bytes(&self) -> u64 {
        self.acked_bytes.load(Ordering::Acquire)
    }

    fn lock_stage(&self) -> std::sync::MutexGuard<'_, ReplicaStage> {
        self.stage.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn replica_writer_loop(
    session_id: SessionId,
    socket_rx: &Receiver<TcpStream>,
    outbound_rx: &Receiver<Vec<u8>>,
) {
    let Ok(mut socket) = socket_rx.recv() else {
        debug!(session_id, "replica record dropped before socket attachment");
        return;
    };
    debug!(session_id, "replica socket attached; draining outbound queue");
    while let Ok(frame) = outbound_rx.recv() {
        if let Err(error) = socket.write_all(&frame) {
            warn!(session_id, %error, "write to replica failed");
            return;
        }
    }
}
