//! Primary-side replication state and acknowledgement counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mfly_common::config::UpstreamAddr;
use mfly_common::ids::SessionId;
use rand::Rng;

use crate::replica::ReplicaHandle;

/// Redis-compatible replication id length.
pub const REPLICATION_ID_HEX_LEN: usize = 40;

/// Whether this process is the authoritative server or mirrors one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationRole {
    /// Accepts writes and fans them out to replicas.
    Primary,
    /// Mirrors the given primary.
    Replica(UpstreamAddr),
}

impl ReplicationRole {
    /// Returns the role label used by `INFO replication`.
    #[must_use]
    pub const fn wire_label(&self) -> &'static str {
        match self {
            Self::Primary => "master",
            Self::Replica(_) => "slave",
        }
    }
}

/// Process-wide propagated-byte counter.
///
/// The primary adds the byte length of every propagated write frame; a replica adds the byte
/// length of every frame received from its primary in established mode. The replica-side value
/// is what `REPLCONF GETACK *` reports.
#[derive(Debug, Default)]
pub struct AckCounter(AtomicU64);

impl AckCounter {
    /// Adds one frame's byte length.
    pub fn add(&self, bytes: u64) {
        self.0.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Current counter value.
    #[must_use]
    pub fn load(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

/// Replication view of one server process.
#[derive(Debug)]
pub struct ReplicationState {
    role: ReplicationRole,
    replication_id: String,
    replicas: Mutex<HashMap<SessionId, Arc<ReplicaHandle>>>,
}

impl ReplicationState {
    /// Creates the state with a fresh replication id.
    ///
    /// The id is constant for the lifetime of the process.
    #[must_use]
    pub fn new(role: ReplicationRole) -> Self {
        Self {
            role,
            replication_id: generate_replication_id(),
            replicas: Mutex::new(HashMap::new()),
        }
    }

    /// Role of this process.
    #[must_use]
    pub fn role(&self) -> &ReplicationRole {
        &self.role
    }

    /// Returns whether this process accepts writes and fans them out.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.role == ReplicationRole::Primary
    }

    /// The 40-hex-char replication id.
    #[must_use]
    pub fn replication_id(&self) -> &str {
        &self.replication_id
    }

    /// Looks up the replica record tracked under one session id.
    #[must_use]
    pub fn replica(&self, session_id: SessionId) -> Option<Arc<ReplicaHandle>> {
        self.lock_replicas().get(&session_id).cloned()
    }

    /// Returns the record for one session, creating it on first `REPLCONF`.
    #[must_use]
    pub fn ensure_replica(&self, session_id: SessionId) -> Arc<ReplicaHandle> {
        self.lock_replicas()
            .entry(session_id)
            .or_insert_with(|| ReplicaHandle::spawn(session_id))
            .clone()
    }

    /// Drops the record when its session terminates.
    pub fn remove_replica(&self, session_id: SessionId) -> Option<Arc<ReplicaHandle>> {
        self.lock_replicas().remove(&session_id)
    }

    /// Snapshot of all tracked replicas; safe to iterate while sessions register concurrently.
    #[must_use]
    pub fn replicas(&self) -> Vec<Arc<ReplicaHandle>> {
        self.lock_replicas().values().cloned().collect()
    }

    /// Number of tracked replicas.
    #[must_use]
    pub fn replica_count(&self) -> usize {
        self.lock_replicas().len()
    }

    /// Enqueues one encoded frame onto every replica's outbound queue.
    pub fn broadcast(&self, frame: &[u8]) {
        for replica in self.replicas() {
            replica.push(frame.to_vec());
        }
    }

    /// Counts replicas whose acknowledged bytes reached one target offset.
    #[must_use]
    pub fn acked_replica_count_at_or_above(&self, offset: u64) -> usize {
        self.replicas()
            .iter()
            .filter(|replica| replica.acked_bytes() >= offset)
            .count()
    }

    fn lock_replicas(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<ReplicaHandle>>> {
        self.replicas.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Generates one random 40-hex-character replication id.
fn generate_replication_id() -> String {
    let mut rng = rand::thread_rng();
    (0..REPLICATION_ID_HEX_LEN)
        .map(|_| char::from_digit(rng.gen_range(0..16_u32), 16).unwrap_or('0'))
        .collect()
}
