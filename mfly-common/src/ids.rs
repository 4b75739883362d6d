//! Canonical identifier types used across session, replication, and dispatch layers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Stable identity of one TCP session.
///
/// The primary tracks replica records under the session id of the connection that performed the
/// handshake.
pub type SessionId = u64;

/// Allocates a session id from the construction timestamp (nanoseconds since the epoch).
#[must_use]
pub fn allocate_session_id() -> SessionId {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_nanos() as u64)
}
