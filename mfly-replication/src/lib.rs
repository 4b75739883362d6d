//! Replication state, replica records, and acknowledgement tracking.

pub mod replica;
pub mod state;

pub use replica::{OUTBOUND_QUEUE_LEN, ReplicaHandle, ReplicaStage};
pub use state::{AckCounter, REPLICATION_ID_HEX_LEN, ReplicationRole, ReplicationState};
