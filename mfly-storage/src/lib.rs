//! Keyspace, stream data type, and boot snapshot decoding.

pub mod snapshot;
pub mod store;
pub mod stream;

pub use snapshot::{EMPTY_SNAPSHOT, Snapshot, SnapshotEntry, decode_snapshot, read_snapshot_file};
pub use store::{BlockMode, Store, StoreError, StreamReadResult, ValueKind};
pub use stream::{IdSpec, RangeBound, ReadStart, Stream, StreamEntry, StreamId, StreamIdError};
