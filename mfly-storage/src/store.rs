//! Thread-safe keyspace with lazy expiry and blocking stream reads.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::snapshot::Snapshot;
use crate::stream::{IdSpec, RangeBound, ReadStart, Stream, StreamEntry, StreamId, StreamIdError};

/// Value type tag reported by `TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Plain string payload.
    Str,
    /// Append-only stream.
    Stream,
}

impl ValueKind {
    /// Returns the wire label used by `TYPE` replies.
    #[must_use]
    pub const fn wire_label(self) -> &'static str {
        match self {
            Self::Str => "string",
            Self::Stream => "stream",
        }
    }
}

/// Store mutation failures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// Stream id was rejected.
    #[error(transparent)]
    Id(#[from] StreamIdError),
    /// The key already holds a value of a different kind.
    #[error("operation against a key holding the wrong kind of value")]
    WrongKind,
}

/// Blocking behaviour of one stream read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMode {
    /// Return immediately with whatever is newer than the baselines.
    NonBlocking,
    /// Wait until at least one requested stream grows past its baseline.
    Indefinite,
    /// Wait up to the given duration.
    Timeout(Duration),
}

/// Per-stream result of one `read_stream` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReadResult {
    /// Requested stream key.
    pub key: String,
    /// Entries strictly newer than the baseline captured at call start.
    pub entries: Vec<StreamEntry>,
}

#[derive(Debug)]
enum ValueData {
    Str(Vec<u8>),
    Stream(Stream),
}

#[derive(Debug)]
struct ValueEntry {
    data: ValueData,
    expire_at: Option<SystemTime>,
}

impl ValueEntry {
    fn is_expired(&self, now: SystemTime) -> bool {
        self.expire_at.is_some_and(|expire_at| now >= expire_at)
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    entries: HashMap<String, ValueEntry>,
    last_stream_ids: HashMap<String, StreamId>,
}

/// Shared key/value store.
///
/// Readers run concurrently; writers are exclusive. Expired string entries are treated as absent
/// on lookup (lazy expiry, no background sweeper). Stream appends bump a revision counter and
/// notify blocked readers.
#[derive(Debug, Default)]
pub struct Store {
    inner: RwLock<StoreInner>,
    append_rev: Mutex<u64>,
    append_wake: Condvar,
}

impl Store {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the string value of a live key.
    ///
    /// Missing keys, expired keys, and stream keys all read as absent.
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<Vec<u8>> {
        let inner = self.read_inner();
        let entry = inner.entries.get(key)?;
        if entry.is_expired(SystemTime::now()) {
            return None;
        }
        match &entry.data {
            ValueData::Str(value) => Some(value.clone()),
            ValueData::Stream(_) => None,
        }
    }

    /// Returns the value kind of a live key.
    #[must_use]
    pub fn value_kind(&self, key: &str) -> Option<ValueKind> {
        let inner = self.read_inner();
        let entry = inner.entries.get(key)?;
        if entry.is_expired(SystemTime::now()) {
            return None;
        }
        match entry.data {
            ValueData::Str(_) => Some(ValueKind::Str),
            ValueData::Stream(_) => Some(ValueKind::Stream),
        }
    }

    /// Returns every live key.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let now = SystemTime::now();
        let inner = self.read_inner();
        inner
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Stores a string value, overwriting any previous value under the key.
    ///
    /// `ttl == None` means no expiry; otherwise the entry expires `ttl` from now.
    pub fn set_string(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        let expire_at = ttl.map(|ttl| SystemTime::now() + ttl);
        self.set_string_at(key, value, expire_at);
    }

    /// Stores a string value with an absolute expiry instant, as snapshot load does.
    pub fn set_string_at(&self, key: &str, value: Vec<u8>, expire_at: Option<SystemTime>) {
        let mut inner = self.write_inner();
        inner.entries.insert(
            key.to_owned(),
            ValueEntry {
                data: ValueData::Str(value),
                expire_at,
            },
        );
    }

    /// Installs every snapshot entry into the keyspace.
    pub fn load_snapshot(&self, snapshot: Snapshot) {
        for entry in snapshot.entries {
            self.set_string_at(&entry.key, entry.value.into_bytes(), entry.expire_at);
        }
    }

    /// Appends one stream entry, resolving the id spec against the stream's top item.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WrongKind`] when the key holds a string, and
    /// [`StoreError::Id`] when the id is `0-0` or does not advance the stream.
    pub fn set_stream(
        &self,
        key: &str,
        spec: IdSpec,
        fields: Vec<(String, String)>,
    ) -> Result<StreamId, StoreError> {
        let mut inner = self.write_inner();

        let existing = match inner.entries.get(key) {
            Some(entry) => match &entry.data {
                ValueData::Stream(stream) => Some(stream),
                ValueData::Str(_) => return Err(StoreError::WrongKind),
            },
            None => None,
        };
        let candidate = resolve_id(spec, existing, unix_time_ms())?;
        let last = inner.last_stream_ids.get(key).copied();
        if matches!(spec, IdSpec::Explicit(id) if id == StreamId::ZERO) {
            return Err(StoreError::Id(StreamIdError::Zero));
        }
        if last.is_some_and(|last| candidate <= last) {
            return Err(StoreError::Id(StreamIdError::Small));
        }

        let entry = inner.entries.entry(key.to_owned()).or_insert(ValueEntry {
            data: ValueData::Stream(Stream::default()),
            expire_at: None,
        });
        let ValueData::Stream(stream) = &mut entry.data else {
            return Err(StoreError::WrongKind);
        };
        stream.append(StreamEntry {
            id: candidate,
            fields,
        });
        inner.last_stream_ids.insert(key.to_owned(), candidate);
        drop(inner);

        self.bump_append_rev();
        Ok(candidate)
    }

    /// Returns the last-inserted id of one stream.
    #[must_use]
    pub fn last_stream_id(&self, key: &str) -> Option<StreamId> {
        self.read_inner().last_stream_ids.get(key).copied()
    }

    /// Returns stream entries inside the inclusive `(start, end)` range.
    #[must_use]
    pub fn range_stream(&self, key: &str, start: RangeBound, end: RangeBound) -> Vec<StreamEntry> {
        let inner = self.read_inner();
        match inner.entries.get(key).map(|entry| &entry.data) {
            Some(ValueData::Stream(stream)) => stream.range(start, end),
            _ => Vec::new(),
        }
    }

    /// Reads entries strictly newer than each request's baseline, optionally blocking.
    ///
    /// Baselines are captured when the call begins: `$` resolves to the stream's last-inserted
    /// id at that moment, so it only observes entries appended afterwards. The call returns at
    /// the first moment at least one requested stream has grown past its baseline, or `None`
    /// when the blocking window closes without new entries.
    #[must_use]
    pub fn read_stream(
        &self,
        requests: &[(String, ReadStart)],
        block: BlockMode,
    ) -> Option<Vec<StreamReadResult>> {
        let baselines = self.resolve_baselines(requests);

        let deadline = match block {
            BlockMode::NonBlocking => return self.collect_new_entries(&baselines),
            BlockMode::Timeout(window) => Some(Instant::now() + window),
            BlockMode::Indefinite => None,
        };

        loop {
            let seen_rev = *self.lock_append_rev();
            if let Some(results) = self.collect_new_entries(&baselines) {
                return Some(results);
            }

            let mut rev = self.lock_append_rev();
            while *rev == seen_rev {
                match deadline {
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            return None;
                        }
                        let (next, _) = self
                            .append_wake
                            .wait_timeout(rev, deadline - now)
                            .unwrap_or_else(PoisonError::into_inner);
                        rev = next;
                    }
                    None => {
                        rev = self
                            .append_wake
                            .wait(rev)
                            .unwrap_or_else(PoisonError::into_inner);
                    }
                }
            }
        }
    }

    fn resolve_baselines(&self, requests: &[(String, ReadStart)]) -> Vec<(String, u64, Option<u32>)> {
        let inner = self.read_inner();
        requests
            .iter()
            .map(|(key, start)| match start {
                ReadStart::Latest => {
                    let last = inner
                        .last_stream_ids
                        .get(key)
                        .copied()
                        .unwrap_or(StreamId::ZERO);
                    (key.clone(), last.ms, Some(last.seq))
                }
                ReadStart::After { ms, seq } => (key.clone(), *ms, *seq),
            })
            .collect()
    }

    fn collect_new_entries(
        &self,
        baselines: &[(String, u64, Option<u32>)],
    ) -> Option<Vec<StreamReadResult>> {
        let inner = self.read_inner();
        let mut results = Vec::new();
        for (key, ms, seq) in baselines {
            let Some(ValueData::Stream(stream)) = inner.entries.get(key).map(|entry| &entry.data)
            else {
                continue;
            };
            let entries = stream.entries_after(*ms, *seq);
            if !entries.is_empty() {
                results.push(StreamReadResult {
                    key: key.clone(),
                    entries,
                });
            }
        }
        if results.is_empty() { None } else { Some(results) }
    }

    fn bump_append_rev(&self) {
        let mut rev = self.lock_append_rev();
        *rev = rev.wrapping_add(1);
        self.append_wake.notify_all();
    }

    fn lock_append_rev(&self) -> MutexGuard<'_, u64> {
        self.append_rev
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn resolve_id(spec: IdSpec, stream: Option<&Stream>, now_ms: u64) -> Result<StreamId, StoreError> {
    let id = match spec {
        IdSpec::Explicit(id) => id,
        IdSpec::AutoSeq(ms) => StreamId::new(ms, generate_seq(stream, ms)),
        IdSpec::Auto => StreamId::new(now_ms, generate_seq(stream, now_ms)),
    };
    Ok(id)
}

fn generate_seq(stream: Option<&Stream>, ms: u64) -> u32 {
    match stream.and_then(|stream| stream.last_seq_for_ms(ms)) {
        Some(last_seq) => last_seq + 1,
        // The first sequence within a fresh millisecond is 0, except for ms 0 where 0-0 is
        // reserved.
        None if ms == 0 => 1,
        None => 0,
    }
}

fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::{BlockMode, Store, StoreError, ValueKind};
    use crate::stream::{IdSpec, RangeBound, ReadStart, StreamId, StreamIdError};
    use googletest::prelude::*;
    use rstest::rstest;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn explicit(ms: u64, seq: u32) -> IdSpec {
        IdSpec::Explicit(StreamId::new(ms, seq))
    }

    #[rstest]
    fn set_then_get_returns_the_stored_value() {
        let store = Store::new();
        store.set_string("foo", b"bar".to_vec(), None);
        assert_that!(store.get_string("foo"), eq(&Some(b"bar".to_vec())));
        assert_that!(store.get_string("missing"), eq(&None));

        store.set_string("foo", b"baz".to_vec(), None);
        assert_that!(store.get_string("foo"), eq(&Some(b"baz".to_vec())));
    }

    #[rstest]
    fn expired_entries_read_as_absent() {
        let store = Store::new();
        store.set_string("k", b"v".to_vec(), Some(Duration::from_millis(60)));
        assert_that!(store.get_string("k"), eq(&Some(b"v".to_vec())));

        thread::sleep(Duration::from_millis(90));
        assert_that!(store.get_string("k"), eq(&None));
        assert_that!(store.value_kind("k"), eq(None));
        assert_that!(store.keys().is_empty(), eq(true));
    }

    #[rstest]
    fn value_kind_distinguishes_strings_and_streams() {
        let store = Store::new();
        store.set_string("s", b"v".to_vec(), None);
        let _ = store
            .set_stream("x", explicit(1, 0), Vec::new())
            .expect("first stream id must be accepted");

        assert_that!(store.value_kind("s"), eq(Some(ValueKind::Str)));
        assert_that!(store.value_kind("x"), eq(Some(ValueKind::Stream)));
        assert_that!(store.value_kind("missing"), eq(None));
        assert_that!(store.get_string("x"), eq(&None));
    }

    #[rstest]
    fn auto_sequence_follows_the_top_item_per_millisecond() {
        let store = Store::new();
        assert_that!(
            store.set_stream("s", IdSpec::AutoSeq(0), Vec::new()),
            eq(Ok(StreamId::new(0, 1)))
        );
        assert_that!(
            store.set_stream("s", IdSpec::AutoSeq(0), Vec::new()),
            eq(Ok(StreamId::new(0, 2)))
        );
        assert_that!(
            store.set_stream("s", IdSpec::AutoSeq(5), Vec::new()),
            eq(Ok(StreamId::new(5, 0)))
        );
        assert_that!(
            store.set_stream("s", explicit(5, 0), Vec::new()),
            eq(Err(StoreError::Id(StreamIdError::Small)))
        );
    }

    #[rstest]
    fn explicit_ids_must_strictly_advance_the_stream() {
        let store = Store::new();
        assert_that!(
            store.set_stream("s", explicit(0, 0), Vec::new()),
            eq(Err(StoreError::Id(StreamIdError::Zero)))
        );
        assert_that!(
            store.set_stream("s", explicit(2, 1), Vec::new()),
            eq(Ok(StreamId::new(2, 1)))
        );
        assert_that!(
            store.set_stream("s", explicit(2, 1), Vec::new()),
            eq(Err(StoreError::Id(StreamIdError::Small)))
        );
        assert_that!(
            store.set_stream("s", explicit(1, 9), Vec::new()),
            eq(Err(StoreError::Id(StreamIdError::Small)))
        );
        assert_that!(
            store.set_stream("s", explicit(2, 2), Vec::new()),
            eq(Ok(StreamId::new(2, 2)))
        );
    }

    #[rstest]
    fn wall_clock_ids_are_strictly_monotonic() {
        let store = Store::new();
        let first = store
            .set_stream("s", IdSpec::Auto, Vec::new())
            .expect("auto id must be accepted");
        let second = store
            .set_stream("s", IdSpec::Auto, Vec::new())
            .expect("auto id must be accepted");
        assert_that!(first.ms > 0, eq(true));
        assert_that!(second > first, eq(true));
    }

    #[rstest]
    fn stream_appends_reject_string_keys() {
        let store = Store::new();
        store.set_string("k", b"v".to_vec(), None);
        assert_that!(
            store.set_stream("k", explicit(1, 0), Vec::new()),
            eq(Err(StoreError::WrongKind))
        );
    }

    #[rstest]
    fn full_range_preserves_insertion_order() {
        let store = Store::new();
        for (ms, seq) in [(1_u64, 0_u32), (1, 1), (2, 0)] {
            let _ = store
                .set_stream("s", explicit(ms, seq), vec![("f".to_owned(), "v".to_owned())])
                .expect("ordered ids must be accepted");
        }
        let entries = store.range_stream("s", RangeBound::Min, RangeBound::Max);
        let ids = entries.iter().map(|entry| entry.id).collect::<Vec<_>>();
        assert_that!(
            &ids,
            eq(&vec![
                StreamId::new(1, 0),
                StreamId::new(1, 1),
                StreamId::new(2, 0)
            ])
        );
        assert_that!(store.last_stream_id("s"), eq(Some(StreamId::new(2, 0))));
    }

    #[rstest]
    fn non_blocking_read_returns_entries_after_the_given_id() {
        let store = Store::new();
        let _ = store.set_stream("s", explicit(1, 0), Vec::new());
        let _ = store.set_stream("s", explicit(2, 0), Vec::new());

        let requests = vec![("s".to_owned(), ReadStart::After { ms: 1, seq: Some(0) })];
        let results = store
            .read_stream(&requests, BlockMode::NonBlocking)
            .expect("entries newer than 1-0 exist");
        assert_that!(results.len(), eq(1_usize));
        assert_that!(results[0].key.as_str(), eq("s"));
        assert_that!(results[0].entries.len(), eq(1_usize));
        assert_that!(results[0].entries[0].id, eq(StreamId::new(2, 0)));

        let latest = vec![("s".to_owned(), ReadStart::Latest)];
        assert_that!(
            store.read_stream(&latest, BlockMode::NonBlocking),
            eq(&None)
        );
    }

    #[rstest]
    fn blocking_read_times_out_without_new_entries() {
        let store = Store::new();
        let _ = store.set_stream("s", explicit(1, 0), Vec::new());

        let requests = vec![("s".to_owned(), ReadStart::Latest)];
        let results = store.read_stream(&requests, BlockMode::Timeout(Duration::from_millis(80)));
        assert_that!(results, eq(&None));
    }

    #[rstest]
    fn blocking_read_wakes_on_append_past_the_baseline() {
        let store = Arc::new(Store::new());
        let _ = store.set_stream("s", explicit(1, 0), Vec::new());
        let _ = store.set_stream("s", explicit(2, 0), Vec::new());

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                let _ = store.set_stream("s", explicit(3, 0), Vec::new());
            })
        };

        let requests = vec![("s".to_owned(), ReadStart::Latest)];
        let results = store
            .read_stream(&requests, BlockMode::Timeout(Duration::from_millis(500)))
            .expect("append within the window must wake the read");
        writer.join().expect("writer thread must finish");

        assert_that!(results.len(), eq(1_usize));
        assert_that!(results[0].entries.len(), eq(1_usize));
        assert_that!(results[0].entries[0].id, eq(StreamId::new(3, 0)));
    }
}
