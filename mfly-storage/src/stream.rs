//! Append-only stream values and their identifier arithmetic.

use std::fmt;

use thiserror::Error;

/// One stream entry identifier: milliseconds since the epoch plus a sequence within that
/// millisecond. Derived ordering is lexicographic by `(ms, seq)`, which is the stream order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId {
    /// Millisecond component.
    pub ms: u64,
    /// Sequence within the millisecond.
    pub seq: u32,
}

impl StreamId {
    /// The reserved minimum id; `XADD` rejects it.
    pub const ZERO: Self = Self { ms: 0, seq: 0 };

    /// Creates an id from its two components.
    #[must_use]
    pub const fn new(ms: u64, seq: u32) -> Self {
        Self { ms, seq }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// Stream id validation failures with their canonical Redis-compatible messages.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StreamIdError {
    /// `0-0` is reserved.
    #[error("the ID specified in XADD must be greater than 0-0")]
    Zero,
    /// The id does not advance the stream.
    #[error("the ID specified in XADD is equal or smaller than the target stream top item")]
    Small,
    /// The textual id form cannot be parsed.
    #[error("invalid stream ID specified as stream command argument")]
    Format,
}

/// Requested id shape for one stream append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSpec {
    /// `*`: wall-clock milliseconds with an auto-assigned sequence.
    Auto,
    /// `<ms>-*`: fixed milliseconds with an auto-assigned sequence.
    AutoSeq(u64),
    /// `<ms>-<seq>`: fully explicit, validated against the stream top item.
    Explicit(StreamId),
}

impl IdSpec {
    /// Parses the `XADD` id argument.
    ///
    /// # Errors
    ///
    /// Returns [`StreamIdError::Format`] for anything other than `*`, `<ms>-*`, or `<ms>-<seq>`.
    pub fn parse(raw: &str) -> Result<Self, StreamIdError> {
        if raw == "*" {
            return Ok(Self::Auto);
        }
        let (ms_raw, seq_raw) = raw.split_once('-').ok_or(StreamIdError::Format)?;
        let ms = ms_raw.parse::<u64>().map_err(|_| StreamIdError::Format)?;
        if seq_raw == "*" {
            return Ok(Self::AutoSeq(ms));
        }
        let seq = seq_raw.parse::<u32>().map_err(|_| StreamIdError::Format)?;
        Ok(Self::Explicit(StreamId::new(ms, seq)))
    }
}

/// Inclusive range endpoint for `XRANGE`.
///
/// An endpoint without a sequence component bounds the millisecond only, leaving the sequence
/// unconstrained on that side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeBound {
    /// `-`: no lower bound.
    Min,
    /// `+`: no upper bound.
    Max,
    /// `<ms>`: millisecond bound with the sequence side open.
    Ms(u64),
    /// `<ms>-<seq>`: fully explicit inclusive bound.
    Exact(StreamId),
}

impl RangeBound {
    /// Parses one `XRANGE` endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`StreamIdError::Format`] when the endpoint is not `-`, `+`, `<ms>`, or
    /// `<ms>-<seq>`.
    pub fn parse(raw: &str) -> Result<Self, StreamIdError> {
        match raw {
            "-" => Ok(Self::Min),
            "+" => Ok(Self::Max),
            _ => match raw.split_once('-') {
                Some((ms_raw, seq_raw)) => {
                    let ms = ms_raw.parse::<u64>().map_err(|_| StreamIdError::Format)?;
                    let seq = seq_raw.parse::<u32>().map_err(|_| StreamIdError::Format)?;
                    Ok(Self::Exact(StreamId::new(ms, seq)))
                }
                None => {
                    let ms = raw.parse::<u64>().map_err(|_| StreamIdError::Format)?;
                    Ok(Self::Ms(ms))
                }
            },
        }
    }

    fn admits_as_start(self, id: StreamId) -> bool {
        match self {
            Self::Min => true,
            Self::Max => false,
            Self::Ms(ms) => id.ms >= ms,
            Self::Exact(bound) => id >= bound,
        }
    }

    fn admits_as_end(self, id: StreamId) -> bool {
        match self {
            Self::Min => false,
            Self::Max => true,
            Self::Ms(ms) => id.ms <= ms,
            Self::Exact(bound) => id <= bound,
        }
    }
}

/// Exclusive lower bound for `XREAD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStart {
    /// `$`: only entries appended after the call began.
    Latest,
    /// `<ms>[-<seq>]`: entries strictly greater than the given id. Without a sequence the bound
    /// admits every entry of the same millisecond.
    After {
        /// Millisecond component of the bound.
        ms: u64,
        /// Sequence component; `None` leaves the sequence side open.
        seq: Option<u32>,
    },
}

impl ReadStart {
    /// Parses one `XREAD` start id.
    ///
    /// # Errors
    ///
    /// Returns [`StreamIdError::Format`] when the id is not `$`, `<ms>`, or `<ms>-<seq>`.
    pub fn parse(raw: &str) -> Result<Self, StreamIdError> {
        if raw == "$" {
            return Ok(Self::Latest);
        }
        match raw.split_once('-') {
            Some((ms_raw, seq_raw)) => {
                let ms = ms_raw.parse::<u64>().map_err(|_| StreamIdError::Format)?;
                let seq = seq_raw.parse::<u32>().map_err(|_| StreamIdError::Format)?;
                Ok(Self::After { ms, seq: Some(seq) })
            }
            None => {
                let ms = raw.parse::<u64>().map_err(|_| StreamIdError::Format)?;
                Ok(Self::After { ms, seq: None })
            }
        }
    }
}

/// One id-tagged record of field/value pairs in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Entry id, strictly greater than every earlier id in the stream.
    pub id: StreamId,
    /// Field/value pairs preserving insertion order.
    pub fields: Vec<(String, String)>,
}

/// Append-ordered sequence of entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stream {
    entries: Vec<StreamEntry>,
}

impl Stream {
    /// Returns all entries in append order.
    #[must_use]
    pub fn entries(&self) -> &[StreamEntry] {
        &self.entries
    }

    /// Returns the id of the most recent entry.
    #[must_use]
    pub fn last_id(&self) -> Option<StreamId> {
        self.entries.last().map(|entry| entry.id)
    }

    /// Returns the highest sequence already used within one millisecond.
    #[must_use]
    pub fn last_seq_for_ms(&self, ms: u64) -> Option<u32> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.id.ms == ms)
            .map(|entry| entry.id.seq)
    }

    /// Appends one entry; id ordering is the caller's responsibility.
    pub fn append(&mut self, entry: StreamEntry) {
        self.entries.push(entry);
    }

    /// Returns entries inside the inclusive range.
    #[must_use]
    pub fn range(&self, start: RangeBound, end: RangeBound) -> Vec<StreamEntry> {
        self.entries
            .iter()
            .filter(|entry| start.admits_as_start(entry.id) && end.admits_as_end(entry.id))
            .cloned()
            .collect()
    }

    /// Returns entries strictly after one resolved read baseline.
    #[must_use]
    pub fn entries_after(&self, ms: u64, seq: Option<u32>) -> Vec<StreamEntry> {
        self.entries
            .iter()
            .filter(|entry| {
                entry.id.ms > ms
                    || (entry.id.ms == ms && seq.is_none_or(|bound| entry.id.seq > bound))
            })
            .cloned()
            .collect()
    }
}
