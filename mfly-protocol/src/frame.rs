//! Canonical reply/request frame types and the RESP encoder.

/// Upper bound for one bulk payload (512 MiB), matching Redis limits.
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// One complete protocol message.
///
/// The enum is the single source of truth for reply shapes. Encoding to wire bytes happens in
/// [`Frame::encode`], so session and handler logic stays independent from byte-level framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `+OK` style simple strings.
    Simple(String),
    /// `$<len> ...` binary-safe payload.
    Bulk(Vec<u8>),
    /// Null bulk string (`$-1`).
    NullBulk,
    /// Integer reply (`:<n>`).
    Int(i64),
    /// Array reply (`*<n> ...`).
    Array(Vec<Frame>),
    /// Null array (`*-1`), used by blocking stream reads that time out.
    NullArray,
    /// `-ERR ...` style error; the first letter of the message is capitalised on the wire.
    Error(String),
    /// Pre-encoded payload emitted verbatim. Used for the full-resync snapshot blob, which is
    /// length-prefixed but carries no trailing CRLF.
    Raw(Vec<u8>),
}

impl Frame {
    /// Builds a simple-string frame.
    #[must_use]
    pub fn simple(text: impl Into<String>) -> Self {
        Self::Simple(text.into())
    }

    /// Builds a bulk-string frame.
    #[must_use]
    pub fn bulk(payload: impl Into<Vec<u8>>) -> Self {
        Self::Bulk(payload.into())
    }

    /// Builds an array of bulk strings, the shape of every request frame.
    #[must_use]
    pub fn array_of_bulks<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Vec<u8>>,
    {
        Self::Array(items.into_iter().map(Self::bulk).collect())
    }

    /// Builds a flat array of alternating key/value bulks from one pair list.
    #[must_use]
    pub fn flat_pairs(pairs: &[(String, String)]) -> Self {
        let mut items = Vec::with_capacity(pairs.len() * 2);
        for (key, value) in pairs {
            items.push(Self::bulk(key.as_bytes()));
            items.push(Self::bulk(value.as_bytes()));
        }
        Self::Array(items)
    }

    /// Builds the full-resync blob frame: `$<len>\r\n<payload>` with no trailing CRLF.
    #[must_use]
    pub fn snapshot_blob(payload: &[u8]) -> Self {
        let mut output = format!("${}\r\n", payload.len()).into_bytes();
        output.extend_from_slice(payload);
        Self::Raw(output)
    }

    /// Encodes this frame into wire bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Simple(text) => {
                let mut output = Vec::with_capacity(text.len() + 3);
                output.push(b'+');
                output.extend_from_slice(text.as_bytes());
                output.extend_from_slice(b"\r\n");
                output
            }
            Self::Bulk(payload) => {
                let mut output = format!("${}\r\n", payload.len()).into_bytes();
                output.extend_from_slice(payload);
                output.extend_from_slice(b"\r\n");
                output
            }
            Self::NullBulk => b"$-1\r\n".to_vec(),
            Self::Int(value) => format!(":{value}\r\n").into_bytes(),
            Self::Array(items) => {
                let mut output = format!("*{}\r\n", items.len()).into_bytes();
                for item in items {
                    output.extend_from_slice(&item.encode());
                }
                output
            }
            Self::NullArray => b"*-1\r\n".to_vec(),
            Self::Error(message) => {
                let mut output = Vec::with_capacity(message.len() + 7);
                output.extend_from_slice(b"-ERR ");
                output.extend_from_slice(capitalise(message).as_bytes());
                output.extend_from_slice(b"\r\n");
                output
            }
            Self::Raw(payload) => payload.clone(),
        }
    }
}

fn capitalise(message: &str) -> String {
    let mut chars = message.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
