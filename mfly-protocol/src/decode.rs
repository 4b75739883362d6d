//! Streaming RESP decoder.
//!
//! Requests may be pipelined inside one TCP read, so the decoder always reports how many bytes
//! one frame consumed and the pipeline splitter loops until the buffer is exhausted.

use thiserror::Error;

use crate::frame::{Frame, MAX_BULK_LEN};

/// Decode failures, split by whether more input could still complete the frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer ends before one complete frame; callers must not assume partial decode.
    #[error("incomplete frame: more bytes are required")]
    Truncated,
    /// The buffer violates the wire grammar and cannot be recovered by more input.
    #[error("protocol error: {0}")]
    Malformed(String),
}

/// Decodes exactly one frame from the front of `input`.
///
/// On success the returned count is the number of bytes the frame occupied; when it is smaller
/// than `input.len()`, the remainder starts another well-formed frame and the caller must loop.
///
/// # Errors
///
/// Returns [`DecodeError::Truncated`] when the buffer ends mid-frame and
/// [`DecodeError::Malformed`] when the bytes violate the grammar.
pub fn decode(input: &[u8]) -> Result<(Frame, usize), DecodeError> {
    let mut cursor = FrameCursor::new(input);
    let frame = cursor.read_frame()?;
    Ok((frame, cursor.offset))
}

/// Result of splitting one read buffer into frames.
#[derive(Debug, Default)]
pub struct PipelineBatch {
    /// Complete frames in arrival order, each paired with its raw wire bytes.
    pub frames: Vec<(Vec<u8>, Frame)>,
    /// Bytes consumed from the front of the buffer; the remainder is an incomplete frame the
    /// caller should retain for the next read.
    pub consumed: usize,
    /// Set when the remainder was abandoned because of malformed input. `consumed` then covers
    /// the whole buffer so the caller drops it and the session continues.
    pub malformed: Option<String>,
}

/// Splits one read buffer into zero or more complete frames.
#[must_use]
pub fn decode_pipeline(input: &[u8]) -> PipelineBatch {
    let mut batch = PipelineBatch::default();
    let mut offset = 0;
    while offset < input.len() {
        // A bulk terminator split across reads shows up as a stray leading CRLF once the payload
        // itself was consumed by the previous buffer.
        if input[offset..].starts_with(b"\r\n") {
            offset += 2;
            batch.consumed = offset;
            continue;
        }
        match decode(&input[offset..]) {
            Ok((frame, used)) => {
                batch
                    .frames
                    .push((input[offset..offset + used].to_vec(), frame));
                offset += used;
                batch.consumed = offset;
            }
            Err(DecodeError::Truncated) => break,
            Err(DecodeError::Malformed(message)) => {
                batch.consumed = input.len();
                batch.malformed = Some(message);
                break;
            }
        }
    }
    batch
}

struct FrameCursor<'a> {
    input: &'a [u8],
    offset: usize,
}

impl<'a> FrameCursor<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, offset: 0 }
    }

    fn read_frame(&mut self) -> Result<Frame, DecodeError> {
        match self.next_byte()? {
            b'+' => self.read_simple(),
            b':' => self.read_int(),
            b'$' => self.read_bulk(),
            b'*' => self.read_array(),
            other => Err(DecodeError::Malformed(format!(
                "invalid frame type byte 0x{other:02x}"
            ))),
        }
    }

    fn read_simple(&mut self) -> Result<Frame, DecodeError> {
        let line = self.read_line()?;
        let text = std::str::from_utf8(line)
            .map_err(|_| DecodeError::Malformed("simple string is not valid UTF-8".to_owned()))?;
        Ok(Frame::Simple(text.to_owned()))
    }

    fn read_int(&mut self) -> Result<Frame, DecodeError> {
        let line = self.read_line()?;
        Ok(Frame::Int(parse_decimal(line)?))
    }

    fn read_bulk(&mut self) -> Result<Frame, DecodeError> {
        let line = self.read_line()?;
        let declared = parse_decimal(line)?;
        if declared == -1 {
            return Ok(Frame::NullBulk);
        }
        let Ok(len) = usize::try_from(declared) else {
            return Err(DecodeError::Malformed(format!(
                "invalid bulk length {declared}"
            )));
        };
        if len > MAX_BULK_LEN {
            return Err(DecodeError::Malformed(format!(
                "bulk length {len} exceeds the 512 MiB limit"
            )));
        }
        let payload = self.read_slice(len)?.to_vec();
        // The terminator is optional: the full-resync snapshot blob is length-prefixed but
        // carries no trailing CRLF, and the bytes after it are ordinary frames.
        if self.input[self.offset..].starts_with(b"\r\n") {
            self.offset += 2;
        }
        Ok(Frame::Bulk(payload))
    }

    fn read_array(&mut self) -> Result<Frame, DecodeError> {
        let line = self.read_line()?;
        let declared = parse_decimal(line)?;
        if declared == -1 {
            return Ok(Frame::NullArray);
        }
        let Ok(count) = usize::try_from(declared) else {
            return Err(DecodeError::Malformed(format!(
                "invalid array length {declared}"
            )));
        };
        let mut items = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            items.push(self.read_frame()?);
        }
        Ok(Frame::Array(items))
    }

    fn next_byte(&mut self) -> Result<u8, DecodeError> {
        let byte = self.read_slice(1)?[0];
        Ok(byte)
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .offset
            .checked_add(len)
            .ok_or(DecodeError::Truncated)?;
        if end > self.input.len() {
            return Err(DecodeError::Truncated);
        }
        let bytes = &self.input[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn read_line(&mut self) -> Result<&'a [u8], DecodeError> {
        let rest = &self.input[self.offset..];
        let Some(terminator) = rest.windows(2).position(|pair| pair == b"\r\n") else {
            return Err(DecodeError::Truncated);
        };
        let line = &rest[..terminator];
        self.offset += terminator + 2;
        Ok(line)
    }
}

fn parse_decimal(line: &[u8]) -> Result<i64, DecodeError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| DecodeError::Malformed("length line is not valid UTF-8".to_owned()))?;
    text.parse::<i64>()
        .map_err(|_| DecodeError::Malformed(format!("invalid decimal length {text:?}")))
}
