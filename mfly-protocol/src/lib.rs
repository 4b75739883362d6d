//! RESP wire model: frame types, encoder, and pipelined streaming decoder.

pub mod command;
pub mod decode;
pub mod frame;

pub use command::CommandFrame;
pub use decode::{DecodeError, PipelineBatch, decode, decode_pipeline};
pub use frame::{Frame, MAX_BULK_LEN};
