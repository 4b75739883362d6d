//! Canonical command frame lowering.

use crate::frame::Frame;

/// Command payload representation used between session and dispatch layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    /// Command name in uppercase canonical form (e.g. `SET`, `XADD`, `REPLCONF`).
    pub name: String,
    /// Raw byte arguments preserving wire-level payload, without the command name.
    pub args: Vec<Vec<u8>>,
}

impl CommandFrame {
    /// Creates a command frame from a command name and argument list.
    #[must_use]
    pub fn new(name: impl Into<String>, args: Vec<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Lowers one decoded request frame into a command.
    ///
    /// # Errors
    ///
    /// Returns user-facing error text when the frame is not an array of bulk strings or the
    /// command name is missing.
    pub fn from_frame(frame: &Frame) -> Result<Self, String> {
        let Frame::Array(items) = frame else {
            return Err("only array requests are accepted".to_owned());
        };
        let Some((head, rest)) = items.split_first() else {
            return Err("command is missing".to_owned());
        };
        let Frame::Bulk(name_raw) = head else {
            return Err("bulk string command name expected".to_owned());
        };
        let name = std::str::from_utf8(name_raw)
            .map_err(|_| "command name must be valid UTF-8".to_owned())?
            .to_ascii_uppercase();

        let mut args = Vec::with_capacity(rest.len());
        for item in rest {
            let Frame::Bulk(arg) = item else {
                return Err("bulk string argument expected".to_owned());
            };
            args.push(arg.clone());
        }
        Ok(Self { name, args })
    }

    /// Returns one argument as UTF-8 text when present and valid.
    #[must_use]
    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.args
            .get(index)
            .and_then(|arg| std::str::from_utf8(arg).ok())
    }
}
