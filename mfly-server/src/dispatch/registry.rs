use std::collections::HashMap;

use mfly_common::error::MflyResult;
use mfly_common::ids::SessionId;
use mfly_protocol::{CommandFrame, Frame};

use super::handlers_connection::{handle_echo, handle_ping};
use super::handlers_replication::{handle_psync, handle_replconf, handle_wait};
use super::handlers_server::{handle_config, handle_info};
use super::handlers_streams::{handle_xadd, handle_xrange, handle_xread};
use super::handlers_strings::{handle_get, handle_keys, handle_set, handle_type};
use super::{CommandArity, CommandSpec, HandlerContext, ReplySink};

/// Runtime command registry, immutable after startup.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    entries: HashMap<String, CommandSpec>,
}

impl CommandRegistry {
    /// Builds an empty command registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Builds a registry preloaded with every supported command.
    #[must_use]
    pub fn with_builtin_commands() -> Self {
        let mut registry = Self::new();
        registry.register_connection_commands();
        registry.register_string_commands();
        registry.register_server_commands();
        registry.register_replication_commands();
        registry.register_stream_commands();
        registry
    }

    fn register_connection_commands(&mut self) {
        self.register(CommandSpec {
            name: "PING",
            arity: CommandArity::AtLeast(0),
            handler: handle_ping,
        });
        self.register(CommandSpec {
            name: "ECHO",
            arity: CommandArity::Exact(1),
            handler: handle_echo,
        });
    }

    fn register_string_commands(&mut self) {
        self.register(CommandSpec {
            name: "SET",
            arity: CommandArity::AtLeast(2),
            handler: handle_set,
        });
        self.register(CommandSpec {
            name: "GET",
            arity: CommandArity::Exact(1),
            handler: handle_get,
        });
        self.register(CommandSpec {
            name: "TYPE",
            arity: CommandArity::Exact(1),
            handler: handle_type,
        });
        self.register(CommandSpec {
            name: "KEYS",
            arity: CommandArity::Exact(1),
            handler: handle_keys,
        });
    }

    fn register_server_commands(&mut self) {
        self.register(CommandSpec {
            name: "INFO",
            arity: CommandArity::AtLeast(0),
            handler: handle_info,
        });
        self.register(CommandSpec {
            name: "CONFIG",
            arity: CommandArity::Exact(2),
            handler: handle_config,
        });
    }

    fn register_replication_commands(&mut self) {
        self.register(CommandSpec {
            name: "REPLCONF",
            arity: CommandArity::AtLeast(1),
            handler: handle_replconf,
        });
        self.register(CommandSpec {
            name: "PSYNC",
            arity: CommandArity::Exact(2),
            handler: handle_psync,
        });
        self.register(CommandSpec {
            name: "WAIT",
            arity: CommandArity::Exact(2),
            handler: handle_wait,
        });
    }

    fn register_stream_commands(&mut self) {
        self.register(CommandSpec {
            name: "XADD",
            arity: CommandArity::AtLeast(2),
            handler: handle_xadd,
        });
        self.register(CommandSpec {
            name: "XRANGE",
            arity: CommandArity::Exact(3),
            handler: handle_xrange,
        });
        self.register(CommandSpec {
            name: "XREAD",
            arity: CommandArity::AtLeast(3),
            handler: handle_xread,
        });
    }

    /// Registers or replaces one command in the table.
    pub fn register(&mut self, spec: CommandSpec) {
        self.entries.insert(spec.name.to_owned(), spec);
    }

    /// Validates command existence and arity without executing handler logic.
    ///
    /// # Errors
    ///
    /// Returns user-facing error text for unknown command names or invalid argument count.
    pub fn validate_frame(&self, frame: &CommandFrame) -> Result<(), String> {
        let Some(spec) = self.entries.get(&frame.name) else {
            return Err(format!("unknown command '{}'", frame.name));
        };

        match spec.arity {
            CommandArity::Exact(expected) if frame.args.len() != expected => Err(format!(
                "wrong number of arguments for '{}' command",
                spec.name
            )),
            CommandArity::AtLeast(minimum) if frame.args.len() < minimum => Err(format!(
                "wrong number of arguments for '{}' command",
                spec.name
            )),
            _ => Ok(()),
        }
    }

    /// Dispatches one canonical command frame to its registered handler.
    ///
    /// Validation failures become `-ERR` reply frames; the connection stays usable.
    ///
    /// # Errors
    ///
    /// Propagates handler-internal failures; wire-visible errors are pushed to the sink instead.
    pub fn dispatch(
        &self,
        context: &HandlerContext,
        session_id: SessionId,
        frame: &CommandFrame,
        sink: &ReplySink,
    ) -> MflyResult<()> {
        if let Err(message) = self.validate_frame(frame) {
            sink.push(&Frame::Error(message));
            return Ok(());
        }
        let Some(spec) = self.entries.get(&frame.name) else {
            sink.push(&Frame::Error(format!("unknown command '{}'", frame.name)));
            return Ok(());
        };
        (spec.handler)(context, session_id, frame, sink)
    }
}
