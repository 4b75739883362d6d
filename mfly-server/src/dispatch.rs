//! Command registration and dispatch.
//!
//! Protocol lowering produces a canonical command frame, then an immutable registry resolves and
//! executes the matching handler. Handlers push zero or more reply frames through a sink that
//! feeds the session's outbound queue.

use std::sync::Arc;
use std::sync::mpsc::SyncSender;

use mfly_common::config::RuntimeConfig;
use mfly_common::error::MflyResult;
use mfly_common::ids::SessionId;
use mfly_protocol::{CommandFrame, Frame};
use mfly_replication::{AckCounter, ReplicationState};
use mfly_storage::Store;

#[path = "dispatch/handlers_connection.rs"]
mod handlers_connection;
#[path = "dispatch/handlers_replication.rs"]
mod handlers_replication;
#[path = "dispatch/handlers_server.rs"]
mod handlers_server;
#[path = "dispatch/handlers_streams.rs"]
mod handlers_streams;
#[path = "dispatch/handlers_strings.rs"]
mod handlers_strings;
#[path = "dispatch/registry.rs"]
mod registry;

pub use registry::CommandRegistry;

/// Shared handles every command handler works against.
#[derive(Clone)]
pub struct HandlerContext {
    /// Keyspace.
    pub store: Arc<Store>,
    /// Replication view of this process.
    pub replication: Arc<ReplicationState>,
    /// Propagated-byte counter of this process.
    pub ack: Arc<AckCounter>,
    /// Startup configuration.
    pub config: Arc<RuntimeConfig>,
}

/// Reply channel handed to handlers.
///
/// Frames are encoded and forwarded straight into the session's outbound queue so multi-frame
/// replies (`FULLRESYNC` + snapshot blob) stream in order. The worker arms suppression before
/// dispatch on non-responsive sessions, except for the mandatory-response command set.
pub struct ReplySink {
    outbound: SyncSender<Vec<u8>>,
    suppressed: bool,
}

impl ReplySink {
    /// Creates a sink over one session outbound queue.
    #[must_use]
    pub fn new(outbound: SyncSender<Vec<u8>>, suppressed: bool) -> Self {
        Self {
            outbound,
            suppressed,
        }
    }

    /// Encodes and forwards one reply frame unless this dispatch is suppressed.
    pub fn push(&self, frame: &Frame) {
        if !self.suppressed {
            let _ = self.outbound.send(frame.encode());
        }
    }
}

/// Handler function signature used by command registry entries.
pub type CommandHandler =
    fn(&HandlerContext, SessionId, &CommandFrame, &ReplySink) -> MflyResult<()>;

/// Arity constraints for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandArity {
    /// Command must have exactly this many arguments.
    Exact(usize),
    /// Command must have at least this many arguments.
    AtLeast(usize),
}

/// Metadata and callback for one command table entry.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Canonical uppercase command name.
    pub name: &'static str,
    /// Arity constraint used for lightweight input validation.
    pub arity: CommandArity,
    /// Handler callback.
    pub handler: CommandHandler,
}

#[cfg(test)]
#[path = "dispatch/tests.rs"]
mod tests;
