//! Per-connection session lifecycle.
//!
//! Every session runs three activities joined by bounded channels: a read loop that feeds the
//! pipelined decoder, a worker that dispatches commands (or drives the replica-side handshake),
//! and a write loop that drains the outbound queue. Closing the socket ends the read loop, which
//! cascades through the channels until all three exit.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use mfly_common::error::{MflyError, MflyResult};
use mfly_common::ids::{SessionId, allocate_session_id};
use mfly_protocol::{CommandFrame, Frame, decode_pipeline};
use tracing::{debug, info, warn};

use crate::dispatch::{CommandRegistry, HandlerContext, ReplySink};

/// Socket read chunk size.
const READ_CHUNK_BYTES: usize = 1024;
/// Capacity of the per-session inbound and outbound channels.
const SESSION_QUEUE_LEN: usize = 64;
/// Commands answered even on non-responsive sessions, so `REPLCONF GETACK *` gets its reply.
const MANDATORY_RESPONSE_COMMANDS: &[&str] = &["REPLCONF"];

/// Everything a session needs besides its socket.
pub struct ServerShared {
    /// Handles threaded into command handlers.
    pub context: HandlerContext,
    /// Immutable command table.
    pub registry: CommandRegistry,
}

/// Position inside the replica-side handshake; one step per expected reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
    /// Sent `PING`, expecting `+PONG`.
    Ping,
    /// Sent `REPLCONF listening-port`, expecting `+OK`.
    ListeningPort,
    /// Sent `REPLCONF capa psync2`, expecting `+OK`.
    Capa,
    /// Sent `PSYNC ? -1`, expecting `+FULLRESYNC <replid> 0`.
    Psync,
    /// Expecting the raw snapshot blob that follows `FULLRESYNC`.
    Snapshot,
}

/// Who sits at the other end of an established connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// An ordinary client; every command is answered.
    Client,
    /// The primary feeding this replica; replies are suppressed outside the mandatory set.
    Upstream,
}

/// Connection lifecycle state, transitioned by the worker on explicit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Replica-side handshake in progress; normal dispatch is suspended.
    Handshaking(HandshakeStep),
    /// Normal dispatch mode.
    Established(SessionRole),
    /// Torn down; no further frames are processed.
    Closed,
}

/// Spawns the session for one accepted client connection.
///
/// # Errors
///
/// Returns `MflyError::Io` when the socket cannot be cloned or a thread cannot be spawned.
pub fn spawn_client_session(
    socket: TcpStream,
    shared: Arc<ServerShared>,
) -> MflyResult<SessionId> {
    spawn(socket, SessionState::Established(SessionRole::Client), shared)
}

/// Spawns the outbound session a replica runs against its primary and starts the handshake.
///
/// # Errors
///
/// Returns `MflyError::Io` when the socket cannot be cloned or a thread cannot be spawned.
pub fn spawn_upstream_session(
    socket: TcpStream,
    shared: Arc<ServerShared>,
) -> MflyResult<SessionId> {
    spawn(
        socket,
        SessionState::Handshaking(HandshakeStep::Ping),
        shared,
    )
}

fn spawn(
    socket: TcpStream,
    initial: SessionState,
    shared: Arc<ServerShared>,
) -> MflyResult<SessionId> {
    let session_id = allocate_session_id();
    let state = Arc::new(Mutex::new(initial));
    let (inbound_tx, inbound_rx) = mpsc::sync_channel::<(Vec<u8>, Frame)>(SESSION_QUEUE_LEN);
    let (outbound_tx, outbound_rx) = mpsc::sync_channel::<Vec<u8>>(SESSION_QUEUE_LEN);

    if initial == SessionState::Handshaking(HandshakeStep::Ping) {
        send_encoded(&outbound_tx, &Frame::array_of_bulks(["PING"]))?;
    }

    let reader_socket = socket.try_clone().map_err(|error| MflyError::from_io(&error))?;
    let writer_socket = socket.try_clone().map_err(|error| MflyError::from_io(&error))?;

    let _ = spawn_named(format!("mfly-read-{session_id}"), {
        let state = Arc::clone(&state);
        let shared = Arc::clone(&shared);
        move || read_loop(session_id, reader_socket, &inbound_tx, &state, &shared)
    })?;
    let _ = spawn_named(format!("mfly-write-{session_id}"), move || {
        write_loop(session_id, writer_socket, &outbound_rx);
    })?;
    let _ = spawn_named(format!("mfly-worker-{session_id}"), move || {
        worker_loop(
            session_id,
            &socket,
            &inbound_rx,
            &outbound_tx,
            &state,
            &shared,
        );
    })?;

    Ok(session_id)
}

fn spawn_named(
    name: String,
    body: impl FnOnce() + Send + 'static,
) -> MflyResult<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(name)
        .spawn(body)
        .map_err(|error| MflyError::from_io(&error))
}

fn read_loop(
    session_id: SessionId,
    mut socket: TcpStream,
    inbound_tx: &SyncSender<(Vec<u8>, Frame)>,
    state: &Mutex<SessionState>,
    shared: &ServerShared,
) {
    let mut pending = Vec::new();
    let mut chunk = [0_u8; READ_CHUNK_BYTES];
    loop {
        match socket.read(&mut chunk) {
            Ok(0) => {
                debug!(session_id, "peer closed the connection");
                return;
            }
            Ok(read_len) => {
                pending.extend_from_slice(&chunk[..read_len]);
                let batch = decode_pipeline(&pending);
                for (raw, frame) in batch.frames {
                    register_inbound_frame(shared, state, &raw, &frame);
                    if inbound_tx.send((raw, frame)).is_err() {
                        return;
                    }
                }
                if let Some(message) = batch.malformed {
                    // The current buffer is unusable, but the session itself continues.
                    warn!(session_id, %message, "dropping undecodable read buffer");
                }
                pending.drain(..batch.consumed);
            }
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {}
            Err(error) => {
                warn!(session_id, %error, "read from connection failed");
                return;
            }
        }
    }
}

/// Propagation and acknowledgement bookkeeping performed before a frame enters the worker queue.
fn register_inbound_frame(
    shared: &ServerShared,
    state: &Mutex<SessionState>,
    raw: &[u8],
    frame: &Frame,
) {
    if shared.context.replication.is_primary() && is_propagated_write(frame) {
        // The counter moves before the fan-out is enqueued, so WAIT may briefly observe zero
        // caught-up replicas right after a write.
        shared.context.ack.add(raw.len() as u64);
        shared.context.replication.broadcast(raw);
    }
    let established_upstream = matches!(
        *state.lock().unwrap_or_else(PoisonError::into_inner),
        SessionState::Established(SessionRole::Upstream)
    );
    if established_upstream {
        // This running total is what `REPLCONF GETACK *` reports back to the primary.
        shared.context.ack.add(raw.len() as u64);
    }
}

fn is_propagated_write(frame: &Frame) -> bool {
    let Frame::Array(items) = frame else {
        return false;
    };
    matches!(items.first(), Some(Frame::Bulk(name)) if name.eq_ignore_ascii_case(b"SET"))
}

fn write_loop(session_id: SessionId, mut socket: TcpStream, outbound_rx: &Receiver<Vec<u8>>) {
    while let Ok(payload) = outbound_rx.recv() {
        if let Err(error) = socket.write_all(&payload) {
            warn!(session_id, %error, "write to connection failed");
            return;
        }
    }
}

fn worker_loop(
    session_id: SessionId,
    socket: &TcpStream,
    inbound_rx: &Receiver<(Vec<u8>, Frame)>,
    outbound_tx: &SyncSender<Vec<u8>>,
    state: &Mutex<SessionState>,
    shared: &ServerShared,
) {
    while let Ok((_raw, frame)) = inbound_rx.recv() {
        let current = *state.lock().unwrap_or_else(PoisonError::into_inner);
        match current {
            SessionState::Handshaking(step) => {
                match advance_handshake(step, &frame, outbound_tx, shared) {
                    Ok(Some(next)) => set_state(state, SessionState::Handshaking(next)),
                    Ok(None) => {
                        info!(session_id, "handshake complete; mirroring the primary feed");
                        set_state(
                            state,
                            SessionState::Established(SessionRole::Upstream),
                        );
                    }
                    Err(error) => {
                        warn!(session_id, %error, "handshake aborted");
                        break;
                    }
                }
            }
            SessionState::Established(role) => {
                dispatch_frame(session_id, role, &frame, outbound_tx, socket, shared);
            }
            SessionState::Closed => break,
        }
    }

    set_state(state, SessionState::Closed);
    if shared
        .context
        .replication
        .remove_replica(session_id)
        .is_some()
    {
        info!(session_id, "replica session terminated; record dropped");
    }
    let _ = socket.shutdown(Shutdown::Both);
}

fn dispatch_frame(
    session_id: SessionId,
    role: SessionRole,
    frame: &Frame,
    outbound_tx: &SyncSender<Vec<u8>>,
    socket: &TcpStream,
    shared: &ServerShared,
) {
    match CommandFrame::from_frame(frame) {
        Ok(command) => {
            let suppressed = role == SessionRole::Upstream
                && !MANDATORY_RESPONSE_COMMANDS.contains(&command.name.as_str());
            let sink = ReplySink::new(outbound_tx.clone(), suppressed);
            if let Err(error) =
                shared
                    .registry
                    .dispatch(&shared.context, session_id, &command, &sink)
            {
                warn!(session_id, command = command.name.as_str(), %error, "handler failed");
            }
            maybe_attach_replica_socket(session_id, socket, shared);
        }
        Err(message) => {
            if role == SessionRole::Client {
                let _ = outbound_tx.send(Frame::Error(message).encode());
            }
        }
    }
}

/// Once this session's replica record finished its handshake, hand it the socket so buffered
/// propagated writes begin flowing.
fn maybe_attach_replica_socket(session_id: SessionId, socket: &TcpStream, shared: &ServerShared) {
    if !shared.context.replication.is_primary() {
        return;
    }
    let Some(replica) = shared.context.replication.replica(session_id) else {
        return;
    };
    if !replica.needs_socket() {
        return;
    }
    match socket.try_clone() {
        Ok(clone) => {
            if replica.attach_socket(clone) {
                info!(session_id, "replica socket attached; propagation active");
            }
        }
        Err(error) => warn!(session_id, %error, "cloning socket for replica writer failed"),
    }
}

fn advance_handshake(
    step: HandshakeStep,
    frame: &Frame,
    outbound_tx: &SyncSender<Vec<u8>>,
    shared: &ServerShared,
) -> MflyResult<Option<HandshakeStep>> {
    match step {
        HandshakeStep::Ping => {
            // Redis pongs with a simple string here; this server's own PING handler uses a
            // bulk. Both shapes satisfy the step.
            match frame {
                Frame::Simple(text) if text == "PONG" => {}
                Frame::Bulk(payload) if payload.as_slice() == b"PONG" => {}
                other => {
                    return Err(MflyError::Handshake(format!("expected +PONG, got {other:?}")));
                }
            }
            send_encoded(
                outbound_tx,
                &Frame::array_of_bulks([
                    "REPLCONF".to_owned(),
                    "listening-port".to_owned(),
                    shared.context.config.port.to_string(),
                ]),
            )?;
            Ok(Some(HandshakeStep::ListeningPort))
        }
        HandshakeStep::ListeningPort => {
            expect_simple(frame, "OK")?;
            send_encoded(
                outbound_tx,
                &Frame::array_of_bulks(["REPLCONF", "capa", "psync2"]),
            )?;
            Ok(Some(HandshakeStep::Capa))
        }
        HandshakeStep::Capa => {
            expect_simple(frame, "OK")?;
            send_encoded(outbound_tx, &Frame::array_of_bulks(["PSYNC", "?", "-1"]))?;
            Ok(Some(HandshakeStep::Psync))
        }
        HandshakeStep::Psync => match frame {
            Frame::Simple(text) if text.starts_with("FULLRESYNC ") => {
                Ok(Some(HandshakeStep::Snapshot))
            }
            other => Err(MflyError::Handshake(format!(
                "expected FULLRESYNC, got {other:?}"
            ))),
        },
        HandshakeStep::Snapshot => match frame {
            Frame::Bulk(payload) => {
                debug!(len = payload.len(), "received full resync snapshot");
                Ok(None)
            }
            other => Err(MflyError::Handshake(format!(
                "expected snapshot payload, got {other:?}"
            ))),
        },
    }
}

fn expect_simple(frame: &Frame, expected: &str) -> MflyResult<()> {
    match frame {
        Frame::Simple(text) if text == expected => Ok(()),
        other => Err(MflyError::Handshake(format!(
            "expected +{expected}, got {other:?}"
        ))),
    }
}

fn send_encoded(outbound_tx: &SyncSender<Vec<u8>>, frame: &Frame) -> MflyResult<()> {
    outbound_tx
        .send(frame.encode())
        .map_err(|_| MflyError::InvalidState("session outbound queue is closed"))
}

fn set_state(state: &Mutex<SessionState>, next: SessionState) {
    *state.lock().unwrap_or_else(PoisonError::into_inner) = next;
}

#[cfg(test)]
mod tests {
    use super::{HandshakeStep, ServerShared, advance_handshake};
    use crate::dispatch::{CommandRegistry, HandlerContext};
    use googletest::prelude::*;
    use mfly_common::config::RuntimeConfig;
    use mfly_protocol::Frame;
    use mfly_replication::{AckCounter, ReplicationRole, ReplicationState};
    use mfly_storage::Store;
    use rstest::rstest;
    use std::sync::Arc;
    use std::sync::mpsc;

    fn shared_with_port(port: u16) -> ServerShared {
        let config = RuntimeConfig {
            port,
            ..RuntimeConfig::default()
        };
        ServerShared {
            context: HandlerContext {
                store: Arc::new(Store::new()),
                replication: Arc::new(ReplicationState::new(ReplicationRole::Primary)),
                ack: Arc::new(AckCounter::default()),
                config: Arc::new(config),
            },
            registry: CommandRegistry::with_builtin_commands(),
        }
    }

    #[rstest]
    fn handshake_walks_all_four_steps_and_sends_each_request() {
        let shared = shared_with_port(6380);
        let (outbound_tx, outbound_rx) = mpsc::sync_channel::<Vec<u8>>(16);

        let step = advance_handshake(
            HandshakeStep::Ping,
            &Frame::simple("PONG"),
            &outbound_tx,
            &shared,
        )
        .expect("PONG must advance the stepper");
        assert_that!(step, eq(Some(HandshakeStep::ListeningPort)));
        assert_that!(
            &outbound_rx.recv().expect("request must be queued"),
            eq(&b"*3\r\n$8\r\nREPLCONF\r\n$14\r\nlistening-port\r\n$4\r\n6380\r\n".to_vec())
        );

        let step = advance_handshake(
            HandshakeStep::ListeningPort,
            &Frame::simple("OK"),
            &outbound_tx,
            &shared,
        )
        .expect("OK must advance the stepper");
        assert_that!(step, eq(Some(HandshakeStep::Capa)));
        assert_that!(
            &outbound_rx.recv().expect("request must be queued"),
            eq(&b"*3\r\n$8\r\nREPLCONF\r\n$4\r\ncapa\r\n$6\r\npsync2\r\n".to_vec())
        );

        let step = advance_handshake(
            HandshakeStep::Capa,
            &Frame::simple("OK"),
            &outbound_tx,
            &shared,
        )
        .expect("OK must advance the stepper");
        assert_that!(step, eq(Some(HandshakeStep::Psync)));
        assert_that!(
            &outbound_rx.recv().expect("request must be queued"),
            eq(&b"*3\r\n$5\r\nPSYNC\r\n$1\r\n?\r\n$2\r\n-1\r\n".to_vec())
        );

        let step = advance_handshake(
            HandshakeStep::Psync,
            &Frame::simple("FULLRESYNC 75cd7bc10c49047e0d163660f3b90625b1af31dc 0"),
            &outbound_tx,
            &shared,
        )
        .expect("FULLRESYNC must advance the stepper");
        assert_that!(step, eq(Some(HandshakeStep::Snapshot)));

        let step = advance_handshake(
            HandshakeStep::Snapshot,
            &Frame::bulk(b"REDIS0011-fixture".to_vec()),
            &outbound_tx,
            &shared,
        )
        .expect("snapshot blob must finish the handshake");
        assert_that!(step, eq(None));
    }

    #[rstest]
    fn unexpected_replies_abort_the_handshake() {
        let shared = shared_with_port(6380);
        let (outbound_tx, _outbound_rx) = mpsc::sync_channel::<Vec<u8>>(16);

        let result = advance_handshake(
            HandshakeStep::Ping,
            &Frame::simple("NOPE"),
            &outbound_tx,
            &shared,
        );
        assert_that!(result.is_err(), eq(true));

        let result = advance_handshake(
            HandshakeStep::Psync,
            &Frame::simple("CONTINUE"),
            &outbound_tx,
            &shared,
        );
        assert_that!(result.is_err(), eq(true));
    }

    #[rstest]
    fn set_requests_are_recognised_case_insensitively() {
        assert_that!(
            super::is_propagated_write(&Frame::array_of_bulks(["set", "k", "v"])),
            eq(true)
        );
        assert_that!(
            super::is_propagated_write(&Frame::array_of_bulks(["GET", "k"])),
            eq(false)
        );
        assert_that!(super::is_propagated_write(&Frame::simple("SET")), eq(false));
    }
}
