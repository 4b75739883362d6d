use std::thread;
use std::time::{Duration, Instant};

use mfly_common::error::MflyResult;
use mfly_common::ids::SessionId;
use mfly_protocol::{CommandFrame, Frame};
use mfly_storage::EMPTY_SNAPSHOT;
use tracing::{debug, warn};

use super::{HandlerContext, ReplySink};

/// Pause between the `FULLRESYNC` line and the raw snapshot blob, letting the line flush as its
/// own write before the blob follows.
const SNAPSHOT_BLOB_DELAY: Duration = Duration::from_millis(100);
/// Acknowledgement poll cadence of `WAIT`.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub(super) fn handle_replconf(
    context: &HandlerContext,
    session_id: SessionId,
    frame: &CommandFrame,
    sink: &ReplySink,
) -> MflyResult<()> {
    let subcommand = frame.arg_str(0).unwrap_or_default().to_ascii_lowercase();
    match subcommand.as_str() {
        "listening-port" | "capa" => {
            let _ = context.replication.ensure_replica(session_id);
            sink.push(&Frame::simple("OK"));
        }
        "getack" => {
            sink.push(&Frame::array_of_bulks([
                "REPLCONF".to_owned(),
                "ACK".to_owned(),
                context.ack.load().to_string(),
            ]));
        }
        "ack" => {
            let Some(acked) = frame.arg_str(1).and_then(|raw| raw.parse::<u64>().ok()) else {
                warn!(session_id, "REPLCONF ACK carried a non-numeric offset");
                return Ok(());
            };
            match context.replication.replica(session_id) {
                Some(replica) => replica.record_ack(acked),
                None => debug!(session_id, acked, "ACK from an untracked session"),
            }
            // No reply; the acknowledgement stream stays one-directional.
        }
        _ => sink.push(&Frame::simple("OK")),
    }
    Ok(())
}

pub(super) fn handle_psync(
    context: &HandlerContext,
    session_id: SessionId,
    _frame: &CommandFrame,
    sink: &ReplySink,
) -> MflyResult<()> {
    let replica = context.replication.ensure_replica(session_id);
    replica.mark_synced();

    sink.push(&Frame::simple(format!(
        "FULLRESYNC {} 0",
        context.replication.replication_id()
    )));
    thread::sleep(SNAPSHOT_BLOB_DELAY);
    sink.push(&Frame::snapshot_blob(EMPTY_SNAPSHOT));
    debug!(session_id, "served full resync snapshot");
    Ok(())
}

pub(super) fn handle_wait(
    context: &HandlerContext,
    _session_id: SessionId,
    frame: &CommandFrame,
    sink: &ReplySink,
) -> MflyResult<()> {
    let parsed = frame
        .arg_str(0)
        .and_then(|raw| raw.parse::<usize>().ok())
        .zip(frame.arg_str(1).and_then(|raw| raw.parse::<u64>().ok()));
    let Some((wanted, timeout_ms)) = parsed else {
        sink.push(&Frame::Error(
            "value is not an integer or out of range".to_owned(),
        ));
        return Ok(());
    };

    context
        .replication
        .broadcast(&Frame::array_of_bulks(["REPLCONF", "GETACK", "*"]).encode());

    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    let count = loop {
        let count = context
            .replication
            .acked_replica_count_at_or_above(context.ack.load());
        if count >= wanted || Instant::now() >= deadline {
            break count;
        }
        thread::sleep(WAIT_POLL_INTERVAL);
    };
    sink.push(&Frame::Int(i64::try_from(count).unwrap_or(i64::MAX)));
    Ok(())
}
