use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use googletest::prelude::*;
use mfly_common::config::RuntimeConfig;
use mfly_protocol::{CommandFrame, Frame};
use mfly_replication::{AckCounter, ReplicationRole, ReplicationState};
use mfly_storage::{EMPTY_SNAPSHOT, Store};
use rstest::rstest;

use super::{CommandRegistry, HandlerContext, ReplySink};

const SESSION: u64 = 99;

fn test_context() -> HandlerContext {
    HandlerContext {
        store: Arc::new(Store::new()),
        replication: Arc::new(ReplicationState::new(ReplicationRole::Primary)),
        ack: Arc::new(AckCounter::default()),
        config: Arc::new(RuntimeConfig {
            dir: PathBuf::from("/data"),
            ..RuntimeConfig::default()
        }),
    }
}

fn run_command(context: &HandlerContext, parts: &[&str]) -> Vec<Vec<u8>> {
    let registry = CommandRegistry::with_builtin_commands();
    let (outbound_tx, outbound_rx) = mpsc::sync_channel::<Vec<u8>>(64);
    let sink = ReplySink::new(outbound_tx, false);
    let frame = CommandFrame::from_frame(&Frame::array_of_bulks(parts.to_vec()))
        .expect("test request must lower");
    registry
        .dispatch(context, SESSION, &frame, &sink)
        .expect("dispatch must succeed");
    drop(sink);
    outbound_rx.try_iter().collect()
}

fn single_reply(context: &HandlerContext, parts: &[&str]) -> Vec<u8> {
    let mut replies = run_command(context, parts);
    assert_that!(replies.len(), eq(1_usize));
    replies.remove(0)
}

#[rstest]
fn ping_replies_with_a_bulk_pong() {
    let context = test_context();
    assert_that!(
        &single_reply(&context, &["PING"]),
        eq(&b"$4\r\nPONG\r\n".to_vec())
    );
}

#[rstest]
fn echo_replies_with_its_argument() {
    let context = test_context();
    assert_that!(
        &single_reply(&context, &["ECHO", "hey"]),
        eq(&b"$3\r\nhey\r\n".to_vec())
    );
}

#[rstest]
fn dispatch_is_case_insensitive_on_the_command_name() {
    let context = test_context();
    assert_that!(
        &single_reply(&context, &["ping"]),
        eq(&b"$4\r\nPONG\r\n".to_vec())
    );
}

#[rstest]
fn unknown_commands_reply_with_an_error_frame() {
    let context = test_context();
    assert_that!(
        &single_reply(&context, &["NOPE"]),
        eq(&b"-ERR Unknown command 'NOPE'\r\n".to_vec())
    );
}

#[rstest]
fn wrong_argument_count_replies_with_an_error_frame() {
    let context = test_context();
    assert_that!(
        &single_reply(&context, &["ECHO"]),
        eq(&b"-ERR Wrong number of arguments for 'ECHO' command\r\n".to_vec())
    );
}

#[rstest]
fn set_then_get_round_trips_through_the_store() {
    let context = test_context();
    assert_that!(
        &single_reply(&context, &["SET", "foo", "bar"]),
        eq(&b"+OK\r\n".to_vec())
    );
    assert_that!(
        &single_reply(&context, &["GET", "foo"]),
        eq(&b"$3\r\nbar\r\n".to_vec())
    );
    assert_that!(
        &single_reply(&context, &["GET", "missing"]),
        eq(&b"$-1\r\n".to_vec())
    );
}

#[rstest]
fn set_with_px_expires_the_key() {
    let context = test_context();
    assert_that!(
        &single_reply(&context, &["SET", "k", "v", "PX", "100"]),
        eq(&b"+OK\r\n".to_vec())
    );
    assert_that!(
        &single_reply(&context, &["GET", "k"]),
        eq(&b"$1\r\nv\r\n".to_vec())
    );

    thread::sleep(Duration::from_millis(150));
    assert_that!(
        &single_reply(&context, &["GET", "k"]),
        eq(&b"$-1\r\n".to_vec())
    );
}

#[rstest]
fn set_with_a_bad_px_value_is_an_error() {
    let context = test_context();
    assert_that!(
        &single_reply(&context, &["SET", "k", "v", "PX", "soon"]),
        eq(&b"-ERR Value is not an integer or out of range\r\n".to_vec())
    );
}

#[rstest]
fn type_reports_string_stream_or_none() {
    let context = test_context();
    let _ = run_command(&context, &["SET", "s", "v"]);
    let _ = run_command(&context, &["XADD", "x", "1-0", "f", "v"]);

    assert_that!(
        &single_reply(&context, &["TYPE", "s"]),
        eq(&b"+string\r\n".to_vec())
    );
    assert_that!(
        &single_reply(&context, &["TYPE", "x"]),
        eq(&b"+stream\r\n".to_vec())
    );
    assert_that!(
        &single_reply(&context, &["TYPE", "missing"]),
        eq(&b"+none\r\n".to_vec())
    );
}

#[rstest]
fn keys_lists_the_live_keyspace() {
    let context = test_context();
    let _ = run_command(&context, &["SET", "foo", "bar"]);
    assert_that!(
        &single_reply(&context, &["KEYS", "*"]),
        eq(&b"*1\r\n$3\r\nfoo\r\n".to_vec())
    );
}

#[rstest]
fn config_get_returns_the_name_value_pair() {
    let context = test_context();
    assert_that!(
        &single_reply(&context, &["CONFIG", "GET", "dir"]),
        eq(&b"*2\r\n$3\r\ndir\r\n$5\r\n/data\r\n".to_vec())
    );
    assert_that!(
        &single_reply(&context, &["CONFIG", "GET", "dbfilename"]),
        eq(&b"*2\r\n$10\r\ndbfilename\r\n$8\r\ndump.rdb\r\n".to_vec())
    );
}

#[rstest]
fn info_reports_role_replid_and_offset() {
    let context = test_context();
    let reply = single_reply(&context, &["INFO", "replication"]);
    let text = String::from_utf8(reply).expect("INFO body must be UTF-8");
    assert_that!(text.contains("role:master\r\n"), eq(true));
    assert_that!(
        text.contains(&format!(
            "master_replid:{}\r\n",
            context.replication.replication_id()
        )),
        eq(true)
    );
    assert_that!(text.contains("master_repl_offset:0\r\n"), eq(true));
}

#[rstest]
fn replconf_registers_the_replica_and_acknowledges() {
    let context = test_context();
    assert_that!(
        &single_reply(&context, &["REPLCONF", "listening-port", "6380"]),
        eq(&b"+OK\r\n".to_vec())
    );
    assert_that!(context.replication.replica(SESSION).is_some(), eq(true));
    assert_that!(
        &single_reply(&context, &["REPLCONF", "capa", "psync2"]),
        eq(&b"+OK\r\n".to_vec())
    );
    assert_that!(context.replication.replica_count(), eq(1_usize));
}

#[rstest]
fn replconf_getack_reports_the_ack_counter() {
    let context = test_context();
    context.ack.add(37);
    assert_that!(
        &single_reply(&context, &["REPLCONF", "GETACK", "*"]),
        eq(&b"*3\r\n$8\r\nREPLCONF\r\n$3\r\nACK\r\n$2\r\n37\r\n".to_vec())
    );
}

#[rstest]
fn replconf_ack_records_the_offset_without_replying() {
    let context = test_context();
    let _ = run_command(&context, &["REPLCONF", "listening-port", "6380"]);

    let replies = run_command(&context, &["REPLCONF", "ACK", "42"]);
    assert_that!(replies.is_empty(), eq(true));
    let replica = context
        .replication
        .replica(SESSION)
        .expect("replica record must exist");
    assert_that!(replica.acked_bytes(), eq(42_u64));
}

#[rstest]
fn psync_replies_fullresync_then_the_raw_snapshot_blob() {
    let context = test_context();
    let _ = run_command(&context, &["REPLCONF", "listening-port", "6380"]);
    let replies = run_command(&context, &["PSYNC", "?", "-1"]);

    assert_that!(replies.len(), eq(2_usize));
    let expected_line = format!(
        "+FULLRESYNC {} 0\r\n",
        context.replication.replication_id()
    );
    assert_that!(&replies[0], eq(&expected_line.into_bytes()));

    let blob = &replies[1];
    let header = format!("${}\r\n", EMPTY_SNAPSHOT.len()).into_bytes();
    assert_that!(blob.starts_with(&header), eq(true));
    assert_that!(&blob[header.len()..], eq(EMPTY_SNAPSHOT));
    assert_that!(blob.len(), eq(header.len() + EMPTY_SNAPSHOT.len()));

    let replica = context
        .replication
        .replica(SESSION)
        .expect("replica record must exist");
    assert_that!(replica.needs_socket(), eq(true));
}

#[rstest]
fn wait_returns_immediately_when_enough_replicas_acked() {
    let context = test_context();
    assert_that!(
        &single_reply(&context, &["WAIT", "0", "100"]),
        eq(&b":0\r\n".to_vec())
    );
}

#[rstest]
fn wait_counts_replicas_that_caught_up() {
    let context = test_context();
    context.ack.add(27);
    context.replication.ensure_replica(1).record_ack(27);
    context.replication.ensure_replica(2).record_ack(5);

    assert_that!(
        &single_reply(&context, &["WAIT", "1", "200"]),
        eq(&b":1\r\n".to_vec())
    );
}

#[rstest]
fn xadd_assigns_and_validates_ids() {
    let context = test_context();
    assert_that!(
        &single_reply(&context, &["XADD", "s", "0-*"]),
        eq(&b"$3\r\n0-1\r\n".to_vec())
    );
    assert_that!(
        &single_reply(&context, &["XADD", "s", "0-*"]),
        eq(&b"$3\r\n0-2\r\n".to_vec())
    );
    assert_that!(
        &single_reply(&context, &["XADD", "s", "5-*"]),
        eq(&b"$3\r\n5-0\r\n".to_vec())
    );
    assert_that!(
        &single_reply(&context, &["XADD", "s", "5-0"]),
        eq(
            &b"-ERR The ID specified in XADD is equal or smaller than the target stream top item\r\n"
                .to_vec()
        )
    );
    assert_that!(
        &single_reply(&context, &["XADD", "s", "0-0"]),
        eq(&b"-ERR The ID specified in XADD must be greater than 0-0\r\n".to_vec())
    );
}

#[rstest]
fn xrange_replies_with_id_and_field_pairs() {
    let context = test_context();
    let _ = run_command(&context, &["XADD", "s", "1-0", "a", "1"]);
    let _ = run_command(&context, &["XADD", "s", "2-0", "b", "2"]);

    assert_that!(
        &single_reply(&context, &["XRANGE", "s", "-", "+"]),
        eq(&b"*2\r\n*2\r\n$3\r\n1-0\r\n*2\r\n$1\r\na\r\n$1\r\n1\r\n*2\r\n$3\r\n2-0\r\n*2\r\n$1\r\nb\r\n$1\r\n2\r\n"
            .to_vec())
    );
}

#[rstest]
fn xread_returns_entries_after_the_given_id() {
    let context = test_context();
    let _ = run_command(&context, &["XADD", "s", "1-0", "a", "1"]);
    let _ = run_command(&context, &["XADD", "s", "2-0", "b", "2"]);

    assert_that!(
        &single_reply(&context, &["XREAD", "STREAMS", "s", "1-0"]),
        eq(&b"*1\r\n*2\r\n$1\r\ns\r\n*1\r\n*2\r\n$3\r\n2-0\r\n*2\r\n$1\r\nb\r\n$1\r\n2\r\n".to_vec())
    );
}

#[rstest]
fn xread_with_dollar_and_no_new_entries_is_a_null_array() {
    let context = test_context();
    let _ = run_command(&context, &["XADD", "s", "1-0"]);
    assert_that!(
        &single_reply(&context, &["XREAD", "STREAMS", "s", "$"]),
        eq(&b"*-1\r\n".to_vec())
    );
}

#[rstest]
fn suppressed_sinks_swallow_every_reply() {
    let context = test_context();
    let registry = CommandRegistry::with_builtin_commands();
    let (outbound_tx, outbound_rx) = mpsc::sync_channel::<Vec<u8>>(16);
    let sink = ReplySink::new(outbound_tx, true);

    let frame = CommandFrame::from_frame(&Frame::array_of_bulks(["SET", "k", "v"]))
        .expect("request must lower");
    registry
        .dispatch(&context, SESSION, &frame, &sink)
        .expect("dispatch must succeed");
    drop(sink);

    assert_that!(outbound_rx.try_iter().count(), eq(0_usize));
    assert_that!(context.store.get_string("k"), eq(&Some(b"v".to_vec())));
}
