use std::time::Duration;

use mfly_common::error::MflyResult;
use mfly_common::ids::SessionId;
use mfly_protocol::{CommandFrame, Frame};

use super::{HandlerContext, ReplySink};

pub(super) fn handle_set(
    context: &HandlerContext,
    _session_id: SessionId,
    frame: &CommandFrame,
    sink: &ReplySink,
) -> MflyResult<()> {
    let Some(key) = frame.arg_str(0) else {
        sink.push(&Frame::Error("key must be valid UTF-8".to_owned()));
        return Ok(());
    };
    let value = frame.args[1].clone();
    let ttl = match parse_set_ttl(frame) {
        Ok(ttl) => ttl,
        Err(message) => {
            sink.push(&Frame::Error(message));
            return Ok(());
        }
    };

    context.store.set_string(key, value, ttl);
    sink.push(&Frame::simple("OK"));
    Ok(())
}

fn parse_set_ttl(frame: &CommandFrame) -> Result<Option<Duration>, String> {
    let mut ttl = None;
    let mut index = 2;
    while index < frame.args.len() {
        let Some(option) = frame.arg_str(index) else {
            return Err("syntax error".to_owned());
        };
        if option.eq_ignore_ascii_case("PX") {
            let millis = frame
                .arg_str(index + 1)
                .and_then(|raw| raw.parse::<u64>().ok())
                .ok_or_else(|| "value is not an integer or out of range".to_owned())?;
            ttl = Some(Duration::from_millis(millis));
            index += 2;
        } else {
            return Err("syntax error".to_owned());
        }
    }
    Ok(ttl)
}

pub(super) fn handle_get(
    context: &HandlerContext,
    _session_id: SessionId,
    frame: &CommandFrame,
    sink: &ReplySink,
) -> MflyResult<()> {
    let reply = frame
        .arg_str(0)
        .and_then(|key| context.store.get_string(key))
        .map_or(Frame::NullBulk, Frame::Bulk);
    sink.push(&reply);
    Ok(())
}

pub(super) fn handle_type(
    context: &HandlerContext,
    _session_id: SessionId,
    frame: &CommandFrame,
    sink: &ReplySink,
) -> MflyResult<()> {
    let label = frame
        .arg_str(0)
        .and_then(|key| context.store.value_kind(key))
        .map_or("none", |kind| kind.wire_label());
    sink.push(&Frame::simple(label));
    Ok(())
}

pub(super) fn handle_keys(
    context: &HandlerContext,
    _session_id: SessionId,
    _frame: &CommandFrame,
    sink: &ReplySink,
) -> MflyResult<()> {
    // Only the `*` pattern is supported; anything else lists the whole keyspace too.
    sink.push(&Frame::array_of_bulks(context.store.keys()));
    Ok(())
}
