use mfly_common::error::MflyResult;
use mfly_common::ids::SessionId;
use mfly_protocol::{CommandFrame, Frame};
use mfly_storage::{BlockMode, IdSpec, RangeBound, ReadStart, StreamEntry};

use super::{HandlerContext, ReplySink};

pub(super) fn handle_xadd(
    context: &HandlerContext,
    _session_id: SessionId,
    frame: &CommandFrame,
    sink: &ReplySink,
) -> MflyResult<()> {
    let (Some(key), Some(id_raw)) = (frame.arg_str(0), frame.arg_str(1)) else {
        sink.push(&Frame::Error(
            "key and id must be valid UTF-8".to_owned(),
        ));
        return Ok(());
    };
    let spec = match IdSpec::parse(id_raw) {
        Ok(spec) => spec,
        Err(error) => {
            sink.push(&Frame::Error(error.to_string()));
            return Ok(());
        }
    };
    let fields = match parse_field_pairs(frame) {
        Ok(fields) => fields,
        Err(message) => {
            sink.push(&Frame::Error(message));
            return Ok(());
        }
    };

    match context.store.set_stream(key, spec, fields) {
        Ok(id) => sink.push(&Frame::bulk(id.to_string())),
        Err(error) => sink.push(&Frame::Error(error.to_string())),
    }
    Ok(())
}

fn parse_field_pairs(frame: &CommandFrame) -> Result<Vec<(String, String)>, String> {
    let raw_fields = &frame.args[2..];
    if raw_fields.len() % 2 != 0 {
        return Err("wrong number of arguments for 'XADD' command".to_owned());
    }
    let mut fields = Vec::with_capacity(raw_fields.len() / 2);
    for pair in raw_fields.chunks_exact(2) {
        let (Ok(field), Ok(value)) = (
            std::str::from_utf8(&pair[0]),
            std::str::from_utf8(&pair[1]),
        ) else {
            return Err("field names and values must be valid UTF-8".to_owned());
        };
        fields.push((field.to_owned(), value.to_owned()));
    }
    Ok(fields)
}

pub(super) fn handle_xrange(
    context: &HandlerContext,
    _session_id: SessionId,
    frame: &CommandFrame,
    sink: &ReplySink,
) -> MflyResult<()> {
    let (Some(key), Some(start_raw), Some(end_raw)) =
        (frame.arg_str(0), frame.arg_str(1), frame.arg_str(2))
    else {
        sink.push(&Frame::Error(
            "key and range bounds must be valid UTF-8".to_owned(),
        ));
        return Ok(());
    };
    let bounds = RangeBound::parse(start_raw).and_then(|start| {
        RangeBound::parse(end_raw).map(|end| (start, end))
    });
    let (start, end) = match bounds {
        Ok(bounds) => bounds,
        Err(error) => {
            sink.push(&Frame::Error(error.to_string()));
            return Ok(());
        }
    };

    let entries = context.store.range_stream(key, start, end);
    sink.push(&Frame::Array(
        entries.iter().map(entry_frame).collect::<Vec<_>>(),
    ));
    Ok(())
}

pub(super) fn handle_xread(
    context: &HandlerContext,
    _session_id: SessionId,
    frame: &CommandFrame,
    sink: &ReplySink,
) -> MflyResult<()> {
    let (block, requests) = match parse_read_request(frame) {
        Ok(parsed) => parsed,
        Err(message) => {
            sink.push(&Frame::Error(message));
            return Ok(());
        }
    };

    match context.store.read_stream(&requests, block) {
        Some(results) => {
            let streams = results
                .iter()
                .map(|result| {
                    Frame::Array(vec![
                        Frame::bulk(result.key.as_bytes()),
                        Frame::Array(result.entries.iter().map(entry_frame).collect::<Vec<_>>()),
                    ])
                })
                .collect::<Vec<_>>();
            sink.push(&Frame::Array(streams));
        }
        None => sink.push(&Frame::NullArray),
    }
    Ok(())
}

fn parse_read_request(
    frame: &CommandFrame,
) -> Result<(BlockMode, Vec<(String, ReadStart)>), String> {
    let mut index = 0;
    let mut block = BlockMode::NonBlocking;

    if frame.arg_str(index).is_some_and(|arg| arg.eq_ignore_ascii_case("BLOCK")) {
        let millis = frame
            .arg_str(index + 1)
            .and_then(|raw| raw.parse::<u64>().ok())
            .ok_or_else(|| "timeout is not an integer or out of range".to_owned())?;
        block = if millis == 0 {
            BlockMode::Indefinite
        } else {
            BlockMode::Timeout(std::time::Duration::from_millis(millis))
        };
        index += 2;
    }

    if !frame.arg_str(index).is_some_and(|arg| arg.eq_ignore_ascii_case("STREAMS")) {
        return Err("syntax error".to_owned());
    }
    index += 1;

    let rest = &frame.args[index..];
    if rest.is_empty() || rest.len() % 2 != 0 {
        return Err(
            "unbalanced XREAD list of streams: for each stream key an ID or '$' must be specified"
                .to_owned(),
        );
    }
    let (keys, ids) = rest.split_at(rest.len() / 2);

    let mut requests = Vec::with_capacity(keys.len());
    for (key_raw, id_raw) in keys.iter().zip(ids) {
        let (Ok(key), Ok(id)) = (std::str::from_utf8(key_raw), std::str::from_utf8(id_raw)) else {
            return Err("stream keys and ids must be valid UTF-8".to_owned());
        };
        let start = ReadStart::parse(id).map_err(|error| error.to_string())?;
        requests.push((key.to_owned(), start));
    }
    Ok((block, requests))
}

fn entry_frame(entry: &StreamEntry) -> Frame {
    Frame::Array(vec![
        Frame::bulk(entry.id.to_string()),
        Frame::flat_pairs(&entry.fields),
    ])
}
