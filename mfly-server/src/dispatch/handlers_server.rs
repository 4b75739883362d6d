use mfly_common::error::MflyResult;
use mfly_common::ids::SessionId;
use mfly_protocol::{CommandFrame, Frame};

use super::{HandlerContext, ReplySink};

pub(super) fn handle_info(
    context: &HandlerContext,
    _session_id: SessionId,
    frame: &CommandFrame,
    sink: &ReplySink,
) -> MflyResult<()> {
    // Only the replication section is populated; any requested section yields the same body.
    let _section = frame.arg_str(0);
    let info = format!(
        "role:{}\r\nmaster_replid:{}\r\nmaster_repl_offset:0\r\n",
        context.replication.role().wire_label(),
        context.replication.replication_id(),
    );
    sink.push(&Frame::bulk(info));
    Ok(())
}

pub(super) fn handle_config(
    context: &HandlerContext,
    _session_id: SessionId,
    frame: &CommandFrame,
    sink: &ReplySink,
) -> MflyResult<()> {
    let Some(subcommand) = frame.arg_str(0) else {
        sink.push(&Frame::Error("unsupported CONFIG subcommand".to_owned()));
        return Ok(());
    };
    if !subcommand.eq_ignore_ascii_case("GET") {
        sink.push(&Frame::Error(format!(
            "unsupported CONFIG subcommand '{subcommand}'"
        )));
        return Ok(());
    }

    let Some(parameter) = frame.arg_str(1) else {
        sink.push(&Frame::Error("CONFIG parameter must be valid UTF-8".to_owned()));
        return Ok(());
    };
    let value = match parameter {
        "dir" => context.config.dir.display().to_string(),
        "dbfilename" => context.config.dbfilename.clone(),
        _ => String::new(),
    };
    sink.push(&Frame::array_of_bulks([parameter.to_owned(), value]));
    Ok(())
}
