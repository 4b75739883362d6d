use mfly_common::error::MflyResult;
use mfly_common::ids::SessionId;
use mfly_protocol::{CommandFrame, Frame};

use super::{HandlerContext, ReplySink};

pub(super) fn handle_ping(
    _context: &HandlerContext,
    _session_id: SessionId,
    _frame: &CommandFrame,
    sink: &ReplySink,
) -> MflyResult<()> {
    sink.push(&Frame::bulk("PONG"));
    Ok(())
}

pub(super) fn handle_echo(
    _context: &HandlerContext,
    _session_id: SessionId,
    frame: &CommandFrame,
    sink: &ReplySink,
) -> MflyResult<()> {
    sink.push(&Frame::bulk(frame.args[0].clone()));
    Ok(())
}
