//! Inbound traffic from an observer.
//!
//! Observers may only send commands. Anything else is answered with a
//! warning to that observer alone and otherwise ignored.

use dispatch_proto::{Message, ProtocolError, decode_line};
use dispatch_types::InfoMessage;
use tracing::warn;

use crate::error::RouteError;
use crate::state::AppState;
use crate::upstream::CommandDelivery;

/// Handle one line received from observer `origin`.
///
/// Returns the reply for that observer, if any.
pub async fn handle_inbound(state: &AppState, origin: &str, line: &str) -> Option<Message> {
    let line = line.trim_end();
    if line.is_empty() {
        return None;
    }
    let reply = match decode_line(line) {
        Ok(Message::Cmd(command)) => {
            let name = command.name();
            let result = state.upstream.forward(origin, command).await;
            command_info(name, &result)
        }
        Ok(other) => {
            let err = ProtocolError::UnexpectedKind {
                kind: other.kind(),
                from: "observers",
            };
            warn!(origin, error = %err, "Observer message ignored");
            InfoMessage::warn(err.to_string())
        }
        Err(err) => {
            warn!(origin, error = %err, "Observer frame dropped");
            InfoMessage::warn(err.to_string())
        }
    };
    Some(Message::Info(reply))
}

/// The `info` reply describing a command result.
pub fn command_info(cmd: &str, result: &Result<CommandDelivery, RouteError>) -> InfoMessage {
    match result {
        Ok(CommandDelivery::Applied(outcome)) => {
            InfoMessage::command_result(cmd, true, outcome.to_string())
        }
        Ok(CommandDelivery::Rejected(reason)) => {
            InfoMessage::command_result(cmd, false, reason.to_string())
        }
        Ok(CommandDelivery::Forwarded) => {
            InfoMessage::command_result(cmd, true, "forwarded to upstream")
        }
        Err(err) => InfoMessage::command_result(cmd, false, err.to_string()),
    }
}
