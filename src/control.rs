//! Ping, pong and close frames.
//!
//! This module validates incoming control frames and builds outgoing ones. What happens next
//! (queueing the pong, moving to `Closing`, arming the close timer) is decided by the
//! connection, which knows the current state.
use bytes::Bytes;

use crate::{
    close::{CloseCode, CloseFrame},
    frame::{Frame, OpCode, MAX_CONTROL_PAYLOAD},
    Result, WebSocketError,
};

/// A validated incoming control frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Control {
    Ping(Bytes),
    Pong(Bytes),
    Close(CloseFrame),
}

impl Control {
    /// Validates `frame`, which must carry a control opcode.
    pub fn parse(frame: Frame) -> Result<Self> {
        match frame.opcode {
            OpCode::Ping => Ok(Control::Ping(frame.payload.freeze())),
            OpCode::Pong => Ok(Control::Pong(frame.payload.freeze())),
            OpCode::Close => parse_close(&frame).map(Control::Close),
            opcode => Err(WebSocketError::InvalidOpCode(opcode.into())),
        }
    }
}

/// Reads the status and reason of a close frame.
///
/// An empty payload is reported as [`CloseCode::Status`]. A lone status byte, a code that
/// may not travel on the wire and a reason that is not UTF-8 are rejected.
fn parse_close(frame: &Frame) -> Result<CloseFrame> {
    if frame.payload.is_empty() {
        return Ok(CloseFrame {
            code: CloseCode::Status,
            reason: String::new(),
        });
    }

    let code = frame.close_code().ok_or(WebSocketError::InvalidCloseFrame)?;
    if !code.is_allowed() {
        return Err(WebSocketError::InvalidCloseCode);
    }

    let reason = frame.close_reason()?.unwrap_or_default().to_owned();
    Ok(CloseFrame { code, reason })
}

/// The code we answer a peer's close with: theirs, or 1000 when they sent none.
pub(crate) fn echo_code(received: &CloseFrame) -> CloseCode {
    match received.code {
        CloseCode::Status => CloseCode::Normal,
        code => code,
    }
}

/// The pong answering a ping with `payload`.
pub(crate) fn pong(payload: &Bytes) -> Frame {
    Frame::pong(payload)
}

/// Builds a ping, refusing payloads that do not fit in a control frame.
pub(crate) fn ping(payload: &[u8]) -> Result<Frame> {
    if payload.len() > MAX_CONTROL_PAYLOAD {
        return Err(WebSocketError::ControlPayloadTooLarge);
    }
    Ok(Frame::ping(payload))
}

/// Builds the close frame for a local close.
///
/// Local-only codes such as 1005 or 1006 may not be sent and the reason has to fit in the
/// 123 bytes left after the status code.
pub(crate) fn close(code: CloseCode, reason: &str) -> Result<Frame> {
    if !code.is_allowed() {
        return Err(WebSocketError::InvalidCloseCode);
    }
    if 2 + reason.len() > MAX_CONTROL_PAYLOAD {
        return Err(WebSocketError::ControlPayloadTooLarge);
    }
    Ok(Frame::close(code, reason))
}
