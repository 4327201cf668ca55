//! # wsengine
//! Client-side implementation of the WebSocket protocol (RFC 6455, and the draft-07 revision it
//! grew out of): opening handshake, framing, masking, fragmentation and the closing handshake.
//!
//! The crate is split in two layers:
//!
//! - [`Connection`]: a sans-io protocol engine. It never touches a socket. The transport tells
//!   it what happened (connected, bytes received, write completed, error, disconnected), asks it
//!   for the next bytes to write, and every observable event is reported synchronously to an
//!   [`EventSink`].
//! - [`WebSocket`]: a Tokio driver that connects TCP (and TLS through `tokio-rustls`), runs the
//!   engine on a single task and exposes a cloneable, non-blocking handle to any thread.
//!
//! # Features
//! - `logging`: debug logging of the handshake, closing handshake and failures through the
//!   `log` crate.
//! - `simd`: UTF-8 validation of text messages through `simdutf8`.
//! - `json`: [`WebSocket::send_json`] to serialize a value and send it as a text message.
//!
//! # Client Example
//! ```no_run
//! use wsengine::{Event, WebSocket};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> wsengine::Result<()> {
//!     let (tx, mut rx) = mpsc::unbounded_channel();
//!     let ws = WebSocket::connect("wss://echo.websocket.org".parse()?).open(tx)?;
//!
//!     while let Some(event) = rx.recv().await {
//!         match event {
//!             Event::Open => ws.send_text("hello")?,
//!             Event::Text(text) => {
//!                 println!("{text}");
//!                 ws.close()?;
//!             }
//!             Event::Close(_) => break,
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Memory Safety
//! - Maximum single frame size (default 1 MiB) and reassembled message size (default 2 MiB)
//! - Bounded outbound queue, reported as [`WebSocketError::QueueFull`] when exhausted
//! - Strict frame validation: reserved bits, opcodes, masking and length encodings

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod close;
pub mod codec;
pub mod connection;
pub mod fragment;
pub mod frame;
pub mod handshake;
pub mod sink;

mod control;
mod mask;
mod native;
mod options;
mod queue;
mod stream;
mod utf8;

use std::{io, sync::Arc};

use thiserror::Error;

pub use close::{CloseCode, CloseFrame};
pub use connection::{Connection, ReadyState, Target};
pub use frame::{Frame, OpCode};
pub use handshake::ProtocolVersion;
pub use native::*;
pub use options::*;
pub use sink::{Event, EventSink};

/// A result type for WebSocket operations, using `WebSocketError` as the error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Broad category of a [`WebSocketError`], used to decide how the connection reacts.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The opening handshake failed. The connection never reaches `Open`.
    Handshake,
    /// The peer violated the framing rules. The connection starts a closing handshake.
    Protocol,
    /// The transport failed or went away. The connection closes immediately.
    Transport,
    /// A write or the closing handshake took too long. The connection closes immediately.
    Timeout,
    /// The caller misused the API. The connection is left untouched.
    Usage,
}

/// Represents errors that can occur during WebSocket operations.
///
/// The enum is `Clone` so the same error can be handed to the sink and kept as the
/// connection's closing error; I/O errors are shared behind an [`Arc`] for that reason.
#[derive(Error, Debug, Clone)]
pub enum WebSocketError {
    // ============ handshake ============
    /// The server answered the upgrade request with something other than 101.
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// The "Upgrade" header is missing or is not "websocket".
    #[error("Invalid upgrade header")]
    InvalidUpgradeHeader,

    /// The "Connection" header is missing or does not carry the "upgrade" token.
    #[error("Invalid connection header")]
    InvalidConnectionHeader,

    /// The server did not send a "Sec-WebSocket-Accept" header.
    #[error("Sec-WebSocket-Accept header is missing")]
    MissingSecWebSocketAccept,

    /// The "Sec-WebSocket-Accept" value does not match the key this client sent.
    #[error("Sec-WebSocket-Accept does not match the client key")]
    InvalidSecWebSocketAccept,

    /// The server selected a subprotocol the client never offered.
    #[error("Server selected a subprotocol that was not offered: {0}")]
    InvalidSubprotocol(String),

    /// The upgrade response could not be parsed as HTTP/1.1.
    #[error("Malformed handshake response")]
    MalformedResponse,

    /// The upgrade response header block exceeded the allowed size.
    #[error("Handshake response too large")]
    ResponseTooLarge,

    // ============ protocol ============
    /// A new data frame arrived while a fragmented message was still open.
    #[error("Invalid fragment")]
    InvalidFragment,

    /// A continuation frame arrived without a message to continue.
    #[error("Invalid continuation frame")]
    InvalidContinuationFrame,

    /// A text message or close reason contains invalid UTF-8 data.
    #[error("Invalid UTF-8")]
    InvalidUTF8,

    /// A close frame with a 1 byte payload.
    #[error("Invalid close frame")]
    InvalidCloseFrame,

    /// A close frame with a status code that may not be sent on the wire.
    #[error("Invalid close code")]
    InvalidCloseCode,

    /// Reserved bits are set while no extension was negotiated.
    #[error("Reserved bits are not zero")]
    ReservedBitsNotZero,

    /// A control frame arrived with the FIN bit cleared.
    #[error("Control frame must not be fragmented")]
    ControlFrameFragmented,

    /// A control frame arrived with more than 125 bytes of payload.
    #[error("Control frame too large")]
    ControlFrameTooLarge,

    /// The server masked a frame. Only clients mask.
    #[error("Server frames must not be masked")]
    UnexpectedMask,

    /// An extended length was used for a value that fits a shorter encoding.
    #[error("Payload length not minimally encoded")]
    NonMinimalLength,

    /// A 64-bit payload length with its most significant bit set.
    #[error("Invalid payload length")]
    InvalidLength,

    /// A frame's payload exceeds the configured maximum.
    #[error("Frame too large")]
    FrameTooLarge,

    /// A reassembled message exceeds the configured maximum.
    #[error("Message too big")]
    MessageTooBig,

    /// A frame with a reserved opcode.
    #[error("Invalid opcode (byte={0})")]
    InvalidOpCode(u8),

    // ============ transport ============
    /// Wraps I/O errors from the transport, such as connection resets.
    #[error(transparent)]
    IoError(Arc<io::Error>),

    /// The transport reported end of stream before the connection was closed.
    #[error("Connection closed unexpectedly")]
    UnexpectedDisconnect,

    // ============ timeout ============
    /// A write was not acknowledged by the transport within the send timeout.
    #[error("Send timed out")]
    SendTimeout,

    /// The peer did not answer our close frame within the close timeout.
    #[error("Closing handshake timed out")]
    CloseTimeout,

    // ============ usage ============
    /// Returned when attempting to use a closed or closing connection.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// Returned when sending before the opening handshake completed.
    #[error("Connection is not open")]
    NotOpen,

    /// The outbound queue has no room for the message.
    #[error("Outbound queue is full")]
    QueueFull,

    /// A ping payload or close reason does not fit in a control frame.
    #[error("Control frame payload exceeds 125 bytes")]
    ControlPayloadTooLarge,

    /// Only "ws://" and "wss://" URLs are accepted.
    #[error("Invalid http scheme")]
    InvalidHttpScheme,

    /// The URL has no host to connect to.
    #[error("URL has no host")]
    MissingHost,

    /// Wraps errors from URL parsing.
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    /// Occurs when serialization of JSON data fails.
    #[cfg(feature = "json")]
    #[cfg_attr(docsrs, doc(cfg(feature = "json")))]
    #[error(transparent)]
    Json(Arc<serde_json::Error>),
}

impl WebSocketError {
    /// Returns the category of the error.
    pub fn kind(&self) -> ErrorKind {
        use WebSocketError::*;
        match self {
            InvalidStatusCode(_)
            | InvalidUpgradeHeader
            | InvalidConnectionHeader
            | MissingSecWebSocketAccept
            | InvalidSecWebSocketAccept
            | InvalidSubprotocol(_)
            | MalformedResponse
            | ResponseTooLarge => ErrorKind::Handshake,
            InvalidFragment
            | InvalidContinuationFrame
            | InvalidUTF8
            | InvalidCloseFrame
            | InvalidCloseCode
            | ReservedBitsNotZero
            | ControlFrameFragmented
            | ControlFrameTooLarge
            | UnexpectedMask
            | NonMinimalLength
            | InvalidLength
            | FrameTooLarge
            | MessageTooBig
            | InvalidOpCode(_) => ErrorKind::Protocol,
            IoError(_) | UnexpectedDisconnect => ErrorKind::Transport,
            SendTimeout | CloseTimeout => ErrorKind::Timeout,
            _ => ErrorKind::Usage,
        }
    }

    /// Close status sent to the peer when this error aborts an open connection.
    ///
    /// `None` for errors that do not start a closing handshake.
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            WebSocketError::FrameTooLarge | WebSocketError::MessageTooBig => Some(CloseCode::Size),
            WebSocketError::InvalidUTF8 => Some(CloseCode::Invalid),
            err if err.kind() == ErrorKind::Protocol => Some(CloseCode::Protocol),
            _ => None,
        }
    }
}

impl From<io::Error> for WebSocketError {
    fn from(err: io::Error) -> Self {
        WebSocketError::IoError(Arc::new(err))
    }
}

#[cfg(feature = "json")]
impl From<serde_json::Error> for WebSocketError {
    fn from(err: serde_json::Error) -> Self {
        WebSocketError::Json(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_mapping() {
        assert_eq!(
            WebSocketError::ReservedBitsNotZero.close_code(),
            Some(CloseCode::Protocol)
        );
        assert_eq!(
            WebSocketError::InvalidOpCode(0x3).close_code(),
            Some(CloseCode::Protocol)
        );
        assert_eq!(
            WebSocketError::InvalidUTF8.close_code(),
            Some(CloseCode::Invalid)
        );
        assert_eq!(
            WebSocketError::MessageTooBig.close_code(),
            Some(CloseCode::Size)
        );
        assert_eq!(WebSocketError::CloseTimeout.close_code(), None);
        assert_eq!(WebSocketError::InvalidStatusCode(404).close_code(), None);
    }

    #[test]
    fn test_kinds() {
        assert_eq!(
            WebSocketError::InvalidSecWebSocketAccept.kind(),
            ErrorKind::Handshake
        );
        assert_eq!(
            WebSocketError::from(io::Error::from(io::ErrorKind::ConnectionReset)).kind(),
            ErrorKind::Transport
        );
        assert_eq!(WebSocketError::SendTimeout.kind(), ErrorKind::Timeout);
        assert_eq!(WebSocketError::QueueFull.kind(), ErrorKind::Usage);
    }
}
