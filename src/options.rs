use std::time::Duration;

use crate::handshake::ProtocolVersion;

/// The maximum allowed payload size of a single incoming frame, set to 1 MiB.
///
/// Frames announcing a larger payload are rejected before any of it is buffered.
pub const MAX_PAYLOAD_READ: usize = 1024 * 1024;

/// The maximum size of a reassembled incoming message, set to 2 MiB.
///
/// Once the fragments of a message add up to more than this, the connection is closed
/// with status 1009 instead of growing the buffer.
pub const MAX_READ_BUFFER: usize = 2 * 1024 * 1024;

/// The default maximum payload of an outgoing frame, set to 32 KiB.
///
/// Messages larger than this are sent as several fragments.
pub const MAX_PAYLOAD_WRITE: usize = 32 * 1024;

/// The default budget of encoded data frames waiting to be written, set to 16 MiB.
pub const MAX_QUEUED_BYTES: usize = 16 * 1024 * 1024;

/// How long the closing handshake may wait for the peer's close frame.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration options for a WebSocket connection.
///
/// `Options` governs the handshake (origin, subprotocols, verification, protocol revision),
/// size limits in both directions and the timers of the connection.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use wsengine::Options;
///
/// let options = Options::default()
///     .with_protocols(["chat", "superchat"])
///     .with_origin("https://example.com")
///     .with_max_payload_write(16 * 1024)
///     .with_send_timeout(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct Options {
    /// Value of the origin header. When `None`, it is derived from the target URL.
    pub origin: Option<String>,

    /// Subprotocols offered to the server, in order of preference.
    pub protocols: Vec<String>,

    /// Whether the server's `Sec-WebSocket-Accept` value is checked against the key we sent.
    ///
    /// Some older servers compute it incorrectly; disabling the check still enforces the
    /// status line and the upgrade headers.
    ///
    /// Default: `true`
    pub verify_handshake: bool,

    /// Protocol revision announced in the handshake.
    ///
    /// Default: [`ProtocolVersion::Rfc6455`]
    pub version: ProtocolVersion,

    /// Maximum payload of an outgoing frame. Larger messages are fragmented.
    ///
    /// Default: [`MAX_PAYLOAD_WRITE`]
    pub max_payload_write: usize,

    /// Maximum payload of a single incoming frame.
    ///
    /// Default: [`MAX_PAYLOAD_READ`]
    pub max_payload_read: usize,

    /// Maximum size of a reassembled incoming message.
    ///
    /// Default: [`MAX_READ_BUFFER`]
    pub max_read_buffer: usize,

    /// Budget, in bytes, of encoded data frames waiting for the transport.
    ///
    /// Default: [`MAX_QUEUED_BYTES`]
    pub max_queued_bytes: usize,

    /// How long a single write may stay unacknowledged before the connection is considered
    /// dead. `None` disables the timer.
    ///
    /// Default: `None`
    pub send_timeout: Option<Duration>,

    /// How long the closing handshake waits for the peer's close frame.
    ///
    /// Default: [`CLOSE_TIMEOUT`]
    pub close_timeout: Duration,

    /// Sets `TCP_NODELAY` on the socket opened by the driver.
    ///
    /// Default: `true`
    pub no_delay: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            origin: None,
            protocols: Vec::new(),
            verify_handshake: true,
            version: ProtocolVersion::default(),
            max_payload_write: MAX_PAYLOAD_WRITE,
            max_payload_read: MAX_PAYLOAD_READ,
            max_read_buffer: MAX_READ_BUFFER,
            max_queued_bytes: MAX_QUEUED_BYTES,
            send_timeout: None,
            close_timeout: CLOSE_TIMEOUT,
            no_delay: true,
        }
    }
}

impl Options {
    /// Sets the origin header value.
    pub fn with_origin(self, origin: impl Into<String>) -> Self {
        Self {
            origin: Some(origin.into()),
            ..self
        }
    }

    /// Sets the subprotocols offered to the server.
    pub fn with_protocols<I, S>(self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            protocols: protocols.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    /// Accepts the server's response without checking `Sec-WebSocket-Accept`.
    pub fn without_handshake_verification(self) -> Self {
        Self {
            verify_handshake: false,
            ..self
        }
    }

    /// Sets the protocol revision announced in the handshake.
    pub fn with_version(self, version: ProtocolVersion) -> Self {
        Self { version, ..self }
    }

    /// Sets the maximum payload of an outgoing frame.
    ///
    /// A size of zero is treated as one byte.
    pub fn with_max_payload_write(self, size: usize) -> Self {
        Self {
            max_payload_write: size.max(1),
            ..self
        }
    }

    /// Sets the maximum payload of a single incoming frame.
    pub fn with_max_payload_read(self, size: usize) -> Self {
        Self {
            max_payload_read: size,
            ..self
        }
    }

    /// Sets the maximum size of a reassembled incoming message.
    pub fn with_max_read_buffer(self, size: usize) -> Self {
        Self {
            max_read_buffer: size,
            ..self
        }
    }

    /// Sets the byte budget of the outbound queue.
    pub fn with_max_queued_bytes(self, size: usize) -> Self {
        Self {
            max_queued_bytes: size,
            ..self
        }
    }

    /// Bounds how long a single write may stay in flight.
    pub fn with_send_timeout(self, timeout: Duration) -> Self {
        Self {
            send_timeout: Some(timeout),
            ..self
        }
    }

    /// Removes the send timeout.
    pub fn without_send_timeout(self) -> Self {
        Self {
            send_timeout: None,
            ..self
        }
    }

    /// Bounds how long the closing handshake waits for the peer.
    pub fn with_close_timeout(self, timeout: Duration) -> Self {
        Self {
            close_timeout: timeout,
            ..self
        }
    }

    /// Controls `TCP_NODELAY` on sockets opened by the driver.
    pub fn with_no_delay(self, no_delay: bool) -> Self {
        Self { no_delay, ..self }
    }
}
