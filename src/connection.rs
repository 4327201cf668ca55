//! The protocol engine.
//!
//! A [`Connection`] owns everything one WebSocket client connection needs: the ready state,
//! the handshake, the codec, both fragmentation directions, the outbound queue and the
//! timers. It never performs I/O. Whoever owns the transport feeds it events and pulls
//! bytes from it:
//!
//! | transport event       | engine call                                       |
//! |-----------------------|---------------------------------------------------|
//! | connected             | [`Connection::on_connected`]                      |
//! | bytes received        | [`Connection::on_data`]                           |
//! | ready to write        | [`Connection::poll_transmit`]                     |
//! | write finished        | [`Connection::on_write_complete`]                 |
//! | read or write failed  | [`Connection::on_transport_error`]                |
//! | end of stream         | [`Connection::on_disconnected`]                   |
//! | [`poll_timeout`] hit  | [`Connection::handle_timeout`]                    |
//!
//! [`poll_timeout`]: Connection::poll_timeout
//!
//! Every observable outcome is reported synchronously to the [`EventSink`] passed in.
use std::time::Instant;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder as _;
use url::Url;

use crate::{
    close::{CloseCode, CloseFrame},
    codec::{Decoder, Encoder, Role},
    control::{self, Control},
    fragment::{Fragmenter, Message, Reassembler},
    frame::{Frame, OpCode},
    handshake::{self, HandshakeContext},
    queue::OutboundQueue,
    sink::EventSink,
    Options, Result, WebSocketError,
};

/// Lifecycle of a connection.
///
/// ```text
/// Connecting ──> Open ──> Closing ──> Closed
///      │           │                    ^
///      └───────────┴────────────────────┘
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReadyState {
    /// The transport is being set up or the opening handshake is in progress.
    Connecting,
    /// Messages can be exchanged.
    Open,
    /// A close frame was sent; waiting for the peer's.
    Closing,
    /// Terminal.
    Closed,
}

impl ReadyState {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: ReadyState) -> bool {
        use ReadyState::*;
        matches!(
            (self, next),
            (Connecting, Open)
                | (Connecting, Closed)
                | (Open, Closing)
                | (Open, Closed)
                | (Closing, Closed)
        )
    }
}

/// Where a connection goes: parsed from a `ws://` or `wss://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Host name or address literal, IPv6 literals keep their brackets.
    pub host: String,
    pub port: u16,
    /// `true` for `wss://`.
    pub secure: bool,
    /// Path plus query, as sent in the request line.
    pub resource: String,
}

impl Target {
    /// Extracts the target of `url`.
    ///
    /// # Errors
    /// - [`WebSocketError::InvalidHttpScheme`] for anything but `ws` and `wss`
    /// - [`WebSocketError::MissingHost`] when the URL has no host
    pub fn from_url(url: &Url) -> Result<Self> {
        let secure = match url.scheme() {
            "ws" => false,
            "wss" => true,
            _ => return Err(WebSocketError::InvalidHttpScheme),
        };

        let host = url.host_str().ok_or(WebSocketError::MissingHost)?.to_owned();
        let port = url
            .port_or_known_default()
            .unwrap_or(if secure { 443 } else { 80 });

        let mut resource = url.path().to_owned();
        if resource.is_empty() {
            resource.push('/');
        }
        if let Some(query) = url.query() {
            resource.push('?');
            resource.push_str(query);
        }

        Ok(Self {
            host,
            port,
            secure,
            resource,
        })
    }

    fn default_port(&self) -> u16 {
        if self.secure {
            443
        } else {
            80
        }
    }

    /// Value of the `Host` header: the port is left out when it is the scheme's default.
    pub fn host_header(&self) -> String {
        if self.port == self.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Origin sent when none is configured, `http://` or `https://` followed by the host header.
    pub fn default_origin(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}", self.host_header())
    }

    /// Address to hand to the resolver.
    pub fn authority(&self) -> String {
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        if host.contains(':') {
            format!("[{host}]:{}", self.port)
        } else {
            format!("{host}:{}", self.port)
        }
    }

    /// Host name for TLS server name verification.
    pub fn server_name(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }
}

/// Sans-io WebSocket client connection.
///
/// # Example
/// ```rust
/// use std::time::Instant;
/// use wsengine::{Connection, Event, Options, ReadyState, Target};
///
/// let target = Target::from_url(&"ws://example.com/chat".parse().unwrap()).unwrap();
/// let mut conn = Connection::new(target, Options::default());
/// let mut events: Vec<Event> = Vec::new();
///
/// conn.on_connected();
/// let request = conn.poll_transmit(Instant::now()).unwrap();
/// assert!(request.starts_with(b"GET /chat HTTP/1.1\r\n"));
///
/// // a closed transport before the handshake completed
/// conn.on_disconnected(&mut events);
/// assert_eq!(conn.ready_state(), ReadyState::Closed);
/// ```
pub struct Connection {
    target: Target,
    options: Options,
    state: ReadyState,
    /// Present from `on_connected` until the handshake resolves.
    handshake: Option<HandshakeContext>,
    read_buf: BytesMut,
    /// Set once the byte stream could not be decoded; nothing more is read from the peer.
    discard_input: bool,
    decoder: Decoder,
    encoder: Encoder,
    fragmenter: Fragmenter,
    reassembler: Reassembler,
    queue: OutboundQueue,
    write_in_flight: bool,
    send_deadline: Option<Instant>,
    close_deadline: Option<Instant>,
    protocol: Option<String>,
    closing_error: Option<WebSocketError>,
    close_frame: Option<CloseFrame>,
}

impl Connection {
    /// Creates a connection in [`ReadyState::Connecting`].
    pub fn new(target: Target, options: Options) -> Self {
        Self {
            decoder: Decoder::new(Role::Client, options.max_payload_read),
            encoder: Encoder::new(Role::Client),
            fragmenter: Fragmenter::new(options.max_payload_write),
            reassembler: Reassembler::new(options.max_read_buffer),
            queue: OutboundQueue::new(options.max_queued_bytes),
            target,
            options,
            state: ReadyState::Connecting,
            handshake: None,
            read_buf: BytesMut::new(),
            discard_input: false,
            write_in_flight: false,
            send_deadline: None,
            close_deadline: None,
            protocol: None,
            closing_error: None,
            close_frame: None,
        }
    }

    /// Current ready state.
    pub fn ready_state(&self) -> ReadyState {
        self.state
    }

    /// Subprotocol selected by the server, once open.
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Why the connection closed, `None` while open or after a clean close.
    pub fn closing_error(&self) -> Option<&WebSocketError> {
        self.closing_error.as_ref()
    }

    /// Status and reason of the peer's close frame, if one was received.
    pub fn close_frame(&self) -> Option<&CloseFrame> {
        self.close_frame.as_ref()
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// `true` once the connection is closed and every queued frame was written.
    ///
    /// The close frame answering a peer's close is written after the connection reports
    /// closed; the transport can be shut down once this returns `true`.
    pub fn is_terminated(&self) -> bool {
        self.state == ReadyState::Closed && self.queue.is_empty() && !self.write_in_flight
    }

    // ======== transport events ========

    /// The transport is connected: queues the upgrade request.
    pub fn on_connected(&mut self) {
        if self.state != ReadyState::Connecting || self.handshake.is_some() {
            return;
        }

        let ctx = HandshakeContext::new();
        let request = handshake::build_request(&ctx, &self.target, &self.options);

        #[cfg(feature = "logging")]
        log::debug!(
            "sending upgrade request to {}{}",
            self.target.host_header(),
            self.target.resource
        );

        let queued = self.queue.push_control(request);
        debug_assert!(queued.is_ok(), "nothing is queued before the handshake");
        self.handshake = Some(ctx);
    }

    /// Bytes arrived from the transport.
    ///
    /// Every complete frame in the buffer is dispatched before this returns.
    pub fn on_data(&mut self, data: &[u8], now: Instant, sink: &mut impl EventSink) {
        if self.state == ReadyState::Closed || self.discard_input {
            return;
        }
        self.read_buf.extend_from_slice(data);

        if self.state == ReadyState::Connecting && !self.complete_handshake(sink) {
            return;
        }

        self.process_frames(now, sink);
    }

    /// The write handed out by the last [`poll_transmit`](Self::poll_transmit) finished.
    pub fn on_write_complete(&mut self) {
        self.write_in_flight = false;
        self.send_deadline = None;
    }

    /// The transport failed. The connection closes at once.
    pub fn on_transport_error(&mut self, err: impl Into<WebSocketError>, sink: &mut impl EventSink) {
        if self.state == ReadyState::Closed {
            // the close echo can no longer be written
            self.queue.clear();
            self.write_in_flight = false;
            return;
        }

        let err = err.into();

        #[cfg(feature = "logging")]
        log::debug!("transport failed: {err}");

        sink.on_error(&err);
        self.abort(Some(err), sink);
    }

    /// The transport reached end of stream.
    ///
    /// After a protocol error this completes the close with that error. Anywhere else before
    /// `Closed`, including a local close the peer never answered, it is an unexpected
    /// disconnect.
    pub fn on_disconnected(&mut self, sink: &mut impl EventSink) {
        match self.state {
            ReadyState::Closed => {
                self.queue.clear();
                self.write_in_flight = false;
            }
            ReadyState::Closing if self.closing_error.is_some() => {
                let err = self.closing_error.clone();
                self.abort(err, sink);
            }
            ReadyState::Connecting | ReadyState::Open | ReadyState::Closing => {
                let err = WebSocketError::UnexpectedDisconnect;

                #[cfg(feature = "logging")]
                log::debug!("peer disconnected in state {:?}", self.state);

                sink.on_error(&err);
                self.abort(Some(err), sink);
            }
        }
    }

    /// Hands out the next bytes to write, if no write is in flight.
    ///
    /// The caller must report completion through [`on_write_complete`](Self::on_write_complete)
    /// before the next frame is released.
    pub fn poll_transmit(&mut self, now: Instant) -> Option<Bytes> {
        if self.write_in_flight {
            return None;
        }

        let bytes = self.queue.pop()?;
        self.write_in_flight = true;
        if self.state != ReadyState::Closed {
            self.send_deadline = self.options.send_timeout.map(|timeout| now + timeout);
        }
        Some(bytes)
    }

    /// Earliest instant at which [`handle_timeout`](Self::handle_timeout) has work to do.
    pub fn poll_timeout(&self) -> Option<Instant> {
        match (self.send_deadline, self.close_deadline) {
            (Some(send), Some(close)) => Some(send.min(close)),
            (send, close) => send.or(close),
        }
    }

    /// Fires the expired timers. An expired timer is fatal.
    pub fn handle_timeout(&mut self, now: Instant, sink: &mut impl EventSink) {
        let err = if self.send_deadline.is_some_and(|deadline| deadline <= now) {
            WebSocketError::SendTimeout
        } else if self.close_deadline.is_some_and(|deadline| deadline <= now) {
            WebSocketError::CloseTimeout
        } else {
            return;
        };

        #[cfg(feature = "logging")]
        log::debug!("{err} in state {:?}", self.state);

        sink.on_error(&err);
        self.abort(Some(err), sink);
    }

    // ======== caller API ========

    /// Queues a text message, fragmented as needed.
    pub fn send_text(&mut self, text: &str) -> Result<()> {
        self.send(OpCode::Text, text.as_bytes())
    }

    /// Queues a binary message, fragmented as needed.
    pub fn send_binary(&mut self, data: &[u8]) -> Result<()> {
        self.send(OpCode::Binary, data)
    }

    /// Queues a ping ahead of any pending data.
    ///
    /// Fails with [`WebSocketError::QueueFull`] while too many control frames are waiting.
    pub fn send_ping(&mut self, payload: &[u8]) -> Result<()> {
        self.check_open()?;
        let ping = control::ping(payload)?;
        let bytes = self.encoder.encode_to_bytes(ping);
        self.queue.push_control(bytes)
    }

    /// Starts the closing handshake.
    ///
    /// While connecting this aborts the attempt and closes without error. Closing twice is a
    /// no-op; closing a closed connection is [`WebSocketError::ConnectionClosed`].
    pub fn close(
        &mut self,
        code: CloseCode,
        reason: &str,
        now: Instant,
        sink: &mut impl EventSink,
    ) -> Result<()> {
        match self.state {
            ReadyState::Connecting => {
                #[cfg(feature = "logging")]
                log::debug!("close requested before the handshake completed");

                self.abort(None, sink);
                Ok(())
            }
            ReadyState::Open => {
                let frame = control::close(code, reason)?;

                #[cfg(feature = "logging")]
                log::debug!("closing with {code}");

                let bytes = self.encoder.encode_to_bytes(frame);
                self.queue.push_close(bytes);
                self.transition(ReadyState::Closing);
                self.close_deadline = Some(now + self.options.close_timeout);
                Ok(())
            }
            ReadyState::Closing => Ok(()),
            ReadyState::Closed => Err(WebSocketError::ConnectionClosed),
        }
    }

    fn check_open(&self) -> Result<()> {
        match self.state {
            ReadyState::Open => Ok(()),
            ReadyState::Connecting => Err(WebSocketError::NotOpen),
            ReadyState::Closing | ReadyState::Closed => Err(WebSocketError::ConnectionClosed),
        }
    }

    fn send(&mut self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        self.check_open()?;

        let encoder = &mut self.encoder;
        let frames = self
            .fragmenter
            .split(opcode, payload)
            .into_iter()
            .map(|frame| encoder.encode_to_bytes(frame))
            .collect();

        self.queue.push_data(frames)
    }

    // ======== inbound processing ========

    /// Returns `true` once the connection is open.
    fn complete_handshake(&mut self, sink: &mut impl EventSink) -> bool {
        let Some(ctx) = self.handshake.as_ref() else {
            return false;
        };

        match handshake::parse_response(&self.read_buf, ctx, &self.options) {
            Ok(None) => false,
            Ok(Some(accepted)) => {
                self.read_buf.advance(accepted.consumed);
                self.protocol = accepted.protocol;
                self.handshake = None;
                self.transition(ReadyState::Open);

                #[cfg(feature = "logging")]
                log::debug!(
                    "connection open, protocol={}",
                    self.protocol.as_deref().unwrap_or("none")
                );

                sink.on_open();
                true
            }
            Err(err) => {
                #[cfg(feature = "logging")]
                log::debug!("handshake failed: {err}");

                sink.on_error(&err);
                self.abort(Some(err), sink);
                false
            }
        }
    }

    fn process_frames(&mut self, now: Instant, sink: &mut impl EventSink) {
        while matches!(self.state, ReadyState::Open | ReadyState::Closing) && !self.discard_input
        {
            match self.decoder.decode(&mut self.read_buf) {
                Ok(Some(frame)) => self.on_frame(frame, now, sink),
                Ok(None) => break,
                Err(err) => {
                    // frame boundaries are lost, the rest of the stream cannot be trusted
                    self.discard_input = true;
                    self.read_buf.clear();
                    self.fail(err, now, sink);
                    break;
                }
            }
        }
    }

    fn on_frame(&mut self, frame: Frame, now: Instant, sink: &mut impl EventSink) {
        if frame.opcode.is_control() {
            match Control::parse(frame) {
                Ok(control) => self.on_control(control, sink),
                Err(err) => self.fail(err, now, sink),
            }
            return;
        }

        // data arriving while closing is drained but not delivered
        if self.state != ReadyState::Open {
            return;
        }

        match self.reassembler.push(frame) {
            Ok(Some(Message::Text(text))) => sink.on_text(text),
            Ok(Some(Message::Binary(data))) => sink.on_binary(data),
            Ok(None) => {}
            Err(err) => self.fail(err, now, sink),
        }
    }

    fn on_control(&mut self, control: Control, sink: &mut impl EventSink) {
        match control {
            Control::Ping(payload) if self.state == ReadyState::Open => {
                let bytes = self.encoder.encode_to_bytes(control::pong(&payload));
                if self.queue.push_pong(bytes) {
                    #[cfg(feature = "logging")]
                    log::debug!("pending pong replaced by a newer one");
                }
                sink.on_pong_sent(&payload);
            }
            Control::Pong(payload) if self.state == ReadyState::Open => sink.on_pong(payload),
            Control::Ping(_) | Control::Pong(_) => {}
            Control::Close(received) => self.on_remote_close(received, sink),
        }
    }

    fn on_remote_close(&mut self, received: CloseFrame, sink: &mut impl EventSink) {
        #[cfg(feature = "logging")]
        log::debug!(
            "peer closed with {} {:?} in state {:?}",
            received.code,
            received.reason,
            self.state
        );

        match self.state {
            ReadyState::Open => {
                let echo = Frame::close(control::echo_code(&received), "");
                let bytes = self.encoder.encode_to_bytes(echo);
                self.queue.push_close(bytes);
                self.close_frame = Some(received);
                self.transition(ReadyState::Closing);
                self.finish(None, sink);
            }
            ReadyState::Closing => {
                self.close_frame = Some(received);
                let err = self.closing_error.clone();
                self.finish(err, sink);
            }
            ReadyState::Connecting | ReadyState::Closed => {}
        }
    }

    /// Reacts to a protocol violation by the peer.
    ///
    /// While open, the error is reported and a closing handshake with the matching status is
    /// started; the peer's close completes it with this error. Anywhere else the connection
    /// closes at once.
    fn fail(&mut self, err: WebSocketError, now: Instant, sink: &mut impl EventSink) {
        #[cfg(feature = "logging")]
        log::debug!("protocol error in state {:?}: {err}", self.state);

        sink.on_error(&err);

        if self.state != ReadyState::Open {
            self.abort(Some(err), sink);
            return;
        }

        let code = err.close_code().unwrap_or(CloseCode::Protocol);
        let bytes = self.encoder.encode_to_bytes(Frame::close(code, ""));
        self.queue.push_close(bytes);

        self.reassembler.clear();
        self.closing_error = Some(err);
        self.transition(ReadyState::Closing);
        self.close_deadline = Some(now + self.options.close_timeout);
    }

    // ======== state changes ========

    /// Closes without writing anything else.
    fn abort(&mut self, err: Option<WebSocketError>, sink: &mut impl EventSink) {
        self.queue.clear();
        // a write still in flight is abandoned along with the transport
        self.write_in_flight = false;
        self.finish(err, sink);
    }

    fn finish(&mut self, err: Option<WebSocketError>, sink: &mut impl EventSink) {
        if self.state == ReadyState::Closed {
            return;
        }

        self.transition(ReadyState::Closed);
        self.send_deadline = None;
        self.close_deadline = None;
        self.handshake = None;
        self.read_buf.clear();
        self.reassembler.clear();
        self.closing_error = err;

        #[cfg(feature = "logging")]
        match &self.closing_error {
            Some(err) => log::debug!("connection closed: {err}"),
            None => log::debug!("connection closed cleanly"),
        }

        sink.on_close(self.closing_error.as_ref());
    }

    fn transition(&mut self, next: ReadyState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {:?} -> {:?}",
            self.state,
            next
        );

        if self.state.can_transition_to(next) {
            self.state = next;
        }
    }
}
