//! Tokio driver for the [`Connection`] engine.
//!
//! A spawned task owns the transport and the engine. It reads, hands bytes to the engine,
//! writes whatever the engine releases (one write at a time, through a dedicated writer
//! task) and sleeps until the engine's next deadline. [`WebSocket`] handles talk to it over a
//! bounded command channel and observe it through a watch channel, so they can be cloned
//! and used from any thread without blocking.

mod builder;

use std::{io, time::Instant};

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::{mpsc, watch},
};
use url::Url;

use crate::{
    close::CloseCode, connection::Target, control, Connection, ErrorKind, Event, EventSink,
    Options, ReadyState, Result, WebSocketError,
};

pub use builder::{tls_connector, WebSocketBuilder};

/// Capacity of the channel between [`WebSocket`] handles and the driver task.
pub const COMMAND_CAPACITY: usize = 1024;

/// Size of the buffer the driver reads into.
const READ_CHUNK: usize = 8 * 1024;

/// A request from a handle to the driver task.
#[derive(Debug)]
enum Command {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Close(CloseCode, String),
}

/// What handles can observe of the connection.
#[derive(Debug, Clone)]
struct Status {
    ready_state: ReadyState,
    protocol: Option<String>,
    closing_error: Option<WebSocketError>,
}

impl Status {
    fn connecting() -> Self {
        Self {
            ready_state: ReadyState::Connecting,
            protocol: None,
            closing_error: None,
        }
    }
}

/// Handle to a WebSocket client connection driven by a Tokio task.
///
/// Every method returns immediately: sends are queued for the driver, and incoming messages
/// and state changes are reported to the [`EventSink`] given when the connection was opened.
/// Handles are cheap to clone. Once every handle is dropped the driver starts a normal
/// close.
///
/// # Example
/// ```no_run
/// use wsengine::{Event, WebSocket};
/// use tokio::sync::mpsc;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let (tx, mut rx) = mpsc::unbounded_channel();
///     let ws = WebSocket::connect("ws://localhost:9001/echo".parse()?).open(tx)?;
///
///     while let Some(event) = rx.recv().await {
///         match event {
///             Event::Open => ws.send_binary(vec![1, 2, 3])?,
///             Event::Binary(data) => {
///                 assert_eq!(&data[..], &[1, 2, 3]);
///                 ws.close()?;
///             }
///             Event::Close(err) => {
///                 println!("closed: {err:?}");
///                 break;
///             }
///             _ => {}
///         }
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct WebSocket {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<Status>,
}

impl WebSocket {
    /// Starts building a connection to `url`, a `ws://` or `wss://` URL.
    ///
    /// Nothing happens until [`WebSocketBuilder::open`] is called.
    pub fn connect(url: Url) -> WebSocketBuilder {
        WebSocketBuilder::new(url)
    }

    /// Runs a connection over an already established stream.
    ///
    /// `url` provides the request target and `Host` header; no connection is made to it. The
    /// handshake starts right away.
    ///
    /// # Panics
    /// Panics when called outside of a Tokio runtime.
    pub fn handshake<S, K>(url: Url, io: S, options: Options, sink: K) -> Result<WebSocket>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
        K: EventSink + Send + 'static,
    {
        let target = Target::from_url(&url)?;
        let conn = Connection::new(target, options);
        let (ws, driver) = Self::pair();

        tokio::spawn(async move {
            let mut driver = driver.with(conn, sink);
            driver.run(io).await;
        });

        Ok(ws)
    }

    fn pair() -> (WebSocket, DriverChannels) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (status_tx, status_rx) = watch::channel(Status::connecting());

        let ws = WebSocket {
            commands: commands_tx,
            status: status_rx,
        };
        let channels = DriverChannels {
            commands: commands_rx,
            status: status_tx,
        };
        (ws, channels)
    }

    // ================== observers ====================

    /// Current ready state.
    pub fn ready_state(&self) -> ReadyState {
        self.status.borrow().ready_state
    }

    /// Subprotocol selected by the server, once open.
    pub fn protocol(&self) -> Option<String> {
        self.status.borrow().protocol.clone()
    }

    /// Why the connection closed, `None` while it is alive or after a clean close.
    pub fn closing_error(&self) -> Option<WebSocketError> {
        self.status.borrow().closing_error.clone()
    }

    /// Resolves once the connection is closed, with its closing error.
    pub async fn closed(&self) -> Option<WebSocketError> {
        let mut status = self.status.clone();
        let res = status
            .wait_for(|status| status.ready_state == ReadyState::Closed)
            .await
            .map(|status| status.closing_error.clone());

        match res {
            Ok(err) => err,
            // the driver is gone without publishing its final state
            Err(_) => status.borrow().closing_error.clone(),
        }
    }

    // ================== senders ====================

    /// Queues a text message.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.check_open()?;
        self.command(Command::Text(text.into()))
    }

    /// Queues a binary message.
    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.check_open()?;
        self.command(Command::Binary(data.into()))
    }

    /// Queues a ping. The payload may not exceed 125 bytes.
    pub fn send_ping(&self, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        control::ping(&payload)?;
        self.check_open()?;
        self.command(Command::Ping(payload))
    }

    /// Serializes `data` as JSON and queues it as a text message.
    #[cfg(feature = "json")]
    #[cfg_attr(docsrs, doc(cfg(feature = "json")))]
    pub fn send_json<T: serde::Serialize>(&self, data: &T) -> Result<()> {
        let text = serde_json::to_string(data)?;
        self.send_text(text)
    }

    /// Starts a normal closure (1000).
    ///
    /// Before the connection is open this abandons the attempt instead.
    pub fn close(&self) -> Result<()> {
        self.close_with(CloseCode::Normal, "")
    }

    /// Starts the closing handshake with `code` and `reason`.
    ///
    /// The reason is limited to 123 bytes and `code` must be allowed on the wire.
    pub fn close_with(&self, code: CloseCode, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        control::close(code, &reason)?;

        if self.ready_state() == ReadyState::Closed {
            return Err(WebSocketError::ConnectionClosed);
        }
        self.command(Command::Close(code, reason))
    }

    fn check_open(&self) -> Result<()> {
        match self.ready_state() {
            ReadyState::Open => Ok(()),
            ReadyState::Connecting => Err(WebSocketError::NotOpen),
            ReadyState::Closing | ReadyState::Closed => Err(WebSocketError::ConnectionClosed),
        }
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands.try_send(command).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => WebSocketError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => WebSocketError::ConnectionClosed,
        })
    }
}

// ================== driver ====================

/// The driver's ends of the handle channels.
struct DriverChannels {
    commands: mpsc::Receiver<Command>,
    status: watch::Sender<Status>,
}

impl DriverChannels {
    fn with<K: EventSink>(self, conn: Connection, sink: K) -> Driver<K> {
        Driver {
            conn,
            sink,
            pending: Vec::new(),
            commands: self.commands,
            commands_open: true,
            status: self.status,
        }
    }
}

struct Driver<K> {
    conn: Connection,
    sink: K,
    /// Events raised by the engine, delivered once the status they imply is published.
    pending: Vec<Event>,
    commands: mpsc::Receiver<Command>,
    /// Cleared once every handle was dropped.
    commands_open: bool,
    status: watch::Sender<Status>,
}

/// Current time on the Tokio clock.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

impl<K: EventSink> Driver<K> {
    /// Applies a handle's request to the engine.
    fn apply(&mut self, command: Command) {
        let res = match command {
            Command::Text(text) => self.conn.send_text(&text),
            Command::Binary(data) => self.conn.send_binary(&data),
            Command::Ping(payload) => self.conn.send_ping(&payload),
            Command::Close(code, reason) => {
                self.conn.close(code, &reason, now(), &mut self.pending)
            }
        };

        match res {
            Ok(()) => {}
            // the handle saw room in the channel but the engine's budget is exhausted
            Err(err @ WebSocketError::QueueFull) => self.pending.on_error(&err),
            Err(_err) => {
                // the state changed between the handle's check and this command
                #[cfg(feature = "logging")]
                log::debug!("dropping command: {_err}");
            }
        }
    }

    /// Every handle is gone: nobody can send anymore.
    fn on_handles_dropped(&mut self) {
        self.commands_open = false;

        #[cfg(feature = "logging")]
        log::debug!("all handles dropped, closing");

        let _ = self
            .conn
            .close(CloseCode::Normal, "", now(), &mut self.pending);
    }

    /// Publishes the engine's state to the handles, then delivers the pending events.
    fn flush(&mut self) {
        let conn = &self.conn;
        self.status.send_if_modified(|status| {
            let changed = status.ready_state != conn.ready_state()
                || status.protocol.as_deref() != conn.protocol()
                || status.closing_error.is_some() != conn.closing_error().is_some();

            if changed {
                status.ready_state = conn.ready_state();
                status.protocol = conn.protocol().map(str::to_owned);
                status.closing_error = conn.closing_error().cloned();
            }
            changed
        });

        for event in self.pending.drain(..) {
            event.deliver(&mut self.sink);
        }
    }

    /// Waits for the transport produced by `connect`, honoring a close requested meanwhile.
    async fn establish<S, F>(&mut self, connect: F) -> Option<S>
    where
        F: std::future::Future<Output = Result<S>>,
    {
        tokio::pin!(connect);

        loop {
            tokio::select! {
                res = &mut connect => match res {
                    Ok(stream) => return Some(stream),
                    Err(err) => {
                        #[cfg(feature = "logging")]
                        log::debug!("connecting to {} failed: {err}", self.conn.target().authority());

                        self.conn.on_transport_error(err, &mut self.pending);
                        self.flush();
                        return None;
                    }
                },
                command = self.commands.recv(), if self.commands_open => {
                    match command {
                        Some(command) => self.apply(command),
                        None => self.on_handles_dropped(),
                    }

                    self.flush();
                    if self.conn.ready_state() == ReadyState::Closed {
                        return None;
                    }
                }
            }
        }
    }

    /// Runs the connection over `io` until it is closed and everything queued was written.
    async fn run<S>(&mut self, io: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, writer) = tokio::io::split(io);
        let (frames_tx, frames_rx) = mpsc::channel::<Bytes>(1);
        let (done_tx, mut done_rx) = mpsc::channel::<io::Result<()>>(1);
        let writer = tokio::spawn(write_loop(writer, frames_rx, done_tx));

        let mut read_buf = BytesMut::with_capacity(READ_CHUNK);
        let mut read_open = true;

        self.conn.on_connected();

        loop {
            if let Some(bytes) = self.conn.poll_transmit(now()) {
                if frames_tx.send(bytes).await.is_err() {
                    let err = io::Error::from(io::ErrorKind::BrokenPipe);
                    self.conn.on_transport_error(err, &mut self.pending);
                }
            }

            self.flush();
            if self.conn.is_terminated() {
                break;
            }

            let deadline = self.conn.poll_timeout();
            let timer = async move {
                match deadline {
                    Some(deadline) => {
                        tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await
                    }
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                res = reader.read_buf(&mut read_buf), if read_open => match res {
                    Ok(0) => {
                        read_open = false;
                        self.conn.on_disconnected(&mut self.pending);
                    }
                    Ok(_) => {
                        self.conn.on_data(&read_buf, now(), &mut self.pending);
                        read_buf.clear();
                    }
                    Err(err) => {
                        read_open = false;
                        self.conn.on_transport_error(err, &mut self.pending);
                    }
                },
                Some(res) = done_rx.recv() => match res {
                    Ok(()) => self.conn.on_write_complete(),
                    Err(err) => self.conn.on_transport_error(err, &mut self.pending),
                },
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(command) => self.apply(command),
                    None => self.on_handles_dropped(),
                },
                _ = timer => self.conn.handle_timeout(now(), &mut self.pending),
            }
        }

        // after a protocol error every queued frame was written, so the stream can still be
        // shut down; any other error may have left a write hanging
        let abandoned = self
            .conn
            .closing_error()
            .is_some_and(|err| err.kind() != ErrorKind::Protocol);

        drop(frames_tx);
        if abandoned {
            writer.abort();
        } else {
            let _ = writer.await;
        }
    }
}

/// Writes frames one at a time and reports each completion.
///
/// Shuts the stream down once the driver drops its sender.
async fn write_loop<W>(
    mut writer: W,
    mut frames: mpsc::Receiver<Bytes>,
    done: mpsc::Sender<io::Result<()>>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(bytes) = frames.recv().await {
        let res = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        }
        .await;

        let failed = res.is_err();
        if done.send(res).await.is_err() || failed {
            return;
        }
    }

    let _ = writer.shutdown().await;
}
