//! Consumer-facing notifications.
//!
//! The [`Connection`](crate::Connection) reports everything it observes to an [`EventSink`],
//! synchronously, from whichever task drives it. A sink must not block; hand the event to
//! a channel if real work has to happen. Ready-made sinks collect [`Event`]s into a `Vec`
//! or forward them over a Tokio channel.
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::WebSocketError;

/// Receives the events of one connection.
///
/// `on_close` is called exactly once per connection, after every other notification.
pub trait EventSink {
    /// The opening handshake completed.
    fn on_open(&mut self);

    /// The connection is closed. `err` is `None` after a clean closing handshake or a close
    /// requested while still connecting.
    fn on_close(&mut self, err: Option<&WebSocketError>);

    /// A failure was detected. Followed by `on_close` unless a closing handshake is attempted first.
    fn on_error(&mut self, err: &WebSocketError);

    /// A complete text message.
    fn on_text(&mut self, text: String);

    /// A complete binary message.
    fn on_binary(&mut self, data: Bytes);

    /// A pong arrived.
    fn on_pong(&mut self, _payload: Bytes) {}

    /// A pong answering the peer's ping was queued.
    fn on_pong_sent(&mut self, _payload: &Bytes) {}
}

impl<T: EventSink + ?Sized> EventSink for Box<T> {
    fn on_open(&mut self) {
        (**self).on_open()
    }

    fn on_close(&mut self, err: Option<&WebSocketError>) {
        (**self).on_close(err)
    }

    fn on_error(&mut self, err: &WebSocketError) {
        (**self).on_error(err)
    }

    fn on_text(&mut self, text: String) {
        (**self).on_text(text)
    }

    fn on_binary(&mut self, data: Bytes) {
        (**self).on_binary(data)
    }

    fn on_pong(&mut self, payload: Bytes) {
        (**self).on_pong(payload)
    }

    fn on_pong_sent(&mut self, payload: &Bytes) {
        (**self).on_pong_sent(payload)
    }
}

/// An owned copy of one sink notification.
#[derive(Debug, Clone)]
pub enum Event {
    Open,
    Close(Option<WebSocketError>),
    Error(WebSocketError),
    Text(String),
    Binary(Bytes),
    Pong(Bytes),
    PongSent(Bytes),
}

impl Event {
    /// Replays the event on `sink`.
    pub fn deliver(self, sink: &mut impl EventSink) {
        match self {
            Event::Open => sink.on_open(),
            Event::Close(err) => sink.on_close(err.as_ref()),
            Event::Error(err) => sink.on_error(&err),
            Event::Text(text) => sink.on_text(text),
            Event::Binary(data) => sink.on_binary(data),
            Event::Pong(payload) => sink.on_pong(payload),
            Event::PongSent(payload) => sink.on_pong_sent(&payload),
        }
    }
}

/// Records every event, in order.
impl EventSink for Vec<Event> {
    fn on_open(&mut self) {
        self.push(Event::Open);
    }

    fn on_close(&mut self, err: Option<&WebSocketError>) {
        self.push(Event::Close(err.cloned()));
    }

    fn on_error(&mut self, err: &WebSocketError) {
        self.push(Event::Error(err.clone()));
    }

    fn on_text(&mut self, text: String) {
        self.push(Event::Text(text));
    }

    fn on_binary(&mut self, data: Bytes) {
        self.push(Event::Binary(data));
    }

    fn on_pong(&mut self, payload: Bytes) {
        self.push(Event::Pong(payload));
    }

    fn on_pong_sent(&mut self, payload: &Bytes) {
        self.push(Event::PongSent(payload.clone()));
    }
}

/// Forwards every event to a channel. Events are dropped once the receiver is gone.
impl EventSink for mpsc::UnboundedSender<Event> {
    fn on_open(&mut self) {
        let _ = self.send(Event::Open);
    }

    fn on_close(&mut self, err: Option<&WebSocketError>) {
        let _ = self.send(Event::Close(err.cloned()));
    }

    fn on_error(&mut self, err: &WebSocketError) {
        let _ = self.send(Event::Error(err.clone()));
    }

    fn on_text(&mut self, text: String) {
        let _ = self.send(Event::Text(text));
    }

    fn on_binary(&mut self, data: Bytes) {
        let _ = self.send(Event::Binary(data));
    }

    fn on_pong(&mut self, payload: Bytes) {
        let _ = self.send(Event::Pong(payload));
    }

    fn on_pong_sent(&mut self, payload: &Bytes) {
        let _ = self.send(Event::PongSent(payload.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_sink_records_in_order() {
        let mut sink: Vec<Event> = Vec::new();
        sink.on_open();
        sink.on_text("hi".into());
        sink.on_pong_sent(&Bytes::from_static(b"p"));
        sink.on_close(None);

        assert!(matches!(
            sink.as_slice(),
            [Event::Open, Event::Text(t), Event::PongSent(_), Event::Close(None)] if t == "hi"
        ));
    }

    #[tokio::test]
    async fn test_channel_sink() {
        let (mut tx, mut rx) = mpsc::unbounded_channel::<Event>();
        tx.on_binary(Bytes::from_static(b"\x01\x02"));
        tx.on_error(&WebSocketError::CloseTimeout);
        drop(tx);

        assert!(matches!(rx.recv().await, Some(Event::Binary(b)) if b[..] == [1, 2]));
        assert!(matches!(
            rx.recv().await,
            Some(Event::Error(WebSocketError::CloseTimeout))
        ));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_deliver_replays_events() {
        let recorded = vec![
            Event::Open,
            Event::PongSent(Bytes::from_static(b"p")),
            Event::Close(Some(WebSocketError::UnexpectedDisconnect)),
        ];

        let mut replayed: Vec<Event> = Vec::new();
        for event in recorded {
            event.deliver(&mut replayed);
        }
        assert!(matches!(
            replayed.as_slice(),
            [
                Event::Open,
                Event::PongSent(_),
                Event::Close(Some(WebSocketError::UnexpectedDisconnect))
            ]
        ));
    }

    #[test]
    fn test_boxed_sink() {
        let mut sink: Box<Vec<Event>> = Box::default();
        sink.on_pong(Bytes::from_static(b"x"));
        assert!(matches!(sink.as_slice(), [Event::Pong(_)]));
    }
}
