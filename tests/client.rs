use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::{
    io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream},
    sync::mpsc,
};
use tokio_util::codec::Framed;
use wsengine::{
    codec::{Codec, Role},
    handshake::accept_key,
    CloseCode, Event, Frame, OpCode, Options, ProtocolVersion, ReadyState, WebSocket,
    WebSocketError,
};

async fn read_request(io: &mut DuplexStream) -> anyhow::Result<String> {
    let mut buf = Vec::new();
    while !buf.ends_with(b"\r\n\r\n") {
        buf.push(io.read_u8().await?);
    }
    Ok(String::from_utf8(buf)?)
}

fn header<'a>(request: &'a str, name: &str) -> Option<&'a str> {
    request.lines().find_map(|line| {
        let (key, value) = line.split_once(": ")?;
        key.eq_ignore_ascii_case(name).then_some(value)
    })
}

async fn respond(io: &mut DuplexStream, accept: &str) -> anyhow::Result<()> {
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         upgrade: WebSocket\r\n\
         connection: keep-alive, Upgrade\r\n\
         sec-websocket-accept: {accept}\r\n\r\n"
    );
    io.write_all(response.as_bytes()).await?;
    Ok(())
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> anyhow::Result<Event> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("sink dropped"))
}

fn connect(
    url: &str,
    options: Options,
) -> anyhow::Result<(WebSocket, DuplexStream, mpsc::UnboundedReceiver<Event>)> {
    let (client, server) = duplex(16 * 1024);
    let (tx, rx) = mpsc::unbounded_channel();
    let ws = WebSocket::handshake(url.parse()?, client, options, tx)?;
    Ok((ws, server, rx))
}

#[tokio::test]
async fn test_rfc6455_request() -> anyhow::Result<()> {
    let options = Options::default().with_protocols(["graphql-ws", "chat"]);
    let (_ws, mut io, _rx) = connect("ws://example.com:8080/live?room=7", options)?;

    let request = read_request(&mut io).await?;
    assert!(request.starts_with("GET /live?room=7 HTTP/1.1\r\n"));
    assert_eq!(header(&request, "Host"), Some("example.com:8080"));
    assert_eq!(header(&request, "Upgrade"), Some("websocket"));
    assert_eq!(header(&request, "Sec-WebSocket-Version"), Some("13"));
    assert_eq!(header(&request, "Origin"), Some("http://example.com:8080"));
    assert_eq!(
        header(&request, "Sec-WebSocket-Protocol"),
        Some("graphql-ws, chat")
    );

    let key = header(&request, "Sec-WebSocket-Key").unwrap_or_default();
    assert_eq!(base64_len(key), 16);
    Ok(())
}

/// Decoded length of a padded base64 string.
fn base64_len(encoded: &str) -> usize {
    let padding = encoded.bytes().rev().take_while(|&b| b == b'=').count();
    encoded.len() / 4 * 3 - padding
}

#[tokio::test]
async fn test_draft07_request() -> anyhow::Result<()> {
    let options = Options::default()
        .with_version(ProtocolVersion::Draft07)
        .with_origin("https://app.example.com");
    let (_ws, mut io, _rx) = connect("wss://example.com/", options)?;

    let request = read_request(&mut io).await?;
    assert_eq!(header(&request, "Host"), Some("example.com"));
    assert_eq!(header(&request, "Sec-WebSocket-Version"), Some("7"));
    assert_eq!(
        header(&request, "Sec-WebSocket-Origin"),
        Some("https://app.example.com")
    );
    assert_eq!(header(&request, "Origin"), None);
    assert_eq!(header(&request, "Sec-WebSocket-Protocol"), None);
    Ok(())
}

#[tokio::test]
async fn test_lenient_header_casing() -> anyhow::Result<()> {
    let (ws, mut io, mut rx) = connect("ws://localhost/", Options::default())?;

    let request = read_request(&mut io).await?;
    let key = header(&request, "Sec-WebSocket-Key").unwrap_or_default();
    respond(&mut io, &accept_key(key)).await?;

    assert!(matches!(next_event(&mut rx).await?, Event::Open));
    assert_eq!(ws.ready_state(), ReadyState::Open);
    Ok(())
}

#[tokio::test]
async fn test_tampered_accept() -> anyhow::Result<()> {
    let (ws, mut io, mut rx) = connect("ws://localhost/", Options::default())?;
    read_request(&mut io).await?;
    respond(&mut io, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=").await?;

    assert!(matches!(
        next_event(&mut rx).await?,
        Event::Error(WebSocketError::InvalidSecWebSocketAccept)
    ));
    assert!(matches!(
        ws.closed().await,
        Some(WebSocketError::InvalidSecWebSocketAccept)
    ));

    // the same response passes once verification is off
    let options = Options::default().without_handshake_verification();
    let (ws, mut io, mut rx) = connect("ws://localhost/", options)?;
    read_request(&mut io).await?;
    respond(&mut io, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=").await?;

    assert!(matches!(next_event(&mut rx).await?, Event::Open));
    assert_eq!(ws.ready_state(), ReadyState::Open);
    Ok(())
}

#[tokio::test]
async fn test_unoffered_protocol() -> anyhow::Result<()> {
    let options = Options::default().with_protocols(["chat"]);
    let (ws, mut io, mut rx) = connect("ws://localhost/", options)?;

    let request = read_request(&mut io).await?;
    let key = header(&request, "Sec-WebSocket-Key").unwrap_or_default();
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Protocol: superchat\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(key)
    );
    io.write_all(response.as_bytes()).await?;

    assert!(matches!(
        next_event(&mut rx).await?,
        Event::Error(WebSocketError::InvalidSubprotocol(p)) if p == "superchat"
    ));
    assert!(ws.closed().await.is_some());
    assert_eq!(ws.protocol(), None);
    Ok(())
}

#[tokio::test]
async fn test_frames_behind_response() -> anyhow::Result<()> {
    let (ws, mut io, mut rx) = connect("ws://localhost/", Options::default())?;
    let request = read_request(&mut io).await?;
    let key = header(&request, "Sec-WebSocket-Key").unwrap_or_default();

    // the response and the first frames arrive in one write
    let mut bytes = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(key)
    )
    .into_bytes();
    bytes.extend_from_slice(&[0x81, 0x05]);
    bytes.extend_from_slice(b"first");
    bytes.extend_from_slice(&[0x88, 0x02, 0x03, 0xE8]);
    io.write_all(&bytes).await?;

    assert!(matches!(next_event(&mut rx).await?, Event::Open));
    assert!(matches!(next_event(&mut rx).await?, Event::Text(t) if t == "first"));
    assert!(matches!(next_event(&mut rx).await?, Event::Close(None)));
    assert_eq!(ws.ready_state(), ReadyState::Closed);

    let mut server = Framed::new(io, Codec::new(Role::Server, 1024));
    let echo = server
        .next()
        .await
        .ok_or_else(|| anyhow::anyhow!("no echo"))??;
    assert_eq!(echo.opcode, OpCode::Close);
    assert_eq!(echo.close_code(), Some(CloseCode::Normal));
    Ok(())
}

#[cfg(feature = "json")]
#[tokio::test]
async fn test_send_json() -> anyhow::Result<()> {
    #[derive(serde::Serialize)]
    struct Subscribe<'a> {
        op: &'a str,
        args: Vec<&'a str>,
    }

    let (ws, mut io, mut rx) = connect("ws://localhost/", Options::default())?;
    let request = read_request(&mut io).await?;
    let key = header(&request, "Sec-WebSocket-Key").unwrap_or_default();
    respond(&mut io, &accept_key(key)).await?;
    assert!(matches!(next_event(&mut rx).await?, Event::Open));

    ws.send_json(&Subscribe {
        op: "subscribe",
        args: vec!["trades"],
    })?;

    let mut server = Framed::new(io, Codec::new(Role::Server, 1024));
    let frame = server
        .next()
        .await
        .ok_or_else(|| anyhow::anyhow!("no frame"))??;
    assert_eq!(frame.opcode, OpCode::Text);

    let value: serde_json::Value = serde_json::from_slice(&frame.payload)?;
    assert_eq!(value["op"], "subscribe");
    assert_eq!(value["args"][0], "trades");

    server.send(Frame::close(CloseCode::Normal, "")).await?;
    assert!(matches!(next_event(&mut rx).await?, Event::Close(None)));
    Ok(())
}
