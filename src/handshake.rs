//! Opening handshake: the HTTP/1.1 upgrade request and the verification of the server's answer.
//!
//! The client sends a `GET` with a fresh random `Sec-WebSocket-Key`; the server proves it
//! understood the request by answering `101 Switching Protocols` with
//! `Sec-WebSocket-Accept = Base64(SHA-1(key + GUID))`.
//!
//! ```rust
//! use wsengine::handshake::accept_key;
//!
//! assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
//! ```
use base64::prelude::*;
use bytes::{BufMut, Bytes, BytesMut};
use http::{header, StatusCode};
use sha1::{Digest, Sha1};

use crate::{connection::Target, Options, Result, WebSocketError};

/// The GUID appended to the client key before hashing, fixed by the protocol.
pub const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Largest response header block accepted from the server.
const MAX_RESPONSE_SIZE: usize = 8 * 1024;

const MAX_HEADERS: usize = 64;

/// Protocol revision announced in `Sec-WebSocket-Version`.
///
/// Draft 07 predates RFC 6455 and names its origin header `Sec-WebSocket-Origin`; the
/// framing is the same for both.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// Version 13, sent with `Origin`.
    #[default]
    Rfc6455,
    /// Version 7, sent with `Sec-WebSocket-Origin`.
    Draft07,
}

impl ProtocolVersion {
    /// Value of the `Sec-WebSocket-Version` header.
    pub fn number(self) -> u8 {
        match self {
            ProtocolVersion::Rfc6455 => 13,
            ProtocolVersion::Draft07 => 7,
        }
    }

    /// Name of the header carrying the origin.
    pub fn origin_header(self) -> &'static str {
        match self {
            ProtocolVersion::Rfc6455 => "Origin",
            ProtocolVersion::Draft07 => "Sec-WebSocket-Origin",
        }
    }
}

/// Computes `Base64(SHA-1(key + GUID))`, the value a server must answer to `key`.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(GUID.as_bytes());
    BASE64_STANDARD.encode(hasher.finalize())
}

/// The client key of one handshake and the accept value it expects back.
///
/// A context is used for a single attempt and dropped once the handshake resolves.
#[derive(Debug, Clone)]
pub struct HandshakeContext {
    key: String,
    accept: String,
}

impl HandshakeContext {
    /// Draws a fresh 16 byte random key.
    pub fn new() -> Self {
        let input: [u8; 16] = rand::random();
        Self::with_key(BASE64_STANDARD.encode(input))
    }

    /// Uses a caller supplied key.
    pub fn with_key(key: impl Into<String>) -> Self {
        let key = key.into();
        let accept = accept_key(&key);
        Self { key, accept }
    }

    /// The `Sec-WebSocket-Key` sent to the server.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The `Sec-WebSocket-Accept` the server has to answer.
    pub fn expected_accept(&self) -> &str {
        &self.accept
    }
}

impl Default for HandshakeContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the upgrade request for `target`.
///
/// The origin falls back to the one derived from the target when none is configured, and
/// `Sec-WebSocket-Protocol` is omitted when no subprotocol is offered.
pub fn build_request(ctx: &HandshakeContext, target: &Target, options: &Options) -> Bytes {
    let mut buf = BytesMut::with_capacity(512);

    buf.put_slice(b"GET ");
    buf.put_slice(target.resource.as_bytes());
    buf.put_slice(b" HTTP/1.1\r\n");

    put_header(&mut buf, "Host", &target.host_header());
    put_header(&mut buf, "Upgrade", "websocket");
    put_header(&mut buf, "Connection", "Upgrade");
    put_header(&mut buf, "Sec-WebSocket-Key", ctx.key());
    put_header(
        &mut buf,
        "Sec-WebSocket-Version",
        &options.version.number().to_string(),
    );

    match options.origin.as_deref() {
        Some(origin) => put_header(&mut buf, options.version.origin_header(), origin),
        None => put_header(
            &mut buf,
            options.version.origin_header(),
            &target.default_origin(),
        ),
    }

    if !options.protocols.is_empty() {
        put_header(
            &mut buf,
            "Sec-WebSocket-Protocol",
            &options.protocols.join(", "),
        );
    }

    buf.put_slice(b"\r\n");
    buf.freeze()
}

fn put_header(buf: &mut BytesMut, name: &str, value: &str) {
    buf.put_slice(name.as_bytes());
    buf.put_slice(b": ");
    buf.put_slice(value.as_bytes());
    buf.put_slice(b"\r\n");
}

/// A response that passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    /// Subprotocol selected by the server, if any.
    pub protocol: Option<String>,
    /// Length of the response header block. Anything after it is frame data.
    pub consumed: usize,
}

/// Parses and verifies the server's answer to the request built from `ctx`.
///
/// # Returns
/// - `Ok(Some(accepted))` once the full header block is present and valid
/// - `Ok(None)` while the header block is incomplete
/// - `Err(_)` with a handshake error otherwise
pub fn parse_response(
    buf: &[u8],
    ctx: &HandshakeContext,
    options: &Options,
) -> Result<Option<Accepted>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);

    let consumed = match response.parse(buf) {
        Ok(httparse::Status::Complete(len)) if len <= MAX_RESPONSE_SIZE => len,
        Ok(httparse::Status::Complete(_)) => return Err(WebSocketError::ResponseTooLarge),
        Ok(httparse::Status::Partial) if buf.len() > MAX_RESPONSE_SIZE => {
            return Err(WebSocketError::ResponseTooLarge)
        }
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(httparse::Error::TooManyHeaders) => return Err(WebSocketError::ResponseTooLarge),
        Err(_) => return Err(WebSocketError::MalformedResponse),
    };

    let status = response.code.unwrap_or_default();
    if status != StatusCode::SWITCHING_PROTOCOLS.as_u16() {
        return Err(WebSocketError::InvalidStatusCode(status));
    }

    let headers = &*response.headers;
    let get = |name: &header::HeaderName| header_value(headers, name);

    if !get(&header::UPGRADE)?
        .map(|h| h.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
    {
        return Err(WebSocketError::InvalidUpgradeHeader);
    }

    if !get(&header::CONNECTION)?
        .map(|h| h.split(',').any(|t| t.trim().eq_ignore_ascii_case("upgrade")))
        .unwrap_or(false)
    {
        return Err(WebSocketError::InvalidConnectionHeader);
    }

    if options.verify_handshake {
        let accept =
            get(&header::SEC_WEBSOCKET_ACCEPT)?.ok_or(WebSocketError::MissingSecWebSocketAccept)?;
        if accept != ctx.expected_accept() {
            return Err(WebSocketError::InvalidSecWebSocketAccept);
        }
    }

    let protocol = match get(&header::SEC_WEBSOCKET_PROTOCOL)? {
        None | Some("") => None,
        Some(selected) if options.protocols.iter().any(|p| p == selected) => {
            Some(selected.to_owned())
        }
        Some(selected) => return Err(WebSocketError::InvalidSubprotocol(selected.to_owned())),
    };

    Ok(Some(Accepted { protocol, consumed }))
}

/// Value of the first header called `name`, trimmed.
fn header_value<'b>(
    headers: &[httparse::Header<'b>],
    name: &header::HeaderName,
) -> Result<Option<&'b str>> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name.as_str()))
        .map(|h| std::str::from_utf8(h.value).map(str::trim))
        .transpose()
        .map_err(|_| WebSocketError::MalformedResponse)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
    const ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

    fn target(url: &str) -> Target {
        Target::from_url(&url.parse().unwrap()).unwrap()
    }

    fn response(extra: &str) -> String {
        format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             {extra}\r\n"
        )
    }

    fn accepting(extra: &str) -> String {
        response(&format!("Sec-WebSocket-Accept: {ACCEPT}\r\n{extra}"))
    }

    mod request_tests {
        use super::*;

        #[test]
        fn test_known_answer() {
            assert_eq!(accept_key(KEY), ACCEPT);
            assert_eq!(HandshakeContext::with_key(KEY).expected_accept(), ACCEPT);
        }

        #[test]
        fn test_random_key_shape() {
            let a = HandshakeContext::new();
            let b = HandshakeContext::new();
            assert_ne!(a.key(), b.key());
            assert_eq!(BASE64_STANDARD.decode(a.key()).unwrap().len(), 16);
        }

        #[test]
        fn test_request_lines() {
            let ctx = HandshakeContext::with_key(KEY);
            let options = Options::default().with_protocols(["chat", "superchat"]);
            let request = build_request(&ctx, &target("ws://example.com:8080/chat?room=1"), &options);
            let request = std::str::from_utf8(&request).unwrap();

            assert!(request.starts_with("GET /chat?room=1 HTTP/1.1\r\n"));
            assert!(request.contains("Host: example.com:8080\r\n"));
            assert!(request.contains("Upgrade: websocket\r\n"));
            assert!(request.contains("Connection: Upgrade\r\n"));
            assert!(request.contains(&format!("Sec-WebSocket-Key: {KEY}\r\n")));
            assert!(request.contains("Sec-WebSocket-Version: 13\r\n"));
            assert!(request.contains("Origin: http://example.com:8080\r\n"));
            assert!(request.contains("Sec-WebSocket-Protocol: chat, superchat\r\n"));
            assert!(request.ends_with("\r\n\r\n"));
        }

        #[test]
        fn test_request_defaults() {
            let ctx = HandshakeContext::with_key(KEY);
            let request = build_request(&ctx, &target("wss://example.com"), &Options::default());
            let request = std::str::from_utf8(&request).unwrap();

            assert!(request.starts_with("GET / HTTP/1.1\r\n"));
            assert!(request.contains("Host: example.com\r\n"));
            assert!(request.contains("Origin: https://example.com\r\n"));
            assert!(!request.contains("Sec-WebSocket-Protocol"));
        }

        #[test]
        fn test_draft07_request() {
            let ctx = HandshakeContext::with_key(KEY);
            let options = Options::default()
                .with_version(ProtocolVersion::Draft07)
                .with_origin("http://app.local");
            let request = build_request(&ctx, &target("ws://example.com/"), &options);
            let request = std::str::from_utf8(&request).unwrap();

            assert!(request.contains("Sec-WebSocket-Version: 7\r\n"));
            assert!(request.contains("Sec-WebSocket-Origin: http://app.local\r\n"));
            assert!(!request.contains("\r\nOrigin:"));
        }
    }

    mod response_tests {
        use super::*;

        fn parse(raw: &str, options: &Options) -> Result<Option<Accepted>> {
            parse_response(raw.as_bytes(), &HandshakeContext::with_key(KEY), options)
        }

        #[test]
        fn test_valid_response() {
            let raw = accepting("");
            let accepted = parse(&raw, &Options::default()).unwrap().unwrap();
            assert_eq!(accepted.consumed, raw.len());
            assert_eq!(accepted.protocol, None);
        }

        #[test]
        fn test_partial_response() {
            let raw = accepting("");
            for cut in [0, 10, raw.len() - 1] {
                assert_eq!(parse(&raw[..cut], &Options::default()).unwrap(), None);
            }
        }

        #[test]
        fn test_trailing_frame_bytes() {
            let mut raw = accepting("").into_bytes();
            let header_len = raw.len();
            raw.extend_from_slice(&[0x81, 0x02, b'h', b'i']);

            let accepted = parse_response(&raw, &HandshakeContext::with_key(KEY), &Options::default())
                .unwrap()
                .unwrap();
            assert_eq!(accepted.consumed, header_len);
        }

        #[test]
        fn test_bad_status() {
            let raw = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
            assert!(matches!(
                parse(raw, &Options::default()),
                Err(WebSocketError::InvalidStatusCode(404))
            ));
        }

        #[test]
        fn test_upgrade_and_connection_headers() {
            let raw = format!(
                "HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\n\
                 Sec-WebSocket-Accept: {ACCEPT}\r\n\r\n"
            );
            assert!(matches!(
                parse(&raw, &Options::default()),
                Err(WebSocketError::InvalidUpgradeHeader)
            ));

            let raw = format!(
                "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\
                 Connection: close\r\nSec-WebSocket-Accept: {ACCEPT}\r\n\r\n"
            );
            assert!(matches!(
                parse(&raw, &Options::default()),
                Err(WebSocketError::InvalidConnectionHeader)
            ));

            // header names and values are case-insensitive, the token may be one of many
            let raw = format!(
                "HTTP/1.1 101 Switching Protocols\r\nupgrade: WebSocket\r\n\
                 connection: keep-alive, UPGRADE\r\nsec-websocket-accept: {ACCEPT}\r\n\r\n"
            );
            assert!(parse(&raw, &Options::default()).unwrap().is_some());
        }

        #[test]
        fn test_accept_verification() {
            let tampered = response("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOA=\r\n");
            assert!(matches!(
                parse(&tampered, &Options::default()),
                Err(WebSocketError::InvalidSecWebSocketAccept)
            ));
            assert!(parse(&tampered, &Options::default().without_handshake_verification())
                .unwrap()
                .is_some());

            let missing = response("");
            assert!(matches!(
                parse(&missing, &Options::default()),
                Err(WebSocketError::MissingSecWebSocketAccept)
            ));
            assert!(parse(&missing, &Options::default().without_handshake_verification())
                .unwrap()
                .is_some());
        }

        #[test]
        fn test_subprotocol_negotiation() {
            let options = Options::default().with_protocols(["chat", "superchat"]);

            let raw = accepting("Sec-WebSocket-Protocol: superchat\r\n");
            let accepted = parse(&raw, &options).unwrap().unwrap();
            assert_eq!(accepted.protocol.as_deref(), Some("superchat"));

            let raw = accepting("Sec-WebSocket-Protocol: mqtt\r\n");
            assert!(matches!(
                parse(&raw, &options),
                Err(WebSocketError::InvalidSubprotocol(p)) if p == "mqtt"
            ));
        }

        #[test]
        fn test_oversized_response() {
            let mut raw = String::from("HTTP/1.1 101 Switching Protocols\r\n");
            while raw.len() <= MAX_RESPONSE_SIZE {
                raw.push_str("X-Padding: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n");
            }
            assert!(matches!(
                parse(&raw, &Options::default()),
                Err(WebSocketError::ResponseTooLarge)
            ));
        }

        #[test]
        fn test_garbage() {
            assert!(matches!(
                parse("SSH-2.0-OpenSSH_9.6\r\n\r\n", &Options::default()),
                Err(WebSocketError::MalformedResponse)
            ));
        }
    }
}
