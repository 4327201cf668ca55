//! Frame codec: turns bytes into [`Frame`]s and back.
//!
//! Decoding peeks at the buffer and only consumes once a whole frame is available, so a
//! caller that receives a frame split across several reads can simply call again with the
//! accumulated bytes. Both halves implement the `tokio_util::codec` traits.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec;

use crate::{
    frame::{Frame, OpCode, MAX_CONTROL_PAYLOAD, MAX_HEAD_SIZE},
    Result, WebSocketError,
};

/// The side of the connection a codec speaks for.
///
/// A client masks every frame it writes and rejects masked frames it reads. The server
/// role is the mirror image; this crate only uses it to produce and check the peer's side
/// of the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
        }
    }
}

/// Outcome of [`Decoder::decode_slice`].
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame, and how many bytes of the input it used.
    Frame(Frame, usize),
    /// The input holds a prefix of a frame. Nothing was consumed.
    NeedMoreData,
}

/// Header fields parsed ahead of the payload.
struct Head {
    fin: bool,
    opcode: OpCode,
    mask: Option<[u8; 4]>,
    /// Bytes used by the header, masking key included.
    header_len: usize,
    payload_len: usize,
}

/// A combined codec that provides both encoding and decoding of WebSocket frames.
pub struct Codec {
    decoder: Decoder,
    encoder: Encoder,
}

impl Codec {
    /// Creates a codec for `role` that rejects incoming frames larger than `max_payload_read`.
    pub fn new(role: Role, max_payload_read: usize) -> Self {
        Self {
            decoder: Decoder::new(role, max_payload_read),
            encoder: Encoder::new(role),
        }
    }
}

impl From<(Decoder, Encoder)> for Codec {
    fn from((decoder, encoder): (Decoder, Encoder)) -> Self {
        Self { decoder, encoder }
    }
}

impl codec::Decoder for Codec {
    type Item = <Decoder as codec::Decoder>::Item;
    type Error = <Decoder as codec::Decoder>::Error;

    #[inline]
    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Self::Item>, Self::Error> {
        self.decoder.decode(src)
    }
}

impl codec::Encoder<Frame> for Codec {
    type Error = <Encoder as codec::Encoder<Frame>>::Error;

    #[inline]
    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        self.encoder.encode(item, dst)
    }
}

/// A decoder for WebSocket frames.
///
/// The decoder keeps no state between calls: every call re-reads the header from the start
/// of the buffer, which keeps a partially received frame in the buffer untouched.
pub struct Decoder {
    role: Role,
    /// Maximum allowed size for a frame payload.
    max_payload_size: usize,
}

impl Decoder {
    /// Creates a new `Decoder` for `role` with a maximum payload size.
    pub fn new(role: Role, max_payload_size: usize) -> Self {
        Self {
            role,
            max_payload_size,
        }
    }

    /// Decodes one frame from the front of `src` without modifying it.
    ///
    /// # Returns
    /// - `Ok(Decoded::Frame(frame, consumed))` with the unmasked frame and its wire size
    /// - `Ok(Decoded::NeedMoreData)` when `src` is a strict prefix of a frame
    /// - `Err(WebSocketError)` when the bytes violate the framing rules
    pub fn decode_slice(&self, src: &[u8]) -> Result<Decoded> {
        let Some(head) = self.parse_head(src)? else {
            return Ok(Decoded::NeedMoreData);
        };

        let end = head.header_len + head.payload_len;
        let payload = BytesMut::from(&src[head.header_len..end]);
        Ok(Decoded::Frame(self.finish(head, payload), end))
    }

    /// Parses and validates the header at the start of `src`.
    ///
    /// Returns `Ok(None)` until the header and the whole payload are available.
    fn parse_head(&self, src: &[u8]) -> Result<Option<Head>> {
        if src.len() < 2 {
            return Ok(None);
        }

        let fin = src[0] & 0b1000_0000 != 0;

        // no extension is ever negotiated, so all three RSV bits must be clear
        if src[0] & 0b0111_0000 != 0 {
            return Err(WebSocketError::ReservedBitsNotZero);
        }

        let opcode = OpCode::try_from(src[0] & 0b0000_1111)?;
        let masked = src[1] & 0b1000_0000 != 0;
        let length_code = src[1] & 0x7F;

        if masked && self.role == Role::Client {
            return Err(WebSocketError::UnexpectedMask);
        }

        if opcode.is_control() {
            if !fin {
                return Err(WebSocketError::ControlFrameFragmented);
            }
            if usize::from(length_code) > MAX_CONTROL_PAYLOAD {
                return Err(WebSocketError::ControlFrameTooLarge);
            }
        }

        let extra = match length_code {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        let header_len = 2 + extra + masked as usize * 4;
        if src.len() < header_len {
            return Ok(None);
        }

        let mut cursor = &src[2..header_len];
        let payload_len = match extra {
            0 => u64::from(length_code),
            2 => {
                let len = u64::from(cursor.get_u16());
                if len < 126 {
                    return Err(WebSocketError::NonMinimalLength);
                }
                len
            }
            _ => {
                let len = cursor.get_u64();
                if len & (1 << 63) != 0 {
                    return Err(WebSocketError::InvalidLength);
                }
                if len <= u64::from(u16::MAX) {
                    return Err(WebSocketError::NonMinimalLength);
                }
                len
            }
        };

        let payload_len = match usize::try_from(payload_len) {
            Ok(len) if len <= self.max_payload_size => len,
            _ => return Err(WebSocketError::FrameTooLarge),
        };

        let mask = masked.then(|| cursor.get_u32().to_be_bytes());

        if src.len() - header_len < payload_len {
            return Ok(None);
        }

        Ok(Some(Head {
            fin,
            opcode,
            mask,
            header_len,
            payload_len,
        }))
    }

    fn finish(&self, head: Head, payload: BytesMut) -> Frame {
        let mut frame = Frame::new(head.fin, head.opcode, head.mask, payload);
        frame.unmask();
        frame
    }
}

impl codec::Decoder for Decoder {
    type Item = Frame;
    type Error = WebSocketError;

    /// Decodes the next frame from `src`, consuming its bytes only when it is complete.
    ///
    /// # Returns
    /// - `Ok(Some(Frame))`: a fully decoded, unmasked frame
    /// - `Ok(None)`: more data is needed; `src` is left as it was
    /// - `Err(WebSocketError)`: a protocol violation
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some(head) = self.parse_head(src)? else {
            return Ok(None);
        };

        src.advance(head.header_len);
        let payload = src.split_to(head.payload_len);
        Ok(Some(self.finish(head, payload)))
    }
}

/// WebSocket frame encoder.
///
/// In the client role every frame is masked, with a fresh random key unless the frame
/// already carries one. In the server role frames are written as given.
pub struct Encoder {
    role: Role,
}

impl Encoder {
    /// Creates an encoder for `role`.
    pub fn new(role: Role) -> Self {
        Self { role }
    }

    /// Encodes `frame` into a standalone buffer.
    pub fn encode_to_bytes(&mut self, frame: Frame) -> Bytes {
        let mut dst = BytesMut::with_capacity(MAX_HEAD_SIZE + frame.payload.len());
        self.write(frame, &mut dst);
        dst.freeze()
    }

    fn write(&mut self, mut frame: Frame, dst: &mut BytesMut) {
        if self.role == Role::Client || frame.is_masked() {
            frame.mask();
        }

        let mut header = [0; MAX_HEAD_SIZE];
        let size = frame.fmt_head(&mut header[..]);

        dst.reserve(size + frame.payload.len());
        dst.extend_from_slice(&header[..size]);
        dst.extend_from_slice(&frame.payload);
    }
}

impl codec::Encoder<Frame> for Encoder {
    type Error = WebSocketError;

    /// Formats the frame header and appends the (masked) payload to `dst`.
    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        self.write(frame, dst);
        Ok(())
    }
}
