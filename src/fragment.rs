//! Message fragmentation in both directions.
//!
//! Outgoing messages larger than the configured frame payload are split by a [`Fragmenter`];
//! incoming continuation sequences are stitched back together by a [`Reassembler`]. Only one
//! fragmented message may be open per direction at a time.
use bytes::{Bytes, BytesMut};

use crate::{
    frame::{Frame, OpCode},
    Result, WebSocketError,
};

/// A complete message handed to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
}

/// Splits messages into frames of at most `max_payload` bytes.
#[derive(Debug, Clone, Copy)]
pub struct Fragmenter {
    max_payload: usize,
}

impl Fragmenter {
    /// Creates a fragmenter. A `max_payload` of zero is treated as one byte.
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload: max_payload.max(1),
        }
    }

    /// Splits `payload` into the frames of one message.
    ///
    /// A message that fits is a single final frame. Otherwise the first frame carries
    /// `opcode`, the following ones are continuations, and only the last has `fin` set.
    /// An empty payload still yields one frame.
    pub fn split(&self, opcode: OpCode, payload: &[u8]) -> Vec<Frame> {
        if payload.len() <= self.max_payload {
            return vec![Frame::new(true, opcode, None, BytesMut::from(payload))];
        }

        let count = payload.len().div_ceil(self.max_payload);
        payload
            .chunks(self.max_payload)
            .enumerate()
            .map(|(i, chunk)| {
                let opcode = if i == 0 { opcode } else { OpCode::Continuation };
                Frame::new(i + 1 == count, opcode, None, BytesMut::from(chunk))
            })
            .collect()
    }
}

/// Reassembles fragmented incoming messages.
#[derive(Debug)]
pub struct Reassembler {
    /// Opcode of the message being reassembled, `None` when no message is open.
    opcode: Option<OpCode>,
    buffer: BytesMut,
    max_size: usize,
}

impl Reassembler {
    /// Creates a reassembler that rejects messages larger than `max_size` bytes.
    pub fn new(max_size: usize) -> Self {
        Self {
            opcode: None,
            buffer: BytesMut::new(),
            max_size,
        }
    }

    /// Whether a fragmented message is waiting for its continuation frames.
    pub fn is_open(&self) -> bool {
        self.opcode.is_some()
    }

    /// Drops any partially received message.
    pub fn clear(&mut self) {
        self.opcode = None;
        self.buffer = BytesMut::new();
    }

    /// Feeds a data frame.
    ///
    /// # Returns
    /// - `Ok(Some(message))` when `frame` completes a message
    /// - `Ok(None)` when more fragments are expected
    /// - `Err(_)` for an interleaved or orphan fragment, an oversized message or invalid
    ///   UTF-8 text. The partial message is dropped.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>> {
        let res = self.accept(frame);
        if res.is_err() {
            self.clear();
        }
        res
    }

    fn accept(&mut self, frame: Frame) -> Result<Option<Message>> {
        match frame.opcode {
            OpCode::Text | OpCode::Binary => {
                if self.is_open() {
                    return Err(WebSocketError::InvalidFragment);
                }
                if frame.payload.len() > self.max_size {
                    return Err(WebSocketError::MessageTooBig);
                }

                if frame.fin {
                    return finish(frame.opcode, frame.payload).map(Some);
                }

                self.opcode = Some(frame.opcode);
                self.buffer = frame.payload;
                Ok(None)
            }
            OpCode::Continuation => {
                let Some(opcode) = self.opcode else {
                    return Err(WebSocketError::InvalidContinuationFrame);
                };
                if self.buffer.len() + frame.payload.len() > self.max_size {
                    return Err(WebSocketError::MessageTooBig);
                }

                self.buffer.extend_from_slice(&frame.payload);
                if !frame.fin {
                    return Ok(None);
                }

                self.opcode = None;
                let payload = std::mem::take(&mut self.buffer);
                finish(opcode, payload).map(Some)
            }
            // control frames never take part in a message
            OpCode::Close | OpCode::Ping | OpCode::Pong => Ok(None),
        }
    }
}

fn finish(opcode: OpCode, payload: BytesMut) -> Result<Message> {
    if opcode == OpCode::Binary {
        return Ok(Message::Binary(payload.freeze()));
    }

    String::from_utf8(Vec::from(payload))
        .map(Message::Text)
        .map_err(|_| WebSocketError::InvalidUTF8)
}

#[cfg(test)]
mod tests {
    use super::*;

    mod fragmenter_tests {
        use super::*;

        #[test]
        fn test_frame_count() {
            let fragmenter = Fragmenter::new(10);
            for (len, count) in [(0usize, 1usize), (1, 1), (10, 1), (11, 2), (20, 2), (21, 3), (100, 10)] {
                let frames = fragmenter.split(OpCode::Binary, &vec![0u8; len]);
                assert_eq!(frames.len(), count, "len {len}");
            }
        }

        #[test]
        fn test_opcodes_and_fin_bits() {
            let frames = Fragmenter::new(4).split(OpCode::Text, b"abcdefghij");
            let shape: Vec<_> = frames.iter().map(|f| (f.opcode, f.fin)).collect();
            assert_eq!(
                shape,
                vec![
                    (OpCode::Text, false),
                    (OpCode::Continuation, false),
                    (OpCode::Continuation, true),
                ]
            );
            assert_eq!(&frames[2].payload[..], b"ij");
        }

        #[test]
        fn test_single_frame() {
            let frames = Fragmenter::new(4).split(OpCode::Binary, b"");
            assert_eq!(frames.len(), 1);
            assert!(frames[0].fin);
            assert_eq!(frames[0].opcode, OpCode::Binary);
        }
    }

    mod reassembler_tests {
        use super::*;

        #[test]
        fn test_reassembly_reproduces_message() {
            let message: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
            for max in [1usize, 7, 64, 999, 1000, 5000] {
                let mut reassembler = Reassembler::new(usize::MAX);
                let frames = Fragmenter::new(max).split(OpCode::Binary, &message);
                let last = frames.len() - 1;

                for (i, frame) in frames.into_iter().enumerate() {
                    let res = reassembler.push(frame).unwrap();
                    if i < last {
                        assert!(res.is_none());
                        assert!(reassembler.is_open());
                    } else {
                        assert_eq!(res, Some(Message::Binary(Bytes::from(message.clone()))));
                        assert!(!reassembler.is_open());
                    }
                }
            }
        }

        #[test]
        fn test_text_split_inside_code_point() {
            let text = "héllo wörld";
            let frames = Fragmenter::new(2).split(OpCode::Text, text.as_bytes());
            let mut reassembler = Reassembler::new(1024);

            let mut out = None;
            for frame in frames {
                out = reassembler.push(frame).unwrap();
            }
            assert_eq!(out, Some(Message::Text(text.to_string())));
        }

        #[test]
        fn test_invalid_utf8() {
            let mut reassembler = Reassembler::new(1024);
            assert!(matches!(
                reassembler.push(Frame::text([0xC3u8, 0x28])),
                Err(WebSocketError::InvalidUTF8)
            ));

            reassembler.push(Frame::text([0xE2u8, 0x82]).with_fin(false)).unwrap();
            assert!(matches!(
                reassembler.push(Frame::continuation([0x41u8])),
                Err(WebSocketError::InvalidUTF8)
            ));
            assert!(!reassembler.is_open());
        }

        #[test]
        fn test_code_point_split_across_fragments() {
            let euro = "€".as_bytes();
            let mut reassembler = Reassembler::new(1024);
            reassembler.push(Frame::text(&euro[..1]).with_fin(false)).unwrap();
            assert_eq!(
                reassembler.push(Frame::continuation(&euro[1..])).unwrap(),
                Some(Message::Text("€".to_string()))
            );

            // a truncated code point
            reassembler.push(Frame::text(&euro[..2]).with_fin(false)).unwrap();
            assert!(matches!(
                reassembler.push(Frame::continuation("")),
                Err(WebSocketError::InvalidUTF8)
            ));
            assert!(!reassembler.is_open());
        }

        #[test]
        fn test_interleaved_message() {
            let mut reassembler = Reassembler::new(1024);
            reassembler.push(Frame::text("a").with_fin(false)).unwrap();
            assert!(matches!(
                reassembler.push(Frame::binary("b")),
                Err(WebSocketError::InvalidFragment)
            ));
        }

        #[test]
        fn test_orphan_continuation() {
            let mut reassembler = Reassembler::new(1024);
            assert!(matches!(
                reassembler.push(Frame::continuation("x")),
                Err(WebSocketError::InvalidContinuationFrame)
            ));
        }

        #[test]
        fn test_message_too_big() {
            let mut reassembler = Reassembler::new(8);
            reassembler.push(Frame::binary("12345").with_fin(false)).unwrap();
            assert!(matches!(
                reassembler.push(Frame::continuation("6789")),
                Err(WebSocketError::MessageTooBig)
            ));
            assert!(!reassembler.is_open());

            assert!(matches!(
                reassembler.push(Frame::binary("123456789")),
                Err(WebSocketError::MessageTooBig)
            ));
            assert_eq!(
                reassembler.push(Frame::binary("12345678")).unwrap(),
                Some(Message::Binary(Bytes::from_static(b"12345678")))
            );
        }

        #[test]
        fn test_clear_drops_partial_message() {
            let mut reassembler = Reassembler::new(1024);
            reassembler.push(Frame::text("partial").with_fin(false)).unwrap();
            reassembler.clear();
            assert!(matches!(
                reassembler.push(Frame::continuation("rest")),
                Err(WebSocketError::InvalidContinuationFrame)
            ));
        }
    }
}
