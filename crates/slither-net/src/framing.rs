//! Length-prefixed framing for the game TCP stream.
//!
//! Every message on the wire is a length-prefixed frame:
//!
//! ```text
//! +-------------------+--------------------------+
//! | length (4 bytes)  |   payload                |
//! | u32 big-endian    |   (length bytes, JSON)   |
//! +-------------------+--------------------------+
//! ```
//!
//! The length does **not** include the 4 prefix bytes. It must satisfy
//! `0 < length < MAX_PAYLOAD_LEN`; any other value is a [`ProtocolError`] and
//! the connection carrying it is torn down, as is a payload that is not JSON.
//! JSON that is not a typed message object only drops that one frame.
//!
//! Everything in this module is a pure transform over byte slices. The
//! transports decide how bytes arrive; [`FrameBuffer`] and [`FrameAssembler`]
//! make the result independent of how the stream was chunked.

use crate::messages::{Message, UntypedPayload};

/// Size of the length prefix in bytes.
pub const HEADER_LEN: usize = 4;

/// Exclusive upper bound for a payload length (10 MiB).
pub const MAX_PAYLOAD_LEN: u32 = 10 * 1024 * 1024;

/// Errors raised while decoding inbound bytes. Always fatal for the
/// connection.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The length prefix is zero or not below [`MAX_PAYLOAD_LEN`].
    #[error("invalid frame length {0} (expected 0 < length < 10485760)")]
    InvalidLength(u32),

    /// The payload is not UTF-8 JSON.
    #[error("malformed payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),
}

/// Errors raised while encoding an outbound message. The message is dropped
/// and the connection stays up.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// serde_json refused the value.
    #[error("failed to serialize message: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The value serialized but is not a sendable message.
    #[error("message is not encodable: {0}")]
    Invalid(&'static str),

    /// The serialized payload does not fit a frame.
    #[error("payload of {0} bytes is outside the frame limits")]
    OutOfRange(usize),
}

/// Result of a single [`decode`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A complete frame was found at the start of the buffer.
    Frame {
        /// The decoded message.
        message: Message,
        /// Bytes consumed from the front of the buffer, header included.
        consumed: usize,
    },
    /// A complete frame whose JSON payload is not a message. Skip `consumed`
    /// bytes and carry on.
    Untyped {
        reason: UntypedPayload,
        consumed: usize,
    },
    /// The buffer holds only part of a frame.
    NeedMoreData,
}

/// Check a raw length prefix against the protocol bounds.
pub fn validate_length(len: u32) -> Result<usize, ProtocolError> {
    if len == 0 || len >= MAX_PAYLOAD_LEN {
        return Err(ProtocolError::InvalidLength(len));
    }
    Ok(len as usize)
}

/// Parse and validate a length prefix.
pub fn parse_header(header: [u8; HEADER_LEN]) -> Result<usize, ProtocolError> {
    validate_length(u32::from_be_bytes(header))
}

/// Serialize `message` and prefix it with its big-endian length.
pub fn encode(message: &Message) -> Result<Vec<u8>, EncodeError> {
    let payload = serde_json::to_vec(message.as_map()).map_err(EncodeError::Serialize)?;
    frame_payload(&payload)
}

/// Prefix an already serialized payload with its length.
pub fn frame_payload(payload: &[u8]) -> Result<Vec<u8>, EncodeError> {
    let len = payload.len();
    if len == 0 || len >= MAX_PAYLOAD_LEN as usize {
        return Err(EncodeError::OutOfRange(len));
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + len);
    frame.extend_from_slice(&(len as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Try to decode one frame from the front of `buf`.
///
/// Fails as soon as a header is available whose length is out of bounds,
/// without waiting for the body.
pub fn decode(buf: &[u8]) -> Result<Decoded, ProtocolError> {
    let Some(header) = buf.first_chunk::<HEADER_LEN>() else {
        return Ok(Decoded::NeedMoreData);
    };
    let len = parse_header(*header)?;

    let end = HEADER_LEN + len;
    if buf.len() < end {
        return Ok(Decoded::NeedMoreData);
    }

    let value = serde_json::from_slice(&buf[HEADER_LEN..end])
        .map_err(ProtocolError::MalformedPayload)?;
    Ok(match Message::from_value(value) {
        Ok(message) => Decoded::Frame {
            message,
            consumed: end,
        },
        Err(reason) => Decoded::Untyped {
            reason,
            consumed: end,
        },
    })
}

// ---------------------------------------------------------------------------
// FrameBuffer
// ---------------------------------------------------------------------------

/// Receive buffer that turns an arbitrarily chunked byte stream into
/// frames. A partial trailing frame stays buffered until the rest arrives.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Decode the next frame and remove it from the buffer. Returns
    /// [`Decoded::NeedMoreData`] when no complete frame is buffered.
    pub fn next_frame(&mut self) -> Result<Decoded, ProtocolError> {
        let decoded = decode(&self.buf)?;
        if let Decoded::Frame { consumed, .. } | Decoded::Untyped { consumed, .. } = &decoded {
            self.buf.drain(..*consumed);
        }
        Ok(decoded)
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

// ---------------------------------------------------------------------------
// FrameAssembler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingHeader { filled: usize },
    AwaitingBody { len: usize },
}

/// Two-phase header/body state machine for reads that return whatever the
/// socket happens to hold.
///
/// Each call to [`push`](Self::push) returns the raw frames (header and
/// body) completed by that chunk. Bytes beyond the current frame are kept and
/// start the next one.
#[derive(Debug)]
pub struct FrameAssembler {
    phase: Phase,
    header: [u8; HEADER_LEN],
    body: Vec<u8>,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self {
            phase: Phase::AwaitingHeader { filled: 0 },
            header: [0; HEADER_LEN],
            body: Vec::new(),
        }
    }

    /// Feed one chunk of received bytes.
    pub fn push(&mut self, mut data: &[u8]) -> Result<Vec<Vec<u8>>, ProtocolError> {
        let mut frames = Vec::new();

        while !data.is_empty() {
            match self.phase {
                Phase::AwaitingHeader { filled } => {
                    let take = (HEADER_LEN - filled).min(data.len());
                    self.header[filled..filled + take].copy_from_slice(&data[..take]);
                    data = &data[take..];

                    let filled = filled + take;
                    if filled < HEADER_LEN {
                        self.phase = Phase::AwaitingHeader { filled };
                        continue;
                    }

                    let len = match parse_header(self.header) {
                        Ok(len) => len,
                        Err(e) => {
                            self.reset();
                            return Err(e);
                        }
                    };
                    self.body.clear();
                    self.body.reserve(len);
                    self.phase = Phase::AwaitingBody { len };
                }
                Phase::AwaitingBody { len } => {
                    let take = (len - self.body.len()).min(data.len());
                    self.body.extend_from_slice(&data[..take]);
                    data = &data[take..];

                    if self.body.len() == len {
                        let mut frame = Vec::with_capacity(HEADER_LEN + len);
                        frame.extend_from_slice(&self.header);
                        frame.append(&mut self.body);
                        frames.push(frame);
                        self.phase = Phase::AwaitingHeader { filled: 0 };
                    }
                }
            }
        }

        Ok(frames)
    }

    /// Bytes held for a frame that is not complete yet.
    pub fn pending(&self) -> usize {
        match self.phase {
            Phase::AwaitingHeader { filled } => filled,
            Phase::AwaitingBody { .. } => HEADER_LEN + self.body.len(),
        }
    }

    pub fn reset(&mut self) {
        self.phase = Phase::AwaitingHeader { filled: 0 };
        self.body.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(kind: &str, n: i64) -> Message {
        Message::new(kind).with("n", n)
    }

    fn decode_all(buffer: &mut FrameBuffer) -> Vec<Message> {
        let mut out = Vec::new();
        loop {
            match buffer.next_frame().unwrap() {
                Decoded::Frame { message, .. } => out.push(message),
                Decoded::Untyped { reason, .. } => panic!("untyped frame: {reason}"),
                Decoded::NeedMoreData => return out,
            }
        }
    }

    #[test]
    fn test_roundtrip_single_message() {
        let message = Message::new("game_event")
            .with("game_event", "crash")
            .with("content", json!({"by": "7"}));
        let frame = encode(&message).unwrap();

        match decode(&frame).unwrap() {
            Decoded::Frame {
                message: decoded,
                consumed,
            } => {
                assert_eq!(decoded, message);
                assert_eq!(consumed, frame.len());
            }
            other => panic!("expected a complete frame, got {other:?}"),
        }
    }

    #[test]
    fn test_length_prefix_is_big_endian() {
        let frame = frame_payload(b"{\"type\":\"x\"}").unwrap();
        assert_eq!(&frame[..4], &[0, 0, 0, 12]);
    }

    #[test]
    fn test_empty_buffer_needs_more_data() {
        assert_eq!(decode(&[]).unwrap(), Decoded::NeedMoreData);
        assert_eq!(decode(&[0, 0]).unwrap(), Decoded::NeedMoreData);
    }

    #[test]
    fn test_partial_body_needs_more_data() {
        let frame = encode(&msg("a", 1)).unwrap();
        assert_eq!(
            decode(&frame[..frame.len() - 1]).unwrap(),
            Decoded::NeedMoreData
        );
    }

    #[test]
    fn test_zero_length_rejected() {
        let result = decode(&[0, 0, 0, 0]);
        assert!(matches!(result, Err(ProtocolError::InvalidLength(0))));
    }

    #[test]
    fn test_length_at_limit_rejected_before_body_arrives() {
        let header = MAX_PAYLOAD_LEN.to_be_bytes();
        let result = decode(&header);
        assert!(matches!(
            result,
            Err(ProtocolError::InvalidLength(MAX_PAYLOAD_LEN))
        ));
    }

    #[test]
    fn test_length_below_limit_accepted() {
        let len = MAX_PAYLOAD_LEN - 1;
        assert_eq!(validate_length(len).unwrap(), 10_485_759);

        // Header alone is fine, it just waits for the body.
        assert_eq!(decode(&len.to_be_bytes()).unwrap(), Decoded::NeedMoreData);

        // A JSON string padded out to exactly the largest legal payload.
        let mut frame = Vec::with_capacity(HEADER_LEN + len as usize);
        frame.extend_from_slice(&len.to_be_bytes());
        frame.push(b'"');
        frame.resize(HEADER_LEN + len as usize - 1, b'a');
        frame.push(b'"');

        match decode(&frame).unwrap() {
            Decoded::Untyped { reason, consumed } => {
                assert_eq!(reason, UntypedPayload::NotAnObject);
                assert_eq!(consumed, 10_485_763);
            }
            other => panic!("expected a complete frame, got {other:?}"),
        }
    }

    #[test]
    fn test_non_json_payload_is_protocol_error() {
        let frame = frame_payload(b"not json").unwrap();
        assert!(matches!(
            decode(&frame),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_payload_without_type_is_skipped() {
        let frame = frame_payload(b"{\"kind\":\"x\"}").unwrap();
        assert_eq!(
            decode(&frame).unwrap(),
            Decoded::Untyped {
                reason: UntypedPayload::MissingType,
                consumed: frame.len(),
            }
        );

        let mut buffer = FrameBuffer::new();
        buffer.extend(&frame_payload(b"[1,2,3]").unwrap());
        buffer.extend(&encode(&msg("after", 1)).unwrap());
        assert!(matches!(
            buffer.next_frame().unwrap(),
            Decoded::Untyped {
                reason: UntypedPayload::NotAnObject,
                ..
            }
        ));
        assert_eq!(decode_all(&mut buffer), vec![msg("after", 1)]);
    }

    #[test]
    fn test_empty_payload_cannot_be_framed() {
        assert!(matches!(frame_payload(b""), Err(EncodeError::OutOfRange(0))));
    }

    #[test]
    fn test_pipelined_frames_decode_in_order() {
        let a = msg("a", 1);
        let b = msg("b", 2);
        let mut bytes = encode(&a).unwrap();
        bytes.extend(encode(&b).unwrap());

        let mut buffer = FrameBuffer::new();
        buffer.extend(&bytes);
        assert_eq!(decode_all(&mut buffer), vec![a, b]);
        assert_eq!(buffer.buffered(), 0);
    }

    #[test]
    fn test_chunk_size_does_not_change_result() {
        let messages: Vec<Message> = (0..5).map(|i| msg("tick", i)).collect();
        let stream: Vec<u8> = messages
            .iter()
            .flat_map(|m| encode(m).unwrap())
            .collect();

        for chunk in [1, 3, stream.len()] {
            let mut buffer = FrameBuffer::new();
            let mut out = Vec::new();
            for piece in stream.chunks(chunk) {
                buffer.extend(piece);
                out.extend(decode_all(&mut buffer));
            }
            assert_eq!(out, messages, "chunk size {chunk}");
        }
    }

    #[test]
    fn test_trailing_partial_header_is_retained() {
        let a = msg("a", 1);
        let b = msg("b", 2);
        let frame_b = encode(&b).unwrap();

        let mut buffer = FrameBuffer::new();
        let mut first = encode(&a).unwrap();
        first.extend_from_slice(&frame_b[..2]);
        buffer.extend(&first);

        assert_eq!(decode_all(&mut buffer), vec![a]);
        assert_eq!(buffer.buffered(), 2);

        buffer.extend(&frame_b[2..]);
        assert_eq!(decode_all(&mut buffer), vec![b]);
    }

    #[test]
    fn test_assembler_keeps_excess_bytes() {
        let a = encode(&msg("a", 1)).unwrap();
        let b = encode(&msg("b", 2)).unwrap();
        let mut chunk = a.clone();
        chunk.extend_from_slice(&b[..b.len() - 3]);

        let mut assembler = FrameAssembler::new();
        let frames = assembler.push(&chunk).unwrap();
        assert_eq!(frames, vec![a]);
        assert_eq!(assembler.pending(), b.len() - 3);

        let frames = assembler.push(&b[b.len() - 3..]).unwrap();
        assert_eq!(frames, vec![b]);
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_assembler_byte_at_a_time() {
        let frames: Vec<Vec<u8>> = (0..3).map(|i| encode(&msg("x", i)).unwrap()).collect();
        let stream: Vec<u8> = frames.concat();

        let mut assembler = FrameAssembler::new();
        let mut out = Vec::new();
        for byte in &stream {
            out.extend(assembler.push(std::slice::from_ref(byte)).unwrap());
        }
        assert_eq!(out, frames);
    }

    #[test]
    fn test_assembler_rejects_bad_length_and_resets() {
        let mut assembler = FrameAssembler::new();
        assert!(assembler.push(&[0, 0, 0, 0]).is_err());
        assert_eq!(assembler.pending(), 0);

        let good = encode(&msg("ok", 1)).unwrap();
        assert_eq!(assembler.push(&good).unwrap(), vec![good]);
    }
}
