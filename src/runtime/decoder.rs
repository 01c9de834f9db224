//! Frame decoder: classifies and decodes inbound bytes.
//!
//! One entry point for all three wire formats the chat port accepts. The
//! leading byte picks the path: a WebSocket text-frame header goes to the
//! frame parser, anything else accumulates as a line, and a complete line
//! starting with `GET` becomes the HTTP sentinel.

use crate::protocols::http;
use crate::protocols::text;
use crate::protocols::websocket;

/// A decoded unit of application data.
///
/// Frames are ephemeral: produced and consumed within one dispatch cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Raw text line, newline included.
    Line(Vec<u8>),
    /// Unmasked payload of a WebSocket text frame.
    WsText(Vec<u8>),
    /// HTTP request line observed on the chat port.
    HttpRequest(String),
}

/// Result of decoding a read buffer.
#[derive(Debug)]
pub enum DecodeResult {
    /// A complete frame and the bytes it consumed.
    Complete(Frame, usize),
    /// No complete frame yet; keep accumulating.
    Incomplete,
    /// Malformed input; the connection must be closed, not retried.
    ProtocolError,
}

/// Decode one frame from the front of `input`.
///
/// WebSocket frames are expected to arrive whole within one readiness
/// event, so a truncated frame header or payload is a protocol error
/// here rather than a reason to keep buffering. Text lines, by contrast,
/// accumulate across reads until the newline shows up.
pub fn decode(input: &[u8]) -> DecodeResult {
    if input.is_empty() {
        return DecodeResult::Incomplete;
    }

    if websocket::parser::is_frame_start(input[0]) {
        return match websocket::parser::parse(input) {
            websocket::parser::ParseResult::Complete { payload, consumed } => {
                DecodeResult::Complete(Frame::WsText(payload), consumed)
            }
            websocket::parser::ParseResult::Incomplete => DecodeResult::ProtocolError,
            websocket::parser::ParseResult::Error(_) => DecodeResult::ProtocolError,
        };
    }

    match text::parser::parse(input) {
        text::parser::ParseResult::Complete(line, consumed) => {
            if http::is_request_line(&line) {
                let request_line = String::from_utf8_lossy(&line).into_owned();
                DecodeResult::Complete(Frame::HttpRequest(request_line), consumed)
            } else {
                DecodeResult::Complete(Frame::Line(line), consumed)
            }
        }
        text::parser::ParseResult::Incomplete => DecodeResult::Incomplete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::websocket::parser::encode_client_text;

    #[test]
    fn test_decode_text_line() {
        match decode(b"hi\n") {
            DecodeResult::Complete(Frame::Line(line), 3) => assert_eq!(line, b"hi\n"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_decode_http_request_line() {
        match decode(b"GET / HTTP/1.1\r\n") {
            DecodeResult::Complete(Frame::HttpRequest(line), 16) => {
                assert!(line.starts_with("GET / HTTP"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_decode_websocket_frame() {
        let frame = encode_client_text(b"hello", [0xde, 0xad, 0xbe, 0xef]);
        match decode(&frame) {
            DecodeResult::Complete(Frame::WsText(payload), consumed) => {
                assert_eq!(payload, b"hello");
                assert_eq!(consumed, frame.len());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_unmasked_websocket_frame_is_protocol_error() {
        let frame = [0x81, 0x05, b'h', b'e', b'l', b'l', b'o'];
        match decode(&frame) {
            DecodeResult::ProtocolError => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_truncated_websocket_frame_is_protocol_error() {
        // Frames arrive whole per readiness event; a short one is malformed.
        let frame = encode_client_text(b"hello", [1, 2, 3, 4]);
        match decode(&frame[..3]) {
            DecodeResult::ProtocolError => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_partial_line_keeps_accumulating() {
        match decode(b"partial without newline") {
            DecodeResult::Incomplete => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_empty_input_incomplete() {
        match decode(b"") {
            DecodeResult::Incomplete => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_back_to_back_frames_consume_one_at_a_time() {
        let mut input = Vec::new();
        input.extend_from_slice(b"first\n");
        input.extend_from_slice(b"second\n");

        match decode(&input) {
            DecodeResult::Complete(Frame::Line(line), 6) => assert_eq!(line, b"first\n"),
            other => panic!("unexpected: {:?}", other),
        }
        match decode(&input[6..]) {
            DecodeResult::Complete(Frame::Line(line), 7) => assert_eq!(line, b"second\n"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
