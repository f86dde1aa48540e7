//! Wire format of the eMH1 protocol.
//!
//! Every frame is a line of ASCII text terminated by `CR LF`:
//!
//! ```text
//! '!' <addr:1> ' ' <func:2> [' ' <payload:N>] CR LF     sent by the master
//! '>' <addr:1> ' ' <func:2> ' ' <payload:N> CR LF       sent by a client
//! ```
//!
//! The [`FrameParser`] extracts frames from a continuous byte stream,
//! while [`serialize`] renders outbound commands.

use alloc::vec::Vec;
use log::{debug, trace};

/// Start marker of frames sent by a master.
pub const MASTER_MARKER: u8 = b'!';

/// Start marker of frames sent by a client.
pub const CLIENT_MARKER: u8 = b'>';

/// Byte terminating every frame.
pub const TERMINATOR: u8 = b'\n';

/// Offset of the payload within a client frame.
pub const PAYLOAD_OFFSET: usize = 7;

/// Width of numeric payload fields.
pub const NUMBER_WIDTH: usize = 4;

/// Originator of a frame, determined by its start marker.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Origin {
    /// Frame sent by a master, including this driver.
    Master,
    /// Frame sent by a client device.
    Client,
    /// Frame with an unrecognized start marker.
    Unknown,
}

impl Origin {
    /// Classifies a frame by its first byte.
    #[must_use]
    pub fn from_marker(byte: u8) -> Self {
        match byte {
            MASTER_MARKER => Self::Master,
            CLIENT_MARKER => Self::Client,
            _ => Self::Unknown,
        }
    }
}

/// A decoded client frame.
///
/// The payload borrows from the parser's buffer and excludes the `CR LF` terminator.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct Frame<'a> {
    /// Device address (`0` to `9`).
    pub address: u8,
    /// Function code (`0` to `99`).
    pub function: u8,
    /// Payload bytes, possibly empty.
    pub payload: &'a [u8],
}

/// Result of feeding a byte to the [`FrameParser`].
#[derive(PartialEq, Eq, Debug)]
pub enum FrameResult<'a> {
    /// The frame is not terminated yet.
    Incomplete,
    /// A well-formed frame sent by a client.
    ClientFrame(Frame<'a>),
    /// A frame sent by a master, e.g. the driver's own transmission.
    MasterFrame,
    /// A frame with an unknown start marker or a truncated structure.
    Invalid,
}

/// Incremental frame parser.
///
/// Bytes are accumulated until the terminator arrives.
/// After any result other than [`FrameResult::Incomplete`],
/// the caller must [`clear`](FrameParser::clear) the parser before feeding the next byte.
#[derive(Debug)]
pub struct FrameParser {
    buf: Vec<u8>,
    max_len: usize,
}

impl FrameParser {
    /// Constructs a parser that rejects frames longer than `max_len` bytes.
    #[must_use]
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_len,
        }
    }

    /// Appends a byte to the frame in progress.
    pub fn feed(&mut self, byte: u8) -> FrameResult<'_> {
        if self.buf.len() >= self.max_len {
            debug!("Frame exceeds {} bytes", self.max_len);

            return FrameResult::Invalid;
        }

        self.buf.push(byte);

        if byte != TERMINATOR {
            return FrameResult::Incomplete;
        }

        trace!("Frame: '{}'", self.buf.escape_ascii());

        match Origin::from_marker(self.buf[0]) {
            Origin::Master => FrameResult::MasterFrame,
            Origin::Client => match decode_client_frame(&self.buf) {
                Some(frame) => FrameResult::ClientFrame(frame),
                None => FrameResult::Invalid,
            },
            Origin::Unknown => FrameResult::Invalid,
        }
    }

    /// Discards the frame in progress.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Returns `true` if no bytes of a frame have been received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns the number of buffered bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }
}

/// Decodes a terminated client frame.
///
/// Returns `None` if the address or function code is missing or not numeric.
fn decode_client_frame(buf: &[u8]) -> Option<Frame<'_>> {
    let address = decode_digit(*buf.get(1)?)?;
    let function = decode_digit(*buf.get(3)?)? * 10 + decode_digit(*buf.get(4)?)?;
    let body = buf.strip_suffix(&[TERMINATOR])?;
    let body = body.strip_suffix(b"\r").unwrap_or(body);

    Some(Frame {
        address,
        function,
        payload: body.get(PAYLOAD_OFFSET..).unwrap_or_default(),
    })
}

fn decode_digit(byte: u8) -> Option<u8> {
    byte.is_ascii_digit().then(|| byte - b'0')
}

/// Renders a master frame.
///
/// `address` is a single digit, `function` the two ASCII digits of the function code.
/// The space before the payload is omitted if the payload is empty.
///
/// # Panics
///
/// Panics in debug builds if `address` is not a single digit.
/// [`Command`](crate::Command) only holds single-digit addresses.
#[must_use]
pub fn serialize(address: u8, function: [u8; 2], payload: &[u8]) -> Vec<u8> {
    debug_assert!(address <= 9, "address {address} is not a single digit");

    let mut buf = Vec::with_capacity(payload.len() + 8);

    buf.extend_from_slice(&[MASTER_MARKER, b'0'.wrapping_add(address), b' ']);
    buf.extend_from_slice(&function);

    if !payload.is_empty() {
        buf.push(b' ');
        buf.extend_from_slice(payload);
    }

    buf.extend_from_slice(b"\r\n");
    buf
}

/// Decodes a decimal number from at most `width` leading digits of `field`.
///
/// Decoding stops at the first non-digit character, so short,
/// padded or malformed fields yield whatever was accumulated (possibly `0`).
/// It also stops before a digit that would overflow the result.
#[must_use]
pub fn decode_number(field: &[u8], width: usize) -> u32 {
    let mut val: u32 = 0;

    for digit in field.iter().take(width).map_while(|&byte| decode_digit(byte)) {
        match val.checked_mul(10).and_then(|val| val.checked_add(u32::from(digit))) {
            Some(next) => val = next,
            None => break,
        }
    }

    val
}

/// Renders a value as a zero-padded four-digit field.
///
/// Returns `None` if the value does not fit into four digits.
#[must_use]
pub fn encode_number(val: u16) -> Option<[u8; NUMBER_WIDTH]> {
    if val > 9999 {
        return None;
    }

    let mut buf = [b'0'; NUMBER_WIDTH];
    let mut rest = val;

    for slot in buf.iter_mut().rev() {
        // Digit values are below 10
        *slot = b'0' + (rest % 10) as u8;
        rest /= 10;
    }

    Some(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Function, tests::init_logger};

    fn feed_all<'a>(parser: &'a mut FrameParser, data: &[u8]) -> FrameResult<'a> {
        let (last, rest) = data.split_last().expect("data should not be empty");

        for &byte in rest {
            assert_eq!(
                parser.feed(byte),
                FrameResult::Incomplete,
                "frame should be incomplete before terminator"
            );
        }

        parser.feed(*last)
    }

    #[test]
    fn parse_client_frame() {
        init_logger();

        let mut parser = FrameParser::new(100);
        let res = feed_all(&mut parser, b">1 02 0002\r\n");

        assert_eq!(
            res,
            FrameResult::ClientFrame(Frame {
                address: 1,
                function: 2,
                payload: b"0002",
            }),
            "client frame should be decoded"
        );
    }

    #[test]
    fn parse_client_frame_without_payload() {
        init_logger();

        let mut parser = FrameParser::new(100);
        let res = feed_all(&mut parser, b">0 25\r\n");

        assert_eq!(
            res,
            FrameResult::ClientFrame(Frame {
                address: 0,
                function: 25,
                payload: b"",
            }),
            "payload should be empty"
        );
    }

    #[test]
    fn parse_master_frame() {
        init_logger();

        let mut parser = FrameParser::new(100);

        assert_eq!(
            feed_all(&mut parser, b"!0 02\r\n"),
            FrameResult::MasterFrame,
            "master frame should be recognized"
        );
    }

    #[test]
    fn parse_invalid_frames() {
        init_logger();

        let mut parser = FrameParser::new(100);

        for data in [
            &b"?0 02\r\n"[..],
            b">\n",
            b">0 \n",
            b">x 02 0002\r\n",
            b">0 a2 0002\r\n",
        ] {
            assert_eq!(
                feed_all(&mut parser, data),
                FrameResult::Invalid,
                "frame '{}' should be invalid",
                data.escape_ascii()
            );
            parser.clear();
        }
    }

    #[test]
    fn parse_after_clear() {
        init_logger();

        let mut parser = FrameParser::new(100);

        feed_all(&mut parser, b"garbage\n");
        parser.clear();

        assert!(parser.is_empty(), "parser should be empty after clear");
        assert_eq!(
            feed_all(&mut parser, b">2 11 0160\r\n"),
            FrameResult::ClientFrame(Frame {
                address: 2,
                function: 11,
                payload: b"0160",
            }),
            "frame after clear should be decoded"
        );
    }

    #[test]
    fn parse_overlong_frame() {
        init_logger();

        let mut parser = FrameParser::new(8);

        for &byte in b">1 02 00" {
            assert_eq!(parser.feed(byte), FrameResult::Incomplete);
        }

        assert_eq!(
            parser.feed(b'0'),
            FrameResult::Invalid,
            "frame exceeding the maximum length should be invalid"
        );
        assert_eq!(parser.len(), 8, "overflowing byte should not be buffered");
    }

    #[test]
    fn serialize_without_payload() {
        assert_eq!(
            serialize(0, *b"02", b""),
            b"!0 02\r\n",
            "frame should omit payload separator"
        );
    }

    #[test]
    fn serialize_with_payload() {
        assert_eq!(
            serialize(0, *b"12", b"0160"),
            b"!0 12 0160\r\n",
            "frame should contain payload"
        );
    }

    #[test]
    fn serialize_then_parse() {
        init_logger();

        let mut parser = FrameParser::new(100);

        for address in 0..=9 {
            for function in (0..=99).filter_map(Function::from_repr) {
                for payload in [&b""[..], b"0320"] {
                    let mut data = serialize(address, function.to_ascii(), payload);

                    // Replies share the layout, only the marker differs
                    data[0] = CLIENT_MARKER;

                    assert_eq!(
                        feed_all(&mut parser, &data),
                        FrameResult::ClientFrame(Frame {
                            address,
                            function: function as u8,
                            payload,
                        }),
                        "fields of '{}' should survive serialization",
                        data.escape_ascii()
                    );
                    parser.clear();
                }
            }
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "not a single digit")]
    fn serialize_wide_address() {
        let _ = serialize(210, *b"02", b"");
    }

    #[test]
    fn decode_numbers() {
        assert_eq!(decode_number(b"0999", 4), 999, "full field should be decoded");
        assert_eq!(decode_number(b"12\0\0", 4), 12, "null padding should stop decoding");
        assert_eq!(decode_number(b"12", 4), 12, "short field should be decoded");
        assert_eq!(decode_number(b"x123", 4), 0, "leading non-digit should yield zero");
        assert_eq!(decode_number(b"012345", 4), 123, "decoding should stop at width");
        assert_eq!(decode_number(b"0160\r\n", 4), 160, "terminator should be ignored");
        assert_eq!(
            decode_number(b"99999999999", 11),
            999_999_999,
            "decoding should stop before overflowing"
        );
        assert_eq!(
            decode_number(b"4294967295", 10),
            u32::MAX,
            "largest value should be decoded"
        );
    }

    #[test]
    fn encode_numbers() {
        assert_eq!(encode_number(999), Some(*b"0999"), "value should be zero-padded");
        assert_eq!(encode_number(0), Some(*b"0000"), "zero should be rendered");
        assert_eq!(encode_number(9999), Some(*b"9999"), "maximum should be rendered");
        assert_eq!(encode_number(10000), None, "overflowing value should be rejected");
    }
}
