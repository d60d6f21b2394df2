//! # BINDER MODBus Protocol Implementation
//!
//! This module provides the low-level implementation of the MODBus variant spoken
//! by BINDER test chambers through their serial-to-TCP adaptor. It is not standard
//! MODBus-TCP: every frame is a MODBus RTU frame (slave address, function code,
//! payload and a little-endian CRC16 trailer) sent over a plain TCP stream.
//!
//! ## Key Features:
//!
//! - **Checksum Calculation**: [`crc16`] computes the CRC16 the device expects.
//! - **Float Encoding**: [`encode_float`] and [`decode_float`] convert between `f32`
//!   and the word-swapped register pair the device uses.
//! - **Request Generation**: builders for the "read n words", "write one word" and
//!   "write n words" requests.
//! - **Response Decoding**: parsers that report whether more bytes are needed
//!   ([`FrameError::ShortMessage`]), or why the response is unusable.
//! - **Register Values**: strongly typed views of the mode and operation line
//!   registers and the alarm text block.
//!
//! Most users should not need this module directly; see [`crate::oven::Oven`].

use std::fmt;

/// Fixed slave address of the oven.
pub const SLAVE_ADDRESS: u8 = 0x01;

/// "Read n words" function code.
pub const FN_READ_N: u8 = 0x03;
/// Alternative "read n words" function code; the device may answer a
/// [`FN_READ_N`] request with this code.
pub const FN_READ_N_ALT: u8 = 0x04;
/// "Write one word" function code.
pub const FN_WRITE_ONE: u8 = 0x06;
/// "Write n words" function code.
pub const FN_WRITE_N: u8 = 0x10;
/// Set in the function code of an error response.
pub const FN_ERROR_FLAG: u8 = 0x80;

/// Maximum number of words a single read request may ask for.
pub const MAX_READ_WORDS: u16 = 0x7d;

/// Length of the alarm/note text block in words.
pub const ALARM_TEXT_WORDS: u16 = 0x14;

const ERROR_RESPONSE_LEN: usize = 5;
const WRITE_RESPONSE_LEN: usize = 8;

/// Reasons a response frame could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Not enough bytes yet; the caller should keep receiving.
    #[error("Wanted {wanted} bytes, got {length}")]
    ShortMessage { length: usize, wanted: usize },

    /// The response carries a function code other than the one expected.
    #[error("Expected fn {expected:02x}, got {actual:02x}")]
    FunctionMismatch { expected: u8, actual: u8 },

    /// The CRC16 trailer does not match the computed checksum.
    #[error("Expected crc {expected:04x}, got {actual:04x}")]
    CrcMismatch { expected: u16, actual: u16 },

    /// A read response announced an odd number of data bytes.
    #[error("Odd number of bytes read ({0})")]
    OddByteCount(u8),
}

/// Error codes the device sends in an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorCode {
    InvalidFunction,
    InvalidAddress,
    ValueOutOfRange,
    /// Documented but never sent by the controller, which always answers
    /// within 250 ms.
    SlaveNotReady,
    AccessDenied,
    Unknown(u8),
}

impl DeviceErrorCode {
    pub fn code(&self) -> u8 {
        match self {
            DeviceErrorCode::InvalidFunction => 1,
            DeviceErrorCode::InvalidAddress => 2,
            DeviceErrorCode::ValueOutOfRange => 3,
            DeviceErrorCode::SlaveNotReady => 4,
            DeviceErrorCode::AccessDenied => 5,
            DeviceErrorCode::Unknown(code) => *code,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DeviceErrorCode::InvalidFunction => "invalid function",
            DeviceErrorCode::InvalidAddress => "invalid parameter address",
            DeviceErrorCode::ValueOutOfRange => "parameter value outside range of values",
            DeviceErrorCode::SlaveNotReady => "slave not ready",
            DeviceErrorCode::AccessDenied => "write access to parameter denied",
            DeviceErrorCode::Unknown(_) => "unknown error",
        }
    }
}

impl From<u8> for DeviceErrorCode {
    fn from(code: u8) -> Self {
        match code {
            1 => DeviceErrorCode::InvalidFunction,
            2 => DeviceErrorCode::InvalidAddress,
            3 => DeviceErrorCode::ValueOutOfRange,
            4 => DeviceErrorCode::SlaveNotReady,
            5 => DeviceErrorCode::AccessDenied,
            other => DeviceErrorCode::Unknown(other),
        }
    }
}

impl fmt::Display for DeviceErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.description(), self.code())
    }
}

/// Calculates the CRC16 checksum of `bytes`.
///
/// Reflected polynomial 0xA001, seed 0xFFFF, processed one bit at a time.
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for byte in bytes {
        crc ^= *byte as u16;
        for _ in 0..8 {
            let lsb = crc & 1;
            crc >>= 1;
            if lsb != 0 {
                crc ^= 0xA001;
            }
        }
    }
    crc
}

/// Encodes a float into the register pair the device expects.
///
/// The big-endian IEEE754 representation is split into two big-endian words
/// which are then transmitted in swapped order.
pub fn encode_float(value: f32) -> [u16; 2] {
    let bits = value.to_bits();
    let high = (bits >> 16) as u16;
    let low = bits as u16;
    [low, high]
}

/// Decodes a float from a register pair, reversing the word swap of [`encode_float`].
pub fn decode_float(words: [u16; 2]) -> f32 {
    let [low, high] = words;
    f32::from_bits(((high as u32) << 16) | low as u32)
}

fn finish_frame(mut msg: Vec<u8>) -> Vec<u8> {
    let crc = crc16(&msg);
    msg.extend_from_slice(&crc.to_le_bytes());
    msg
}

fn check_crc(msg: &[u8], payload_len: usize) -> Result<(), FrameError> {
    let actual = u16::from_le_bytes([msg[payload_len], msg[payload_len + 1]]);
    let expected = crc16(&msg[..payload_len]);
    if actual != expected {
        return Err(FrameError::CrcMismatch { expected, actual });
    }
    Ok(())
}

fn word_at(msg: &[u8], index: usize) -> u16 {
    u16::from_be_bytes([msg[index], msg[index + 1]])
}

/// Builds a "read n words" request for `count` words starting at `address`.
pub fn read_n_request(address: u16, count: u16) -> Vec<u8> {
    let mut msg = vec![SLAVE_ADDRESS, FN_READ_N];
    msg.extend_from_slice(&address.to_be_bytes());
    msg.extend_from_slice(&count.to_be_bytes());
    finish_frame(msg)
}

/// Full length of a successful response to a read of `count` words.
pub fn read_n_response_len(count: u16) -> usize {
    5 + 2 * count as usize
}

/// Builds a "write one word" request.
pub fn write_one_request(address: u16, value: u16) -> Vec<u8> {
    let mut msg = vec![SLAVE_ADDRESS, FN_WRITE_ONE];
    msg.extend_from_slice(&address.to_be_bytes());
    msg.extend_from_slice(&value.to_be_bytes());
    finish_frame(msg)
}

/// Full length of a successful response to a write request.
pub fn write_response_len() -> usize {
    WRITE_RESPONSE_LEN
}

/// Builds a "write n words" request; the payload carries a byte-count prefix.
pub fn write_n_request(address: u16, words: &[u16]) -> Vec<u8> {
    let count = words.len() as u16;
    let mut msg = vec![SLAVE_ADDRESS, FN_WRITE_N];
    msg.extend_from_slice(&address.to_be_bytes());
    msg.extend_from_slice(&count.to_be_bytes());
    msg.push((count * 2) as u8);
    for word in words {
        msg.extend_from_slice(&word.to_be_bytes());
    }
    finish_frame(msg)
}

/// Builds the device's answer to a "read n words" request.
pub fn read_n_response(words: &[u16]) -> Vec<u8> {
    let mut msg = vec![SLAVE_ADDRESS, FN_READ_N, (words.len() * 2) as u8];
    for word in words {
        msg.extend_from_slice(&word.to_be_bytes());
    }
    finish_frame(msg)
}

/// Builds the device's answer to a "write n words" request.
pub fn write_n_response(address: u16, count: u16) -> Vec<u8> {
    let mut msg = vec![SLAVE_ADDRESS, FN_WRITE_N];
    msg.extend_from_slice(&address.to_be_bytes());
    msg.extend_from_slice(&count.to_be_bytes());
    finish_frame(msg)
}

/// Builds an error response to a request with function code `function`.
pub fn error_response(function: u8, code: u8) -> Vec<u8> {
    finish_frame(vec![SLAVE_ADDRESS, function | FN_ERROR_FLAG, code])
}

/// Parses a "read n words" response and returns the words read.
pub fn parse_read_n_response(msg: &[u8]) -> Result<Vec<u16>, FrameError> {
    if msg.len() < 3 {
        return Err(FrameError::ShortMessage {
            length: msg.len(),
            wanted: 3,
        });
    }
    let function = msg[1];
    if function != FN_READ_N && function != FN_READ_N_ALT {
        return Err(FrameError::FunctionMismatch {
            expected: FN_READ_N,
            actual: function,
        });
    }
    let n_bytes = msg[2];
    if n_bytes & 1 != 0 {
        return Err(FrameError::OddByteCount(n_bytes));
    }
    let payload_len = 3 + n_bytes as usize;
    if msg.len() < payload_len + 2 {
        return Err(FrameError::ShortMessage {
            length: msg.len(),
            wanted: payload_len + 2,
        });
    }
    check_crc(msg, payload_len)?;
    Ok((3..payload_len).step_by(2).map(|i| word_at(msg, i)).collect())
}

fn parse_write_response(msg: &[u8], function: u8) -> Result<(u16, u16), FrameError> {
    if msg.len() < WRITE_RESPONSE_LEN {
        return Err(FrameError::ShortMessage {
            length: msg.len(),
            wanted: WRITE_RESPONSE_LEN,
        });
    }
    if msg[1] != function {
        return Err(FrameError::FunctionMismatch {
            expected: function,
            actual: msg[1],
        });
    }
    check_crc(msg, 6)?;
    Ok((word_at(msg, 2), word_at(msg, 4)))
}

/// Parses a "write one word" response; returns `(address, value)` as echoed by the device.
pub fn parse_write_one_response(msg: &[u8]) -> Result<(u16, u16), FrameError> {
    parse_write_response(msg, FN_WRITE_ONE)
}

/// Parses a "write n words" response; returns `(address, count)` as echoed by the device.
pub fn parse_write_n_response(msg: &[u8]) -> Result<(u16, u16), FrameError> {
    parse_write_response(msg, FN_WRITE_N)
}

/// Tests whether `msg` is an error response.
///
/// Returns `Ok(None)` when the message is not (or cannot yet be told to be) an
/// error response, and `Ok(Some(code))` for a complete, valid one. A message
/// whose function code marks it as an error response but which is still
/// incomplete is reported as [`FrameError::ShortMessage`]; one that is complete
/// but fails its checksum is reported as [`FrameError::CrcMismatch`].
pub fn parse_error_response(msg: &[u8]) -> Result<Option<DeviceErrorCode>, FrameError> {
    if msg.len() < 2 || msg[1] & FN_ERROR_FLAG == 0 {
        return Ok(None);
    }
    if msg.len() < ERROR_RESPONSE_LEN {
        return Err(FrameError::ShortMessage {
            length: msg.len(),
            wanted: ERROR_RESPONSE_LEN,
        });
    }
    check_crc(msg, 3)?;
    Ok(Some(DeviceErrorCode::from(msg[2])))
}

/// The operating mode register.
///
/// The device reports a bitmask; the oven is idle when none of the known
/// control modes is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OperatingMode(u16);

impl OperatingMode {
    pub const IDLE: OperatingMode = OperatingMode(0);
    pub const BASIC: OperatingMode = OperatingMode(0x1000);
    pub const MANUAL: OperatingMode = OperatingMode(0x0800);
    pub const AUTO: OperatingMode = OperatingMode(0x0400);

    pub fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn is_basic(&self) -> bool {
        self.0 & Self::BASIC.0 != 0
    }

    pub fn is_manual(&self) -> bool {
        self.0 & Self::MANUAL.0 != 0
    }

    pub fn is_auto(&self) -> bool {
        self.0 & Self::AUTO.0 != 0
    }

    pub fn is_idle(&self) -> bool {
        !(self.is_basic() || self.is_manual() || self.is_auto())
    }

    /// Names of the active modes, or `["idle"]`.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.is_basic() {
            names.push("basic");
        }
        if self.is_manual() {
            names.push("manual");
        }
        if self.is_auto() {
            names.push("auto");
        }
        if names.is_empty() {
            names.push("idle");
        }
        names
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x} ({})", self.0, self.names().join("&"))
    }
}

/// The operation lines register (bit 0-7 = line 0-7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OperationLines(u16);

impl OperationLines {
    /// Line 0 drives condensation (bedew) protection.
    pub const CONDENSATION_PROTECTION: u16 = 0x0001;

    pub fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    /// Sets the lines in `set`, then clears the lines in `clear`.
    pub fn apply(self, set: u16, clear: u16) -> Self {
        Self((self.0 | set) & !clear)
    }

    pub fn condensation_protection(&self) -> bool {
        self.0 & Self::CONDENSATION_PROTECTION != 0
    }

    pub fn set_condensation_protection(&mut self, active: bool) {
        *self = if active {
            self.apply(Self::CONDENSATION_PROTECTION, 0)
        } else {
            self.apply(0, Self::CONDENSATION_PROTECTION)
        };
    }
}

/// Decodes the alarm/note text block.
///
/// Each word carries one character in its low byte. Returns `None` when the
/// block is all spaces, otherwise the text with trailing spaces removed.
pub fn decode_alarm_text(words: &[u16]) -> Option<String> {
    if words.iter().all(|word| *word == 0x20) {
        return None;
    }
    let text: String = words.iter().map(|word| char::from(*word as u8)).collect();
    Some(text.trim_end_matches(' ').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn crc16_test_vectors() {
        assert_eq!(crc16(b"123456789"), 0x4B37);
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]), 0x0A84);
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn crc16_detects_single_bit_flips() {
        let frame = read_n_request(0x11a9, 2);
        let payload = &frame[..frame.len() - 2];
        let crc = crc16(payload);
        for byte in 0..payload.len() {
            for bit in 0..8 {
                let mut flipped = payload.to_vec();
                flipped[byte] ^= 1 << bit;
                assert_ne!(crc16(&flipped), crc, "flip of byte {byte} bit {bit}");
            }
        }
    }

    #[test]
    fn float_words_are_swapped() {
        // 1.0 = 0x3F800000
        assert_eq!(encode_float(1.0), [0x0000, 0x3F80]);
        assert_eq!(decode_float([0x0000, 0x3F80]), 1.0);
        // 25.5 = 0x41CC0000
        assert_eq!(encode_float(25.5), [0x0000, 0x41CC]);
        // -40.0 = 0xC2200000
        assert_eq!(decode_float([0x0000, 0xC220]), -40.0);
        // an unswapped decode gives a different value, not an error
        assert_ne!(decode_float([0x3F80, 0x0000]), 1.0);
    }

    #[test]
    fn float_codec_is_exact() {
        for value in [
            0.0f32,
            -0.0,
            1.0e-42,
            f32::MIN_POSITIVE,
            -39.99,
            179.875,
            f32::MAX,
            f32::MIN,
            std::f32::consts::PI,
        ] {
            assert_eq!(
                decode_float(encode_float(value)).to_bits(),
                value.to_bits()
            );
        }
    }

    #[test]
    fn read_n_request_layout() {
        assert_eq!(
            read_n_request(0x0000, 1),
            vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]
        );
        let frame = read_n_request(0x11a9, 2);
        assert_eq!(&frame[..6], &[0x01, 0x03, 0x11, 0xa9, 0x00, 0x02]);
    }

    #[test]
    fn write_n_request_layout() {
        let frame = write_n_request(0x1581, &[0x0000, 0x41CC]);
        assert_eq!(
            &frame[..11],
            &[0x01, 0x10, 0x15, 0x81, 0x00, 0x02, 0x04, 0x00, 0x00, 0x41, 0xCC]
        );
        assert_eq!(frame.len(), 13);
        let crc = crc16(&frame[..11]).to_le_bytes();
        assert_eq!(&frame[11..], &crc);
    }

    #[test]
    fn responses_parse_back() {
        let words = [0x1234, 0xBEEF, 0x0020];
        assert_eq!(parse_read_n_response(&read_n_response(&words)), Ok(words.to_vec()));
        // the device echoes a single write
        assert_eq!(
            parse_write_one_response(&write_one_request(0x1a22, 0x0800)),
            Ok((0x1a22, 0x0800))
        );
        assert_eq!(
            parse_write_n_response(&write_n_response(0x156f, 2)),
            Ok((0x156f, 2))
        );
    }

    #[test]
    fn read_n_alternative_function_code() {
        let mut msg = vec![SLAVE_ADDRESS, FN_READ_N_ALT, 2, 0x00, 0x07];
        msg.extend_from_slice(&crc16(&msg).to_le_bytes());
        assert_eq!(parse_read_n_response(&msg), Ok(vec![7]));
    }

    #[test]
    fn prefixes_are_short_messages() {
        let msg = read_n_response(&[0x0000, 0x41CC]);
        for len in 0..msg.len() {
            assert_matches!(
                parse_read_n_response(&msg[..len]),
                Err(FrameError::ShortMessage { .. }),
                "prefix of length {len}"
            );
        }
        let msg = write_one_request(0x1a22, 0);
        for len in 0..msg.len() {
            assert_matches!(
                parse_write_one_response(&msg[..len]),
                Err(FrameError::ShortMessage { .. })
            );
        }
    }

    #[test]
    fn function_mismatch() {
        assert_matches!(
            parse_read_n_response(&write_one_request(0x1a22, 0)),
            Err(FrameError::FunctionMismatch {
                expected: FN_READ_N,
                actual: FN_WRITE_ONE
            })
        );
        assert_matches!(
            parse_write_n_response(&write_one_request(0x1a22, 0)),
            Err(FrameError::FunctionMismatch { .. })
        );
    }

    #[test]
    fn crc_mismatch() {
        let mut msg = read_n_response(&[0x0800]);
        let last = msg.len() - 1;
        msg[last] ^= 0xFF;
        assert_matches!(
            parse_read_n_response(&msg),
            Err(FrameError::CrcMismatch { .. })
        );
    }

    #[test]
    fn odd_byte_count() {
        assert_matches!(
            parse_read_n_response(&[SLAVE_ADDRESS, FN_READ_N, 3]),
            Err(FrameError::OddByteCount(3))
        );
    }

    #[test]
    fn error_responses() {
        let msg = error_response(FN_READ_N, 2);
        assert_eq!(msg[1], 0x83);
        assert_eq!(
            parse_error_response(&msg),
            Ok(Some(DeviceErrorCode::InvalidAddress))
        );
        // a positive response is not an error response
        assert_eq!(parse_error_response(&read_n_response(&[1])), Ok(None));
        assert_eq!(parse_error_response(&[SLAVE_ADDRESS]), Ok(None));
        // an error response still arriving
        assert_matches!(
            parse_error_response(&msg[..3]),
            Err(FrameError::ShortMessage { .. })
        );
        // is an error response, but not a valid one
        let mut bad = msg.clone();
        bad[2] = 5;
        assert_matches!(
            parse_error_response(&bad),
            Err(FrameError::CrcMismatch { .. })
        );
    }

    #[test]
    fn device_error_codes() {
        assert_eq!(DeviceErrorCode::from(5), DeviceErrorCode::AccessDenied);
        assert_eq!(DeviceErrorCode::from(9), DeviceErrorCode::Unknown(9));
        assert_eq!(DeviceErrorCode::from(9).code(), 9);
        assert_eq!(
            DeviceErrorCode::from(3).to_string(),
            "parameter value outside range of values (code 3)"
        );
        assert_eq!(DeviceErrorCode::from(42).description(), "unknown error");
    }

    #[test]
    fn operating_mode() {
        assert!(OperatingMode::from_bits(0).is_idle());
        assert_eq!(OperatingMode::from_bits(0).names(), vec!["idle"]);
        let mode = OperatingMode::from_bits(0x1800);
        assert!(mode.is_basic() && mode.is_manual() && !mode.is_auto());
        assert!(!mode.is_idle());
        assert_eq!(mode.to_string(), "1800 (basic&manual)");
        // unrelated bits do not make the oven active
        assert!(OperatingMode::from_bits(0x0001).is_idle());
    }

    #[test]
    fn operation_lines() {
        let lines = OperationLines::from_bits(0b1010);
        assert_eq!(lines.apply(0b0001, 0b1000).bits(), 0b0011);
        let mut lines = OperationLines::default();
        lines.set_condensation_protection(true);
        assert!(lines.condensation_protection());
        lines.set_condensation_protection(false);
        assert_eq!(lines.bits(), 0);
    }

    #[test]
    fn alarm_text() {
        let blank = vec![0x20u16; ALARM_TEXT_WORDS as usize];
        assert_eq!(decode_alarm_text(&blank), None);
        let mut words: Vec<u16> = "Door open".bytes().map(u16::from).collect();
        words.resize(ALARM_TEXT_WORDS as usize, 0x20);
        assert_eq!(decode_alarm_text(&words), Some("Door open".to_string()));
        // only the low byte carries the character
        assert_eq!(decode_alarm_text(&[0x1241, 0x20]), Some("A".to_string()));
    }
}
