//! Wire-format definitions for telemetry and acknowledgment frames.
//!
//! This module is responsible for:
//! - Defining the on-wire binary layout of a [`TelemetryRecord`] and of an
//!   acknowledgment.
//! - Encoding a record into a fixed-length [`Frame`] with a CRC-32 trailer.
//! - Decoding raw bytes back, reporting whether the trailer verified.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers and floats are **little-endian**.
//!
//! ```text
//!  data frame (layout version 5, 45 bytes)
//!  +---+---------+---------+---------+---------+------+------+-------------+--------------+-------+
//!  |ver| seq u32 | lat f32 | lon f32 | alt u32 | hi   | lo   | capture i64 | session 12B  | crc32 |
//!  | 1 |    4    |    4    |    4    |    4    | i16  | i16  |      8      | ASCII, NUL   |   4   |
//!  +---+---------+---------+---------+---------+------+------+-------------+--------------+-------+
//!
//!  ack frame (17 bytes)
//!  +--------------+-------+---------+-------+
//!  | call sign 6B | "ACK" | seq u32 | crc32 |
//!  +--------------+-------+---------+-------+
//! ```
//!
//! The CRC is IEEE CRC-32 over every byte preceding the trailer.

use std::fmt;

use rand::Rng;
use thiserror::Error;

/// Layout version written into byte 0 of every data frame.
pub const WIRE_VERSION: u8 = 5;

/// Total encoded length of a data frame.
pub const FRAME_LEN: usize = 45;

/// Total encoded length of an acknowledgment frame.
pub const ACK_LEN: usize = 17;

/// Width of the session identifier field.
pub const SESSION_ID_LEN: usize = 12;

/// Width of the call-sign field in an acknowledgment.
pub const CALL_SIGN_LEN: usize = 6;

/// Tag identifying an acknowledgment frame.
pub const ACK_TAG: [u8; 3] = *b"ACK";

const CRC_LEN: usize = 4;

// Byte offsets within a data frame.
const OFF_VERSION: usize = 0;
const OFF_SEQ: usize = 1;
const OFF_LAT: usize = 5;
const OFF_LON: usize = 9;
const OFF_ALT: usize = 13;
const OFF_HIGH: usize = 17;
const OFF_LOW: usize = 19;
const OFF_CAPTURE: usize = 21;
const OFF_SESSION: usize = 29;
const OFF_FRAME_CRC: usize = FRAME_LEN - CRC_LEN;

// Byte offsets within an acknowledgment frame.
const OFF_ACK_ORIGIN: usize = 0;
const OFF_ACK_TAG: usize = 6;
const OFF_ACK_SEQ: usize = 9;
const OFF_ACK_CRC: usize = ACK_LEN - CRC_LEN;

// ---------------------------------------------------------------------------
// Fixed-width identifiers
// ---------------------------------------------------------------------------

/// Copy `s` into a NUL-padded array, truncating if it is too long.
fn pad<const N: usize>(s: &str) -> [u8; N] {
    let mut out = [0u8; N];
    let bytes = s.as_bytes();
    let n = bytes.len().min(N);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

/// Render a NUL-padded field, dropping the padding.
fn unpad(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Identifier of one flight, stamped on every frame of that flight.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId([u8; SESSION_ID_LEN]);

impl SessionId {
    /// Build from a string; longer input is truncated, shorter NUL padded.
    pub fn new(id: &str) -> Self {
        Self(pad(id))
    }

    /// Wrap raw wire bytes.
    pub fn from_bytes(bytes: [u8; SESSION_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Random 12-digit decimal id for a fresh flight.
    pub fn generate() -> Self {
        let n: u64 = rand::thread_rng().gen_range(100_000_000_000..1_000_000_000_000);
        Self::new(&n.to_string())
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&unpad(&self.0))
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({self})")
    }
}

/// Radio call sign identifying the station that sent an acknowledgment.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSign([u8; CALL_SIGN_LEN]);

impl CallSign {
    pub fn new(sign: &str) -> Self {
        Self(pad(sign))
    }

    pub fn as_bytes(&self) -> &[u8; CALL_SIGN_LEN] {
        &self.0
    }
}

impl Default for CallSign {
    fn default() -> Self {
        Self::new("KK72PA")
    }
}

impl fmt::Display for CallSign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&unpad(&self.0))
    }
}

impl fmt::Debug for CallSign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallSign({self})")
    }
}

// ---------------------------------------------------------------------------
// Records and frames
// ---------------------------------------------------------------------------

/// One thermal-extrema observation, sequenced within its session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryRecord {
    pub sequence_id: u32,
    pub session_id: SessionId,
    pub latitude: f32,
    pub longitude: f32,
    /// Metres above the reference datum.
    pub altitude: u32,
    /// Hottest pixel of the frame, °C.
    pub high_temp: i16,
    /// Coldest pixel of the frame, °C.
    pub low_temp: i16,
    /// Nanoseconds since the Unix epoch at sensor readout.
    pub capture_time: i64,
}

/// Encoded data frame, ready for the link.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame([u8; FRAME_LEN]);

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Sequence id carried by this frame.
    pub fn sequence_id(&self) -> u32 {
        read_u32(&self.0, OFF_SEQ)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame(seq={}, crc={:#010x})",
            self.sequence_id(),
            read_u32(&self.0, OFF_FRAME_CRC)
        )
    }
}

/// Encoded acknowledgment frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckFrame([u8; ACK_LEN]);

impl AckFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Decoded contents of an acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub sequence_id: u32,
    pub origin: CallSign,
}

/// A decoded value together with the outcome of its CRC check.
///
/// The value is always populated so the caller decides what to do with a
/// corrupted frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Checked<T> {
    pub value: T,
    pub crc_ok: bool,
}

/// Errors that can arise when parsing raw bytes.
///
/// A CRC mismatch is not an error here; it is reported through
/// [`Checked::crc_ok`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Byte count differs from the fixed frame length.
    #[error("incomplete frame: expected {expected} bytes, got {actual}")]
    IncompleteFrame { expected: usize, actual: usize },
    /// CRC verified but the layout version is not ours.
    #[error("unsupported layout version {0}")]
    UnsupportedVersion(u8),
    /// CRC verified but the tag is not `ACK`.
    #[error("unexpected message tag {0:?}")]
    UnexpectedTag([u8; 3]),
}

// ---------------------------------------------------------------------------
// Encode / decode
// ---------------------------------------------------------------------------

/// Encode `record` into a data frame. Total; never fails.
pub fn encode(record: &TelemetryRecord) -> Frame {
    let mut buf = [0u8; FRAME_LEN];

    buf[OFF_VERSION] = WIRE_VERSION;
    buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&record.sequence_id.to_le_bytes());
    buf[OFF_LAT..OFF_LAT + 4].copy_from_slice(&record.latitude.to_le_bytes());
    buf[OFF_LON..OFF_LON + 4].copy_from_slice(&record.longitude.to_le_bytes());
    buf[OFF_ALT..OFF_ALT + 4].copy_from_slice(&record.altitude.to_le_bytes());
    buf[OFF_HIGH..OFF_HIGH + 2].copy_from_slice(&record.high_temp.to_le_bytes());
    buf[OFF_LOW..OFF_LOW + 2].copy_from_slice(&record.low_temp.to_le_bytes());
    buf[OFF_CAPTURE..OFF_CAPTURE + 8].copy_from_slice(&record.capture_time.to_le_bytes());
    buf[OFF_SESSION..OFF_SESSION + SESSION_ID_LEN].copy_from_slice(record.session_id.as_bytes());

    let crc = crc32fast::hash(&buf[..OFF_FRAME_CRC]);
    buf[OFF_FRAME_CRC..].copy_from_slice(&crc.to_le_bytes());

    Frame(buf)
}

/// Decode a data frame.
///
/// Returns [`Err`] if:
/// - `bytes` is not exactly [`FRAME_LEN`] long, or
/// - the CRC verifies but the version byte is not [`WIRE_VERSION`].
///
/// Otherwise the record is returned alongside the CRC outcome, even when
/// the check failed.
pub fn decode(bytes: &[u8]) -> Result<Checked<TelemetryRecord>, CodecError> {
    if bytes.len() != FRAME_LEN {
        return Err(CodecError::IncompleteFrame {
            expected: FRAME_LEN,
            actual: bytes.len(),
        });
    }

    let crc_ok = crc32fast::hash(&bytes[..OFF_FRAME_CRC]) == read_u32(bytes, OFF_FRAME_CRC);
    if crc_ok && bytes[OFF_VERSION] != WIRE_VERSION {
        return Err(CodecError::UnsupportedVersion(bytes[OFF_VERSION]));
    }

    let mut session = [0u8; SESSION_ID_LEN];
    session.copy_from_slice(&bytes[OFF_SESSION..OFF_SESSION + SESSION_ID_LEN]);

    let record = TelemetryRecord {
        sequence_id: read_u32(bytes, OFF_SEQ),
        session_id: SessionId::from_bytes(session),
        latitude: f32::from_le_bytes(array_at(bytes, OFF_LAT)),
        longitude: f32::from_le_bytes(array_at(bytes, OFF_LON)),
        altitude: read_u32(bytes, OFF_ALT),
        high_temp: i16::from_le_bytes(array_at(bytes, OFF_HIGH)),
        low_temp: i16::from_le_bytes(array_at(bytes, OFF_LOW)),
        capture_time: i64::from_le_bytes(array_at(bytes, OFF_CAPTURE)),
    };

    Ok(Checked { value: record, crc_ok })
}

/// Build the acknowledgment for `sequence_id`, signed with `origin`.
pub fn encode_ack(sequence_id: u32, origin: &CallSign) -> AckFrame {
    let mut buf = [0u8; ACK_LEN];

    buf[OFF_ACK_ORIGIN..OFF_ACK_TAG].copy_from_slice(origin.as_bytes());
    buf[OFF_ACK_TAG..OFF_ACK_SEQ].copy_from_slice(&ACK_TAG);
    buf[OFF_ACK_SEQ..OFF_ACK_CRC].copy_from_slice(&sequence_id.to_le_bytes());

    let crc = crc32fast::hash(&buf[..OFF_ACK_CRC]);
    buf[OFF_ACK_CRC..].copy_from_slice(&crc.to_le_bytes());

    AckFrame(buf)
}

/// Decode an acknowledgment frame.
///
/// Mirrors [`decode`]: wrong length is an error, a CRC mismatch is reported
/// through [`Checked::crc_ok`], and a verified frame with a foreign tag is
/// rejected.
pub fn decode_ack(bytes: &[u8]) -> Result<Checked<Ack>, CodecError> {
    if bytes.len() != ACK_LEN {
        return Err(CodecError::IncompleteFrame {
            expected: ACK_LEN,
            actual: bytes.len(),
        });
    }

    let crc_ok = crc32fast::hash(&bytes[..OFF_ACK_CRC]) == read_u32(bytes, OFF_ACK_CRC);
    let tag: [u8; 3] = array_at(bytes, OFF_ACK_TAG);
    if crc_ok && tag != ACK_TAG {
        return Err(CodecError::UnexpectedTag(tag));
    }

    let ack = Ack {
        sequence_id: read_u32(bytes, OFF_ACK_SEQ),
        origin: CallSign(array_at(bytes, OFF_ACK_ORIGIN)),
    };
    Ok(Checked { value: ack, crc_ok })
}

/// Sequence id of a raw data frame without verifying it.
///
/// Returns `None` when `bytes` is not frame-sized.
pub fn peek_sequence_id(bytes: &[u8]) -> Option<u32> {
    (bytes.len() == FRAME_LEN).then(|| read_u32(bytes, OFF_SEQ))
}

fn array_at<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(array_at(bytes, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(seq: u32) -> TelemetryRecord {
        TelemetryRecord {
            sequence_id: seq,
            session_id: SessionId::new("738479814012"),
            latitude: 39.5296,
            longitude: -119.8138,
            altitude: 1500,
            high_temp: 500,
            low_temp: -30,
            capture_time: 1_740_990_645_900_000_000,
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let record = sample(42);
        let decoded = decode(encode(&record).as_bytes()).unwrap();
        assert!(decoded.crc_ok);
        assert_eq!(decoded.value, record);
    }

    #[test]
    fn roundtrip_at_field_extremes() {
        let record = TelemetryRecord {
            sequence_id: u32::MAX,
            session_id: SessionId::new(""),
            latitude: -90.0,
            longitude: 180.0,
            altitude: u32::MAX,
            high_temp: i16::MAX,
            low_temp: i16::MIN,
            capture_time: i64::MIN,
        };
        let decoded = decode(encode(&record).as_bytes()).unwrap();
        assert!(decoded.crc_ok);
        assert_eq!(decoded.value, record);
    }

    #[test]
    fn encoded_length_is_fixed() {
        assert_eq!(encode(&sample(1)).as_bytes().len(), FRAME_LEN);
        assert_eq!(encode_ack(1, &CallSign::default()).as_bytes().len(), ACK_LEN);
    }

    #[test]
    fn layout_is_little_endian() {
        let bytes = encode(&sample(0x0102_0304)).as_bytes().to_vec();
        assert_eq!(bytes[OFF_VERSION], WIRE_VERSION);
        assert_eq!(&bytes[OFF_SEQ..OFF_SEQ + 4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[OFF_SESSION..OFF_SESSION + 12], b"738479814012");
    }

    #[test]
    fn every_single_bit_flip_is_detected() {
        let frame = encode(&sample(7));
        for byte in 0..FRAME_LEN {
            for bit in 0..8 {
                let mut bytes = frame.as_bytes().to_vec();
                bytes[byte] ^= 1 << bit;
                match decode(&bytes) {
                    Ok(checked) => assert!(!checked.crc_ok, "flip at {byte}:{bit} went unnoticed"),
                    Err(e) => panic!("flip at {byte}:{bit} produced {e}"),
                }
            }
        }
    }

    #[test]
    fn corrupted_frame_still_yields_record() {
        let mut bytes = encode(&sample(9)).as_bytes().to_vec();
        bytes[OFF_ALT] ^= 0xff;
        let checked = decode(&bytes).unwrap();
        assert!(!checked.crc_ok);
        assert_eq!(checked.value.sequence_id, 9);
    }

    #[test]
    fn short_buffer_is_incomplete() {
        let bytes = encode(&sample(1));
        assert_eq!(
            decode(&bytes.as_bytes()[..FRAME_LEN - 1]),
            Err(CodecError::IncompleteFrame { expected: FRAME_LEN, actual: FRAME_LEN - 1 })
        );
        assert!(matches!(decode(&[]), Err(CodecError::IncompleteFrame { actual: 0, .. })));
    }

    #[test]
    fn foreign_version_with_valid_crc_is_rejected() {
        let mut bytes = encode(&sample(3)).as_bytes().to_vec();
        bytes[OFF_VERSION] = 4;
        let crc = crc32fast::hash(&bytes[..OFF_FRAME_CRC]);
        bytes[OFF_FRAME_CRC..].copy_from_slice(&crc.to_le_bytes());
        assert_eq!(decode(&bytes), Err(CodecError::UnsupportedVersion(4)));
    }

    #[test]
    fn ack_roundtrip() {
        let sign = CallSign::new("KK72PA");
        let checked = decode_ack(encode_ack(77, &sign).as_bytes()).unwrap();
        assert!(checked.crc_ok);
        assert_eq!(checked.value, Ack { sequence_id: 77, origin: sign });
    }

    #[test]
    fn ack_layout_matches_ground_station() {
        let bytes = encode_ack(5, &CallSign::new("KK72PA")).as_bytes().to_vec();
        assert_eq!(&bytes[..6], b"KK72PA");
        assert_eq!(&bytes[6..9], b"ACK");
        assert_eq!(&bytes[9..13], &5u32.to_le_bytes());
        assert_eq!(crc32fast::hash(&bytes[..13]).to_le_bytes(), bytes[13..]);
    }

    #[test]
    fn corrupt_ack_reports_crc_failure() {
        let mut bytes = encode_ack(5, &CallSign::default()).as_bytes().to_vec();
        bytes[OFF_ACK_SEQ] ^= 0x01;
        assert!(!decode_ack(&bytes).unwrap().crc_ok);
    }

    #[test]
    fn data_frame_is_not_an_ack() {
        let frame = encode(&sample(1));
        assert!(matches!(
            decode_ack(frame.as_bytes()),
            Err(CodecError::IncompleteFrame { expected: ACK_LEN, .. })
        ));
    }

    #[test]
    fn req_tag_is_rejected() {
        let mut bytes = encode_ack(1, &CallSign::default()).as_bytes().to_vec();
        bytes[OFF_ACK_TAG..OFF_ACK_SEQ].copy_from_slice(b"REQ");
        let crc = crc32fast::hash(&bytes[..OFF_ACK_CRC]);
        bytes[OFF_ACK_CRC..].copy_from_slice(&crc.to_le_bytes());
        assert_eq!(decode_ack(&bytes), Err(CodecError::UnexpectedTag(*b"REQ")));
    }

    #[test]
    fn identifiers_truncate_and_pad() {
        let long = SessionId::new("0123456789abcdef");
        assert_eq!(long.to_string(), "0123456789ab");
        let short = SessionId::new("S1");
        assert_eq!(short.to_string(), "S1");
        assert_eq!(&short.as_bytes()[2..], &[0u8; 10]);
        assert_eq!(CallSign::new("W1AWXYZ").to_string(), "W1AWXY");
    }

    #[test]
    fn generated_session_is_twelve_digits() {
        let id = SessionId::generate().to_string();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn peek_reads_sequence_without_validation() {
        let frame = encode(&sample(1234));
        assert_eq!(peek_sequence_id(frame.as_bytes()), Some(1234));
        assert_eq!(frame.sequence_id(), 1234);
        assert_eq!(peek_sequence_id(&[0u8; 3]), None);
    }
}
