//! Mesh Time wire codec.
//!
//! Pure bit-level packing of the twelve Time model messages. Nothing here
//! touches node state or the transport; the only job is to move values
//! between their logical ranges and the biased on-wire fields.
//!
//! # Wire format
//!
//! Multi-byte fields are little-endian and sub-byte fields are packed LSB
//! first. The Time Set / Time Status layout is:
//!
//! ```text
//!  offset  0..5   6    7      8    9       10
//!         +------+----+------+----------+------+
//!         | TAI  |sub |uncert| A|delta  | zone |
//!         | 40b  | 8b | 8b   |1b| 15b   | 8b   |
//!         +------+----+------+----------+------+
//! ```
//!
//! A Time Status whose TAI seconds are `0` (unknown) is sent in its 5-byte
//! short form carrying only the TAI field.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::Role;

/// Largest value representable in a 40-bit TAI field.
pub const TAI_SECONDS_MAX: u64 = (1 << 40) - 1;
/// TAI value meaning "unknown" (for clocks) or "no pending change" (for transitions).
pub const TAI_UNKNOWN: u64 = 0;

pub const ZONE_OFFSET_MIN: i16 = -64;
pub const ZONE_OFFSET_MAX: i16 = 191;
const ZONE_OFFSET_BIAS: i16 = 64;

pub const TAI_UTC_DELTA_MIN: i32 = -255;
pub const TAI_UTC_DELTA_MAX: i32 = 32512;
const TAI_UTC_DELTA_BIAS: i32 = 255;
const TAI_UTC_DELTA_MASK: u16 = 0x7FFF;

pub const TIME_SET_LEN: usize = 10;
pub const TIME_STATUS_MIN_LEN: usize = 5;
pub const TIME_STATUS_MAX_LEN: usize = 10;
pub const ZONE_SET_LEN: usize = 6;
pub const ZONE_STATUS_LEN: usize = 7;
pub const TAI_UTC_DELTA_SET_LEN: usize = 7;
pub const TAI_UTC_DELTA_STATUS_LEN: usize = 9;
pub const ROLE_SET_LEN: usize = 1;
pub const ROLE_STATUS_LEN: usize = 1;

/// Upper bound on any Time model payload.
pub const MAX_PAYLOAD_LEN: usize = TIME_STATUS_MAX_LEN;

/// Fixed-capacity message payload; never allocates.
pub type Payload = heapless::Vec<u8, MAX_PAYLOAD_LEN>;

/// Time model opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum Opcode {
    TimeGet = 0x8237,
    TimeSet = 0x5C,
    TimeStatus = 0x5D,
    RoleGet = 0x8238,
    RoleSet = 0x8239,
    RoleStatus = 0x823A,
    ZoneGet = 0x823B,
    ZoneSet = 0x823C,
    ZoneStatus = 0x823D,
    TaiUtcDeltaGet = 0x823E,
    TaiUtcDeltaSet = 0x823F,
    TaiUtcDeltaStatus = 0x8240,
}

impl Opcode {
    pub const ALL: [Opcode; 12] = [
        Opcode::TimeGet,
        Opcode::TimeSet,
        Opcode::TimeStatus,
        Opcode::RoleGet,
        Opcode::RoleSet,
        Opcode::RoleStatus,
        Opcode::ZoneGet,
        Opcode::ZoneSet,
        Opcode::ZoneStatus,
        Opcode::TaiUtcDeltaGet,
        Opcode::TaiUtcDeltaSet,
        Opcode::TaiUtcDeltaStatus,
    ];

    pub const fn value(self) -> u16 {
        self as u16
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|opcode| opcode.value() == value)
    }

    /// Whether this opcode asks for state to be changed.
    pub const fn is_set(self) -> bool {
        matches!(
            self,
            Opcode::TimeSet | Opcode::ZoneSet | Opcode::TaiUtcDeltaSet | Opcode::RoleSet
        )
    }

    fn accepts_len(self, len: usize) -> bool {
        match self {
            Opcode::TimeGet | Opcode::ZoneGet | Opcode::TaiUtcDeltaGet | Opcode::RoleGet => {
                len == 0
            }
            Opcode::TimeSet => len == TIME_SET_LEN,
            Opcode::TimeStatus => len == TIME_STATUS_MIN_LEN || len == TIME_STATUS_MAX_LEN,
            Opcode::ZoneSet => len == ZONE_SET_LEN,
            Opcode::ZoneStatus => len == ZONE_STATUS_LEN,
            Opcode::TaiUtcDeltaSet => len == TAI_UTC_DELTA_SET_LEN,
            Opcode::TaiUtcDeltaStatus => len == TAI_UTC_DELTA_STATUS_LEN,
            Opcode::RoleSet => len == ROLE_SET_LEN,
            Opcode::RoleStatus => len == ROLE_STATUS_LEN,
        }
    }
}

/// Errors raised while unpacking a payload.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("opcode {0:#06x} is not a Time model opcode")]
    UnknownOpcode(u16),
    #[error("{opcode:?} payload has invalid length {actual}")]
    InvalidLength { opcode: Opcode, actual: usize },
    #[error("time role value {0:#04x} is prohibited")]
    InvalidRole(u8),
}

/// Parameters shared by Time Set and Time Status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeParams {
    pub tai_seconds: u64,
    pub subsecond: u8,
    pub uncertainty: u8,
    pub time_authority: bool,
    pub tai_utc_delta: i32,
    pub time_zone_offset: i16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneSetParams {
    pub time_zone_offset_new: i16,
    pub time_zone_change: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneStatusParams {
    pub time_zone_offset_current: i16,
    pub time_zone_offset_new: i16,
    pub time_zone_change: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaiUtcDeltaSetParams {
    pub tai_utc_delta_new: i32,
    pub tai_utc_delta_change: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaiUtcDeltaStatusParams {
    pub tai_utc_delta_current: i32,
    pub tai_utc_delta_new: i32,
    pub tai_utc_delta_change: u64,
}

/// A decoded Time model message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    TimeGet,
    TimeSet(TimeParams),
    TimeStatus(TimeParams),
    ZoneGet,
    ZoneSet(ZoneSetParams),
    ZoneStatus(ZoneStatusParams),
    TaiUtcDeltaGet,
    TaiUtcDeltaSet(TaiUtcDeltaSetParams),
    TaiUtcDeltaStatus(TaiUtcDeltaStatusParams),
    RoleGet,
    RoleSet(Role),
    RoleStatus(Role),
}

impl Message {
    pub fn opcode(&self) -> Opcode {
        match self {
            Message::TimeGet => Opcode::TimeGet,
            Message::TimeSet(_) => Opcode::TimeSet,
            Message::TimeStatus(_) => Opcode::TimeStatus,
            Message::ZoneGet => Opcode::ZoneGet,
            Message::ZoneSet(_) => Opcode::ZoneSet,
            Message::ZoneStatus(_) => Opcode::ZoneStatus,
            Message::TaiUtcDeltaGet => Opcode::TaiUtcDeltaGet,
            Message::TaiUtcDeltaSet(_) => Opcode::TaiUtcDeltaSet,
            Message::TaiUtcDeltaStatus(_) => Opcode::TaiUtcDeltaStatus,
            Message::RoleGet => Opcode::RoleGet,
            Message::RoleSet(_) => Opcode::RoleSet,
            Message::RoleStatus(_) => Opcode::RoleStatus,
        }
    }

    /// Pack this message into its on-wire payload.
    ///
    /// Field values are expected to be inside their logical ranges; anything
    /// wider than its wire field is truncated to the field width.
    pub fn encode(&self) -> Payload {
        match self {
            Message::TimeGet
            | Message::ZoneGet
            | Message::TaiUtcDeltaGet
            | Message::RoleGet => Payload::new(),
            Message::TimeSet(params) => payload(&pack_time(params)),
            Message::TimeStatus(params) if params.tai_seconds == TAI_UNKNOWN => {
                payload(&pack_time(params)[..TIME_STATUS_MIN_LEN])
            }
            Message::TimeStatus(params) => payload(&pack_time(params)),
            Message::ZoneSet(params) => {
                let mut buf = [0u8; ZONE_SET_LEN];
                buf[0] = encode_zone_offset(params.time_zone_offset_new);
                put_u40(&mut buf[1..], params.time_zone_change);
                payload(&buf)
            }
            Message::ZoneStatus(params) => {
                let mut buf = [0u8; ZONE_STATUS_LEN];
                buf[0] = encode_zone_offset(params.time_zone_offset_current);
                buf[1] = encode_zone_offset(params.time_zone_offset_new);
                put_u40(&mut buf[2..], params.time_zone_change);
                payload(&buf)
            }
            Message::TaiUtcDeltaSet(params) => {
                let mut buf = [0u8; TAI_UTC_DELTA_SET_LEN];
                put_delta_word(&mut buf[..2], params.tai_utc_delta_new);
                put_u40(&mut buf[2..], params.tai_utc_delta_change);
                payload(&buf)
            }
            Message::TaiUtcDeltaStatus(params) => {
                let mut buf = [0u8; TAI_UTC_DELTA_STATUS_LEN];
                put_delta_word(&mut buf[..2], params.tai_utc_delta_current);
                put_delta_word(&mut buf[2..4], params.tai_utc_delta_new);
                put_u40(&mut buf[4..], params.tai_utc_delta_change);
                payload(&buf)
            }
            Message::RoleSet(role) | Message::RoleStatus(role) => payload(&[role.value()]),
        }
    }

    /// Unpack a payload received under `opcode`.
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self, CodecError> {
        if !opcode.accepts_len(bytes.len()) {
            return Err(CodecError::InvalidLength {
                opcode,
                actual: bytes.len(),
            });
        }

        let message = match opcode {
            Opcode::TimeGet => Message::TimeGet,
            Opcode::ZoneGet => Message::ZoneGet,
            Opcode::TaiUtcDeltaGet => Message::TaiUtcDeltaGet,
            Opcode::RoleGet => Message::RoleGet,
            Opcode::TimeSet => Message::TimeSet(unpack_time(bytes)),
            Opcode::TimeStatus => Message::TimeStatus(unpack_time(bytes)),
            Opcode::ZoneSet => Message::ZoneSet(ZoneSetParams {
                time_zone_offset_new: decode_zone_offset(bytes[0]),
                time_zone_change: get_u40(&bytes[1..]),
            }),
            Opcode::ZoneStatus => Message::ZoneStatus(ZoneStatusParams {
                time_zone_offset_current: decode_zone_offset(bytes[0]),
                time_zone_offset_new: decode_zone_offset(bytes[1]),
                time_zone_change: get_u40(&bytes[2..]),
            }),
            Opcode::TaiUtcDeltaSet => Message::TaiUtcDeltaSet(TaiUtcDeltaSetParams {
                tai_utc_delta_new: get_delta_word(&bytes[..2]),
                tai_utc_delta_change: get_u40(&bytes[2..]),
            }),
            Opcode::TaiUtcDeltaStatus => Message::TaiUtcDeltaStatus(TaiUtcDeltaStatusParams {
                tai_utc_delta_current: get_delta_word(&bytes[..2]),
                tai_utc_delta_new: get_delta_word(&bytes[2..4]),
                tai_utc_delta_change: get_u40(&bytes[4..]),
            }),
            Opcode::RoleSet => Message::RoleSet(decode_role(bytes[0])?),
            Opcode::RoleStatus => Message::RoleStatus(decode_role(bytes[0])?),
        };
        Ok(message)
    }

    /// Decode from a raw opcode value as handed over by the access layer.
    pub fn decode_raw(opcode: u16, bytes: &[u8]) -> Result<Self, CodecError> {
        let opcode = Opcode::from_u16(opcode).ok_or(CodecError::UnknownOpcode(opcode))?;
        Self::decode(opcode, bytes)
    }
}

/// Bias a zone offset (15-minute steps, -64..=191) into its wire byte.
pub fn encode_zone_offset(offset: i16) -> u8 {
    (offset + ZONE_OFFSET_BIAS) as u8
}

pub fn decode_zone_offset(raw: u8) -> i16 {
    i16::from(raw) - ZONE_OFFSET_BIAS
}

/// Bias a TAI-UTC delta (-255..=32512) into its 15-bit wire value.
pub fn encode_tai_utc_delta(delta: i32) -> u16 {
    (delta + TAI_UTC_DELTA_BIAS) as u16
}

pub fn decode_tai_utc_delta(raw: u16) -> i32 {
    i32::from(raw) - TAI_UTC_DELTA_BIAS
}

pub fn tai_seconds_in_range(tai_seconds: u64) -> bool {
    tai_seconds <= TAI_SECONDS_MAX
}

pub fn zone_offset_in_range(offset: i16) -> bool {
    (ZONE_OFFSET_MIN..=ZONE_OFFSET_MAX).contains(&offset)
}

pub fn tai_utc_delta_in_range(delta: i32) -> bool {
    (TAI_UTC_DELTA_MIN..=TAI_UTC_DELTA_MAX).contains(&delta)
}

fn decode_role(raw: u8) -> Result<Role, CodecError> {
    Role::from_u8(raw).ok_or(CodecError::InvalidRole(raw))
}

fn pack_time(params: &TimeParams) -> [u8; TIME_SET_LEN] {
    let mut buf = [0u8; TIME_SET_LEN];
    put_u40(&mut buf[..5], params.tai_seconds);
    buf[5] = params.subsecond;
    buf[6] = params.uncertainty;
    let word = (encode_tai_utc_delta(params.tai_utc_delta) & TAI_UTC_DELTA_MASK) << 1
        | u16::from(params.time_authority);
    buf[7..9].copy_from_slice(&word.to_le_bytes());
    buf[9] = encode_zone_offset(params.time_zone_offset);
    buf
}

fn unpack_time(bytes: &[u8]) -> TimeParams {
    let tai_seconds = get_u40(bytes);
    if bytes.len() == TIME_STATUS_MIN_LEN {
        return TimeParams {
            tai_seconds,
            ..TimeParams::default()
        };
    }

    let word = u16::from_le_bytes([bytes[7], bytes[8]]);
    TimeParams {
        tai_seconds,
        subsecond: bytes[5],
        uncertainty: bytes[6],
        time_authority: word & 1 == 1,
        tai_utc_delta: decode_tai_utc_delta(word >> 1),
        time_zone_offset: decode_zone_offset(bytes[9]),
    }
}

fn put_u40(buf: &mut [u8], value: u64) {
    buf[..5].copy_from_slice(&(value & TAI_SECONDS_MAX).to_le_bytes()[..5]);
}

fn get_u40(bytes: &[u8]) -> u64 {
    let mut wide = [0u8; 8];
    wide[..5].copy_from_slice(&bytes[..5]);
    u64::from_le_bytes(wide)
}

// Bit 15 is padding: written as zero, ignored on read.
fn put_delta_word(buf: &mut [u8], delta: i32) {
    let word = encode_tai_utc_delta(delta) & TAI_UTC_DELTA_MASK;
    buf[..2].copy_from_slice(&word.to_le_bytes());
}

fn get_delta_word(bytes: &[u8]) -> i32 {
    let word = u16::from_le_bytes([bytes[0], bytes[1]]);
    decode_tai_utc_delta(word & TAI_UTC_DELTA_MASK)
}

fn payload(bytes: &[u8]) -> Payload {
    bytes.iter().copied().take(MAX_PAYLOAD_LEN).collect()
}
