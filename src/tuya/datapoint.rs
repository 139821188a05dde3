//! Datapoint model, report decoding and the per-session datapoint store.
//!
//! A datapoint report payload packs one or more records back to back:
//!
//! ```text
//! ┌────┬──────┬────────────┬──────────────┐
//! │ ID │ TYPE │ LENGTH(BE) │ VALUE        │
//! │ 1B │ 1B   │ 2B         │ LENGTH bytes │
//! └────┴──────┴────────────┴──────────────┘
//! ```
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::frame::{FrameError, MAX_PAYLOAD_SIZE};
use crate::logutil::hex_pretty;

/// Size of a record header: id + type + 2-byte length
pub const RECORD_HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DatapointType {
    Raw = 0x00,
    Boolean = 0x01,
    Integer = 0x02,
    String = 0x03,
    Enum = 0x04,
    Bitmask = 0x05,
}

impl TryFrom<u8> for DatapointType {
    type Error = u8;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        Ok(match raw {
            0x00 => Self::Raw,
            0x01 => Self::Boolean,
            0x02 => Self::Integer,
            0x03 => Self::String,
            0x04 => Self::Enum,
            0x05 => Self::Bitmask,
            other => return Err(other),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DatapointValue {
    Raw(Vec<u8>),
    Boolean(bool),
    /// Unsigned by default; sign-extended when `signed_integers` is configured
    Integer(i64),
    String(String),
    Enum(u8),
    Bitmask(u32),
}

impl DatapointValue {
    pub fn kind(&self) -> DatapointType {
        match self {
            Self::Raw(_) => DatapointType::Raw,
            Self::Boolean(_) => DatapointType::Boolean,
            Self::Integer(_) => DatapointType::Integer,
            Self::String(_) => DatapointType::String,
            Self::Enum(_) => DatapointType::Enum,
            Self::Bitmask(_) => DatapointType::Bitmask,
        }
    }

    /// Wire bytes of this value. Integers and bitmasks use `width` bytes
    /// (clamped to 1..=4, default 4).
    pub fn to_wire(&self, width: Option<usize>) -> Vec<u8> {
        match self {
            Self::Raw(bytes) => bytes.clone(),
            Self::Boolean(on) => vec![u8::from(*on)],
            Self::Integer(v) => truncate_be(*v as u32, width),
            Self::String(s) => s.as_bytes().to_vec(),
            Self::Enum(v) => vec![*v],
            Self::Bitmask(v) => truncate_be(*v, width),
        }
    }
}

impl fmt::Display for DatapointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw(bytes) => write!(f, "raw (value: {})", hex_pretty(bytes)),
            Self::Boolean(on) => write!(f, "switch (value: {})", if *on { "ON" } else { "OFF" }),
            Self::Integer(v) => write!(f, "int value (value: {})", v),
            Self::String(s) => write!(f, "string value (value: {})", s),
            Self::Enum(v) => write!(f, "enum (value: {})", v),
            Self::Bitmask(v) => write!(f, "bitmask (value: {:x})", v),
        }
    }
}

fn truncate_be(value: u32, width: Option<usize>) -> Vec<u8> {
    let width = width.unwrap_or(4).clamp(1, 4);
    value.to_be_bytes()[4 - width..].to_vec()
}

/// Current value of one peripheral datapoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datapoint {
    pub id: u8,
    pub value: DatapointValue,
    /// Width of the value on the wire as last reported
    pub len: usize,
}

impl Datapoint {
    pub fn kind(&self) -> DatapointType {
        self.value.kind()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatapointError {
    #[error("datapoint report truncated: {remaining} trailing bytes cannot hold a record header")]
    TruncatedHeader { remaining: usize },
    #[error("datapoint {id} declares {declared} value bytes but only {remaining} remain")]
    Truncated {
        id: u8,
        declared: usize,
        remaining: usize,
    },
    #[error("datapoint {id} has unknown type 0x{raw:02X}")]
    UnknownType { id: u8, raw: u8 },
    #[error("datapoint {id} has bad {kind:?} length {len}")]
    InvalidLength {
        id: u8,
        kind: DatapointType,
        len: usize,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Interpret integer datapoints as two's complement of their wire width
    pub signed_integers: bool,
}

/// Outcome of decoding one report payload.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReportDecode {
    /// Successfully decoded records, in record order
    pub datapoints: Vec<Datapoint>,
    /// Well-framed records that could not be interpreted
    pub skipped: Vec<DatapointError>,
    /// Set when a record overran the payload; nothing after it was decoded
    pub truncated: Option<DatapointError>,
}

/// Decode a (possibly multi-record) datapoint report payload.
pub fn decode_report(payload: &[u8], options: DecodeOptions) -> ReportDecode {
    let mut out = ReportDecode::default();
    let mut rest = payload;
    while !rest.is_empty() {
        let [id, raw_type, len_hi, len_lo, tail @ ..] = rest else {
            out.truncated = Some(DatapointError::TruncatedHeader {
                remaining: rest.len(),
            });
            break;
        };
        let id = *id;
        let len = usize::from(u16::from_be_bytes([*len_hi, *len_lo]));
        if len > tail.len() {
            out.truncated = Some(DatapointError::Truncated {
                id,
                declared: len,
                remaining: tail.len(),
            });
            break;
        }
        let (data, next) = tail.split_at(len);
        rest = next;
        match decode_value(id, *raw_type, data, options) {
            Ok(value) => out.datapoints.push(Datapoint { id, value, len }),
            Err(e) => out.skipped.push(e),
        }
    }
    out
}

fn decode_value(
    id: u8,
    raw_type: u8,
    data: &[u8],
    options: DecodeOptions,
) -> Result<DatapointValue, DatapointError> {
    let kind = DatapointType::try_from(raw_type).map_err(|raw| DatapointError::UnknownType { id, raw })?;
    let invalid = || DatapointError::InvalidLength {
        id,
        kind,
        len: data.len(),
    };
    match kind {
        DatapointType::Raw => Ok(DatapointValue::Raw(data.to_vec())),
        DatapointType::Boolean => match data {
            [b] => Ok(DatapointValue::Boolean(*b != 0)),
            _ => Err(invalid()),
        },
        DatapointType::Integer => {
            let raw = be_u32(data).ok_or_else(invalid)?;
            let value = if options.signed_integers {
                sign_extend(raw, data.len())
            } else {
                i64::from(raw)
            };
            Ok(DatapointValue::Integer(value))
        }
        DatapointType::String => Ok(DatapointValue::String(String::from_utf8_lossy(data).into_owned())),
        DatapointType::Enum => match data {
            [b] => Ok(DatapointValue::Enum(*b)),
            _ => Err(invalid()),
        },
        DatapointType::Bitmask => be_u32(data).map(DatapointValue::Bitmask).ok_or_else(invalid),
    }
}

fn be_u32(data: &[u8]) -> Option<u32> {
    if data.is_empty() || data.len() > 4 {
        return None;
    }
    Some(data.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}

fn sign_extend(raw: u32, width: usize) -> i64 {
    let shift = 32 - 8 * width as u32;
    i64::from(((raw << shift) as i32) >> shift)
}

/// Serialize one record for a datapoint write.
pub fn encode_record(id: u8, value: &DatapointValue, width: Option<usize>) -> Result<Vec<u8>, FrameError> {
    let data = value.to_wire(width);
    let len = u16::try_from(data.len()).map_err(|_| FrameError::PayloadTooLarge(data.len()))?;
    if data.len() + RECORD_HEADER_LEN > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge(data.len() + RECORD_HEADER_LEN));
    }
    let mut out = Vec::with_capacity(RECORD_HEADER_LEN + data.len());
    out.push(id);
    out.push(value.kind() as u8);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&data);
    Ok(out)
}

/// Latest value per datapoint id, kept in first-seen order.
#[derive(Debug, Default, Clone)]
pub struct DatapointStore {
    points: Vec<Datapoint>,
}

impl DatapointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u8) -> Option<&Datapoint> {
        self.points.iter().find(|p| p.id == id)
    }

    /// Overwrite (or create) the entry for `dp.id`.
    pub fn apply(&mut self, dp: Datapoint) -> &Datapoint {
        let idx = match self.points.iter().position(|p| p.id == dp.id) {
            Some(pos) => {
                self.points[pos] = dp;
                pos
            }
            None => {
                self.points.push(dp);
                self.points.len() - 1
            }
        };
        &self.points[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Datapoint> {
        self.points.iter()
    }

    pub fn snapshot(&self) -> Vec<Datapoint> {
        self.points.clone()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
