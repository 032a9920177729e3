//! Record codec
//!
//! Big-endian field access for the two fixed record layouts exposed by the
//! controller's data block. Decode is a pure function over one record
//! slice; encode produces exactly the sub-range that changed (the control
//! byte alone, or the value bytes) and never rewrites the address/type
//! fields, which are controller-owned.

use serde::Serialize;

use crate::error::{BridgeError, Result};
use crate::registry::{RecordKind, RecordLayout, ValueKind};

/// Field offsets inside a record, relative to the record start.
pub const ADDRESS_OFFSET: usize = 0;
pub const TYPE_OFFSET: usize = 4;
pub const FLAG_OFFSET: usize = 6;
pub const INT_OFFSET: usize = 8;
pub const FLOAT_OFFSET: usize = 10;
pub const TRIPLET_OFFSET: usize = 7;

/// Control flags packed into the record's flag byte.
///
/// Bit 4 of the same byte carries the boolean point value and is handled
/// separately by the codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ControlFlags {
    /// Point is read-only from the controller's perspective: never
    /// forwarded to the bus.
    pub read_only: bool,
    /// Point is write-only: no bus subscription is maintained for it.
    pub write_only: bool,
    /// Controller requests a resend of the current value even if unchanged.
    pub request_resend: bool,
    /// Resend request has been acknowledged by this bridge.
    pub acknowledged: bool,
}

impl ControlFlags {
    pub fn from_byte(byte: u8) -> Self {
        Self {
            read_only: byte & 0x01 != 0,
            write_only: byte & 0x02 != 0,
            request_resend: byte & 0x04 != 0,
            acknowledged: byte & 0x08 != 0,
        }
    }

    /// Pack the flags back into a control byte, together with the boolean
    /// point value carried in bit 4.
    pub fn to_byte(self, bool_value: bool) -> u8 {
        let mut byte = 0u8;
        if self.read_only {
            byte |= 1 << 0;
        }
        if self.write_only {
            byte |= 1 << 1;
        }
        if self.request_resend {
            byte |= 1 << 2;
        }
        if self.acknowledged {
            byte |= 1 << 3;
        }
        if bool_value {
            byte |= 1 << 4;
        }
        byte
    }
}

/// Decoded point value; exactly one variant is active, selected by the
/// record's type code.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GroupValue {
    Bool(bool),
    Int(i16),
    Float(f32),
    Rgb { red: u8, green: u8, blue: u8 },
}

impl GroupValue {
    /// The boolean payload for the control byte's bit 4, false for
    /// non-boolean variants.
    pub fn as_bool(&self) -> bool {
        matches!(self, GroupValue::Bool(true))
    }
}

impl std::fmt::Display for GroupValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupValue::Bool(v) => write!(f, "{}", v),
            GroupValue::Int(v) => write!(f, "{}", v),
            GroupValue::Float(v) => write!(f, "{}", v),
            GroupValue::Rgb { red, green, blue } => {
                write!(f, "({},{},{})", red, green, blue)
            },
        }
    }
}

/// One record decoded from the polled buffer.
#[derive(Debug, Clone)]
pub struct DecodedRecord {
    pub raw_address: u32,
    pub type_code: i16,
    pub flags: ControlFlags,
    /// `Err` when the type code is registered for scanning but carries no
    /// value rule; the scan continues, the point is skipped.
    pub value: Result<GroupValue>,
}

/// Read the type tag of the record starting at `offset` inside `buffer`.
pub fn peek_type_code(buffer: &[u8], offset: usize) -> Result<i16> {
    let end = offset + TYPE_OFFSET + 2;
    if end > buffer.len() {
        return Err(BridgeError::malformed(format!(
            "type tag at offset {} exceeds buffer length {}",
            offset + TYPE_OFFSET,
            buffer.len()
        )));
    }
    Ok(i16::from_be_bytes([
        buffer[offset + TYPE_OFFSET],
        buffer[offset + TYPE_OFFSET + 1],
    ]))
}

/// Decode one full record slice according to its layout.
///
/// The slice must be exactly `layout.record_length` bytes; the engine
/// guarantees this when scanning.
pub fn decode_record(record: &[u8], layout: &RecordLayout) -> Result<DecodedRecord> {
    if record.len() < layout.record_length {
        return Err(BridgeError::malformed(format!(
            "record slice is {} bytes, layout requires {}",
            record.len(),
            layout.record_length
        )));
    }

    let raw_address = u32::from_be_bytes([record[0], record[1], record[2], record[3]]);
    let type_code = i16::from_be_bytes([record[4], record[5]]);
    let flag_byte = record[FLAG_OFFSET];
    let flags = ControlFlags::from_byte(flag_byte);

    let value = match layout.kind {
        RecordKind::Generic => match crate::registry::value_kind(type_code) {
            Ok(ValueKind::Bool) => Ok(GroupValue::Bool(flag_byte & 0x10 != 0)),
            Ok(ValueKind::Percent) => {
                let raw = i16::from_be_bytes([record[INT_OFFSET], record[INT_OFFSET + 1]]);
                Ok(GroupValue::Int(raw.clamp(0, 100)))
            },
            Ok(ValueKind::Float) => Ok(GroupValue::Float(f32::from_be_bytes([
                record[FLOAT_OFFSET],
                record[FLOAT_OFFSET + 1],
                record[FLOAT_OFFSET + 2],
                record[FLOAT_OFFSET + 3],
            ]))),
            Ok(ValueKind::Triplet) => Err(BridgeError::decode(format!(
                "type {} does not use the generic layout",
                type_code
            ))),
            Err(e) => Err(e),
        },
        RecordKind::Triplet => Ok(GroupValue::Rgb {
            red: record[TRIPLET_OFFSET],
            green: record[TRIPLET_OFFSET + 1],
            blue: record[TRIPLET_OFFSET + 2],
        }),
    };

    Ok(DecodedRecord {
        raw_address,
        type_code,
        flags,
        value,
    })
}

/// Encode the value sub-range for a controller write-back.
///
/// Returns the offset of the sub-range relative to the record start plus
/// the bytes to write. Boolean values live in the control byte, so they
/// are encoded together with the current flags.
pub fn encode_value(flags: ControlFlags, value: &GroupValue) -> (usize, Vec<u8>) {
    match value {
        GroupValue::Bool(_) => (FLAG_OFFSET, vec![flags.to_byte(value.as_bool())]),
        GroupValue::Int(v) => (INT_OFFSET, v.to_be_bytes().to_vec()),
        GroupValue::Float(v) => (FLOAT_OFFSET, v.to_be_bytes().to_vec()),
        GroupValue::Rgb { red, green, blue } => (TRIPLET_OFFSET, vec![*red, *green, *blue]),
    }
}

/// Decode a raw bus payload into the value shape declared by `kind`.
pub fn decode_bus_payload(kind: ValueKind, payload: &[u8]) -> Result<GroupValue> {
    match (kind, payload) {
        (ValueKind::Bool, [b]) => Ok(GroupValue::Bool(*b != 0)),
        (ValueKind::Percent, [hi, lo]) => {
            Ok(GroupValue::Int(i16::from_be_bytes([*hi, *lo]).clamp(0, 100)))
        },
        (ValueKind::Float, [a, b, c, d]) => {
            Ok(GroupValue::Float(f32::from_be_bytes([*a, *b, *c, *d])))
        },
        (ValueKind::Triplet, [r, g, b]) => Ok(GroupValue::Rgb {
            red: *r,
            green: *g,
            blue: *b,
        }),
        (kind, payload) => Err(BridgeError::decode(format!(
            "payload of {} bytes does not match {:?}",
            payload.len(),
            kind
        ))),
    }
}
