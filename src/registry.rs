//! Record type registry
//!
//! Maps the numeric type code carried in every record to its layout
//! metadata (byte length, decoding strategy). The registry is closed:
//! it is built once at startup and never mutated at runtime. An
//! unregistered type code encountered while scanning a buffer is always
//! fatal to that scan, because guessing a length would desynchronize
//! every subsequent record.

use std::collections::HashMap;

use crate::error::{BridgeError, Result};

/// Decoding strategy for a record layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// 14-byte layout: address + type + control byte + i16 + f32
    Generic,
    /// 10-byte layout: address + type + control byte + 3 raw bytes
    Triplet,
}

/// Layout metadata for one record type code
#[derive(Debug, Clone, Copy)]
pub struct RecordLayout {
    /// Total record length in bytes, used to advance the buffer scan
    pub record_length: usize,
    pub kind: RecordKind,
}

/// Active value shape for a type code.
///
/// This is deliberately narrower than the set of registered layouts:
/// a code can be registered (so the scan knows how far to advance) while
/// still lacking a value rule, in which case value decode fails with
/// [`BridgeError::UnknownType`] instead of silently falling through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Boolean packed in bit 4 of the control byte (type 1)
    Bool,
    /// Percentage-like i16, clamped to 0..=100 at decode (type 5)
    Percent,
    /// IEEE-754 f32 (types 9 and 14)
    Float,
    /// Three raw component bytes, e.g. RGB (type 232)
    Triplet,
}

/// Closed mapping from type code to record layout
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    entries: HashMap<i16, RecordLayout>,
}

impl TypeRegistry {
    /// Build the registry with the type codes the controller's data block
    /// declares. Type 13 carries a generic layout but no value rule.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        for code in [1, 5, 9, 13, 14] {
            entries.insert(
                code,
                RecordLayout {
                    record_length: 14,
                    kind: RecordKind::Generic,
                },
            );
        }
        entries.insert(
            232,
            RecordLayout {
                record_length: 10,
                kind: RecordKind::Triplet,
            },
        );
        Self { entries }
    }

    /// Look up the layout for a type code.
    pub fn lookup(&self, type_code: i16) -> Result<&RecordLayout> {
        self.entries
            .get(&type_code)
            .ok_or(BridgeError::UnknownType(type_code))
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a type code to its value shape.
///
/// Registered codes without an explicit rule (currently 13) are rejected
/// here rather than silently treated as floats.
pub fn value_kind(type_code: i16) -> Result<ValueKind> {
    match type_code {
        1 => Ok(ValueKind::Bool),
        5 => Ok(ValueKind::Percent),
        9 | 14 => Ok(ValueKind::Float),
        232 => Ok(ValueKind::Triplet),
        other => Err(BridgeError::UnknownType(other)),
    }
}

/// Protocol data-type tag for a type code, e.g. `"DPT1.001"`.
pub fn dpt_tag(type_code: i16) -> String {
    format!("DPT{}.001", type_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_codes() {
        let registry = TypeRegistry::new();

        let layout = registry.lookup(1).unwrap();
        assert_eq!(layout.record_length, 14);
        assert_eq!(layout.kind, RecordKind::Generic);

        let layout = registry.lookup(232).unwrap();
        assert_eq!(layout.record_length, 10);
        assert_eq!(layout.kind, RecordKind::Triplet);
    }

    #[test]
    fn test_lookup_unknown_code() {
        let registry = TypeRegistry::new();
        match registry.lookup(99) {
            Err(BridgeError::UnknownType(99)) => {},
            other => panic!("expected UnknownType(99), got {:?}", other),
        }
    }

    #[test]
    fn test_registered_code_without_value_rule() {
        let registry = TypeRegistry::new();
        // 13 is scannable (has a length) but has no value rule
        assert!(registry.lookup(13).is_ok());
        assert!(matches!(value_kind(13), Err(BridgeError::UnknownType(13))));
    }

    #[test]
    fn test_value_kinds() {
        assert_eq!(value_kind(1).unwrap(), ValueKind::Bool);
        assert_eq!(value_kind(5).unwrap(), ValueKind::Percent);
        assert_eq!(value_kind(9).unwrap(), ValueKind::Float);
        assert_eq!(value_kind(14).unwrap(), ValueKind::Float);
        assert_eq!(value_kind(232).unwrap(), ValueKind::Triplet);
    }

    #[test]
    fn test_dpt_tag() {
        assert_eq!(dpt_tag(1), "DPT1.001");
        assert_eq!(dpt_tag(232), "DPT232.001");
    }
}
