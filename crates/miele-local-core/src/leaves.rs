//! Structured leaf decoding: known (unit, attribute) coordinates map to
//! field schemas that turn raw attribute records into named values.
//!
//! The registry is a value; extension is by registration at startup.
//! DOP2 field numbering is one-based.

use crate::dop2::{Dop2Record, Dop2Value};
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;

/// The setting-value leaf, addressed with the setting id in `idx1`.
pub const SETTING_UNIT: u16 = 2;
/// Attribute of the setting-value leaf under [`SETTING_UNIT`].
pub const SETTING_ATTRIBUTE: u16 = 105;

/// Primitive type of one schema field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
    Bytes,
    String,
    Bool,
}

/// One named field at a fixed (one-based) position.
#[derive(Clone, Debug)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldDef {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Self { name: name.to_string(), kind }
    }
}

/// Field schema for one leaf coordinate.
#[derive(Clone, Debug)]
pub struct LeafSchema {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

/// A decoded primitive value.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Unsigned(u64),
    Signed(i64),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
}

/// One decoded field; `value` is absent when the record stream ended
/// before the field's position.
#[derive(Clone, Debug, Serialize)]
pub struct DecodedField {
    pub name: String,
    pub value: Option<FieldValue>,
}

/// A fully decoded leaf: ordered named fields plus any records past the
/// schema, surfaced so data is never silently dropped.
#[derive(Clone, Debug, Serialize)]
pub struct DecodedLeaf {
    pub schema: String,
    pub fields: Vec<DecodedField>,
    pub extra_fields: Vec<Dop2Record>,
}

/// Registry of known leaf schemas, keyed by (unit, attribute).
#[derive(Clone, Debug, Default)]
pub struct LeafRegistry {
    schemas: HashMap<(u16, u16), LeafSchema>,
}

impl LeafRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with the built-in schemas: currently the
    /// setting-value leaf at (2, 105).
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            SETTING_UNIT,
            SETTING_ATTRIBUTE,
            LeafSchema {
                name: "SettingValue".to_string(),
                fields: vec![
                    FieldDef::new("setting_id", FieldKind::U16),
                    FieldDef::new("current_value", FieldKind::U32),
                    FieldDef::new("minimum", FieldKind::U32),
                    FieldDef::new("maximum", FieldKind::U32),
                    FieldDef::new("default_value", FieldKind::U32),
                ],
            },
        );
        registry
    }

    pub fn register(&mut self, unit: u16, attribute: u16, schema: LeafSchema) {
        self.schemas.insert((unit, attribute), schema);
    }

    pub fn get(&self, unit: u16, attribute: u16) -> Option<&LeafSchema> {
        self.schemas.get(&(unit, attribute))
    }

    /// Decode a parsed record sequence against the registered schema.
    /// Unknown coordinates are a usage error (strict decode).
    pub fn decode(
        &self,
        unit: u16,
        attribute: u16,
        records: &[Dop2Record],
    ) -> Result<DecodedLeaf> {
        let schema = self.get(unit, attribute).ok_or_else(|| {
            Error::Usage(format!("no leaf schema registered for {unit}/{attribute}"))
        })?;
        decode_leaf(schema, records)
    }
}

/// Apply a schema to a record sequence.
pub fn decode_leaf(schema: &LeafSchema, records: &[Dop2Record]) -> Result<DecodedLeaf> {
    let mut fields = Vec::with_capacity(schema.fields.len());
    for (pos, def) in schema.fields.iter().enumerate() {
        // one-based field index pos + 1 maps to records[pos]
        let value = match records.get(pos) {
            Some(record) => Some(decode_field(def, record)?),
            None => None,
        };
        fields.push(DecodedField { name: def.name.clone(), value });
    }
    let extra_fields = records
        .get(schema.fields.len()..)
        .unwrap_or_default()
        .to_vec();
    Ok(DecodedLeaf {
        schema: schema.name.clone(),
        fields,
        extra_fields,
    })
}

fn decode_field(def: &FieldDef, record: &Dop2Record) -> Result<FieldValue> {
    let payload = match &record.value {
        Dop2Value::Nested(_) => {
            return Err(Error::Protocol(format!(
                "field {} expects a primitive, got a nested record",
                def.name
            )))
        }
        _ => record.payload().unwrap_or_default(),
    };
    let check_width = |width: usize| -> Result<()> {
        if payload.len() == width {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "field {} expects {width} bytes, got {}",
                def.name,
                payload.len()
            )))
        }
    };
    Ok(match def.kind {
        FieldKind::U8 => {
            check_width(1)?;
            FieldValue::Unsigned(payload[0] as u64)
        }
        FieldKind::I8 => {
            check_width(1)?;
            FieldValue::Signed(payload[0] as i8 as i64)
        }
        FieldKind::U16 => {
            check_width(2)?;
            FieldValue::Unsigned(u16::from_be_bytes([payload[0], payload[1]]) as u64)
        }
        FieldKind::I16 => {
            check_width(2)?;
            FieldValue::Signed(i16::from_be_bytes([payload[0], payload[1]]) as i64)
        }
        FieldKind::U32 => {
            check_width(4)?;
            FieldValue::Unsigned(
                u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as u64,
            )
        }
        FieldKind::I32 => {
            check_width(4)?;
            FieldValue::Signed(
                i32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as i64,
            )
        }
        FieldKind::Bool => {
            check_width(1)?;
            FieldValue::Bool(payload[0] != 0)
        }
        FieldKind::Bytes => FieldValue::Bytes(payload.clone()),
        FieldKind::String => {
            let trimmed = crate::cipher::strip_trailing_zeros(&payload);
            let text = std::str::from_utf8(trimmed).map_err(|_| {
                Error::Protocol(format!("field {} is not valid UTF-8", def.name))
            })?;
            FieldValue::String(text.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> LeafSchema {
        LeafSchema {
            name: "Test".to_string(),
            fields: vec![
                FieldDef::new("id", FieldKind::U16),
                FieldDef::new("level", FieldKind::U8),
                FieldDef::new("label", FieldKind::String),
            ],
        }
    }

    #[test]
    fn test_decode_complete_leaf() {
        let records = vec![
            Dop2Record::words(vec![7]),
            Dop2Record::bytes(vec![3]),
            Dop2Record::bytes(b"Eco\0\0".to_vec()),
        ];
        let leaf = decode_leaf(&schema(), &records).unwrap();
        assert_eq!(leaf.fields[0].value, Some(FieldValue::Unsigned(7)));
        assert_eq!(leaf.fields[1].value, Some(FieldValue::Unsigned(3)));
        assert_eq!(
            leaf.fields[2].value,
            Some(FieldValue::String("Eco".to_string()))
        );
        assert!(leaf.extra_fields.is_empty());
    }

    #[test]
    fn test_missing_trailing_fields_tolerated() {
        let records = vec![Dop2Record::words(vec![7])];
        let leaf = decode_leaf(&schema(), &records).unwrap();
        assert_eq!(leaf.fields[0].value, Some(FieldValue::Unsigned(7)));
        assert!(leaf.fields[1].value.is_none());
        assert!(leaf.fields[2].value.is_none());
    }

    #[test]
    fn test_extra_records_surfaced() {
        let records = vec![
            Dop2Record::words(vec![7]),
            Dop2Record::bytes(vec![3]),
            Dop2Record::bytes(b"Eco".to_vec()),
            Dop2Record::words(vec![1, 2]),
        ];
        let leaf = decode_leaf(&schema(), &records).unwrap();
        assert_eq!(leaf.extra_fields, vec![Dop2Record::words(vec![1, 2])]);
    }

    #[test]
    fn test_width_mismatch_rejected() {
        let records = vec![Dop2Record::bytes(vec![1, 2, 3])];
        assert!(decode_leaf(&schema(), &records).is_err());
    }

    #[test]
    fn test_signed_decoding() {
        let schema = LeafSchema {
            name: "Signed".to_string(),
            fields: vec![FieldDef::new("temp", FieldKind::I16)],
        };
        let records = vec![Dop2Record::bytes(vec![0xFF, 0xF6])];
        let leaf = decode_leaf(&schema, &records).unwrap();
        assert_eq!(leaf.fields[0].value, Some(FieldValue::Signed(-10)));
    }

    #[test]
    fn test_registry_strict_decode() {
        let registry = LeafRegistry::builtin();
        assert!(registry.get(SETTING_UNIT, SETTING_ATTRIBUTE).is_some());
        assert!(matches!(
            registry.decode(9999, 9999, &[]),
            Err(Error::Usage(_))
        ));
    }

    #[test]
    fn test_builtin_setting_leaf() {
        let registry = LeafRegistry::builtin();
        let records = vec![
            Dop2Record::words(vec![12]),
            Dop2Record::bytes(vec![0, 0, 0, 2]),
            Dop2Record::bytes(vec![0, 0, 0, 0]),
            Dop2Record::bytes(vec![0, 0, 0, 4]),
            Dop2Record::bytes(vec![0, 0, 0, 1]),
        ];
        let leaf = registry
            .decode(SETTING_UNIT, SETTING_ATTRIBUTE, &records)
            .unwrap();
        assert_eq!(leaf.schema, "SettingValue");
        assert_eq!(leaf.fields[0].name, "setting_id");
        assert_eq!(leaf.fields[0].value, Some(FieldValue::Unsigned(12)));
        assert_eq!(leaf.fields[1].value, Some(FieldValue::Unsigned(2)));
    }
}
