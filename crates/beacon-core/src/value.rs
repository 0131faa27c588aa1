//! Decoded snapshot values
//!
//! Snapshots travel as MessagePack. Decoding goes straight into
//! [`SnapshotValue`] so the normalizer can work by exhaustive matching
//! instead of sniffing shapes at runtime.

use crate::error::Result;
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{self, Serialize, SerializeMap, SerializeSeq, Serializer};
use std::fmt;

/// A value decoded from a MessagePack snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotValue {
    Nil,
    Boolean(bool),
    /// Any integer; wide enough for both the i64 and u64 wire ranges
    Integer(i128),
    Float(f64),
    Text(String),
    Binary(Vec<u8>),
    Sequence(Vec<SnapshotValue>),
    /// Map with at least one non-string key, in wire order
    Mapping(Vec<(SnapshotValue, SnapshotValue)>),
    /// Map whose keys are all strings, in wire order
    Record(Vec<(String, SnapshotValue)>),
}

impl SnapshotValue {
    /// Decode a MessagePack document
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Encode back to MessagePack
    pub fn to_msgpack(&self) -> std::result::Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Name of the variant, for log messages
    pub fn kind(&self) -> &'static str {
        match self {
            SnapshotValue::Nil => "nil",
            SnapshotValue::Boolean(_) => "boolean",
            SnapshotValue::Integer(_) => "integer",
            SnapshotValue::Float(_) => "float",
            SnapshotValue::Text(_) => "text",
            SnapshotValue::Binary(_) => "binary",
            SnapshotValue::Sequence(_) => "sequence",
            SnapshotValue::Mapping(_) => "mapping",
            SnapshotValue::Record(_) => "record",
        }
    }
}

impl<'de> Deserialize<'de> for SnapshotValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SnapshotValueVisitor;

        impl<'de> Visitor<'de> for SnapshotValueVisitor {
            type Value = SnapshotValue;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("any MessagePack value")
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<SnapshotValue, E> {
                Ok(SnapshotValue::Nil)
            }

            fn visit_none<E: de::Error>(self) -> std::result::Result<SnapshotValue, E> {
                Ok(SnapshotValue::Nil)
            }

            fn visit_some<D>(self, deserializer: D) -> std::result::Result<SnapshotValue, D::Error>
            where
                D: Deserializer<'de>,
            {
                SnapshotValue::deserialize(deserializer)
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<SnapshotValue, E> {
                Ok(SnapshotValue::Boolean(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<SnapshotValue, E> {
                Ok(SnapshotValue::Integer(v as i128))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<SnapshotValue, E> {
                Ok(SnapshotValue::Integer(v as i128))
            }

            fn visit_i128<E: de::Error>(self, v: i128) -> std::result::Result<SnapshotValue, E> {
                Ok(SnapshotValue::Integer(v))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<SnapshotValue, E> {
                Ok(SnapshotValue::Float(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<SnapshotValue, E> {
                Ok(SnapshotValue::Text(v.to_owned()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<SnapshotValue, E> {
                Ok(SnapshotValue::Text(v))
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<SnapshotValue, E> {
                Ok(SnapshotValue::Binary(v.to_vec()))
            }

            fn visit_byte_buf<E: de::Error>(
                self,
                v: Vec<u8>,
            ) -> std::result::Result<SnapshotValue, E> {
                Ok(SnapshotValue::Binary(v))
            }

            // MessagePack ext values arrive as a newtype around (type, data)
            fn visit_newtype_struct<D>(
                self,
                deserializer: D,
            ) -> std::result::Result<SnapshotValue, D::Error>
            where
                D: Deserializer<'de>,
            {
                SnapshotValue::deserialize(deserializer)
            }

            fn visit_seq<A>(self, mut seq: A) -> std::result::Result<SnapshotValue, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(4096));
                while let Some(item) = seq.next_element::<SnapshotValue>()? {
                    items.push(item);
                }
                Ok(SnapshotValue::Sequence(items))
            }

            fn visit_map<M>(self, mut map: M) -> std::result::Result<SnapshotValue, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut entries: Vec<(SnapshotValue, SnapshotValue)> =
                    Vec::with_capacity(map.size_hint().unwrap_or(0).min(4096));
                while let Some(entry) = map.next_entry::<SnapshotValue, SnapshotValue>()? {
                    entries.push(entry);
                }

                if entries
                    .iter()
                    .all(|(key, _)| matches!(key, SnapshotValue::Text(_)))
                {
                    let fields = entries
                        .into_iter()
                        .filter_map(|(key, value)| match key {
                            SnapshotValue::Text(name) => Some((name, value)),
                            _ => None,
                        })
                        .collect();
                    Ok(SnapshotValue::Record(fields))
                } else {
                    Ok(SnapshotValue::Mapping(entries))
                }
            }
        }

        deserializer.deserialize_any(SnapshotValueVisitor)
    }
}

impl Serialize for SnapshotValue {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            SnapshotValue::Nil => serializer.serialize_unit(),
            SnapshotValue::Boolean(v) => serializer.serialize_bool(*v),
            SnapshotValue::Integer(v) => {
                if let Ok(small) = i64::try_from(*v) {
                    serializer.serialize_i64(small)
                } else if let Ok(wide) = u64::try_from(*v) {
                    serializer.serialize_u64(wide)
                } else {
                    Err(ser::Error::custom(format!("integer {} out of 64-bit range", v)))
                }
            }
            SnapshotValue::Float(v) => serializer.serialize_f64(*v),
            SnapshotValue::Text(v) => serializer.serialize_str(v),
            SnapshotValue::Binary(v) => serializer.serialize_bytes(v),
            SnapshotValue::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            SnapshotValue::Mapping(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            SnapshotValue::Record(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (key, value) in fields {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}
