//! Binary record encoding.
//!
//! Records are written in the Avro binary format: fields in declaration order,
//! `int`/`long` as zig-zag varints, `string` as a length-prefixed UTF-8
//! sequence, `double` as 8 little-endian bytes and `boolean` as one byte.
//! A nullable field is the union `["null", T]`: branch index `0` for null,
//! `1` followed by the value otherwise.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::events::SchemaError;

type Result<T> = std::result::Result<T, SchemaError>;

/// Primitive type of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Int,
    Long,
    Double,
    Boolean,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Int => "int",
            FieldKind::Long => "long",
            FieldKind::Double => "double",
            FieldKind::Boolean => "boolean",
        }
    }
}

/// One field of a [`RecordSchema`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub kind: FieldKind,
    pub nullable: bool,
    /// Value written when the field is absent from the record.
    pub default: Option<Value>,
}

impl FieldSchema {
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            default: None,
        }
    }

    /// A `["null", kind]` field defaulting to null.
    pub fn nullable(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: true,
            default: Some(Value::Null),
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// A fixed, ordered list of typed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
}

impl RecordSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSchema>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Encodes `record`, failing on unknown fields, missing required fields
    /// and values of the wrong type.
    pub fn encode(&self, record: &Map<String, Value>) -> Result<Vec<u8>> {
        if let Some(unknown) = record.keys().find(|k| self.field(k).is_none()) {
            return Err(SchemaError::UnknownField(unknown.clone()));
        }

        let mut out = Vec::new();
        for field in &self.fields {
            let value = match record.get(&field.name) {
                Some(value) => value,
                None => field
                    .default
                    .as_ref()
                    .ok_or_else(|| SchemaError::MissingField(field.name.clone()))?,
            };
            encode_field(field, value, &mut out)?;
        }
        Ok(out)
    }

    /// Decodes a record written by [`RecordSchema::encode`].
    pub fn decode(&self, bytes: &[u8]) -> Result<Map<String, Value>> {
        let mut reader = Reader { bytes, pos: 0 };
        let mut record = Map::new();

        for field in &self.fields {
            let value = if field.nullable {
                match reader.read_long(&field.name)? {
                    0 => Value::Null,
                    1 => reader.read_value(field)?,
                    index => {
                        return Err(SchemaError::InvalidUnionIndex {
                            field: field.name.clone(),
                            index,
                        })
                    }
                }
            } else {
                reader.read_value(field)?
            };
            record.insert(field.name.clone(), value);
        }

        let remaining = bytes.len() - reader.pos;
        if remaining > 0 {
            return Err(SchemaError::TrailingBytes(remaining));
        }
        Ok(record)
    }
}

fn encode_field(field: &FieldSchema, value: &Value, out: &mut Vec<u8>) -> Result<()> {
    if field.nullable {
        if value.is_null() {
            write_long(0, out);
            return Ok(());
        }
        write_long(1, out);
    }

    let mismatch = || SchemaError::TypeMismatch {
        field: field.name.clone(),
        expected: field.kind.as_str(),
    };

    match field.kind {
        FieldKind::String => {
            let s = value.as_str().ok_or_else(mismatch)?;
            write_long(s.len() as i64, out);
            out.extend_from_slice(s.as_bytes());
        }
        FieldKind::Int => {
            let n = value
                .as_i64()
                .filter(|n| i32::try_from(*n).is_ok())
                .ok_or_else(mismatch)?;
            write_long(n, out);
        }
        FieldKind::Long => write_long(value.as_i64().ok_or_else(mismatch)?, out),
        FieldKind::Double => {
            let n = value.as_f64().ok_or_else(mismatch)?;
            out.extend_from_slice(&n.to_le_bytes());
        }
        FieldKind::Boolean => out.push(u8::from(value.as_bool().ok_or_else(mismatch)?)),
    }
    Ok(())
}

fn write_long(n: i64, out: &mut Vec<u8>) {
    let mut z = ((n << 1) ^ (n >> 63)) as u64;
    while z >= 0x80 {
        out.push((z as u8 & 0x7f) | 0x80);
        z >>= 7;
    }
    out.push(z as u8);
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take(&mut self, n: usize, field: &str) -> Result<&[u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| SchemaError::Truncated(field.to_string()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_long(&mut self, field: &str) -> Result<i64> {
        let mut z: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.take(1, field)?[0];
            if shift >= 64 {
                return Err(SchemaError::VarintOverflow);
            }
            z |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        Ok((z >> 1) as i64 ^ -((z & 1) as i64))
    }

    fn read_value(&mut self, field: &FieldSchema) -> Result<Value> {
        let name = field.name.as_str();
        let value = match field.kind {
            FieldKind::String => {
                let len = usize::try_from(self.read_long(name)?)
                    .map_err(|_| SchemaError::Truncated(name.to_string()))?;
                let raw = self.take(len, name)?;
                let s = std::str::from_utf8(raw)
                    .map_err(|_| SchemaError::InvalidUtf8(name.to_string()))?;
                Value::String(s.to_string())
            }
            FieldKind::Int | FieldKind::Long => Value::from(self.read_long(name)?),
            FieldKind::Double => {
                let raw = self.take(8, name)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(raw);
                Number::from_f64(f64::from_le_bytes(buf))
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
            FieldKind::Boolean => Value::Bool(self.take(1, name)?[0] != 0),
        };
        Ok(value)
    }
}
