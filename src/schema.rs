//! Fixed-width record schemas.
//!
//! A page never looks inside a tuple; it only needs the schema's byte size.
//! The schema packs records into exactly that many bytes and reads them back.

use crate::errors::SchemaError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    Long,
    /// UTF-8 text, NUL-padded to a fixed byte width. The text itself may not
    /// contain NUL.
    Char(usize),
}

impl FieldType {
    pub fn size(&self) -> usize {
        match self {
            FieldType::Int => size_of::<i32>(),
            FieldType::Long => size_of::<i64>(),
            FieldType::Char(width) => *width,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Int => write!(f, "int"),
            FieldType::Long => write!(f, "long"),
            FieldType::Char(width) => write!(f, "char({})", width),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Char(String),
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Char(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    name: String,
    fields: Vec<Field>,
    size: usize,
}

impl Schema {
    pub fn new<N: Into<String>>(
        name: N,
        fields: Vec<(&str, FieldType)>,
    ) -> Result<Self, SchemaError> {
        let name = name.into();
        if fields.is_empty() {
            return Err(SchemaError::EmptySchema(name));
        }
        let fields: Vec<Field> = fields
            .into_iter()
            .map(|(field_name, field_type)| Field {
                name: field_name.to_string(),
                field_type,
            })
            .collect();
        let size = fields.iter().map(|f| f.field_type.size()).sum();
        Ok(Self { name, fields, size })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Byte size of one packed record.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Builds a record after checking arity and field types.
    pub fn instantiate<I, V>(&self, values: I) -> Result<Record, SchemaError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        if values.len() != self.fields.len() {
            return Err(SchemaError::ArityMismatch {
                expected: self.fields.len(),
                actual: values.len(),
            });
        }
        for (field, value) in self.fields.iter().zip(&values) {
            let fits = match (field.field_type, value) {
                (FieldType::Int, Value::Int(_)) => true,
                (FieldType::Long, Value::Long(_)) => true,
                (FieldType::Char(width), Value::Char(text)) => {
                    text.len() <= width && !text.contains('\0')
                }
                _ => false,
            };
            if !fits {
                return Err(SchemaError::TypeMismatch {
                    field: field.name.clone(),
                    expected: field.field_type.to_string(),
                });
            }
        }
        Ok(Record {
            schema: self.name.clone(),
            field_names: self.fields.iter().map(|f| f.name.clone()).collect(),
            values,
        })
    }

    pub fn pack(&self, record: &Record) -> Result<Vec<u8>, SchemaError> {
        let record = self.instantiate(record.values.iter().cloned())?;
        let mut packed = Vec::with_capacity(self.size);
        for (field, value) in self.fields.iter().zip(&record.values) {
            match value {
                Value::Int(v) => packed.extend_from_slice(&v.to_le_bytes()),
                Value::Long(v) => packed.extend_from_slice(&v.to_le_bytes()),
                Value::Char(text) => {
                    packed.extend_from_slice(text.as_bytes());
                    packed.resize(packed.len() + field.field_type.size() - text.len(), 0);
                }
            }
        }
        Ok(packed)
    }

    pub fn unpack(&self, bytes: &[u8]) -> Result<Record, SchemaError> {
        if bytes.len() != self.size {
            return Err(SchemaError::WrongLength {
                expected: self.size,
                actual: bytes.len(),
            });
        }
        let mut offset = 0;
        let mut values = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let width = field.field_type.size();
            let chunk = &bytes[offset..offset + width];
            let value = match field.field_type {
                FieldType::Int => {
                    let mut arr = [0u8; 4];
                    arr.copy_from_slice(chunk);
                    Value::Int(i32::from_le_bytes(arr))
                }
                FieldType::Long => {
                    let mut arr = [0u8; 8];
                    arr.copy_from_slice(chunk);
                    Value::Long(i64::from_le_bytes(arr))
                }
                FieldType::Char(_) => {
                    let end = chunk.iter().position(|&b| b == 0).unwrap_or(width);
                    let text = std::str::from_utf8(&chunk[..end]).map_err(|_| {
                        SchemaError::InvalidText {
                            field: field.name.clone(),
                        }
                    })?;
                    Value::Char(text.to_string())
                }
            };
            values.push(value);
            offset += width;
        }
        self.instantiate(values)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    schema: String,
    field_names: Vec<String>,
    values: Vec<Value>,
}

impl Record {
    pub fn schema_name(&self) -> &str {
        &self.schema
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, field: &str) -> Result<&Value, SchemaError> {
        self.field_names
            .iter()
            .position(|name| name == field)
            .map(|i| &self.values[i])
            .ok_or_else(|| SchemaError::UnknownField(field.to_string()))
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.schema)?;
        for (i, (name, value)) in self.field_names.iter().zip(&self.values).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match value {
                Value::Int(v) => write!(f, "{}={}", name, v)?,
                Value::Long(v) => write!(f, "{}={}", name, v)?,
                Value::Char(v) => write!(f, "{}={:?}", name, v)?,
            }
        }
        write!(f, ")")
    }
}

#[cfg(test)]
fn employee() -> Schema {
    Schema::new("employee", vec![("id", FieldType::Int), ("age", FieldType::Int)])
        .expect("valid schema")
}

#[test]
fn packs_ints_little_endian() -> Result<(), SchemaError> {
    let schema = employee();
    assert_eq!(schema.size(), 8);
    let record = schema.instantiate([1, 25])?;
    let packed = schema.pack(&record)?;
    assert_eq!(packed, vec![1, 0, 0, 0, 25, 0, 0, 0]);
    let back = schema.unpack(&packed)?;
    assert_eq!(back, record);
    assert_eq!(back.get("age")?, &Value::Int(25));
    assert_eq!(back.to_string(), "employee(id=1, age=25)");
    Ok(())
}

#[test]
fn zeroed_bytes_decode_to_zero_fields() -> Result<(), SchemaError> {
    let schema = employee();
    let record = schema.unpack(&[0u8; 8])?;
    assert_eq!(record, schema.instantiate([0, 0])?);
    Ok(())
}

#[test]
fn char_fields_are_padded_to_width() -> Result<(), SchemaError> {
    let schema = Schema::new(
        "person",
        vec![("name", FieldType::Char(6)), ("balance", FieldType::Long)],
    )?;
    assert_eq!(schema.size(), 14);
    let record = schema.instantiate([Value::from("ann"), Value::from(-7i64)])?;
    let packed = schema.pack(&record)?;
    assert_eq!(&packed[..6], b"ann\0\0\0");
    assert_eq!(schema.unpack(&packed)?, record);
    assert_eq!(schema.field_index("balance"), Some(1));
    Ok(())
}

#[test]
fn schema_rejects_bad_records() {
    let schema = employee();
    assert_eq!(
        schema.instantiate([1]).unwrap_err(),
        SchemaError::ArityMismatch {
            expected: 2,
            actual: 1
        }
    );
    assert!(matches!(
        schema.instantiate([Value::Int(1), Value::from("x")]),
        Err(SchemaError::TypeMismatch { .. })
    ));
    assert_eq!(
        schema.unpack(&[0u8; 3]).unwrap_err(),
        SchemaError::WrongLength {
            expected: 8,
            actual: 3
        }
    );
    assert!(matches!(
        Schema::new("empty", vec![]),
        Err(SchemaError::EmptySchema(_))
    ));
    let record = schema.instantiate([1, 2]).expect("valid record");
    assert_eq!(
        record.get("salary").unwrap_err(),
        SchemaError::UnknownField("salary".to_string())
    );
}

#[test]
fn char_fields_reject_nul_and_invalid_utf8() {
    let schema = Schema::new("code", vec![("c", FieldType::Char(2))]).expect("valid schema");
    assert_eq!(
        schema.instantiate([Value::from("a\0")]).unwrap_err(),
        SchemaError::TypeMismatch {
            field: "c".to_string(),
            expected: "char(2)".to_string()
        }
    );
    assert_eq!(
        schema.unpack(&[0xff, 0xff]).unwrap_err(),
        SchemaError::InvalidText {
            field: "c".to_string()
        }
    );
    // a multi-byte character cut off by the padding is not valid text either
    assert!(matches!(
        schema.unpack(&[0xc3, 0x00]),
        Err(SchemaError::InvalidText { .. })
    ));
    let record = schema.instantiate([Value::from("é")]).expect("two-byte text fits");
    let packed = schema.pack(&record).expect("packs");
    assert_eq!(packed, vec![0xc3, 0xa9]);
    assert_eq!(schema.unpack(&packed), Ok(record));
}
