// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Binary serialization of JSON message values.
//!
//! - `Cdr`: ROS 2 payloads. 4-byte encapsulation header (CDR_LE), natural
//!   alignment up to 8 bytes measured from the end of the header,
//!   NUL-terminated strings. A structure without fields carries one
//!   placeholder `uint8`, as rosidl generates for empty messages.
//! - `Ros1`: packed little endian, strings without terminator.

use crate::codec::msgdef::{ArrayKind, FieldDef, FieldType, MessageDef, MessageSchema, Primitive};
use crate::codec::{CodecError, Encoding};
use serde_json::{Map, Value};

/// CDR little-endian encapsulation header.
const CDR_LE_HEADER: [u8; 4] = [0x00, 0x01, 0x00, 0x00];

/// Encode `message` against the root definition of `schema`.
pub(crate) fn encode(
    schema: &MessageSchema,
    encoding: Encoding,
    message: &Value,
) -> Result<Vec<u8>, CodecError> {
    let mut encoder = Encoder::new(schema, encoding);
    encoder.write_message(&schema.root, message, "")?;
    Ok(encoder.buf)
}

/// Decode `data` against the root definition of `schema`.
pub(crate) fn decode(
    schema: &MessageSchema,
    encoding: Encoding,
    data: &[u8],
) -> Result<Value, CodecError> {
    let mut decoder = Decoder::new(schema, encoding, data)?;
    decoder.read_message(&schema.root, "")
}

fn join(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", path, field)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn mismatch(path: &str, expected: &str, value: &Value) -> CodecError {
    CodecError::Encode(format!(
        "{}: expected {}, found {}",
        path,
        expected,
        kind_of(value)
    ))
}

fn lookup<'s>(schema: &'s MessageSchema, name: &str) -> Result<&'s MessageDef, CodecError> {
    schema
        .lookup(name)
        .ok_or_else(|| CodecError::BadSchema(format!("undefined type '{}'", name)))
}

struct Encoder<'a> {
    schema: &'a MessageSchema,
    encoding: Encoding,
    buf: Vec<u8>,
    origin: usize,
}

impl<'a> Encoder<'a> {
    fn new(schema: &'a MessageSchema, encoding: Encoding) -> Self {
        let buf = match encoding {
            Encoding::Cdr => CDR_LE_HEADER.to_vec(),
            Encoding::Ros1 => Vec::new(),
        };
        let origin = buf.len();
        Self {
            schema,
            encoding,
            buf,
            origin,
        }
    }

    fn align(&mut self, alignment: usize) {
        if self.encoding == Encoding::Ros1 {
            return;
        }
        let offset = self.buf.len() - self.origin;
        let padding = (alignment - (offset % alignment)) % alignment;
        self.buf.extend(std::iter::repeat(0).take(padding));
    }

    fn write_u32(&mut self, v: u32) {
        self.align(4);
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_message(
        &mut self,
        def: &MessageDef,
        value: &Value,
        path: &str,
    ) -> Result<(), CodecError> {
        let fields: Option<&Map<String, Value>> = match value {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => return Err(mismatch(path, "object", other)),
        };

        if def.fields.is_empty() && self.encoding == Encoding::Cdr {
            self.buf.push(0);
            return Ok(());
        }
        for field in &def.fields {
            let v = fields
                .and_then(|m| m.get(&field.name))
                .unwrap_or(&Value::Null);
            self.write_field(field, v, &join(path, &field.name))?;
        }
        Ok(())
    }

    fn write_field(&mut self, field: &FieldDef, value: &Value, path: &str) -> Result<(), CodecError> {
        let items: &[Value] = match (field.array, value) {
            (ArrayKind::Single, _) => return self.write_single(&field.ty, value, path),
            (_, Value::Array(items)) => items,
            (_, Value::Null) => &[],
            (_, other) => return Err(mismatch(path, "array", other)),
        };

        match field.array {
            ArrayKind::Fixed(len) => {
                if value.is_null() {
                    for _ in 0..len {
                        self.write_single(&field.ty, &Value::Null, path)?;
                    }
                    return Ok(());
                }
                if items.len() != len {
                    return Err(CodecError::Encode(format!(
                        "{}: fixed array needs {} elements, got {}",
                        path,
                        len,
                        items.len()
                    )));
                }
            }
            ArrayKind::Bounded(max) if items.len() > max => {
                return Err(CodecError::Encode(format!(
                    "{}: {} elements exceed bound of {}",
                    path,
                    items.len(),
                    max
                )));
            }
            _ => {
                let len = u32::try_from(items.len()).map_err(|_| {
                    CodecError::Encode(format!("{}: sequence too long", path))
                })?;
                self.write_u32(len);
            }
        }

        for (i, item) in items.iter().enumerate() {
            self.write_single(&field.ty, item, &format!("{}[{}]", path, i))?;
        }
        Ok(())
    }

    fn write_single(&mut self, ty: &FieldType, value: &Value, path: &str) -> Result<(), CodecError> {
        match ty {
            FieldType::Primitive(p) => self.write_primitive(*p, value, path),
            FieldType::Complex(name) => {
                let def = lookup(self.schema, name)?;
                self.write_message(def, value, path)
            }
        }
    }

    fn write_primitive(&mut self, p: Primitive, value: &Value, path: &str) -> Result<(), CodecError> {
        match p {
            Primitive::Bool => {
                let b = match value {
                    Value::Null => false,
                    Value::Bool(b) => *b,
                    other => return Err(mismatch(path, "bool", other)),
                };
                self.buf.push(u8::from(b));
            }
            Primitive::Int8 => {
                let v = integer(value, path, i8::MIN.into(), i8::MAX.into())?;
                self.buf.push(v as i8 as u8);
            }
            Primitive::UInt8 => {
                let v = integer(value, path, 0, u8::MAX.into())?;
                self.buf.push(v as u8);
            }
            Primitive::Int16 => {
                let v = integer(value, path, i16::MIN.into(), i16::MAX.into())?;
                self.align(2);
                self.buf.extend_from_slice(&(v as i16).to_le_bytes());
            }
            Primitive::UInt16 => {
                let v = integer(value, path, 0, u16::MAX.into())?;
                self.align(2);
                self.buf.extend_from_slice(&(v as u16).to_le_bytes());
            }
            Primitive::Int32 => {
                let v = integer(value, path, i32::MIN.into(), i32::MAX.into())?;
                self.align(4);
                self.buf.extend_from_slice(&(v as i32).to_le_bytes());
            }
            Primitive::UInt32 => {
                let v = integer(value, path, 0, u32::MAX.into())?;
                self.write_u32(v as u32);
            }
            Primitive::Int64 => {
                let v = integer(value, path, i64::MIN.into(), i64::MAX.into())?;
                self.align(8);
                self.buf.extend_from_slice(&(v as i64).to_le_bytes());
            }
            Primitive::UInt64 => {
                let v = integer(value, path, 0, u64::MAX.into())?;
                self.align(8);
                self.buf.extend_from_slice(&(v as u64).to_le_bytes());
            }
            Primitive::Float32 => {
                let v = float(value, path)?;
                self.align(4);
                self.buf.extend_from_slice(&(v as f32).to_le_bytes());
            }
            Primitive::Float64 => {
                let v = float(value, path)?;
                self.align(8);
                self.buf.extend_from_slice(&v.to_le_bytes());
            }
            Primitive::String { bound } => {
                let s = match value {
                    Value::Null => "",
                    Value::String(s) => s.as_str(),
                    other => return Err(mismatch(path, "string", other)),
                };
                if let Some(max) = bound {
                    if s.len() > max {
                        return Err(CodecError::Encode(format!(
                            "{}: string exceeds bound of {}",
                            path, max
                        )));
                    }
                }
                self.write_string(s, path)?;
            }
            Primitive::WString { bound } => {
                let s = match value {
                    Value::Null => "",
                    Value::String(s) => s.as_str(),
                    other => return Err(mismatch(path, "string", other)),
                };
                let units: Vec<u16> = s.encode_utf16().collect();
                if let Some(max) = bound {
                    if units.len() > max {
                        return Err(CodecError::Encode(format!(
                            "{}: wstring exceeds bound of {}",
                            path, max
                        )));
                    }
                }
                if self.encoding == Encoding::Ros1 {
                    return Err(CodecError::Encode(format!(
                        "{}: wstring has no ROS 1 representation",
                        path
                    )));
                }
                let len = u32::try_from(units.len() + 1)
                    .map_err(|_| CodecError::Encode(format!("{}: wstring too long", path)))?;
                self.write_u32(len);
                for unit in units {
                    self.buf.extend_from_slice(&unit.to_le_bytes());
                }
                self.buf.extend_from_slice(&0u16.to_le_bytes());
            }
            Primitive::Time | Primitive::Duration => {
                let map = match value {
                    Value::Null => None,
                    Value::Object(map) => Some(map),
                    other => return Err(mismatch(path, "object", other)),
                };
                let part = |key: &str| map.and_then(|m| m.get(key)).unwrap_or(&Value::Null);
                if p == Primitive::Time {
                    let sec = integer(part("sec"), path, 0, u32::MAX.into())?;
                    let nsec = integer(part("nsec"), path, 0, u32::MAX.into())?;
                    self.buf.extend_from_slice(&(sec as u32).to_le_bytes());
                    self.buf.extend_from_slice(&(nsec as u32).to_le_bytes());
                } else {
                    let sec = integer(part("sec"), path, i32::MIN.into(), i32::MAX.into())?;
                    let nsec = integer(part("nsec"), path, i32::MIN.into(), i32::MAX.into())?;
                    self.buf.extend_from_slice(&(sec as i32).to_le_bytes());
                    self.buf.extend_from_slice(&(nsec as i32).to_le_bytes());
                }
            }
        }
        Ok(())
    }

    fn write_string(&mut self, s: &str, path: &str) -> Result<(), CodecError> {
        let bytes = s.as_bytes();
        let terminator = usize::from(self.encoding == Encoding::Cdr);
        let len = u32::try_from(bytes.len() + terminator)
            .map_err(|_| CodecError::Encode(format!("{}: string too long", path)))?;
        self.write_u32(len);
        self.buf.extend_from_slice(bytes);
        if terminator == 1 {
            self.buf.push(0);
        }
        Ok(())
    }
}

fn integer(value: &Value, path: &str, min: i128, max: i128) -> Result<i128, CodecError> {
    let v = match value {
        Value::Null => 0,
        Value::Bool(b) => i128::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i128::from(i)
            } else if let Some(u) = n.as_u64() {
                i128::from(u)
            } else {
                return Err(CodecError::Encode(format!(
                    "{}: expected integer, found {}",
                    path, n
                )));
            }
        }
        other => return Err(mismatch(path, "integer", other)),
    };
    if v < min || v > max {
        return Err(CodecError::Encode(format!(
            "{}: {} out of range [{}, {}]",
            path, v, min, max
        )));
    }
    Ok(v)
}

fn float(value: &Value, path: &str) -> Result<f64, CodecError> {
    match value {
        Value::Null => Ok(0.0),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| CodecError::Encode(format!("{}: unrepresentable number", path))),
        other => Err(mismatch(path, "number", other)),
    }
}

struct Decoder<'a> {
    schema: &'a MessageSchema,
    encoding: Encoding,
    data: &'a [u8],
    pos: usize,
    origin: usize,
}

impl<'a> Decoder<'a> {
    fn new(
        schema: &'a MessageSchema,
        encoding: Encoding,
        data: &'a [u8],
    ) -> Result<Self, CodecError> {
        let origin = match encoding {
            Encoding::Ros1 => 0,
            Encoding::Cdr => {
                if data.len() < CDR_LE_HEADER.len() {
                    return Err(CodecError::Decode(format!(
                        "payload of {} bytes has no CDR header",
                        data.len()
                    )));
                }
                if data[1] != CDR_LE_HEADER[1] {
                    return Err(CodecError::Decode(format!(
                        "unsupported CDR representation 0x{:02x}{:02x}",
                        data[0], data[1]
                    )));
                }
                CDR_LE_HEADER.len()
            }
        };
        Ok(Self {
            schema,
            encoding,
            data,
            pos: origin,
            origin,
        })
    }

    fn align(&mut self, alignment: usize) {
        if self.encoding == Encoding::Ros1 {
            return;
        }
        let offset = self.pos - self.origin;
        self.pos += (alignment - (offset % alignment)) % alignment;
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.data.len());
        match end {
            Some(end) => {
                let slice = &self.data[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(CodecError::Decode(format!(
                "buffer too short: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.data.len()
            ))),
        }
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_u32(&mut self) -> Result<u32, CodecError> {
        self.align(4);
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn read_message(&mut self, def: &MessageDef, path: &str) -> Result<Value, CodecError> {
        if def.fields.is_empty() && self.encoding == Encoding::Cdr {
            // Placeholder byte; some writers leave it out at the end.
            if self.remaining() > 0 {
                self.take(1)?;
            }
            return Ok(Value::Object(Map::new()));
        }
        let mut map = Map::with_capacity(def.fields.len());
        for field in &def.fields {
            let value = self.read_field(field, &join(path, &field.name))?;
            map.insert(field.name.clone(), value);
        }
        Ok(Value::Object(map))
    }

    fn read_field(&mut self, field: &FieldDef, path: &str) -> Result<Value, CodecError> {
        let len = match field.array {
            ArrayKind::Single => return self.read_single(&field.ty, path),
            ArrayKind::Fixed(len) => len,
            ArrayKind::Unbounded | ArrayKind::Bounded(_) => self.read_u32()? as usize,
        };

        // Reject lengths the remaining bytes cannot possibly hold.
        if let FieldType::Primitive(p) = &field.ty {
            let min = p.size().unwrap_or(4);
            if len.saturating_mul(min) > self.remaining() {
                return Err(CodecError::Decode(format!(
                    "{}: {} elements do not fit in {} remaining bytes",
                    path,
                    len,
                    self.remaining()
                )));
            }
        }

        let mut items = Vec::with_capacity(len.min(self.remaining()));
        for _ in 0..len {
            items.push(self.read_single(&field.ty, path)?);
        }
        Ok(Value::Array(items))
    }

    fn read_single(&mut self, ty: &FieldType, path: &str) -> Result<Value, CodecError> {
        match ty {
            FieldType::Primitive(p) => self.read_primitive(*p, path),
            FieldType::Complex(name) => {
                let def = lookup(self.schema, name)?;
                self.read_message(def, path)
            }
        }
    }

    fn read_primitive(&mut self, p: Primitive, path: &str) -> Result<Value, CodecError> {
        let value = match p {
            Primitive::Bool => Value::Bool(self.take(1)?[0] != 0),
            Primitive::Int8 => Value::from(i8::from_le_bytes(self.array()?)),
            Primitive::UInt8 => Value::from(self.take(1)?[0]),
            Primitive::Int16 => {
                self.align(2);
                Value::from(i16::from_le_bytes(self.array()?))
            }
            Primitive::UInt16 => {
                self.align(2);
                Value::from(u16::from_le_bytes(self.array()?))
            }
            Primitive::Int32 => {
                self.align(4);
                Value::from(i32::from_le_bytes(self.array()?))
            }
            Primitive::UInt32 => Value::from(self.read_u32()?),
            Primitive::Int64 => {
                self.align(8);
                Value::from(i64::from_le_bytes(self.array()?))
            }
            Primitive::UInt64 => {
                self.align(8);
                Value::from(u64::from_le_bytes(self.array()?))
            }
            Primitive::Float32 => {
                self.align(4);
                Value::from(f64::from(f32::from_le_bytes(self.array()?)))
            }
            Primitive::Float64 => {
                self.align(8);
                Value::from(f64::from_le_bytes(self.array()?))
            }
            Primitive::String { .. } => {
                let len = self.read_u32()? as usize;
                let mut bytes = self.take(len)?;
                if self.encoding == Encoding::Cdr {
                    if let Some((0, rest)) = bytes.split_last() {
                        bytes = rest;
                    }
                }
                let s = std::str::from_utf8(bytes)
                    .map_err(|e| CodecError::Decode(format!("{}: {}", path, e)))?;
                Value::String(s.to_string())
            }
            Primitive::WString { .. } => {
                if self.encoding == Encoding::Ros1 {
                    return Err(CodecError::Decode(format!(
                        "{}: wstring has no ROS 1 representation",
                        path
                    )));
                }
                let len = self.read_u32()? as usize;
                let raw = self.take(len.saturating_mul(2))?;
                let mut units: Vec<u16> = raw
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect();
                if units.last() == Some(&0) {
                    units.pop();
                }
                let s = String::from_utf16(&units)
                    .map_err(|e| CodecError::Decode(format!("{}: {}", path, e)))?;
                Value::String(s)
            }
            Primitive::Time => {
                let sec = u32::from_le_bytes(self.array()?);
                let nsec = u32::from_le_bytes(self.array()?);
                serde_json::json!({ "sec": sec, "nsec": nsec })
            }
            Primitive::Duration => {
                let sec = i32::from_le_bytes(self.array()?);
                let nsec = i32::from_le_bytes(self.array()?);
                serde_json::json!({ "sec": sec, "nsec": nsec })
            }
        };
        Ok(value)
    }
}
