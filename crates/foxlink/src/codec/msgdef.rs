// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ROS message definition parser.
//!
//! Servers advertise a channel's schema as the concatenated `.msg` text of
//! the root type followed by every type it depends on:
//!
//! ```text
//! std_msgs/Header header
//! string child_frame_id
//! ================================================================================
//! MSG: std_msgs/Header
//! builtin_interfaces/Time stamp
//! string frame_id
//! ```
//!
//! The parser turns that text into a [`MessageSchema`]: the root definition
//! plus a table of dependent definitions keyed by `pkg/Type`.

use crate::codec::CodecError;
use std::collections::HashMap;

/// Message definition dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Ros1,
    Ros2,
}

/// Primitive field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Bool,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    String { bound: Option<usize> },
    WString { bound: Option<usize> },
    /// ROS 1 `time` (u32 sec, u32 nsec).
    Time,
    /// ROS 1 `duration` (i32 sec, i32 nsec).
    Duration,
}

impl Primitive {
    /// Encoded size in bytes (None for strings).
    pub fn size(&self) -> Option<usize> {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => Some(1),
            Self::Int16 | Self::UInt16 => Some(2),
            Self::Int32 | Self::UInt32 | Self::Float32 => Some(4),
            Self::Int64 | Self::UInt64 | Self::Float64 | Self::Time | Self::Duration => Some(8),
            Self::String { .. } | Self::WString { .. } => None,
        }
    }

    /// CDR alignment requirement.
    pub fn alignment(&self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32
            | Self::UInt32
            | Self::Float32
            | Self::String { .. }
            | Self::WString { .. }
            | Self::Time
            | Self::Duration => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }
}

/// Field type: a primitive or a reference to another definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Primitive(Primitive),
    /// Fully qualified `pkg/Type` name.
    Complex(String),
}

/// Array shape of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayKind {
    Single,
    Fixed(usize),
    Unbounded,
    Bounded(usize),
}

/// One field of a message definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub ty: FieldType,
    pub array: ArrayKind,
}

/// A single message definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageDef {
    /// `pkg/Type`, None for the root definition.
    pub name: Option<String>,
    pub fields: Vec<FieldDef>,
}

/// Root definition plus every dependent definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSchema {
    pub root: MessageDef,
    types: HashMap<String, MessageDef>,
}

const BUILTIN_TIME: &str = "builtin_interfaces/Time";
const BUILTIN_DURATION: &str = "builtin_interfaces/Duration";

/// Field before complex type names are resolved.
struct RawField {
    name: String,
    base: String,
    array: ArrayKind,
}

struct RawSection {
    name: Option<String>,
    fields: Vec<RawField>,
}

impl MessageSchema {
    /// Parse concatenated message definition text.
    pub fn parse(text: &str, dialect: Dialect) -> Result<Self, CodecError> {
        let sections = split_sections(text)?;
        let known: Vec<String> = sections.iter().filter_map(|s| s.name.clone()).collect();

        let mut root = None;
        let mut types = HashMap::new();

        for section in sections {
            let package = section
                .name
                .as_deref()
                .and_then(|n| n.split_once('/'))
                .map(|(pkg, _)| pkg.to_string());

            let mut fields = Vec::with_capacity(section.fields.len());
            for raw in section.fields {
                let ty = resolve_type(&raw.base, dialect, package.as_deref(), &known)?;
                fields.push(FieldDef {
                    name: raw.name,
                    ty,
                    array: raw.array,
                });
            }

            let def = MessageDef {
                name: section.name.clone(),
                fields,
            };
            match section.name {
                Some(name) => {
                    types.insert(name, def);
                }
                None => root = Some(def),
            }
        }

        Self::from_parts(root.unwrap_or_default(), types)
    }

    /// Assemble a schema from resolved definitions, adding the builtin
    /// time types and checking every reference.
    pub(crate) fn from_parts(
        root: MessageDef,
        types: HashMap<String, MessageDef>,
    ) -> Result<Self, CodecError> {
        let mut schema = Self { root, types };
        schema.add_builtins();
        schema.check_references()?;
        Ok(schema)
    }

    /// Look up a dependent definition by `pkg/Type`.
    pub fn lookup(&self, name: &str) -> Option<&MessageDef> {
        self.types.get(name)
    }

    /// Number of dependent definitions.
    pub fn dependency_count(&self) -> usize {
        self.types.len()
    }

    fn add_builtins(&mut self) {
        for name in [BUILTIN_TIME, BUILTIN_DURATION] {
            if self.types.contains_key(name) {
                continue;
            }
            self.types.insert(
                name.to_string(),
                MessageDef {
                    name: Some(name.to_string()),
                    fields: vec![
                        FieldDef {
                            name: "sec".into(),
                            ty: FieldType::Primitive(Primitive::Int32),
                            array: ArrayKind::Single,
                        },
                        FieldDef {
                            name: "nanosec".into(),
                            ty: FieldType::Primitive(Primitive::UInt32),
                            array: ArrayKind::Single,
                        },
                    ],
                },
            );
        }
    }

    fn check_references(&self) -> Result<(), CodecError> {
        let all = std::iter::once(&self.root).chain(self.types.values());
        for def in all {
            for field in &def.fields {
                if let FieldType::Complex(name) = &field.ty {
                    if !self.types.contains_key(name) {
                        return Err(CodecError::BadSchema(format!(
                            "field '{}' references undefined type '{}'",
                            field.name, name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn is_separator(line: &str) -> bool {
    let line = line.trim();
    line.len() >= 3 && line.chars().all(|c| c == '=')
}

fn split_sections(text: &str) -> Result<Vec<RawSection>, CodecError> {
    let mut sections = vec![RawSection {
        name: None,
        fields: Vec::new(),
    }];

    for (lineno, line) in text.lines().enumerate() {
        if is_separator(line) {
            sections.push(RawSection {
                name: None,
                fields: Vec::new(),
            });
            continue;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let Some(current) = sections.last_mut() else {
            continue;
        };

        if let Some(header) = trimmed.strip_prefix("MSG:") {
            if current.name.is_some() || !current.fields.is_empty() {
                return Err(CodecError::BadSchema(format!(
                    "line {}: unexpected MSG header",
                    lineno + 1
                )));
            }
            current.name = Some(normalize_type_name(header.trim()));
            continue;
        }

        if let Some(field) = parse_field_line(trimmed, lineno + 1)? {
            current.fields.push(field);
        }
    }

    // Dependent sections must be named; an empty trailing section is tolerated.
    let mut out = Vec::with_capacity(sections.len());
    for (index, section) in sections.into_iter().enumerate() {
        if index > 0 && section.name.is_none() {
            if section.fields.is_empty() {
                continue;
            }
            return Err(CodecError::BadSchema(format!(
                "definition #{} has fields but no MSG header",
                index
            )));
        }
        out.push(section);
    }
    Ok(out)
}

/// Parse one non-empty, non-comment line. Constants yield `None`.
fn parse_field_line(line: &str, lineno: usize) -> Result<Option<RawField>, CodecError> {
    let (type_token, rest) = match line.split_once(char::is_whitespace) {
        Some((t, r)) => (t, r.trim_start()),
        None => {
            return Err(CodecError::BadSchema(format!(
                "line {}: missing field name after '{}'",
                lineno, line
            )))
        }
    };

    let name_end = rest
        .find(|c: char| c.is_whitespace() || c == '=' || c == '#')
        .unwrap_or(rest.len());
    let name = &rest[..name_end];
    let after = rest[name_end..].trim_start();

    if after.starts_with('=') {
        return Ok(None);
    }

    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(CodecError::BadSchema(format!(
            "line {}: invalid field name '{}'",
            lineno, name
        )));
    }

    let (base, array) = parse_type_token(type_token, lineno)?;
    Ok(Some(RawField {
        name: name.to_string(),
        base,
        array,
    }))
}

fn parse_type_token(token: &str, lineno: usize) -> Result<(String, ArrayKind), CodecError> {
    let Some(open) = token.find('[') else {
        return Ok((token.to_string(), ArrayKind::Single));
    };

    let bad = || CodecError::BadSchema(format!("line {}: malformed array type '{}'", lineno, token));

    let inner = token[open + 1..].strip_suffix(']').ok_or_else(bad)?;
    let array = if inner.is_empty() {
        ArrayKind::Unbounded
    } else if let Some(bound) = inner.strip_prefix("<=") {
        ArrayKind::Bounded(bound.trim().parse().map_err(|_| bad())?)
    } else {
        ArrayKind::Fixed(inner.trim().parse().map_err(|_| bad())?)
    };

    Ok((token[..open].to_string(), array))
}

fn primitive(base: &str, dialect: Dialect) -> Result<Option<Primitive>, CodecError> {
    if let Some((kind, bound)) = base.split_once("<=") {
        let bound: usize = bound
            .parse()
            .map_err(|_| CodecError::BadSchema(format!("malformed string bound '{}'", base)))?;
        return match kind {
            "string" => Ok(Some(Primitive::String { bound: Some(bound) })),
            "wstring" => Ok(Some(Primitive::WString { bound: Some(bound) })),
            _ => Err(CodecError::BadSchema(format!(
                "bound on non-string type '{}'",
                base
            ))),
        };
    }

    let p = match base {
        "bool" => Primitive::Bool,
        "byte" => match dialect {
            Dialect::Ros1 => Primitive::Int8,
            Dialect::Ros2 => Primitive::UInt8,
        },
        "char" | "uint8" => Primitive::UInt8,
        "int8" => Primitive::Int8,
        "int16" => Primitive::Int16,
        "uint16" => Primitive::UInt16,
        "int32" => Primitive::Int32,
        "uint32" => Primitive::UInt32,
        "int64" => Primitive::Int64,
        "uint64" => Primitive::UInt64,
        "float32" => Primitive::Float32,
        "float64" => Primitive::Float64,
        "string" => Primitive::String { bound: None },
        "wstring" => Primitive::WString { bound: None },
        "time" if dialect == Dialect::Ros1 => Primitive::Time,
        "duration" if dialect == Dialect::Ros1 => Primitive::Duration,
        _ => return Ok(None),
    };
    Ok(Some(p))
}

fn resolve_type(
    base: &str,
    dialect: Dialect,
    package: Option<&str>,
    known: &[String],
) -> Result<FieldType, CodecError> {
    if let Some(p) = primitive(base, dialect)? {
        return Ok(FieldType::Primitive(p));
    }

    let name = match (base, dialect) {
        ("time", Dialect::Ros2) => BUILTIN_TIME.to_string(),
        ("duration", Dialect::Ros2) => BUILTIN_DURATION.to_string(),
        ("Header", Dialect::Ros1) => "std_msgs/Header".to_string(),
        _ if base.contains('/') => normalize_type_name(base),
        _ => {
            let suffix = format!("/{}", base);
            package
                .map(|pkg| format!("{}/{}", pkg, base))
                .filter(|candidate| known.iter().any(|k| k == candidate))
                .or_else(|| known.iter().find(|k| k.ends_with(&suffix)).cloned())
                .unwrap_or_else(|| match package {
                    Some(pkg) => format!("{}/{}", pkg, base),
                    None => base.to_string(),
                })
        }
    };
    Ok(FieldType::Complex(name))
}

/// `pkg/msg/Type` -> `pkg/Type`.
pub fn normalize_type_name(name: &str) -> String {
    let parts: Vec<&str> = name.split('/').collect();
    match parts.as_slice() {
        [pkg, "msg", ty] | [pkg, "srv", ty] | [pkg, "action", ty] => format!("{}/{}", pkg, ty),
        _ => name.to_string(),
    }
}
