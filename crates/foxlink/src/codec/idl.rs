// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ROS 2 IDL schema parser.
//!
//! `ros2idl` schemas carry the OMG IDL emitted by rosidl, one section per
//! type, root type first:
//!
//! ```text
//! ================================================================================
//! IDL: geometry_msgs/msg/Point
//! module geometry_msgs {
//!   module msg {
//!     struct Point {
//!       double x;
//!       double y;
//!       double z;
//!     };
//!   };
//! };
//! ```
//!
//! Modules, structs, typedefs and enums are understood. Constants and
//! annotations are skipped. The result is the same [`MessageSchema`] the
//! `.msg` parser builds.

use crate::codec::msgdef::{
    normalize_type_name, ArrayKind, FieldDef, FieldType, MessageDef, MessageSchema, Primitive,
};
use crate::codec::CodecError;
use std::collections::{HashMap, HashSet};

const MAX_TYPEDEF_DEPTH: usize = 16;

fn bad(reason: impl Into<String>) -> CodecError {
    CodecError::BadSchema(reason.into())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BaseType {
    Primitive(Primitive),
    /// Scoped or relative name (`pkg::msg::Type`, `Type`).
    Named(String),
}

#[derive(Debug, Clone)]
struct RawType {
    base: BaseType,
    array: ArrayKind,
}

struct RawMember {
    name: String,
    ty: RawType,
}

struct RawStruct {
    /// `pkg::msg::Type`
    path: String,
    scope: Vec<String>,
    members: Vec<RawMember>,
}

struct RawTypedef {
    scope: Vec<String>,
    ty: RawType,
}

/// `pkg::msg::Type` -> `pkg/Type`.
fn type_name(path: &str) -> String {
    normalize_type_name(&path.replace("::", "/"))
}

/// Combine the array shape of a type with the one of its declarator.
fn combine(inner: ArrayKind, outer: ArrayKind, name: &str) -> Result<ArrayKind, CodecError> {
    match (inner, outer) {
        (a, ArrayKind::Single) => Ok(a),
        (ArrayKind::Single, a) => Ok(a),
        _ => Err(bad(format!(
            "'{}': multi-dimensional arrays are not supported",
            name
        ))),
    }
}

fn keyword_primitive(word: &str) -> Option<Primitive> {
    let p = match word {
        "boolean" => Primitive::Bool,
        "octet" | "char" | "uint8" => Primitive::UInt8,
        "int8" => Primitive::Int8,
        "short" | "int16" => Primitive::Int16,
        "wchar" | "uint16" => Primitive::UInt16,
        "int32" => Primitive::Int32,
        "uint32" => Primitive::UInt32,
        "int64" => Primitive::Int64,
        "uint64" => Primitive::UInt64,
        "float" => Primitive::Float32,
        "double" => Primitive::Float64,
        _ => return None,
    };
    Some(p)
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':' || c == '.'
}

/// Split IDL text into tokens. Also returns the first `IDL:` section name.
fn tokenize(text: &str) -> Result<(Vec<String>, Option<String>), CodecError> {
    let mut root = None;
    let mut source = String::with_capacity(text.len());
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(name) = trimmed.strip_prefix("IDL:") {
            if root.is_none() {
                root = Some(name.trim().to_string());
            }
            continue;
        }
        let separator = trimmed.len() >= 3 && trimmed.chars().all(|c| c == '=');
        if separator || trimmed.starts_with('#') {
            continue;
        }
        source.push_str(line);
        source.push('\n');
    }

    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                loop {
                    match chars.next() {
                        Some('/') if prev == '*' => break,
                        Some(c) => prev = c,
                        None => return Err(bad("unterminated comment")),
                    }
                }
            }
            '"' => {
                let mut literal = String::from('"');
                let mut escaped = false;
                loop {
                    let Some(c) = chars.next() else {
                        return Err(bad("unterminated string literal"));
                    };
                    literal.push(c);
                    if escaped {
                        escaped = false;
                    } else if c == '\\' {
                        escaped = true;
                    } else if c == '"' {
                        break;
                    }
                }
                tokens.push(literal);
            }
            c if is_word_char(c) => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if !is_word_char(next) {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                tokens.push(word);
            }
            other => tokens.push(other.to_string()),
        }
    }
    Ok((tokens, root))
}

#[derive(Default)]
struct Parser {
    tokens: Vec<String>,
    pos: usize,
    scope: Vec<String>,
    structs: Vec<RawStruct>,
    struct_paths: HashSet<String>,
    typedefs: HashMap<String, RawTypedef>,
    enums: HashSet<String>,
}

impl Parser {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn next(&mut self) -> Result<String, CodecError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| bad("unexpected end of IDL"))?;
        self.pos += 1;
        Ok(token)
    }

    fn eat(&mut self, want: &str) -> bool {
        if self.peek() == Some(want) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, want: &str) -> Result<(), CodecError> {
        let got = self.next()?;
        if got == want {
            Ok(())
        } else {
            Err(bad(format!("expected '{}', found '{}'", want, got)))
        }
    }

    fn ident(&mut self) -> Result<String, CodecError> {
        let token = self.next()?;
        let starts_ok = token
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == ':');
        if starts_ok {
            Ok(token)
        } else {
            Err(bad(format!("expected identifier, found '{}'", token)))
        }
    }

    fn number(&mut self) -> Result<usize, CodecError> {
        let token = self.next()?;
        token
            .parse()
            .map_err(|_| bad(format!("expected a size, found '{}'", token)))
    }

    fn path(&self, name: &str) -> String {
        let mut parts = self.scope.clone();
        parts.push(name.to_string());
        parts.join("::")
    }

    fn skip_balanced(&mut self, open: &str, close: &str) -> Result<(), CodecError> {
        self.expect(open)?;
        let mut depth = 1usize;
        while depth > 0 {
            let token = self.next()?;
            if token == open {
                depth += 1;
            } else if token == close {
                depth -= 1;
            }
        }
        Ok(())
    }

    fn skip_annotations(&mut self) -> Result<(), CodecError> {
        while self.eat("@") {
            self.ident()?;
            if self.peek() == Some("(") {
                self.skip_balanced("(", ")")?;
            }
        }
        Ok(())
    }

    fn definitions(&mut self, nested: bool) -> Result<(), CodecError> {
        loop {
            self.skip_annotations()?;
            match self.peek() {
                None if nested => return Err(bad("unterminated module")),
                None => return Ok(()),
                Some("}") if nested => {
                    self.pos += 1;
                    self.eat(";");
                    return Ok(());
                }
                _ => self.definition()?,
            }
        }
    }

    fn definition(&mut self) -> Result<(), CodecError> {
        let keyword = self.next()?;
        match keyword.as_str() {
            "module" => {
                let name = self.ident()?;
                self.expect("{")?;
                self.scope.push(name);
                self.definitions(true)?;
                self.scope.pop();
                Ok(())
            }
            "struct" => self.structure(),
            "typedef" => self.typedef(),
            "enum" => {
                let name = self.ident()?;
                self.skip_balanced("{", "}")?;
                self.eat(";");
                self.enums.insert(self.path(&name));
                Ok(())
            }
            "const" => {
                while self.next()? != ";" {}
                Ok(())
            }
            ";" => Ok(()),
            other => Err(bad(format!("unexpected '{}' in IDL", other))),
        }
    }

    fn structure(&mut self) -> Result<(), CodecError> {
        let name = self.ident()?;
        // Forward declaration.
        if self.eat(";") {
            return Ok(());
        }
        self.expect("{")?;

        let mut members = Vec::new();
        loop {
            self.skip_annotations()?;
            if self.eat("}") {
                break;
            }
            let ty = self.type_ref()?;
            loop {
                let member = self.ident()?;
                let array = combine(ty.array, self.declarator_array()?, &member)?;
                members.push(RawMember {
                    name: member,
                    ty: RawType {
                        base: ty.base.clone(),
                        array,
                    },
                });
                if !self.eat(",") {
                    break;
                }
            }
            self.expect(";")?;
        }
        self.eat(";");

        let path = self.path(&name);
        self.struct_paths.insert(path.clone());
        self.structs.push(RawStruct {
            path,
            scope: self.scope.clone(),
            members,
        });
        Ok(())
    }

    fn typedef(&mut self) -> Result<(), CodecError> {
        let ty = self.type_ref()?;
        let name = self.ident()?;
        let array = combine(ty.array, self.declarator_array()?, &name)?;
        self.expect(";")?;
        self.typedefs.insert(
            self.path(&name),
            RawTypedef {
                scope: self.scope.clone(),
                ty: RawType {
                    base: ty.base,
                    array,
                },
            },
        );
        Ok(())
    }

    fn declarator_array(&mut self) -> Result<ArrayKind, CodecError> {
        if !self.eat("[") {
            return Ok(ArrayKind::Single);
        }
        let len = self.number()?;
        self.expect("]")?;
        if self.peek() == Some("[") {
            return Err(bad("multi-dimensional arrays are not supported"));
        }
        Ok(ArrayKind::Fixed(len))
    }

    fn string_bound(&mut self) -> Result<Option<usize>, CodecError> {
        if !self.eat("<") {
            return Ok(None);
        }
        let bound = self.number()?;
        self.expect(">")?;
        Ok(Some(bound))
    }

    fn type_ref(&mut self) -> Result<RawType, CodecError> {
        let word = self.ident()?;
        let primitive = match word.as_str() {
            "sequence" => {
                self.expect("<")?;
                let inner = self.type_ref()?;
                if inner.array != ArrayKind::Single {
                    return Err(bad("nested sequences are not supported"));
                }
                let array = if self.eat(",") {
                    ArrayKind::Bounded(self.number()?)
                } else {
                    ArrayKind::Unbounded
                };
                self.expect(">")?;
                return Ok(RawType {
                    base: inner.base,
                    array,
                });
            }
            "string" => Primitive::String {
                bound: self.string_bound()?,
            },
            "wstring" => Primitive::WString {
                bound: self.string_bound()?,
            },
            "unsigned" => match self.next()?.as_str() {
                "short" => Primitive::UInt16,
                "long" if self.eat("long") => Primitive::UInt64,
                "long" => Primitive::UInt32,
                other => return Err(bad(format!("unexpected 'unsigned {}'", other))),
            },
            "long" => {
                if self.eat("double") {
                    return Err(bad("long double is not supported"));
                }
                if self.eat("long") {
                    Primitive::Int64
                } else {
                    Primitive::Int32
                }
            }
            other => match keyword_primitive(other) {
                Some(p) => p,
                None => {
                    return Ok(RawType {
                        base: BaseType::Named(other.to_string()),
                        array: ArrayKind::Single,
                    })
                }
            },
        };
        Ok(RawType {
            base: BaseType::Primitive(primitive),
            array: ArrayKind::Single,
        })
    }

    /// Resolve a type used in `scope`, expanding typedefs.
    fn resolve(
        &self,
        base: &BaseType,
        scope: &[String],
        depth: usize,
    ) -> Result<(FieldType, ArrayKind), CodecError> {
        let name = match base {
            BaseType::Primitive(p) => return Ok((FieldType::Primitive(*p), ArrayKind::Single)),
            BaseType::Named(name) => name.trim_start_matches("::"),
        };
        if depth > MAX_TYPEDEF_DEPTH {
            return Err(bad(format!("typedef chain through '{}' is too deep", name)));
        }

        // Innermost scope first.
        for i in (0..=scope.len()).rev() {
            let candidate = if i == 0 {
                name.to_string()
            } else {
                format!("{}::{}", scope[..i].join("::"), name)
            };
            if let Some(typedef) = self.typedefs.get(&candidate) {
                let (ty, inner) = self.resolve(&typedef.ty.base, &typedef.scope, depth + 1)?;
                return Ok((ty, combine(inner, typedef.ty.array, &candidate)?));
            }
            if self.enums.contains(&candidate) {
                return Ok((FieldType::Primitive(Primitive::UInt32), ArrayKind::Single));
            }
            if self.struct_paths.contains(&candidate) {
                return Ok((FieldType::Complex(type_name(&candidate)), ArrayKind::Single));
            }
        }

        // Fully scoped names may point at builtins not shipped in the text.
        if name.contains("::") {
            Ok((FieldType::Complex(type_name(name)), ArrayKind::Single))
        } else {
            Err(bad(format!("undefined type '{}'", name)))
        }
    }

    fn finish(self, root_hint: Option<String>) -> Result<MessageSchema, CodecError> {
        if self.structs.is_empty() {
            return Err(bad("IDL defines no struct"));
        }
        let root_index = root_hint
            .map(|hint| normalize_type_name(&hint))
            .and_then(|hint| self.structs.iter().position(|s| type_name(&s.path) == hint))
            .unwrap_or(0);

        let mut root = MessageDef::default();
        let mut types = HashMap::new();
        for (index, raw) in self.structs.iter().enumerate() {
            let mut fields = Vec::with_capacity(raw.members.len());
            for member in &raw.members {
                let (ty, inner) = self.resolve(&member.ty.base, &raw.scope, 0)?;
                fields.push(FieldDef {
                    name: member.name.clone(),
                    ty,
                    array: combine(inner, member.ty.array, &member.name)?,
                });
            }
            if index == root_index {
                root.fields = fields;
            } else {
                let name = type_name(&raw.path);
                types.insert(
                    name.clone(),
                    MessageDef {
                        name: Some(name),
                        fields,
                    },
                );
            }
        }
        MessageSchema::from_parts(root, types)
    }
}

impl MessageSchema {
    /// Parse a `ros2idl` schema.
    pub fn parse_idl(text: &str) -> Result<Self, CodecError> {
        let (tokens, root_hint) = tokenize(text)?;
        let mut parser = Parser {
            tokens,
            ..Parser::default()
        };
        parser.definitions(false)?;
        parser.finish(root_hint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POSE_IDL: &str = r#"================================================================================
IDL: example_msgs/msg/Pose
// generated from rosidl_adapter/resource/msg.idl.em
#include "std_msgs/msg/Header.idl"

module example_msgs {
  module msg {
    module Pose_Constants {
      const uint8 FRAME_WORLD = 0;
      const string NAME = "pose; with semicolon";
    };
    typedef double double__9[9];
    @verbatim (language="comment", text="A pose.")
    struct Pose {
      std_msgs::msg::Header header;
      example_msgs::msg::Point position;
      double__9 covariance;
      sequence<int32, 3> ids;
      sequence<Point> path;
      string<8> label;
      unsigned long long count;
      @default (value=TRUE)
      boolean valid;
    };
  };
};

================================================================================
IDL: example_msgs/msg/Point
module example_msgs {
  module msg {
    struct Point {
      double x, y;
      /* planar robots leave this at zero */
      double z;
    };
  };
};

================================================================================
IDL: std_msgs/msg/Header
module std_msgs {
  module msg {
    struct Header {
      builtin_interfaces::msg::Time stamp;
      string frame_id;
    };
  };
};
"#;

    fn field<'a>(def: &'a MessageDef, name: &str) -> &'a FieldDef {
        def.fields.iter().find(|f| f.name == name).unwrap()
    }

    #[test]
    fn parses_rosidl_output() {
        let schema = MessageSchema::parse_idl(POSE_IDL).unwrap();
        let names: Vec<_> = schema.root.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            ["header", "position", "covariance", "ids", "path", "label", "count", "valid"]
        );

        let root = &schema.root;
        assert_eq!(
            field(root, "header").ty,
            FieldType::Complex("std_msgs/Header".into())
        );
        let covariance = field(root, "covariance");
        assert_eq!(covariance.ty, FieldType::Primitive(Primitive::Float64));
        assert_eq!(covariance.array, ArrayKind::Fixed(9));
        assert_eq!(field(root, "ids").array, ArrayKind::Bounded(3));
        let path = field(root, "path");
        assert_eq!(path.ty, FieldType::Complex("example_msgs/Point".into()));
        assert_eq!(path.array, ArrayKind::Unbounded);
        assert_eq!(
            field(root, "label").ty,
            FieldType::Primitive(Primitive::String { bound: Some(8) })
        );
        assert_eq!(
            field(root, "count").ty,
            FieldType::Primitive(Primitive::UInt64)
        );

        let point = schema.lookup("example_msgs/Point").unwrap();
        let names: Vec<_> = point.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["x", "y", "z"]);

        // Time is not shipped; the builtin fallback supplies it.
        let header = schema.lookup("std_msgs/Header").unwrap();
        assert_eq!(
            field(header, "stamp").ty,
            FieldType::Complex("builtin_interfaces/Time".into())
        );
        assert!(schema.lookup("builtin_interfaces/Time").is_some());
    }

    #[test]
    fn root_follows_the_first_section_header() {
        let text = "\
================================================================================
IDL: pkg/msg/Outer
module pkg { module msg {
  struct Inner { int16 v; };
  struct Outer { Inner inner; long n; };
}; };
";
        let schema = MessageSchema::parse_idl(text).unwrap();
        assert_eq!(schema.root.fields.len(), 2);
        assert_eq!(schema.root.fields[0].ty, FieldType::Complex("pkg/Inner".into()));
        assert_eq!(
            schema.root.fields[1].ty,
            FieldType::Primitive(Primitive::Int32)
        );
    }

    #[test]
    fn matches_the_msg_layout() {
        let msg = MessageSchema::parse(
            "float64 x\nfloat64 y\nfloat64 z\n",
            crate::codec::msgdef::Dialect::Ros2,
        )
        .unwrap();
        let idl = MessageSchema::parse_idl(
            "module geometry_msgs { module msg { struct Point { double x; double y; double z; }; }; };",
        )
        .unwrap();
        assert_eq!(msg.root.fields, idl.root.fields);
    }

    #[test]
    fn rejects_what_it_cannot_represent() {
        let undefined = "module p { module msg { struct A { Missing m; }; }; };";
        assert!(MessageSchema::parse_idl(undefined)
            .unwrap_err()
            .to_string()
            .contains("Missing"));

        let nested = "module p { module msg { struct A { sequence<sequence<int32>> v; }; }; };";
        assert!(MessageSchema::parse_idl(nested).is_err());

        let grid = "module p { module msg { struct A { int32 v[2][2]; }; }; };";
        assert!(MessageSchema::parse_idl(grid).is_err());

        assert!(MessageSchema::parse_idl("module p { module msg {").is_err());
        assert!(MessageSchema::parse_idl("").is_err());
    }
}
