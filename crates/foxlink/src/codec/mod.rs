// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message codecs.
//!
//! A channel or service advertises its type as schema text. The session turns
//! that text into a [`MessageReader`] / [`MessageWriter`] pair through a
//! [`CodecFactory`], memoized per type name by [`CodecCache`].

mod cache;
mod idl;
pub mod msgdef;
mod ser;

pub use cache::CodecCache;

use msgdef::{Dialect, MessageSchema};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Binary message encoding negotiated once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// ROS 2 CDR (little endian, with encapsulation header).
    Cdr,
    /// ROS 1 serialization.
    Ros1,
}

impl Encoding {
    /// `ros1` when the server lists it, `cdr` otherwise.
    pub fn from_supported(supported: &[String]) -> Self {
        if supported.iter().any(|e| e == "ros1") {
            Self::Ros1
        } else {
            Self::Cdr
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cdr => "cdr",
            Self::Ros1 => "ros1",
        }
    }

    /// Message definition dialect matching this encoding.
    pub fn dialect(&self) -> Dialect {
        match self {
            Self::Cdr => Dialect::Ros2,
            Self::Ros1 => Dialect::Ros1,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Codec errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("bad schema: {0}")]
    BadSchema(String),

    #[error("unsupported schema encoding: {0}")]
    UnsupportedSchemaEncoding(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),
}

/// What a codec is built from.
#[derive(Debug, Clone, Copy)]
pub struct SchemaSource<'a> {
    /// Type name, also the cache key.
    pub name: &'a str,
    /// `ros1msg`, `ros2msg` or `ros2idl` (None when the server omits it).
    pub schema_encoding: Option<&'a str>,
    pub schema: &'a str,
}

/// Decodes binary payloads into JSON values.
pub trait MessageReader: Send + Sync {
    fn read_message(&self, data: &[u8]) -> Result<Value, CodecError>;
}

/// Encodes JSON values into binary payloads.
pub trait MessageWriter: Send + Sync {
    fn write_message(&self, message: &Value) -> Result<Vec<u8>, CodecError>;
}

/// Builds readers and writers from schema text.
pub trait CodecFactory: Send + Sync {
    fn reader(
        &self,
        source: SchemaSource<'_>,
        encoding: Encoding,
    ) -> Result<Arc<dyn MessageReader>, CodecError>;

    fn writer(
        &self,
        source: SchemaSource<'_>,
        encoding: Encoding,
    ) -> Result<Arc<dyn MessageWriter>, CodecError>;
}

/// Default factory for `.msg` and rosidl IDL schemas.
#[derive(Debug, Default, Clone, Copy)]
pub struct RosCodecFactory;

impl RosCodecFactory {
    fn build(source: SchemaSource<'_>, encoding: Encoding) -> Result<Arc<RosCodec>, CodecError> {
        let parsed = match source.schema_encoding {
            None | Some("ros1msg") | Some("ros2msg") | Some("") => {
                MessageSchema::parse(source.schema, encoding.dialect())
            }
            Some("ros2idl") => MessageSchema::parse_idl(source.schema),
            Some(other) => {
                return Err(CodecError::UnsupportedSchemaEncoding(format!(
                    "{} ({})",
                    other, source.name
                )))
            }
        };
        let schema = parsed.map_err(|e| match e {
            CodecError::BadSchema(reason) => {
                CodecError::BadSchema(format!("{}: {}", source.name, reason))
            }
            other => other,
        })?;
        Ok(Arc::new(RosCodec { schema, encoding }))
    }
}

impl CodecFactory for RosCodecFactory {
    fn reader(
        &self,
        source: SchemaSource<'_>,
        encoding: Encoding,
    ) -> Result<Arc<dyn MessageReader>, CodecError> {
        let codec: Arc<dyn MessageReader> = Self::build(source, encoding)?;
        Ok(codec)
    }

    fn writer(
        &self,
        source: SchemaSource<'_>,
        encoding: Encoding,
    ) -> Result<Arc<dyn MessageWriter>, CodecError> {
        let codec: Arc<dyn MessageWriter> = Self::build(source, encoding)?;
        Ok(codec)
    }
}

/// Schema-driven codec for one message type.
#[derive(Debug)]
pub struct RosCodec {
    schema: MessageSchema,
    encoding: Encoding,
}

impl RosCodec {
    pub fn schema(&self) -> &MessageSchema {
        &self.schema
    }
}

impl MessageReader for RosCodec {
    fn read_message(&self, data: &[u8]) -> Result<Value, CodecError> {
        ser::decode(&self.schema, self.encoding, data)
    }
}

impl MessageWriter for RosCodec {
    fn write_message(&self, message: &Value) -> Result<Vec<u8>, CodecError> {
        ser::encode(&self.schema, self.encoding, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source<'a>(schema: &'a str, schema_encoding: Option<&'a str>) -> SchemaSource<'a> {
        SchemaSource {
            name: "std_msgs/String",
            schema_encoding,
            schema,
        }
    }

    #[test]
    fn encoding_selection() {
        assert_eq!(Encoding::from_supported(&[]), Encoding::Cdr);
        assert_eq!(
            Encoding::from_supported(&["json".into(), "ros1".into()]),
            Encoding::Ros1
        );
        assert_eq!(Encoding::from_supported(&["cdr".into()]), Encoding::Cdr);
        assert_eq!(Encoding::Ros1.to_string(), "ros1");
    }

    #[test]
    fn factory_builds_matching_reader_and_writer() {
        let factory = RosCodecFactory;
        let src = source("string data\n", Some("ros2msg"));
        let writer = factory.writer(src, Encoding::Cdr).unwrap();
        let reader = factory.reader(src, Encoding::Cdr).unwrap();

        let bytes = writer.write_message(&json!({"data": "asdf"})).unwrap();
        assert_eq!(reader.read_message(&bytes).unwrap(), json!({"data": "asdf"}));
    }

    #[test]
    fn factory_reads_idl_schemas() {
        let idl = "module std_msgs { module msg { struct String { string data; }; }; };";
        let writer = RosCodecFactory
            .writer(source(idl, Some("ros2idl")), Encoding::Cdr)
            .unwrap();
        let reader = RosCodecFactory
            .reader(source("string data\n", Some("ros2msg")), Encoding::Cdr)
            .unwrap();
        let bytes = writer.write_message(&json!({"data": "asdf"})).unwrap();
        assert_eq!(bytes, [0, 1, 0, 0, 5, 0, 0, 0, b'a', b's', b'd', b'f', 0]);
        assert_eq!(reader.read_message(&bytes).unwrap(), json!({"data": "asdf"}));
    }

    #[test]
    fn factory_rejects_unknown_schema_encoding() {
        let err = RosCodecFactory
            .reader(source("{}", Some("jsonschema")), Encoding::Cdr)
            .err()
            .unwrap();
        assert!(matches!(err, CodecError::UnsupportedSchemaEncoding(_)));
    }

    #[test]
    fn bad_schema_names_the_type() {
        let err = RosCodecFactory
            .writer(source("nope/Missing m\n", None), Encoding::Cdr)
            .err()
            .unwrap();
        match err {
            CodecError::BadSchema(msg) => assert!(msg.starts_with("std_msgs/String")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
