// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use super::{CodecError, CodecFactory, Encoding, MessageReader, MessageWriter, SchemaSource};
use std::collections::HashMap;
use std::sync::Arc;

/// Cache key: one codec per (type, encoding).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CodecKey {
    type_name: String,
    encoding: Encoding,
}

/// Memoized readers and writers for one session.
///
/// Failed builds are not cached, so a later lookup retries the factory.
pub struct CodecCache {
    factory: Arc<dyn CodecFactory>,
    encoding: Encoding,
    readers: HashMap<CodecKey, Arc<dyn MessageReader>>,
    writers: HashMap<CodecKey, Arc<dyn MessageWriter>>,
}

impl CodecCache {
    pub fn new(factory: Arc<dyn CodecFactory>, encoding: Encoding) -> Self {
        Self {
            factory,
            encoding,
            readers: HashMap::new(),
            writers: HashMap::new(),
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    fn key(&self, source: &SchemaSource<'_>) -> CodecKey {
        CodecKey {
            type_name: source.name.to_string(),
            encoding: self.encoding,
        }
    }

    pub fn reader(&mut self, source: SchemaSource<'_>) -> Result<Arc<dyn MessageReader>, CodecError> {
        let key = self.key(&source);
        if let Some(reader) = self.readers.get(&key) {
            return Ok(Arc::clone(reader));
        }
        let reader = self.factory.reader(source, self.encoding)?;
        self.readers.insert(key, Arc::clone(&reader));
        Ok(reader)
    }

    pub fn writer(&mut self, source: SchemaSource<'_>) -> Result<Arc<dyn MessageWriter>, CodecError> {
        let key = self.key(&source);
        if let Some(writer) = self.writers.get(&key) {
            return Ok(Arc::clone(writer));
        }
        let writer = self.factory.writer(source, self.encoding)?;
        self.writers.insert(key, Arc::clone(&writer));
        Ok(writer)
    }

    pub fn len(&self) -> usize {
        self.readers.len() + self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for CodecCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecCache")
            .field("encoding", &self.encoding)
            .field("readers", &self.readers.len())
            .field("writers", &self.writers.len())
            .finish()
    }
}
