//! Content-addressed caches of transpiled shaders.
//!
//! Entries are keyed by a BLAKE3 hash of the shader type name, the source text and the
//! serialized configuration, so a lookup never needs the previous result to be
//! invalidated: any change to the inputs is a different key. Failed transpilations are
//! not cached.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tracing::debug;

use crate::config::ShaderConfig;
use crate::translate::{transpile, ShaderSource, TranspileError, TranspiledShader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(blake3::Hash);

impl CacheKey {
    pub fn new(
        source: &ShaderSource,
        type_name: &str,
        config: &ShaderConfig,
    ) -> Result<Self, TranspileError> {
        let config = serde_json::to_vec(config)?;
        let mut hasher = blake3::Hasher::new();
        for part in [type_name.as_bytes(), source.text.as_bytes(), config.as_slice()] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Ok(Self(hasher.finalize()))
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }
}

/// Where a cached lookup got its result from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    Memory,
    Transpiled,
}

#[derive(Debug)]
pub struct ShaderCacheLookup<'c> {
    pub shader: &'c TranspiledShader,
    pub source: CacheSource,
}

impl Deref for ShaderCacheLookup<'_> {
    type Target = TranspiledShader;

    fn deref(&self) -> &Self::Target {
        self.shader
    }
}

/// Cache owned by a single build.
#[derive(Debug, Default)]
pub struct ShaderCache {
    entries: HashMap<CacheKey, TranspiledShader>,
}

impl ShaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get_or_transpile(
        &mut self,
        source: &ShaderSource,
        type_name: &str,
        config: &ShaderConfig,
    ) -> Result<ShaderCacheLookup<'_>, TranspileError> {
        let key = CacheKey::new(source, type_name, config)?;
        match self.entries.entry(key) {
            Entry::Occupied(entry) => Ok(ShaderCacheLookup {
                shader: entry.into_mut(),
                source: CacheSource::Memory,
            }),
            Entry::Vacant(entry) => {
                let shader = transpile(source, type_name, config)?;
                debug!(key = %key.to_hex(), shader = type_name, "cached transpiled shader");
                Ok(ShaderCacheLookup {
                    shader: entry.insert(shader),
                    source: CacheSource::Transpiled,
                })
            }
        }
    }
}

/// Process-wide cache shared between threads. The first result stored for a key wins;
/// later callers get that same immutable value.
#[derive(Debug, Default)]
pub struct SharedShaderCache {
    entries: RwLock<HashMap<CacheKey, Arc<TranspiledShader>>>,
}

impl SharedShaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static SharedShaderCache {
        static GLOBAL: OnceLock<SharedShaderCache> = OnceLock::new();
        GLOBAL.get_or_init(SharedShaderCache::new)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<TranspiledShader>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Returns the cached shader for the inputs, transpiling outside the lock on a miss.
    pub fn get_or_transpile(
        &self,
        source: &ShaderSource,
        type_name: &str,
        config: &ShaderConfig,
    ) -> Result<(Arc<TranspiledShader>, CacheSource), TranspileError> {
        let key = CacheKey::new(source, type_name, config)?;
        if let Some(shader) = self.get(&key) {
            return Ok((shader, CacheSource::Memory));
        }

        let shader = Arc::new(transpile(source, type_name, config)?);
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match entries.entry(key) {
            // Another caller finished first.
            Entry::Occupied(entry) => Ok((Arc::clone(entry.get()), CacheSource::Memory)),
            Entry::Vacant(entry) => {
                debug!(key = %key.to_hex(), shader = type_name, "cached shared shader");
                Ok((Arc::clone(entry.insert(shader)), CacheSource::Transpiled))
            }
        }
    }
}
