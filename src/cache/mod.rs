//! Exported talks, addressable by voice name and text prefix.

use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::audio::ExportFormat;

/// Characters of the talk text that take part in the cache key
pub const KEY_TEXT_PREFIX: usize = 32;

/// Replaces characters that are not allowed in file names with `_`
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            ':' | '<' | '>' | '|' | '*' | '?' | '\\' => '_',
            other => other,
        })
        .collect()
}

/// Cache key and artifact file name of a talk.
///
/// Only the voice name and the first 32 characters of the text identify a
/// talk; parameter values are not part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(voice_name: &str, text: &str, format: ExportFormat) -> Self {
        // substring first, then sanitize: existing artifacts were named this way
        let prefix: String = text.chars().take(KEY_TEXT_PREFIX).collect();
        CacheKey(sanitize_file_name(&format!(
            "{}-{}{}",
            voice_name,
            prefix,
            format.extension()
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored audio artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedClip {
    pub key: CacheKey,
    pub path: PathBuf,
}

/// Key/value surface over exported artifacts.
/// Implementations know nothing about sessions or synthesis.
pub trait CacheStore {
    fn exists(&self, key: &CacheKey) -> bool;

    fn load(&self, key: &CacheKey) -> Option<CachedClip>;

    fn store(&mut self, key: &CacheKey, artifact: &[u8]) -> Result<CachedClip>;

    /// Where the artifact for `key` lives (or will live once exported)
    fn artifact_path(&self, key: &CacheKey) -> PathBuf;

    /// Makes sure exports into this store can be written
    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Cache backed by a single directory, one file per key
#[derive(Debug, Clone)]
pub struct DirCacheStore {
    root: PathBuf,
}

impl DirCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl CacheStore for DirCacheStore {
    fn exists(&self, key: &CacheKey) -> bool {
        self.artifact_path(key).is_file()
    }

    fn load(&self, key: &CacheKey) -> Option<CachedClip> {
        let path = self.artifact_path(key);
        path.is_file().then(|| CachedClip {
            key: key.clone(),
            path,
        })
    }

    fn store(&mut self, key: &CacheKey, artifact: &[u8]) -> Result<CachedClip> {
        self.prepare()?;
        let path = self.artifact_path(key);
        std::fs::write(&path, artifact)
            .with_context(|| format!("Failed to write cache artifact {}", path.display()))?;
        Ok(CachedClip {
            key: key.clone(),
            path,
        })
    }

    fn artifact_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    fn prepare(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create cache directory {}", self.root.display()))
    }
}
