//! Disk-persisted embedding cache.
//!
//! Keys are `(app_index, alias)` pairs: the position of the application in
//! the registry snapshot plus the alias string. The positional key is the
//! whole reason [`clear`](EmbeddingCache::clear) exists: any mutation that
//! reorders or shrinks the application list silently re-addresses every
//! cached vector, so such mutations must clear the cache before the next
//! rebuild.
//!
//! # On-disk format
//!
//! A single little-endian binary file:
//!
//! ```text
//! magic "ALC1"
//! u32 entry count
//! per entry: u32 app_index | u32 alias byte length | alias utf-8 bytes
//!            | u32 dim | dim × f32
//! ```
//!
//! An empty cache is represented by the *absence* of the file; saving an
//! empty map deletes it. A corrupt or missing file loads as empty; every
//! vector is recomputable, so cache trouble costs latency, never
//! correctness.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{MatcherError, MatcherResult};

const CACHE_MAGIC: &[u8; 4] = b"ALC1";

/// Persistent `(app_index, alias) → vector` store.
#[derive(Debug)]
pub struct EmbeddingCache {
    path: PathBuf,
    entries: HashMap<(usize, String), Vec<f32>>,
}

impl EmbeddingCache {
    /// Open the cache at `path` and load whatever is there.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let mut cache = Self {
            path: path.into(),
            entries: HashMap::new(),
        };
        cache.load();
        cache
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of cached vectors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up the vector for one `(app_index, alias)` pair.
    pub fn get(&self, app_index: usize, alias: &str) -> Option<&Vec<f32>> {
        self.entries.get(&(app_index, alias.to_string()))
    }

    /// Insert or replace the vector for one pair.
    pub fn set(&mut self, app_index: usize, alias: &str, vector: Vec<f32>) {
        self.entries.insert((app_index, alias.to_string()), vector);
    }

    /// Drop every entry and remove the backing file.
    ///
    /// Call this whenever application indices may have shifted, before the
    /// next rebuild. Stale positional keys would hand the wrong vector to
    /// the wrong application.
    pub fn clear(&mut self) {
        self.entries.clear();
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "could not remove cache file");
            }
        }
    }

    /// Reload from disk, replacing the in-memory map.
    pub fn load(&mut self) {
        self.entries = match std::fs::read(&self.path) {
            Ok(bytes) => match decode_entries(&bytes) {
                Some(entries) => entries,
                None => {
                    tracing::warn!(path = %self.path.display(), "cache file corrupt, starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
    }

    /// Persist the map. An empty map deletes the file so "no cache" and
    /// "empty cache" are indistinguishable at rest.
    pub fn save(&self) -> MatcherResult<()> {
        if self.entries.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path).map_err(|e| MatcherError::CacheIo {
                    path: self.path.display().to_string(),
                    source: e,
                })?;
            }
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MatcherError::CacheIo {
                path: parent.display().to_string(),
                source: e,
            })?;
        }

        let bytes = encode_entries(&self.entries);
        let tmp = self.path.with_extension("bin.tmp");
        std::fs::write(&tmp, &bytes).map_err(|e| MatcherError::CacheIo {
            path: tmp.display().to_string(),
            source: e,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            MatcherError::CacheIo {
                path: self.path.display().to_string(),
                source: e,
            }
        })
    }
}

fn encode_entries(entries: &HashMap<(usize, String), Vec<f32>>) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(CACHE_MAGIC);
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for ((app_index, alias), vector) in entries {
        out.extend_from_slice(&(*app_index as u32).to_le_bytes());
        let alias_bytes = alias.as_bytes();
        out.extend_from_slice(&(alias_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(alias_bytes);
        out.extend_from_slice(&(vector.len() as u32).to_le_bytes());
        for v in vector {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    out
}

fn decode_entries(bytes: &[u8]) -> Option<HashMap<(usize, String), Vec<f32>>> {
    if bytes.len() < 8 || &bytes[0..4] != CACHE_MAGIC {
        return None;
    }
    let count = u32::from_le_bytes(bytes[4..8].try_into().ok()?) as usize;
    let mut pos = 8usize;
    let mut entries = HashMap::with_capacity(count);

    let read_u32 = |bytes: &[u8], pos: &mut usize| -> Option<u32> {
        let end = pos.checked_add(4)?;
        let val = u32::from_le_bytes(bytes.get(*pos..end)?.try_into().ok()?);
        *pos = end;
        Some(val)
    };

    for _ in 0..count {
        let app_index = read_u32(bytes, &mut pos)? as usize;
        let alias_len = read_u32(bytes, &mut pos)? as usize;
        let end = pos.checked_add(alias_len)?;
        let alias = std::str::from_utf8(bytes.get(pos..end)?).ok()?.to_string();
        pos = end;
        let dim = read_u32(bytes, &mut pos)? as usize;
        let mut vector = Vec::with_capacity(dim);
        for _ in 0..dim {
            let end = pos.checked_add(4)?;
            vector.push(f32::from_le_bytes(bytes.get(pos..end)?.try_into().ok()?));
            pos = end;
        }
        entries.insert((app_index, alias), vector);
    }
    if pos != bytes.len() {
        return None;
    }
    Some(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_cache() -> (tempfile::TempDir, EmbeddingCache) {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = EmbeddingCache::open(dir.path().join("embeddings.bin"));
        (dir, cache)
    }

    #[test]
    fn test_round_trip_exact_keys_and_vectors() {
        let (_dir, mut cache) = temp_cache();
        cache.set(0, "微信", vec![0.25, -0.5, 1.0]);
        cache.set(0, "weixin", vec![0.1, 0.2, 0.3]);
        cache.set(2, "kakao talk", vec![-1.0, 0.0, 0.5]);
        cache.save().unwrap();

        let reloaded = EmbeddingCache::open(cache.path().to_path_buf());
        assert_eq!(reloaded.len(), 3);
        assert_eq!(reloaded.get(0, "微信"), Some(&vec![0.25, -0.5, 1.0]));
        assert_eq!(reloaded.get(0, "weixin"), Some(&vec![0.1, 0.2, 0.3]));
        assert_eq!(reloaded.get(2, "kakao talk"), Some(&vec![-1.0, 0.0, 0.5]));
    }

    #[test]
    fn test_empty_save_deletes_file() {
        let (_dir, mut cache) = temp_cache();
        cache.set(0, "a", vec![1.0]);
        cache.save().unwrap();
        assert!(cache.path().exists());

        let mut cache = EmbeddingCache::open(cache.path().to_path_buf());
        cache.clear();
        cache.save().unwrap();
        assert!(!cache.path().exists());
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings.bin");
        std::fs::write(&path, b"not a cache at all").unwrap();
        let cache = EmbeddingCache::open(path);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_truncated_file_loads_empty() {
        let (_dir, mut cache) = temp_cache();
        cache.set(0, "alias", vec![1.0, 2.0, 3.0]);
        cache.save().unwrap();

        let bytes = std::fs::read(cache.path()).unwrap();
        std::fs::write(cache.path(), &bytes[..bytes.len() - 5]).unwrap();
        let cache = EmbeddingCache::open(cache.path().to_path_buf());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_removes_file() {
        let (_dir, mut cache) = temp_cache();
        cache.set(1, "b", vec![0.5]);
        cache.save().unwrap();
        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.path().exists());
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let (_dir, cache) = temp_cache();
        assert!(cache.is_empty());
    }
}
