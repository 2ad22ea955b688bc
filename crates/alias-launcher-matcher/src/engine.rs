//! Match index and top-k queries.
//!
//! The engine keeps one vector per `(application, alias)` pair plus parallel
//! metadata, rebuilt wholesale from a registry snapshot whenever the
//! configuration changes. No incremental updates: with tens to low hundreds
//! of aliases, a full rebuild is cheaper than being clever, and the cache
//! absorbs the encoder cost.
//!
//! Queries score every row by inner product (cosine similarity, since both
//! sides come pre-normalized out of the encoder) and keep the best alias
//! per application.

use alias_launcher_core::{AliasEncoder, AliasMeta, AppRecord, MatchCandidate};

use crate::cache::EmbeddingCache;
use crate::error::{MatcherError, MatcherResult};

/// Alias similarity index over a registry snapshot.
pub struct MatchingEngine<E: AliasEncoder> {
    encoder: E,
    cache: EmbeddingCache,
    vectors: Vec<Vec<f32>>,
    meta: Vec<AliasMeta>,
}

impl<E: AliasEncoder> MatchingEngine<E> {
    /// Create an empty engine; call [`rebuild`](Self::rebuild) to populate.
    pub fn new(encoder: E, cache: EmbeddingCache) -> Self {
        Self {
            encoder,
            cache,
            vectors: Vec::new(),
            meta: Vec::new(),
        }
    }

    /// Number of indexed alias rows.
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Whether the index holds no rows.
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// The cache, exposed for inspection.
    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Row metadata, exposed for inspection.
    pub fn meta(&self) -> &[AliasMeta] {
        &self.meta
    }

    /// Rebuild the index from a registry snapshot.
    ///
    /// Every alias resolves through the cache first; misses are encoded and
    /// written back. The cache is persisted afterward. Callers must route
    /// mutations that reorder or shrink the application list through
    /// [`invalidate_and_rebuild`](Self::invalidate_and_rebuild) instead.
    pub fn rebuild(&mut self, apps: &[AppRecord]) -> MatcherResult<()> {
        let mut vectors = Vec::new();
        let mut meta = Vec::new();
        let mut misses = 0usize;

        for (app_index, app) in apps.iter().enumerate() {
            for alias in &app.aliases {
                let vector = match self.cache.get(app_index, alias) {
                    Some(hit) => hit.clone(),
                    None => {
                        misses += 1;
                        let vector = self.encode_one(alias)?;
                        self.cache.set(app_index, alias, vector.clone());
                        vector
                    }
                };
                vectors.push(vector);
                meta.push(AliasMeta {
                    app_index,
                    app_id: app.id.clone(),
                    display_name: app.display_name.clone(),
                    alias: alias.clone(),
                    exe_path: app.exe_path.clone(),
                });
            }
        }

        self.vectors = vectors;
        self.meta = meta;
        self.cache.save()?;
        tracing::info!(rows = self.vectors.len(), encoded = misses, "match index rebuilt");
        Ok(())
    }

    /// Clear the cache (map and file), then rebuild.
    ///
    /// The mandatory path after deleting, inserting, or reordering
    /// applications: positional cache keys from the old ordering would
    /// otherwise resolve to the wrong application's vectors.
    pub fn invalidate_and_rebuild(&mut self, apps: &[AppRecord]) -> MatcherResult<()> {
        self.cache.clear();
        self.rebuild(apps)
    }

    /// Rank applications for a query alias.
    ///
    /// Returns at most `k` candidates, one per application (its
    /// highest-scoring alias), ordered by descending score. A blank query or
    /// an empty index yields an empty list, never an error.
    pub fn find_top_k(&self, query_alias: &str, k: usize) -> MatcherResult<Vec<MatchCandidate>> {
        let query_alias = query_alias.trim();
        if query_alias.is_empty() || self.vectors.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query = self.encode_one(query_alias)?;
        if let Some(first) = self.vectors.first() {
            if first.len() != query.len() {
                // A stale cache written by a different model dimension;
                // no candidates rather than a crash.
                tracing::warn!(
                    index_dim = first.len(),
                    query_dim = query.len(),
                    "match index dimension mismatch"
                );
                return Ok(Vec::new());
            }
        }
        let scores: Vec<f32> = self.vectors.iter().map(|row| dot(row, &query)).collect();

        // Stable sort keeps metadata order among equal scores.
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

        let mut results = Vec::with_capacity(k.min(self.meta.len()));
        let mut seen_apps = Vec::new();
        for idx in order {
            let meta = &self.meta[idx];
            if seen_apps.contains(&meta.app_index) {
                continue;
            }
            seen_apps.push(meta.app_index);
            results.push(MatchCandidate {
                app_index: meta.app_index,
                app_id: meta.app_id.clone(),
                display_name: meta.display_name.clone(),
                matched_alias: meta.alias.clone(),
                exe_path: meta.exe_path.clone(),
                score: scores[idx],
            });
            if results.len() >= k {
                break;
            }
        }
        Ok(results)
    }

    fn encode_one(&self, text: &str) -> MatcherResult<Vec<f32>> {
        let mut rows = self
            .encoder
            .encode(&[text])
            .map_err(|e| MatcherError::Encode {
                source: Box::new(e),
            })?;
        if rows.len() != 1 {
            return Err(MatcherError::EncoderShape {
                expected: 1,
                got: rows.len(),
            });
        }
        Ok(rows.remove(0))
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::convert::Infallible;

    /// Deterministic encoder: hashes each text into a fixed-dimension unit
    /// vector and counts how often it runs.
    struct MockEncoder {
        calls: Cell<usize>,
    }

    impl MockEncoder {
        fn new() -> Self {
            Self { calls: Cell::new(0) }
        }

        fn calls(&self) -> usize {
            self.calls.get()
        }

        fn vector_for(text: &str) -> Vec<f32> {
            let mut row = vec![0f32; 8];
            for (i, b) in text.bytes().enumerate() {
                row[(i + b as usize) % 8] += (b % 23) as f32 + 1.0;
            }
            let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt().max(1e-12);
            row.iter_mut().for_each(|v| *v /= norm);
            row
        }
    }

    impl AliasEncoder for MockEncoder {
        type Error = Infallible;

        fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, Infallible> {
            self.calls.set(self.calls.get() + texts.len());
            Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
        }
    }

    fn app(id: &str, name: &str, aliases: &[&str]) -> AppRecord {
        let mut record = AppRecord::new(id, format!("/usr/bin/{id}"), name);
        for alias in aliases {
            record.add_alias(alias);
        }
        record
    }

    fn three_apps() -> Vec<AppRecord> {
        vec![
            app("wechat", "微信", &["weixin"]),
            app("kakao", "kakao talk", &["카카오톡"]),
            app("firefox", "Firefox", &["browser", "web"]),
        ]
    }

    fn temp_engine() -> (tempfile::TempDir, MatchingEngine<MockEncoder>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = EmbeddingCache::open(dir.path().join("embeddings.bin"));
        (dir, MatchingEngine::new(MockEncoder::new(), cache))
    }

    #[test]
    fn test_empty_index_yields_empty_results() {
        let (_dir, engine) = temp_engine();
        assert!(engine.find_top_k("anything", 3).unwrap().is_empty());
    }

    #[test]
    fn test_blank_query_yields_empty_results() {
        let (_dir, mut engine) = temp_engine();
        engine.rebuild(&three_apps()).unwrap();
        assert!(engine.find_top_k("   ", 3).unwrap().is_empty());
    }

    #[test]
    fn test_no_duplicate_applications_in_results() {
        let (_dir, mut engine) = temp_engine();
        engine.rebuild(&three_apps()).unwrap();
        let results = engine.find_top_k("browser", 10).unwrap();
        let mut ids: Vec<&str> = results.iter().map(|c| c.app_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), results.len());
    }

    #[test]
    fn test_result_count_is_min_k_distinct_apps() {
        let (_dir, mut engine) = temp_engine();
        engine.rebuild(&three_apps()).unwrap();
        assert_eq!(engine.find_top_k("web", 2).unwrap().len(), 2);
        assert_eq!(engine.find_top_k("web", 10).unwrap().len(), 3);
        assert!(engine.find_top_k("web", 0).unwrap().is_empty());
    }

    #[test]
    fn test_scores_are_inner_products_within_unit_interval() {
        let (_dir, mut engine) = temp_engine();
        engine.rebuild(&three_apps()).unwrap();
        for candidate in engine.find_top_k("카카오톡", 10).unwrap() {
            assert!(
                candidate.score >= -1.0 - 1e-5 && candidate.score <= 1.0 + 1e-5,
                "score {} outside unit interval",
                candidate.score
            );
        }
    }

    #[test]
    fn test_canonical_name_query_ranks_its_app_first() {
        let (_dir, mut engine) = temp_engine();
        engine.rebuild(&three_apps()).unwrap();
        let results = engine.find_top_k("微信", 3).unwrap();
        assert_eq!(results[0].app_id, "wechat");
        assert_eq!(results[0].matched_alias, "微信");
        assert!((results[0].score - 1.0).abs() < 1e-5);
        for other in &results[1..] {
            assert!(other.score <= results[0].score);
        }
    }

    #[test]
    fn test_rebuild_twice_is_idempotent_with_full_cache_hit() {
        let (_dir, mut engine) = temp_engine();
        let apps = three_apps();
        engine.rebuild(&apps).unwrap();
        let first_vectors = engine.vectors.clone();
        let first_meta = engine.meta.clone();
        let calls_after_first = engine.encoder.calls();

        engine.rebuild(&apps).unwrap();
        assert_eq!(engine.vectors, first_vectors);
        assert_eq!(engine.meta, first_meta);
        assert_eq!(
            engine.encoder.calls(),
            calls_after_first,
            "second rebuild must be a full cache hit"
        );
    }

    #[test]
    fn test_cache_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("embeddings.bin");
        let apps = three_apps();

        let mut engine = MatchingEngine::new(MockEncoder::new(), EmbeddingCache::open(&cache_path));
        engine.rebuild(&apps).unwrap();
        let encoded_first_run = engine.encoder.calls();
        assert!(encoded_first_run > 0);

        // Fresh process: same cache file, new engine.
        let mut engine = MatchingEngine::new(MockEncoder::new(), EmbeddingCache::open(&cache_path));
        engine.rebuild(&apps).unwrap();
        assert_eq!(engine.encoder.calls(), 0, "restart must reuse cached vectors");
    }

    #[test]
    fn test_deleting_an_app_clears_cache_before_rebuild() {
        let (_dir, mut engine) = temp_engine();
        let mut apps = three_apps();
        engine.rebuild(&apps).unwrap();
        let calls_before = engine.encoder.calls();

        // Delete index 0: every surviving app shifts down one position, so
        // every stale positional key must be dropped, not reused.
        apps.remove(0);
        engine.invalidate_and_rebuild(&apps).unwrap();

        let expected_aliases: usize = apps.iter().map(|a| a.aliases.len()).sum();
        assert_eq!(
            engine.encoder.calls() - calls_before,
            expected_aliases,
            "invalidation must force a re-encode of every remaining alias"
        );
        assert_eq!(engine.cache().len(), expected_aliases);
        for (app_index, app) in apps.iter().enumerate() {
            for alias in &app.aliases {
                assert!(engine.cache().get(app_index, alias).is_some());
            }
        }
        // No entry may survive from the old third application slot.
        assert!(engine.cache().get(2, "browser").is_none());
    }

    #[test]
    fn test_tie_scores_keep_metadata_order() {
        let (_dir, mut engine) = temp_engine();
        // Two apps sharing an identical alias text produce identical vectors
        // and therefore identical scores.
        let apps = vec![
            app("a", "editor", &[]),
            app("b", "editor two", &["editor"]),
        ];
        engine.rebuild(&apps).unwrap();
        let results = engine.find_top_k("editor", 2).unwrap();
        assert_eq!(results[0].app_id, "a");
        assert_eq!(results[1].app_id, "b");
    }
}
