//! End-to-end flow over the registry, cache, and engine with a
//! deterministic encoder standing in for the model.

use std::cell::Cell;
use std::convert::Infallible;

use alias_launcher_core::{AliasEncoder, AppConfigStore};
use alias_launcher_matcher::{EmbeddingCache, MatchingEngine};

/// Hash-based unit vectors; counts every encoded text.
struct StubEncoder {
    calls: Cell<usize>,
}

impl StubEncoder {
    fn new() -> Self {
        Self { calls: Cell::new(0) }
    }

    fn vector_for(text: &str) -> Vec<f32> {
        let mut row = vec![0f32; 16];
        for (i, b) in text.bytes().enumerate() {
            row[(i * 7 + b as usize) % 16] += (b % 31) as f32 + 1.0;
        }
        let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt().max(1e-12);
        row.iter_mut().for_each(|v| *v /= norm);
        row
    }
}

impl AliasEncoder for StubEncoder {
    type Error = Infallible;

    fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, Infallible> {
        self.calls.set(self.calls.get() + texts.len());
        Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
    }
}

fn seeded_store(dir: &std::path::Path) -> AppConfigStore {
    let mut store = AppConfigStore::open(dir.join("apps.json"));
    store.add_app("wechat", "C:/WeChat/WeChat.exe", "微信");
    store.add_alias(0, "weixin").unwrap();
    store.add_app("kakao", "/opt/kakao/kakaotalk", "kakao talk");
    store.add_app("firefox", "/usr/bin/firefox", "Firefox");
    store.add_alias(2, "browser").unwrap();
    store.save().unwrap();
    store
}

#[test]
fn registry_to_ranked_candidates() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path());

    let mut engine = MatchingEngine::new(
        StubEncoder::new(),
        EmbeddingCache::open(dir.path().join("app_embeddings.bin")),
    );
    engine.rebuild(store.apps()).unwrap();
    assert_eq!(engine.len(), 5);

    let results = engine.find_top_k("kakao talk", 3).unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].app_id, "kakao");
    assert_eq!(results[0].matched_alias, "kakao talk");
    assert_eq!(results[0].exe_path, "/opt/kakao/kakaotalk");
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
}

#[test]
fn delete_then_invalidate_rebuild_requeries_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = seeded_store(dir.path());

    let cache_path = dir.path().join("app_embeddings.bin");
    let mut engine = MatchingEngine::new(StubEncoder::new(), EmbeddingCache::open(&cache_path));
    engine.rebuild(store.apps()).unwrap();
    assert!(cache_path.exists());

    // Drop the first application; every surviving index shifts.
    store.delete_app(0).unwrap();
    store.save().unwrap();
    engine.invalidate_and_rebuild(store.apps()).unwrap();

    // The old index-0 aliases may not resolve anywhere anymore.
    let results = engine.find_top_k("微信", 5).unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|c| c.app_id != "wechat"));

    // Rebuilt cache has exactly the surviving aliases under new indices.
    assert_eq!(engine.cache().len(), 3);
    assert!(engine.cache().get(0, "kakao talk").is_some());
    assert!(engine.cache().get(1, "Firefox").is_some());
    assert!(engine.cache().get(1, "browser").is_some());
}

#[test]
fn restart_reuses_persisted_vectors() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path());
    let cache_path = dir.path().join("app_embeddings.bin");

    let mut engine = MatchingEngine::new(StubEncoder::new(), EmbeddingCache::open(&cache_path));
    engine.rebuild(store.apps()).unwrap();

    // "New process": fresh engine over the same cache file, borrowing the
    // encoder so call counts stay observable.
    let encoder = StubEncoder::new();
    let mut engine = MatchingEngine::new(&encoder, EmbeddingCache::open(&cache_path));
    engine.rebuild(store.apps()).unwrap();
    assert_eq!(encoder.calls.get(), 0, "rebuild must be a full cache hit");

    // Only the query itself needs encoding.
    let results = engine.find_top_k("browser", 1).unwrap();
    assert_eq!(results[0].app_id, "firefox");
    assert_eq!(encoder.calls.get(), 1);
}
