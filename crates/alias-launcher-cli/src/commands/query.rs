//! Model-backed commands: extraction, matching, index rebuild.

use anyhow::{Context, Result};

use alias_launcher_core::{AppConfigStore, MatchCandidate};
use alias_launcher_embeddings::{ModelConfig, ModelManager};
use alias_launcher_matcher::{EmbeddingCache, MatchingEngine};

use super::Paths;

fn load_manager(paths: &Paths) -> Result<ModelManager> {
    let model_dir = paths.model_dir()?;
    let config = ModelConfig::for_model_dir(model_dir);
    ModelManager::load(&config).context("loading the frozen model failed")
}

/// Run alias extraction and print the result.
pub fn extract(paths: &Paths, text: &str) -> Result<()> {
    let manager = load_manager(paths)?;
    println!("{}", extract_alias_or_empty(&manager, text));
    Ok(())
}

/// Rank applications for an alias phrase.
pub fn find_matches(paths: &Paths, alias: &str, k: usize) -> Result<()> {
    let manager = load_manager(paths)?;
    let store = AppConfigStore::open(&paths.apps_file);
    let mut engine = MatchingEngine::new(
        manager.encoder(),
        EmbeddingCache::open(&paths.cache_file),
    );
    engine.rebuild(store.apps())?;

    print_candidates(&engine.find_top_k(alias, k)?);
    Ok(())
}

/// Extract an alias from a command, then rank applications for it.
pub fn resolve(paths: &Paths, text: &str, k: usize) -> Result<()> {
    let manager = load_manager(paths)?;
    let alias = extract_alias_or_empty(&manager, text);
    if alias.is_empty() {
        println!("no alias recognized in {text:?}");
        return Ok(());
    }
    println!("alias: {alias}");

    let store = AppConfigStore::open(&paths.apps_file);
    let mut engine = MatchingEngine::new(
        manager.encoder(),
        EmbeddingCache::open(&paths.cache_file),
    );
    engine.rebuild(store.apps())?;

    print_candidates(&engine.find_top_k(&alias, k)?);
    Ok(())
}

/// Rebuild the match index and persist the cache.
pub fn rebuild(paths: &Paths) -> Result<()> {
    let manager = load_manager(paths)?;
    let store = AppConfigStore::open(&paths.apps_file);
    let mut engine = MatchingEngine::new(
        manager.encoder(),
        EmbeddingCache::open(&paths.cache_file),
    );
    engine.rebuild(store.apps())?;
    println!("match index rebuilt: {} alias vectors", engine.len());
    Ok(())
}

/// Generation failures are recoverable: log and report "no alias" instead
/// of taking the process down.
fn extract_alias_or_empty(manager: &ModelManager, text: &str) -> String {
    match manager.generator().extract_alias(text) {
        Ok(alias) => alias,
        Err(e) => {
            tracing::warn!(error = %e, "alias generation failed");
            String::new()
        }
    }
}

fn print_candidates(candidates: &[MatchCandidate]) {
    if candidates.is_empty() {
        println!("no candidates");
        return;
    }
    for (rank, c) in candidates.iter().enumerate() {
        println!(
            "{}. {} (alias {:?}, score {:.4}) -> {}",
            rank + 1,
            c.display_name,
            c.matched_alias,
            c.score,
            c.exe_path
        );
    }
}
