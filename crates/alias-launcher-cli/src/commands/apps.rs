//! Registry management commands.
//!
//! Mutations that only append (add, alias-add) leave the embedding cache
//! alone — existing positional keys stay valid and new aliases simply miss.
//! Removing an application shifts every later index, so that path drops the
//! cache file; the next rebuild re-encodes from scratch.

use anyhow::Result;
use clap::Subcommand;

use alias_launcher_core::AppConfigStore;
use alias_launcher_matcher::EmbeddingCache;

use super::Paths;

#[derive(Subcommand)]
pub enum AppsCommand {
    /// List registered applications with their aliases.
    List,
    /// Register an application.
    Add {
        /// Stable identifier (e.g. "wechat").
        id: String,
        /// Path of the executable.
        exe_path: String,
        /// Display name, also the first alias.
        display_name: String,
    },
    /// Remove the application at an index (see `apps list`).
    Remove {
        index: usize,
    },
    /// Change display name and executable path of an application.
    Rename {
        index: usize,
        display_name: String,
        exe_path: String,
    },
    /// Add an alias to an application.
    AliasAdd {
        index: usize,
        alias: String,
    },
    /// Remove an alias from an application (the display name is kept).
    AliasRm {
        index: usize,
        alias: String,
    },
}

pub fn run(command: AppsCommand, paths: &Paths) -> Result<()> {
    let mut store = AppConfigStore::open(&paths.apps_file);

    match command {
        AppsCommand::List => {
            if store.apps().is_empty() {
                println!("no applications registered");
                return Ok(());
            }
            for (index, app) in store.apps().iter().enumerate() {
                println!(
                    "[{index}] {} ({}) -> {}",
                    app.display_name,
                    app.aliases.join(", "),
                    app.exe_path
                );
            }
            Ok(())
        }
        AppsCommand::Add {
            id,
            exe_path,
            display_name,
        } => {
            store.add_app(&id, &exe_path, &display_name);
            store.save()?;
            println!("registered {display_name}");
            Ok(())
        }
        AppsCommand::Remove { index } => {
            store.delete_app(index)?;
            store.save()?;
            // Indices shifted: stale positional cache keys must not survive
            // into the next rebuild.
            let mut cache = EmbeddingCache::open(&paths.cache_file);
            cache.clear();
            println!("removed application {index}; embedding cache cleared");
            Ok(())
        }
        AppsCommand::Rename {
            index,
            display_name,
            exe_path,
        } => {
            store.update_app(index, &display_name, &exe_path)?;
            store.save()?;
            println!("updated application {index}");
            Ok(())
        }
        AppsCommand::AliasAdd { index, alias } => {
            let added = store.add_alias(index, &alias)?;
            store.save()?;
            if added {
                println!("added alias {alias:?}");
            } else {
                println!("alias {alias:?} already present (or blank)");
            }
            Ok(())
        }
        AppsCommand::AliasRm { index, alias } => {
            let removed = store.remove_alias(index, &alias)?;
            store.save()?;
            if removed {
                println!("removed alias {alias:?}");
            } else {
                println!("alias {alias:?} not removable (display name or absent)");
            }
            Ok(())
        }
    }
}
