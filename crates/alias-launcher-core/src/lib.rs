//! Shared types and seams for the alias-launcher workspace.
//!
//! This crate holds everything the model-facing and matching crates agree on:
//!
//! - **AppRecord**: the explicit application record with load-time defaulting
//! - **AliasEncoder**: the trait seam between the sentence encoder and the
//!   matching engine (and the seam tests mock)
//! - **AppConfigStore**: the JSON-backed registry of applications
//!
//! It deliberately contains no tensor code and no model state.

pub mod config_store;
pub mod error;
pub mod traits;
pub mod types;

pub use config_store::AppConfigStore;
pub use error::{CoreError, CoreResult};
pub use traits::AliasEncoder;
pub use types::{AliasMeta, AppRecord, MatchCandidate};
