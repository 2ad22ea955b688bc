//! Match-index metadata and query results.

use serde::{Deserialize, Serialize};

/// Metadata for one row of the match index.
///
/// The index stores one row per `(application, alias)` pair; this record
/// remembers which pair a row belongs to. `app_index` is a *position* in the
/// application list, not a stable identifier — it goes stale whenever the
/// list is reordered or shrunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasMeta {
    /// Position of the owning application in the registry snapshot.
    pub app_index: usize,
    /// Stable id of the owning application.
    pub app_id: String,
    /// Canonical display name of the owning application.
    pub display_name: String,
    /// The alias this row's vector was computed from.
    pub alias: String,
    /// Executable path of the owning application.
    pub exe_path: String,
}

/// One ranked candidate returned by a top-k query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    /// Position of the application in the registry snapshot.
    pub app_index: usize,
    /// Stable id of the application.
    pub app_id: String,
    /// Canonical display name, for presentation.
    pub display_name: String,
    /// The alias that actually matched (highest-scoring for this app).
    pub matched_alias: String,
    /// Executable path.
    pub exe_path: String,
    /// Inner-product similarity between query and matched alias vectors.
    pub score: f32,
}
