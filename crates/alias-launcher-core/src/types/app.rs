//! Application records.
//!
//! An [`AppRecord`] is one registered application: a stable id, the path of
//! the executable, a display name, and the list of aliases a user might type.
//!
//! # Invariants
//!
//! - `display_name` is always present in `aliases` (pinned to the front)
//! - aliases are unique within a record
//! - `display_name` is never removable through alias operations
//!
//! The invariants are established once, when a record is loaded or mutated
//! through [`normalize`](AppRecord::normalize) — downstream code reads the
//! record without re-checking.

use serde::{Deserialize, Serialize};

/// One registered application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRecord {
    /// Stable identifier, unique across the registry.
    pub id: String,

    /// Path of the executable this record launches.
    #[serde(default)]
    pub exe_path: String,

    /// Human-readable canonical name. Missing values are filled in by
    /// [`normalize`](AppRecord::normalize) from the first alias or the id.
    #[serde(default)]
    pub display_name: String,

    /// All alias phrases for this application, `display_name` included.
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl AppRecord {
    /// Create a record with the display name as its only alias.
    pub fn new(id: impl Into<String>, exe_path: impl Into<String>, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        let aliases = if display_name.is_empty() {
            Vec::new()
        } else {
            vec![display_name.clone()]
        };
        Self {
            id: id.into(),
            exe_path: exe_path.into(),
            display_name,
            aliases,
        }
    }

    /// Apply the defaulting rules once, at load time.
    ///
    /// Older files may carry records with only an alias list or only an id;
    /// this fills `display_name` from the first alias (else the id), pins it
    /// to the front of `aliases`, and drops duplicate aliases while keeping
    /// first-occurrence order.
    pub fn normalize(&mut self) {
        if self.display_name.is_empty() {
            self.display_name = self
                .aliases
                .first()
                .cloned()
                .unwrap_or_else(|| self.id.clone());
        }
        if !self.display_name.is_empty() && !self.aliases.contains(&self.display_name) {
            self.aliases.insert(0, self.display_name.clone());
        }
        let mut seen = Vec::with_capacity(self.aliases.len());
        self.aliases.retain(|a| {
            if seen.contains(a) {
                false
            } else {
                seen.push(a.clone());
                true
            }
        });
    }

    /// Add an alias if it is non-blank and not already present.
    ///
    /// Returns `true` when the list changed.
    pub fn add_alias(&mut self, alias: &str) -> bool {
        let alias = alias.trim();
        if alias.is_empty() || self.aliases.iter().any(|a| a == alias) {
            return false;
        }
        self.aliases.push(alias.to_string());
        true
    }

    /// Remove an alias. The display name is refused.
    ///
    /// Returns `true` when the list changed.
    pub fn remove_alias(&mut self, alias: &str) -> bool {
        if alias == self.display_name {
            return false;
        }
        let before = self.aliases.len();
        self.aliases.retain(|a| a != alias);
        self.aliases.len() != before
    }

    /// Rename the display name, replacing the old canonical alias in place
    /// so custom aliases keep their positions.
    pub fn rename(&mut self, display_name: &str) {
        let old = std::mem::replace(&mut self.display_name, display_name.to_string());
        if let Some(slot) = self.aliases.iter_mut().find(|a| **a == old) {
            *slot = self.display_name.clone();
        } else if !self.display_name.is_empty() && !self.aliases.contains(&self.display_name) {
            self.aliases.insert(0, self.display_name.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_fills_display_name_from_first_alias() {
        let mut rec = AppRecord {
            id: "wechat".into(),
            exe_path: String::new(),
            display_name: String::new(),
            aliases: vec!["微信".into(), "weixin".into()],
        };
        rec.normalize();
        assert_eq!(rec.display_name, "微信");
        assert_eq!(rec.aliases, vec!["微信", "weixin"]);
    }

    #[test]
    fn test_normalize_falls_back_to_id() {
        let mut rec = AppRecord {
            id: "terminal".into(),
            exe_path: String::new(),
            display_name: String::new(),
            aliases: Vec::new(),
        };
        rec.normalize();
        assert_eq!(rec.display_name, "terminal");
        assert_eq!(rec.aliases, vec!["terminal"]);
    }

    #[test]
    fn test_normalize_pins_display_name_and_dedups() {
        let mut rec = AppRecord {
            id: "ff".into(),
            exe_path: String::new(),
            display_name: "Firefox".into(),
            aliases: vec!["browser".into(), "browser".into()],
        };
        rec.normalize();
        assert_eq!(rec.aliases, vec!["Firefox", "browser"]);
    }

    #[test]
    fn test_remove_alias_refuses_display_name() {
        let mut rec = AppRecord::new("ff", "/usr/bin/firefox", "Firefox");
        rec.add_alias("browser");
        assert!(!rec.remove_alias("Firefox"));
        assert!(rec.remove_alias("browser"));
        assert_eq!(rec.aliases, vec!["Firefox"]);
    }

    #[test]
    fn test_add_alias_rejects_blank_and_duplicates() {
        let mut rec = AppRecord::new("ff", "", "Firefox");
        assert!(!rec.add_alias("   "));
        assert!(rec.add_alias("browser"));
        assert!(!rec.add_alias("browser"));
    }

    #[test]
    fn test_rename_replaces_canonical_alias_in_place() {
        let mut rec = AppRecord::new("ff", "", "Firefox");
        rec.add_alias("browser");
        rec.rename("Firefox Nightly");
        assert_eq!(rec.display_name, "Firefox Nightly");
        assert_eq!(rec.aliases, vec!["Firefox Nightly", "browser"]);
    }
}
