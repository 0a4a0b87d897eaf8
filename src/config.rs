// src/config.rs

//! The resolved configuration shape consumed by the orchestrator.
//!
//! Loading YAML/JSON config files and validating flags isn't this engine's
//! job, only this resolved shape matters. `Config::load` is provided anyway
//! so the CLI binary has something to call; it does no more than
//! deserialize into this shape.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// A node in the sheet-mapping configuration tree: either a leaf record
/// naming the sheet to use, or a further mapping keyed by the next path
/// part. Matching against a leaf folder's path-parts tuple is
/// case-insensitive at each level, deepest match wins.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SheetMapping {
    Leaf { sheet: String },
    Node(HashMap<String, SheetMapping>),
}

/// The resolved configuration: a sheet-mapping tree plus the top-level
/// fallback sheet name used when no explicit mapping matches.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub default_sheet: String,
    #[serde(flatten)]
    pub mapping: HashMap<String, SheetMapping>,
}

impl Config {
    /// Load a resolved configuration from a YAML or JSON file, chosen by
    /// extension (`.yaml`/`.yml` -> YAML, anything else -> JSON).
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );

        if is_yaml {
            serde_yaml::from_str(&text).map_err(|e| Error::Config(format!("invalid config YAML: {e}")))
        } else {
            serde_json::from_str(&text).map_err(|e| Error::Config(format!("invalid config JSON: {e}")))
        }
    }

    /// Resolve the sheet name for a leaf folder's path-parts tuple: walk the
    /// mapping tree following `parts` case-insensitively, the deepest
    /// matching node wins; falls back to `default_sheet` when no part of the
    /// path has an explicit mapping.
    pub fn resolve_sheet(&self, parts: &[String]) -> String {
        let mut current = &self.mapping;
        let mut best = self.default_sheet.clone();
        let mut remaining = parts;

        while let Some((head, tail)) = remaining.split_first() {
            let matched = current
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(head));

            match matched {
                Some((_, SheetMapping::Leaf { sheet })) => {
                    best = sheet.clone();
                    break;
                }
                Some((_, SheetMapping::Node(next))) => {
                    current = next;
                    remaining = tail;
                }
                None => break,
            }
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        let mut sales = HashMap::new();
        sales.insert(
            "2024".to_string(),
            SheetMapping::Leaf {
                sheet: "Data".to_string(),
            },
        );
        let mut mapping = HashMap::new();
        mapping.insert("sales".to_string(), SheetMapping::Node(sales));

        Config {
            default_sheet: "Sheet1".to_string(),
            mapping,
        }
    }

    #[test]
    fn deepest_match_wins() {
        let cfg = sample_config();
        let parts = vec!["Sales".to_string(), "2024".to_string()];
        assert_eq!(cfg.resolve_sheet(&parts), "Data");
    }

    #[test]
    fn falls_back_to_default_sheet() {
        let cfg = sample_config();
        let parts = vec!["hr".to_string(), "payroll".to_string()];
        assert_eq!(cfg.resolve_sheet(&parts), "Sheet1");
    }

    #[test]
    fn matching_is_case_insensitive() {
        let cfg = sample_config();
        let parts = vec!["SALES".to_string(), "2024".to_string()];
        assert_eq!(cfg.resolve_sheet(&parts), "Data");
    }
}
