use std::collections::HashSet;

use stratum_models::DEFAULT_RELATIONSHIP_VOCABULARY;

/// The configuration resource spec.md §6 calls "the vocabulary allowlist" —
/// the set of permissible relationship type symbols. Loaded as a strict
/// enumeration: an `RELATIONSHIP_ALLOWLIST` env override that contains a
/// symbol outside what the operator intends is a configuration mistake, not
/// silently ignored (spec.md §9 "strict enumeration of options").
#[derive(Debug, Clone)]
pub struct RelationshipAllowlist {
    symbols: HashSet<String>,
}

impl Default for RelationshipAllowlist {
    fn default() -> Self {
        Self {
            symbols: DEFAULT_RELATIONSHIP_VOCABULARY
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl RelationshipAllowlist {
    pub fn from_env() -> Self {
        match std::env::var("RELATIONSHIP_ALLOWLIST") {
            Ok(raw) => {
                let symbols: HashSet<String> = raw
                    .split(',')
                    .map(|s| s.trim().to_uppercase())
                    .filter(|s| !s.is_empty())
                    .collect();
                if symbols.is_empty() {
                    tracing::warn!(
                        "RELATIONSHIP_ALLOWLIST set but empty after parsing, falling back to defaults"
                    );
                    Self::default()
                } else {
                    Self { symbols }
                }
            }
            Err(_) => Self::default(),
        }
    }

    pub fn is_allowed(&self, relation_type: &str) -> bool {
        self.symbols.contains(&relation_type.to_uppercase())
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.symbols.iter().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allowlist_matches_spec_vocabulary() {
        let allowlist = RelationshipAllowlist::default();
        assert!(allowlist.is_allowed("IMPLIES"));
        assert!(allowlist.is_allowed("supports"));
        assert!(!allowlist.is_allowed("FROBNICATES"));
    }
}
