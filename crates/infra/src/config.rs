//! Merge engine configuration.

use tracing::warn;

pub const ENV_PAGE_SIZE: &str = "CLINIC_MERGE_PAGE_SIZE";
pub const ENV_MAX_ROSTER: &str = "CLINIC_MERGE_MAX_ROSTER";
pub const ENV_REQUIRE_FRESH_TARGET: &str = "CLINIC_MERGE_REQUIRE_FRESH_TARGET";

/// Merge engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConfig {
    /// Roster page size when planning, and patients per transaction when
    /// executing. Never zero.
    page_size: usize,
    /// Absolute retrieval ceiling. Rosters above this are rejected instead of
    /// being planned partially.
    pub max_roster_size: usize,
    /// Refuse to execute a plan if the target clinic changed since planning.
    pub require_fresh_target: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            page_size: 1000,
            max_roster_size: 1_000_000,
            require_fresh_target: true,
        }
    }
}

impl MergeConfig {
    /// Load from process environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Unset keys keep their default;
    /// unparsable values are reported and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            page_size: parse_or(&lookup, ENV_PAGE_SIZE, defaults.page_size, |v| {
                v.parse::<usize>().ok().filter(|n| *n > 0)
            }),
            max_roster_size: parse_or(&lookup, ENV_MAX_ROSTER, defaults.max_roster_size, |v| {
                v.parse::<usize>().ok().filter(|n| *n > 0)
            }),
            require_fresh_target: parse_or(
                &lookup,
                ENV_REQUIRE_FRESH_TARGET,
                defaults.require_fresh_target,
                parse_bool,
            ),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_max_roster_size(mut self, max: usize) -> Self {
        self.max_roster_size = max;
        self
    }

    pub fn with_require_fresh_target(mut self, require: bool) -> Self {
        self.require_fresh_target = require;
        self
    }
}

fn parse_or<T: core::fmt::Debug>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    parse: impl Fn(&str) -> Option<T>,
) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => parse(raw.trim()).unwrap_or_else(|| {
            warn!(key, value = %raw, ?default, "invalid merge setting; using default");
            default
        }),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn unset_keys_use_defaults() {
        assert_eq!(MergeConfig::from_lookup(lookup(&[])), MergeConfig::default());
    }

    #[test]
    fn values_are_parsed() {
        let config = MergeConfig::from_lookup(lookup(&[
            (ENV_PAGE_SIZE, "250"),
            (ENV_MAX_ROSTER, "5000"),
            (ENV_REQUIRE_FRESH_TARGET, "off"),
        ]));
        assert_eq!(config.page_size(), 250);
        assert_eq!(config.max_roster_size, 5000);
        assert!(!config.require_fresh_target);
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = MergeConfig::from_lookup(lookup(&[
            (ENV_PAGE_SIZE, "0"),
            (ENV_REQUIRE_FRESH_TARGET, "maybe"),
        ]));
        assert_eq!(config.page_size(), 1000);
        assert!(config.require_fresh_target);
    }

    #[test]
    fn page_size_is_never_zero() {
        assert_eq!(MergeConfig::default().with_page_size(0).page_size(), 1);
    }
}
