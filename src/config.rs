//! Engine configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Default number of identity-key lock stripes.
pub const DEFAULT_LOCK_STRIPES: usize = 64;

/// How secondaries of a demoted primary are re-homed after a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlattenPolicy {
    /// Repoint every member whose link is not the surviving root, during the
    /// same resolution that discovers it. Stored links always have length one.
    #[default]
    Rewrite,
    /// Only demote the former primaries. Their secondaries keep pointing at
    /// them and are picked up by the repository's flattened cluster read.
    ReadTime,
}

impl FlattenPolicy {
    /// Config spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rewrite => "rewrite",
            Self::ReadTime => "read-time",
        }
    }
}

impl fmt::Display for FlattenPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for an unknown policy name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown flatten policy {0:?} (expected 'rewrite' or 'read-time')")]
pub struct UnknownFlattenPolicy(pub String);

impl FromStr for FlattenPolicy {
    type Err = UnknownFlattenPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rewrite" => Ok(Self::Rewrite),
            "read-time" | "read_time" | "readtime" => Ok(Self::ReadTime),
            other => Err(UnknownFlattenPolicy(other.to_string())),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct EngineConfig {
    /// Link flattening behavior after merges.
    pub flatten_policy: FlattenPolicy,
    /// Number of lock stripes used to serialize resolutions that share an
    /// email or phone number. Clamped to at least one.
    pub lock_stripes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flatten_policy: FlattenPolicy::Rewrite,
            lock_stripes: DEFAULT_LOCK_STRIPES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_policy_names() {
        assert_eq!("rewrite".parse::<FlattenPolicy>().unwrap(), FlattenPolicy::Rewrite);
        assert_eq!(" Read-Time ".parse::<FlattenPolicy>().unwrap(), FlattenPolicy::ReadTime);
        assert!("lazy".parse::<FlattenPolicy>().is_err());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"flatten_policy":"read-time"}"#).unwrap();
        assert_eq!(cfg.flatten_policy, FlattenPolicy::ReadTime);
        assert_eq!(cfg.lock_stripes, DEFAULT_LOCK_STRIPES);

        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }
}
