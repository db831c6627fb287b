use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// How a collection's items map onto shard files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardPolicy {
    /// One `.ajson` file for the whole collection.
    #[default]
    Single,
    /// One `.ajson` file per top-level key (blocks share their
    /// source's shard).
    PerTopKey,
}

/// Tuning for a collection's persistence behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub shard_policy: ShardPolicy,
    /// Trailing-edge debounce before a queued save fires.
    #[serde(default = "default_save_delay_ms")]
    pub save_delay_ms: u64,
    /// Minimum gap between two flush passes on the same shard;
    /// passes triggered inside the window are coalesced.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// A full-file rewrite must retain at least this fraction of the
    /// previous file's bytes to commit. One policy for the whole
    /// store: 0.5.
    #[serde(default = "default_min_retention")]
    pub min_retention: f64,
}

fn default_save_delay_ms() -> u64 {
    1_000
}
fn default_cooldown_ms() -> u64 {
    100
}
fn default_min_retention() -> f64 {
    0.5
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            shard_policy: ShardPolicy::default(),
            save_delay_ms: default_save_delay_ms(),
            cooldown_ms: default_cooldown_ms(),
            min_retention: default_min_retention(),
        }
    }
}

/// Load a [`StoreConfig`] from a TOML file.
pub fn load_config(path: &Path) -> Result<StoreConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: StoreConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: StoreConfig = toml::from_str("").unwrap();
        assert_eq!(config.shard_policy, ShardPolicy::Single);
        assert_eq!(config.save_delay_ms, 1_000);
        assert_eq!(config.cooldown_ms, 100);
        assert!((config.min_retention - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_overrides() {
        let config: StoreConfig = toml::from_str(
            r#"
shard_policy = "per_top_key"
save_delay_ms = 250
min_retention = 0.5
"#,
        )
        .unwrap();
        assert_eq!(config.shard_policy, ShardPolicy::PerTopKey);
        assert_eq!(config.save_delay_ms, 250);
    }
}
