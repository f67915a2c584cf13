// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Ordered list of config file locations searched from lowest to highest priority.
/// Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/bosun/config.yaml"));
        paths.push(home.join(".config/bosun/config.yml"));
    }
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("bosun/config.yaml"));
        paths.push(cfg.join("bosun/config.yml"));
    }

    // Workspace-local
    paths.push(PathBuf::from(".bosun/config.yaml"));
    paths.push(PathBuf::from(".bosun/config.yml"));
    paths.push(PathBuf::from("bosun.yaml"));
    paths.push(PathBuf::from("bosun.yml"));

    paths
}

/// Load configuration by merging all discovered YAML files.
/// The `extra` argument may provide an explicit path supplied by the host.
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            merge_yaml(&mut merged, read_layer(&path)?);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        merge_yaml(&mut merged, read_layer(p)?);
    }

    // Deserialize the merged YAML value into Config, falling back to defaults
    // when the merged value is empty (no config files found).
    let config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty()) {
        Config::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };
    Ok(config)
}

/// Load configuration from a single explicit file, ignoring the search path.
pub fn load_from(path: &Path) -> anyhow::Result<Config> {
    let layer = read_layer(path)?;
    serde_yaml::from_value(layer).with_context(|| format!("decoding {}", path.display()))
}

fn read_layer(path: &Path) -> anyhow::Result<serde_yaml::Value> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                match d.get_mut(&k) {
                    Some(existing) => merge_yaml(existing, v),
                    None => {
                        d.insert(k, v);
                    }
                }
            }
        }
        (d, s) => *d = s,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_from_explicit_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "tasks:\n  max_depth: 4\n").unwrap();
        let c = load_from(&path).unwrap();
        assert_eq!(c.tasks.max_depth, 4);
        // untouched sections keep their defaults
        assert!(c.compaction.enabled);
    }

    #[test]
    fn load_from_missing_file_is_error() {
        assert!(load_from(Path::new("/nonexistent/bosun.yaml")).is_err());
    }

    #[test]
    fn load_from_invalid_yaml_is_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("bad.yaml");
        std::fs::write(&path, ": not yaml [").unwrap();
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn merge_yaml_nested_scalar_override() {
        let mut dst: serde_yaml::Value =
            serde_yaml::from_str("compaction:\n  enabled: true\n  reserve_tokens: 100\n").unwrap();
        let src: serde_yaml::Value = serde_yaml::from_str("compaction:\n  enabled: false\n").unwrap();
        merge_yaml(&mut dst, src);
        let c: Config = serde_yaml::from_value(dst).unwrap();
        assert!(!c.compaction.enabled);
        assert_eq!(c.compaction.reserve_tokens, 100);
    }
}
