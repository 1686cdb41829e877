use std::fs;
use std::path::{Path, PathBuf};

use cowtree::admin::{AdminOpenOptions, DemoOptions};
use cowtree::types::{Generation, PageId};
use serde::Deserialize;
use thiserror::Error;

/// Settings read from a TOML file; command-line flags override them.
#[derive(Debug, Default)]
pub struct CliConfig {
    path: Option<PathBuf>,
    data: RawConfig,
}

impl CliConfig {
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let data = match explicit.as_ref() {
            Some(config_path) if config_path.exists() => read_file(config_path)?,
            Some(config_path) => {
                return Err(ConfigError::Missing {
                    path: config_path.clone(),
                })
            }
            None => RawConfig::default(),
        };
        Ok(Self {
            path: explicit,
            data,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn log_level(&self) -> Option<&str> {
        self.data.log_level.as_deref()
    }

    /// Open options with the file's values applied over the defaults.
    pub fn open_options(&self) -> AdminOpenOptions {
        let mut opts = AdminOpenOptions::default();
        let check = &self.data.check;
        if let Some(page_size) = self.data.pager.page_size {
            opts.pager.page_size = page_size;
        }
        if let Some(stable) = check.stable_generation {
            opts.check.stable_generation = Generation(stable);
            opts.check.unstable_generation = Generation(stable).next();
            opts.generations_from_image = false;
        }
        if let Some(unstable) = check.unstable_generation {
            opts.check.unstable_generation = Generation(unstable);
            opts.generations_from_image = false;
        }
        if let Some(min) = check.min_tree_node_id {
            opts.check.min_tree_node_id = PageId(min);
        }
        if let Some(max) = check.max_findings {
            opts.max_findings = max;
        }
        opts
    }

    /// Demo settings from the `[demo]` table.
    pub fn demo_options(&self) -> DemoOptions {
        self.data.demo.clone().unwrap_or_default()
    }
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    log_level: Option<String>,
    #[serde(default)]
    pager: PagerSection,
    #[serde(default)]
    check: CheckSection,
    #[serde(default)]
    demo: Option<DemoOptions>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PagerSection {
    page_size: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CheckSection {
    stable_generation: Option<u64>,
    unstable_generation: Option<u64>,
    min_tree_node_id: Option<u64>,
    max_findings: Option<usize>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("CLI config {path} does not exist")]
    Missing { path: PathBuf },
    #[error("failed to read CLI config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse CLI config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("treecheck.toml");
        fs::write(
            &path,
            "log_level = \"debug\"\n[check]\nstable_generation = 7\nmax_findings = 3\n[demo]\nkeys = 40\n",
        )
        .expect("write config");
        let config = CliConfig::load(Some(path)).expect("load");
        let opts = config.open_options();
        assert_eq!(config.log_level(), Some("debug"));
        assert_eq!(opts.check.stable_generation, Generation(7));
        assert_eq!(opts.check.unstable_generation, Generation(8));
        assert!(!opts.generations_from_image);
        assert_eq!(opts.max_findings, 3);
        assert_eq!(config.demo_options().keys, 40);
        assert_eq!(config.demo_options().leaf_fill, DemoOptions::default().leaf_fill);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("treecheck.toml");
        fs::write(&path, "[check]\ncache_pages = 4\n").expect("write config");
        assert!(matches!(
            CliConfig::load(Some(path)),
            Err(ConfigError::Parse { .. })
        ));
    }
}
