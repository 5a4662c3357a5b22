//! Integration test configuration discovery.
//!
//! This module walks an integration tests directory and turns every
//! matching file into a named [`TestConfig`], respecting configured
//! extensions and excludes.

use crate::models::TestConfig;
use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Configuration for test discovery.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// File extensions that define a configuration (e.g., ["py"])
    pub extensions: Vec<String>,
    /// Directory or file names to skip (e.g., ["__pycache__", "data"])
    pub excludes: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["py".to_string()],
            excludes: vec!["__pycache__".to_string(), "data".to_string()],
        }
    }
}

impl From<&crate::config::IntegrationConfig> for DiscoveryConfig {
    fn from(config: &crate::config::IntegrationConfig) -> Self {
        Self {
            extensions: config.extensions.clone(),
            excludes: config.excludes.clone(),
        }
    }
}

/// Scanner for integration test configurations.
pub struct TestConfigScanner {
    config: DiscoveryConfig,
    tests_dir: PathBuf,
}

impl TestConfigScanner {
    /// Create a new scanner over `tests_dir`.
    pub fn new(tests_dir: PathBuf, config: DiscoveryConfig) -> Self {
        Self { config, tests_dir }
    }

    /// Find every configuration, sorted by path.
    pub fn scan(&self) -> Result<Vec<TestConfig>> {
        if !self.tests_dir.is_dir() {
            bail!(
                "Integration tests directory not found: {}",
                self.tests_dir.display()
            );
        }

        let mut configs = Vec::new();
        let walker = WalkDir::new(&self.tests_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !self.is_excluded(entry));

        for entry in walker {
            let entry = entry.with_context(|| {
                format!("Failed to walk {}", self.tests_dir.display())
            })?;

            if entry.file_type().is_file() && self.matches(entry.path()) {
                if let Some(config) = to_test_config(entry.path()) {
                    debug!("Discovered test configuration {}", config);
                    configs.push(config);
                }
            }
        }

        check_unique_names(&configs)?;
        Ok(configs)
    }

    /// Check if a file has one of the configured extensions.
    pub fn matches(&self, path: &Path) -> bool {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        self.config.extensions.iter().any(|e| e == ext)
    }

    /// Hidden and private (`_`-prefixed) names are always skipped.
    fn is_excluded(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();

        if name.starts_with('.') || name.starts_with('_') {
            return true;
        }

        self.config.excludes.iter().any(|pattern| name == pattern.as_str())
    }
}

fn to_test_config(path: &Path) -> Option<TestConfig> {
    let name = path.file_stem()?.to_str()?.to_string();
    Some(TestConfig {
        name,
        filepath: path.to_path_buf(),
    })
}

/// Output directories are keyed by configuration name, so names must not
/// collide.
fn check_unique_names(configs: &[TestConfig]) -> Result<()> {
    let mut seen: HashMap<&str, &Path> = HashMap::new();

    for config in configs {
        if let Some(previous) = seen.insert(&config.name, &config.filepath) {
            bail!(
                "Duplicate test configuration name '{}': {} and {}",
                config.name,
                previous.display(),
                config.filepath.display()
            );
        }
    }

    Ok(())
}

/// Discover the integration test configurations under `tests_dir`.
pub fn discover_tests(tests_dir: &Path, config: &DiscoveryConfig) -> Result<Vec<TestConfig>> {
    TestConfigScanner::new(tests_dir.to_path_buf(), config.clone()).scan()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, rel: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn test_discovers_configs_sorted_by_path() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "zeta_tests.py");
        touch(dir.path(), "alpha_tests.py");
        touch(dir.path(), "nested/beta_tests.py");
        touch(dir.path(), "README.md");

        let configs = discover_tests(dir.path(), &DiscoveryConfig::default()).unwrap();
        let names: Vec<_> = configs.iter().map(|c| c.name.as_str()).collect();

        assert_eq!(names, vec!["alpha_tests", "beta_tests", "zeta_tests"]);
        assert_eq!(configs[1].filepath, dir.path().join("nested/beta_tests.py"));
    }

    #[test]
    fn test_skips_private_hidden_and_excluded() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "__init__.py");
        touch(dir.path(), "_helpers.py");
        touch(dir.path(), ".hidden.py");
        touch(dir.path(), "__pycache__/cached.py");
        touch(dir.path(), "data/fixture.py");
        touch(dir.path(), "real.py");

        let configs = discover_tests(dir.path(), &DiscoveryConfig::default()).unwrap();

        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].name, "real");
    }

    #[test]
    fn test_custom_extensions() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "one.yaml");
        touch(dir.path(), "two.py");

        let config = DiscoveryConfig {
            extensions: vec!["yaml".to_string()],
            excludes: Vec::new(),
        };
        let configs = discover_tests(dir.path(), &config).unwrap();

        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].name, "one");
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a/smoke.py");
        touch(dir.path(), "b/smoke.py");

        let err = discover_tests(dir.path(), &DiscoveryConfig::default()).unwrap_err();
        assert!(err.to_string().contains("Duplicate test configuration name 'smoke'"));
    }

    #[test]
    fn test_missing_directory() {
        let dir = TempDir::new().unwrap();
        let result = discover_tests(&dir.path().join("nope"), &DiscoveryConfig::default());
        assert!(result.is_err());
    }
}
