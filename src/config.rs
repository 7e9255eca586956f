//! Engine configuration
//!
//! All engine entry points receive an explicit [`EngineConfig`]; there is no
//! process-wide mutable default. The cache root resolves in order:
//! explicit `cache_root` field, the `RUSTY_DEFLATOR_CACHE_DIR` environment
//! variable, then the platform user-cache directory.

use crate::error::{DeflateError, Result};
use std::path::PathBuf;

/// Environment variable naming an override cache directory.
pub const CACHE_DIR_ENV: &str = "RUSTY_DEFLATOR_CACHE_DIR";

/// Subdirectory under the platform cache directory.
const CACHE_DIR_NAME: &str = "rusty_deflator";

/// Configuration carried by a [`crate::api::Session`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Explicit cache root. Takes precedence over the environment variable
    /// and the platform default.
    pub cache_root: Option<PathBuf>,
    /// Validate canonical tables when sources load. On by default.
    pub validate: bool,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            cache_root: None,
            validate: true,
        }
    }

    /// Set an explicit cache root
    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = Some(root.into());
        self
    }

    /// Disable canonical-table validation
    pub fn without_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    /// Resolve the cache root directory: explicit override, then the
    /// environment variable, then the platform user-cache directory.
    pub fn resolve_cache_root(&self) -> Result<PathBuf> {
        if let Some(root) = &self.cache_root {
            return Ok(root.clone());
        }
        if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
            if !dir.is_empty() {
                return Ok(PathBuf::from(dir));
            }
        }
        dirs::cache_dir()
            .map(|d| d.join(CACHE_DIR_NAME))
            .ok_or_else(|| {
                DeflateError::Cache("no platform cache directory available".to_string())
            })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_root_wins() {
        let config = EngineConfig::new().with_cache_root("/tmp/deflator-test");
        let root = config.resolve_cache_root().unwrap();
        assert_eq!(root, PathBuf::from("/tmp/deflator-test"));
    }

    #[test]
    fn test_default_flags() {
        let config = EngineConfig::default();
        assert!(config.validate);
        assert!(config.cache_root.is_none());
    }
}
