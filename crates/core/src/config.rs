//! Accelerator configuration via `accel.toml`
//!
//! The surrounding database supplies an `AcceleratorConfig` in memory; the
//! TOML helpers let it keep that config next to its other settings.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AccelError, AccelResult};
use crate::types::BackendKind;

/// Config file name placed in the database data directory.
pub const CONFIG_FILE_NAME: &str = "accel.toml";

/// Accelerator configuration
///
/// # Example
///
/// ```toml
/// enabled = true
/// fallback_on_error = true
/// # preferred_backend = "cuda"
/// normalize_on_sync = true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceleratorConfig {
    /// Try to initialize a GPU backend at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Degrade to the CPU path when GPU initialization fails instead of
    /// returning the error from `Accelerator::new`.
    #[serde(default = "default_true")]
    pub fallback_on_error: bool,
    /// Backend to try before the platform's default probe order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_backend: Option<BackendKind>,
    /// L2-normalize the GPU mirror at sync time and score by dot product.
    /// The CPU scorer then rounds the same way, so results do not reorder
    /// when an index syncs.
    #[serde(default = "default_true")]
    pub normalize_on_sync: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fallback_on_error: true,
            preferred_backend: None,
            normalize_on_sync: true,
        }
    }
}

impl AcceleratorConfig {
    /// Config that never touches a GPU.
    pub fn cpu_only() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Config that fails construction when no GPU can be initialized.
    pub fn strict() -> Self {
        Self {
            fallback_on_error: false,
            ..Self::default()
        }
    }

    /// Set the backend to try first.
    pub fn with_preferred_backend(mut self, backend: BackendKind) -> Self {
        self.preferred_backend = Some(backend);
        self
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Strata vector acceleration configuration
#
# Try to initialize a GPU backend (default: true)
enabled = true

# When GPU initialization fails, serve every query on the CPU instead of
# failing startup (default: true)
fallback_on_error = true

# Backend to try first: "cuda", "metal" or "opencl".
# Omit to use the platform order (macOS: metal, opencl; others: cuda, opencl).
# preferred_backend = "cuda"

# Normalize vectors on the GPU at sync time and score by dot product.
# CPU searches use the same arithmetic either way (default: true)
normalize_on_sync = true
"#
    }

    /// Parse config from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AccelError::Config` if the string is not valid config TOML.
    pub fn from_toml_str(content: &str) -> AccelResult<Self> {
        toml::from_str(content)
            .map_err(|e| AccelError::Config(format!("Failed to parse accelerator config: {}", e)))
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> AccelResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AccelError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&content).map_err(|e| {
            AccelError::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> AccelResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                AccelError::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> AccelResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| AccelError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            AccelError::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_enables_gpu_with_fallback() {
        let config = AcceleratorConfig::default();
        assert!(config.enabled);
        assert!(config.fallback_on_error);
        assert!(config.normalize_on_sync);
        assert!(config.preferred_backend.is_none());
    }

    #[test]
    fn default_toml_parses_to_default() {
        let config = AcceleratorConfig::from_toml_str(AcceleratorConfig::default_toml()).unwrap();
        assert_eq!(config, AcceleratorConfig::default());
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config = AcceleratorConfig::from_toml_str("").unwrap();
        assert_eq!(config, AcceleratorConfig::default());
    }

    #[test]
    fn parse_preferred_backend() {
        let config =
            AcceleratorConfig::from_toml_str("preferred_backend = \"opencl\"").unwrap();
        assert_eq!(config.preferred_backend, Some(BackendKind::OpenCl));
    }

    #[test]
    fn parse_unknown_backend_returns_error() {
        let err = AcceleratorConfig::from_toml_str("preferred_backend = \"glide\"").unwrap_err();
        assert!(matches!(err, AccelError::Config(_)));
    }

    #[test]
    fn cpu_only_and_strict() {
        assert!(!AcceleratorConfig::cpu_only().enabled);
        let strict = AcceleratorConfig::strict();
        assert!(strict.enabled);
        assert!(!strict.fallback_on_error);
    }

    #[test]
    fn write_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        std::fs::write(&path, "enabled = false\n").unwrap();
        AcceleratorConfig::write_default_if_missing(&path).unwrap();

        let config = AcceleratorConfig::from_file(&path).unwrap();
        assert!(!config.enabled);
    }

    #[test]
    fn write_default_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert!(!path.exists());

        AcceleratorConfig::write_default_if_missing(&path).unwrap();
        assert!(path.exists());
        assert_eq!(
            AcceleratorConfig::from_file(&path).unwrap(),
            AcceleratorConfig::default()
        );
    }

    #[test]
    fn write_to_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let config = AcceleratorConfig {
            enabled: true,
            fallback_on_error: false,
            preferred_backend: Some(BackendKind::Cuda),
            normalize_on_sync: false,
        };
        config.write_to_file(&path).unwrap();

        let loaded = AcceleratorConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn from_file_missing_path_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = AcceleratorConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, AccelError::Config(_)));
    }
}
