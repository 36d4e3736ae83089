//! Stack configuration
//!
//! All parameters are fixed for the lifetime of a stack. Configuration can be
//! built in code, parsed from TOML, or adjusted from the environment.
//!
//! # Example
//!
//! ```toml
//! root = "/var/spool/ingest"
//! bundle_size = 1000
//! format = "bincode"
//! prefix = "events"
//! skip_on_error = false
//! ```

use crate::codec::Format;
use crate::error::{Result, StackError};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Default number of values per bundle
pub const DEFAULT_BUNDLE_SIZE: usize = 500;

/// Default bundle file name prefix
pub const DEFAULT_PREFIX: &str = "stack";

/// Environment variable overriding the bundle size
pub const ENV_BUNDLE_SIZE: &str = "SSTACK_BUNDLE_SIZE";

/// Environment variable overriding the format
pub const ENV_FORMAT: &str = "SSTACK_FORMAT";

/// Environment variable overriding the prefix
pub const ENV_PREFIX: &str = "SSTACK_PREFIX";

fn default_bundle_size() -> usize {
    DEFAULT_BUNDLE_SIZE
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_skip_on_error() -> bool {
    true
}

/// Configuration for a single spooling stack
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StackConfig {
    /// Directory holding this stack's bundles
    pub root: PathBuf,

    /// Values per bundle; spilling starts once the buffer exceeds this
    #[serde(default = "default_bundle_size")]
    pub bundle_size: usize,

    /// Bundle encoding
    #[serde(default)]
    pub format: Format,

    /// Bundle file name prefix (`<prefix>.<index>`)
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Error policy for automatic spills triggered by `push`.
    ///
    /// When true, values that fail to serialize are dropped (and logged)
    /// instead of failing the push.
    #[serde(default = "default_skip_on_error")]
    pub skip_on_error: bool,
}

impl StackConfig {
    /// Create a configuration with defaults for everything but the root
    pub fn new(root: impl Into<PathBuf>) -> Self {
        StackConfig {
            root: root.into(),
            bundle_size: DEFAULT_BUNDLE_SIZE,
            format: Format::default(),
            prefix: default_prefix(),
            skip_on_error: true,
        }
    }

    pub fn with_bundle_size(mut self, bundle_size: usize) -> Self {
        self.bundle_size = bundle_size;
        self
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_skip_on_error(mut self, skip_on_error: bool) -> Self {
        self.skip_on_error = skip_on_error;
        self
    }

    /// Same parameters, different root directory
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Check that the configuration can drive a stack
    ///
    /// The prefix must be a plain file name component: non-empty and free
    /// of path separators.
    pub fn validate(&self) -> Result<()> {
        if self.bundle_size == 0 {
            return Err(StackError::Config(
                "bundle_size must be at least 1".to_string(),
            ));
        }
        if self.prefix.is_empty() {
            return Err(StackError::Config("prefix cannot be empty".to_string()));
        }
        if self.prefix.contains(['/', '\\']) {
            return Err(StackError::Config(format!(
                "prefix '{}' cannot contain path separators",
                self.prefix
            )));
        }
        if self.root.as_os_str().is_empty() {
            return Err(StackError::Config("root cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: StackConfig = toml::from_str(toml_str)
            .map_err(|e| StackError::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Apply `SSTACK_BUNDLE_SIZE`, `SSTACK_FORMAT` and `SSTACK_PREFIX`
    /// overrides when they are set
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(size) = std::env::var(ENV_BUNDLE_SIZE) {
            self.bundle_size = size.trim().parse().map_err(|_| {
                StackError::Config(format!("{}='{}' is not a valid size", ENV_BUNDLE_SIZE, size))
            })?;
        }
        if let Ok(format) = std::env::var(ENV_FORMAT) {
            self.format = format.parse()?;
        }
        if let Ok(prefix) = std::env::var(ENV_PREFIX) {
            self.prefix = prefix;
        }
        self.validate()?;
        Ok(self)
    }
}
