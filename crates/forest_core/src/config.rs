//! Configuration for code generation, the C toolchain and verification

use crate::codegen::CodegenOptions;
use crate::errors::{ForestError, Result};
use crate::toolchain::ToolchainConfig;
use crate::verify::{Tolerance, VerificationHarness, DEFAULT_ATOL, DEFAULT_RTOL};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Seed used for fixture sampling when none is configured
pub const DEFAULT_SEED: u64 = 22;

/// forestgen configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    /// Code generation configuration
    pub codegen: CodegenOptions,
    /// C toolchain configuration
    pub toolchain: ToolchainConfig,
    /// Verification configuration
    pub verification: VerificationConfig,
}

/// Verification configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Relative tolerance
    pub rtol: f64,
    /// Absolute tolerance
    pub atol: f64,
    /// Number of fixture pairs to check, all of them when unset
    pub sample_size: Option<usize>,
    /// Sampling seed
    pub seed: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            rtol: DEFAULT_RTOL,
            atol: DEFAULT_ATOL,
            sample_size: None,
            seed: DEFAULT_SEED,
        }
    }
}

impl ForestConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ForestConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(|e| {
            ForestError::InvalidConfig(format!("Failed to serialize config: {}", e))
        })?;
        std::fs::write(path, content)?;
        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.codegen.validate()?;
        self.toolchain.validate()?;
        self.tolerance()?;
        if self.verification.sample_size == Some(0) {
            return Err(ForestError::InvalidConfig(
                "sample_size must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tolerance(&self) -> Result<Tolerance> {
        Tolerance::new(self.verification.rtol, self.verification.atol)
    }

    pub fn harness(&self) -> Result<VerificationHarness> {
        Ok(VerificationHarness::new(
            self.tolerance()?,
            self.verification.sample_size,
            self.verification.seed,
        ))
    }
}
