use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Tool configuration, loadable from an optional TOML file. Every value has
/// a default and can be overridden from the command line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub verifier: VerifierConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub yubikey: YubikeyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// External unlock oracle. Exit code 0 means the database opened.
    #[serde(default = "default_program")]
    pub program: String,

    /// Per-attempt timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Where sweep progress is persisted between runs.
    #[serde(default = "default_progress_file")]
    pub file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YubikeyConfig {
    /// Slots tried when --yubikey is given without an explicit list.
    #[serde(default = "default_slots")]
    pub slots: Vec<u8>,
}

fn default_program() -> String {
    "keepassxc-cli".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_progress_file() -> PathBuf {
    PathBuf::from(".recovery_progress.json")
}

fn default_slots() -> Vec<u8> {
    vec![1, 2]
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            file: default_progress_file(),
        }
    }
}

impl Default for YubikeyConfig {
    fn default() -> Self {
        Self {
            slots: default_slots(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content).context("failed to parse TOML config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.verifier.program.trim().is_empty() {
            anyhow::bail!("verifier.program must not be empty");
        }
        if self.verifier.timeout_secs == 0 {
            anyhow::bail!("verifier.timeout_secs must be >= 1");
        }
        if self.verifier.timeout_secs > 3600 {
            anyhow::bail!("verifier.timeout_secs is too high (>{}s)", 3600);
        }
        if self.yubikey.slots.is_empty() {
            anyhow::bail!("yubikey.slots must not be empty");
        }
        for &slot in &self.yubikey.slots {
            if !(1..=2).contains(&slot) {
                anyhow::bail!("yubikey slot {} out of range (1-2)", slot);
            }
        }
        Ok(())
    }
}
