use crate::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use testpilot_browser::BrowserOptions;
use testpilot_engine::{EngineOptions, LlmConfig};

/// Top-level run configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Name of this test run.
    pub name: String,

    /// The natural-language test instruction.
    pub instruction: String,

    /// Browser launch options.
    #[serde(default)]
    pub browser: BrowserOptions,

    /// Reasoner model and endpoint settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Execution limits.
    #[serde(default)]
    pub engine: EngineSettings,

    /// Report output settings.
    #[serde(default)]
    pub report: ReportSettings,
}

impl RunConfig {
    /// Load a run config from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse a run config from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self> {
        let config: RunConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a config for an ad-hoc instruction with default settings.
    pub fn from_instruction(instruction: impl Into<String>) -> Self {
        Self {
            name: "Ad-hoc run".to_string(),
            instruction: instruction.into(),
            browser: BrowserOptions::default(),
            llm: LlmConfig::default(),
            engine: EngineSettings::default(),
            report: ReportSettings::default(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("name is required".into()));
        }
        if self.instruction.trim().is_empty() {
            return Err(Error::Config("instruction is required".into()));
        }
        if self.engine.max_cycles == 0 {
            return Err(Error::Config("engine.max_cycles must be at least 1".into()));
        }
        Ok(())
    }
}

/// Execution limits, mapped onto [`EngineOptions`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    /// Failed verifications tolerated per action before the run fails.
    pub max_retries: u32,

    /// Hard bound on cycles per run.
    pub max_cycles: u32,

    /// Most labeled elements per screenshot.
    pub max_labels: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let defaults = EngineOptions::default();
        Self {
            max_retries: defaults.max_retries,
            max_cycles: defaults.max_cycles,
            max_labels: defaults.max_labels,
        }
    }
}

impl EngineSettings {
    pub fn to_options(&self) -> EngineOptions {
        EngineOptions {
            max_retries: self.max_retries,
            max_cycles: self.max_cycles,
            max_labels: self.max_labels,
        }
    }
}

/// Report output settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportSettings {
    /// Where to write the JSON report. Unset prints the summary only.
    pub path: Option<String>,
}
