//! Configuration traits for validation, file loading and environment overrides

use super::{EngineConfig, Pick, SelectionPolicy, VerificationMode};
use crate::errors::{EngineError, Result};
use std::path::Path;

/// Trait for configuration validation
pub trait ConfigValidation {
    /// Validate configuration parameters
    fn validate(&self) -> Result<()>;
}

/// Trait for configuration loading and layering
pub trait ConfigLoad: Sized {
    /// Load configuration from a `.toml` or `.json` file
    fn load_from_file(path: &Path) -> Result<Self>;

    /// Apply `RONDO_*` environment overrides
    fn merge_with_env(&mut self) -> Result<()>;
}

impl ConfigValidation for EngineConfig {
    fn validate(&self) -> Result<()> {
        if self.ttl == 0 {
            return Err(EngineError::configuration("ttl must be greater than 0"));
        }
        if self.tick == 0 {
            return Err(EngineError::configuration("tick must be greater than 0"));
        }
        if self.queue_capacity == 0 {
            return Err(EngineError::configuration(
                "queue_capacity must be greater than 0",
            ));
        }
        match self.mode {
            VerificationMode::Simulation { runs: 0 } => Err(EngineError::configuration(
                "simulation runs must be greater than 0",
            )),
            VerificationMode::ModelChecking { max_runs: Some(0) } => Err(
                EngineError::configuration("model checking max_runs must be greater than 0"),
            ),
            _ => Ok(()),
        }
    }
}

impl ConfigLoad for EngineConfig {
    fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::configuration(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        let config: EngineConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content)
                .map_err(|e| EngineError::configuration(format!("Invalid TOML: {e}")))?,
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| EngineError::configuration(format!("Invalid JSON: {e}")))?,
            _ => return Err(EngineError::configuration("Unsupported file format")),
        };
        config.validate()?;
        Ok(config)
    }

    fn merge_with_env(&mut self) -> Result<()> {
        if let Ok(ttl) = std::env::var("RONDO_TTL") {
            self.ttl = ttl
                .parse()
                .map_err(|_| EngineError::configuration("Invalid number in RONDO_TTL"))?;
        }
        if let Ok(tick) = std::env::var("RONDO_TICK") {
            self.tick = tick
                .parse()
                .map_err(|_| EngineError::configuration("Invalid number in RONDO_TICK"))?;
        }
        if let Ok(seed) = std::env::var("RONDO_SEED") {
            self.seed = seed
                .parse()
                .map_err(|_| EngineError::configuration("Invalid number in RONDO_SEED"))?;
        }
        if let Ok(policy) = std::env::var("RONDO_POLICY") {
            self.policy = policy.parse::<SelectionPolicy>()?;
        }
        if let Ok(tie_break) = std::env::var("RONDO_TIE_BREAK") {
            self.tie_break = tie_break.parse::<Pick>()?;
        }
        self.validate()
    }
}
