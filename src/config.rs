//! Generation settings and per-dataset presets.

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("max_tokens must be positive")]
    ZeroMaxTokens,
    #[error("temperature must be within [0, 1], got {0}")]
    Temperature(f32),
    #[error("unknown generation preset '{0}'")]
    UnknownPreset(String),
}

/// Sampling settings for one completion call. Passed by value, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl GenerationConfig {
    pub fn new(max_tokens: u32, temperature: f32) -> Result<Self, ConfigError> {
        let config = Self {
            max_tokens,
            temperature,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tokens == 0 {
            return Err(ConfigError::ZeroMaxTokens);
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ConfigError::Temperature(self.temperature));
        }
        Ok(())
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        SMALL
    }
}

const fn preset_config(max_tokens: u32) -> GenerationConfig {
    GenerationConfig {
        max_tokens,
        temperature: 0.9,
    }
}

const SMALL: GenerationConfig = preset_config(20);

/// Token budgets sized to the typical utterance length of each corpus.
/// Reasoning models need far more room for their trace before the answer.
pub const PRESETS: &[(&str, GenerationConfig)] = &[
    ("cv", preset_config(25)),
    ("wsj", preset_config(30)),
    ("swbd", preset_config(65)),
    ("atis", preset_config(45)),
    ("td", preset_config(130)),
    ("ls_clean", preset_config(100)),
    ("ls_other", preset_config(130)),
    ("lrs", preset_config(25)),
    ("chime", preset_config(30)),
    ("small", SMALL),
    ("moderate", preset_config(200)),
    ("deepseek", preset_config(2500)),
];

pub fn preset(name: &str) -> Result<GenerationConfig, ConfigError> {
    PRESETS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, c)| *c)
        .ok_or_else(|| ConfigError::UnknownPreset(name.to_string()))
}
