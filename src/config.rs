use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::memory::WindowSettings;
use crate::orchestration::{RetryPolicy, RunnerTimeouts, SynthesisTimeouts};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Task invocations allowed in flight at once.
    pub max_concurrency: usize,
    /// Retries per task after the first attempt.
    pub max_retries: u32,
    /// Retries of the synthesis stage after its first draft.
    pub synthesis_max_retries: u32,
    pub memory: MemoryConfig,
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Live records per window before summarization.
    pub threshold: usize,
    /// Records kept live after summarization.
    pub retained_tail: usize,
    /// Recent records shown to the intent step.
    pub intent_window: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub worker_secs: u64,
    pub validator_secs: u64,
    pub summarizer_secs: u64,
    pub intent_secs: u64,
    pub synthesizer_secs: u64,
    pub decomposer_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_retries: 3,
            synthesis_max_retries: 3,
            memory: MemoryConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            retained_tail: 5,
            intent_window: 5,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            worker_secs: 600,
            validator_secs: 120,
            summarizer_secs: 60,
            intent_secs: 30,
            synthesizer_secs: 600,
            decomposer_secs: 120,
        }
    }
}

impl TimeoutConfig {
    pub fn worker(&self) -> Duration {
        Duration::from_secs(self.worker_secs)
    }

    pub fn validator(&self) -> Duration {
        Duration::from_secs(self.validator_secs)
    }

    pub fn summarizer(&self) -> Duration {
        Duration::from_secs(self.summarizer_secs)
    }

    pub fn intent(&self) -> Duration {
        Duration::from_secs(self.intent_secs)
    }

    pub fn synthesizer(&self) -> Duration {
        Duration::from_secs(self.synthesizer_secs)
    }

    pub fn decomposer(&self) -> Duration {
        Duration::from_secs(self.decomposer_secs)
    }
}

impl EngineConfig {
    pub fn tessera_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".tessera"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::tessera_dir()?.join("tessera.toml"))
    }

    /// Load from the default location, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "EngineConfig::load");
        if !path.exists() {
            debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        debug!(
            max_concurrency = config.max_concurrency,
            max_retries = config.max_retries,
            threshold = config.memory.threshold,
            "config loaded"
        );
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(Error::Validation(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.memory.threshold == 0 {
            return Err(Error::Validation(
                "memory.threshold must be at least 1".to_string(),
            ));
        }
        if self.memory.retained_tail >= self.memory.threshold {
            return Err(Error::Validation(format!(
                "memory.retained_tail ({}) must be smaller than memory.threshold ({})",
                self.memory.retained_tail, self.memory.threshold
            )));
        }
        if self.memory.intent_window == 0 {
            return Err(Error::Validation(
                "memory.intent_window must be at least 1".to_string(),
            ));
        }
        let t = &self.timeouts;
        for (name, secs) in [
            ("worker_secs", t.worker_secs),
            ("validator_secs", t.validator_secs),
            ("summarizer_secs", t.summarizer_secs),
            ("intent_secs", t.intent_secs),
            ("synthesizer_secs", t.synthesizer_secs),
            ("decomposer_secs", t.decomposer_secs),
        ] {
            if secs == 0 {
                return Err(Error::Validation(format!(
                    "timeouts.{} must be greater than 0",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn task_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
    }

    pub fn synthesis_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.synthesis_max_retries)
    }

    pub fn window_settings(&self) -> WindowSettings {
        WindowSettings {
            threshold: self.memory.threshold,
            retained_tail: self.memory.retained_tail,
            summarizer_timeout: self.timeouts.summarizer(),
        }
    }

    pub fn runner_timeouts(&self) -> RunnerTimeouts {
        RunnerTimeouts {
            worker: self.timeouts.worker(),
            validator: self.timeouts.validator(),
        }
    }

    pub fn synthesis_timeouts(&self) -> SynthesisTimeouts {
        SynthesisTimeouts {
            synthesizer: self.timeouts.synthesizer(),
            validator: self.timeouts.validator(),
        }
    }
}
