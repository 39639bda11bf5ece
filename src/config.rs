use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    MailflowError, Result,
    runtime::{Cadence, ContextSharing},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// cadence of every driving loop, defaults to a 5ms interval
    pub tick: Cadence,
    /// how long a graph executor waits for an executable-scope condition
    /// verdict, defaults to 30s
    pub condition_timeout_ms: u64,
    /// context of forked branches
    pub context_sharing: ContextSharing,
    /// copies of routed mail kept by the agent's mail manager, 0 disables
    pub journal_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick: Cadence::default(),
            condition_timeout_ms: 30_000,
            context_sharing: ContextSharing::Isolated,
            journal_capacity: 0,
        }
    }
}

impl Config {
    pub fn create<T: AsRef<Path>>(path: T) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref()).map_err(|e| MailflowError::Config(format!("failed to load config file {:?}: {}", path.as_ref(), e)))?;

        Self::load_from_str(data.as_str())
    }

    pub fn load_from_str(toml_str: &str) -> Result<Self> {
        let config = toml::from_str::<Config>(toml_str)?;
        if config.condition_timeout_ms == 0 {
            return Err(MailflowError::Config("condition_timeout_ms must be greater than 0".to_string()));
        }
        Ok(config)
    }

    pub fn condition_timeout(&self) -> Duration {
        Duration::from_millis(self.condition_timeout_ms)
    }
}
