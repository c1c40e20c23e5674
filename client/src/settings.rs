use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSettings {
    pub api_token: String,
    #[serde(default)]
    pub reconnect: ReconnectDelays,
}

impl ClientSettings {
    //loads bluecurrent.toml and/or BLUECURRENT_* environment variables
    //(nested keys separated by __, e.g. BLUECURRENT_RECONNECT__RETRY_SECS)
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("bluecurrent").required(false))
            .add_source(Environment::with_prefix("BLUECURRENT").separator("__"));

        let s = builder.build()?;
        s.try_deserialize()
    }

    pub fn with_token(api_token: impl Into<String>) -> Self {
        Self {
            api_token: api_token.into(),
            reconnect: ReconnectDelays::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectDelays {
    //pause after a live session drops before the first reconnect attempt
    #[serde(default = "default_connection_lost_secs")]
    pub connection_lost_secs: u64,
    //pause between failed reconnect attempts
    #[serde(default = "default_retry_secs")]
    pub retry_secs: u64,
}

impl ReconnectDelays {
    pub fn connection_lost(&self) -> Duration {
        Duration::from_secs(self.connection_lost_secs)
    }

    pub fn retry(&self) -> Duration {
        Duration::from_secs(self.retry_secs)
    }
}

impl Default for ReconnectDelays {
    fn default() -> Self {
        Self {
            connection_lost_secs: default_connection_lost_secs(),
            retry_secs: default_retry_secs(),
        }
    }
}

fn default_connection_lost_secs() -> u64 {
    1
}

fn default_retry_secs() -> u64 {
    20
}
