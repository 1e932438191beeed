//! Service configuration.
//!
//! Read from a JSON file. Every field has a default, so an empty object (or no file at all) is a
//! valid configuration.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, ensure, Context};
use serde::{Deserialize, Serialize};

use crate::dbus::DEFAULT_PUMP_INTERVAL;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    /// How often the bus executor is polled, in milliseconds.
    pub pump_interval_ms: u64,
    /// Windows the headless compositor opens at startup.
    pub windows: Vec<InitialWindow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct InitialWindow {
    pub app_id: String,
    #[serde(default)]
    pub title: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pump_interval_ms: DEFAULT_PUMP_INTERVAL.as_millis() as u64,
            windows: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("error reading {path:?}"))?;
        let config = Self::parse(&contents).with_context(|| format!("error loading {path:?}"))?;
        debug!("loaded config from {path:?}");
        Ok(config)
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(text).context("error parsing config")?;
        ensure!(
            config.pump_interval_ms > 0,
            "pump-interval-ms must be greater than zero"
        );
        Ok(config)
    }

    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.pump_interval_ms)
    }
}

impl FromStr for InitialWindow {
    type Err = anyhow::Error;

    /// Parses `APP_ID=TITLE`. The title may be empty or contain further `=`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (app_id, title) = s.split_once('=').unwrap_or((s, ""));
        if app_id.is_empty() {
            bail!("window must be given as APP_ID=TITLE, got {s:?}");
        }
        Ok(Self {
            app_id: app_id.to_owned(),
            title: title.to_owned(),
        })
    }
}
