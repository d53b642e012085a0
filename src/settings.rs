use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

use crate::pump::Tuning;

/// Daemon configuration, loaded once at startup and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub pump: PumpSettings,
    pub relay: RelaySettings,
    pub cistern: CisternSettings,
    pub telemetry: TelemetrySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PumpSettings {
    /// Fill level at which the pump stops (sensor units).
    pub desired_level: f64,
    pub poll_interval_secs: u64,
    pub max_run_time_secs: u64,
    pub cooldown_secs: u64,
    /// Stall detection: the level must move within this many seconds.
    pub level_must_move_secs: u64,
    /// Stall detection: minimum cumulative change over the window.
    pub level_change_threshold: f64,
}

impl Default for PumpSettings {
    fn default() -> Self {
        Self {
            desired_level: 0.85,
            poll_interval_secs: 10,
            max_run_time_secs: 300,   // 5 min continuous run
            cooldown_secs: 600,       // 10 min between runs
            level_must_move_secs: 60,
            level_change_threshold: 0.01,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "lowercase")]
pub enum RelaySettings {
    #[serde(rename_all = "camelCase")]
    Sysfs { pin: u32, active_high: bool },
    Noop,
}

impl Default for RelaySettings {
    fn default() -> Self {
        RelaySettings::Noop
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CisternSettings {
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for CisternSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetrySettings {
    pub enabled: bool,
    pub endpoint: String,
    pub item_key: String,
    pub access_key: Option<String>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            item_key: "pump-state".into(),
            access_key: None,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse settings from {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pump.poll_interval_secs == 0 {
            bail!("pump.pollIntervalSecs must be at least 1");
        }
        if !self.pump.desired_level.is_finite() || self.pump.desired_level <= 0.0 {
            bail!("pump.desiredLevel must be a positive number");
        }
        if !self.pump.level_change_threshold.is_finite() || self.pump.level_change_threshold < 0.0 {
            bail!("pump.levelChangeThreshold must be zero or positive");
        }
        if self.cistern.url.is_empty() {
            bail!("cistern.url must be set");
        }
        if self.cistern.timeout_secs == 0 {
            bail!("cistern.timeoutSecs must be at least 1");
        }
        if self.telemetry.enabled && self.telemetry.endpoint.is_empty() {
            bail!("telemetry.endpoint must be set when telemetry is enabled");
        }
        Ok(())
    }

    pub fn tuning(&self) -> Tuning {
        Tuning {
            desired_level: self.pump.desired_level,
            poll_interval: Duration::from_secs(self.pump.poll_interval_secs),
            max_run_time: Duration::from_secs(self.pump.max_run_time_secs),
            cooldown: Duration::from_secs(self.pump.cooldown_secs),
            level_must_move_window: Duration::from_secs(self.pump.level_must_move_secs),
            level_change_threshold: self.pump.level_change_threshold,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.pump.poll_interval_secs)
    }
}
