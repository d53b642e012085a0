//! Best-effort push of the controller state to a telemetry endpoint.
//!
//! Reporting must never influence control: every failure here is logged
//! and dropped.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, warn};
use serde::Serialize;

use crate::pump::PumpState;
use crate::settings::TelemetrySettings;

const REPORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the control loop publishes the state entering each tick.
#[allow(async_fn_in_trait)]
pub trait StateSink {
    async fn report_state(&self, state: PumpState);
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatePayload<'a> {
    key: &'a str,
    value: i8,
    epoch_ms: i64,
}

/// HTTP state reporter. Disabled instances are silent no-ops.
pub struct StateReporter {
    enabled: bool,
    endpoint: String,
    item_key: String,
    access_key: Option<String>,
    client: reqwest::Client,
}

impl StateReporter {
    pub fn new(settings: &TelemetrySettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REPORT_TIMEOUT)
            .build()
            .context("failed to build telemetry http client")?;
        Ok(Self {
            enabled: settings.enabled,
            endpoint: settings.endpoint.clone(),
            item_key: settings.item_key.clone(),
            access_key: settings.access_key.clone(),
            client,
        })
    }
}

impl StateSink for StateReporter {
    async fn report_state(&self, state: PumpState) {
        if !self.enabled {
            return;
        }

        let payload = StatePayload {
            key: &self.item_key,
            value: state.code(),
            epoch_ms: Utc::now().timestamp_millis(),
        };

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(access_key) = &self.access_key {
            request = request.header("X-Access-Key", access_key);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!("reported state {} to telemetry", state.as_str());
            }
            Ok(response) => {
                warn!(
                    "telemetry push for state {} rejected with status {}",
                    state.as_str(),
                    response.status()
                );
            }
            Err(err) => {
                warn!("unable to report state {} to telemetry: {err}", state.as_str());
            }
        }
    }
}
