//! Cistern level sensor: HTTP fetch and reading freshness.
//!
//! Every transport problem (timeout, non-200, malformed body) collapses to
//! "no reading" here; the controller only ever sees a present-or-absent
//! `Reading`.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Deserialize;

/// A level report from the cistern. Immutable once parsed.
///
/// `timestamp` is the sensor-side clock, sent as epoch milliseconds.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct Reading {
    pub level: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Source of level readings the control loop polls each tick.
#[allow(async_fn_in_trait)]
pub trait LevelSensor {
    async fn get_reading(&self) -> Option<Reading>;
}

/// HTTP client for the cistern's level endpoint.
pub struct CisternClient {
    url: String,
    client: reqwest::Client,
}

impl CisternClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build cistern http client")?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

impl LevelSensor for CisternClient {
    async fn get_reading(&self) -> Option<Reading> {
        let response = match self.client.get(&self.url).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!("error fetching reading from {}: {err}", self.url);
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("non-success status {status} while fetching level, body {body:?}");
            return None;
        }

        match response.json::<Reading>().await {
            Ok(reading) => {
                debug!(
                    "fetched level {} with timestamp {}",
                    reading.level, reading.timestamp
                );
                Some(reading)
            }
            Err(err) => {
                warn!("level response missing required fields or malformed: {err}");
                None
            }
        }
    }
}

/// A reading counts only if it exists and is younger than `max_age`
/// (callers pass twice the poll interval, so one missed fetch is tolerated
/// but two are not). Age is absolute, so a sensor clock slightly ahead of
/// ours does not invalidate fresh data.
pub fn is_reading_valid(reading: Option<&Reading>, now: DateTime<Utc>, max_age: Duration) -> bool {
    let Some(reading) = reading else {
        debug!("no reading available");
        return false;
    };
    let age_ms = (now - reading.timestamp).num_milliseconds().unsigned_abs();
    let fresh = age_ms < max_age.as_millis() as u64;
    if !fresh {
        debug!(
            "reading aged {age_ms}ms is outside the {}ms window",
            max_age.as_millis()
        );
    }
    fresh
}
