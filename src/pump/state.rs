use serde::{Deserialize, Serialize};

/// Controller state. `Fault` is terminal: nothing transitions out of it
/// short of a process restart.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PumpState {
    Off,
    On,
    CommError,
    Fault,
}

impl Default for PumpState {
    fn default() -> Self {
        PumpState::Off
    }
}

impl PumpState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PumpState::Off => "off",
            PumpState::On => "on",
            PumpState::CommError => "comm-error",
            PumpState::Fault => "fault",
        }
    }

    /// Numeric code pushed to telemetry so dashboards can plot the state
    /// as a single series.
    pub fn code(&self) -> i8 {
        match self {
            PumpState::Off => 0,
            PumpState::On => 1,
            PumpState::CommError => -1,
            PumpState::Fault => -2,
        }
    }
}

/// What the control loop should do with the relay this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpCommand {
    On,
    Off,
}
