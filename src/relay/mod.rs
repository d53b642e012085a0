//! Pump relay drivers behind a common capability interface.

mod sysfs;

use anyhow::Result;
use log::info;

use crate::settings::RelaySettings;

pub use sysfs::SysfsRelay;

/// The digital output driving the pump contactor.
///
/// Implementations are idempotent: commanding the current state again is a
/// no-op and must not fail.
pub trait Relay {
    fn on(&mut self) -> Result<()>;
    fn off(&mut self) -> Result<()>;
    fn is_energized(&self) -> bool;
}

/// Build the configured driver. Every driver starts de-energized.
pub fn build(settings: &RelaySettings) -> Result<Box<dyn Relay + Send>> {
    match settings {
        RelaySettings::Sysfs { pin, active_high } => {
            let relay = SysfsRelay::new(*pin, *active_high)?;
            Ok(Box::new(relay))
        }
        RelaySettings::Noop => Ok(Box::new(NoopRelay::new())),
    }
}

/// In-memory relay for commissioning and tests: tracks state, drives no
/// hardware.
pub struct NoopRelay {
    energized: bool,
}

impl NoopRelay {
    pub fn new() -> Self {
        info!("noop relay initialized, no hardware will be driven");
        Self { energized: false }
    }
}

impl Default for NoopRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl Relay for NoopRelay {
    fn on(&mut self) -> Result<()> {
        if !self.energized {
            info!("noop relay on");
        }
        self.energized = true;
        Ok(())
    }

    fn off(&mut self) -> Result<()> {
        if self.energized {
            info!("noop relay off");
        }
        self.energized = false;
        Ok(())
    }

    fn is_energized(&self) -> bool {
        self.energized
    }
}
