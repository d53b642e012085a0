//! Relay driver over the kernel's legacy sysfs GPIO interface.
//!
//! The pin number in the config is chip-relative; the chip's base offset
//! from `/sys/class/gpio/gpiochip0/base` is added to get the global sysfs
//! id. Polarity is handled by the kernel via the `active_low` attribute, so
//! `value` is always written in logical terms (1 = energized).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;

use super::Relay;

const GPIO_ROOT: &str = "/sys/class/gpio";

pub struct SysfsRelay {
    pin_dir: PathBuf,
    sysfs_id: u32,
    energized: bool,
}

impl SysfsRelay {
    pub fn new(pin: u32, active_high: bool) -> Result<Self> {
        Self::at_root(Path::new(GPIO_ROOT), pin, active_high)
    }

    fn at_root(root: &Path, pin: u32, active_high: bool) -> Result<Self> {
        let base: u32 = fs::read_to_string(root.join("gpiochip0/base"))
            .context("failed to read gpio chip base")?
            .trim()
            .parse()
            .context("gpio chip base is not a number")?;
        let sysfs_id = base + pin;
        let pin_dir = root.join(format!("gpio{sysfs_id}"));

        if !pin_dir.exists() {
            fs::write(root.join("export"), sysfs_id.to_string())
                .with_context(|| format!("failed to export gpio {sysfs_id}"))?;
        }

        fs::write(pin_dir.join("direction"), "out")
            .with_context(|| format!("failed to set gpio {sysfs_id} direction"))?;
        fs::write(pin_dir.join("active_low"), if active_high { "0" } else { "1" })
            .with_context(|| format!("failed to set gpio {sysfs_id} polarity"))?;

        let mut relay = Self {
            pin_dir,
            sysfs_id,
            energized: false,
        };
        // The pump must be off before the loop takes over.
        relay.off()?;
        info!(
            "sysfs relay initialized on pin {pin} (sysfs id {sysfs_id}, active_high {active_high})"
        );
        Ok(relay)
    }

    fn write_value(&self, value: &str) -> Result<()> {
        fs::write(self.pin_dir.join("value"), value)
            .with_context(|| format!("failed to write gpio {} value", self.sysfs_id))
    }
}

impl Relay for SysfsRelay {
    fn on(&mut self) -> Result<()> {
        self.write_value("1")?;
        self.energized = true;
        Ok(())
    }

    fn off(&mut self) -> Result<()> {
        self.write_value("0")?;
        self.energized = false;
        Ok(())
    }

    fn is_energized(&self) -> bool {
        self.energized
    }
}
