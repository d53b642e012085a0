pub mod cistern;
pub mod pump;
pub mod relay;
pub mod settings;
pub mod telemetry;
mod utils;

pub use cistern::{CisternClient, LevelSensor, Reading};
pub use pump::{control_loop, PumpCommand, PumpController, PumpState, Tuning};
pub use relay::Relay;
pub use settings::Settings;
pub use telemetry::{StateReporter, StateSink};
