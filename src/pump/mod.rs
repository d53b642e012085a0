pub mod controller;
pub mod history;
pub mod loop_worker;
pub mod state;

pub use controller::{PumpController, Tuning};
pub use history::RunHistory;
pub use loop_worker::control_loop;
pub use state::{PumpCommand, PumpState};
