use std::time::{Duration, Instant};

use chrono::Utc;
use log::debug;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cistern::LevelSensor;
use crate::relay::Relay;
use crate::telemetry::StateSink;

// Set to false to silence this module's per-tick chatter
const ENABLE_LOGS: bool = true;

// Import the logging macros (exported at crate root)
use crate::{log_error, log_info};

use super::controller::PumpController;
use super::state::{PumpCommand, PumpState};

/// Drive the pump forever: report state, fetch a reading, step the state
/// machine, apply the relay command, sleep, repeat.
///
/// Telemetry is pushed before the tick is evaluated, so it reflects the
/// state entering the tick. Whatever ends the loop, the tail below runs:
/// the relay is commanded off and the final `Off` state is reported.
pub async fn control_loop<S, T>(
    mut controller: PumpController,
    mut relay: Box<dyn Relay + Send>,
    sensor: S,
    telemetry: T,
    poll_interval: Duration,
    cancel_token: CancellationToken,
) where
    S: LevelSensor,
    T: StateSink,
{
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                debug!(
                    "starting tick, state {}, on edge {:?}s ago, off edge {:?}s ago, energized {}",
                    controller.state().as_str(),
                    controller.pump_on_time().map(|t| t.elapsed().as_secs()),
                    controller.pump_off_time().map(|t| t.elapsed().as_secs()),
                    relay.is_energized(),
                );
                telemetry.report_state(controller.state()).await;

                let reading = sensor.get_reading().await;
                let command = controller.decide(reading.as_ref(), Instant::now(), Utc::now());
                apply_command(relay.as_mut(), command);
            }
            _ = cancel_token.cancelled() => {
                log_info!("control loop cancelled, shutting down");
                break;
            }
        }
    }

    // Exit path: the pump must never stay energized past the loop.
    telemetry.report_state(PumpState::Off).await;
    match relay.off() {
        Ok(()) => log_info!("pump de-energized, control loop done"),
        Err(err) => log_error!("failed to de-energize pump on shutdown: {err:?}"),
    }
}

fn apply_command(relay: &mut (dyn Relay + Send), command: PumpCommand) {
    let result = match command {
        PumpCommand::On => relay.on(),
        PumpCommand::Off => relay.off(),
    };
    if let Err(err) = result {
        log_error!("failed to apply relay command {command:?}: {err:?}");
    }
}
