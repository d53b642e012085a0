use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use log::{error, info};
use tokio_util::sync::CancellationToken;

use cisternd::cistern::CisternClient;
use cisternd::pump::{control_loop, PumpController};
use cisternd::settings::Settings;
use cisternd::telemetry::StateReporter;
use cisternd::{relay, Tuning};

const DEFAULT_SETTINGS_PATH: &str = "/etc/cisternd.json";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH));
    let settings = Settings::load(&path)?;

    let Tuning {
        desired_level,
        poll_interval,
        max_run_time,
        cooldown,
        ..
    } = settings.tuning();
    info!(
        "cisternd starting: desired level {desired_level}, poll {}s, max run {}s, cooldown {}s",
        poll_interval.as_secs(),
        max_run_time.as_secs(),
        cooldown.as_secs()
    );

    // The relay comes up de-energized before anything else happens.
    let pump_relay = relay::build(&settings.relay)?;
    let cistern = CisternClient::new(
        &settings.cistern.url,
        Duration::from_secs(settings.cistern.timeout_secs),
    )?;
    let telemetry = StateReporter::new(&settings.telemetry)?;
    let controller = PumpController::new(settings.tuning());

    let cancel_token = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel_token.clone()));

    control_loop(
        controller,
        pump_relay,
        cistern,
        telemetry,
        settings.poll_interval(),
        cancel_token,
    )
    .await;

    info!("pump is off, exiting");
    Ok(())
}

/// Cancel the loop on SIGINT or SIGTERM so systemd stop and Ctrl-C both
/// take the de-energize path.
async fn shutdown_signal(cancel_token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                error!("failed to install SIGTERM handler: {err}");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT, stopping"),
            _ = sigterm.recv() => info!("received SIGTERM, stopping"),
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for shutdown signal: {err}");
            return;
        }
        info!("received interrupt, stopping");
    }
    cancel_token.cancel();
}
