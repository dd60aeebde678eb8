//! # SimLink
//!
//! Drive an RC car from sim-racing wheel and pedals via ExpressLRS.
//!
//! This binary runs the CRSF session engine against a transmitter module
//! on USB serial: it handshakes, walks the parameter catalogue, then
//! streams RC channel frames while decoding telemetry.

use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

use simlink::config::Config;
use simlink::input::{InputSource, NeutralInput};
use simlink::serial::CrsfSerial;
use simlink::session::DeviceSession;
use simlink::telemetry::{TelemetryLogger, TelemetryRecord};

/// Engine tick cadence in milliseconds
const TICK_INTERVAL_MS: u64 = 1;

/// Ticks between periodic status log lines (~5 seconds)
const STATUS_LOG_INTERVAL_TICKS: u64 = 5000;

/// Configuration file consulted at startup
const CONFIG_PATH: &str = "config/default.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging through a non-blocking writer so slow terminals
    // never stall the tick loop
    let (writer, _guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(writer)
        .init();

    info!("SimLink v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = if Path::new(CONFIG_PATH).exists() {
        Config::load(CONFIG_PATH)?
    } else {
        warn!("{} not found, using built-in defaults", CONFIG_PATH);
        Config::default()
    };

    // Try the configured port first, then the usual USB device paths
    let serial = CrsfSerial::open_with_paths(
        &[config.serial.port.as_str()],
        config.serial.baud_rate,
    )
    .or_else(|err| {
        warn!(%err, "configured port unavailable, scanning defaults");
        CrsfSerial::open()
    })?;
    info!("CRSF module on {}", serial.device_path());

    let mut session = DeviceSession::new(serial, &config.link, &config.controls);

    // Telemetry snapshots stream to rotating JSONL files off the hot loop
    if config.telemetry.enabled {
        let mut snapshot_rx = session.subscribe();
        let mut logger = TelemetryLogger::new(&config.telemetry)?;
        let log_interval = Duration::from_millis(config.telemetry.log_interval_ms);

        tokio::spawn(async move {
            let mut last_write: Option<Instant> = None;
            while snapshot_rx.changed().await.is_ok() {
                let due = last_write.map_or(true, |t| t.elapsed() >= log_interval);
                if !due {
                    continue;
                }
                let snapshot = snapshot_rx.borrow_and_update().clone();
                let record = TelemetryRecord::from_snapshot(&snapshot);
                if let Err(err) = logger.append(&record) {
                    warn!(%err, "telemetry write failed");
                }
                last_write = Some(Instant::now());
            }
        });
    }

    // No HID reader is wired up yet; axes hold at rest until one is
    let mut input = NeutralInput;

    let mut tick = interval(Duration::from_millis(TICK_INTERVAL_MS));
    let mut tick_count: u64 = 0;

    info!("starting session loop at {}ms cadence", TICK_INTERVAL_MS);
    info!("press Ctrl+C to exit");

    loop {
        tokio::select! {
            _ = tick.tick() => {
                if let Some(sample) = input.poll() {
                    session.set_steering(sample.steering);
                    session.set_throttle(sample.throttle);
                    session.set_brake(sample.brake);
                }

                let now = Instant::now();
                if let Err(err) = session.tick(now).await {
                    error!(%err, "session tick failed");
                    break;
                }
                if let Err(err) = session.handle_rx(now).await {
                    error!(%err, "session rx failed");
                    break;
                }

                tick_count += 1;
                if tick_count % STATUS_LOG_INTERVAL_TICKS == 0 {
                    info!(
                        tx = ?session.tx_state(),
                        rx = ?session.rx_state(),
                        lq = session.link_stats().uplink_lq,
                        battery_v = session.battery().voltage,
                        "status"
                    );
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    info!(ticks = tick_count, tx = ?session.tx_state(), "session closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_cadence() {
        // The engine is paced by this loop; keep it at the protocol's
        // expected 1 ms
        assert_eq!(TICK_INTERVAL_MS, 1);
    }

    #[test]
    fn test_status_interval() {
        let seconds = STATUS_LOG_INTERVAL_TICKS * TICK_INTERVAL_MS / 1000;
        assert_eq!(seconds, 5);
    }
}
