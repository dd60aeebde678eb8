//! # Telemetry Module
//!
//! Writes periodic telemetry snapshots to JSONL files with rotation.
//!
//! This module handles:
//! - Formatting session snapshots as JSON Lines records
//! - Writing to rotating log files (max N records per file)
//! - Retaining only the newest M files

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::TelemetryConfig;
use crate::crsf::protocol::{BatteryTelemetry, LinkStats, RadioSync};
use crate::error::Result;
use crate::session::{RxState, SessionSnapshot, TxState};

/// One JSONL line: link and battery state at a point in time.
#[derive(Debug, Serialize)]
pub struct TelemetryRecord {
    pub timestamp: DateTime<Utc>,
    pub tx_state: TxState,
    pub rx_state: RxState,
    pub battery: BatteryTelemetry,
    pub link_stats: LinkStats,
    pub radio_sync: RadioSync,
}

impl TelemetryRecord {
    /// Stamp a session snapshot with the current wall-clock time.
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        Self {
            timestamp: Utc::now(),
            tx_state: snapshot.tx_state,
            rx_state: snapshot.rx_state,
            battery: snapshot.battery,
            link_stats: snapshot.link_stats,
            radio_sync: snapshot.radio_sync,
        }
    }
}

/// Rotating JSONL writer for telemetry records.
pub struct TelemetryLogger {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    file: Option<File>,
    records_in_file: usize,
    sequence: u32,
}

impl TelemetryLogger {
    /// Create a logger writing into the configured directory, creating
    /// it if needed.
    pub fn new(config: &TelemetryConfig) -> Result<Self> {
        fs::create_dir_all(&config.log_dir)?;

        Ok(Self {
            dir: PathBuf::from(&config.log_dir),
            max_records_per_file: config.max_records_per_file,
            max_files_to_keep: config.max_files_to_keep,
            file: None,
            records_in_file: 0,
            sequence: 0,
        })
    }

    /// Append one record, rotating to a new file when the current one is
    /// full.
    pub fn append(&mut self, record: &TelemetryRecord) -> Result<()> {
        if self.file.is_none() || self.records_in_file >= self.max_records_per_file {
            self.rotate()?;
        }

        if let Some(file) = self.file.as_mut() {
            let line = serde_json::to_string(record)?;
            writeln!(file, "{}", line)?;
            self.records_in_file += 1;
        }

        Ok(())
    }

    /// Open a fresh file and prune old ones past the retention limit.
    fn rotate(&mut self) -> Result<()> {
        self.sequence += 1;
        let name = format!(
            "telemetry-{}-{:04}.jsonl",
            Utc::now().format("%Y%m%d-%H%M%S"),
            self.sequence
        );
        let path = self.dir.join(name);
        debug!(path = %path.display(), "starting new telemetry file");

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.file = Some(file);
        self.records_in_file = 0;

        self.prune()?;
        Ok(())
    }

    /// Delete the oldest telemetry files beyond the retention count.
    fn prune(&self) -> Result<()> {
        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("telemetry-") && n.ends_with(".jsonl"))
                    .unwrap_or(false)
            })
            .collect();

        // Names sort chronologically: timestamp then sequence
        files.sort();

        while files.len() > self.max_files_to_keep {
            let oldest = files.remove(0);
            if let Err(err) = fs::remove_file(&oldest) {
                warn!(path = %oldest.display(), %err, "failed to prune telemetry file");
            }
        }

        Ok(())
    }
}
