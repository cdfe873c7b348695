//! State persistence: active positions and performance statistics.
//!
//! Both files are rewritten in full on each save. A missing or corrupt file
//! on load yields defaults with a logged warning; the engine never refuses
//! to start over bad state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use funding_arb_core::position::ArbitragePosition;

use crate::performance::PerformanceStats;

/// Errors from state persistence operations.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Performance file layout: the stats plus a save timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedPerformance {
    #[serde(flatten)]
    stats: PerformanceStats,
    last_updated: DateTime<Utc>,
}

/// Saves and loads engine state under a data directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    data_dir: PathBuf,
}

impl StateStore {
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    #[must_use]
    pub fn positions_path(&self) -> PathBuf {
        self.data_dir.join("positions.json")
    }

    #[must_use]
    pub fn performance_path(&self) -> PathBuf {
        self.data_dir.join("performance.json")
    }

    /// Writes all active positions, replacing the previous file.
    pub fn save_positions(&self, positions: &[ArbitragePosition]) -> Result<(), StateError> {
        let path = self.positions_path();
        self.write_json(&path, positions)?;
        debug!(count = positions.len(), path = %path.display(), "saved positions");
        Ok(())
    }

    /// Loads persisted positions; missing or corrupt files yield an empty
    /// list.
    #[must_use]
    pub fn load_positions(&self) -> Vec<ArbitragePosition> {
        let path = self.positions_path();
        if !path.exists() {
            info!(path = %path.display(), "no saved positions, starting fresh");
            return Vec::new();
        }
        match Self::read_json::<Vec<ArbitragePosition>>(&path) {
            Ok(positions) => {
                info!(count = positions.len(), path = %path.display(), "loaded positions");
                positions
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "corrupt positions file, starting fresh");
                Vec::new()
            }
        }
    }

    /// Writes the performance stats with a save timestamp.
    pub fn save_performance(
        &self,
        stats: &PerformanceStats,
        now: DateTime<Utc>,
    ) -> Result<(), StateError> {
        let path = self.performance_path();
        let persisted = PersistedPerformance {
            stats: stats.clone(),
            last_updated: now,
        };
        self.write_json(&path, &persisted)?;
        debug!(path = %path.display(), "saved performance stats");
        Ok(())
    }

    /// Loads persisted performance stats; missing or corrupt files yield
    /// defaults.
    #[must_use]
    pub fn load_performance(&self) -> PerformanceStats {
        let path = self.performance_path();
        if !path.exists() {
            info!(path = %path.display(), "no saved performance stats, starting fresh");
            return PerformanceStats::default();
        }
        match Self::read_json::<PersistedPerformance>(&path) {
            Ok(persisted) => {
                info!(
                    path = %path.display(),
                    last_updated = %persisted.last_updated,
                    "loaded performance stats"
                );
                persisted.stats
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "corrupt performance file, starting fresh");
                PerformanceStats::default()
            }
        }
    }

    fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<(), StateError> {
        fs::create_dir_all(&self.data_dir)?;
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, value)?;
        Ok(())
    }

    fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, StateError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}
