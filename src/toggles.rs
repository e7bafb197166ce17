//! Toggle/Calibration Gate (C11): a single mutable flag set persisted to a
//! small file, re-read at the start of every cycle (never cached), plus the
//! per-station bias table used to correct forecasts when calibration is on.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, FixedOffset};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::registry::Station;

const TOGGLE_STORE_DEFAULT: &str = "data/config/feature_toggles.json";
const BIAS_TABLE_DEFAULT: &str = "data/config/calibration_bias.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureToggles {
    #[serde(default)]
    pub station_calibration: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            station_calibration: false,
        }
    }
}

/// `(month 1-12, local_hour 0-23) -> additive Fahrenheit/Celsius-agnostic
/// kelvin correction`, one table per station code.
type BiasTable = HashMap<String, HashMap<(u32, u32), f64>>;

#[derive(Debug, Deserialize)]
struct RawBiasEntry {
    station_code: String,
    month: u32,
    hour: u32,
    correction_kelvin: f64,
}

/// The gate is checked at the start of every cycle, not cached — `read()`
/// always re-reads the toggle file from disk. The bias table, in contrast,
/// is loaded once at construction since it changes far less often than the
/// flag and is not part of the spec's "re-read every cycle" requirement.
pub struct CalibrationGate {
    toggle_path: PathBuf,
    bias_table: BiasTable,
    warned_missing_bias: AtomicBool,
}

impl CalibrationGate {
    pub fn new() -> Self {
        Self::at(TOGGLE_STORE_DEFAULT, BIAS_TABLE_DEFAULT)
    }

    pub fn at(toggle_path: impl Into<PathBuf>, bias_path: impl AsRef<Path>) -> Self {
        let bias_table = load_bias_table(bias_path.as_ref()).unwrap_or_default();
        Self {
            toggle_path: toggle_path.into(),
            bias_table,
            warned_missing_bias: AtomicBool::new(false),
        }
    }

    /// Re-read the flag set from disk. Missing file means the defaults apply.
    pub fn read(&self) -> EngineResult<FeatureToggles> {
        match std::fs::read_to_string(&self.toggle_path) {
            Ok(data) => serde_json::from_str(&data).map_err(|e| {
                EngineError::Io(format!("feature toggle file is corrupt: {e}"))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FeatureToggles::default()),
            Err(e) => Err(EngineError::Io(e.to_string())),
        }
    }

    /// Atomic file replace: write to a temp file in the same directory, then
    /// rename over the target.
    pub fn set(&self, flag: &str, value: bool) -> EngineResult<FeatureToggles> {
        let mut toggles = self.read()?;
        match flag {
            "station_calibration" => toggles.station_calibration = value,
            other => {
                return Err(EngineError::ConfigError(format!(
                    "unknown toggle flag '{other}'"
                )))
            }
        }

        if let Some(parent) = self.toggle_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self
            .toggle_path
            .with_extension(format!("tmp.{}", uuid::Uuid::new_v4()));
        let data = serde_json::to_string_pretty(&toggles)
            .map_err(|e| EngineError::Io(e.to_string()))?;
        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, &self.toggle_path)?;

        Ok(toggles)
    }

    /// Per §4.2/§4.11: apply the `(month, local_hour)` bias correction to
    /// each forecast point if calibration is active and a table exists for
    /// the station. A no-op (with a once-per-session warning) if the flag
    /// is on but no table exists for this station.
    pub fn apply(
        &self,
        station: &Station,
        points: &mut [(DateTime<FixedOffset>, f64)],
    ) -> EngineResult<()> {
        let toggles = self.read()?;
        if !toggles.station_calibration {
            return Ok(());
        }

        let Some(table) = self.bias_table.get(&station.code) else {
            if !self.warned_missing_bias.swap(true, Ordering::Relaxed) {
                warn!(
                    station = %station.code,
                    "station_calibration is active but no bias table exists for this station; no effect"
                );
            }
            return Ok(());
        };

        let tz: Tz = station.timezone;
        for (time, temp_kelvin) in points.iter_mut() {
            let local = time.with_timezone(&tz);
            let key = (local.format("%m").to_string().parse().unwrap_or(0), local.format("%H").to_string().parse().unwrap_or(0));
            if let Some(correction) = table.get(&key) {
                *temp_kelvin += correction;
            }
        }

        Ok(())
    }
}

impl Default for CalibrationGate {
    fn default() -> Self {
        Self::new()
    }
}

fn load_bias_table(path: &Path) -> Option<BiasTable> {
    let data = std::fs::read_to_string(path).ok()?;
    let entries: Vec<RawBiasEntry> = serde_json::from_str(&data).ok()?;
    let mut table: BiasTable = HashMap::new();
    for entry in entries {
        table
            .entry(entry.station_code)
            .or_default()
            .insert((entry.month, entry.hour), entry.correction_kelvin);
    }
    Some(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn station() -> Station {
        Station {
            code: "KNYC".to_string(),
            city: "New York".to_string(),
            latitude: 40.7128,
            longitude: -74.0060,
            timezone: chrono_tz::America::New_York,
            primary_venue: crate::registry::VenueTag("polymarket".to_string()),
        }
    }

    #[test]
    fn default_is_inactive() {
        let dir = tempfile::tempdir().unwrap();
        let gate = CalibrationGate::at(
            dir.path().join("toggles.json"),
            dir.path().join("bias.json"),
        );
        assert!(!gate.read().unwrap().station_calibration);
    }

    #[test]
    fn set_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let gate = CalibrationGate::at(
            dir.path().join("toggles.json"),
            dir.path().join("bias.json"),
        );
        gate.set("station_calibration", true).unwrap();
        assert!(gate.read().unwrap().station_calibration);
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let gate = CalibrationGate::at(
            dir.path().join("toggles.json"),
            dir.path().join("bias.json"),
        );
        assert!(gate.set("not_a_real_flag", true).is_err());
    }

    #[test]
    fn no_table_is_a_noop_even_when_active() {
        let dir = tempfile::tempdir().unwrap();
        let gate = CalibrationGate::at(
            dir.path().join("toggles.json"),
            dir.path().join("bias.json"),
        );
        gate.set("station_calibration", true).unwrap();
        let station = station();
        let time: DateTime<FixedOffset> = chrono_tz::America::New_York
            .with_ymd_and_hms(2025, 11, 17, 12, 0, 0)
            .unwrap()
            .fixed_offset();
        let mut points = vec![(time, 280.0)];
        gate.apply(&station, &mut points).unwrap();
        assert_eq!(points[0].1, 280.0);
    }

    #[test]
    fn applies_bias_when_table_and_flag_present() {
        let dir = tempfile::tempdir().unwrap();
        let bias_path = dir.path().join("bias.json");
        std::fs::write(
            &bias_path,
            serde_json::json!([
                {"station_code": "KNYC", "month": 11, "hour": 12, "correction_kelvin": 1.5}
            ])
            .to_string(),
        )
        .unwrap();
        let gate = CalibrationGate::at(dir.path().join("toggles.json"), bias_path);
        gate.set("station_calibration", true).unwrap();

        let station = station();
        let time: DateTime<FixedOffset> = chrono_tz::America::New_York
            .with_ymd_and_hms(2025, 11, 17, 12, 0, 0)
            .unwrap()
            .fixed_offset();
        let mut points = vec![(time, 280.0)];
        gate.apply(&station, &mut points).unwrap();
        assert_eq!(points[0].1, 281.5);
    }
}
