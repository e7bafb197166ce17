//! Snapshotter (C7): append-only, atomically-written JSON snapshots of each
//! cycle's forecast, market state, and decisions.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::error::{EngineError, EngineResult};
use crate::forecast::Forecast;
use crate::registry::Station;
use crate::sizer::{Decision, PricedBracket};

pub struct Snapshotter {
    root: PathBuf,
}

impl Snapshotter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Writes the forecast snapshot (always), the market-state snapshot
    /// (always), and the decisions snapshot (only when non-empty) under
    /// `<root>/snapshots/dynamic/{zeus,polymarket,decisions}/...`. A failure on one
    /// file is surfaced but does not prevent the others from being
    /// attempted; the caller (the engine) treats any of these as a
    /// non-fatal per-cycle failure.
    pub fn save_cycle(
        &self,
        forecast: &Forecast,
        priced: &[PricedBracket],
        decisions: &[Decision],
        station: &Station,
        event_day: NaiveDate,
        cycle_time: DateTime<Utc>,
    ) -> EngineResult<()> {
        let stamp = cycle_time.format("%Y-%m-%d_%H-%M-%S").to_string();
        let city_slug = station.city.to_lowercase().replace(' ', "-");

        let forecast_path = self
            .root
            .join("snapshots/dynamic/zeus")
            .join(&station.code)
            .join(event_day.to_string())
            .join(format!("{stamp}.json"));
        atomic_write_json(&forecast_path, forecast)?;

        let market_path = self
            .root
            .join("snapshots/dynamic/polymarket")
            .join(&city_slug)
            .join(event_day.to_string())
            .join(format!("{stamp}.json"));
        atomic_write_json(&market_path, priced)?;

        if !decisions.is_empty() {
            let decisions_path = self
                .root
                .join("snapshots/dynamic/decisions")
                .join(&station.code)
                .join(event_day.to_string())
                .join(format!("{stamp}.json"));
            atomic_write_json(&decisions_path, decisions)?;
        }

        Ok(())
    }
}

/// Writes `value` to a temp file beside `path`, then renames into place.
/// Never rewrites an existing path with the same name — `cycle_time` is
/// unique per cycle, so collisions would indicate a clock or caller bug
/// rather than something to silently paper over.
fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> EngineResult<()> {
    if path.exists() {
        return Err(EngineError::Io(format!(
            "refusing to overwrite existing snapshot at {}",
            path.display()
        )));
    }

    let parent = path.parent().ok_or_else(|| {
        EngineError::Io(format!("snapshot path {} has no parent", path.display()))
    })?;
    std::fs::create_dir_all(parent)?;

    let data = serde_json::to_string_pretty(value)
        .map_err(|e| EngineError::Io(format!("serializing snapshot: {e}")))?;

    let tmp_path = parent.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
    std::fs::write(&tmp_path, data)?;
    std::fs::rename(&tmp_path, path)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::ForecastPoint;
    use crate::registry::VenueTag;
    use chrono::TimeZone;

    fn station() -> Station {
        Station {
            code: "KNYC".to_string(),
            city: "New York".to_string(),
            latitude: 40.7128,
            longitude: -74.0060,
            timezone: chrono_tz::America::New_York,
            primary_venue: VenueTag("polymarket".to_string()),
        }
    }

    fn forecast(station: &Station, event_day: NaiveDate) -> Forecast {
        let start = chrono_tz::America::New_York
            .with_ymd_and_hms(2025, 11, 17, 0, 0, 0)
            .unwrap()
            .fixed_offset();
        Forecast {
            points: vec![ForecastPoint {
                time: start,
                temperature_kelvin: 290.0,
            }],
            fetch_time: Utc.with_ymd_and_hms(2025, 11, 17, 13, 0, 0).unwrap(),
            event_day,
            station_code: station.code.clone(),
            start_local: start,
        }
    }

    #[test]
    fn writes_forecast_and_market_snapshots_without_decisions() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = Snapshotter::new(dir.path());
        let station = station();
        let event_day = NaiveDate::from_ymd_opt(2025, 11, 17).unwrap();
        let cycle_time = Utc.with_ymd_and_hms(2025, 11, 17, 13, 0, 0).unwrap();

        snapshotter
            .save_cycle(
                &forecast(&station, event_day),
                &[],
                &[],
                &station,
                event_day,
                cycle_time,
            )
            .unwrap();

        let zeus_dir = dir.path().join("snapshots/dynamic/zeus/KNYC/2025-11-17");
        let polymarket_dir = dir.path().join("snapshots/dynamic/polymarket/new-york/2025-11-17");
        let decisions_dir = dir.path().join("snapshots/dynamic/decisions/KNYC/2025-11-17");

        assert_eq!(std::fs::read_dir(zeus_dir).unwrap().count(), 1);
        assert_eq!(std::fs::read_dir(polymarket_dir).unwrap().count(), 1);
        assert!(!decisions_dir.exists());
    }

    #[test]
    fn refuses_to_rewrite_the_same_cycle_time() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = Snapshotter::new(dir.path());
        let station = station();
        let event_day = NaiveDate::from_ymd_opt(2025, 11, 17).unwrap();
        let cycle_time = Utc.with_ymd_and_hms(2025, 11, 17, 13, 0, 0).unwrap();

        snapshotter
            .save_cycle(
                &forecast(&station, event_day),
                &[],
                &[],
                &station,
                event_day,
                cycle_time,
            )
            .unwrap();

        let result = snapshotter.save_cycle(
            &forecast(&station, event_day),
            &[],
            &[],
            &station,
            event_day,
            cycle_time,
        );
        assert!(result.is_err());
    }
}
