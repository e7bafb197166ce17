//! Station Registry (C1): a static code → (city, lat/lon, timezone, venue)
//! table, read once at process start from a bundled TOML file.

use std::collections::HashMap;

use chrono_tz::Tz;
use serde::Deserialize;

use crate::error::{EngineError, EngineResult};

/// The venue whose contract conventions (e.g. rounding chain) apply to a
/// station's bracket markets. Carried as a tag rather than an enum of known
/// venues because new venues are a market-client concern, not a registry one;
/// only `polymarket` currently changes mapper behavior (see `mapper::Venue`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenueTag(pub String);

impl VenueTag {
    pub fn is_polymarket(&self) -> bool {
        self.0.eq_ignore_ascii_case("polymarket")
    }
}

/// An immutable station definition, created at startup and never mutated.
#[derive(Debug, Clone)]
pub struct Station {
    pub code: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: Tz,
    pub primary_venue: VenueTag,
}

#[derive(Debug, Deserialize)]
struct RawTable {
    station: Vec<RawStation>,
}

#[derive(Debug, Deserialize)]
struct RawStation {
    code: String,
    city: String,
    latitude: f64,
    longitude: f64,
    timezone: String,
    primary_venue: String,
}

/// Bundled into the binary so the engine has no runtime dependency on a
/// file living next to it.
const STATIONS_TOML: &str = include_str!("../stations.toml");

pub struct StationRegistry {
    by_code: HashMap<String, Station>,
}

impl StationRegistry {
    /// Parse the bundled table. `config_error` if it's missing, mis-typed,
    /// or names a timezone `chrono-tz` doesn't recognize.
    pub fn load() -> EngineResult<Self> {
        Self::parse(STATIONS_TOML)
    }

    fn parse(source: &str) -> EngineResult<Self> {
        let raw: RawTable = toml::from_str(source)
            .map_err(|e| EngineError::ConfigError(format!("station table is mis-typed: {e}")))?;

        if raw.station.is_empty() {
            return Err(EngineError::ConfigError(
                "station table has no entries".to_string(),
            ));
        }

        let mut by_code = HashMap::with_capacity(raw.station.len());
        for row in raw.station {
            let timezone: Tz = row.timezone.parse().map_err(|_| {
                EngineError::ConfigError(format!(
                    "station {} names unknown timezone '{}'",
                    row.code, row.timezone
                ))
            })?;

            if by_code.contains_key(&row.code) {
                return Err(EngineError::ConfigError(format!(
                    "duplicate station code '{}'",
                    row.code
                )));
            }

            by_code.insert(
                row.code.clone(),
                Station {
                    code: row.code,
                    city: row.city,
                    latitude: row.latitude,
                    longitude: row.longitude,
                    timezone,
                    primary_venue: VenueTag(row.primary_venue),
                },
            );
        }

        Ok(Self { by_code })
    }

    pub fn get(&self, code: &str) -> EngineResult<&Station> {
        self.by_code
            .get(code)
            .ok_or_else(|| EngineError::NotFound(format!("station '{code}'")))
    }

    pub fn all(&self) -> impl Iterator<Item = &Station> {
        self.by_code.values()
    }

    pub fn by_city(&self, name: &str) -> EngineResult<&Station> {
        self.by_code
            .values()
            .find(|s| s.city.eq_ignore_ascii_case(name))
            .ok_or_else(|| EngineError::NotFound(format!("city '{name}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_bundled_table() {
        let registry = StationRegistry::load().unwrap();
        let nyc = registry.get("KNYC").unwrap();
        assert_eq!(nyc.city, "New York");
        assert!(nyc.primary_venue.is_polymarket());
    }

    #[test]
    fn unknown_code_is_not_found() {
        let registry = StationRegistry::load().unwrap();
        assert!(matches!(
            registry.get("ZZZZ"),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn by_city_is_case_insensitive() {
        let registry = StationRegistry::load().unwrap();
        assert_eq!(registry.by_city("new york").unwrap().code, "KNYC");
    }

    #[test]
    fn rejects_unknown_timezone() {
        let bad = r#"
            [[station]]
            code = "ZZZ"
            city = "Nowhere"
            latitude = 0.0
            longitude = 0.0
            timezone = "Not/AZone"
            primary_venue = "polymarket"
        "#;
        assert!(matches!(
            StationRegistry::parse(bad),
            Err(EngineError::ConfigError(_))
        ));
    }

    #[test]
    fn rejects_duplicate_code() {
        let bad = r#"
            [[station]]
            code = "AAA"
            city = "A"
            latitude = 0.0
            longitude = 0.0
            timezone = "UTC"
            primary_venue = "polymarket"

            [[station]]
            code = "AAA"
            city = "B"
            latitude = 1.0
            longitude = 1.0
            timezone = "UTC"
            primary_venue = "polymarket"
        "#;
        assert!(matches!(
            StationRegistry::parse(bad),
            Err(EngineError::ConfigError(_))
        ));
    }

    #[test]
    fn rejects_empty_table() {
        assert!(matches!(
            StationRegistry::parse(""),
            Err(EngineError::ConfigError(_))
        ));
    }
}
