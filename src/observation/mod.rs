//! Observation Client (C4): actual hourly temperature observations per
//! station per event-day, used for resolution and for C6's microstructure
//! bleed/trend inputs.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::http_retry;
use crate::registry::{Station, VenueTag};

const PROVIDER: &str = "observation";

/// One hourly observation: instant (UTC) and Fahrenheit temperature, the
/// units the observation provider reports in.
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    pub time: DateTime<Utc>,
    pub temp_f: f64,
}

#[derive(Debug, Deserialize)]
struct ObservationEnvelope {
    observations: Vec<RawObservation>,
}

#[derive(Debug, Deserialize)]
struct RawObservation {
    time: String,
    temp_f: f64,
}

pub struct ObservationClient {
    http: reqwest::Client,
    base_url: String,
}

impl ObservationClient {
    pub fn new(config: &EngineConfig) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent("weather-edge-engine/0.1")
            .build()
            .map_err(|e| EngineError::ConfigError(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.observation_base_url.clone(),
        })
    }

    /// `observations(station_code, event_day) -> sequence<Observation> | none`.
    /// An empty result (provider has nothing for this station yet) is not an
    /// error; it is logged at debug level and an empty sequence is returned.
    pub async fn observations(
        &self,
        station: &Station,
        event_day: NaiveDate,
    ) -> EngineResult<Vec<Observation>> {
        let url = format!(
            "{}/stations/{}/observations?date={}",
            self.base_url, station.code, event_day
        );

        let resp = http_retry::send_with_retry(PROVIDER, || self.http.get(&url).send()).await?;
        let envelope: ObservationEnvelope =
            resp.json().await.map_err(|e| EngineError::ProviderError {
                source: PROVIDER,
                message: format!("malformed observation response: {e}"),
            })?;

        let mut observations = Vec::with_capacity(envelope.observations.len());
        for raw in envelope.observations {
            match DateTime::parse_from_rfc3339(&raw.time) {
                Ok(time) => observations.push(Observation {
                    time: time.with_timezone(&Utc),
                    temp_f: raw.temp_f,
                }),
                Err(e) => debug!(station = %station.code, error = %e, "skipping unparsable observation timestamp"),
            }
        }

        if observations.is_empty() {
            debug!(station = %station.code, %event_day, "no observations available yet");
        }

        Ok(observations)
    }

    /// `daily_high(station_code, event_day, venue=None) -> number | none`.
    /// The maximum over observations whose instant falls within the event
    /// day's local 24-hour window; an observation timestamped just before
    /// local midnight of the event day is excluded by the half-open range.
    /// When `venue` is Polymarket, the result is rounded to the nearest
    /// whole degree.
    pub fn daily_high(
        &self,
        observations: &[Observation],
        station: &Station,
        event_day: NaiveDate,
        venue: Option<&VenueTag>,
    ) -> EngineResult<f64> {
        let window_start = local_midnight_utc(station, event_day)?;
        let window_end = local_midnight_utc(station, event_day.succ_opt().ok_or_else(|| {
            EngineError::InvalidArgument(format!("event_day {event_day} has no successor"))
        })?)?;

        let high = observations
            .iter()
            .filter(|o| o.time >= window_start && o.time < window_end)
            .map(|o| o.temp_f)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));

        let Some(high) = high else {
            return Err(EngineError::NotFound(format!(
                "no observations in local window for station '{}' on {event_day}",
                station.code
            )));
        };

        Ok(match venue {
            Some(v) if v.is_polymarket() => high.round(),
            _ => high,
        })
    }
}

fn local_midnight_utc(station: &Station, day: NaiveDate) -> EngineResult<DateTime<Utc>> {
    let naive_midnight = day.and_hms_opt(0, 0, 0).ok_or_else(|| {
        EngineError::InvalidArgument(format!("day {day} has no midnight"))
    })?;
    match station.timezone.from_local_datetime(&naive_midnight) {
        chrono::LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        chrono::LocalResult::Ambiguous(dt, _) => Ok(dt.with_timezone(&Utc)),
        chrono::LocalResult::None => Err(EngineError::InvalidArgument(format!(
            "local midnight for {day} does not exist in station timezone (DST gap)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::VenueTag;
    use chrono::Duration;

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

    fn client() -> ObservationClient {
        ObservationClient {
            http: reqwest::Client::new(),
            base_url: "http://example.invalid".to_string(),
        }
    }

    #[test]
    fn excludes_observations_before_local_midnight() {
        let station = station();
        let event_day = NaiveDate::from_ymd_opt(2025, 11, 17).unwrap();
        let window_start = local_midnight_utc(&station, event_day).unwrap();

        let just_before = window_start - Duration::minutes(1);
        let just_after = window_start + Duration::minutes(1);

        let observations = vec![
            Observation { time: just_before, temp_f: 90.0 },
            Observation { time: just_after, temp_f: 40.0 },
        ];

        let high = client()
            .daily_high(&observations, &station, event_day, None)
            .unwrap();
        assert_eq!(high, 40.0);
    }

    #[test]
    fn polymarket_rounds_to_whole_degree() {
        let station = station();
        let event_day = NaiveDate::from_ymd_opt(2025, 11, 17).unwrap();
        let window_start = local_midnight_utc(&station, event_day).unwrap();
        let observations = vec![Observation {
            time: window_start + Duration::hours(12),
            temp_f: 62.4,
        }];

        let venue = VenueTag("polymarket".to_string());
        let high = client()
            .daily_high(&observations, &station, event_day, Some(&venue))
            .unwrap();
        assert_eq!(high, 62.0);
    }

    #[test]
    fn no_observations_in_window_is_not_found() {
        let station = station();
        let event_day = NaiveDate::from_ymd_opt(2025, 11, 17).unwrap();
        let result = client().daily_high(&[], &station, event_day, None);
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }
}
