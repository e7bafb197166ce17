use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::http_retry;
use crate::registry::Station;
use crate::toggles::CalibrationGate;

use super::{Forecast, ForecastPoint, StartLocal};

const PROVIDER: &str = "forecast";

#[derive(Debug, Deserialize)]
struct HourlyEnvelope {
    hourly: HourlySeries,
}

#[derive(Debug, Deserialize)]
struct HourlySeries {
    time: Vec<String>,
    temperature_kelvin: Vec<f64>,
}

/// Fetches hourly temperature forecasts keyed by (lat, lon,
/// local-midnight-with-timezone, hours). One client instance per process;
/// the underlying `reqwest::Client` is cheap to clone and pools connections.
pub struct ForecastClient {
    http: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl ForecastClient {
    pub fn new(config: &EngineConfig) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent("weather-edge-engine/0.1")
            .build()
            .map_err(|e| EngineError::ConfigError(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.forecast_base_url.clone(),
            bearer_token: config.forecast_token.clone(),
        })
    }

    /// `fetch(lat, lon, start_local, hours, station_code) -> Forecast`.
    ///
    /// Rejects a naive `start_local` with `invalid_argument` before any
    /// network activity. On success, applies the calibration gate's bias
    /// correction (a no-op unless `station_calibration` is toggled on).
    pub async fn fetch(
        &self,
        station: &Station,
        start_local: StartLocal,
        hours: u32,
        event_day: NaiveDate,
        gate: &CalibrationGate,
    ) -> EngineResult<Forecast> {
        let start_local = start_local.aware().ok_or_else(|| {
            EngineError::InvalidArgument(
                "start_local must be timezone-aware; naive instants are rejected".to_string(),
            )
        })?;

        let url = self.base_url.clone();
        let latitude = station.latitude;
        let longitude = station.longitude;
        let start_time = start_local.to_rfc3339();
        let bearer = self.bearer_token.clone();

        debug!(station = %station.code, %start_time, hours, "requesting forecast");

        let resp = http_retry::send_with_retry(PROVIDER, || {
            let mut req = self.http.get(&url).query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("start_time", start_time.clone()),
                ("predict_hours", hours.to_string()),
            ]);
            if let Some(token) = &bearer {
                req = req.bearer_auth(token);
            }
            req.send()
        })
        .await?;

        let envelope: HourlyEnvelope = resp.json().await.map_err(|e| EngineError::ProviderError {
            source: PROVIDER,
            message: format!("malformed forecast response: {e}"),
        })?;

        if envelope.hourly.time.len() != envelope.hourly.temperature_kelvin.len() {
            return Err(EngineError::ProviderError {
                source: PROVIDER,
                message: "hourly time and temperature series have mismatched lengths".to_string(),
            });
        }

        let mut points = Vec::with_capacity(envelope.hourly.time.len());
        for (t, k) in envelope
            .hourly
            .time
            .iter()
            .zip(envelope.hourly.temperature_kelvin.iter())
        {
            let time = DateTime::parse_from_rfc3339(t).map_err(|e| EngineError::ProviderError {
                source: PROVIDER,
                message: format!("unparsable hourly timestamp '{t}': {e}"),
            })?;
            points.push((time, *k));
        }

        gate.apply(station, &mut points)?;

        let points = points
            .into_iter()
            .map(|(time, temperature_kelvin)| ForecastPoint {
                time,
                temperature_kelvin,
            })
            .collect();

        Ok(Forecast {
            points,
            fetch_time: Utc::now(),
            event_day,
            station_code: station.code.clone(),
            start_local,
        })
    }
}

fn _assert_offset_type(_: DateTime<FixedOffset>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::VenueTag;
    use chrono::NaiveDateTime;

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

    #[tokio::test]
    async fn naive_start_local_is_rejected_before_any_network_call() {
        let config = EngineConfig {
            interval_seconds: 900,
            lookahead_days: 2,
            edge_min: 0.05,
            fee_bp: 50.0,
            slippage_bp: 30.0,
            kelly_cap: 0.10,
            per_market_cap: 500.0,
            liquidity_min: 1000.0,
            daily_bankroll_cap: 3000.0,
            model_mode: crate::config::ModelMode::Spread,
            forecast_base_url: "http://127.0.0.1:1".to_string(),
            forecast_token: None,
            market_base_url: String::new(),
            clob_base_url: String::new(),
            observation_base_url: String::new(),
        };
        let client = ForecastClient::new(&config).unwrap();
        let gate = CalibrationGate::at(
            "/tmp/weather-edge-engine-test-toggles-noop.json",
            "/tmp/weather-edge-engine-test-bias-noop.json",
        );
        let naive = StartLocal::Naive(
            NaiveDateTime::parse_from_str("2025-11-17 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap(),
        );
        let result = client
            .fetch(
                &station(),
                naive,
                24,
                NaiveDate::from_ymd_opt(2025, 11, 17).unwrap(),
                &gate,
            )
            .await;
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
    }
}
