//! Probability Mapper (C5): turns 24 hourly forecast samples into a
//! per-bracket probability distribution over the event day's daily high.

use statrs::distribution::{ContinuousCDF, Normal};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::forecast::Forecast;
use crate::market::Bracket;
use crate::registry::VenueTag;

/// Baseline single-hour dispersion before the √2 daily-high inflation.
/// Chosen to match the day-1 forecast error the teacher's NOAA client
/// assumed (see DESIGN.md); there is no canonical value upstream.
const SIGMA_DEFAULT: f64 = 3.5;
const SIGMA_MIN: f64 = 0.5;
const SIGMA_MAX: f64 = 10.0;

#[derive(Debug, Clone)]
pub struct BracketProbability {
    pub market_id: String,
    pub condition_id: String,
    pub label: String,
    pub min_temp: f64,
    pub max_temp: f64,
    pub probability: f64,
    pub mu: f64,
    pub sigma: f64,
}

/// `map_daily_high(forecast, brackets, venue) -> sequence<BracketProbability>`.
pub fn map_daily_high(
    forecast: &Forecast,
    brackets: &[Bracket],
    venue: Option<&VenueTag>,
) -> EngineResult<Vec<BracketProbability>> {
    if brackets.is_empty() {
        return Ok(Vec::new());
    }

    let transformed = transform_samples(forecast, venue);
    let mu = transformed
        .iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);
    let sigma = compute_sigma(&transformed);

    let dist = Normal::new(mu, sigma).map_err(|e| {
        EngineError::ProviderError {
            source: "mapper",
            message: format!("invalid normal distribution (mu={mu}, sigma={sigma}): {e}"),
        }
    })?;

    let mut raw: Vec<(f64, &Bracket)> = brackets
        .iter()
        .map(|b| {
            let upper_cdf = if b.max_temp.is_infinite() {
                1.0
            } else {
                dist.cdf(b.max_temp)
            };
            let lower_cdf = if b.min_temp.is_infinite() {
                0.0
            } else {
                dist.cdf(b.min_temp)
            };
            ((upper_cdf - lower_cdf).max(0.0), b)
        })
        .collect();

    let total: f64 = raw.iter().map(|(p, _)| p).sum();

    let uniform_fallback = total <= 0.0;
    if uniform_fallback {
        debug!(
            station = %forecast.station_code,
            "bracket set is far from mu={mu:.1}; falling back to uniform distribution"
        );
        let n = raw.len() as f64;
        for (p, _) in raw.iter_mut() {
            *p = 1.0 / n;
        }
    } else {
        for (p, _) in raw.iter_mut() {
            *p /= total;
        }
    }

    Ok(raw
        .into_iter()
        .map(|(probability, bracket)| BracketProbability {
            market_id: bracket.market_id.clone(),
            condition_id: bracket.condition_id.clone(),
            label: bracket.label.clone(),
            min_temp: bracket.min_temp,
            max_temp: bracket.max_temp,
            probability,
            mu,
            sigma,
        })
        .collect())
}

/// Kelvin -> Fahrenheit, with Polymarket's resolution chain (Kelvin ->
/// Celsius -> round whole -> Fahrenheit -> round whole) for Polymarket
/// stations, direct Kelvin -> Fahrenheit otherwise.
fn transform_samples(forecast: &Forecast, venue: Option<&VenueTag>) -> Vec<f64> {
    let is_polymarket = venue.is_some_and(VenueTag::is_polymarket);
    forecast
        .temperatures_kelvin()
        .into_iter()
        .map(|kelvin| {
            if is_polymarket {
                let celsius = (kelvin - 273.15).round();
                (celsius * 9.0 / 5.0 + 32.0).round()
            } else {
                (kelvin - 273.15) * 9.0 / 5.0 + 32.0
            }
        })
        .collect()
}

fn compute_sigma(samples: &[f64]) -> f64 {
    let inflated = stdev(samples) * std::f64::consts::SQRT_2;
    (SIGMA_DEFAULT * 0.5).max(inflated).clamp(SIGMA_MIN, SIGMA_MAX)
}

fn stdev(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let variance =
        samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (samples.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn bracket(label: &str, min: f64, max: f64) -> Bracket {
        Bracket {
            market_id: label.to_string(),
            condition_id: label.to_string(),
            label: label.to_string(),
            min_temp: min,
            max_temp: max,
            closed: false,
            liquidity: None,
        }
    }

    fn forecast(kelvin_samples: Vec<f64>) -> Forecast {
        use crate::forecast::ForecastPoint;
        let start = chrono_tz::America::New_York
            .with_ymd_and_hms(2025, 11, 17, 0, 0, 0)
            .unwrap()
            .fixed_offset();
        Forecast {
            points: kelvin_samples
                .into_iter()
                .enumerate()
                .map(|(i, temperature_kelvin)| ForecastPoint {
                    time: start + chrono::Duration::hours(i as i64),
                    temperature_kelvin,
                })
                .collect(),
            fetch_time: Utc.with_ymd_and_hms(2025, 11, 17, 0, 0, 0).unwrap(),
            event_day: NaiveDate::from_ymd_opt(2025, 11, 17).unwrap(),
            station_code: "KNYC".to_string(),
            start_local: start,
        }
    }

    #[test]
    fn probabilities_sum_to_one() {
        let f = forecast(vec![290.0; 24]);
        let brackets = vec![
            bracket("60-62", 60.0, 62.0),
            bracket("62-64", 62.0, 64.0),
            bracket("64-66", 64.0, 66.0),
        ];
        let result = map_daily_high(&f, &brackets, None).unwrap();
        let sum: f64 = result.iter().map(|b| b.probability).sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(result.iter().all(|b| b.probability >= 0.0));
    }

    #[test]
    fn degenerate_forecast_has_floor_sigma() {
        let f = forecast(vec![290.0; 24]);
        let brackets = vec![bracket("x", 0.0, 200.0)];
        let result = map_daily_high(&f, &brackets, None).unwrap();
        assert!(result[0].sigma >= SIGMA_DEFAULT * 0.5 - 1e-9);
    }

    #[test]
    fn far_bracket_set_falls_back_to_uniform() {
        let f = forecast(vec![290.0; 24]);
        let brackets = vec![bracket("a", 500.0, 501.0), bracket("b", 501.0, 502.0)];
        let result = map_daily_high(&f, &brackets, None).unwrap();
        assert_eq!(result[0].probability, 0.5);
        assert_eq!(result[1].probability, 0.5);
    }

    #[test]
    fn polymarket_rounding_chain_applies() {
        // 290.0K = 16.85C -> rounds to 17C -> 62.6F -> rounds to 63F.
        let f = forecast(vec![290.0; 24]);
        let venue = VenueTag("polymarket".to_string());
        let brackets = vec![bracket("62-63", 62.0, 63.0), bracket("63-64", 63.0, 64.0)];
        let result = map_daily_high(&f, &brackets, Some(&venue)).unwrap();
        assert!(result[0].mu == 63.0);
    }
}
