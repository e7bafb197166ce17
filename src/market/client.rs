use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::http_retry;

use super::{Bracket, BracketSet};

const PROVIDER: &str = "market";

/// Candidate event-slug builders, tried in order against the Gamma-style
/// events endpoint until one resolves; mirrors the discovery approach for
/// the single slug format this client knows, generalized to a small bounded
/// set so a provider renaming a pattern doesn't immediately break discovery.
const SLUG_BUILDERS: &[fn(&str, NaiveDate) -> String] = &[
    |city, date| {
        format!(
            "highest-temperature-in-{city}-on-{}-{}-{}",
            date.format("%B").to_string().to_lowercase(),
            date.day(),
            date.year()
        )
    },
    |city, date| format!("{city}-high-temperature-{}", date.format("%Y-%m-%d")),
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GammaEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    markets: Vec<GammaMarket>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GammaMarket {
    condition_id: Option<String>,
    question: Option<String>,
    clob_token_ids: Option<String>,
    outcome_prices: Option<String>,
    #[serde(default)]
    closed: Option<bool>,
    #[serde(default)]
    liquidity_num: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OrderBookResponse {
    bids: Option<Vec<OrderLevel>>,
    asks: Option<Vec<OrderLevel>>,
}

#[derive(Debug, Deserialize)]
struct OrderLevel {
    price: String,
    #[allow(dead_code)]
    size: String,
}

pub struct MarketClient {
    http: reqwest::Client,
    gamma_base_url: String,
    clob_base_url: String,
}

impl MarketClient {
    pub fn new(config: &EngineConfig) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent("weather-edge-engine/0.1")
            .build()
            .map_err(|e| EngineError::ConfigError(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            gamma_base_url: config.market_base_url.clone(),
            clob_base_url: config.clob_base_url.clone(),
        })
    }

    /// `discover(city, event_day) -> BracketSet | not_found`. Probes each
    /// candidate slug in turn; the first that yields a known event wins.
    /// Missing events are expected and logged at debug level, never a hard
    /// error.
    pub async fn discover(&self, city: &str, event_day: NaiveDate) -> EngineResult<BracketSet> {
        let city_key = city.to_lowercase().replace(' ', "-");

        for builder in SLUG_BUILDERS {
            let slug = builder(&city_key, event_day);
            let url = format!("{}/events?slug={}", self.gamma_base_url, slug);

            let resp = match http_retry::send_with_retry(PROVIDER, || self.http.get(&url).send()).await
            {
                Ok(resp) => resp,
                Err(e) => {
                    debug!(city, %slug, error = %e, "candidate slug probe failed");
                    continue;
                }
            };

            let events: Vec<GammaEvent> = match resp.json().await {
                Ok(events) => events,
                Err(e) => {
                    debug!(city, %slug, error = %e, "candidate slug returned unparsable body");
                    continue;
                }
            };

            let Some(event) = events.into_iter().next() else {
                debug!(city, %slug, "no event for candidate slug");
                continue;
            };

            let brackets: Vec<Bracket> = event
                .markets
                .iter()
                .filter_map(|m| parse_bracket(m))
                .collect();

            if brackets.is_empty() {
                debug!(city, %slug, "event had no parsable brackets");
                continue;
            }

            return Ok(BracketSet {
                event_identifier: event.id.unwrap_or(slug),
                city: city.to_string(),
                event_day,
                brackets,
            });
        }

        Err(EngineError::NotFound(format!(
            "no event for city '{city}' on {event_day}"
        )))
    }

    /// `midprob(bracket) -> probability | no_price`.
    pub async fn midprob(&self, bracket: &Bracket) -> EngineResult<f64> {
        if bracket.closed {
            return Err(EngineError::NoPrice(format!(
                "bracket '{}' is closed",
                bracket.label
            )));
        }

        let url = format!(
            "{}/book?token_id={}",
            self.clob_base_url, bracket.market_id
        );
        let resp = http_retry::send_with_retry(PROVIDER, || self.http.get(&url).send()).await?;
        let book: OrderBookResponse = resp.json().await.map_err(|e| EngineError::ProviderError {
            source: PROVIDER,
            message: format!("malformed order book: {e}"),
        })?;

        let best_bid = book
            .bids
            .unwrap_or_default()
            .into_iter()
            .filter_map(|l| l.price.parse::<f64>().ok())
            .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.max(p))));
        let best_ask = book
            .asks
            .unwrap_or_default()
            .into_iter()
            .filter_map(|l| l.price.parse::<f64>().ok())
            .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.min(p))));

        match (best_bid, best_ask) {
            (Some(bid), Some(ask)) => Ok((bid + ask) / 2.0),
            _ => Err(EngineError::NoPrice(format!(
                "no two-sided book for bracket '{}'",
                bracket.label
            ))),
        }
    }

    /// `outcome_prices(event_identifier) -> map<market_id, "0"|"1"> | unresolved`.
    pub async fn outcome_prices(
        &self,
        event_identifier: &str,
    ) -> EngineResult<HashMap<String, String>> {
        let url = format!(
            "{}/events?id={}",
            self.gamma_base_url, event_identifier
        );
        let resp = http_retry::send_with_retry(PROVIDER, || self.http.get(&url).send()).await?;
        let events: Vec<GammaEvent> = resp.json().await.map_err(|e| EngineError::ProviderError {
            source: PROVIDER,
            message: format!("malformed event response: {e}"),
        })?;

        let event = events
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::NotFound(format!("event '{event_identifier}'")))?;

        let mut out = HashMap::new();
        for market in &event.markets {
            let Some(condition_id) = &market.condition_id else {
                continue;
            };
            let Some(prices_str) = &market.outcome_prices else {
                continue;
            };
            let Ok(prices) = serde_json::from_str::<Vec<String>>(prices_str) else {
                continue;
            };
            let Some(yes_raw) = prices.first() else {
                continue;
            };
            let yes: f64 = yes_raw.parse().unwrap_or(0.5);
            if (yes - 1.0).abs() < 0.01 {
                out.insert(condition_id.clone(), "1".to_string());
            } else if yes.abs() < 0.01 {
                out.insert(condition_id.clone(), "0".to_string());
            }
            // Mid-range prices mean the market has not settled yet; omitted.
        }

        if out.is_empty() {
            return Err(EngineError::Unresolved(format!(
                "event '{event_identifier}' has not settled"
            )));
        }

        Ok(out)
    }
}

fn parse_bracket(market: &GammaMarket) -> Option<Bracket> {
    let condition_id = market.condition_id.clone()?;
    let question = market.question.as_deref()?;
    let tokens: Vec<String> = market
        .clob_token_ids
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok())?;
    let market_id = tokens.first()?.clone();
    let (min_temp, max_temp) = parse_temp_range(question)?;

    Some(Bracket {
        market_id,
        condition_id,
        label: question.to_string(),
        min_temp,
        max_temp,
        closed: market.closed.unwrap_or(false),
        liquidity: market.liquidity_num,
    })
}

/// Parses "38-39", "52 or higher", "37 or lower" style bracket labels into
/// `[min, max)`.
fn parse_temp_range(question: &str) -> Option<(f64, f64)> {
    let q = question.to_lowercase();
    let normalized = q.replace('\u{2013}', "-");

    if normalized.contains("or higher") || normalized.contains("or more") {
        let temp = extract_number(&normalized)?;
        return Some((temp, f64::INFINITY));
    }
    if normalized.contains("or lower") || normalized.contains("or less") {
        let temp = extract_number(&normalized)?;
        return Some((f64::NEG_INFINITY, temp));
    }
    for word in normalized.split_whitespace() {
        let clean: String = word
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '-' || *c == '.')
            .collect();
        if let Some(dash) = clean.char_indices().skip(1).find(|(_, c)| *c == '-').map(|(i, _)| i) {
            let (left, right) = clean.split_at(dash);
            if let (Ok(min), Ok(max)) = (left.parse::<f64>(), right[1..].parse::<f64>()) {
                return Some((min, max + 1.0));
            }
        }
    }
    let temp = extract_number(&normalized)?;
    Some((temp, temp + 1.0))
}

fn extract_number(text: &str) -> Option<f64> {
    for word in text.split_whitespace() {
        let clean: String = word
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
            .collect();
        if let Ok(v) = clean.parse::<f64>() {
            if v.abs() < 200.0 {
                return Some(v);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_range_bucket() {
        assert_eq!(parse_temp_range("38-39\u{b0}F").unwrap(), (38.0, 40.0));
    }

    #[test]
    fn parses_or_higher() {
        let (min, max) = parse_temp_range("52\u{b0}F or higher").unwrap();
        assert_eq!(min, 52.0);
        assert!(max.is_infinite());
    }

    #[test]
    fn parses_or_lower() {
        let (min, max) = parse_temp_range("37\u{b0}F or lower").unwrap();
        assert!(min.is_infinite() && min < 0.0);
        assert_eq!(max, 37.0);
    }
}
