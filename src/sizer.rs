//! Edge & Sizer (C6): turns priced bracket probabilities into sized paper
//! trading decisions — microstructure adjustments, edge, Kelly fraction,
//! and capped sizing.

use chrono::{DateTime, NaiveDate, TimeZone, Timelike, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::EngineConfig;
use crate::mapper::BracketProbability;
use crate::observation::Observation;
use crate::registry::Station;

/// Per-hour minute marks the observation provider refreshes at, keyed by
/// station code. Stations not listed default to a single mark at :50, the
/// common case among the teacher's tracked stations.
const OBSERVATION_MARKS: &[(&str, &[u32])] = &[("KNYC", &[20, 50]), ("KORD", &[50])];
const DEFAULT_OBSERVATION_MARKS: &[u32] = &[50];

fn observation_marks(station_code: &str) -> &'static [u32] {
    OBSERVATION_MARKS
        .iter()
        .find(|(code, _)| *code == station_code)
        .map(|(_, marks)| *marks)
        .unwrap_or(DEFAULT_OBSERVATION_MARKS)
}

/// A `BracketProbability` joined with its market-side price (C3 `midprob`)
/// and liquidity/closed state, the unit C6 operates on.
#[derive(Debug, Clone, Serialize)]
pub struct PricedBracket {
    pub market_id: String,
    pub condition_id: String,
    pub label: String,
    #[serde(serialize_with = "crate::finite::serialize")]
    pub min_temp: f64,
    #[serde(serialize_with = "crate::finite::serialize")]
    pub max_temp: f64,
    pub p_model: f64,
    pub p_market: Option<f64>,
    pub sigma: f64,
    pub mu: f64,
    pub closed: bool,
    pub liquidity: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DecisionReason {
    Ok,
    BelowEdgeMin,
    KellyCapped,
    MarketCapped,
    LiquidityCapped,
    SkippedClosed,
    SkippedNoPrice,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::Ok => "ok",
            DecisionReason::BelowEdgeMin => "below_edge_min",
            DecisionReason::KellyCapped => "kelly_capped",
            DecisionReason::MarketCapped => "market_capped",
            DecisionReason::LiquidityCapped => "liquidity_capped",
            DecisionReason::SkippedClosed => "skipped_closed",
            DecisionReason::SkippedNoPrice => "skipped_no_price",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub market_id: String,
    pub condition_id: String,
    pub label: String,
    #[serde(serialize_with = "crate::finite::serialize")]
    pub min_temp: f64,
    #[serde(serialize_with = "crate::finite::serialize")]
    pub max_temp: f64,
    pub edge: f64,
    pub kelly_fraction: f64,
    pub size: f64,
    pub p_model: f64,
    pub p_market: f64,
    pub sigma: f64,
    pub reason: DecisionReason,
}

/// Inputs to the microstructure adjustments that don't come from the
/// bracket itself: the wall-clock instant, the station (for its timezone
/// and observation cadence), recent observations for trend, and the prior
/// day's observed high for cross-day bleed detection.
pub struct SizingContext<'a> {
    pub now: DateTime<Utc>,
    pub station: &'a Station,
    pub event_day: NaiveDate,
    pub recent_observations: &'a [Observation],
    pub prior_day_high: Option<f64>,
}

/// `decide(bracket_probs, bankroll, context) -> sequence<Decision>`. Any
/// decision with positive size is returned, sorted by edge descending —
/// this includes capped decisions (`kelly_capped`, `market_capped`,
/// `liquidity_capped`), whose `reason` is an audit tag for which bound
/// applied, not a signal to drop them. Only the true discard reasons
/// (`below_edge_min`, `skipped_closed`, `skipped_no_price`) ever carry a
/// zero size and so are filtered out here.
pub fn decide(
    priced: &[PricedBracket],
    bankroll: f64,
    config: &EngineConfig,
    context: &SizingContext,
) -> Vec<Decision> {
    let mut decisions: Vec<Decision> = priced
        .iter()
        .map(|bracket| evaluate_bracket(bracket, bankroll, config, context))
        .collect();

    decisions.retain(|d| d.size > 0.0);
    decisions.sort_by(|a, b| b.edge.partial_cmp(&a.edge).unwrap_or(std::cmp::Ordering::Equal));
    decisions
}

fn evaluate_bracket(
    bracket: &PricedBracket,
    bankroll: f64,
    config: &EngineConfig,
    context: &SizingContext,
) -> Decision {
    let base = |reason: DecisionReason| Decision {
        market_id: bracket.market_id.clone(),
        condition_id: bracket.condition_id.clone(),
        label: bracket.label.clone(),
        min_temp: bracket.min_temp,
        max_temp: bracket.max_temp,
        edge: 0.0,
        kelly_fraction: 0.0,
        size: 0.0,
        p_model: bracket.p_model,
        p_market: bracket.p_market.unwrap_or(0.0),
        sigma: bracket.sigma,
        reason,
    };

    if bracket.closed {
        return base(DecisionReason::SkippedClosed);
    }
    let Some(p_market) = bracket.p_market else {
        return base(DecisionReason::SkippedNoPrice);
    };

    if bracket.liquidity.unwrap_or(0.0) < config.liquidity_min {
        return base(DecisionReason::LiquidityCapped);
    }

    let adjustment = microstructure_adjustment(bracket, context);
    let p_model_adjusted = (bracket.p_model + adjustment).clamp(0.0, 1.0);
    if adjustment.abs() > 0.05 {
        debug!(
            bracket = %bracket.label,
            adjustment,
            p_model = bracket.p_model,
            p_model_adjusted,
            "microstructure adjustment applied"
        );
    }

    let edge = p_model_adjusted - p_market - config.fee_rate() - config.slippage_rate();
    if edge < config.edge_min {
        return Decision {
            p_model: p_model_adjusted,
            p_market,
            ..base(DecisionReason::BelowEdgeMin)
        };
    }

    let q = p_market.clamp(1e-6, 1.0 - 1e-6);
    let b = 1.0 / q - 1.0;
    let kelly_fraction = ((b * p_model_adjusted - (1.0 - p_model_adjusted)) / b).max(0.0);

    let by_kelly = kelly_fraction * bankroll;
    let by_kelly_cap = config.kelly_cap * bankroll;
    let by_market_cap = config.per_market_cap;
    let by_liquidity = bracket.liquidity.unwrap_or(f64::INFINITY);

    let (size, reason) = [
        (by_kelly, DecisionReason::Ok),
        (by_kelly_cap, DecisionReason::KellyCapped),
        (by_market_cap, DecisionReason::MarketCapped),
        (by_liquidity, DecisionReason::LiquidityCapped),
    ]
    .into_iter()
    .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
    .unwrap();

    Decision {
        market_id: bracket.market_id.clone(),
        condition_id: bracket.condition_id.clone(),
        label: bracket.label.clone(),
        min_temp: bracket.min_temp,
        max_temp: bracket.max_temp,
        edge,
        kelly_fraction,
        size,
        p_model: p_model_adjusted,
        p_market,
        sigma: bracket.sigma,
        reason,
    }
}

fn microstructure_adjustment(bracket: &PricedBracket, context: &SizingContext) -> f64 {
    rounding_risk_adjustment(bracket)
        + observation_window_adjustment(bracket, context)
        + cross_day_bleed_adjustment(bracket, context)
}

/// When mu sits within 0.1 degF of an integer boundary and the bracket is
/// adjacent to that boundary, subtract up to 0.15 for flip risk.
fn rounding_risk_adjustment(bracket: &PricedBracket) -> f64 {
    let boundary = bracket.mu.round();
    let distance = (bracket.mu - boundary).abs();
    if distance > 0.1 {
        return 0.0;
    }
    let adjacent = bracket.min_temp == boundary || bracket.max_temp == boundary;
    if !adjacent {
        return 0.0;
    }
    -0.15 * (1.0 - distance / 0.1)
}

/// When the current instant is within 5 minutes of the station's next
/// observation refresh and the recent trend extrapolates into (or out of)
/// the bracket, add up to +-0.15 scaled by trend strength and proximity.
fn observation_window_adjustment(bracket: &PricedBracket, context: &SizingContext) -> f64 {
    let marks = observation_marks(&context.station.code);
    let local_now = context.now.with_timezone(&context.station.timezone);
    let minute = local_now.minute();

    let minutes_to_next_mark = marks
        .iter()
        .map(|&mark| {
            if mark >= minute {
                mark - minute
            } else {
                60 - minute + mark
            }
        })
        .min()
        .unwrap_or(60);

    if minutes_to_next_mark > 5 {
        return 0.0;
    }

    let Some((last, prev)) = context
        .recent_observations
        .last()
        .zip(context.recent_observations.iter().rev().nth(1))
    else {
        return 0.0;
    };

    let trend = last.temp_f - prev.temp_f;
    if trend == 0.0 {
        return 0.0;
    }

    let extrapolated = last.temp_f + trend;
    let proximity_scale = 1.0 - (minutes_to_next_mark as f64 / 5.0);
    let strength_scale = (trend.abs() / 3.0).min(1.0);
    let magnitude = 0.15 * proximity_scale * strength_scale;

    if bracket.contains(extrapolated) {
        magnitude
    } else {
        -magnitude
    }
}

/// Between station-local 00:00 and 06:00 of the event day, if the most
/// recent observation is within 1 degF of the prior day's observed high and
/// the model predicts a higher daily high, add up to 0.10 to the bracket
/// that reflects that higher prediction, scaled inversely by hour.
fn cross_day_bleed_adjustment(bracket: &PricedBracket, context: &SizingContext) -> f64 {
    let Some(prior_high) = context.prior_day_high else {
        return 0.0;
    };
    let local_now = context.now.with_timezone(&context.station.timezone);
    let hour = local_now.hour();
    if hour >= 6 {
        return 0.0;
    }
    let Some(last) = context.recent_observations.last() else {
        return 0.0;
    };
    if (last.temp_f - prior_high).abs() > 1.0 {
        return 0.0;
    }
    if bracket.mu <= prior_high {
        return 0.0;
    }
    if bracket.min_temp < prior_high {
        return 0.0;
    }

    let premium = (bracket.mu - prior_high).max(0.0);
    let hour_scale = (6 - hour) as f64 / 6.0;
    (0.10 * hour_scale).min(premium * 0.05 * hour_scale)
}

impl PricedBracket {
    fn contains(&self, value: f64) -> bool {
        value >= self.min_temp && value < self.max_temp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn config() -> EngineConfig {
        EngineConfig {
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
            forecast_base_url: String::new(),
            forecast_token: None,
            market_base_url: String::new(),
            clob_base_url: String::new(),
            observation_base_url: String::new(),
        }
    }

    fn bracket(p_model: f64, p_market: f64, liquidity: f64) -> PricedBracket {
        PricedBracket {
            market_id: "m1".to_string(),
            condition_id: "c1".to_string(),
            label: "60-62".to_string(),
            min_temp: 60.0,
            max_temp: 62.0,
            p_model,
            p_market: Some(p_market),
            sigma: 2.0,
            mu: 61.0,
            closed: false,
            liquidity: Some(liquidity),
        }
    }

    fn context(station: &Station) -> SizingContext<'_> {
        SizingContext {
            now: chrono_tz::America::New_York
                .with_ymd_and_hms(2025, 11, 17, 12, 0, 0)
                .unwrap()
                .with_timezone(&Utc),
            station,
            event_day: NaiveDate::from_ymd_opt(2025, 11, 17).unwrap(),
            recent_observations: &[],
            prior_day_high: None,
        }
    }

    #[test]
    fn positive_edge_yields_ok_decision() {
        let station = station();
        let cfg = config();
        let priced = vec![bracket(0.6, 0.3, 2000.0)];
        let ctx = context(&station);
        let decisions = decide(&priced, 1000.0, &cfg, &ctx);
        assert_eq!(decisions.len(), 1);
        assert!(decisions[0].edge > 0.0);
        assert!(decisions[0].size > 0.0);
    }

    #[test]
    fn below_edge_min_is_dropped() {
        let station = station();
        let cfg = config();
        let priced = vec![bracket(0.31, 0.3, 2000.0)];
        let ctx = context(&station);
        let decisions = decide(&priced, 1000.0, &cfg, &ctx);
        assert!(decisions.is_empty());
    }

    #[test]
    fn closed_bracket_is_dropped() {
        let station = station();
        let cfg = config();
        let mut b = bracket(0.6, 0.3, 2000.0);
        b.closed = true;
        let ctx = context(&station);
        let decisions = decide(&[b], 1000.0, &cfg, &ctx);
        assert!(decisions.is_empty());
    }

    #[test]
    fn illiquid_bracket_is_dropped() {
        let station = station();
        let cfg = config();
        let priced = vec![bracket(0.6, 0.3, 10.0)];
        let ctx = context(&station);
        let decisions = decide(&priced, 1000.0, &cfg, &ctx);
        assert!(decisions.is_empty());
    }

    #[test]
    fn size_is_capped_by_per_market_cap() {
        let station = station();
        let mut cfg = config();
        cfg.kelly_cap = 1.0;
        cfg.per_market_cap = 5.0;
        let priced = vec![bracket(0.9, 0.2, 1_000_000.0)];
        let ctx = context(&station);
        let decisions = decide(&priced, 1_000_000.0, &cfg, &ctx);
        assert_eq!(decisions.len(), 1);
        assert!(decisions[0].size <= 5.0);
        assert_eq!(decisions[0].reason, DecisionReason::MarketCapped);
    }

    #[test]
    fn decisions_sorted_by_edge_descending() {
        let station = station();
        let cfg = config();
        let priced = vec![bracket(0.55, 0.3, 2000.0), bracket(0.8, 0.3, 2000.0)];
        let ctx = context(&station);
        let decisions = decide(&priced, 1000.0, &cfg, &ctx);
        assert!(decisions[0].edge >= decisions[1].edge);
    }
}
