//! Dynamic Engine (C10): the cooperative scheduler. On each tick it iterates
//! (station × event_day) pairs in the configured lookahead window and
//! drives the forecast/market/observation clients through the mapper and
//! sizer to a paper-traded, snapshotted decision set.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::broker::PaperBroker;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::forecast::{ForecastClient, StartLocal};
use crate::mapper;
use crate::market::MarketClient;
use crate::notifications::TelegramNotifier;
use crate::observation::ObservationClient;
use crate::registry::{Station, StationRegistry};
use crate::sizer::{self, PricedBracket, SizingContext};
use crate::snapshot::Snapshotter;
use crate::toggles::CalibrationGate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Initialized,
    Running,
    Stopping,
    Stopped,
}

pub struct DynamicEngine {
    config: EngineConfig,
    registry: StationRegistry,
    station_codes: Vec<String>,
    forecast_client: ForecastClient,
    market_client: MarketClient,
    observation_client: ObservationClient,
    gate: CalibrationGate,
    snapshotter: Snapshotter,
    broker: PaperBroker,
    notifier: TelegramNotifier,
    state: EngineState,
}

impl DynamicEngine {
    pub fn new(
        config: EngineConfig,
        registry: StationRegistry,
        station_codes: Vec<String>,
        data_root: impl Into<PathBuf>,
    ) -> EngineResult<Self> {
        let data_root = data_root.into();
        let forecast_client = ForecastClient::new(&config)?;
        let market_client = MarketClient::new(&config)?;
        let observation_client = ObservationClient::new(&config)?;
        Ok(Self {
            config,
            registry,
            station_codes,
            forecast_client,
            market_client,
            observation_client,
            gate: CalibrationGate::new(),
            snapshotter: Snapshotter::new(data_root.clone()),
            broker: PaperBroker::new(data_root),
            notifier: TelegramNotifier::new(),
            state: EngineState::Initialized,
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// `run()`: `initialized -> running -> stopping -> stopped`. Runs until
    /// `cancel` reports `true`, checked at each (station, day) boundary and
    /// at the cycle-end sleep — the one intentional long suspension.
    pub async fn run(&mut self, mut cancel: watch::Receiver<bool>) -> EngineResult<()> {
        self.state = EngineState::Running;

        'cycles: loop {
            if *cancel.borrow() {
                break;
            }

            let cycle_start = Instant::now();
            let cycle_time = Utc::now();
            info!(%cycle_time, "cycle begin");

            for station_code in self.station_codes.clone() {
                if *cancel.borrow() {
                    self.state = EngineState::Stopping;
                    break 'cycles;
                }

                let station = match self.registry.get(&station_code) {
                    Ok(s) => s.clone(),
                    Err(e) => return Err(e),
                };

                let today = Utc::now().with_timezone(&station.timezone).date_naive();
                for offset in 0..self.config.lookahead_days {
                    if *cancel.borrow() {
                        self.state = EngineState::Stopping;
                        break 'cycles;
                    }

                    let event_day = today + chrono::Duration::days(offset);
                    match self.run_station_day(&station, event_day, cycle_time).await {
                        Ok(()) => {}
                        Err(e @ EngineError::ConfigError(_)) => {
                            warn!(station = %station.code, %event_day, error = %e, "fatal configuration error, aborting engine");
                            return Err(e);
                        }
                        Err(e) => {
                            warn!(station = %station.code, %event_day, error = %e, "cycle step failed, continuing with next pair");
                            self.notifier
                                .notify_cycle_error(&station.code, event_day, &e.to_string())
                                .await;
                        }
                    }
                }
            }

            let elapsed = cycle_start.elapsed();
            let sleep_for = Duration::from_secs(self.config.interval_seconds)
                .checked_sub(elapsed)
                .unwrap_or(Duration::ZERO);
            debug!(?elapsed, ?sleep_for, "cycle complete");

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        self.state = EngineState::Stopping;
                        break;
                    }
                }
            }
        }

        self.state = EngineState::Stopped;
        Ok(())
    }

    /// Steps 2(a)-(i) for one (station, event_day) pair.
    async fn run_station_day(
        &self,
        station: &Station,
        event_day: NaiveDate,
        cycle_time: DateTime<Utc>,
    ) -> EngineResult<()> {
        let brackets = match self.market_client.discover(&station.city, event_day).await {
            Ok(set) => set,
            Err(EngineError::NotFound(msg)) => {
                debug!(station = %station.code, %event_day, %msg, "no event discovered");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if !brackets.any_open() {
            debug!(station = %station.code, %event_day, "event has no open brackets, terminated");
            return Ok(());
        }

        let start_local = local_midnight(station, event_day)?;
        let forecast = self
            .forecast_client
            .fetch(
                station,
                StartLocal::Aware(start_local),
                24,
                event_day,
                &self.gate,
            )
            .await?;

        let observations = self
            .observation_client
            .observations(station, event_day)
            .await
            .unwrap_or_default();

        let prior_day_high = match event_day.pred_opt() {
            Some(prior_day) => match self.observation_client.observations(station, prior_day).await {
                Ok(prior_obs) => self
                    .observation_client
                    .daily_high(&prior_obs, station, prior_day, Some(&station.primary_venue))
                    .ok(),
                Err(_) => None,
            },
            None => None,
        };

        let bracket_probs = mapper::map_daily_high(
            &forecast,
            &brackets.brackets,
            Some(&station.primary_venue),
        )?;

        let mut priced = Vec::with_capacity(bracket_probs.len());
        for (prob, bracket) in bracket_probs.into_iter().zip(brackets.brackets.iter()) {
            let p_market = match self.market_client.midprob(bracket).await {
                Ok(p) => Some(p),
                Err(EngineError::NoPrice(msg)) => {
                    warn!(station = %station.code, bracket = %bracket.label, %msg, "no price for bracket");
                    None
                }
                Err(e) => return Err(e),
            };
            priced.push(PricedBracket {
                market_id: prob.market_id,
                condition_id: prob.condition_id,
                label: prob.label,
                min_temp: prob.min_temp,
                max_temp: prob.max_temp,
                p_model: prob.probability,
                p_market,
                sigma: prob.sigma,
                mu: prob.mu,
                closed: bracket.closed,
                liquidity: bracket.liquidity,
            });
        }

        let context = SizingContext {
            now: cycle_time,
            station,
            event_day,
            recent_observations: &observations,
            prior_day_high,
        };

        let decisions = sizer::decide(&priced, self.config.daily_bankroll_cap, &self.config, &context);

        if !decisions.is_empty() {
            self.broker.place(
                &decisions,
                station,
                event_day,
                &brackets.event_identifier,
                &station.primary_venue,
            )?;
            self.notifier
                .notify_decisions(&station.code, event_day, &decisions)
                .await;
        }

        self.snapshotter
            .save_cycle(&forecast, &priced, &decisions, station, event_day, cycle_time)?;

        Ok(())
    }
}

fn local_midnight(station: &Station, day: NaiveDate) -> EngineResult<DateTime<FixedOffset>> {
    let naive_midnight = day
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| EngineError::InvalidArgument(format!("day {day} has no midnight")))?;
    match station.timezone.from_local_datetime(&naive_midnight) {
        chrono::LocalResult::Single(dt) => Ok(dt.fixed_offset()),
        chrono::LocalResult::Ambiguous(dt, _) => Ok(dt.fixed_offset()),
        chrono::LocalResult::None => Err(EngineError::InvalidArgument(format!(
            "local midnight for {day} does not exist in station timezone (DST gap)"
        ))),
    }
}
