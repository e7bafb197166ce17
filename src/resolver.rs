//! Trade Resolver (C9): joins the ledger against C3's `outcome_prices` to
//! turn `pending` rows into `win`/`loss` with realized P&L.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{NaiveDate, Utc};
use tracing::{debug, warn};

use crate::broker::{self, LedgerRow};
use crate::error::EngineResult;
use crate::market::MarketClient;

#[derive(Debug, Default)]
pub struct ResolutionReport {
    pub event_day: Option<NaiveDate>,
    pub rows_resolved: usize,
    pub rows_already_terminal: usize,
    pub rows_left_pending: usize,
    pub groups_unresolved: usize,
}

pub struct TradeResolver<'a> {
    market: &'a MarketClient,
    root: PathBuf,
}

impl<'a> TradeResolver<'a> {
    pub fn new(market: &'a MarketClient, root: impl Into<PathBuf>) -> Self {
        Self {
            market,
            root: root.into(),
        }
    }

    /// `resolve(event_day, station_code=None) -> ResolutionReport`. Idempotent:
    /// rows already in a terminal outcome are skipped, and groups whose
    /// event hasn't settled yet are left `pending` without error.
    pub async fn resolve(
        &self,
        event_day: NaiveDate,
        station_code: Option<&str>,
    ) -> EngineResult<ResolutionReport> {
        let path = broker::ledger_path(&self.root, event_day);
        let mut rows: Vec<LedgerRow> = match broker::read_ledger(&path) {
            Ok(rows) => rows,
            Err(_) if !path.exists() => Vec::new(),
            Err(e) => return Err(e),
        };

        let mut report = ResolutionReport {
            event_day: Some(event_day),
            ..Default::default()
        };

        let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, row) in rows.iter().enumerate() {
            if let Some(code) = station_code {
                if row.station != code {
                    continue;
                }
            }
            groups
                .entry(row.event_identifier.clone())
                .or_default()
                .push(idx);
        }

        for (event_identifier, indices) in groups {
            let pending_indices: Vec<usize> = indices
                .iter()
                .copied()
                .filter(|&i| !rows[i].is_terminal())
                .collect();

            report.rows_already_terminal += indices.len() - pending_indices.len();

            if pending_indices.is_empty() {
                continue;
            }

            let outcomes = match self.market.outcome_prices(&event_identifier).await {
                Ok(outcomes) => outcomes,
                Err(e) => {
                    debug!(%event_identifier, error = %e, "event not yet settled, leaving rows pending");
                    report.rows_left_pending += pending_indices.len();
                    report.groups_unresolved += 1;
                    continue;
                }
            };

            // The winning bracket may or may not be one we traded; find it
            // among our own rows (if any) purely for the audit field. A row
            // resolves win/loss independently based on its own condition_id,
            // regardless of whether any of our positions happened to win.
            let winner_label = pending_indices
                .iter()
                .find(|&&i| outcomes.get(&rows[i].condition_id).map(String::as_str) == Some("1"))
                .map(|&i| rows[i].bracket_label.clone());

            if winner_label.is_none() {
                debug!(%event_identifier, "settled event's winning bracket was not among our traded rows");
            }

            let resolved_at = Utc::now();
            for &i in &pending_indices {
                let Some(outcome) = outcomes.get(&rows[i].condition_id) else {
                    warn!(%event_identifier, condition_id = %rows[i].condition_id, "settled event has no outcome for this row's market, leaving pending");
                    report.rows_left_pending += 1;
                    continue;
                };
                let is_winner = outcome == "1";
                let row = &mut rows[i];
                row.winner_bracket = winner_label.clone();
                row.resolved_at = Some(resolved_at);
                if is_winner {
                    let p_market = if row.p_market > 0.0 { row.p_market } else { 0.5 };
                    row.outcome = "win".to_string();
                    row.realized_pnl = Some(round2(row.size * (1.0 / p_market - 1.0)));
                } else {
                    row.outcome = "loss".to_string();
                    row.realized_pnl = Some(-row.size);
                }
                report.rows_resolved += 1;
            }
        }

        if report.rows_resolved > 0 {
            broker::rewrite_ledger(&path, &rows)?;
        }

        Ok(report)
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
