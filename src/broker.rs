//! Paper Broker (C8): appends sized decisions to a per-event-day CSV
//! ledger. Concurrent appends from multiple stations within one process are
//! serialized by an advisory exclusive lock on the ledger file.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::registry::{Station, VenueTag};
use crate::sizer::Decision;

/// One row of the append-only ledger. The five resolution columns start
/// empty and are filled in place, once, by `resolver::resolve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRow {
    pub timestamp: DateTime<Utc>,
    pub station: String,
    pub event_day: NaiveDate,
    pub event_identifier: String,
    pub bracket_label: String,
    pub lower_f: f64,
    pub upper_f: f64,
    pub market_id: String,
    pub condition_id: String,
    pub edge: f64,
    pub kelly_fraction: f64,
    pub size: f64,
    pub p_model: f64,
    pub p_market: f64,
    pub sigma: f64,
    pub reason: String,
    pub outcome: String,
    pub realized_pnl: Option<f64>,
    pub venue: String,
    pub resolved_at: Option<DateTime<Utc>>,
    pub winner_bracket: Option<String>,
}

impl LedgerRow {
    pub fn is_terminal(&self) -> bool {
        self.outcome == "win" || self.outcome == "loss"
    }

    fn from_decision(
        decision: &Decision,
        station: &Station,
        event_day: NaiveDate,
        event_identifier: &str,
        venue: &VenueTag,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp,
            station: station.code.clone(),
            event_day,
            event_identifier: event_identifier.to_string(),
            bracket_label: decision.label.clone(),
            lower_f: decision.min_temp,
            upper_f: decision.max_temp,
            market_id: decision.market_id.clone(),
            condition_id: decision.condition_id.clone(),
            edge: decision.edge,
            kelly_fraction: decision.kelly_fraction,
            size: decision.size,
            p_model: decision.p_model,
            p_market: decision.p_market,
            sigma: decision.sigma,
            reason: decision.reason.as_str().to_string(),
            outcome: "pending".to_string(),
            realized_pnl: None,
            venue: venue.0.clone(),
            resolved_at: None,
            winner_bracket: None,
        }
    }
}

/// `data/trades/<event_day>/paper_trades.csv`, per spec.md §6's ledger
/// store layout. Shared by the broker (writer) and the resolver (reader).
pub fn ledger_path(root: &Path, event_day: NaiveDate) -> PathBuf {
    root.join("trades")
        .join(event_day.to_string())
        .join("paper_trades.csv")
}

pub struct PaperBroker {
    root: PathBuf,
}

impl PaperBroker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn ledger_path(&self, event_day: NaiveDate) -> PathBuf {
        ledger_path(&self.root, event_day)
    }

    /// `place(decisions) -> ledger_path`. Writes the header row first if the
    /// file is new, then appends one row per decision under a single
    /// exclusive lock held for the whole batch.
    pub fn place(
        &self,
        decisions: &[Decision],
        station: &Station,
        event_day: NaiveDate,
        event_identifier: &str,
        venue: &VenueTag,
    ) -> EngineResult<PathBuf> {
        let path = self.ledger_path(event_day);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        file.lock_exclusive()
            .map_err(|e| EngineError::Io(format!("locking ledger {}: {e}", path.display())))?;

        let result = append_rows(&file, decisions, station, event_day, event_identifier, venue);

        let _ = fs2::FileExt::unlock(&file);
        result?;
        Ok(path)
    }
}

fn append_rows(
    file: &std::fs::File,
    decisions: &[Decision],
    station: &Station,
    event_day: NaiveDate,
    event_identifier: &str,
    venue: &VenueTag,
) -> EngineResult<()> {
    let needs_header = file
        .metadata()
        .map_err(|e| EngineError::Io(e.to_string()))?
        .len()
        == 0;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_header)
        .from_writer(file);

    let now = Utc::now();
    for decision in decisions {
        let row =
            LedgerRow::from_decision(decision, station, event_day, event_identifier, venue, now);
        writer
            .serialize(row)
            .map_err(|e| EngineError::Io(format!("writing ledger row: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| EngineError::Io(format!("flushing ledger: {e}")))?;
    Ok(())
}

pub fn read_ledger(path: &Path) -> EngineResult<Vec<LedgerRow>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| {
        EngineError::Io(format!("opening ledger {}: {e}", path.display()))
    })?;
    reader
        .deserialize()
        .map(|row| row.map_err(|e| EngineError::Io(format!("parsing ledger row: {e}"))))
        .collect()
}

pub fn rewrite_ledger(path: &Path, rows: &[LedgerRow]) -> EngineResult<()> {
    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4()));
    {
        let mut writer = csv::Writer::from_path(&tmp_path)
            .map_err(|e| EngineError::Io(format!("opening temp ledger: {e}")))?;
        for row in rows {
            writer
                .serialize(row)
                .map_err(|e| EngineError::Io(format!("writing ledger row: {e}")))?;
        }
        writer
            .flush()
            .map_err(|e| EngineError::Io(format!("flushing temp ledger: {e}")))?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
