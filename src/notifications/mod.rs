use chrono::NaiveDate;
use tracing::warn;

use crate::resolver::ResolutionReport;
use crate::sizer::Decision;

/// Telegram notification client. If token/chat_id are missing, all methods are no-ops.
#[derive(Clone)]
pub struct TelegramNotifier {
    bot_token: Option<String>,
    chat_id: Option<String>,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new() -> Self {
        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN").ok().filter(|s| !s.is_empty());
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").ok().filter(|s| !s.is_empty());

        if bot_token.is_some() && chat_id.is_some() {
            tracing::info!("Telegram notifications enabled");
        } else {
            tracing::info!("Telegram notifications disabled (missing TELEGRAM_BOT_TOKEN or TELEGRAM_CHAT_ID)");
        }

        Self {
            bot_token,
            chat_id,
            client: reqwest::Client::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.bot_token.is_some() && self.chat_id.is_some()
    }

    /// Send a message. Silently skips if not configured.
    pub async fn send(&self, text: &str) {
        let (Some(token), Some(chat_id)) = (&self.bot_token, &self.chat_id) else {
            return;
        };

        let url = format!("https://api.telegram.org/bot{}/sendMessage", token);
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true
        });

        match self.client.post(&url).json(&body).send().await {
            Ok(resp) if !resp.status().is_success() => {
                warn!("Telegram API error: {}", resp.status());
            }
            Err(e) => {
                warn!("Telegram send failed: {}", e);
            }
            _ => {}
        }
    }

    /// Notify about decisions placed for one (station, event_day) cycle step.
    pub async fn notify_decisions(&self, station: &str, event_day: NaiveDate, decisions: &[Decision]) {
        if decisions.is_empty() {
            return;
        }
        let mut lines = format!(
            "<b>Paper Trades Placed</b>\nStation: {} | Event day: {}\n",
            html_escape(station), event_day
        );
        for d in decisions {
            lines.push_str(&format!(
                "{} [{:.0}-{:.0}]: edge {:.1}% | size ${:.2} | p_model {:.2} vs p_market {:.2}\n",
                html_escape(&d.label), d.min_temp, d.max_temp, d.edge * 100.0, d.size, d.p_model, d.p_market
            ));
        }
        self.send(&lines).await;
    }

    /// Notify about a non-fatal per-(station, event_day) cycle error.
    pub async fn notify_cycle_error(&self, station: &str, event_day: NaiveDate, error: &str) {
        let msg = format!(
            "<b>Cycle Step Failed</b>\nStation: {} | Event day: {}\n{}",
            html_escape(station), event_day, html_escape(error)
        );
        self.send(&msg).await;
    }

    /// Notify about the outcome of a resolution run.
    pub async fn notify_resolution(&self, report: &ResolutionReport) {
        if report.rows_resolved == 0 && report.groups_unresolved == 0 {
            return;
        }
        let msg = format!(
            "<b>Resolution Run</b>\nResolved: {} | Already terminal: {} | Left pending: {} | Unresolved groups: {}",
            report.rows_resolved, report.rows_already_terminal, report.rows_left_pending, report.groups_unresolved
        );
        self.send(&msg).await;
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
