//! Telegram notifications. Best effort: failures are logged, never raised.

use crate::config::TelegramCredentials;
use crate::order_executor::{ExecutionResult, ExecutionStatus};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error};

const API_URL: &str = "https://api.telegram.org";

pub struct TelegramNotifier {
    http_client: Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(credentials: TelegramCredentials) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            http_client,
            bot_token: credentials.bot_token,
            chat_id: credentials.chat_id,
        }
    }

    /// Send an HTML message. Returns whether Telegram accepted it.
    pub async fn send(&self, message: &str) -> bool {
        let url = format!("{}/bot{}/sendMessage", API_URL, self.bot_token);
        let body = json!({
            "chat_id": self.chat_id,
            "text": message,
            "parse_mode": "HTML",
        });

        match self.http_client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!("Telegram message sent");
                true
            }
            Ok(resp) => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                error!(%status, body = %text, "Telegram API error");
                false
            }
            Err(e) => {
                error!(error = %e, "Failed to send Telegram message");
                false
            }
        }
    }

    /// Notify about fills and partial fills. Fully failed attempts carry no
    /// position and are skipped.
    pub async fn notify_execution(&self, result: &ExecutionResult) -> bool {
        match format_execution(result) {
            Some(message) => self.send(&message).await,
            None => false,
        }
    }
}

pub fn format_execution(result: &ExecutionResult) -> Option<String> {
    let opportunity = &result.opportunity;
    let header = match result.status {
        ExecutionStatus::BothFilled => "✅ <b>Arbitrage executed</b>",
        ExecutionStatus::PartialFilled => "⚠️ <b>Partial fill: unhedged exposure</b>",
        ExecutionStatus::BothFailed => return None,
    };

    let mut message = format!(
        "{}\nMarket: {}\nDirection: {}\nLeg A: {} {:.2} @ {:.4}\n",
        header,
        opportunity.pair.name,
        opportunity.direction,
        result.leg_a.instrument,
        result.leg_a.filled_size,
        result.leg_a.fill_price(),
    );
    if let Some(leg_b) = &result.leg_b {
        message.push_str(&format!(
            "Leg B: {} {:.2} @ {:.4}\n",
            leg_b.instrument,
            leg_b.filled_size,
            leg_b.fill_price()
        ));
    }
    match result.status {
        ExecutionStatus::PartialFilled => {
            message.push_str(&format!("Unhedged: {:.2}", result.unhedged_size));
        }
        _ => {
            message.push_str(&format!(
                "Expected profit: {:.2}%\nRealized P&amp;L: ${:.4}",
                opportunity.profit_pct * 100.0,
                result.realized_pnl
            ));
        }
    }
    Some(message)
}
