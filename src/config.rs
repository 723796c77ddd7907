use std::collections::BTreeMap;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One row of the service price table. Prices are in two currencies; the
/// optional prefix is prepended for display ("от " for open-ended quotes).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PriceEntry {
    pub name: String,
    pub byn: f64,
    pub rub: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prefix: String,
}

/// service_type -> price entry. BTreeMap keeps /api/prices output stable.
pub type PriceTable = BTreeMap<String, PriceEntry>;

pub fn default_prices() -> PriceTable {
    let mut t = PriceTable::new();
    t.insert(
        "consultation".into(),
        PriceEntry { name: "Консультация / Оценка сборки".into(), byn: 10.0, rub: 270.0, prefix: String::new() },
    );
    t.insert(
        "build".into(),
        PriceEntry { name: "Сборка ПК".into(), byn: 50.0, rub: 1500.0, prefix: String::new() },
    );
    t.insert(
        "upgrade".into(),
        PriceEntry { name: "Апгрейд ПК".into(), byn: 30.0, rub: 900.0, prefix: String::new() },
    );
    t
}

/// Bank transfer requisites shown to customers awaiting payment.
#[derive(Debug, Clone)]
pub struct PaymentDetails {
    pub card: String,
    pub holder: String,
    pub bank: String,
}

/// All runtime configuration, resolved once at startup and passed around
/// explicitly. No mutable globals.
#[derive(Debug, Clone)]
pub struct Config {
    pub shop_name: String,
    pub bot_token: String,
    pub bot_username: String,
    /// Supergroup with forum topics where managers work. 0 = disabled.
    pub manager_group_id: i64,
    /// Chat used for the startup style probe. 0 = disabled.
    pub admin_chat_id: i64,
    pub webapp_url: Option<String>,
    pub api_host: String,
    pub api_port: u16,
    pub database_path: String,
    pub telegram_api_base: String,
    pub payment: PaymentDetails,
    pub prices: PriceTable,
}

fn str_env(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn i64_env(name: &str, default: i64) -> i64 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let bot_token = std::env::var("BOT_TOKEN").context("BOT_TOKEN must be set")?;

        let prices = match std::env::var("PRICES_PATH") {
            Ok(path) => {
                let raw = std::fs::read(&path)
                    .with_context(|| format!("failed to read price table '{path}'"))?;
                serde_json::from_slice(&raw)
                    .with_context(|| format!("failed to parse price table '{path}'"))?
            }
            Err(_) => default_prices(),
        };

        Ok(Self {
            shop_name: str_env("SHOP_NAME", "Inside PC"),
            bot_token,
            bot_username: str_env("BOT_USERNAME", ""),
            manager_group_id: i64_env("MANAGER_GROUP_ID", 0),
            admin_chat_id: i64_env("ADMIN_CHAT_ID", 0),
            webapp_url: std::env::var("WEBAPP_URL").ok().filter(|v| !v.is_empty()),
            api_host: str_env("API_HOST", "0.0.0.0"),
            api_port: i64_env("API_PORT", 8080) as u16,
            database_path: str_env("DATABASE_PATH", "orderdesk.db"),
            telegram_api_base: str_env("TELEGRAM_API_BASE", "https://api.telegram.org"),
            payment: PaymentDetails {
                card: str_env("PAYMENT_CARD", ""),
                holder: str_env("PAYMENT_HOLDER", ""),
                bank: str_env("PAYMENT_BANK", ""),
            },
            prices,
        })
    }

    pub fn price(&self, service_type: &str) -> Option<&PriceEntry> {
        self.prices.get(service_type)
    }

    /// Display name for a service, "?" when the type is no longer in the table.
    pub fn service_name(&self, service_type: &str) -> &str {
        self.prices.get(service_type).map(|p| p.name.as_str()).unwrap_or("?")
    }

    pub fn price_prefix(&self, service_type: &str) -> &str {
        self.prices.get(service_type).map(|p| p.prefix.as_str()).unwrap_or("")
    }

    /// Deep link that drops the customer straight into payment upload.
    pub fn pay_link(&self, order_id: i64) -> Option<String> {
        if self.bot_username.is_empty() {
            return None;
        }
        Some(format!("https://t.me/{}?start=pay_{}", self.bot_username, order_id))
    }
}
