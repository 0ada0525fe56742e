//! Currency toolset: `convert_currency` and `get_exchange_rate`
//!
//! Rates come from a [`RateSource`]. The default source is the Frankfurter
//! API (ECB reference rates, no key required).

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::math::format_number;
use super::{ToolHandler, ToolRegistry, json_schema, number_arg, string_arg};

pub const DEFAULT_FRANKFURTER_URL: &str = "https://api.frankfurter.app";

/// A single exchange rate observation
#[derive(Debug, Clone, PartialEq)]
pub struct RateQuote {
    pub from: String,
    pub to: String,
    pub rate: f64,
    /// Date the rate was published, if the source reports one
    pub date: Option<String>,
}

/// Something that can quote exchange rates
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn quote(&self, from: &str, to: &str) -> Result<RateQuote>;
}

/// Frankfurter HTTP rate source
pub struct FrankfurterRates {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct FrankfurterResponse {
    #[serde(default)]
    date: Option<String>,
    rates: HashMap<String, f64>,
}

impl FrankfurterRates {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl RateSource for FrankfurterRates {
    async fn quote(&self, from: &str, to: &str) -> Result<RateQuote> {
        let url = format!("{}/latest", self.base_url.trim_end_matches('/'));
        debug!("Fetching rate {} -> {} from {}", from, to, url);

        let resp = self
            .http
            .get(&url)
            .query(&[("from", from), ("to", to)])
            .send()
            .await
            .with_context(|| format!("Failed to reach rate service at {}", url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Rate service returned HTTP {}: {}", status, body));
        }

        let body: FrankfurterResponse = resp
            .json()
            .await
            .context("Failed to parse rate service response")?;

        let rate = body
            .rates
            .get(to)
            .copied()
            .ok_or_else(|| anyhow!("Rate service has no rate for {}", to))?;

        Ok(RateQuote {
            from: from.to_string(),
            to: to.to_string(),
            rate,
            date: body.date,
        })
    }
}

/// Fixed rate table, quoted against a single base currency.
///
/// Cross rates are derived through the base. Useful offline and in tests.
pub struct StaticRates {
    base: String,
    rates: HashMap<String, f64>,
}

impl StaticRates {
    pub fn new(base: &str, rates: &[(&str, f64)]) -> Self {
        let mut table: HashMap<String, f64> = rates
            .iter()
            .map(|(code, rate)| (code.to_string(), *rate))
            .collect();
        table.insert(base.to_string(), 1.0);
        Self {
            base: base.to_string(),
            rates: table,
        }
    }
}

#[async_trait]
impl RateSource for StaticRates {
    async fn quote(&self, from: &str, to: &str) -> Result<RateQuote> {
        let lookup = |code: &str| {
            self.rates
                .get(code)
                .copied()
                .ok_or_else(|| anyhow!("No rate for {} against {}", code, self.base))
        };
        let rate = lookup(to)? / lookup(from)?;
        Ok(RateQuote {
            from: from.to_string(),
            to: to.to_string(),
            rate,
            date: None,
        })
    }
}

/// Validate and normalize an ISO 4217-style code ("usd" → "USD")
fn currency_code(input: &Value, key: &str) -> Result<String> {
    let raw = string_arg(input, key)?.trim();
    if raw.len() != 3 || !raw.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(anyhow!(
            "'{}' must be a 3-letter currency code, got \"{}\"",
            key,
            raw
        ));
    }
    Ok(raw.to_ascii_uppercase())
}

async fn quote_pair(source: &dyn RateSource, from: &str, to: &str) -> Result<RateQuote> {
    if from == to {
        return Ok(RateQuote {
            from: from.to_string(),
            to: to.to_string(),
            rate: 1.0,
            date: None,
        });
    }
    source.quote(from, to).await
}

fn as_of(quote: &RateQuote) -> String {
    quote
        .date
        .as_deref()
        .map(|d| format!(" (as of {})", d))
        .unwrap_or_default()
}

/// Round to 4 decimal places for display
fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn pair_schema(with_amount: bool) -> Value {
    let mut props = serde_json::json!({
        "from_currency": {
            "type": "string",
            "description": "The source currency code (e.g. \"USD\", \"EUR\", \"JPY\")"
        },
        "to_currency": {
            "type": "string",
            "description": "The target currency code (e.g. \"USD\", \"EUR\", \"JPY\")"
        }
    });
    if with_amount {
        props["amount"] = serde_json::json!({
            "type": "number",
            "description": "The amount to convert (defaults to 1.0 for just the exchange rate)"
        });
    }
    json_schema(props, vec!["from_currency", "to_currency"])
}

/// Register the currency tools backed by the given rate source
pub fn register_all(registry: &mut ToolRegistry, source: Arc<dyn RateSource>) {
    registry.register(Arc::new(ConvertCurrencyTool {
        source: source.clone(),
    }));
    registry.register(Arc::new(ExchangeRateTool { source }));
}

/// Build a registry holding only the currency toolset
pub fn registry(source: Arc<dyn RateSource>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register_all(&mut registry, source);
    registry
}

pub struct ConvertCurrencyTool {
    source: Arc<dyn RateSource>,
}

#[async_trait]
impl ToolHandler for ConvertCurrencyTool {
    fn name(&self) -> &str {
        "convert_currency"
    }

    fn description(&self) -> &str {
        "Convert an amount from one currency to another."
    }

    fn input_schema(&self) -> Value {
        pair_schema(true)
    }

    async fn execute(&self, input: Value) -> Result<String> {
        let from = currency_code(&input, "from_currency")?;
        let to = currency_code(&input, "to_currency")?;
        let amount = match input.get("amount") {
            None | Some(Value::Null) => 1.0,
            Some(_) => number_arg(&input, "amount")?,
        };
        if !amount.is_finite() || amount < 0.0 {
            return Err(anyhow!("'amount' must be a non-negative number"));
        }

        let quote = quote_pair(self.source.as_ref(), &from, &to).await?;
        let converted = round4(amount * quote.rate);

        Ok(format!(
            "{} {} = {} {} (rate {}){}",
            format_number(amount),
            from,
            format_number(converted),
            to,
            format_number(round4(quote.rate)),
            as_of(&quote)
        ))
    }
}

pub struct ExchangeRateTool {
    source: Arc<dyn RateSource>,
}

#[async_trait]
impl ToolHandler for ExchangeRateTool {
    fn name(&self) -> &str {
        "get_exchange_rate"
    }

    fn description(&self) -> &str {
        "Get the current exchange rate between two currencies."
    }

    fn input_schema(&self) -> Value {
        pair_schema(false)
    }

    async fn execute(&self, input: Value) -> Result<String> {
        let from = currency_code(&input, "from_currency")?;
        let to = currency_code(&input, "to_currency")?;
        let quote = quote_pair(self.source.as_ref(), &from, &to).await?;

        Ok(format!(
            "1 {} = {} {}{}",
            from,
            format_number(round4(quote.rate)),
            to,
            as_of(&quote)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rates() -> Arc<dyn RateSource> {
        Arc::new(StaticRates::new("EUR", &[("USD", 1.25), ("JPY", 160.0)]))
    }

    #[tokio::test]
    async fn test_convert_currency() {
        let tool = ConvertCurrencyTool { source: rates() };
        let result = tool
            .execute(serde_json::json!({
                "from_currency": "EUR",
                "to_currency": "USD",
                "amount": 100
            }))
            .await
            .unwrap();
        assert_eq!(result, "100 EUR = 125 USD (rate 1.25)");
    }

    #[tokio::test]
    async fn test_convert_defaults_amount_to_one() {
        let tool = ConvertCurrencyTool { source: rates() };
        let result = tool
            .execute(serde_json::json!({"from_currency": "usd", "to_currency": "eur"}))
            .await
            .unwrap();
        assert_eq!(result, "1 USD = 0.8 EUR (rate 0.8)");
    }

    #[tokio::test]
    async fn test_cross_rate_through_base() {
        let tool = ExchangeRateTool { source: rates() };
        let result = tool
            .execute(serde_json::json!({"from_currency": "USD", "to_currency": "JPY"}))
            .await
            .unwrap();
        assert_eq!(result, "1 USD = 128 JPY");
    }

    #[tokio::test]
    async fn test_same_currency_is_identity() {
        let tool = ExchangeRateTool {
            source: Arc::new(StaticRates::new("EUR", &[])),
        };
        let result = tool
            .execute(serde_json::json!({"from_currency": "GBP", "to_currency": "GBP"}))
            .await
            .unwrap();
        assert_eq!(result, "1 GBP = 1 GBP");
    }

    #[tokio::test]
    async fn test_invalid_code_rejected() {
        let tool = ExchangeRateTool { source: rates() };
        let err = tool
            .execute(serde_json::json!({"from_currency": "dollars", "to_currency": "EUR"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("3-letter currency code"));
    }

    #[tokio::test]
    async fn test_unknown_currency() {
        let tool = ExchangeRateTool { source: rates() };
        let err = tool
            .execute(serde_json::json!({"from_currency": "EUR", "to_currency": "XYZ"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No rate for XYZ"));
    }

    #[tokio::test]
    async fn test_negative_amount_rejected() {
        let tool = ConvertCurrencyTool { source: rates() };
        let err = tool
            .execute(serde_json::json!({
                "from_currency": "EUR",
                "to_currency": "USD",
                "amount": -5
            }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("non-negative"));
    }

    #[tokio::test]
    async fn test_frankfurter_connection_refused() {
        let source = FrankfurterRates::new("http://127.0.0.1:1").unwrap();
        let result = source.quote("USD", "EUR").await;
        assert!(result.is_err());
    }

    #[test]
    fn test_schema_requires_pair() {
        let schema = pair_schema(true);
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 2);
        assert!(schema["properties"]["amount"].is_object());
        assert!(pair_schema(false)["properties"]["amount"].is_null());
    }
}
