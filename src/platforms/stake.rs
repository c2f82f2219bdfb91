//! Stake casino integration.
//!
//! Places Dice and Limbo bets and reads account balances through the
//! Stake GraphQL endpoint.
//!
//! Endpoint: https://stake.com/_api/graphql
//! Auth: `x-access-token: {token}` (also sent as a Bearer token).
//! Errors come back as HTTP 200 with a GraphQL `errors` array; the first
//! message is surfaced verbatim so funds problems can be recognised.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use super::WagerService;
use crate::types::{BalanceSnapshot, Game, SettledWager, WagerError, WagerRequest};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_API_URL: &str = "https://stake.com/_api/graphql";
const SERVICE_NAME: &str = "stake";

/// Dice pays out with a 1% house edge: win chance = 99 / multiplier percent.
const DICE_EDGE_NUMERATOR: Decimal = dec!(99);

const DICE_ROLL_MUTATION: &str = r#"
mutation DiceRoll($amount: Float!, $target: Float!, $condition: CasinoGamesDiceConditionEnum!, $currency: CurrencyEnum!, $identifier: String!) {
  diceRoll(amount: $amount, target: $target, condition: $condition, currency: $currency, identifier: $identifier) {
    id
    amount
    payout
    currency
    game
    createdAt
  }
}
"#;

const LIMBO_BET_MUTATION: &str = r#"
mutation LimboBet($amount: Float!, $multiplierTarget: Float!, $currency: CurrencyEnum!, $identifier: String!) {
  limboBet(amount: $amount, multiplierTarget: $multiplierTarget, currency: $currency, identifier: $identifier) {
    id
    amount
    payout
    currency
    game
    createdAt
  }
}
"#;

const BALANCES_QUERY: &str = r#"
query UserBalances {
  user {
    id
    balances {
      available {
        currency
        amount
      }
    }
  }
}
"#;

// ---------------------------------------------------------------------------
// API response types (Stake JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

/// Payload of either bet mutation; only the field for the played game is set.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BetData {
    #[serde(default)]
    dice_roll: Option<StakeBet>,
    #[serde(default)]
    limbo_bet: Option<StakeBet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StakeBet {
    id: String,
    amount: Decimal,
    payout: Decimal,
    currency: String,
    /// RFC 3339 string or epoch milliseconds depending on the API version.
    #[serde(default)]
    created_at: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct BalanceData {
    user: Option<StakeUser>,
}

#[derive(Debug, Deserialize)]
struct StakeUser {
    #[serde(default)]
    balances: Vec<StakeBalance>,
}

#[derive(Debug, Deserialize)]
struct StakeBalance {
    available: Option<StakeAmount>,
}

#[derive(Debug, Deserialize)]
struct StakeAmount {
    currency: String,
    amount: Decimal,
}

// ---------------------------------------------------------------------------
// Request builders
// ---------------------------------------------------------------------------

/// Roll-over target that gives `multiplier` on a Dice win.
pub fn dice_target(multiplier: Decimal) -> Decimal {
    (dec!(100) - DICE_EDGE_NUMERATOR / multiplier).round_dp(2)
}

/// Build the GraphQL body for a wager, one builder per game.
fn bet_request_body(request: &WagerRequest, identifier: &str) -> Value {
    match request.game {
        Game::Dice => json!({
            "query": DICE_ROLL_MUTATION,
            "variables": {
                "amount": request.amount,
                "target": dice_target(request.multiplier),
                "condition": "above",
                "currency": request.currency,
                "identifier": identifier,
            }
        }),
        Game::Limbo => json!({
            "query": LIMBO_BET_MUTATION,
            "variables": {
                "amount": request.amount,
                "multiplierTarget": request.multiplier,
                "currency": request.currency,
                "identifier": identifier,
            }
        }),
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

fn into_data<T>(response: GraphqlResponse<T>) -> Result<Option<T>, WagerError> {
    if let Some(err) = response.errors.into_iter().next() {
        return Err(WagerError::Rejected(err.message));
    }
    Ok(response.data)
}

fn parse_timestamp(value: Option<&Value>) -> DateTime<Utc> {
    match value {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now),
        _ => Utc::now(),
    }
}

fn parse_bet(game: Game, response: GraphqlResponse<BetData>) -> Result<SettledWager, WagerError> {
    let data = into_data(response)?;
    let bet = data
        .and_then(|d| match game {
            Game::Dice => d.dice_roll,
            Game::Limbo => d.limbo_bet,
        })
        .ok_or_else(|| WagerError::Malformed("No bet result returned".into()))?;

    Ok(SettledWager {
        settled_at: parse_timestamp(bet.created_at.as_ref()),
        id: bet.id,
        amount: bet.amount,
        payout: bet.payout,
        currency: bet.currency,
        game,
    })
}

fn parse_balances(response: GraphqlResponse<BalanceData>) -> Result<BalanceSnapshot, WagerError> {
    let user = into_data(response)?
        .and_then(|d| d.user)
        .ok_or_else(|| WagerError::Malformed("No balance information available".into()))?;

    let mut snapshot = BalanceSnapshot::new();
    for available in user.balances.into_iter().filter_map(|b| b.available) {
        snapshot.insert(&available.currency, available.amount);
    }
    Ok(snapshot)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Stake casino client.
pub struct StakeClient {
    http: Client,
    api_url: String,
    token: SecretString,
}

impl StakeClient {
    /// Create a new Stake client for `api_url` authenticated with `token`.
    pub fn new(api_url: &str, token: SecretString, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("WagerWizard/0.1.0")
            .build()
            .context("Failed to build HTTP client for Stake")?;

        Ok(Self {
            http,
            api_url: api_url.to_string(),
            token,
        })
    }

    /// POST a GraphQL document and decode the response envelope.
    async fn graphql<T: DeserializeOwned>(&self, body: &Value) -> Result<GraphqlResponse<T>, WagerError> {
        let token = self.token.expose_secret();

        let resp = self
            .http
            .post(&self.api_url)
            .header("x-access-token", token.as_str())
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .json(body)
            .send()
            .await
            .map_err(|e| WagerError::Transport(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| WagerError::Transport(e.to_string()))?;

        let parsed = serde_json::from_str::<GraphqlResponse<T>>(&text);

        if !status.is_success() {
            // A GraphQL error payload is more informative than the status.
            if let Ok(parsed) = parsed {
                if !parsed.errors.is_empty() {
                    return Ok(parsed);
                }
            }
            return Err(WagerError::Transport(format!("Stake API error {status}")));
        }

        parsed.map_err(|e| WagerError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl WagerService for StakeClient {
    async fn place_wager(&self, request: &WagerRequest) -> Result<SettledWager, WagerError> {
        let identifier = uuid::Uuid::new_v4().simple().to_string();
        let body = bet_request_body(request, &identifier);

        debug!(
            game = %request.game,
            amount = format!("${:.2}", request.amount),
            multiplier = %request.multiplier,
            currency = %request.currency,
            "Placing Stake bet"
        );

        let response: GraphqlResponse<BetData> = self.graphql(&body).await?;
        let settled = parse_bet(request.game, response)?;

        info!(
            bet_id = %settled.id,
            amount = format!("${:.2}", settled.amount),
            payout = format!("${:.2}", settled.payout),
            "Stake bet settled"
        );
        Ok(settled)
    }

    async fn fetch_balance(&self) -> Result<BalanceSnapshot, WagerError> {
        let body = json!({ "query": BALANCES_QUERY, "variables": {} });
        let response: GraphqlResponse<BalanceData> = self.graphql(&body).await?;
        let snapshot = parse_balances(response)?;
        debug!(currencies = snapshot.len(), "Stake balances fetched");
        Ok(snapshot)
    }

    fn is_connected(&self) -> bool {
        !self.token.expose_secret().trim().is_empty()
    }

    fn name(&self) -> &'static str {
        SERVICE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
