// ============================================================================
// Chain Query Client - read-only access to the chain's LCD REST interface
// ============================================================================
//
// Endpoints:
//   GET /cosmos/tx/v1beta1/txs/{hash}                          - tx inclusion
//   GET /cosmwasm/wasm/v1/contract/{addr}/smart/{base64 query} - contract state
//
// Contract queries used:
//   {"bet":{"bet_id":N}}                       - single wager
//   {"open_bets":{"start_after":N,"limit":L}}  - open wagers, paginated
//   {"config":{}}                              - reveal timeout / bet TTL
//
// Chain status strings are normalized into `ChainBetStatus` here so nothing
// above this layer ever string-matches a status.
//
// ============================================================================

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::ChainError;
use crate::models::Side;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Per-request HTTP timeout for the LCD client
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// Largest page the contract returns for `open_bets`
pub const OPEN_BETS_PAGE_LIMIT: u32 = 100;

/// `action` attribute emitted by a successful create
pub const BET_CREATED_ACTION: &str = "coinflip.bet_created";

// ============================================================================
// TRANSACTION RESULTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Vec<EventAttribute>,
}

impl TxEvent {
    /// Attribute value by key, accepting base64-encoded keys and values
    pub fn attribute(&self, key: &str) -> Option<String> {
        self.attributes.iter().find_map(|attr| {
            if attr.key == key {
                Some(attr.value.clone())
            } else if decode_b64_text(&attr.key).as_deref() == Some(key) {
                Some(decode_b64_text(&attr.value).unwrap_or_else(|| attr.value.clone()))
            } else {
                None
            }
        })
    }
}

/// Inclusion record of a transaction. `code == 0` is success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResult {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub raw_log: String,
    #[serde(default)]
    pub height: String,
    #[serde(default)]
    pub events: Vec<TxEvent>,
}

impl TxResult {
    pub fn success(events: Vec<TxEvent>) -> Self {
        Self { code: 0, raw_log: String::new(), height: "1".to_string(), events }
    }

    pub fn failure(code: u32, raw_log: impl Into<String>) -> Self {
        Self { code, raw_log: raw_log.into(), height: "1".to_string(), events: Vec::new() }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    /// Chain-assigned wager id from the create event, if present
    pub fn bet_id(&self) -> Option<u64> {
        self.events.iter().find_map(|event| {
            let action = event.attribute("action");
            if action.as_deref().map_or(true, |a| a == BET_CREATED_ACTION) {
                event.attribute("bet_id").and_then(|v| v.trim().parse().ok())
            } else {
                None
            }
        })
    }
}

/// Build a `wasm` event carrying a created-bet id
pub fn bet_created_event(bet_id: u64) -> TxEvent {
    TxEvent {
        kind: "wasm".to_string(),
        attributes: vec![
            EventAttribute { key: "action".into(), value: BET_CREATED_ACTION.into() },
            EventAttribute { key: "bet_id".into(), value: bet_id.to_string() },
        ],
    }
}

fn decode_b64_text(input: &str) -> Option<String> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(input).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    if text.chars().all(|c| !c.is_control()) {
        Some(text)
    } else {
        None
    }
}

// ============================================================================
// CONTRACT STATE
// ============================================================================

/// Normalized on-chain wager status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainBetStatus {
    Open,
    Accepted,
    Revealed,
    Canceled,
    TimeoutClaimed,
    /// Anything unrecognized; never treated as resolved
    Unknown(String),
}

impl ChainBetStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "open" => ChainBetStatus::Open,
            "accepted" => ChainBetStatus::Accepted,
            "revealed" => ChainBetStatus::Revealed,
            "canceled" | "cancelled" => ChainBetStatus::Canceled,
            "timeoutclaimed" | "timeout_claimed" => ChainBetStatus::TimeoutClaimed,
            other => ChainBetStatus::Unknown(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChainBetStatus::Revealed | ChainBetStatus::Canceled | ChainBetStatus::TimeoutClaimed
        )
    }
}

/// Contract wager record with typed fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBet {
    pub id: u64,
    pub maker: String,
    pub amount: u128,
    /// Lowercase hex
    pub commitment: String,
    pub status: ChainBetStatus,
    pub acceptor: Option<String>,
    pub acceptor_guess: Option<Side>,
    /// Unix seconds
    pub created_at_time: u64,
    pub accepted_at_time: Option<u64>,
    pub reveal_side: Option<Side>,
    pub winner: Option<String>,
    pub payout_amount: Option<u128>,
    pub commission_paid: Option<u128>,
}

/// Wire shape of the contract's `BetResponse`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBet {
    pub id: u64,
    pub maker: String,
    pub amount: String,
    pub commitment: String,
    pub status: String,
    #[serde(default)]
    pub acceptor: Option<String>,
    #[serde(default)]
    pub acceptor_guess: Option<String>,
    #[serde(default)]
    pub created_at_time: u64,
    #[serde(default)]
    pub accepted_at_time: Option<u64>,
    #[serde(default)]
    pub reveal_side: Option<String>,
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(default)]
    pub payout_amount: Option<String>,
    #[serde(default)]
    pub commission_paid: Option<String>,
}

impl TryFrom<RawBet> for ChainBet {
    type Error = ChainError;

    fn try_from(raw: RawBet) -> Result<Self, Self::Error> {
        Ok(ChainBet {
            id: raw.id,
            amount: parse_uint(&raw.amount)?,
            commitment: commitment_to_hex(&raw.commitment)?,
            status: ChainBetStatus::parse(&raw.status),
            acceptor_guess: raw.acceptor_guess.as_deref().and_then(Side::parse),
            reveal_side: raw.reveal_side.as_deref().and_then(Side::parse),
            payout_amount: raw.payout_amount.as_deref().map(parse_uint).transpose()?,
            commission_paid: raw.commission_paid.as_deref().map(parse_uint).transpose()?,
            maker: raw.maker,
            acceptor: raw.acceptor,
            created_at_time: raw.created_at_time,
            accepted_at_time: raw.accepted_at_time,
            winner: raw.winner,
        })
    }
}

fn parse_uint(value: &str) -> Result<u128, ChainError> {
    value
        .trim()
        .parse()
        .map_err(|_| ChainError::InvalidResponse(format!("bad Uint128 '{}'", value)))
}

/// Contract `Binary` (base64) to lowercase hex; bare hex is passed through
pub fn commitment_to_hex(value: &str) -> Result<String, ChainError> {
    let trimmed = value.trim();
    if trimmed.len() == 64 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return Ok(trimmed.to_ascii_lowercase());
    }
    base64::engine::general_purpose::STANDARD
        .decode(trimmed)
        .map(hex::encode)
        .map_err(|e| ChainError::InvalidResponse(format!("bad commitment '{}': {}", value, e)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractConfig {
    pub reveal_timeout_secs: u64,
    /// Zero means open wagers never expire
    #[serde(default)]
    pub bet_ttl_secs: u64,
}

#[derive(Debug, Deserialize)]
struct SmartQueryResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct BetsResponse {
    bets: Vec<RawBet>,
}

#[derive(Debug, Deserialize)]
struct TxLookupResponse {
    tx_response: TxResult,
}

// ============================================================================
// CHAIN QUERY TRAIT
// ============================================================================

#[async_trait]
pub trait ChainQuery: Send + Sync {
    /// `None` until the transaction is included
    async fn get_tx(&self, tx_hash: &str) -> Result<Option<TxResult>, ChainError>;

    /// `None` when the contract has no wager with this id
    async fn query_bet(&self, bet_id: u64) -> Result<Option<ChainBet>, ChainError>;

    async fn query_open_bets(
        &self,
        start_after: Option<u64>,
        limit: u32,
    ) -> Result<Vec<ChainBet>, ChainError>;

    async fn query_config(&self) -> Result<ContractConfig, ChainError>;
}

/// Walks every page of `open_bets`
pub async fn all_open_bets(chain: &dyn ChainQuery) -> Result<Vec<ChainBet>, ChainError> {
    let mut bets = Vec::new();
    let mut start_after = None;

    loop {
        let page = chain.query_open_bets(start_after, OPEN_BETS_PAGE_LIMIT).await?;
        let full_page = page.len() as u32 >= OPEN_BETS_PAGE_LIMIT;
        let last_id = page.last().map(|b| b.id);
        bets.extend(page);

        match last_id {
            Some(id) if full_page && start_after.map_or(true, |prev| id > prev) => {
                start_after = Some(id);
            }
            _ => break,
        }
    }

    Ok(bets)
}

// ============================================================================
// LCD CLIENT
// ============================================================================

/// Chain client over the Cosmos LCD REST API
pub struct LcdChainClient {
    rest_url: String,
    contract: String,
    client: Client,
}

impl LcdChainClient {
    pub fn new(rest_url: &str, contract: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            rest_url: rest_url.trim_end_matches('/').to_string(),
            contract: contract.to_string(),
            client,
        }
    }

    /// GET returning `None` for "not found" style answers
    async fn get_optional<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, ChainError> {
        let response = self.client.get(url).send().await.map_err(map_transport)?;
        let status = response.status();

        if status.is_success() {
            let body = response
                .json::<T>()
                .await
                .map_err(|e| ChainError::InvalidResponse(e.to_string()))?;
            return Ok(Some(body));
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND || body.to_ascii_lowercase().contains("not found") {
            debug!(url, status = status.as_u16(), "chain reports not found");
            return Ok(None);
        }

        Err(ChainError::Status { status: status.as_u16(), body })
    }

    async fn smart_query<T: DeserializeOwned>(
        &self,
        query: &serde_json::Value,
    ) -> Result<Option<T>, ChainError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(query.to_string());
        let url = format!(
            "{}/cosmwasm/wasm/v1/contract/{}/smart/{}",
            self.rest_url, self.contract, encoded
        );
        let response: Option<SmartQueryResponse<T>> = self.get_optional(&url).await?;
        Ok(response.map(|r| r.data))
    }
}

fn map_transport(err: reqwest::Error) -> ChainError {
    if err.is_timeout() {
        ChainError::Timeout
    } else {
        ChainError::RequestFailed(err.to_string())
    }
}

#[async_trait]
impl ChainQuery for LcdChainClient {
    async fn get_tx(&self, tx_hash: &str) -> Result<Option<TxResult>, ChainError> {
        let url = format!("{}/cosmos/tx/v1beta1/txs/{}", self.rest_url, tx_hash);
        let response: Option<TxLookupResponse> = self.get_optional(&url).await?;
        Ok(response.map(|r| r.tx_response))
    }

    async fn query_bet(&self, bet_id: u64) -> Result<Option<ChainBet>, ChainError> {
        let query = serde_json::json!({ "bet": { "bet_id": bet_id } });
        match self.smart_query::<RawBet>(&query).await? {
            Some(raw) => Ok(Some(ChainBet::try_from(raw)?)),
            None => Ok(None),
        }
    }

    async fn query_open_bets(
        &self,
        start_after: Option<u64>,
        limit: u32,
    ) -> Result<Vec<ChainBet>, ChainError> {
        let query = serde_json::json!({
            "open_bets": { "start_after": start_after, "limit": limit.min(OPEN_BETS_PAGE_LIMIT) }
        });
        let response: Option<BetsResponse> = self.smart_query(&query).await?;
        response
            .map(|r| r.bets)
            .unwrap_or_default()
            .into_iter()
            .map(ChainBet::try_from)
            .collect()
    }

    async fn query_config(&self) -> Result<ContractConfig, ChainError> {
        let query = serde_json::json!({ "config": {} });
        self.smart_query(&query)
            .await?
            .ok_or_else(|| ChainError::InvalidResponse("contract config missing".to_string()))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_normalization() {
        assert_eq!(ChainBetStatus::parse("timeoutclaimed"), ChainBetStatus::TimeoutClaimed);
        assert_eq!(ChainBetStatus::parse("timeout_claimed"), ChainBetStatus::TimeoutClaimed);
        assert_eq!(ChainBetStatus::parse("Revealed"), ChainBetStatus::Revealed);
        assert_eq!(
            ChainBetStatus::parse("timeout-claimed"),
            ChainBetStatus::Unknown("timeout-claimed".to_string())
        );
        assert!(!ChainBetStatus::parse("weird").is_terminal());
        assert!(!ChainBetStatus::Accepted.is_terminal());
    }

    #[test]
    fn test_bet_id_from_plain_event() {
        let tx = TxResult::success(vec![bet_created_event(42)]);
        assert!(tx.is_success());
        assert_eq!(tx.bet_id(), Some(42));
    }

    #[test]
    fn test_bet_id_from_base64_event() {
        let b64 = |s: &str| base64::engine::general_purpose::STANDARD.encode(s);
        let tx = TxResult::success(vec![TxEvent {
            kind: "wasm".into(),
            attributes: vec![
                EventAttribute { key: b64("action"), value: b64(BET_CREATED_ACTION) },
                EventAttribute { key: b64("bet_id"), value: b64("17") },
            ],
        }]);
        assert_eq!(tx.bet_id(), Some(17));
    }

    #[test]
    fn test_bet_id_ignores_other_actions() {
        let tx = TxResult::success(vec![TxEvent {
            kind: "wasm".into(),
            attributes: vec![
                EventAttribute { key: "action".into(), value: "coinflip.bet_accepted".into() },
                EventAttribute { key: "bet_id".into(), value: "3".into() },
            ],
        }]);
        assert_eq!(tx.bet_id(), None);
    }

    #[test]
    fn test_tx_lookup_decodes_lcd_shape() {
        let body = r#"{"tx_response":{"height":"120","txhash":"H1","code":5,
            "raw_log":"insufficient funds","events":[]}}"#;
        let parsed: TxLookupResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.tx_response.code, 5);
        assert_eq!(parsed.tx_response.height, "120");
        assert!(!parsed.tx_response.is_success());
    }

    #[test]
    fn test_raw_bet_conversion() {
        let commitment = base64::engine::general_purpose::STANDARD.encode([0xabu8; 32]);
        let raw: RawBet = serde_json::from_value(serde_json::json!({
            "id": 7,
            "maker": "cosmos1maker",
            "amount": "1000000",
            "commitment": commitment,
            "status": "timeoutclaimed",
            "acceptor": "cosmos1acceptor",
            "acceptor_guess": "tails",
            "created_at_time": 1_700_000_000u64,
            "accepted_at_time": 1_700_000_100u64,
            "reveal_side": null,
            "winner": "cosmos1acceptor",
            "payout_amount": "1960000",
            "commission_paid": "40000"
        }))
        .unwrap();

        let bet = ChainBet::try_from(raw).unwrap();
        assert_eq!(bet.status, ChainBetStatus::TimeoutClaimed);
        assert_eq!(bet.commitment, "ab".repeat(32));
        assert_eq!(bet.amount, 1_000_000);
        assert_eq!(bet.payout_amount, Some(1_960_000));
        assert_eq!(bet.acceptor_guess, Some(Side::Tails));
    }

    #[test]
    fn test_bad_amount_is_invalid_response() {
        assert!(matches!(parse_uint("12x"), Err(ChainError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_all_open_bets_walks_pages() {
        let chain = crate::mock::MockChain::new();
        for id in 1..=250u64 {
            chain.insert_bet(crate::mock::MockChain::open_bet(id, "cosmos1maker", &format!("{:064x}", id)));
        }
        let bets = all_open_bets(&chain).await.unwrap();
        assert_eq!(bets.len(), 250);
        assert_eq!(bets.last().map(|b| b.id), Some(250));
    }
}
