//! Finnhub 호환 피어 목록 클라이언트.
//!
//! `GET {base}/stock/peers?symbol=RCL&token=...` → `["CCL","NCLH","RCL",...]`
//!
//! 응답 목록은 대문자로 정규화하고, 중복과 자기 자신을 제거한 뒤 최대 5개로 자릅니다.
//! 토큰이 없거나, 요청이 실패하거나, 빈 목록이 오면 내장 피어 목록을 사용합니다.

use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{debug, warn};

use terminal_core::{ApiKey, PeersConfig, Symbol};

use super::PeersProvider;
use crate::error::{DataError, Result};

/// 내장 피어 목록 (업종 대표 종목).
const FALLBACK_PEERS: &[(&str, &[&str])] = &[
    ("RCL", &["CCL", "NCLH", "CUK", "ONON"]),
    ("CCL", &["RCL", "NCLH", "CUK"]),
    ("NCLH", &["RCL", "CCL", "CUK"]),
    ("AAPL", &["MSFT", "GOOGL", "AMZN", "META", "DELL"]),
    ("MSFT", &["AAPL", "GOOGL", "AMZN", "ORCL", "CRM"]),
    ("GOOGL", &["MSFT", "META", "AAPL", "AMZN", "SNAP"]),
    ("META", &["GOOGL", "SNAP", "PINS", "MSFT", "AAPL"]),
    ("AMZN", &["WMT", "EBAY", "SHOP", "BABA", "TGT"]),
    ("NVDA", &["AMD", "INTC", "AVGO", "QCOM", "TSM"]),
    ("AMD", &["NVDA", "INTC", "QCOM", "AVGO", "MU"]),
    ("TSLA", &["F", "GM", "RIVN", "LCID", "TM"]),
    ("JPM", &["BAC", "WFC", "C", "GS", "MS"]),
    ("XOM", &["CVX", "COP", "BP", "SHEL", "OXY"]),
];

/// 원시 피어 목록 정규화: 대문자, 중복/자기 자신 제거, 최대 `max`개.
pub fn normalize_peers<I, S>(symbol: &Symbol, raw: I, max: usize) -> Vec<Symbol>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    raw.into_iter()
        .filter_map(|s| Symbol::new(s.as_ref()).ok())
        .filter(|peer| peer != symbol)
        .filter(|peer| seen.insert(peer.clone()))
        .take(max)
        .collect()
}

/// 내장 피어 목록 조회.
pub fn fallback_peers(symbol: &Symbol, max: usize) -> Vec<Symbol> {
    FALLBACK_PEERS
        .iter()
        .find(|(key, _)| *key == symbol.as_str())
        .map(|(_, peers)| normalize_peers(symbol, peers.iter(), max))
        .unwrap_or_default()
}

/// 내장 피어 목록만 사용하는 제공자.
#[derive(Debug, Clone)]
pub struct StaticPeersProvider {
    max_peers: usize,
}

impl StaticPeersProvider {
    /// 최대 피어 수를 지정하여 생성합니다.
    pub fn new(max_peers: usize) -> Self {
        Self { max_peers }
    }
}

impl Default for StaticPeersProvider {
    fn default() -> Self {
        Self::new(5)
    }
}

#[async_trait]
impl PeersProvider for StaticPeersProvider {
    async fn get_peers(&self, symbol: &Symbol) -> Vec<Symbol> {
        fallback_peers(symbol, self.max_peers)
    }
}

/// Finnhub 피어 클라이언트.
#[derive(Clone)]
pub struct FinnhubPeersClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<ApiKey>,
    max_peers: usize,
}

impl FinnhubPeersClient {
    /// 설정에서 클라이언트를 생성합니다.
    pub fn from_config(config: &PeersConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DataError::Config(format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            max_peers: config.max_peers,
        })
    }

    async fn fetch(&self, symbol: &Symbol, key: &ApiKey) -> Result<Vec<String>> {
        let url = format!("{}/stock/peers", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol.as_str()), ("token", key.expose())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(DataError::Fetch(format!("peers {}: HTTP {}", symbol, status)));
        }

        Ok(response.json::<Vec<String>>().await?)
    }
}

#[async_trait]
impl PeersProvider for FinnhubPeersClient {
    async fn get_peers(&self, symbol: &Symbol) -> Vec<Symbol> {
        let raw = match &self.api_key {
            Some(key) => match self.fetch(symbol, key).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "피어 목록 조회 실패 - 내장 목록 사용");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let peers = normalize_peers(symbol, raw, self.max_peers);
        if peers.is_empty() {
            let fallback = fallback_peers(symbol, self.max_peers);
            debug!(symbol = %symbol, count = fallback.len(), "내장 피어 목록 사용");
            return fallback;
        }
        peers
    }
}
