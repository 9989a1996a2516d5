//! Price oracle: reference-unit <-> native-unit conversion.
//!
//! Resolution order: fresh cache, on-chain oracle through the RPC pool,
//! ranked off-chain HTTP sources, stale cache, fixed conservative constant.
//! A quote is always produced; source quality degrades instead of the call
//! failing. Every quote carries its provenance so transactions can record
//! what the conversion was based on.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::OracleConfig;
use crate::rpc::EndpointPool;

pub mod sources;

/// Where a rate came from.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RateSource {
    OnChain,
    Http(String),
    StaleCache,
    FixedFallback,
}

impl std::fmt::Display for RateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateSource::OnChain => write!(f, "on-chain"),
            RateSource::Http(name) => write!(f, "http:{name}"),
            RateSource::StaleCache => write!(f, "stale-cache"),
            RateSource::FixedFallback => write!(f, "fixed-fallback"),
        }
    }
}

/// A conversion between the stable reference unit and the native settlement
/// unit. `rate` is reference units per one native unit, always positive;
/// `native_amount = reference_amount / rate`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PriceQuote {
    pub reference_amount: f64,
    pub native_amount: f64,
    pub rate: f64,
    pub as_of: DateTime<Utc>,
    pub source: RateSource,
}

struct CachedRate {
    rate: f64,
    source: RateSource,
    fetched_at: Instant,
    as_of: DateTime<Utc>,
}

pub struct PriceOracle {
    rpc: Arc<EndpointPool>,
    http: reqwest::Client,
    config: OracleConfig,
    cache: RwLock<Option<CachedRate>>,
}

impl PriceOracle {
    pub fn new(rpc: Arc<EndpointPool>, config: OracleConfig) -> Self {
        Self {
            rpc,
            http: reqwest::Client::new(),
            config,
            cache: RwLock::new(None),
        }
    }

    fn plausible(&self, rate: f64) -> bool {
        rate.is_finite()
            && rate >= self.config.min_plausible_rate
            && rate <= self.config.max_plausible_rate
    }

    async fn remember(&self, rate: f64, source: RateSource) -> (f64, RateSource, DateTime<Utc>) {
        let as_of = Utc::now();
        *self.cache.write().await = Some(CachedRate {
            rate,
            source: source.clone(),
            fetched_at: Instant::now(),
            as_of,
        });
        (rate, source, as_of)
    }

    /// Resolve the current rate. Never fails; degrades through the source
    /// chain instead.
    async fn current_rate(&self) -> (f64, RateSource, DateTime<Utc>) {
        if let Some(cached) = &*self.cache.read().await {
            if cached.fetched_at.elapsed() < self.config.cache_ttl() {
                return (cached.rate, cached.source.clone(), cached.as_of);
            }
        }

        match self.rpc.latest_reference_price(&self.config.oracle_account).await {
            Ok(Some(rate)) if self.plausible(rate) => {
                return self.remember(rate, RateSource::OnChain).await;
            }
            Ok(Some(rate)) => {
                warn!("on-chain oracle rate {rate} outside sanity bounds, discarding");
            }
            Ok(None) => {
                debug!("on-chain oracle has no current price");
            }
            Err(e) => {
                debug!("on-chain oracle unavailable: {e}");
            }
        }

        for source in &self.config.http_sources {
            if let Some(rate) = sources::fetch_price(&self.http, source).await {
                if self.plausible(rate) {
                    return self.remember(rate, RateSource::Http(source.name.clone())).await;
                }
                warn!(
                    "price source {} returned implausible rate {rate}, discarding",
                    source.name
                );
            }
        }

        if let Some(cached) = &*self.cache.read().await {
            warn!(
                "all price sources failed, using stale rate {} from {}",
                cached.rate, cached.source
            );
            return (cached.rate, RateSource::StaleCache, cached.as_of);
        }

        warn!(
            "all price sources failed with no cache, using fixed fallback rate {}",
            self.config.fallback_rate
        );
        (self.config.fallback_rate, RateSource::FixedFallback, Utc::now())
    }

    /// Quote a reference-unit amount in native units.
    pub async fn quote(&self, reference_amount: f64) -> PriceQuote {
        let (rate, source, as_of) = self.current_rate().await;
        PriceQuote {
            reference_amount,
            native_amount: reference_amount / rate,
            rate,
            as_of,
            source,
        }
    }

    /// Quote a native-unit amount in reference units.
    pub async fn quote_native(&self, native_amount: f64) -> PriceQuote {
        let (rate, source, as_of) = self.current_rate().await;
        PriceQuote {
            reference_amount: native_amount * rate,
            native_amount,
            rate,
            as_of,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PriceSourceConfig;
    use crate::rpc::testing::ScriptedRpc;
    use crate::rpc::{RpcError, SettlementRpc};
    use std::sync::atomic::Ordering;

    fn oracle_config(http_sources: Vec<PriceSourceConfig>) -> OracleConfig {
        OracleConfig {
            oracle_account: "oracle1".to_string(),
            cache_ttl_secs: 30,
            fallback_rate: 100.0,
            min_plausible_rate: 0.01,
            max_plausible_rate: 100_000.0,
            http_sources,
        }
    }

    fn pool_with(rpc: Arc<ScriptedRpc>) -> Arc<EndpointPool> {
        Arc::new(EndpointPool::new(vec![rpc as Arc<dyn SettlementRpc>]))
    }

    #[tokio::test]
    async fn test_on_chain_quote_round_trips() {
        let rpc = Arc::new(ScriptedRpc::healthy("a"));
        rpc.set_price(Ok(Some(150.0)));
        let oracle = PriceOracle::new(pool_with(rpc), oracle_config(vec![]));

        let quote = oracle.quote(3.0).await;
        assert_eq!(quote.source, RateSource::OnChain);
        assert_eq!(quote.rate, 150.0);
        assert!((quote.native_amount * quote.rate - 3.0).abs() < 1e-9);

        let back = oracle.quote_native(quote.native_amount).await;
        assert!((back.reference_amount - 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_fresh_cache_avoids_refetch() {
        let rpc = Arc::new(ScriptedRpc::healthy("a"));
        rpc.set_price(Ok(Some(150.0)));
        let oracle = PriceOracle::new(pool_with(Arc::clone(&rpc)), oracle_config(vec![]));

        oracle.quote(1.0).await;
        // Even if the oracle goes dark, the cached rate serves the next call.
        rpc.set_price(Err(RpcError::Transport("down".into())));
        let quote = oracle.quote(2.0).await;

        assert_eq!(quote.rate, 150.0);
        assert_eq!(quote.source, RateSource::OnChain);
        assert_eq!(rpc.price_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_http_fallback_when_chain_is_down() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/price")
            .with_body(r#"{"solana":{"usd":142.5}}"#)
            .create_async()
            .await;

        let rpc = Arc::new(ScriptedRpc::healthy("a"));
        rpc.set_price(Err(RpcError::Transport("down".into())));
        let oracle = PriceOracle::new(
            pool_with(rpc),
            oracle_config(vec![PriceSourceConfig {
                name: "gecko".to_string(),
                url: format!("{}/price", server.url()),
                json_pointer: "/solana/usd".to_string(),
            }]),
        );

        let quote = oracle.quote(1.0).await;
        assert_eq!(quote.source, RateSource::Http("gecko".to_string()));
        assert_eq!(quote.rate, 142.5);
    }

    #[tokio::test]
    async fn test_implausible_source_values_are_discarded() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/price")
            .with_body(r#"{"solana":{"usd":-5.0}}"#)
            .create_async()
            .await;

        let rpc = Arc::new(ScriptedRpc::healthy("a"));
        rpc.set_price(Ok(None));
        let oracle = PriceOracle::new(
            pool_with(rpc),
            oracle_config(vec![PriceSourceConfig {
                name: "bad".to_string(),
                url: format!("{}/price", server.url()),
                json_pointer: "/solana/usd".to_string(),
            }]),
        );

        let quote = oracle.quote(1.0).await;
        assert_eq!(quote.source, RateSource::FixedFallback);
        assert_eq!(quote.rate, 100.0);
    }

    #[tokio::test]
    async fn test_total_failure_still_quotes() {
        let rpc = Arc::new(ScriptedRpc::unreachable("a"));
        let oracle = PriceOracle::new(pool_with(rpc), oracle_config(vec![]));

        let quote = oracle.quote(5.0).await;
        assert_eq!(quote.source, RateSource::FixedFallback);
        assert_eq!(quote.rate, 100.0);
        assert_eq!(quote.native_amount, 0.05);
    }

    #[tokio::test]
    async fn test_stale_cache_beats_fixed_fallback() {
        let rpc = Arc::new(ScriptedRpc::healthy("a"));
        rpc.set_price(Ok(Some(150.0)));
        let mut config = oracle_config(vec![]);
        config.cache_ttl_secs = 0; // everything is immediately stale
        let oracle = PriceOracle::new(pool_with(Arc::clone(&rpc)), config);

        oracle.quote(1.0).await;
        rpc.set_price(Err(RpcError::Transport("down".into())));
        let quote = oracle.quote(1.0).await;

        assert_eq!(quote.source, RateSource::StaleCache);
        assert_eq!(quote.rate, 150.0);
    }
}
