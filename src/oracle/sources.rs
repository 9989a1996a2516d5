// Off-chain price sources: plain GET endpoints returning JSON, untrusted
// until the value survives the oracle's sanity bounds.

use serde_json::Value;
use tracing::debug;

use crate::config::PriceSourceConfig;

/// Fetch one source's price. Any failure (transport, bad JSON, missing
/// field) resolves to `None`; the oracle moves on to the next source.
pub async fn fetch_price(http: &reqwest::Client, source: &PriceSourceConfig) -> Option<f64> {
    let response = match http.get(&source.url).send().await {
        Ok(r) => r,
        Err(e) => {
            debug!("price source {} unreachable: {e}", source.name);
            return None;
        }
    };

    if !response.status().is_success() {
        debug!("price source {} returned HTTP {}", source.name, response.status());
        return None;
    }

    let body: Value = match response.json().await {
        Ok(v) => v,
        Err(e) => {
            debug!("price source {} returned invalid JSON: {e}", source.name);
            return None;
        }
    };

    let field = body.pointer(&source.json_pointer)?;
    // Some sources quote the price as a JSON string.
    let price = field
        .as_f64()
        .or_else(|| field.as_str().and_then(|s| s.parse().ok()))?;

    Some(price)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(url: String, pointer: &str) -> PriceSourceConfig {
        PriceSourceConfig {
            name: "test".to_string(),
            url,
            json_pointer: pointer.to_string(),
        }
    }

    #[tokio::test]
    async fn test_numeric_and_string_prices_both_parse() {
        let mut server = mockito::Server::new_async().await;
        let _num = server
            .mock("GET", "/num")
            .with_body(r#"{"solana":{"usd":142.5}}"#)
            .create_async()
            .await;
        let _str = server
            .mock("GET", "/str")
            .with_body(r#"{"data":{"amount":"142.5"}}"#)
            .create_async()
            .await;

        let http = reqwest::Client::new();
        let n = fetch_price(&http, &source(format!("{}/num", server.url()), "/solana/usd")).await;
        let s = fetch_price(&http, &source(format!("{}/str", server.url()), "/data/amount")).await;
        assert_eq!(n, Some(142.5));
        assert_eq!(s, Some(142.5));
    }

    #[tokio::test]
    async fn test_missing_field_is_none() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/")
            .with_body(r#"{"unexpected":true}"#)
            .create_async()
            .await;

        let http = reqwest::Client::new();
        let price = fetch_price(&http, &source(server.url(), "/solana/usd")).await;
        assert_eq!(price, None);
    }

    #[tokio::test]
    async fn test_server_error_is_none() {
        let mut server = mockito::Server::new_async().await;
        let _m = server.mock("GET", "/").with_status(500).create_async().await;

        let http = reqwest::Client::new();
        let price = fetch_price(&http, &source(server.url(), "/x")).await;
        assert_eq!(price, None);
    }
}
