//! HTTP price feed provider
//!
//! Talks to a CoinGecko-compatible `simple/price` endpoint. Ticker symbols are
//! mapped to the feed's asset ids through configuration; unmapped symbols are
//! sent lowercased.

use async_trait::async_trait;
use chrono::Utc;
use oasis_types::{
	PriceFeed, Provider, ProviderCategory, ProviderError, ProviderInfo, ProviderResult,
};
use reqwest::{
	header::{HeaderMap, HeaderValue},
	Client,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const API_KEY_HEADER: &str = "x-cg-pro-api-key";

/// Connection settings of the price feed
#[derive(Debug, Clone, PartialEq)]
pub struct PriceFeedConfig {
	pub endpoint: String,
	pub timeout_ms: u64,
	pub api_key: Option<String>,
	pub asset_ids: HashMap<String, String>,
}

impl PriceFeedConfig {
	pub fn new(endpoint: impl Into<String>, timeout_ms: u64) -> Self {
		Self {
			endpoint: endpoint.into(),
			timeout_ms,
			api_key: None,
			asset_ids: HashMap::new(),
		}
	}

	pub fn with_asset_id(mut self, symbol: &str, asset_id: &str) -> Self {
		self.asset_ids
			.insert(symbol.to_uppercase(), asset_id.to_string());
		self
	}
}

/// Market data of one asset keyed by `<currency>`, `<currency>_24h_change`, ...
type SimplePriceResponse = HashMap<String, HashMap<String, Option<f64>>>;

#[derive(Debug, Deserialize)]
struct PingResponse {
	#[serde(default)]
	gecko_says: Option<String>,
}

#[derive(Debug)]
pub struct HttpPriceFeedProvider {
	info: ProviderInfo,
	config: PriceFeedConfig,
	client: Client,
}

impl HttpPriceFeedProvider {
	/// Price feed serving the storage and network categories
	pub fn new(id: &str, config: PriceFeedConfig) -> ProviderResult<Self> {
		let info = ProviderInfo::new(
			id,
			"HTTP price feed",
			[ProviderCategory::Network, ProviderCategory::Storage],
		);
		Self::with_info(info, config)
	}

	pub fn with_info(mut info: ProviderInfo, config: PriceFeedConfig) -> ProviderResult<Self> {
		info.categories.insert(ProviderCategory::Network);

		let mut headers = HeaderMap::new();
		headers.insert("Accept", HeaderValue::from_static("application/json"));
		headers.insert("User-Agent", HeaderValue::from_static("OASIS-HyperDrive/1.0"));
		if let Some(key) = &config.api_key {
			let value = HeaderValue::from_str(key).map_err(|_| {
				ProviderError::InvalidInput("price feed API key is not a valid header".to_string())
			})?;
			headers.insert(API_KEY_HEADER, value);
		}

		let client = Client::builder()
			.default_headers(headers)
			.timeout(Duration::from_millis(config.timeout_ms))
			.build()
			.map_err(|e| ProviderError::Network(e.to_string()))?;

		Ok(Self {
			info,
			config,
			client,
		})
	}

	fn asset_id(&self, symbol: &str) -> String {
		self.config
			.asset_ids
			.get(&symbol.to_uppercase())
			.cloned()
			.unwrap_or_else(|| symbol.to_lowercase())
	}

	fn url(&self, path: &str) -> String {
		format!("{}/{}", self.config.endpoint.trim_end_matches('/'), path)
	}

	fn map_request_error(&self, e: reqwest::Error) -> ProviderError {
		if e.is_timeout() {
			ProviderError::Timeout {
				timeout_ms: self.config.timeout_ms,
			}
		} else {
			ProviderError::Network(e.to_string())
		}
	}

	async fn fetch(&self, symbol: &str, currency: &str) -> ProviderResult<PriceFeed> {
		if symbol.trim().is_empty() {
			return Err(ProviderError::InvalidInput("symbol is required".to_string()));
		}

		let asset_id = self.asset_id(symbol);
		let currency_key = currency.to_lowercase();
		let url = self.url("simple/price");

		debug!(
			provider_id = %self.info.id,
			symbol,
			asset_id = %asset_id,
			currency = %currency_key,
			"Fetching price"
		);

		let response = self
			.client
			.get(&url)
			.query(&[
				("ids", asset_id.as_str()),
				("vs_currencies", currency_key.as_str()),
				("include_24hr_change", "true"),
				("include_24hr_vol", "true"),
				("include_market_cap", "true"),
			])
			.send()
			.await
			.map_err(|e| self.map_request_error(e))?;

		if !response.status().is_success() {
			let status = response.status().as_u16();
			warn!(provider_id = %self.info.id, status, "Price feed returned error status");
			return Err(ProviderError::from_http_status(status, &self.info.id));
		}

		let body: SimplePriceResponse = response
			.json()
			.await
			.map_err(|e| ProviderError::Serialization(e.to_string()))?;

		let market = body
			.get(&asset_id)
			.ok_or_else(|| ProviderError::SymbolNotSupported(symbol.to_uppercase()))?;
		let price = market
			.get(&currency_key)
			.copied()
			.flatten()
			.ok_or_else(|| {
				ProviderError::SymbolNotSupported(format!(
					"{}/{}",
					symbol.to_uppercase(),
					currency.to_uppercase()
				))
			})?;
		let field = |suffix: &str| {
			market
				.get(&format!("{}_{}", currency_key, suffix))
				.copied()
				.flatten()
		};

		Ok(PriceFeed {
			symbol: symbol.to_uppercase(),
			currency: currency.to_uppercase(),
			price,
			change_24h: field("24h_change"),
			volume_24h: field("24h_vol"),
			market_cap: field("market_cap"),
			source: self.info.id.clone(),
			at: Utc::now(),
		})
	}
}

#[async_trait]
impl Provider for HttpPriceFeedProvider {
	fn info(&self) -> &ProviderInfo {
		&self.info
	}

	async fn health_check(&self) -> ProviderResult<bool> {
		let response = self
			.client
			.get(self.url("ping"))
			.send()
			.await
			.map_err(|e| self.map_request_error(e))?;

		if !response.status().is_success() {
			warn!(
				provider_id = %self.info.id,
				status = %response.status(),
				"Price feed health check failed"
			);
			return Ok(false);
		}

		// A healthy feed may answer with any body
		let ping = response.json::<PingResponse>().await.ok();
		debug!(
			provider_id = %self.info.id,
			message = ?ping.and_then(|p| p.gecko_says),
			"Price feed is healthy"
		);
		Ok(true)
	}

	async fn get_price(&self, symbol: &str, currency: &str) -> ProviderResult<f64> {
		self.fetch(symbol, currency).await.map(|feed| feed.price)
	}

	async fn get_price_feed(&self, symbol: &str, currency: &str) -> ProviderResult<PriceFeed> {
		self.fetch(symbol, currency).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use wiremock::matchers::{header, method, path, query_param};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn provider(server: &MockServer) -> HttpPriceFeedProvider {
		let config = PriceFeedConfig::new(server.uri(), 1_000).with_asset_id("XRD", "radix");
		HttpPriceFeedProvider::new("coingecko", config).unwrap()
	}

	#[tokio::test]
	async fn test_price_feed_parses_market_data() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/simple/price"))
			.and(query_param("ids", "radix"))
			.and(query_param("vs_currencies", "usd"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"radix": {"usd": 0.05, "usd_24h_change": -1.5, "usd_24h_vol": 1200.0}
			})))
			.mount(&server)
			.await;

		let provider = provider(&server);
		let feed = provider.get_price_feed("xrd", "USD").await.unwrap();
		assert_eq!(feed.price, 0.05);
		assert_eq!(feed.change_24h, Some(-1.5));
		assert_eq!(feed.market_cap, None);
		assert_eq!(feed.source, "coingecko");
		assert_eq!(provider.get_price("XRD", "usd").await, Ok(0.05));
	}

	#[tokio::test]
	async fn test_unknown_symbol_is_not_supported() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/simple/price"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
			.mount(&server)
			.await;

		let result = provider(&server).get_price("NOPE", "USD").await;
		assert_eq!(result, Err(ProviderError::SymbolNotSupported("NOPE".to_string())));
	}

	#[tokio::test]
	async fn test_rate_limit_is_transient() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/simple/price"))
			.respond_with(ResponseTemplate::new(429))
			.mount(&server)
			.await;

		let error = provider(&server).get_price("XRD", "USD").await.unwrap_err();
		assert!(error.is_transient());
	}

	#[tokio::test]
	async fn test_api_key_header_and_health() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/ping"))
			.and(header(API_KEY_HEADER, "secret"))
			.respond_with(
				ResponseTemplate::new(200).set_body_json(json!({"gecko_says": "(V3) To the Moon!"})),
			)
			.mount(&server)
			.await;

		let mut config = PriceFeedConfig::new(server.uri(), 1_000);
		config.api_key = Some("secret".to_string());
		let provider = HttpPriceFeedProvider::new("coingecko", config).unwrap();

		assert!(provider.health_check().await.unwrap());
		assert!(provider.supports(ProviderCategory::Storage));
		assert!(provider.supports(ProviderCategory::Network));
	}

	#[tokio::test]
	async fn test_storage_operations_are_unsupported() {
		let server = MockServer::start().await;
		let error = provider(&server).read_entity("k").await.unwrap_err();
		assert!(matches!(error, ProviderError::UnsupportedOperation { .. }));
	}
}
