//! Provider-aware LLM gateway client.
//!
//! The guard serializes the provider-native request verbatim and POSTs it to
//! the per-provider gateway URL; the response body is the provider-native
//! structure. Streaming operations get a single non-streaming response from
//! the gateway, which the Bedrock guard reassembles into an event stream.

use std::time::Duration;

use once_cell::sync::OnceCell;
use serde_json::Value;
use tracing::debug;

use crate::client::user_agent;
use crate::errors::Error;
use crate::state::RuntimeState;

const GATEWAY_TIMEOUT: Duration = Duration::from_secs(60);

pub struct LlmGateway {
	provider: String,
	url: String,
	api_key: String,
	sync_client: OnceCell<reqwest::blocking::Client>,
}

impl LlmGateway {
	/// Gateway for a provider, if the state carries both URL and key.
	pub fn for_provider(state: &RuntimeState, provider: &str) -> Option<Self> {
		let gateway = state.provider_gateway(provider)?;
		if !gateway.is_configured() {
			return None;
		}
		Some(LlmGateway {
			provider: provider.to_string(),
			url: gateway.gateway_url.clone()?,
			api_key: gateway.gateway_api_key.clone()?,
			sync_client: OnceCell::new(),
		})
	}

	pub fn provider(&self) -> &str {
		&self.provider
	}

	fn headers(&self, operation: Option<&str>) -> Vec<(&'static str, String)> {
		let mut headers = vec![
			("Authorization", format!("Bearer {}", self.api_key)),
			("Content-Type", "application/json".to_string()),
			("Accept", "application/json".to_string()),
			("User-Agent", user_agent()),
		];
		// The gateway needs the operation to route Bedrock requests.
		if let Some(operation) = operation {
			if self.provider == "bedrock" {
				headers.push(("X-Bedrock-Operation", operation.to_string()));
			}
		}
		headers
	}

	fn sync_client(&self) -> Result<&reqwest::blocking::Client, Error> {
		self.sync_client.get_or_try_init(|| {
			reqwest::blocking::Client::builder()
				.timeout(GATEWAY_TIMEOUT)
				.build()
				.map_err(Error::from)
		})
	}

	/// POST the native request body to the gateway (blocking) and return the
	/// native response body.
	pub fn forward(&self, operation: Option<&str>, body: &Value) -> Result<Value, Error> {
		debug!(
			provider = %self.provider,
			operation = operation.unwrap_or(""),
			"forwarding native request to AI Defense Gateway"
		);
		let client = self.sync_client()?;
		let mut builder = client.post(&self.url).json(body);
		for (key, value) in self.headers(operation) {
			builder = builder.header(key, value);
		}
		let response = builder.send()?;
		let status = response.status().as_u16();
		if status >= 400 {
			let text = response.text().unwrap_or_default();
			return Err(Error::Api {
				status: Some(status),
				message: format!("gateway returned {status}: {text}"),
				request_id: None,
			});
		}
		response.json::<Value>().map_err(Error::from)
	}

	/// Async variant of [`forward`](Self::forward); builds a fresh client
	/// per call like the inspectors.
	pub async fn forward_async(&self, operation: Option<&str>, body: &Value) -> Result<Value, Error> {
		debug!(
			provider = %self.provider,
			operation = operation.unwrap_or(""),
			"forwarding native request to AI Defense Gateway"
		);
		let client = reqwest::Client::builder()
			.timeout(GATEWAY_TIMEOUT)
			.build()
			.map_err(Error::from)?;
		let mut builder = client.post(&self.url).json(body);
		for (key, value) in self.headers(operation) {
			builder = builder.header(key, value);
		}
		let response = builder.send().await?;
		let status = response.status().as_u16();
		if status >= 400 {
			let text = response.text().await.unwrap_or_default();
			return Err(Error::Api {
				status: Some(status),
				message: format!("gateway returned {status}: {text}"),
				request_id: None,
			});
		}
		response.json::<Value>().await.map_err(Error::from)
	}
}
