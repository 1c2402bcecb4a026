//! Direct-use inspection clients over the AI Defense HTTP contract.
//!
//! Applications that want a verdict without wrapping a provider client use
//! these: [`chat::ChatInspectionClient`] for conversations and
//! [`http::HttpInspectionClient`] for HTTP traffic. Both share one
//! configuration object and the pooled HTTP plumbing.

use std::time::Duration;

use serde_json::Value;

use crate::client::blocking::BlockingHttpClient;
use crate::client::{ApiRequest, Auth, HttpClient, HttpConfig, RetryPolicy};
use crate::errors::Error;
use crate::inspection::models::{
	Classification, InspectResponse, Rule, RuleName, Severity, default_enabled_rules,
};

pub mod chat;
pub mod http;
pub mod models;

pub use chat::ChatInspectionClient;
pub use http::HttpInspectionClient;

/// SDK-level configuration for the inspection clients: endpoint selection
/// by region or explicit base URL, timeouts, retries, and pool sizing.
#[derive(Clone, Debug)]
pub struct Config {
	/// One of `us`, `eu`, `apj`.
	pub region: String,
	/// Custom base URL; takes precedence over the region.
	pub runtime_base_url: Option<String>,
	pub timeout: Duration,
	pub retry: RetryPolicy,
	pub pool_max_idle_per_host: usize,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			region: "us".to_string(),
			runtime_base_url: None,
			timeout: Duration::from_secs(30),
			retry: RetryPolicy::default(),
			pool_max_idle_per_host: 20,
		}
	}
}

impl Config {
	pub fn base_url(&self) -> Result<String, Error> {
		if let Some(url) = &self.runtime_base_url {
			return Ok(url.trim_end_matches('/').to_string());
		}
		match self.region.as_str() {
			"us" | "eu" | "apj" => Ok(format!(
				"https://{}.api.inspect.aidefense.security.cisco.com",
				self.region
			)),
			other => Err(Error::Validation(format!("Invalid region: {other}"))),
		}
	}

	fn http_config(&self) -> HttpConfig {
		HttpConfig {
			timeout: self.timeout,
			retry: self.retry.clone(),
			pool_max_idle_per_host: self.pool_max_idle_per_host,
		}
	}
}

/// Shared guts of the inspection clients: authentication, pooled transports,
/// and the precomputed default rule set.
#[derive(Debug)]
pub(crate) struct ClientCore {
	api_key: String,
	base_url: String,
	blocking: BlockingHttpClient,
	asynchronous: HttpClient,
	pub(crate) default_enabled_rules: Vec<Rule>,
}

impl ClientCore {
	pub(crate) fn new(api_key: impl Into<String>, config: Config) -> Result<Self, Error> {
		let api_key = api_key.into();
		if api_key.is_empty() {
			return Err(Error::Validation("api_key must not be empty".into()));
		}
		let base_url = config.base_url()?;
		Ok(ClientCore {
			api_key,
			base_url,
			blocking: BlockingHttpClient::new(config.http_config()),
			asynchronous: HttpClient::new(config.http_config()),
			default_enabled_rules: default_enabled_rules(),
		})
	}

	pub(crate) fn endpoint(&self, path: &str) -> String {
		format!("{}{path}", self.base_url)
	}

	fn build(&self, url: &str, body: Value, request_id: Option<String>, timeout: Option<Duration>) -> ApiRequest {
		let mut request = ApiRequest::post(url)
			.auth(Auth::ApiKey(self.api_key.clone()))
			.json(body);
		if let Some(request_id) = request_id {
			request = request.request_id(request_id);
		}
		if let Some(timeout) = timeout {
			request = request.timeout(timeout);
		}
		request
	}

	pub(crate) fn post(
		&self,
		url: &str,
		body: Value,
		request_id: Option<String>,
		timeout: Option<Duration>,
	) -> Result<Value, Error> {
		self.blocking.request(self.build(url, body, request_id, timeout))
	}

	pub(crate) async fn post_async(
		&self,
		url: &str,
		body: Value,
		request_id: Option<String>,
		timeout: Option<Duration>,
	) -> Result<Value, Error> {
		self
			.asynchronous
			.request(self.build(url, body, request_id, timeout))
			.await
	}

	/// Release the async session. The blocking pool is dropped with the
	/// client itself.
	pub(crate) async fn close(&self) {
		self.asynchronous.close().await;
	}
}

/// Caller-side knobs shared by every inspection method.
#[derive(Clone, Debug, Default)]
pub struct InspectOptions {
	pub metadata: Option<models::Metadata>,
	pub config: Option<models::InspectionConfig>,
	/// Request id for tracing; a UUIDv4 is generated when absent.
	pub request_id: Option<String>,
	pub timeout: Option<Duration>,
}

/// Parse a chat or HTTP inspection response. Unknown enum strings are
/// dropped rather than failing the whole parse; a non-object body is a
/// parse error carrying the raw payload.
pub(crate) fn parse_inspect_response(response: Value) -> Result<InspectResponse, Error> {
	let Some(object) = response.as_object() else {
		return Err(Error::ResponseParse {
			message: "inspection response is not an object".into(),
			raw: response,
		});
	};

	let classifications = object
		.get("classifications")
		.and_then(Value::as_array)
		.map(|arr| {
			arr
				.iter()
				.filter_map(|c| c.as_str().and_then(Classification::from_wire))
				.collect()
		})
		.unwrap_or_default();

	let rules = object.get("rules").and_then(Value::as_array).map(|arr| {
		arr
			.iter()
			.map(|rule| Rule {
				rule_name: rule
					.get("rule_name")
					.and_then(Value::as_str)
					.and_then(RuleName::from_wire),
				entity_types: rule.get("entity_types").and_then(Value::as_array).map(|e| {
					e.iter()
						.filter_map(|v| v.as_str().map(str::to_owned))
						.collect()
				}),
				rule_id: rule.get("rule_id").and_then(Value::as_u64),
				classification: rule
					.get("classification")
					.and_then(Value::as_str)
					.and_then(Classification::from_wire),
			})
			.collect::<Vec<_>>()
	});

	let severity = object
		.get("severity")
		.and_then(Value::as_str)
		.and_then(Severity::from_wire);

	let get_string = |key: &str| {
		object
			.get(key)
			.and_then(Value::as_str)
			.map(str::to_owned)
	};

	Ok(InspectResponse {
		classifications,
		is_safe: object.get("is_safe").and_then(Value::as_bool).unwrap_or(true),
		severity,
		rules: rules.filter(|r| !r.is_empty()),
		attack_technique: get_string("attack_technique"),
		explanation: get_string("explanation"),
		client_transaction_id: get_string("client_transaction_id"),
		event_id: get_string("event_id"),
	})
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn region_resolution() {
		let config = Config::default();
		assert_eq!(
			config.base_url().unwrap(),
			"https://us.api.inspect.aidefense.security.cisco.com"
		);

		let eu = Config {
			region: "eu".into(),
			..Config::default()
		};
		assert!(eu.base_url().unwrap().starts_with("https://eu."));

		let custom = Config {
			runtime_base_url: Some("https://inspect.internal.example.com/".into()),
			..Config::default()
		};
		assert_eq!(
			custom.base_url().unwrap(),
			"https://inspect.internal.example.com"
		);

		let bad = Config {
			region: "mars".into(),
			..Config::default()
		};
		assert!(bad.base_url().is_err());
	}

	#[test]
	fn parse_drops_unknown_enum_values() {
		let parsed = parse_inspect_response(json!({
			"is_safe": false,
			"severity": "HIGH_SEVERITY",
			"classifications": ["SECURITY_VIOLATION", "BRAND_NEW_VIOLATION"],
			"rules": [
				{"rule_name": "Prompt Injection", "classification": "SECURITY_VIOLATION"},
				{"rule_name": "Future Rule", "rule_id": 7},
			],
			"event_id": "evt-1",
		}))
		.unwrap();
		assert!(!parsed.is_safe);
		assert_eq!(parsed.severity, Some(Severity::High));
		assert_eq!(parsed.classifications, vec![Classification::SecurityViolation]);
		let rules = parsed.rules.unwrap();
		assert_eq!(rules[0].rule_name, Some(RuleName::PromptInjection));
		assert_eq!(rules[1].rule_name, None);
		assert_eq!(rules[1].rule_id, Some(7));
		assert_eq!(parsed.event_id.as_deref(), Some("evt-1"));
	}

	#[test]
	fn parse_defaults_is_safe_true() {
		let parsed = parse_inspect_response(json!({})).unwrap();
		assert!(parsed.is_safe);
		assert!(parsed.rules.is_none());
	}

	#[test]
	fn non_object_response_is_parse_error() {
		let err = parse_inspect_response(json!("nope")).unwrap_err();
		assert!(matches!(err, Error::ResponseParse { .. }));
	}

	#[test]
	fn empty_api_key_is_rejected() {
		let err = ClientCore::new("", Config::default()).unwrap_err();
		assert!(matches!(err, Error::Validation(_)));
	}
}
