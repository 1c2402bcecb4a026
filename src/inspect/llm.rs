//! LLM conversation inspector over the Chat Inspection API.

use std::collections::HashMap;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::parse_chat_decision;
use crate::client::{API_KEY_HEADER, REQUEST_ID_HEADER, user_agent};
use crate::decision::Decision;
use crate::errors::Error;
use crate::inspection::models::Rule;
use crate::state::{self, RuntimeState};
use crate::types::Message;

#[cfg(test)]
#[path = "llm_tests.rs"]
mod tests;

const LLM_API_KEY_ENV: &str = "AI_DEFENSE_API_MODE_LLM_API_KEY";
const LLM_ENDPOINT_ENV: &str = "AI_DEFENSE_API_MODE_LLM_ENDPOINT";

#[derive(Clone, Debug)]
pub struct LlmInspectorOptions {
	pub api_key: Option<String>,
	pub endpoint: Option<String>,
	pub default_rules: Vec<Rule>,
	pub timeout_ms: u64,
	/// Number of attempts; 1 means no retry.
	pub retry_attempts: u32,
	pub fail_open: bool,
}

impl Default for LlmInspectorOptions {
	fn default() -> Self {
		LlmInspectorOptions {
			api_key: None,
			endpoint: None,
			default_rules: Vec::new(),
			timeout_ms: 1_000,
			retry_attempts: 1,
			fail_open: true,
		}
	}
}

/// Inspector for LLM conversations. Exposes blocking and async variants with
/// identical semantics; the async variant builds a fresh HTTP client per
/// call because sharing one across event loops created by different host
/// frameworks is known to misbehave.
pub struct LlmInspector {
	api_key: Option<String>,
	endpoint: Option<String>,
	default_rules: Vec<Rule>,
	timeout: Duration,
	retry_attempts: u32,
	fail_open: bool,
	sync_client: OnceCell<reqwest::blocking::Client>,
}

impl LlmInspector {
	pub fn new(options: LlmInspectorOptions) -> Self {
		let state = state::current();
		Self::resolve(options, &state)
	}

	/// Inspector configured from an explicit runtime state (the bootstrap
	/// default or a test fixture).
	pub fn from_state(state: &RuntimeState) -> Self {
		Self::resolve(
			LlmInspectorOptions {
				default_rules: state.llm_rules.clone(),
				fail_open: state.api_mode_fail_open_llm,
				..LlmInspectorOptions::default()
			},
			state,
		)
	}

	fn resolve(options: LlmInspectorOptions, state: &RuntimeState) -> Self {
		let api_key = options
			.api_key
			.or_else(|| state.api_mode_llm_api_key.clone())
			.or_else(|| state::env_string(&[LLM_API_KEY_ENV]));
		let endpoint = options
			.endpoint
			.or_else(|| state.api_mode_llm_endpoint.clone())
			.or_else(|| state::env_string(&[LLM_ENDPOINT_ENV]));
		LlmInspector {
			api_key,
			endpoint,
			default_rules: options.default_rules,
			timeout: Duration::from_millis(options.timeout_ms),
			retry_attempts: options.retry_attempts.max(1),
			fail_open: options.fail_open,
			sync_client: OnceCell::new(),
		}
	}

	pub fn is_configured(&self) -> bool {
		self.api_key.is_some() && self.endpoint.is_some()
	}

	fn chat_url(endpoint: &str) -> String {
		format!("{}/v1/inspect/chat", endpoint.trim_end_matches('/'))
	}

	fn build_payload(&self, messages: &[Message], metadata: &HashMap<String, Value>) -> Value {
		let mut payload = serde_json::json!({
			"messages": messages,
			"metadata": metadata,
		});
		// Only include rules when a default set is configured.
		if !self.default_rules.is_empty() {
			payload["rules"] = serde_json::to_value(&self.default_rules).unwrap_or(Value::Null);
		}
		payload
	}

	fn headers(&self) -> Vec<(&'static str, String)> {
		vec![
			(API_KEY_HEADER, self.api_key.clone().unwrap_or_default()),
			("Content-Type", "application/json".to_string()),
			("Accept", "application/json".to_string()),
			("User-Agent", user_agent()),
			(REQUEST_ID_HEADER, uuid::Uuid::new_v4().to_string()),
		]
	}

	/// Fail-open conversion shared by both variants: the captured last error
	/// becomes an allow decision when `fail_open` is set, otherwise a
	/// security-policy failure carrying a block decision.
	fn handle_error(&self, error: Error, context: &str, message_count: usize) -> Result<Decision, Error> {
		let kind = error.kind_name();
		warn!(
			operation = context,
			messages = message_count,
			"AI Defense API error: {kind}: {error}"
		);
		if self.fail_open {
			warn!("fail_open=True, allowing request despite API error");
			Ok(Decision::allow(vec![format!(
				"API error ({kind}), fail_open=True"
			)]))
		} else {
			error!("fail_open=False, blocking request due to API error");
			let decision = Decision::block(vec![format!("API error: {kind}: {error}")]);
			Err(Error::security_policy_with(
				decision,
				format!("AI Defense API unavailable and fail_open=False: {error}"),
			))
		}
	}

	fn sync_client(&self) -> Result<&reqwest::blocking::Client, Error> {
		self.sync_client.get_or_try_init(|| {
			reqwest::blocking::Client::builder()
				.timeout(self.timeout)
				.build()
				.map_err(Error::from)
		})
	}

	/// Inspect a conversation (blocking).
	///
	/// Returns the service decision, or an allow decision when the service is
	/// unreachable and `fail_open` is set.
	pub fn inspect_conversation(
		&self,
		messages: &[Message],
		metadata: &HashMap<String, Value>,
	) -> Result<Decision, Error> {
		let (Some(endpoint), Some(_)) = (&self.endpoint, &self.api_key) else {
			debug!("no API endpoint/key configured, allowing by default");
			return Ok(Decision::allow(vec![]));
		};
		let url = Self::chat_url(endpoint);
		let payload = self.build_payload(messages, metadata);
		debug!(
			messages = messages.len(),
			"AI Defense chat inspection request"
		);

		let client = match self.sync_client() {
			Ok(c) => c,
			Err(e) => return self.handle_error(e, "inspect_conversation", messages.len()),
		};
		let mut last_error: Option<Error> = None;
		for attempt in 1..=self.retry_attempts {
			match self.post_once_blocking(client, &url, &payload) {
				Ok(response) => return Ok(parse_chat_decision(response)),
				Err(e) => {
					debug!(
						attempt,
						total = self.retry_attempts,
						"chat inspection attempt failed: {e}"
					);
					last_error = Some(e);
				},
			}
		}
		self.handle_error(
			last_error.expect("at least one attempt runs"),
			"inspect_conversation",
			messages.len(),
		)
	}

	fn post_once_blocking(
		&self,
		client: &reqwest::blocking::Client,
		url: &str,
		payload: &Value,
	) -> Result<Value, Error> {
		let mut builder = client.post(url).json(payload);
		for (key, value) in self.headers() {
			builder = builder.header(key, value);
		}
		let response = builder.send()?;
		let status = response.status().as_u16();
		if status >= 400 {
			let body = response.text().unwrap_or_default();
			return Err(Error::Api {
				status: Some(status),
				message: format!("chat inspection returned {status}: {body}"),
				request_id: None,
			});
		}
		response.json::<Value>().map_err(Error::from)
	}

	/// Inspect a conversation (async). Same semantics as the blocking
	/// variant; a fresh client is created for this call.
	pub async fn inspect_conversation_async(
		&self,
		messages: &[Message],
		metadata: &HashMap<String, Value>,
	) -> Result<Decision, Error> {
		let (Some(endpoint), Some(_)) = (&self.endpoint, &self.api_key) else {
			debug!("no API endpoint/key configured, allowing by default");
			return Ok(Decision::allow(vec![]));
		};
		let url = Self::chat_url(endpoint);
		let payload = self.build_payload(messages, metadata);
		debug!(
			messages = messages.len(),
			"AI Defense async chat inspection request"
		);

		let client = match reqwest::Client::builder().timeout(self.timeout).build() {
			Ok(c) => c,
			Err(e) => {
				return self.handle_error(e.into(), "inspect_conversation_async", messages.len());
			},
		};
		let mut last_error: Option<Error> = None;
		for attempt in 1..=self.retry_attempts {
			match self.post_once(&client, &url, &payload).await {
				Ok(response) => return Ok(parse_chat_decision(response)),
				Err(e) => {
					debug!(
						attempt,
						total = self.retry_attempts,
						"chat inspection attempt failed: {e}"
					);
					last_error = Some(e);
				},
			}
		}
		self.handle_error(
			last_error.expect("at least one attempt runs"),
			"inspect_conversation_async",
			messages.len(),
		)
	}

	async fn post_once(
		&self,
		client: &reqwest::Client,
		url: &str,
		payload: &Value,
	) -> Result<Value, Error> {
		let mut builder = client.post(url).json(payload);
		for (key, value) in self.headers() {
			builder = builder.header(key, value);
		}
		let response = builder.send().await?;
		let status = response.status().as_u16();
		if status >= 400 {
			let body = response.text().await.unwrap_or_default();
			return Err(Error::Api {
				status: Some(status),
				message: format!("chat inspection returned {status}: {body}"),
				request_id: None,
			});
		}
		response.json::<Value>().await.map_err(Error::from)
	}
}
