//! MCP tool-call inspector over the MCP Inspection API.
//!
//! The API expects raw MCP JSON-RPC 2.0 messages: a `tools/call` request
//! envelope before the tool runs and a result envelope afterwards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde_json::{Value, json};
use tracing::{debug, error, warn};

use super::parse_mcp_decision;
use crate::client::{API_KEY_HEADER, REQUEST_ID_HEADER, user_agent};
use crate::decision::Decision;
use crate::errors::Error;
use crate::state::{self, RuntimeState};

#[cfg(test)]
#[path = "mcp_tests.rs"]
mod tests;

const MCP_API_KEY_ENV: &str = "AI_DEFENSE_API_MODE_MCP_API_KEY";
const MCP_ENDPOINT_ENV: &str = "AI_DEFENSE_API_MODE_MCP_ENDPOINT";
const LLM_API_KEY_ENV: &str = "AI_DEFENSE_API_MODE_LLM_API_KEY";
const LLM_ENDPOINT_ENV: &str = "AI_DEFENSE_API_MODE_LLM_ENDPOINT";

const MCP_INSPECT_PATH: &str = "/api/v1/inspect/mcp";

/// Strip a trailing inspect path or `/api` from a user-supplied endpoint so
/// the stored base composes with [`MCP_INSPECT_PATH`].
fn normalize_endpoint(raw: &str) -> String {
	let trimmed = raw.trim_end_matches('/');
	let trimmed = trimmed.strip_suffix(MCP_INSPECT_PATH).unwrap_or(trimmed);
	let trimmed = trimmed.strip_suffix("/api").unwrap_or(trimmed);
	trimmed.to_string()
}

#[derive(Clone, Debug)]
pub struct McpInspectorOptions {
	pub api_key: Option<String>,
	pub endpoint: Option<String>,
	pub timeout_ms: u64,
	/// Number of attempts; 1 means no retry.
	pub retry_attempts: u32,
	pub fail_open: bool,
}

impl Default for McpInspectorOptions {
	fn default() -> Self {
		McpInspectorOptions {
			api_key: None,
			endpoint: None,
			timeout_ms: 1_000,
			retry_attempts: 1,
			fail_open: true,
		}
	}
}

/// Inspector for MCP tool calls. JSON-RPC ids are unique per instance via a
/// monotonic counter. The async variant builds a fresh HTTP client per call,
/// same as the LLM inspector.
pub struct McpInspector {
	api_key: Option<String>,
	endpoint: Option<String>,
	timeout: Duration,
	retry_attempts: u32,
	fail_open: bool,
	request_id_counter: AtomicU64,
	sync_client: OnceCell<reqwest::blocking::Client>,
}

impl McpInspector {
	pub fn new(options: McpInspectorOptions) -> Self {
		let state = state::current();
		Self::resolve(options, &state)
	}

	pub fn from_state(state: &RuntimeState) -> Self {
		Self::resolve(
			McpInspectorOptions {
				fail_open: state.api_mode_fail_open_mcp,
				..McpInspectorOptions::default()
			},
			state,
		)
	}

	fn resolve(options: McpInspectorOptions, state: &RuntimeState) -> Self {
		// MCP-specific configuration falls back to the LLM values.
		let api_key = options
			.api_key
			.or_else(|| state.api_mode_mcp_api_key.clone())
			.or_else(|| state::env_string(&[MCP_API_KEY_ENV, LLM_API_KEY_ENV]));
		let endpoint = options
			.endpoint
			.or_else(|| state.api_mode_mcp_endpoint.clone())
			.or_else(|| state::env_string(&[MCP_ENDPOINT_ENV, LLM_ENDPOINT_ENV]))
			.map(|e| normalize_endpoint(&e));
		McpInspector {
			api_key,
			endpoint,
			timeout: Duration::from_millis(options.timeout_ms),
			retry_attempts: options.retry_attempts.max(1),
			fail_open: options.fail_open,
			request_id_counter: AtomicU64::new(0),
			sync_client: OnceCell::new(),
		}
	}

	pub fn is_configured(&self) -> bool {
		self.api_key.is_some() && self.endpoint.is_some()
	}

	fn next_id(&self) -> u64 {
		self.request_id_counter.fetch_add(1, Ordering::Relaxed) + 1
	}

	fn inspect_url(endpoint: &str) -> String {
		format!("{endpoint}{MCP_INSPECT_PATH}")
	}

	fn build_request_message(&self, tool_name: &str, arguments: &Value) -> Value {
		json!({
			"jsonrpc": "2.0",
			"method": "tools/call",
			"params": {
				"name": tool_name,
				"arguments": arguments,
			},
			"id": self.next_id(),
		})
	}

	fn build_response_message(&self, result: &Value) -> Value {
		let text_content = match result {
			Value::String(s) => s.clone(),
			Value::Object(_) | Value::Array(_) => result.to_string(),
			other => other.to_string(),
		};
		json!({
			"jsonrpc": "2.0",
			"result": {
				"content": [
					{
						"type": "text",
						"text": text_content,
					}
				]
			},
			"id": self.next_id(),
		})
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

	fn handle_error(&self, error: Error, tool_name: &str, context: &str) -> Result<Decision, Error> {
		let kind = error.kind_name();
		warn!(
			tool = tool_name,
			operation = context,
			"MCP inspection error: {kind}: {error}"
		);
		if self.fail_open {
			warn!("mcp_fail_open=True, allowing tool call '{tool_name}' despite error");
			Ok(Decision::allow(vec![format!(
				"MCP inspection error ({kind}), fail_open=True"
			)]))
		} else {
			error!("mcp_fail_open=False, blocking tool call '{tool_name}' due to error");
			let decision = Decision::block(vec![format!("MCP inspection error: {kind}: {error}")]);
			Err(Error::security_policy_with(
				decision,
				format!("MCP inspection failed and fail_open=False: {error}"),
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

	fn post_message_blocking(&self, tool_name: &str, message: &Value, context: &str) -> Result<Decision, Error> {
		let Some(endpoint) = &self.endpoint else {
			unreachable!("checked by callers")
		};
		let url = Self::inspect_url(endpoint);
		let client = match self.sync_client() {
			Ok(c) => c,
			Err(e) => return self.handle_error(e, tool_name, context),
		};
		let mut last_error: Option<Error> = None;
		for attempt in 1..=self.retry_attempts {
			let mut builder = client.post(&url).json(message);
			for (key, value) in self.headers() {
				builder = builder.header(key, value);
			}
			let outcome = (|| -> Result<Value, Error> {
				let response = builder.send()?;
				let status = response.status().as_u16();
				if status >= 400 {
					let body = response.text().unwrap_or_default();
					return Err(Error::Api {
						status: Some(status),
						message: format!("MCP inspection returned {status}: {body}"),
						request_id: None,
					});
				}
				response.json::<Value>().map_err(Error::from)
			})();
			match outcome {
				Ok(response) => return Ok(parse_mcp_decision(response)),
				Err(e) => {
					debug!(
						attempt,
						total = self.retry_attempts,
						"MCP inspection attempt failed: {e}"
					);
					last_error = Some(e);
				},
			}
		}
		self.handle_error(
			last_error.expect("at least one attempt runs"),
			tool_name,
			context,
		)
	}

	async fn post_message(&self, tool_name: &str, message: &Value, context: &str) -> Result<Decision, Error> {
		let Some(endpoint) = &self.endpoint else {
			unreachable!("checked by callers")
		};
		let url = Self::inspect_url(endpoint);
		// Fresh client per request; see the type-level comment.
		let client = match reqwest::Client::builder().timeout(self.timeout).build() {
			Ok(c) => c,
			Err(e) => return self.handle_error(e.into(), tool_name, context),
		};
		let mut last_error: Option<Error> = None;
		for attempt in 1..=self.retry_attempts {
			let mut builder = client.post(&url).json(message);
			for (key, value) in self.headers() {
				builder = builder.header(key, value);
			}
			let outcome = async {
				let response = builder.send().await?;
				let status = response.status().as_u16();
				if status >= 400 {
					let body = response.text().await.unwrap_or_default();
					return Err(Error::Api {
						status: Some(status),
						message: format!("MCP inspection returned {status}: {body}"),
						request_id: None,
					});
				}
				response.json::<Value>().await.map_err(Error::from)
			}
			.await;
			match outcome {
				Ok(response) => return Ok(parse_mcp_decision(response)),
				Err(e) => {
					debug!(
						attempt,
						total = self.retry_attempts,
						"MCP inspection attempt failed: {e}"
					);
					last_error = Some(e);
				},
			}
		}
		self.handle_error(
			last_error.expect("at least one attempt runs"),
			tool_name,
			context,
		)
	}

	/// Inspect an MCP tool request before execution (blocking). `metadata`
	/// travels with the call context, not to the API.
	pub fn inspect_request(
		&self,
		tool_name: &str,
		arguments: &Value,
		_metadata: &HashMap<String, Value>,
	) -> Result<Decision, Error> {
		if !self.is_configured() {
			debug!(tool = tool_name, "no API configured, allowing by default");
			return Ok(Decision::allow(vec![]));
		}
		let message = self.build_request_message(tool_name, arguments);
		debug!(tool = tool_name, "MCP inspection request: method=tools/call");
		self.post_message_blocking(tool_name, &message, "inspect_request")
	}

	/// Inspect an MCP tool response after execution (blocking).
	pub fn inspect_response(
		&self,
		tool_name: &str,
		_arguments: &Value,
		result: &Value,
		_metadata: &HashMap<String, Value>,
	) -> Result<Decision, Error> {
		if !self.is_configured() {
			debug!(tool = tool_name, "no API configured, allowing by default");
			return Ok(Decision::allow(vec![]));
		}
		let message = self.build_response_message(result);
		debug!(tool = tool_name, "MCP inspection response");
		self.post_message_blocking(tool_name, &message, "inspect_response")
	}

	/// Inspect an MCP tool request before execution (async).
	pub async fn inspect_request_async(
		&self,
		tool_name: &str,
		arguments: &Value,
		_metadata: &HashMap<String, Value>,
	) -> Result<Decision, Error> {
		if !self.is_configured() {
			debug!(tool = tool_name, "no API configured, allowing by default");
			return Ok(Decision::allow(vec![]));
		}
		let message = self.build_request_message(tool_name, arguments);
		debug!(
			tool = tool_name,
			"MCP async inspection request: method=tools/call"
		);
		self
			.post_message(tool_name, &message, "inspect_request_async")
			.await
	}

	/// Inspect an MCP tool response after execution (async).
	pub async fn inspect_response_async(
		&self,
		tool_name: &str,
		_arguments: &Value,
		result: &Value,
		_metadata: &HashMap<String, Value>,
	) -> Result<Decision, Error> {
		if !self.is_configured() {
			debug!(tool = tool_name, "no API configured, allowing by default");
			return Ok(Decision::allow(vec![]));
		}
		let message = self.build_response_message(result);
		debug!(tool = tool_name, "MCP async inspection response");
		self
			.post_message(tool_name, &message, "inspect_response_async")
			.await
	}
}
