//! Bedrock interception.
//!
//! The guard wraps the low-level operation dispatcher that every Bedrock
//! client funnels through, so all four model operations are covered
//! regardless of which higher-level wrapper issued them: `InvokeModel`,
//! `InvokeModelWithResponseStream`, `Converse`, `ConverseStream`.
//! Non-Bedrock operations are forwarded untouched.

use std::sync::Arc;

use bytes::Bytes;
use itertools::Itertools;
use once_cell::sync::OnceCell;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::bedrock_stream::ConverseStreamEvents;
use super::{
	enforce_llm, handle_gateway_error, handle_patcher_error, is_patched, mark_patched,
	should_inspect_llm, usable_llm_gateway,
};
use crate::context::{self, CallContext};
use crate::decision::Decision;
use crate::errors::Error;
use crate::gateway::LlmGateway;
use crate::inspect::LlmInspector;
use crate::state::{self, RuntimeState};
use crate::types::{Message, Role};

#[cfg(test)]
#[path = "bedrock_tests.rs"]
mod tests;

pub const BEDROCK_OPERATIONS: [&str; 4] = [
	"InvokeModel",
	"InvokeModelWithResponseStream",
	"Converse",
	"ConverseStream",
];

fn is_bedrock_operation(operation: &str) -> bool {
	BEDROCK_OPERATIONS.contains(&operation)
}

fn is_streaming_operation(operation: &str) -> bool {
	matches!(operation, "InvokeModelWithResponseStream" | "ConverseStream")
}

/// The seam the guard wraps: one dispatch entry point carrying the operation
/// name and its parameters, the shape the AWS client dispatcher hands to the
/// wire layer.
pub trait BedrockDispatch: Send + Sync {
	fn dispatch(&self, operation: &str, params: Value) -> Result<BedrockOutput, Error>;
}

/// What a Bedrock operation produces: a plain response body, or an event
/// stream for the streaming operations.
#[derive(Debug)]
pub enum BedrockOutput {
	Response(Value),
	Stream(ConverseStreamEvents),
}

impl BedrockOutput {
	pub fn into_response(self) -> Option<Value> {
		match self {
			BedrockOutput::Response(v) => Some(v),
			BedrockOutput::Stream(_) => None,
		}
	}

	pub fn into_stream(self) -> Option<ConverseStreamEvents> {
		match self {
			BedrockOutput::Stream(s) => Some(s),
			BedrockOutput::Response(_) => None,
		}
	}
}

/// Inspection-aware decorator for a Bedrock client.
///
/// Wrap the client once and dispatch through the guard; the wrapped
/// dispatcher is only invoked after pre-call inspection passes (API mode),
/// or not at all when the call is routed through the provider gateway.
pub struct BedrockGuard<D> {
	inner: D,
	state: Option<Arc<RuntimeState>>,
	inspector: OnceCell<LlmInspector>,
}

impl<D: BedrockDispatch> BedrockGuard<D> {
	pub fn new(inner: D) -> Self {
		BedrockGuard {
			inner,
			state: None,
			inspector: OnceCell::new(),
		}
	}

	/// Guard pinned to an explicit runtime state instead of the process
	/// global.
	pub fn with_state(inner: D, state: Arc<RuntimeState>) -> Self {
		BedrockGuard {
			inner,
			state: Some(state),
			inspector: OnceCell::new(),
		}
	}

	pub fn inner(&self) -> &D {
		&self.inner
	}

	fn state(&self) -> Arc<RuntimeState> {
		self.state.clone().unwrap_or_else(state::current)
	}

	fn inspector(&self, state: &RuntimeState) -> &LlmInspector {
		self.inspector.get_or_init(|| {
			if !state.initialized {
				warn!("protect() not called, using default config");
			}
			LlmInspector::from_state(state)
		})
	}

	/// Run one Bedrock operation through the interception flow.
	pub fn dispatch(&self, operation: &str, params: Value) -> Result<BedrockOutput, Error> {
		if !is_bedrock_operation(operation) {
			return self.inner.dispatch(operation, params);
		}

		let state = self.state();
		let ctx = context::get_context();
		if !should_inspect_llm(&state, &ctx) {
			debug!(operation, "Bedrock inspection skipped (mode=off, skip guard, or already done)");
			return self.inner.dispatch(operation, params);
		}

		let model_id = params
			.get("modelId")
			.and_then(Value::as_str)
			.unwrap_or_default()
			.to_string();
		let messages = match operation {
			"Converse" | "ConverseStream" => converse_messages(&params),
			_ => invoke_model_body(&params)
				.map(|body| invoke_model_messages(&body))
				.unwrap_or_default(),
		};

		ctx.insert_metadata("model_id", json!(model_id));
		let metadata = ctx.metadata();
		debug!(
			operation,
			model = %model_id,
			mode = ?state.llm_mode,
			integration = ?state.llm_integration_mode,
			"intercepted Bedrock call"
		);

		if let Some(gateway) = usable_llm_gateway(&state, &ctx, "bedrock") {
			return self.dispatch_via_gateway(&state, &ctx, &gateway, operation, &params);
		}

		// API mode: pre-call inspection.
		if !messages.is_empty() {
			debug!(operation, messages = messages.len(), "request inspection");
			let outcome = self
				.inspector(&state)
				.inspect_conversation(&messages, &metadata);
			match outcome {
				Ok(decision) => {
					debug!(operation, action = %decision.action, "request decision");
					ctx.set(Some(decision.clone()), None);
					enforce_llm(&state, &decision)?;
				},
				Err(e @ Error::SecurityPolicy { .. }) => return Err(e),
				Err(e) => {
					let decision = handle_patcher_error(state.api_mode_fail_open_llm, operation, e)?;
					ctx.set(Some(decision), None);
				},
			}
		}

		let response = self.inner.dispatch(operation, params)?;

		if is_streaming_operation(operation) {
			debug!(operation, "streaming response, response inspection deferred");
			return Ok(response);
		}

		// Post-call inspection over the assistant content.
		let response = match response {
			BedrockOutput::Response(v) => v,
			other => return Ok(other),
		};
		let assistant_content = match operation {
			"Converse" => converse_response_text(&response),
			_ => response
				.get("body")
				.and_then(Value::as_str)
				.map(|s| Bytes::copy_from_slice(s.as_bytes()))
				.map(|b| invoke_response_text(&b))
				.unwrap_or_default(),
		};

		if !assistant_content.is_empty() && !messages.is_empty() {
			debug!(
				operation,
				chars = assistant_content.len(),
				"response inspection"
			);
			let mut conversation = messages;
			conversation.push(Message::assistant(assistant_content));
			let outcome = self
				.inspector(&state)
				.inspect_conversation(&conversation, &metadata);
			match outcome {
				Ok(decision) => {
					debug!(operation, action = %decision.action, "response decision");
					ctx.set(Some(decision.clone()), Some(true));
					enforce_llm(&state, &decision)?;
				},
				Err(e @ Error::SecurityPolicy { .. }) => return Err(e),
				Err(e) => warn!(operation, "response inspection error: {e}"),
			}
		}

		Ok(BedrockOutput::Response(response))
	}

	fn dispatch_via_gateway(
		&self,
		state: &RuntimeState,
		ctx: &CallContext,
		gateway: &LlmGateway,
		operation: &str,
		params: &Value,
	) -> Result<BedrockOutput, Error> {
		debug!(operation, "routing through AI Defense Gateway");
		let base_operation = operation.strip_suffix("Stream").unwrap_or(operation);
		let body = gateway_request_body(operation, params)?;
		match gateway.forward(Some(base_operation), &body) {
			Ok(response) => {
				ctx.set(
					Some(Decision::allow(vec!["Gateway handled inspection".into()])),
					Some(true),
				);
				if is_streaming_operation(operation) {
					let stream = ConverseStreamEvents::from_converse_response(&response)?;
					Ok(BedrockOutput::Stream(stream))
				} else {
					Ok(BedrockOutput::Response(response))
				}
			},
			Err(e) => Err(handle_gateway_error(state, ctx, operation, e)),
		}
	}
}

fn invoke_model_body(params: &Value) -> Option<Bytes> {
	params
		.get("body")
		.and_then(Value::as_str)
		.map(|s| Bytes::copy_from_slice(s.as_bytes()))
}

/// Native request body relayed to the gateway.
fn gateway_request_body(operation: &str, params: &Value) -> Result<Value, Error> {
	let model_id = params
		.get("modelId")
		.and_then(Value::as_str)
		.unwrap_or_default();
	if matches!(operation, "Converse" | "ConverseStream") {
		let mut body = json!({
			"modelId": model_id,
			"messages": params.get("messages").cloned().unwrap_or(json!([])),
		});
		for key in ["system", "inferenceConfig", "toolConfig"] {
			if let Some(value) = params.get(key) {
				body[key] = value.clone();
			}
		}
		Ok(body)
	} else {
		let raw = params
			.get("body")
			.and_then(Value::as_str)
			.ok_or_else(|| Error::Validation("InvokeModel request has no body".into()))?;
		let mut body: Value = serde_json::from_str(raw)
			.map_err(|e| Error::Validation(format!("InvokeModel body is not JSON: {e}")))?;
		body["modelId"] = json!(model_id);
		Ok(body)
	}
}

fn truncate_tool_result(text: &str) -> String {
	if text.chars().count() > 100 {
		let preview: String = text.chars().take(100).collect();
		format!("[Tool result: {preview}...]")
	} else {
		format!("[Tool result: {text}]")
	}
}

fn parse_role(role: &str) -> Role {
	match role {
		"assistant" => Role::Assistant,
		"system" => Role::System,
		_ => Role::User,
	}
}

/// Flatten Converse API parameters into canonical messages. Content blocks
/// become a single text per message; tool activity is annotated inline since
/// the inspection API only understands text content.
pub(crate) fn converse_messages(params: &Value) -> Vec<Message> {
	let mut messages = Vec::new();

	match params.get("system") {
		Some(Value::Array(blocks)) => {
			let text = blocks
				.iter()
				.filter_map(|b| b.get("text").and_then(Value::as_str))
				.join(" ");
			if !text.is_empty() {
				messages.push(Message::system(text));
			}
		},
		Some(Value::String(text)) => messages.push(Message::system(text.clone())),
		_ => {},
	}

	for msg in params
		.get("messages")
		.and_then(Value::as_array)
		.into_iter()
		.flatten()
	{
		let role = parse_role(msg.get("role").and_then(Value::as_str).unwrap_or("user"));
		let text = match msg.get("content") {
			Some(Value::Array(blocks)) => {
				let mut parts = Vec::new();
				for block in blocks {
					if let Some(text) = block.get("text").and_then(Value::as_str) {
						parts.push(text.to_string());
					} else if let Some(tool_use) = block.get("toolUse") {
						let name = tool_use
							.get("name")
							.and_then(Value::as_str)
							.unwrap_or("unknown");
						parts.push(format!("[Tool call: {name}]"));
					} else if let Some(tool_result) = block.get("toolResult") {
						for rc in tool_result
							.get("content")
							.and_then(Value::as_array)
							.into_iter()
							.flatten()
						{
							if let Some(text) = rc.get("text").and_then(Value::as_str) {
								parts.push(truncate_tool_result(text));
							}
						}
					}
				}
				parts.join(" ")
			},
			Some(Value::String(text)) => text.clone(),
			_ => String::new(),
		};
		if !text.is_empty() {
			messages.push(Message::new(role, text));
		}
	}

	messages
}

/// Parse an InvokeModel request body into canonical messages. Handles the
/// Anthropic messages shape, the Titan `inputText` shape, and the generic
/// `prompt` shape.
pub(crate) fn invoke_model_messages(body: &[u8]) -> Vec<Message> {
	let Ok(data) = serde_json::from_slice::<Value>(body) else {
		return Vec::new();
	};

	let mut messages = Vec::new();

	if let Some(raw_messages) = data.get("messages").and_then(Value::as_array) {
		for msg in raw_messages {
			let role = parse_role(msg.get("role").and_then(Value::as_str).unwrap_or("user"));
			let text = match msg.get("content") {
				Some(Value::Array(blocks)) => {
					let mut parts = Vec::new();
					for block in blocks {
						match block.get("type").and_then(Value::as_str) {
							Some("text") => {
								if let Some(text) = block.get("text").and_then(Value::as_str) {
									parts.push(text.to_string());
								}
							},
							Some("tool_use") => {
								let name = block
									.get("name")
									.and_then(Value::as_str)
									.unwrap_or("unknown");
								parts.push(format!("[Tool call: {name}]"));
							},
							Some("tool_result") => {
								if let Some(text) = block.get("content").and_then(Value::as_str) {
									parts.push(truncate_tool_result(text));
								}
							},
							_ => {},
						}
					}
					parts.join(" ")
				},
				Some(Value::String(text)) => text.clone(),
				_ => String::new(),
			};
			if !text.is_empty() {
				messages.push(Message::new(role, text));
			}
		}
		if let Some(system) = data.get("system").and_then(Value::as_str) {
			messages.insert(0, Message::system(system));
		}
	} else if let Some(input_text) = data.get("inputText").and_then(Value::as_str) {
		messages.push(Message::user(input_text));
	} else if let Some(prompt) = data.get("prompt").and_then(Value::as_str) {
		messages.push(Message::user(prompt));
	}

	messages
}

/// Assistant text from a Converse response.
pub(crate) fn converse_response_text(response: &Value) -> String {
	response
		.pointer("/output/message/content")
		.and_then(Value::as_array)
		.map(|blocks| {
			blocks
				.iter()
				.filter_map(|b| b.get("text").and_then(Value::as_str))
				.join(" ")
		})
		.unwrap_or_default()
}

/// Assistant text from an InvokeModel response body, by model family.
pub(crate) fn invoke_response_text(body: &[u8]) -> String {
	let Ok(data) = serde_json::from_slice::<Value>(body) else {
		return String::new();
	};

	if let Some(content) = data.get("content") {
		return match content {
			Value::Array(blocks) => blocks
				.iter()
				.filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
				.filter_map(|b| b.get("text").and_then(Value::as_str))
				.join(" "),
			other => other.as_str().map(str::to_owned).unwrap_or_else(|| other.to_string()),
		};
	}
	if let Some(results) = data.get("results").and_then(Value::as_array) {
		return results
			.iter()
			.filter_map(|r| r.get("outputText").and_then(Value::as_str))
			.join(" ");
	}
	if let Some(completion) = data.get("completion").and_then(Value::as_str) {
		return completion.to_string();
	}
	if let Some(generation) = data.get("generation").and_then(Value::as_str) {
		return generation.to_string();
	}
	String::new()
}

/// Record Bedrock support in the patch registry.
pub(crate) fn register() -> bool {
	if is_patched("bedrock") {
		debug!("Bedrock already registered, skipping");
		return true;
	}
	mark_patched("bedrock");
	info!("Bedrock interception registered");
	true
}
