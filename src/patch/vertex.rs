//! Vertex AI (Gemini) interception. Same flow as OpenAI with
//! provider-specific normalization of the `generateContent` shape.

use std::sync::Arc;

use itertools::Itertools;
use once_cell::sync::OnceCell;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{
	enforce_llm, handle_gateway_error, handle_patcher_error, is_patched, mark_patched,
	should_inspect_llm, usable_llm_gateway,
};
use crate::context;
use crate::decision::Decision;
use crate::errors::Error;
use crate::inspect::LlmInspector;
use crate::state::{self, RuntimeState};
use crate::types::{Message, Role};

#[cfg(test)]
#[path = "vertex_tests.rs"]
mod tests;

/// The wrapped entry point: one `generateContent` call with the native
/// request body.
pub trait GenerateContentDispatch: Send + Sync {
	fn generate_content(&self, request: Value) -> Result<Value, Error>;
}

/// Inspection-aware decorator for a Vertex AI client.
pub struct VertexGuard<D> {
	inner: D,
	state: Option<Arc<RuntimeState>>,
	inspector: OnceCell<LlmInspector>,
}

impl<D: GenerateContentDispatch> VertexGuard<D> {
	pub fn new(inner: D) -> Self {
		VertexGuard {
			inner,
			state: None,
			inspector: OnceCell::new(),
		}
	}

	pub fn with_state(inner: D, state: Arc<RuntimeState>) -> Self {
		VertexGuard {
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

	pub fn generate_content(&self, request: Value) -> Result<Value, Error> {
		let state = self.state();
		let ctx = context::get_context();
		if !should_inspect_llm(&state, &ctx) {
			debug!("Vertex inspection skipped (mode=off, skip guard, or already done)");
			return self.inner.generate_content(request);
		}

		let model = request
			.get("model")
			.and_then(Value::as_str)
			.unwrap_or_default()
			.to_string();
		let messages = generate_content_messages(&request);
		ctx.insert_metadata("model_id", json!(model));
		let metadata = ctx.metadata();
		debug!(
			model = %model,
			mode = ?state.llm_mode,
			"intercepted Vertex generateContent call"
		);

		if let Some(gateway) = usable_llm_gateway(&state, &ctx, "vertexai") {
			debug!("routing through AI Defense Gateway");
			return match gateway.forward(None, &request) {
				Ok(response) => {
					ctx.set(
						Some(Decision::allow(vec!["Gateway handled inspection".into()])),
						Some(true),
					);
					Ok(response)
				},
				Err(e) => Err(handle_gateway_error(&state, &ctx, "generateContent", e)),
			};
		}

		if !messages.is_empty() {
			debug!(messages = messages.len(), "request inspection");
			let outcome = self
				.inspector(&state)
				.inspect_conversation(&messages, &metadata);
			match outcome {
				Ok(decision) => {
					debug!(action = %decision.action, "request decision");
					ctx.set(Some(decision.clone()), None);
					enforce_llm(&state, &decision)?;
				},
				Err(e @ Error::SecurityPolicy { .. }) => return Err(e),
				Err(e) => {
					let decision =
						handle_patcher_error(state.api_mode_fail_open_llm, "generateContent", e)?;
					ctx.set(Some(decision), None);
				},
			}
		}

		let response = self.inner.generate_content(request)?;

		let assistant_content = response_text(&response);
		if !assistant_content.is_empty() && !messages.is_empty() {
			debug!(chars = assistant_content.len(), "response inspection");
			let mut conversation = messages;
			conversation.push(Message::assistant(assistant_content));
			let outcome = self
				.inspector(&state)
				.inspect_conversation(&conversation, &metadata);
			match outcome {
				Ok(decision) => {
					debug!(action = %decision.action, "response decision");
					ctx.set(Some(decision.clone()), Some(true));
					enforce_llm(&state, &decision)?;
				},
				Err(e @ Error::SecurityPolicy { .. }) => return Err(e),
				Err(e) => warn!("response inspection error: {e}"),
			}
		}

		Ok(response)
	}
}

/// Flatten a `generateContent` request: `systemInstruction` parts become a
/// system message, `contents[*].parts[*].text` one message each, with the
/// `model` role mapped to assistant.
pub(crate) fn generate_content_messages(request: &Value) -> Vec<Message> {
	let mut messages = Vec::new();

	if let Some(parts) = request.pointer("/systemInstruction/parts").and_then(Value::as_array) {
		let text = parts
			.iter()
			.filter_map(|p| p.get("text").and_then(Value::as_str))
			.join(" ");
		if !text.is_empty() {
			messages.push(Message::system(text));
		}
	}

	for content in request
		.get("contents")
		.and_then(Value::as_array)
		.into_iter()
		.flatten()
	{
		let role = match content.get("role").and_then(Value::as_str) {
			Some("model") => Role::Assistant,
			_ => Role::User,
		};
		let text = content
			.get("parts")
			.and_then(Value::as_array)
			.map(|parts| {
				parts
					.iter()
					.filter_map(|p| p.get("text").and_then(Value::as_str))
					.join(" ")
			})
			.unwrap_or_default();
		if !text.is_empty() {
			messages.push(Message::new(role, text));
		}
	}

	messages
}

pub(crate) fn response_text(response: &Value) -> String {
	response
		.pointer("/candidates/0/content/parts")
		.and_then(Value::as_array)
		.map(|parts| {
			parts
				.iter()
				.filter_map(|p| p.get("text").and_then(Value::as_str))
				.join(" ")
		})
		.unwrap_or_default()
}

/// Record Vertex AI support in the patch registry.
pub(crate) fn register() -> bool {
	if is_patched("vertexai") {
		debug!("Vertex AI already registered, skipping");
		return true;
	}
	mark_patched("vertexai");
	info!("Vertex AI interception registered");
	true
}
