//! OpenAI chat-completion interception.
//!
//! The OpenAI request shape is already the canonical one, so normalization
//! only flattens multi-part content; post-call inspection reads the first
//! choice's message content.

use std::sync::Arc;

use async_trait::async_trait;
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
#[path = "openai_tests.rs"]
mod tests;

/// The wrapped entry point: one chat-completion call with the native OpenAI
/// request body.
#[async_trait]
pub trait ChatDispatch: Send + Sync {
	async fn create_chat_completion(&self, request: Value) -> Result<Value, Error>;
}

/// Inspection-aware decorator for an OpenAI chat client.
pub struct OpenAiGuard<D> {
	inner: D,
	state: Option<Arc<RuntimeState>>,
	inspector: OnceCell<LlmInspector>,
}

impl<D: ChatDispatch> OpenAiGuard<D> {
	pub fn new(inner: D) -> Self {
		OpenAiGuard {
			inner,
			state: None,
			inspector: OnceCell::new(),
		}
	}

	pub fn with_state(inner: D, state: Arc<RuntimeState>) -> Self {
		OpenAiGuard {
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

	pub async fn create_chat_completion(&self, request: Value) -> Result<Value, Error> {
		let state = self.state();
		let ctx = context::get_context();
		if !should_inspect_llm(&state, &ctx) {
			debug!("OpenAI inspection skipped (mode=off, skip guard, or already done)");
			return self.inner.create_chat_completion(request).await;
		}

		let model = request
			.get("model")
			.and_then(Value::as_str)
			.unwrap_or_default()
			.to_string();
		let messages = chat_messages(&request);
		ctx.insert_metadata("model_id", json!(model));
		let metadata = ctx.metadata();
		debug!(
			model = %model,
			mode = ?state.llm_mode,
			integration = ?state.llm_integration_mode,
			"intercepted OpenAI chat call"
		);

		if let Some(gateway) = usable_llm_gateway(&state, &ctx, "openai") {
			debug!("routing through AI Defense Gateway");
			return match gateway.forward_async(None, &request).await {
				Ok(response) => {
					ctx.set(
						Some(Decision::allow(vec!["Gateway handled inspection".into()])),
						Some(true),
					);
					Ok(response)
				},
				Err(e) => Err(handle_gateway_error(&state, &ctx, "chat.completions", e)),
			};
		}

		if !messages.is_empty() {
			debug!(messages = messages.len(), "request inspection");
			let outcome = self
				.inspector(&state)
				.inspect_conversation_async(&messages, &metadata)
				.await;
			match outcome {
				Ok(decision) => {
					debug!(action = %decision.action, "request decision");
					ctx.set(Some(decision.clone()), None);
					enforce_llm(&state, &decision)?;
				},
				Err(e @ Error::SecurityPolicy { .. }) => return Err(e),
				Err(e) => {
					let decision =
						handle_patcher_error(state.api_mode_fail_open_llm, "chat.completions", e)?;
					ctx.set(Some(decision), None);
				},
			}
		}

		let response = self.inner.create_chat_completion(request).await?;

		let assistant_content = response_text(&response);
		if !assistant_content.is_empty() && !messages.is_empty() {
			debug!(chars = assistant_content.len(), "response inspection");
			let mut conversation = messages;
			conversation.push(Message::assistant(assistant_content));
			let outcome = self
				.inspector(&state)
				.inspect_conversation_async(&conversation, &metadata)
				.await;
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

/// OpenAI messages are already canonical; multi-part content is flattened to
/// its text parts.
pub(crate) fn chat_messages(request: &Value) -> Vec<Message> {
	let mut messages = Vec::new();
	for msg in request
		.get("messages")
		.and_then(Value::as_array)
		.into_iter()
		.flatten()
	{
		let role = match msg.get("role").and_then(Value::as_str) {
			Some("assistant") => Role::Assistant,
			Some("system") | Some("developer") => Role::System,
			_ => Role::User,
		};
		let text = match msg.get("content") {
			Some(Value::String(text)) => text.clone(),
			Some(Value::Array(parts)) => parts
				.iter()
				.filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
				.filter_map(|p| p.get("text").and_then(Value::as_str))
				.join(" "),
			_ => String::new(),
		};
		if !text.is_empty() {
			messages.push(Message::new(role, text));
		}
	}
	messages
}

pub(crate) fn response_text(response: &Value) -> String {
	response
		.pointer("/choices/0/message/content")
		.and_then(Value::as_str)
		.unwrap_or_default()
		.to_string()
}

/// Record OpenAI support in the patch registry.
pub(crate) fn register() -> bool {
	if is_patched("openai") {
		debug!("OpenAI already registered, skipping");
		return true;
	}
	mark_patched("openai");
	info!("OpenAI interception registered");
	true
}
