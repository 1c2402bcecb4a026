//! Chat inspection client: verdicts for prompts, responses, and full
//! conversations.

use serde_json::{Value, json};
use tracing::debug;

use super::{ClientCore, Config, InspectOptions, parse_inspect_response};
use crate::errors::Error;
use crate::inspection::models::InspectResponse;
use crate::types::{Message, Role};

#[cfg(test)]
#[path = "chat_tests.rs"]
mod tests;

const CHAT_INSPECT_PATH: &str = "/api/v1/inspect/chat";

pub struct ChatInspectionClient {
	core: ClientCore,
	endpoint: String,
}

impl ChatInspectionClient {
	pub fn new(api_key: impl Into<String>, config: Option<Config>) -> Result<Self, Error> {
		let core = ClientCore::new(api_key, config.unwrap_or_default())?;
		let endpoint = core.endpoint(CHAT_INSPECT_PATH);
		Ok(ChatInspectionClient { core, endpoint })
	}

	/// Inspect a single user prompt.
	pub fn inspect_prompt(
		&self,
		prompt: &str,
		options: &InspectOptions,
	) -> Result<InspectResponse, Error> {
		let messages = vec![Message::user(prompt)];
		let body = self.build_body(&messages, options)?;
		let response = self.post(body, options)?;
		parse_inspect_response(response)
	}

	/// Inspect a single AI response.
	pub fn inspect_response(
		&self,
		response: &str,
		options: &InspectOptions,
	) -> Result<InspectResponse, Error> {
		let messages = vec![Message::assistant(response)];
		let body = self.build_body(&messages, options)?;
		let response = self.post(body, options)?;
		parse_inspect_response(response)
	}

	/// Inspect a full conversation.
	pub fn inspect_conversation(
		&self,
		messages: &[Message],
		options: &InspectOptions,
	) -> Result<InspectResponse, Error> {
		let body = self.build_body(messages, options)?;
		let response = self.post(body, options)?;
		parse_inspect_response(response)
	}

	pub async fn inspect_prompt_async(
		&self,
		prompt: &str,
		options: &InspectOptions,
	) -> Result<InspectResponse, Error> {
		let messages = vec![Message::user(prompt)];
		let body = self.build_body(&messages, options)?;
		let response = self.post_async(body, options).await?;
		parse_inspect_response(response)
	}

	pub async fn inspect_response_async(
		&self,
		response: &str,
		options: &InspectOptions,
	) -> Result<InspectResponse, Error> {
		let messages = vec![Message::assistant(response)];
		let body = self.build_body(&messages, options)?;
		let response = self.post_async(body, options).await?;
		parse_inspect_response(response)
	}

	pub async fn inspect_conversation_async(
		&self,
		messages: &[Message],
		options: &InspectOptions,
	) -> Result<InspectResponse, Error> {
		let body = self.build_body(messages, options)?;
		let response = self.post_async(body, options).await?;
		parse_inspect_response(response)
	}

	/// Release the async session.
	pub async fn close(&self) {
		self.core.close().await;
	}

	fn post(&self, body: Value, options: &InspectOptions) -> Result<Value, Error> {
		self
			.core
			.post(&self.endpoint, body, options.request_id.clone(), options.timeout)
	}

	async fn post_async(&self, body: Value, options: &InspectOptions) -> Result<Value, Error> {
		self
			.core
			.post_async(&self.endpoint, body, options.request_id.clone(), options.timeout)
			.await
	}

	fn build_body(&self, messages: &[Message], options: &InspectOptions) -> Result<Value, Error> {
		validate_messages(messages)?;
		debug!(messages = messages.len(), "chat inspection");
		let mut body = json!({"messages": messages});
		if let Some(metadata) = &options.metadata {
			body["metadata"] = serde_json::to_value(metadata).map_err(|e| {
				Error::Validation(format!("metadata is not serializable: {e}"))
			})?;
		}
		if let Some(config) = &options.config {
			body["config"] = serde_json::to_value(config).map_err(|e| {
				Error::Validation(format!("config is not serializable: {e}"))
			})?;
		}
		Ok(body)
	}
}

/// The chat contract: a non-empty conversation where every message has
/// non-empty content and at least one user or assistant turn is non-blank.
fn validate_messages(messages: &[Message]) -> Result<(), Error> {
	if messages.is_empty() {
		return Err(Error::Validation(
			"'messages' must be a non-empty list of messages".into(),
		));
	}
	let mut has_prompt_or_completion = false;
	for message in messages {
		if message.content.is_empty() {
			return Err(Error::Validation(
				"each message must have non-empty string content".into(),
			));
		}
		if matches!(message.role, Role::User | Role::Assistant)
			&& !message.content.trim().is_empty()
		{
			has_prompt_or_completion = true;
		}
	}
	if !has_prompt_or_completion {
		return Err(Error::Validation(
			"at least one message must be a prompt (role=user) or completion (role=assistant) with non-empty content".into(),
		));
	}
	Ok(())
}
