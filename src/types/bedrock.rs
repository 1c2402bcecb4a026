//! Wire shapes for the Bedrock Converse API, matching the AWS SDK JSON
//! representation. Only the pieces the interception flow touches are typed;
//! everything else rides along as `serde_json::Value`.

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Deserialize, Serialize, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum Role {
	#[default]
	User,
	Assistant,
}

impl Role {
	pub fn as_str(&self) -> &'static str {
		match self {
			Role::User => "user",
			Role::Assistant => "assistant",
		}
	}
}

#[derive(Clone, Deserialize, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub enum ContentBlock {
	Text(String),
	ToolUse(ToolUseBlock),
	ToolResult(ToolResultBlock),
	/// Content variants the flow does not interpret (images, reasoning, ...).
	#[serde(untagged)]
	Other(serde_json::Value),
}

#[derive(Clone, Deserialize, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseBlock {
	/// The ID for the tool request.
	pub tool_use_id: String,
	/// The name of the tool that the model wants to use.
	pub name: String,
	/// The input to pass to the tool.
	pub input: serde_json::Value,
}

#[derive(Clone, Deserialize, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultBlock {
	#[serde(default)]
	pub tool_use_id: Option<String>,
	/// The content for the tool result content block.
	#[serde(default)]
	pub content: Vec<ToolResultContentBlock>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub status: Option<String>,
}

#[derive(Clone, Deserialize, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub enum ToolResultContentBlock {
	/// A tool result that is text.
	Text(String),
	/// A tool result that is JSON format data.
	Json(serde_json::Value),
	#[serde(untagged)]
	Other(serde_json::Value),
}

#[derive(Clone, Deserialize, Serialize, Debug)]
pub struct Message {
	pub role: Role,
	pub content: Vec<ContentBlock>,
}

/// The response from the Bedrock Converse API (matches AWS SDK ConverseOutput).
#[derive(Clone, Deserialize, Serialize, Debug)]
pub struct ConverseResponse {
	pub output: Option<ConverseOutput>,
	#[serde(rename = "stopReason", default)]
	pub stop_reason: Option<String>,
	pub usage: Option<TokenUsage>,
	pub metrics: Option<ConverseMetrics>,
}

#[derive(Clone, Deserialize, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub enum ConverseOutput {
	Message(Message),
	#[serde(untagged)]
	Unknown(serde_json::Value),
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct TokenUsage {
	#[serde(rename = "inputTokens")]
	pub input_tokens: usize,
	#[serde(rename = "outputTokens")]
	pub output_tokens: usize,
	#[serde(rename = "totalTokens")]
	pub total_tokens: usize,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct ConverseMetrics {
	#[serde(rename = "latencyMs")]
	pub latency_ms: u64,
}
