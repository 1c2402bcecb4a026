//! Canonical message shapes shared by the provider normalizers and the
//! inspection payloads.

use serde::{Deserialize, Serialize};

pub mod bedrock;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	User,
	Assistant,
	System,
}

impl Role {
	pub fn as_str(&self) -> &'static str {
		match self {
			Role::User => "user",
			Role::Assistant => "assistant",
			Role::System => "system",
		}
	}
}

/// One turn in the canonical `[{role, content}]` conversation shape, the
/// lingua franca between provider-specific normalizers and the inspectors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
	pub role: Role,
	pub content: String,
}

impl Message {
	pub fn new(role: Role, content: impl Into<String>) -> Self {
		Message {
			role,
			content: content.into(),
		}
	}

	pub fn user(content: impl Into<String>) -> Self {
		Message::new(Role::User, content)
	}

	pub fn assistant(content: impl Into<String>) -> Self {
		Message::new(Role::Assistant, content)
	}

	pub fn system(content: impl Into<String>) -> Self {
		Message::new(Role::System, content)
	}
}
