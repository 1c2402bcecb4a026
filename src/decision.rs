use serde::{Deserialize, Serialize};

/// Verdict kind produced by an inspection call.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
	Allow,
	Block,
	Sanitize,
	MonitorOnly,
}

impl Action {
	pub fn as_str(&self) -> &'static str {
		match self {
			Action::Allow => "allow",
			Action::Block => "block",
			Action::Sanitize => "sanitize",
			Action::MonitorOnly => "monitor_only",
		}
	}
}

impl std::fmt::Display for Action {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// The immutable verdict record for one inspection call.
///
/// A `Decision` is a value: it is created by one of the four constructors and
/// never mutated afterwards. `reasons` entries are human strings, typically
/// `"<rule_name>: <classification>"` or a free-form error tag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decision {
	pub action: Action,
	pub reasons: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sanitized_content: Option<String>,
	/// The opaque original decision payload, kept for audit.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub raw_response: Option<serde_json::Value>,
}

impl Decision {
	pub fn allow(reasons: Vec<String>) -> Self {
		Decision {
			action: Action::Allow,
			reasons,
			sanitized_content: None,
			raw_response: None,
		}
	}

	pub fn block(reasons: Vec<String>) -> Self {
		Decision {
			action: Action::Block,
			reasons,
			sanitized_content: None,
			raw_response: None,
		}
	}

	pub fn sanitize(reasons: Vec<String>, sanitized_content: Option<String>) -> Self {
		Decision {
			action: Action::Sanitize,
			reasons,
			sanitized_content,
			raw_response: None,
		}
	}

	pub fn monitor_only(reasons: Vec<String>) -> Self {
		Decision {
			action: Action::MonitorOnly,
			reasons,
			sanitized_content: None,
			raw_response: None,
		}
	}

	pub fn with_raw_response(mut self, raw: serde_json::Value) -> Self {
		self.raw_response = Some(raw);
		self
	}

	pub fn is_block(&self) -> bool {
		self.action == Action::Block
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn constructors_set_matching_action() {
		assert_eq!(Decision::allow(vec![]).action, Action::Allow);
		assert_eq!(Decision::block(vec!["r".into()]).action, Action::Block);
		assert_eq!(
			Decision::sanitize(vec![], Some("clean".into())).action,
			Action::Sanitize
		);
		assert_eq!(Decision::monitor_only(vec![]).action, Action::MonitorOnly);
	}

	#[test]
	fn equality_is_structural() {
		let a = Decision::block(vec!["Prompt Injection: SECURITY_VIOLATION".into()]);
		let b = Decision::block(vec!["Prompt Injection: SECURITY_VIOLATION".into()]);
		assert_eq!(a, b);
		let c = b.clone().with_raw_response(serde_json::json!({"action": "Block"}));
		assert_ne!(a, c);
	}

	#[test]
	fn action_serializes_lowercase() {
		assert_eq!(
			serde_json::to_value(Action::MonitorOnly).unwrap(),
			serde_json::json!("monitor_only")
		);
		assert_eq!(Action::Block.to_string(), "block");
	}
}
