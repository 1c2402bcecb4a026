//! API-mode inspectors: build canonical inspection payloads, POST them to
//! AI Defense out-of-band of the provider call, and parse the result into a
//! [`Decision`].

use serde_json::Value;

use crate::decision::Decision;

pub mod llm;
pub mod mcp;

pub use llm::LlmInspector;
pub use mcp::McpInspector;

/// Reasons formatted as `"<rule_name>: <classification>"` from a rule list,
/// skipping the no-violation classifications.
fn rule_reasons(rules: Option<&Value>, excluded: &[&str]) -> Vec<String> {
	rules
		.and_then(Value::as_array)
		.map(|arr| {
			arr
				.iter()
				.filter_map(|rule| {
					let classification = rule.get("classification").and_then(Value::as_str)?;
					if excluded.contains(&classification) {
						return None;
					}
					let name = rule
						.get("rule_name")
						.and_then(Value::as_str)
						.unwrap_or("Unknown");
					Some(format!("{name}: {classification}"))
				})
				.collect()
		})
		.unwrap_or_default()
}

/// Parse a Chat Inspection API response into a decision. The service returns
/// `action` capitalized; it is normalized to lowercase. Reasons prefer the
/// top-level `reasons` list, then `rules`, then `processed_rules`.
pub(crate) fn parse_chat_decision(response: Value) -> Decision {
	let action = response
		.get("action")
		.and_then(Value::as_str)
		.unwrap_or("allow")
		.to_ascii_lowercase();
	let mut reasons: Vec<String> = response
		.get("reasons")
		.and_then(Value::as_array)
		.map(|a| {
			a.iter()
				.filter_map(|v| v.as_str().map(str::to_owned))
				.collect()
		})
		.unwrap_or_default();
	let sanitized_content = response
		.get("sanitized_content")
		.and_then(Value::as_str)
		.map(str::to_owned);

	if reasons.is_empty() {
		reasons = rule_reasons(response.get("rules"), &["NONE_VIOLATION", "NONE_SEVERITY"]);
	}
	if reasons.is_empty() {
		reasons = rule_reasons(response.get("processed_rules"), &["NONE_VIOLATION"]);
	}

	match action.as_str() {
		"block" => Decision::block(reasons).with_raw_response(response),
		"sanitize" => Decision::sanitize(reasons, sanitized_content).with_raw_response(response),
		"monitor_only" => Decision::monitor_only(reasons).with_raw_response(response),
		_ => Decision::allow(reasons).with_raw_response(response),
	}
}

/// Parse an MCP Inspection API response. The verdict comes from either the
/// `action` field (`Allow`/`Block`) or the `is_safe` boolean; either saying
/// unsafe blocks.
pub(crate) fn parse_mcp_decision(response: Value) -> Decision {
	let result = response.get("result").unwrap_or(&response);

	let action = result
		.get("action")
		.and_then(Value::as_str)
		.unwrap_or("Allow");
	let is_safe = result.get("is_safe").and_then(Value::as_bool).unwrap_or(true);

	let mut reasons = rule_reasons(result.get("rules"), &["NONE_VIOLATION"]);
	if reasons.is_empty() && !is_safe {
		let explanation = result
			.get("explanation")
			.and_then(Value::as_str)
			.filter(|s| !s.is_empty());
		let attack_technique = result
			.get("attack_technique")
			.and_then(Value::as_str)
			.filter(|s| !s.is_empty() && *s != "NONE_ATTACK_TECHNIQUE");
		if let Some(explanation) = explanation {
			reasons.push(explanation.to_owned());
		} else if let Some(technique) = attack_technique {
			reasons.push(format!("Attack technique: {technique}"));
		} else {
			let severity = result
				.get("severity")
				.and_then(Value::as_str)
				.unwrap_or("UNKNOWN");
			reasons.push(format!("Unsafe content detected (severity: {severity})"));
		}
	}

	if action == "Block" || !is_safe {
		Decision::block(reasons).with_raw_response(response)
	} else {
		Decision::allow(reasons).with_raw_response(response)
	}
}
