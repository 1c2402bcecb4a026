use assert_matches::assert_matches;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;
use crate::inspection::models::{Classification, InspectionConfig, Metadata, Rule, RuleName};

fn client(base_url: &str) -> ChatInspectionClient {
	ChatInspectionClient::new(
		"unit-test-key",
		Some(Config {
			runtime_base_url: Some(base_url.to_string()),
			..Config::default()
		}),
	)
	.unwrap()
}

#[test]
fn empty_conversation_is_rejected() {
	let client = client("https://inspect.example.com");
	let err = client
		.inspect_conversation(&[], &InspectOptions::default())
		.unwrap_err();
	assert_matches!(err, Error::Validation(_));
}

#[test]
fn empty_content_is_rejected() {
	let client = client("https://inspect.example.com");
	let err = client
		.inspect_conversation(&[Message::user("")], &InspectOptions::default())
		.unwrap_err();
	assert_matches!(err, Error::Validation(_));
}

#[test]
fn system_only_conversation_is_rejected() {
	let client = client("https://inspect.example.com");
	let err = client
		.inspect_conversation(
			&[Message::system("be helpful")],
			&InspectOptions::default(),
		)
		.unwrap_err();
	assert_matches!(err, Error::Validation(msg) if msg.contains("prompt"));
}

#[test]
fn blank_prompt_and_completion_is_rejected() {
	let client = client("https://inspect.example.com");
	let err = client
		.inspect_conversation(&[Message::user("   ")], &InspectOptions::default())
		.unwrap_err();
	assert_matches!(err, Error::Validation(_));
}

#[tokio::test]
async fn config_without_rules_is_forwarded_as_given() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.and(path("/api/v1/inspect/chat"))
		.and(body_partial_json(json!({
			"config": {"integration_profile_id": "profile-7"},
		})))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({"is_safe": true})))
		.expect(1)
		.mount(&server)
		.await;

	let client = client(&server.uri());
	let options = InspectOptions {
		config: Some(InspectionConfig {
			integration_profile_id: Some("profile-7".into()),
			..InspectionConfig::default()
		}),
		..InspectOptions::default()
	};
	client
		.inspect_prompt_async("hello", &options)
		.await
		.unwrap();
}

#[tokio::test]
async fn inspect_prompt_posts_user_message() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.and(path("/api/v1/inspect/chat"))
		.and(header("X-Cisco-AI-Defense-API-Key", "unit-test-key"))
		.and(header_exists("x-aidefense-request-id"))
		.and(body_partial_json(json!({
			"messages": [{"role": "user", "content": "Write some code"}],
		})))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"is_safe": true,
			"classifications": [],
		})))
		.expect(1)
		.mount(&server)
		.await;

	let client = client(&server.uri());
	let result = client
		.inspect_prompt_async("Write some code", &InspectOptions::default())
		.await
		.unwrap();
	assert!(result.is_safe);
}

#[tokio::test]
async fn inspect_response_posts_assistant_message() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.and(path("/api/v1/inspect/chat"))
		.and(body_partial_json(json!({
			"messages": [{"role": "assistant", "content": "Here is the plan"}],
		})))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"is_safe": false,
			"severity": "HIGH_SEVERITY",
			"classifications": ["SECURITY_VIOLATION"],
			"event_id": "evt-9",
		})))
		.mount(&server)
		.await;

	let client = client(&server.uri());
	let result = client
		.inspect_response_async("Here is the plan", &InspectOptions::default())
		.await
		.unwrap();
	assert!(!result.is_safe);
	assert_eq!(result.classifications, vec![Classification::SecurityViolation]);
	assert_eq!(result.event_id.as_deref(), Some("evt-9"));
}

#[tokio::test]
async fn metadata_and_config_ride_the_payload() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.and(path("/api/v1/inspect/chat"))
		.and(body_partial_json(json!({
			"metadata": {"user": "alice"},
			"config": {"enabled_rules": [{"rule_name": "Prompt Injection"}]},
		})))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({"is_safe": true})))
		.expect(1)
		.mount(&server)
		.await;

	let client = client(&server.uri());
	let options = InspectOptions {
		metadata: Some(Metadata {
			user: Some("alice".into()),
			..Metadata::default()
		}),
		config: Some(InspectionConfig {
			enabled_rules: vec![Rule::named(RuleName::PromptInjection)],
			..InspectionConfig::default()
		}),
		..InspectOptions::default()
	};
	client
		.inspect_conversation_async(
			&[
				Message::user("How do I do this?"),
				Message::assistant("Like so."),
			],
			&options,
		)
		.await
		.unwrap();
}

#[tokio::test]
async fn blocking_variant_shares_the_contract() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.and(path("/api/v1/inspect/chat"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({"is_safe": true})))
		.mount(&server)
		.await;

	let uri = server.uri();
	let result = tokio::task::spawn_blocking(move || {
		let client = client(&uri);
		client.inspect_prompt("hello", &InspectOptions::default())
	})
	.await
	.unwrap()
	.unwrap();
	assert!(result.is_safe);
}
