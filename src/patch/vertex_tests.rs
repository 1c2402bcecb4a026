use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use assert_matches::assert_matches;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;
use crate::context;
use crate::decision::Action;
use crate::state::Mode;
use crate::types::Role as ChatRole;

struct ScriptedGenerate {
	calls: AtomicUsize,
	response: Value,
}

impl ScriptedGenerate {
	fn returning(response: Value) -> Self {
		ScriptedGenerate {
			calls: AtomicUsize::new(0),
			response,
		}
	}

	fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

impl GenerateContentDispatch for ScriptedGenerate {
	fn generate_content(&self, _request: Value) -> Result<Value, Error> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		Ok(self.response.clone())
	}
}

fn api_state(endpoint: &str, mode: Mode, fail_open: bool) -> Arc<RuntimeState> {
	let mut s = RuntimeState::unconfigured();
	s.llm_mode = mode;
	s.api_mode_llm_endpoint = Some(endpoint.to_string());
	s.api_mode_llm_api_key = Some("test-key".to_string());
	s.api_mode_fail_open_llm = fail_open;
	s.initialized = true;
	Arc::new(s)
}

fn generate_request(text: &str) -> Value {
	json!({
		"model": "gemini-1.5-pro",
		"systemInstruction": {"parts": [{"text": "answer briefly"}]},
		"contents": [
			{"role": "user", "parts": [{"text": text}]},
		],
	})
}

fn generate_reply(text: &str) -> Value {
	json!({
		"candidates": [
			{"content": {"role": "model", "parts": [{"text": text}]}},
		],
	})
}

#[test]
fn normalization_maps_model_role_and_system_instruction() {
	let messages = generate_content_messages(&json!({
		"systemInstruction": {"parts": [{"text": "stay"}, {"text": "formal"}]},
		"contents": [
			{"role": "user", "parts": [{"text": "hello"}, {"text": "there"}]},
			{"role": "model", "parts": [{"text": "hi"}]},
			{"role": "user", "parts": []},
		],
	}));
	assert_eq!(messages.len(), 3);
	assert_eq!(messages[0].role, ChatRole::System);
	assert_eq!(messages[0].content, "stay formal");
	assert_eq!(messages[1].content, "hello there");
	assert_eq!(messages[2].role, ChatRole::Assistant);
}

#[test]
fn response_text_joins_candidate_parts() {
	assert_eq!(response_text(&generate_reply("the answer")), "the answer");
	assert_eq!(response_text(&json!({"candidates": []})), "");
}

#[tokio::test]
async fn enforce_block_skips_provider() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.and(path("/v1/inspect/chat"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"action": "Block",
			"rules": [{"rule_name": "Harassment", "classification": "SAFETY_VIOLATION"}],
		})))
		.expect(1)
		.mount(&server)
		.await;

	let state = api_state(&server.uri(), Mode::OnEnforce, true);
	let (result, calls) = tokio::task::spawn_blocking(move || {
		context::clear_context();
		let guard = VertexGuard::with_state(ScriptedGenerate::returning(generate_reply("no")), state);
		let result = guard.generate_content(generate_request("abusive text"));
		let calls = guard.inner().calls();
		context::clear_context();
		(result, calls)
	})
	.await
	.unwrap();

	assert_matches!(&result.unwrap_err(), Error::SecurityPolicy { decision, .. } => {
		assert_eq!(decision.action, Action::Block);
	});
	assert_eq!(calls, 0);
}

#[tokio::test]
async fn allow_flow_runs_pre_and_post_inspection() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.and(path("/v1/inspect/chat"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({"action": "Allow"})))
		.expect(2)
		.mount(&server)
		.await;

	let state = api_state(&server.uri(), Mode::OnEnforce, true);
	tokio::task::spawn_blocking(move || {
		context::clear_context();
		let guard =
			VertexGuard::with_state(ScriptedGenerate::returning(generate_reply("fine")), state);
		let response = guard.generate_content(generate_request("hello")).unwrap();
		assert_eq!(response_text(&response), "fine");
		assert_eq!(guard.inner().calls(), 1);
		assert!(context::get_context().is_done());
		context::clear_context();
	})
	.await
	.unwrap();
}
