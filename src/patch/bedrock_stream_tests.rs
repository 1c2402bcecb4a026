use serde_json::json;

use super::*;

fn converse_response(content: Vec<serde_json::Value>) -> serde_json::Value {
	json!({
		"output": {
			"message": {
				"role": "assistant",
				"content": content,
			}
		},
		"stopReason": "end_turn",
		"usage": {"inputTokens": 10, "outputTokens": 5, "totalTokens": 15},
		"metrics": {"latencyMs": 42},
	})
}

#[test]
fn text_block_emits_fixed_event_sequence() {
	let response = converse_response(vec![json!({"text": "Hello"})]);
	let events: Vec<_> = ConverseStreamEvents::from_converse_response(&response)
		.unwrap()
		.collect();

	// 1 messageStart + 3 per block + messageStop + metadata
	assert_eq!(events.len(), 6);
	assert_eq!(events[0], json!({"messageStart": {"role": "assistant"}}));
	assert_eq!(
		events[1],
		json!({"contentBlockStart": {"contentBlockIndex": 0, "start": {"text": ""}}})
	);
	assert_eq!(
		events[2],
		json!({"contentBlockDelta": {"contentBlockIndex": 0, "delta": {"text": "Hello"}}})
	);
	assert_eq!(events[3], json!({"contentBlockStop": {"contentBlockIndex": 0}}));
	assert_eq!(events[4], json!({"messageStop": {"stopReason": "end_turn"}}));
	assert_eq!(
		events[5]["metadata"]["usage"]["totalTokens"],
		json!(15)
	);
	assert_eq!(events[5]["metadata"]["metrics"]["latencyMs"], json!(42));
}

#[test]
fn event_count_matches_block_count() {
	// Two text blocks and one tool-use block: 1 + 3*3 + 1 + 1 events.
	let response = converse_response(vec![
		json!({"text": "part one"}),
		json!({"toolUse": {"toolUseId": "t-1", "name": "get_weather", "input": {"city": "SF"}}}),
		json!({"text": "part two"}),
	]);
	let stream = ConverseStreamEvents::from_converse_response(&response).unwrap();
	assert_eq!(stream.len(), 12);

	let events: Vec<_> = stream.collect();
	let start_indices: Vec<_> = events
		.iter()
		.filter_map(|e| e.get("contentBlockStart"))
		.map(|s| s["contentBlockIndex"].clone())
		.collect();
	assert_eq!(start_indices, vec![json!(0), json!(1), json!(2)]);
}

#[test]
fn tool_use_delta_carries_json_encoded_input() {
	let response = converse_response(vec![json!({
		"toolUse": {"toolUseId": "t-9", "name": "exec", "input": {"cmd": "ls"}}
	})]);
	let events: Vec<_> = ConverseStreamEvents::from_converse_response(&response)
		.unwrap()
		.collect();

	assert_eq!(
		events[1]["contentBlockStart"]["start"]["toolUse"],
		json!({"toolUseId": "t-9", "name": "exec"})
	);
	let input = events[2]["contentBlockDelta"]["delta"]["toolUse"]["input"]
		.as_str()
		.unwrap();
	assert_eq!(
		serde_json::from_str::<serde_json::Value>(input).unwrap(),
		json!({"cmd": "ls"})
	);
}

#[test]
fn missing_usage_defaults_to_empty_metadata() {
	let response = json!({
		"output": {"message": {"role": "assistant", "content": [{"text": "x"}]}},
		"stopReason": "max_tokens",
	});
	let events: Vec<_> = ConverseStreamEvents::from_converse_response(&response)
		.unwrap()
		.collect();
	assert_eq!(events[4], json!({"messageStop": {"stopReason": "max_tokens"}}));
	assert_eq!(events[5]["metadata"]["usage"], json!({}));
	assert_eq!(events[5]["metadata"]["metrics"], json!({"latencyMs": 0}));
}

#[test]
fn close_drops_unread_events() {
	let response = converse_response(vec![json!({"text": "Hello"})]);
	let mut stream = ConverseStreamEvents::from_converse_response(&response).unwrap();
	assert!(stream.next().is_some());
	stream.close();
	assert!(stream.next().is_none());
	assert!(stream.is_empty());
}

#[tokio::test]
async fn consumable_as_async_stream() {
	use futures_util::StreamExt;

	let response = converse_response(vec![json!({"text": "Hello"})]);
	let stream = ConverseStreamEvents::from_converse_response(&response).unwrap();
	let events: Vec<_> = StreamExt::collect::<Vec<_>>(stream).await;
	assert_eq!(events.len(), 6);
	assert_eq!(events[0], json!({"messageStart": {"role": "assistant"}}));
}

#[test]
fn non_converse_body_is_a_parse_error() {
	let err = ConverseStreamEvents::from_converse_response(&json!("nope")).unwrap_err();
	assert!(matches!(err, crate::errors::Error::ResponseParse { .. }));
}
