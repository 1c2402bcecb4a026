//! Reassembles a non-streaming Converse response into the event sequence a
//! ConverseStream consumer expects.
//!
//! The gateway always answers with a complete response; callers that asked
//! for a stream receive this synthesizer instead. Events are emitted in a
//! fixed order: messageStart, then start/delta/stop per content block with
//! dense indices from 0, then messageStop, then metadata.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::{Value, json};

use crate::errors::Error;
use crate::types::bedrock::{ContentBlock, ConverseOutput, ConverseResponse};

#[cfg(test)]
#[path = "bedrock_stream_tests.rs"]
mod tests;

/// Synthesized Bedrock event stream. Consumable as a blocking iterator and
/// as a cooperative-async `Stream`; `close` drops any unread events.
#[derive(Debug)]
pub struct ConverseStreamEvents {
	events: VecDeque<Value>,
}

impl ConverseStreamEvents {
	/// Build the event sequence from a native Converse response body.
	pub fn from_converse_response(response: &Value) -> Result<Self, Error> {
		let parsed: ConverseResponse =
			serde_json::from_value(response.clone()).map_err(|e| Error::ResponseParse {
				message: format!("not a Converse response: {e}"),
				raw: response.clone(),
			})?;

		let message = match parsed.output {
			Some(ConverseOutput::Message(m)) => Some(m),
			_ => None,
		};
		let role = message
			.as_ref()
			.map(|m| m.role.as_str())
			.unwrap_or("assistant");
		let content = message.as_ref().map(|m| m.content.as_slice()).unwrap_or(&[]);
		let stop_reason = parsed.stop_reason.as_deref().unwrap_or("end_turn");

		let mut events = VecDeque::new();
		events.push_back(json!({"messageStart": {"role": role}}));

		for (idx, block) in content.iter().enumerate() {
			match block {
				ContentBlock::Text(text) => {
					events.push_back(json!({
						"contentBlockStart": {
							"contentBlockIndex": idx,
							"start": {"text": ""},
						}
					}));
					events.push_back(json!({
						"contentBlockDelta": {
							"contentBlockIndex": idx,
							"delta": {"text": text},
						}
					}));
					events.push_back(json!({"contentBlockStop": {"contentBlockIndex": idx}}));
				},
				ContentBlock::ToolUse(tool_use) => {
					events.push_back(json!({
						"contentBlockStart": {
							"contentBlockIndex": idx,
							"start": {
								"toolUse": {
									"toolUseId": tool_use.tool_use_id,
									"name": tool_use.name,
								}
							},
						}
					}));
					events.push_back(json!({
						"contentBlockDelta": {
							"contentBlockIndex": idx,
							"delta": {
								"toolUse": {"input": tool_use.input.to_string()}
							},
						}
					}));
					events.push_back(json!({"contentBlockStop": {"contentBlockIndex": idx}}));
				},
				// Blocks the stream format cannot carry are skipped; indices
				// stay aligned with the response content list.
				_ => {},
			}
		}

		events.push_back(json!({"messageStop": {"stopReason": stop_reason}}));
		events.push_back(json!({
			"metadata": {
				"usage": response.get("usage").cloned().unwrap_or(json!({})),
				"metrics": response
					.get("metrics")
					.cloned()
					.unwrap_or(json!({"latencyMs": 0})),
			}
		}));

		Ok(ConverseStreamEvents { events })
	}

	/// Stream over an explicit event list, for adapters that already hold
	/// provider events.
	pub fn from_events(events: Vec<Value>) -> Self {
		ConverseStreamEvents {
			events: events.into(),
		}
	}

	pub fn close(&mut self) {
		self.events.clear();
	}

	pub fn len(&self) -> usize {
		self.events.len()
	}

	pub fn is_empty(&self) -> bool {
		self.events.is_empty()
	}
}

impl Iterator for ConverseStreamEvents {
	type Item = Value;

	fn next(&mut self) -> Option<Value> {
		self.events.pop_front()
	}
}

impl futures_core::Stream for ConverseStreamEvents {
	type Item = Value;

	fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Value>> {
		Poll::Ready(self.get_mut().events.pop_front())
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		(self.events.len(), Some(self.events.len()))
	}
}
