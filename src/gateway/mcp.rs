//! MCP gateway redirection.
//!
//! In gateway mode the MCP transport URL is rewritten to the gateway at
//! connection setup; the gateway speaks MCP and relays to the real server
//! after inspection, so no per-call inspection runs client-side.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use crate::state::{McpGatewayMode, RuntimeState};

static REDIRECT_LOGGED: AtomicBool = AtomicBool::new(false);

#[derive(Clone, Debug)]
pub struct McpGateway {
	url: String,
	api_key: Option<String>,
}

impl McpGateway {
	pub fn from_state(state: &RuntimeState) -> Option<Self> {
		if state.mcp_gateway_mode == McpGatewayMode::Off {
			return None;
		}
		let url = state.mcp_gateway_url.clone().filter(|u| !u.is_empty())?;
		Some(McpGateway {
			url,
			api_key: state.mcp_gateway_api_key.clone(),
		})
	}

	pub fn redirect_url(&self) -> &str {
		&self.url
	}

	pub fn headers(&self) -> Vec<(String, String)> {
		match &self.api_key {
			Some(key) => vec![("Authorization".to_string(), format!("Bearer {key}"))],
			None => Vec::new(),
		}
	}

	/// Log the redirection the first time it happens in this process.
	pub(crate) fn log_redirect(&self, original_url: &str) {
		if !REDIRECT_LOGGED.swap(true, Ordering::Relaxed) {
			info!("redirecting MCP connections to AI Defense Gateway");
			debug!(original = original_url, gateway = %self.url, "MCP transport rewrite");
		}
	}
}
