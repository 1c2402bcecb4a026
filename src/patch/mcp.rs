//! MCP client interception.
//!
//! Two wrap points, mirroring where an MCP client can be instrumented:
//! the per-call `tools/call` path (API mode inspects before and after the
//! tool runs) and the transport setup (gateway mode rewrites the connection
//! URL so the gateway inspects and relays every call server-side).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{is_patched, mark_patched};
use crate::context::{self, CallContext};
use crate::decision::Decision;
use crate::errors::Error;
use crate::gateway::McpGateway;
use crate::inspect::McpInspector;
use crate::state::{self, IntegrationMode, Mode, RuntimeState};

#[cfg(test)]
#[path = "mcp_tests.rs"]
mod tests;

/// The wrapped entry point: one MCP tool invocation.
#[async_trait]
pub trait ToolDispatch: Send + Sync {
	async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, Error>;
}

/// Inspection-aware decorator for an MCP client session.
pub struct McpGuard<D> {
	inner: D,
	state: Option<Arc<RuntimeState>>,
	inspector: OnceCell<McpInspector>,
}

impl<D: ToolDispatch> McpGuard<D> {
	pub fn new(inner: D) -> Self {
		McpGuard {
			inner,
			state: None,
			inspector: OnceCell::new(),
		}
	}

	pub fn with_state(inner: D, state: Arc<RuntimeState>) -> Self {
		McpGuard {
			inner,
			state: Some(state),
			inspector: OnceCell::new(),
		}
	}

	pub fn inner(&self) -> &D {
		&self.inner
	}

	fn state(&self) -> Arc<RuntimeState> {
		self.state.clone().unwrap_or_else(state::current)
	}

	fn inspector(&self, state: &RuntimeState) -> &McpInspector {
		self.inspector.get_or_init(|| {
			if !state.initialized {
				warn!("protect() not called, using default config");
			}
			McpInspector::from_state(state)
		})
	}

	pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, Error> {
		let state = self.state();
		let ctx = context::get_context();

		if uses_gateway(&state, &ctx) {
			// The gateway inspected this call at the transport; nothing to do
			// client-side.
			debug!(tool = name, "MCP tool call relayed through gateway");
			return self.inner.call_tool(name, arguments).await;
		}

		if !should_inspect(&state, &ctx) {
			debug!(tool = name, "MCP inspection skipped (mode=off or skip guard)");
			return self.inner.call_tool(name, arguments).await;
		}

		let metadata = ctx.metadata();
		debug!(
			tool = name,
			mode = ?state.mcp_mode,
			integration = ?state.mcp_integration_mode,
			"intercepted MCP tool call"
		);

		// Pre-call inspection.
		let inspector = self.inspector(&state);
		match inspector
			.inspect_request_async(name, &arguments, &metadata)
			.await
		{
			Ok(decision) => {
				debug!(tool = name, action = %decision.action, "request decision");
				ctx.set(Some(decision.clone()), None);
				enforce(&state, &decision)?;
			},
			Err(e @ Error::SecurityPolicy { .. }) => return Err(e),
			Err(e) => {
				warn!(tool = name, "request inspection error: {e}");
				if !state.api_mode_fail_open_mcp {
					let decision = Decision::block(vec![format!("MCP inspection error: {e}")]);
					return Err(Error::security_policy_with(
						decision,
						format!("MCP inspection failed: {e}"),
					));
				}
				warn!("fail_open=True, proceeding despite inspection error");
			},
		}

		let result = self.inner.call_tool(name, arguments.clone()).await?;

		// Post-call inspection.
		match inspector
			.inspect_response_async(name, &arguments, &result, &metadata)
			.await
		{
			Ok(decision) => {
				debug!(tool = name, action = %decision.action, "response decision");
				ctx.set(Some(decision.clone()), Some(true));
				enforce(&state, &decision)?;
			},
			Err(e @ Error::SecurityPolicy { .. }) => return Err(e),
			Err(e) => warn!(tool = name, "response inspection error: {e}"),
		}

		Ok(result)
	}
}

fn should_inspect(state: &RuntimeState, ctx: &CallContext) -> bool {
	if ctx.skip_mcp() {
		return false;
	}
	!state.mcp_mode.is_off()
}

fn uses_gateway(state: &RuntimeState, ctx: &CallContext) -> bool {
	if ctx.skip_mcp() {
		return false;
	}
	if state.mcp_integration_mode != IntegrationMode::Gateway {
		return false;
	}
	McpGateway::from_state(state).is_some()
}

fn enforce(state: &RuntimeState, decision: &Decision) -> Result<(), Error> {
	if state.mcp_mode == Mode::OnEnforce && decision.is_block() {
		return Err(Error::security_policy(decision.clone()));
	}
	Ok(())
}

/// Rewrite an MCP transport endpoint at connection setup. In gateway mode
/// the URL is replaced by the gateway redirect and the gateway auth headers
/// are merged in; otherwise both pass through unchanged. The MCP session is
/// untouched after setup.
pub fn rewrite_transport(
	url: &str,
	headers: HashMap<String, String>,
) -> (String, HashMap<String, String>) {
	rewrite_transport_with(&state::current(), url, headers)
}

pub fn rewrite_transport_with(
	state: &RuntimeState,
	url: &str,
	mut headers: HashMap<String, String>,
) -> (String, HashMap<String, String>) {
	if state.mcp_integration_mode != IntegrationMode::Gateway {
		return (url.to_string(), headers);
	}
	let Some(gateway) = McpGateway::from_state(state) else {
		return (url.to_string(), headers);
	};
	gateway.log_redirect(url);
	for (key, value) in gateway.headers() {
		headers.insert(key, value);
	}
	(gateway.redirect_url().to_string(), headers)
}

/// Record MCP support in the patch registry.
pub(crate) fn register() -> bool {
	if is_patched("mcp") {
		debug!("MCP already registered, skipping");
		return true;
	}
	mark_patched("mcp");
	info!("MCP interception registered");
	true
}
