//! Provider guards and the patch registry.
//!
//! Each guard is a thin decorator over a dispatch trait: user code wraps its
//! provider client once and calls through the guard, which runs the
//! normalize → inspect → delegate → inspect flow around the wrapped call.
//! The registry records which providers have been wired up; registration is
//! idempotent and no component outside this module keeps patch state.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::context::CallContext;
use crate::decision::Decision;
use crate::errors::Error;
use crate::gateway::LlmGateway;
use crate::state::{IntegrationMode, Mode, RuntimeState};

pub mod bedrock;
pub mod bedrock_stream;
pub mod mcp;
pub mod openai;
pub mod vertex;

/// Step one of the guard flow: forward unchanged when a skip guard is
/// active, the mode is off, or an inspection already reached a terminal
/// decision for this logical call.
pub(crate) fn should_inspect_llm(state: &RuntimeState, ctx: &CallContext) -> bool {
	if ctx.skip_llm() {
		return false;
	}
	if state.llm_mode.is_off() {
		return false;
	}
	!ctx.is_done()
}

/// The provider gateway, when gateway mode is selected, configured for this
/// provider, and not skipped. Falls back to API mode otherwise.
pub(crate) fn usable_llm_gateway(
	state: &RuntimeState,
	ctx: &CallContext,
	provider: &str,
) -> Option<LlmGateway> {
	if ctx.skip_llm() {
		return None;
	}
	if state.llm_integration_mode != IntegrationMode::Gateway {
		return None;
	}
	LlmGateway::for_provider(state, provider)
}

pub(crate) fn enforce_llm(state: &RuntimeState, decision: &Decision) -> Result<(), Error> {
	if state.llm_mode == Mode::OnEnforce && decision.is_block() {
		return Err(Error::security_policy(decision.clone()));
	}
	Ok(())
}

/// Inspection failures inside a guard (not delegation failures) follow the
/// fail-open policy: allow with a tagged reason, or fail closed.
pub(crate) fn handle_patcher_error(
	fail_open: bool,
	operation: &str,
	error: Error,
) -> Result<Decision, Error> {
	let kind = error.kind_name();
	warn!(operation, "inspection error: {kind}: {error}");
	if fail_open {
		warn!("fail_open=True, allowing request despite inspection error");
		Ok(Decision::allow(vec![format!(
			"Inspection error ({kind}), fail_open=True"
		)]))
	} else {
		Err(Error::security_policy_with(
			Decision::block(vec![format!("Inspection error: {kind}: {error}")]),
			format!("Inspection failed and fail_open=False: {error}"),
		))
	}
}

/// Gateway transport failure handling shared by the LLM guards: fail-open
/// records an allow decision but still surfaces the underlying I/O error;
/// fail-closed raises a security-policy failure.
pub(crate) fn handle_gateway_error(
	state: &RuntimeState,
	ctx: &CallContext,
	operation: &str,
	error: Error,
) -> Error {
	if state.gateway_mode_fail_open_llm {
		warn!(operation, "gateway error, fail_open=True: {error}");
		ctx.set(
			Some(Decision::allow(vec!["Gateway error, fail_open=True".into()])),
			Some(true),
		);
		error
	} else {
		Error::security_policy_with(
			Decision::block(vec!["Gateway unavailable".into()]),
			format!("gateway error and fail_open=False: {error}"),
		)
	}
}

static REGISTRY: Lazy<Mutex<HashMap<String, bool>>> = Lazy::new(|| Mutex::new(HashMap::new()));

pub fn is_patched(name: &str) -> bool {
	REGISTRY.lock().get(name).copied().unwrap_or(false)
}

pub fn mark_patched(name: &str) {
	REGISTRY.lock().insert(name.to_string(), true);
	debug!(name, "marked as patched");
}

/// Names of successfully registered providers.
pub fn get_patched_clients() -> Vec<String> {
	let registry = REGISTRY.lock();
	let mut names: Vec<String> = registry
		.iter()
		.filter(|(_, patched)| **patched)
		.map(|(name, _)| name.clone())
		.collect();
	names.sort();
	names
}

/// Reset patch state. Only for tests.
pub fn reset_registry() {
	REGISTRY.lock().clear();
}
