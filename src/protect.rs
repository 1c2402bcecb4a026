//! Bootstrap: resolve configuration, freeze the runtime state, and register
//! every supported provider.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::inspection::models::Rule;
use crate::patch;
use crate::state::{
	self, IntegrationMode, McpGatewayMode, Mode, ProviderGateway, RuntimeState,
	SUPPORTED_PROVIDERS,
};

/// Explicit overrides for [`protect`]. Every field defaults to "resolve from
/// setters, environment, then the documented default".
#[derive(Clone, Debug, Default)]
pub struct ProtectOptions {
	/// Load a `.env` file before reading the environment. Default true.
	pub auto_dotenv: Option<bool>,
	pub llm_mode: Option<Mode>,
	pub mcp_mode: Option<Mode>,
	pub llm_integration_mode: Option<IntegrationMode>,
	pub mcp_integration_mode: Option<IntegrationMode>,
	pub api_mode_llm_endpoint: Option<String>,
	pub api_mode_llm_api_key: Option<String>,
	pub api_mode_mcp_endpoint: Option<String>,
	pub api_mode_mcp_api_key: Option<String>,
	pub api_mode_fail_open_llm: Option<bool>,
	pub api_mode_fail_open_mcp: Option<bool>,
	pub gateway_mode_fail_open_llm: Option<bool>,
	pub gateway_mode_fail_open_mcp: Option<bool>,
	pub mcp_gateway_url: Option<String>,
	pub mcp_gateway_api_key: Option<String>,
	pub mcp_gateway_mode: Option<McpGatewayMode>,
	/// Per-provider gateway routing, merged over the environment entries.
	pub providers: HashMap<String, ProviderGateway>,
	pub llm_rules: Option<Vec<Rule>>,
}

#[derive(Clone, Debug, Default)]
pub struct ProtectOutcome {
	/// Providers registered by this (or an earlier) call.
	pub patched: Vec<String>,
	pub failed: Vec<String>,
	/// True when a previous `protect()` already froze the configuration and
	/// this call was a no-op.
	pub already_initialized: bool,
}

static BOOTSTRAP_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Enable runtime protection. Call once at program start; re-invocation is
/// a no-op. Individual provider registration failures are recorded, never
/// raised, so a missing integration cannot break the host application.
pub fn protect(options: ProtectOptions) -> ProtectOutcome {
	let _guard = BOOTSTRAP_LOCK.lock();
	if state::is_initialized() {
		debug!("protect() already ran, configuration is frozen");
		return ProtectOutcome {
			patched: patch::get_patched_clients(),
			failed: Vec::new(),
			already_initialized: true,
		};
	}

	if options.auto_dotenv.unwrap_or(true) {
		// Missing .env files are fine; only surface parse failures.
		if let Err(e) = dotenv::dotenv() {
			if !e.not_found() {
				warn!("failed to load .env: {e}");
			}
		}
	}

	let resolved = resolve_state(&options);
	state::install(resolved);

	let registrars: [(&str, fn() -> bool); 4] = [
		("openai", patch::openai::register),
		("bedrock", patch::bedrock::register),
		("mcp", patch::mcp::register),
		("vertexai", patch::vertex::register),
	];
	let mut patched = Vec::new();
	let mut failed = Vec::new();
	for (name, register) in registrars {
		if register() {
			patched.push(name.to_string());
		} else {
			warn!(provider = name, "registration failed");
			failed.push(name.to_string());
		}
	}

	info!(patched = ?patched, "agentsec protection enabled");
	ProtectOutcome {
		patched,
		failed,
		already_initialized: false,
	}
}

/// Resolve every runtime field with the priority
/// explicit argument > process-wide setter > environment variable > default.
pub(crate) fn resolve_state(options: &ProtectOptions) -> RuntimeState {
	let overrides = state::overrides();

	let llm_mode = options
		.llm_mode
		.or(overrides.llm_mode)
		.or_else(|| state::env_mode("AGENTSEC_API_MODE_LLM"))
		.unwrap_or_default();
	let mcp_mode = options
		.mcp_mode
		.or(overrides.mcp_mode)
		.or_else(|| state::env_mode("AGENTSEC_API_MODE_MCP"))
		.unwrap_or_default();
	let llm_integration_mode = options
		.llm_integration_mode
		.or_else(|| state::env_integration_mode("AGENTSEC_LLM_INTEGRATION_MODE"))
		.unwrap_or_default();
	let mcp_integration_mode = options
		.mcp_integration_mode
		.or_else(|| state::env_integration_mode("AGENTSEC_MCP_INTEGRATION_MODE"))
		.unwrap_or_default();

	let api_mode_llm_endpoint = options
		.api_mode_llm_endpoint
		.clone()
		.or(overrides.api_mode_llm_endpoint)
		.or_else(|| state::env_string(&["AI_DEFENSE_API_MODE_LLM_ENDPOINT"]));
	let api_mode_llm_api_key = options
		.api_mode_llm_api_key
		.clone()
		.or(overrides.api_mode_llm_api_key)
		.or_else(|| state::env_string(&["AI_DEFENSE_API_MODE_LLM_API_KEY"]));
	// MCP configuration falls back to the LLM values.
	let api_mode_mcp_endpoint = options
		.api_mode_mcp_endpoint
		.clone()
		.or(overrides.api_mode_mcp_endpoint)
		.or_else(|| {
			state::env_string(&[
				"AI_DEFENSE_API_MODE_MCP_ENDPOINT",
				"AI_DEFENSE_API_MODE_LLM_ENDPOINT",
			])
		})
		.or_else(|| api_mode_llm_endpoint.clone());
	let api_mode_mcp_api_key = options
		.api_mode_mcp_api_key
		.clone()
		.or(overrides.api_mode_mcp_api_key)
		.or_else(|| {
			state::env_string(&[
				"AI_DEFENSE_API_MODE_MCP_API_KEY",
				"AI_DEFENSE_API_MODE_LLM_API_KEY",
			])
		})
		.or_else(|| api_mode_llm_api_key.clone());

	let api_mode_fail_open_llm = options
		.api_mode_fail_open_llm
		.or_else(|| state::env_bool("AGENTSEC_FAIL_OPEN_LLM"))
		.unwrap_or(true);
	let api_mode_fail_open_mcp = options
		.api_mode_fail_open_mcp
		.or_else(|| state::env_bool("AGENTSEC_FAIL_OPEN_MCP"))
		.unwrap_or(true);
	let gateway_mode_fail_open_llm = options
		.gateway_mode_fail_open_llm
		.or_else(|| state::env_bool("AGENTSEC_GATEWAY_FAIL_OPEN_LLM"))
		.unwrap_or(true);
	let gateway_mode_fail_open_mcp = options
		.gateway_mode_fail_open_mcp
		.or_else(|| state::env_bool("AGENTSEC_GATEWAY_FAIL_OPEN_MCP"))
		.unwrap_or(true);

	let mcp_gateway_url = options
		.mcp_gateway_url
		.clone()
		.or_else(|| state::env_string(&["AGENTSEC_MCP_GATEWAY_URL"]));
	let mcp_gateway_api_key = options
		.mcp_gateway_api_key
		.clone()
		.or_else(|| state::env_string(&["AGENTSEC_MCP_GATEWAY_API_KEY"]));
	let mcp_gateway_mode = options
		.mcp_gateway_mode
		.or_else(|| {
			state::env_string(&["AGENTSEC_MCP_GATEWAY_MODE"]).and_then(|raw| {
				match raw.trim().to_ascii_lowercase().as_str() {
					"off" => Some(McpGatewayMode::Off),
					"on" => Some(McpGatewayMode::On),
					other => {
						warn!(value = other, "unrecognized MCP gateway mode, ignoring");
						None
					},
				}
			})
		})
		.unwrap_or_default();

	let mut providers: HashMap<String, ProviderGateway> = HashMap::new();
	for name in SUPPORTED_PROVIDERS {
		let upper = name.to_ascii_uppercase();
		let gateway = ProviderGateway {
			gateway_url: state::env_string(&[&format!("AGENTSEC_{upper}_GATEWAY_URL")]),
			gateway_api_key: state::env_string(&[&format!("AGENTSEC_{upper}_GATEWAY_API_KEY")]),
		};
		if gateway.gateway_url.is_some() || gateway.gateway_api_key.is_some() {
			providers.insert(name.to_string(), gateway);
		}
	}
	for (name, gateway) in &options.providers {
		providers.insert(name.clone(), gateway.clone());
	}

	RuntimeState {
		llm_mode,
		mcp_mode,
		llm_integration_mode,
		mcp_integration_mode,
		api_mode_llm_endpoint,
		api_mode_llm_api_key,
		api_mode_mcp_endpoint,
		api_mode_mcp_api_key,
		api_mode_fail_open_llm,
		api_mode_fail_open_mcp,
		gateway_mode_fail_open_llm,
		gateway_mode_fail_open_mcp,
		mcp_gateway_url,
		mcp_gateway_api_key,
		mcp_gateway_mode,
		providers,
		llm_rules: options.llm_rules.clone().unwrap_or_default(),
		initialized: true,
	}
}
