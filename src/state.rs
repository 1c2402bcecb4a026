//! Process-wide runtime configuration.
//!
//! `RuntimeState` is populated once by [`crate::protect::protect`] and is
//! read-mostly afterwards: readers grab an `Arc` snapshot and need no
//! coordination. Individual fields resolve with the priority
//! explicit argument > process-wide setter > environment variable > default.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::inspection::models::Rule;

/// Inspection mode for a traffic class.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
	Off,
	#[default]
	Monitor,
	OnEnforce,
}

impl Mode {
	pub fn parse(s: &str) -> Option<Mode> {
		match s.trim().to_ascii_lowercase().as_str() {
			"off" => Some(Mode::Off),
			"monitor" => Some(Mode::Monitor),
			"on_enforce" => Some(Mode::OnEnforce),
			_ => None,
		}
	}

	pub fn is_off(&self) -> bool {
		*self == Mode::Off
	}
}

/// How inspection integrates with the provider call.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationMode {
	#[default]
	Api,
	Gateway,
}

impl IntegrationMode {
	pub fn parse(s: &str) -> Option<IntegrationMode> {
		match s.trim().to_ascii_lowercase().as_str() {
			"api" => Some(IntegrationMode::Api),
			"gateway" => Some(IntegrationMode::Gateway),
			_ => None,
		}
	}
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpGatewayMode {
	Off,
	#[default]
	On,
}

/// Gateway routing for one upstream provider.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderGateway {
	pub gateway_url: Option<String>,
	pub gateway_api_key: Option<String>,
}

impl ProviderGateway {
	pub fn is_configured(&self) -> bool {
		matches!(&self.gateway_url, Some(u) if !u.is_empty())
			&& matches!(&self.gateway_api_key, Some(k) if !k.is_empty())
	}
}

pub const SUPPORTED_PROVIDERS: [&str; 4] = ["openai", "bedrock", "vertexai", "azure"];

#[derive(Clone, Debug, Default)]
pub struct RuntimeState {
	pub llm_mode: Mode,
	pub mcp_mode: Mode,
	pub llm_integration_mode: IntegrationMode,
	pub mcp_integration_mode: IntegrationMode,

	pub api_mode_llm_endpoint: Option<String>,
	pub api_mode_llm_api_key: Option<String>,
	pub api_mode_mcp_endpoint: Option<String>,
	pub api_mode_mcp_api_key: Option<String>,

	pub api_mode_fail_open_llm: bool,
	pub api_mode_fail_open_mcp: bool,
	pub gateway_mode_fail_open_llm: bool,
	pub gateway_mode_fail_open_mcp: bool,

	pub mcp_gateway_url: Option<String>,
	pub mcp_gateway_api_key: Option<String>,
	pub mcp_gateway_mode: McpGatewayMode,

	/// Per-provider gateway routing, keyed by provider name.
	pub providers: HashMap<String, ProviderGateway>,

	/// Default inspection rules applied when a call supplies none.
	pub llm_rules: Vec<Rule>,

	/// Once true the configuration is frozen; `protect()` becomes a no-op.
	pub initialized: bool,
}

impl RuntimeState {
	/// State with every documented default and nothing initialized. Used
	/// before bootstrap and as the base for test fixtures.
	pub fn unconfigured() -> Self {
		RuntimeState {
			api_mode_fail_open_llm: true,
			api_mode_fail_open_mcp: true,
			gateway_mode_fail_open_llm: true,
			gateway_mode_fail_open_mcp: true,
			..Default::default()
		}
	}

	pub fn provider_gateway(&self, provider: &str) -> Option<&ProviderGateway> {
		self.providers.get(provider)
	}

	pub fn provider_gateway_url(&self, provider: &str) -> Option<&str> {
		self
			.providers
			.get(provider)
			.and_then(|p| p.gateway_url.as_deref())
	}

	pub fn provider_gateway_api_key(&self, provider: &str) -> Option<&str> {
		self
			.providers
			.get(provider)
			.and_then(|p| p.gateway_api_key.as_deref())
	}

	pub fn is_initialized(&self) -> bool {
		self.initialized
	}
}

static STATE: Lazy<RwLock<Arc<RuntimeState>>> =
	Lazy::new(|| RwLock::new(Arc::new(RuntimeState::unconfigured())));

/// Snapshot of the current runtime state. Cheap: clones an `Arc`.
pub fn current() -> Arc<RuntimeState> {
	STATE.read().clone()
}

pub(crate) fn install(state: RuntimeState) {
	*STATE.write() = Arc::new(state);
}

pub fn is_initialized() -> bool {
	current().initialized
}

/// Pre-bootstrap overrides set through the `set_*` functions. Consulted by
/// bootstrap between explicit arguments and environment variables.
#[derive(Clone, Debug, Default)]
pub(crate) struct Overrides {
	pub llm_mode: Option<Mode>,
	pub mcp_mode: Option<Mode>,
	pub api_mode_llm_endpoint: Option<String>,
	pub api_mode_llm_api_key: Option<String>,
	pub api_mode_mcp_endpoint: Option<String>,
	pub api_mode_mcp_api_key: Option<String>,
}

static OVERRIDES: Lazy<Mutex<Overrides>> = Lazy::new(|| Mutex::new(Overrides::default()));

pub(crate) fn overrides() -> Overrides {
	OVERRIDES.lock().clone()
}

macro_rules! setter {
	($name:ident, $field:ident, $ty:ty) => {
		/// Process-wide override, effective only before `protect()` runs.
		pub fn $name(value: $ty) {
			if is_initialized() {
				warn!(
					setter = stringify!($name),
					"ignored: configuration is frozen after protect()"
				);
				return;
			}
			OVERRIDES.lock().$field = Some(value);
		}
	};
}

setter!(set_llm_mode, llm_mode, Mode);
setter!(set_mcp_mode, mcp_mode, Mode);
setter!(set_api_mode_llm_endpoint, api_mode_llm_endpoint, String);
setter!(set_api_mode_llm_api_key, api_mode_llm_api_key, String);
setter!(set_api_mode_mcp_endpoint, api_mode_mcp_endpoint, String);
setter!(set_api_mode_mcp_api_key, api_mode_mcp_api_key, String);

/// Serializes tests that mutate or depend on the process environment.
#[cfg(test)]
pub(crate) static ENV_TEST_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub(crate) fn env_string(names: &[&str]) -> Option<String> {
	names
		.iter()
		.find_map(|n| env::var(n).ok().filter(|v| !v.is_empty()))
}

pub(crate) fn env_bool(name: &str) -> Option<bool> {
	let raw = env::var(name).ok()?;
	match raw.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		other => {
			warn!(var = name, value = other, "unrecognized boolean, ignoring");
			None
		},
	}
}

pub(crate) fn env_mode(name: &str) -> Option<Mode> {
	let raw = env::var(name).ok()?;
	match Mode::parse(&raw) {
		Some(m) => Some(m),
		None => {
			warn!(var = name, value = %raw, "unrecognized mode, ignoring");
			None
		},
	}
}

pub(crate) fn env_integration_mode(name: &str) -> Option<IntegrationMode> {
	let raw = env::var(name).ok()?;
	match IntegrationMode::parse(&raw) {
		Some(m) => Some(m),
		None => {
			warn!(var = name, value = %raw, "unrecognized integration mode, ignoring");
			None
		},
	}
}
