//! Runtime security interception for AI agents.
//!
//! `agentsec` sits between an agent and the services it calls — LLM
//! providers and MCP tool servers — and decides, synchronously, whether each
//! call may proceed, must be blocked, or needs sanitization, by consulting
//! the Cisco AI Defense inspection service. Decisions can be enforced or
//! merely recorded, and inspection can run out-of-band (API mode) or by
//! routing the call itself through a policy-enforcing gateway.
//!
//! Typical setup:
//!
//! ```no_run
//! use agentsec::{protect, ProtectOptions};
//!
//! // Resolve configuration (arguments > setters > environment > defaults)
//! // and register every supported provider. Safe to call more than once.
//! let outcome = protect(ProtectOptions::default());
//! println!("protected: {:?}", outcome.patched);
//! ```
//!
//! Provider clients are then wrapped once and called through their guard:
//! [`patch::bedrock::BedrockGuard`], [`patch::openai::OpenAiGuard`],
//! [`patch::vertex::VertexGuard`], [`patch::mcp::McpGuard`].
//!
//! Applications that want a verdict without wrapping a client use the
//! direct inspection clients: [`inspection::ChatInspectionClient`] and
//! [`inspection::HttpInspectionClient`].

pub mod client;
pub mod context;
pub mod decision;
pub mod errors;
pub mod gateway;
pub mod inspect;
pub mod inspection;
pub mod patch;
mod protect;
pub mod state;
pub mod types;

pub use context::{
	CallContext, get_context, set_context, skip_llm_guard, skip_mcp_guard,
};
pub use decision::{Action, Decision};
pub use errors::Error;
pub use protect::{ProtectOptions, ProtectOutcome, protect};
pub use state::{IntegrationMode, Mode, RuntimeState};
