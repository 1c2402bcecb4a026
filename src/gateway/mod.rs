//! Gateway-mode integration: the provider call itself travels through the
//! AI Defense Gateway, which enforces policy and proxies to the upstream.

pub mod llm;
pub mod mcp;

pub use llm::LlmGateway;
pub use mcp::McpGateway;
