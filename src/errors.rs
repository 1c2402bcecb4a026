use crate::decision::Decision;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure categories a caller must be able to distinguish.
///
/// `Validation` and `Authentication` always surface and never retry. `Api`
/// covers HTTP failures from the inspection service as well as network
/// failures and timeouts; only 5xx statuses in the configured forcelist are
/// retried. `SecurityPolicy` carries the `Decision` that triggered it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("validation error: {0}")]
	Validation(String),

	#[error("authentication error: {0}")]
	Authentication(String),

	#[error("API error: {message}")]
	Api {
		/// HTTP status, absent for connection and timeout failures.
		status: Option<u16>,
		message: String,
		request_id: Option<String>,
	},

	#[error("security policy violation: {message}")]
	SecurityPolicy { decision: Decision, message: String },

	#[error("failed to parse response: {message}")]
	ResponseParse {
		message: String,
		raw: serde_json::Value,
	},

	/// A failure raised by the wrapped provider client during delegation.
	/// Guards forward these unchanged; the interception layer never invents
	/// provider errors.
	#[error("provider error: {0}")]
	Provider(#[source] BoxError),
}

impl Error {
	pub fn security_policy(decision: Decision) -> Self {
		let message = if decision.reasons.is_empty() {
			decision.action.to_string()
		} else {
			decision.reasons.join("; ")
		};
		Error::SecurityPolicy { decision, message }
	}

	pub fn security_policy_with(decision: Decision, message: impl Into<String>) -> Self {
		Error::SecurityPolicy {
			decision,
			message: message.into(),
		}
	}

	pub fn provider(err: impl Into<BoxError>) -> Self {
		Error::Provider(err.into())
	}

	/// Short tag used when a decision reason embeds the error category.
	pub fn kind_name(&self) -> &'static str {
		match self {
			Error::Validation(_) => "ValidationError",
			Error::Authentication(_) => "AuthenticationError",
			Error::Api { status: Some(_), .. } => "ApiError",
			Error::Api { status: None, .. } => "ConnectionError",
			Error::SecurityPolicy { .. } => "SecurityPolicyError",
			Error::ResponseParse { .. } => "ResponseParseError",
			Error::Provider(_) => "ProviderError",
		}
	}

	pub fn decision(&self) -> Option<&Decision> {
		match self {
			Error::SecurityPolicy { decision, .. } => Some(decision),
			_ => None,
		}
	}

	/// Whether the retry policy may re-issue the request that failed with
	/// this error. Connection and timeout failures are always retryable;
	/// HTTP statuses only when listed in the forcelist.
	pub fn is_retryable(&self, status_forcelist: &[u16]) -> bool {
		match self {
			Error::Api { status: None, .. } => true,
			Error::Api {
				status: Some(status),
				..
			} => status_forcelist.contains(status),
			_ => false,
		}
	}
}

impl From<reqwest::Error> for Error {
	fn from(e: reqwest::Error) -> Self {
		Error::Api {
			status: e.status().map(|s| s.as_u16()),
			message: e.to_string(),
			request_id: None,
		}
	}
}
