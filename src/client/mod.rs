//! Pooled HTTP plumbing shared by the inspection clients.
//!
//! Two variants ride one configuration object: [`HttpClient`] for
//! cooperative-async callers and [`blocking::BlockingHttpClient`] for
//! thread-parallel callers. Both attach the SDK headers to every request,
//! map response statuses onto the error taxonomy, and apply the retry
//! policy. Sessions are built lazily so concurrent first-users share one
//! connection pool.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tracing::{debug, error};
use url::Url;

use crate::errors::Error;

pub mod blocking;


pub const REQUEST_ID_HEADER: &str = "x-aidefense-request-id";
pub const API_KEY_HEADER: &str = "X-Cisco-AI-Defense-API-Key";

pub const VALID_HTTP_METHODS: [&str; 7] =
	["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

pub fn user_agent() -> String {
	format!("Cisco-AI-Defense-Rust-SDK/{}", env!("CARGO_PKG_VERSION"))
}

/// Retry behavior for the shared clients. Only connection/timeout failures
/// and statuses in the forcelist are retried; validation and authentication
/// failures never are.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
	/// Maximum number of retries after the initial attempt.
	pub total: u32,
	pub backoff_factor: f64,
	pub status_forcelist: Vec<u16>,
	pub respect_retry_after_header: bool,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		RetryPolicy {
			total: 3,
			backoff_factor: 0.5,
			status_forcelist: vec![429, 500, 502, 503, 504],
			respect_retry_after_header: true,
		}
	}
}

impl RetryPolicy {
	pub fn backoff_delay(&self, attempt: u32) -> Duration {
		let exp = attempt.saturating_sub(1).min(16);
		Duration::from_secs_f64(self.backoff_factor * f64::from(1u32 << exp))
	}
}

#[derive(Clone, Debug)]
pub struct HttpConfig {
	pub timeout: Duration,
	pub retry: RetryPolicy,
	pub pool_max_idle_per_host: usize,
}

impl Default for HttpConfig {
	fn default() -> Self {
		HttpConfig {
			timeout: Duration::from_secs(30),
			retry: RetryPolicy::default(),
			pool_max_idle_per_host: 20,
		}
	}
}

#[derive(Clone, Debug)]
pub enum Auth {
	ApiKey(String),
	Bearer(String),
}

impl Auth {
	fn header(&self) -> (String, String) {
		match self {
			Auth::ApiKey(key) => (API_KEY_HEADER.to_string(), key.clone()),
			Auth::Bearer(token) => ("Authorization".to_string(), format!("Bearer {token}")),
		}
	}
}

/// One logical request against the inspection service; both client variants
/// accept the same shape.
#[derive(Clone, Debug)]
pub struct ApiRequest {
	pub method: String,
	pub url: String,
	pub auth: Option<Auth>,
	pub headers: Vec<(String, String)>,
	pub json: Option<serde_json::Value>,
	pub params: Vec<(String, String)>,
	pub timeout: Option<Duration>,
	pub request_id: Option<String>,
}

impl ApiRequest {
	pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
		ApiRequest {
			method: method.into(),
			url: url.into(),
			auth: None,
			headers: Vec::new(),
			json: None,
			params: Vec::new(),
			timeout: None,
			request_id: None,
		}
	}

	pub fn post(url: impl Into<String>) -> Self {
		ApiRequest::new("POST", url)
	}

	pub fn auth(mut self, auth: Auth) -> Self {
		self.auth = Some(auth);
		self
	}

	pub fn json(mut self, body: serde_json::Value) -> Self {
		self.json = Some(body);
		self
	}

	pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((key.into(), value.into()));
		self
	}

	pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.params.push((key.into(), value.into()));
		self
	}

	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
		self.request_id = Some(request_id.into());
		self
	}
}

pub(crate) struct Prepared {
	pub method: reqwest::Method,
	pub url: Url,
	pub headers: Vec<(String, String)>,
	pub request_id: String,
}

/// Validate the request and resolve the effective header set.
pub(crate) fn prepare(req: &ApiRequest) -> Result<Prepared, Error> {
	let method = req.method.to_ascii_uppercase();
	if !VALID_HTTP_METHODS.contains(&method.as_str()) {
		return Err(Error::Validation(format!(
			"invalid HTTP method: {}",
			req.method
		)));
	}
	let method = reqwest::Method::from_bytes(method.as_bytes())
		.map_err(|_| Error::Validation(format!("invalid HTTP method: {}", req.method)))?;

	let url = Url::parse(&req.url).map_err(|e| Error::Validation(format!("invalid URL: {e}")))?;
	if !matches!(url.scheme(), "http" | "https") {
		return Err(Error::Validation(format!(
			"invalid URL scheme: {}",
			url.scheme()
		)));
	}

	let request_id = req
		.request_id
		.clone()
		.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

	let mut headers = vec![
		("User-Agent".to_string(), user_agent()),
		("Content-Type".to_string(), "application/json".to_string()),
		("Accept".to_string(), "application/json".to_string()),
		(REQUEST_ID_HEADER.to_string(), request_id.clone()),
	];
	if let Some(auth) = &req.auth {
		headers.push(auth.header());
	}
	headers.extend(req.headers.iter().cloned());

	Ok(Prepared {
		method,
		url,
		headers,
		request_id,
	})
}

/// Map an HTTP error status onto the taxonomy. The body is parsed as
/// `{message}` with a free-text fallback.
pub(crate) fn map_error_response(status: u16, body: &str, request_id: &str) -> Error {
	let message = serde_json::from_str::<serde_json::Value>(body)
		.ok()
		.and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_owned))
		.unwrap_or_else(|| {
			if body.is_empty() {
				"Unknown error".to_string()
			} else {
				body.to_string()
			}
		});
	match status {
		401 => {
			error!(request_id, "authentication error: {message}");
			Error::Authentication(message)
		},
		400 => Error::Validation(format!("Bad request: {message}")),
		_ => Error::Api {
			status: Some(status),
			message: format!("API error {status}: {message}"),
			request_id: Some(request_id.to_string()),
		},
	}
}

pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
	headers
		.get(reqwest::header::RETRY_AFTER)
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.trim().parse::<u64>().ok())
		.map(Duration::from_secs)
}

/// Cooperative-async client. The session is created lazily under an
/// async-aware mutex with a double-checked guard so concurrent first-users
/// share one pool; `close` drops only the pool this client owns.
#[derive(Debug)]
pub struct HttpClient {
	config: HttpConfig,
	session: ArcSwapOption<reqwest::Client>,
	init: tokio::sync::Mutex<()>,
}

impl HttpClient {
	pub fn new(config: HttpConfig) -> Self {
		HttpClient {
			config,
			session: ArcSwapOption::empty(),
			init: tokio::sync::Mutex::new(()),
		}
	}

	pub fn config(&self) -> &HttpConfig {
		&self.config
	}

	async fn session(&self) -> Result<Arc<reqwest::Client>, Error> {
		if let Some(client) = self.session.load_full() {
			return Ok(client);
		}
		let _guard = self.init.lock().await;
		if let Some(client) = self.session.load_full() {
			return Ok(client);
		}
		let client = reqwest::Client::builder()
			.timeout(self.config.timeout)
			.pool_max_idle_per_host(self.config.pool_max_idle_per_host)
			.build()
			.map_err(Error::from)?;
		let client = Arc::new(client);
		self.session.store(Some(client.clone()));
		Ok(client)
	}

	pub async fn close(&self) {
		self.session.store(None);
	}

	/// Issue one logical request, applying the retry policy. Returns the
	/// JSON-decoded response body.
	pub async fn request(&self, req: ApiRequest) -> Result<serde_json::Value, Error> {
		let prepared = prepare(&req)?;
		let client = self.session().await?;
		let policy = &self.config.retry;
		let mut attempt: u32 = 0;
		loop {
			attempt += 1;
			match self.send_once(&client, &req, &prepared).await {
				Ok(value) => return Ok(value),
				Err((err, retry_after)) => {
					if !err.is_retryable(&policy.status_forcelist) || attempt > policy.total {
						return Err(err);
					}
					let delay = retry_after
						.filter(|_| policy.respect_retry_after_header)
						.unwrap_or_else(|| policy.backoff_delay(attempt));
					debug!(
						attempt,
						delay_ms = delay.as_millis() as u64,
						"retrying request: {err}"
					);
					tokio::time::sleep(delay).await;
				},
			}
		}
	}

	async fn send_once(
		&self,
		client: &reqwest::Client,
		req: &ApiRequest,
		prepared: &Prepared,
	) -> Result<serde_json::Value, (Error, Option<Duration>)> {
		let mut builder = client.request(prepared.method.clone(), prepared.url.clone());
		for (key, value) in &prepared.headers {
			builder = builder.header(key, value);
		}
		if !req.params.is_empty() {
			builder = builder.query(&req.params);
		}
		if let Some(json) = &req.json {
			builder = builder.json(json);
		}
		if let Some(timeout) = req.timeout {
			builder = builder.timeout(timeout);
		}
		let response = builder.send().await.map_err(|e| (Error::from(e), None))?;
		let status = response.status().as_u16();
		if status >= 400 {
			let retry_after = parse_retry_after(response.headers());
			let body = response.text().await.unwrap_or_default();
			return Err((
				map_error_response(status, &body, &prepared.request_id),
				retry_after,
			));
		}
		let raw = response
			.text()
			.await
			.map_err(|e| (Error::from(e), None))?;
		serde_json::from_str(&raw).map_err(|e| {
			(
				Error::ResponseParse {
					message: e.to_string(),
					raw: serde_json::Value::String(raw),
				},
				None,
			)
		})
	}
}
