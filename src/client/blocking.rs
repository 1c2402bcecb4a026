//! Synchronous variant of the shared HTTP client, for thread-parallel
//! callers. Same request contract and retry semantics as the async client.

use std::time::Duration;

use once_cell::sync::OnceCell;
use tracing::debug;

use super::{ApiRequest, HttpConfig, Prepared, map_error_response, parse_retry_after, prepare};
use crate::errors::Error;

#[derive(Debug)]
pub struct BlockingHttpClient {
	config: HttpConfig,
	session: OnceCell<reqwest::blocking::Client>,
}

impl BlockingHttpClient {
	pub fn new(config: HttpConfig) -> Self {
		BlockingHttpClient {
			config,
			session: OnceCell::new(),
		}
	}

	pub fn config(&self) -> &HttpConfig {
		&self.config
	}

	/// The pooled session, built on first use. Concurrent first-users block
	/// on the cell's internal lock and receive the same pool.
	fn session(&self) -> Result<&reqwest::blocking::Client, Error> {
		self.session.get_or_try_init(|| {
			reqwest::blocking::Client::builder()
				.timeout(self.config.timeout)
				.pool_max_idle_per_host(self.config.pool_max_idle_per_host)
				.build()
				.map_err(Error::from)
		})
	}

	pub fn request(&self, req: ApiRequest) -> Result<serde_json::Value, Error> {
		let prepared = prepare(&req)?;
		let client = self.session()?;
		let policy = &self.config.retry;
		let mut attempt: u32 = 0;
		loop {
			attempt += 1;
			match self.send_once(client, &req, &prepared) {
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
					std::thread::sleep(delay);
				},
			}
		}
	}

	fn send_once(
		&self,
		client: &reqwest::blocking::Client,
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
		let response = builder.send().map_err(|e| (Error::from(e), None))?;
		let status = response.status().as_u16();
		if status >= 400 {
			let retry_after = parse_retry_after(response.headers());
			let body = response.text().unwrap_or_default();
			return Err((
				map_error_response(status, &body, &prepared.request_id),
				retry_after,
			));
		}
		let raw = response.text().map_err(|e| (Error::from(e), None))?;
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
