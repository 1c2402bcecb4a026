//! HTTP traffic inspection client.
//!
//! Bodies are base64-encoded bytes on the wire: strings are UTF-8-encoded
//! first, absent bodies become the empty string, and anything else is a
//! validation error. A request object needs a valid method and a non-empty
//! body; a response object needs a status code and a non-empty body.

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::{ClientCore, Config, InspectOptions, parse_inspect_response};
use crate::client::VALID_HTTP_METHODS;
use crate::errors::Error;
use crate::inspection::models::{InspectResponse, InspectionConfig};

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;

const HTTP_INSPECT_PATH: &str = "/api/v1/inspect/http";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHdrKv {
	pub key: String,
	pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHdrObject {
	#[serde(rename = "hdrKvs", default)]
	pub hdr_kvs: Vec<HttpHdrKv>,
}

impl HttpHdrObject {
	fn from_map(headers: Option<&HashMap<String, String>>) -> Self {
		let mut hdr_kvs: Vec<HttpHdrKv> = headers
			.into_iter()
			.flatten()
			.map(|(key, value)| HttpHdrKv {
				key: key.clone(),
				value: value.clone(),
			})
			.collect();
		hdr_kvs.sort_by(|a, b| a.key.cmp(&b.key));
		HttpHdrObject { hdr_kvs }
	}
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpReqObject {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub method: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub headers: Option<HttpHdrObject>,
	/// Base64 of the body bytes.
	#[serde(default)]
	pub body: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResObject {
	#[serde(rename = "statusCode", default, skip_serializing_if = "Option::is_none")]
	pub status_code: Option<u16>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub headers: Option<HttpHdrObject>,
	/// Base64 of the body bytes.
	#[serde(default)]
	pub body: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpMetaObject {
	pub url: String,
}

pub fn to_base64_bytes(data: &[u8]) -> String {
	BASE64.encode(data)
}

pub fn from_base64_bytes(encoded: &str) -> Result<Vec<u8>, Error> {
	BASE64
		.decode(encoded)
		.map_err(|e| Error::Validation(format!("invalid base64 body: {e}")))
}

fn encode_body(body: Option<&[u8]>) -> String {
	match body {
		Some(bytes) if !bytes.is_empty() => to_base64_bytes(bytes),
		_ => String::new(),
	}
}

pub struct HttpInspectionClient {
	core: ClientCore,
	endpoint: String,
}

impl HttpInspectionClient {
	pub fn new(api_key: impl Into<String>, config: Option<Config>) -> Result<Self, Error> {
		let core = ClientCore::new(api_key, config.unwrap_or_default())?;
		let endpoint = core.endpoint(HTTP_INSPECT_PATH);
		Ok(HttpInspectionClient { core, endpoint })
	}

	/// Inspect an HTTP request given its parts.
	pub fn inspect_request(
		&self,
		method: &str,
		url: &str,
		headers: Option<&HashMap<String, String>>,
		body: Option<&[u8]>,
		options: &InspectOptions,
	) -> Result<InspectResponse, Error> {
		let body_value = self.build_request_body(method, url, headers, body, options)?;
		let response = self.post(body_value, options)?;
		parse_inspect_response(response)
	}

	pub async fn inspect_request_async(
		&self,
		method: &str,
		url: &str,
		headers: Option<&HashMap<String, String>>,
		body: Option<&[u8]>,
		options: &InspectOptions,
	) -> Result<InspectResponse, Error> {
		let body_value = self.build_request_body(method, url, headers, body, options)?;
		let response = self.post_async(body_value, options).await?;
		parse_inspect_response(response)
	}

	/// Inspect an HTTP response, optionally with its originating request as
	/// context.
	#[allow(clippy::too_many_arguments)]
	pub fn inspect_response(
		&self,
		status_code: u16,
		url: &str,
		headers: Option<&HashMap<String, String>>,
		body: Option<&[u8]>,
		request_method: Option<&str>,
		request_headers: Option<&HashMap<String, String>>,
		request_body: Option<&[u8]>,
		options: &InspectOptions,
	) -> Result<InspectResponse, Error> {
		let body_value = self.build_response_body(
			status_code,
			url,
			headers,
			body,
			request_method,
			request_headers,
			request_body,
			options,
		)?;
		let response = self.post(body_value, options)?;
		parse_inspect_response(response)
	}

	#[allow(clippy::too_many_arguments)]
	pub async fn inspect_response_async(
		&self,
		status_code: u16,
		url: &str,
		headers: Option<&HashMap<String, String>>,
		body: Option<&[u8]>,
		request_method: Option<&str>,
		request_headers: Option<&HashMap<String, String>>,
		request_body: Option<&[u8]>,
		options: &InspectOptions,
	) -> Result<InspectResponse, Error> {
		let body_value = self.build_response_body(
			status_code,
			url,
			headers,
			body,
			request_method,
			request_headers,
			request_body,
			options,
		)?;
		let response = self.post_async(body_value, options).await?;
		parse_inspect_response(response)
	}

	/// Direct interface over raw wire dicts for advanced callers. Body
	/// fields may be raw strings (they are encoded) or already base64.
	pub fn inspect_http_raw(
		&self,
		http_req: Option<Value>,
		http_res: Option<Value>,
		http_meta: Option<Value>,
		options: &InspectOptions,
	) -> Result<InspectResponse, Error> {
		let body_value = self.build_raw_body(http_req, http_res, http_meta, options)?;
		let response = self.post(body_value, options)?;
		parse_inspect_response(response)
	}

	pub async fn inspect_http_raw_async(
		&self,
		http_req: Option<Value>,
		http_res: Option<Value>,
		http_meta: Option<Value>,
		options: &InspectOptions,
	) -> Result<InspectResponse, Error> {
		let body_value = self.build_raw_body(http_req, http_res, http_meta, options)?;
		let response = self.post_async(body_value, options).await?;
		parse_inspect_response(response)
	}

	/// Release the async session.
	pub async fn close(&self) {
		self.core.close().await;
	}

	fn post(&self, body: Value, options: &InspectOptions) -> Result<Value, Error> {
		self
			.core
			.post(&self.endpoint, body, options.request_id.clone(), options.timeout)
	}

	async fn post_async(&self, body: Value, options: &InspectOptions) -> Result<Value, Error> {
		self
			.core
			.post_async(&self.endpoint, body, options.request_id.clone(), options.timeout)
			.await
	}

	fn build_request_body(
		&self,
		method: &str,
		url: &str,
		headers: Option<&HashMap<String, String>>,
		body: Option<&[u8]>,
		options: &InspectOptions,
	) -> Result<Value, Error> {
		let http_req = HttpReqObject {
			method: Some(method.to_string()),
			headers: Some(HttpHdrObject::from_map(headers)),
			body: encode_body(body),
		};
		let http_meta = HttpMetaObject {
			url: url.to_string(),
		};
		self.assemble(Some(http_req), None, Some(http_meta), options)
	}

	#[allow(clippy::too_many_arguments)]
	fn build_response_body(
		&self,
		status_code: u16,
		url: &str,
		headers: Option<&HashMap<String, String>>,
		body: Option<&[u8]>,
		request_method: Option<&str>,
		request_headers: Option<&HashMap<String, String>>,
		request_body: Option<&[u8]>,
		options: &InspectOptions,
	) -> Result<Value, Error> {
		let http_res = HttpResObject {
			status_code: Some(status_code),
			headers: Some(HttpHdrObject::from_map(headers)),
			body: encode_body(body),
		};
		let http_req = if request_method.is_some()
			|| request_headers.is_some()
			|| request_body.is_some()
		{
			Some(HttpReqObject {
				method: request_method.map(str::to_owned),
				headers: Some(HttpHdrObject::from_map(request_headers)),
				body: encode_body(request_body),
			})
		} else {
			None
		};
		let http_meta = HttpMetaObject {
			url: url.to_string(),
		};
		self.assemble(http_req, Some(http_res), Some(http_meta), options)
	}

	fn build_raw_body(
		&self,
		http_req: Option<Value>,
		http_res: Option<Value>,
		http_meta: Option<Value>,
		options: &InspectOptions,
	) -> Result<Value, Error> {
		let http_req = http_req.map(normalize_raw_body).transpose()?;
		let http_res = http_res.map(normalize_raw_body).transpose()?;

		let http_req = http_req
			.map(|v| {
				serde_json::from_value::<HttpReqObject>(v)
					.map_err(|e| Error::Validation(format!("'http_req' is malformed: {e}")))
			})
			.transpose()?;
		let http_res = http_res
			.map(|v| {
				serde_json::from_value::<HttpResObject>(v)
					.map_err(|e| Error::Validation(format!("'http_res' is malformed: {e}")))
			})
			.transpose()?;
		let http_meta = http_meta
			.map(|v| {
				serde_json::from_value::<HttpMetaObject>(v)
					.map_err(|e| Error::Validation(format!("'http_meta' is malformed: {e}")))
			})
			.transpose()?;

		self.assemble(http_req, http_res, http_meta, options)
	}

	/// Build and validate the final inspection payload.
	fn assemble(
		&self,
		http_req: Option<HttpReqObject>,
		http_res: Option<HttpResObject>,
		http_meta: Option<HttpMetaObject>,
		options: &InspectOptions,
	) -> Result<Value, Error> {
		let Some(http_req) = http_req else {
			return Err(Error::Validation("'http_req' must be provided".into()));
		};
		validate_request_object(&http_req)?;
		if let Some(http_res) = &http_res {
			validate_response_object(http_res)?;
		}

		let config = match &options.config {
			Some(config) if !config.enabled_rules.is_empty() => config.clone(),
			Some(config) => InspectionConfig {
				enabled_rules: self.core.default_enabled_rules.clone(),
				..config.clone()
			},
			None => InspectionConfig {
				enabled_rules: self.core.default_enabled_rules.clone(),
				..InspectionConfig::default()
			},
		};

		debug!(
			has_response = http_res.is_some(),
			"HTTP inspection request"
		);
		let mut body = json!({
			"http_req": http_req,
			"config": config,
		});
		if let Some(http_res) = http_res {
			body["http_res"] = serde_json::to_value(http_res).expect("serializable");
		}
		if let Some(http_meta) = http_meta {
			body["http_meta"] = serde_json::to_value(http_meta).expect("serializable");
		}
		if let Some(metadata) = &options.metadata {
			body["metadata"] = serde_json::to_value(metadata)
				.map_err(|e| Error::Validation(format!("metadata is not serializable: {e}")))?;
		}
		Ok(body)
	}
}

/// Raw-dict path: a string body that is not valid base64 is treated as raw
/// text and encoded; a null body becomes the empty string; any other type
/// is rejected.
fn normalize_raw_body(mut object: Value) -> Result<Value, Error> {
	let Some(map) = object.as_object_mut() else {
		return Err(Error::Validation("HTTP object must be a JSON object".into()));
	};
	let normalized = match map.get("body") {
		None | Some(Value::Null) => Some(String::new()),
		Some(Value::String(body)) => {
			if BASE64.decode(body).is_err() {
				Some(to_base64_bytes(body.as_bytes()))
			} else {
				None
			}
		},
		Some(_) => {
			return Err(Error::Validation(
				"HTTP body must be bytes, str, or base64-encoded string".into(),
			));
		},
	};
	if let Some(body) = normalized {
		map.insert("body".into(), Value::String(body));
	}
	Ok(object)
}

fn validate_request_object(http_req: &HttpReqObject) -> Result<(), Error> {
	if http_req.body.is_empty() {
		return Err(Error::Validation(
			"'http_req' must have a non-empty 'body'".into(),
		));
	}
	let Some(method) = &http_req.method else {
		return Err(Error::Validation("'http_req' must have a 'method'".into()));
	};
	// Case-sensitive: the service contract only knows the uppercase verbs.
	if !VALID_HTTP_METHODS.contains(&method.as_str()) {
		return Err(Error::Validation(format!(
			"'http_req' must have a valid 'method' (one of {VALID_HTTP_METHODS:?})"
		)));
	}
	Ok(())
}

fn validate_response_object(http_res: &HttpResObject) -> Result<(), Error> {
	if http_res.status_code.is_none() {
		return Err(Error::Validation(
			"'http_res' must have a 'statusCode'".into(),
		));
	}
	if http_res.body.is_empty() {
		return Err(Error::Validation(
			"'http_res' must have a non-empty 'body'".into(),
		));
	}
	Ok(())
}
