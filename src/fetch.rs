use std::time::Duration;

use reqwest::{
	header::{HeaderMap, HeaderName},
	Client,
};
use serde_json::Value;
use tracing::warn;

use crate::error::ResolveError;

pub(crate) const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.3";

/// Thin wrapper over `reqwest` that keeps transport failures distinct from
/// non-2xx responses, since only the former are worth retrying.
#[derive(Clone)]
pub struct HttpClient {
	client: Client,
}

impl HttpClient {
	pub fn new(timeout: Duration) -> Result<Self, ResolveError> {
		let client = Client::builder()
			.user_agent(DESKTOP_USER_AGENT)
			.timeout(timeout)
			.use_rustls_tls()
			.build()
			.map_err(transport)?;
		Ok(Self { client })
	}

	pub(crate) fn with_default_headers(
		timeout: Duration,
		headers: HeaderMap,
	) -> Result<Self, ResolveError> {
		let client = Client::builder()
			.user_agent(DESKTOP_USER_AGENT)
			.default_headers(headers)
			.timeout(timeout)
			.use_rustls_tls()
			.build()
			.map_err(transport)?;
		Ok(Self { client })
	}

	pub async fn get_text(
		&self,
		url: &str,
		headers: &[(HeaderName, &str)],
	) -> Result<String, ResolveError> {
		let response = self.request(url, headers).await?;
		response.text().await.map_err(transport)
	}

	pub async fn get_json(
		&self,
		url: &str,
		headers: &[(HeaderName, &str)],
	) -> Result<Value, ResolveError> {
		let response = self.request(url, headers).await?;
		response.json().await.map_err(transport)
	}

	async fn request(
		&self,
		url: &str,
		headers: &[(HeaderName, &str)],
	) -> Result<reqwest::Response, ResolveError> {
		let mut request = self.client.get(url);
		for (name, value) in headers {
			request = request.header(name.clone(), *value);
		}

		let response = request.send().await.map_err(transport)?;
		let status = response.status();
		if !status.is_success() {
			warn!(%url, status = status.as_u16(), "upstream returned a non-success status");
			return Err(ResolveError::UpstreamStatus(status.as_u16()));
		}
		Ok(response)
	}
}

fn transport(err: reqwest::Error) -> ResolveError {
	ResolveError::Transport(err.to_string())
}
