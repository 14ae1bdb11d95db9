use std::time::Duration;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, thiserror::Error)]
pub enum HttpError {
	#[error("transport error for {url}: {message}")]
	Transport { url: String, message: String },
	#[error("invalid url {0}")]
	InvalidUrl(String),
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
	pub status: u16,
	pub body: Vec<u8>,
	pub received_at: DateTime<Utc>,
}

impl HttpResponse {
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	pub fn body_string(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}
}

/// Blocking-free HTTPS transport seam. The engine never owns sockets itself;
/// everything network-shaped goes through this trait so tests can substitute
/// an in-memory implementation.
#[async_trait::async_trait]
pub trait HttpClient: Send + Sync {
	/// GET the given URL. `ciphers` optionally forces a TLS cipher list,
	/// transports that cannot honor it may ignore it.
	async fn get(&self, url: &str, ciphers: Option<&str>) -> Result<HttpResponse, HttpError>;

	/// POST a body, used for OCSP requests (RFC 6960 appendix A).
	async fn post(
		&self,
		url: &str,
		content_type: &str,
		body: Vec<u8>,
	) -> Result<HttpResponse, HttpError>;
}

/// Production transport on top of reqwest/rustls.
pub struct ReqwestClient {
	client: reqwest::Client,
}

impl ReqwestClient {
	pub fn new(connect_timeout: Duration) -> anyhow::Result<Self> {
		let client = reqwest::Client::builder()
			.connect_timeout(connect_timeout)
			.build()?;
		Ok(Self { client })
	}
}

#[async_trait::async_trait]
impl HttpClient for ReqwestClient {
	async fn get(&self, url: &str, ciphers: Option<&str>) -> Result<HttpResponse, HttpError> {
		if let Some(ciphers) = ciphers {
			// rustls negotiates its own cipher set; the forced list is a
			// deployment knob for openssl-based transports only.
			tracing::debug!(%url, ciphers, "ignoring forced cipher list on rustls transport");
		}
		let response = self
			.client
			.get(url)
			.send()
			.await
			.map_err(|e| HttpError::Transport {
				url: url.to_string(),
				message: e.to_string(),
			})?;
		let status = response.status().as_u16();
		let body = response
			.bytes()
			.await
			.map_err(|e| HttpError::Transport {
				url: url.to_string(),
				message: e.to_string(),
			})?
			.to_vec();
		Ok(HttpResponse {
			status,
			body,
			received_at: Utc::now(),
		})
	}

	async fn post(
		&self,
		url: &str,
		content_type: &str,
		body: Vec<u8>,
	) -> Result<HttpResponse, HttpError> {
		let response = self
			.client
			.post(url)
			.header(reqwest::header::CONTENT_TYPE, content_type)
			.body(body)
			.send()
			.await
			.map_err(|e| HttpError::Transport {
				url: url.to_string(),
				message: e.to_string(),
			})?;
		let status = response.status().as_u16();
		let body = response
			.bytes()
			.await
			.map_err(|e| HttpError::Transport {
				url: url.to_string(),
				message: e.to_string(),
			})?
			.to_vec();
		Ok(HttpResponse {
			status,
			body,
			received_at: Utc::now(),
		})
	}
}
