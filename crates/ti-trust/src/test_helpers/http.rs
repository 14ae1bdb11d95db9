//! In-memory HTTP transport for tests. Serves registered bodies for GET and
//! registered OCSP responses for POST, counting every access.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;

use crate::client::{HttpClient, HttpError, HttpResponse};

#[derive(Default)]
struct State {
	get_bodies: HashMap<String, Vec<u8>>,
	post_bodies: HashMap<String, Vec<u8>>,
	get_counts: HashMap<String, usize>,
	post_counts: HashMap<String, usize>,
}

#[derive(Default)]
pub struct InMemoryHttpClient {
	state: Mutex<State>,
}

impl InMemoryHttpClient {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_get_body(&self, url: &str, body: impl Into<Vec<u8>>) {
		self.state
			.lock()
			.get_bodies
			.insert(url.to_string(), body.into());
	}

	pub fn remove_get_body(&self, url: &str) {
		self.state.lock().get_bodies.remove(url);
	}

	/// Registers the OCSP response POSTed back for a responder URL.
	pub fn set_ocsp_response(&self, url: &str, response: impl Into<Vec<u8>>) {
		self.state
			.lock()
			.post_bodies
			.insert(url.to_string(), response.into());
	}

	pub fn remove_ocsp_response(&self, url: &str) {
		self.state.lock().post_bodies.remove(url);
	}

	pub fn get_count(&self, url: &str) -> usize {
		self.state.lock().get_counts.get(url).copied().unwrap_or(0)
	}

	pub fn post_count(&self, url: &str) -> usize {
		self.state.lock().post_counts.get(url).copied().unwrap_or(0)
	}
}

#[async_trait::async_trait]
impl HttpClient for InMemoryHttpClient {
	async fn get(&self, url: &str, _ciphers: Option<&str>) -> Result<HttpResponse, HttpError> {
		let mut state = self.state.lock();
		*state.get_counts.entry(url.to_string()).or_default() += 1;
		match state.get_bodies.get(url) {
			Some(body) => Ok(HttpResponse {
				status: 200,
				body: body.clone(),
				received_at: Utc::now(),
			}),
			None => Ok(HttpResponse {
				status: 404,
				body: Vec::new(),
				received_at: Utc::now(),
			}),
		}
	}

	async fn post(
		&self,
		url: &str,
		_content_type: &str,
		_body: Vec<u8>,
	) -> Result<HttpResponse, HttpError> {
		let mut state = self.state.lock();
		*state.post_counts.entry(url.to_string()).or_default() += 1;
		match state.post_bodies.get(url) {
			Some(body) => Ok(HttpResponse {
				status: 200,
				body: body.clone(),
				received_at: Utc::now(),
			}),
			None => Ok(HttpResponse {
				status: 404,
				body: Vec::new(),
				received_at: Utc::now(),
			}),
		}
	}
}
