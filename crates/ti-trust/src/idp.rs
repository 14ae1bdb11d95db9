//! Periodic updater for the identity-provider signer certificate. Piggybacks
//! on trust-store refreshes via a post-update hook and additionally runs on
//! its own timer; disables the published certificate after prolonged
//! staleness.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::client::HttpClient;
use crate::config::Config;
use crate::crypto::{Certificate, CertificateType};
use crate::error::{TslError, TslErrorCode, TslResult};
use crate::timer::{NOT_A_JOB, Timer, TimerToken};
use crate::tsl::TslMode;
use crate::tsl::manager::TslManager;
use crate::tsl::ocsp::{OcspCheckDescriptor, OcspCheckMode};

/// Published IDP signer certificate. Downstream JWT verification loads the
/// current value; `reset` removes it so token checks fail closed.
#[derive(Default)]
pub struct IdpCertificateHolder {
	certificate: ArcSwapOption<Certificate>,
}

impl IdpCertificateHolder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_certificate(&self, certificate: Certificate) {
		self.certificate.store(Some(Arc::new(certificate)));
	}

	pub fn reset_certificate(&self) {
		self.certificate.store(None);
	}

	pub fn certificate(&self) -> Option<Arc<Certificate>> {
		self.certificate.load_full()
	}

	pub fn is_healthy(&self) -> bool {
		self.certificate.load().is_some()
	}
}

/// Outcome taxonomy reported to logs and metrics, never to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
	Success,
	WellknownDownloadFailed,
	DiscoveryDownloadFailed,
	VerificationFailed,
	UnknownFailure,
}

impl UpdateStatus {
	fn message(&self) -> &'static str {
		match self {
			UpdateStatus::Success => {
				"IDP signer certificate successfully updated and verified"
			},
			UpdateStatus::WellknownDownloadFailed => {
				"download or parsing of IDP openid configuration failed"
			},
			UpdateStatus::DiscoveryDownloadFailed => {
				"download or parsing of IDP discovery document failed"
			},
			UpdateStatus::VerificationFailed => {
				"verification of IDP signer certificate failed"
			},
			UpdateStatus::UnknownFailure => "unknown IDP update failure",
		}
	}
}

pub struct IdpCertUpdater {
	holder: Arc<IdpCertificateHolder>,
	manager: Arc<TslManager>,
	client: Arc<dyn HttpClient>,
	timer: Arc<dyn Timer>,
	config: Arc<Config>,
	update_active: AtomicBool,
	update_failure_count: AtomicU64,
	last_successful_update: Mutex<Option<DateTime<Utc>>>,
	timer_token: Mutex<TimerToken>,
	update_hook_id: Mutex<Option<usize>>,
}

impl IdpCertUpdater {
	/// Creates the updater, runs the first update immediately, registers the
	/// trust-store post-update hook and starts the timer chain.
	pub async fn start(
		holder: Arc<IdpCertificateHolder>,
		manager: Arc<TslManager>,
		client: Arc<dyn HttpClient>,
		timer: Arc<dyn Timer>,
		config: Arc<Config>,
	) -> TslResult<Arc<Self>> {
		if !config
			.idp
			.update_endpoint
			.to_lowercase()
			.starts_with("https://")
		{
			return Err(TslError::unknown("IDP update URL must use https://"));
		}

		let updater = Arc::new(Self {
			holder,
			manager: manager.clone(),
			client,
			timer,
			config,
			update_active: AtomicBool::new(false),
			update_failure_count: AtomicU64::new(0),
			last_successful_update: Mutex::new(None),
			timer_token: Mutex::new(NOT_A_JOB),
			update_hook_id: Mutex::new(None),
		});

		updater.update().await;
		updater.schedule_next_update();

		// a trust store refresh also refreshes the IDP certificate; the hook
		// only holds a weak reference so the manager does not keep the
		// updater alive
		let weak = Arc::downgrade(&updater);
		let hook_id = manager.add_post_update_hook(Box::new(move || {
			if let Some(updater) = weak.upgrade() {
				tokio::spawn(async move {
					updater.update().await;
				});
			}
		}));
		*updater.update_hook_id.lock() = Some(hook_id);

		Ok(updater)
	}

	/// One update attempt. Guarded against re-entrancy: a trust-store
	/// post-update hook firing during an IDP update must not recurse.
	pub async fn update(&self) {
		if self.update_active.swap(true, Ordering::SeqCst) {
			return;
		}
		let outcome = self.fetch_and_publish().await;
		match outcome {
			Ok(()) => self.report_update_status(UpdateStatus::Success, ""),
			Err((status, details)) => self.report_update_status(status, &details),
		}
		self.update_active.store(false, Ordering::SeqCst);
	}

	async fn fetch_and_publish(&self) -> Result<(), (UpdateStatus, String)> {
		let discovery_url = self
			.download_and_parse_wellknown()
			.await
			.map_err(|e| (UpdateStatus::WellknownDownloadFailed, e))?;
		let certificate = self
			.download_and_parse_discovery(&discovery_url)
			.await
			.map_err(|e| (UpdateStatus::DiscoveryDownloadFailed, e))?;
		self.verify_certificate(&certificate)
			.await
			.map_err(|e| (UpdateStatus::VerificationFailed, e))?;
		self.holder.set_certificate(certificate);
		Ok(())
	}

	/// GET the openid-configuration, a JWS in compact serialization whose
	/// payload carries the `uri_puk_idp_sig` claim. The signature is not
	/// checked here; trust comes from the certificate verification below.
	async fn download_and_parse_wellknown(&self) -> Result<String, String> {
		let body = self
			.get_body(&self.config.idp.update_endpoint)
			.await
			.map_err(|e| e.to_string())?;
		let payload = jws_payload(&body)?;
		let claims: serde_json::Value =
			serde_json::from_slice(&payload).map_err(|e| format!("invalid JWS payload: {e}"))?;
		claims
			.get("uri_puk_idp_sig")
			.and_then(|v| v.as_str())
			.map(str::to_string)
			.ok_or_else(|| "signature URI missing".to_string())
	}

	/// GET the JWK (RFC 7517) and extract the single `x5c` certificate.
	async fn download_and_parse_discovery(&self, url: &str) -> Result<Certificate, String> {
		let body = self.get_body(url).await.map_err(|e| e.to_string())?;
		let jwk: serde_json::Value =
			serde_json::from_slice(body.as_bytes()).map_err(|e| format!("invalid JWK: {e}"))?;
		let x5c = jwk
			.get("x5c")
			.and_then(|v| v.as_array())
			.ok_or_else(|| "IDP JWK does not have an x5c entry".to_string())?;
		let mut certificates = Vec::new();
		for value in x5c {
			let der_b64 = value
				.as_str()
				.ok_or_else(|| "certificate value is not a string".to_string())?;
			certificates.push(
				Certificate::from_base64_der(der_b64)
					.map_err(|e| format!("cannot read IDP certificate: {e}"))?,
			);
		}
		if certificates.len() != 1 {
			return Err(format!(
				"expected exactly one IDP signer certificate, got {}",
				certificates.len()
			));
		}
		Ok(certificates.remove(0))
	}

	async fn verify_certificate(&self, certificate: &Certificate) -> Result<(), String> {
		let descriptor = OcspCheckDescriptor::new(
			OcspCheckMode::ProvidedOrCache,
			self.config.ocsp_grace_period(),
		);
		self.manager
			.verify_certificate(
				TslMode::Tsl,
				certificate,
				&[CertificateType::C_FD_SIG],
				&descriptor,
			)
			.await
			.map_err(|e| e.to_string())?;
		if !certificate.check_validity_period(None) {
			return Err("invalid IDP certificate".to_string());
		}
		Ok(())
	}

	async fn get_body(&self, url: &str) -> TslResult<String> {
		let response = self
			.client
			.get(url, None)
			.await
			.map_err(|e| TslError::new(TslErrorCode::CertReadError, e.to_string()))?;
		if !response.is_success() {
			return Err(TslError::new(
				TslErrorCode::CertReadError,
				format!("GET {url} answered with status {}", response.status),
			));
		}
		Ok(response.body_string())
	}

	fn report_update_status(&self, status: UpdateStatus, details: &str) {
		if status == UpdateStatus::Success {
			let failed_retries = self.update_failure_count.swap(0, Ordering::SeqCst);
			*self.last_successful_update.lock() = Some(Utc::now());
			tracing::info!(failed_retries, "{}", status.message());
			return;
		}

		let failed_retries = self.update_failure_count.fetch_add(1, Ordering::SeqCst) + 1;
		tracing::warn!(failed_retries, details, "{}", status.message());

		let max_age = chrono::Duration::from_std(self.config.idp_certificate_max_age())
			.unwrap_or_else(|_| chrono::Duration::zero());
		let stale = match *self.last_successful_update.lock() {
			Some(last) => Utc::now() - last >= max_age,
			None => true,
		};
		if stale {
			tracing::error!(
				max_age_hours = self.config.idp.certificate_max_age_hours,
				"disabling IDP signer certificate, last successful update is too old"
			);
			self.holder.reset_certificate();
		}
	}

	/// Re-arms the one-shot timer. A healthy holder re-fires on the regular
	/// interval, an unhealthy one retries aggressively.
	pub fn schedule_next_update(self: &Arc<Self>) {
		let delay = if self.holder.is_healthy() {
			Duration::from_secs(self.config.idp.update_interval_minutes * 60)
		} else {
			Duration::from_secs(self.config.idp.no_valid_certificate_update_interval_seconds)
		};
		let weak = Arc::downgrade(self);
		let mut token = self.timer_token.lock();
		self.timer.cancel(*token);
		*token = self.timer.run_in(
			delay,
			Box::new(move || {
				if let Some(updater) = weak.upgrade() {
					tokio::spawn(async move {
						updater.update().await;
						updater.schedule_next_update();
					});
				}
			}),
		);
	}
}

impl Drop for IdpCertUpdater {
	fn drop(&mut self) {
		self.timer.cancel(*self.timer_token.lock());
		if let Some(hook_id) = *self.update_hook_id.lock() {
			self.manager.disable_post_update_hook(hook_id);
		}
	}
}

/// Decodes the payload of a JWS in compact serialization without verifying
/// the signature.
fn jws_payload(token: &str) -> Result<Vec<u8>, String> {
	let parts: Vec<&str> = token.trim().split('.').collect();
	if parts.len() != 3 {
		return Err("discovery document is not a compact JWS".to_string());
	}
	base64::engine::general_purpose::URL_SAFE_NO_PAD
		.decode(parts[1].as_bytes())
		.map_err(|e| format!("invalid JWS payload encoding: {e}"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn jws_payload_decodes_the_middle_part() {
		let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
			.encode(br#"{"uri_puk_idp_sig":"https://idp.example/keys"}"#);
		let token = format!("eyJhbGciOiJub25lIn0.{payload}.sig");
		let decoded = jws_payload(&token).unwrap();
		let claims: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
		assert_eq!(
			claims["uri_puk_idp_sig"].as_str(),
			Some("https://idp.example/keys")
		);
	}

	#[test]
	fn jws_payload_rejects_other_shapes() {
		assert!(jws_payload("only.two").is_err());
		assert!(jws_payload("a.b.c.d").is_err());
	}
}
