//! In-memory trust store snapshot. One instance exists per trust list mode;
//! all mutable state sits behind a single short-lived mutex.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::config::TslConfig;
use crate::crypto::Certificate;
use crate::error::{TslError, TslErrorCode, TslResult};
use crate::tsl::ocsp::OcspResponse;
use crate::tsl::parser::TslParsed;
use crate::tsl::{
	BnaServiceInformation, CertificateId, ServiceInformation, ServiceInformationMap, TslMode,
};

/// Lookup result for the issuing CA of a certificate.
#[derive(Debug, Clone)]
pub struct CaInfo {
	pub certificate: Certificate,
	pub accepted: bool,
	pub extension_oids: std::collections::HashSet<String>,
}

/// Observability snapshot of one trust store.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthData {
	pub has_tsl: bool,
	pub outdated: bool,
	pub hash: Option<String>,
	pub next_update: Option<DateTime<Utc>>,
	pub id: Option<String>,
	pub sequence_number: String,
}

/// A configured trust anchor, optionally only valid from a point in time
/// (signer-CA rollover).
#[derive(Debug, Clone)]
struct TrustAnchor {
	certificate: Certificate,
	active_from: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct StoreState {
	stored: bool,
	hash: Option<String>,
	id: Option<String>,
	sequence_number: String,
	next_update: Option<DateTime<Utc>>,
	update_urls: Vec<String>,
	bna: BnaServiceInformation,
	services: ServiceInformationMap,
	ocsp_cache: HashMap<String, OcspResponse>,
}

pub struct TrustStore {
	mode: TslMode,
	anchors: Vec<TrustAnchor>,
	state: Mutex<StoreState>,
}

/// Evaluates the acceptance history of a CA entry for a certificate.
///
/// A single accepting entry is an unconditional accept regardless of its
/// starting time. Otherwise the newest entry at or before the certificate's
/// notBefore decides; without a certificate the latest entry decides; a
/// certificate predating the whole history is rejected.
fn is_service_acceptable(
	history: &std::collections::BTreeMap<DateTime<Utc>, bool>,
	certificate: Option<&Certificate>,
) -> bool {
	if history.len() == 1 {
		if let Some(accepted) = history.values().next()
			&& *accepted
		{
			return true;
		}
	}
	let reference = certificate.map(|c| c.not_before());
	for (time, accepted) in history.iter().rev() {
		match reference {
			Some(not_before) => {
				if *time <= not_before {
					return *accepted;
				}
			},
			None => return *accepted,
		}
	}
	false
}

impl TrustStore {
	/// Creates an empty store. Trust anchors are loaded eagerly from the
	/// configured DER files so misconfiguration surfaces at construction.
	pub fn new(mode: TslMode, config: &TslConfig, initial_urls: Vec<String>) -> TslResult<Self> {
		let mut anchors = Vec::new();
		if mode == TslMode::Tsl {
			anchors.push(TrustAnchor {
				certificate: load_anchor(&config.initial_ca_der_path)?,
				active_from: None,
			});
			if let Some(path) = config.initial_ca_der_path_new.as_deref() {
				anchors.push(TrustAnchor {
					certificate: load_anchor(path)?,
					active_from: config.initial_ca_der_path_new_start,
				});
			}
		}
		Ok(Self {
			mode,
			anchors,
			state: Mutex::new(StoreState {
				update_urls: initial_urls,
				..StoreState::default()
			}),
		})
	}

	pub fn mode(&self) -> TslMode {
		self.mode
	}

	/// The configured signer-CA anchors accepted right now. Usually one, two
	/// during a rollover once the new anchor's activation time has passed.
	pub fn tsl_signer_cas(&self) -> Vec<Certificate> {
		let now = Utc::now();
		self.anchors
			.iter()
			.filter(|anchor| anchor.active_from.is_none_or(|from| from <= now))
			.map(|anchor| anchor.certificate.clone())
			.collect()
	}

	pub fn has_tsl(&self) -> bool {
		self.state.lock().stored
	}

	pub fn is_tsl_too_old(&self) -> bool {
		let state = self.state.lock();
		match state.next_update {
			Some(next_update) => next_update <= Utc::now(),
			None => true,
		}
	}

	pub fn health_data(&self) -> HealthData {
		let state = self.state.lock();
		HealthData {
			has_tsl: state.stored,
			outdated: match state.next_update {
				Some(next_update) => next_update <= Utc::now(),
				None => true,
			},
			hash: state.hash.clone(),
			next_update: state.next_update,
			id: state.id.clone(),
			sequence_number: state.sequence_number.clone(),
		}
	}

	pub fn tsl_hash_value(&self) -> Option<String> {
		self.state.lock().hash.clone()
	}

	pub fn set_tsl_hash_value(&self, hash: Option<String>) {
		self.state.lock().hash = hash;
	}

	pub fn id_of_tsl_in_use(&self) -> Option<String> {
		self.state.lock().id.clone()
	}

	pub fn sequence_number_of_tsl_in_use(&self) -> String {
		self.state.lock().sequence_number.clone()
	}

	pub fn next_update(&self) -> Option<DateTime<Utc>> {
		self.state.lock().next_update
	}

	pub fn update_urls(&self) -> Vec<String> {
		self.state.lock().update_urls.clone()
	}

	/// Explicitly set in BNA mode, where the URLs travel inside the main TSL.
	pub fn set_update_urls(&self, urls: Vec<String>) {
		self.state.lock().update_urls = urls;
	}

	pub fn bna_urls(&self) -> Vec<String> {
		self.state.lock().bna.supply_points.clone()
	}

	pub fn bna_signer_certificates(&self) -> Vec<Certificate> {
		self.state.lock().bna.signer_certificates.clone()
	}

	pub fn bna_ocsp_mapping(&self) -> HashMap<String, String> {
		self.state.lock().bna.ocsp_mapping.clone()
	}

	pub fn set_bna_ocsp_mapping(&self, mapping: HashMap<String, String>) {
		self.state.lock().bna.ocsp_mapping = mapping;
	}

	/// Replaces the whole snapshot in one critical section.
	pub fn refill_from_tsl(&self, mut parsed: TslParsed) {
		if self.mode == TslMode::Tsl && !self.check_new_tsl_signer_cas(&parsed) {
			for id in &parsed.new_tsl_signer_ca_ids {
				parsed.service_information.remove(id);
			}
		}

		let mut state = self.state.lock();
		state.id = parsed.id;
		state.sequence_number = parsed.sequence_number;
		state.next_update = Some(parsed.next_update);
		if !parsed.update_urls.is_empty() {
			state.update_urls = parsed.update_urls;
		}
		state.bna = parsed.bna;
		state.services = parsed.service_information;
		state.stored = true;
	}

	/// TUC_PKI_013: at most one announced follow-up signer CA is allowed, and
	/// it must be in an accepted state. Returns false when the announcement
	/// entries have to be dropped from the map.
	fn check_new_tsl_signer_cas(&self, parsed: &TslParsed) -> bool {
		match parsed.new_tsl_signer_ca_ids.as_slice() {
			[] => true,
			[id] => {
				let Some(entry) = parsed.service_information.get(id) else {
					return false;
				};
				if is_service_acceptable(&entry.acceptance_history, None) {
					let active_from = entry
						.acceptance_history
						.keys()
						.next()
						.copied()
						.unwrap_or_else(Utc::now);
					tracing::warn!(
						code = ?TslErrorCode::TslCaUpdateWarning,
						subject = entry.certificate.subject(),
						%active_from,
						"new TSL signer CA announced"
					);
					true
				} else {
					tracing::warn!(
						subject = entry.certificate.subject(),
						"announced TSL signer CA is revoked and will be ignored"
					);
					false
				}
			},
			_ => {
				tracing::error!(
					code = ?TslErrorCode::MultipleTrustAnchor,
					count = parsed.new_tsl_signer_ca_ids.len(),
					"only one new TI trust anchor is allowed"
				);
				false
			},
		}
	}

	/// Finds the issuing CA entry for `certificate` via `(issuer DN, AKI)`.
	pub fn lookup_ca_certificate(&self, certificate: &Certificate) -> Option<CaInfo> {
		let state = self.state.lock();
		let id = CertificateId {
			subject: certificate.issuer().to_string(),
			ski: certificate.authority_key_identifier().to_string(),
		};
		let entry = state.services.get(&id)?;
		if entry.certificate.subject_key_identifier() != certificate.authority_key_identifier() {
			return None;
		}
		Some(CaInfo {
			certificate: entry.certificate.clone(),
			accepted: is_service_acceptable(&entry.acceptance_history, Some(certificate)),
			extension_oids: entry.extension_oids.clone(),
		})
	}

	pub fn has_ca_certificate_with_subject(&self, subject_dn: &str) -> bool {
		let state = self.state.lock();
		state.services.keys().any(|id| id.subject == subject_dn)
	}

	pub fn is_certificate_in_tsl(&self, certificate: &Certificate) -> bool {
		let state = self.state.lock();
		state
			.services
			.get(&CertificateId::of(certificate))
			.is_some_and(|entry| entry.certificate == *certificate)
	}

	pub fn certificate_has_type_identifier(
		&self,
		certificate: &Certificate,
		type_identifier: &str,
	) -> bool {
		let state = self.state.lock();
		state
			.services
			.get(&CertificateId::of(certificate))
			.is_some_and(|entry| entry.service_identifier == type_identifier)
	}

	pub fn is_ocsp_responder_in_tsl(&self, certificate: &Certificate) -> bool {
		self.is_certificate_in_tsl(certificate)
	}

	/// The CA certificates acceptable for a certificate starting its validity
	/// at `reference` (or acceptable right now when absent).
	pub fn trusted_certificates(&self, reference: Option<&Certificate>) -> Vec<Certificate> {
		let state = self.state.lock();
		state
			.services
			.values()
			.filter(|entry| is_service_acceptable(&entry.acceptance_history, reference))
			.map(|entry| entry.certificate.clone())
			.collect()
	}

	pub fn primary_ocsp_supply_point(&self, ca_certificate: &Certificate) -> Option<String> {
		let state = self.state.lock();
		state
			.services
			.get(&CertificateId::of(ca_certificate))
			.and_then(|entry| entry.supply_points.first().cloned())
	}

	pub fn service_information(&self, id: &CertificateId) -> Option<ServiceInformation> {
		self.state.lock().services.get(id).cloned()
	}

	/// Drops all trust decisions. Called when a stale store could not be
	/// refreshed.
	pub fn distrust_certificates(&self) {
		let mut state = self.state.lock();
		state.services.clear();
		state.bna = BnaServiceInformation::default();
	}

	// -- OCSP cache --

	pub fn set_cached_ocsp_response(&self, fingerprint: &str, response: OcspResponse) {
		let mut state = self.state.lock();
		cleanup_ocsp_cache(&mut state.ocsp_cache);
		state.ocsp_cache.insert(fingerprint.to_string(), response);
	}

	pub fn cached_ocsp_response(&self, fingerprint: &str) -> Option<OcspResponse> {
		let mut state = self.state.lock();
		cleanup_ocsp_cache(&mut state.ocsp_cache);
		state.ocsp_cache.get(fingerprint).cloned()
	}

	pub fn evict_cached_ocsp_response(&self, fingerprint: &str) {
		let mut state = self.state.lock();
		cleanup_ocsp_cache(&mut state.ocsp_cache);
		state.ocsp_cache.remove(fingerprint);
	}

	/// Attaches the current snapshot coordinates to an error.
	pub fn error(&self, code: TslErrorCode, message: impl Into<String>) -> TslError {
		let state = self.state.lock();
		TslError::new(code, message).with_context(
			self.mode,
			state.id.clone(),
			state.sequence_number.clone(),
		)
	}
}

/// Entries whose age exceeds their own grace period are dropped on every
/// cache touch.
fn cleanup_ocsp_cache(cache: &mut HashMap<String, OcspResponse>) {
	let now = Utc::now();
	cache.retain(|_, entry| {
		let age = (now - entry.produced_at)
			.to_std()
			.unwrap_or(std::time::Duration::ZERO);
		age <= entry.grace_period
	});
}

fn load_anchor(path: &str) -> TslResult<Certificate> {
	let bytes = std::fs::read(path).map_err(|e| {
		TslError::new(
			TslErrorCode::TslCaNotLoaded,
			format!("cannot read trust anchor {path}: {e}"),
		)
	})?;
	Certificate::from_der(bytes).map_err(|e| {
		TslError::new(
			TslErrorCode::TslCaNotLoaded,
			format!("cannot parse trust anchor {path}: {e}"),
		)
	})
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeMap;

	use chrono::TimeZone;

	use super::*;

	fn history(entries: &[(i32, bool)]) -> BTreeMap<DateTime<Utc>, bool> {
		entries
			.iter()
			.map(|(year, accepted)| {
				(
					Utc.with_ymd_and_hms(*year, 1, 1, 0, 0, 0).unwrap(),
					*accepted,
				)
			})
			.collect()
	}

	#[test]
	fn single_accepting_entry_is_unconditional() {
		assert!(is_service_acceptable(&history(&[(2030, true)]), None));
	}

	#[test]
	fn single_revoking_entry_rejects() {
		assert!(!is_service_acceptable(&history(&[(2020, false)]), None));
	}

	#[test]
	fn latest_entry_decides_without_certificate() {
		assert!(!is_service_acceptable(
			&history(&[(2019, true), (2021, false)]),
			None
		));
		assert!(is_service_acceptable(
			&history(&[(2019, false), (2021, true)]),
			None
		));
	}
}
