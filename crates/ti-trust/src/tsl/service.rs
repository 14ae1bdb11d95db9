//! Trust list refresh (TUC_PKI_019 / TUC_PKI_016 / TUC_PKI_011) and the
//! certificate verification pipeline (TUC_PKI_018).

use once_cell::sync::Lazy;
use openssl::hash::MessageDigest;

use crate::client::HttpClient;
use crate::config::Config;
use crate::crypto::certtype::{self, CertificateType};
use crate::crypto::{self, Certificate, KeyUsage, oids};
use crate::error::{TslError, TslErrorCode, TslResult};
use crate::tsl::ocsp::{self, CertificateStatus, OcspCheckDescriptor, OcspResponse, OcspUrl};
use crate::tsl::parser::{self, TslParsed};
use crate::tsl::store::TrustStore;
use crate::tsl::{CertificateId, TslMode};
use crate::xml::XmlValidator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateResult {
	Updated,
	NotUpdated,
}

/// Serializes every trust store refresh in the process, across both stores.
static TRUST_STORE_UPDATE_MUTEX: Lazy<tokio::sync::Mutex<()>> =
	Lazy::new(|| tokio::sync::Mutex::new(()));

const DOWNLOAD_ATTEMPTS_PER_URL: usize = 3;

/// Refreshes the trust store when necessary.
///
/// With `only_if_outdated` the call is a cheap no-op while the stored trust
/// list is present and current. `expected_signer_certificates` carries the
/// already accepted BNetzA signer certificates during a BNA refresh.
pub async fn trigger_tsl_update_if_necessary(
	client: &dyn HttpClient,
	validator: &dyn XmlValidator,
	config: &Config,
	store: &TrustStore,
	only_if_outdated: bool,
	expected_signer_certificates: &[Certificate],
) -> TslResult<UpdateResult> {
	let _guard = TRUST_STORE_UPDATE_MUTEX.lock().await;

	if only_if_outdated && store.has_tsl() && !store.is_tsl_too_old() {
		return Ok(UpdateResult::NotUpdated);
	}

	let mut update_result = UpdateResult::NotUpdated;
	match run_refresh(client, validator, config, store, expected_signer_certificates).await {
		Ok(result) => update_result = result,
		Err(error) => {
			if !store.has_tsl() {
				let code = match store.mode() {
					TslMode::Tsl => TslErrorCode::TslInitError,
					TslMode::Bna => TslErrorCode::VlUpdateError,
				};
				return Err(store.error(
					code,
					format!("initial trust list download failed: {error}"),
				));
			}
			tracing::error!(mode = %store.mode(), %error, "trust list update failed");
		},
	}

	// a store that stayed stale after the attempt must not be used any more
	if store.is_tsl_too_old() {
		store.distrust_certificates();
		let code = match store.mode() {
			TslMode::Tsl => TslErrorCode::ValidityWarning2,
			TslMode::Bna => TslErrorCode::VlUpdateError,
		};
		return Err(store.error(code, "trust list is outdated and no update is possible"));
	}

	Ok(update_result)
}

async fn run_refresh(
	client: &dyn HttpClient,
	validator: &dyn XmlValidator,
	config: &Config,
	store: &TrustStore,
	expected_signer_certificates: &[Certificate],
) -> TslResult<UpdateResult> {
	// only probe the hash when a trust list is already present; on bootstrap
	// there is nothing to compare against
	let new_hash = if store.has_tsl() {
		Some(download_hash_value(client, config, store).await?)
	} else {
		None
	};

	let needs_refresh = !store.has_tsl()
		|| store.is_tsl_too_old()
		|| new_hash != store.tsl_hash_value();
	if !needs_refresh {
		return Ok(UpdateResult::NotUpdated);
	}

	let xml = download_trust_list(client, config, store).await?;
	let content_hash = hex::encode(openssl::hash::hash(MessageDigest::sha256(), xml.as_bytes())?);
	if let Some(expected) = new_hash.as_deref()
		&& expected != content_hash
	{
		tracing::warn!(
			mode = %store.mode(),
			expected,
			calculated = %content_hash,
			"downloaded trust list hash differs from the probed hash"
		);
	}

	let parsed = parser::parse(&xml, store.mode(), validator)?;
	check_signer_certificate(&parsed.signer_certificate, store, expected_signer_certificates)?;

	if !id_and_sequence_progress(&parsed, store)? {
		return Ok(UpdateResult::NotUpdated);
	}

	if store.mode() == TslMode::Tsl {
		validate_ocsp_status_of_signer(client, config, store, &parsed).await?;
	}

	store.refill_from_tsl(parsed);
	store.set_tsl_hash_value(Some(content_hash));
	tracing::info!(mode = %store.mode(), "trust store refreshed");
	Ok(UpdateResult::Updated)
}

/// TSL mode requires a consistent document id and a strictly growing
/// sequence number; BNA mode checks the sequence number alone.
fn id_and_sequence_progress(parsed: &TslParsed, store: &TrustStore) -> TslResult<bool> {
	let new_sequence: i64 = parsed.sequence_number.parse().unwrap_or(0);
	let stored_sequence: i64 = store
		.sequence_number_of_tsl_in_use()
		.parse()
		.unwrap_or(0);

	if store.mode() == TslMode::Tsl {
		let stored_id = store.id_of_tsl_in_use();
		if parsed.id.is_some() && stored_id != parsed.id && stored_sequence < new_sequence {
			return Ok(true);
		}
		if parsed.id.is_some() && stored_id == parsed.id && stored_sequence == new_sequence {
			return Ok(false);
		}
		Err(store.error(
			TslErrorCode::TslIdIncorrect,
			format!(
				"unexpected trust list progression, new id: {}, new sequence number: {}",
				parsed.id.as_deref().unwrap_or("<unset>"),
				parsed.sequence_number
			),
		))
	} else {
		Ok(stored_sequence < new_sequence)
	}
}

/// TUC_PKI_011: signer certificate check for a freshly parsed trust list.
fn check_signer_certificate(
	signer: &Certificate,
	store: &TrustStore,
	expected_signer_certificates: &[Certificate],
) -> TslResult<()> {
	if !signer.check_validity_period(None) {
		return Err(TslError::new(
			TslErrorCode::CertificateNotValidTime,
			"trust list signer certificate is outdated",
		));
	}
	if !signer.check_key_usage(&[KeyUsage::NonRepudiation]) {
		return Err(store.error(
			TslErrorCode::WrongKeyUsage,
			"wrong key usage in trust list signer certificate",
		));
	}
	if !signer.has_extended_key_usage_oid(oids::EKU_TSL_SIGNING) {
		return Err(TslError::new(
			TslErrorCode::WrongExtendedKeyUsage,
			"missing id-tsl-kp-tslSigning in extended key usage",
		));
	}

	if expected_signer_certificates.is_empty() {
		let anchors = store.tsl_signer_cas();
		if anchors.is_empty() {
			return Err(TslError::new(
				TslErrorCode::TslCaNotLoaded,
				"trust list signer CA is not loaded",
			));
		}
		// accept when signed by any of the currently valid anchors
		if anchors.iter().any(|anchor| signer.verify_signed_by(anchor)) {
			return Ok(());
		}
		Err(TslError::new(
			TslErrorCode::CertificateNotValidMath,
			"trust list signer certificate is not signed by an accepted trust anchor",
		))
	} else if expected_signer_certificates.contains(signer) {
		Ok(())
	} else {
		Err(TslError::new(
			TslErrorCode::CertificateNotValidMath,
			"unexpected trust list signer certificate",
		))
	}
}

/// Looks up the signer's issuer in the freshly parsed map and checks the
/// signer via OCSP before the new snapshot is installed.
async fn validate_ocsp_status_of_signer(
	client: &dyn HttpClient,
	config: &Config,
	store: &TrustStore,
	parsed: &TslParsed,
) -> TslResult<()> {
	let signer = &parsed.signer_certificate;
	let issuer_id = CertificateId {
		subject: signer.issuer().to_string(),
		ski: signer.authority_key_identifier().to_string(),
	};
	let issuer_entry = parsed
		.service_information
		.get(&issuer_id)
		.filter(|entry| {
			entry.certificate.subject_key_identifier() == signer.authority_key_identifier()
		})
		.ok_or_else(|| {
			store.error(
				TslErrorCode::CaCertMissing,
				"issuer certificate of the trust list signer must be part of the trust list",
			)
		})?;
	let ocsp_url = issuer_entry.supply_points.first().cloned().ok_or_else(|| {
		store.error(
			TslErrorCode::ServiceSupplyPointMissing,
			"an OCSP URL must be provided for the trust list signer certificate",
		)
	})?;

	// on the very first bootstrap the responders listed in the new document
	// introduce themselves
	let responders = if store.has_tsl() {
		None
	} else {
		Some(parsed.ocsp_certificates.clone())
	};
	let response = ocsp::fetch_current_for_tsl_signer(
		signer,
		&issuer_entry.certificate,
		client,
		&OcspUrl {
			url: ocsp_url.clone(),
			direct_from_certificate: false,
		},
		store,
		responders,
		config.ocsp_grace_period(),
	)
	.await?;
	if response.status != CertificateStatus::Good {
		return Err(store.error(
			TslErrorCode::OcspStatusError,
			format!(
				"OCSP check for trust list signer certificate failed, status: {}, subject: {}, url: {ocsp_url}",
				response.status,
				signer.subject()
			),
		));
	}
	Ok(())
}

async fn download_file(
	client: &dyn HttpClient,
	config: &Config,
	url: &str,
) -> TslResult<Vec<u8>> {
	for attempt in 0..DOWNLOAD_ATTEMPTS_PER_URL {
		tracing::debug!(url, attempt, "downloading trust list file");
		match client
			.get(url, config.tsl.download_ciphers.as_deref())
			.await
		{
			Ok(response) if response.is_success() => return Ok(response.body),
			Ok(response) => {
				tracing::warn!(url, status = response.status, "download attempt failed");
			},
			Err(error) => {
				tracing::warn!(url, %error, "download attempt failed");
			},
		}
	}
	Err(TslError::new(
		TslErrorCode::TslDownloadError,
		format!("download failed for URL {url}"),
	))
}

/// Derives the `.sha2` probe URL for an update URL. The hash endpoint only
/// exists behind https, so the scheme is forced even for http update URLs.
fn hash_probe_url(update_url: &str) -> TslResult<String> {
	let mut url = url::Url::parse(update_url).map_err(|_| {
		TslError::new(
			TslErrorCode::TslDownloadError,
			format!("unexpected trust list link format: {update_url}"),
		)
	})?;
	let path = url.path().to_string();
	let Some(stem) = path.strip_suffix(".xml") else {
		return Err(TslError::new(
			TslErrorCode::TslDownloadError,
			format!("cannot derive hash link from trust list URL {update_url}"),
		));
	};
	url.set_path(&format!("{stem}.sha2"));
	if url.scheme() != "https" {
		let _ = url.set_scheme("https");
	}
	Ok(url.to_string())
}

async fn download_hash_value(
	client: &dyn HttpClient,
	config: &Config,
	store: &TrustStore,
) -> TslResult<String> {
	for update_url in store.update_urls() {
		let probe_url = match hash_probe_url(&update_url) {
			Ok(probe_url) => probe_url,
			Err(error) => {
				tracing::error!(url = %update_url, %error, "cannot derive hash probe URL");
				continue;
			},
		};
		match download_file(client, config, &probe_url).await {
			Ok(body) => {
				let normalized = normalize_hash_body(&body);
				if !normalized.is_empty() {
					return Ok(normalized);
				}
			},
			Err(error) => {
				tracing::error!(url = %probe_url, %error, "cannot access hash endpoint");
			},
		}
	}
	Err(TslError::new(
		TslErrorCode::TslDownloadError,
		"cannot download the trust list hash value",
	))
}

/// The `.sha2` body is usually lowercase hex; binary bodies are hex encoded.
fn normalize_hash_body(body: &[u8]) -> String {
	if let Ok(text) = std::str::from_utf8(body) {
		let trimmed = text.trim().to_lowercase();
		if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
			return trimmed;
		}
	}
	let trimmed: Vec<u8> = body
		.iter()
		.copied()
		.filter(|b| !b.is_ascii_whitespace())
		.collect();
	hex::encode(trimmed)
}

async fn download_trust_list(
	client: &dyn HttpClient,
	config: &Config,
	store: &TrustStore,
) -> TslResult<String> {
	for update_url in store.update_urls() {
		match download_file(client, config, &update_url).await {
			Ok(body) if !body.is_empty() => {
				tracing::info!(mode = %store.mode(), url = %update_url, "trust list downloaded");
				return String::from_utf8(body).map_err(|_| {
					TslError::new(
						TslErrorCode::TslNotWellformed,
						"trust list document is not valid UTF-8",
					)
				});
			},
			Ok(_) => tracing::error!(url = %update_url, "empty trust list download"),
			Err(error) => tracing::error!(url = %update_url, %error, "cannot access update URL"),
		}
	}
	Err(TslError::new(
		TslErrorCode::TslDownloadError,
		"cannot download a new trust list version",
	))
}

// ---- certificate verification ----

/// Verifies a certificate against the trust store and returns its OCSP
/// response. Failures before the OCSP step evict any cached response for the
/// certificate.
pub async fn check_certificate(
	certificate: &Certificate,
	type_restrictions: &[CertificateType],
	client: &dyn HttpClient,
	store: &TrustStore,
	config: &Config,
	descriptor: &OcspCheckDescriptor,
) -> TslResult<OcspResponse> {
	let (certificate_type, issuer_certificate) =
		match check_certificate_without_ocsp(certificate, type_restrictions, store) {
			Ok(result) => result,
			Err(error) => {
				// a certificate that no longer verifies must not keep a
				// usable cached OCSP response around
				store.evict_cached_ocsp_response(certificate.sha256_fingerprint_hex());
				return Err(error);
			},
		};

	let ocsp_url = resolve_ocsp_url(certificate, certificate_type, &issuer_certificate, store, config)?;
	tracing::debug!(url = %ocsp_url.url, "performing OCSP check");
	let response = ocsp::fetch_current(
		certificate,
		&issuer_certificate,
		client,
		&ocsp_url,
		store,
		certificate_type.requires_ocsp_cert_hash(),
		descriptor,
	)
	.await?;
	response.check_status(store, descriptor.reference_time_point)?;
	Ok(response)
}

/// The order-sensitive pre-OCSP pipeline: classification, policy, extension,
/// validity, issuer and chain checks.
pub fn check_certificate_without_ocsp(
	certificate: &Certificate,
	type_restrictions: &[CertificateType],
	store: &TrustStore,
) -> TslResult<(CertificateType, Certificate)> {
	let certificate_type = certtype::classify(certificate)?;
	tracing::debug!(%certificate_type, subject = certificate.subject(), "checking certificate");
	if !type_restrictions.is_empty() && !type_restrictions.contains(&certificate_type) {
		return Err(TslError::new(
			TslErrorCode::CertTypeMismatch,
			format!("certificate of unexpected type {certificate_type} provided"),
		));
	}
	if store.mode() == TslMode::Bna && !certificate_type.is_qes() {
		return Err(TslError::unknown(
			"only QES certificates are verified against the BNetzA-VL trust store",
		));
	}

	if certificate_type.is_qes()
		&& !certificate.check_qc_statement(oids::ID_ETSI_QCS_QC_COMPLIANCE)
	{
		return Err(TslError::new(
			TslErrorCode::QcStatementError,
			"expected QC statement missing for QES certificate",
		));
	}

	if !certificate.check_critical_extensions(certificate_type.supported_critical_extensions()) {
		return Err(TslError::new(
			TslErrorCode::CertTypeMismatch,
			"unexpected critical extension in certificate",
		));
	}
	if certificate.is_ca() {
		return Err(TslError::new(
			TslErrorCode::CertTypeMismatch,
			"the certificate must not be a CA certificate",
		));
	}
	if !certificate.check_key_usage(certificate_type.expected_key_usage(certificate)) {
		return Err(TslError::new(TslErrorCode::WrongKeyUsage, "invalid key usage"));
	}

	if !certificate.check_validity_period(None) {
		return Err(store.error(
			TslErrorCode::CertificateNotValidTime,
			"the certificate must be valid",
		));
	}

	let ca_info = match store.lookup_ca_certificate(certificate) {
		Some(ca_info) => ca_info,
		None => {
			if store.has_ca_certificate_with_subject(certificate.issuer()) {
				return Err(store.error(
					TslErrorCode::AuthorityKeyIdDifferent,
					"issuer has a known subject DN but an unknown subject key identifier",
				));
			}
			return Err(store.error(TslErrorCode::CaCertMissing, "issuer is unknown"));
		},
	};

	if !ca_info.accepted {
		let code = match store.mode() {
			TslMode::Tsl => TslErrorCode::CaCertificateRevokedInTsl,
			TslMode::Bna => TslErrorCode::CaCertificateRevokedInBnetzaVl,
		};
		return Err(store.error(code, "issuer is revoked"));
	}

	if store.mode() == TslMode::Tsl
		&& !ca_info.extension_oids.contains(certificate_type.policy_oid())
	{
		return Err(store.error(
			TslErrorCode::CertTypeCaNotAuthorized,
			"trust list CA does not accept the certificate type",
		));
	}

	let verification_time = match store.mode() {
		// accept historically valid QES material
		TslMode::Bna => Some(certificate.not_before()),
		TslMode::Tsl => None,
	};
	let trusted = store.trusted_certificates(Some(certificate));
	crypto::build_chain(certificate, &trusted, verification_time).map_err(|e| {
		store.error(TslErrorCode::CertificateNotValidMath, e.message)
	})?;

	if !certificate.check_extended_key_usage(certificate_type.expected_extended_key_usage()) {
		return Err(TslError::new(
			TslErrorCode::WrongExtendedKeyUsage,
			"invalid extended key usage",
		));
	}

	Ok((certificate_type, ca_info.certificate))
}

/// Resolves the OCSP URL for a certificate. QES certificates carry exactly
/// one AIA URL which is mapped through the BNetzA OCSP mapping or the TI
/// OCSP proxy; all other certificates use the primary supply point of their
/// issuing CA's trust list entry.
fn resolve_ocsp_url(
	certificate: &Certificate,
	certificate_type: CertificateType,
	issuer_certificate: &Certificate,
	store: &TrustStore,
	config: &Config,
) -> TslResult<OcspUrl> {
	if certificate_type.is_qes() {
		let urls = certificate.ocsp_urls();
		if urls.len() != 1 {
			return Err(TslError::new(
				TslErrorCode::TslNotWellformed,
				"OCSP check expects exactly one OCSP address in the certificate",
			));
		}
		let aia_url = &urls[0];
		if let Some(mapped) = store.bna_ocsp_mapping().get(aia_url) {
			return Ok(OcspUrl {
				url: mapped.clone(),
				direct_from_certificate: false,
			});
		}
		// G0 QES certificates without a mapping go through the TI OCSP
		// proxy, which takes the original URL as a path suffix
		if let Some(proxy) = config.tsl.ti_ocsp_proxy_url.as_deref() {
			let mut url = proxy.to_string();
			if !url.ends_with('/') {
				url.push('/');
			}
			url.push_str(aia_url);
			return Ok(OcspUrl {
				url,
				direct_from_certificate: false,
			});
		}
		return Ok(OcspUrl {
			url: aia_url.clone(),
			direct_from_certificate: true,
		});
	}

	let url = store
		.primary_ocsp_supply_point(issuer_certificate)
		.ok_or_else(|| {
			store.error(
				TslErrorCode::ServiceSupplyPointMissing,
				"OCSP check failed because no supply point has been found in the trust store",
			)
		})?;
	Ok(OcspUrl {
		url,
		direct_from_certificate: false,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hash_probe_url_swaps_extension_and_forces_https() {
		assert_eq!(
			hash_probe_url("https://tsl.example/TSL.xml").unwrap(),
			"https://tsl.example/TSL.sha2"
		);
		assert_eq!(
			hash_probe_url("http://tsl.example/path/TSL.xml").unwrap(),
			"https://tsl.example/path/TSL.sha2"
		);
	}

	#[test]
	fn hash_probe_url_rejects_non_xml_links() {
		let err = hash_probe_url("https://tsl.example/TSL.bin").unwrap_err();
		assert_eq!(err.code, TslErrorCode::TslDownloadError);
	}

	#[test]
	fn hash_body_normalization() {
		assert_eq!(normalize_hash_body(b"  ABCDEF0123  \n"), "abcdef0123");
		assert_eq!(normalize_hash_body(&[0xab, 0xcd]), "abcd");
	}
}
