//! OCSP request building, response parsing and validation (RFC 6960 with the
//! BSI TR-03145 CertHash extension).

use std::time::Duration;

use chrono::{DateTime, Utc};
use openssl::hash::MessageDigest;
use openssl::ocsp::{OcspCertId, OcspRequest};
use openssl::sign::Verifier;

use crate::client::HttpClient;
use crate::crypto::der;
use crate::crypto::{Certificate, oids};
use crate::error::{TslError, TslErrorCode, TslResult};
use crate::tsl::store::TrustStore;

pub const OCSP_REQUEST_CONTENT_TYPE: &str = "application/ocsp-request";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateStatus {
	Good,
	Revoked,
	Unknown,
}

impl std::fmt::Display for CertificateStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			CertificateStatus::Good => "good",
			CertificateStatus::Revoked => "revoked",
			CertificateStatus::Unknown => "unknown",
		})
	}
}

/// Normalized OCSP result as kept in the trust-store cache.
#[derive(Debug, Clone)]
pub struct OcspResponse {
	pub status: CertificateStatus,
	/// Set iff `status` is revoked.
	pub revocation_time: Option<DateTime<Utc>>,
	pub grace_period: Duration,
	pub produced_at: DateTime<Utc>,
	pub received_at: DateTime<Utc>,
	pub from_cache: bool,
	pub raw: Vec<u8>,
}

impl OcspResponse {
	/// Raises the status as an error: unknown certificates are never silently
	/// downgraded, revocations apply from their revocation time onwards.
	pub fn check_status(
		&self,
		store: &TrustStore,
		reference_time: Option<DateTime<Utc>>,
	) -> TslResult<()> {
		let reference = reference_time.unwrap_or_else(Utc::now);
		if self.status == CertificateStatus::Unknown {
			return Err(store.error(
				TslErrorCode::OcspCertUnknown,
				"OCSP check failed, certificate is unknown",
			));
		}
		if self.status == CertificateStatus::Revoked {
			let effective = self
				.revocation_time
				.is_none_or(|revoked_at| reference >= revoked_at);
			if effective {
				return Err(store.error(
					TslErrorCode::OcspCertRevoked,
					"OCSP check failed, certificate is revoked",
				));
			}
		}
		Ok(())
	}

	fn is_fresh(&self, now: DateTime<Utc>) -> bool {
		let age = (now - self.produced_at).to_std().unwrap_or(Duration::ZERO);
		self.produced_at <= now && age <= self.grace_period
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcspCheckMode {
	/// Always send a request; any failure is an error.
	ForceOcspRequestStrict,
	/// Always send a request, but fall back to a fresh cache entry when the
	/// request fails.
	ForceOcspRequestAllowCache,
	/// Use the provided response or a fresh cache entry, request otherwise.
	ProvidedOrCache,
	/// Only the provided response is acceptable.
	ProvidedOnly,
	/// Only a fresh cache entry is acceptable.
	CachedOnly,
}

/// Per-call OCSP policy.
#[derive(Debug, Clone)]
pub struct OcspCheckDescriptor {
	pub mode: OcspCheckMode,
	pub provided_ocsp_response: Option<Vec<u8>>,
	/// Revocations are only effective at or after this instant; defaults to
	/// the evaluation time.
	pub reference_time_point: Option<DateTime<Utc>>,
	pub grace_period: Duration,
	/// A provided response may be marked non-cacheable by the caller.
	pub cache_provided_response: bool,
}

impl OcspCheckDescriptor {
	pub fn new(mode: OcspCheckMode, grace_period: Duration) -> Self {
		Self {
			mode,
			provided_ocsp_response: None,
			reference_time_point: None,
			grace_period,
			cache_provided_response: false,
		}
	}

	/// Whether a fresh cache entry may satisfy the call before any request.
	pub fn try_cache_first(&self) -> bool {
		matches!(
			self.mode,
			OcspCheckMode::ProvidedOrCache | OcspCheckMode::CachedOnly
		)
	}
}

/// Resolved request target. `direct_from_certificate` marks the QES fallback
/// where the AIA URL is used verbatim.
#[derive(Debug, Clone)]
pub struct OcspUrl {
	pub url: String,
	pub direct_from_certificate: bool,
}

fn status_error(message: impl Into<String>) -> TslError {
	TslError::new(TslErrorCode::OcspStatusError, message)
}

/// Fetches the current OCSP response for a certificate according to the
/// check descriptor.
#[allow(clippy::too_many_arguments)]
pub async fn fetch_current(
	certificate: &Certificate,
	issuer: &Certificate,
	client: &dyn HttpClient,
	ocsp_url: &OcspUrl,
	store: &TrustStore,
	validate_hash_extension: bool,
	descriptor: &OcspCheckDescriptor,
) -> TslResult<OcspResponse> {
	let now = Utc::now();
	let fingerprint = certificate.sha256_fingerprint_hex().to_string();

	if descriptor.try_cache_first() && descriptor.provided_ocsp_response.is_none() {
		if let Some(cached) = store.cached_ocsp_response(&fingerprint)
			&& cached.is_fresh(now)
		{
			let mut cached = cached;
			cached.from_cache = true;
			return Ok(cached);
		}
		if descriptor.mode == OcspCheckMode::CachedOnly {
			return Err(store.error(
				TslErrorCode::OcspStatusError,
				"no usable cached OCSP response available",
			));
		}
	}

	if let Some(provided) = descriptor.provided_ocsp_response.as_deref() {
		let response = validate_response(
			provided,
			certificate,
			issuer,
			store,
			&[],
			validate_hash_extension,
			descriptor.grace_period,
			now,
		)
		.map_err(|e| {
			TslError::new(
				TslErrorCode::ProvidedOcspResponseNotValid,
				format!("provided OCSP response rejected: {}", e.message),
			)
		})?;
		if descriptor.cache_provided_response {
			store.set_cached_ocsp_response(&fingerprint, response.clone());
		}
		return Ok(response);
	}
	if descriptor.mode == OcspCheckMode::ProvidedOnly {
		return Err(store.error(
			TslErrorCode::OcspStatusError,
			"OCSP check requires a provided response but none was supplied",
		));
	}

	let network = request_and_validate(
		certificate,
		issuer,
		client,
		ocsp_url,
		store,
		&[],
		validate_hash_extension,
		descriptor.grace_period,
	)
	.await;
	match network {
		Ok(response) => {
			store.set_cached_ocsp_response(&fingerprint, response.clone());
			Ok(response)
		},
		Err(err) if descriptor.mode == OcspCheckMode::ForceOcspRequestAllowCache => {
			if let Some(cached) = store.cached_ocsp_response(&fingerprint)
				&& cached.is_fresh(now)
			{
				tracing::warn!(
					error = %err,
					"OCSP request failed, falling back to cached response"
				);
				let mut cached = cached;
				cached.from_cache = true;
				return Ok(cached);
			}
			Err(err)
		},
		Err(err) => Err(err),
	}
}

/// OCSP check for the signer certificate of a freshly parsed trust list. The
/// previous store provides cached data; on first bootstrap the responder
/// certificates listed in the new document itself are accepted.
pub async fn fetch_current_for_tsl_signer(
	signer: &Certificate,
	issuer: &Certificate,
	client: &dyn HttpClient,
	ocsp_url: &OcspUrl,
	old_store: &TrustStore,
	responder_certificates: Option<Vec<Certificate>>,
	grace_period: Duration,
) -> TslResult<OcspResponse> {
	let now = Utc::now();
	let fingerprint = signer.sha256_fingerprint_hex().to_string();
	if let Some(cached) = old_store.cached_ocsp_response(&fingerprint)
		&& cached.is_fresh(now)
	{
		let mut cached = cached;
		cached.from_cache = true;
		return Ok(cached);
	}

	let response = request_and_validate(
		signer,
		issuer,
		client,
		ocsp_url,
		old_store,
		responder_certificates.as_deref().unwrap_or(&[]),
		true,
		grace_period,
	)
	.await?;
	old_store.set_cached_ocsp_response(&fingerprint, response.clone());
	Ok(response)
}

#[allow(clippy::too_many_arguments)]
async fn request_and_validate(
	certificate: &Certificate,
	issuer: &Certificate,
	client: &dyn HttpClient,
	ocsp_url: &OcspUrl,
	store: &TrustStore,
	extra_responders: &[Certificate],
	validate_hash_extension: bool,
	grace_period: Duration,
) -> TslResult<OcspResponse> {
	let request = build_request(certificate, issuer)?;
	let response = client
		.post(&ocsp_url.url, OCSP_REQUEST_CONTENT_TYPE, request)
		.await
		.map_err(|e| status_error(format!("OCSP request to {} failed: {e}", ocsp_url.url)))?;
	if !response.is_success() {
		return Err(status_error(format!(
			"OCSP responder {} answered with status {}",
			ocsp_url.url, response.status
		)));
	}
	validate_response(
		&response.body,
		certificate,
		issuer,
		store,
		extra_responders,
		validate_hash_extension,
		grace_period,
		response.received_at,
	)
}

fn build_request(certificate: &Certificate, issuer: &Certificate) -> TslResult<Vec<u8>> {
	let subject = certificate.to_x509()?;
	let issuer = issuer.to_x509()?;
	let cert_id = OcspCertId::from_cert(MessageDigest::sha1(), &subject, &issuer)?;
	let mut request = OcspRequest::new()?;
	request.add_id(cert_id)?;
	Ok(request.to_der()?)
}

// ---- response parsing ----

#[derive(Debug)]
enum ResponderId {
	ByName(Vec<u8>),
	ByKey(Vec<u8>),
}

struct ParsedResponse {
	produced_at: DateTime<Utc>,
	responder: ResponderId,
	status: CertificateStatus,
	revocation_time: Option<DateTime<Utc>>,
	issuer_name_hash: Vec<u8>,
	issuer_key_hash: Vec<u8>,
	hash_algorithm: String,
	serial: Vec<u8>,
	cert_hash: Option<(String, Vec<u8>)>,
	embedded_certificates: Vec<Certificate>,
	tbs_raw: Vec<u8>,
	signature_algorithm: String,
	signature: Vec<u8>,
}

fn malformed(what: &str) -> TslError {
	status_error(format!("malformed OCSP response: {what}"))
}

fn parse_response(bytes: &[u8]) -> TslResult<ParsedResponse> {
	let (outer, _) = der::read_tlv(bytes).map_err(|_| malformed("outer sequence"))?;
	let outer_children = der::children(outer.expect(der::TAG_SEQUENCE).map_err(|_| malformed("outer sequence"))?)
		.map_err(|_| malformed("outer sequence"))?;
	let [response_status, response_bytes, ..] = outer_children.as_slice() else {
		return Err(malformed("missing responseBytes"));
	};
	let status_value = response_status
		.expect(der::TAG_ENUMERATED)
		.map_err(|_| malformed("responseStatus"))?;
	if status_value != [0] {
		return Err(status_error(format!(
			"OCSP responder reported failure status {:?}",
			status_value.first()
		)));
	}
	if !response_bytes.is_context(0) {
		return Err(malformed("responseBytes tag"));
	}
	let response_bytes = der::children(response_bytes.content)
		.map_err(|_| malformed("responseBytes"))?;
	let inner = response_bytes.first().ok_or_else(|| malformed("responseBytes"))?;
	let inner_children =
		der::children(inner.expect(der::TAG_SEQUENCE).map_err(|_| malformed("responseBytes"))?)
			.map_err(|_| malformed("responseBytes"))?;
	let [response_type, basic_octets, ..] = inner_children.as_slice() else {
		return Err(malformed("responseBytes members"));
	};
	let response_type = der::decode_oid(
		response_type
			.expect(der::TAG_OID)
			.map_err(|_| malformed("responseType"))?,
	)
	.map_err(|_| malformed("responseType"))?;
	if response_type != oids::ID_PKIX_OCSP_BASIC {
		return Err(status_error(format!(
			"unsupported OCSP response type {response_type}"
		)));
	}
	let basic_der = basic_octets
		.expect(der::TAG_OCTET_STRING)
		.map_err(|_| malformed("basic response"))?;

	let (basic, _) = der::read_tlv(basic_der).map_err(|_| malformed("basic response"))?;
	let basic_children = der::children(
		basic
			.expect(der::TAG_SEQUENCE)
			.map_err(|_| malformed("basic response"))?,
	)
	.map_err(|_| malformed("basic response"))?;
	if basic_children.len() < 3 {
		return Err(malformed("basic response members"));
	}
	// the tbsResponseData is the first TLV inside the basic response; its
	// full encoding is what the signature covers
	let tbs_raw = der::raw_tlv(basic.content).map_err(|_| malformed("tbsResponseData"))?;

	let tbs = basic_children[0]
		.expect(der::TAG_SEQUENCE)
		.map_err(|_| malformed("tbsResponseData"))?;
	let signature_algorithm_seq = der::children(
		basic_children[1]
			.expect(der::TAG_SEQUENCE)
			.map_err(|_| malformed("signatureAlgorithm"))?,
	)
	.map_err(|_| malformed("signatureAlgorithm"))?;
	let signature_algorithm = der::decode_oid(
		signature_algorithm_seq
			.first()
			.ok_or_else(|| malformed("signatureAlgorithm"))?
			.expect(der::TAG_OID)
			.map_err(|_| malformed("signatureAlgorithm"))?,
	)
	.map_err(|_| malformed("signatureAlgorithm"))?;
	let signature_bits = basic_children[2]
		.expect(der::TAG_BIT_STRING)
		.map_err(|_| malformed("signature"))?;
	if signature_bits.is_empty() {
		return Err(malformed("signature"));
	}
	let signature = signature_bits[1..].to_vec();

	let mut embedded_certificates = Vec::new();
	if let Some(certs) = basic_children.get(3)
		&& certs.is_context(0)
	{
		let list = der::children(certs.content).map_err(|_| malformed("certs"))?;
		let sequence = list.first().ok_or_else(|| malformed("certs"))?;
		let mut remaining = sequence
			.expect(der::TAG_SEQUENCE)
			.map_err(|_| malformed("certs"))?;
		// each child is a complete certificate; keep the full encoding
		while !remaining.is_empty() {
			let raw = der::raw_tlv(remaining).map_err(|_| malformed("certs"))?;
			if let Ok(certificate) = Certificate::from_der(raw.to_vec()) {
				embedded_certificates.push(certificate);
			}
			remaining = &remaining[raw.len()..];
		}
	}

	// tbsResponseData
	let tbs_children = der::children(tbs).map_err(|_| malformed("tbsResponseData"))?;
	let mut index = 0;
	if tbs_children
		.first()
		.is_some_and(|t| t.is_context(0))
	{
		index += 1; // explicit version, default v1
	}
	let responder_tlv = tbs_children
		.get(index)
		.ok_or_else(|| malformed("responderID"))?;
	let responder = if responder_tlv.is_context(1) {
		let name = der::raw_tlv(responder_tlv.content).map_err(|_| malformed("responderID"))?;
		ResponderId::ByName(name.to_vec())
	} else if responder_tlv.is_context(2) {
		let (octets, _) = der::read_tlv(responder_tlv.content).map_err(|_| malformed("responderID"))?;
		ResponderId::ByKey(
			octets
				.expect(der::TAG_OCTET_STRING)
				.map_err(|_| malformed("responderID"))?
				.to_vec(),
		)
	} else {
		return Err(malformed("responderID"));
	};
	let produced_at = der::parse_time(
		tbs_children
			.get(index + 1)
			.ok_or_else(|| malformed("producedAt"))?,
	)
	.map_err(|_| malformed("producedAt"))?;
	let responses = der::children(
		tbs_children
			.get(index + 2)
			.ok_or_else(|| malformed("responses"))?
			.expect(der::TAG_SEQUENCE)
			.map_err(|_| malformed("responses"))?,
	)
	.map_err(|_| malformed("responses"))?;
	let single = responses.first().ok_or_else(|| malformed("responses"))?;
	let single_children = der::children(
		single
			.expect(der::TAG_SEQUENCE)
			.map_err(|_| malformed("singleResponse"))?,
	)
	.map_err(|_| malformed("singleResponse"))?;
	if single_children.len() < 3 {
		return Err(malformed("singleResponse members"));
	}

	// CertID
	let cert_id = der::children(
		single_children[0]
			.expect(der::TAG_SEQUENCE)
			.map_err(|_| malformed("certID"))?,
	)
	.map_err(|_| malformed("certID"))?;
	let [algorithm, name_hash, key_hash, serial, ..] = cert_id.as_slice() else {
		return Err(malformed("certID members"));
	};
	let algorithm = der::children(
		algorithm
			.expect(der::TAG_SEQUENCE)
			.map_err(|_| malformed("certID algorithm"))?,
	)
	.map_err(|_| malformed("certID algorithm"))?;
	let hash_algorithm = der::decode_oid(
		algorithm
			.first()
			.ok_or_else(|| malformed("certID algorithm"))?
			.expect(der::TAG_OID)
			.map_err(|_| malformed("certID algorithm"))?,
	)
	.map_err(|_| malformed("certID algorithm"))?;
	let issuer_name_hash = name_hash
		.expect(der::TAG_OCTET_STRING)
		.map_err(|_| malformed("issuerNameHash"))?
		.to_vec();
	let issuer_key_hash = key_hash
		.expect(der::TAG_OCTET_STRING)
		.map_err(|_| malformed("issuerKeyHash"))?
		.to_vec();
	let serial = serial
		.expect(der::TAG_INTEGER)
		.map_err(|_| malformed("serialNumber"))?
		.to_vec();

	// certStatus
	let status_tlv = &single_children[1];
	let (status, revocation_time) = if status_tlv.tag == 0x80 {
		(CertificateStatus::Good, None)
	} else if status_tlv.tag == 0xa1 {
		let revoked = der::children(status_tlv.content).map_err(|_| malformed("revokedInfo"))?;
		let time = revoked
			.first()
			.ok_or_else(|| malformed("revokedInfo"))
			.and_then(|t| der::parse_time(t).map_err(|_| malformed("revocationTime")))?;
		(CertificateStatus::Revoked, Some(time))
	} else if status_tlv.tag == 0x82 {
		(CertificateStatus::Unknown, None)
	} else {
		return Err(malformed("certStatus"));
	};

	// singleExtensions carry the CertHash; they follow thisUpdate and the
	// optional [0] nextUpdate
	let mut cert_hash = None;
	for extra in &single_children[3..] {
		if !extra.is_context(1) {
			continue;
		}
		let extensions = der::children(extra.content)
			.ok()
			.and_then(|wrapped| wrapped.first().map(|t| *t))
			.and_then(|t| t.expect(der::TAG_SEQUENCE).ok().map(der::children));
		let Some(Ok(extensions)) = extensions else {
			continue;
		};
		for extension in extensions {
			let Ok(fields) = der::children(extension.content) else {
				continue;
			};
			let Some(extension_oid) = fields
				.first()
				.and_then(|f| f.expect(der::TAG_OID).ok())
				.and_then(|content| der::decode_oid(content).ok())
			else {
				continue;
			};
			if extension_oid != oids::CERT_HASH {
				continue;
			}
			let Some(value) = fields
				.iter()
				.find(|f| f.tag == der::TAG_OCTET_STRING)
				.map(|f| f.content)
			else {
				continue;
			};
			let Ok((hash_seq, _)) = der::read_tlv(value) else {
				continue;
			};
			let Ok(parts) = der::children(hash_seq.content) else {
				continue;
			};
			let [alg, digest, ..] = parts.as_slice() else {
				continue;
			};
			let alg_oid = der::children(alg.content)
				.ok()
				.and_then(|alg_parts| alg_parts.first().map(|t| *t))
				.and_then(|t| t.expect(der::TAG_OID).ok())
				.and_then(|content| der::decode_oid(content).ok());
			if let (Some(alg_oid), Ok(digest)) = (alg_oid, digest.expect(der::TAG_OCTET_STRING)) {
				cert_hash = Some((alg_oid, digest.to_vec()));
			}
		}
	}

	Ok(ParsedResponse {
		produced_at,
		responder,
		status,
		revocation_time,
		issuer_name_hash,
		issuer_key_hash,
		hash_algorithm,
		serial,
		cert_hash,
		embedded_certificates,
		tbs_raw: tbs_raw.to_vec(),
		signature_algorithm,
		signature,
	})
}

fn digest_by_oid(oid: &str) -> TslResult<MessageDigest> {
	match oid {
		oids::SHA1 => Ok(MessageDigest::sha1()),
		oids::SHA256 => Ok(MessageDigest::sha256()),
		oids::SHA512 => Ok(MessageDigest::sha512()),
		other => Err(status_error(format!("unsupported digest algorithm {other}"))),
	}
}

#[allow(clippy::too_many_arguments)]
fn validate_response(
	bytes: &[u8],
	certificate: &Certificate,
	issuer: &Certificate,
	store: &TrustStore,
	extra_responders: &[Certificate],
	validate_hash_extension: bool,
	grace_period: Duration,
	received_at: DateTime<Utc>,
) -> TslResult<OcspResponse> {
	let parsed = parse_response(bytes)?;
	let now = Utc::now();

	// the response must answer the question we would ask
	let digest = digest_by_oid(&parsed.hash_algorithm)?;
	let name_hash = openssl::hash::hash(digest, issuer.subject_name_der())?;
	let key_hash = openssl::hash::hash(digest, issuer.public_key_bits())?;
	if name_hash.as_ref() != parsed.issuer_name_hash.as_slice()
		|| key_hash.as_ref() != parsed.issuer_key_hash.as_slice()
	{
		return Err(status_error("OCSP response CertID does not match the issuer"));
	}
	if hex::encode(&parsed.serial) != certificate.serial_hex() {
		return Err(status_error(
			"OCSP response CertID does not match the certificate serial",
		));
	}

	// responder authorization: the issuer itself, a responder listed in the
	// trust list, or one of the explicitly provided responder certificates
	let signer = find_responder(&parsed, issuer, store, extra_responders)?;

	// signature over tbsResponseData
	let key = signer.public_key()?;
	let verified = match parsed.signature_algorithm.as_str() {
		oids::ECDSA_WITH_SHA256 => {
			let mut verifier = Verifier::new(MessageDigest::sha256(), &key)?;
			verifier.update(&parsed.tbs_raw)?;
			verifier.verify(&parsed.signature).unwrap_or(false)
		},
		oids::SHA256_WITH_RSA => {
			let mut verifier = Verifier::new(MessageDigest::sha256(), &key)?;
			verifier.update(&parsed.tbs_raw)?;
			verifier.verify(&parsed.signature).unwrap_or(false)
		},
		oids::SHA512_WITH_RSA => {
			let mut verifier = Verifier::new(MessageDigest::sha512(), &key)?;
			verifier.update(&parsed.tbs_raw)?;
			verifier.verify(&parsed.signature).unwrap_or(false)
		},
		other => {
			return Err(status_error(format!(
				"unsupported OCSP signature algorithm {other}"
			)));
		},
	};
	if !verified {
		return Err(status_error("OCSP response signature does not verify"));
	}

	if validate_hash_extension {
		let Some((alg_oid, expected)) = parsed.cert_hash.as_ref() else {
			return Err(status_error(
				"OCSP response lacks the required CertHash extension",
			));
		};
		let actual = openssl::hash::hash(digest_by_oid(alg_oid)?, certificate.der())?;
		if actual.as_ref() != expected.as_slice() {
			return Err(status_error("OCSP CertHash does not match the certificate"));
		}
	}

	// responses produced in the future are rejected rather than reinterpreted
	if parsed.produced_at > now {
		return Err(status_error("OCSP response producedAt lies in the future"));
	}
	let age = (now - parsed.produced_at).to_std().unwrap_or(Duration::ZERO);
	if age > grace_period {
		return Err(status_error("OCSP response is older than the grace period"));
	}

	Ok(OcspResponse {
		status: parsed.status,
		revocation_time: parsed.revocation_time,
		grace_period,
		produced_at: parsed.produced_at,
		received_at,
		from_cache: false,
		raw: bytes.to_vec(),
	})
}

fn find_responder(
	parsed: &ParsedResponse,
	issuer: &Certificate,
	store: &TrustStore,
	extra_responders: &[Certificate],
) -> TslResult<Certificate> {
	let matches_responder = |candidate: &Certificate| -> bool {
		match &parsed.responder {
			ResponderId::ByName(name) => candidate.subject_name_der() == name.as_slice(),
			ResponderId::ByKey(key_hash) => {
				openssl::hash::hash(MessageDigest::sha1(), candidate.public_key_bits())
					.map(|digest| digest.as_ref() == key_hash.as_slice())
					.unwrap_or(false)
			},
		}
	};

	let mut candidates: Vec<&Certificate> = Vec::new();
	candidates.push(issuer);
	candidates.extend(extra_responders);
	candidates.extend(&parsed.embedded_certificates);

	for candidate in candidates {
		if !matches_responder(candidate) {
			continue;
		}
		let authorized = *candidate == *issuer
			|| extra_responders.contains(candidate)
			|| store.is_ocsp_responder_in_tsl(candidate);
		if authorized {
			return Ok(candidate.clone());
		}
		return Err(status_error(format!(
			"OCSP responder {} is not trusted",
			candidate.subject()
		)));
	}
	Err(status_error("OCSP responder certificate not found"))
}
