use std::fmt;

use base64::Engine;
use chrono::{DateTime, Utc};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Public};
use openssl::x509::X509;

use crate::crypto::der;
use crate::crypto::oids;
use crate::error::{TslError, TslErrorCode, TslResult};

/// Possible values for the key usage extension bits,
/// RFC 5280 §4.2.1.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUsage {
	DigitalSignature = 0,
	NonRepudiation = 1,
	KeyEncipherment = 2,
	DataEncipherment = 3,
	KeyAgreement = 4,
	KeyCertSign = 5,
	CrlSign = 6,
	EncipherOnly = 7,
	DecipherOnly = 8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedKeyUsage {
	SslServer,
	SslClient,
	OcspSigning,
	TslSigning,
}

impl ExtendedKeyUsage {
	pub fn oid(&self) -> &'static str {
		match self {
			ExtendedKeyUsage::SslServer => oids::EKU_SERVER_AUTH,
			ExtendedKeyUsage::SslClient => oids::EKU_CLIENT_AUTH,
			ExtendedKeyUsage::OcspSigning => oids::EKU_OCSP_SIGNING,
			ExtendedKeyUsage::TslSigning => oids::EKU_TSL_SIGNING,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningAlgorithm {
	RsaPss,
	EllipticCurve,
}

/// Owned, immutable view of a parsed X.509 certificate. All fields the engine
/// needs are extracted once at construction; equality is bitwise equality of
/// the DER encoding.
#[derive(Clone)]
pub struct Certificate {
	der: Vec<u8>,
	subject: String,
	issuer: String,
	subject_name_der: Vec<u8>,
	spki_der: Vec<u8>,
	spki_bits: Vec<u8>,
	serial_hex: String,
	ski_hex: String,
	aki_hex: String,
	sha1_hex: String,
	sha256_hex: String,
	not_before: DateTime<Utc>,
	not_after: DateTime<Utc>,
	signing_algorithm: SigningAlgorithm,
	is_ca: bool,
	key_usage_bits: Option<u16>,
	extended_key_usage: Option<Vec<String>>,
	policy_oids: Option<Vec<String>>,
	role_oids: Vec<String>,
	qc_statement_oids: Vec<String>,
	ocsp_urls: Vec<String>,
	critical_oids: Vec<String>,
	san_dns_names: Vec<String>,
	telematik_id: Option<String>,
}

impl PartialEq for Certificate {
	fn eq(&self, other: &Self) -> bool {
		self.der == other.der
	}
}

impl Eq for Certificate {}

impl std::hash::Hash for Certificate {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		self.der.hash(state);
	}
}

impl fmt::Debug for Certificate {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Certificate")
			.field("subject", &self.subject)
			.field("issuer", &self.issuer)
			.field("serial", &self.serial_hex)
			.finish_non_exhaustive()
	}
}

fn read_error(message: impl Into<String>) -> TslError {
	TslError::new(TslErrorCode::CertReadError, message)
}

impl Certificate {
	pub fn from_der(der: Vec<u8>) -> TslResult<Self> {
		let (_, x509) = x509_parser::parse_x509_certificate(&der)
			.map_err(|e| read_error(format!("invalid certificate encoding: {e}")))?;

		let subject = x509.subject().to_string();
		let issuer = x509.issuer().to_string();
		let subject_name_der = x509.subject().as_raw().to_vec();
		let serial_hex = hex::encode(x509.raw_serial());
		let not_before = DateTime::<Utc>::from_timestamp(x509.validity().not_before.timestamp(), 0)
			.ok_or_else(|| read_error("notBefore outside representable range"))?;
		let not_after = DateTime::<Utc>::from_timestamp(x509.validity().not_after.timestamp(), 0)
			.ok_or_else(|| read_error("notAfter outside representable range"))?;

		let spki = x509.public_key();
		let spki_der = spki.raw.to_vec();
		let spki_bits = spki.subject_public_key.data.as_ref().to_vec();
		let signing_algorithm = if spki.algorithm.algorithm.to_id_string() == oids::EC_PUBLIC_KEY {
			SigningAlgorithm::EllipticCurve
		} else {
			SigningAlgorithm::RsaPss
		};

		let mut ski_hex = String::new();
		let mut aki_hex = String::new();
		let mut is_ca = false;
		let mut key_usage_bits = None;
		let mut extended_key_usage = None;
		let mut policy_oids = None;
		let mut role_oids = Vec::new();
		let mut qc_statement_oids = Vec::new();
		let mut ocsp_urls = Vec::new();
		let mut critical_oids = Vec::new();
		let mut san_dns_names = Vec::new();
		let mut telematik_id = None;

		for ext in x509.extensions() {
			let oid = ext.oid.to_id_string();
			if ext.critical {
				critical_oids.push(oid.clone());
			}
			match oid.as_str() {
				oids::EXT_SUBJECT_KEY_ID => {
					if let Ok((tlv, _)) = der::read_tlv(ext.value) {
						ski_hex = hex::encode(tlv.content);
					}
				},
				oids::EXT_AUTHORITY_KEY_ID => {
					if let Ok((tlv, _)) = der::read_tlv(ext.value)
						&& let Ok(kids) = der::children(tlv.content)
					{
						for kid in kids {
							if kid.is_context(0) {
								aki_hex = hex::encode(kid.content);
							}
						}
					}
				},
				oids::EXT_KEY_USAGE => {
					key_usage_bits = Some(parse_key_usage_bits(ext.value));
				},
				oids::EXT_EXTENDED_KEY_USAGE => {
					let mut usages = Vec::new();
					if let Ok((tlv, _)) = der::read_tlv(ext.value)
						&& let Ok(kids) = der::children(tlv.content)
					{
						for kid in kids {
							if kid.tag == der::TAG_OID
								&& let Ok(usage) = der::decode_oid(kid.content)
							{
								usages.push(usage);
							}
						}
					}
					extended_key_usage = Some(usages);
				},
				oids::EXT_BASIC_CONSTRAINTS => {
					if let Ok((tlv, _)) = der::read_tlv(ext.value)
						&& let Ok(kids) = der::children(tlv.content)
					{
						is_ca = kids
							.first()
							.is_some_and(|k| k.tag == der::TAG_BOOLEAN && k.content != [0]);
					}
				},
				oids::EXT_CERTIFICATE_POLICIES => {
					let mut policies = Vec::new();
					if let Ok((tlv, _)) = der::read_tlv(ext.value)
						&& let Ok(kids) = der::children(tlv.content)
					{
						for info in kids {
							if let Ok(fields) = der::children(info.content)
								&& let Some(first) = fields.first()
								&& first.tag == der::TAG_OID
								&& let Ok(policy) = der::decode_oid(first.content)
							{
								policies.push(policy);
							}
						}
					}
					policy_oids = Some(policies);
				},
				oids::EXT_AUTHORITY_INFO_ACCESS => {
					ocsp_urls = parse_ocsp_urls(ext.value);
				},
				oids::EXT_ADMISSION => {
					role_oids = der::collect_oids(ext.value);
					telematik_id = first_printable_string(ext.value);
				},
				oids::EXT_QC_STATEMENTS => {
					qc_statement_oids = der::collect_oids(ext.value);
				},
				oids::EXT_SUBJECT_ALT_NAME => {
					if let Ok((tlv, _)) = der::read_tlv(ext.value)
						&& let Ok(kids) = der::children(tlv.content)
					{
						for name in kids {
							// dNSName is [2] IMPLICIT IA5String
							if name.is_context(2)
								&& let Ok(text) = std::str::from_utf8(name.content)
							{
								san_dns_names.push(text.to_string());
							}
						}
					}
				},
				_ => {},
			}
		}

		let sha1_hex = hex::encode(openssl::hash::hash(MessageDigest::sha1(), &der)?);
		let sha256_hex = hex::encode(openssl::hash::hash(MessageDigest::sha256(), &der)?);

		Ok(Self {
			der,
			subject,
			issuer,
			subject_name_der,
			spki_der,
			spki_bits,
			serial_hex,
			ski_hex,
			aki_hex,
			sha1_hex,
			sha256_hex,
			not_before,
			not_after,
			signing_algorithm,
			is_ca,
			key_usage_bits,
			extended_key_usage,
			policy_oids,
			role_oids,
			qc_statement_oids,
			ocsp_urls,
			critical_oids,
			san_dns_names,
			telematik_id,
		})
	}

	/// Parses a base64 DER certificate, tolerating embedded whitespace.
	pub fn from_base64_der(text: &str) -> TslResult<Self> {
		let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
		let der = base64::engine::general_purpose::STANDARD
			.decode(compact.as_bytes())
			.map_err(|e| read_error(format!("invalid base64 certificate: {e}")))?;
		Self::from_der(der)
	}

	pub fn from_pem(pem: &str) -> TslResult<Self> {
		let body: String = pem
			.lines()
			.filter(|line| !line.starts_with("-----"))
			.collect();
		Self::from_base64_der(&body)
	}

	pub fn to_base64(&self) -> String {
		base64::engine::general_purpose::STANDARD.encode(&self.der)
	}

	pub fn to_pem(&self) -> String {
		let body = self.to_base64();
		let mut out = String::from("-----BEGIN CERTIFICATE-----\n");
		for chunk in body.as_bytes().chunks(64) {
			out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
			out.push('\n');
		}
		out.push_str("-----END CERTIFICATE-----\n");
		out
	}

	pub fn der(&self) -> &[u8] {
		&self.der
	}

	pub fn subject(&self) -> &str {
		&self.subject
	}

	pub fn issuer(&self) -> &str {
		&self.issuer
	}

	/// Raw DER of the subject Name, needed for OCSP issuer name hashes.
	pub fn subject_name_der(&self) -> &[u8] {
		&self.subject_name_der
	}

	/// Raw subjectPublicKey bits, needed for OCSP issuer key hashes.
	pub fn public_key_bits(&self) -> &[u8] {
		&self.spki_bits
	}

	pub fn serial_hex(&self) -> &str {
		&self.serial_hex
	}

	pub fn subject_key_identifier(&self) -> &str {
		&self.ski_hex
	}

	pub fn authority_key_identifier(&self) -> &str {
		&self.aki_hex
	}

	pub fn sha1_fingerprint_hex(&self) -> &str {
		&self.sha1_hex
	}

	pub fn sha256_fingerprint_hex(&self) -> &str {
		&self.sha256_hex
	}

	pub fn not_before(&self) -> DateTime<Utc> {
		self.not_before
	}

	pub fn not_after(&self) -> DateTime<Utc> {
		self.not_after
	}

	pub fn signing_algorithm(&self) -> SigningAlgorithm {
		self.signing_algorithm
	}

	pub fn is_ca(&self) -> bool {
		self.is_ca
	}

	pub fn ocsp_urls(&self) -> &[String] {
		&self.ocsp_urls
	}

	pub fn role_oids(&self) -> &[String] {
		&self.role_oids
	}

	pub fn telematik_id(&self) -> Option<&str> {
		self.telematik_id.as_deref()
	}

	pub fn subject_alternative_dns_names(&self) -> &[String] {
		&self.san_dns_names
	}

	pub fn check_validity_period(&self, at: Option<DateTime<Utc>>) -> bool {
		let at = at.unwrap_or_else(Utc::now);
		self.not_before <= at && at <= self.not_after
	}

	pub fn has_certificate_policy(&self) -> bool {
		self.policy_oids.is_some()
	}

	pub fn check_certificate_policy(&self, policy_oid: &str) -> bool {
		self.policy_oids
			.as_deref()
			.is_some_and(|policies| policies.iter().any(|p| p == policy_oid))
	}

	/// True when the admission extension carries at least one of the roles.
	pub fn check_roles(&self, role_oids: &[&str]) -> bool {
		self.role_oids
			.iter()
			.any(|role| role_oids.contains(&role.as_str()))
	}

	pub fn check_qc_statement(&self, statement_oid: &str) -> bool {
		self.qc_statement_oids.iter().any(|o| o == statement_oid)
	}

	/// The key usage extension must be present and every requested bit set.
	pub fn check_key_usage(&self, usages: &[KeyUsage]) -> bool {
		match self.key_usage_bits {
			Some(bits) => usages.iter().all(|u| bits & (1 << *u as u16) != 0),
			None => false,
		}
	}

	/// An empty expectation always passes; otherwise the extension must be
	/// present and carry every requested usage.
	pub fn check_extended_key_usage(&self, usages: &[ExtendedKeyUsage]) -> bool {
		if usages.is_empty() {
			return true;
		}
		match self.extended_key_usage.as_deref() {
			Some(present) => usages
				.iter()
				.all(|u| present.iter().any(|oid| oid == u.oid())),
			None => false,
		}
	}

	pub fn has_extended_key_usage_oid(&self, oid: &str) -> bool {
		self.extended_key_usage
			.as_deref()
			.is_some_and(|present| present.iter().any(|o| o == oid))
	}

	/// All critical extensions must come from the accepted set.
	pub fn check_critical_extensions(&self, accepted_oids: &[&str]) -> bool {
		self.critical_oids
			.iter()
			.all(|oid| accepted_oids.contains(&oid.as_str()))
	}

	pub fn to_x509(&self) -> TslResult<X509> {
		X509::from_der(&self.der).map_err(TslError::from)
	}

	pub fn public_key(&self) -> TslResult<PKey<Public>> {
		PKey::public_key_from_der(&self.spki_der).map_err(TslError::from)
	}

	/// Mathematical signature check only, no chain walk and no validity
	/// period evaluation.
	pub fn verify_signed_by(&self, issuer: &Certificate) -> bool {
		let Ok(cert) = self.to_x509() else {
			return false;
		};
		let Ok(key) = issuer.public_key() else {
			return false;
		};
		cert.verify(&key).unwrap_or(false)
	}
}

fn parse_key_usage_bits(value: &[u8]) -> u16 {
	let Ok((tlv, _)) = der::read_tlv(value) else {
		return 0;
	};
	if tlv.tag != der::TAG_BIT_STRING || tlv.content.len() < 2 {
		return 0;
	}
	let bytes = &tlv.content[1..];
	let mut bits = 0u16;
	for position in 0..9u16 {
		let index = (position / 8) as usize;
		if index < bytes.len() && bytes[index] & (0x80 >> (position % 8)) != 0 {
			bits |= 1 << position;
		}
	}
	bits
}

fn parse_ocsp_urls(value: &[u8]) -> Vec<String> {
	let mut urls = Vec::new();
	let Ok((tlv, _)) = der::read_tlv(value) else {
		return urls;
	};
	let Ok(descriptions) = der::children(tlv.content) else {
		return urls;
	};
	for description in descriptions {
		let Ok(fields) = der::children(description.content) else {
			continue;
		};
		let [method, location, ..] = fields.as_slice() else {
			continue;
		};
		let is_ocsp = method.tag == der::TAG_OID
			&& der::decode_oid(method.content).as_deref() == Ok(oids::AD_OCSP);
		// uniformResourceIdentifier is [6] IMPLICIT IA5String
		if is_ocsp && location.is_context(6) {
			if let Ok(url) = std::str::from_utf8(location.content) {
				urls.push(url.to_string());
			}
		}
	}
	urls
}

fn first_printable_string(value: &[u8]) -> Option<String> {
	fn walk(mut input: &[u8]) -> Option<String> {
		while let Ok((tlv, rest)) = der::read_tlv(input) {
			// PrintableString or IA5String
			if (tlv.tag == 0x13 || tlv.tag == 0x16) && !tlv.content.is_empty() {
				if let Ok(text) = std::str::from_utf8(tlv.content) {
					return Some(text.to_string());
				}
			}
			if tlv.is_constructed()
				&& let Some(found) = walk(tlv.content)
			{
				return Some(found);
			}
			input = rest;
		}
		None
	}
	walk(value)
}
