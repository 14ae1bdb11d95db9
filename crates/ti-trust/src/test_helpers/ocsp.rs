//! DER assembly of OCSP responses for tests (RFC 6960 BasicOCSPResponse with
//! the BSI TR-03145 CertHash single extension).

use chrono::{DateTime, Duration, Utc};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::sign::Signer;

use crate::crypto::{Certificate, der, oids};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecStatus {
	Good,
	Revoked,
	Unknown,
}

/// Declarative description of the response to assemble.
pub struct OcspResponseSpec {
	pub status: SpecStatus,
	pub revocation_time: Option<DateTime<Utc>>,
	pub produced_at: DateTime<Utc>,
	pub with_cert_hash: bool,
	/// Overrides the correct CertHash digest to fabricate a mismatch.
	pub cert_hash_override: Option<Vec<u8>>,
	/// Identify the responder by key hash instead of by name.
	pub responder_by_key: bool,
	/// Embed the responder certificate in the response.
	pub include_responder_certificate: bool,
}

impl OcspResponseSpec {
	pub fn good() -> Self {
		Self {
			status: SpecStatus::Good,
			revocation_time: None,
			produced_at: Utc::now(),
			with_cert_hash: true,
			cert_hash_override: None,
			responder_by_key: false,
			include_responder_certificate: true,
		}
	}

	pub fn revoked(revocation_time: DateTime<Utc>) -> Self {
		Self {
			status: SpecStatus::Revoked,
			revocation_time: Some(revocation_time),
			..Self::good()
		}
	}

	pub fn unknown() -> Self {
		Self {
			status: SpecStatus::Unknown,
			..Self::good()
		}
	}
}

/// Assembles and signs a complete OCSP response for `leaf`.
pub fn build_ocsp_response(
	leaf: &Certificate,
	issuer: &Certificate,
	responder_certificate: &Certificate,
	responder_key: &PKey<Private>,
	spec: &OcspResponseSpec,
) -> Vec<u8> {
	let sha1 = MessageDigest::sha1();
	let issuer_name_hash =
		openssl::hash::hash(sha1, issuer.subject_name_der()).expect("name hash");
	let issuer_key_hash = openssl::hash::hash(sha1, issuer.public_key_bits()).expect("key hash");
	let serial = hex::decode(leaf.serial_hex()).expect("serial");

	let cert_id = der::seq(&[
		der::seq(&[der::oid(oids::SHA1), der::null()]),
		der::octet_string(&issuer_name_hash),
		der::octet_string(&issuer_key_hash),
		der::integer(&serial),
	]);

	let cert_status = match spec.status {
		SpecStatus::Good => der::tlv(0x80, &[]),
		SpecStatus::Revoked => {
			let time = spec
				.revocation_time
				.unwrap_or_else(|| Utc::now() - Duration::hours(1));
			der::tlv(0xa1, &der::generalized_time(time))
		},
		SpecStatus::Unknown => der::tlv(0x82, &[]),
	};

	let mut single_parts = vec![
		cert_id,
		cert_status,
		der::generalized_time(spec.produced_at),
		der::explicit(0, &der::generalized_time(spec.produced_at + Duration::hours(12))),
	];
	if spec.with_cert_hash {
		let digest = match &spec.cert_hash_override {
			Some(wrong) => wrong.clone(),
			None => openssl::hash::hash(MessageDigest::sha256(), leaf.der())
				.expect("cert hash")
				.to_vec(),
		};
		let cert_hash = der::seq(&[
			der::seq(&[der::oid(oids::SHA256), der::null()]),
			der::octet_string(&digest),
		]);
		let extension = der::seq(&[der::oid(oids::CERT_HASH), der::octet_string(&cert_hash)]);
		single_parts.push(der::explicit(1, &der::seq(&[extension])));
	}
	let single_response = der::seq(&single_parts);

	let responder_id = if spec.responder_by_key {
		let key_hash =
			openssl::hash::hash(sha1, responder_certificate.public_key_bits()).expect("key hash");
		der::explicit(2, &der::octet_string(&key_hash))
	} else {
		der::explicit(1, responder_certificate.subject_name_der())
	};
	let tbs = der::seq(&[
		responder_id,
		der::generalized_time(spec.produced_at),
		der::seq(&[single_response]),
	]);

	let mut signer = Signer::new(MessageDigest::sha256(), responder_key).expect("signer");
	signer.update(&tbs).expect("sign");
	let signature = signer.sign_to_vec().expect("sign");
	let signature_algorithm = if responder_key.ec_key().is_ok() {
		der::seq(&[der::oid(oids::ECDSA_WITH_SHA256)])
	} else {
		der::seq(&[der::oid(oids::SHA256_WITH_RSA), der::null()])
	};

	let mut basic_parts = vec![tbs, signature_algorithm, der::bit_string(&signature)];
	if spec.include_responder_certificate {
		basic_parts.push(der::explicit(
			0,
			&der::seq(&[responder_certificate.der().to_vec()]),
		));
	}
	let basic = der::seq(&basic_parts);

	der::seq(&[
		der::enumerated(0),
		der::explicit(
			0,
			&der::seq(&[
				der::oid(oids::ID_PKIX_OCSP_BASIC),
				der::octet_string(&basic),
			]),
		),
	])
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_helpers::pki;

	#[test]
	fn built_response_parses_back() {
		let root = pki::make_root_ca("Test Root");
		let ca = pki::make_issuing_ca("Test CA", &root);
		let leaf = pki::make_leaf(&pki::LeafSpec::ch_aut("Leaf"), &ca);
		let response = build_ocsp_response(
			&leaf.certificate,
			&ca.certificate,
			&ca.certificate,
			&ca.key,
			&OcspResponseSpec::good(),
		);
		// outermost shape: SEQUENCE { ENUMERATED 0, [0] ... }
		let (outer, rest) = der::read_tlv(&response).unwrap();
		assert!(rest.is_empty());
		let children = der::children(outer.content).unwrap();
		assert_eq!(children[0].tag, der::TAG_ENUMERATED);
		assert!(children[1].is_context(0));
	}
}
