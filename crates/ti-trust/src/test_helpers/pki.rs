//! Certificate generation for tests: root CAs, issuing CAs, trust list
//! signers, OCSP responders and end-entity certificates with the gematik
//! profile extensions.

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Duration, Utc};
use openssl::asn1::{Asn1Object, Asn1OctetString, Asn1Time};
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{
	BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectKeyIdentifier,
};
use openssl::x509::{X509, X509Builder, X509Extension, X509NameBuilder};

use crate::crypto::{Certificate, der, oids};

static SERIAL: AtomicU32 = AtomicU32::new(1000);

/// A certificate together with its private key.
pub struct TestIdentity {
	pub certificate: Certificate,
	pub key: PKey<Private>,
}

impl TestIdentity {
	pub fn x509(&self) -> X509 {
		X509::from_der(self.certificate.der()).expect("test certificate reparses")
	}
}

pub fn ec_key() -> PKey<Private> {
	let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).expect("curve");
	PKey::from_ec_key(EcKey::generate(&group).expect("ec key")).expect("pkey")
}

fn name(cn: &str) -> openssl::x509::X509Name {
	let mut builder = X509NameBuilder::new().expect("name builder");
	builder.append_entry_by_text("C", "DE").expect("C");
	builder.append_entry_by_text("O", "ti-trust test").expect("O");
	builder.append_entry_by_text("CN", cn).expect("CN");
	builder.build()
}

fn validity(builder: &mut X509Builder, not_before: DateTime<Utc>, not_after: DateTime<Utc>) {
	builder
		.set_not_before(&Asn1Time::from_unix(not_before.timestamp()).expect("notBefore"))
		.expect("notBefore");
	builder
		.set_not_after(&Asn1Time::from_unix(not_after.timestamp()).expect("notAfter"))
		.expect("notAfter");
}

fn next_serial(builder: &mut X509Builder) {
	let serial = SERIAL.fetch_add(1, Ordering::Relaxed);
	let serial = BigNum::from_u32(serial).expect("serial");
	builder
		.set_serial_number(&serial.to_asn1_integer().expect("serial"))
		.expect("serial");
}

fn custom_extension(oid: &str, critical: bool, content: &[u8]) -> X509Extension {
	X509Extension::new_from_der(
		&Asn1Object::from_str(oid).expect("extension oid"),
		critical,
		&Asn1OctetString::new_from_bytes(content).expect("extension content"),
	)
	.expect("extension")
}

/// Self-signed CA certificate valid around now.
pub fn make_root_ca(cn: &str) -> TestIdentity {
	make_root_ca_at(cn, Utc::now() - Duration::days(30), Utc::now() + Duration::days(3650))
}

pub fn make_root_ca_at(
	cn: &str,
	not_before: DateTime<Utc>,
	not_after: DateTime<Utc>,
) -> TestIdentity {
	let key = ec_key();
	let subject = name(cn);
	let mut builder = X509Builder::new().expect("builder");
	builder.set_version(2).expect("version");
	next_serial(&mut builder);
	builder.set_subject_name(&subject).expect("subject");
	builder.set_issuer_name(&subject).expect("issuer");
	builder.set_pubkey(&key).expect("pubkey");
	validity(&mut builder, not_before, not_after);
	builder
		.append_extension(BasicConstraints::new().critical().ca().build().expect("bc"))
		.expect("bc");
	builder
		.append_extension(
			KeyUsage::new()
				.critical()
				.key_cert_sign()
				.crl_sign()
				.digital_signature()
				.build()
				.expect("ku"),
		)
		.expect("ku");
	let ski = {
		let ctx = builder.x509v3_context(None, None);
		SubjectKeyIdentifier::new().build(&ctx).expect("ski")
	};
	builder.append_extension(ski).expect("ski");
	builder.sign(&key, MessageDigest::sha256()).expect("sign");
	TestIdentity {
		certificate: Certificate::from_der(builder.build().to_der().expect("der"))
			.expect("certificate"),
		key,
	}
}

/// CA certificate issued by `issuer`, suitable as a TSL service entry.
pub fn make_issuing_ca(cn: &str, issuer: &TestIdentity) -> TestIdentity {
	let key = ec_key();
	let issuer_x509 = issuer.x509();
	let mut builder = X509Builder::new().expect("builder");
	builder.set_version(2).expect("version");
	next_serial(&mut builder);
	builder.set_subject_name(&name(cn)).expect("subject");
	builder
		.set_issuer_name(issuer_x509.subject_name())
		.expect("issuer");
	builder.set_pubkey(&key).expect("pubkey");
	validity(
		&mut builder,
		Utc::now() - Duration::days(30),
		Utc::now() + Duration::days(1825),
	);
	builder
		.append_extension(BasicConstraints::new().critical().ca().build().expect("bc"))
		.expect("bc");
	builder
		.append_extension(
			KeyUsage::new()
				.critical()
				.key_cert_sign()
				.crl_sign()
				.digital_signature()
				.build()
				.expect("ku"),
		)
		.expect("ku");
	let (ski, aki) = {
		let ctx = builder.x509v3_context(Some(&issuer_x509), None);
		(
			SubjectKeyIdentifier::new().build(&ctx).expect("ski"),
			openssl::x509::extension::AuthorityKeyIdentifier::new()
				.keyid(true)
				.build(&ctx)
				.expect("aki"),
		)
	};
	builder.append_extension(ski).expect("ski");
	builder.append_extension(aki).expect("aki");
	builder
		.sign(&issuer.key, MessageDigest::sha256())
		.expect("sign");
	TestIdentity {
		certificate: Certificate::from_der(builder.build().to_der().expect("der"))
			.expect("certificate"),
		key,
	}
}

/// Declarative description of an end-entity certificate.
pub struct LeafSpec {
	pub cn: String,
	pub policy_oids: Vec<String>,
	pub role_oids: Vec<String>,
	pub qc_statement_oids: Vec<String>,
	pub key_usage: KeyUsageSpec,
	pub eku_client_auth: bool,
	pub eku_server_auth: bool,
	pub eku_other_oids: Vec<String>,
	pub ocsp_url: Option<String>,
	pub not_before: DateTime<Utc>,
	pub not_after: DateTime<Utc>,
	pub telematik_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KeyUsageSpec {
	pub digital_signature: bool,
	pub non_repudiation: bool,
	pub key_encipherment: bool,
	pub data_encipherment: bool,
	pub key_agreement: bool,
}

impl LeafSpec {
	pub fn new(cn: &str) -> Self {
		Self {
			cn: cn.to_string(),
			policy_oids: Vec::new(),
			role_oids: Vec::new(),
			qc_statement_oids: Vec::new(),
			key_usage: KeyUsageSpec::default(),
			eku_client_auth: false,
			eku_server_auth: false,
			eku_other_oids: Vec::new(),
			ocsp_url: None,
			not_before: Utc::now() - Duration::days(1),
			not_after: Utc::now() + Duration::days(365),
			telematik_id: None,
		}
	}

	/// A C.FD.SIG profile leaf, the shape used by IDP signer certificates.
	pub fn fd_sig(cn: &str) -> Self {
		let mut spec = Self::new(cn);
		spec.policy_oids = vec![oids::POLICY_FD_SIG.to_string()];
		spec.role_oids = vec![oids::ROLE_IDPD.to_string()];
		spec.key_usage.digital_signature = true;
		spec
	}

	/// A C.HP.QES profile leaf with a single AIA OCSP URL.
	pub fn hp_qes(cn: &str, ocsp_url: &str) -> Self {
		let mut spec = Self::new(cn);
		spec.policy_oids = vec![oids::POLICY_HBA_QES.to_string()];
		spec.qc_statement_oids = vec![oids::ID_ETSI_QCS_QC_COMPLIANCE.to_string()];
		spec.key_usage.non_repudiation = true;
		spec.ocsp_url = Some(ocsp_url.to_string());
		spec
	}

	/// A C.CH.AUT profile leaf (card authentication).
	pub fn ch_aut(cn: &str) -> Self {
		let mut spec = Self::new(cn);
		spec.policy_oids = vec![oids::POLICY_EGK_AUT.to_string()];
		spec.key_usage.digital_signature = true;
		spec.eku_client_auth = true;
		spec
	}
}

/// End-entity certificate issued by `issuer` with the described profile.
pub fn make_leaf(spec: &LeafSpec, issuer: &TestIdentity) -> TestIdentity {
	let key = ec_key();
	let issuer_x509 = issuer.x509();
	let mut builder = X509Builder::new().expect("builder");
	builder.set_version(2).expect("version");
	next_serial(&mut builder);
	builder.set_subject_name(&name(&spec.cn)).expect("subject");
	builder
		.set_issuer_name(issuer_x509.subject_name())
		.expect("issuer");
	builder.set_pubkey(&key).expect("pubkey");
	validity(&mut builder, spec.not_before, spec.not_after);
	builder
		.append_extension(BasicConstraints::new().critical().build().expect("bc"))
		.expect("bc");

	let mut key_usage = KeyUsage::new();
	key_usage.critical();
	if spec.key_usage.digital_signature {
		key_usage.digital_signature();
	}
	if spec.key_usage.non_repudiation {
		key_usage.non_repudiation();
	}
	if spec.key_usage.key_encipherment {
		key_usage.key_encipherment();
	}
	if spec.key_usage.data_encipherment {
		key_usage.data_encipherment();
	}
	if spec.key_usage.key_agreement {
		key_usage.key_agreement();
	}
	builder
		.append_extension(key_usage.build().expect("ku"))
		.expect("ku");

	if spec.eku_client_auth || spec.eku_server_auth || !spec.eku_other_oids.is_empty() {
		let mut eku = ExtendedKeyUsage::new();
		if spec.eku_client_auth {
			eku.client_auth();
		}
		if spec.eku_server_auth {
			eku.server_auth();
		}
		for other in &spec.eku_other_oids {
			eku.other(other);
		}
		builder.append_extension(eku.build().expect("eku")).expect("eku");
	}

	if !spec.policy_oids.is_empty() {
		let policies: Vec<Vec<u8>> = spec
			.policy_oids
			.iter()
			.map(|oid| der::seq(&[der::oid(oid)]))
			.collect();
		builder
			.append_extension(custom_extension(
				oids::EXT_CERTIFICATE_POLICIES,
				false,
				&der::seq(&policies),
			))
			.expect("policies");
	}

	if !spec.role_oids.is_empty() || spec.telematik_id.is_some() {
		let mut parts: Vec<Vec<u8>> =
			spec.role_oids.iter().map(|oid| der::oid(oid)).collect();
		if let Some(telematik_id) = &spec.telematik_id {
			parts.push(der::tlv(0x13, telematik_id.as_bytes()));
		}
		builder
			.append_extension(custom_extension(
				oids::EXT_ADMISSION,
				false,
				&der::seq(&[der::seq(&parts)]),
			))
			.expect("admission");
	}

	if !spec.qc_statement_oids.is_empty() {
		let statements: Vec<Vec<u8>> = spec
			.qc_statement_oids
			.iter()
			.map(|oid| der::seq(&[der::oid(oid)]))
			.collect();
		builder
			.append_extension(custom_extension(
				oids::EXT_QC_STATEMENTS,
				false,
				&der::seq(&statements),
			))
			.expect("qc statements");
	}

	if let Some(url) = &spec.ocsp_url {
		let access = der::seq(&[der::seq(&[
			der::oid(oids::AD_OCSP),
			der::implicit(6, url.as_bytes()),
		])]);
		builder
			.append_extension(custom_extension(
				oids::EXT_AUTHORITY_INFO_ACCESS,
				false,
				&access,
			))
			.expect("aia");
	}

	let (ski, aki) = {
		let ctx = builder.x509v3_context(Some(&issuer_x509), None);
		(
			SubjectKeyIdentifier::new().build(&ctx).expect("ski"),
			openssl::x509::extension::AuthorityKeyIdentifier::new()
				.keyid(true)
				.build(&ctx)
				.expect("aki"),
		)
	};
	builder.append_extension(ski).expect("ski");
	builder.append_extension(aki).expect("aki");
	builder
		.sign(&issuer.key, MessageDigest::sha256())
		.expect("sign");
	TestIdentity {
		certificate: Certificate::from_der(builder.build().to_der().expect("der"))
			.expect("certificate"),
		key,
	}
}

/// Trust list signer certificate: nonRepudiation plus the tslSigning
/// extended key usage, issued by the trust anchor.
pub fn make_tsl_signer(cn: &str, anchor: &TestIdentity) -> TestIdentity {
	let mut spec = LeafSpec::new(cn);
	spec.key_usage.non_repudiation = true;
	spec.key_usage.digital_signature = true;
	spec.eku_other_oids = vec![oids::EKU_TSL_SIGNING.to_string()];
	make_leaf(&spec, anchor)
}

/// OCSP responder certificate issued by `issuer`.
pub fn make_ocsp_responder(cn: &str, issuer: &TestIdentity) -> TestIdentity {
	let mut spec = LeafSpec::new(cn);
	spec.key_usage.digital_signature = true;
	spec.eku_other_oids = vec![oids::EKU_OCSP_SIGNING.to_string()];
	make_leaf(&spec, issuer)
}
