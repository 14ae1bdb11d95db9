//! The certificate verification pipeline: type restrictions, CA acceptance,
//! OCSP status handling, hash-extension enforcement, QES URL resolution and
//! the response cache.

mod common;

use chrono::{Duration, Utc};
use common::*;
use ti_trust::crypto::oids;
use ti_trust::error::TslErrorCode;
use ti_trust::test_helpers::ocsp::OcspResponseSpec;
use ti_trust::test_helpers::pki::{self, LeafSpec};
use ti_trust::test_helpers::tsl::ServiceEntry;
use ti_trust::tsl::{SERVICE_STATUS_REVOKED, TslMode};
use ti_trust::{CertificateType, OcspCheckDescriptor, OcspCheckMode};

fn descriptor(env: &TestEnv) -> OcspCheckDescriptor {
	OcspCheckDescriptor::new(
		OcspCheckMode::ProvidedOrCache,
		env.config.ocsp_grace_period(),
	)
}

#[tokio::test]
async fn accepts_a_valid_component_certificate() {
	let env = TestEnv::new();
	let manager = env.start_manager().await;
	let leaf = pki::make_leaf(&LeafSpec::fd_sig("Fachdienst Signer"), &env.component_ca);
	env.serve_leaf_ocsp(
		COMPONENT_OCSP_URL,
		&leaf,
		&env.component_ca,
		&OcspResponseSpec::good(),
	);

	manager
		.verify_certificate(
			TslMode::Tsl,
			&leaf.certificate,
			&[CertificateType::C_FD_SIG],
			&descriptor(&env),
		)
		.await
		.unwrap();
}

#[tokio::test]
async fn type_restrictions_reject_other_profiles() {
	let env = TestEnv::new();
	let manager = env.start_manager().await;
	let leaf = pki::make_leaf(&LeafSpec::fd_sig("Fachdienst Signer"), &env.component_ca);
	env.serve_leaf_ocsp(
		COMPONENT_OCSP_URL,
		&leaf,
		&env.component_ca,
		&OcspResponseSpec::good(),
	);

	let err = manager
		.verify_certificate(
			TslMode::Tsl,
			&leaf.certificate,
			&[CertificateType::C_HCI_ENC],
			&descriptor(&env),
		)
		.await
		.unwrap_err();
	assert_eq!(err.code, TslErrorCode::CertTypeMismatch);
}

#[tokio::test]
async fn unknown_issuer_is_distinguished_from_aki_mismatch() {
	let env = TestEnv::new();
	let manager = env.start_manager().await;

	// issuer completely unknown
	let stranger_ca = pki::make_root_ca("Unknown CA");
	let leaf = pki::make_leaf(&LeafSpec::fd_sig("Stray"), &stranger_ca);
	let err = manager
		.verify_certificate(TslMode::Tsl, &leaf.certificate, &[], &descriptor(&env))
		.await
		.unwrap_err();
	assert_eq!(err.code, TslErrorCode::CaCertMissing);
}

#[tokio::test]
async fn revoked_ca_rejects_certificates_issued_after_revocation() {
	let env = TestEnv::new();
	let revoked_ca = pki::make_issuing_ca("Revoked CA", &env.anchor);
	let mut entry = ServiceEntry::new(
		ti_trust::tsl::SERVICE_TYPE_CA_PKC,
		vec![revoked_ca.certificate.clone()],
	);
	entry.supply_points.push(COMPONENT_OCSP_URL.to_string());
	entry.extension_oids = vec![oids::POLICY_FD_SIG.to_string()];
	entry.status = SERVICE_STATUS_REVOKED.to_string();
	entry.status_starting_time = Utc::now() - Duration::days(10);
	entry.history.push((
		Utc::now() - Duration::days(400),
		ti_trust::tsl::SERVICE_STATUS_ACCEPTED.to_string(),
	));
	env.serve_tsl(env.tsl_builder(Some("ID100"), "100").service(entry));

	let manager = env.start_manager().await;

	// issued after the revocation took effect
	let leaf = pki::make_leaf(&LeafSpec::fd_sig("Late Leaf"), &revoked_ca);
	let err = manager
		.verify_certificate(TslMode::Tsl, &leaf.certificate, &[], &descriptor(&env))
		.await
		.unwrap_err();
	assert_eq!(err.code, TslErrorCode::CaCertificateRevokedInTsl);

	// issued while the CA was still accepted
	let mut early = LeafSpec::fd_sig("Early Leaf");
	early.not_before = Utc::now() - Duration::days(30);
	let early_leaf = pki::make_leaf(&early, &revoked_ca);
	env.serve_leaf_ocsp(
		COMPONENT_OCSP_URL,
		&early_leaf,
		&revoked_ca,
		&OcspResponseSpec::good(),
	);
	manager
		.verify_certificate(TslMode::Tsl, &early_leaf.certificate, &[], &descriptor(&env))
		.await
		.unwrap();
}

#[tokio::test]
async fn ca_must_be_authorized_for_the_certificate_type() {
	let env = TestEnv::new();
	let manager = env.start_manager().await;

	// component CA is not authorized for SMC-B encryption certificates
	let mut spec = LeafSpec::new("SMC-B Enc");
	spec.policy_oids = vec![oids::POLICY_SMC_B_ENC.to_string()];
	spec.key_usage.key_agreement = true;
	let leaf = pki::make_leaf(&spec, &env.component_ca);
	let err = manager
		.verify_certificate(TslMode::Tsl, &leaf.certificate, &[], &descriptor(&env))
		.await
		.unwrap_err();
	assert_eq!(err.code, TslErrorCode::CertTypeCaNotAuthorized);
}

#[tokio::test]
async fn revoked_and_unknown_ocsp_statuses_are_raised() {
	let env = TestEnv::new();
	let manager = env.start_manager().await;

	let leaf = pki::make_leaf(&LeafSpec::fd_sig("Revoked Leaf"), &env.component_ca);
	env.serve_leaf_ocsp(
		COMPONENT_OCSP_URL,
		&leaf,
		&env.component_ca,
		&OcspResponseSpec::revoked(Utc::now() - Duration::hours(1)),
	);
	let err = manager
		.verify_certificate(TslMode::Tsl, &leaf.certificate, &[], &descriptor(&env))
		.await
		.unwrap_err();
	assert_eq!(err.code, TslErrorCode::OcspCertRevoked);

	let other = pki::make_leaf(&LeafSpec::fd_sig("Unknown Leaf"), &env.component_ca);
	env.serve_leaf_ocsp(
		COMPONENT_OCSP_URL,
		&other,
		&env.component_ca,
		&OcspResponseSpec::unknown(),
	);
	let err = manager
		.verify_certificate(TslMode::Tsl, &other.certificate, &[], &descriptor(&env))
		.await
		.unwrap_err();
	assert_eq!(err.code, TslErrorCode::OcspCertUnknown);
}

#[tokio::test]
async fn revocation_in_the_future_of_the_reference_time_is_tolerated() {
	let env = TestEnv::new();
	let manager = env.start_manager().await;

	let leaf = pki::make_leaf(&LeafSpec::fd_sig("Leaf"), &env.component_ca);
	env.serve_leaf_ocsp(
		COMPONENT_OCSP_URL,
		&leaf,
		&env.component_ca,
		&OcspResponseSpec::revoked(Utc::now() + Duration::hours(2)),
	);
	let mut descriptor = descriptor(&env);
	descriptor.reference_time_point = Some(Utc::now());
	manager
		.verify_certificate(TslMode::Tsl, &leaf.certificate, &[], &descriptor)
		.await
		.unwrap();
}

#[tokio::test]
async fn missing_cert_hash_fails_for_profiles_that_require_it() {
	let env = TestEnv::new();
	let manager = env.start_manager().await;

	let mut spec = OcspResponseSpec::good();
	spec.with_cert_hash = false;

	// C.FD.SIG requires the hash extension
	let leaf = pki::make_leaf(&LeafSpec::fd_sig("Fachdienst"), &env.component_ca);
	env.serve_leaf_ocsp(COMPONENT_OCSP_URL, &leaf, &env.component_ca, &spec);
	let err = manager
		.verify_certificate(TslMode::Tsl, &leaf.certificate, &[], &descriptor(&env))
		.await
		.unwrap_err();
	assert_eq!(err.code, TslErrorCode::OcspStatusError);

	// card authentication certificates tolerate its absence
	let card = pki::make_leaf(&LeafSpec::ch_aut("Card"), &env.component_ca);
	env.serve_leaf_ocsp(COMPONENT_OCSP_URL, &card, &env.component_ca, &spec);
	manager
		.verify_certificate(TslMode::Tsl, &card.certificate, &[], &descriptor(&env))
		.await
		.unwrap();
}

#[tokio::test]
async fn wrong_cert_hash_is_rejected() {
	let env = TestEnv::new();
	let manager = env.start_manager().await;

	let leaf = pki::make_leaf(&LeafSpec::fd_sig("Fachdienst"), &env.component_ca);
	let mut spec = OcspResponseSpec::good();
	spec.cert_hash_override = Some(vec![0u8; 32]);
	env.serve_leaf_ocsp(COMPONENT_OCSP_URL, &leaf, &env.component_ca, &spec);

	let err = manager
		.verify_certificate(TslMode::Tsl, &leaf.certificate, &[], &descriptor(&env))
		.await
		.unwrap_err();
	assert_eq!(err.code, TslErrorCode::OcspStatusError);
}

#[tokio::test]
async fn cached_response_is_reused_within_the_grace_period() {
	let env = TestEnv::new();
	let manager = env.start_manager().await;
	let leaf = pki::make_leaf(&LeafSpec::fd_sig("Cached Leaf"), &env.component_ca);
	env.serve_leaf_ocsp(
		COMPONENT_OCSP_URL,
		&leaf,
		&env.component_ca,
		&OcspResponseSpec::good(),
	);

	let first = manager
		.get_certificate_ocsp_response(
			TslMode::Tsl,
			&leaf.certificate,
			&[],
			&descriptor(&env),
		)
		.await
		.unwrap();
	assert!(!first.from_cache);
	assert_eq!(env.client.post_count(COMPONENT_OCSP_URL), 1);

	let second = manager
		.get_certificate_ocsp_response(
			TslMode::Tsl,
			&leaf.certificate,
			&[],
			&descriptor(&env),
		)
		.await
		.unwrap();
	assert!(second.from_cache);
	assert_eq!(env.client.post_count(COMPONENT_OCSP_URL), 1);
}

#[tokio::test]
async fn expired_cache_entries_are_evicted_on_touch() {
	let env = TestEnv::new();
	let manager = env.start_manager().await;
	let leaf = pki::make_leaf(&LeafSpec::fd_sig("Stale Cache"), &env.component_ca);

	let store = manager.trust_store(TslMode::Tsl);
	let stale = ti_trust::OcspResponse {
		status: ti_trust::CertificateStatus::Good,
		revocation_time: None,
		grace_period: env.config.ocsp_grace_period(),
		produced_at: Utc::now() - Duration::seconds(601),
		received_at: Utc::now() - Duration::seconds(601),
		from_cache: false,
		raw: Vec::new(),
	};
	store.set_cached_ocsp_response(leaf.certificate.sha256_fingerprint_hex(), stale);

	// older than its own grace period: gone on the next touch
	assert!(
		store
			.cached_ocsp_response(leaf.certificate.sha256_fingerprint_hex())
			.is_none()
	);
}

#[tokio::test]
async fn failed_verification_evicts_the_cached_response() {
	let env = TestEnv::new();
	let manager = env.start_manager().await;
	let leaf = pki::make_leaf(&LeafSpec::fd_sig("Evicted"), &env.component_ca);
	env.serve_leaf_ocsp(
		COMPONENT_OCSP_URL,
		&leaf,
		&env.component_ca,
		&OcspResponseSpec::good(),
	);

	manager
		.verify_certificate(TslMode::Tsl, &leaf.certificate, &[], &descriptor(&env))
		.await
		.unwrap();
	let store = manager.trust_store(TslMode::Tsl);
	assert!(
		store
			.cached_ocsp_response(leaf.certificate.sha256_fingerprint_hex())
			.is_some()
	);

	// the same certificate under a failing restriction loses its cache entry
	let err = manager
		.verify_certificate(
			TslMode::Tsl,
			&leaf.certificate,
			&[CertificateType::C_HCI_ENC],
			&descriptor(&env),
		)
		.await
		.unwrap_err();
	assert_eq!(err.code, TslErrorCode::CertTypeMismatch);
	assert!(
		store
			.cached_ocsp_response(leaf.certificate.sha256_fingerprint_hex())
			.is_none()
	);
}

#[tokio::test]
async fn qes_certificate_uses_the_ti_ocsp_proxy() {
	let env = TestEnv::with_options(EnvOptions {
		ti_ocsp_proxy_url: Some("http://proxy/".to_string()),
		..EnvOptions::default()
	});
	let manager = env.start_manager().await;

	let leaf = pki::make_leaf(&LeafSpec::hp_qes("Arzt QES", QES_AIA_URL), &env.qes_ca);
	let proxied_url = format!("http://proxy/{QES_AIA_URL}");
	env.serve_leaf_ocsp(&proxied_url, &leaf, &env.qes_ca, &OcspResponseSpec::good());

	manager
		.verify_certificate(
			TslMode::Bna,
			&leaf.certificate,
			&[CertificateType::C_HP_QES],
			&descriptor(&env),
		)
		.await
		.unwrap();
	assert_eq!(env.client.post_count(&proxied_url), 1);
	assert_eq!(env.client.post_count(QES_AIA_URL), 0);
}

#[tokio::test]
async fn qes_certificate_prefers_the_bnetza_ocsp_mapping() {
	let mapped_url = "http://ocsp.mapped.example/";
	let env = TestEnv::with_options(EnvOptions {
		ti_ocsp_proxy_url: Some("http://proxy/".to_string()),
		qes_mapping: vec![(QES_AIA_URL.to_string(), mapped_url.to_string())],
		..EnvOptions::default()
	});
	let manager = env.start_manager().await;

	let leaf = pki::make_leaf(&LeafSpec::hp_qes("Arzt QES", QES_AIA_URL), &env.qes_ca);
	env.serve_leaf_ocsp(mapped_url, &leaf, &env.qes_ca, &OcspResponseSpec::good());

	manager
		.verify_certificate(
			TslMode::Bna,
			&leaf.certificate,
			&[CertificateType::C_HP_QES],
			&descriptor(&env),
		)
		.await
		.unwrap();
	assert_eq!(env.client.post_count(mapped_url), 1);
}

#[tokio::test]
async fn qes_without_qc_statement_is_rejected() {
	let env = TestEnv::new();
	let manager = env.start_manager().await;

	let mut spec = LeafSpec::hp_qes("No QC", QES_AIA_URL);
	spec.qc_statement_oids.clear();
	let leaf = pki::make_leaf(&spec, &env.qes_ca);
	let err = manager
		.verify_certificate(TslMode::Bna, &leaf.certificate, &[], &descriptor(&env))
		.await
		.unwrap_err();
	assert_eq!(err.code, TslErrorCode::QcStatementError);
}

#[tokio::test]
async fn expired_certificate_is_rejected_in_time() {
	let env = TestEnv::new();
	let manager = env.start_manager().await;

	let mut spec = LeafSpec::fd_sig("Expired");
	spec.not_before = Utc::now() - Duration::days(730);
	spec.not_after = Utc::now() - Duration::days(365);
	let leaf = pki::make_leaf(&spec, &env.component_ca);
	let err = manager
		.verify_certificate(TslMode::Tsl, &leaf.certificate, &[], &descriptor(&env))
		.await
		.unwrap_err();
	assert_eq!(err.code, TslErrorCode::CertificateNotValidTime);
}
