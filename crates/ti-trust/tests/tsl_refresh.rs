//! Trust list refresh behavior: bootstrap, hash probing, id progression,
//! concurrent refreshes, staleness handling and post-update hooks.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::*;
use parking_lot::Mutex;
use ti_trust::crypto::oids;
use ti_trust::error::TslErrorCode;
use ti_trust::test_helpers::pki::{self, LeafSpec};
use ti_trust::tsl::parser;
use ti_trust::tsl::{CertificateId, TslMode};
use ti_trust::xml::StructuralValidator;
use ti_trust::{OcspCheckDescriptor, OcspCheckMode};

fn descriptor(env: &TestEnv) -> OcspCheckDescriptor {
	OcspCheckDescriptor::new(
		OcspCheckMode::ProvidedOrCache,
		env.config.ocsp_grace_period(),
	)
}

#[tokio::test]
async fn bootstrap_populates_both_stores() {
	let env = TestEnv::new();
	let manager = env.start_manager().await;

	let tsl_health = manager.health_check_tsl();
	assert!(tsl_health.has_tsl);
	assert!(!tsl_health.outdated);
	assert_eq!(tsl_health.id.as_deref(), Some("ID100"));
	assert_eq!(tsl_health.sequence_number, "100");

	let bna_health = manager.health_check_bna();
	assert!(bna_health.has_tsl);
	assert!(!bna_health.outdated);

	let trusted = manager
		.trusted_certificate_store(TslMode::Tsl, None)
		.await
		.unwrap();
	assert!(!trusted.is_empty());
}

#[tokio::test]
async fn hash_probe_prevents_needless_downloads() {
	let env = TestEnv::new();
	let manager = env.start_manager().await;
	assert_eq!(env.client.get_count(TSL_URL), 1);

	manager.update_trust_stores_on_demand().await.unwrap();

	// unchanged hash, current store: probed but not downloaded again
	assert_eq!(env.client.get_count(TSL_SHA2_URL), 1);
	assert_eq!(env.client.get_count(TSL_URL), 1);
	assert_eq!(env.client.get_count(BNA_URL), 1);
}

#[tokio::test]
async fn new_id_with_same_sequence_number_is_rejected() {
	let env = TestEnv::new();
	let manager = env.start_manager().await;

	// same sequence number under a new document id
	env.serve_tsl(env.tsl_builder(Some("ID101"), "100"));
	manager.update_trust_stores_on_demand().await.unwrap();

	// the refresh was aborted and the previous snapshot stays in use
	let health = manager.health_check_tsl();
	assert_eq!(health.id.as_deref(), Some("ID100"));
	assert_eq!(health.sequence_number, "100");

	let leaf = pki::make_leaf(&LeafSpec::fd_sig("IDP Signer"), &env.component_ca);
	env.serve_leaf_ocsp(
		COMPONENT_OCSP_URL,
		&leaf,
		&env.component_ca,
		&ti_trust::test_helpers::ocsp::OcspResponseSpec::good(),
	);
	manager
		.verify_certificate(TslMode::Tsl, &leaf.certificate, &[], &descriptor(&env))
		.await
		.unwrap();
}

#[tokio::test]
async fn concurrent_verifications_trigger_one_download() {
	let env = TestEnv::with_options(EnvOptions {
		tsl_next_update: Utc::now() + Duration::seconds(3),
		..EnvOptions::default()
	});
	let manager = env.start_manager().await;
	assert_eq!(env.client.get_count(TSL_URL), 1);

	// outdate the stored TSL, then offer a successor
	tokio::time::sleep(std::time::Duration::from_secs(4)).await;
	env.serve_tsl(env.tsl_builder(Some("ID101"), "101"));

	let leaf = pki::make_leaf(&LeafSpec::fd_sig("IDP Signer"), &env.component_ca);
	env.serve_leaf_ocsp(
		COMPONENT_OCSP_URL,
		&leaf,
		&env.component_ca,
		&ti_trust::test_helpers::ocsp::OcspResponseSpec::good(),
	);

	let first_descriptor = descriptor(&env);
	let second_descriptor = descriptor(&env);
	let first = manager.verify_certificate(
		TslMode::Tsl,
		&leaf.certificate,
		&[],
		&first_descriptor,
	);
	let second = manager.verify_certificate(
		TslMode::Tsl,
		&leaf.certificate,
		&[],
		&second_descriptor,
	);
	let (first, second) = tokio::join!(first, second);
	first.unwrap();
	second.unwrap();

	// exactly one refresh download for both callers
	assert_eq!(env.client.get_count(TSL_URL), 2);
	assert_eq!(manager.health_check_tsl().sequence_number, "101");
}

#[tokio::test]
async fn stale_store_without_update_fails_until_refresh_succeeds() {
	let env = TestEnv::with_options(EnvOptions {
		tsl_next_update: Utc::now() + Duration::seconds(3),
		..EnvOptions::default()
	});
	let manager = env.start_manager().await;

	// no refreshed document available once the store went stale
	env.client.remove_get_body(TSL_URL);
	env.client.remove_get_body(TSL_SHA2_URL);
	tokio::time::sleep(std::time::Duration::from_secs(4)).await;

	let leaf = pki::make_leaf(&LeafSpec::fd_sig("IDP Signer"), &env.component_ca);
	let err = manager
		.verify_certificate(TslMode::Tsl, &leaf.certificate, &[], &descriptor(&env))
		.await
		.unwrap_err();
	assert_eq!(err.code, TslErrorCode::ValidityWarning2);

	// recovery: a fresh successor document brings the store back
	env.serve_tsl(env.tsl_builder(Some("ID101"), "101"));
	env.serve_leaf_ocsp(
		COMPONENT_OCSP_URL,
		&leaf,
		&env.component_ca,
		&ti_trust::test_helpers::ocsp::OcspResponseSpec::good(),
	);
	manager
		.verify_certificate(TslMode::Tsl, &leaf.certificate, &[], &descriptor(&env))
		.await
		.unwrap();
	assert_eq!(manager.health_check_tsl().sequence_number, "101");
}

#[tokio::test]
async fn post_update_hooks_fire_in_order_and_survive_panics() {
	let env = TestEnv::new();
	let manager = env.start_manager().await;

	let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
	let first = order.clone();
	let hook_one = manager.add_post_update_hook(Box::new(move || first.lock().push(1)));
	manager.add_post_update_hook(Box::new(|| panic!("hook failure")));
	let third = order.clone();
	manager.add_post_update_hook(Box::new(move || third.lock().push(3)));

	env.serve_tsl(env.tsl_builder(Some("ID101"), "101"));
	manager.update_trust_stores_on_demand().await.unwrap();
	assert_eq!(*order.lock(), vec![1, 3]);

	// disabled slots keep ids stable and are skipped
	manager.disable_post_update_hook(hook_one);
	env.serve_tsl(env.tsl_builder(Some("ID102"), "102"));
	manager.update_trust_stores_on_demand().await.unwrap();
	assert_eq!(*order.lock(), vec![1, 3, 3]);
}

#[tokio::test]
async fn bootstrap_fails_without_a_reachable_trust_list() {
	let env = TestEnv::new();
	env.client.remove_get_body(TSL_URL);
	let err = env.try_start_manager().await.unwrap_err();
	assert_eq!(err.code, TslErrorCode::TslInitError);
}

#[tokio::test]
async fn parser_extracts_the_service_information() {
	let env = TestEnv::new();
	let xml = env.serve_tsl(env.tsl_builder(Some("ID200"), "200"));

	let parsed = parser::parse(&xml, TslMode::Tsl, &StructuralValidator).unwrap();
	assert_eq!(parsed.id.as_deref(), Some("ID200"));
	assert_eq!(parsed.sequence_number, "200");
	assert_eq!(parsed.signer_certificate, env.tsl_signer.certificate);
	assert_eq!(parsed.update_urls, vec![TSL_URL.to_string()]);
	assert_eq!(parsed.bna.supply_points, vec![BNA_URL.to_string()]);
	assert_eq!(
		parsed.bna.signer_certificates,
		vec![env.bna_signer.certificate.clone()]
	);
	assert_eq!(parsed.ocsp_certificates.len(), 1);

	let component_entry = parsed
		.service_information
		.get(&CertificateId::of(&env.component_ca.certificate))
		.expect("component CA entry");
	assert_eq!(
		component_entry.supply_points,
		vec![COMPONENT_OCSP_URL.to_string()]
	);
	assert!(component_entry.extension_oids.contains(oids::POLICY_FD_SIG));

	// parsing the same bytes twice yields the same snapshot
	let reparsed = parser::parse(&xml, TslMode::Tsl, &StructuralValidator).unwrap();
	assert_eq!(reparsed.sha256_hex, parsed.sha256_hex);
	assert_eq!(
		reparsed.service_information.len(),
		parsed.service_information.len()
	);
}

#[tokio::test]
async fn announced_signer_ca_rollover_is_recorded() {
	let env = TestEnv::new();
	let next_anchor = pki::make_root_ca("TI Trust Anchor 2");
	let xml = env.serve_tsl(env.tsl_builder(Some("ID300"), "300").ca_service(
		&next_anchor.certificate,
		SIGNER_OCSP_URL,
		&[oids::EKU_TSL_SIGNING],
	));

	let parsed = parser::parse(&xml, TslMode::Tsl, &StructuralValidator).unwrap();
	assert_eq!(
		parsed.new_tsl_signer_ca_ids,
		vec![CertificateId::of(&next_anchor.certificate)]
	);

	// a single accepted announcement stays in the store
	let manager = env.start_manager().await;
	assert!(
		manager
			.trust_store(TslMode::Tsl)
			.service_information(&CertificateId::of(&next_anchor.certificate))
			.is_some()
	);
}

#[tokio::test]
async fn multiple_announced_signer_cas_are_dropped() {
	let env = TestEnv::new();
	let next_a = pki::make_root_ca("TI Trust Anchor 2");
	let next_b = pki::make_root_ca("TI Trust Anchor 3");
	env.serve_tsl(
		env.tsl_builder(Some("ID100"), "100")
			.ca_service(&next_a.certificate, SIGNER_OCSP_URL, &[oids::EKU_TSL_SIGNING])
			.ca_service(&next_b.certificate, SIGNER_OCSP_URL, &[oids::EKU_TSL_SIGNING]),
	);

	let manager = env.start_manager().await;
	let store = manager.trust_store(TslMode::Tsl);
	assert!(
		store
			.service_information(&CertificateId::of(&next_a.certificate))
			.is_none()
	);
	assert!(
		store
			.service_information(&CertificateId::of(&next_b.certificate))
			.is_none()
	);
	// the regular entries survive the dropped announcements
	assert!(
		store
			.service_information(&CertificateId::of(&env.component_ca.certificate))
			.is_some()
	);
}
