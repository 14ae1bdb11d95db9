//! IDP signer certificate updates: discovery parsing, verification through
//! the trust stores, failure handling and the staleness reset.

mod common;

use std::sync::Arc;

use base64::Engine;
use common::*;
use ti_trust::test_helpers::ocsp::OcspResponseSpec;
use ti_trust::test_helpers::pki::{self, LeafSpec, TestIdentity};
use ti_trust::timer::TokioTimer;
use ti_trust::{IdpCertUpdater, IdpCertificateHolder};

const WELLKNOWN_URL: &str = "https://idp.example/.well-known/openid-configuration";
const KEYS_URL: &str = "https://idp.example/keys";

fn wellknown_jws() -> String {
	let header = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(br#"{"alg":"BP256R1"}"#);
	let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
		.encode(format!(r#"{{"uri_puk_idp_sig":"{KEYS_URL}"}}"#).as_bytes());
	format!("{header}.{payload}.c2lnbmF0dXJl")
}

fn jwk_with(certificates: &[&TestIdentity]) -> String {
	let x5c: Vec<String> = certificates
		.iter()
		.map(|identity| identity.certificate.to_base64())
		.collect();
	serde_json::json!({
		"kid": "puk_idp_sig",
		"kty": "EC",
		"x5c": x5c,
	})
	.to_string()
}

fn serve_idp_endpoints(env: &TestEnv, signer: &TestIdentity) {
	env.client
		.set_get_body(WELLKNOWN_URL, wellknown_jws().into_bytes());
	env.client
		.set_get_body(KEYS_URL, jwk_with(&[signer]).into_bytes());
	env.serve_leaf_ocsp(
		COMPONENT_OCSP_URL,
		signer,
		&env.component_ca,
		&OcspResponseSpec::good(),
	);
}

#[tokio::test]
async fn publishes_a_verified_idp_certificate() {
	let env = TestEnv::new();
	let manager = env.start_manager().await;
	let idp_signer = pki::make_leaf(&LeafSpec::fd_sig("IDP Signer"), &env.component_ca);
	serve_idp_endpoints(&env, &idp_signer);

	let holder = Arc::new(IdpCertificateHolder::new());
	let _updater = IdpCertUpdater::start(
		holder.clone(),
		manager,
		env.client.clone(),
		Arc::new(TokioTimer::new()),
		env.config.clone(),
	)
	.await
	.unwrap();

	assert!(holder.is_healthy());
	assert_eq!(
		holder.certificate().as_deref(),
		Some(&idp_signer.certificate)
	);
}

#[tokio::test]
async fn wellknown_failure_without_prior_success_resets_the_certificate() {
	let env = TestEnv::new();
	let manager = env.start_manager().await;
	// nothing served at the well-known endpoint

	let holder = Arc::new(IdpCertificateHolder::new());
	let stale = pki::make_leaf(&LeafSpec::fd_sig("Stale IDP Signer"), &env.component_ca);
	holder.set_certificate(stale.certificate.clone());

	let _updater = IdpCertUpdater::start(
		holder.clone(),
		manager,
		env.client.clone(),
		Arc::new(TokioTimer::new()),
		env.config.clone(),
	)
	.await
	.unwrap();

	// no update ever succeeded: the stale certificate is withdrawn
	assert!(!holder.is_healthy());
	assert!(holder.certificate().is_none());
}

#[tokio::test]
async fn more_than_one_x5c_certificate_is_a_discovery_failure() {
	let env = TestEnv::new();
	let manager = env.start_manager().await;
	let idp_signer = pki::make_leaf(&LeafSpec::fd_sig("IDP Signer"), &env.component_ca);
	let spare = pki::make_leaf(&LeafSpec::fd_sig("Spare"), &env.component_ca);
	env.client
		.set_get_body(WELLKNOWN_URL, wellknown_jws().into_bytes());
	env.client
		.set_get_body(KEYS_URL, jwk_with(&[&idp_signer, &spare]).into_bytes());

	let holder = Arc::new(IdpCertificateHolder::new());
	let _updater = IdpCertUpdater::start(
		holder.clone(),
		manager,
		env.client.clone(),
		Arc::new(TokioTimer::new()),
		env.config.clone(),
	)
	.await
	.unwrap();

	assert!(!holder.is_healthy());
}

#[tokio::test]
async fn verification_failure_keeps_the_certificate_unpublished() {
	let env = TestEnv::new();
	let manager = env.start_manager().await;
	// signed by a CA outside the trust list
	let rogue_ca = pki::make_root_ca("Rogue CA");
	let rogue_signer = pki::make_leaf(&LeafSpec::fd_sig("Rogue IDP Signer"), &rogue_ca);
	env.client
		.set_get_body(WELLKNOWN_URL, wellknown_jws().into_bytes());
	env.client
		.set_get_body(KEYS_URL, jwk_with(&[&rogue_signer]).into_bytes());

	let holder = Arc::new(IdpCertificateHolder::new());
	let _updater = IdpCertUpdater::start(
		holder.clone(),
		manager,
		env.client.clone(),
		Arc::new(TokioTimer::new()),
		env.config.clone(),
	)
	.await
	.unwrap();

	assert!(holder.certificate().is_none());
}

#[tokio::test]
async fn a_trust_list_refresh_triggers_an_idp_update() {
	let env = TestEnv::new();
	let manager = env.start_manager().await;
	let idp_signer = pki::make_leaf(&LeafSpec::fd_sig("IDP Signer"), &env.component_ca);

	// first update fails, the discovery document appears later
	let holder = Arc::new(IdpCertificateHolder::new());
	let updater = IdpCertUpdater::start(
		holder.clone(),
		manager.clone(),
		env.client.clone(),
		Arc::new(TokioTimer::new()),
		env.config.clone(),
	)
	.await
	.unwrap();
	assert!(!holder.is_healthy());

	serve_idp_endpoints(&env, &idp_signer);
	env.serve_tsl(env.tsl_builder(Some("ID101"), "101"));
	manager.update_trust_stores_on_demand().await.unwrap();

	// the post-update hook spawns the refresh; give it a moment
	for _ in 0..50 {
		if holder.is_healthy() {
			break;
		}
		tokio::time::sleep(std::time::Duration::from_millis(20)).await;
	}
	assert!(holder.is_healthy());
	drop(updater);
}

#[tokio::test]
async fn non_https_endpoints_are_rejected() {
	let env = TestEnv::new();
	let manager = env.start_manager().await;
	let mut config = (*env.config).clone();
	config.idp.update_endpoint = "http://idp.example/.well-known/openid-configuration".into();

	let holder = Arc::new(IdpCertificateHolder::new());
	let result = IdpCertUpdater::start(
		holder,
		manager,
		env.client.clone(),
		Arc::new(TokioTimer::new()),
		Arc::new(config),
	)
	.await;
	assert!(result.is_err());
}
