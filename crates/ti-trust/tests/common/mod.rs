//! Shared fixture environment: a complete miniature Telematik PKI, trust
//! list documents served from an in-memory transport and a ready-to-start
//! manager.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Duration, Utc};
use ti_trust::client::HttpClient;
use ti_trust::config::Config;
use ti_trust::crypto::oids;
use ti_trust::test_helpers::http::InMemoryHttpClient;
use ti_trust::test_helpers::ocsp::{OcspResponseSpec, build_ocsp_response};
use ti_trust::test_helpers::pki::{self, TestIdentity};
use ti_trust::test_helpers::tsl::{TslFixtureBuilder, sha2_of};
use ti_trust::tsl::manager::TslManager;
use ti_trust::xml::StructuralValidator;

pub const TSL_URL: &str = "https://tsl.example/TSL.xml";
pub const TSL_SHA2_URL: &str = "https://tsl.example/TSL.sha2";
pub const BNA_URL: &str = "https://bna.example/BNA.xml";
pub const BNA_SHA2_URL: &str = "https://bna.example/BNA.sha2";
pub const SIGNER_OCSP_URL: &str = "http://ocsp.tsl.example/";
pub const COMPONENT_OCSP_URL: &str = "http://ocsp.component.example/";
pub const QES_AIA_URL: &str = "http://ocsp.qes.example/";

static ANCHOR_FILE_COUNTER: AtomicUsize = AtomicUsize::new(0);

pub struct TestEnv {
	pub anchor: TestIdentity,
	pub tsl_signer: TestIdentity,
	pub tsl_responder: TestIdentity,
	pub component_ca: TestIdentity,
	pub bna_root: TestIdentity,
	pub bna_signer: TestIdentity,
	pub qes_ca: TestIdentity,
	pub client: Arc<InMemoryHttpClient>,
	pub config: Arc<Config>,
	pub qes_mapping: Vec<(String, String)>,
	anchor_path: PathBuf,
}

impl Drop for TestEnv {
	fn drop(&mut self) {
		let _ = std::fs::remove_file(&self.anchor_path);
	}
}

pub struct EnvOptions {
	pub tsl_next_update: DateTime<Utc>,
	pub ti_ocsp_proxy_url: Option<String>,
	pub qes_mapping: Vec<(String, String)>,
}

impl Default for EnvOptions {
	fn default() -> Self {
		Self {
			tsl_next_update: Utc::now() + Duration::hours(24),
			ti_ocsp_proxy_url: None,
			qes_mapping: Vec::new(),
		}
	}
}

impl TestEnv {
	pub fn new() -> Self {
		Self::with_options(EnvOptions::default())
	}

	pub fn with_options(options: EnvOptions) -> Self {
		let anchor = pki::make_root_ca("TI Trust Anchor");
		let tsl_signer = pki::make_tsl_signer("Gematik TSL Signer", &anchor);
		let tsl_responder = pki::make_ocsp_responder("TSL OCSP Responder", &anchor);
		let component_ca = pki::make_issuing_ca("Komponenten CA", &anchor);
		let bna_root = pki::make_root_ca("BNetzA Root");
		let bna_signer = pki::make_tsl_signer("BNetzA VL Signer", &bna_root);
		let qes_ca = pki::make_issuing_ca("QES CA", &bna_root);

		let anchor_path = std::env::temp_dir().join(format!(
			"ti-trust-anchor-{}-{}.der",
			std::process::id(),
			ANCHOR_FILE_COUNTER.fetch_add(1, Ordering::Relaxed)
		));
		std::fs::write(&anchor_path, anchor.certificate.der()).expect("anchor file");

		let config: Config = serde_json::from_value(serde_json::json!({
			"tsl": {
				"initialDownloadUrl": TSL_URL,
				"initialCaDerPath": anchor_path.to_string_lossy(),
				"tiOcspProxyUrl": options.ti_ocsp_proxy_url,
			},
			"idp": {
				"updateEndpoint": "https://idp.example/.well-known/openid-configuration",
			},
		}))
		.expect("test config");

		let env = Self {
			anchor,
			tsl_signer,
			tsl_responder,
			component_ca,
			bna_root,
			bna_signer,
			qes_ca,
			client: Arc::new(InMemoryHttpClient::new()),
			config: Arc::new(config),
			qes_mapping: options.qes_mapping,
			anchor_path,
		};

		env.serve_tsl(env.tsl_builder(Some("ID100"), "100").next_update(options.tsl_next_update));
		env.serve_bna(env.bna_builder("10"));
		env.serve_signer_ocsp();
		env
	}

	/// A trust list with the standard service entries of this environment.
	pub fn tsl_builder(&self, id: Option<&str>, sequence_number: &str) -> TslFixtureBuilder {
		let mapping: Vec<(&str, &str)> = self
			.qes_mapping
			.iter()
			.map(|(from, to)| (from.as_str(), to.as_str()))
			.collect();
		TslFixtureBuilder::new(id, sequence_number)
			.distribution_point(TSL_URL)
			.ca_service(&self.anchor.certificate, SIGNER_OCSP_URL, &[])
			.ca_service(
				&self.component_ca.certificate,
				COMPONENT_OCSP_URL,
				&[oids::POLICY_FD_SIG, oids::POLICY_EGK_AUT],
			)
			.ocsp_service(&self.tsl_responder.certificate)
			.bna_pointer(
				&[BNA_URL],
				&[self.bna_signer.certificate.clone()],
				&mapping,
			)
	}

	pub fn bna_builder(&self, sequence_number: &str) -> TslFixtureBuilder {
		TslFixtureBuilder::new(None, sequence_number)
			.distribution_point(BNA_URL)
			.ca_service(&self.qes_ca.certificate, COMPONENT_OCSP_URL, &[])
	}

	/// Signs and serves a TSL document plus its `.sha2` probe body.
	pub fn serve_tsl(&self, builder: TslFixtureBuilder) -> String {
		let xml = builder.sign(&self.tsl_signer.certificate, &self.tsl_signer.key);
		self.client.set_get_body(TSL_URL, xml.as_bytes().to_vec());
		self.client.set_get_body(TSL_SHA2_URL, sha2_of(&xml).into_bytes());
		xml
	}

	pub fn serve_bna(&self, builder: TslFixtureBuilder) -> String {
		let xml = builder.sign(&self.bna_signer.certificate, &self.bna_signer.key);
		self.client.set_get_body(BNA_URL, xml.as_bytes().to_vec());
		self.client.set_get_body(BNA_SHA2_URL, sha2_of(&xml).into_bytes());
		xml
	}

	pub fn serve_signer_ocsp(&self) {
		let response = build_ocsp_response(
			&self.tsl_signer.certificate,
			&self.anchor.certificate,
			&self.tsl_responder.certificate,
			&self.tsl_responder.key,
			&OcspResponseSpec::good(),
		);
		self.client.set_ocsp_response(SIGNER_OCSP_URL, response);
	}

	/// Serves an OCSP response for a leaf at the given responder URL, signed
	/// by the issuing CA itself.
	pub fn serve_leaf_ocsp(
		&self,
		url: &str,
		leaf: &TestIdentity,
		issuer: &TestIdentity,
		spec: &OcspResponseSpec,
	) {
		let response = build_ocsp_response(
			&leaf.certificate,
			&issuer.certificate,
			&issuer.certificate,
			&issuer.key,
			spec,
		);
		self.client.set_ocsp_response(url, response);
	}

	pub async fn start_manager(&self) -> Arc<TslManager> {
		TslManager::new(
			self.client.clone() as Arc<dyn HttpClient>,
			Arc::new(StructuralValidator),
			self.config.clone(),
		)
		.await
		.expect("manager bootstrap")
	}

	pub async fn try_start_manager(&self) -> Result<Arc<TslManager>, ti_trust::TslError> {
		TslManager::new(
			self.client.clone() as Arc<dyn HttpClient>,
			Arc::new(StructuralValidator),
			self.config.clone(),
		)
		.await
	}
}
