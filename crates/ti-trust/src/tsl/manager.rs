//! Façade over the two parallel trust stores. Serializes refreshes, fans out
//! post-update notifications and exposes the verification entry points.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::client::HttpClient;
use crate::config::Config;
use crate::crypto::{Certificate, CertificateType};
use crate::error::{TslError, TslResult};
use crate::tsl::ocsp::{OcspCheckDescriptor, OcspResponse};
use crate::tsl::service::{self, UpdateResult};
use crate::tsl::store::{HealthData, TrustStore};
use crate::tsl::TslMode;
use crate::xml::XmlValidator;

pub type PostUpdateHook = Box<dyn Fn() + Send + Sync + 'static>;

pub struct TslManager {
	client: Arc<dyn HttpClient>,
	validator: Arc<dyn XmlValidator>,
	config: Arc<Config>,
	tsl_store: TrustStore,
	bna_store: TrustStore,
	/// Slotted so hook ids stay stable; disabled entries are left in place.
	post_update_hooks: Mutex<Vec<Option<PostUpdateHook>>>,
}

impl std::fmt::Debug for TslManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TslManager").field("config", &self.config).finish_non_exhaustive()
	}
}

impl TslManager {
	/// Builds the manager and performs the initial download of both trust
	/// lists. Construction fails when either store stays empty.
	pub async fn new(
		client: Arc<dyn HttpClient>,
		validator: Arc<dyn XmlValidator>,
		config: Arc<Config>,
	) -> TslResult<Arc<Self>> {
		tracing::info!("initializing TSL manager");
		let tsl_store = TrustStore::new(
			TslMode::Tsl,
			&config.tsl,
			vec![config.tsl.initial_download_url.clone()],
		)?;
		let bna_store = TrustStore::new(TslMode::Bna, &config.tsl, Vec::new())?;
		let manager = Arc::new(Self {
			client,
			validator,
			config,
			tsl_store,
			bna_store,
			post_update_hooks: Mutex::new(Vec::new()),
		});
		manager.internal_update(true).await?;
		Ok(manager)
	}

	pub fn trust_store(&self, mode: TslMode) -> &TrustStore {
		match mode {
			TslMode::Tsl => &self.tsl_store,
			TslMode::Bna => &self.bna_store,
		}
	}

	/// Verifies a certificate against a fresh trust store snapshot.
	pub async fn verify_certificate(
		&self,
		mode: TslMode,
		certificate: &Certificate,
		type_restrictions: &[CertificateType],
		descriptor: &OcspCheckDescriptor,
	) -> TslResult<()> {
		self.internal_update(true).await?;
		service::check_certificate(
			certificate,
			type_restrictions,
			self.client.as_ref(),
			self.trust_store(mode),
			&self.config,
			descriptor,
		)
		.await
		.map(|_| ())
		.inspect_err(|error| tracing::info!(%error, "certificate verification failed"))
	}

	/// Like [`verify_certificate`](Self::verify_certificate) but hands the
	/// OCSP response back to the caller, consulting the cache first when the
	/// store did not change and the descriptor allows it.
	pub async fn get_certificate_ocsp_response(
		&self,
		mode: TslMode,
		certificate: &Certificate,
		type_restrictions: &[CertificateType],
		descriptor: &OcspCheckDescriptor,
	) -> TslResult<OcspResponse> {
		let update_result = self.internal_update(true).await?;
		let store = self.trust_store(mode);

		let mut response = None;
		if update_result == UpdateResult::NotUpdated
			&& descriptor.try_cache_first()
			&& descriptor.provided_ocsp_response.is_none()
			&& let Some(mut cached) =
				store.cached_ocsp_response(certificate.sha256_fingerprint_hex())
		{
			cached.from_cache = true;
			response = Some(cached);
		}

		let response = match response {
			Some(response) => response,
			None => {
				service::check_certificate(
					certificate,
					type_restrictions,
					self.client.as_ref(),
					store,
					&self.config,
					descriptor,
				)
				.await?
			},
		};
		response.check_status(store, descriptor.reference_time_point)?;
		Ok(response)
	}

	/// The CA certificates currently trusted for `reference` (or trusted now
	/// when absent), after a freshness check of the store.
	pub async fn trusted_certificate_store(
		&self,
		mode: TslMode,
		reference: Option<&Certificate>,
	) -> TslResult<Vec<Certificate>> {
		self.internal_update(true).await?;
		Ok(self.trust_store(mode).trusted_certificates(reference))
	}

	/// Forces a refresh of both stores irrespective of freshness.
	pub async fn update_trust_stores_on_demand(&self) -> TslResult<()> {
		self.internal_update(false).await.map(|_| ())
	}

	pub fn health_check_tsl(&self) -> HealthData {
		self.tsl_store.health_data()
	}

	pub fn health_check_bna(&self) -> HealthData {
		self.bna_store.health_data()
	}

	/// Registers a hook that runs after every successful TSL refresh. The
	/// returned id stays valid for the lifetime of the manager.
	pub fn add_post_update_hook(&self, hook: PostUpdateHook) -> usize {
		let mut hooks = self.post_update_hooks.lock();
		hooks.push(Some(hook));
		hooks.len() - 1
	}

	pub fn disable_post_update_hook(&self, hook_id: usize) {
		let mut hooks = self.post_update_hooks.lock();
		if let Some(slot) = hooks.get_mut(hook_id) {
			*slot = None;
		}
	}

	/// Refreshes the TSL store, propagates the carried BNetzA update URLs and
	/// signer certificates, refreshes the BNA store and copies the OCSP
	/// mapping back. Hooks fire only after a successful TSL refresh.
	async fn internal_update(&self, only_if_outdated: bool) -> TslResult<UpdateResult> {
		let update_result = service::trigger_tsl_update_if_necessary(
			self.client.as_ref(),
			self.validator.as_ref(),
			&self.config,
			&self.tsl_store,
			only_if_outdated,
			&[],
		)
		.await?;
		if !self.tsl_store.has_tsl() || self.tsl_store.is_tsl_too_old() {
			return Err(TslError::unknown("cannot load an up-to-date trust list"));
		}

		self.bna_store.set_update_urls(self.tsl_store.bna_urls());
		let expected_signers = self.tsl_store.bna_signer_certificates();
		service::trigger_tsl_update_if_necessary(
			self.client.as_ref(),
			self.validator.as_ref(),
			&self.config,
			&self.bna_store,
			only_if_outdated,
			&expected_signers,
		)
		.await?;
		if !self.bna_store.has_tsl() || self.bna_store.is_tsl_too_old() {
			return Err(TslError::unknown("cannot load an up-to-date BNetzA-VL"));
		}

		self.bna_store
			.set_bna_ocsp_mapping(self.tsl_store.bna_ocsp_mapping());

		if update_result == UpdateResult::Updated {
			self.notify_post_update_hooks();
		}
		Ok(update_result)
	}

	/// Runs the hooks in registration order. A failing hook never prevents
	/// the remaining hooks from firing.
	fn notify_post_update_hooks(&self) {
		let hooks = self.post_update_hooks.lock();
		for (index, hook) in hooks.iter().enumerate() {
			let Some(hook) = hook else { continue };
			let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(hook));
			if outcome.is_err() {
				tracing::error!(hook = index, "post-update hook failed");
			}
		}
	}
}
