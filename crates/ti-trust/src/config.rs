use std::time::Duration;

use chrono::{DateTime, Utc};

/// Immutable engine configuration, constructed once at process start and
/// passed explicitly to the components that need it.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
	#[serde(default)]
	pub tsl: TslConfig,
	#[serde(default)]
	pub idp: IdpConfig,
	#[serde(default)]
	pub http: HttpConfig,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TslConfig {
	/// URL of the initial Gematik TSL download, used until the TSL itself
	/// provides distribution points.
	pub initial_download_url: String,
	/// DER file holding the active TSL signer trust anchor.
	pub initial_ca_der_path: String,
	/// Optional second trust anchor for an announced signer-CA rollover.
	#[serde(default)]
	pub initial_ca_der_path_new: Option<String>,
	/// Activation time for the second anchor. Before this instant the new
	/// anchor is ignored.
	#[serde(default)]
	pub initial_ca_der_path_new_start: Option<DateTime<Utc>>,
	/// TI OCSP proxy for G0 QES certificates without a BNetzA OCSP mapping.
	#[serde(default)]
	pub ti_ocsp_proxy_url: Option<String>,
	/// Forced TLS cipher list for TSL downloads, passed through to the
	/// transport when set.
	#[serde(default)]
	pub download_ciphers: Option<String>,
	/// Grace period during which a cached OCSP response stays usable.
	#[serde(default = "default_ocsp_grace_period_seconds")]
	pub ocsp_grace_period_seconds: u64,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IdpConfig {
	/// The openid-configuration endpoint, must be https.
	pub update_endpoint: String,
	#[serde(default = "default_idp_certificate_max_age_hours")]
	pub certificate_max_age_hours: u64,
	#[serde(default = "default_idp_update_interval_minutes")]
	pub update_interval_minutes: u64,
	#[serde(default = "default_idp_no_certificate_update_interval_seconds")]
	pub no_valid_certificate_update_interval_seconds: u64,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HttpConfig {
	#[serde(default = "default_connect_timeout_seconds")]
	pub connect_timeout_seconds: u64,
}

fn default_ocsp_grace_period_seconds() -> u64 {
	600
}

fn default_idp_certificate_max_age_hours() -> u64 {
	24
}

fn default_idp_update_interval_minutes() -> u64 {
	60
}

fn default_idp_no_certificate_update_interval_seconds() -> u64 {
	30
}

fn default_connect_timeout_seconds() -> u64 {
	30
}

impl Default for TslConfig {
	fn default() -> Self {
		Self {
			initial_download_url: String::new(),
			initial_ca_der_path: String::new(),
			initial_ca_der_path_new: None,
			initial_ca_der_path_new_start: None,
			ti_ocsp_proxy_url: None,
			download_ciphers: None,
			ocsp_grace_period_seconds: default_ocsp_grace_period_seconds(),
		}
	}
}

impl Default for IdpConfig {
	fn default() -> Self {
		Self {
			update_endpoint: String::new(),
			certificate_max_age_hours: default_idp_certificate_max_age_hours(),
			update_interval_minutes: default_idp_update_interval_minutes(),
			no_valid_certificate_update_interval_seconds:
				default_idp_no_certificate_update_interval_seconds(),
		}
	}
}

impl Default for HttpConfig {
	fn default() -> Self {
		Self {
			connect_timeout_seconds: default_connect_timeout_seconds(),
		}
	}
}

impl Config {
	/// Builds the configuration from the conventional environment keys.
	pub fn from_env() -> anyhow::Result<Self> {
		let require = |key: &str| {
			std::env::var(key).map_err(|_| anyhow::anyhow!("missing configuration key {key}"))
		};
		let optional = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
		let parse_u64 = |key: &str, default: u64| -> anyhow::Result<u64> {
			match optional(key) {
				Some(raw) => raw
					.parse()
					.map_err(|_| anyhow::anyhow!("configuration key {key} is not a number")),
				None => Ok(default),
			}
		};

		Ok(Self {
			tsl: TslConfig {
				initial_download_url: require("TSL_INITIAL_DOWNLOAD_URL")?,
				initial_ca_der_path: require("TSL_INITIAL_CA_DER_PATH")?,
				initial_ca_der_path_new: optional("TSL_INITIAL_CA_DER_PATH_NEW"),
				initial_ca_der_path_new_start: optional("TSL_INITIAL_CA_DER_PATH_NEW_START")
					.map(|raw| {
						raw.parse().map_err(|_| {
							anyhow::anyhow!("TSL_INITIAL_CA_DER_PATH_NEW_START is not a timestamp")
						})
					})
					.transpose()?,
				ti_ocsp_proxy_url: optional("TSL_TI_OCSP_PROXY_URL"),
				download_ciphers: optional("TSL_DOWNLOAD_CIPHERS"),
				ocsp_grace_period_seconds: parse_u64(
					"TSL_OCSP_GRACE_PERIOD_SECONDS",
					default_ocsp_grace_period_seconds(),
				)?,
			},
			idp: IdpConfig {
				update_endpoint: require("IDP_UPDATE_ENDPOINT")?,
				certificate_max_age_hours: parse_u64(
					"IDP_CERTIFICATE_MAX_AGE_HOURS",
					default_idp_certificate_max_age_hours(),
				)?,
				update_interval_minutes: parse_u64(
					"IDP_UPDATE_INTERVAL_MINUTES",
					default_idp_update_interval_minutes(),
				)?,
				no_valid_certificate_update_interval_seconds: parse_u64(
					"IDP_NO_VALID_CERTIFICATE_UPDATE_INTERVAL_SECONDS",
					default_idp_no_certificate_update_interval_seconds(),
				)?,
			},
			http: HttpConfig {
				connect_timeout_seconds: parse_u64(
					"HTTPCLIENT_CONNECT_TIMEOUT_SECONDS",
					default_connect_timeout_seconds(),
				)?,
			},
		})
	}

	pub fn ocsp_grace_period(&self) -> Duration {
		Duration::from_secs(self.tsl.ocsp_grace_period_seconds)
	}

	pub fn idp_certificate_max_age(&self) -> Duration {
		Duration::from_secs(self.idp.certificate_max_age_hours * 3600)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_applied() {
		let config = Config::default();
		assert_eq!(config.tsl.ocsp_grace_period_seconds, 600);
		assert_eq!(config.idp.certificate_max_age_hours, 24);
		assert_eq!(config.http.connect_timeout_seconds, 30);
	}

	#[test]
	fn deserializes_from_json() {
		let config: Config = serde_json::from_value(serde_json::json!({
			"tsl": {
				"initialDownloadUrl": "https://tsl.example/TSL.xml",
				"initialCaDerPath": "/config/tsl-ca.der",
				"tiOcspProxyUrl": "http://proxy/"
			},
			"idp": {
				"updateEndpoint": "https://idp.example/.well-known/openid-configuration"
			}
		}))
		.unwrap();
		assert_eq!(config.tsl.initial_download_url, "https://tsl.example/TSL.xml");
		assert_eq!(config.tsl.ti_ocsp_proxy_url.as_deref(), Some("http://proxy/"));
		assert_eq!(config.idp.update_interval_minutes, 60);
	}
}
