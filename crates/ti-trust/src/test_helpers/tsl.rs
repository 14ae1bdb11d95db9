//! Assembly of signed trust list documents for tests.

use chrono::{DateTime, Duration, Utc};
use openssl::pkey::{PKey, Private};

use crate::crypto::Certificate;
use crate::tsl::{
	OID_BNA_OCSP_MAPPING, SERVICE_STATUS_ACCEPTED, SERVICE_TYPE_CA_PKC,
	SERVICE_TYPE_NATIONAL_ROOT_CA_QC, SERVICE_TYPE_OCSP,
};
use crate::xml::dsig;

pub struct ServiceEntry {
	pub service_type: String,
	pub status: String,
	pub status_starting_time: DateTime<Utc>,
	pub certificates: Vec<Certificate>,
	pub supply_points: Vec<String>,
	pub extension_oids: Vec<String>,
	pub extension_values: Vec<(String, String)>,
	/// Earlier status periods, `(starting time, status URI)`.
	pub history: Vec<(DateTime<Utc>, String)>,
}

impl ServiceEntry {
	pub fn new(service_type: &str, certificates: Vec<Certificate>) -> Self {
		Self {
			service_type: service_type.to_string(),
			status: SERVICE_STATUS_ACCEPTED.to_string(),
			status_starting_time: Utc::now() - Duration::days(365),
			certificates,
			supply_points: Vec::new(),
			extension_oids: Vec::new(),
			extension_values: Vec::new(),
			history: Vec::new(),
		}
	}
}

/// Builds trust list XML documents element by element and signs them with
/// the enveloped signature the parser expects.
pub struct TslFixtureBuilder {
	pub id: Option<String>,
	pub sequence_number: String,
	pub next_update: DateTime<Utc>,
	pub distribution_points: Vec<String>,
	pub services: Vec<ServiceEntry>,
}

impl TslFixtureBuilder {
	pub fn new(id: Option<&str>, sequence_number: &str) -> Self {
		Self {
			id: id.map(str::to_string),
			sequence_number: sequence_number.to_string(),
			next_update: Utc::now() + Duration::hours(24),
			distribution_points: Vec::new(),
			services: Vec::new(),
		}
	}

	pub fn next_update(mut self, next_update: DateTime<Utc>) -> Self {
		self.next_update = next_update;
		self
	}

	pub fn distribution_point(mut self, url: &str) -> Self {
		self.distribution_points.push(url.to_string());
		self
	}

	/// A CA/PKC entry with a primary OCSP supply point and the certificate
	/// type OIDs the CA may issue.
	pub fn ca_service(
		mut self,
		certificate: &Certificate,
		supply_point: &str,
		extension_oids: &[&str],
	) -> Self {
		let mut entry = ServiceEntry::new(SERVICE_TYPE_CA_PKC, vec![certificate.clone()]);
		entry.supply_points.push(supply_point.to_string());
		entry.extension_oids = extension_oids.iter().map(|s| s.to_string()).collect();
		self.services.push(entry);
		self
	}

	pub fn ocsp_service(mut self, certificate: &Certificate) -> Self {
		self.services
			.push(ServiceEntry::new(SERVICE_TYPE_OCSP, vec![certificate.clone()]));
		self
	}

	/// The BNetzA pointer entry: VL download URLs, expected signer
	/// certificates and the OCSP URL mapping.
	pub fn bna_pointer(
		mut self,
		supply_points: &[&str],
		signer_certificates: &[Certificate],
		ocsp_mapping: &[(&str, &str)],
	) -> Self {
		let mut entry = ServiceEntry::new(
			SERVICE_TYPE_NATIONAL_ROOT_CA_QC,
			signer_certificates.to_vec(),
		);
		entry.supply_points = supply_points.iter().map(|s| s.to_string()).collect();
		entry.extension_values = ocsp_mapping
			.iter()
			.map(|(from, to)| (OID_BNA_OCSP_MAPPING.to_string(), format!("{from} {to}")))
			.collect();
		self.services.push(entry);
		self
	}

	pub fn service(mut self, entry: ServiceEntry) -> Self {
		self.services.push(entry);
		self
	}

	/// Adds a revocation period that started at `since` to the most recently
	/// added service.
	pub fn with_history(mut self, since: DateTime<Utc>, status: &str) -> Self {
		if let Some(entry) = self.services.last_mut() {
			entry.history.push((since, status.to_string()));
		}
		self
	}

	/// The unsigned document.
	pub fn build_unsigned(&self) -> String {
		let mut xml = String::new();
		xml.push_str("<TrustServiceStatusList xmlns=\"http://uri.etsi.org/02231/v2#\"");
		if let Some(id) = &self.id {
			xml.push_str(&format!(" Id=\"{id}\""));
		}
		xml.push('>');
		xml.push_str("<SchemeInformation>");
		xml.push_str(&format!(
			"<TSLSequenceNumber>{}</TSLSequenceNumber>",
			self.sequence_number
		));
		xml.push_str(&format!(
			"<NextUpdate><dateTime>{}</dateTime></NextUpdate>",
			self.next_update.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
		));
		if !self.distribution_points.is_empty() {
			xml.push_str("<DistributionPoints>");
			for uri in &self.distribution_points {
				xml.push_str(&format!("<URI>{uri}</URI>"));
			}
			xml.push_str("</DistributionPoints>");
		}
		xml.push_str("</SchemeInformation>");

		xml.push_str("<TrustServiceProviderList><TrustServiceProvider><TSPServices>");
		for entry in &self.services {
			xml.push_str("<TSPService><ServiceInformation>");
			xml.push_str(&format!(
				"<ServiceTypeIdentifier>{}</ServiceTypeIdentifier>",
				entry.service_type
			));
			xml.push_str("<ServiceDigitalIdentity>");
			for certificate in &entry.certificates {
				xml.push_str(&format!(
					"<DigitalId><X509Certificate>{}</X509Certificate></DigitalId>",
					certificate.to_base64()
				));
			}
			xml.push_str("</ServiceDigitalIdentity>");
			xml.push_str(&format!("<ServiceStatus>{}</ServiceStatus>", entry.status));
			xml.push_str(&format!(
				"<StatusStartingTime>{}</StatusStartingTime>",
				entry
					.status_starting_time
					.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
			));
			if !entry.supply_points.is_empty() {
				xml.push_str("<ServiceSupplyPoints>");
				for point in &entry.supply_points {
					xml.push_str(&format!(
						"<ServiceSupplyPoint>{point}</ServiceSupplyPoint>"
					));
				}
				xml.push_str("</ServiceSupplyPoints>");
			}
			if !entry.extension_oids.is_empty() || !entry.extension_values.is_empty() {
				xml.push_str("<ServiceInformationExtensions>");
				for oid in &entry.extension_oids {
					xml.push_str(&format!(
						"<Extension><ExtensionOID>{oid}</ExtensionOID></Extension>"
					));
				}
				for (oid, value) in &entry.extension_values {
					xml.push_str(&format!(
						"<Extension><ExtensionOID>{oid}</ExtensionOID><ExtensionValue>{value}</ExtensionValue></Extension>"
					));
				}
				xml.push_str("</ServiceInformationExtensions>");
			}
			xml.push_str("</ServiceInformation>");
			if !entry.history.is_empty() {
				xml.push_str("<ServiceHistory>");
				for (since, status) in &entry.history {
					xml.push_str(&format!(
						"<ServiceHistoryInstance><ServiceStatus>{status}</ServiceStatus><StatusStartingTime>{}</StatusStartingTime></ServiceHistoryInstance>",
						since.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
					));
				}
				xml.push_str("</ServiceHistory>");
			}
			xml.push_str("</TSPService>");
		}
		xml.push_str("</TSPServices></TrustServiceProvider></TrustServiceProviderList>");
		xml.push_str("</TrustServiceStatusList>");
		xml
	}

	/// The signed document, ready to serve from a fixture HTTP client.
	pub fn sign(&self, signer: &Certificate, key: &PKey<Private>) -> String {
		dsig::sign_enveloped(&self.build_unsigned(), signer, key).expect("signable fixture")
	}
}

/// Lowercase hex SHA-256 as served by `.sha2` endpoints.
pub fn sha2_of(xml: &str) -> String {
	hex::encode(
		openssl::hash::hash(openssl::hash::MessageDigest::sha256(), xml.as_bytes())
			.expect("digest"),
	)
}
