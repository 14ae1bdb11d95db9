//! Trust list document parsing: schema validation, enveloped signature
//! verification and extraction into the in-memory model.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use openssl::hash::MessageDigest;
use serde::Deserialize;

use crate::crypto::{Certificate, oids};
use crate::error::{TslError, TslErrorCode, TslResult};
use crate::tsl::{
	BnaServiceInformation, CertificateId, OID_BNA_OCSP_MAPPING, SERVICE_STATUS_ACCEPTED,
	SERVICE_STATUS_REVOKED, SERVICE_TYPE_CA_PKC, SERVICE_TYPE_NATIONAL_ROOT_CA_QC,
	SERVICE_TYPE_OCSP, ServiceInformation, ServiceInformationMap, TslMode,
};
use crate::xml::{XmlValidator, dsig};

/// Immutable result of parsing one trust list document.
#[derive(Debug, Clone)]
pub struct TslParsed {
	pub mode: TslMode,
	pub id: Option<String>,
	pub sequence_number: String,
	pub next_update: DateTime<Utc>,
	pub signer_certificate: Certificate,
	/// OCSP responder certificates listed in the trust list itself.
	pub ocsp_certificates: Vec<Certificate>,
	pub service_information: ServiceInformationMap,
	/// Ids of announced follow-up TSL signer CAs, kept separately so the
	/// caller can erase them again when the announcement is rejected.
	pub new_tsl_signer_ca_ids: Vec<CertificateId>,
	pub update_urls: Vec<String>,
	pub bna: BnaServiceInformation,
	pub sha256_hex: String,
}

// ---- XML document model (element names per ETSI TS 102 231) ----

#[derive(Debug, Deserialize)]
struct TrustServiceStatusListXml {
	#[serde(rename = "@Id")]
	id: Option<String>,
	#[serde(rename = "SchemeInformation")]
	scheme_information: SchemeInformationXml,
	#[serde(rename = "TrustServiceProviderList")]
	provider_list: Option<TrustServiceProviderListXml>,
}

#[derive(Debug, Deserialize)]
struct SchemeInformationXml {
	#[serde(rename = "TSLSequenceNumber")]
	sequence_number: String,
	#[serde(rename = "NextUpdate")]
	next_update: NextUpdateXml,
	#[serde(rename = "DistributionPoints")]
	distribution_points: Option<DistributionPointsXml>,
}

#[derive(Debug, Deserialize)]
struct NextUpdateXml {
	#[serde(rename = "dateTime")]
	date_time: String,
}

#[derive(Debug, Deserialize)]
struct DistributionPointsXml {
	#[serde(rename = "URI", default)]
	uris: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TrustServiceProviderListXml {
	#[serde(rename = "TrustServiceProvider", default)]
	providers: Vec<TrustServiceProviderXml>,
}

#[derive(Debug, Deserialize)]
struct TrustServiceProviderXml {
	#[serde(rename = "TSPServices")]
	services: TspServicesXml,
}

#[derive(Debug, Deserialize)]
struct TspServicesXml {
	#[serde(rename = "TSPService", default)]
	services: Vec<TspServiceXml>,
}

#[derive(Debug, Deserialize)]
struct TspServiceXml {
	#[serde(rename = "ServiceInformation")]
	information: ServiceInformationXml,
	#[serde(rename = "ServiceHistory")]
	history: Option<ServiceHistoryXml>,
}

#[derive(Debug, Deserialize)]
struct ServiceInformationXml {
	#[serde(rename = "ServiceTypeIdentifier")]
	service_type: String,
	#[serde(rename = "ServiceStatus")]
	status: String,
	#[serde(rename = "StatusStartingTime")]
	status_starting_time: String,
	#[serde(rename = "ServiceDigitalIdentity")]
	digital_identity: ServiceDigitalIdentityXml,
	#[serde(rename = "ServiceSupplyPoints")]
	supply_points: Option<ServiceSupplyPointsXml>,
	#[serde(rename = "ServiceInformationExtensions")]
	extensions: Option<ServiceExtensionsXml>,
}

#[derive(Debug, Deserialize)]
struct ServiceHistoryXml {
	#[serde(rename = "ServiceHistoryInstance", default)]
	instances: Vec<ServiceHistoryInstanceXml>,
}

#[derive(Debug, Deserialize)]
struct ServiceHistoryInstanceXml {
	#[serde(rename = "ServiceStatus")]
	status: String,
	#[serde(rename = "StatusStartingTime")]
	status_starting_time: String,
}

#[derive(Debug, Deserialize)]
struct ServiceDigitalIdentityXml {
	#[serde(rename = "DigitalId", default)]
	digital_ids: Vec<DigitalIdXml>,
}

#[derive(Debug, Deserialize)]
struct DigitalIdXml {
	#[serde(rename = "X509Certificate")]
	certificate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServiceSupplyPointsXml {
	#[serde(rename = "ServiceSupplyPoint", default)]
	points: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ServiceExtensionsXml {
	#[serde(rename = "Extension", default)]
	extensions: Vec<ServiceExtensionXml>,
}

#[derive(Debug, Deserialize)]
struct ServiceExtensionXml {
	#[serde(rename = "ExtensionOID")]
	oid: Option<String>,
	#[serde(rename = "ExtensionValue")]
	value: Option<String>,
}

fn not_wellformed(message: impl Into<String>) -> TslError {
	TslError::new(TslErrorCode::TslNotWellformed, message)
}

fn parse_timestamp(raw: &str, what: &str) -> TslResult<DateTime<Utc>> {
	DateTime::parse_from_rfc3339(raw.trim())
		.map(|t| t.with_timezone(&Utc))
		.map_err(|_| not_wellformed(format!("{what} is not a valid xs:dateTime: {raw}")))
}

/// Parses, validates and extracts a trust list document.
pub fn parse(xml: &str, mode: TslMode, validator: &dyn XmlValidator) -> TslResult<TslParsed> {
	validator.validate(xml, mode)?;
	let signer_certificate = dsig::verify_enveloped(xml)?;

	let document: TrustServiceStatusListXml = quick_xml::de::from_str(xml)
		.map_err(|e| not_wellformed(format!("trust list extraction failed: {e}")))?;

	if mode == TslMode::Tsl && document.id.is_none() {
		return Err(not_wellformed("TSL document lacks the mandatory Id attribute"));
	}
	let sequence_number = document.scheme_information.sequence_number.trim().to_string();
	if sequence_number.parse::<i64>().is_err() {
		return Err(not_wellformed(format!(
			"TSLSequenceNumber is not a decimal number: {sequence_number}"
		)));
	}
	let next_update = parse_timestamp(&document.scheme_information.next_update.date_time, "NextUpdate")?;
	let update_urls = document
		.scheme_information
		.distribution_points
		.map(|points| points.uris)
		.unwrap_or_default();

	let mut service_information: ServiceInformationMap = HashMap::new();
	let mut ocsp_certificates = Vec::new();
	let mut new_tsl_signer_ca_ids = Vec::new();
	let mut bna = BnaServiceInformation::default();

	let services = document
		.provider_list
		.into_iter()
		.flat_map(|list| list.providers)
		.flat_map(|provider| provider.services.services);
	for service in services {
		let info = &service.information;
		let certificates = decode_digital_identity(&info.digital_identity)?;

		if info.service_type == SERVICE_TYPE_NATIONAL_ROOT_CA_QC {
			bna.supply_points = info
				.supply_points
				.as_ref()
				.map(|points| points.points.clone())
				.unwrap_or_default();
			bna.signer_certificates = certificates;
			for extension in extensions_of(info) {
				if extension.oid.as_deref() == Some(OID_BNA_OCSP_MAPPING)
					&& let Some(value) = extension.value.as_deref()
					&& let Some((from, to)) = value.trim().split_once(char::is_whitespace)
				{
					bna.ocsp_mapping
						.insert(from.trim().to_string(), to.trim().to_string());
				}
			}
			continue;
		}

		let mut acceptance_history = BTreeMap::new();
		acceptance_history.insert(
			parse_timestamp(&info.status_starting_time, "StatusStartingTime")?,
			status_accepted(&info.status)?,
		);
		for instance in service.history.iter().flat_map(|h| &h.instances) {
			acceptance_history.insert(
				parse_timestamp(&instance.status_starting_time, "StatusStartingTime")?,
				status_accepted(&instance.status)?,
			);
		}

		let extension_oids: HashSet<String> = extensions_of(info)
			.filter_map(|extension| extension.oid.clone())
			.collect();
		let supply_points = info
			.supply_points
			.as_ref()
			.map(|points| points.points.clone())
			.unwrap_or_default();

		for certificate in certificates {
			if info.service_type == SERVICE_TYPE_OCSP {
				ocsp_certificates.push(certificate.clone());
			}
			let id = CertificateId::of(&certificate);
			if info.service_type == SERVICE_TYPE_CA_PKC
				&& extension_oids.contains(oids::EKU_TSL_SIGNING)
				&& !new_tsl_signer_ca_ids.contains(&id)
			{
				new_tsl_signer_ca_ids.push(id.clone());
			}
			match service_information.entry(id) {
				std::collections::hash_map::Entry::Vacant(entry) => {
					entry.insert(ServiceInformation {
						certificate,
						service_identifier: info.service_type.clone(),
						supply_points: supply_points.clone(),
						acceptance_history: acceptance_history.clone(),
						extension_oids: extension_oids.clone(),
					});
				},
				std::collections::hash_map::Entry::Occupied(mut entry) => {
					// the same CA may be listed again with additional history
					entry
						.get_mut()
						.acceptance_history
						.extend(acceptance_history.clone());
				},
			}
		}
	}

	let sha256_hex = hex::encode(openssl::hash::hash(MessageDigest::sha256(), xml.as_bytes())?);

	let parsed = TslParsed {
		mode,
		id: document.id,
		sequence_number,
		next_update,
		signer_certificate,
		ocsp_certificates,
		service_information,
		new_tsl_signer_ca_ids,
		update_urls,
		bna,
		sha256_hex,
	};
	tracing::debug!(
		mode = %parsed.mode,
		sequence_number = %parsed.sequence_number,
		entries = parsed.service_information.len(),
		"trust list parsed"
	);
	Ok(parsed)
}

fn extensions_of(info: &ServiceInformationXml) -> impl Iterator<Item = &ServiceExtensionXml> {
	info.extensions.iter().flat_map(|e| &e.extensions)
}

fn status_accepted(status: &str) -> TslResult<bool> {
	match status {
		SERVICE_STATUS_ACCEPTED => Ok(true),
		SERVICE_STATUS_REVOKED => Ok(false),
		other => Err(not_wellformed(format!("unknown service status {other}"))),
	}
}

fn decode_digital_identity(identity: &ServiceDigitalIdentityXml) -> TslResult<Vec<Certificate>> {
	let mut certificates = Vec::new();
	for digital_id in &identity.digital_ids {
		if let Some(b64) = digital_id.certificate.as_deref() {
			certificates.push(
				Certificate::from_base64_der(b64)
					.map_err(|e| not_wellformed(format!("service digital identity: {e}")))?,
			);
		}
	}
	if certificates.is_empty() {
		return Err(not_wellformed(
			"service entry without an X509Certificate digital identity",
		));
	}
	Ok(certificates)
}
