pub mod manager;
pub mod ocsp;
pub mod parser;
pub mod service;
pub mod store;

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::crypto::Certificate;

/// Which of the two parallel trust lists a store or error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TslMode {
	Tsl,
	Bna,
}

impl std::fmt::Display for TslMode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			TslMode::Tsl => "TSL",
			TslMode::Bna => "BNA",
		})
	}
}

/// Key into the service information map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CertificateId {
	pub subject: String,
	pub ski: String,
}

impl CertificateId {
	pub fn of(certificate: &Certificate) -> Self {
		Self {
			subject: certificate.subject().to_string(),
			ski: certificate.subject_key_identifier().to_string(),
		}
	}
}

/// One CA entry of a parsed trust list.
#[derive(Debug, Clone)]
pub struct ServiceInformation {
	pub certificate: Certificate,
	pub service_identifier: String,
	pub supply_points: Vec<String>,
	/// Status changes ordered by starting time; `true` means accepted.
	pub acceptance_history: BTreeMap<DateTime<Utc>, bool>,
	/// Certificate type OIDs this CA is authorized to issue.
	pub extension_oids: HashSet<String>,
}

pub type ServiceInformationMap = HashMap<CertificateId, ServiceInformation>;

/// BNetzA-VL side information transported inside the Gematik TSL.
#[derive(Debug, Clone, Default)]
pub struct BnaServiceInformation {
	pub supply_points: Vec<String>,
	pub signer_certificates: Vec<Certificate>,
	/// Maps a QES certificate's AIA OCSP URL to the responder actually
	/// reachable inside the TI.
	pub ocsp_mapping: HashMap<String, String>,
}

// ETSI TS 102 231 / gemSpec_TSL wire vocabulary
pub const SERVICE_TYPE_CA_PKC: &str = "http://uri.etsi.org/TrstSvc/Svctype/CA/PKC";
pub const SERVICE_TYPE_OCSP: &str = "http://uri.etsi.org/TrstSvc/Svctype/Certstatus/OCSP";
pub const SERVICE_TYPE_NATIONAL_ROOT_CA_QC: &str =
	"http://uri.etsi.org/TrstSvc/Svctype/NationalRootCA-QC";
pub const SERVICE_STATUS_ACCEPTED: &str = "http://uri.etsi.org/TrstSvc/Svcstatus/inaccord";
pub const SERVICE_STATUS_REVOKED: &str = "http://uri.etsi.org/TrstSvc/Svcstatus/revoked";

/// Extension OID marking the OCSP URL mapping entries of the BNetzA pointer
/// service.
pub const OID_BNA_OCSP_MAPPING: &str = "1.2.276.0.76.4.97";
