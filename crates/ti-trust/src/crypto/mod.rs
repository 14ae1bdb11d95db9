pub mod cert;
pub mod certtype;
pub mod der;

use chrono::{DateTime, Utc};

pub use cert::{Certificate, ExtendedKeyUsage, KeyUsage, SigningAlgorithm};
pub use certtype::CertificateType;

use crate::error::{TslError, TslErrorCode, TslResult};

/// Well-known object identifiers. The gematik arcs follow gemSpec_OID, the
/// remainder is RFC 5280 / ETSI material.
pub mod oids {
	// X.509 extensions
	pub const EXT_SUBJECT_KEY_ID: &str = "2.5.29.14";
	pub const EXT_KEY_USAGE: &str = "2.5.29.15";
	pub const EXT_SUBJECT_ALT_NAME: &str = "2.5.29.17";
	pub const EXT_BASIC_CONSTRAINTS: &str = "2.5.29.19";
	pub const EXT_CERTIFICATE_POLICIES: &str = "2.5.29.32";
	pub const EXT_AUTHORITY_KEY_ID: &str = "2.5.29.35";
	pub const EXT_EXTENDED_KEY_USAGE: &str = "2.5.29.37";
	pub const EXT_AUTHORITY_INFO_ACCESS: &str = "1.3.6.1.5.5.7.1.1";
	pub const EXT_QC_STATEMENTS: &str = "1.3.6.1.5.5.7.1.3";
	pub const EXT_ADMISSION: &str = "1.3.36.8.3.3";

	// extended key usages
	pub const EKU_SERVER_AUTH: &str = "1.3.6.1.5.5.7.3.1";
	pub const EKU_CLIENT_AUTH: &str = "1.3.6.1.5.5.7.3.2";
	pub const EKU_OCSP_SIGNING: &str = "1.3.6.1.5.5.7.3.9";
	/// id-tsl-kp-tslSigning, ETSI TS 102 231
	pub const EKU_TSL_SIGNING: &str = "0.4.0.2231.3.0";

	// access descriptions
	pub const AD_OCSP: &str = "1.3.6.1.5.5.7.48.1";
	pub const ID_PKIX_OCSP_BASIC: &str = "1.3.6.1.5.5.7.48.1.1";

	// qc statements
	pub const ID_ETSI_QCS_QC_COMPLIANCE: &str = "0.4.0.1862.1.1";

	// BSI TR-03145 CertHash OCSP extension
	pub const CERT_HASH: &str = "1.3.36.8.3.13";

	// public key algorithms
	pub const EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
	pub const RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";

	// signature algorithms
	pub const ECDSA_WITH_SHA256: &str = "1.2.840.10045.4.3.2";
	pub const SHA256_WITH_RSA: &str = "1.2.840.113549.1.1.11";
	pub const SHA512_WITH_RSA: &str = "1.2.840.113549.1.1.13";

	// digest algorithms
	pub const SHA1: &str = "1.3.14.3.2.26";
	pub const SHA256: &str = "2.16.840.1.101.3.4.2.1";
	pub const SHA512: &str = "2.16.840.1.101.3.4.2.3";

	// gematik certificate policies (gemSpec_OID)
	pub const POLICY_EGK_AUT: &str = "1.2.276.0.76.4.70";
	pub const POLICY_EGK_AUT_ALT: &str = "1.2.276.0.76.4.212";
	pub const POLICY_EGK_QES: &str = "1.2.276.0.76.4.66";
	pub const POLICY_HBA_QES: &str = "1.2.276.0.76.4.72";
	pub const POLICY_VK_EAA_ENC: &str = "1.2.276.0.76.4.154";
	pub const POLICY_SMC_B_AUT: &str = "1.2.276.0.76.4.77";
	pub const POLICY_SMC_B_ENC: &str = "1.2.276.0.76.4.76";
	pub const POLICY_SMC_B_OSIG: &str = "1.2.276.0.76.4.78";
	pub const POLICY_FD_AUT: &str = "1.2.276.0.76.4.155";
	pub const POLICY_FD_SIG: &str = "1.2.276.0.76.4.203";
	pub const POLICY_FD_OSIG: &str = "1.2.276.0.76.4.283";
	pub const POLICY_FD_TLS_S: &str = "1.2.276.0.76.4.168";
	pub const POLICY_ZD_TLS_S: &str = "1.2.276.0.76.4.169";

	// gematik profession / technical role oids
	pub const ROLE_EPA_VAU: &str = "1.2.276.0.76.4.209";
	pub const ROLE_ERP_VAU: &str = "1.2.276.0.76.4.258";
	pub const ROLE_EREZEPT: &str = "1.2.276.0.76.4.255";
	pub const ROLE_IDPD: &str = "1.2.276.0.76.4.260";
	pub const ROLE_VSDD: &str = "1.2.276.0.76.4.49";
	pub const ROLE_OCSP: &str = "1.2.276.0.76.4.50";
	pub const ROLE_CMS: &str = "1.2.276.0.76.4.51";
	pub const ROLE_UFS: &str = "1.2.276.0.76.4.52";
	pub const ROLE_AK: &str = "1.2.276.0.76.4.53";
	pub const ROLE_NK: &str = "1.2.276.0.76.4.54";
	pub const ROLE_KT: &str = "1.2.276.0.76.4.55";
	pub const ROLE_SAK: &str = "1.2.276.0.76.4.119";
	pub const ROLE_EPA_AUTHN: &str = "1.2.276.0.76.4.204";
	pub const ROLE_EPA_AUTHZ: &str = "1.2.276.0.76.4.205";
	pub const ROLE_EPA_DVW: &str = "1.2.276.0.76.4.206";
	pub const ROLE_EPA_MGMT: &str = "1.2.276.0.76.4.207";
}

/// Builds a verified partial chain from `leaf` into `trusted`.
///
/// The trusted set holds the CA certificates taken from the trust store, so a
/// single verified issuer link is a complete chain. `verification_time`
/// defaults to now; the BNetzA-VL path passes the leaf's notBefore to accept
/// historically valid QES material.
pub fn build_chain(
	leaf: &Certificate,
	trusted: &[Certificate],
	verification_time: Option<DateTime<Utc>>,
) -> TslResult<Vec<Certificate>> {
	let at = verification_time.unwrap_or_else(Utc::now);
	let mut chain = Vec::new();
	let mut current = leaf.clone();

	// the loop bound caps pathological issuer graphs
	for _ in 0..6 {
		let candidate = trusted.iter().find(|ca| {
			ca.subject() == current.issuer()
				&& (current.authority_key_identifier().is_empty()
					|| ca.subject_key_identifier() == current.authority_key_identifier())
				&& ca.check_validity_period(Some(at))
				&& current.verify_signed_by(ca)
		});
		match candidate {
			Some(ca) => {
				chain.push(ca.clone());
				// self-signed or direct trust ends the walk
				if ca.subject() == ca.issuer() || trusted.contains(ca) {
					return Ok(chain);
				}
				current = ca.clone();
			},
			None => break,
		}
	}

	if chain.is_empty() {
		Err(TslError::new(
			TslErrorCode::CertificateNotValidMath,
			format!(
				"certificate chain verification failed for subject {}",
				leaf.subject()
			),
		))
	} else {
		Ok(chain)
	}
}
