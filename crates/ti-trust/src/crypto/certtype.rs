use crate::crypto::cert::{Certificate, ExtendedKeyUsage, KeyUsage, SigningAlgorithm};
use crate::crypto::oids;
use crate::error::{TslError, TslErrorCode, TslResult};

/// Certificate profiles known to the engine, gemSpec_PKI §4. The declaration
/// order is the classification order: the first profile whose policy OID and
/// required admission roles are present wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum CertificateType {
	C_CH_AUT,
	C_CH_AUT_ALT,
	C_FD_AUT,
	C_FD_SIG,
	C_FD_OSIG,
	C_FD_TLS_S,
	C_HCI_ENC,
	C_HCI_AUT,
	C_HCI_OSIG,
	C_HP_QES,
	C_CH_QES,
	C_HP_ENC,
	C_ZD_TLS_S,
}

pub const ALL_CERTIFICATE_TYPES: [CertificateType; 13] = [
	CertificateType::C_CH_AUT,
	CertificateType::C_CH_AUT_ALT,
	CertificateType::C_FD_AUT,
	CertificateType::C_FD_SIG,
	CertificateType::C_FD_OSIG,
	CertificateType::C_FD_TLS_S,
	CertificateType::C_HCI_ENC,
	CertificateType::C_HCI_AUT,
	CertificateType::C_HCI_OSIG,
	CertificateType::C_HP_QES,
	CertificateType::C_CH_QES,
	CertificateType::C_HP_ENC,
	CertificateType::C_ZD_TLS_S,
];

/// Admission roles accepted on C.FD.SIG / C.FD.OSIG fachdienst certificates.
const TECHNICAL_ROLE_OIDS: &[&str] = &[
	oids::ROLE_VSDD,
	oids::ROLE_OCSP,
	oids::ROLE_CMS,
	oids::ROLE_UFS,
	oids::ROLE_AK,
	oids::ROLE_NK,
	oids::ROLE_KT,
	oids::ROLE_SAK,
	oids::ROLE_EPA_AUTHN,
	oids::ROLE_EPA_AUTHZ,
	oids::ROLE_EPA_DVW,
	oids::ROLE_EPA_MGMT,
	oids::ROLE_EPA_VAU,
	oids::ROLE_ERP_VAU,
	oids::ROLE_EREZEPT,
	oids::ROLE_IDPD,
];

const VAU_ROLE_OIDS: &[&str] = &[oids::ROLE_EPA_VAU, oids::ROLE_ERP_VAU];

const EPA_GATEWAY_ROLE_OIDS: &[&str] = &[
	oids::ROLE_EPA_DVW,
	oids::ROLE_EPA_MGMT,
	oids::ROLE_EPA_AUTHN,
	oids::ROLE_EPA_AUTHZ,
];

impl CertificateType {
	pub fn name(&self) -> &'static str {
		match self {
			CertificateType::C_CH_AUT => "C_CH_AUT",
			CertificateType::C_CH_AUT_ALT => "C_CH_AUT_ALT",
			CertificateType::C_FD_AUT => "C_FD_AUT",
			CertificateType::C_FD_SIG => "C_FD_SIG",
			CertificateType::C_FD_OSIG => "C_FD_OSIG",
			CertificateType::C_FD_TLS_S => "C_FD_TLS_S",
			CertificateType::C_HCI_ENC => "C_HCI_ENC",
			CertificateType::C_HCI_AUT => "C_HCI_AUT",
			CertificateType::C_HCI_OSIG => "C_HCI_OSIG",
			CertificateType::C_HP_QES => "C_HP_QES",
			CertificateType::C_CH_QES => "C_CH_QES",
			CertificateType::C_HP_ENC => "C_HP_ENC",
			CertificateType::C_ZD_TLS_S => "C_ZD_TLS_S",
		}
	}

	pub fn policy_oid(&self) -> &'static str {
		match self {
			CertificateType::C_CH_AUT => oids::POLICY_EGK_AUT,
			CertificateType::C_CH_AUT_ALT => oids::POLICY_EGK_AUT_ALT,
			CertificateType::C_FD_AUT => oids::POLICY_FD_AUT,
			CertificateType::C_FD_SIG => oids::POLICY_FD_SIG,
			CertificateType::C_FD_OSIG => oids::POLICY_FD_OSIG,
			CertificateType::C_FD_TLS_S => oids::POLICY_FD_TLS_S,
			CertificateType::C_HCI_ENC => oids::POLICY_SMC_B_ENC,
			CertificateType::C_HCI_AUT => oids::POLICY_SMC_B_AUT,
			CertificateType::C_HCI_OSIG => oids::POLICY_SMC_B_OSIG,
			CertificateType::C_HP_QES => oids::POLICY_HBA_QES,
			CertificateType::C_CH_QES => oids::POLICY_EGK_QES,
			CertificateType::C_HP_ENC => oids::POLICY_VK_EAA_ENC,
			CertificateType::C_ZD_TLS_S => oids::POLICY_ZD_TLS_S,
		}
	}

	/// Admission roles the profile requires, any-of semantics. Empty means no
	/// role requirement.
	fn required_roles(&self) -> &'static [&'static str] {
		match self {
			CertificateType::C_FD_AUT => VAU_ROLE_OIDS,
			CertificateType::C_FD_TLS_S => EPA_GATEWAY_ROLE_OIDS,
			CertificateType::C_FD_SIG | CertificateType::C_FD_OSIG => TECHNICAL_ROLE_OIDS,
			_ => &[],
		}
	}

	pub fn is_qes(&self) -> bool {
		matches!(
			self,
			CertificateType::C_HP_QES | CertificateType::C_CH_QES | CertificateType::C_HP_ENC
		)
	}

	/// Whether an OCSP response for this profile must carry a matching
	/// CertHash extension. Only the card authentication profiles are exempt.
	pub fn requires_ocsp_cert_hash(&self) -> bool {
		self.is_qes()
			|| !matches!(
				self,
				CertificateType::C_CH_AUT | CertificateType::C_CH_AUT_ALT
			)
	}

	/// Expected extended key usage bits, gemSpec_PKI.
	pub fn expected_extended_key_usage(&self) -> &'static [ExtendedKeyUsage] {
		match self {
			CertificateType::C_CH_AUT
			| CertificateType::C_CH_AUT_ALT
			| CertificateType::C_HCI_AUT => &[ExtendedKeyUsage::SslClient],
			CertificateType::C_FD_TLS_S | CertificateType::C_ZD_TLS_S => {
				&[ExtendedKeyUsage::SslServer]
			},
			_ => &[],
		}
	}

	/// Expected key usage bits; some profiles differ between RSA and EC keys.
	pub fn expected_key_usage(&self, certificate: &Certificate) -> &'static [KeyUsage] {
		let ec = certificate.signing_algorithm() == SigningAlgorithm::EllipticCurve;
		match self {
			// keyEncipherment is optional for RSA card certificates, only the
			// required bits are checked
			CertificateType::C_CH_AUT | CertificateType::C_CH_AUT_ALT => {
				&[KeyUsage::DigitalSignature]
			},
			CertificateType::C_HCI_AUT
			| CertificateType::C_FD_AUT
			| CertificateType::C_ZD_TLS_S => {
				if ec {
					&[KeyUsage::DigitalSignature]
				} else {
					&[KeyUsage::DigitalSignature, KeyUsage::KeyEncipherment]
				}
			},
			CertificateType::C_FD_SIG | CertificateType::C_FD_TLS_S => {
				&[KeyUsage::DigitalSignature]
			},
			CertificateType::C_HCI_ENC => {
				if ec {
					&[KeyUsage::KeyAgreement]
				} else {
					&[KeyUsage::DataEncipherment, KeyUsage::KeyEncipherment]
				}
			},
			CertificateType::C_FD_OSIG
			| CertificateType::C_HCI_OSIG
			| CertificateType::C_HP_QES
			| CertificateType::C_CH_QES
			| CertificateType::C_HP_ENC => &[KeyUsage::NonRepudiation],
		}
	}

	/// Critical extensions every profile tolerates.
	pub fn supported_critical_extensions(&self) -> &'static [&'static str] {
		&[oids::EXT_KEY_USAGE, oids::EXT_BASIC_CONSTRAINTS]
	}

	fn matches(&self, certificate: &Certificate) -> bool {
		if !certificate.check_certificate_policy(self.policy_oid()) {
			return false;
		}
		let roles = self.required_roles();
		roles.is_empty() || certificate.check_roles(roles)
	}
}

impl std::fmt::Display for CertificateType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.name())
	}
}

/// Classifies a certificate by its policy OID and admission roles.
pub fn classify(certificate: &Certificate) -> TslResult<CertificateType> {
	if !certificate.has_certificate_policy() {
		return Err(TslError::new(
			TslErrorCode::CertTypeInfoMissing,
			"all supported certificate types must have a policy set",
		));
	}
	for candidate in ALL_CERTIFICATE_TYPES {
		if candidate.matches(certificate) {
			return Ok(candidate);
		}
	}
	Err(TslError::new(
		TslErrorCode::CertTypeMismatch,
		"unexpected certificate type",
	))
}
