use crate::tsl::TslMode;

/// Error taxonomy shared by every fallible operation of the engine.
///
/// The codes mirror the gemSpec_PKI error identifiers so that downstream log
/// correlation keeps working across implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TslErrorCode {
	TslDownloadError,
	TslSchemaNotValid,
	TslNotWellformed,
	XmlSignatureError,
	TslIdIncorrect,
	TslInitError,
	TslCaNotLoaded,
	TslCaUpdateWarning,
	MultipleTrustAnchor,
	ValidityWarning2,
	VlUpdateError,
	CaCertMissing,
	AuthorityKeyIdDifferent,
	CaCertificateRevokedInTsl,
	CaCertificateRevokedInBnetzaVl,
	CertTypeInfoMissing,
	CertTypeMismatch,
	CertTypeCaNotAuthorized,
	CertificateNotValidTime,
	CertificateNotValidMath,
	WrongKeyUsage,
	WrongExtendedKeyUsage,
	QcStatementError,
	CertReadError,
	OcspStatusError,
	OcspCertUnknown,
	OcspCertRevoked,
	ServiceSupplyPointMissing,
	ProvidedOcspResponseNotValid,
	UnknownError,
}

/// Trust-store snapshot coordinates attached to an error, so a log event can
/// be correlated with the TSL that was in use when the error was raised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TslErrorContext {
	pub mode: Option<TslMode>,
	pub tsl_id: Option<String>,
	pub sequence_number: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{code:?}: {message}{}", context_suffix(.context))]
pub struct TslError {
	pub code: TslErrorCode,
	pub message: String,
	pub context: TslErrorContext,
}

fn context_suffix(context: &TslErrorContext) -> String {
	match context.mode {
		Some(mode) => format!(
			" (mode={mode}, tslId={}, sequenceNumber={})",
			context.tsl_id.as_deref().unwrap_or("<unset>"),
			context.sequence_number.as_deref().unwrap_or("<unset>")
		),
		None => String::new(),
	}
}

impl TslError {
	pub fn new(code: TslErrorCode, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
			context: TslErrorContext::default(),
		}
	}

	pub fn with_context(
		mut self,
		mode: TslMode,
		tsl_id: Option<String>,
		sequence_number: String,
	) -> Self {
		self.context = TslErrorContext {
			mode: Some(mode),
			tsl_id,
			sequence_number: Some(sequence_number),
		};
		self
	}

	pub fn unknown(message: impl Into<String>) -> Self {
		Self::new(TslErrorCode::UnknownError, message)
	}
}

impl From<openssl::error::ErrorStack> for TslError {
	fn from(err: openssl::error::ErrorStack) -> Self {
		TslError::unknown(format!("openssl: {err}"))
	}
}

pub type TslResult<T> = Result<T, TslError>;
