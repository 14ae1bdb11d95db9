pub mod c14n;
pub mod dsig;

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::{TslError, TslErrorCode, TslResult};
use crate::tsl::TslMode;

/// Schema validation seam. Deployments wire the full XSD set in here; the
/// engine itself only depends on the pass/fail outcome.
pub trait XmlValidator: Send + Sync {
	fn validate(&self, xml: &str, mode: TslMode) -> TslResult<()>;
}

/// Default validator: checks well-formedness and the structural skeleton of a
/// trust list document (root element, scheme information, sequence number,
/// next update).
#[derive(Debug, Default, Clone)]
pub struct StructuralValidator;

const REQUIRED_ELEMENTS: &[&[u8]] = &[
	b"SchemeInformation",
	b"TSLSequenceNumber",
	b"NextUpdate",
];

impl XmlValidator for StructuralValidator {
	fn validate(&self, xml: &str, mode: TslMode) -> TslResult<()> {
		let mut reader = Reader::from_str(xml);
		let mut root_seen = false;
		let mut found = vec![false; REQUIRED_ELEMENTS.len()];

		loop {
			match reader.read_event() {
				Err(e) => {
					return Err(TslError::new(
						TslErrorCode::TslNotWellformed,
						format!("trust list document is not well-formed: {e}"),
					));
				},
				Ok(Event::Eof) => break,
				Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
					let local = e.name().local_name().as_ref().to_vec();
					if !root_seen {
						root_seen = true;
						if local != b"TrustServiceStatusList" {
							return Err(TslError::new(
								TslErrorCode::TslSchemaNotValid,
								format!(
									"unexpected {mode} root element {}",
									String::from_utf8_lossy(&local)
								),
							));
						}
					}
					for (index, name) in REQUIRED_ELEMENTS.iter().enumerate() {
						if local == *name {
							found[index] = true;
						}
					}
				},
				Ok(_) => {},
			}
		}

		if !root_seen {
			return Err(TslError::new(
				TslErrorCode::TslSchemaNotValid,
				"empty trust list document",
			));
		}
		for (index, name) in REQUIRED_ELEMENTS.iter().enumerate() {
			if !found[index] {
				return Err(TslError::new(
					TslErrorCode::TslSchemaNotValid,
					format!(
						"trust list document lacks {}",
						String::from_utf8_lossy(name)
					),
				));
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn accepts_a_structurally_complete_document() {
		let xml = "<TrustServiceStatusList><SchemeInformation><TSLSequenceNumber>1</TSLSequenceNumber><NextUpdate><dateTime>2027-01-01T00:00:00Z</dateTime></NextUpdate></SchemeInformation></TrustServiceStatusList>";
		assert!(StructuralValidator.validate(xml, TslMode::Tsl).is_ok());
	}

	#[test]
	fn rejects_wrong_root() {
		let xml = "<SomethingElse><SchemeInformation/><TSLSequenceNumber/><NextUpdate/></SomethingElse>";
		let err = StructuralValidator.validate(xml, TslMode::Tsl).unwrap_err();
		assert_eq!(err.code, TslErrorCode::TslSchemaNotValid);
	}

	#[test]
	fn rejects_missing_sequence_number() {
		let xml = "<TrustServiceStatusList><SchemeInformation><NextUpdate/></SchemeInformation></TrustServiceStatusList>";
		let err = StructuralValidator.validate(xml, TslMode::Bna).unwrap_err();
		assert_eq!(err.code, TslErrorCode::TslSchemaNotValid);
	}

	#[test]
	fn rejects_malformed_markup() {
		let err = StructuralValidator
			.validate("<TrustServiceStatusList><A></B>", TslMode::Tsl)
			.unwrap_err();
		assert_eq!(err.code, TslErrorCode::TslNotWellformed);
	}
}
