//! Minimal DER tooling for the ASN.1 structures the X.509/OCSP crates do not
//! surface: OCSP response internals, CertHash, admission and QC-statement
//! extension bodies. Definite lengths only, which is all DER permits.

use chrono::{DateTime, TimeZone, Utc};

pub const TAG_BOOLEAN: u8 = 0x01;
pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_BIT_STRING: u8 = 0x03;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_OID: u8 = 0x06;
pub const TAG_ENUMERATED: u8 = 0x0a;
pub const TAG_UTC_TIME: u8 = 0x17;
pub const TAG_GENERALIZED_TIME: u8 = 0x18;
pub const TAG_SEQUENCE: u8 = 0x30;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DerError {
	#[error("truncated DER element")]
	Truncated,
	#[error("unexpected tag {actual:#04x}, expected {expected:#04x}")]
	UnexpectedTag { expected: u8, actual: u8 },
	#[error("unsupported length encoding")]
	BadLength,
	#[error("malformed {0}")]
	Malformed(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct Tlv<'a> {
	pub tag: u8,
	pub content: &'a [u8],
}

impl<'a> Tlv<'a> {
	pub fn is_constructed(&self) -> bool {
		self.tag & 0x20 != 0
	}

	pub fn is_context(&self, number: u8) -> bool {
		self.tag & 0xc0 == 0x80 && self.tag & 0x1f == number
	}

	pub fn expect(&self, tag: u8) -> Result<&'a [u8], DerError> {
		if self.tag == tag {
			Ok(self.content)
		} else {
			Err(DerError::UnexpectedTag {
				expected: tag,
				actual: self.tag,
			})
		}
	}
}

/// Reads one TLV from the front of `input`, returning it and the rest.
pub fn read_tlv(input: &[u8]) -> Result<(Tlv<'_>, &[u8]), DerError> {
	if input.len() < 2 {
		return Err(DerError::Truncated);
	}
	let tag = input[0];
	if tag & 0x1f == 0x1f {
		// multi-byte tags do not occur in the structures handled here
		return Err(DerError::Malformed("multi-byte tag"));
	}
	let first = input[1];
	let (length, header) = if first & 0x80 == 0 {
		(first as usize, 2)
	} else {
		let count = (first & 0x7f) as usize;
		if count == 0 || count > 4 || input.len() < 2 + count {
			return Err(DerError::BadLength);
		}
		let mut length = 0usize;
		for byte in &input[2..2 + count] {
			length = length << 8 | *byte as usize;
		}
		(length, 2 + count)
	};
	if input.len() < header + length {
		return Err(DerError::Truncated);
	}
	Ok((
		Tlv {
			tag,
			content: &input[header..header + length],
		},
		&input[header + length..],
	))
}

/// Splits a constructed element's content into its child TLVs.
pub fn children(mut content: &[u8]) -> Result<Vec<Tlv<'_>>, DerError> {
	let mut out = Vec::new();
	while !content.is_empty() {
		let (tlv, rest) = read_tlv(content)?;
		out.push(tlv);
		content = rest;
	}
	Ok(out)
}

/// The full encoding (header plus content) of the first TLV in `input`.
pub fn raw_tlv(input: &[u8]) -> Result<&[u8], DerError> {
	let (_, rest) = read_tlv(input)?;
	Ok(&input[..input.len() - rest.len()])
}

pub fn decode_oid(content: &[u8]) -> Result<String, DerError> {
	if content.is_empty() {
		return Err(DerError::Malformed("empty oid"));
	}
	let mut parts = vec![
		(content[0] / 40).min(2).to_string(),
		if content[0] / 40 >= 2 {
			(content[0] as u32 - 80).to_string()
		} else {
			(content[0] % 40).to_string()
		},
	];
	let mut value: u64 = 0;
	for byte in &content[1..] {
		value = value << 7 | (byte & 0x7f) as u64;
		if byte & 0x80 == 0 {
			parts.push(value.to_string());
			value = 0;
		}
	}
	if value != 0 {
		return Err(DerError::Malformed("truncated oid arc"));
	}
	Ok(parts.join("."))
}

pub fn encode_oid(text: &str) -> Result<Vec<u8>, DerError> {
	let arcs: Vec<u64> = text
		.split('.')
		.map(|part| part.parse().map_err(|_| DerError::Malformed("oid text")))
		.collect::<Result<_, _>>()?;
	if arcs.len() < 2 || arcs[0] > 2 {
		return Err(DerError::Malformed("oid text"));
	}
	let mut body = vec![(arcs[0] * 40 + arcs[1]) as u8];
	for arc in &arcs[2..] {
		let mut stack = Vec::new();
		let mut value = *arc;
		loop {
			stack.push((value & 0x7f) as u8);
			value >>= 7;
			if value == 0 {
				break;
			}
		}
		while let Some(byte) = stack.pop() {
			if stack.is_empty() {
				body.push(byte);
			} else {
				body.push(byte | 0x80);
			}
		}
	}
	Ok(body)
}

/// Recursively collects every OBJECT IDENTIFIER found in a DER blob. Used for
/// admission and QC-statement extension bodies where only OID membership
/// matters.
pub fn collect_oids(der: &[u8]) -> Vec<String> {
	let mut oids = Vec::new();
	collect_oids_into(der, &mut oids);
	oids
}

fn collect_oids_into(mut input: &[u8], oids: &mut Vec<String>) {
	while let Ok((tlv, rest)) = read_tlv(input) {
		if tlv.tag == TAG_OID {
			if let Ok(oid) = decode_oid(tlv.content) {
				oids.push(oid);
			}
		} else if tlv.is_constructed() {
			collect_oids_into(tlv.content, oids);
		}
		input = rest;
	}
}

pub fn parse_time(tlv: &Tlv<'_>) -> Result<DateTime<Utc>, DerError> {
	let text = std::str::from_utf8(tlv.content).map_err(|_| DerError::Malformed("time"))?;
	let parse = |digits: &str, century: bool| -> Result<DateTime<Utc>, DerError> {
		let full = if century {
			digits.to_string()
		} else {
			// RFC 5280 sliding window for two-digit years
			let year: u32 = digits[..2].parse().map_err(|_| DerError::Malformed("time"))?;
			let prefix = if year >= 50 { "19" } else { "20" };
			format!("{prefix}{digits}")
		};
		let parsed = chrono::NaiveDateTime::parse_from_str(&full, "%Y%m%d%H%M%SZ")
			.map_err(|_| DerError::Malformed("time"))?;
		Ok(Utc.from_utc_datetime(&parsed))
	};
	match tlv.tag {
		TAG_GENERALIZED_TIME => parse(text, true),
		TAG_UTC_TIME => parse(text, false),
		_ => Err(DerError::UnexpectedTag {
			expected: TAG_GENERALIZED_TIME,
			actual: tlv.tag,
		}),
	}
}

// ---- writer ----

pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
	let mut out = vec![tag];
	let len = content.len();
	if len < 0x80 {
		out.push(len as u8);
	} else {
		let bytes = len.to_be_bytes();
		let significant: Vec<u8> = bytes.iter().copied().skip_while(|b| *b == 0).collect();
		out.push(0x80 | significant.len() as u8);
		out.extend_from_slice(&significant);
	}
	out.extend_from_slice(content);
	out
}

pub fn seq(parts: &[Vec<u8>]) -> Vec<u8> {
	tlv(TAG_SEQUENCE, &parts.concat())
}

pub fn oid(text: &str) -> Vec<u8> {
	let body = encode_oid(text).unwrap_or_default();
	tlv(TAG_OID, &body)
}

pub fn octet_string(bytes: &[u8]) -> Vec<u8> {
	tlv(TAG_OCTET_STRING, bytes)
}

pub fn bit_string(bytes: &[u8]) -> Vec<u8> {
	let mut content = vec![0u8];
	content.extend_from_slice(bytes);
	tlv(TAG_BIT_STRING, &content)
}

pub fn integer(bytes: &[u8]) -> Vec<u8> {
	let trimmed: Vec<u8> = bytes.iter().copied().skip_while(|b| *b == 0).collect();
	let mut content = if trimmed.is_empty() { vec![0] } else { trimmed };
	if content[0] & 0x80 != 0 {
		content.insert(0, 0);
	}
	tlv(TAG_INTEGER, &content)
}

pub fn null() -> Vec<u8> {
	tlv(TAG_NULL, &[])
}

pub fn boolean(value: bool) -> Vec<u8> {
	tlv(TAG_BOOLEAN, &[if value { 0xff } else { 0x00 }])
}

pub fn enumerated(value: u8) -> Vec<u8> {
	tlv(TAG_ENUMERATED, &[value])
}

pub fn generalized_time(at: DateTime<Utc>) -> Vec<u8> {
	let text = at.format("%Y%m%d%H%M%SZ").to_string();
	tlv(TAG_GENERALIZED_TIME, text.as_bytes())
}

/// Context-specific constructed wrapper, `[n] EXPLICIT`.
pub fn explicit(number: u8, inner: &[u8]) -> Vec<u8> {
	tlv(0xa0 | number, inner)
}

/// Context-specific primitive, `[n] IMPLICIT` over primitive content.
pub fn implicit(number: u8, content: &[u8]) -> Vec<u8> {
	tlv(0x80 | number, content)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn oid_round_trip() {
		for text in [
			"1.2.276.0.76.4.70",
			"0.4.0.2231.3.0",
			"1.3.36.8.3.13",
			"2.5.29.15",
			"1.3.6.1.5.5.7.48.1.1",
		] {
			let encoded = encode_oid(text).unwrap();
			assert_eq!(decode_oid(&encoded).unwrap(), text);
		}
	}

	#[test]
	fn reads_nested_sequences() {
		let inner = seq(&[oid("1.2.3.4"), null()]);
		let outer = seq(&[inner.clone(), octet_string(b"abc")]);
		let (top, rest) = read_tlv(&outer).unwrap();
		assert!(rest.is_empty());
		let kids = children(top.content).unwrap();
		assert_eq!(kids.len(), 2);
		assert_eq!(kids[0].tag, TAG_SEQUENCE);
		assert_eq!(kids[1].expect(TAG_OCTET_STRING).unwrap(), b"abc");
	}

	#[test]
	fn long_form_length() {
		let content = vec![0x5a; 300];
		let encoded = octet_string(&content);
		let (tlv, _) = read_tlv(&encoded).unwrap();
		assert_eq!(tlv.content.len(), 300);
	}

	#[test]
	fn collects_oids_recursively() {
		let blob = seq(&[
			explicit(0, &seq(&[oid("1.2.276.0.76.4.30")])),
			oid("0.4.0.1862.1.1"),
		]);
		let oids = collect_oids(&blob);
		assert_eq!(oids, vec!["1.2.276.0.76.4.30", "0.4.0.1862.1.1"]);
	}

	#[test]
	fn generalized_time_round_trip() {
		let at = Utc.with_ymd_and_hms(2026, 8, 1, 12, 30, 45).unwrap();
		let encoded = generalized_time(at);
		let (tlv, _) = read_tlv(&encoded).unwrap();
		assert_eq!(parse_time(&tlv).unwrap(), at);
	}

	#[test]
	fn integer_strips_and_pads() {
		let encoded = integer(&[0x00, 0x80]);
		assert_eq!(encoded, vec![TAG_INTEGER, 0x02, 0x00, 0x80]);
	}
}
