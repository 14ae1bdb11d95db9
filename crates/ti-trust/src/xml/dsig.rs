//! Enveloped XMLDSig handling for trust list documents: extraction of the
//! embedded signer certificate, digest validation over the signature-stripped
//! canonical document and signature validation over `SignedInfo`.

use base64::Engine;
use openssl::bn::BigNum;
use openssl::ecdsa::EcdsaSig;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::sign::{Signer, Verifier};
use quick_xml::Reader;
use quick_xml::events::Event;

use crate::crypto::Certificate;
use crate::error::{TslError, TslErrorCode, TslResult};
use crate::xml::c14n;

pub const DS_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

pub const ALG_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const ALG_RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";
pub const ALG_ECDSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256";
pub const ALG_DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const ALG_DIGEST_SHA512: &str = "http://www.w3.org/2001/04/xmlenc#sha512";
pub const ALG_ENVELOPED: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
pub const ALG_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

fn signature_error(message: impl Into<String>) -> TslError {
	TslError::new(TslErrorCode::XmlSignatureError, message)
}

struct ExtractedSignature {
	signed_info_canonical: String,
	signature_method: String,
	digest_method: String,
	digest_value: Vec<u8>,
	signature_value: Vec<u8>,
	signer_certificate: Certificate,
}

/// Verifies the enveloped signature of `xml` and returns the embedded signer
/// certificate on success.
pub fn verify_enveloped(xml: &str) -> TslResult<Certificate> {
	let extracted = extract_signature(xml)?;

	let digest_md = digest_for_uri(&extracted.digest_method)?;
	let canonical_document = c14n::canonicalize(xml, true)?;
	let actual_digest = openssl::hash::hash(digest_md, canonical_document.as_bytes())?;
	if actual_digest.as_ref() != extracted.digest_value.as_slice() {
		return Err(signature_error("reference digest mismatch"));
	}

	let key = extracted.signer_certificate.public_key()?;
	let signed_info = extracted.signed_info_canonical.as_bytes();
	let valid = match extracted.signature_method.as_str() {
		ALG_RSA_SHA256 => verify_rsa(&key, MessageDigest::sha256(), signed_info, &extracted.signature_value)?,
		ALG_RSA_SHA512 => verify_rsa(&key, MessageDigest::sha512(), signed_info, &extracted.signature_value)?,
		ALG_ECDSA_SHA256 => verify_ecdsa(&key, signed_info, &extracted.signature_value)?,
		other => return Err(signature_error(format!("unsupported signature algorithm {other}"))),
	};
	if !valid {
		return Err(signature_error("signature value does not verify"));
	}
	Ok(extracted.signer_certificate)
}

fn digest_for_uri(uri: &str) -> TslResult<MessageDigest> {
	match uri {
		ALG_DIGEST_SHA256 => Ok(MessageDigest::sha256()),
		ALG_DIGEST_SHA512 => Ok(MessageDigest::sha512()),
		other => Err(signature_error(format!("unsupported digest algorithm {other}"))),
	}
}

fn verify_rsa(
	key: &PKey<openssl::pkey::Public>,
	md: MessageDigest,
	data: &[u8],
	signature: &[u8],
) -> TslResult<bool> {
	let mut verifier = Verifier::new(md, key)?;
	verifier.update(data)?;
	Ok(verifier.verify(signature).unwrap_or(false))
}

fn verify_ecdsa(
	key: &PKey<openssl::pkey::Public>,
	data: &[u8],
	signature: &[u8],
) -> TslResult<bool> {
	// XMLDSig transports ECDSA signatures as the raw r||s concatenation
	if signature.is_empty() || signature.len() % 2 != 0 {
		return Ok(false);
	}
	let half = signature.len() / 2;
	let r = BigNum::from_slice(&signature[..half])?;
	let s = BigNum::from_slice(&signature[half..])?;
	let der = EcdsaSig::from_private_components(r, s)?.to_der()?;
	let mut verifier = Verifier::new(MessageDigest::sha256(), key)?;
	verifier.update(data)?;
	Ok(verifier.verify(&der).unwrap_or(false))
}

fn extract_signature(xml: &str) -> TslResult<ExtractedSignature> {
	let mut reader = Reader::from_str(xml);
	let mut in_signature = false;
	let mut ds_prefix: Option<String> = None;
	let mut signed_info_raw: Option<String> = None;
	let mut signature_method = None;
	let mut digest_method = None;
	let mut digest_value = None;
	let mut signature_value = None;
	let mut certificate_b64 = None;
	let mut text_target: Option<&'static str> = None;
	let mut signed_info_events: Option<Vec<u8>> = None;

	loop {
		let event = reader
			.read_event()
			.map_err(|e| signature_error(format!("invalid xml: {e}")))?;
		match event {
			Event::Eof => break,
			Event::Start(ref e) | Event::Empty(ref e) => {
				let local = e.name().local_name().as_ref().to_vec();
				if !in_signature {
					if local == b"Signature" {
						in_signature = true;
						ds_prefix = Some(prefix_of(e.name().as_ref()));
					}
					continue;
				}
				if let Some(buffer) = signed_info_events.as_mut() {
					append_raw_start(buffer, e, matches!(event, Event::Empty(_)));
				} else if local == b"SignedInfo" {
					let mut buffer = Vec::new();
					append_raw_start(&mut buffer, e, matches!(event, Event::Empty(_)));
					signed_info_events = Some(buffer);
					if matches!(event, Event::Empty(_)) {
						signed_info_raw = Some(String::from_utf8_lossy(&buffer_take(
							&mut signed_info_events,
						))
						.into_owned());
					}
				}
				match local.as_slice() {
					b"SignatureMethod" => {
						signature_method = attribute_value(e, b"Algorithm");
					},
					b"DigestMethod" => {
						digest_method = attribute_value(e, b"Algorithm");
					},
					b"DigestValue" => text_target = Some("digest"),
					b"SignatureValue" => text_target = Some("signature"),
					b"X509Certificate" => text_target = Some("certificate"),
					_ => {},
				}
			},
			Event::End(ref e) => {
				if !in_signature {
					continue;
				}
				let local = e.name().local_name().as_ref().to_vec();
				if let Some(buffer) = signed_info_events.as_mut() {
					buffer.extend_from_slice(b"</");
					buffer.extend_from_slice(e.name().as_ref());
					buffer.push(b'>');
					if local == b"SignedInfo" {
						signed_info_raw = Some(String::from_utf8_lossy(&buffer_take(
							&mut signed_info_events,
						))
						.into_owned());
					}
				}
				if local == b"Signature" {
					in_signature = false;
				}
				text_target = None;
			},
			Event::Text(ref t) => {
				if let Some(buffer) = signed_info_events.as_mut() {
					buffer.extend_from_slice(t.as_ref());
				}
				if in_signature && let Some(target) = text_target {
					let text: String = String::from_utf8_lossy(t.as_ref())
						.chars()
						.filter(|c| !c.is_whitespace())
						.collect();
					if text.is_empty() {
						continue;
					}
					match target {
						"digest" => digest_value = Some(decode_b64(&text)?),
						"signature" => signature_value = Some(decode_b64(&text)?),
						"certificate" => certificate_b64 = Some(text),
						_ => {},
					}
				}
			},
			_ => {},
		}
	}

	let signed_info_raw =
		signed_info_raw.ok_or_else(|| signature_error("SignedInfo element missing"))?;
	let prefix = ds_prefix.unwrap_or_default();
	let signed_info_canonical =
		c14n::canonicalize_with_ns(&signed_info_raw, false, Some((prefix.as_str(), DS_NS)))?;

	Ok(ExtractedSignature {
		signed_info_canonical,
		signature_method: signature_method
			.ok_or_else(|| signature_error("SignatureMethod missing"))?,
		digest_method: digest_method.ok_or_else(|| signature_error("DigestMethod missing"))?,
		digest_value: digest_value.ok_or_else(|| signature_error("DigestValue missing"))?,
		signature_value: signature_value
			.ok_or_else(|| signature_error("SignatureValue missing"))?,
		signer_certificate: Certificate::from_base64_der(
			&certificate_b64.ok_or_else(|| signature_error("signer certificate missing"))?,
		)
		.map_err(|e| signature_error(format!("embedded signer certificate: {e}")))?,
	})
}

fn buffer_take(buffer: &mut Option<Vec<u8>>) -> Vec<u8> {
	buffer.take().unwrap_or_default()
}

fn prefix_of(qname: &[u8]) -> String {
	match qname.iter().position(|b| *b == b':') {
		Some(index) => String::from_utf8_lossy(&qname[..index]).into_owned(),
		None => String::new(),
	}
}

fn attribute_value(e: &quick_xml::events::BytesStart<'_>, name: &[u8]) -> Option<String> {
	e.attributes().flatten().find_map(|attr| {
		if attr.key.as_ref() == name {
			Some(String::from_utf8_lossy(&attr.value).into_owned())
		} else {
			None
		}
	})
}

fn decode_b64(text: &str) -> TslResult<Vec<u8>> {
	base64::engine::general_purpose::STANDARD
		.decode(text.as_bytes())
		.map_err(|e| signature_error(format!("invalid base64 value: {e}")))
}

fn append_raw_start(buffer: &mut Vec<u8>, e: &quick_xml::events::BytesStart<'_>, empty: bool) {
	buffer.push(b'<');
	buffer.extend_from_slice(e.name().as_ref());
	for attr in e.attributes().flatten() {
		buffer.push(b' ');
		buffer.extend_from_slice(attr.key.as_ref());
		buffer.extend_from_slice(b"=\"");
		buffer.extend_from_slice(&attr.value);
		buffer.push(b'"');
	}
	if empty {
		buffer.extend_from_slice(b"/>");
	} else {
		buffer.push(b'>');
	}
}

/// Signs `xml` (which must not yet contain a `Signature` element) and returns
/// the document with the enveloped signature appended as the last child of
/// the root element. Counterpart of [`verify_enveloped`]; the trust list
/// fixtures used in tests are produced through this path.
pub fn sign_enveloped(
	xml: &str,
	signer_certificate: &Certificate,
	signer_key: &PKey<Private>,
) -> TslResult<String> {
	let canonical_document = c14n::canonicalize(xml, true)?;
	let digest = openssl::hash::hash(MessageDigest::sha256(), canonical_document.as_bytes())?;
	let digest_b64 = base64::engine::general_purpose::STANDARD.encode(&digest);

	let ecdsa = signer_key.ec_key().is_ok();
	let signature_method = if ecdsa { ALG_ECDSA_SHA256 } else { ALG_RSA_SHA256 };

	let signed_info = format!(
		concat!(
			"<ds:SignedInfo xmlns:ds=\"{ns}\">",
			"<ds:CanonicalizationMethod Algorithm=\"{c14n}\"></ds:CanonicalizationMethod>",
			"<ds:SignatureMethod Algorithm=\"{sig}\"></ds:SignatureMethod>",
			"<ds:Reference URI=\"\">",
			"<ds:Transforms>",
			"<ds:Transform Algorithm=\"{enveloped}\"></ds:Transform>",
			"<ds:Transform Algorithm=\"{c14n}\"></ds:Transform>",
			"</ds:Transforms>",
			"<ds:DigestMethod Algorithm=\"{digest_alg}\"></ds:DigestMethod>",
			"<ds:DigestValue>{digest}</ds:DigestValue>",
			"</ds:Reference>",
			"</ds:SignedInfo>"
		),
		ns = DS_NS,
		c14n = ALG_C14N,
		sig = signature_method,
		enveloped = ALG_ENVELOPED,
		digest_alg = ALG_DIGEST_SHA256,
		digest = digest_b64,
	);

	let mut signer = Signer::new(MessageDigest::sha256(), signer_key)?;
	signer.update(signed_info.as_bytes())?;
	let raw_signature = signer.sign_to_vec()?;
	let signature_bytes = if ecdsa {
		der_to_raw_ecdsa(&raw_signature, signer_key)?
	} else {
		raw_signature
	};
	let signature_b64 = base64::engine::general_purpose::STANDARD.encode(&signature_bytes);

	let signature_element = format!(
		concat!(
			"<ds:Signature xmlns:ds=\"{ns}\">",
			"{signed_info}",
			"<ds:SignatureValue>{signature}</ds:SignatureValue>",
			"<ds:KeyInfo><ds:X509Data><ds:X509Certificate>{certificate}</ds:X509Certificate></ds:X509Data></ds:KeyInfo>",
			"</ds:Signature>"
		),
		ns = DS_NS,
		signed_info = signed_info,
		signature = signature_b64,
		certificate = signer_certificate.to_base64(),
	);

	insert_before_root_close(xml, &signature_element)
}

fn der_to_raw_ecdsa(der: &[u8], key: &PKey<Private>) -> TslResult<Vec<u8>> {
	let ec = key.ec_key()?;
	let component_len = ec.group().degree().div_ceil(8) as i32;
	let signature = EcdsaSig::from_der(der)?;
	let mut out = signature.r().to_vec_padded(component_len)?;
	out.extend(signature.s().to_vec_padded(component_len)?);
	Ok(out)
}

fn insert_before_root_close(xml: &str, fragment: &str) -> TslResult<String> {
	let index = xml
		.rfind("</")
		.ok_or_else(|| signature_error("document has no closing root tag"))?;
	let mut out = String::with_capacity(xml.len() + fragment.len());
	out.push_str(&xml[..index]);
	out.push_str(fragment);
	out.push_str(&xml[index..]);
	Ok(out)
}
