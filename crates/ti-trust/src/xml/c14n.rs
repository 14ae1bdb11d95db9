//! Deterministic XML serialization used for signature digests.
//!
//! This is a pragmatic canonical form: prolog, comments and processing
//! instructions are dropped, empty-element tags are expanded, attributes are
//! emitted namespace declarations first and byte-sorted within each group,
//! character data is passed through untouched. Both the signing and the
//! verifying side of the engine run the same serializer, which is what the
//! digest comparison relies on.

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::{TslError, TslErrorCode, TslResult};

const SIGNATURE_LOCAL_NAME: &[u8] = b"Signature";

fn not_wellformed(err: impl std::fmt::Display) -> TslError {
	TslError::new(TslErrorCode::TslNotWellformed, format!("invalid xml: {err}"))
}

/// Canonicalizes a whole document. With `strip_signature` the first
/// `Signature` element (any prefix) and its subtree are omitted, which
/// implements the enveloped-signature transform.
pub fn canonicalize(xml: &str, strip_signature: bool) -> TslResult<String> {
	canonicalize_with_ns(xml, strip_signature, None)
}

/// Same as [`canonicalize`], additionally injecting a namespace declaration
/// into the outermost start tag when it is not declared there. Used to
/// canonicalize an extracted `SignedInfo` subtree that inherits its prefix
/// binding from the enclosing `Signature` element.
pub fn canonicalize_with_ns(
	xml: &str,
	strip_signature: bool,
	inject_ns: Option<(&str, &str)>,
) -> TslResult<String> {
	let mut reader = Reader::from_str(xml);
	let mut out = String::new();
	let mut skip_depth = 0usize;
	let mut seen_root = false;

	loop {
		match reader.read_event().map_err(not_wellformed)? {
			Event::Eof => break,
			Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => {},
			Event::Start(e) => {
				if skip_depth > 0 {
					skip_depth += 1;
					continue;
				}
				if strip_signature && e.name().local_name().as_ref() == SIGNATURE_LOCAL_NAME {
					skip_depth = 1;
					continue;
				}
				let inject = if seen_root { None } else { inject_ns };
				seen_root = true;
				write_start_tag(&mut out, &e, inject)?;
			},
			Event::Empty(e) => {
				if skip_depth > 0 {
					continue;
				}
				if strip_signature && e.name().local_name().as_ref() == SIGNATURE_LOCAL_NAME {
					continue;
				}
				let inject = if seen_root { None } else { inject_ns };
				seen_root = true;
				write_start_tag(&mut out, &e, inject)?;
				out.push_str("</");
				out.push_str(&String::from_utf8_lossy(e.name().as_ref()));
				out.push('>');
			},
			Event::End(e) => {
				if skip_depth > 0 {
					skip_depth -= 1;
					continue;
				}
				out.push_str("</");
				out.push_str(&String::from_utf8_lossy(e.name().as_ref()));
				out.push('>');
			},
			Event::Text(t) => {
				if skip_depth == 0 {
					out.push_str(&String::from_utf8_lossy(t.as_ref()));
				}
			},
			Event::CData(t) => {
				if skip_depth == 0 {
					out.push_str(&String::from_utf8_lossy(t.as_ref()));
				}
			},
			_ => {},
		}
	}

	if skip_depth > 0 {
		return Err(not_wellformed("unterminated element"));
	}
	Ok(out)
}

fn write_start_tag(
	out: &mut String,
	e: &quick_xml::events::BytesStart<'_>,
	inject_ns: Option<(&str, &str)>,
) -> TslResult<()> {
	out.push('<');
	out.push_str(&String::from_utf8_lossy(e.name().as_ref()));

	let mut namespaces: Vec<(String, String)> = Vec::new();
	let mut attributes: Vec<(String, String)> = Vec::new();
	for attr in e.attributes() {
		let attr = attr.map_err(not_wellformed)?;
		let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
		let value = String::from_utf8_lossy(&attr.value).into_owned();
		if key == "xmlns" || key.starts_with("xmlns:") {
			namespaces.push((key, value));
		} else {
			attributes.push((key, value));
		}
	}
	if let Some((prefix, uri)) = inject_ns {
		let key = if prefix.is_empty() {
			"xmlns".to_string()
		} else {
			format!("xmlns:{prefix}")
		};
		if !namespaces.iter().any(|(k, _)| *k == key) {
			namespaces.push((key, uri.to_string()));
		}
	}
	namespaces.sort();
	attributes.sort();

	for (key, value) in namespaces.into_iter().chain(attributes) {
		out.push(' ');
		out.push_str(&key);
		out.push_str("=\"");
		out.push_str(&value);
		out.push('"');
	}
	out.push('>');
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn drops_prolog_and_expands_empty_elements() {
		let xml = "<?xml version=\"1.0\"?><A><B/><!-- note --><C>x</C></A>";
		let canonical = canonicalize(xml, false).unwrap();
		assert_eq!(canonical, "<A><B></B><C>x</C></A>");
	}

	#[test]
	fn sorts_attributes_with_namespaces_first() {
		let xml = "<A b=\"2\" a=\"1\" xmlns:z=\"urn:z\" xmlns=\"urn:d\"><B/></A>";
		let canonical = canonicalize(xml, false).unwrap();
		assert_eq!(
			canonical,
			"<A xmlns=\"urn:d\" xmlns:z=\"urn:z\" a=\"1\" b=\"2\"><B></B></A>"
		);
	}

	#[test]
	fn strips_the_signature_subtree() {
		let xml = "<A><B>1</B><ds:Signature xmlns:ds=\"urn:ds\"><ds:SignedInfo/></ds:Signature><C>2</C></A>";
		let canonical = canonicalize(xml, true).unwrap();
		assert_eq!(canonical, "<A><B>1</B><C>2</C></A>");
	}

	#[test]
	fn injects_inherited_namespace_once() {
		let xml = "<ds:SignedInfo><ds:Reference URI=\"\"/></ds:SignedInfo>";
		let canonical = canonicalize_with_ns(xml, false, Some(("ds", "urn:ds"))).unwrap();
		assert_eq!(
			canonical,
			"<ds:SignedInfo xmlns:ds=\"urn:ds\"><ds:Reference URI=\"\"></ds:Reference></ds:SignedInfo>"
		);
	}

	#[test]
	fn canonical_form_is_a_fixed_point() {
		let xml = "<A b=\"2\" a=\"1\"><B/>text<C>x</C></A>";
		let once = canonicalize(xml, false).unwrap();
		let twice = canonicalize(&once, false).unwrap();
		assert_eq!(once, twice);
	}

	#[test]
	fn rejects_mismatched_tags() {
		assert!(canonicalize("<A><B></A></B>", false).is_err());
	}
}
