//! Trust Service Status List engine and certificate verification core for a
//! German e-prescription backend.
//!
//! The crate keeps two trust stores current — the Gematik TSL and the
//! BNetzA-VL referenced from within it — and decides whether an X.509
//! certificate presented at runtime may be trusted: card authentication
//! certificates, prescription signer certificates, OCSP responder
//! certificates and the identity-provider signer certificate.
//!
//! Entry points:
//! - [`tsl::manager::TslManager`] owns both stores, refreshes them lazily and
//!   exposes `verify_certificate` / `get_certificate_ocsp_response`.
//! - [`idp::IdpCertUpdater`] keeps the IDP signer certificate fresh by
//!   piggybacking on trust-store refreshes and its own timer.
//!
//! Transport, schema validation and timers are trait seams
//! ([`client::HttpClient`], [`xml::XmlValidator`], [`timer::Timer`]) so the
//! engine can run against fixtures.

pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod idp;
pub mod test_helpers;
pub mod timer;
pub mod tsl;
pub mod xml;

pub use client::{HttpClient, ReqwestClient};
pub use config::Config;
pub use crypto::{Certificate, CertificateType};
pub use error::{TslError, TslErrorCode, TslResult};
pub use idp::{IdpCertUpdater, IdpCertificateHolder};
pub use timer::{Timer, TokioTimer};
pub use tsl::TslMode;
pub use tsl::manager::TslManager;
pub use tsl::ocsp::{CertificateStatus, OcspCheckDescriptor, OcspCheckMode, OcspResponse};
pub use tsl::store::{HealthData, TrustStore};
pub use xml::{StructuralValidator, XmlValidator};
