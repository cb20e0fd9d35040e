//! DANE/TLSA handling (RFC 6698, applied to SMTP per RFC 7672).
//!
//! The resolution stage queries `_<port>._tcp.<exchange>` for every MX entry
//! in parallel and records either the TLSA records or a lookup failure on the
//! entry. [`TlsaVerifier`] performs the certificate-association check once
//! the caller has driven the TLS handshake.

mod verify;

pub use verify::{DaneOutcome, TlsaVerifier};

use std::borrow::Cow;
use std::sync::Arc;

use futures::future::join_all;

use crate::connect::Delivery;
use crate::error::{ConnectError, ErrorCategory};
use crate::resolver::DnsResolver;

/// Certificate association data of a TLSA record, as bytes or as the hex
/// form DNS zone files carry. Normalized lazily so malformed hex surfaces as
/// a verification diagnostic instead of a resolution failure.
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertAssociation {
    Raw(Vec<u8>),
    Hex(String),
}

impl CertAssociation {
    pub(crate) fn to_bytes(&self) -> Result<Cow<'_, [u8]>, String> {
        match self {
            Self::Raw(bytes) => Ok(Cow::Borrowed(bytes)),
            Self::Hex(text) => hex::decode(text.trim())
                .map(Cow::Owned)
                .map_err(|err| format!("invalid hex in certificate association data: {err}")),
        }
    }
}

/// One TLSA record: `(usage, selector, matching type, association data)`.
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsaRecord {
    pub usage: u8,
    pub selector: u8,
    pub matching_type: u8,
    pub cert: CertAssociation,
}

impl TlsaRecord {
    pub fn new(usage: u8, selector: u8, matching_type: u8, cert: CertAssociation) -> Self {
        Self {
            usage,
            selector,
            matching_type,
            cert,
        }
    }
}

/// IANA registry name for a certificate usage value.
pub fn usage_label(usage: u8) -> &'static str {
    match usage {
        0 => "PKIX-TA",
        1 => "PKIX-EE",
        2 => "DANE-TA",
        3 => "DANE-EE",
        _ => "UNKNOWN",
    }
}

/// TLSA owner name for an exchange, e.g. `_25._tcp.mx.example.com`.
pub fn tlsa_name(port: u16, exchange: &str) -> String {
    format!("_{port}._tcp.{exchange}")
}

/// Resolution stage: fetch TLSA records for every entry that does not carry
/// caller-supplied ones. Negative answers mean "no DANE for this host"; other
/// failures poison the entry when verification is required and are silently
/// ignored otherwise.
pub(crate) async fn resolve_tlsa(delivery: &mut Delivery) -> Result<(), ConnectError> {
    let resolver: Arc<dyn DnsResolver> = delivery
        .dane
        .resolver
        .clone()
        .unwrap_or_else(|| delivery.resolver.clone());
    let port = delivery.port;
    let verify = delivery.dane.verify;

    let pending: Vec<(usize, String)> = delivery
        .mx
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.tlsa.is_none())
        .map(|(idx, entry)| (idx, tlsa_name(port, &entry.exchange)))
        .collect();

    let lookups = pending.into_iter().map(|(idx, name)| {
        let resolver = resolver.clone();
        async move {
            let outcome = resolver.lookup_tlsa(&name).await;
            (idx, name, outcome)
        }
    });

    for (idx, name, outcome) in join_all(lookups).await {
        let entry = &mut delivery.mx[idx];
        match outcome {
            Ok(records) if !records.is_empty() => {
                tracing::debug!(
                    action = "dane",
                    exchange = %entry.exchange,
                    records = records.len(),
                    success = true,
                    "resolved TLSA records"
                );
                entry.tlsa = Some(records);
            }
            Ok(_) => {}
            Err(err) if err.code.is_recoverable() => {}
            Err(err) => {
                tracing::warn!(
                    action = "dane",
                    exchange = %entry.exchange,
                    success = false,
                    enforced = verify,
                    "TLSA lookup for {name} failed: {err}"
                );
                if verify {
                    entry.dane_lookup_failed = true;
                    entry.dane_lookup_error = Some(
                        ConnectError::new(
                            ErrorCategory::Dane,
                            err.code.as_str(),
                            format!("TLSA lookup for {name} failed: {err}"),
                        )
                        .temporary(),
                    );
                }
            }
        }
    }

    Ok(())
}
