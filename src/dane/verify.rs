//! Certificate association checking for TLSA records.
//!
//! The verifier receives the peer's end-entity certificate in DER form (and
//! the chain, when the TLS stack exposes it) after the caller has driven the
//! handshake. Matching follows RFC 6698 §2.1: the selector picks the
//! comparison material, the matching type transforms it, and the result is
//! compared byte-for-byte against the record's association data.

use sha2::{Digest, Sha256, Sha512};
use x509_parser::prelude::{FromDer, X509Certificate};

use super::{usage_label, TlsaRecord};
use crate::error::{ConnectError, ErrorCategory};

/// Result of a successful verifier run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaneOutcome {
    /// A TLSA record matched; `usage` names its certificate usage.
    Matched { usage: &'static str },
    /// Nothing matched, but verification is not enforced for this delivery.
    Skipped,
    /// The verifier holds no records; there is nothing to check.
    NoRecords,
}

/// Checks a peer certificate against the TLSA records of one MX host.
///
/// Handed out on [`Connection`](crate::connect::Connection) when the host
/// published TLSA records; a connection carrying a verifier must not proceed
/// in plaintext.
#[derive(Debug, Clone)]
pub struct TlsaVerifier {
    hostname: String,
    records: Vec<TlsaRecord>,
    enforce: bool,
}

impl TlsaVerifier {
    pub(crate) fn new(hostname: impl Into<String>, records: Vec<TlsaRecord>, enforce: bool) -> Self {
        Self {
            hostname: hostname.into(),
            records,
            enforce,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn records(&self) -> &[TlsaRecord] {
        &self.records
    }

    /// Verifies `end_entity` (DER) against the held TLSA records.
    ///
    /// The first matching record wins. When none match and enforcement is on,
    /// the error concatenates one diagnostic per record; malformed records or
    /// unparseable certificates become diagnostics, never panics. With
    /// enforcement off the mismatch is logged and reported as
    /// [`DaneOutcome::Skipped`].
    pub fn verify(
        &self,
        hostname: &str,
        end_entity: &[u8],
        chain: Option<&[Vec<u8>]>,
    ) -> Result<DaneOutcome, ConnectError> {
        if self.records.is_empty() {
            return Ok(DaneOutcome::NoRecords);
        }

        let mut diagnostics = Vec::new();
        let mut errored = false;

        for record in &self.records {
            match match_record(record, end_entity, chain) {
                Ok(true) => {
                    let usage = usage_label(record.usage);
                    tracing::debug!(
                        action = "dane",
                        hostname,
                        usage,
                        success = true,
                        "TLSA record matched peer certificate"
                    );
                    return Ok(DaneOutcome::Matched { usage });
                }
                Ok(false) => diagnostics.push(format!(
                    "TLSA record ({} {} {}) did not match the certificate",
                    record.usage, record.selector, record.matching_type
                )),
                Err(diagnostic) => {
                    errored = true;
                    diagnostics.push(diagnostic);
                }
            }
        }

        let detail = diagnostics.join("; ");
        if !self.enforce {
            tracing::warn!(
                action = "dane",
                hostname,
                success = false,
                enforced = false,
                "DANE verification failed: {detail}"
            );
            return Ok(DaneOutcome::Skipped);
        }

        let code = if errored {
            "DANE_VERIFICATION_ERROR"
        } else {
            "DANE_VERIFICATION_FAILED"
        };
        Err(ConnectError::new(
            ErrorCategory::Dane,
            code,
            format!("DANE verification of {hostname} failed: {detail}"),
        ))
    }
}

fn match_record(
    record: &TlsaRecord,
    end_entity: &[u8],
    chain: Option<&[Vec<u8>]>,
) -> Result<bool, String> {
    let association = record
        .cert
        .to_bytes()
        .map_err(|err| format!("failed to extract certificate association data: {err}"))?;

    match record.usage {
        // end-entity usages compare against the presented certificate
        1 | 3 => {
            let material = selector_data(record.selector, end_entity)?;
            let transformed = transform(record.matching_type, &material)?;
            Ok(transformed == association.as_ref())
        }
        // trust-anchor usages need the chain
        0 | 2 => {
            let chain = match chain {
                Some(chain) if !chain.is_empty() => chain,
                _ => {
                    return Err(format!(
                        "TLSA usage {} requires certificate chain which is not available",
                        record.usage
                    ))
                }
            };
            let mut first_error = None;
            for cert in chain {
                let outcome = selector_data(record.selector, cert)
                    .and_then(|material| transform(record.matching_type, &material));
                match outcome {
                    Ok(transformed) if transformed == association.as_ref() => return Ok(true),
                    Ok(_) => {}
                    Err(err) => {
                        first_error.get_or_insert(err);
                    }
                }
            }
            match first_error {
                Some(err) => Err(err),
                None => Ok(false),
            }
        }
        other => Err(format!("unsupported TLSA certificate usage {other}")),
    }
}

fn selector_data(selector: u8, der: &[u8]) -> Result<Vec<u8>, String> {
    match selector {
        0 => Ok(der.to_vec()),
        1 => {
            let (_, cert) = X509Certificate::from_der(der)
                .map_err(|err| format!("failed to extract public key from certificate: {err}"))?;
            Ok(cert.public_key().raw.to_vec())
        }
        other => Err(format!("unsupported TLSA selector {other}")),
    }
}

fn transform(matching_type: u8, material: &[u8]) -> Result<Vec<u8>, String> {
    match matching_type {
        0 => Ok(material.to_vec()),
        1 => Ok(Sha256::digest(material).to_vec()),
        2 => Ok(Sha512::digest(material).to_vec()),
        other => Err(format!(
            "failed to hash selector data: unsupported matching type {other}"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dane::CertAssociation;

    fn sha256(data: &[u8]) -> Vec<u8> {
        Sha256::digest(data).to_vec()
    }

    #[test]
    fn empty_record_set_is_success() {
        let verifier = TlsaVerifier::new("mx.example.com", Vec::new(), true);
        let outcome = verifier.verify("mx.example.com", b"anything", None).unwrap();
        assert_eq!(outcome, DaneOutcome::NoRecords);
    }

    #[test]
    fn dane_ee_sha256_of_full_der_matches() {
        let der = b"synthetic certificate bytes".to_vec();
        let record = TlsaRecord::new(3, 0, 1, CertAssociation::Raw(sha256(&der)));
        let verifier = TlsaVerifier::new("mx.example.com", vec![record], true);

        let outcome = verifier.verify("mx.example.com", &der, None).unwrap();
        assert_eq!(outcome, DaneOutcome::Matched { usage: "DANE-EE" });
    }

    #[test]
    fn dane_ee_mismatch_fails_with_code() {
        let der = b"synthetic certificate bytes".to_vec();
        let record = TlsaRecord::new(3, 0, 1, CertAssociation::Raw(vec![0u8; 32]));
        let verifier = TlsaVerifier::new("mx.example.com", vec![record], true);

        let err = verifier.verify("mx.example.com", &der, None).unwrap_err();
        assert_eq!(err.code, "DANE_VERIFICATION_FAILED");
        assert_eq!(err.category, ErrorCategory::Dane);
    }

    #[test]
    fn hex_association_data_is_accepted() {
        let der = b"hex encoded association".to_vec();
        let record = TlsaRecord::new(3, 0, 1, CertAssociation::Hex(hex::encode(sha256(&der))));
        let verifier = TlsaVerifier::new("mx.example.com", vec![record], true);

        let outcome = verifier.verify("mx.example.com", &der, None).unwrap();
        assert_eq!(outcome, DaneOutcome::Matched { usage: "DANE-EE" });
    }

    #[test]
    fn full_matching_type_is_identity() {
        let der = b"identity match".to_vec();
        let record = TlsaRecord::new(3, 0, 0, CertAssociation::Raw(der.clone()));
        let verifier = TlsaVerifier::new("mx.example.com", vec![record], true);

        let outcome = verifier.verify("mx.example.com", &der, None).unwrap();
        assert_eq!(outcome, DaneOutcome::Matched { usage: "DANE-EE" });
    }

    #[test]
    fn hashing_is_pure() {
        let input = b"pure function".to_vec();
        assert_eq!(transform(1, &input).unwrap(), transform(1, &input).unwrap());
        assert_eq!(transform(2, &input).unwrap(), transform(2, &input).unwrap());
        assert_eq!(transform(0, &input).unwrap(), input);
    }

    #[test]
    fn trust_anchor_usage_without_chain_degrades_to_diagnostic() {
        let record = TlsaRecord::new(2, 0, 1, CertAssociation::Raw(vec![0u8; 32]));
        let verifier = TlsaVerifier::new("mx.example.com", vec![record], true);

        let err = verifier.verify("mx.example.com", b"cert", None).unwrap_err();
        assert_eq!(err.code, "DANE_VERIFICATION_ERROR");
        assert!(err
            .message
            .contains("requires certificate chain which is not available"));
    }

    #[test]
    fn trust_anchor_usage_matches_any_chain_certificate() {
        let intermediate = b"intermediate certificate".to_vec();
        let record = TlsaRecord::new(2, 0, 1, CertAssociation::Raw(sha256(&intermediate)));
        let verifier = TlsaVerifier::new("mx.example.com", vec![record], true);

        let chain = vec![b"leaf".to_vec(), intermediate];
        let outcome = verifier
            .verify("mx.example.com", b"leaf", Some(&chain))
            .unwrap();
        assert_eq!(outcome, DaneOutcome::Matched { usage: "DANE-TA" });
    }

    #[test]
    fn spki_selector_on_garbage_der_reports_extraction_failure() {
        let record = TlsaRecord::new(3, 1, 1, CertAssociation::Raw(vec![0u8; 32]));
        let verifier = TlsaVerifier::new("mx.example.com", vec![record], true);

        let err = verifier
            .verify("mx.example.com", b"definitely not DER", None)
            .unwrap_err();
        assert_eq!(err.code, "DANE_VERIFICATION_ERROR");
        assert!(err.message.contains("failed to extract public key"));
    }

    #[test]
    fn bad_record_does_not_shadow_a_later_match() {
        let der = b"certificate".to_vec();
        let broken = TlsaRecord::new(3, 1, 1, CertAssociation::Hex("zz".to_string()));
        let good = TlsaRecord::new(3, 0, 1, CertAssociation::Raw(sha256(&der)));
        let verifier = TlsaVerifier::new("mx.example.com", vec![broken, good], true);

        let outcome = verifier.verify("mx.example.com", &der, None).unwrap();
        assert_eq!(outcome, DaneOutcome::Matched { usage: "DANE-EE" });
    }

    #[test]
    fn unenforced_mismatch_is_skipped_not_failed() {
        let record = TlsaRecord::new(3, 0, 1, CertAssociation::Raw(vec![0u8; 32]));
        let verifier = TlsaVerifier::new("mx.example.com", vec![record], false);

        let outcome = verifier.verify("mx.example.com", b"whatever", None).unwrap();
        assert_eq!(outcome, DaneOutcome::Skipped);
    }
}
