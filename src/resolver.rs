//! DNS access behind one narrow trait.
//!
//! Every stage of the pipeline resolves through [`DnsResolver`], so callers
//! can swap in their own resolver (split-horizon setups, tests) while the
//! default [`SystemResolver`] uses the platform configuration via
//! trust-dns. Error codes are surfaced unchanged for callers to inspect.

use std::net::{Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;
use thiserror::Error;
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};
use trust_dns_resolver::proto::op::ResponseCode;
use trust_dns_resolver::proto::rr::rdata::tlsa::{CertUsage, Matching, Selector};
use trust_dns_resolver::TokioAsyncResolver;

use crate::dane::{CertAssociation, TlsaRecord};

/// One MX answer record.
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MxRecord {
    pub preference: u16,
    pub exchange: String,
}

impl MxRecord {
    pub fn new(preference: u16, exchange: impl Into<String>) -> Self {
        Self {
            preference,
            exchange: exchange.into(),
        }
    }
}

/// Short machine token for a resolution failure, libc style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsCode {
    /// The name exists but carries no records of the requested type.
    NoData,
    /// The name does not exist (NXDOMAIN).
    NotFound,
    ServFail,
    Refused,
    Timeout,
    /// Anything else: transport errors, malformed responses.
    Failure,
}

impl DnsCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoData => "ENODATA",
            Self::NotFound => "ENOTFOUND",
            Self::ServFail => "ESERVFAIL",
            Self::Refused => "EREFUSED",
            Self::Timeout => "ETIMEOUT",
            Self::Failure => "EDNSFAIL",
        }
    }

    /// Negative answers are a normal part of resolution (they trigger
    /// fallbacks); everything else aborts the lookup that saw it.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NoData | Self::NotFound)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DnsError {
    pub code: DnsCode,
    pub message: String,
}

impl DnsError {
    pub fn new(code: DnsCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn no_data(name: &str) -> Self {
        Self::new(DnsCode::NoData, format!("no records found for {name}"))
    }

    pub fn not_found(name: &str) -> Self {
        Self::new(DnsCode::NotFound, format!("{name} does not exist"))
    }
}

/// The lookups the pipeline needs. Implementations must be shareable across
/// concurrent calls.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn lookup_mx(&self, name: &str) -> Result<Vec<MxRecord>, DnsError>;
    async fn lookup_a(&self, name: &str) -> Result<Vec<Ipv4Addr>, DnsError>;
    async fn lookup_aaaa(&self, name: &str) -> Result<Vec<Ipv6Addr>, DnsError>;
    async fn lookup_tlsa(&self, name: &str) -> Result<Vec<TlsaRecord>, DnsError>;
}

/// Lowercases and strips the trailing root dot from an exchange name.
pub(crate) fn normalize_exchange(exchange: &str) -> String {
    exchange.trim_end_matches('.').to_ascii_lowercase()
}

/// [`DnsResolver`] over the system resolver configuration.
pub struct SystemResolver {
    inner: TokioAsyncResolver,
}

impl SystemResolver {
    pub fn from_system_conf() -> Result<Self, DnsError> {
        let inner = TokioAsyncResolver::tokio_from_system_conf().map_err(|err| {
            DnsError::new(
                DnsCode::Failure,
                format!("resolver initialization failed: {err}"),
            )
        })?;
        Ok(Self { inner })
    }

    pub fn new(inner: TokioAsyncResolver) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl DnsResolver for SystemResolver {
    async fn lookup_mx(&self, name: &str) -> Result<Vec<MxRecord>, DnsError> {
        let lookup = self.inner.mx_lookup(name).await.map_err(classify)?;
        Ok(lookup
            .iter()
            .map(|mx| MxRecord::new(mx.preference(), normalize_exchange(&mx.exchange().to_utf8())))
            .collect())
    }

    async fn lookup_a(&self, name: &str) -> Result<Vec<Ipv4Addr>, DnsError> {
        let lookup = self.inner.ipv4_lookup(name).await.map_err(classify)?;
        Ok(lookup.iter().map(|record| record.0).collect())
    }

    async fn lookup_aaaa(&self, name: &str) -> Result<Vec<Ipv6Addr>, DnsError> {
        let lookup = self.inner.ipv6_lookup(name).await.map_err(classify)?;
        Ok(lookup.iter().map(|record| record.0).collect())
    }

    async fn lookup_tlsa(&self, name: &str) -> Result<Vec<TlsaRecord>, DnsError> {
        let lookup = self.inner.tlsa_lookup(name).await.map_err(classify)?;
        Ok(lookup
            .iter()
            .map(|tlsa| TlsaRecord {
                usage: cert_usage_value(tlsa.cert_usage()),
                selector: selector_value(tlsa.selector()),
                matching_type: matching_value(tlsa.matching()),
                cert: CertAssociation::Raw(tlsa.cert_data().to_vec()),
            })
            .collect())
    }
}

fn cert_usage_value(usage: CertUsage) -> u8 {
    match usage {
        CertUsage::CA => 0,
        CertUsage::Service => 1,
        CertUsage::TrustAnchor => 2,
        CertUsage::DomainIssued => 3,
        CertUsage::Unassigned(n) => n,
        CertUsage::Private => 255,
    }
}

fn selector_value(selector: Selector) -> u8 {
    match selector {
        Selector::Full => 0,
        Selector::Spki => 1,
        Selector::Unassigned(n) => n,
        Selector::Private => 255,
    }
}

fn matching_value(matching: Matching) -> u8 {
    match matching {
        Matching::Raw => 0,
        Matching::Sha256 => 1,
        Matching::Sha512 => 2,
        Matching::Unassigned(n) => n,
        Matching::Private => 255,
    }
}

fn classify(err: ResolveError) -> DnsError {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. } => match response_code {
            ResponseCode::NXDomain => DnsError::new(DnsCode::NotFound, err.to_string()),
            ResponseCode::ServFail => DnsError::new(DnsCode::ServFail, err.to_string()),
            ResponseCode::Refused => DnsError::new(DnsCode::Refused, err.to_string()),
            _ => DnsError::new(DnsCode::NoData, err.to_string()),
        },
        ResolveErrorKind::Timeout => DnsError::new(DnsCode::Timeout, err.to_string()),
        _ => DnsError::new(DnsCode::Failure, err.to_string()),
    }
}
