use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use super::options::{ConnectErrorNotifier, ConnectHook, ConnectOptions, LocalBind};
use crate::dane::{TlsaRecord, TlsaVerifier};
use crate::error::ConnectError;
use crate::mta_sts::{Policy, PolicyCache, PolicyFetcher, PolicyMatch};
use crate::resolver::{DnsResolver, SystemResolver};

/// Byte stream handed to the SMTP client. Boxed so connect hooks can divert
/// through proxies or inject in-memory streams.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// One named mail host, together with everything later stages learned about
/// it.
#[derive(Debug, Clone)]
pub struct MxEntry {
    pub exchange: String,
    /// Lower is preferred.
    pub priority: u16,
    /// True when the entry came from an MX record, false when synthesized
    /// from A/AAAA fallback or an IP-literal target.
    pub from_mx: bool,
    pub a: Vec<Ipv4Addr>,
    pub aaaa: Vec<Ipv6Addr>,
    pub policy_match: Option<PolicyMatch>,
    pub tlsa: Option<Vec<TlsaRecord>>,
    pub dane_lookup_failed: bool,
    pub dane_lookup_error: Option<ConnectError>,
}

impl MxEntry {
    pub fn new(exchange: impl Into<String>, priority: u16, from_mx: bool) -> Self {
        Self {
            exchange: exchange.into(),
            priority,
            from_mx,
            a: Vec::new(),
            aaaa: Vec::new(),
            policy_match: None,
            tlsa: None,
            dane_lookup_failed: false,
            dane_lookup_error: None,
        }
    }

    pub fn has_addresses(&self) -> bool {
        !self.a.is_empty() || !self.aaaa.is_empty()
    }
}

/// Resolution behavior flags, copied off the options at entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsSettings {
    pub ignore_ipv6: bool,
    pub prefer_ipv6: bool,
    pub block_local_addresses: bool,
}

pub(crate) struct MtaStsState {
    pub enabled: bool,
    pub fetcher: Option<Arc<dyn PolicyFetcher>>,
    pub cache: Option<Arc<dyn PolicyCache>>,
    pub policy: Option<Policy>,
}

pub(crate) struct DaneState {
    pub enabled: bool,
    pub verify: bool,
    pub resolver: Option<Arc<dyn DnsResolver>>,
}

/// The value threaded through the pipeline: inputs, intermediate results,
/// and everything the connection engine needs. Owned by exactly one
/// `connect` call; stages mutate it strictly one at a time.
pub struct Delivery {
    /// The target as given, possibly non-ASCII, possibly an IP literal.
    pub domain: String,
    /// A-label form of `domain`, or the raw IP when `is_ip` is set.
    pub decoded_domain: String,
    pub is_ip: bool,
    pub is_punycode: bool,
    pub port: u16,
    pub mx: Vec<MxEntry>,
    pub dns: DnsSettings,
    pub max_connect_time: Duration,
    pub(crate) resolver: Arc<dyn DnsResolver>,
    pub(crate) local: LocalBind,
    pub(crate) ignore_mx_hosts: HashSet<IpAddr>,
    pub(crate) mx_last_error: Option<ConnectError>,
    pub(crate) connect_hook: Option<ConnectHook>,
    pub(crate) connect_error: Option<ConnectErrorNotifier>,
    pub(crate) mta_sts: MtaStsState,
    pub(crate) dane: DaneState,
    pub(crate) cancel: CancellationToken,
}

impl Delivery {
    pub(crate) fn from_options(options: ConnectOptions) -> Result<Self, ConnectError> {
        let resolver: Arc<dyn DnsResolver> = match options.dns.resolver {
            Some(resolver) => resolver,
            None => Arc::new(
                SystemResolver::from_system_conf()
                    .map_err(|err| ConnectError::from_dns(&err, "resolver initialization"))?,
            ),
        };

        Ok(Self {
            domain: options.target,
            decoded_domain: String::new(),
            is_ip: false,
            is_punycode: false,
            port: options.port,
            mx: options.mx.into_iter().map(|hint| hint.into_entry()).collect(),
            dns: DnsSettings {
                ignore_ipv6: options.dns.ignore_ipv6,
                prefer_ipv6: options.dns.prefer_ipv6,
                block_local_addresses: options.dns.block_local_addresses,
            },
            max_connect_time: options.max_connect_time,
            resolver,
            local: options.local,
            ignore_mx_hosts: options.ignore_mx_hosts.into_iter().collect(),
            mx_last_error: options.mx_last_error,
            connect_hook: options.connect_hook,
            connect_error: options.connect_error,
            mta_sts: MtaStsState {
                enabled: options.mta_sts.enabled,
                fetcher: options.mta_sts.fetcher,
                cache: options.mta_sts.cache,
                policy: None,
            },
            dane: DaneState {
                enabled: options.dane.enabled,
                verify: options.dane.verify,
                resolver: options.dane.resolver,
            },
            cancel: options.cancel.unwrap_or_default(),
        })
    }

    /// The policy fetched for this delivery, once the fetch stage has run.
    pub fn mta_sts_policy(&self) -> Option<&Policy> {
        self.mta_sts.policy.as_ref()
    }
}

/// The established connection, ready to hand to an SMTP client.
///
/// When `require_tls` is set the host published TLSA records and the caller
/// must upgrade to TLS and run `dane_verifier` against the peer certificate;
/// proceeding in plaintext would void the DANE guarantee.
pub struct Connection {
    pub socket: BoxedStream,
    /// Name of the MX host the socket points at.
    pub hostname: String,
    /// The IP actually dialed.
    pub host: IpAddr,
    pub port: u16,
    pub local_address: Option<IpAddr>,
    pub local_hostname: Option<String>,
    pub local_port: Option<u16>,
    pub dane_enabled: bool,
    pub require_tls: bool,
    pub tlsa_records: Option<Vec<TlsaRecord>>,
    pub dane_verifier: Option<TlsaVerifier>,
    pub policy_match: Option<PolicyMatch>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("hostname", &self.hostname)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("local_address", &self.local_address)
            .field("local_hostname", &self.local_hostname)
            .field("local_port", &self.local_port)
            .field("dane_enabled", &self.dane_enabled)
            .field("require_tls", &self.require_tls)
            .field("tlsa_records", &self.tlsa_records)
            .field("policy_match", &self.policy_match)
            .finish_non_exhaustive()
    }
}
