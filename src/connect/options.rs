use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use super::delivery::{BoxedStream, Delivery, MxEntry};
use crate::error::ConnectError;
use crate::mta_sts::{PolicyCache, PolicyFetcher};
use crate::resolver::DnsResolver;

/// Connection parameters for one candidate, visible to the connect hook.
///
/// A hook that stores a stream in `socket` takes over transport setup: the
/// engine adopts that stream instead of dialing (the SOCKS/Tor diversion
/// path).
pub struct TcpConnectContext {
    pub port: u16,
    pub host: IpAddr,
    pub local_address: Option<IpAddr>,
    pub local_hostname: Option<String>,
    pub socket: Option<BoxedStream>,
}

/// Runs before each TCP attempt. An error aborts the whole call, not just
/// the current candidate.
pub type ConnectHook = Arc<
    dyn for<'a> Fn(
            &'a Delivery,
            &'a mut TcpConnectContext,
        ) -> BoxFuture<'a, Result<(), ConnectError>>
        + Send
        + Sync,
>;

/// Best-effort observer invoked on every retryable per-host failure.
pub type ConnectErrorNotifier =
    Arc<dyn Fn(&ConnectError, &Delivery, &TcpConnectContext) + Send + Sync>;

/// Wraps a closure as a [`ConnectHook`], pinning down the higher-ranked
/// signature so plain `async move { .. }.boxed()` bodies infer cleanly.
pub fn connect_hook<F>(hook: F) -> ConnectHook
where
    F: for<'a> Fn(
            &'a Delivery,
            &'a mut TcpConnectContext,
        ) -> BoxFuture<'a, Result<(), ConnectError>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(hook)
}

/// Caller-supplied knowledge about the target's mail hosts. Anything not
/// provided is resolved.
#[derive(Debug, Clone)]
pub enum MxHint {
    /// A hostname, or an IP string (detected and rerouted to [`MxHint::Ip`]
    /// semantics).
    Host(String),
    Ip(IpAddr),
    Entry {
        exchange: String,
        priority: u16,
        a: Vec<Ipv4Addr>,
        aaaa: Vec<Ipv6Addr>,
    },
}

impl MxHint {
    pub(crate) fn into_entry(self) -> MxEntry {
        match self {
            Self::Host(host) => match host.parse::<IpAddr>() {
                Ok(ip) => Self::Ip(ip).into_entry(),
                Err(_) => MxEntry::new(host, 0, true),
            },
            Self::Ip(ip) => {
                let mut entry = MxEntry::new(ip.to_string(), 0, false);
                match ip {
                    IpAddr::V4(v4) => entry.a.push(v4),
                    IpAddr::V6(v6) => entry.aaaa.push(v6),
                }
                entry
            }
            Self::Entry {
                exchange,
                priority,
                a,
                aaaa,
            } => {
                let mut entry = MxEntry::new(exchange, priority, true);
                entry.a = a;
                entry.aaaa = aaaa;
                entry
            }
        }
    }
}

/// Resolution knobs, plus the pluggable resolver slot.
#[derive(Default)]
pub struct DnsOptions {
    pub ignore_ipv6: bool,
    pub prefer_ipv6: bool,
    pub block_local_addresses: bool,
    pub resolver: Option<Arc<dyn DnsResolver>>,
}

/// Source addressing. The per-family variants win over the generic fields
/// when the dialed candidate matches their family.
#[derive(Debug, Clone, Default)]
pub struct LocalBind {
    pub address: Option<IpAddr>,
    pub hostname: Option<String>,
    pub address_v4: Option<Ipv4Addr>,
    pub hostname_v4: Option<String>,
    pub address_v6: Option<Ipv6Addr>,
    pub hostname_v6: Option<String>,
}

/// MTA-STS toggles. Enabling without a fetcher elides the policy stages;
/// the fetch itself is an external collaborator.
#[derive(Default)]
pub struct MtaStsOptions {
    pub enabled: bool,
    pub fetcher: Option<Arc<dyn PolicyFetcher>>,
    pub cache: Option<Arc<dyn PolicyCache>>,
}

/// DANE toggles. `verify` (default true) makes TLSA lookup failures fatal
/// for the affected host; with it off the pipeline only reports what it
/// found.
pub struct DaneOptions {
    pub enabled: bool,
    pub verify: bool,
    /// Dedicated TLSA resolver; falls back to the main resolver.
    pub resolver: Option<Arc<dyn DnsResolver>>,
}

impl Default for DaneOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            verify: true,
            resolver: None,
        }
    }
}

/// Everything [`connect`](super::connect) accepts. A bare string target is
/// enough: `ConnectOptions` converts from `&str`, discarding any mailbox
/// part through the first `@`.
pub struct ConnectOptions {
    pub target: String,
    pub port: u16,
    pub mx: Vec<MxHint>,
    pub dns: DnsOptions,
    pub local: LocalBind,
    /// Per-host TCP deadline.
    pub max_connect_time: Duration,
    /// Candidate IPs never dialed, applied after flattening.
    pub ignore_mx_hosts: Vec<IpAddr>,
    /// Reported when the ignore list empties the candidate set.
    pub mx_last_error: Option<ConnectError>,
    pub connect_hook: Option<ConnectHook>,
    pub connect_error: Option<ConnectErrorNotifier>,
    pub mta_sts: MtaStsOptions,
    pub dane: DaneOptions,
    pub cancel: Option<CancellationToken>,
}

pub(crate) const DEFAULT_SMTP_PORT: u16 = 25;
pub(crate) const DEFAULT_MAX_CONNECT_TIME: Duration = Duration::from_secs(5 * 60);

impl ConnectOptions {
    pub fn new(target: impl AsRef<str>) -> Self {
        Self {
            target: normalize_target(target.as_ref()),
            port: DEFAULT_SMTP_PORT,
            mx: Vec::new(),
            dns: DnsOptions::default(),
            local: LocalBind::default(),
            max_connect_time: DEFAULT_MAX_CONNECT_TIME,
            ignore_mx_hosts: Vec::new(),
            mx_last_error: None,
            connect_hook: None,
            connect_error: None,
            mta_sts: MtaStsOptions::default(),
            dane: DaneOptions::default(),
            cancel: None,
        }
    }
}

impl From<&str> for ConnectOptions {
    fn from(target: &str) -> Self {
        Self::new(target)
    }
}

impl From<String> for ConnectOptions {
    fn from(target: String) -> Self {
        Self::new(target)
    }
}

/// Accepts domains, addresses, and IP literals; for an address, everything
/// up to and including the first `@` is discarded.
fn normalize_target(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.split_once('@') {
        Some((_, rest)) => rest.to_string(),
        None => trimmed.to_string(),
    }
}
