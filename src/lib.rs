#![forbid(unsafe_code)]
//! mxconnect_lib — resolve a mail domain's MX hosts and establish the
//! outbound SMTP connection.
//!
//! From a single target (a domain, an address, or an IP literal) the
//! pipeline locates the candidate mail hosts, expands them to IP addresses,
//! applies MTA-STS and DANE verification material, and dials candidates in
//! priority order until one accepts. The caller receives the established
//! stream together with everything needed to upgrade it to TLS correctly;
//! the SMTP dialogue and the handshake itself stay on the caller's side.

pub mod addr;
pub mod connect;
pub mod dane;
pub mod error;
pub mod mta_sts;
pub mod resolver;

pub use connect::{
    connect, connect_hook, AsyncStream, BoxedStream, ConnectErrorNotifier, ConnectHook,
    ConnectOptions, Connection, DaneOptions, Delivery, DnsOptions, LocalBind, MtaStsOptions,
    MxEntry, MxHint, TcpConnectContext,
};
pub use dane::{CertAssociation, DaneOutcome, TlsaRecord, TlsaVerifier};
pub use error::{ConnectError, ErrorCategory};
pub use mta_sts::{
    FetchStatus, MemoryPolicyCache, Policy, PolicyCache, PolicyFetcher, PolicyMatch, PolicyMode,
};
pub use resolver::{DnsCode, DnsError, DnsResolver, MxRecord, SystemResolver};
