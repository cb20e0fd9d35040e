//! The try loop: flattens MX entries into IP candidates and dials them in
//! order until one accepts.
//!
//! Candidates are attempted strictly sequentially; at most one socket is
//! ever live. Each attempt is a single-winner race between the connect, the
//! per-host deadline, and the caller's cancellation signal: losing futures
//! are dropped, which closes their socket.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpSocket, TcpStream};
use tokio_util::sync::CancellationToken;

use super::delivery::{Connection, Delivery};
use super::options::{LocalBind, TcpConnectContext};
use crate::dane::{TlsaRecord, TlsaVerifier};
use crate::error::{ConnectError, ErrorCategory};
use crate::mta_sts::PolicyMatch;

/// Upper bound on dialed candidates per call.
pub(crate) const MAX_CANDIDATES: usize = 20;

/// One (hostname, IP) pair, the unit of retry.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub hostname: String,
    pub ip: IpAddr,
    pub priority: u16,
    pub policy_match: Option<PolicyMatch>,
    pub tlsa: Option<Vec<TlsaRecord>>,
    pub dane_lookup_failed: bool,
    pub dane_lookup_error: Option<ConnectError>,
}

/// Flatten, dedupe, filter, sort, cap. Returns the candidate list and the
/// number of candidates that existed before the ignore-list filter.
pub(crate) fn build_candidates(delivery: &Delivery) -> (Vec<Candidate>, usize) {
    let mut seen: HashSet<IpAddr> = HashSet::new();
    let mut candidates = Vec::new();

    for entry in &delivery.mx {
        let ips = entry
            .a
            .iter()
            .map(|v4| IpAddr::V4(*v4))
            .chain(entry.aaaa.iter().map(|v6| IpAddr::V6(*v6)));
        for ip in ips {
            if !seen.insert(ip) {
                continue;
            }
            candidates.push(Candidate {
                hostname: entry.exchange.clone(),
                ip,
                priority: entry.priority,
                policy_match: entry.policy_match,
                tlsa: entry.tlsa.clone(),
                dane_lookup_failed: entry.dane_lookup_failed,
                dane_lookup_error: entry.dane_lookup_error.clone(),
            });
        }
    }

    let before_filter = candidates.len();
    candidates.retain(|candidate| !delivery.ignore_mx_hosts.contains(&candidate.ip));

    if delivery.dns.prefer_ipv6 {
        candidates.sort_by_key(|candidate| (candidate.priority, u8::from(candidate.ip.is_ipv4())));
    } else {
        candidates.sort_by_key(|candidate| candidate.priority);
    }
    candidates.truncate(MAX_CANDIDATES);

    (candidates, before_filter)
}

pub(crate) async fn run(delivery: &Delivery) -> Result<Connection, ConnectError> {
    let (candidates, before_filter) = build_candidates(delivery);

    if candidates.is_empty() {
        if before_filter > 0 {
            return Err(delivery.mx_last_error.clone().unwrap_or_else(|| {
                ConnectError::new(
                    ErrorCategory::Network,
                    "ECONNECTION",
                    format!(
                        "all resolved MX hosts of {} are on the ignore list",
                        delivery.decoded_domain
                    ),
                )
                .temporary()
            }));
        }
        return Err(ConnectError::new(
            ErrorCategory::Dns,
            "ENOTFOUND",
            format!("no MX servers found for {}", delivery.decoded_domain),
        ));
    }

    let cancel = delivery.cancel.clone();
    let mut first_error: Option<ConnectError> = None;

    for candidate in candidates {
        let (local_address, local_hostname) = local_binding(&delivery.local, &candidate.ip);
        let mut ctx = TcpConnectContext {
            port: delivery.port,
            host: candidate.ip,
            // a local address equal to the target would dial ourselves
            local_address: local_address.filter(|local| *local != candidate.ip),
            local_hostname,
            socket: None,
        };

        if let Some(verdict) = candidate.policy_match {
            if !verdict.valid && !verdict.testing {
                tracing::warn!(
                    action = "mta-sts",
                    exchange = %candidate.hostname,
                    success = false,
                    "MX host rejected by policy in enforce mode"
                );
                let err = ConnectError::new(
                    ErrorCategory::Policy,
                    "EPOLICY",
                    format!(
                        "MX {} is not allowed by the MTA-STS policy of {}",
                        candidate.hostname, delivery.decoded_domain
                    ),
                );
                notify(delivery, &err, &ctx);
                first_error.get_or_insert(err);
                continue;
            }
            tracing::debug!(
                action = "mta-sts",
                exchange = %candidate.hostname,
                success = true,
                testing = verdict.testing && !verdict.valid,
                "MX host accepted by policy"
            );
        }

        if candidate.dane_lookup_failed && delivery.dane.verify {
            let err = candidate.dane_lookup_error.clone().unwrap_or_else(|| {
                ConnectError::new(
                    ErrorCategory::Dane,
                    "EDNSFAIL",
                    format!("TLSA lookup for {} failed", candidate.hostname),
                )
                .temporary()
            });
            notify(delivery, &err, &ctx);
            first_error.get_or_insert(err);
            continue;
        }

        if let Some(hook) = delivery.connect_hook.clone() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ConnectError::cancelled()),
                // hook errors are fatal to the whole call
                outcome = (*hook)(delivery, &mut ctx) => outcome?,
            }
            if let Some(socket) = ctx.socket.take() {
                let local_hostname = ctx.local_hostname.clone();
                return Ok(established(delivery, &candidate, socket, None, local_hostname));
            }
        }

        match attempt(
            &cancel,
            delivery.max_connect_time,
            candidate.ip,
            delivery.port,
            ctx.local_address,
        )
        .await
        {
            Ok(stream) => {
                let local = stream.local_addr().ok();
                let local_hostname = ctx.local_hostname.clone();
                tracing::debug!(
                    host = %candidate.ip,
                    hostname = %candidate.hostname,
                    port = delivery.port,
                    "connection established"
                );
                return Ok(established(
                    delivery,
                    &candidate,
                    Box::new(stream),
                    local,
                    local_hostname,
                ));
            }
            Err(Attempt::Cancelled) => return Err(ConnectError::cancelled()),
            Err(Attempt::Retry(err)) => {
                tracing::debug!(
                    host = %candidate.ip,
                    hostname = %candidate.hostname,
                    "connection attempt failed: {err}"
                );
                notify(delivery, &err, &ctx);
                first_error.get_or_insert(err);
            }
        }
    }

    Err(first_error.unwrap_or_else(|| {
        ConnectError::new(
            ErrorCategory::Network,
            "ECONNECTION",
            format!(
                "could not establish a connection to any MX host of {}",
                delivery.decoded_domain
            ),
        )
        .temporary()
    }))
}

enum Attempt {
    Cancelled,
    Retry(ConnectError),
}

async fn attempt(
    cancel: &CancellationToken,
    deadline: Duration,
    ip: IpAddr,
    port: u16,
    local: Option<IpAddr>,
) -> Result<TcpStream, Attempt> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Attempt::Cancelled),
        outcome = tokio::time::timeout(deadline, open_stream(ip, port, local)) => match outcome {
            Err(_) => Err(Attempt::Retry(
                ConnectError::new(
                    ErrorCategory::Network,
                    "ETIMEDOUT",
                    format!("connection to {ip}:{port} timed out after {deadline:?}"),
                )
                .temporary(),
            )),
            Ok(Err(err)) => Err(Attempt::Retry(ConnectError::from_io(&err, &ip.to_string(), port))),
            Ok(Ok(stream)) => Ok(stream),
        },
    }
}

async fn open_stream(ip: IpAddr, port: u16, local: Option<IpAddr>) -> std::io::Result<TcpStream> {
    let socket = match ip {
        IpAddr::V4(_) => TcpSocket::new_v4()?,
        IpAddr::V6(_) => TcpSocket::new_v6()?,
    };
    if let Some(local) = local {
        socket.bind(SocketAddr::new(local, 0))?;
    }
    socket.connect(SocketAddr::new(ip, port)).await
}

/// Picks the source address and hostname matching the target family.
fn local_binding(bind: &LocalBind, target: &IpAddr) -> (Option<IpAddr>, Option<String>) {
    match target {
        IpAddr::V4(_) => (
            bind.address_v4
                .map(IpAddr::V4)
                .or(bind.address.filter(IpAddr::is_ipv4)),
            bind.hostname_v4.clone().or_else(|| bind.hostname.clone()),
        ),
        IpAddr::V6(_) => (
            bind.address_v6
                .map(IpAddr::V6)
                .or(bind.address.filter(IpAddr::is_ipv6)),
            bind.hostname_v6.clone().or_else(|| bind.hostname.clone()),
        ),
    }
}

fn established(
    delivery: &Delivery,
    candidate: &Candidate,
    socket: super::delivery::BoxedStream,
    local: Option<SocketAddr>,
    local_hostname: Option<String>,
) -> Connection {
    let (dane_verifier, tlsa_records, require_tls) = match &candidate.tlsa {
        Some(records) if !records.is_empty() => (
            Some(TlsaVerifier::new(
                candidate.hostname.clone(),
                records.clone(),
                delivery.dane.verify,
            )),
            Some(records.clone()),
            true,
        ),
        _ => (None, None, false),
    };

    Connection {
        socket,
        hostname: candidate.hostname.clone(),
        host: candidate.ip,
        port: delivery.port,
        local_address: local.map(|addr| addr.ip()),
        local_port: local.map(|addr| addr.port()),
        local_hostname,
        dane_enabled: delivery.dane.enabled,
        require_tls,
        tlsa_records,
        dane_verifier,
        policy_match: candidate.policy_match,
    }
}

fn notify(delivery: &Delivery, err: &ConnectError, ctx: &TcpConnectContext) {
    if let Some(notifier) = &delivery.connect_error {
        (**notifier)(err, delivery, ctx);
    }
}
