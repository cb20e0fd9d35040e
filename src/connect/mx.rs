//! MX resolution with A/AAAA fallback per RFC 5321 §5.1.

use std::net::IpAddr;
use std::sync::Arc;

use super::delivery::{Delivery, MxEntry};
use crate::addr;
use crate::error::{ConnectError, ErrorCategory};
use crate::resolver::{DnsError, DnsResolver};

pub(crate) async fn resolve(delivery: &mut Delivery) -> Result<(), ConnectError> {
    if delivery.is_ip {
        delivery.mx = vec![ip_entry(&delivery.decoded_domain)?];
        return Ok(());
    }

    let domain = delivery.decoded_domain.clone();
    let resolver = delivery.resolver.clone();

    let answer = resolver.lookup_mx(&domain).await;
    match answer {
        Ok(mut records) if !records.is_empty() => {
            // Null MX (RFC 7505): the domain explicitly receives no mail.
            if records.len() == 1 && records[0].preference == 0 && records[0].exchange.is_empty() {
                return Err(ConnectError::new(
                    ErrorCategory::Dns,
                    "ENOTFOUND",
                    format!("domain {domain} does not accept mail (null MX)"),
                ));
            }
            records.sort_by_key(|record| record.preference);
            delivery.mx = records
                .into_iter()
                .filter(|record| !record.exchange.is_empty())
                .map(|record| MxEntry::new(record.exchange, record.preference, true))
                .collect();
            Ok(())
        }
        Ok(_) => fallback(delivery, &resolver, &domain).await,
        Err(err) if err.code.is_recoverable() => fallback(delivery, &resolver, &domain).await,
        Err(err) => Err(ConnectError::from_dns(
            &err,
            &format!("MX lookup for {domain}"),
        )),
    }
}

fn ip_entry(literal: &str) -> Result<MxEntry, ConnectError> {
    let ip: IpAddr = literal.parse().map_err(|_| {
        ConnectError::new(
            ErrorCategory::Dns,
            "EINVALIDIP",
            format!("{literal} is not a valid IP address"),
        )
    })?;
    let mut entry = MxEntry::new(literal, 0, false);
    match ip {
        IpAddr::V4(v4) => entry.a.push(v4),
        IpAddr::V6(v6) => entry.aaaa.push(v6),
    }
    Ok(entry)
}

/// Implicit MX: treat the domain itself as the single mail host, one entry
/// per validated address.
async fn fallback(
    delivery: &mut Delivery,
    resolver: &Arc<dyn DnsResolver>,
    domain: &str,
) -> Result<(), ConnectError> {
    let block_local = delivery.dns.block_local_addresses;
    let mut rejection: Option<String> = None;

    let v4_addrs = soften(resolver.lookup_a(domain).await)?;
    if !v4_addrs.is_empty() {
        let mut entries = Vec::new();
        for v4 in v4_addrs {
            match addr::is_invalid(&v4.to_string(), block_local) {
                None => {
                    let mut entry = MxEntry::new(domain, 0, false);
                    entry.a.push(v4);
                    entries.push(entry);
                }
                Some(reason) => {
                    rejection.get_or_insert(reason);
                }
            }
        }
        if !entries.is_empty() {
            delivery.mx = entries;
            return Ok(());
        }
        if let Some(reason) = rejection {
            return Err(ConnectError::new(ErrorCategory::Dns, "EINVALIDIP", reason));
        }
    }

    if !delivery.dns.ignore_ipv6 {
        let v6_addrs = soften(resolver.lookup_aaaa(domain).await)?;
        let mut entries = Vec::new();
        for v6 in v6_addrs {
            match addr::is_invalid(&v6.to_string(), block_local) {
                None => {
                    let mut entry = MxEntry::new(domain, 0, false);
                    entry.aaaa.push(v6);
                    entries.push(entry);
                }
                Some(reason) => {
                    rejection.get_or_insert(reason);
                }
            }
        }
        if !entries.is_empty() {
            delivery.mx = entries;
            return Ok(());
        }
        if let Some(reason) = rejection {
            return Err(ConnectError::new(ErrorCategory::Dns, "EINVALIDIP", reason));
        }
    }

    Err(ConnectError::new(
        ErrorCategory::Dns,
        "ENOTFOUND",
        format!("no MX or address records found for {domain}"),
    ))
}

/// Negative answers become empty lists; everything else stays an error the
/// caller turns fatal.
fn soften<T>(outcome: Result<Vec<T>, DnsError>) -> Result<Vec<T>, ConnectError> {
    match outcome {
        Ok(list) => Ok(list),
        Err(err) if err.code.is_recoverable() => Ok(Vec::new()),
        Err(err) => Err(ConnectError::from_dns(&err, "address lookup")),
    }
}
