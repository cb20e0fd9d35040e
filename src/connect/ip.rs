//! Expansion of MX hostnames into IP addresses.
//!
//! Every entry missing addresses gets one A and (unless IPv6 is disabled)
//! one AAAA query; all lookups across all entries run in parallel and are
//! joined before filtering. Failures are captured in-band so one broken
//! host never aborts the join.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use futures::future::join_all;

use super::delivery::Delivery;
use crate::addr;
use crate::error::{ConnectError, ErrorCategory};
use crate::resolver::DnsError;

struct LookupOutcome {
    a: Vec<Ipv4Addr>,
    aaaa: Vec<Ipv6Addr>,
    error: Option<DnsError>,
}

pub(crate) async fn resolve(delivery: &mut Delivery) -> Result<(), ConnectError> {
    let ignore_ipv6 = delivery.dns.ignore_ipv6;
    let block_local = delivery.dns.block_local_addresses;
    let resolver = delivery.resolver.clone();

    let pending: Vec<(usize, String)> = delivery
        .mx
        .iter()
        .enumerate()
        .filter(|(_, entry)| !entry.has_addresses())
        .map(|(idx, entry)| (idx, entry.exchange.clone()))
        .collect();

    let lookups = pending.into_iter().map(|(idx, exchange)| {
        let resolver = resolver.clone();
        async move {
            // an exchange that already is an IP literal needs no lookup
            if let Ok(ip) = exchange.parse::<IpAddr>() {
                let outcome = match ip {
                    IpAddr::V4(v4) => LookupOutcome {
                        a: vec![v4],
                        aaaa: Vec::new(),
                        error: None,
                    },
                    IpAddr::V6(v6) => LookupOutcome {
                        a: Vec::new(),
                        aaaa: vec![v6],
                        error: None,
                    },
                };
                return (idx, outcome);
            }

            let (a, aaaa) = if ignore_ipv6 {
                (resolver.lookup_a(&exchange).await, Ok(Vec::new()))
            } else {
                tokio::join!(resolver.lookup_a(&exchange), resolver.lookup_aaaa(&exchange))
            };

            let mut error = None;
            let a = flatten(a, &mut error);
            let aaaa = flatten(aaaa, &mut error);
            (idx, LookupOutcome { a, aaaa, error })
        }
    });

    let mut outcomes: HashMap<usize, LookupOutcome> = join_all(lookups).await.into_iter().collect();

    let mut captured: Option<ConnectError> = None;
    let mut address_found = false;

    for (idx, entry) in delivery.mx.iter_mut().enumerate() {
        if let Some(outcome) = outcomes.remove(&idx) {
            if let Some(err) = outcome.error {
                captured.get_or_insert_with(|| {
                    ConnectError::from_dns(&err, &format!("address lookup for {}", entry.exchange))
                });
            }
            entry.a = outcome.a;
            entry.aaaa = outcome.aaaa;
        }

        entry.a.retain(|v4| {
            match addr::is_invalid(&v4.to_string(), block_local) {
                None => true,
                Some(reason) => {
                    captured.get_or_insert_with(|| {
                        ConnectError::new(ErrorCategory::Dns, "EINVALIDIP", reason)
                    });
                    false
                }
            }
        });
        entry.aaaa.retain(|v6| {
            match addr::is_invalid(&v6.to_string(), block_local) {
                None => true,
                Some(reason) => {
                    captured.get_or_insert_with(|| {
                        ConnectError::new(ErrorCategory::Dns, "EINVALIDIP", reason)
                    });
                    false
                }
            }
        });

        address_found |= entry.has_addresses();
    }

    if !address_found {
        return Err(captured.unwrap_or_else(|| {
            ConnectError::new(
                ErrorCategory::Dns,
                "ENOTFOUND",
                format!(
                    "could not resolve any addresses for the MX hosts of {}",
                    delivery.decoded_domain
                ),
            )
        }));
    }

    Ok(())
}

/// Negative answers become empty lists; other failures are captured in-band
/// for the filter pass.
fn flatten<T>(outcome: Result<Vec<T>, DnsError>, error: &mut Option<DnsError>) -> Vec<T> {
    match outcome {
        Ok(list) => list,
        Err(err) if err.code.is_recoverable() => Vec::new(),
        Err(err) => {
            error.get_or_insert(err);
            Vec::new()
        }
    }
}
