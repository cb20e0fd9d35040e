//! Target normalization: IP-literal detection and IDNA conversion.

use std::net::IpAddr;

use super::delivery::Delivery;
use crate::error::{ConnectError, ErrorCategory};

/// Decides whether the target is an IP literal or a domain and fills
/// `decoded_domain` accordingly. Domains come out in A-label (Punycode)
/// form; `is_punycode` records whether conversion changed the input.
pub(crate) fn run(delivery: &mut Delivery) -> Result<(), ConnectError> {
    let raw = delivery.domain.trim().to_string();

    let bracketed = raw.len() >= 2 && raw.starts_with('[') && raw.ends_with(']');
    let literal = if bracketed {
        let inner = &raw[1..raw.len() - 1];
        Some(strip_v6_prefix(inner))
    } else if raw.parse::<IpAddr>().is_ok() {
        Some(raw.as_str())
    } else {
        None
    };

    if let Some(literal) = literal {
        let ip: IpAddr = literal.parse().map_err(|_| {
            ConnectError::new(
                ErrorCategory::Dns,
                "EINVALIDIP",
                format!("{raw} is not a valid IP address"),
            )
        })?;
        if ip.is_ipv6() && delivery.dns.ignore_ipv6 {
            return Err(ConnectError::new(
                ErrorCategory::Dns,
                "EINVALIDIP",
                format!("IPv6 target {ip} is not usable while IPv6 is disabled"),
            ));
        }
        delivery.is_ip = true;
        delivery.decoded_domain = ip.to_string();
        return Ok(());
    }

    let ascii = idna::domain_to_ascii(&raw).map_err(|_| {
        ConnectError::new(
            ErrorCategory::Dns,
            "EBADNAME",
            format!("domain {raw} could not be converted to ASCII"),
        )
    })?;
    if ascii.is_empty() {
        return Err(ConnectError::new(
            ErrorCategory::Dns,
            "EBADNAME",
            "target domain is empty",
        ));
    }

    delivery.is_punycode = ascii != raw;
    delivery.decoded_domain = ascii;
    Ok(())
}

fn strip_v6_prefix(inner: &str) -> &str {
    let lowered = inner.get(..5).map(str::to_ascii_lowercase);
    if lowered.as_deref() == Some("ipv6:") {
        &inner[5..]
    } else {
        inner
    }
}
