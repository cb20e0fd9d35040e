//! Validation of resolved mail-host addresses.
//!
//! DNS answers for MX hosts regularly contain garbage: unspecified or
//! broadcast addresses, RFC 1918 space, or addresses pointing back at this
//! machine. [`is_invalid`] decides whether an address may be dialed;
//! [`is_local`] consults a snapshot of the host's own interface addresses
//! taken once at first use.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::LazyLock;

static LOCAL_ADDRESSES: LazyLock<HashSet<IpAddr>> = LazyLock::new(collect_local_addresses);

fn collect_local_addresses() -> HashSet<IpAddr> {
    let mut set: HashSet<IpAddr> = if_addrs::get_if_addrs()
        .map(|interfaces| interfaces.iter().map(|iface| iface.ip()).collect())
        .unwrap_or_default();
    set.insert(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    set
}

/// True when `ip` is assigned to one of this host's interfaces (or is the
/// all-zeroes v4 address).
pub fn is_local(ip: &IpAddr) -> bool {
    LOCAL_ADDRESSES.contains(ip)
}

/// Checks whether `ip` may be used as a mail-host target.
///
/// Returns `None` when the address is acceptable, otherwise a human message
/// naming the rejection. Unspecified and broadcast addresses are always
/// rejected; `block_local_addresses` additionally rejects loopback and
/// private ranges and anything assigned to a local interface.
pub fn is_invalid(ip: &str, block_local_addresses: bool) -> Option<String> {
    let parsed: IpAddr = match ip.parse() {
        Ok(parsed) => parsed,
        Err(_) => return Some("Failed parsing IP address range.".to_string()),
    };
    rejection_reason(&parsed, block_local_addresses)
}

fn rejection_reason(ip: &IpAddr, block_local_addresses: bool) -> Option<String> {
    if ip.is_unspecified() {
        return Some(format!("IP address {ip} is in the unspecified range"));
    }
    if matches!(ip, IpAddr::V4(v4) if v4.is_broadcast()) {
        return Some(format!("IP address {ip} is in the broadcast range"));
    }

    if block_local_addresses {
        if ip.is_loopback() {
            return Some(format!("IP address {ip} is in the loopback range"));
        }
        if is_private(ip) {
            return Some(format!("IP address {ip} is in a private range"));
        }
        if is_local(ip) {
            return Some(format!("IP address {ip} belongs to a local interface"));
        }
    }

    None
}

fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private(),
        // fc00::/7, the unique-local block
        IpAddr::V6(v6) => (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}
