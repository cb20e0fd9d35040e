use std::net::IpAddr;
use std::time::Duration;

use clap::Parser;
use mxconnect_lib::{ConnectOptions, DaneOptions, DnsOptions};

/// Resolve a target's MX hosts and dial the preferred one, reporting the
/// chosen host and its verification material. The connection is closed
/// again immediately; no SMTP dialogue takes place.
#[derive(Parser)]
#[command(name = "mxconnect-cli")]
pub struct Cli {
    /// domain, email address, or IP literal
    pub target: String,

    /// destination port
    #[arg(long, default_value_t = 25)]
    pub port: u16,

    /// per-host connect timeout (milliseconds)
    #[arg(long = "timeout", default_value_t = 30_000)]
    pub timeout_ms: u64,

    /// skip AAAA resolution and refuse IPv6 targets
    #[arg(long = "ignore-ipv6")]
    pub ignore_ipv6: bool,

    /// try IPv6 candidates before IPv4 within the same priority
    #[arg(long = "prefer-ipv6")]
    pub prefer_ipv6: bool,

    /// refuse loopback, private, and interface-local MX addresses
    #[arg(long = "block-local")]
    pub block_local: bool,

    /// resolve TLSA records for the candidates (DANE)
    #[arg(long)]
    pub dane: bool,

    /// keep dialing hosts whose TLSA lookup failed
    #[arg(long = "no-dane-verify")]
    pub no_dane_verify: bool,

    /// candidate IP that must not be dialed (repeatable)
    #[arg(long = "ignore-host")]
    pub ignore_hosts: Vec<IpAddr>,

    /// format: human|json
    #[arg(long, default_value = "human")]
    pub format: String,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn options(&self) -> ConnectOptions {
        let mut options = ConnectOptions::new(&self.target);
        options.port = self.port;
        options.max_connect_time = Duration::from_millis(self.timeout_ms.max(1));
        options.dns = DnsOptions {
            ignore_ipv6: self.ignore_ipv6,
            prefer_ipv6: self.prefer_ipv6,
            block_local_addresses: self.block_local,
            resolver: None,
        };
        options.ignore_mx_hosts = self.ignore_hosts.clone();
        options.dane = DaneOptions {
            enabled: self.dane,
            verify: !self.no_dane_verify,
            resolver: None,
        };
        options
    }
}
