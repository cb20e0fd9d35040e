use std::io;

use thiserror::Error;

use crate::resolver::DnsError;

/// Broad classification of a connection failure, used by callers to decide
/// between bouncing, deferring, and alerting.
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "with-serde", serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Resolution failures: missing records, invalid IPs, unusable targets.
    Dns,
    /// Transport failures: refused, unreachable, timed out, no candidates left.
    Network,
    /// MTA-STS enforcement rejected every usable host.
    Policy,
    /// TLSA lookup or certificate association failures.
    Dane,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dns => "dns",
            Self::Network => "network",
            Self::Policy => "policy",
            Self::Dane => "dane",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure surfaced by [`connect`](crate::connect::connect).
///
/// `code` is a short machine token (`ENOTFOUND`, `ECONNREFUSED`,
/// `DANE_VERIFICATION_FAILED`, ...), `response` a human-facing one-liner, and
/// `temporary` signals that retrying the same call later may succeed.
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ConnectError {
    pub message: String,
    pub code: String,
    pub category: ErrorCategory,
    pub response: Option<String>,
    pub temporary: bool,
}

impl ConnectError {
    pub fn new(
        category: ErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let code = code.into();
        let response = describe_code(&code).map(str::to_string);
        Self {
            message: message.into(),
            code,
            category,
            response,
            temporary: false,
        }
    }

    pub fn temporary(mut self) -> Self {
        self.temporary = true;
        self
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    /// Wraps a resolver failure. Codes other than `ENOTFOUND`/`ENODATA`
    /// (SERVFAIL, REFUSED, timeouts, ...) are marked temporary: the answer
    /// may well differ on a later attempt.
    pub fn from_dns(err: &DnsError, context: &str) -> Self {
        let mut out = Self::new(
            ErrorCategory::Dns,
            err.code.as_str(),
            format!("{context}: {err}"),
        );
        out.temporary = !err.code.is_recoverable();
        out
    }

    /// Wraps a socket-level failure from a connection attempt.
    pub fn from_io(err: &io::Error, host: &str, port: u16) -> Self {
        let code = socket_code(err);
        Self::new(
            ErrorCategory::Network,
            code,
            format!("connection to {host}:{port} failed: {err}"),
        )
        .temporary()
    }

    /// The single error produced when the caller's cancellation signal fires.
    pub fn cancelled() -> Self {
        Self::new(
            ErrorCategory::Network,
            "ECANCELLED",
            "connection attempt was cancelled by the caller",
        )
        .temporary()
    }
}

/// Maps a socket error to a short machine token.
fn socket_code(err: &io::Error) -> &'static str {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => "ECONNREFUSED",
        io::ErrorKind::ConnectionReset => "ECONNRESET",
        io::ErrorKind::ConnectionAborted => "ECONNABORTED",
        io::ErrorKind::TimedOut => "ETIMEDOUT",
        io::ErrorKind::AddrNotAvailable => "EADDRNOTAVAIL",
        io::ErrorKind::PermissionDenied => "EACCES",
        _ => match err.raw_os_error() {
            Some(101) => "ENETUNREACH",
            Some(113) => "EHOSTUNREACH",
            _ => "ECONNECTION",
        },
    }
}

/// One-line human rendering for the known DNS and socket code tokens.
pub fn describe_code(code: &str) -> Option<&'static str> {
    let text = match code {
        // libc-style DNS codes
        "ENODATA" => "DNS response contained no usable records",
        "ENOTFOUND" => "Requested DNS records were not found",
        "ESERVFAIL" => "DNS server failed to complete the request",
        "EREFUSED" => "DNS server refused the query",
        "ETIMEOUT" => "DNS request timed out",
        "EDNSFAIL" => "DNS lookup failed",
        "EBADNAME" => "Hostname could not be converted to a resolvable name",
        "EINVALIDIP" => "Address is not a valid or permitted IP address",
        // socket codes
        "ECONNREFUSED" => "Remote host refused the connection",
        "ECONNRESET" => "Connection was reset by the remote host",
        "ECONNABORTED" => "Connection was aborted",
        "ETIMEDOUT" => "Connection attempt timed out",
        "EHOSTUNREACH" => "Remote host is unreachable",
        "ENETUNREACH" => "Network is unreachable",
        "EADDRNOTAVAIL" => "Local address is not available for binding",
        "EACCES" => "Operating system denied the connection attempt",
        "ECANCELLED" => "Operation was cancelled",
        "ECONNECTION" => "Connection attempt failed",
        _ => return None,
    };
    Some(text)
}
