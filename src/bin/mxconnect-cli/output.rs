use anyhow::{bail, Result};
use mxconnect_lib::Connection;

#[cfg_attr(feature = "with-serde", derive(serde::Serialize))]
pub struct ConnectionReport {
    pub hostname: String,
    pub host: String,
    pub port: u16,
    pub local_address: Option<String>,
    pub local_port: Option<u16>,
    pub dane_enabled: bool,
    pub require_tls: bool,
    pub tlsa_records: usize,
    pub policy_valid: Option<bool>,
    pub policy_mode: Option<String>,
}

impl ConnectionReport {
    pub fn from_connection(connection: &Connection) -> Self {
        Self {
            hostname: connection.hostname.clone(),
            host: connection.host.to_string(),
            port: connection.port,
            local_address: connection.local_address.map(|addr| addr.to_string()),
            local_port: connection.local_port,
            dane_enabled: connection.dane_enabled,
            require_tls: connection.require_tls,
            tlsa_records: connection
                .tlsa_records
                .as_ref()
                .map(Vec::len)
                .unwrap_or_default(),
            policy_valid: connection.policy_match.map(|verdict| verdict.valid),
            policy_mode: connection
                .policy_match
                .map(|verdict| verdict.mode.as_str().to_string()),
        }
    }

    pub fn human_summary(&self) -> String {
        let mut lines = vec![
            format!("connected to {} ({}:{})", self.hostname, self.host, self.port),
        ];
        if let Some(local) = &self.local_address {
            let port = self
                .local_port
                .map(|port| format!(":{port}"))
                .unwrap_or_default();
            lines.push(format!("local address {local}{port}"));
        }
        if let Some(mode) = &self.policy_mode {
            let verdict = match self.policy_valid {
                Some(true) => "valid",
                _ => "invalid",
            };
            lines.push(format!("mta-sts: {verdict} (mode {mode})"));
        }
        if self.dane_enabled {
            if self.tlsa_records > 0 {
                lines.push(format!(
                    "dane: {} TLSA record(s), TLS required",
                    self.tlsa_records
                ));
            } else {
                lines.push("dane: no TLSA records published".to_string());
            }
        }
        lines.join("\n")
    }
}

pub fn render(report: &ConnectionReport, format: &str) -> Result<String> {
    match format {
        "human" => Ok(report.human_summary()),
        #[cfg(feature = "with-serde")]
        "json" => Ok(serde_json::to_string_pretty(report)?),
        #[cfg(not(feature = "with-serde"))]
        "json" => bail!("JSON output requires the `with-serde` feature"),
        other => bail!("unknown --format '{other}'"),
    }
}
