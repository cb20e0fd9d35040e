use std::sync::Arc;

use async_trait::async_trait;

use super::types::Policy;
use crate::error::ConnectError;
use crate::resolver::DnsResolver;

/// Where the policy handed back by the fetcher came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// The cached policy is still valid; no write-back needed.
    Cached,
    /// A policy was fetched (or re-fetched) over HTTPS.
    Fetched,
}

/// External collaborator performing the `_mta-sts` TXT probe and the HTTPS
/// retrieval of the policy document (RFC 8461 §3.3). The pipeline supplies
/// the cached policy, if any, so the fetcher can short-circuit on an
/// unchanged policy id.
#[async_trait]
pub trait PolicyFetcher: Send + Sync {
    async fn fetch(
        &self,
        domain: &str,
        cached: Option<Policy>,
        resolver: Arc<dyn DnsResolver>,
    ) -> Result<(Policy, FetchStatus), ConnectError>;
}
