//! MTA-STS policy handling (RFC 8461).
//!
//! The pipeline consults a caller-supplied [`PolicyCache`], asks the external
//! [`PolicyFetcher`] for the current policy, and marks every MX entry with a
//! [`PolicyMatch`] verdict. Enforcement happens later, in the connection
//! engine, so that `testing`-mode mismatches are observable without being
//! fatal.

mod cache;
mod fetch;
mod types;

pub use cache::{MemoryPolicyCache, PolicyCache};
pub use fetch::{FetchStatus, PolicyFetcher};
pub use types::{evaluate, Policy, PolicyMatch, PolicyMode};

use crate::connect::Delivery;
use crate::error::ConnectError;

/// Fetch stage: cache consultation, external fetch, write-back.
///
/// A fetch failure is fatal to the whole attempt: without the policy the
/// domain's delivery posture cannot be determined.
pub(crate) async fn fetch_policy(delivery: &mut Delivery) -> Result<(), ConnectError> {
    let Some(fetcher) = delivery.mta_sts.fetcher.clone() else {
        return Ok(());
    };

    let domain = delivery.decoded_domain.clone();
    let cached = delivery
        .mta_sts
        .cache
        .as_ref()
        .and_then(|cache| cache.get(&domain));
    let had_cached = cached.is_some();

    let resolver = delivery.resolver.clone();
    let outcome = fetcher.fetch(&domain, cached, resolver).await;
    match outcome {
        Ok((policy, status)) => {
            if status != FetchStatus::Cached {
                if let Some(cache) = &delivery.mta_sts.cache {
                    cache.set(&domain, policy.clone());
                }
            }
            tracing::debug!(
                action = "mta-sts",
                domain = %domain,
                mode = policy.mode.as_str(),
                cached = had_cached,
                success = true,
                "resolved MTA-STS policy"
            );
            delivery.mta_sts.policy = Some(policy);
            Ok(())
        }
        Err(err) => {
            tracing::warn!(
                action = "mta-sts",
                domain = %domain,
                success = false,
                "failed to resolve MTA-STS policy: {err}"
            );
            Err(err)
        }
    }
}

/// Validation stage: compute a verdict per MX entry. No entry is dropped
/// here.
pub(crate) fn validate_entries(delivery: &mut Delivery) {
    let Some(policy) = delivery.mta_sts.policy.clone() else {
        return;
    };
    for entry in &mut delivery.mx {
        let verdict = evaluate(&entry.exchange, &policy);
        tracing::trace!(
            action = "mta-sts",
            exchange = %entry.exchange,
            valid = verdict.valid,
            testing = verdict.testing,
            "validated MX host against policy"
        );
        entry.policy_match = Some(verdict);
    }
}
