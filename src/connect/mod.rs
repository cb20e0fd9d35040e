//! The resolution-and-connection pipeline.
//!
//! [`connect`] is the public entry point: it normalizes the target, resolves
//! MX hosts and their addresses, applies MTA-STS and DANE material, and
//! dials candidates in priority order until one accepts. The stages run
//! strictly sequentially over one [`Delivery`] value; stages made redundant
//! by caller-supplied data are elided up front.

mod delivery;
mod engine;
mod format;
mod ip;
mod mx;
mod options;

pub use delivery::{AsyncStream, BoxedStream, Connection, Delivery, DnsSettings, MxEntry};
pub use options::{
    connect_hook, ConnectErrorNotifier, ConnectHook, ConnectOptions, DaneOptions, DnsOptions,
    LocalBind, MtaStsOptions, MxHint, TcpConnectContext,
};


use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{ConnectError, ErrorCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Format,
    PolicyFetch,
    ResolveMx,
    PolicyValidate,
    ResolveIp,
    ResolveTlsa,
    Connect,
}

/// Builds the stage list for a delivery. Always starts with the formatter
/// and ends with the connector; everything between depends on what the
/// caller pre-supplied and which policies are enabled.
fn plan(delivery: &Delivery) -> Vec<Stage> {
    let mut stages = vec![Stage::Format];

    let policy = delivery.mta_sts.enabled && delivery.mta_sts.fetcher.is_some();
    if policy {
        stages.push(Stage::PolicyFetch);
    }

    let need_mx = delivery.mx.is_empty();
    if need_mx {
        stages.push(Stage::ResolveMx);
    }
    if policy {
        stages.push(Stage::PolicyValidate);
    }
    if need_mx || delivery.mx.iter().any(|entry| !entry.has_addresses()) {
        stages.push(Stage::ResolveIp);
    }
    if delivery.dane.enabled {
        stages.push(Stage::ResolveTlsa);
    }

    stages.push(Stage::Connect);
    stages
}

/// Resolves the target and returns an established connection to one of its
/// mail hosts, or the error that stopped the attempt.
///
/// Accepts a bare target string (`"example.com"`, `"user@example.com"`,
/// `"[192.0.2.1]"`) or a full [`ConnectOptions`].
pub async fn connect(options: impl Into<ConnectOptions>) -> Result<Connection, ConnectError> {
    let mut delivery = Delivery::from_options(options.into())?;
    run_pipeline(&mut delivery).await
}

async fn run_pipeline(delivery: &mut Delivery) -> Result<Connection, ConnectError> {
    if delivery.mta_sts.enabled && delivery.mta_sts.fetcher.is_none() {
        tracing::warn!(
            action = "mta-sts",
            "MTA-STS is enabled but no policy fetcher is configured; policy stages are skipped"
        );
    }

    let cancel = delivery.cancel.clone();
    for stage in plan(delivery) {
        if cancel.is_cancelled() {
            return Err(ConnectError::cancelled());
        }
        match stage {
            Stage::Format => format::run(delivery)?,
            Stage::PolicyFetch => {
                with_cancel(&cancel, crate::mta_sts::fetch_policy(delivery)).await?
            }
            Stage::ResolveMx => with_cancel(&cancel, mx::resolve(delivery)).await?,
            Stage::PolicyValidate => crate::mta_sts::validate_entries(delivery),
            Stage::ResolveIp => with_cancel(&cancel, ip::resolve(delivery)).await?,
            Stage::ResolveTlsa => with_cancel(&cancel, crate::dane::resolve_tlsa(delivery)).await?,
            Stage::Connect => return engine::run(delivery).await,
        }
    }

    Err(ConnectError::new(
        ErrorCategory::Network,
        "ECONNECTION",
        "connection pipeline ended without a connect stage",
    ))
}

async fn with_cancel<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, ConnectError>>,
) -> Result<T, ConnectError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ConnectError::cancelled()),
        outcome = fut => outcome,
    }
}
