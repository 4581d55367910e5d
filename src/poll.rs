//! Bounded-time condition polling.
//!
//! [`wait_for`] evaluates a probe on a constant interval until it reports
//! [`Probe::Satisfied`] or the deadline passes. Reconciliation latency of the
//! operator is small and bounded, so there is no backoff. A probe that hangs
//! is cut off at `deadline + interval`, which is also the latest point a
//! timeout is returned.
//!
//! The pod predicates used by scenarios live here too: [`pod_exists`] and
//! [`pod_ready`].

use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::cluster::ClusterQuery;
use crate::{Error, Result};

/// Pod condition status meaning the condition holds
pub const STATUS_TRUE: &str = "True";

/// Outcome of one probe evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// Condition holds
    Satisfied,
    /// Condition does not hold yet; carries what was observed
    Pending(String),
}

impl Probe {
    /// Pending with a formatted observation
    pub fn pending(observed: impl Into<String>) -> Self {
        Probe::Pending(observed.into())
    }
}

/// Poll `probe` every `interval` until it is satisfied or `timeout` elapses.
///
/// A probe error does not abort the wait: cluster queries fail transiently
/// while the operator is reconciling, so the error text becomes the last
/// observed state and polling continues.
pub async fn wait_for<F, Fut>(
    description: &str,
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe>>,
{
    let start = Instant::now();
    let deadline = start + timeout;
    let hard_stop = deadline + interval;
    let mut evaluations = 0u32;

    loop {
        evaluations += 1;
        let last_observed = match tokio::time::timeout_at(hard_stop, probe()).await {
            Ok(Ok(Probe::Satisfied)) => {
                debug!(
                    description,
                    evaluations,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "condition satisfied"
                );
                return Ok(());
            }
            Ok(Ok(Probe::Pending(observed))) => {
                trace!(description, %observed, "condition not yet met");
                observed
            }
            Ok(Err(e)) => {
                trace!(description, error = %e, "probe failed, retrying");
                format!("query error: {}", e)
            }
            Err(_) => "probe did not complete".to_string(),
        };

        let now = Instant::now();
        if now >= deadline {
            warn!(description, ?timeout, %last_observed, evaluations, "condition wait timed out");
            return Err(Error::timeout(description, timeout, last_observed));
        }
        tokio::time::sleep_until((now + interval).min(deadline)).await;
    }
}

/// Satisfied once at least one pod matches `selector` in `namespace`
pub async fn pod_exists<Q>(query: &Q, namespace: &str, selector: &str) -> Result<Probe>
where
    Q: ClusterQuery + ?Sized,
{
    let pods = query.list_pods(namespace, selector).await?;
    if pods.is_empty() {
        Ok(Probe::pending(format!("no pods match {}", selector)))
    } else {
        Ok(Probe::Satisfied)
    }
}

/// Satisfied once a pod matching `selector` reports every condition `True`
pub async fn pod_ready<Q>(query: &Q, namespace: &str, selector: &str) -> Result<Probe>
where
    Q: ClusterQuery + ?Sized,
{
    let pods = query.list_pods(namespace, selector).await?;
    let Some(pod) = pods.first() else {
        return Ok(Probe::pending(format!("no pods match {}", selector)));
    };
    if is_pod_ready(pod) {
        Ok(Probe::Satisfied)
    } else {
        Ok(Probe::Pending(describe_pod_conditions(pod)))
    }
}

/// Every reported pod condition is `True`, and at least one is reported
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| !conds.is_empty() && conds.iter().all(|c| c.status == STATUS_TRUE))
        .unwrap_or(false)
}

fn describe_pod_conditions(pod: &Pod) -> String {
    let name = pod.metadata.name.as_deref().unwrap_or("<unnamed>");
    let status = pod.status.as_ref();
    let phase = status
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown");
    let conditions = status
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .map(|c| format!("{}={}", c.type_, c.status))
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default();
    format!("pod {} phase {} conditions [{}]", name, phase, conditions)
}
