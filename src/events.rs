//! Event verification for the resource under test.
//!
//! The operator records an event each time it creates a dependent resource.
//! A correct reconcile creates each dependent once, no matter how many times
//! the harness polled, so the expected counts are exact.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::cluster::{event_field_selector, ClusterQuery, ResourceRef, ShareIdentity};
use crate::config::HarnessConfig;
use crate::{Error, Result};

/// Check name used in reports
pub const EVENTS_CHECK: &str = "events";

/// Reason codes recorded by the share operator
pub mod reasons {
    /// Storage claim for the share was created
    pub const CREATED_PERSISTENT_VOLUME_CLAIM: &str = "CreatedPersistentVolumeClaim";
    /// Server workload for the share was created
    pub const CREATED_DEPLOYMENT: &str = "CreatedDeployment";
}

/// Expected count per reason code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedEvents {
    counts: BTreeMap<String, usize>,
}

impl Default for ExpectedEvents {
    /// One storage claim and one deployment
    fn default() -> Self {
        Self::none()
            .expect(reasons::CREATED_PERSISTENT_VOLUME_CLAIM, 1)
            .expect(reasons::CREATED_DEPLOYMENT, 1)
    }
}

impl ExpectedEvents {
    /// Empty table; only the at-least-one-event rule applies
    pub fn none() -> Self {
        Self {
            counts: BTreeMap::new(),
        }
    }

    /// Expect exactly `count` events with `reason`
    pub fn expect(mut self, reason: impl Into<String>, count: usize) -> Self {
        self.counts.insert(reason.into(), count);
        self
    }

    /// Iterate (reason, expected count)
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.counts.iter().map(|(r, c)| (r.as_str(), *c))
    }

    /// Compare observed tallies; every mismatch is listed in one error
    pub fn compare(&self, observed: &BTreeMap<String, usize>) -> Result<()> {
        let mismatches: Vec<String> = self
            .iter()
            .filter_map(|(reason, want)| {
                let got = observed.get(reason).copied().unwrap_or(0);
                (got != want).then(|| format!("want {} {} event(s), got {}", want, reason, got))
            })
            .collect();
        if mismatches.is_empty() {
            Ok(())
        } else {
            Err(Error::verification(EVENTS_CHECK, mismatches.join("; ")))
        }
    }
}

/// Count events by reason
pub fn tally_reasons<'a, I>(reasons: I) -> BTreeMap<String, usize>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut tally = BTreeMap::new();
    for reason in reasons.into_iter().flatten() {
        *tally.entry(reason.to_string()).or_insert(0) += 1;
    }
    tally
}

/// Verify the event trail of `share` against `expected`.
///
/// Returns the observed tally on success.
pub async fn verify_events<Q>(
    query: &Q,
    config: &HarnessConfig,
    share: &ShareIdentity,
    expected: &ExpectedEvents,
) -> Result<BTreeMap<String, usize>>
where
    Q: ClusterQuery + ?Sized,
{
    let identity = query
        .resource_identity(&ResourceRef {
            api_version: config.share_api_version.clone(),
            kind: config.share_kind.clone(),
            namespace: share.namespace.clone(),
            name: share.name.clone(),
        })
        .await?;
    let selector = event_field_selector(&identity);
    let events = query.list_events(&share.namespace, &selector).await?;
    debug!(share = %share, uid = %identity.uid, count = events.len(), "fetched share events");

    if events.is_empty() {
        return Err(Error::verification(
            EVENTS_CHECK,
            format!("no events recorded for {} {}", identity.kind, share),
        ));
    }

    let tally = tally_reasons(events.iter().map(|e| e.reason.as_deref()));
    expected.compare(&tally)?;
    info!(share = %share, ?tally, "event counts match");
    Ok(tally)
}
