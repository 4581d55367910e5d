//! Scenario definition and execution.
//!
//! A [`Scenario`] binds one share declaration to its fixtures, credentials and
//! an ordered list of [`VerificationStep`]s. [`ScenarioRunner`] drives it
//! through the phases
//!
//! ```text
//! Uninitialized -> FixturesApplied -> WorkloadDiscovered -> WorkloadReady -> Verified -> TornDown
//!        \_______________\____________________\___________________\___> Failed ______/
//! ```
//!
//! Setup and wait failures stop the scenario; step failures are recorded and
//! the remaining steps still run. Teardown always runs and its failures are
//! reported next to, never instead of, earlier ones.
//!
//! Topology variants do not change this machine. They append steps (see
//! [`crate::topology`]) which run inside the verification phase.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use k8s_openapi::api::core::v1::Pod;
use tokio::time::Instant;
use tracing::{info, info_span, warn, Instrument};

use crate::access::{access_check_name, verify_endpoint, Credential, ShareClient, ShareTarget};
use crate::cluster::{ClusterQuery, ShareIdentity};
use crate::config::HarnessConfig;
use crate::endpoint::{self, EndpointKind};
use crate::events::{verify_events, ExpectedEvents, EVENTS_CHECK};
use crate::fixture::{Fixture, FixtureClient, FixtureLifecycle};
use crate::poll::{pod_exists, pod_ready, wait_for};
use crate::report::{run_check, CheckResult, ScenarioReport};
use crate::{Error, Result};

/// Check names for the fixed phases
pub mod checks {
    /// Fixture setup
    pub const FIXTURES: &str = "fixtures";
    /// Workload pod appeared
    pub const POD_EXISTS: &str = "pod-exists";
    /// Workload pod became ready
    pub const POD_READY: &str = "pod-ready";
    /// Readiness re-checked as a verification step
    pub const PODS_READY: &str = "pods-ready";
    /// Fixture removal
    pub const TEARDOWN: &str = "teardown";
}

/// Lifecycle phase of a scenario run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioPhase {
    /// Nothing applied yet
    Uninitialized,
    /// Every fixture ensured
    FixturesApplied,
    /// Workload pod exists
    WorkloadDiscovered,
    /// Workload pod ready
    WorkloadReady,
    /// Every verification step passed
    Verified,
    /// Fixtures removed
    TornDown,
    /// Setup, wait or verification failed
    Failed,
}

impl ScenarioPhase {
    /// Whether the machine may move from `self` to `next`
    pub fn can_transition(self, next: ScenarioPhase) -> bool {
        use ScenarioPhase::*;
        match (self, next) {
            (TornDown, _) => false,
            (_, TornDown) => true,
            (Failed, _) => false,
            (_, Failed) => true,
            (Uninitialized, FixturesApplied)
            | (FixturesApplied, WorkloadDiscovered)
            | (WorkloadDiscovered, WorkloadReady)
            | (WorkloadReady, Verified) => true,
            _ => false,
        }
    }
}

/// What a verification step sees
#[derive(Clone)]
pub struct StepContext {
    /// Harness configuration
    pub config: Arc<HarnessConfig>,
    /// Cluster queries
    pub query: Arc<dyn ClusterQuery>,
    /// Share protocol client
    pub shares: Arc<dyn ShareClient>,
    /// Resource under test
    pub share: ShareIdentity,
    /// SMB share name
    pub share_name: String,
    /// Credentials to validate
    pub credentials: Arc<[Credential]>,
}

impl StepContext {
    /// Label selector for the share's workload
    pub fn selector(&self) -> String {
        self.config.service_selector(&self.share.name)
    }

    /// First pod of the share's workload
    pub async fn workload_pod(&self) -> Result<Pod> {
        let selector = self.selector();
        self.query
            .list_pods(&self.config.namespace, &selector)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::verification(
                    "workload",
                    format!("no pod matches {} in {}", selector, self.config.namespace),
                )
            })
    }
}

/// Future returned by a step
pub type StepFuture = BoxFuture<'static, Vec<CheckResult>>;

type StepFn = Arc<dyn Fn(StepContext) -> StepFuture + Send + Sync>;

/// A named verification step producing one or more check results
#[derive(Clone)]
pub struct VerificationStep {
    name: String,
    run: StepFn,
}

impl std::fmt::Debug for VerificationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationStep")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl VerificationStep {
    /// Step producing any number of check results
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<CheckResult>> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(move |ctx| f(ctx).boxed()),
        }
    }

    /// Step producing a single check named after the step
    pub fn check<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let check_name = name.clone();
        Self::new(name, move |ctx| {
            let check = run_check(check_name.clone(), f(ctx));
            async move { vec![check.await] }
        })
    }

    /// Step name
    pub fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: StepContext) -> Vec<CheckResult> {
        let start = Instant::now();
        match AssertUnwindSafe((self.run)(ctx)).catch_unwind().await {
            Ok(results) => results,
            Err(_) => vec![CheckResult::from_result(
                self.name.clone(),
                start.elapsed(),
                Err(Error::verification(&self.name, "step panicked")),
            )],
        }
    }
}

/// Re-check workload readiness inside the verification phase
pub fn pods_ready_step() -> VerificationStep {
    VerificationStep::check(checks::PODS_READY, |ctx: StepContext| async move {
        let selector = ctx.selector();
        wait_for(
            "share pod ready",
            ctx.config.ready_timeout,
            ctx.config.poll_interval,
            || pod_ready(ctx.query.as_ref(), &ctx.config.namespace, &selector),
        )
        .await
    })
}

/// Access the share through `kind` with every credential
pub fn access_step(kind: EndpointKind) -> VerificationStep {
    VerificationStep::new(format!("access-by-{}", kind), move |ctx: StepContext| async move {
        if kind == EndpointKind::ExternalName && !ctx.config.dns_settle_delay.is_zero() {
            // External names are registered by a side-car and can lag behind pod readiness.
            tokio::time::sleep(ctx.config.dns_settle_delay).await;
        }
        let host =
            match endpoint::resolve(kind, &ctx.share, &ctx.config, ctx.query.as_ref()).await {
                Ok(host) => host,
                Err(e) => {
                    warn!(endpoint = %kind, error = %e, "endpoint did not resolve");
                    return ctx
                        .credentials
                        .iter()
                        .map(|c| {
                            let name = access_check_name(kind, c);
                            let err = Error::verification(&name, e.to_string());
                            CheckResult::from_result(name, Duration::ZERO, Err(err))
                        })
                        .collect();
                }
            };
        let target = ShareTarget::new(host, ctx.share_name.clone());
        verify_endpoint(
            ctx.shares.as_ref(),
            kind,
            &target,
            &ctx.credentials,
            ctx.config.access_timeout,
        )
        .await
    })
}

/// Verify the share's event trail against `expected`
pub fn events_step(expected: ExpectedEvents) -> VerificationStep {
    VerificationStep::check(EVENTS_CHECK, move |ctx: StepContext| {
        let expected = expected.clone();
        async move {
            verify_events(ctx.query.as_ref(), &ctx.config, &ctx.share, &expected)
                .await
                .map(|_| ())
        }
    })
}

/// One end-to-end test case bound to one share declaration
#[derive(Debug, Clone)]
pub struct Scenario {
    /// Registry name
    pub name: String,
    /// Fixtures in apply order; the share declaration comes last
    pub fixtures: Vec<Fixture>,
    /// Resource under test
    pub share: ShareIdentity,
    /// SMB share name clients connect to
    pub share_name: String,
    /// Credentials validated independently
    pub credentials: Vec<Credential>,
    steps: Vec<VerificationStep>,
}

impl Scenario {
    /// Scenario with the base verification steps: readiness, access by
    /// address and by service name, and the default event expectations
    pub fn new(
        name: impl Into<String>,
        share: ShareIdentity,
        share_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            fixtures: Vec::new(),
            share,
            share_name: share_name.into(),
            credentials: Vec::new(),
            steps: vec![
                pods_ready_step(),
                access_step(EndpointKind::Address),
                access_step(EndpointKind::ServiceName),
                events_step(ExpectedEvents::default()),
            ],
        }
    }

    /// Append a fixture
    pub fn fixture(mut self, fixture: Fixture) -> Self {
        self.fixtures.push(fixture);
        self
    }

    /// Append a credential
    pub fn credential(mut self, credential: Credential) -> Self {
        self.credentials.push(credential);
        self
    }

    /// Append verification steps after the existing ones
    pub fn with_steps(mut self, steps: impl IntoIterator<Item = VerificationStep>) -> Self {
        self.steps.extend(steps);
        self
    }

    /// Replace every step; for scenarios that need a narrower check set
    pub fn with_only_steps(mut self, steps: impl IntoIterator<Item = VerificationStep>) -> Self {
        self.steps = steps.into_iter().collect();
        self
    }

    /// Verification steps in run order
    pub fn steps(&self) -> &[VerificationStep] {
        &self.steps
    }
}

/// Runs scenarios against a set of collaborators
#[derive(Clone)]
pub struct ScenarioRunner {
    config: Arc<HarnessConfig>,
    query: Arc<dyn ClusterQuery>,
    fixtures: Arc<dyn FixtureClient>,
    shares: Arc<dyn ShareClient>,
}

impl ScenarioRunner {
    /// Create a runner
    pub fn new(
        config: Arc<HarnessConfig>,
        query: Arc<dyn ClusterQuery>,
        fixtures: Arc<dyn FixtureClient>,
        shares: Arc<dyn ShareClient>,
    ) -> Self {
        Self {
            config,
            query,
            fixtures,
            shares,
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run one scenario to completion, teardown included
    pub async fn run(&self, scenario: &Scenario) -> ScenarioReport {
        let span = info_span!("scenario", name = %scenario.name, share = %scenario.share);
        async {
            let mut report = ScenarioReport::new(&scenario.name);
            let mut lifecycle = FixtureLifecycle::new(self.fixtures.clone());

            self.drive(scenario, &mut lifecycle, &mut report).await;

            let start = Instant::now();
            let errors = lifecycle.teardown().await;
            if errors.is_empty() {
                report
                    .checks
                    .push(CheckResult::from_result(checks::TEARDOWN, start.elapsed(), Ok(())));
            }
            for err in errors {
                report
                    .checks
                    .push(CheckResult::from_result(checks::TEARDOWN, start.elapsed(), Err(err)));
            }
            enter(&mut report, ScenarioPhase::TornDown);
            info!(status = ?report.status(), "scenario finished");
            report
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        scenario: &Scenario,
        lifecycle: &mut FixtureLifecycle,
        report: &mut ScenarioReport,
    ) {
        let setup = run_check(checks::FIXTURES, lifecycle.apply_all(&scenario.fixtures)).await;
        if !record(report, setup) {
            return;
        }
        enter(report, ScenarioPhase::FixturesApplied);

        let namespace = self.config.namespace.as_str();
        let selector = self.config.service_selector(&scenario.share.name);
        let query = self.query.as_ref();

        let exists = run_check(
            checks::POD_EXISTS,
            wait_for(
                "share pod exists",
                self.config.exist_timeout,
                self.config.poll_interval,
                || pod_exists(query, namespace, &selector),
            ),
        )
        .await;
        if !record(report, exists) {
            return;
        }
        enter(report, ScenarioPhase::WorkloadDiscovered);

        let ready = run_check(
            checks::POD_READY,
            wait_for(
                "share pod ready",
                self.config.ready_timeout,
                self.config.poll_interval,
                || pod_ready(query, namespace, &selector),
            ),
        )
        .await;
        if !record(report, ready) {
            return;
        }
        enter(report, ScenarioPhase::WorkloadReady);

        let ctx = StepContext {
            config: self.config.clone(),
            query: self.query.clone(),
            shares: self.shares.clone(),
            share: scenario.share.clone(),
            share_name: scenario.share_name.clone(),
            credentials: scenario.credentials.clone().into(),
        };
        let mut all_passed = true;
        for step in scenario.steps() {
            info!(step = step.name(), "running verification step");
            for result in step.execute(ctx.clone()).await {
                all_passed &= result.passed;
                report.checks.push(result);
            }
        }
        enter(
            report,
            if all_passed {
                ScenarioPhase::Verified
            } else {
                ScenarioPhase::Failed
            },
        );
    }
}

/// Push a check result; on failure move to `Failed` and return false
fn record(report: &mut ScenarioReport, result: CheckResult) -> bool {
    let passed = result.passed;
    report.checks.push(result);
    if !passed {
        enter(report, ScenarioPhase::Failed);
    }
    passed
}

fn enter(report: &mut ScenarioReport, next: ScenarioPhase) {
    let current = report.final_phase();
    if !current.can_transition(next) {
        warn!(from = ?current, to = ?next, "ignoring invalid phase transition");
        return;
    }
    info!(from = ?current, to = ?next, "scenario phase");
    report.phases.push(next);
}
