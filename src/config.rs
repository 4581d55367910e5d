//! Harness configuration threaded into every scenario.
//!
//! Nothing in the harness reads ambient state: the namespace, fixture
//! directory, naming convention and every deadline come from a
//! [`HarnessConfig`] built once (defaults, then environment, then CLI flags)
//! and shared behind an `Arc`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fixture::Fixture;

/// Namespace the operator runs share workloads in
pub const DEFAULT_NAMESPACE: &str = "samba-operator-system";
/// Directory holding the fixture YAML files
pub const DEFAULT_FIXTURES_DIR: &str = "tests/files";
/// Kubernetes cluster DNS domain
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";
/// DNS suffix the domain-member topology registers names under
pub const DEFAULT_EXTERNAL_DOMAIN_SUFFIX: &str = "domain1.sink.test";
/// Label key the operator puts on every pod and service of a share
pub const DEFAULT_SERVICE_LABEL_KEY: &str = "samba-operator.samba.org/service";
/// apiVersion of the share declaration
pub const DEFAULT_SHARE_API_VERSION: &str = "samba-operator.samba.org/v1alpha1";
/// Kind of the share declaration
pub const DEFAULT_SHARE_KIND: &str = "SmbShare";

/// Deadline for the share workload pod to appear
pub const DEFAULT_EXIST_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for the share workload pod to become ready
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(60);
/// Interval between predicate evaluations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Pause before the first external-name access attempt
pub const DEFAULT_DNS_SETTLE_DELAY: Duration = Duration::from_millis(400);
/// Upper bound for a single share access round trip
pub const DEFAULT_ACCESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration shared by every scenario in a run
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Namespace share workloads (pods, services) live in
    pub namespace: String,
    /// Directory fixture file names are resolved against
    pub fixtures_dir: PathBuf,
    /// Cluster DNS domain used for in-cluster service names
    pub cluster_domain: String,
    /// Suffix used for externally registered names
    pub external_domain_suffix: String,
    /// Label key selecting a share's pods and services
    pub service_label_key: String,
    /// apiVersion of the resource under test
    pub share_api_version: String,
    /// Kind of the resource under test
    pub share_kind: String,
    /// Deadline for workload existence
    pub exist_timeout: Duration,
    /// Deadline for workload readiness
    pub ready_timeout: Duration,
    /// Poll interval for both waits
    pub poll_interval: Duration,
    /// Fixed delay before resolving external names
    pub dns_settle_delay: Duration,
    /// Timeout for one access round trip
    pub access_timeout: Duration,
    /// Explicit kubeconfig; `None` infers in-cluster or `~/.kube/config`
    pub kubeconfig: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            fixtures_dir: PathBuf::from(DEFAULT_FIXTURES_DIR),
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
            external_domain_suffix: DEFAULT_EXTERNAL_DOMAIN_SUFFIX.to_string(),
            service_label_key: DEFAULT_SERVICE_LABEL_KEY.to_string(),
            share_api_version: DEFAULT_SHARE_API_VERSION.to_string(),
            share_kind: DEFAULT_SHARE_KIND.to_string(),
            exist_timeout: DEFAULT_EXIST_TIMEOUT,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            dns_settle_delay: DEFAULT_DNS_SETTLE_DELAY,
            access_timeout: DEFAULT_ACCESS_TIMEOUT,
            kubeconfig: None,
        }
    }
}

impl HarnessConfig {
    /// Set the workload namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the fixture directory
    pub fn with_fixtures_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fixtures_dir = dir.into();
        self
    }

    /// Set both poll deadlines and the interval
    pub fn with_timeouts(mut self, exist: Duration, ready: Duration, interval: Duration) -> Self {
        self.exist_timeout = exist;
        self.ready_timeout = ready;
        self.poll_interval = interval;
        self
    }

    /// Fixture for a file in the fixture directory, created in the workload namespace
    pub fn fixture(&self, file: impl AsRef<Path>) -> Fixture {
        self.fixture_in(file, self.namespace.clone())
    }

    /// Fixture for a file in the fixture directory, created in `namespace`
    pub fn fixture_in(&self, file: impl AsRef<Path>, namespace: impl Into<String>) -> Fixture {
        Fixture::new(self.fixtures_dir.join(file), namespace)
    }

    /// Label selector matching the workload of share `name`
    pub fn service_selector(&self, name: &str) -> String {
        format!("{}={}", self.service_label_key, name)
    }
}
