//! Named scenarios and sequential execution of a selection of them.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::access::Credential;
use crate::cluster::ShareIdentity;
use crate::config::HarnessConfig;
use crate::report::RunReport;
use crate::scenario::{Scenario, ScenarioRunner};
use crate::topology::{dns_member_steps, external_network_steps};
use crate::{Error, Result};

/// Namespace holding shares declared outside the harness namespace
pub const DEFAULT_KUBE_NAMESPACE: &str = "default";

/// Scenarios keyed by name
#[derive(Debug, Default)]
pub struct ScenarioRegistry {
    scenarios: BTreeMap<String, Scenario>,
}

impl ScenarioRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scenario, replacing one with the same name
    pub fn register(&mut self, scenario: Scenario) {
        if let Some(old) = self.scenarios.insert(scenario.name.clone(), scenario) {
            warn!(scenario = %old.name, "scenario replaced");
        }
    }

    /// The standard matrix: local users, domain member with DNS
    /// registration, a share declared in another namespace, and an
    /// externally exposed share.
    pub fn standard(config: &HarnessConfig) -> Self {
        let ns = config.namespace.as_str();
        let local_user = || Credential::new("sambauser", "1nsecurely");
        let mut registry = Self::new();

        registry.register(
            Scenario::new("users1", ShareIdentity::new(ns, "tshare1"), "My Share")
                .fixture(config.fixture("userssecret1.yaml"))
                .fixture(config.fixture("smbsecurityconfig1.yaml"))
                .fixture(config.fixture("smbshare1.yaml"))
                .credential(local_user()),
        );

        registry.register(
            Scenario::new(
                "domainMember1",
                ShareIdentity::new(ns, "tshare2"),
                "My Kingdom",
            )
            .fixture(config.fixture("joinsecret1.yaml"))
            .fixture(config.fixture("smbsecurityconfig2.yaml"))
            .fixture(config.fixture("smbshare2.yaml"))
            .credential(Credential::new("DOMAIN1\\bwayne", "1115Rose."))
            .with_steps(dns_member_steps()),
        );

        registry.register(
            Scenario::new(
                "smbSharesInDefault",
                ShareIdentity::new(DEFAULT_KUBE_NAMESPACE, "tshare3"),
                "My Other Share",
            )
            .fixture(config.fixture("userssecret1.yaml"))
            .fixture(config.fixture_in("smbsecurityconfig1.yaml", DEFAULT_KUBE_NAMESPACE))
            .fixture(config.fixture_in("smbshare3.yaml", DEFAULT_KUBE_NAMESPACE))
            .credential(local_user()),
        );

        registry.register(
            Scenario::new(
                "smbSharesExternal",
                ShareIdentity::new(ns, "tshare4"),
                "Since When",
            )
            .fixture(config.fixture("userssecret1.yaml"))
            .fixture(config.fixture("commonconfig1.yaml"))
            .fixture(config.fixture("smbsecurityconfig1.yaml"))
            .fixture(config.fixture("smbshare4.yaml"))
            .credential(local_user())
            .with_steps(external_network_steps()),
        );

        registry
    }

    /// Registered names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.scenarios.keys().map(String::as_str)
    }

    /// Look up one scenario
    pub fn get(&self, name: &str) -> Option<&Scenario> {
        self.scenarios.get(name)
    }

    /// Scenarios for `names`, or all of them when `names` is empty
    pub fn select(&self, names: &[String]) -> Result<Vec<&Scenario>> {
        if names.is_empty() {
            return Ok(self.scenarios.values().collect());
        }
        names
            .iter()
            .map(|name| {
                self.get(name).ok_or_else(|| {
                    Error::internal_with_context(
                        "scenario selection",
                        format!(
                            "unknown scenario {:?}; known: {}",
                            name,
                            self.names().collect::<Vec<_>>().join(", ")
                        ),
                    )
                })
            })
            .collect()
    }

    /// Run the selected scenarios one after another.
    ///
    /// Each scenario gets its own fixtures and teardown, so a failure in one
    /// never changes what another observes.
    pub async fn run(&self, runner: &ScenarioRunner, names: &[String]) -> Result<RunReport> {
        let selected = self.select(names)?;
        info!(count = selected.len(), "running scenarios");
        let mut run = RunReport::default();
        for scenario in selected {
            run.scenarios.push(runner.run(scenario).await);
        }
        Ok(run)
    }
}
