//! Command line surface.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::access::SmbClientCli;
use crate::cluster::{create_client, KubeClusterQuery};
use crate::config::{
    HarnessConfig, DEFAULT_ACCESS_TIMEOUT, DEFAULT_CLUSTER_DOMAIN, DEFAULT_DNS_SETTLE_DELAY,
    DEFAULT_EXIST_TIMEOUT, DEFAULT_EXTERNAL_DOMAIN_SUFFIX, DEFAULT_FIXTURES_DIR,
    DEFAULT_NAMESPACE, DEFAULT_POLL_INTERVAL, DEFAULT_READY_TIMEOUT,
};
use crate::fixture::{load_fixture, KubeFixtureClient};
use crate::registry::ScenarioRegistry;
use crate::scenario::ScenarioRunner;
use crate::{Error, Result};

/// smbshare-e2e - end-to-end checks for operator-managed SMB shares
#[derive(Parser, Debug)]
#[command(name = "smbshare-e2e")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Harness settings
    #[command(flatten)]
    pub harness: HarnessArgs,

    /// Command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List registered scenarios
    List,
    /// Run scenarios against the current cluster
    Run(RunArgs),
}

/// Settings shared by every scenario
#[derive(Args, Debug, Clone)]
pub struct HarnessArgs {
    /// Namespace the operator runs share workloads in
    #[arg(long, global = true, env = "SMBSHARE_E2E_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Directory holding fixture YAML files
    #[arg(long, global = true, env = "SMBSHARE_E2E_FIXTURES_DIR", default_value = DEFAULT_FIXTURES_DIR)]
    pub fixtures_dir: PathBuf,

    /// Kubeconfig to use instead of in-cluster or default discovery
    #[arg(long, global = true, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Cluster DNS domain for service names
    #[arg(long, global = true, default_value = DEFAULT_CLUSTER_DOMAIN)]
    pub cluster_domain: String,

    /// DNS suffix external names are registered under
    #[arg(long, global = true, env = "SMBSHARE_E2E_EXTERNAL_DOMAIN", default_value = DEFAULT_EXTERNAL_DOMAIN_SUFFIX)]
    pub external_domain: String,
}

impl HarnessArgs {
    fn into_config(self) -> HarnessConfig {
        HarnessConfig {
            cluster_domain: self.cluster_domain,
            external_domain_suffix: self.external_domain,
            kubeconfig: self.kubeconfig,
            ..HarnessConfig::default()
                .with_namespace(self.namespace)
                .with_fixtures_dir(self.fixtures_dir)
        }
    }
}

/// Arguments for `run`
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Scenario to run; repeat for several, omit for all
    #[arg(long = "scenario", short = 's')]
    pub scenarios: Vec<String>,

    /// Seconds to wait for the share pod to appear
    #[arg(long, default_value_t = DEFAULT_EXIST_TIMEOUT.as_secs())]
    pub exist_timeout_secs: u64,

    /// Seconds to wait for the share pod to become ready
    #[arg(long, default_value_t = DEFAULT_READY_TIMEOUT.as_secs())]
    pub ready_timeout_secs: u64,

    /// Milliseconds between readiness polls
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_millis() as u64)]
    pub poll_interval_ms: u64,

    /// Milliseconds to wait before using external names
    #[arg(long, default_value_t = DEFAULT_DNS_SETTLE_DELAY.as_millis() as u64)]
    pub dns_settle_ms: u64,

    /// Seconds allowed for one share access round trip
    #[arg(long, default_value_t = DEFAULT_ACCESS_TIMEOUT.as_secs())]
    pub access_timeout_secs: u64,

    /// Command prefix for smbclient, e.g. "kubectl exec -i smbclient --"
    #[arg(long, env = "SMBSHARE_E2E_SMBCLIENT_PREFIX", value_delimiter = ' ')]
    pub smbclient_prefix: Vec<String>,
}

impl RunArgs {
    fn apply(&self, config: HarnessConfig) -> HarnessConfig {
        HarnessConfig {
            dns_settle_delay: Duration::from_millis(self.dns_settle_ms),
            access_timeout: Duration::from_secs(self.access_timeout_secs),
            ..config.with_timeouts(
                Duration::from_secs(self.exist_timeout_secs),
                Duration::from_secs(self.ready_timeout_secs),
                Duration::from_millis(self.poll_interval_ms),
            )
        }
    }
}

impl Cli {
    /// Run the selected command
    pub async fn run(self) -> Result<()> {
        let config = self.harness.into_config();
        match self.command {
            Commands::List => {
                for name in ScenarioRegistry::standard(&config).names() {
                    println!("{name}");
                }
                Ok(())
            }
            Commands::Run(args) => run(args.apply(config), &args).await,
        }
    }
}

async fn run(config: HarnessConfig, args: &RunArgs) -> Result<()> {
    let registry = ScenarioRegistry::standard(&config);
    // Bad selections and unreadable fixtures fail before touching the cluster.
    for scenario in registry.select(&args.scenarios)? {
        for fixture in &scenario.fixtures {
            load_fixture(fixture).await?;
        }
    }

    let client = create_client(config.kubeconfig.as_deref()).await?;
    let shares = if args.smbclient_prefix.iter().all(|p| p.is_empty()) {
        SmbClientCli::default()
    } else {
        SmbClientCli::with_prefix(
            args.smbclient_prefix
                .iter()
                .filter(|p| !p.is_empty())
                .cloned()
                .collect(),
        )
    };
    info!(namespace = %config.namespace, fixtures = %config.fixtures_dir.display(), "harness configured");

    let runner = ScenarioRunner::new(
        Arc::new(config),
        Arc::new(KubeClusterQuery::new(client.clone())),
        Arc::new(KubeFixtureClient::new(client)),
        Arc::new(shares),
    );
    let report = registry.run(&runner, &args.scenarios).await?;
    report
        .finish()
        .map_err(|msg| Error::verification("run", msg))
}
