//! Whole-scenario runs against an in-memory cluster and share server.
//!
//! These exercise the real runner, registry and fixture files; only the API
//! server, operator and SMB server are faked.

mod support;

use std::sync::Arc;
use std::time::Duration;

use smbshare_e2e::access::ShareClient;
use smbshare_e2e::config::HarnessConfig;
use smbshare_e2e::error::AccessFailure;
use smbshare_e2e::fixture::{load_fixture, Ensured, FixtureClient};
use smbshare_e2e::registry::ScenarioRegistry;
use smbshare_e2e::report::ScenarioStatus;
use smbshare_e2e::scenario::{ScenarioPhase, ScenarioRunner};

use support::{fixtures_dir, FakeCluster, FakeShares, WORKLOAD_NAMESPACE};

const USERS: &[(&str, &str)] = &[("sambauser", "1nsecurely"), ("DOMAIN1\\bwayne", "1115Rose.")];

fn config() -> HarnessConfig {
    HarnessConfig::default()
        .with_namespace(WORKLOAD_NAMESPACE)
        .with_fixtures_dir(fixtures_dir())
        .with_timeouts(
            Duration::from_secs(10),
            Duration::from_secs(60),
            Duration::from_millis(250),
        )
}

fn runner(cluster: &Arc<FakeCluster>, shares: Arc<dyn ShareClient>) -> ScenarioRunner {
    ScenarioRunner::new(
        Arc::new(config()),
        cluster.clone(),
        cluster.clone(),
        shares,
    )
}

#[tokio::test(start_paused = true)]
async fn standard_matrix_passes_and_leaves_nothing_behind() {
    let cluster = Arc::new(FakeCluster::default());
    let shares = Arc::new(FakeShares::with_users(USERS));
    let registry = ScenarioRegistry::standard(&config());

    let run = registry
        .run(&runner(&cluster, shares.clone()), &[])
        .await
        .unwrap();

    assert_eq!(run.scenarios.len(), 4);
    for report in &run.scenarios {
        let failures: Vec<_> = report
            .failures()
            .map(|c| format!("{}: {:?}", c.name, c.error))
            .collect();
        assert!(failures.is_empty(), "{}: {failures:?}", report.scenario);
        assert!(report.reached(ScenarioPhase::Verified), "{}", report.scenario);
        assert_eq!(report.final_phase(), ScenarioPhase::TornDown);
    }
    assert!(run.finish().is_ok());
    assert_eq!(cluster.object_count(), 0);
    assert_eq!(shares.file_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn domain_member_checks_every_endpoint_kind() {
    let cluster = Arc::new(FakeCluster::default());
    let shares = Arc::new(FakeShares::with_users(USERS));
    let registry = ScenarioRegistry::standard(&config());

    let run = registry
        .run(&runner(&cluster, shares), &["domainMember1".to_string()])
        .await
        .unwrap();
    let report = &run.scenarios[0];
    for name in [
        "access[address/DOMAIN1\\bwayne]",
        "access[service-name/DOMAIN1\\bwayne]",
        "access[external-name/DOMAIN1\\bwayne]",
        "dns-containers",
        "events",
    ] {
        assert!(report.check(name).is_some_and(|c| c.passed), "{name}");
    }
}

#[tokio::test(start_paused = true)]
async fn rejected_credential_fails_only_its_access_checks() {
    let cluster = Arc::new(FakeCluster::default());
    let shares = Arc::new(FakeShares::with_users(&[("sambauser", "changed")]));
    let registry = ScenarioRegistry::standard(&config());

    let run = registry
        .run(&runner(&cluster, shares), &["users1".to_string()])
        .await
        .unwrap();
    let report = &run.scenarios[0];

    assert_eq!(report.status(), ScenarioStatus::Failed);
    let access = report.check("access[address/sambauser]").unwrap();
    assert_eq!(
        access.error.as_ref().and_then(|e| e.access_failure()),
        Some(AccessFailure::Auth)
    );
    assert!(report.check("pods-ready").unwrap().passed);
    assert!(report.check("events").unwrap().passed);
    assert!(report.check("teardown").unwrap().passed);
    assert_eq!(cluster.object_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn unreachable_external_name_is_a_connection_failure() {
    let cluster = Arc::new(FakeCluster::default());
    let mut shares = FakeShares::with_users(USERS);
    shares
        .unreachable
        .insert("tshare2-cluster.domain1.sink.test".to_string());
    let registry = ScenarioRegistry::standard(&config());

    let run = registry
        .run(&runner(&cluster, Arc::new(shares)), &["domainMember1".to_string()])
        .await
        .unwrap();
    let report = &run.scenarios[0];
    let failures: Vec<_> = report.failures().map(|c| c.name.as_str()).collect();
    assert_eq!(failures, vec!["access[external-name/DOMAIN1\\bwayne]"]);
    let err = report.failures().next().unwrap().error.as_ref().unwrap();
    assert_eq!(err.access_failure(), Some(AccessFailure::Connection));
}

#[tokio::test(start_paused = true)]
async fn duplicate_deployment_event_fails_events_check() {
    let cluster = Arc::new(FakeCluster {
        extra_reasons: vec!["CreatedDeployment"],
        ..Default::default()
    });
    let shares = Arc::new(FakeShares::with_users(USERS));
    let registry = ScenarioRegistry::standard(&config());

    let run = registry
        .run(&runner(&cluster, shares), &["smbSharesInDefault".to_string()])
        .await
        .unwrap();
    let events = run.scenarios[0].check("events").unwrap();
    assert!(!events.passed);
    let msg = events.error.as_ref().unwrap().to_string();
    assert!(msg.contains("want 1 CreatedDeployment event(s), got 2"), "{msg}");
    assert_eq!(cluster.object_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn workload_that_never_readies_times_out_and_skips_verification() {
    let cluster = Arc::new(FakeCluster {
        ready_after: None,
        ..Default::default()
    });
    let shares = Arc::new(FakeShares::with_users(USERS));
    let registry = ScenarioRegistry::standard(&config());

    let start = tokio::time::Instant::now();
    let run = registry
        .run(&runner(&cluster, shares), &["users1".to_string()])
        .await
        .unwrap();
    let report = &run.scenarios[0];

    assert!(start.elapsed() <= Duration::from_secs(60) + Duration::from_millis(250));
    let ready = report.check("pod-ready").unwrap();
    assert!(ready.error.as_ref().unwrap().is_timeout());
    assert!(report.reached(ScenarioPhase::WorkloadDiscovered));
    assert!(!report.reached(ScenarioPhase::WorkloadReady));
    assert!(report.check("events").is_none());
    assert_eq!(cluster.object_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn internal_load_balancer_type_fails_external_scenario() {
    let cluster = Arc::new(FakeCluster {
        service_type: "ClusterIP",
        ..Default::default()
    });
    let shares = Arc::new(FakeShares::with_users(USERS));
    let registry = ScenarioRegistry::standard(&config());

    let run = registry
        .run(&runner(&cluster, shares), &["smbSharesExternal".to_string()])
        .await
        .unwrap();
    let check = run.scenarios[0].check("service-load-balancer").unwrap();
    assert!(!check.passed);
    assert!(check
        .error
        .as_ref()
        .unwrap()
        .to_string()
        .contains("service type is ClusterIP"));
}

#[tokio::test(start_paused = true)]
async fn preexisting_fixture_is_left_in_place() {
    let config = config();
    let cluster = Arc::new(FakeCluster::default());
    cluster.preload(&config.fixture("userssecret1.yaml")).await;
    let shares = Arc::new(FakeShares::with_users(USERS));
    let registry = ScenarioRegistry::standard(&config);

    let run = registry
        .run(&runner(&cluster, shares), &["users1".to_string()])
        .await
        .unwrap();

    assert_eq!(run.scenarios[0].status(), ScenarioStatus::Passed);
    assert!(cluster.has_object("Secret", WORKLOAD_NAMESPACE, "users1"));
    assert_eq!(cluster.object_count(), 1);
    assert_eq!(
        cluster.removed(),
        vec!["SmbShare tshare1", "SmbSecurityConfig sharesec1"]
    );
}

#[tokio::test]
async fn ensuring_a_fixture_twice_creates_nothing_new() {
    let config = config();
    let cluster = FakeCluster::default();
    let objects = load_fixture(&config.fixture("smbshare1.yaml")).await.unwrap();

    for obj in &objects {
        assert_eq!(cluster.ensure(obj).await.unwrap(), Ensured::Created);
    }
    for obj in &objects {
        assert_eq!(cluster.ensure(obj).await.unwrap(), Ensured::AlreadyPresent);
    }
    assert_eq!(cluster.creates(), objects.len());
    assert_eq!(cluster.object_count(), objects.len());
}

#[tokio::test(start_paused = true)]
async fn back_to_back_runs_restore_the_same_cluster_state() {
    let config = config();
    let cluster = Arc::new(FakeCluster::default());
    cluster.preload(&config.fixture("userssecret1.yaml")).await;
    let registry = ScenarioRegistry::standard(&config);

    for _ in 0..2 {
        let shares = Arc::new(FakeShares::with_users(USERS));
        let run = registry
            .run(&runner(&cluster, shares), &["users1".to_string()])
            .await
            .unwrap();
        assert!(run.finish().is_ok());
        assert_eq!(cluster.object_count(), 1);
        assert!(cluster.has_object("Secret", WORKLOAD_NAMESPACE, "users1"));
    }
}

#[tokio::test]
async fn every_registered_fixture_parses() {
    let config = config();
    let registry = ScenarioRegistry::standard(&config);
    for scenario in registry.select(&[]).unwrap() {
        for fixture in &scenario.fixtures {
            let objs = load_fixture(fixture).await.unwrap();
            assert!(!objs.is_empty(), "{fixture}");
            assert!(objs.iter().all(|o| o.namespace == fixture.namespace));
        }
    }
}
