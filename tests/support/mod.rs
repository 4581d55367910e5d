//! In-memory cluster and share for exercising whole scenarios.
//!
//! [`FakeCluster`] plays both the API server and the operator: ensuring a
//! share declaration starts a workload whose pod turns ready after a few
//! polls, and records the events a correct reconcile emits.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event, Pod, Service};
use serde_json::json;

use smbshare_e2e::access::{Credential, ShareClient, ShareTarget};
use smbshare_e2e::cluster::{ClusterQuery, ResourceIdentity, ResourceRef};
use smbshare_e2e::error::AccessFailure;
use smbshare_e2e::events::reasons;
use smbshare_e2e::fixture::{load_fixture, Ensured, Fixture, FixtureClient, FixtureObject};
use smbshare_e2e::{Error, Result};

pub const WORKLOAD_NAMESPACE: &str = "smb-test";
pub const SHARE_KIND: &str = "SmbShare";

/// Directory with the checked-in fixture files
pub fn fixtures_dir() -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/files")
}

type ObjectKey = (String, String, String);

#[derive(Debug, Clone)]
struct Workload {
    namespace: String,
    uid: String,
    ip: String,
    polls: usize,
}

#[derive(Default)]
struct State {
    objects: BTreeSet<ObjectKey>,
    workloads: BTreeMap<String, Workload>,
    removed: Vec<String>,
    creates: usize,
}

/// Fake API server plus operator
pub struct FakeCluster {
    pub(crate) state: Mutex<State>,
    /// Pod list calls before the pod reports ready; `None` never readies
    pub ready_after: Option<usize>,
    /// Extra event reasons emitted per share
    pub extra_reasons: Vec<&'static str>,
    /// Containers every workload pod runs
    pub containers: Vec<&'static str>,
    /// Type of the workload service
    pub service_type: &'static str,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
            ready_after: Some(2),
            extra_reasons: Vec::new(),
            containers: vec!["samba", "wb", "dns-register", "svc-watch"],
            service_type: "LoadBalancer",
        }
    }
}

impl FakeCluster {
    /// Pre-create every object of a fixture, as if another actor owned it
    pub async fn preload(&self, fixture: &Fixture) {
        let objs = load_fixture(fixture).await.unwrap();
        let mut state = self.state.lock().unwrap();
        for obj in objs {
            state
                .objects
                .insert((obj.api_resource.kind, obj.namespace, obj.name));
        }
    }

    /// Objects currently present
    pub fn object_count(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }

    /// Whether an object with `kind`/`name` exists in `namespace`
    pub fn has_object(&self, kind: &str, namespace: &str, name: &str) -> bool {
        self.state.lock().unwrap().objects.contains(&(
            kind.to_string(),
            namespace.to_string(),
            name.to_string(),
        ))
    }

    /// Objects removed so far as `Kind name`, in removal order
    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    /// Create calls that actually created an object
    pub fn creates(&self) -> usize {
        self.state.lock().unwrap().creates
    }

    fn share_from_selector(selector: &str) -> Option<&str> {
        selector.split_once('=').map(|(_, v)| v)
    }

    fn pod(&self, name: &str, workload: &Workload) -> Pod {
        let ready = self.ready_after.is_some_and(|n| workload.polls > n);
        let status = if ready { "True" } else { "False" };
        let containers: Vec<_> = self.containers.iter().map(|c| json!({"name": c})).collect();
        let statuses: Vec<_> = self
            .containers
            .iter()
            .map(|c| {
                json!({
                    "name": c,
                    "ready": ready,
                    "restartCount": 0,
                    "image": "quay.io/samba.org/samba-server:latest",
                    "imageID": ""
                })
            })
            .collect();
        serde_json::from_value(json!({
            "metadata": {
                "name": format!("{name}-6b7f9c-x2x4q"),
                "namespace": WORKLOAD_NAMESPACE,
                "labels": {"samba-operator.samba.org/service": name}
            },
            "spec": {"containers": containers},
            "status": {
                "podIP": workload.ip,
                "conditions": [
                    {"type": "PodScheduled", "status": "True"},
                    {"type": "Ready", "status": status},
                    {"type": "ContainersReady", "status": status}
                ],
                "containerStatuses": statuses
            }
        }))
        .unwrap()
    }
}

#[async_trait]
impl FixtureClient for FakeCluster {
    async fn ensure(&self, obj: &FixtureObject) -> Result<Ensured> {
        let mut state = self.state.lock().unwrap();
        let key = (
            obj.api_resource.kind.clone(),
            obj.namespace.clone(),
            obj.name.clone(),
        );
        if !state.objects.insert(key) {
            return Ok(Ensured::AlreadyPresent);
        }
        state.creates += 1;
        if obj.api_resource.kind == SHARE_KIND {
            let n = state.workloads.len() + 10;
            state.workloads.insert(
                obj.name.clone(),
                Workload {
                    namespace: obj.namespace.clone(),
                    uid: format!("uid-{}", obj.name),
                    ip: format!("10.244.0.{n}"),
                    polls: 0,
                },
            );
        }
        Ok(Ensured::Created)
    }

    async fn remove(&self, obj: &FixtureObject) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.objects.remove(&(
            obj.api_resource.kind.clone(),
            obj.namespace.clone(),
            obj.name.clone(),
        ));
        if obj.api_resource.kind == SHARE_KIND {
            state.workloads.remove(&obj.name);
        }
        state
            .removed
            .push(format!("{} {}", obj.api_resource.kind, obj.name));
        Ok(())
    }
}

#[async_trait]
impl ClusterQuery for FakeCluster {
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        let Some(name) = Self::share_from_selector(label_selector) else {
            return Ok(vec![]);
        };
        let mut state = self.state.lock().unwrap();
        if namespace != WORKLOAD_NAMESPACE {
            return Ok(vec![]);
        }
        match state.workloads.get_mut(name) {
            Some(workload) => {
                workload.polls += 1;
                let workload = workload.clone();
                Ok(vec![self.pod(name, &workload)])
            }
            None => Ok(vec![]),
        }
    }

    async fn list_services(&self, namespace: &str, label_selector: &str) -> Result<Vec<Service>> {
        let Some(name) = Self::share_from_selector(label_selector) else {
            return Ok(vec![]);
        };
        let state = self.state.lock().unwrap();
        if namespace != WORKLOAD_NAMESPACE || !state.workloads.contains_key(name) {
            return Ok(vec![]);
        }
        Ok(vec![serde_json::from_value(json!({
            "metadata": {"name": name, "namespace": namespace},
            "spec": {"type": self.service_type}
        }))
        .unwrap()])
    }

    async fn list_events(&self, namespace: &str, field_selector: &str) -> Result<Vec<Event>> {
        let fields: HashMap<&str, &str> = field_selector
            .split(',')
            .filter_map(|f| f.split_once('='))
            .collect();
        let state = self.state.lock().unwrap();
        let Some(name) = fields.get("involvedObject.name") else {
            return Ok(vec![]);
        };
        let Some(workload) = state.workloads.get(*name) else {
            return Ok(vec![]);
        };
        if workload.namespace != namespace
            || fields.get("involvedObject.uid") != Some(&workload.uid.as_str())
        {
            return Ok(vec![]);
        }
        let reasons = [
            reasons::CREATED_PERSISTENT_VOLUME_CLAIM,
            reasons::CREATED_DEPLOYMENT,
        ]
        .into_iter()
        .chain(self.extra_reasons.iter().copied());
        Ok(reasons
            .map(|r| Event {
                reason: Some(r.to_string()),
                ..Default::default()
            })
            .collect())
    }

    async fn resource_identity(&self, resource: &ResourceRef) -> Result<ResourceIdentity> {
        let state = self.state.lock().unwrap();
        state
            .workloads
            .get(&resource.name)
            .filter(|w| w.namespace == resource.namespace)
            .map(|w| ResourceIdentity {
                kind: resource.kind.clone(),
                name: resource.name.clone(),
                uid: w.uid.clone(),
            })
            .ok_or_else(|| Error::internal(format!("{} {} not found", resource.kind, resource.name)))
    }
}

/// Share server keyed by (host, share, file)
pub struct FakeShares {
    files: Mutex<HashMap<(String, String, String), Vec<u8>>>,
    users: HashMap<String, String>,
    /// Hosts that refuse connections
    pub unreachable: BTreeSet<String>,
}

impl FakeShares {
    /// Accept the given username/password pairs
    pub fn with_users(users: &[(&str, &str)]) -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            users: users
                .iter()
                .map(|(u, p)| (u.to_string(), p.to_string()))
                .collect(),
            unreachable: BTreeSet::new(),
        }
    }

    /// Files left behind on any share
    pub fn file_count(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    fn admit(&self, target: &ShareTarget, credential: &Credential) -> Result<()> {
        if self.unreachable.contains(&target.host) {
            return Err(Error::access(
                AccessFailure::Connection,
                target.unc(),
                "NT_STATUS_CONNECTION_REFUSED",
            ));
        }
        if self.users.get(&credential.username) != Some(&credential.password) {
            return Err(Error::access(
                AccessFailure::Auth,
                target.unc(),
                "NT_STATUS_LOGON_FAILURE",
            ));
        }
        Ok(())
    }

    fn key(target: &ShareTarget, name: &str) -> (String, String, String) {
        (target.host.clone(), target.share_name.clone(), name.to_string())
    }
}

#[async_trait]
impl ShareClient for FakeShares {
    async fn list(&self, target: &ShareTarget, credential: &Credential) -> Result<Vec<String>> {
        self.admit(target, credential)?;
        Ok(self
            .files
            .lock()
            .unwrap()
            .keys()
            .filter(|(h, s, _)| *h == target.host && *s == target.share_name)
            .map(|(_, _, f)| f.clone())
            .collect())
    }

    async fn put(
        &self,
        target: &ShareTarget,
        credential: &Credential,
        name: &str,
        contents: &[u8],
    ) -> Result<()> {
        self.admit(target, credential)?;
        self.files
            .lock()
            .unwrap()
            .insert(Self::key(target, name), contents.to_vec());
        Ok(())
    }

    async fn get(&self, target: &ShareTarget, credential: &Credential, name: &str) -> Result<Vec<u8>> {
        self.admit(target, credential)?;
        self.files
            .lock()
            .unwrap()
            .get(&Self::key(target, name))
            .cloned()
            .ok_or_else(|| Error::access(AccessFailure::Operation, target.unc(), "NT_STATUS_OBJECT_NAME_NOT_FOUND"))
    }

    async fn remove(&self, target: &ShareTarget, credential: &Credential, name: &str) -> Result<()> {
        self.admit(target, credential)?;
        self.files.lock().unwrap().remove(&Self::key(target, name));
        Ok(())
    }
}
