//! Fixture lifecycle: create-if-missing at setup, matching delete at teardown.
//!
//! A [`Fixture`] is a YAML file (one or more documents) plus the namespace its
//! objects are created in. [`FixtureClient`] is the provisioning seam;
//! [`KubeFixtureClient`] implements it with dynamic objects so any kind,
//! including the share CRD, can be applied without a typed schema.
//!
//! [`FixtureLifecycle`] records which objects a scenario created and removes
//! exactly those, newest first, when the scenario ends. An object that already
//! existed is never tracked, even when a sibling from the same file was
//! created. Fixtures are live objects in a shared namespace: two scenarios
//! running at the same time must not use the same fixture identities.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
use serde_json::Value;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use crate::cluster::build_api_resource;
use crate::yaml::parse_documents;
use crate::{Error, Result};

/// A declarative resource file applied into a namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fixture {
    /// Path of the YAML file
    pub path: PathBuf,
    /// Namespace the file's objects are created in
    pub namespace: String,
}

impl Fixture {
    /// Create a fixture reference
    pub fn new(path: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            namespace: namespace.into(),
        }
    }
}

impl std::fmt::Display for Fixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (ns {})", self.path.display(), self.namespace)
    }
}

/// Result of [`FixtureClient::ensure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensured {
    /// The object was created by this call
    Created,
    /// The object already existed; nothing was changed
    AlreadyPresent,
}

/// Provisioning seam for fixture objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FixtureClient: Send + Sync {
    /// Create `object` unless it already exists
    async fn ensure(&self, object: &FixtureObject) -> Result<Ensured>;

    /// Delete `object`; an object that is already gone is fine
    async fn remove(&self, object: &FixtureObject) -> Result<()>;
}

/// One object of a fixture file, ready to send to the API server
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureObject {
    /// Resource type of the object
    pub api_resource: ApiResource,
    /// `metadata.name`
    pub name: String,
    /// Namespace the object is created in
    pub namespace: String,
    /// Full manifest with the namespace set
    pub manifest: Value,
}

impl std::fmt::Display for FixtureObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}/{}", self.api_resource.kind, self.namespace, self.name)
    }
}

/// Parse fixture file content into objects bound to `namespace`.
///
/// The fixture namespace overrides any `metadata.namespace` in the file.
pub fn parse_fixture(origin: &str, content: &str, namespace: &str) -> Result<Vec<FixtureObject>> {
    let docs = parse_documents(content)
        .map_err(|e| Error::manifest(origin, format!("invalid YAML: {}", e)))?;
    if docs.is_empty() {
        return Err(Error::manifest(origin, "no documents"));
    }

    docs.into_iter()
        .map(|mut doc| {
            let api_version = doc
                .get("apiVersion")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::manifest(origin, "missing apiVersion"))?
                .to_string();
            let kind = doc
                .get("kind")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::manifest(origin, "missing kind"))?
                .to_string();
            let name = doc
                .pointer("/metadata/name")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::manifest(origin, "missing metadata.name"))?
                .to_string();
            if let Some(meta) = doc.get_mut("metadata").and_then(Value::as_object_mut) {
                meta.insert("namespace".to_string(), Value::String(namespace.to_string()));
            }
            Ok(FixtureObject {
                api_resource: build_api_resource(&api_version, &kind),
                name,
                namespace: namespace.to_string(),
                manifest: doc,
            })
        })
        .collect()
}

/// Read and parse a fixture file
pub async fn load_fixture(fixture: &Fixture) -> Result<Vec<FixtureObject>> {
    let origin = fixture.path.display().to_string();
    let content = tokio::fs::read_to_string(&fixture.path)
        .await
        .map_err(|e| Error::manifest(&origin, format!("failed to read: {}", e)))?;
    parse_fixture(&origin, &content, &fixture.namespace)
}

/// [`FixtureClient`] applying fixture files to a live cluster
#[derive(Clone)]
pub struct KubeFixtureClient {
    client: Client,
}

impl KubeFixtureClient {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, obj: &FixtureObject) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), &obj.namespace, &obj.api_resource)
    }
}

#[async_trait]
impl FixtureClient for KubeFixtureClient {
    async fn ensure(&self, object: &FixtureObject) -> Result<Ensured> {
        let api = self.api(object);
        if api.get_opt(&object.name).await?.is_some() {
            debug!(object = %object, "fixture object already present");
            return Ok(Ensured::AlreadyPresent);
        }
        let dynamic: DynamicObject = serde_json::from_value(object.manifest.clone())
            .map_err(|e| Error::manifest(object.to_string(), e.to_string()))?;
        match api.create(&PostParams::default(), &dynamic).await {
            Ok(_) => {
                info!(object = %object, "created fixture object");
                Ok(Ensured::Created)
            }
            // Another creator won the race; this run does not own the object.
            Err(kube::Error::Api(ref resp)) if resp.code == 409 => {
                debug!(object = %object, "fixture object created concurrently");
                Ok(Ensured::AlreadyPresent)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, object: &FixtureObject) -> Result<()> {
        match self.api(object).delete(&object.name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(object = %object, "deleted fixture object");
                Ok(())
            }
            Err(kube::Error::Api(ref resp)) if resp.code == 404 => {
                debug!(object = %object, "fixture object already gone");
                Ok(())
            }
            Err(e) => Err(Error::teardown(object.to_string(), e.to_string())),
        }
    }
}

/// Tracks the objects one scenario created so teardown removes exactly those
pub struct FixtureLifecycle {
    client: Arc<dyn FixtureClient>,
    created: Vec<(Fixture, FixtureObject)>,
}

impl FixtureLifecycle {
    /// Start with nothing applied
    pub fn new(client: Arc<dyn FixtureClient>) -> Self {
        Self {
            client,
            created: Vec::new(),
        }
    }

    /// Objects this lifecycle created, in creation order
    pub fn created(&self) -> impl Iterator<Item = &FixtureObject> {
        self.created.iter().map(|(_, object)| object)
    }

    /// Ensure every object of `fixture`, stopping at the first failure.
    ///
    /// Returns [`Ensured::Created`] when at least one object was created.
    /// Objects created before a failure, including earlier documents of the
    /// same file, stay tracked for [`Self::teardown`].
    pub async fn ensure(&mut self, fixture: &Fixture) -> Result<Ensured> {
        let objects = load_fixture(fixture)
            .await
            .map_err(|e| Error::setup(fixture.to_string(), e.to_string()))?;
        let mut outcome = Ensured::AlreadyPresent;
        for object in objects {
            match self.client.ensure(&object).await {
                Ok(Ensured::Created) => {
                    info!(fixture = %fixture, object = %object, "fixture object created");
                    self.created.push((fixture.clone(), object));
                    outcome = Ensured::Created;
                }
                Ok(Ensured::AlreadyPresent) => {
                    info!(fixture = %fixture, object = %object, "fixture object already present, leaving it untracked");
                }
                Err(e @ Error::Setup { .. }) => return Err(e),
                Err(e) => return Err(Error::setup(object.to_string(), e.to_string())),
            }
        }
        Ok(outcome)
    }

    /// Ensure every fixture in order, stopping at the first failure
    pub async fn apply_all(&mut self, fixtures: &[Fixture]) -> Result<()> {
        for fixture in fixtures {
            self.ensure(fixture).await?;
        }
        Ok(())
    }

    /// Remove the objects this lifecycle created for `fixture`, newest first.
    ///
    /// Objects of the fixture that were already present are left alone.
    pub async fn remove(&mut self, fixture: &Fixture) -> Result<()> {
        let (owned, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.created)
            .into_iter()
            .partition(|(f, _)| f == fixture);
        self.created = rest;
        let failures: Vec<String> = self
            .remove_objects(owned.into_iter().map(|(_, object)| object))
            .await
            .iter()
            .map(ToString::to_string)
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::teardown(fixture.to_string(), failures.join("; ")))
        }
    }

    /// Remove every created object, newest first, continuing past failures
    pub async fn teardown(&mut self) -> Vec<Error> {
        let created = std::mem::take(&mut self.created);
        self.remove_objects(created.into_iter().map(|(_, object)| object))
            .await
    }

    /// Delete `objects` in reverse order, one error per failed object
    async fn remove_objects(
        &self,
        objects: impl DoubleEndedIterator<Item = FixtureObject>,
    ) -> Vec<Error> {
        let mut errors = Vec::new();
        for object in objects.rev() {
            match self.client.remove(&object).await {
                Ok(()) => info!(object = %object, "fixture object removed"),
                Err(e) => {
                    warn!(object = %object, error = %e, "fixture object removal failed");
                    errors.push(match e {
                        Error::Teardown { .. } => e,
                        other => Error::teardown(object.to_string(), other.to_string()),
                    });
                }
            }
        }
        errors
    }
}
