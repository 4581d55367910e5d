//! Cluster query capability used by the poller and the verifiers.
//!
//! The harness only needs four query shapes: pods by label, services by
//! label, events by field selector, and a generic identity lookup (kind,
//! name and uid) for the resource under test. [`ClusterQuery`] exposes
//! exactly those so scenarios can be driven against a mock or an in-memory
//! fake, while [`KubeClusterQuery`] answers them from a live API server.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event, Pod, Service};
use kube::api::{Api, DynamicObject, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{Error, Result};

/// Connection timeout for the kube client
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Read timeout for the kube client; bounds every individual query
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Namespaced name of the resource under test
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShareIdentity {
    /// Namespace the share declaration lives in
    pub namespace: String,
    /// Name of the share declaration
    pub name: String,
}

impl ShareIdentity {
    /// Create an identity
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ShareIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Typed reference used for the generic identity lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    /// `group/version` or `version`
    pub api_version: String,
    /// Resource kind
    pub kind: String,
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

/// Stable identity of a live object, as events reference it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceIdentity {
    /// Resource kind
    pub kind: String,
    /// Name
    pub name: String,
    /// Server-assigned uid
    pub uid: String,
}

/// Read-only cluster queries the harness depends on
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterQuery: Send + Sync {
    /// List pods in `namespace` matching a label selector
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>>;

    /// List services in `namespace` matching a label selector
    async fn list_services(&self, namespace: &str, label_selector: &str)
        -> Result<Vec<Service>>;

    /// List events in `namespace` matching a field selector
    async fn list_events(&self, namespace: &str, field_selector: &str) -> Result<Vec<Event>>;

    /// Look up kind, name and uid of any object without a typed schema
    async fn resource_identity(&self, resource: &ResourceRef) -> Result<ResourceIdentity>;
}

/// Field selector matching events about one object
pub fn event_field_selector(identity: &ResourceIdentity) -> String {
    format!(
        "involvedObject.kind={},involvedObject.name={},involvedObject.uid={}",
        identity.kind, identity.name, identity.uid
    )
}

/// Parse apiVersion into (group, version)
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Lowercase plural resource name for a kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Build an `ApiResource` from a manifest's apiVersion and kind
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Install the process-wide rustls crypto provider used by the kube client.
///
/// Safe to call more than once; a provider that is already installed is kept.
pub fn install_crypto_provider() {
    if rustls::crypto::CryptoProvider::get_default().is_some() {
        return;
    }
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        debug!(?e, "crypto provider installed concurrently");
    }
}

/// Create a kube client from an optional kubeconfig path.
///
/// Retries transient failures (API server port-forward not up yet).
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    install_crypto_provider();
    retry_with_backoff(&RetryConfig::default(), "create_kube_client", || {
        create_client_once(kubeconfig)
    })
    .await
}

async fn create_client_once(kubeconfig: Option<&Path>) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// [`ClusterQuery`] backed by a live API server
#[derive(Clone)]
pub struct KubeClusterQuery {
    client: Client,
}

impl KubeClusterQuery {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterQuery for KubeClusterQuery {
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        debug!(namespace, label_selector, count = pods.items.len(), "listed pods");
        Ok(pods.items)
    }

    async fn list_services(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Service>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let services = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(services.items)
    }

    async fn list_events(&self, namespace: &str, field_selector: &str) -> Result<Vec<Event>> {
        let api: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        let events = api
            .list(&ListParams::default().fields(field_selector))
            .await?;
        debug!(namespace, field_selector, count = events.items.len(), "listed events");
        Ok(events.items)
    }

    async fn resource_identity(&self, resource: &ResourceRef) -> Result<ResourceIdentity> {
        let ar = build_api_resource(&resource.api_version, &resource.kind);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &resource.namespace, &ar);
        let obj = api.get(&resource.name).await?;
        let uid = obj.metadata.uid.ok_or_else(|| {
            Error::internal_with_context(
                "resource_identity",
                format!(
                    "{} {}/{} has no uid",
                    resource.kind, resource.namespace, resource.name
                ),
            )
        })?;
        Ok(ResourceIdentity {
            kind: resource.kind.clone(),
            name: resource.name.clone(),
            uid,
        })
    }
}
