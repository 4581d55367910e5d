//! Endpoint kinds and the naming convention used to reach a share.
//!
//! Name derivation is pure. Only [`EndpointKind::Address`] needs the cluster:
//! pod IPs are assigned at scheduling time, so the address is read from live
//! pod status rather than derived.

use crate::cluster::{ClusterQuery, ShareIdentity};
use crate::config::HarnessConfig;
use crate::{Error, Result};

/// How a share is addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    /// Pod IP taken from live pod status
    Address,
    /// `<name>.<namespace>.svc.<cluster-domain>`
    ServiceName,
    /// `<name>-cluster.<domain-suffix>`
    ExternalName,
}

impl EndpointKind {
    /// Short label used in check names
    pub fn label(&self) -> &'static str {
        match self {
            EndpointKind::Address => "address",
            EndpointKind::ServiceName => "service-name",
            EndpointKind::ExternalName => "external-name",
        }
    }
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// In-cluster service DNS name for a share
pub fn service_dns_name(name: &str, namespace: &str, cluster_domain: &str) -> String {
    format!("{}.{}.svc.{}", name, namespace, cluster_domain)
}

/// Externally registered DNS name for a share
pub fn external_dns_name(name: &str, domain_suffix: &str) -> String {
    format!("{}-cluster.{}", name, domain_suffix)
}

/// Resolve `kind` to a host string for `share`.
///
/// Workloads run in the harness namespace even when the share is declared
/// elsewhere, so both the pod lookup and the service name use
/// `config.namespace`.
pub async fn resolve<Q>(
    kind: EndpointKind,
    share: &ShareIdentity,
    config: &HarnessConfig,
    query: &Q,
) -> Result<String>
where
    Q: ClusterQuery + ?Sized,
{
    match kind {
        EndpointKind::Address => {
            let selector = config.service_selector(&share.name);
            let pods = query.list_pods(&config.namespace, &selector).await?;
            let pod = pods.first().ok_or_else(|| {
                Error::verification(
                    kind.label(),
                    format!("no pod matches {} in {}", selector, config.namespace),
                )
            })?;
            pod.status
                .as_ref()
                .and_then(|s| s.pod_ip.clone())
                .filter(|ip| !ip.is_empty())
                .ok_or_else(|| {
                    Error::verification(
                        kind.label(),
                        format!(
                            "pod {} has no IP",
                            pod.metadata.name.as_deref().unwrap_or("<unnamed>")
                        ),
                    )
                })
        }
        EndpointKind::ServiceName => Ok(service_dns_name(
            &share.name,
            &config.namespace,
            &config.cluster_domain,
        )),
        EndpointKind::ExternalName => Ok(external_dns_name(
            &share.name,
            &config.external_domain_suffix,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterQuery;
    use k8s_openapi::api::core::v1::{Pod, PodStatus};

    #[test]
    fn service_name_follows_cluster_convention() {
        assert_eq!(
            service_dns_name("tshare1", "default", "cluster.local"),
            "tshare1.default.svc.cluster.local"
        );
    }

    #[test]
    fn external_name_follows_registration_convention() {
        assert_eq!(
            external_dns_name("tshare2", "domain1.sink.test"),
            "tshare2-cluster.domain1.sink.test"
        );
    }

    #[tokio::test]
    async fn names_resolve_in_workload_namespace() {
        let query = MockClusterQuery::new();
        let config = HarnessConfig::default().with_namespace("smb-test");
        let share = ShareIdentity::new("default", "tshare3");
        let host = resolve(EndpointKind::ServiceName, &share, &config, &query)
            .await
            .unwrap();
        assert_eq!(host, "tshare3.smb-test.svc.cluster.local");
        let external = resolve(EndpointKind::ExternalName, &share, &config, &query)
            .await
            .unwrap();
        assert_eq!(external, "tshare3-cluster.domain1.sink.test");
    }

    #[tokio::test]
    async fn address_comes_from_pod_status() {
        let mut query = MockClusterQuery::new();
        query.expect_list_pods().returning(|_, _| {
            Ok(vec![Pod {
                status: Some(PodStatus {
                    pod_ip: Some("10.244.0.17".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }])
        });
        let config = HarnessConfig::default();
        let share = ShareIdentity::new(&config.namespace, "tshare1");
        let host = resolve(EndpointKind::Address, &share, &config, &query)
            .await
            .unwrap();
        assert_eq!(host, "10.244.0.17");
    }

    #[tokio::test]
    async fn address_without_pod_ip_is_a_verification_failure() {
        let mut query = MockClusterQuery::new();
        query
            .expect_list_pods()
            .returning(|_, _| Ok(vec![Pod::default()]));
        let config = HarnessConfig::default();
        let share = ShareIdentity::new(&config.namespace, "tshare1");
        let err = resolve(EndpointKind::Address, &share, &config, &query)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Verification { .. }));
    }
}
