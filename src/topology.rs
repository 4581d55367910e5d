//! Checks that only make sense for particular share topologies.
//!
//! Variants extend the base scenario by appending steps; they never replace
//! or reorder the base ones.

use k8s_openapi::api::core::v1::Pod;

use crate::endpoint::EndpointKind;
use crate::scenario::{access_step, StepContext, VerificationStep};
use crate::{Error, Result};

/// Containers a domain member workload runs next to the server
pub const DNS_SIDECARS: &[&str] = &["dns-register", "svc-watch"];

/// Container count for a domain member workload with DNS registration
pub const DNS_MEMBER_CONTAINERS: usize = 4;

/// Service type expected for externally exposed shares
pub const LOAD_BALANCER: &str = "LoadBalancer";

const DNS_CONTAINERS_CHECK: &str = "dns-containers";
const LOAD_BALANCER_CHECK: &str = "service-load-balancer";

/// Steps for a domain member whose name is registered in external DNS:
/// access through the external name, then the side-car layout.
pub fn dns_member_steps() -> Vec<VerificationStep> {
    vec![
        access_step(EndpointKind::ExternalName),
        VerificationStep::check(DNS_CONTAINERS_CHECK, |ctx: StepContext| async move {
            let pod = ctx.workload_pod().await?;
            check_dns_containers(&pod)
        }),
    ]
}

/// Steps for a share exposed outside the cluster network
pub fn external_network_steps() -> Vec<VerificationStep> {
    vec![VerificationStep::check(
        LOAD_BALANCER_CHECK,
        |ctx: StepContext| async move {
            let selector = ctx.selector();
            let services = ctx
                .query
                .list_services(&ctx.config.namespace, &selector)
                .await?;
            if services.len() != 1 {
                return Err(Error::verification(
                    LOAD_BALANCER_CHECK,
                    format!("expected 1 service matching {}, found {}", selector, services.len()),
                ));
            }
            let service_type = services[0]
                .spec
                .as_ref()
                .and_then(|s| s.type_.as_deref())
                .unwrap_or("ClusterIP");
            if service_type != LOAD_BALANCER {
                return Err(Error::verification(
                    LOAD_BALANCER_CHECK,
                    format!("service type is {}, want {}", service_type, LOAD_BALANCER),
                ));
            }
            Ok(())
        },
    )]
}

/// Side-car layout of a DNS-registering domain member pod
pub fn check_dns_containers(pod: &Pod) -> Result<()> {
    let names: Vec<&str> = pod
        .spec
        .as_ref()
        .map(|s| s.containers.iter().map(|c| c.name.as_str()).collect())
        .unwrap_or_default();
    if names.len() != DNS_MEMBER_CONTAINERS {
        return Err(Error::verification(
            DNS_CONTAINERS_CHECK,
            format!(
                "expected {} containers, found {}: {}",
                DNS_MEMBER_CONTAINERS,
                names.len(),
                names.join(", ")
            ),
        ));
    }
    for sidecar in DNS_SIDECARS {
        if !names.contains(sidecar) {
            return Err(Error::verification(
                DNS_CONTAINERS_CHECK,
                format!("container {} missing", sidecar),
            ));
        }
    }

    let statuses = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or_default();
    let not_ready: Vec<&str> = names
        .iter()
        .copied()
        .filter(|name| !statuses.iter().any(|s| s.name == *name && s.ready))
        .collect();
    if !not_ready.is_empty() {
        return Err(Error::verification(
            DNS_CONTAINERS_CHECK,
            format!("containers not ready: {}", not_ready.join(", ")),
        ));
    }
    Ok(())
}
