//! Materializes descriptor identities into concrete principals and keytabs for each host

use serde::Serialize;
use snafu::{ResultExt, Snafu};

use crate::{
    descriptor::{
        resolver::FilteredIdentity, IdentityDescriptor, KerberosDescriptor, PrincipalType,
    },
    template::{self, HostScope, TemplateExpander},
    topology::{Cluster, Configurations, ServiceComponentHost},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "failed to expand identity {identity:?} of {service}/{component} on host {host:?}"
    ))]
    ExpandIdentity {
        source: template::Error,
        identity: String,
        service: String,
        component: String,
        host: String,
    },
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPrincipal {
    /// The principal, as bound to the host
    pub value: String,
    /// The principal with host references left in place, as written to the service's configuration
    pub configured_value: String,
    pub principal_type: PrincipalType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedKeytab {
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_access: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_access: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
    pub cachable: bool,
}

/// An identity, bound to the service component host that needs it
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedIdentity {
    pub host: String,
    pub service: String,
    pub component: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<ResolvedPrincipal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keytab: Option<ResolvedKeytab>,
}

/// Materializes `selection` for every service component host accepted by `include`
///
/// Identities shared between components are emitted once per component, since each may write its
/// own configuration properties. The pipeline deduplicates the KDC and keytab work.
pub fn resolve_identities(
    cluster: &Cluster,
    descriptor: &KerberosDescriptor,
    selection: &[FilteredIdentity],
    realm: &str,
    mut include: impl FnMut(&str, &ServiceComponentHost) -> bool,
) -> Result<Vec<ResolvedIdentity>> {
    let mut resolved = Vec::new();
    for (host_name, host) in &cluster.hosts {
        let configurations = template_configurations(cluster, descriptor, Some(host_name));
        let expander = TemplateExpander::new(realm, &configurations);
        for sch in &host.components {
            if !include(host_name, sch) {
                continue;
            }
            for identity in applicable_identities(selection, sch) {
                let identity = resolve_identity(&expander, host_name, sch, identity)
                    .context(ExpandIdentitySnafu {
                        identity: &identity.name,
                        service: &sch.service,
                        component: &sch.component,
                        host: host_name,
                    })?;
                resolved.push(identity);
            }
        }
    }
    Ok(resolved)
}

/// The configurations that templates are expanded against: the host's effective configurations,
/// plus the descriptor's own properties under the empty configuration type
pub fn template_configurations(
    cluster: &Cluster,
    descriptor: &KerberosDescriptor,
    host: Option<&str>,
) -> Configurations {
    let mut configurations = cluster.effective_configurations(host);
    configurations.insert(String::new(), descriptor.properties.clone());
    configurations
}

/// The identities of `selection` that apply to `sch`, where component-level identities replace
/// service-level identities of the same name
fn applicable_identities<'a>(
    selection: &'a [FilteredIdentity],
    sch: &ServiceComponentHost,
) -> Vec<&'a IdentityDescriptor> {
    let (component_level, service_level): (Vec<_>, Vec<_>) = selection
        .iter()
        .filter(|filtered| filtered.applies_to(&sch.service, &sch.component))
        .partition(|filtered| filtered.component.is_some());
    let mut identities = service_level
        .into_iter()
        .map(|filtered| &filtered.identity)
        .filter(|identity| {
            !component_level
                .iter()
                .any(|overriding| overriding.identity.name == identity.name)
        })
        .collect::<Vec<_>>();
    identities.extend(component_level.into_iter().map(|filtered| &filtered.identity));
    identities
}

fn resolve_identity(
    expander: &TemplateExpander,
    host: &str,
    sch: &ServiceComponentHost,
    identity: &IdentityDescriptor,
) -> Result<ResolvedIdentity, template::Error> {
    let host_scope = HostScope::Host(host);
    let expand = |template: &Option<String>| {
        template
            .as_deref()
            .map(|template| expander.expand(template, host_scope))
            .transpose()
    };

    let principal = match &identity.principal {
        Some(principal) => match &principal.value {
            Some(value) => Some(ResolvedPrincipal {
                value: expander.expand(value, host_scope)?,
                configured_value: expander.expand(value, HostScope::Preserve)?,
                principal_type: principal.principal_type.unwrap_or_default(),
                local_username: expand(&principal.local_username)?,
                configuration: principal.configuration.clone(),
            }),
            None => None,
        },
        None => None,
    };
    let keytab = match &identity.keytab {
        Some(keytab) => match &keytab.file {
            Some(file) => Some(ResolvedKeytab {
                file: expander.expand(file, host_scope)?,
                owner_name: expand(&keytab.owner.name)?,
                owner_access: keytab.owner.access.clone(),
                group_name: expand(&keytab.group.name)?,
                group_access: keytab.group.access.clone(),
                configuration: keytab.configuration.clone(),
                cachable: keytab.cachable.unwrap_or(true),
            }),
            None => None,
        },
        None => None,
    };

    Ok(ResolvedIdentity {
        host: host.to_string(),
        service: sch.service.clone(),
        component: sch.component.clone(),
        name: identity.name.clone(),
        principal,
        keytab,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{descriptor::resolver::filter_identities, testing};

    #[test]
    fn resolve_identities_should_bind_hosts() {
        let cluster = testing::cluster();
        let descriptor = testing::descriptor();
        let selection = filter_identities(&descriptor, None, None);
        let identities =
            resolve_identities(&cluster, &descriptor, &selection, "EXAMPLE.COM", |_, _| true)
                .unwrap();

        let identity1a = identities
            .iter()
            .find(|identity| identity.name == "identity1a")
            .unwrap();
        assert_eq!(identity1a.host, "host1");
        assert_eq!((identity1a.service.as_str(), identity1a.component.as_str()), ("SERVICE1", "COMPONENT1"));
        let principal = identity1a.principal.as_ref().unwrap();
        assert_eq!(principal.value, "component1/host1@EXAMPLE.COM");
        assert_eq!(principal.configured_value, "component1/_HOST@EXAMPLE.COM");
        assert_eq!(principal.local_username.as_deref(), Some("service1"));
        let keytab = identity1a.keytab.as_ref().unwrap();
        assert_eq!(keytab.file, "/etc/security/keytabs/component1.service.keytab");
        assert_eq!(keytab.owner_name.as_deref(), Some("service1"));
        assert_eq!(keytab.group_name.as_deref(), Some("hadoop"));
        assert!(keytab.cachable);
    }

    #[test]
    fn resolve_identities_should_respect_include() {
        let cluster = testing::cluster();
        let descriptor = testing::descriptor();
        let selection = filter_identities(&descriptor, None, None);
        let identities = resolve_identities(
            &cluster,
            &descriptor,
            &selection,
            "EXAMPLE.COM",
            |host, sch| host == "host1" && sch.service == "SERVICE2",
        )
        .unwrap();
        assert_eq!(
            identities
                .iter()
                .map(|identity| identity.name.as_str())
                .collect::<Vec<_>>(),
            vec!["identity2"]
        );
    }

    #[test]
    fn shared_identities_are_emitted_per_component() {
        let cluster = testing::cluster();
        let mut descriptor = testing::descriptor();
        // both components of host1 now share the same principal and keytab
        let shared = descriptor.services["SERVICE1"].components["COMPONENT1"].identities[0].clone();
        descriptor
            .services
            .get_mut("SERVICE2")
            .unwrap()
            .components
            .get_mut("COMPONENT2")
            .unwrap()
            .identities = vec![shared];
        let selection = filter_identities(&descriptor, None, None);
        let identities =
            resolve_identities(&cluster, &descriptor, &selection, "EXAMPLE.COM", |host, _| host == "host1")
                .unwrap();
        let shared = identities
            .iter()
            .filter(|identity| identity.name == "identity1a")
            .map(|identity| identity.service.as_str())
            .collect::<Vec<_>>();
        assert_eq!(shared, vec!["SERVICE1", "SERVICE2"]);
    }
}
