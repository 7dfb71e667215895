//! Plans and commits the security state transitions of a Kerberos toggle
//!
//! A toggle first computes a [`SecurityStatePlan`] against an unmodified cluster, which is validated
//! as a whole. Only then is it applied, so that a failing toggle leaves every state untouched.

use std::collections::BTreeMap;

use snafu::{ensure, OptionExt, Snafu};

use crate::topology::{Cluster, SecurityState, SecurityType, ServiceComponentHost};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("component {service}/{component} is not installed on host {host:?}"))]
    MissingComponent {
        host: String,
        service: String,
        component: String,
    },

    #[snafu(display(
        "component {service}/{component} on host {host:?} is {actual}, but the transition expects {expected}"
    ))]
    UnexpectedState {
        host: String,
        service: String,
        component: String,
        expected: SecurityState,
        actual: SecurityState,
    },

    #[snafu(display("{current} is not a valid transitional state towards {desired}"))]
    InvalidTransition {
        desired: SecurityState,
        current: SecurityState,
    },

    #[snafu(display("service {service} is not installed"))]
    MissingService { service: String },
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ComponentKey {
    pub host: String,
    pub service: String,
    pub component: String,
}

impl ComponentKey {
    pub fn matches(&self, host: &str, sch: &ServiceComponentHost) -> bool {
        self.host == host && self.service == sch.service && self.component == sch.component
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentTransition {
    pub key: ComponentKey,
    /// The security state (both current and desired) that the component is expected to be in
    pub from: SecurityState,
    pub desired: SecurityState,
    pub current: SecurityState,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecurityStatePlan {
    pub target: SecurityType,
    pub components: Vec<ComponentTransition>,
    pub services: BTreeMap<String, SecurityState>,
}

/// Plans the transitions of every service component host towards `target`
///
/// Kerberos clients are never transitioned. Components that are not currently in the source state
/// (`UNSECURED` when enabling, `SECURED_KERBEROS` when disabling) are left alone.
pub fn plan_toggle(cluster: &Cluster, target: SecurityType) -> SecurityStatePlan {
    let (from, desired) = match target {
        SecurityType::Kerberos => (SecurityState::Unsecured, SecurityState::SecuredKerberos),
        SecurityType::None => (SecurityState::SecuredKerberos, SecurityState::Unsecured),
    };
    let current = desired.transitional_towards().unwrap_or(desired);

    let mut components = Vec::new();
    for (host_name, host) in &cluster.hosts {
        for sch in &host.components {
            if sch.is_kerberos_client() {
                continue;
            }
            if sch.security_state != from || sch.desired_security_state != from {
                tracing::debug!(
                    host = %host_name,
                    service = %sch.service,
                    component = %sch.component,
                    security_state = %sch.security_state,
                    desired_security_state = %sch.desired_security_state,
                    "leaving component alone"
                );
                continue;
            }
            components.push(ComponentTransition {
                key: ComponentKey {
                    host: host_name.clone(),
                    service: sch.service.clone(),
                    component: sch.component.clone(),
                },
                from,
                desired,
                current,
            });
        }
    }
    let services = cluster
        .services
        .keys()
        .map(|service| (service.clone(), desired))
        .collect();

    SecurityStatePlan {
        target,
        components,
        services,
    }
}

impl SecurityStatePlan {
    pub fn includes(&self, host: &str, sch: &ServiceComponentHost) -> bool {
        self.components
            .iter()
            .any(|transition| transition.key.matches(host, sch))
    }

    /// Checks that every planned transition is well-formed and still applies to `cluster`
    pub fn validate(&self, cluster: &Cluster) -> Result<()> {
        for transition in &self.components {
            let ComponentKey {
                host,
                service,
                component,
            } = &transition.key;
            let sch = cluster
                .hosts
                .get(host)
                .and_then(|h| h.component(service, component))
                .context(MissingComponentSnafu {
                    host,
                    service,
                    component,
                })?;
            for actual in [sch.security_state, sch.desired_security_state] {
                ensure!(
                    actual == transition.from,
                    UnexpectedStateSnafu {
                        host,
                        service,
                        component,
                        expected: transition.from,
                        actual,
                    }
                );
            }
            ensure!(
                !transition.desired.is_transitional()
                    && transition.desired.transitional_towards() == Some(transition.current),
                InvalidTransitionSnafu {
                    desired: transition.desired,
                    current: transition.current,
                }
            );
        }
        for service in self.services.keys() {
            ensure!(
                cluster.services.contains_key(service),
                MissingServiceSnafu { service }
            );
        }
        Ok(())
    }

    /// Commits the plan to `cluster`
    ///
    /// The plan must have been [validated](Self::validate) against the same cluster.
    pub fn apply(&self, cluster: &mut Cluster) {
        for transition in &self.components {
            let key = &transition.key;
            if let Some(sch) = cluster
                .hosts
                .get_mut(&key.host)
                .and_then(|host| host.component_mut(&key.service, &key.component))
            {
                sch.desired_security_state = transition.desired;
                sch.security_state = transition.current;
            }
        }
        for (service_name, state) in &self.services {
            if let Some(service) = cluster.services.get_mut(service_name) {
                service.security_state = *state;
            }
        }
        cluster.security_type = self.target;
        tracing::info!(
            cluster.name = %cluster.name,
            security_type = %self.target,
            components = self.components.len(),
            "committed security state transitions"
        );
    }
}
