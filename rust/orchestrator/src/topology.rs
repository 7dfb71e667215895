//! Snapshot of the cluster topology that the orchestrator plans against

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
};

use serde::{Deserialize, Serialize};

use crate::session::ClusterSession;

pub const KERBEROS_SERVICE: &str = "KERBEROS";
pub const KERBEROS_CLIENT_COMPONENT: &str = "KERBEROS_CLIENT";

pub const KERBEROS_ENV: &str = "kerberos-env";
pub const KRB5_CONF: &str = "krb5-conf";
pub const CLUSTER_ENV: &str = "cluster-env";

/// `cluster-env` property holding the default realm
pub const KERBEROS_DOMAIN_PROPERTY: &str = "kerberos_domain";

/// A flat set of configuration properties
pub type Properties = BTreeMap<String, String>;

/// Configuration properties, keyed by configuration type (such as `core-site`)
pub type Configurations = BTreeMap<String, Properties>;

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityType {
    #[default]
    None,
    Kerberos,
}

/// Security state of a service or service component host
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityState {
    #[default]
    Unsecured,
    Securing,
    SecuredKerberos,
    Unsecuring,
}

impl SecurityState {
    pub fn is_transitional(self) -> bool {
        matches!(self, Self::Securing | Self::Unsecuring)
    }

    /// The transitional state that is passed through on the way to `self`
    pub fn transitional_towards(self) -> Option<Self> {
        match self {
            Self::SecuredKerberos => Some(Self::Securing),
            Self::Unsecured => Some(Self::Unsecuring),
            Self::Securing | Self::Unsecuring => None,
        }
    }
}

/// Lifecycle state of a service component host
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    #[default]
    Init,
    Installing,
    InstallFailed,
    Installed,
    Starting,
    Started,
    Stopping,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StackId {
    pub name: String,
    pub version: String,
}

impl Display for StackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

/// An instance of a service component on a specific host
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceComponentHost {
    pub service: String,
    pub component: String,
    #[serde(default)]
    pub state: State,
    #[serde(default)]
    pub security_state: SecurityState,
    #[serde(default)]
    pub desired_security_state: SecurityState,
}

impl ServiceComponentHost {
    pub fn is_kerberos_client(&self) -> bool {
        self.service == KERBEROS_SERVICE && self.component == KERBEROS_CLIENT_COMPONENT
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    #[serde(default)]
    pub components: Vec<ServiceComponentHost>,
    /// Host-level configuration overrides, layered on top of the cluster's desired configurations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config_overrides: Configurations,
}

impl Host {
    pub fn component(&self, service: &str, component: &str) -> Option<&ServiceComponentHost> {
        self.components
            .iter()
            .find(|sch| sch.service == service && sch.component == component)
    }

    pub fn component_mut(
        &mut self,
        service: &str,
        component: &str,
    ) -> Option<&mut ServiceComponentHost> {
        self.components
            .iter_mut()
            .find(|sch| sch.service == service && sch.component == component)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(default)]
    pub security_state: SecurityState,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub name: String,
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub security_type: SecurityType,
    pub stack: StackId,
    #[serde(default)]
    pub services: BTreeMap<String, Service>,
    #[serde(default)]
    pub hosts: BTreeMap<String, Host>,
    #[serde(default)]
    pub desired_configs: Configurations,
    #[serde(default)]
    pub session: ClusterSession,
}

impl Cluster {
    pub fn desired_config_by_type(&self, config_type: &str) -> Option<&Properties> {
        self.desired_configs.get(config_type)
    }

    /// The configurations in effect on `host` (or cluster-wide if no host is given),
    /// with host-level overrides taking precedence over the cluster's desired configurations
    pub fn effective_configurations(&self, host: Option<&str>) -> Configurations {
        let mut configurations = self.desired_configs.clone();
        if let Some(host) = host.and_then(|host| self.hosts.get(host)) {
            for (config_type, overrides) in &host.config_overrides {
                configurations
                    .entry(config_type.clone())
                    .or_default()
                    .extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        configurations
    }

    /// The cluster's default realm, as configured in `cluster-env/kerberos_domain`
    pub fn default_realm(&self) -> Option<&str> {
        self.desired_config_by_type(CLUSTER_ENV)?
            .get(KERBEROS_DOMAIN_PROPERTY)
            .map(|realm| realm.trim())
            .filter(|realm| !realm.is_empty())
    }

    pub fn is_kerberos_enabled(&self) -> bool {
        self.security_type == SecurityType::Kerberos
    }

    /// Whether any host runs the `component` of `service`
    pub fn is_component_installed(&self, service: &str, component: &str) -> bool {
        self.hosts
            .values()
            .any(|host| host.component(service, component).is_some())
    }

    /// Hosts that can receive keytabs, because their Kerberos client has been installed
    pub fn hosts_with_valid_kerberos_client(&self) -> BTreeSet<String> {
        self.hosts
            .iter()
            .filter(|(host_name, host)| {
                let valid = host.components.iter().any(|sch| {
                    sch.is_kerberos_client() && matches!(sch.state, State::Installed | State::Started)
                });
                if !valid {
                    tracing::debug!(host = %host_name, "skipping host without an installed Kerberos client");
                }
                valid
            })
            .map(|(host_name, _)| host_name.clone())
            .collect()
    }
}
