//! The Kerberos descriptor: which identities each service and component needs, and how the cluster's
//! configuration has to change once Kerberos is enabled

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

pub mod resolver;

/// Maximum depth of chained identity references
const MAX_REFERENCE_DEPTH: usize = 8;

/// Configuration blocks, keyed by configuration type and then property name
pub type ConfigurationDescriptor = BTreeMap<String, BTreeMap<String, String>>;

/// Selects which services (and which of their components) to operate on
///
/// A service mapped to [`None`] selects all of its components. Services that are absent are excluded.
pub type ServiceComponentFilter = BTreeMap<String, Option<BTreeSet<String>>>;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KerberosDescriptor {
    pub properties: BTreeMap<String, String>,
    pub identities: Vec<IdentityDescriptor>,
    pub configurations: Vec<ConfigurationDescriptor>,
    pub auth_to_local_properties: Vec<String>,
    #[serde(with = "named")]
    pub services: BTreeMap<String, ServiceDescriptor>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    #[serde(default)]
    pub identities: Vec<IdentityDescriptor>,
    #[serde(default)]
    pub configurations: Vec<ConfigurationDescriptor>,
    #[serde(default)]
    pub auth_to_local_properties: Vec<String>,
    #[serde(default, with = "named")]
    pub components: BTreeMap<String, ComponentDescriptor>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    pub name: String,
    #[serde(default)]
    pub identities: Vec<IdentityDescriptor>,
    #[serde(default)]
    pub configurations: Vec<ConfigurationDescriptor>,
    #[serde(default)]
    pub auth_to_local_properties: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityDescriptor {
    pub name: String,
    /// Path of another identity to inherit from, such as `/spnego` or `/HDFS/NAMENODE/hdfs`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<PrincipalDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keytab: Option<KeytabDescriptor>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalType {
    #[default]
    Service,
    User,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub principal_type: Option<PrincipalType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_username: Option<String>,
    /// The `config-type/property` that the principal is written to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeytabDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "KeytabAccess::is_empty")]
    pub owner: KeytabAccess,
    #[serde(default, skip_serializing_if = "KeytabAccess::is_empty")]
    pub group: KeytabAccess,
    /// The `config-type/property` that the keytab path is written to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cachable: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeytabAccess {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
}

impl KeytabAccess {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.access.is_none()
    }

    fn inherit(&mut self, parent: &Self) {
        inherit_option(&mut self.name, &parent.name);
        inherit_option(&mut self.access, &parent.access);
    }
}

impl PrincipalDescriptor {
    fn inherit(&mut self, parent: &Self) {
        inherit_option(&mut self.value, &parent.value);
        inherit_option(&mut self.principal_type, &parent.principal_type);
        inherit_option(&mut self.local_username, &parent.local_username);
        inherit_option(&mut self.configuration, &parent.configuration);
    }
}

impl KeytabDescriptor {
    fn inherit(&mut self, parent: &Self) {
        inherit_option(&mut self.file, &parent.file);
        self.owner.inherit(&parent.owner);
        self.group.inherit(&parent.group);
        inherit_option(&mut self.configuration, &parent.configuration);
        inherit_option(&mut self.cachable, &parent.cachable);
    }
}

fn inherit_option<T: Clone>(value: &mut Option<T>, parent: &Option<T>) {
    if value.is_none() {
        value.clone_from(parent);
    }
}

impl IdentityDescriptor {
    /// The path of the identity that this identity refers to, if any
    ///
    /// Identities may either name their referent explicitly, or be named after it (`"name": "/spnego"`).
    pub fn reference_path(&self) -> Option<&str> {
        self.reference
            .as_deref()
            .or_else(|| self.name.starts_with('/').then_some(self.name.as_str()))
    }

    /// Whether the identity carries neither a principal nor a keytab, and thus requires no action
    pub fn is_empty(&self) -> bool {
        self.principal.is_none() && self.keytab.is_none()
    }

    /// Fills in everything that `self` leaves unset from `parent`
    fn inherit(&mut self, parent: &Self) {
        match (&mut self.principal, &parent.principal) {
            (Some(principal), Some(parent)) => principal.inherit(parent),
            (principal, parent) => inherit_option(principal, parent),
        }
        match (&mut self.keytab, &parent.keytab) {
            (Some(keytab), Some(parent)) => keytab.inherit(parent),
            (keytab, parent) => inherit_option(keytab, parent),
        }
    }
}

impl KerberosDescriptor {
    /// Looks up an identity by path: `/name` (cluster-wide), `/SERVICE/name`, or `/SERVICE/COMPONENT/name`
    pub fn identity_by_path(&self, path: &str) -> Option<&IdentityDescriptor> {
        let segments = path.strip_prefix('/')?.split('/').collect::<Vec<_>>();
        let identities = match segments.as_slice() {
            [_] => &self.identities,
            [service, _] => &self.services.get(*service)?.identities,
            [service, component, _] => {
                &self
                    .services
                    .get(*service)?
                    .components
                    .get(*component)?
                    .identities
            }
            _ => return None,
        };
        let name = segments.last()?;
        identities.iter().find(|identity| identity.name == *name)
    }

    /// Resolves `identity`'s chain of references, so that it carries everything that it inherits
    ///
    /// Dangling references are ignored, the identity then only carries what it declares itself.
    pub fn dereference(&self, identity: &IdentityDescriptor) -> IdentityDescriptor {
        let mut resolved = identity.clone();
        let mut visited = BTreeSet::new();
        let mut next = identity.reference_path();
        while let Some(path) = next {
            if visited.len() >= MAX_REFERENCE_DEPTH || !visited.insert(path) {
                tracing::warn!(identity.name = %identity.name, path, "identity reference cycle");
                break;
            }
            let Some(parent) = self.identity_by_path(path) else {
                tracing::warn!(identity.name = %identity.name, path, "dangling identity reference");
                break;
            };
            resolved.inherit(parent);
            next = parent.reference_path();
        }
        resolved
    }

    /// The identities that apply to every host running any component of `service`
    pub fn service_identities(&self, service: &str) -> Vec<IdentityDescriptor> {
        self.services
            .get(service)
            .map(|service| self.dereference_all(&service.identities))
            .unwrap_or_default()
    }

    /// The identities of `component`, combined with those inherited from its service
    ///
    /// A component-level identity replaces a service-level identity of the same name.
    pub fn component_identities(&self, service: &str, component: &str) -> Vec<IdentityDescriptor> {
        let mut identities = self.service_identities(service);
        let component_identities = self
            .services
            .get(service)
            .and_then(|service| service.components.get(component))
            .map(|component| self.dereference_all(&component.identities))
            .unwrap_or_default();
        identities.retain(|identity| {
            !component_identities
                .iter()
                .any(|overriding| overriding.name == identity.name)
        });
        identities.extend(component_identities);
        identities
    }

    fn dereference_all(&self, identities: &[IdentityDescriptor]) -> Vec<IdentityDescriptor> {
        identities
            .iter()
            .map(|identity| self.dereference(identity))
            .collect()
    }
}

/// (De)serializes a map of named descriptors as a list, keyed by each entry's name
mod named {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub trait Named {
        fn name(&self) -> &str;
    }

    impl Named for super::ServiceDescriptor {
        fn name(&self) -> &str {
            &self.name
        }
    }

    impl Named for super::ComponentDescriptor {
        fn name(&self) -> &str {
            &self.name
        }
    }

    pub fn serialize<S: Serializer, T: Serialize>(
        items: &BTreeMap<String, T>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(items.values())
    }

    pub fn deserialize<'de, D: Deserializer<'de>, T: Deserialize<'de> + Named>(
        deserializer: D,
    ) -> Result<BTreeMap<String, T>, D::Error> {
        let items = Vec::<T>::deserialize(deserializer)?;
        Ok(items
            .into_iter()
            .map(|item| (item.name().to_string(), item))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> KerberosDescriptor {
        serde_json::from_value(serde_json::json!({
            "properties": {"keytab_dir": "/etc/security/keytabs"},
            "identities": [
                {
                    "name": "spnego",
                    "principal": {"value": "HTTP/_HOST@${realm}", "type": "service"},
                    "keytab": {
                        "file": "${keytab_dir}/spnego.service.keytab",
                        "owner": {"name": "root", "access": "r"},
                        "group": {"name": "${cluster-env/user_group}", "access": "r"}
                    }
                }
            ],
            "services": [
                {
                    "name": "SERVICE1",
                    "identities": [
                        {"name": "/spnego"},
                        {"name": "service1_user", "principal": {"value": "s1@${realm}", "type": "user"}}
                    ],
                    "components": [
                        {
                            "name": "COMPONENT1",
                            "identities": [
                                {
                                    "name": "service1_user",
                                    "principal": {"value": "c1@${realm}", "type": "user"}
                                },
                                {
                                    "name": "component1_web",
                                    "reference": "/spnego",
                                    "principal": {"configuration": "service1-site/web.principal"}
                                }
                            ]
                        },
                        {"name": "COMPONENT2"}
                    ]
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn services_deserialize_from_named_lists() {
        let descriptor = descriptor();
        assert_eq!(
            descriptor.services.keys().collect::<Vec<_>>(),
            vec!["SERVICE1"]
        );
        assert_eq!(
            descriptor.services["SERVICE1"]
                .components
                .keys()
                .collect::<Vec<_>>(),
            vec!["COMPONENT1", "COMPONENT2"]
        );
        let reserialized = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(reserialized["services"][0]["name"], "SERVICE1");
        assert_eq!(
            serde_json::from_value::<KerberosDescriptor>(reserialized).unwrap(),
            descriptor
        );
    }

    #[test]
    fn empty_descriptor_is_valid() {
        assert_eq!(
            serde_json::from_value::<KerberosDescriptor>(serde_json::json!({})).unwrap(),
            KerberosDescriptor::default()
        );
    }

    #[test]
    fn identity_by_path_should_work() {
        let descriptor = descriptor();
        assert_eq!(
            descriptor.identity_by_path("/spnego").unwrap().name,
            "spnego"
        );
        assert_eq!(
            descriptor
                .identity_by_path("/SERVICE1/service1_user")
                .unwrap()
                .name,
            "service1_user"
        );
        assert_eq!(
            descriptor
                .identity_by_path("/SERVICE1/COMPONENT1/component1_web")
                .unwrap()
                .name,
            "component1_web"
        );
        assert_eq!(descriptor.identity_by_path("/SERVICE2/foo"), None);
        assert_eq!(descriptor.identity_by_path("spnego"), None);
    }

    #[test]
    fn references_inherit_missing_fields() {
        let descriptor = descriptor();
        let web = descriptor
            .component_identities("SERVICE1", "COMPONENT1")
            .into_iter()
            .find(|identity| identity.name == "component1_web")
            .unwrap();
        let principal = web.principal.unwrap();
        assert_eq!(principal.value.as_deref(), Some("HTTP/_HOST@${realm}"));
        assert_eq!(
            principal.configuration.as_deref(),
            Some("service1-site/web.principal")
        );
        assert_eq!(
            web.keytab.unwrap().file.as_deref(),
            Some("${keytab_dir}/spnego.service.keytab")
        );
    }

    #[test]
    fn component_identities_override_service_identities() {
        let descriptor = descriptor();
        let identities = descriptor.component_identities("SERVICE1", "COMPONENT1");
        assert_eq!(
            identities
                .iter()
                .map(|identity| identity.name.as_str())
                .collect::<Vec<_>>(),
            vec!["/spnego", "service1_user", "component1_web"]
        );
        let user = identities
            .iter()
            .find(|identity| identity.name == "service1_user")
            .unwrap();
        assert_eq!(
            user.principal.as_ref().unwrap().value.as_deref(),
            Some("c1@${realm}")
        );

        // components without identities of their own still inherit the service's identities
        assert_eq!(
            descriptor
                .component_identities("SERVICE1", "COMPONENT2")
                .len(),
            2
        );
        assert!(descriptor.component_identities("SERVICE9", "X").is_empty());
    }
}
