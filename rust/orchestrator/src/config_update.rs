//! Computes the configuration changes that accompany enabling or disabling Kerberos

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use snafu::{ResultExt, Snafu};

use crate::{
    auth_to_local::AuthToLocalBuilder,
    descriptor::{ConfigurationDescriptor, KerberosDescriptor},
    identity::{template_configurations, ResolvedIdentity},
    template::{self, HostScope, TemplateExpander},
    topology::{Cluster, Configurations},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to expand the value of {config_type}/{property}"))]
    ExpandProperty {
        source: template::Error,
        config_type: String,
        property: String,
    },
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Changes to apply to the cluster's desired configurations
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConfigUpdate {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub set: Configurations,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub remove: BTreeMap<String, BTreeSet<String>>,
}

impl ConfigUpdate {
    fn set(&mut self, config_type: &str, property: &str, value: String) {
        self.set
            .entry(config_type.to_string())
            .or_default()
            .insert(property.to_string(), value);
    }

    fn remove(&mut self, config_type: &str, property: &str) {
        self.remove
            .entry(config_type.to_string())
            .or_default()
            .insert(property.to_string());
    }
}

/// Splits a `config-type/property` path
pub fn split_configuration_path(path: &str) -> Option<(&str, &str)> {
    path.split_once('/')
        .filter(|(config_type, property)| !config_type.is_empty() && !property.is_empty())
}

/// The updates that enable Kerberos: the descriptor's configuration blocks for every installed service
/// and component, where each identity's principal and keytab are written, and generated `auth_to_local` rules
pub fn kerberos_enabled_updates(
    cluster: &Cluster,
    descriptor: &KerberosDescriptor,
    identities: &[ResolvedIdentity],
    realm: &str,
) -> Result<ConfigUpdate> {
    let configurations = template_configurations(cluster, descriptor, None);
    let expander = TemplateExpander::new(realm, &configurations);
    let mut update = ConfigUpdate::default();

    let mut configuration_blocks: Vec<&ConfigurationDescriptor> =
        descriptor.configurations.iter().collect();
    let mut auth_to_local_properties: BTreeSet<&str> = descriptor
        .auth_to_local_properties
        .iter()
        .map(String::as_str)
        .collect();
    for (service_name, service) in &descriptor.services {
        if !cluster.services.contains_key(service_name) {
            continue;
        }
        configuration_blocks.extend(&service.configurations);
        auth_to_local_properties.extend(service.auth_to_local_properties.iter().map(String::as_str));
        for (component_name, component) in &service.components {
            if cluster.is_component_installed(service_name, component_name) {
                configuration_blocks.extend(&component.configurations);
                auth_to_local_properties
                    .extend(component.auth_to_local_properties.iter().map(String::as_str));
            }
        }
    }

    for block in configuration_blocks {
        for (config_type, properties) in block {
            for (property, value) in properties {
                let value = expander
                    .expand(value, HostScope::Preserve)
                    .context(ExpandPropertySnafu {
                        config_type,
                        property,
                    })?;
                update.set(config_type, property, value);
            }
        }
    }

    let mut auth_to_local = AuthToLocalBuilder::default();
    for identity in identities {
        if let Some(principal) = &identity.principal {
            if let Some(path) = &principal.configuration {
                set_identity_property(&mut update, path, principal.configured_value.clone());
            }
            if let Some(local_username) = &principal.local_username {
                auth_to_local.add_rule(&principal.configured_value, local_username, realm);
            }
        }
        if let Some(keytab) = &identity.keytab {
            if let Some(path) = &keytab.configuration {
                set_identity_property(&mut update, path, keytab.file.clone());
            }
        }
    }

    if !auth_to_local_properties.is_empty() {
        let rules = auth_to_local.generate(realm);
        for path in auth_to_local_properties {
            set_identity_property(&mut update, path, rules.clone());
        }
    }

    Ok(update)
}

/// The updates that disable Kerberos: every property that an identity's principal or keytab was written to is removed
pub fn kerberos_disabled_updates(identities: &[ResolvedIdentity]) -> ConfigUpdate {
    let mut update = ConfigUpdate::default();
    let paths = identities.iter().flat_map(|identity| {
        let principal_path = identity
            .principal
            .as_ref()
            .and_then(|principal| principal.configuration.as_deref());
        let keytab_path = identity
            .keytab
            .as_ref()
            .and_then(|keytab| keytab.configuration.as_deref());
        principal_path.into_iter().chain(keytab_path)
    });
    for path in paths {
        match split_configuration_path(path) {
            Some((config_type, property)) => update.remove(config_type, property),
            None => tracing::warn!(path, "ignoring malformed configuration path"),
        }
    }
    update
}

fn set_identity_property(update: &mut ConfigUpdate, path: &str, value: String) {
    match split_configuration_path(path) {
        Some((config_type, property)) => update.set(config_type, property, value),
        None => tracing::warn!(path, "ignoring malformed configuration path"),
    }
}
