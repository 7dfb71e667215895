//! Locates the Kerberos descriptor that applies to a cluster, and selects identities from it

use std::{
    fmt::{Debug, Display},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use snafu::{OptionExt, ResultExt, Snafu};

use super::{IdentityDescriptor, KerberosDescriptor, ServiceComponentFilter};
use crate::topology::{Cluster, StackId};

/// Name of the cluster-scoped artifact that overrides the stack's default descriptor
pub const KERBEROS_DESCRIPTOR_ARTIFACT: &str = "kerberos_descriptor";

/// File name of a stack's default descriptor, inside `<stack name>/<stack version>/`
pub const STACK_DESCRIPTOR_FILE_NAME: &str = "kerberos.json";

/// Source of Kerberos descriptors
#[async_trait]
pub trait DescriptorProvider: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// The stored data of the cluster's [`KERBEROS_DESCRIPTOR_ARTIFACT`], if one exists
    async fn cluster_artifact(
        &self,
        cluster_name: &str,
    ) -> Result<Option<serde_json::Value>, Self::Error>;

    /// The default descriptor of `stack`, if the stack defines one
    async fn stack_descriptor(&self, stack: &StackId)
    -> Result<Option<KerberosDescriptor>, Self::Error>;
}

pub struct DynError(Box<dyn std::error::Error + Send + Sync>);

impl Debug for DynError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Display for DynError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl std::error::Error for DynError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

fn dyn_error<E: std::error::Error + Send + Sync + 'static>(err: E) -> DynError {
    DynError(Box::new(err))
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to look up the {KERBEROS_DESCRIPTOR_ARTIFACT} artifact of cluster {cluster:?}"))]
    QueryArtifact { source: DynError, cluster: String },

    #[snafu(display("failed to parse the {KERBEROS_DESCRIPTOR_ARTIFACT} artifact of cluster {cluster:?}"))]
    ParseArtifact {
        source: serde_json::Error,
        cluster: String,
    },

    #[snafu(display("failed to look up the default Kerberos descriptor of stack {stack}"))]
    QueryStackDescriptor { source: DynError, stack: StackId },

    #[snafu(display("stack {stack} does not define a Kerberos descriptor"))]
    NoStackDescriptor { stack: StackId },
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Returns the Kerberos descriptor that applies to `cluster`
///
/// A cluster-scoped artifact always wins over the stack's default descriptor, even if it is empty.
#[tracing::instrument(skip(provider, cluster), fields(cluster.name = %cluster.name, stack = %cluster.stack))]
pub async fn resolve_descriptor<P: DescriptorProvider + ?Sized>(
    provider: &P,
    cluster: &Cluster,
) -> Result<KerberosDescriptor> {
    let artifact = provider
        .cluster_artifact(&cluster.name)
        .await
        .map_err(dyn_error)
        .context(QueryArtifactSnafu {
            cluster: &cluster.name,
        })?;
    if let Some(data) = artifact {
        tracing::info!("using the cluster's Kerberos descriptor artifact");
        return serde_json::from_value(data).context(ParseArtifactSnafu {
            cluster: &cluster.name,
        });
    }
    tracing::info!("using the stack's default Kerberos descriptor");
    provider
        .stack_descriptor(&cluster.stack)
        .await
        .map_err(dyn_error)
        .context(QueryStackDescriptorSnafu {
            stack: cluster.stack.clone(),
        })?
        .context(NoStackDescriptorSnafu {
            stack: cluster.stack.clone(),
        })
}

/// An identity selected by [`filter_identities`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilteredIdentity {
    pub service: String,
    /// [`None`] for service-level identities, which apply to every component of the service
    pub component: Option<String>,
    pub identity: IdentityDescriptor,
}

impl FilteredIdentity {
    pub fn applies_to(&self, service: &str, component: &str) -> bool {
        self.service == service
            && self
                .component
                .as_deref()
                .map_or(true, |filtered| filtered == component)
    }
}

/// Selects the identities of the services and components that pass `service_component_filter`,
/// keeping only identities whose name is in `identity_filter`
///
/// A missing filter, or an empty name filter, selects everything. Identity references are resolved, and empty identities are skipped.
pub fn filter_identities(
    descriptor: &KerberosDescriptor,
    service_component_filter: Option<&ServiceComponentFilter>,
    identity_filter: Option<&[String]>,
) -> Vec<FilteredIdentity> {
    // an empty name filter restricts nothing
    let identity_filter = identity_filter.filter(|filter| !filter.is_empty());
    let identity_selected = |identity: &IdentityDescriptor| {
        !identity.is_empty()
            && identity_filter.map_or(true, |filter| filter.contains(&identity.name))
    };
    let mut selected = Vec::new();
    for (service_name, service) in &descriptor.services {
        let component_filter = match service_component_filter {
            None => None,
            Some(filter) => match filter.get(service_name) {
                None => continue,
                Some(components) => components.as_ref(),
            },
        };
        match component_filter {
            // each component inherits its service's identities on its own
            None => {
                for identity in descriptor.service_identities(service_name) {
                    if identity_selected(&identity) {
                        selected.push(FilteredIdentity {
                            service: service_name.clone(),
                            component: None,
                            identity,
                        });
                    }
                }
                for (component_name, component) in &service.components {
                    for identity in &component.identities {
                        let identity = descriptor.dereference(identity);
                        if identity_selected(&identity) {
                            selected.push(FilteredIdentity {
                                service: service_name.clone(),
                                component: Some(component_name.clone()),
                                identity,
                            });
                        }
                    }
                }
            }
            Some(components) => {
                for component_name in components {
                    for identity in descriptor.component_identities(service_name, component_name) {
                        if identity_selected(&identity) {
                            selected.push(FilteredIdentity {
                                service: service_name.clone(),
                                component: Some(component_name.clone()),
                                identity,
                            });
                        }
                    }
                }
            }
        }
    }
    selected
}

#[derive(Debug, Snafu)]
pub enum FileDescriptorProviderError {
    #[snafu(display("failed to read descriptor file {path:?}"))]
    ReadFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse descriptor file {path:?}"))]
    ParseFile {
        source: serde_json::Error,
        path: PathBuf,
    },
}

/// Reads descriptors from the local file system
///
/// Stack descriptors are looked up as `<stack_descriptor_dir>/<stack name>/<stack version>/kerberos.json`.
#[derive(Clone, Debug)]
pub struct FileDescriptorProvider {
    pub stack_descriptor_dir: PathBuf,
    pub cluster_descriptor: Option<PathBuf>,
}

impl FileDescriptorProvider {
    async fn read_json<T: serde::de::DeserializeOwned>(
        path: &Path,
    ) -> Result<Option<T>, FileDescriptorProviderError> {
        let contents = match tokio::fs::read(path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).context(ReadFileSnafu { path }),
        };
        serde_json::from_slice(&contents)
            .map(Some)
            .context(ParseFileSnafu { path })
    }
}

#[async_trait]
impl DescriptorProvider for FileDescriptorProvider {
    type Error = FileDescriptorProviderError;

    async fn cluster_artifact(
        &self,
        _cluster_name: &str,
    ) -> Result<Option<serde_json::Value>, Self::Error> {
        match &self.cluster_descriptor {
            Some(path) => Self::read_json(path).await,
            None => Ok(None),
        }
    }

    async fn stack_descriptor(
        &self,
        stack: &StackId,
    ) -> Result<Option<KerberosDescriptor>, Self::Error> {
        let path = self
            .stack_descriptor_dir
            .join(&stack.name)
            .join(&stack.version)
            .join(STACK_DESCRIPTOR_FILE_NAME);
        Self::read_json(&path).await
    }
}
