use std::collections::{BTreeMap, BTreeSet};

use snafu::{OptionExt, ResultExt, Snafu};
use stackable_kdc_admin::{KdcOperationHandlerFactory, KdcType};

use crate::{
    config_update::{self, kerberos_disabled_updates, kerberos_enabled_updates},
    credentials,
    descriptor::{
        resolver::{self, filter_identities, resolve_descriptor, DescriptorProvider},
        IdentityDescriptor, KerberosDescriptor, KeytabAccess, KeytabDescriptor,
        PrincipalDescriptor, PrincipalType, ServiceComponentFilter,
    },
    identity::{self, resolve_identities, ResolvedIdentity},
    pipeline::{
        build_create_test_identity_pipeline, build_delete_identities_pipeline,
        build_delete_test_identity_pipeline, build_disable_pipeline, build_enable_pipeline,
        build_ensure_identities_pipeline, build_regenerate_pipeline, PipelineParameters,
        PipelineSummary, KEYTAB_FILE_PARAM, PRINCIPAL_NAME_PARAM,
    },
    security_state::{self, plan_toggle},
    stage::StageContainer,
    topology::{
        Cluster, SecurityType, CLUSTER_ENV, KERBEROS_DOMAIN_PROPERTY, KERBEROS_ENV, KRB5_CONF,
    },
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Missing {config_type} config"))]
    ConfigurationMissing { config_type: String },

    #[snafu(display("{CLUSTER_ENV}/{KERBEROS_DOMAIN_PROPERTY} does not name a default realm"))]
    MissingRealm,

    #[snafu(transparent)]
    Credentials { source: credentials::Error },

    #[snafu(display("unsupported KDC type"))]
    KdcType { source: stackable_kdc_admin::Error },

    #[snafu(display("failed to resolve the Kerberos descriptor"))]
    ResolveDescriptor { source: resolver::Error },

    #[snafu(display("failed to resolve Kerberos identities"))]
    ResolveIdentities { source: identity::Error },

    #[snafu(display("failed to compute configuration updates"))]
    ComputeConfigUpdates { source: config_update::Error },

    #[snafu(display("security state transitions are inconsistent"))]
    InconsistentSecurityState { source: security_state::Error },

    #[snafu(display(
        "unexpected value {value:?} for custom operation {operation:?}, only \"true\" is supported"
    ), visibility(pub(crate)))]
    InvalidOperationValue { operation: String, value: String },

    #[snafu(display("cluster {cluster:?} has no service check identifier, so no test identity exists"))]
    MissingServiceCheckIdentifier { cluster: String },
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Narrows down which identities an operation applies to
///
/// Every [`None`] selects everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentityFilter {
    pub services: Option<ServiceComponentFilter>,
    pub identities: Option<Vec<String>>,
    pub hosts: Option<BTreeSet<String>>,
}

/// Everything that has been validated and resolved before an operation plans its stages
struct KerberosContext {
    realm: String,
    kdc_type: KdcType,
    descriptor: KerberosDescriptor,
    /// Hosts whose Kerberos client is installed
    eligible_hosts: BTreeSet<String>,
}

impl KerberosContext {
    fn params(&self, extra: BTreeMap<String, String>) -> PipelineParameters {
        PipelineParameters {
            realm: self.realm.clone(),
            kdc_type: self.kdc_type,
            extra,
        }
    }

    fn target_hosts(&self, filter: &IdentityFilter) -> BTreeSet<String> {
        match &filter.hosts {
            Some(hosts) => self.eligible_hosts.intersection(hosts).cloned().collect(),
            None => self.eligible_hosts.clone(),
        }
    }

    fn resolve_filtered_identities(
        &self,
        cluster: &Cluster,
        filter: &IdentityFilter,
    ) -> Result<Vec<ResolvedIdentity>> {
        let selection = filter_identities(
            &self.descriptor,
            filter.services.as_ref(),
            filter.identities.as_deref(),
        );
        let target_hosts = self.target_hosts(filter);
        resolve_identities(
            cluster,
            &self.descriptor,
            &selection,
            &self.realm,
            |host, _| target_hosts.contains(host),
        )
        .context(ResolveIdentitiesSnafu)
    }
}

/// Entry point for all Kerberos lifecycle operations
pub struct KerberosOrchestrator<D, K> {
    descriptors: D,
    kdc_handlers: K,
}

impl<D: DescriptorProvider, K: KdcOperationHandlerFactory> KerberosOrchestrator<D, K> {
    pub fn new(descriptors: D, kdc_handlers: K) -> Self {
        Self {
            descriptors,
            kdc_handlers,
        }
    }

    /// Validates everything that must hold before any operation may plan stages
    async fn prepare(&self, cluster: &Cluster) -> Result<KerberosContext> {
        let kerberos_env = cluster
            .desired_config_by_type(KERBEROS_ENV)
            .context(ConfigurationMissingSnafu {
                config_type: KERBEROS_ENV,
            })?;
        for config_type in [KRB5_CONF, CLUSTER_ENV] {
            cluster
                .desired_config_by_type(config_type)
                .context(ConfigurationMissingSnafu { config_type })?;
        }
        let realm = cluster.default_realm().context(MissingRealmSnafu)?.to_string();
        let kdc_type = KdcType::from_configuration(kerberos_env).context(KdcTypeSnafu)?;

        credentials::validate_kdc_credentials(
            &self.kdc_handlers,
            &cluster.name,
            &cluster.session,
            &realm,
            kdc_type,
            kerberos_env,
            true,
        )
        .await?;

        let descriptor = resolve_descriptor(&self.descriptors, cluster)
            .await
            .context(ResolveDescriptorSnafu)?;

        Ok(KerberosContext {
            realm,
            kdc_type,
            descriptor,
            eligible_hosts: cluster.hosts_with_valid_kerberos_client(),
        })
    }

    /// Enables ([`SecurityType::Kerberos`]) or disables ([`SecurityType::None`]) Kerberos
    ///
    /// Either every security state transition is committed and the full pipeline is appended to
    /// `container`, or (on error) neither the cluster nor the container is modified.
    #[tracing::instrument(skip(self, cluster, container), fields(cluster.name = %cluster.name))]
    pub async fn toggle_kerberos<C: StageContainer + ?Sized>(
        &self,
        cluster: &mut Cluster,
        security_type: SecurityType,
        container: &mut C,
    ) -> Result<PipelineSummary> {
        let context = self.prepare(cluster).await?;
        let transitions = plan_toggle(cluster, security_type);
        transitions
            .validate(cluster)
            .context(InconsistentSecurityStateSnafu)?;

        let selection = filter_identities(&context.descriptor, None, None);
        let stage_plan = match security_type {
            SecurityType::Kerberos => {
                let identities = resolve_identities(
                    cluster,
                    &context.descriptor,
                    &selection,
                    &context.realm,
                    |host, sch| {
                        context.eligible_hosts.contains(host) && transitions.includes(host, sch)
                    },
                )
                .context(ResolveIdentitiesSnafu)?;
                let config_update = kerberos_enabled_updates(
                    cluster,
                    &context.descriptor,
                    &identities,
                    &context.realm,
                )
                .context(ComputeConfigUpdatesSnafu)?;
                build_enable_pipeline(
                    &identities,
                    &context.eligible_hosts,
                    config_update,
                    &context.params(BTreeMap::new()),
                )
            }
            SecurityType::None => {
                // principals are destroyed wherever they were created, keytabs only where a client can remove them
                let identities = resolve_identities(
                    cluster,
                    &context.descriptor,
                    &selection,
                    &context.realm,
                    |host, sch| transitions.includes(host, sch),
                )
                .context(ResolveIdentitiesSnafu)?;
                build_disable_pipeline(
                    &identities,
                    &context.eligible_hosts,
                    kerberos_disabled_updates(&identities),
                    &context.params(BTreeMap::new()),
                )
            }
        };

        transitions.apply(cluster);
        Ok(stage_plan.append_to(&cluster.name, container))
    }

    pub async fn enable_kerberos<C: StageContainer + ?Sized>(
        &self,
        cluster: &mut Cluster,
        container: &mut C,
    ) -> Result<PipelineSummary> {
        self.toggle_kerberos(cluster, SecurityType::Kerberos, container)
            .await
    }

    pub async fn disable_kerberos<C: StageContainer + ?Sized>(
        &self,
        cluster: &mut Cluster,
        container: &mut C,
    ) -> Result<PipelineSummary> {
        self.toggle_kerberos(cluster, SecurityType::None, container)
            .await
    }

    /// Recreates the keytabs of every identity in the cluster, replacing their existing keys
    #[tracing::instrument(skip(self, cluster, container), fields(cluster.name = %cluster.name))]
    pub async fn regenerate_keytabs<C: StageContainer + ?Sized>(
        &self,
        cluster: &Cluster,
        container: &mut C,
    ) -> Result<PipelineSummary> {
        let context = self.prepare(cluster).await?;
        let filter = IdentityFilter::default();
        let identities = context.resolve_filtered_identities(cluster, &filter)?;
        let plan = build_regenerate_pipeline(
            &identities,
            &context.target_hosts(&filter),
            &context.params(BTreeMap::new()),
        );
        Ok(plan.append_to(&cluster.name, container))
    }

    /// Makes sure that the selected identities exist, without touching existing keys
    #[tracing::instrument(skip(self, cluster, container), fields(cluster.name = %cluster.name))]
    pub async fn ensure_identities<C: StageContainer + ?Sized>(
        &self,
        cluster: &Cluster,
        filter: &IdentityFilter,
        container: &mut C,
    ) -> Result<PipelineSummary> {
        let context = self.prepare(cluster).await?;
        let identities = context.resolve_filtered_identities(cluster, filter)?;
        let plan = build_ensure_identities_pipeline(
            &identities,
            &context.target_hosts(filter),
            &context.params(BTreeMap::new()),
        );
        Ok(plan.append_to(&cluster.name, container))
    }

    /// Removes the selected identities' principals and keytabs
    #[tracing::instrument(skip(self, cluster, container), fields(cluster.name = %cluster.name))]
    pub async fn delete_identities<C: StageContainer + ?Sized>(
        &self,
        cluster: &Cluster,
        filter: &IdentityFilter,
        container: &mut C,
    ) -> Result<PipelineSummary> {
        let context = self.prepare(cluster).await?;
        let identities = context.resolve_filtered_identities(cluster, filter)?;
        let plan = build_delete_identities_pipeline(
            &identities,
            &context.target_hosts(filter),
            &context.params(BTreeMap::new()),
        );
        Ok(plan.append_to(&cluster.name, container))
    }

    /// Schedules the creation of the identity used by the Kerberos service check
    ///
    /// The identity's principal and keytab templates are added to `command_params`, they are
    /// materialized by the execution layer.
    #[tracing::instrument(skip(self, cluster, command_params, container), fields(cluster.name = %cluster.name))]
    pub async fn create_test_identity<C: StageContainer + ?Sized>(
        &self,
        cluster: &mut Cluster,
        command_params: &mut BTreeMap<String, String>,
        container: &mut C,
    ) -> Result<PipelineSummary> {
        let context = self.prepare(cluster).await?;
        let identifier = cluster
            .session
            .get_or_create_service_check_identifier()
            .to_string();
        let test_params = test_identity_params(&service_check_identity(&identifier));
        command_params.extend(test_params.clone());

        let plan =
            build_create_test_identity_pipeline(&context.eligible_hosts, &context.params(test_params));
        Ok(plan.append_to(&cluster.name, container))
    }

    /// Schedules the removal of the identity used by the Kerberos service check
    #[tracing::instrument(skip(self, cluster, command_params, container), fields(cluster.name = %cluster.name))]
    pub async fn delete_test_identity<C: StageContainer + ?Sized>(
        &self,
        cluster: &mut Cluster,
        command_params: &mut BTreeMap<String, String>,
        container: &mut C,
    ) -> Result<PipelineSummary> {
        let context = self.prepare(cluster).await?;
        let identifier = cluster
            .session
            .service_check_identifier()
            .context(MissingServiceCheckIdentifierSnafu {
                cluster: &cluster.name,
            })?
            .to_string();
        let test_params = test_identity_params(&service_check_identity(&identifier));
        command_params.extend(test_params.clone());

        let plan =
            build_delete_test_identity_pipeline(&context.eligible_hosts, &context.params(test_params));
        let summary = plan.append_to(&cluster.name, container);
        // the next test identity gets a fresh name
        cluster.session.clear_service_check_identifier();
        Ok(summary)
    }
}

pub fn is_cluster_kerberos_enabled(cluster: &Cluster) -> bool {
    cluster.is_kerberos_enabled()
}

/// The identity used by the Kerberos service check, unique per service check identifier
pub fn service_check_identity(identifier: &str) -> IdentityDescriptor {
    let name = format!("kerberos.service_check.{identifier}");
    IdentityDescriptor {
        principal: Some(PrincipalDescriptor {
            value: Some(format!("${{{CLUSTER_ENV}/smokeuser}}_{identifier}@${{realm}}")),
            principal_type: Some(PrincipalType::User),
            local_username: None,
            configuration: None,
        }),
        keytab: Some(KeytabDescriptor {
            file: Some(format!("${{keytab_dir}}/{name}.keytab")),
            owner: KeytabAccess {
                name: Some(format!("${{{CLUSTER_ENV}/smokeuser}}")),
                access: Some("rw".to_string()),
            },
            group: KeytabAccess {
                name: Some(format!("${{{CLUSTER_ENV}/user_group}}")),
                access: Some("r".to_string()),
            },
            configuration: None,
            cachable: Some(false),
        }),
        name,
        reference: None,
    }
}

fn test_identity_params(identity: &IdentityDescriptor) -> BTreeMap<String, String> {
    let principal = identity
        .principal
        .as_ref()
        .and_then(|principal| principal.value.clone());
    let keytab = identity.keytab.as_ref().and_then(|keytab| keytab.file.clone());
    [(PRINCIPAL_NAME_PARAM, principal), (KEYTAB_FILE_PARAM, keytab)]
        .into_iter()
        .filter_map(|(key, value)| Some((key.to_string(), value?)))
        .collect()
}
