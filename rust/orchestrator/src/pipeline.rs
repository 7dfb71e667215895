//! Builds the ordered stage pipelines for each Kerberos operation
//!
//! Pipelines are planned in full as a [`StagePlan`] before anything is handed to a [`StageContainer`].
//! Appending numbers each stage after the container's last stage, and records that stage as its predecessor.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use stackable_kdc_admin::KdcType;

use crate::{
    config_update::ConfigUpdate,
    identity::ResolvedIdentity,
    stage::{HostRoleCommand, Stage, StageContainer, StageKind},
};

pub const DEFAULT_REALM_PARAM: &str = "default_realm";
pub const KDC_TYPE_PARAM: &str = "kdc_type";
pub const REGENERATE_KEYTABS_PARAM: &str = "regenerate_keytabs";
pub const PRINCIPAL_NAME_PARAM: &str = "principal_name";
pub const KEYTAB_FILE_PARAM: &str = "keytab_file";

const CREATE_PRINCIPALS_COMMAND: &str = "CREATE_PRINCIPALS";
const CREATE_KEYTABS_COMMAND: &str = "CREATE_KEYTABS";
const SET_KEYTAB_COMMAND: &str = "SET_KEYTAB";
const UPDATE_CONFIGURATIONS_COMMAND: &str = "UPDATE_CONFIGURATIONS";
const DESTROY_PRINCIPALS_COMMAND: &str = "DESTROY_PRINCIPALS";
const REMOVE_KEYTAB_COMMAND: &str = "REMOVE_KEYTAB";
const FINALIZE_COMMAND: &str = "FINALIZE";

/// Parameters shared by every stage of a pipeline
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineParameters {
    pub realm: String,
    pub kdc_type: KdcType,
    /// Additional command parameters, such as the test identity's templates
    pub extra: BTreeMap<String, String>,
}

impl PipelineParameters {
    fn command_params(&self, regenerate_keytabs: bool) -> BTreeMap<String, String> {
        let mut params = self.extra.clone();
        params.insert(DEFAULT_REALM_PARAM.to_string(), self.realm.clone());
        params.insert(KDC_TYPE_PARAM.to_string(), self.kdc_type.to_string());
        params.insert(
            REGENERATE_KEYTABS_PARAM.to_string(),
            regenerate_keytabs.to_string(),
        );
        params
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedStage {
    pub kind: StageKind,
    pub commands: Vec<HostRoleCommand>,
    pub config_update: Option<ConfigUpdate>,
}

/// A fully planned pipeline, which has not been handed to a [`StageContainer`] yet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagePlan {
    command_params: BTreeMap<String, String>,
    stages: Vec<PlannedStage>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendedStage {
    pub stage_id: i64,
    pub predecessor_id: i64,
    pub kind: StageKind,
}

/// The stages that a pipeline appended to its container
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSummary {
    pub request_id: i64,
    pub stages: Vec<AppendedStage>,
}

impl PipelineSummary {
    pub fn kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(|stage| stage.kind).collect()
    }
}

impl StagePlan {
    pub fn kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(|stage| stage.kind).collect()
    }

    pub fn stages(&self) -> &[PlannedStage] {
        &self.stages
    }

    /// Appends every planned stage to `container`, one at a time and in order
    pub fn append_to<C: StageContainer + ?Sized>(
        self,
        cluster_name: &str,
        container: &mut C,
    ) -> PipelineSummary {
        let request_id = container.request_id();
        let mut summary = PipelineSummary {
            request_id,
            stages: Vec::with_capacity(self.stages.len()),
        };
        for planned in self.stages {
            let predecessor_id = container.last_stage_id();
            let stage = Stage {
                request_id,
                stage_id: predecessor_id + 1,
                predecessor_id,
                kind: planned.kind,
                cluster_name: cluster_name.to_string(),
                command_params: self.command_params.clone(),
                commands: planned.commands,
                config_update: planned.config_update,
            };
            tracing::info!(
                stage.id = stage.stage_id,
                stage.kind = %stage.kind,
                stage.commands = stage.commands.len(),
                "appending stage"
            );
            summary.stages.push(AppendedStage {
                stage_id: stage.stage_id,
                predecessor_id,
                kind: stage.kind,
            });
            container.add_stages(vec![stage]);
        }
        summary
    }
}

struct StagePlanBuilder<'a> {
    identities: &'a [ResolvedIdentity],
    hosts: &'a BTreeSet<String>,
    stages: Vec<PlannedStage>,
}

impl<'a> StagePlanBuilder<'a> {
    fn new(identities: &'a [ResolvedIdentity], hosts: &'a BTreeSet<String>) -> Self {
        Self {
            identities,
            hosts,
            stages: Vec::new(),
        }
    }

    fn push(mut self, kind: StageKind, commands: Vec<HostRoleCommand>) -> Self {
        self.stages.push(PlannedStage {
            kind,
            commands,
            config_update: None,
        });
        self
    }

    /// Identities with a principal, once per host and principal
    fn with_principals(&self) -> Vec<ResolvedIdentity> {
        let mut seen = BTreeSet::new();
        self.identities
            .iter()
            .filter(|identity| match &identity.principal {
                Some(principal) => seen.insert((identity.host.clone(), principal.value.clone())),
                None => false,
            })
            .cloned()
            .collect()
    }

    /// Identities with a keytab, once per host and keytab file
    fn with_keytabs(&self) -> Vec<ResolvedIdentity> {
        let mut seen = BTreeSet::new();
        self.identities
            .iter()
            .filter(|identity| match &identity.keytab {
                Some(keytab) => seen.insert((identity.host.clone(), keytab.file.clone())),
                None => false,
            })
            .cloned()
            .collect()
    }

    /// One command per target host that has at least one keytab to handle
    fn per_host_keytab_commands(&self, command: &str) -> Vec<HostRoleCommand> {
        let with_keytabs = self.with_keytabs();
        self.hosts
            .iter()
            .filter_map(|host| {
                let identities = with_keytabs
                    .iter()
                    .filter(|identity| &identity.host == host)
                    .cloned()
                    .collect::<Vec<_>>();
                (!identities.is_empty())
                    .then(|| HostRoleCommand::kerberos_client(host, command, identities))
            })
            .collect()
    }

    /// One command per target host, regardless of which identities it holds
    fn per_host_commands(&self, command: &str) -> Vec<HostRoleCommand> {
        self.hosts
            .iter()
            .map(|host| HostRoleCommand::kerberos_client(host, command, Vec::new()))
            .collect()
    }

    fn create_principals(self) -> Self {
        let command = HostRoleCommand::server_action(CREATE_PRINCIPALS_COMMAND, self.with_principals());
        self.push(StageKind::CreatePrincipals, vec![command])
    }

    fn create_keytabs(self) -> Self {
        let command = HostRoleCommand::server_action(CREATE_KEYTABS_COMMAND, self.with_keytabs());
        self.push(StageKind::CreateKeytabs, vec![command])
    }

    fn distribute_keytabs(self) -> Self {
        let commands = self.per_host_keytab_commands(SET_KEYTAB_COMMAND);
        self.push(StageKind::DistributeKeytabs, commands)
    }

    fn update_configs(mut self, config_update: ConfigUpdate) -> Self {
        self.stages.push(PlannedStage {
            kind: StageKind::UpdateConfigs,
            commands: vec![HostRoleCommand::server_action(
                UPDATE_CONFIGURATIONS_COMMAND,
                Vec::new(),
            )],
            config_update: Some(config_update),
        });
        self
    }

    fn destroy_principals(self) -> Self {
        let command =
            HostRoleCommand::server_action(DESTROY_PRINCIPALS_COMMAND, self.with_principals());
        self.push(StageKind::DestroyPrincipals, vec![command])
    }

    fn delete_keytabs(self) -> Self {
        let commands = self.per_host_keytab_commands(REMOVE_KEYTAB_COMMAND);
        self.push(StageKind::DeleteKeytabs, commands)
    }

    fn finalize(self) -> Self {
        let command = HostRoleCommand::server_action(FINALIZE_COMMAND, Vec::new());
        self.push(StageKind::Finalize, vec![command])
    }

    fn build(self, command_params: BTreeMap<String, String>) -> StagePlan {
        StagePlan {
            command_params,
            stages: self.stages,
        }
    }
}

/// Create Principals, Create Keytabs, Distribute Keytabs, Update Configs, Finalize
pub fn build_enable_pipeline(
    identities: &[ResolvedIdentity],
    hosts: &BTreeSet<String>,
    config_update: ConfigUpdate,
    params: &PipelineParameters,
) -> StagePlan {
    StagePlanBuilder::new(identities, hosts)
        .create_principals()
        .create_keytabs()
        .distribute_keytabs()
        .update_configs(config_update)
        .finalize()
        .build(params.command_params(false))
}

/// Update Configs, Destroy Principals, Delete Keytabs, Finalize
pub fn build_disable_pipeline(
    identities: &[ResolvedIdentity],
    hosts: &BTreeSet<String>,
    config_update: ConfigUpdate,
    params: &PipelineParameters,
) -> StagePlan {
    StagePlanBuilder::new(identities, hosts)
        .update_configs(config_update)
        .destroy_principals()
        .delete_keytabs()
        .finalize()
        .build(params.command_params(false))
}

/// Create Principals, Create Keytabs, Distribute Keytabs, Finalize, replacing existing keys
pub fn build_regenerate_pipeline(
    identities: &[ResolvedIdentity],
    hosts: &BTreeSet<String>,
    params: &PipelineParameters,
) -> StagePlan {
    StagePlanBuilder::new(identities, hosts)
        .create_principals()
        .create_keytabs()
        .distribute_keytabs()
        .finalize()
        .build(params.command_params(true))
}

/// Create Principals, Create Keytabs, Distribute Keytabs, Finalize, keeping existing keys
pub fn build_ensure_identities_pipeline(
    identities: &[ResolvedIdentity],
    hosts: &BTreeSet<String>,
    params: &PipelineParameters,
) -> StagePlan {
    StagePlanBuilder::new(identities, hosts)
        .create_principals()
        .create_keytabs()
        .distribute_keytabs()
        .finalize()
        .build(params.command_params(false))
}

/// Destroy Principals, Delete Keytabs, Finalize
pub fn build_delete_identities_pipeline(
    identities: &[ResolvedIdentity],
    hosts: &BTreeSet<String>,
    params: &PipelineParameters,
) -> StagePlan {
    StagePlanBuilder::new(identities, hosts)
        .destroy_principals()
        .delete_keytabs()
        .finalize()
        .build(params.command_params(false))
}

/// Create Principals, Create Keytabs, Distribute Keytabs, Finalize for the test identity, whose
/// templates travel in the command parameters and are materialized by the execution layer
pub fn build_create_test_identity_pipeline(
    hosts: &BTreeSet<String>,
    params: &PipelineParameters,
) -> StagePlan {
    let builder = StagePlanBuilder::new(&[], hosts)
        .create_principals()
        .create_keytabs();
    let commands = builder.per_host_commands(SET_KEYTAB_COMMAND);
    builder
        .push(StageKind::DistributeKeytabs, commands)
        .finalize()
        .build(params.command_params(false))
}

/// Destroy Principals, Delete Keytabs, Finalize for the test identity
pub fn build_delete_test_identity_pipeline(
    hosts: &BTreeSet<String>,
    params: &PipelineParameters,
) -> StagePlan {
    let builder = StagePlanBuilder::new(&[], hosts).destroy_principals();
    let commands = builder.per_host_commands(REMOVE_KEYTAB_COMMAND);
    builder
        .push(StageKind::DeleteKeytabs, commands)
        .finalize()
        .build(params.command_params(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        descriptor::resolver::filter_identities,
        identity::resolve_identities,
        stage::{RequestStageContainer, NO_STAGE_ID},
        testing,
    };

    fn params() -> PipelineParameters {
        PipelineParameters {
            realm: "EXAMPLE.COM".to_string(),
            kdc_type: KdcType::MitKdc,
            extra: BTreeMap::new(),
        }
    }

    fn identities() -> Vec<ResolvedIdentity> {
        let cluster = testing::cluster();
        let descriptor = testing::descriptor();
        let selection = filter_identities(&descriptor, None, None);
        resolve_identities(&cluster, &descriptor, &selection, "EXAMPLE.COM", |_, _| true).unwrap()
    }

    fn hosts() -> BTreeSet<String> {
        BTreeSet::from(["host1".to_string(), "host2".to_string()])
    }

    #[test]
    fn pipelines_have_fixed_stage_orders() {
        use StageKind::*;
        let identities = identities();
        let hosts = hosts();
        let params = params();
        assert_eq!(
            build_enable_pipeline(&identities, &hosts, ConfigUpdate::default(), &params).kinds(),
            vec![CreatePrincipals, CreateKeytabs, DistributeKeytabs, UpdateConfigs, Finalize]
        );
        assert_eq!(
            build_disable_pipeline(&identities, &hosts, ConfigUpdate::default(), &params).kinds(),
            vec![UpdateConfigs, DestroyPrincipals, DeleteKeytabs, Finalize]
        );
        for plan in [
            build_regenerate_pipeline(&identities, &hosts, &params),
            build_ensure_identities_pipeline(&identities, &hosts, &params),
            build_create_test_identity_pipeline(&hosts, &params),
        ] {
            assert_eq!(
                plan.kinds(),
                vec![CreatePrincipals, CreateKeytabs, DistributeKeytabs, Finalize]
            );
        }
        for plan in [
            build_delete_identities_pipeline(&identities, &hosts, &params),
            build_delete_test_identity_pipeline(&hosts, &params),
        ] {
            assert_eq!(plan.kinds(), vec![DestroyPrincipals, DeleteKeytabs, Finalize]);
        }
    }

    #[test]
    fn append_numbers_stages_after_existing_ones() {
        let identities = identities();
        let hosts = hosts();
        let mut container = RequestStageContainer::new(7);

        let summary = build_ensure_identities_pipeline(&identities, &hosts, &params())
            .append_to("c1", &mut container);
        assert_eq!(summary.request_id, 7);
        assert_eq!(
            summary
                .stages
                .iter()
                .map(|stage| (stage.predecessor_id, stage.stage_id))
                .collect::<Vec<_>>(),
            vec![(NO_STAGE_ID, 0), (0, 1), (1, 2), (2, 3)]
        );

        let summary = build_delete_identities_pipeline(&identities, &hosts, &params())
            .append_to("c1", &mut container);
        assert_eq!(summary.stages[0].predecessor_id, 3);
        assert_eq!(summary.stages[0].stage_id, 4);
        assert_eq!(container.stages().len(), 7);
        assert!(container
            .stages()
            .iter()
            .all(|stage| stage.request_id == 7 && stage.cluster_name == "c1"));
    }

    #[test]
    fn keytabs_are_distributed_to_target_hosts_only() {
        let identities = identities();
        let hosts = BTreeSet::from(["host1".to_string()]);
        let plan = build_ensure_identities_pipeline(&identities, &hosts, &params());
        let distribute = &plan.stages()[2];
        assert_eq!(distribute.kind, StageKind::DistributeKeytabs);
        assert_eq!(distribute.commands.len(), 1);
        let command = &distribute.commands[0];
        assert_eq!(command.host.as_deref(), Some("host1"));
        assert!(!command.identities.is_empty());
        assert!(command
            .identities
            .iter()
            .all(|identity| identity.host == "host1"));
    }

    #[test]
    fn shared_identities_are_provisioned_once_per_host() {
        let cluster = testing::cluster();
        let mut descriptor = testing::descriptor();
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
        let hosts = BTreeSet::from(["host1".to_string()]);
        let plan = build_ensure_identities_pipeline(&identities, &hosts, &params());

        let count = |stage: &PlannedStage| {
            stage
                .commands
                .iter()
                .flat_map(|command| &command.identities)
                .filter(|identity| identity.name == "identity1a")
                .count()
        };
        assert_eq!(plan.stages()[0].kind, StageKind::CreatePrincipals);
        assert_eq!(count(&plan.stages()[0]), 1);
        assert_eq!(count(&plan.stages()[1]), 1);
        assert_eq!(count(&plan.stages()[2]), 1);
    }

    #[test]
    fn command_params_carry_realm_and_regeneration() {
        let mut params = params();
        params
            .extra
            .insert(PRINCIPAL_NAME_PARAM.to_string(), "smoke@${realm}".to_string());
        let mut container = RequestStageContainer::new(1);
        build_regenerate_pipeline(&identities(), &hosts(), &params).append_to("c1", &mut container);
        let command_params = &container.stages()[0].command_params;
        assert_eq!(command_params[DEFAULT_REALM_PARAM], "EXAMPLE.COM");
        assert_eq!(command_params[KDC_TYPE_PARAM], "mit-kdc");
        assert_eq!(command_params[REGENERATE_KEYTABS_PARAM], "true");
        assert_eq!(command_params[PRINCIPAL_NAME_PARAM], "smoke@${realm}");
    }
}
