//! Stages, the unit of work that the execution layer runs in order

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{config_update::ConfigUpdate, identity::ResolvedIdentity};

/// The stage ID reported by an empty [`StageContainer`]
pub const NO_STAGE_ID: i64 = -1;

/// Role of commands that are executed by the server, rather than on a cluster host
pub const SERVER_ACTION_ROLE: &str = "SERVER_ACTION";
pub const KERBEROS_CLIENT_ROLE: &str = "KERBEROS_CLIENT";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, strum::Display, strum::AsRefStr)]
pub enum StageKind {
    #[serde(rename = "Create Principals")]
    #[strum(serialize = "Create Principals")]
    CreatePrincipals,

    #[serde(rename = "Create Keytabs")]
    #[strum(serialize = "Create Keytabs")]
    CreateKeytabs,

    #[serde(rename = "Distribute Keytabs")]
    #[strum(serialize = "Distribute Keytabs")]
    DistributeKeytabs,

    #[serde(rename = "Update Configs")]
    #[strum(serialize = "Update Configs")]
    UpdateConfigs,

    #[serde(rename = "Destroy Principals")]
    #[strum(serialize = "Destroy Principals")]
    DestroyPrincipals,

    #[serde(rename = "Delete Keytabs")]
    #[strum(serialize = "Delete Keytabs")]
    DeleteKeytabs,

    #[serde(rename = "Finalize")]
    #[strum(serialize = "Finalize")]
    Finalize,
}

/// A command, scheduled either on a host or (if `host` is [`None`]) on the server
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRoleCommand {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub role: String,
    pub command: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub identities: Vec<ResolvedIdentity>,
}

impl HostRoleCommand {
    pub fn server_action(command: &str, identities: Vec<ResolvedIdentity>) -> Self {
        Self {
            host: None,
            role: SERVER_ACTION_ROLE.to_string(),
            command: command.to_string(),
            identities,
        }
    }

    pub fn kerberos_client(host: &str, command: &str, identities: Vec<ResolvedIdentity>) -> Self {
        Self {
            host: Some(host.to_string()),
            role: KERBEROS_CLIENT_ROLE.to_string(),
            command: command.to_string(),
            identities,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub request_id: i64,
    pub stage_id: i64,
    /// The stage that must complete before this one may start ([`NO_STAGE_ID`] for the first stage)
    pub predecessor_id: i64,
    pub kind: StageKind,
    pub cluster_name: String,
    pub command_params: BTreeMap<String, String>,
    pub commands: Vec<HostRoleCommand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_update: Option<ConfigUpdate>,
}

/// An ordered collection of stages belonging to a single request
pub trait StageContainer {
    fn request_id(&self) -> i64;

    /// The ID of the most recently added stage, or [`NO_STAGE_ID`] if there is none
    fn last_stage_id(&self) -> i64;

    fn add_stages(&mut self, stages: Vec<Stage>);
}

/// An in-memory [`StageContainer`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStageContainer {
    request_id: i64,
    stages: Vec<Stage>,
}

impl RequestStageContainer {
    pub fn new(request_id: i64) -> Self {
        Self {
            request_id,
            stages: Vec::new(),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }
}

impl StageContainer for RequestStageContainer {
    fn request_id(&self) -> i64 {
        self.request_id
    }

    fn last_stage_id(&self) -> i64 {
        self.stages
            .last()
            .map_or(NO_STAGE_ID, |stage| stage.stage_id)
    }

    fn add_stages(&mut self, stages: Vec<Stage>) {
        self.stages.extend(stages);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_kinds_use_display_names() {
        assert_eq!(StageKind::CreatePrincipals.to_string(), "Create Principals");
        assert_eq!(StageKind::UpdateConfigs.as_ref(), "Update Configs");
        assert_eq!(
            serde_json::to_value(StageKind::DistributeKeytabs).unwrap(),
            serde_json::json!("Distribute Keytabs")
        );
    }

    #[test]
    fn empty_container_has_no_last_stage() {
        let mut container = RequestStageContainer::new(3);
        assert_eq!(container.last_stage_id(), NO_STAGE_ID);
        container.add_stages(vec![Stage {
            request_id: 3,
            stage_id: 0,
            predecessor_id: NO_STAGE_ID,
            kind: StageKind::Finalize,
            cluster_name: "c1".to_string(),
            command_params: BTreeMap::new(),
            commands: vec![HostRoleCommand::server_action("FINALIZE", Vec::new())],
            config_update: None,
        }]);
        assert_eq!(container.last_stage_id(), 0);
        assert_eq!(container.stages().len(), 1);
    }
}
