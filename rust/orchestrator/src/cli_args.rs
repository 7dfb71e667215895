use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
};

use clap::{Args, Parser, Subcommand};
use stackable_kerberos_orchestrator::orchestrator::IdentityFilter;

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    /// Cluster snapshot (YAML or JSON) to plan against
    #[arg(long, env = "KERBEROS_ORCHESTRATOR_CLUSTER")]
    pub cluster: PathBuf,

    /// Directory holding each stack's default descriptor, as `<stack name>/<stack version>/kerberos.json`
    #[arg(long, env = "KERBEROS_ORCHESTRATOR_STACK_DESCRIPTORS")]
    pub stack_descriptors: PathBuf,

    /// Cluster-specific descriptor, which takes precedence over the stack's default descriptor if it exists
    #[arg(long, env = "KERBEROS_ORCHESTRATOR_CLUSTER_DESCRIPTOR")]
    pub cluster_descriptor: Option<PathBuf>,

    /// ID of the request that the planned stages belong to
    #[arg(long, default_value_t = 1)]
    pub request_id: i64,

    /// Write the updated cluster snapshot (security states and session) back to `--cluster`
    #[arg(long)]
    pub write_back: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Enable Kerberos for the whole cluster
    Enable,

    /// Disable Kerberos for the whole cluster
    Disable,

    /// Recreate the keytabs of every identity
    Regenerate,

    /// Create the selected identities, if they do not exist yet
    EnsureIdentities(IdentityFilterArgs),

    /// Remove the selected identities
    DeleteIdentities(IdentityFilterArgs),

    /// Create the identity used by the Kerberos service check
    CreateTestIdentity,

    /// Remove the identity used by the Kerberos service check
    DeleteTestIdentity,

    /// Run custom operations, such as `--operation regenerate_keytabs=true`
    CustomOperation {
        #[arg(long = "operation", value_parser = parse_cli_operation)]
        operations: Vec<(String, String)>,
    },
}

#[derive(Args, Debug)]
pub struct IdentityFilterArgs {
    /// Services to select
    ///
    /// `SERVICE` selects all of its components, `SERVICE:COMPONENT1,COMPONENT2` only the listed ones.
    /// Everything is selected if no service is given.
    #[arg(long = "service", value_parser = parse_cli_service_filter)]
    pub services: Vec<(String, Option<BTreeSet<String>>)>,

    /// Names of the identities to select
    #[arg(long = "identity")]
    pub identities: Vec<String>,

    /// Hosts to select
    #[arg(long = "host")]
    pub hosts: Vec<String>,
}

impl IdentityFilterArgs {
    pub fn to_filter(&self) -> IdentityFilter {
        IdentityFilter {
            services: (!self.services.is_empty()).then(|| {
                let mut filter = BTreeMap::<String, Option<BTreeSet<String>>>::new();
                for (service, components) in &self.services {
                    let selected = filter
                        .entry(service.clone())
                        .or_insert_with(|| Some(BTreeSet::new()));
                    match components {
                        // an unrestricted selection wins over any component list
                        None => *selected = None,
                        Some(components) => {
                            if let Some(selected) = selected {
                                selected.extend(components.iter().cloned());
                            }
                        }
                    }
                }
                filter
            }),
            identities: (!self.identities.is_empty()).then(|| self.identities.clone()),
            hosts: (!self.hosts.is_empty()).then(|| self.hosts.iter().cloned().collect()),
        }
    }
}

fn parse_cli_service_filter(
    cli_argument: &str,
) -> Result<(String, Option<BTreeSet<String>>), String> {
    let (service, components) = match cli_argument.split_once(':') {
        Some((service, components)) => (
            service,
            Some(
                components
                    .split(',')
                    .map(str::trim)
                    .filter(|component| !component.is_empty())
                    .map(str::to_string)
                    .collect::<BTreeSet<_>>(),
            ),
        ),
        None => (cli_argument, None),
    };
    if service.trim().is_empty() {
        return Err("missing service name".to_string());
    }
    Ok((service.trim().to_string(), components))
}

fn parse_cli_operation(cli_argument: &str) -> Result<(String, String), String> {
    let (name, value) = cli_argument
        .split_once('=')
        .ok_or_else(|| "expected NAME=VALUE".to_string())?;
    Ok((name.to_string(), value.to_string()))
}
