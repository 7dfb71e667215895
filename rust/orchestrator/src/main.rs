use std::collections::BTreeMap;

use anyhow::Context;
use clap::Parser;
use cli_args::{Cli, Command};
use serde::Serialize;
use stackable_kdc_admin::DefaultKdcOperationHandlerFactory;
use stackable_kerberos_orchestrator::{
    descriptor::resolver::FileDescriptorProvider,
    orchestrator::is_cluster_kerberos_enabled,
    pipeline::PipelineSummary,
    stage::{RequestStageContainer, Stage},
    topology::Cluster,
    utils::error_full_message,
    KerberosOrchestrator,
};
use tracing::level_filters::LevelFilter;

mod cli_args;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

const ENV_VAR_LOGGING: &str = "KERBEROS_ORCHESTRATOR_LOG";

/// What is printed to stdout once planning succeeded
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Output<'a> {
    kerberos_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<PipelineSummary>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    command_params: BTreeMap<String, String>,
    stages: &'a [Stage],
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var(ENV_VAR_LOGGING)
        .from_env()?;
    tracing_subscriber::fmt()
        // stdout is reserved for the planned stages
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(filter)
        .init();

    let cli = Cli::parse();
    tracing::info!(
        built_info.pkg_version = built_info::PKG_VERSION,
        built_info.git_version = built_info::GIT_VERSION,
        built_info.target = built_info::TARGET,
        built_info.built_time_utc = built_info::BUILT_TIME_UTC,
        built_info.rustc_version = built_info::RUSTC_VERSION,
        "Starting Kerberos orchestrator",
    );

    if let Err(err) = run(cli).await {
        tracing::error!(
            error = &*err as &dyn std::error::Error,
            "{}",
            error_full_message(&*err)
        );
        return Err(err);
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cluster_snapshot = tokio::fs::read_to_string(&cli.cluster)
        .await
        .with_context(|| format!("failed to read cluster snapshot from {:?}", cli.cluster))?;
    let mut cluster: Cluster = serde_yaml::from_str(&cluster_snapshot)
        .with_context(|| format!("failed to parse cluster snapshot {:?}", cli.cluster))?;

    let orchestrator = KerberosOrchestrator::new(
        FileDescriptorProvider {
            stack_descriptor_dir: cli.stack_descriptors.clone(),
            cluster_descriptor: cli.cluster_descriptor.clone(),
        },
        DefaultKdcOperationHandlerFactory,
    );
    let mut container = RequestStageContainer::new(cli.request_id);
    let mut command_params = BTreeMap::new();

    let summary = match &cli.command {
        Command::Enable => Some(
            orchestrator
                .enable_kerberos(&mut cluster, &mut container)
                .await?,
        ),
        Command::Disable => Some(
            orchestrator
                .disable_kerberos(&mut cluster, &mut container)
                .await?,
        ),
        Command::Regenerate => Some(
            orchestrator
                .regenerate_keytabs(&cluster, &mut container)
                .await?,
        ),
        Command::EnsureIdentities(args) => Some(
            orchestrator
                .ensure_identities(&cluster, &args.to_filter(), &mut container)
                .await?,
        ),
        Command::DeleteIdentities(args) => Some(
            orchestrator
                .delete_identities(&cluster, &args.to_filter(), &mut container)
                .await?,
        ),
        Command::CreateTestIdentity => Some(
            orchestrator
                .create_test_identity(&mut cluster, &mut command_params, &mut container)
                .await?,
        ),
        Command::DeleteTestIdentity => Some(
            orchestrator
                .delete_test_identity(&mut cluster, &mut command_params, &mut container)
                .await?,
        ),
        Command::CustomOperation { operations } => {
            orchestrator
                .execute_custom_operations(
                    &cluster,
                    &operations.iter().cloned().collect(),
                    &mut container,
                )
                .await?
        }
    };

    let output = Output {
        kerberos_enabled: is_cluster_kerberos_enabled(&cluster),
        summary,
        command_params,
        stages: container.stages(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("failed to serialize planned stages")?
    );

    if cli.write_back {
        let snapshot =
            serde_yaml::to_string(&cluster).context("failed to serialize cluster snapshot")?;
        tokio::fs::write(&cli.cluster, snapshot)
            .await
            .with_context(|| format!("failed to write cluster snapshot to {:?}", cli.cluster))?;
        tracing::info!(path = ?cli.cluster, "updated cluster snapshot");
    }
    Ok(())
}
