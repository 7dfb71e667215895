//! Orchestrates the Kerberos security lifecycle of a managed cluster
//!
//! Every entry point on [`KerberosOrchestrator`] follows the same shape: validate the cluster's
//! Kerberos-related configuration, validate the KDC administrator credential, resolve the Kerberos
//! descriptor, plan every state transition and stage, and only then commit the transitions and append
//! the planned stages to the caller's [`StageContainer`](stage::StageContainer).

pub mod auth_to_local;
pub mod config_update;
pub mod credentials;
pub mod descriptor;
pub mod identity;
pub mod operations;
pub mod orchestrator;
pub mod pipeline;
pub mod security_state;
pub mod session;
pub mod stage;
pub mod template;
pub mod topology;
pub mod utils;

#[cfg(test)]
mod testing;

pub use orchestrator::{Error, KerberosOrchestrator, Result};
