//! Validates the stashed KDC administrator credential against the KDC

use snafu::{OptionExt, Snafu};
use stackable_kdc_admin::{
    AdministratorCredential, KdcConfiguration, KdcOperationHandler, KdcOperationHandlerFactory,
    KdcType,
};

use crate::session::ClusterSession;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "Missing KDC administrator credentials. The KDC administrator principal and its password or keytab must be stashed in the session of cluster {cluster:?} before Kerberos identities can be managed"
    ))]
    MissingCredentials { cluster: String },

    #[snafu(display(
        "Invalid KDC administrator credentials. The KDC rejected the administrator principal {principal:?}"
    ))]
    RejectedCredentials {
        source: stackable_kdc_admin::Error,
        principal: String,
    },

    #[snafu(display(
        "Invalid KDC administrator credentials. The administrator principal {principal:?} does not exist in the KDC"
    ))]
    UnknownAdministrator { principal: String },

    #[snafu(display("failed to communicate with the KDC"))]
    KdcOperation { source: stackable_kdc_admin::Error },
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn is_missing_credentials(&self) -> bool {
        matches!(self, Error::MissingCredentials { .. })
    }

    pub fn is_invalid_credentials(&self) -> bool {
        matches!(
            self,
            Error::RejectedCredentials { .. } | Error::UnknownAdministrator { .. }
        )
    }
}

/// Verifies that the KDC accepts the administrator credential stashed in `session`
///
/// Nothing is checked when `require_credentials` is false, in which case the stashed credential
/// (if any) is returned as-is. Otherwise the handler is always closed again, whatever the outcome.
#[tracing::instrument(skip(handlers, session, configuration))]
pub async fn validate_kdc_credentials(
    handlers: &(impl KdcOperationHandlerFactory + ?Sized),
    cluster_name: &str,
    session: &ClusterSession,
    realm: &str,
    kdc_type: KdcType,
    configuration: &KdcConfiguration,
    require_credentials: bool,
) -> Result<Option<AdministratorCredential>> {
    let credential = session.administrator_credential();
    if !require_credentials {
        return Ok(credential);
    }
    let credential = credential.context(MissingCredentialsSnafu {
        cluster: cluster_name,
    })?;

    let mut handler = handlers.handler(kdc_type);
    let outcome = check_credential(handler.as_mut(), &credential, realm, configuration).await;
    if let Err(err) = handler.close().await {
        tracing::warn!(
            error = &err as &dyn std::error::Error,
            "failed to close the KDC operation handler"
        );
    }
    outcome?;
    tracing::info!(principal = %credential.principal, "KDC administrator credentials are valid");
    Ok(Some(credential))
}

async fn check_credential(
    handler: &mut dyn KdcOperationHandler,
    credential: &AdministratorCredential,
    realm: &str,
    configuration: &KdcConfiguration,
) -> Result<()> {
    let classify = |source: stackable_kdc_admin::Error| {
        if source.is_credential_rejection() {
            Error::RejectedCredentials {
                source,
                principal: credential.principal.clone(),
            }
        } else {
            Error::KdcOperation { source }
        }
    };
    handler
        .open(credential, realm, configuration)
        .await
        .map_err(classify)?;
    let exists = handler
        .principal_exists(&credential.principal)
        .await
        .map_err(classify)?;
    if !exists {
        return UnknownAdministratorSnafu {
            principal: &credential.principal,
        }
        .fail();
    }
    Ok(())
}
