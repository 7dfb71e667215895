//! Administrative clients for Kerberos Key Distribution Centers (KDCs)
//!
//! Every supported KDC flavour is exposed through the [`KdcOperationHandler`] capability, so that callers
//! (such as the credential validation performed before a Kerberos pipeline is built) never need to know
//! which backend they are talking to.

use std::{
    collections::BTreeMap,
    fmt::Debug,
    ops::{Deref, DerefMut},
    str::FromStr,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

pub mod active_directory;
pub mod mit;

/// The `kerberos-env` properties that describe how to reach the KDC
pub type KdcConfiguration = BTreeMap<String, String>;

/// `kerberos-env` property selecting the [`KdcType`]
pub const KDC_TYPE_PROPERTY: &str = "kdc_type";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("unknown KDC type {kdc_type:?}"))]
    UnknownKdcType { kdc_type: String },

    #[snafu(display("MIT KDC operation failed"), context(false))]
    Mit { source: mit::Error },

    #[snafu(display("Active Directory operation failed"), context(false))]
    ActiveDirectory { source: active_directory::Error },
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether the KDC refused the administrator credential itself, as opposed to failing for
    /// unrelated reasons (network, protocol, missing connection parameters, ...)
    pub fn is_credential_rejection(&self) -> bool {
        match self {
            Error::UnknownKdcType { .. } => false,
            Error::Mit { source } => source.is_credential_rejection(),
            Error::ActiveDirectory { source } => source.is_credential_rejection(),
        }
    }
}

/// The supported KDC flavours
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum KdcType {
    #[default]
    #[serde(rename = "mit-kdc")]
    #[strum(serialize = "mit-kdc")]
    MitKdc,

    #[serde(rename = "active-directory")]
    #[strum(serialize = "active-directory")]
    ActiveDirectory,
}

impl KdcType {
    /// Reads the [`KdcType`] from the `kdc_type` property, defaulting to [`KdcType::MitKdc`] if it is unset
    pub fn from_configuration(configuration: &KdcConfiguration) -> Result<Self> {
        match configuration.get(KDC_TYPE_PROPERTY).map(|s| s.trim()) {
            None | Some("") => Ok(Self::default()),
            Some(kdc_type) => Self::from_str(kdc_type).map_err(|_| Error::UnknownKdcType {
                kdc_type: kdc_type.to_string(),
            }),
        }
    }
}

/// Credential of a KDC administrator
///
/// Only ever held for the duration of a single operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdministratorCredential {
    pub principal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<Unloggable<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keytab: Option<String>,
}

impl AdministratorCredential {
    pub fn with_password(principal: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            password: Some(Unloggable(password.into())),
            keytab: None,
        }
    }
}

/// Capability interface shared by all KDC backends
///
/// A handler must be [`open`](Self::open)ed before any principal operation is issued, and should be
/// [`close`](Self::close)d afterwards. Closing an already closed handler is a no-op.
#[async_trait]
pub trait KdcOperationHandler: Send {
    async fn open(
        &mut self,
        credential: &AdministratorCredential,
        realm: &str,
        configuration: &KdcConfiguration,
    ) -> Result<()>;

    async fn close(&mut self) -> Result<()>;

    async fn principal_exists(&mut self, principal: &str) -> Result<bool>;

    /// Creates `principal`, returning the key number reported by the KDC (if any)
    async fn create_principal(
        &mut self,
        principal: &str,
        password: &str,
        service: bool,
    ) -> Result<Option<i32>>;

    /// Replaces the password of `principal`, returning the new key number reported by the KDC (if any)
    async fn set_principal_password(&mut self, principal: &str, password: &str)
    -> Result<Option<i32>>;

    /// Removes `principal`, returning whether it existed
    async fn remove_principal(&mut self, principal: &str) -> Result<bool>;
}

/// A connection to one of the supported KDC backends
pub enum AdminConnection {
    Mit(mit::MitAdmin),
    ActiveDirectory(active_directory::AdAdmin),
}

impl AdminConnection {
    pub fn for_kdc_type(kdc_type: KdcType) -> Self {
        match kdc_type {
            KdcType::MitKdc => Self::Mit(mit::MitAdmin::default()),
            KdcType::ActiveDirectory => Self::ActiveDirectory(active_directory::AdAdmin::default()),
        }
    }
}

#[async_trait]
impl KdcOperationHandler for AdminConnection {
    async fn open(
        &mut self,
        credential: &AdministratorCredential,
        realm: &str,
        configuration: &KdcConfiguration,
    ) -> Result<()> {
        match self {
            AdminConnection::Mit(mit) => mit.open(credential, realm, configuration)?,
            AdminConnection::ActiveDirectory(ad) => {
                ad.open(credential, realm, configuration).await?
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            AdminConnection::Mit(mit) => mit.close(),
            AdminConnection::ActiveDirectory(ad) => ad.close().await?,
        }
        Ok(())
    }

    async fn principal_exists(&mut self, principal: &str) -> Result<bool> {
        Ok(match self {
            AdminConnection::Mit(mit) => mit.principal_exists(principal).await?,
            AdminConnection::ActiveDirectory(ad) => ad.principal_exists(principal).await?,
        })
    }

    async fn create_principal(
        &mut self,
        principal: &str,
        password: &str,
        service: bool,
    ) -> Result<Option<i32>> {
        Ok(match self {
            AdminConnection::Mit(mit) => mit.create_principal(principal, password).await?,
            AdminConnection::ActiveDirectory(ad) => {
                ad.create_principal(principal, password, service).await?
            }
        })
    }

    async fn set_principal_password(
        &mut self,
        principal: &str,
        password: &str,
    ) -> Result<Option<i32>> {
        Ok(match self {
            AdminConnection::Mit(mit) => mit.set_principal_password(principal, password).await?,
            AdminConnection::ActiveDirectory(ad) => {
                ad.set_principal_password(principal, password).await?
            }
        })
    }

    async fn remove_principal(&mut self, principal: &str) -> Result<bool> {
        Ok(match self {
            AdminConnection::Mit(mit) => mit.remove_principal(principal).await?,
            AdminConnection::ActiveDirectory(ad) => ad.remove_principal(principal).await?,
        })
    }
}

/// Selects the [`KdcOperationHandler`] for a given [`KdcType`]
pub trait KdcOperationHandlerFactory: Send + Sync {
    fn handler(&self, kdc_type: KdcType) -> Box<dyn KdcOperationHandler>;
}

/// Hands out the real MIT and Active Directory backends
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultKdcOperationHandlerFactory;

impl KdcOperationHandlerFactory for DefaultKdcOperationHandlerFactory {
    fn handler(&self, kdc_type: KdcType) -> Box<dyn KdcOperationHandler> {
        Box::new(AdminConnection::for_kdc_type(kdc_type))
    }
}

/// Splits `primary/instance@REALM` into `primary/instance` and the realm (if present)
pub fn split_realm(principal: &str) -> (&str, Option<&str>) {
    match principal.rsplit_once('@') {
        Some((name, realm)) => (name, Some(realm)),
        None => (principal, None),
    }
}

/// Wrapper for (mostly) secret values that should not be logged.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Unloggable<T>(pub T);

impl<T> Debug for Unloggable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<redacted>")
    }
}

impl<T> Deref for Unloggable<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for Unloggable<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
