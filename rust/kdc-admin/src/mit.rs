use std::process::{ExitStatus, Output};

use snafu::{OptionExt, ResultExt, Snafu};
use tokio::process::Command;

use crate::{AdministratorCredential, KdcConfiguration, Unloggable};

/// `kerberos-env` property naming the kadmin server
pub const ADMIN_SERVER_HOST_PROPERTY: &str = "admin_server_host";

// Messages printed by kadmin when it refuses to authenticate the administrator
const CREDENTIAL_REJECTION_MESSAGES: &[&str] = &[
    "Incorrect password",
    "Password incorrect",
    "not found in Kerberos database while initializing",
    "Key table entry not found",
    "Preauthentication failed",
];
const PRINCIPAL_DOES_NOT_EXIST_MESSAGE: &str = "Principal does not exist";
const PRINCIPAL_ALREADY_EXISTS_MESSAGE: &str = "already exists";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("kerberos-env is missing {key}"))]
    MissingConfiguration { key: &'static str },

    #[snafu(display("administrator credential for {principal} has neither a password nor a keytab"))]
    MissingSecret { principal: String },

    #[snafu(display("the MIT KDC handler has not been opened"))]
    NotOpen,

    #[snafu(display("failed to spawn kadmin"))]
    SpawnKadmin { source: std::io::Error },

    #[snafu(display("kadmin rejected the administrator credentials: {message}"))]
    AdministratorRejected { message: String },

    #[snafu(display("principal {principal:?} already exists"))]
    PrincipalAlreadyExists { principal: String },

    #[snafu(display("principal {principal:?} does not exist"))]
    PrincipalDoesNotExist { principal: String },

    #[snafu(display(
        "kadmin failed to {action} {principal:?}, with status {status} and message {message:?}"
    ))]
    Kadmin {
        action: &'static str,
        principal: String,
        status: ExitStatus,
        message: String,
    },
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn is_credential_rejection(&self) -> bool {
        matches!(self, Error::AdministratorRejected { .. })
    }
}

enum Secret {
    Password(Unloggable<String>),
    Keytab(String),
}

struct Session {
    principal: String,
    secret: Secret,
    realm: String,
    admin_server: Option<String>,
}

/// Administers an MIT Kerberos KDC by driving the `kadmin` CLI
#[derive(Default)]
pub struct MitAdmin {
    session: Option<Session>,
}

impl MitAdmin {
    pub fn open(
        &mut self,
        credential: &AdministratorCredential,
        realm: &str,
        configuration: &KdcConfiguration,
    ) -> Result<()> {
        let secret = match (&credential.password, &credential.keytab) {
            (Some(password), _) if !password.is_empty() => Secret::Password(password.clone()),
            (_, Some(keytab)) if !keytab.is_empty() => Secret::Keytab(keytab.clone()),
            _ => {
                return MissingSecretSnafu {
                    principal: &credential.principal,
                }
                .fail();
            }
        };
        if realm.is_empty() {
            return MissingConfigurationSnafu { key: "realm" }.fail();
        }
        self.session = Some(Session {
            principal: credential.principal.clone(),
            secret,
            realm: realm.to_string(),
            admin_server: configuration
                .get(ADMIN_SERVER_HOST_PROPERTY)
                .filter(|host| !host.is_empty())
                .cloned(),
        });
        Ok(())
    }

    pub fn close(&mut self) {
        self.session = None;
    }

    #[tracing::instrument(skip(self))]
    pub async fn principal_exists(&self, principal: &str) -> Result<bool> {
        let output = self.kadmin(&format!("get_principal {principal}")).await?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains(PRINCIPAL_DOES_NOT_EXIST_MESSAGE) {
            return Ok(false);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.contains("Principal: ") {
            return Ok(true);
        }
        KadminSnafu {
            action: "look up",
            principal,
            status: output.status,
            message: stderr,
        }
        .fail()
    }

    #[tracing::instrument(skip(self, password))]
    pub async fn create_principal(&self, principal: &str, password: &str) -> Result<Option<i32>> {
        tracing::info!("creating principal");
        let output = self
            .kadmin(&format!("add_principal -pw \"{password}\" {principal}"))
            .await?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains(PRINCIPAL_ALREADY_EXISTS_MESSAGE) {
            return PrincipalAlreadyExistsSnafu { principal }.fail();
        }
        if !output.status.success() || stderr.contains("add_principal:") {
            return KadminSnafu {
                action: "create",
                principal,
                status: output.status,
                message: stderr,
            }
            .fail();
        }
        self.key_number(principal).await
    }

    #[tracing::instrument(skip(self, password))]
    pub async fn set_principal_password(
        &self,
        principal: &str,
        password: &str,
    ) -> Result<Option<i32>> {
        tracing::info!("changing principal password");
        let output = self
            .kadmin(&format!("change_password -pw \"{password}\" {principal}"))
            .await?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains(PRINCIPAL_DOES_NOT_EXIST_MESSAGE) {
            return PrincipalDoesNotExistSnafu { principal }.fail();
        }
        if !output.status.success() || stderr.contains("change_password:") {
            return KadminSnafu {
                action: "change the password of",
                principal,
                status: output.status,
                message: stderr,
            }
            .fail();
        }
        self.key_number(principal).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_principal(&self, principal: &str) -> Result<bool> {
        tracing::info!("removing principal");
        let output = self
            .kadmin(&format!("delete_principal -force {principal}"))
            .await?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains(PRINCIPAL_DOES_NOT_EXIST_MESSAGE) {
            return Ok(false);
        }
        if !output.status.success() || stderr.contains("delete_principal:") {
            return KadminSnafu {
                action: "remove",
                principal,
                status: output.status,
                message: stderr,
            }
            .fail();
        }
        Ok(true)
    }

    async fn key_number(&self, principal: &str) -> Result<Option<i32>> {
        let output = self.kadmin(&format!("get_principal {principal}")).await?;
        Ok(parse_key_number(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn kadmin(&self, query: &str) -> Result<Output> {
        let session = self.session.as_ref().context(NotOpenSnafu)?;
        let mut cmd = Command::new("kadmin");
        cmd.args(["-p", session.principal.as_str(), "-r", session.realm.as_str()]);
        match &session.secret {
            Secret::Password(password) => cmd.args(["-w", password.as_str()]),
            Secret::Keytab(keytab) => cmd.args(["-k", "-t", keytab.as_str()]),
        };
        if let Some(admin_server) = &session.admin_server {
            cmd.args(["-s", admin_server.as_str()]);
        }
        let output = cmd
            .args(["-q", query])
            // avoid leaking tickets between invocations
            .env("KRB5CCNAME", "MEMORY:")
            .kill_on_drop(true)
            .output()
            .await
            .context(SpawnKadminSnafu)?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_credential_rejection(&stderr) {
            return AdministratorRejectedSnafu {
                message: stderr.trim(),
            }
            .fail();
        }
        Ok(output)
    }
}

fn is_credential_rejection(stderr: &str) -> bool {
    CREDENTIAL_REJECTION_MESSAGES
        .iter()
        .any(|msg| stderr.contains(msg))
}

/// Extracts the key version number from `get_principal` output (`Key: vno 3, aes256-cts-hmac-sha1-96`)
fn parse_key_number(get_principal_output: &str) -> Option<i32> {
    get_principal_output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Key: vno "))
        .filter_map(|rest| {
            rest.split(|c: char| !c.is_ascii_digit())
                .next()?
                .parse::<i32>()
                .ok()
        })
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_key_number_should_work() {
        let output = "Principal: nn/host1@EXAMPLE.COM
Expiration date: [never]
Number of keys: 2
Key: vno 3, aes256-cts-hmac-sha1-96
Key: vno 3, aes128-cts-hmac-sha1-96
MKey: vno 1
";
        assert_eq!(parse_key_number(output), Some(3));
        assert_eq!(parse_key_number("Principal: foo@EXAMPLE.COM\n"), None);
    }

    #[test]
    fn credential_rejection_detection() {
        assert!(is_credential_rejection(
            "kadmin: Incorrect password while initializing kadmin interface"
        ));
        assert!(is_credential_rejection(
            "kadmin: Client 'nobody@EXAMPLE.COM' not found in Kerberos database while initializing kadmin interface"
        ));
        assert!(!is_credential_rejection(
            "kadmin: Cannot contact any KDC for realm 'EXAMPLE.COM' while initializing kadmin interface"
        ));
    }

    #[test]
    fn open_requires_a_secret() {
        let mut admin = MitAdmin::default();
        let credential = AdministratorCredential {
            principal: "admin/admin@EXAMPLE.COM".to_string(),
            password: None,
            keytab: None,
        };
        assert!(matches!(
            admin.open(&credential, "EXAMPLE.COM", &KdcConfiguration::new()),
            Err(Error::MissingSecret { .. })
        ));
    }

    #[tokio::test]
    async fn operations_require_open_session() {
        let admin = MitAdmin::default();
        assert!(matches!(
            admin.principal_exists("foo@EXAMPLE.COM").await,
            Err(Error::NotOpen)
        ));
    }
}
