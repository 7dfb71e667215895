use std::collections::HashSet;

use byteorder::{LittleEndian, WriteBytesExt};
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Mod, Scope, SearchEntry};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::{AdministratorCredential, KdcConfiguration, split_realm};

/// `kerberos-env` property holding the `ldaps://` URL of the domain controller
pub const LDAP_URL_PROPERTY: &str = "ldap_url";
/// `kerberos-env` property holding the DN under which principals are managed
pub const CONTAINER_DN_PROPERTY: &str = "container_dn";

// Result codes are defined by https://www.rfc-editor.org/rfc/rfc4511#appendix-A.1
const LDAP_RESULT_CODE_INVALID_CREDENTIALS: u32 = 49;
const LDAP_RESULT_CODE_ENTRY_ALREADY_EXISTS: u32 = 68;

// NORMAL_ACCOUNT | DONT_EXPIRE_PASSWORD
const USER_ACCOUNT_CONTROL: &str = "66048";
const KEY_VERSION_NUMBER_ATTRIBUTE: &str = "msDS-KeyVersionNumber";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("kerberos-env is missing {key}"))]
    MissingConfiguration { key: &'static str },

    #[snafu(display("LDAP URL {url:?} must use the ldaps scheme"))]
    InsecureLdapUrl { url: String },

    #[snafu(display("administrator credential for {principal} has no password"))]
    MissingPassword { principal: String },

    #[snafu(display("the Active Directory handler has not been opened"))]
    NotOpen,

    #[snafu(display("failed to connect to LDAP server"))]
    ConnectLdap { source: ldap3::LdapError },

    #[snafu(display("LDAP server rejected the administrator credentials for {principal}"))]
    AdministratorRejected { principal: String },

    #[snafu(display("failed to authenticate to LDAP server"))]
    LdapAuthn { source: ldap3::LdapError },

    #[snafu(display("failed to search for principal {principal:?}"))]
    SearchPrincipal {
        source: ldap3::LdapError,
        principal: String,
    },

    #[snafu(display("failed to create LDAP user for {principal:?}"))]
    CreateLdapUser {
        source: ldap3::LdapError,
        principal: String,
    },

    #[snafu(display("principal {principal:?} already exists"))]
    PrincipalAlreadyExists { principal: String },

    #[snafu(display("principal {principal:?} does not exist"))]
    PrincipalDoesNotExist { principal: String },

    #[snafu(display("failed to update password of {principal:?}"))]
    UpdatePassword {
        source: ldap3::LdapError,
        principal: String,
    },

    #[snafu(display("failed to delete LDAP user {dn:?}"))]
    DeleteLdapUser {
        source: ldap3::LdapError,
        dn: String,
    },

    #[snafu(display("failed to unbind from LDAP server"))]
    Unbind { source: ldap3::LdapError },
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn is_credential_rejection(&self) -> bool {
        matches!(self, Error::AdministratorRejected { .. })
    }
}

struct Session {
    ldap: Ldap,
    container_dn: String,
    realm: String,
}

/// Administers principals stored as user accounts in a Microsoft Active Directory domain
#[derive(Default)]
pub struct AdAdmin {
    session: Option<Session>,
}

impl AdAdmin {
    pub async fn open(
        &mut self,
        credential: &AdministratorCredential,
        realm: &str,
        configuration: &KdcConfiguration,
    ) -> Result<()> {
        let ldap_url = configuration
            .get(LDAP_URL_PROPERTY)
            .filter(|url| !url.is_empty())
            .context(MissingConfigurationSnafu {
                key: LDAP_URL_PROPERTY,
            })?;
        if !ldap_url.starts_with("ldaps://") {
            return InsecureLdapUrlSnafu { url: ldap_url }.fail();
        }
        let container_dn = configuration
            .get(CONTAINER_DN_PROPERTY)
            .filter(|dn| !dn.is_empty())
            .context(MissingConfigurationSnafu {
                key: CONTAINER_DN_PROPERTY,
            })?;
        let password = credential
            .password
            .as_ref()
            .filter(|password| !password.is_empty())
            .context(MissingPasswordSnafu {
                principal: &credential.principal,
            })?;

        let (ldap_conn, mut ldap) = LdapConnAsync::with_settings(LdapConnSettings::new(), ldap_url)
            .await
            .context(ConnectLdapSnafu)?;
        ldap3::drive!(ldap_conn);
        let bind_result = ldap
            .simple_bind(&credential.principal, password)
            .await
            .context(LdapAuthnSnafu)?;
        if bind_result.rc == LDAP_RESULT_CODE_INVALID_CREDENTIALS {
            return AdministratorRejectedSnafu {
                principal: &credential.principal,
            }
            .fail();
        }
        bind_result.success().context(LdapAuthnSnafu)?;
        self.session = Some(Session {
            ldap,
            container_dn: container_dn.clone(),
            realm: realm.to_string(),
        });
        Ok(())
    }

    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            session.ldap.unbind().await.context(UnbindSnafu)?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn principal_exists(&mut self, principal: &str) -> Result<bool> {
        Ok(self.find_principal(principal, &[]).await?.is_some())
    }

    #[tracing::instrument(skip(self, password))]
    pub async fn create_principal(
        &mut self,
        principal: &str,
        password: &str,
        service: bool,
    ) -> Result<Option<i32>> {
        let session = self.session.as_mut().context(NotOpenSnafu)?;
        let principal = qualify(principal, &session.realm);
        let (principal_realmless, _) = split_realm(&principal);
        tracing::info!("creating principal");
        let principal_cn = ldap3::dn_escape(principal_realmless);
        // AD restricts RDNs to 64 characters
        let principal_cn = principal_cn.get(..64).unwrap_or(&*principal_cn);
        let user_dn = format!("CN={principal_cn},{}", session.container_dn);
        let password_ad_encoded = encode_password(password);
        let mut attributes: Vec<(&[u8], HashSet<&[u8]>)> = vec![
            (
                "objectClass".as_bytes(),
                [
                    "top".as_bytes(),
                    "person".as_bytes(),
                    "organizationalPerson".as_bytes(),
                    "user".as_bytes(),
                ]
                .into(),
            ),
            ("cn".as_bytes(), [principal_cn.as_bytes()].into()),
            ("userPrincipalName".as_bytes(), [principal.as_bytes()].into()),
            ("unicodePwd".as_bytes(), [&*password_ad_encoded].into()),
            (
                "userAccountControl".as_bytes(),
                [USER_ACCOUNT_CONTROL.as_bytes()].into(),
            ),
        ];
        if service {
            attributes.push((
                "servicePrincipalName".as_bytes(),
                [principal_realmless.as_bytes()].into(),
            ));
        }
        let create_result = session
            .ldap
            .add(&user_dn, attributes)
            .await
            .context(CreateLdapUserSnafu {
                principal: &principal,
            })?;
        if create_result.rc == LDAP_RESULT_CODE_ENTRY_ALREADY_EXISTS {
            return PrincipalAlreadyExistsSnafu { principal }.fail();
        }
        create_result.success().context(CreateLdapUserSnafu {
            principal: &principal,
        })?;
        self.key_number(&principal).await
    }

    #[tracing::instrument(skip(self, password))]
    pub async fn set_principal_password(
        &mut self,
        principal: &str,
        password: &str,
    ) -> Result<Option<i32>> {
        let dn = self
            .find_principal(principal, &[])
            .await?
            .context(PrincipalDoesNotExistSnafu { principal })?
            .dn;
        tracing::info!(%dn, "changing principal password");
        let session = self.session.as_mut().context(NotOpenSnafu)?;
        session
            .ldap
            .modify(
                &dn,
                vec![Mod::Replace(
                    b"unicodePwd".to_vec(),
                    [encode_password(password)].into(),
                )],
            )
            .await
            .and_then(|res| res.success())
            .context(UpdatePasswordSnafu { principal })?;
        self.key_number(principal).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_principal(&mut self, principal: &str) -> Result<bool> {
        let Some(entry) = self.find_principal(principal, &[]).await? else {
            return Ok(false);
        };
        tracing::info!(dn = %entry.dn, "removing principal");
        let session = self.session.as_mut().context(NotOpenSnafu)?;
        session
            .ldap
            .delete(&entry.dn)
            .await
            .and_then(|res| res.success())
            .context(DeleteLdapUserSnafu { dn: &entry.dn })?;
        Ok(true)
    }

    async fn key_number(&mut self, principal: &str) -> Result<Option<i32>> {
        Ok(self
            .find_principal(principal, &[KEY_VERSION_NUMBER_ATTRIBUTE])
            .await?
            .and_then(|entry| {
                entry
                    .attrs
                    .get(KEY_VERSION_NUMBER_ATTRIBUTE)?
                    .first()?
                    .parse()
                    .ok()
            }))
    }

    async fn find_principal(
        &mut self,
        principal: &str,
        attributes: &[&str],
    ) -> Result<Option<SearchEntry>> {
        let session = self.session.as_mut().context(NotOpenSnafu)?;
        let principal = qualify(principal, &session.realm);
        let (entries, _) = session
            .ldap
            .search(
                &session.container_dn,
                Scope::Subtree,
                &format!(
                    "(&(objectClass=user)(userPrincipalName={}))",
                    ldap3::ldap_escape(&principal)
                ),
                attributes.to_vec(),
            )
            .await
            .and_then(|res| res.success())
            .context(SearchPrincipalSnafu {
                principal: &principal,
            })?;
        Ok(entries.into_iter().next().map(SearchEntry::construct))
    }
}

/// Appends the default realm to `principal`, unless it already names one
fn qualify(principal: &str, realm: &str) -> String {
    match split_realm(principal) {
        (_, Some(_)) => principal.to_string(),
        (name, None) => format!("{name}@{realm}"),
    }
}

/// Encodes a password the way AD expects it in `unicodePwd`: quoted, as UTF-16LE
fn encode_password(password: &str) -> Vec<u8> {
    let mut pwd_utf16le = Vec::new();
    format!("\"{password}\"").encode_utf16().for_each(|word| {
        WriteBytesExt::write_u16::<LittleEndian>(&mut pwd_utf16le, word)
            .expect("writing into a Vec is infallible")
    });
    pwd_utf16le
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_password_should_quote_and_use_utf16le() {
        assert_eq!(
            encode_password("ab"),
            vec![b'"', 0, b'a', 0, b'b', 0, b'"', 0]
        );
    }

    #[test]
    fn qualify_should_only_add_missing_realm() {
        assert_eq!(qualify("nn/host1", "EXAMPLE.COM"), "nn/host1@EXAMPLE.COM");
        assert_eq!(
            qualify("nn/host1@OTHER.COM", "EXAMPLE.COM"),
            "nn/host1@OTHER.COM"
        );
    }

    #[tokio::test]
    async fn open_requires_ldaps() {
        let mut admin = AdAdmin::default();
        let credential = AdministratorCredential::with_password("admin@EXAMPLE.COM", "secret");
        let config = KdcConfiguration::from([
            (LDAP_URL_PROPERTY.to_string(), "ldap://dc.example.com".to_string()),
            (CONTAINER_DN_PROPERTY.to_string(), "OU=hadoop,DC=example,DC=com".to_string()),
        ]);
        assert!(matches!(
            admin.open(&credential, "EXAMPLE.COM", &config).await,
            Err(Error::InsecureLdapUrl { .. })
        ));
        assert!(matches!(
            admin
                .open(&credential, "EXAMPLE.COM", &KdcConfiguration::new())
                .await,
            Err(Error::MissingConfiguration {
                key: LDAP_URL_PROPERTY
            })
        ));
    }

    #[tokio::test]
    async fn operations_require_open_session() {
        let mut admin = AdAdmin::default();
        assert!(matches!(
            admin.remove_principal("foo@EXAMPLE.COM").await,
            Err(Error::NotOpen)
        ));
        // closing a handler that was never opened is a no-op
        admin.close().await.unwrap();
    }
}
