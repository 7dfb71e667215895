//! Per-cluster session attributes shared between requests

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use stackable_kdc_admin::{AdministratorCredential, Unloggable};

const SERVICE_CHECK_IDENTIFIER_LENGTH: usize = 6;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSession {
    #[serde(
        rename = "kerberos_admin/principal",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    admin_principal: Option<String>,
    #[serde(
        rename = "kerberos_admin/password",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    admin_password: Option<Unloggable<String>>,
    #[serde(
        rename = "kerberos_admin/keytab",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    admin_keytab: Option<String>,
    #[serde(
        rename = "_kerberos_internal_service_check_identifier",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    service_check_identifier: Option<String>,
}

impl ClusterSession {
    /// The stashed KDC administrator credential, if a principal has been stashed
    pub fn administrator_credential(&self) -> Option<AdministratorCredential> {
        let principal = self
            .admin_principal
            .as_deref()
            .map(str::trim)
            .filter(|principal| !principal.is_empty())?;
        Some(AdministratorCredential {
            principal: principal.to_string(),
            password: self.admin_password.clone(),
            keytab: self.admin_keytab.clone(),
        })
    }

    pub fn set_administrator_credential(&mut self, credential: Option<AdministratorCredential>) {
        match credential {
            Some(credential) => {
                self.admin_principal = Some(credential.principal);
                self.admin_password = credential.password;
                self.admin_keytab = credential.keytab;
            }
            None => {
                self.admin_principal = None;
                self.admin_password = None;
                self.admin_keytab = None;
            }
        }
    }

    pub fn service_check_identifier(&self) -> Option<&str> {
        self.service_check_identifier.as_deref()
    }

    /// Returns the service check identifier, generating and stashing a new one if none exists yet
    pub fn get_or_create_service_check_identifier(&mut self) -> &str {
        self.service_check_identifier.get_or_insert_with(|| {
            rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(SERVICE_CHECK_IDENTIFIER_LENGTH)
                .map(|c| char::from(c).to_ascii_lowercase())
                .collect()
        })
    }

    pub fn clear_service_check_identifier(&mut self) {
        self.service_check_identifier = None;
    }
}
