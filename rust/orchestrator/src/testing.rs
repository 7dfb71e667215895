//! Shared fixtures for unit tests

use std::{
    convert::Infallible,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use stackable_kdc_admin::{
    mit, split_realm, AdministratorCredential, KdcConfiguration, KdcOperationHandler,
    KdcOperationHandlerFactory, KdcType,
};

use crate::{
    descriptor::{resolver::DescriptorProvider, KerberosDescriptor},
    session::ClusterSession,
    topology::{Cluster, StackId},
};

const CLUSTER: &str = "
name: c1
id: 1
stack:
  name: HDP
  version: '2.2'
services:
  KERBEROS: {}
  SERVICE1: {}
  SERVICE2: {}
  SERVICE3: {}
hosts:
  host1:
    components:
    - service: KERBEROS
      component: KERBEROS_CLIENT
      state: INSTALLED
    - service: SERVICE1
      component: COMPONENT1
      state: STARTED
    - service: SERVICE2
      component: COMPONENT2
      state: STARTED
  host2:
    components:
    - service: KERBEROS
      component: KERBEROS_CLIENT
      state: STARTED
    - service: SERVICE3
      component: COMPONENT3
      state: STARTED
  host3:
    components:
    - service: SERVICE1
      component: COMPONENT1
      state: STARTED
desiredConfigs:
  kerberos-env:
    kdc_type: mit-kdc
    realm: EXAMPLE.COM
  krb5-conf:
    domains: example.com
  cluster-env:
    kerberos_domain: EXAMPLE.COM
    smokeuser: ambari-qa
    user_group: hadoop
  service1-env:
    service1_user: service1
session:
  kerberos_admin/principal: principal
  kerberos_admin/password: password
";

/// Three hosts: `host1` and `host2` run a Kerberos client, `host3` does not
pub fn cluster() -> Cluster {
    serde_yaml::from_str(CLUSTER).unwrap()
}

pub fn descriptor() -> KerberosDescriptor {
    serde_json::from_value(serde_json::json!({
        "properties": {"keytab_dir": "/etc/security/keytabs"},
        "configurations": [
            {"core-site": {"hadoop.security.authentication": "kerberos"}}
        ],
        "auth_to_local_properties": ["core-site/hadoop.security.auth_to_local"],
        "services": [
            {
                "name": "SERVICE1",
                "components": [
                    {
                        "name": "COMPONENT1",
                        "identities": [
                            {
                                "name": "identity1a",
                                "principal": {
                                    "value": "component1/_HOST@${realm}",
                                    "type": "service",
                                    "local_username": "${service1-env/service1_user}",
                                    "configuration": "service1-site/component1.principal"
                                },
                                "keytab": {
                                    "file": "${keytab_dir}/component1.service.keytab",
                                    "owner": {"name": "${service1-env/service1_user}", "access": "r"},
                                    "group": {"name": "${cluster-env/user_group}", "access": ""},
                                    "configuration": "service1-site/component1.keytab"
                                }
                            },
                            {
                                "name": "identity1b",
                                "principal": {"value": "service1-user@${realm}", "type": "user"},
                                "keytab": {"file": "${keytab_dir}/service1.headless.keytab"}
                            }
                        ]
                    }
                ]
            },
            {
                "name": "SERVICE2",
                "components": [
                    {
                        "name": "COMPONENT2",
                        "identities": [
                            {
                                "name": "identity2",
                                "principal": {"value": "component2/_HOST@${realm}"},
                                "keytab": {"file": "${keytab_dir}/component2.service.keytab"}
                            }
                        ]
                    }
                ]
            },
            {
                "name": "SERVICE3",
                "components": [
                    {
                        "name": "COMPONENT3",
                        "identities": [
                            {
                                "name": "identity3",
                                "principal": {"value": "component3/_HOST@${realm}"},
                                "keytab": {"file": "${keytab_dir}/component3.service.keytab"}
                            }
                        ]
                    }
                ]
            },
            {
                "name": "SERVICE9",
                "configurations": [
                    {"service9-site": {"security": "kerberos"}}
                ]
            }
        ]
    }))
    .unwrap()
}

pub fn session(principal: &str, password: &str) -> ClusterSession {
    let mut session = ClusterSession::default();
    session.set_administrator_credential(Some(AdministratorCredential::with_password(
        principal, password,
    )));
    session
}

pub struct StaticDescriptorProvider {
    pub artifact: Option<serde_json::Value>,
    pub stack: Option<KerberosDescriptor>,
}

impl Default for StaticDescriptorProvider {
    fn default() -> Self {
        Self {
            artifact: None,
            stack: Some(descriptor()),
        }
    }
}

#[async_trait]
impl DescriptorProvider for StaticDescriptorProvider {
    type Error = Infallible;

    async fn cluster_artifact(
        &self,
        _cluster_name: &str,
    ) -> Result<Option<serde_json::Value>, Self::Error> {
        Ok(self.artifact.clone())
    }

    async fn stack_descriptor(
        &self,
        _stack: &StackId,
    ) -> Result<Option<KerberosDescriptor>, Self::Error> {
        Ok(self.stack.clone())
    }
}

#[derive(Debug, Default)]
pub struct KdcCounters {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// A KDC that only knows the administrator principal `principal`
#[derive(Clone, Debug, Default)]
pub struct FakeKdc {
    pub counters: Arc<KdcCounters>,
    pub unreachable: bool,
}

impl FakeKdc {
    pub const WRONG_PASSWORD: &'static str = "wrong-password";

    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }
}

impl KdcOperationHandlerFactory for FakeKdc {
    fn handler(&self, _kdc_type: KdcType) -> Box<dyn KdcOperationHandler> {
        Box::new(FakeKdcHandler { kdc: self.clone() })
    }
}

struct FakeKdcHandler {
    kdc: FakeKdc,
}

#[async_trait]
impl KdcOperationHandler for FakeKdcHandler {
    async fn open(
        &mut self,
        credential: &AdministratorCredential,
        _realm: &str,
        _configuration: &KdcConfiguration,
    ) -> stackable_kdc_admin::Result<()> {
        self.kdc.counters.opened.fetch_add(1, Ordering::SeqCst);
        if self.kdc.unreachable {
            return Err(mit::Error::NotOpen.into());
        }
        if credential.password.as_deref().map(String::as_str) == Some(FakeKdc::WRONG_PASSWORD) {
            return Err(mit::Error::AdministratorRejected {
                message: "Incorrect password while initializing kadmin interface".to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn close(&mut self) -> stackable_kdc_admin::Result<()> {
        self.kdc.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn principal_exists(&mut self, principal: &str) -> stackable_kdc_admin::Result<bool> {
        Ok(split_realm(principal).0 == "principal")
    }

    async fn create_principal(
        &mut self,
        _principal: &str,
        _password: &str,
        _service: bool,
    ) -> stackable_kdc_admin::Result<Option<i32>> {
        Ok(Some(1))
    }

    async fn set_principal_password(
        &mut self,
        _principal: &str,
        _password: &str,
    ) -> stackable_kdc_admin::Result<Option<i32>> {
        Ok(Some(2))
    }

    async fn remove_principal(&mut self, _principal: &str) -> stackable_kdc_admin::Result<bool> {
        Ok(true)
    }
}
