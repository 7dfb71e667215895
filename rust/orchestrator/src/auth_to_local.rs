//! Generates `auth_to_local` rules, which map Kerberos principals onto local user names

use std::collections::BTreeSet;

use stackable_kdc_admin::split_realm;

const DEFAULT_RULE: &str = "DEFAULT";

#[derive(Clone, Debug, Default)]
pub struct AuthToLocalBuilder {
    rules: BTreeSet<String>,
}

impl AuthToLocalBuilder {
    /// Maps `principal` (of the form `primary[/instance][@REALM]`) onto `local_username`
    ///
    /// Principals without a realm are assumed to belong to `default_realm`.
    pub fn add_rule(&mut self, principal: &str, local_username: &str, default_realm: &str) {
        let (name, realm) = split_realm(principal);
        let realm = realm.unwrap_or(default_realm);
        let mut components = name.split('/');
        let primary = components.next().unwrap_or_default();
        if primary.is_empty() || local_username.is_empty() {
            return;
        }
        let component_count = 1 + components.count();
        self.rules.insert(format!(
            "RULE:[{component_count}:$1@$0]({primary}@{realm})s/.*/{local_username}/"
        ));
    }

    /// Renders the rules, followed by a rule stripping `default_realm` from any other single-component
    /// principal and the fallback `DEFAULT` rule
    pub fn generate(&self, default_realm: &str) -> String {
        self.rules
            .iter()
            .cloned()
            .chain([
                format!("RULE:[1:$1@$0](.*@{default_realm})s/@.*//"),
                DEFAULT_RULE.to_string(),
            ])
            .collect::<Vec<_>>()
            .join("\n")
    }
}
