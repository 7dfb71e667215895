//! Expansion of principal and keytab templates
//!
//! Templates may refer to
//!
//! - `_HOST` and `${host}`: the host the identity is materialized for,
//! - `${realm}`: the cluster's default realm,
//! - `${config-type/property}`: a configuration property in effect on the host,
//! - `${property}`: a property of the Kerberos descriptor itself (stored under the empty configuration type).
//!
//! Unresolvable placeholders are left untouched. Configuration values may themselves contain
//! placeholders, which are expanded in turn. Placeholders that (transitively) refer to themselves are
//! left untouched as well, so expanding an already expanded string changes nothing.

use snafu::Snafu;

use crate::topology::Configurations;

pub const HOST_TOKEN: &str = "_HOST";
const HOST_VARIABLE: &str = "host";
const REALM_VARIABLE: &str = "realm";

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum Error {
    #[snafu(display("template {template:?} refers to the host, but no host was given"))]
    MissingHost { template: String },
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// How host references in a template are treated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostScope<'a> {
    /// Substitute the given host name
    Host(&'a str),
    /// Host references are an error
    Unbound,
    /// Keep host references as-is, for values that are resolved on each host later on
    Preserve,
}

pub struct TemplateExpander<'a> {
    realm: &'a str,
    configurations: &'a Configurations,
}

impl<'a> TemplateExpander<'a> {
    pub fn new(realm: &'a str, configurations: &'a Configurations) -> Self {
        Self {
            realm,
            configurations,
        }
    }

    pub fn expand(&self, template: &str, host: HostScope) -> Result<String> {
        let mut expanded = String::with_capacity(template.len());
        let mut rest = template;
        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix("${") {
                let Some(end) = after.find('}') else {
                    // unterminated placeholder, nothing left to substitute
                    expanded.push_str(rest);
                    break;
                };
                let name = &after[..end];
                let mut in_progress = Vec::new();
                match self.resolve(name, template, host, &mut in_progress)? {
                    Expansion::Resolved(value) => expanded.push_str(&value),
                    Expansion::Unresolved | Expansion::Cyclic => {
                        expanded.push_str(&rest[..end + 3]);
                    }
                }
                rest = &after[end + 1..];
            } else {
                rest = self.copy_literal(rest, &mut expanded, template, host)?;
            }
        }
        Ok(expanded)
    }

    /// Resolves the placeholder `name`, expanding the placeholders of its value in turn
    ///
    /// `in_progress` holds the placeholders currently being resolved. A placeholder that depends on
    /// itself is [`Expansion::Cyclic`], which keeps every placeholder along the cycle unexpanded.
    fn resolve<'b>(
        &'b self,
        name: &'b str,
        template: &str,
        host: HostScope<'b>,
        in_progress: &mut Vec<&'b str>,
    ) -> Result<Expansion> {
        if in_progress.contains(&name) {
            return Ok(Expansion::Cyclic);
        }
        let value = match name {
            REALM_VARIABLE => return Ok(Expansion::Resolved(self.realm.to_string())),
            HOST_VARIABLE => {
                return Ok(Expansion::Resolved(
                    resolve_host("${host}", template, host)?.to_string(),
                ))
            }
            _ => match self.property(name) {
                Some(value) => value,
                None => return Ok(Expansion::Unresolved),
            },
        };

        in_progress.push(name);
        let mut expanded = String::with_capacity(value.len());
        let mut rest = value;
        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix("${") {
                let Some(end) = after.find('}') else {
                    expanded.push_str(rest);
                    break;
                };
                match self.resolve(&after[..end], template, host, in_progress)? {
                    Expansion::Resolved(inner) => expanded.push_str(&inner),
                    Expansion::Unresolved => expanded.push_str(&rest[..end + 3]),
                    Expansion::Cyclic => return Ok(Expansion::Cyclic),
                }
                rest = &after[end + 1..];
            } else {
                rest = self.copy_literal(rest, &mut expanded, template, host)?;
            }
        }
        in_progress.pop();
        Ok(Expansion::Resolved(expanded))
    }

    /// Copies the next token of `rest` into `expanded`, substituting `_HOST`
    fn copy_literal<'r>(
        &self,
        rest: &'r str,
        expanded: &mut String,
        template: &str,
        host: HostScope,
    ) -> Result<&'r str> {
        if let Some(after) = rest.strip_prefix(HOST_TOKEN) {
            expanded.push_str(resolve_host(HOST_TOKEN, template, host)?);
            return Ok(after);
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            expanded.push(c);
        }
        Ok(chars.as_str())
    }

    fn property(&self, name: &str) -> Option<&'a str> {
        let (config_type, property) = name.split_once('/').unwrap_or(("", name));
        self.configurations
            .get(config_type)
            .and_then(|properties| properties.get(property))
            .map(String::as_str)
    }
}

enum Expansion {
    Resolved(String),
    Unresolved,
    Cyclic,
}

fn resolve_host<'a>(placeholder: &'a str, template: &str, host: HostScope<'a>) -> Result<&'a str> {
    match host {
        HostScope::Host(host) => Ok(host),
        HostScope::Preserve => Ok(placeholder),
        HostScope::Unbound => MissingHostSnafu { template }.fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configurations() -> Configurations {
        serde_yaml::from_str(
            "
'':
  principal_suffix: -c1
cluster-env:
  smokeuser: ambari-qa
  user_group: hadoop
hadoop-env:
  hdfs_user: hdfs
  hdfs_principal: ${hadoop-env/hdfs_user}${principal_suffix}@${realm}
",
        )
        .unwrap()
    }

    #[test]
    fn expand_should_substitute_host_and_realm() {
        let configurations = configurations();
        let expander = TemplateExpander::new("EXAMPLE.COM", &configurations);
        assert_eq!(
            expander
                .expand("nn/_HOST@${realm}", HostScope::Host("host1"))
                .unwrap(),
            "nn/host1@EXAMPLE.COM"
        );
        assert_eq!(
            expander
                .expand("HTTP/${host}@${realm}", HostScope::Host("host1"))
                .unwrap(),
            "HTTP/host1@EXAMPLE.COM"
        );
    }

    #[test]
    fn expand_should_resolve_configuration_references() {
        let configurations = configurations();
        let expander = TemplateExpander::new("EXAMPLE.COM", &configurations);
        assert_eq!(
            expander
                .expand("${cluster-env/smokeuser}_abc123@${realm}", HostScope::Unbound)
                .unwrap(),
            "ambari-qa_abc123@EXAMPLE.COM"
        );
        // nested references are expanded as well
        assert_eq!(
            expander
                .expand("${hadoop-env/hdfs_principal}", HostScope::Unbound)
                .unwrap(),
            "hdfs-c1@EXAMPLE.COM"
        );
    }

    #[test]
    fn expand_should_keep_unknown_placeholders() {
        let configurations = configurations();
        let expander = TemplateExpander::new("EXAMPLE.COM", &configurations);
        assert_eq!(
            expander
                .expand("${keytab_dir}/smokeuser.headless.keytab", HostScope::Unbound)
                .unwrap(),
            "${keytab_dir}/smokeuser.headless.keytab"
        );
        assert_eq!(
            expander.expand("broken ${realm", HostScope::Unbound).unwrap(),
            "broken ${realm"
        );
    }

    #[test]
    fn expand_should_fail_without_host() {
        let configurations = configurations();
        let expander = TemplateExpander::new("EXAMPLE.COM", &configurations);
        assert_eq!(
            expander.expand("nn/_HOST@${realm}", HostScope::Unbound),
            Err(Error::MissingHost {
                template: "nn/_HOST@${realm}".to_string()
            })
        );
        assert_eq!(
            expander
                .expand("nn/_HOST@${realm}", HostScope::Preserve)
                .unwrap(),
            "nn/_HOST@EXAMPLE.COM"
        );
    }

    #[test]
    fn expand_should_be_idempotent() {
        let configurations = configurations();
        let expander = TemplateExpander::new("EXAMPLE.COM", &configurations);
        for template in [
            "nn/_HOST@${realm}",
            "${hadoop-env/hdfs_principal}",
            "${unknown/property}-${realm}",
            "${keytab_dir}/nn.service.keytab",
        ] {
            let once = expander.expand(template, HostScope::Host("host1")).unwrap();
            let twice = expander.expand(&once, HostScope::Host("host1")).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn expand_should_keep_self_referencing_placeholders() {
        let mut configurations = configurations();
        let descriptor_properties = configurations.entry(String::new()).or_default();
        descriptor_properties.insert("a".to_string(), "x${a}".to_string());
        descriptor_properties.insert("b".to_string(), "y${c}".to_string());
        descriptor_properties.insert("c".to_string(), "z${b}".to_string());
        let expander = TemplateExpander::new("EXAMPLE.COM", &configurations);
        for (template, expected) in [
            ("${a}", "${a}"),
            ("pre-${b}-${realm}", "pre-${b}-EXAMPLE.COM"),
            ("${c}/${principal_suffix}", "${c}/-c1"),
        ] {
            let once = expander.expand(template, HostScope::Unbound).unwrap();
            assert_eq!(once, expected);
            assert_eq!(expander.expand(&once, HostScope::Unbound).unwrap(), once);
        }
    }
}
