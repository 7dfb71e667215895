//! Dispatches named custom operations, as passed along with a request

use std::{collections::BTreeMap, str::FromStr};

use snafu::ensure;
use stackable_kdc_admin::KdcOperationHandlerFactory;

use crate::{
    descriptor::resolver::DescriptorProvider,
    orchestrator::{InvalidOperationValueSnafu, KerberosOrchestrator, Result},
    pipeline::PipelineSummary,
    stage::StageContainer,
    topology::Cluster,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum CustomOperation {
    RegenerateKeytabs,
}

/// Picks the known operations out of `operations`
///
/// Unknown operation names are ignored. Known operations only accept the value `true` (in any case).
pub fn parse_custom_operations(operations: &BTreeMap<String, String>) -> Result<Vec<CustomOperation>> {
    let mut parsed = Vec::new();
    for (name, value) in operations {
        let Ok(operation) = CustomOperation::from_str(name) else {
            tracing::debug!(operation = %name, "ignoring unknown custom operation");
            continue;
        };
        ensure!(
            value.trim().eq_ignore_ascii_case("true"),
            InvalidOperationValueSnafu {
                operation: name,
                value,
            }
        );
        parsed.push(operation);
    }
    Ok(parsed)
}

impl<D: DescriptorProvider, K: KdcOperationHandlerFactory> KerberosOrchestrator<D, K> {
    /// Runs every known operation in `operations`, returning the stages appended by the last one
    ///
    /// All operations are validated before any of them runs.
    #[tracing::instrument(skip(self, cluster, container), fields(cluster.name = %cluster.name))]
    pub async fn execute_custom_operations<C: StageContainer + ?Sized>(
        &self,
        cluster: &Cluster,
        operations: &BTreeMap<String, String>,
        container: &mut C,
    ) -> Result<Option<PipelineSummary>> {
        let mut summary = None;
        for operation in parse_custom_operations(operations)? {
            tracing::info!(%operation, "executing custom operation");
            summary = Some(match operation {
                CustomOperation::RegenerateKeytabs => {
                    self.regenerate_keytabs(cluster, container).await?
                }
            });
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::Error;

    fn operations(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parse_should_accept_true() {
        assert_eq!(
            parse_custom_operations(&operations(&[("regenerate_keytabs", "true")])).unwrap(),
            vec![CustomOperation::RegenerateKeytabs]
        );
        assert_eq!(
            parse_custom_operations(&operations(&[("regenerate_keytabs", "TRUE")])).unwrap(),
            vec![CustomOperation::RegenerateKeytabs]
        );
    }

    #[test]
    fn parse_should_ignore_unknown_operations() {
        assert_eq!(
            parse_custom_operations(&operations(&[("invalid_operation", "false")])).unwrap(),
            vec![]
        );
        assert_eq!(
            parse_custom_operations(&BTreeMap::new()).unwrap(),
            vec![]
        );
    }

    #[test]
    fn parse_should_reject_other_values() {
        let err = parse_custom_operations(&operations(&[("regenerate_keytabs", "false")]))
            .unwrap_err();
        assert!(matches!(
            &err,
            Error::InvalidOperationValue { operation, value }
                if operation == "regenerate_keytabs" && value == "false"
        ));
    }
}
