// Copyright 2025 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Node selector requirements and their compatibility with a claim's labels.

use crate::types;
use crate::types::error::InvalidRequirementSnafu;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::Display;

/// Labels the provider always sets on launched capacity. A requirement on one of these
/// keys is not violated merely because the claim never recorded the label.
const WELL_KNOWN_LABELS: &[&str] = &[
    "topology.kubernetes.io/zone",
    "topology.kubernetes.io/region",
    "node.kubernetes.io/instance-type",
    "kubernetes.io/arch",
    "kubernetes.io/os",
    "karpenter.sh/capacity-type",
    "karpenter.k8s.aws/instance-category",
    "karpenter.k8s.aws/instance-family",
    "karpenter.k8s.aws/instance-generation",
    "karpenter.k8s.aws/instance-size",
    "karpenter.k8s.aws/instance-cpu",
    "karpenter.k8s.aws/instance-memory",
];

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Display)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
    Gt,
    Lt,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeSelectorRequirement {
    pub key: String,
    pub operator: Operator,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_values: Option<i32>,
}

impl NodeSelectorRequirement {
    pub fn new(key: &str, operator: Operator, values: &[&str]) -> Self {
        Self {
            key: key.to_owned(),
            operator,
            values: values.iter().map(|v| (*v).to_owned()).collect(),
            min_values: None,
        }
    }

    /// Checks the requirement against a label set.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> Result<bool, types::error::Error> {
        let value = labels.get(&self.key);
        let undefined_well_known = value.is_none() && WELL_KNOWN_LABELS.contains(&self.key.as_str());

        Ok(match self.operator {
            Operator::In => match value {
                Some(v) => self.values.contains(v),
                None => undefined_well_known,
            },
            Operator::NotIn => value.is_none_or(|v| !self.values.contains(v)),
            Operator::Exists => value.is_some() || undefined_well_known,
            Operator::DoesNotExist => value.is_none(),
            Operator::Gt | Operator::Lt => {
                let bound = self.bound()?;
                match value {
                    Some(v) => match v.parse::<i64>() {
                        Ok(v) if self.operator == Operator::Gt => v > bound,
                        Ok(v) => v < bound,
                        Err(_) => false,
                    },
                    None => undefined_well_known,
                }
            }
        })
    }

    fn bound(&self) -> Result<i64, types::error::Error> {
        match self.values.as_slice() {
            [single] => single.parse::<i64>().map_err(|_| {
                InvalidRequirementSnafu {
                    key: self.key.clone(),
                    message: format!("'{single}' is not an integer"),
                }
                .build()
            }),
            _ => InvalidRequirementSnafu {
                key: self.key.clone(),
                message: format!("{} requires exactly one value", self.operator),
            }
            .fail(),
        }
    }
}

/// True when every requirement is satisfied by the labels.
pub fn compatible(
    requirements: &[NodeSelectorRequirement],
    labels: &BTreeMap<String, String>,
) -> Result<bool, types::error::Error> {
    for requirement in requirements {
        if !requirement.matches(labels)? {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_in_and_not_in() {
        let l = labels(&[("karpenter.sh/capacity-type", "on-demand")]);
        let spot = NodeSelectorRequirement::new("karpenter.sh/capacity-type", Operator::In, &["spot"]);
        let od = NodeSelectorRequirement::new(
            "karpenter.sh/capacity-type",
            Operator::In,
            &["spot", "on-demand"],
        );
        let not_spot =
            NodeSelectorRequirement::new("karpenter.sh/capacity-type", Operator::NotIn, &["spot"]);

        assert!(!spot.matches(&l).unwrap());
        assert!(od.matches(&l).unwrap());
        assert!(not_spot.matches(&l).unwrap());
    }

    #[test]
    fn test_undefined_well_known_label_is_tolerated() {
        let l = labels(&[]);
        let zone = NodeSelectorRequirement::new("topology.kubernetes.io/zone", Operator::In, &["a"]);
        let custom = NodeSelectorRequirement::new("example.com/team", Operator::In, &["a"]);

        assert!(zone.matches(&l).unwrap());
        assert!(!custom.matches(&l).unwrap());
    }

    #[test]
    fn test_gt_lt() {
        let l = labels(&[("karpenter.k8s.aws/instance-cpu", "8")]);
        let gt = NodeSelectorRequirement::new("karpenter.k8s.aws/instance-cpu", Operator::Gt, &["4"]);
        let lt = NodeSelectorRequirement::new("karpenter.k8s.aws/instance-cpu", Operator::Lt, &["4"]);
        let bad = NodeSelectorRequirement::new("karpenter.k8s.aws/instance-cpu", Operator::Gt, &["x"]);

        assert!(gt.matches(&l).unwrap());
        assert!(!lt.matches(&l).unwrap());
        assert!(bad.matches(&l).is_err());
    }

    #[test]
    fn test_compatible_requires_all() {
        let l = labels(&[("kubernetes.io/arch", "amd64"), ("example.com/team", "a")]);
        let reqs = vec![
            NodeSelectorRequirement::new("kubernetes.io/arch", Operator::In, &["amd64"]),
            NodeSelectorRequirement::new("example.com/team", Operator::DoesNotExist, &[]),
        ];
        assert!(!compatible(&reqs, &l).unwrap());
        assert!(compatible(&reqs[..1], &l).unwrap());
    }
}
