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

use crate::fingerprint::{self, NODE_CLASS_HASH_VERSION, NODE_POOL_HASH_VERSION};
use crate::types;
use crate::types::error::NoNameSnafu;
use crate::types::v1beta1::ec2nodeclass::EC2NodeClassSpec;
use crate::types::v1beta1::labels;
use crate::types::v1beta1::nodeclaim::{NodeClaim, NodeClaimSpec};
use crate::types::v1beta1::requirements::NodeSelectorRequirement;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::{CustomResource, KubeSchema, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::OptionExt;
use std::collections::BTreeMap;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, Default)]
#[kube(
    group = "karpenter.sh",
    version = "v1beta1",
    kind = "NodePool",
    status = "NodePoolStatus",
    shortname = "np",
    plural = "nodepools",
    singular = "nodepool",
    printcolumn = r#"{"name":"NodeClass", "type":"string", "jsonPath":".spec.template.spec.nodeClassRef.name"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolSpec {
    pub template: NodeClaimTemplate,

    #[serde(default)]
    pub disruption: Disruption,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolStatus {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMetadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeClaimTemplate {
    #[serde(default)]
    pub metadata: TemplateMetadata,

    pub spec: NodeClaimTemplateSpec,
}

/// The claim-shaped portion of a pool template. Mirrors `NodeClaimSpec`.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeClaimTemplateSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<corev1::Taint>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub startup_taints: Vec<corev1::Taint>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<NodeSelectorRequirement>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubelet: Option<KubeletConfiguration>,

    pub node_class_ref: NodeClassReference,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeClassReference {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeletConfiguration {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_dns: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pods: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pods_per_core: Option<i32>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub system_reserved: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kube_reserved: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub eviction_hard: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub eviction_soft: BTreeMap<String, String>,

    /// Durations in Go notation, e.g. "1m0s".
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub eviction_soft_grace_period: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eviction_max_pod_grace_period: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_gc_high_threshold_percent: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_gc_low_threshold_percent: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_cfs_quota: Option<bool>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Disruption {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub budgets: Vec<Budget>,
}

/// Caps how many nodes of a pool may be disrupted at once.
///
/// `nodes` is either an absolute count ("3") or a percentage of the pool ("20%").
/// With `schedule` (cron, UTC) and `duration` ("30m", "1h30m0s") the budget only applies
/// from each schedule hit until `duration` has elapsed.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    pub nodes: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

impl Budget {
    pub fn nodes(nodes: &str) -> Self {
        Self {
            nodes: nodes.to_owned(),
            schedule: None,
            duration: None,
        }
    }
}

impl NodePool {
    pub fn name(&self) -> Result<String, types::error::Error> {
        self.metadata.name.clone().context(NoNameSnafu)
    }

    pub fn node_class_name(&self) -> &str {
        &self.spec.template.spec.node_class_ref.name
    }

    /// Labels a claim launched from this pool carries: template labels plus the pool label.
    pub fn claim_labels(&self) -> BTreeMap<String, String> {
        let mut claim_labels = self.spec.template.metadata.labels.clone();
        claim_labels.insert(labels::NODE_POOL_LABEL.to_owned(), self.name_any());
        claim_labels
    }

    /// a new owner reference for nodepool
    pub fn new_owner_ref(&self) -> metav1::OwnerReference {
        metav1::OwnerReference {
            api_version: Self::api_version(&()).to_string(),
            kind: Self::kind(&()).to_string(),
            name: self.name_any(),
            uid: self.meta().uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// A claim launched from this pool's template, stamped with the current hashes.
    pub fn new_node_claim(
        &self,
        class: Option<&EC2NodeClassSpec>,
        replacement_for: &str,
    ) -> Result<NodeClaim, types::error::Error> {
        let name = self.name()?;
        let template = &self.spec.template;

        let mut annotations = template.metadata.annotations.clone();
        annotations.insert(
            labels::NODE_POOL_HASH_ANNOTATION.to_owned(),
            fingerprint::node_pool_hash(template)?,
        );
        annotations.insert(
            labels::NODE_POOL_HASH_VERSION_ANNOTATION.to_owned(),
            NODE_POOL_HASH_VERSION.to_owned(),
        );
        if let Some(class) = class {
            annotations.insert(
                labels::NODE_CLASS_HASH_ANNOTATION.to_owned(),
                fingerprint::node_class_hash(class)?,
            );
            annotations.insert(
                labels::NODE_CLASS_HASH_VERSION_ANNOTATION.to_owned(),
                NODE_CLASS_HASH_VERSION.to_owned(),
            );
        }
        annotations.insert(
            labels::REPLACEMENT_FOR_ANNOTATION.to_owned(),
            replacement_for.to_owned(),
        );

        Ok(NodeClaim {
            metadata: metav1::ObjectMeta {
                generate_name: Some(format!("{name}-")),
                labels: Some(self.claim_labels()),
                annotations: Some(annotations),
                owner_references: Some(vec![self.new_owner_ref()]),
                ..Default::default()
            },
            spec: NodeClaimSpec {
                taints: template.spec.taints.clone(),
                startup_taints: template.spec.startup_taints.clone(),
                requirements: template.spec.requirements.clone(),
                kubelet: template.spec.kubelet.clone(),
                node_class_ref: template.spec.node_class_ref.clone(),
            },
            status: None,
        })
    }
}
