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

use crate::types;
use crate::types::error::{NoNameSnafu, NoNodePoolSnafu};
use crate::types::v1beta1::condition::{self, Condition, ConditionType};
use crate::types::v1beta1::labels;
use crate::types::v1beta1::nodepool::{KubeletConfiguration, NodeClassReference};
use crate::types::v1beta1::requirements::NodeSelectorRequirement;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1 as corev1;
use kube::{CustomResource, KubeSchema, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::OptionExt;
use strum::{Display, EnumString};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, Default)]
#[kube(
    group = "karpenter.sh",
    version = "v1beta1",
    kind = "NodeClaim",
    status = "NodeClaimStatus",
    shortname = "nc",
    plural = "nodeclaims",
    singular = "nodeclaim",
    printcolumn = r#"{"name":"Node", "type":"string", "jsonPath":".status.nodeName"}"#,
    printcolumn = r#"{"name":"Disruption", "type":"string", "jsonPath":".status.disruption.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct NodeClaimSpec {
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

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeClaimStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,

    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    #[serde(default, rename = "imageID", skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,

    #[serde(default, rename = "subnetID", skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,

    #[serde(default, rename = "securityGroupIDs", skip_serializing_if = "Vec::is_empty")]
    pub security_group_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_profile: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launched_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// In-flight disruption of this claim. Survives controller restarts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disruption: Option<DisruptionStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_disruption_failure: Option<DisruptionFailure>,
}

#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Display, EnumString,
)]
pub enum DriftReason {
    #[strum(to_string = "NodePoolDrifted")]
    NodePoolDrifted,

    #[strum(to_string = "NodeClassDrifted")]
    NodeClassDrifted,

    #[strum(to_string = "AMIDrift")]
    AMIDrift,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Display)]
pub enum DisruptionPhase {
    /// Detected but not started. Held as the Drifted condition with no disruption status;
    /// named here as the source and rollback target of transitions.
    #[strum(to_string = "Drifted")]
    Drifted,

    #[strum(to_string = "Tainted")]
    Tainted,

    #[strum(to_string = "WaitingForReplacement")]
    WaitingForReplacement,

    #[strum(to_string = "Draining")]
    Draining,

    #[strum(to_string = "Terminated")]
    Terminated,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Display)]
pub enum DisruptionMethod {
    /// Node is empty of reschedulable pods and is removed without new capacity.
    #[strum(to_string = "Delete")]
    Delete,

    /// New capacity must be initialized before the node is drained.
    #[strum(to_string = "Replace")]
    Replace,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DisruptionStatus {
    pub phase: DisruptionPhase,
    pub method: DisruptionMethod,
    pub reason: DriftReason,
    pub started_at: DateTime<Utc>,

    /// Fingerprint of the desired spec the disruption was started against.
    pub desired_hash: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replacements: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launched_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DisruptionFailure {
    pub reason: String,
    pub message: String,
    pub desired_hash: String,
    pub failed_at: DateTime<Utc>,
}

impl NodeClaim {
    pub fn name(&self) -> Result<String, types::error::Error> {
        self.metadata.name.clone().context(NoNameSnafu)
    }

    pub fn node_pool(&self) -> Result<String, types::error::Error> {
        self.labels()
            .get(labels::NODE_POOL_LABEL)
            .cloned()
            .context(NoNodePoolSnafu {
                name: self.name_any(),
            })
    }

    fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    pub fn is_launched(&self) -> bool {
        condition::is_true(self.conditions(), ConditionType::Launched)
    }

    pub fn is_registered(&self) -> bool {
        condition::is_true(self.conditions(), ConditionType::Registered)
    }

    pub fn is_initialized(&self) -> bool {
        condition::is_true(self.conditions(), ConditionType::Initialized)
    }

    pub fn drifted(&self) -> Option<&Condition> {
        condition::find(self.conditions(), ConditionType::Drifted).filter(|c| c.is_true())
    }

    pub fn drift_reason(&self) -> Option<DriftReason> {
        self.drifted()
            .and_then(|c| c.reason.as_deref())
            .and_then(|r| r.parse().ok())
    }

    pub fn node_name(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.node_name.as_deref())
    }

    pub fn disruption(&self) -> Option<&DisruptionStatus> {
        self.status.as_ref().and_then(|s| s.disruption.as_ref())
    }

    pub fn last_disruption_failure(&self) -> Option<&DisruptionFailure> {
        self.status
            .as_ref()
            .and_then(|s| s.last_disruption_failure.as_ref())
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations().get(key).map(String::as_str)
    }
}
