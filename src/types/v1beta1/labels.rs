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

//! Well-known label, annotation, taint and finalizer keys.

pub const GROUP: &str = "karpenter.sh";
pub const PROVIDER_GROUP: &str = "karpenter.k8s.aws";

pub const NODE_POOL_LABEL: &str = const_str::concat!(GROUP, "/nodepool");
pub const INITIALIZED_LABEL: &str = const_str::concat!(GROUP, "/initialized");
pub const CAPACITY_TYPE_LABEL: &str = const_str::concat!(GROUP, "/capacity-type");
pub const ARCH_LABEL: &str = "kubernetes.io/arch";

pub const DO_NOT_DISRUPT_ANNOTATION: &str = const_str::concat!(GROUP, "/do-not-disrupt");

pub const NODE_POOL_HASH_ANNOTATION: &str = const_str::concat!(GROUP, "/nodepool-hash");
pub const NODE_POOL_HASH_VERSION_ANNOTATION: &str =
    const_str::concat!(GROUP, "/nodepool-hash-version");
pub const NODE_CLASS_HASH_ANNOTATION: &str =
    const_str::concat!(PROVIDER_GROUP, "/ec2nodeclass-hash");
pub const NODE_CLASS_HASH_VERSION_ANNOTATION: &str =
    const_str::concat!(PROVIDER_GROUP, "/ec2nodeclass-hash-version");

/// Set on a replacement claim, names the claim it replaces.
pub const REPLACEMENT_FOR_ANNOTATION: &str = const_str::concat!(GROUP, "/replacement-for");

pub const DISRUPTION_TAINT_KEY: &str = const_str::concat!(GROUP, "/disruption");
pub const DISRUPTION_TAINT_VALUE: &str = "disrupting";
pub const DISRUPTION_TAINT_EFFECT: &str = "NoSchedule";

pub const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

/// The taint placed on a node selected for disruption.
pub fn disruption_taint() -> k8s_openapi::api::core::v1::Taint {
    k8s_openapi::api::core::v1::Taint {
        key: DISRUPTION_TAINT_KEY.to_owned(),
        value: Some(DISRUPTION_TAINT_VALUE.to_owned()),
        effect: DISRUPTION_TAINT_EFFECT.to_owned(),
        time_added: None,
    }
}

pub fn is_disruption_taint(taint: &k8s_openapi::api::core::v1::Taint) -> bool {
    taint.key == DISRUPTION_TAINT_KEY && taint.effect == DISRUPTION_TAINT_EFFECT
}
