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

//! Evicting pods off a node being disrupted.
//!
//! Evictions go through the Eviction API so PodDisruptionBudgets are honoured. A refused
//! eviction is simply tried again on the next tick. DaemonSet pods, static mirror pods and
//! pods that already finished are left alone.

use crate::cluster::{self, ClusterStore, PodEvictor};
use crate::types::v1beta1::labels;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainProgress {
    /// Evictions are outstanding; `refused` of them were turned down this tick.
    Evicting { pending: usize, refused: usize },
    Drained,
}

pub fn is_daemon_set_pod(pod: &Pod) -> bool {
    pod.owner_references()
        .iter()
        .any(|r| r.controller == Some(true) && r.kind == "DaemonSet")
}

pub fn is_mirror_pod(pod: &Pod) -> bool {
    pod.annotations().contains_key(labels::MIRROR_POD_ANNOTATION)
}

pub fn is_terminal(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Succeeded" || phase == "Failed")
}

/// Pods that have to move elsewhere before the node can go.
pub fn is_reschedulable(pod: &Pod) -> bool {
    !is_daemon_set_pod(pod) && !is_mirror_pod(pod) && !is_terminal(pod)
}

pub fn has_do_not_disrupt(annotations: &std::collections::BTreeMap<String, String>) -> bool {
    annotations
        .get(labels::DO_NOT_DISRUPT_ANNOTATION)
        .is_some_and(|v| v == "true")
}

/// One pass of evictions. Pods already terminating are waited for, not evicted again.
pub async fn drain(
    store: &dyn ClusterStore,
    evictor: &dyn PodEvictor,
    node: &str,
) -> Result<DrainProgress, cluster::Error> {
    let pods: Vec<Pod> = store
        .list_pods_on_node(node)
        .await?
        .into_iter()
        .filter(is_reschedulable)
        .collect();

    if pods.is_empty() {
        return Ok(DrainProgress::Drained);
    }

    let mut refused = 0;
    for pod in pods.iter().filter(|p| p.metadata.deletion_timestamp.is_none()) {
        if evictor.evict(pod).await? {
            info!("evicted pod {}/{} from node {}", pod.namespace().unwrap_or_default(), pod.name_any(), node);
        } else {
            debug!("eviction of pod {} refused, retrying next tick", pod.name_any());
            refused += 1;
        }
    }

    Ok(DrainProgress::Evicting {
        pending: pods.len(),
        refused,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::test_pod;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    #[test]
    fn test_reschedulable_filters() {
        let plain = test_pod("web-0", "node-1", &[]);
        assert!(is_reschedulable(&plain));

        let mut daemon = plain.clone();
        daemon.metadata.owner_references = Some(vec![OwnerReference {
            kind: "DaemonSet".into(),
            name: "fluent-bit".into(),
            controller: Some(true),
            ..Default::default()
        }]);
        assert!(!is_reschedulable(&daemon));

        let mut mirror = plain.clone();
        mirror
            .annotations_mut()
            .insert(labels::MIRROR_POD_ANNOTATION.into(), "abc".into());
        assert!(!is_reschedulable(&mirror));

        let mut done = plain.clone();
        done.status.get_or_insert_with(Default::default).phase = Some("Succeeded".into());
        assert!(!is_reschedulable(&done));
    }

    #[test]
    fn test_do_not_disrupt_requires_true() {
        let mut annotations = std::collections::BTreeMap::new();
        assert!(!has_do_not_disrupt(&annotations));
        annotations.insert(labels::DO_NOT_DISRUPT_ANNOTATION.to_owned(), "false".to_owned());
        assert!(!has_do_not_disrupt(&annotations));
        annotations.insert(labels::DO_NOT_DISRUPT_ANNOTATION.to_owned(), "true".to_owned());
        assert!(has_do_not_disrupt(&annotations));
    }
}
