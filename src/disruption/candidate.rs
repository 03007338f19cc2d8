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

//! Choosing which drifted claims may start a disruption this tick.

use super::drain::{has_do_not_disrupt, is_reschedulable};
use super::{pdb, state};
use crate::types::v1beta1::labels;
use crate::types::v1beta1::nodeclaim::{DisruptionMethod, DriftReason, NodeClaim};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use strum::Display;

#[derive(Clone, Debug)]
pub struct Candidate {
    pub claim: NodeClaim,
    pub node: Node,
    pub reason: DriftReason,
    pub drifted_at: DateTime<Utc>,
    /// Pods that must be rescheduled before the node can go.
    pub reschedulable: usize,
}

impl Candidate {
    pub fn name(&self) -> String {
        self.claim.name_any()
    }

    /// Empty nodes are deleted outright; anything else waits for a replacement.
    pub fn method(&self) -> DisruptionMethod {
        if self.reschedulable == 0 {
            DisruptionMethod::Delete
        } else {
            DisruptionMethod::Replace
        }
    }
}

/// Why an otherwise eligible claim cannot be disrupted right now.
#[derive(Clone, Debug, PartialEq, Eq, Display)]
pub enum Blocker {
    #[strum(to_string = "node is annotated do-not-disrupt")]
    NodeDoNotDisrupt,

    #[strum(to_string = "pod {pod} is annotated do-not-disrupt")]
    PodDoNotDisrupt { pod: String },

    #[strum(to_string = "pod {pod} is protected by PodDisruptionBudget {budget}")]
    PodDisruptionBudget { pod: String, budget: String },
}

/// Pods per node name, plus every PodDisruptionBudget in the cluster.
#[derive(Clone, Debug, Default)]
pub struct PodState {
    pub pods: BTreeMap<String, Vec<Pod>>,
    pub pdbs: Vec<PodDisruptionBudget>,
}

#[derive(Clone, Debug, Default)]
pub struct Selection {
    pub candidates: Vec<Candidate>,
    pub blocked: Vec<(NodeClaim, Blocker)>,
}

/// Claims standing in for a disruption still in flight, found either through the original's
/// status or through their `replacement-for` annotation.
pub fn outstanding_replacements(claims: &[NodeClaim]) -> BTreeSet<String> {
    let in_flight: BTreeSet<String> = claims
        .iter()
        .filter(|c| c.disruption().is_some())
        .map(|c| c.name_any())
        .collect();

    let listed = claims
        .iter()
        .filter_map(|c| c.disruption())
        .flat_map(|d| d.replacements.iter().cloned());
    let annotated = claims
        .iter()
        .filter(|c| {
            c.annotation(labels::REPLACEMENT_FOR_ANNOTATION)
                .is_some_and(|original| in_flight.contains(original))
        })
        .map(|c| c.name_any());

    listed.chain(annotated).collect()
}

/// Initialized claims the budget is taken over. Replacements of in-flight disruptions are
/// left out until their original is gone, so new capacity does not widen the budget.
pub fn budget_base(claims: &[NodeClaim]) -> usize {
    let replacements = outstanding_replacements(claims);
    claims
        .iter()
        .filter(|c| c.is_initialized() && !replacements.contains(&c.name_any()))
        .count()
}

/// Drifted claims eligible for disruption, oldest drift first, at most `cap` of them.
pub fn select(
    claims: &[NodeClaim],
    nodes: &BTreeMap<String, Node>,
    pod_state: &PodState,
    desired_hash: &str,
    cap: usize,
) -> Selection {
    let replacements = outstanding_replacements(claims);

    let mut selection = Selection::default();
    for claim in claims {
        let (Some(drifted), Some(reason)) = (claim.drifted(), claim.drift_reason()) else {
            continue;
        };
        if claim.is_deleting()
            || claim.disruption().is_some()
            || !claim.is_initialized()
            || replacements.contains(&claim.name_any())
            || state::failed_against(claim, desired_hash)
        {
            continue;
        }

        let Some(node) = claim.node_name().and_then(|n| nodes.get(n)) else {
            continue;
        };
        if node.metadata.deletion_timestamp.is_some()
            || node
                .spec
                .as_ref()
                .and_then(|s| s.taints.as_ref())
                .is_some_and(|taints| taints.iter().any(labels::is_disruption_taint))
        {
            continue;
        }

        if has_do_not_disrupt(node.annotations()) {
            selection.blocked.push((claim.clone(), Blocker::NodeDoNotDisrupt));
            continue;
        }

        let pods: Vec<&Pod> = pod_state
            .pods
            .get(&node.name_any())
            .into_iter()
            .flatten()
            .filter(|p| is_reschedulable(p))
            .collect();

        if let Some(blocker) = pod_blocker(&pods, &pod_state.pdbs) {
            selection.blocked.push((claim.clone(), blocker));
            continue;
        }

        selection.candidates.push(Candidate {
            claim: claim.clone(),
            node: node.clone(),
            reason,
            drifted_at: drifted.last_transition_time,
            reschedulable: pods.len(),
        });
    }

    selection
        .candidates
        .sort_by(|a, b| a.drifted_at.cmp(&b.drifted_at).then_with(|| a.name().cmp(&b.name())));
    selection.candidates.truncate(cap);
    selection
}

fn pod_blocker(pods: &[&Pod], pdbs: &[PodDisruptionBudget]) -> Option<Blocker> {
    for pod in pods {
        if has_do_not_disrupt(pod.annotations()) {
            return Some(Blocker::PodDoNotDisrupt {
                pod: pod.name_any(),
            });
        }
        if let Some(budget) = pdb::blocking_budget(pod, pdbs) {
            return Some(Blocker::PodDisruptionBudget {
                pod: pod.name_any(),
                budget: budget.name_any(),
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drift::DriftResult;
    use crate::tests::{
        launched_claim, test_node, test_node_class, test_node_pool, test_pdb, test_pod,
    };
    use crate::types::v1beta1::nodeclaim::{DisruptionFailure, NodeClaimStatus};
    use chrono::TimeZone;

    fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, minute, 0).unwrap()
    }

    fn drifted(name: &str, at: DateTime<Utc>) -> NodeClaim {
        let pool = test_node_pool("default", &[]);
        let mut claim = launched_claim(name, &pool, &test_node_class());
        let status = claim.status.get_or_insert_with(Default::default);
        DriftResult::Drifted(DriftReason::AMIDrift).apply(status, at);
        claim
    }

    fn nodes_for(claims: &[NodeClaim]) -> BTreeMap<String, Node> {
        claims
            .iter()
            .filter_map(|c| c.node_name())
            .map(|n| (n.to_owned(), test_node(n, "default")))
            .collect()
    }

    fn names(selection: &Selection) -> Vec<String> {
        selection.candidates.iter().map(Candidate::name).collect()
    }

    #[test]
    fn test_orders_by_drift_time_then_name_and_caps() {
        let claims = vec![drifted("c", t(1)), drifted("b", t(0)), drifted("a", t(1))];
        let nodes = nodes_for(&claims);

        let selection = select(&claims, &nodes, &PodState::default(), "hash", 10);
        assert_eq!(names(&selection), ["b", "a", "c"]);

        let selection = select(&claims, &nodes, &PodState::default(), "hash", 2);
        assert_eq!(names(&selection), ["b", "a"]);

        assert!(select(&claims, &nodes, &PodState::default(), "hash", 0).candidates.is_empty());
    }

    #[test]
    fn test_skips_undrifted_missing_node_and_in_flight() {
        let pool = test_node_pool("default", &[]);
        let healthy = launched_claim("healthy", &pool, &test_node_class());
        let no_node = drifted("no-node", t(0));
        let mut in_flight = drifted("in-flight", t(0));
        let status: &mut NodeClaimStatus = in_flight.status.get_or_insert_with(Default::default);
        state::start(
            status,
            DriftReason::AMIDrift,
            DisruptionMethod::Replace,
            "hash",
            t(0),
        )
        .unwrap();
        let tainted = drifted("tainted", t(0));

        let mut nodes = nodes_for(&[healthy.clone(), in_flight.clone(), tainted.clone()]);
        nodes
            .get_mut(tainted.node_name().unwrap())
            .unwrap()
            .spec
            .get_or_insert_with(Default::default)
            .taints = Some(vec![labels::disruption_taint()]);

        let selection = select(
            &[healthy, no_node, in_flight, tainted],
            &nodes,
            &PodState::default(),
            "hash",
            10,
        );
        assert!(selection.candidates.is_empty());
        assert!(selection.blocked.is_empty());
    }

    #[test]
    fn test_replacement_of_outstanding_disruption_is_skipped() {
        let mut original = drifted("original", t(0));
        let status = original.status.get_or_insert_with(Default::default);
        state::start(status, DriftReason::AMIDrift, DisruptionMethod::Replace, "hash", t(0)).unwrap();
        state::launched(status, "replacement", t(0)).unwrap();
        let replacement = drifted("replacement", t(1));
        let claims = vec![original, replacement];

        let selection = select(&claims, &nodes_for(&claims), &PodState::default(), "hash", 10);
        assert!(selection.candidates.is_empty());
    }

    #[test]
    fn test_budget_base_leaves_out_replacements_until_original_goes() {
        let mut original = drifted("original", t(0));
        let status = original.status.get_or_insert_with(Default::default);
        state::start(status, DriftReason::AMIDrift, DisruptionMethod::Replace, "hash", t(0)).unwrap();
        state::launched(status, "listed", t(0)).unwrap();
        let listed = drifted("listed", t(1));
        let mut adopted = drifted("adopted", t(1));
        adopted
            .annotations_mut()
            .insert(labels::REPLACEMENT_FOR_ANNOTATION.into(), "original".into());
        let other = drifted("other", t(0));

        let claims = vec![original, listed.clone(), adopted.clone(), other.clone()];
        assert_eq!(budget_base(&claims), 2);

        // once the original is gone its replacements are ordinary capacity
        assert_eq!(budget_base(&[listed, adopted, other]), 3);
    }

    #[test]
    fn test_failure_blocks_until_desired_hash_changes() {
        let mut claim = drifted("a", t(0));
        claim.status.get_or_insert_with(Default::default).last_disruption_failure =
            Some(DisruptionFailure {
                reason: "RegistrationTimeout".into(),
                message: "".into(),
                desired_hash: "old".into(),
                failed_at: t(0),
            });
        let claims = vec![claim];
        let nodes = nodes_for(&claims);

        assert!(select(&claims, &nodes, &PodState::default(), "old", 10).candidates.is_empty());
        assert_eq!(names(&select(&claims, &nodes, &PodState::default(), "new", 10)), ["a"]);
    }

    #[test]
    fn test_do_not_disrupt_and_pdb_block() {
        let claims = vec![drifted("a", t(0)), drifted("b", t(0)), drifted("c", t(0))];
        let nodes = nodes_for(&claims);
        let node_of = |i: usize| claims[i].node_name().unwrap().to_owned();

        let mut protected = test_pod("protected", &node_of(0), &[]);
        protected
            .annotations_mut()
            .insert(labels::DO_NOT_DISRUPT_ANNOTATION.into(), "true".into());
        let guarded = test_pod("guarded", &node_of(1), &[("app", "web")]);
        let free = test_pod("free", &node_of(2), &[("app", "api")]);

        let pod_state = PodState {
            pods: BTreeMap::from([
                (node_of(0), vec![protected]),
                (node_of(1), vec![guarded]),
                (node_of(2), vec![free]),
            ]),
            pdbs: vec![test_pdb("web", &[("app", "web")], 0, 3)],
        };

        let selection = select(&claims, &nodes, &pod_state, "hash", 10);
        assert_eq!(names(&selection), ["c"]);
        assert_eq!(selection.candidates[0].method(), DisruptionMethod::Replace);
        assert_eq!(
            selection
                .blocked
                .iter()
                .map(|(c, b)| (c.name_any(), b.clone()))
                .collect::<Vec<_>>(),
            vec![
                (
                    "a".to_owned(),
                    Blocker::PodDoNotDisrupt {
                        pod: "protected".into()
                    }
                ),
                (
                    "b".to_owned(),
                    Blocker::PodDisruptionBudget {
                        pod: "guarded".into(),
                        budget: "web".into()
                    }
                ),
            ]
        );
    }

    #[test]
    fn test_daemon_set_pods_do_not_block_and_empty_node_is_deleted() {
        let claims = vec![drifted("a", t(0))];
        let nodes = nodes_for(&claims);
        let node = claims[0].node_name().unwrap().to_owned();

        let mut daemon = test_pod("agent", &node, &[]);
        daemon
            .annotations_mut()
            .insert(labels::DO_NOT_DISRUPT_ANNOTATION.into(), "true".into());
        daemon.metadata.owner_references = Some(vec![
            k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
                kind: "DaemonSet".into(),
                name: "agent".into(),
                controller: Some(true),
                ..Default::default()
            },
        ]);

        let pod_state = PodState {
            pods: BTreeMap::from([(node, vec![daemon])]),
            pdbs: vec![],
        };
        let selection = select(&claims, &nodes, &pod_state, "hash", 10);
        assert_eq!(selection.candidates[0].method(), DisruptionMethod::Delete);
    }
}
