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

//! Drift evaluation: does a claim still match the pool and node class it came from?

use crate::fingerprint::{self, NODE_CLASS_HASH_VERSION, NODE_POOL_HASH_VERSION};
use crate::types;
use crate::types::v1beta1::condition::{self, ConditionType};
use crate::types::v1beta1::ec2nodeclass::EC2NodeClass;
use crate::types::v1beta1::labels;
use crate::types::v1beta1::nodeclaim::{DriftReason, NodeClaim, NodeClaimStatus};
use crate::types::v1beta1::nodepool::NodePool;
use crate::types::v1beta1::requirements;
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use snafu::Snafu;
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(transparent)]
    Types { source: types::error::Error },

    #[snafu(transparent)]
    Serde { source: serde_json::Error },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriftResult {
    /// Drift detection is switched off. Existing conditions must be left alone.
    Disabled,
    NotDrifted,
    Drifted(DriftReason),
}

impl DriftResult {
    pub fn is_drifted(&self) -> bool {
        matches!(self, DriftResult::Drifted(_))
    }

    pub fn reason(&self) -> Option<DriftReason> {
        match self {
            DriftResult::Drifted(reason) => Some(*reason),
            _ => None,
        }
    }

    /// Writes the result into the claim status. Returns true when the status changed.
    pub fn apply(&self, status: &mut NodeClaimStatus, now: DateTime<Utc>) -> bool {
        match self {
            DriftResult::Disabled => false,
            DriftResult::NotDrifted => condition::clear(&mut status.conditions, ConditionType::Drifted),
            DriftResult::Drifted(reason) => condition::set(
                &mut status.conditions,
                ConditionType::Drifted,
                true,
                Some(reason.to_string()),
                None,
                now,
            ),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DriftEvaluator {
    enabled: bool,
}

impl DriftEvaluator {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn evaluate(
        &self,
        claim: &NodeClaim,
        pool: &NodePool,
        class: Option<&EC2NodeClass>,
    ) -> Result<DriftResult, Error> {
        if !self.enabled {
            return Ok(DriftResult::Disabled);
        }

        // nothing to compare against until the provider has reported what it launched
        if !claim.is_launched() {
            return Ok(DriftResult::NotDrifted);
        }

        if let Some(reason) = node_pool_drift(claim, pool)? {
            return Ok(DriftResult::Drifted(reason));
        }

        if let Some(class) = class
            && let Some(reason) = node_class_drift(claim, class)?
        {
            return Ok(DriftResult::Drifted(reason));
        }

        Ok(DriftResult::NotDrifted)
    }
}

/// Fingerprint a disruption is started against; a failed attempt is not retried until it
/// changes.
pub fn desired_fingerprint(pool: &NodePool, class: Option<&EC2NodeClass>) -> Result<String, Error> {
    let class_spec = class.map(|c| c.spec.clone()).unwrap_or_default();
    Ok(fingerprint::fingerprint(&class_spec, &pool.spec.template)?)
}

fn node_pool_drift(claim: &NodeClaim, pool: &NodePool) -> Result<Option<DriftReason>, Error> {
    if claim.annotation(labels::NODE_POOL_HASH_VERSION_ANNOTATION) == Some(NODE_POOL_HASH_VERSION)
        && let Some(claim_hash) = claim.annotation(labels::NODE_POOL_HASH_ANNOTATION)
    {
        let pool_hash = fingerprint::node_pool_hash(&pool.spec.template)?;
        if claim_hash != pool_hash {
            debug!(
                "nodeclaim {} nodepool hash {} != {}",
                claim.name_any(),
                claim_hash,
                pool_hash
            );
            return Ok(Some(DriftReason::NodePoolDrifted));
        }
    }

    if !requirements::compatible(&pool.spec.template.spec.requirements, claim.labels())? {
        debug!(
            "nodeclaim {} labels no longer satisfy nodepool {} requirements",
            claim.name_any(),
            pool.name_any()
        );
        return Ok(Some(DriftReason::NodePoolDrifted));
    }

    Ok(None)
}

fn node_class_drift(claim: &NodeClaim, class: &EC2NodeClass) -> Result<Option<DriftReason>, Error> {
    let Some(claim_status) = claim.status.as_ref() else {
        return Ok(None);
    };
    let class_status = class.status.clone().unwrap_or_default();

    if let Some(image_id) = claim_status.image_id.as_deref()
        && !class_status.amis.is_empty()
    {
        let mut compatible_images = Vec::new();
        for ami in &class_status.amis {
            if requirements::compatible(&ami.requirements, claim.labels())? {
                compatible_images.push(ami.id.as_str());
            }
        }
        if !compatible_images.contains(&image_id) {
            debug!(
                "nodeclaim {} image {} not among resolved images {:?}",
                claim.name_any(),
                image_id,
                compatible_images
            );
            return Ok(Some(DriftReason::AMIDrift));
        }
    }

    if !claim_status.security_group_ids.is_empty() && !class_status.security_groups.is_empty() {
        let observed: BTreeSet<&str> = claim_status
            .security_group_ids
            .iter()
            .map(String::as_str)
            .collect();
        let desired: BTreeSet<&str> = class_status
            .security_groups
            .iter()
            .map(|sg| sg.id.as_str())
            .collect();
        if observed != desired {
            return Ok(Some(DriftReason::NodeClassDrifted));
        }
    }

    if let Some(subnet_id) = claim_status.subnet_id.as_deref()
        && !class_status.subnets.is_empty()
        && !class_status.subnets.iter().any(|s| s.id == subnet_id)
    {
        return Ok(Some(DriftReason::NodeClassDrifted));
    }

    if claim.annotation(labels::NODE_CLASS_HASH_VERSION_ANNOTATION) == Some(NODE_CLASS_HASH_VERSION)
        && let Some(claim_hash) = claim.annotation(labels::NODE_CLASS_HASH_ANNOTATION)
        && claim_hash != fingerprint::node_class_hash(&class.spec)?
    {
        return Ok(Some(DriftReason::NodeClassDrifted));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{launched_claim, test_node_class, test_node_pool};
    use crate::types::v1beta1::ec2nodeclass::{AMI, SecurityGroup, Subnet};
    use crate::types::v1beta1::requirements::{NodeSelectorRequirement, Operator};
    use k8s_openapi::api::core::v1 as corev1;

    fn evaluator() -> DriftEvaluator {
        DriftEvaluator::new(true)
    }

    #[test]
    fn test_fresh_claim_is_not_drifted() {
        let pool = test_node_pool("default", &[]);
        let class = test_node_class();
        let claim = launched_claim("nc-1", &pool, &class);

        let result = evaluator().evaluate(&claim, &pool, Some(&class)).unwrap();
        assert_eq!(result, DriftResult::NotDrifted);
    }

    #[test]
    fn test_disabled_gate_reports_disabled_and_keeps_condition() {
        let mut pool = test_node_pool("default", &[]);
        let class = test_node_class();
        let mut claim = launched_claim("nc-1", &pool, &class);
        let now = Utc::now();

        let status = claim.status.get_or_insert_with(Default::default);
        DriftResult::Drifted(DriftReason::AMIDrift).apply(status, now);

        pool.spec
            .template
            .metadata
            .annotations
            .insert("test".into(), "annotation".into());

        let result = DriftEvaluator::new(false)
            .evaluate(&claim, &pool, Some(&class))
            .unwrap();
        assert_eq!(result, DriftResult::Disabled);

        let status = claim.status.get_or_insert_with(Default::default);
        assert!(!result.apply(status, now));
        assert!(claim.drifted().is_some());
    }

    #[test]
    fn test_pool_template_changes_drift() {
        let base = test_node_pool("default", &[]);
        let class = test_node_class();
        let claim = launched_claim("nc-1", &base, &class);

        let mut annotations = base.clone();
        annotations
            .spec
            .template
            .metadata
            .annotations
            .insert("keyAnnotationTest".into(), "valueAnnotationTest".into());

        let mut labels = base.clone();
        labels
            .spec
            .template
            .metadata
            .labels
            .insert("keyLabelTest".into(), "valueLabelTest".into());

        let taint = corev1::Taint {
            key: "example.com/another-taint-2".into(),
            effect: "PreferNoSchedule".into(),
            ..Default::default()
        };
        let mut taints = base.clone();
        taints.spec.template.spec.taints = vec![taint.clone()];
        let mut startup = base.clone();
        startup.spec.template.spec.startup_taints = vec![taint];

        let mut kubelet = base.clone();
        let mut config = crate::types::v1beta1::nodepool::KubeletConfiguration::default();
        config
            .eviction_soft
            .insert("memory.available".into(), "5%".into());
        config
            .eviction_soft_grace_period
            .insert("memory.available".into(), "1m0s".into());
        kubelet.spec.template.spec.kubelet = Some(config);

        for pool in [annotations, labels, taints, startup, kubelet] {
            let result = evaluator().evaluate(&claim, &pool, Some(&class)).unwrap();
            assert_eq!(result, DriftResult::Drifted(DriftReason::NodePoolDrifted));
        }
    }

    #[test]
    fn test_requirement_change_drifts_only_when_incompatible() {
        let base = test_node_pool("default", &[]);
        let class = test_node_class();
        let claim = launched_claim("nc-1", &base, &class);

        let mut spot_only = base.clone();
        spot_only.spec.template.spec.requirements = vec![NodeSelectorRequirement::new(
            "karpenter.sh/capacity-type",
            Operator::In,
            &["spot"],
        )];
        assert_eq!(
            evaluator().evaluate(&claim, &spot_only, Some(&class)).unwrap(),
            DriftResult::Drifted(DriftReason::NodePoolDrifted)
        );

        let mut both = base.clone();
        both.spec.template.spec.requirements = vec![NodeSelectorRequirement::new(
            "karpenter.sh/capacity-type",
            Operator::In,
            &["spot", "on-demand"],
        )];
        assert_eq!(
            evaluator().evaluate(&claim, &both, Some(&class)).unwrap(),
            DriftResult::NotDrifted
        );
    }

    #[test]
    fn test_ami_drift() {
        let pool = test_node_pool("default", &[]);
        let mut class = test_node_class();
        let claim = launched_claim("nc-1", &pool, &class);

        class.status.get_or_insert_with(Default::default).amis = vec![AMI {
            id: "ami-new".into(),
            ..Default::default()
        }];
        assert_eq!(
            evaluator().evaluate(&claim, &pool, Some(&class)).unwrap(),
            DriftResult::Drifted(DriftReason::AMIDrift)
        );
    }

    #[test]
    fn test_ami_drift_when_image_no_longer_fits_instance_architecture() {
        let pool = test_node_pool("default", &[]);
        let mut class = test_node_class();
        let claim = launched_claim("nc-1", &pool, &class);

        // the claim's image is still resolved, but only for arm64 while the claim is amd64
        class.status.get_or_insert_with(Default::default).amis = vec![AMI {
            id: "ami-current".into(),
            name: None,
            requirements: vec![NodeSelectorRequirement::new(
                "kubernetes.io/arch",
                Operator::In,
                &["arm64"],
            )],
        }];
        assert_eq!(
            evaluator().evaluate(&claim, &pool, Some(&class)).unwrap(),
            DriftResult::Drifted(DriftReason::AMIDrift)
        );
    }

    #[test]
    fn test_security_group_and_subnet_drift() {
        let pool = test_node_pool("default", &[]);
        let class = test_node_class();
        let claim = launched_claim("nc-1", &pool, &class);

        let mut sg = class.clone();
        sg.status
            .get_or_insert_with(Default::default)
            .security_groups
            .push(SecurityGroup {
                id: "sg-test".into(),
                name: None,
            });
        assert_eq!(
            evaluator().evaluate(&claim, &pool, Some(&sg)).unwrap(),
            DriftResult::Drifted(DriftReason::NodeClassDrifted)
        );

        let mut subnet = class.clone();
        subnet.status.get_or_insert_with(Default::default).subnets = vec![Subnet {
            id: "subnet-other".into(),
            zone: None,
        }];
        assert_eq!(
            evaluator().evaluate(&claim, &pool, Some(&subnet)).unwrap(),
            DriftResult::Drifted(DriftReason::NodeClassDrifted)
        );
    }

    #[test]
    fn test_node_class_static_fields_drift() {
        let pool = test_node_pool("default", &[]);
        let class = test_node_class();
        let claim = launched_claim("nc-1", &pool, &class);

        let mut user_data = class.clone();
        user_data.spec.user_data = Some("#!/bin/bash\n/etc/eks/bootstrap.sh".into());
        let mut tags = class.clone();
        tags.spec
            .tags
            .insert("keyTag-test-3".into(), "valueTag-test-3".into());
        let mut monitoring = class.clone();
        monitoring.spec.detailed_monitoring = Some(true);
        let mut profile = class.clone();
        profile.spec.instance_profile = Some("KarpenterNodeInstanceProfile-Drift".into());
        let mut family = class.clone();
        family.spec.ami_family = Some("Bottlerocket".into());

        for class in [user_data, tags, monitoring, profile, family] {
            assert_eq!(
                evaluator().evaluate(&claim, &pool, Some(&class)).unwrap(),
                DriftResult::Drifted(DriftReason::NodeClassDrifted)
            );
        }
    }

    #[test]
    fn test_selector_term_change_alone_does_not_drift() {
        let pool = test_node_pool("default", &[]);
        let class = test_node_class();
        let claim = launched_claim("nc-1", &pool, &class);

        let mut changed = class.clone();
        changed.spec.ami_selector_terms[0].id = Some("ami-other".into());
        // resolved status still lists the claim's image
        assert_eq!(
            evaluator().evaluate(&claim, &pool, Some(&changed)).unwrap(),
            DriftResult::NotDrifted
        );
    }

    #[test]
    fn test_hash_version_mismatch_is_not_drift() {
        let mut pool = test_node_pool("default", &[]);
        let class = test_node_class();
        let mut claim = launched_claim("nc-1", &pool, &class);
        claim.metadata.annotations.get_or_insert_with(Default::default).insert(
            labels::NODE_POOL_HASH_VERSION_ANNOTATION.into(),
            "v0".into(),
        );
        pool.spec
            .template
            .metadata
            .annotations
            .insert("test".into(), "annotation".into());

        assert_eq!(
            evaluator().evaluate(&claim, &pool, Some(&class)).unwrap(),
            DriftResult::NotDrifted
        );
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let mut pool = test_node_pool("default", &[]);
        let class = test_node_class();
        let mut claim = launched_claim("nc-1", &pool, &class);
        pool.spec
            .template
            .metadata
            .annotations
            .insert("test".into(), "annotation".into());

        let now = Utc::now();
        let first = evaluator().evaluate(&claim, &pool, Some(&class)).unwrap();
        let status = claim.status.get_or_insert_with(Default::default);
        assert!(first.apply(status, now));

        let second = evaluator().evaluate(&claim, &pool, Some(&class)).unwrap();
        assert_eq!(first, second);
        let status = claim.status.get_or_insert_with(Default::default);
        assert!(!second.apply(status, now + chrono::Duration::minutes(1)));
    }

    #[test]
    fn test_drift_clears_when_spec_matches_again() {
        let pool = test_node_pool("default", &[]);
        let class = test_node_class();
        let mut claim = launched_claim("nc-1", &pool, &class);
        let now = Utc::now();

        let status = claim.status.get_or_insert_with(Default::default);
        DriftResult::Drifted(DriftReason::NodePoolDrifted).apply(status, now);

        let result = evaluator().evaluate(&claim, &pool, Some(&class)).unwrap();
        let status = claim.status.get_or_insert_with(Default::default);
        assert!(result.apply(status, now));
        assert!(claim.drifted().is_none());
    }

    #[test]
    fn test_unlaunched_claim_is_never_drifted() {
        let mut pool = test_node_pool("default", &[]);
        let class = test_node_class();
        let mut claim = launched_claim("nc-1", &pool, &class);
        claim.status = None;
        pool.spec
            .template
            .metadata
            .labels
            .insert("x".into(), "y".into());

        assert_eq!(
            evaluator().evaluate(&claim, &pool, Some(&class)).unwrap(),
            DriftResult::NotDrifted
        );
    }
}
