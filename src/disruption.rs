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

//! Budgeted disruption of drifted capacity.
//!
//! Each tick of a pool first advances disruptions already in flight, reaps claims that never
//! registered, then starts new disruptions for drifted claims while the pool's budget allows.
//! All progress is persisted in the claim status, so a restarted controller resumes where the
//! previous one stopped.

use crate::budget;
use crate::cluster::{
    self, CapacityProvisioner, ClusterStore, EventPublisher, LaunchRequest, PodEvictor, reasons,
};
use crate::config::Settings;
use crate::drift;
use crate::types;
use crate::types::v1beta1::ec2nodeclass::EC2NodeClass;
use crate::types::v1beta1::labels;
use crate::types::v1beta1::nodeclaim::{DisruptionMethod, DisruptionPhase, NodeClaim};
use crate::types::v1beta1::nodepool::NodePool;
use crate::utils::{retry, time};
use candidate::{Candidate, PodState};
use chrono::{DateTime, TimeDelta, Utc};
use drain::DrainProgress;
use k8s_openapi::api::core::v1::Node;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use snafu::Snafu;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub mod candidate;
pub mod drain;
pub mod pdb;
pub mod state;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(transparent)]
    Cluster { source: cluster::Error },

    #[snafu(transparent)]
    Drift { source: drift::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },

    #[snafu(display("invalid disruption transition {} -> {}", from, to))]
    InvalidTransition { from: String, to: String },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Cluster { source } if source.is_not_found())
    }
}

/// What a pool looked like after its last tick.
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoolReport {
    pub pool: String,
    pub total: usize,
    pub disrupting: usize,
    /// `None` when no budget restricts the pool.
    pub allowed: Option<usize>,
    pub in_flight: Vec<InFlight>,
    pub started: Vec<String>,
    pub blocked: Vec<String>,
    pub rolled_back: Vec<String>,
    pub terminated: Vec<String>,
    pub reaped: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_error: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InFlight {
    pub claim: String,
    pub phase: DisruptionPhase,
    pub method: DisruptionMethod,
    pub replacements: Vec<String>,
}

pub type Reports = Arc<RwLock<BTreeMap<String, PoolReport>>>;

pub struct Orchestrator {
    store: Arc<dyn ClusterStore>,
    provisioner: Arc<dyn CapacityProvisioner>,
    evictor: Arc<dyn PodEvictor>,
    events: Arc<dyn EventPublisher>,
    settings: Settings,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    reports: Reports,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        provisioner: Arc<dyn CapacityProvisioner>,
        evictor: Arc<dyn PodEvictor>,
        events: Arc<dyn EventPublisher>,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            provisioner,
            evictor,
            events,
            settings,
            locks: Mutex::new(HashMap::new()),
            reports: Arc::default(),
        }
    }

    pub fn reports(&self) -> Reports {
        self.reports.clone()
    }

    pub async fn forget(&self, pool: &str) {
        self.reports.write().await.remove(pool);
        self.locks.lock().await.remove(pool);
    }

    async fn pool_lock(&self, pool: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(pool.to_owned())
            .or_default()
            .clone()
    }

    fn initialization_timeout(&self) -> TimeDelta {
        TimeDelta::from_std(self.settings.initialization_timeout).unwrap_or(TimeDelta::MAX)
    }

    fn registration_ttl(&self) -> TimeDelta {
        TimeDelta::from_std(self.settings.registration_ttl).unwrap_or(TimeDelta::MAX)
    }

    /// One tick for a pool. Only one tick per pool runs at a time.
    pub async fn reconcile_pool(&self, pool_name: &str, now: DateTime<Utc>) -> Result<PoolReport, Error> {
        let lock = self.pool_lock(pool_name).await;
        let _guard = lock.lock().await;

        let pool = self.store.get_node_pool(pool_name).await?;
        let class = self.node_class(&pool).await?;
        let desired_hash = drift::desired_fingerprint(&pool, class.as_ref())?;
        let mut report = PoolReport {
            pool: pool_name.to_owned(),
            ..Default::default()
        };

        // in-flight disruptions keep going even with drift switched off
        let claims = self.store.list_node_claims(pool_name).await?;
        for claim in claims
            .iter()
            .filter(|c| c.disruption().is_some() && !c.is_deleting())
        {
            if let Err(e) = self.advance(claim, &pool, class.as_ref(), now, &mut report).await {
                warn!("advancing disruption of nodeclaim {} failed: {}", claim.name_any(), e);
            }
        }

        let claims = self.store.list_node_claims(pool_name).await?;
        let claims = self.reap_unregistered(claims, now, &mut report).await;

        let total = candidate::budget_base(&claims);
        let mut disrupting = count_disrupting(&claims);
        let allowed = self.allowed(&pool, total, now, &mut report).await;

        if !self.settings.feature_gates.drift {
            debug!("drift is disabled, not starting disruptions in nodepool {}", pool_name);
        } else if budget::remaining(allowed, disrupting) > 0 {
            let nodes: BTreeMap<String, Node> = self
                .store
                .list_nodes(pool_name)
                .await?
                .into_iter()
                .map(|n| (n.name_any(), n))
                .collect();
            let pod_state = self.pod_state(&claims, &nodes).await?;
            let selection = candidate::select(
                &claims,
                &nodes,
                &pod_state,
                &desired_hash,
                budget::remaining(allowed, disrupting),
            );

            for (claim, blocker) in &selection.blocked {
                debug!("nodeclaim {} is drifted but blocked: {}", claim.name_any(), blocker);
                self.publish(claim, EventType::Normal, reasons::DISRUPTION_BLOCKED, blocker.to_string())
                    .await;
                report.blocked.push(claim.name_any());
            }

            for candidate in &selection.candidates {
                // budgets may have been edited since the tick started
                let live = self.store.get_node_pool(pool_name).await?;
                let allowed =
                    budget::allowed_disruptions(&live.spec.disruption.budgets, total, now).unwrap_or(0);
                if budget::remaining(allowed, disrupting) == 0 {
                    debug!("nodepool {} disruption budget exhausted", pool_name);
                    break;
                }

                match self
                    .start(candidate, &pool, class.as_ref(), &desired_hash, now, &mut report)
                    .await
                {
                    Ok(()) => {
                        disrupting += 1;
                        report.started.push(candidate.name());
                    }
                    Err(e) => warn!("starting disruption of nodeclaim {} failed: {}", candidate.name(), e),
                }
            }
        }

        let claims = self.store.list_node_claims(pool_name).await?;
        report.total = candidate::budget_base(&claims);
        report.disrupting = count_disrupting(&claims);
        report.allowed = (allowed != usize::MAX).then_some(allowed);
        report.in_flight = claims
            .iter()
            .filter_map(|c| {
                c.disruption().map(|d| InFlight {
                    claim: c.name_any(),
                    phase: d.phase,
                    method: d.method,
                    replacements: d.replacements.clone(),
                })
            })
            .collect();

        self.reports
            .write()
            .await
            .insert(pool_name.to_owned(), report.clone());
        Ok(report)
    }

    async fn node_class(&self, pool: &NodePool) -> Result<Option<EC2NodeClass>, Error> {
        match self.store.get_node_class(pool.node_class_name()).await {
            Ok(class) => Ok(Some(class)),
            Err(e) if e.is_not_found() => {
                debug!("nodeclass {} of nodepool {} not found", pool.node_class_name(), pool.name_any());
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// A misconfigured budget allows nothing.
    async fn allowed(&self, pool: &NodePool, total: usize, now: DateTime<Utc>, report: &mut PoolReport) -> usize {
        match budget::allowed_disruptions(&pool.spec.disruption.budgets, total, now) {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!("nodepool {} has an invalid disruption budget: {}", pool.name_any(), e);
                self.events
                    .publish(
                        &pool.object_ref(&()),
                        EventType::Warning,
                        reasons::DISRUPTION_BUDGET_INVALID,
                        Some(e.to_string()),
                    )
                    .await;
                report.budget_error = Some(e.to_string());
                0
            }
        }
    }

    async fn pod_state(&self, claims: &[NodeClaim], nodes: &BTreeMap<String, Node>) -> Result<PodState, Error> {
        let mut pod_state = PodState {
            pods: BTreeMap::new(),
            pdbs: self.store.list_pod_disruption_budgets().await?,
        };
        for node in claims
            .iter()
            .filter(|c| c.drifted().is_some() && c.disruption().is_none())
            .filter_map(|c| c.node_name())
            .filter(|n| nodes.contains_key(*n))
        {
            let pods = self.store.list_pods_on_node(node).await?;
            pod_state.pods.insert(node.to_owned(), pods);
        }
        Ok(pod_state)
    }

    /// Deletes claims that have not registered within the registration TTL. Returns the rest.
    async fn reap_unregistered(
        &self,
        claims: Vec<NodeClaim>,
        now: DateTime<Utc>,
        report: &mut PoolReport,
    ) -> Vec<NodeClaim> {
        let mut kept = Vec::with_capacity(claims.len());
        for claim in claims {
            let expired = !claim.is_registered()
                && !claim.is_deleting()
                && claim.disruption().is_none()
                && claim
                    .creation_timestamp()
                    .as_ref()
                    .and_then(time::to_chrono)
                    .is_some_and(|created| now - created >= self.registration_ttl());
            if !expired {
                kept.push(claim);
                continue;
            }

            let name = claim.name_any();
            match self.store.delete_node_claim(&name).await {
                Ok(()) => {
                    info!("deleted nodeclaim {} which never registered", name);
                    self.publish(
                        &claim,
                        EventType::Warning,
                        reasons::UNREGISTERED,
                        format!("nodeclaim did not register within {:?}", self.settings.registration_ttl),
                    )
                    .await;
                    report.reaped.push(name);
                }
                Err(e) => {
                    warn!("deleting unregistered nodeclaim {} failed: {}", name, e);
                    kept.push(claim);
                }
            }
        }
        kept
    }

    async fn start(
        &self,
        candidate: &Candidate,
        pool: &NodePool,
        class: Option<&EC2NodeClass>,
        desired_hash: &str,
        now: DateTime<Utc>,
        report: &mut PoolReport,
    ) -> Result<(), Error> {
        let name = candidate.name();
        let method = candidate.method();

        // persisted before the taint so a crash in between is resumed, never forgotten
        let claim = cluster::update_node_claim_status(
            &*self.store,
            &name,
            self.settings.conflict_retries,
            |_, status| state::start(status, candidate.reason, method, desired_hash, now).is_ok(),
        )
        .await?;

        self.set_taint(&candidate.node.name_any(), true).await?;
        info!(
            "started {} disruption of nodeclaim {} ({}), {} pods to reschedule",
            method, name, candidate.reason, candidate.reschedulable
        );
        self.publish(
            &claim,
            EventType::Normal,
            reasons::DISRUPTION_TAINTED,
            format!("{} drifted ({}), disrupting by {}", name, candidate.reason, method),
        )
        .await;

        self.advance(&claim, pool, class, now, report).await
    }

    async fn advance(
        &self,
        claim: &NodeClaim,
        pool: &NodePool,
        class: Option<&EC2NodeClass>,
        now: DateTime<Utc>,
        report: &mut PoolReport,
    ) -> Result<(), Error> {
        let Some(disruption) = claim.disruption().cloned() else {
            return Ok(());
        };

        if disruption.phase != DisruptionPhase::Terminated
            && let Some(node) = claim.node_name()
        {
            self.set_taint(node, true).await?;
        }

        match (disruption.phase, disruption.method) {
            // never persisted: a drifted claim at rest has no disruption status at all
            (DisruptionPhase::Drifted, _) => Ok(()),
            (DisruptionPhase::Tainted, DisruptionMethod::Delete) => {
                let claim = self.transition(claim, DisruptionPhase::Draining).await?;
                self.drain(&claim, report).await
            }
            (DisruptionPhase::Tainted, DisruptionMethod::Replace) => {
                self.launch(claim, pool, class, now, report).await
            }
            (DisruptionPhase::WaitingForReplacement, _) => {
                self.wait_for_replacement(claim, now, report).await
            }
            (DisruptionPhase::Draining, _) => self.drain(claim, report).await,
            (DisruptionPhase::Terminated, _) => self.terminate(claim, report).await,
        }
    }

    async fn launch(
        &self,
        claim: &NodeClaim,
        pool: &NodePool,
        class: Option<&EC2NodeClass>,
        now: DateTime<Utc>,
        report: &mut PoolReport,
    ) -> Result<(), Error> {
        let name = claim.name_any();

        // a replacement created before a restart is adopted rather than launched twice
        let existing = self
            .store
            .list_node_claims(&pool.name_any())
            .await?
            .into_iter()
            .find(|c| c.annotation(labels::REPLACEMENT_FOR_ANNOTATION) == Some(name.as_str()) && !c.is_deleting())
            .map(|c| c.name_any());

        let launched = match existing {
            Some(replacement) => Ok(replacement),
            None => {
                let request = LaunchRequest {
                    pool: pool.clone(),
                    class: class.cloned(),
                    replacement_for: name.clone(),
                };
                retry::launch(&*self.provisioner, &request, self.settings.launch_retries).await
            }
        };

        match launched {
            Ok(replacement) => {
                let claim = cluster::update_node_claim_status(
                    &*self.store,
                    &name,
                    self.settings.conflict_retries,
                    |_, status| state::launched(status, &replacement, now).is_ok(),
                )
                .await?;
                self.publish(
                    &claim,
                    EventType::Normal,
                    reasons::DISRUPTION_LAUNCHED,
                    format!("launched replacement {replacement}"),
                )
                .await;
                Ok(())
            }
            Err(e @ cluster::Error::SpecInvalid { .. }) => self.roll_back(claim, &e, now, report).await,
            Err(e) if e.is_transient() => {
                let started = claim.disruption().map(|d| d.started_at).unwrap_or(now);
                if now - started >= self.initialization_timeout() {
                    self.roll_back(claim, &e, now, report).await
                } else {
                    warn!("launching replacement for {} failed, retrying next tick: {}", name, e);
                    Ok(())
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn wait_for_replacement(
        &self,
        claim: &NodeClaim,
        now: DateTime<Utc>,
        report: &mut PoolReport,
    ) -> Result<(), Error> {
        let Some(disruption) = claim.disruption() else {
            return Ok(());
        };
        let Some(replacement_name) = disruption.replacements.first() else {
            return Ok(());
        };

        let replacement = match self.store.get_node_claim(replacement_name).await {
            Ok(replacement) => Some(replacement),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };

        match replacement {
            Some(r) if r.is_initialized() => {
                info!("replacement {} for {} is initialized", replacement_name, claim.name_any());
                let claim = self.transition(claim, DisruptionPhase::Draining).await?;
                self.drain(&claim, report).await
            }
            Some(_) if !state::replacement_timed_out(disruption, self.initialization_timeout(), now) => {
                debug!("waiting for replacement {} of {}", replacement_name, claim.name_any());
                Ok(())
            }
            replacement => {
                let name = replacement_name.clone();
                let cause = if replacement.is_some_and(|r| r.is_registered()) {
                    cluster::Error::InitializationTimeout { name }
                } else {
                    cluster::Error::RegistrationTimeout { name }
                };
                self.roll_back(claim, &cause, now, report).await
            }
        }
    }

    /// Untaints the node and records the failure. Replacements are left to the registration
    /// reaper so a slow but registered one is not thrown away.
    async fn roll_back(
        &self,
        claim: &NodeClaim,
        cause: &cluster::Error,
        now: DateTime<Utc>,
        report: &mut PoolReport,
    ) -> Result<(), Error> {
        let name = claim.name_any();
        let claim = cluster::update_node_claim_status(
            &*self.store,
            &name,
            self.settings.conflict_retries,
            |_, status| state::roll_back(status, cause.reason(), cause.to_string(), now).is_ok(),
        )
        .await?;

        if let Some(node) = claim.node_name() {
            self.set_taint(node, false).await?;
        }

        warn!("rolled back disruption of nodeclaim {}: {}", name, cause);
        self.publish(&claim, EventType::Warning, reasons::DISRUPTION_ROLLED_BACK, cause.to_string())
            .await;
        report.rolled_back.push(name);
        Ok(())
    }

    async fn drain(&self, claim: &NodeClaim, report: &mut PoolReport) -> Result<(), Error> {
        let Some(node_name) = claim.node_name() else {
            return self.terminate(claim, report).await;
        };

        let node = match self.store.get_node(node_name).await {
            Ok(node) => node,
            Err(e) if e.is_not_found() => return self.terminate(claim, report).await,
            Err(e) => return Err(e.into()),
        };
        if node.metadata.deletion_timestamp.is_some() {
            debug!("node {} is terminating", node_name);
            return Ok(());
        }

        match drain::drain(&*self.store, &*self.evictor, node_name).await? {
            DrainProgress::Drained => {
                info!("node {} is drained, deleting it", node_name);
                self.store.delete_node(node_name).await?;
            }
            DrainProgress::Evicting { pending, refused } => {
                debug!("node {}: {} pods pending eviction, {} refused", node_name, pending, refused);
            }
        }
        Ok(())
    }

    async fn terminate(&self, claim: &NodeClaim, report: &mut PoolReport) -> Result<(), Error> {
        let name = claim.name_any();
        let claim = self.transition(claim, DisruptionPhase::Terminated).await?;
        self.store.delete_node_claim(&name).await?;

        info!("disruption of nodeclaim {} finished", name);
        self.publish(
            &claim,
            EventType::Normal,
            reasons::DISRUPTION_TERMINATED,
            format!("{name} was replaced"),
        )
        .await;
        report.terminated.push(name);
        Ok(())
    }

    async fn transition(&self, claim: &NodeClaim, to: DisruptionPhase) -> Result<NodeClaim, Error> {
        Ok(cluster::update_node_claim_status(
            &*self.store,
            &claim.name_any(),
            self.settings.conflict_retries,
            |_, status| {
                status.disruption.as_ref().is_some_and(|d| d.phase != to)
                    && state::advance(status, to).is_ok()
            },
        )
        .await?)
    }

    /// Adds or removes the disruption taint. A node that is already gone is fine.
    async fn set_taint(&self, node: &str, present: bool) -> Result<(), Error> {
        let result = cluster::update_node(&*self.store, node, self.settings.conflict_retries, |node| {
            let taints = node
                .spec
                .get_or_insert_with(Default::default)
                .taints
                .get_or_insert_with(Vec::new);
            let has = taints.iter().any(labels::is_disruption_taint);
            match (present, has) {
                (true, false) => {
                    taints.push(labels::disruption_taint());
                    true
                }
                (false, true) => {
                    taints.retain(|t| !labels::is_disruption_taint(t));
                    true
                }
                _ => false,
            }
        })
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn publish(&self, claim: &NodeClaim, type_: EventType, reason: &str, note: String) {
        self.events
            .publish(&claim.object_ref(&()), type_, reason, Some(note))
            .await;
    }
}

fn count_disrupting(claims: &[NodeClaim]) -> usize {
    claims
        .iter()
        .filter(|c| c.is_initialized() && (c.disruption().is_some() || c.is_deleting()))
        .count()
}
