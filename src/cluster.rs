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

//! The seams between disruption logic and the outside world: object storage, capacity,
//! pod eviction and events.

use crate::types;
use crate::types::v1beta1::ec2nodeclass::EC2NodeClass;
use crate::types::v1beta1::nodeclaim::{NodeClaim, NodeClaimStatus};
use crate::types::v1beta1::nodepool::NodePool;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, ObjectReference, Pod};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::runtime::events::EventType;
use snafu::Snafu;
use tracing::debug;

pub mod client;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// The provider failed in a way that may succeed on retry.
    #[snafu(display("transient provider error: {}", message))]
    TransientProvider { message: String },

    #[snafu(display("replacement '{}' did not register in time", name))]
    RegistrationTimeout { name: String },

    #[snafu(display("replacement '{}' did not initialize in time", name))]
    InitializationTimeout { name: String },

    /// The desired spec cannot be launched; retrying will not help.
    #[snafu(display("invalid launch spec: {}", message))]
    SpecInvalid { message: String },

    #[snafu(display("conflict writing {} '{}'", kind, name))]
    ConflictOnWrite { kind: String, name: String },

    #[snafu(display("{} '{}' not found", kind, name))]
    NotFound { kind: String, name: String },

    #[snafu(display("Kubernetes API error: {}", source))]
    Kube { source: kube::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },

    #[snafu(transparent)]
    Serde { source: serde_json::Error },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::ConflictOnWrite { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientProvider { .. })
    }

    /// Cause recorded when a disruption is rolled back because of this error.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::TransientProvider { .. } => "TransientProvider",
            Error::RegistrationTimeout { .. } => "RegistrationTimeout",
            Error::InitializationTimeout { .. } => "InitializationTimeout",
            Error::SpecInvalid { .. } => "SpecInvalid",
            Error::ConflictOnWrite { .. } => "ConflictOnWrite",
            Error::NotFound { .. } => "NotFound",
            Error::Kube { .. } | Error::Types { .. } | Error::Serde { .. } => "Error",
        }
    }
}

/// Capacity to create in place of a disrupted claim.
#[derive(Clone, Debug)]
pub struct LaunchRequest {
    pub pool: NodePool,
    pub class: Option<EC2NodeClass>,
    pub replacement_for: String,
}

/// Reasons attached to published events.
pub mod reasons {
    pub const DRIFTED: &str = "Drifted";
    pub const DISRUPTION_TAINTED: &str = "DisruptionTainted";
    pub const DISRUPTION_LAUNCHED: &str = "DisruptionLaunched";
    pub const DISRUPTION_ROLLED_BACK: &str = "DisruptionRolledBack";
    pub const DISRUPTION_TERMINATED: &str = "DisruptionTerminated";
    pub const DISRUPTION_BLOCKED: &str = "DisruptionBlocked";
    pub const DISRUPTION_BUDGET_INVALID: &str = "DisruptionBudgetInvalid";
    pub const UNREGISTERED: &str = "Unregistered";
}

/// Reads and writes the objects disruption works with. Writes of claims and nodes are
/// optimistic: a stale `resourceVersion` yields [`Error::ConflictOnWrite`].
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get_node_pool(&self, name: &str) -> Result<NodePool, Error>;

    async fn get_node_class(&self, name: &str) -> Result<EC2NodeClass, Error>;

    async fn get_node_claim(&self, name: &str) -> Result<NodeClaim, Error>;

    /// Claims labelled with the pool.
    async fn list_node_claims(&self, pool: &str) -> Result<Vec<NodeClaim>, Error>;

    async fn replace_node_claim_status(&self, claim: &NodeClaim) -> Result<NodeClaim, Error>;

    async fn delete_node_claim(&self, name: &str) -> Result<(), Error>;

    async fn get_node(&self, name: &str) -> Result<Node, Error>;

    /// Nodes labelled with the pool.
    async fn list_nodes(&self, pool: &str) -> Result<Vec<Node>, Error>;

    async fn replace_node(&self, node: &Node) -> Result<Node, Error>;

    async fn delete_node(&self, name: &str) -> Result<(), Error>;

    async fn list_pods_on_node(&self, node: &str) -> Result<Vec<Pod>, Error>;

    async fn list_pod_disruption_budgets(&self) -> Result<Vec<PodDisruptionBudget>, Error>;
}

#[async_trait]
pub trait CapacityProvisioner: Send + Sync {
    /// Creates replacement capacity and returns the new claim's name.
    async fn launch(&self, request: &LaunchRequest) -> Result<String, Error>;
}

#[async_trait]
pub trait PodEvictor: Send + Sync {
    /// Asks for a pod to be evicted. `Ok(false)` means a disruption budget refused it for now.
    async fn evict(&self, pod: &Pod) -> Result<bool, Error>;
}

/// Fire-and-forget Kubernetes events. Failures are logged, never returned.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: Option<String>,
    );
}

/// Reads a fresh claim, applies `mutate` to its status and writes it back, retrying on
/// conflict. Skips the write when `mutate` reports no change.
pub async fn update_node_claim_status<F>(
    store: &dyn ClusterStore,
    name: &str,
    attempts: usize,
    mut mutate: F,
) -> Result<NodeClaim, Error>
where
    F: FnMut(&NodeClaim, &mut NodeClaimStatus) -> bool + Send,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut claim = store.get_node_claim(name).await?;
        let mut status = claim.status.clone().unwrap_or_default();
        if !mutate(&claim, &mut status) {
            return Ok(claim);
        }
        claim.status = Some(status);

        match store.replace_node_claim_status(&claim).await {
            Err(e) if e.is_conflict() && attempt < attempts.max(1) => {
                debug!("nodeclaim {} status write conflicted, retrying with a fresh read", name);
            }
            result => return result,
        }
    }
}

/// Same as [`update_node_claim_status`] for a Node.
pub async fn update_node<F>(
    store: &dyn ClusterStore,
    name: &str,
    attempts: usize,
    mut mutate: F,
) -> Result<Node, Error>
where
    F: FnMut(&mut Node) -> bool + Send,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut node = store.get_node(name).await?;
        if !mutate(&mut node) {
            return Ok(node);
        }

        match store.replace_node(&node).await {
            Err(e) if e.is_conflict() && attempt < attempts.max(1) => {
                debug!("node {} write conflicted, retrying with a fresh read", name);
            }
            result => return result,
        }
    }
}
