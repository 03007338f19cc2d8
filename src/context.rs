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

use crate::cluster::client::KubeCluster;
use crate::cluster::{self, CapacityProvisioner, ClusterStore, EventPublisher, PodEvictor};
use crate::config::Settings;
use crate::disruption::{Orchestrator, Reports};
use crate::drift::{DriftEvaluator, DriftResult};
use crate::types;
use crate::types::v1beta1::nodeclaim::NodeClaim;
use chrono::{DateTime, Utc};
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use snafu::Snafu;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(transparent)]
    Cluster { source: cluster::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },
}

pub struct Context {
    pub(crate) store: Arc<dyn ClusterStore>,
    pub(crate) events: Arc<dyn EventPublisher>,
    pub(crate) evaluator: DriftEvaluator,
    pub(crate) orchestrator: Orchestrator,
    pub(crate) settings: Settings,
}

impl Context {
    pub fn new(client: kube::Client, settings: Settings) -> Self {
        Self::with_cluster(Arc::new(KubeCluster::new(client)), settings)
    }

    /// Builds a context over anything that can act as the whole cluster.
    pub fn with_cluster<C>(cluster: Arc<C>, settings: Settings) -> Self
    where
        C: ClusterStore + CapacityProvisioner + PodEvictor + EventPublisher + 'static,
    {
        let orchestrator = Orchestrator::new(
            cluster.clone(),
            cluster.clone(),
            cluster.clone(),
            cluster.clone(),
            settings.clone(),
        );
        Self {
            store: cluster.clone(),
            events: cluster,
            evaluator: DriftEvaluator::new(settings.feature_gates.drift),
            orchestrator,
            settings,
        }
    }

    pub fn reports(&self) -> Reports {
        self.orchestrator.reports()
    }

    /// send event
    #[inline]
    pub async fn record(
        &self,
        resource: &NodeClaim,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) {
        self.events
            .publish(
                &resource.object_ref(&()),
                event_type,
                reason,
                Some(message.to_owned()),
            )
            .await
    }

    /// Writes a drift result into the claim's conditions, re-reading the claim on conflict.
    /// Returns true when the status changed.
    pub async fn update_drift(
        &self,
        resource: &NodeClaim,
        result: DriftResult,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let mut changed = false;
        cluster::update_node_claim_status(
            &*self.store,
            &resource.name()?,
            self.settings.conflict_retries,
            |_, status| {
                changed = result.apply(status, now);
                changed
            },
        )
        .await?;

        if changed {
            debug!("nodeclaim {} drift is now {:?}", resource.name_any(), result);
        }
        Ok(changed)
    }
}
