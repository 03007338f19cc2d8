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

//! Kubernetes API implementation of the cluster seams.

use super::{
    CapacityProvisioner, ClusterStore, Error, EventPublisher, KubeSnafu, LaunchRequest, PodEvictor,
};
use crate::types::v1beta1::ec2nodeclass::EC2NodeClass;
use crate::types::v1beta1::labels;
use crate::types::v1beta1::nodeclaim::NodeClaim;
use crate::types::v1beta1::nodepool::NodePool;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, ObjectReference, Pod};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{Api, DeleteParams, EvictParams, ListParams, PostParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::ResultExt;
use std::fmt::Debug;
use tracing::{info, warn};

pub const FIELD_MANAGER: &str = "disruption-operator";

pub struct KubeCluster {
    client: Client,
    recorder: Recorder,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: FIELD_MANAGER.into(),
            instance: std::env::var("HOSTNAME").ok(),
        };

        let recorder = Recorder::new(client.clone(), reporter);
        Self { client, recorder }
    }

    fn api<T>(&self) -> Api<T>
    where
        T: Resource + Clone + DeserializeOwned + Debug,
        <T as Resource>::DynamicType: Default,
    {
        Api::all(self.client.clone())
    }

    async fn get<T>(&self, name: &str) -> Result<T, Error>
    where
        T: Resource + Clone + DeserializeOwned + Debug,
        <T as Resource>::DynamicType: Default,
    {
        self.api::<T>()
            .get(name)
            .await
            .map_err(|e| api_error::<T>(name, e))
    }

    async fn list<T>(&self, params: &ListParams) -> Result<Vec<T>, Error>
    where
        T: Resource + Clone + DeserializeOwned + Debug,
        <T as Resource>::DynamicType: Default,
    {
        Ok(self
            .api::<T>()
            .list(params)
            .await
            .context(KubeSnafu)?
            .items)
    }

    async fn replace<T>(&self, resource: &T) -> Result<T, Error>
    where
        T: Resource + Clone + Serialize + DeserializeOwned + Debug,
        <T as Resource>::DynamicType: Default,
    {
        let name = resource.name_any();
        self.api::<T>()
            .replace(&name, &PostParams::default(), resource)
            .await
            .map_err(|e| api_error::<T>(&name, e))
    }

    /// Deleting something already gone is not an error.
    async fn delete<T>(&self, name: &str) -> Result<(), Error>
    where
        T: Resource + Clone + DeserializeOwned + Debug,
        <T as Resource>::DynamicType: Default,
    {
        match self.api::<T>().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) => match api_error::<T>(name, e) {
                Error::NotFound { .. } => Ok(()),
                e => Err(e),
            },
        }
    }
}

fn api_error<T>(name: &str, source: kube::Error) -> Error
where
    T: Resource,
    <T as Resource>::DynamicType: Default,
{
    let kind = T::kind(&Default::default()).to_string();
    match &source {
        kube::Error::Api(ae) if ae.code == 404 => Error::NotFound {
            kind,
            name: name.to_owned(),
        },
        kube::Error::Api(ae) if ae.code == 409 => Error::ConflictOnWrite {
            kind,
            name: name.to_owned(),
        },
        _ => Error::Kube { source },
    }
}

fn pool_selector(pool: &str) -> ListParams {
    ListParams::default().labels(&format!("{}={}", labels::NODE_POOL_LABEL, pool))
}

#[async_trait]
impl ClusterStore for KubeCluster {
    async fn get_node_pool(&self, name: &str) -> Result<NodePool, Error> {
        self.get(name).await
    }

    async fn get_node_class(&self, name: &str) -> Result<EC2NodeClass, Error> {
        self.get(name).await
    }

    async fn get_node_claim(&self, name: &str) -> Result<NodeClaim, Error> {
        self.get(name).await
    }

    async fn list_node_claims(&self, pool: &str) -> Result<Vec<NodeClaim>, Error> {
        self.list(&pool_selector(pool)).await
    }

    async fn replace_node_claim_status(&self, claim: &NodeClaim) -> Result<NodeClaim, Error> {
        let name = claim.name_any();
        self.api::<NodeClaim>()
            .replace_status(&name, &PostParams::default(), claim)
            .await
            .map_err(|e| api_error::<NodeClaim>(&name, e))
    }

    async fn delete_node_claim(&self, name: &str) -> Result<(), Error> {
        self.delete::<NodeClaim>(name).await
    }

    async fn get_node(&self, name: &str) -> Result<Node, Error> {
        self.get(name).await
    }

    async fn list_nodes(&self, pool: &str) -> Result<Vec<Node>, Error> {
        self.list(&pool_selector(pool)).await
    }

    async fn replace_node(&self, node: &Node) -> Result<Node, Error> {
        self.replace(node).await
    }

    async fn delete_node(&self, name: &str) -> Result<(), Error> {
        self.delete::<Node>(name).await
    }

    async fn list_pods_on_node(&self, node: &str) -> Result<Vec<Pod>, Error> {
        self.list(&ListParams::default().fields(&format!("spec.nodeName={node}")))
            .await
    }

    async fn list_pod_disruption_budgets(&self) -> Result<Vec<PodDisruptionBudget>, Error> {
        self.list(&ListParams::default()).await
    }
}

#[async_trait]
impl CapacityProvisioner for KubeCluster {
    async fn launch(&self, request: &LaunchRequest) -> Result<String, Error> {
        let claim = request.pool.new_node_claim(
            request.class.as_ref().map(|c| &c.spec),
            &request.replacement_for,
        )?;

        match self
            .api::<NodeClaim>()
            .create(&PostParams::default(), &claim)
            .await
        {
            Ok(created) => {
                info!(
                    "launched nodeclaim {} to replace {}",
                    created.name_any(),
                    request.replacement_for
                );
                Ok(created.name_any())
            }
            Err(kube::Error::Api(ae)) if ae.code == 400 || ae.code == 422 => {
                super::SpecInvalidSnafu {
                    message: ae.message.clone(),
                }
                .fail()
            }
            Err(kube::Error::Api(ae)) if ae.code == 429 || ae.code >= 500 => {
                super::TransientProviderSnafu {
                    message: ae.message.clone(),
                }
                .fail()
            }
            Err(e) => Err(Error::Kube { source: e }),
        }
    }
}

#[async_trait]
impl PodEvictor for KubeCluster {
    async fn evict(&self, pod: &Pod) -> Result<bool, Error> {
        let api: Api<Pod> = Api::namespaced(
            self.client.clone(),
            &pod.namespace().unwrap_or_else(|| "default".to_owned()),
        );
        match api.evict(&pod.name_any(), &EvictParams::default()).await {
            Ok(_) => Ok(true),
            // refused by a PodDisruptionBudget
            Err(kube::Error::Api(ae)) if ae.code == 429 => Ok(false),
            // already gone
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(true),
            Err(e) => Err(Error::Kube { source: e }),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeCluster {
    async fn publish(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_owned(),
            note,
            action: "Disruption".into(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, object).await {
            warn!("failed to publish {} event: {}", reason, e);
        }
    }
}
