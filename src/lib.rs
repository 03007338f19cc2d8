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

use crate::config::Settings;
use crate::context::Context;
use crate::reconcile::{error_policy, reconcile_node_pool};
use crate::types::v1beta1::ec2nodeclass::EC2NodeClass;
use crate::types::v1beta1::labels;
use crate::types::v1beta1::nodeclaim::NodeClaim;
use crate::types::v1beta1::nodepool::NodePool;
use futures::StreamExt;
use k8s_openapi::api::core::v1 as corev1;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{Controller, watcher};
use kube::{Api, Client, CustomResourceExt, ResourceExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub mod budget;
pub mod cluster;
pub mod config;
mod context;
pub mod disruption;
pub mod drift;
pub mod fingerprint;
pub mod reconcile;
pub mod server;
pub mod types;
pub mod utils;


/// Maps a pool-labelled object to its pool.
fn pool_of<K: ResourceExt>(object: &K) -> Option<ObjectRef<NodePool>> {
    object
        .labels()
        .get(labels::NODE_POOL_LABEL)
        .map(|pool| ObjectRef::new(pool))
}

pub async fn run(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();

    info!("starting with {:?}", settings);

    let client = Client::try_default().await?;
    let pool_client = Api::<NodePool>::all(client.clone());

    let context = Arc::new(Context::new(client.clone(), settings.clone()));
    let health = tokio::spawn(server::run(settings.health_port, context.reports()));

    Controller::new(pool_client, watcher::Config::default())
        .watches(
            Api::<NodeClaim>::all(client.clone()),
            watcher::Config::default(),
            |claim| pool_of(&claim),
        )
        .watches(
            Api::<corev1::Node>::all(client.clone()),
            watcher::Config::default().labels(labels::NODE_POOL_LABEL),
            |node| pool_of(&node),
        )
        .run(reconcile_node_pool, error_policy, context)
        .for_each(|res| async move {
            match res {
                Ok((pool, _)) => info!("reconciled successful, object{:?}", pool.name),
                Err(e) => warn!("reconcile failed: {}", e),
            }
        })
        .await;

    health.abort();
    Ok(())
}

pub async fn crd(file: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer: Pin<Box<dyn AsyncWrite + Send>> = if let Some(file) = file {
        Box::pin(
            tokio::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(file)
                .await?,
        )
    } else {
        Box::pin(tokio::io::stdout())
    };

    for crd in [NodePool::crd(), NodeClaim::crd(), EC2NodeClass::crd()] {
        writer.write_all(b"---\n").await?;
        writer
            .write_all(serde_yaml_ng::to_string(&crd)?.as_bytes())
            .await?;
    }
    writer.flush().await?;

    Ok(())
}
