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

use crate::cluster::{self, reasons};
use crate::context::Context;
use crate::disruption::{self, PoolReport};
use crate::drift::DriftResult;
use crate::types::v1beta1::nodepool::NodePool;
use crate::{context, types};
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use snafu::Snafu;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(transparent)]
    Context { source: context::Error },

    #[snafu(transparent)]
    Cluster { source: cluster::Error },

    #[snafu(transparent)]
    Disruption { source: disruption::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Cluster { source } => source.is_not_found(),
            Error::Context {
                source: context::Error::Cluster { source },
            } => source.is_not_found(),
            Error::Disruption { source } => source.is_not_found(),
            _ => false,
        }
    }
}

pub async fn reconcile_node_pool(pool: Arc<NodePool>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = pool.name()?;
    let now = Utc::now();

    let latest_pool = match ctx.store.get_node_pool(&name).await {
        Ok(pool) => pool,
        Err(e) if e.is_not_found() => {
            debug!("nodepool {} is gone", name);
            ctx.orchestrator.forget(&name).await;
            return Ok(Action::await_change());
        }
        Err(e) => return Err(e.into()),
    };

    if latest_pool.metadata.deletion_timestamp.is_some() {
        debug!(
            "nodepool {} is deleted, deletion_timestamp is {:?}",
            name, latest_pool.metadata.deletion_timestamp
        );
        return Ok(Action::await_change());
    }

    // 1. Mark drift on every claim of the pool
    evaluate_drift(&ctx, &latest_pool, now).await?;

    // 2. Move disruptions forward within the budget
    let report = ctx.orchestrator.reconcile_pool(&name, now).await?;
    log_report(&report);

    Ok(Action::requeue(ctx.settings.reconcile_interval))
}

/// Evaluates every claim of the pool and persists the `Drifted` condition. A claim that cannot
/// be evaluated is logged and skipped. Returns how many claims are drifted.
pub async fn evaluate_drift(ctx: &Context, pool: &NodePool, now: DateTime<Utc>) -> Result<usize, Error> {
    let class = match ctx.store.get_node_class(pool.node_class_name()).await {
        Ok(class) => Some(class),
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e.into()),
    };

    let mut drifted = 0;
    for claim in ctx.store.list_node_claims(&pool.name_any()).await? {
        if claim.is_deleting() {
            continue;
        }

        let result = match ctx.evaluator.evaluate(&claim, pool, class.as_ref()) {
            Ok(result) => result,
            Err(e) => {
                warn!("evaluating drift of nodeclaim {} failed: {}", claim.name_any(), e);
                continue;
            }
        };
        if result == DriftResult::Disabled {
            continue;
        }
        if result.is_drifted() {
            drifted += 1;
        }

        let was_drifted = claim.drifted().is_some();
        if let Err(e) = ctx.update_drift(&claim, result, now).await {
            warn!("updating drift of nodeclaim {} failed: {}", claim.name_any(), e);
            continue;
        }

        if let Some(reason) = result.reason()
            && !was_drifted
        {
            info!("nodeclaim {} drifted: {}", claim.name_any(), reason);
            ctx.record(&claim, EventType::Normal, reasons::DRIFTED, &reason.to_string())
                .await;
        }
    }

    Ok(drifted)
}

fn log_report(report: &PoolReport) {
    if report.started.is_empty()
        && report.rolled_back.is_empty()
        && report.terminated.is_empty()
        && report.reaped.is_empty()
    {
        debug!(
            "nodepool {}: {} nodes, {} disrupting",
            report.pool, report.total, report.disrupting
        );
    } else {
        info!(
            "nodepool {}: {} nodes, {} disrupting, started {:?}, rolled back {:?}, terminated {:?}, reaped {:?}",
            report.pool,
            report.total,
            report.disrupting,
            report.started,
            report.rolled_back,
            report.terminated,
            report.reaped
        );
    }
}

pub fn error_policy(_object: Arc<NodePool>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!("error_policy: {:?}", error);

    if error.is_not_found() {
        Action::await_change()
    } else {
        Action::requeue(Duration::from_secs(5))
    }
}
