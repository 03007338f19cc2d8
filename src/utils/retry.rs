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

//! Retrying provider calls that fail transiently.

use crate::cluster::{self, CapacityProvisioner, LaunchRequest};
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::warn;

const RETRY_BASE_DELAY_MS: u64 = 100;
const RETRY_MAX_DELAY: Duration = Duration::from_secs(20);

/// Jittered exponential delays for `attempts` tries in total.
pub fn backoff(attempts: usize) -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(2)
        .factor(RETRY_BASE_DELAY_MS / 2)
        .max_delay(RETRY_MAX_DELAY)
        .map(jitter)
        .take(attempts.saturating_sub(1))
}

struct TransientOnly;

impl tokio_retry::Condition<cluster::Error> for TransientOnly {
    fn should_retry(&mut self, error: &cluster::Error) -> bool {
        if error.is_transient() {
            warn!("retrying launch: {}", error);
        }
        error.is_transient()
    }
}

/// Launches, retrying only [`cluster::Error::TransientProvider`] failures.
pub async fn launch(
    provisioner: &dyn CapacityProvisioner,
    request: &LaunchRequest,
    attempts: usize,
) -> Result<String, cluster::Error> {
    RetryIf::spawn(backoff(attempts), || provisioner.launch(request), TransientOnly).await
}
