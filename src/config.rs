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

use clap::Args;
use snafu::{ResultExt, Snafu};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("feature gate '{}' must look like Name=true|false", gate))]
    MalformedGate { gate: String },

    #[snafu(display("feature gate '{}' has a non boolean value: {}", gate, source))]
    GateValue {
        gate: String,
        source: std::str::ParseBoolError,
    },

    #[snafu(display("unknown feature gate '{}'", name))]
    UnknownGate { name: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureGates {
    pub drift: bool,
}

impl Default for FeatureGates {
    fn default() -> Self {
        Self { drift: true }
    }
}

impl FromStr for FeatureGates {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut gates = FeatureGates::default();
        for gate in s.split(',').map(str::trim).filter(|g| !g.is_empty()) {
            let Some((name, value)) = gate.split_once('=') else {
                return MalformedGateSnafu { gate }.fail();
            };
            let enabled: bool = value.trim().parse().context(GateValueSnafu { gate })?;
            match name.trim() {
                "Drift" => gates.drift = enabled,
                other => return UnknownGateSnafu { name: other }.fail(),
            }
        }
        Ok(gates)
    }
}

/// Controller settings, from flags or the environment.
#[derive(Args, Clone, Debug)]
pub struct Settings {
    /// Feature gates, e.g. "Drift=false"
    #[arg(long, env = "FEATURE_GATES", default_value = "Drift=true")]
    pub feature_gates: FeatureGates,

    /// How often every node pool is reconciled regardless of watch events
    #[arg(long, env = "RECONCILE_INTERVAL", default_value = "10s", value_parser = humantime::parse_duration)]
    pub reconcile_interval: Duration,

    /// Unregistered nodeclaims older than this are deleted
    #[arg(long, env = "REGISTRATION_TTL", default_value = "15m", value_parser = humantime::parse_duration)]
    pub registration_ttl: Duration,

    /// A replacement not initialized this long after launch rolls its disruption back
    #[arg(long, env = "INITIALIZATION_TIMEOUT", default_value = "10m", value_parser = humantime::parse_duration)]
    pub initialization_timeout: Duration,

    /// Attempts for an optimistic write before giving up until the next tick
    #[arg(long, env = "CONFLICT_RETRIES", default_value_t = 5)]
    pub conflict_retries: usize,

    /// Attempts to launch a replacement on transient provider errors
    #[arg(long, env = "LAUNCH_RETRIES", default_value_t = 5)]
    pub launch_retries: usize,

    /// Port of the health and status endpoint
    #[arg(long, env = "HEALTH_PORT", default_value_t = 8081)]
    pub health_port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            feature_gates: FeatureGates::default(),
            reconcile_interval: Duration::from_secs(10),
            registration_ttl: Duration::from_secs(15 * 60),
            initialization_timeout: Duration::from_secs(10 * 60),
            conflict_retries: 5,
            launch_retries: 5,
            health_port: 8081,
        }
    }
}
