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

//! Disruption state machine persisted in the claim status.
//!
//! ```text
//! Drifted -> Tainted -> WaitingForReplacement -> Draining -> Terminated
//!               |               |
//!               +---------------+--> Drifted (rolled back)
//! ```
//!
//! An empty node skips `WaitingForReplacement`.

use super::{Error, InvalidTransitionSnafu};
use crate::types::v1beta1::nodeclaim::{
    DisruptionFailure, DisruptionMethod, DisruptionPhase, DisruptionStatus, DriftReason,
    NodeClaim, NodeClaimStatus,
};
use chrono::{DateTime, Utc};
use snafu::ensure;

pub fn can_transition(from: DisruptionPhase, to: DisruptionPhase, method: DisruptionMethod) -> bool {
    use DisruptionPhase::*;
    matches!(
        (from, to, method),
        (Drifted, Tainted, _)
            | (Tainted, WaitingForReplacement, DisruptionMethod::Replace)
            | (Tainted, Draining, DisruptionMethod::Delete)
            | (WaitingForReplacement, Draining, DisruptionMethod::Replace)
            | (Draining, Terminated, _)
    )
}

/// Records the start of a disruption. The node is tainted after this is persisted.
pub fn start(
    status: &mut NodeClaimStatus,
    reason: DriftReason,
    method: DisruptionMethod,
    desired_hash: &str,
    now: DateTime<Utc>,
) -> Result<(), Error> {
    if let Some(current) = &status.disruption {
        return InvalidTransitionSnafu {
            from: current.phase.to_string(),
            to: DisruptionPhase::Tainted.to_string(),
        }
        .fail();
    }

    status.disruption = Some(DisruptionStatus {
        phase: DisruptionPhase::Tainted,
        method,
        reason,
        started_at: now,
        desired_hash: desired_hash.to_owned(),
        replacements: vec![],
        launched_at: None,
    });
    Ok(())
}

pub fn advance(status: &mut NodeClaimStatus, to: DisruptionPhase) -> Result<(), Error> {
    let Some(current) = status.disruption.as_mut() else {
        return InvalidTransitionSnafu {
            from: DisruptionPhase::Drifted.to_string(),
            to: to.to_string(),
        }
        .fail();
    };
    ensure!(
        can_transition(current.phase, to, current.method),
        InvalidTransitionSnafu {
            from: current.phase.to_string(),
            to: to.to_string(),
        }
    );
    current.phase = to;
    Ok(())
}

pub fn launched(
    status: &mut NodeClaimStatus,
    replacement: &str,
    now: DateTime<Utc>,
) -> Result<(), Error> {
    advance(status, DisruptionPhase::WaitingForReplacement)?;
    if let Some(current) = status.disruption.as_mut() {
        current.replacements = vec![replacement.to_owned()];
        current.launched_at = Some(now);
    }
    Ok(())
}

/// Clears the in-flight disruption and records why it failed. Only phases before draining
/// can be rolled back.
pub fn roll_back(
    status: &mut NodeClaimStatus,
    cause: &str,
    message: String,
    now: DateTime<Utc>,
) -> Result<(), Error> {
    let Some(current) = status.disruption.as_ref() else {
        return Ok(());
    };
    ensure!(
        matches!(
            current.phase,
            DisruptionPhase::Tainted | DisruptionPhase::WaitingForReplacement
        ),
        InvalidTransitionSnafu {
            from: current.phase.to_string(),
            to: DisruptionPhase::Drifted.to_string(),
        }
    );

    status.last_disruption_failure = Some(DisruptionFailure {
        reason: cause.to_owned(),
        message,
        desired_hash: current.desired_hash.clone(),
        failed_at: now,
    });
    status.disruption = None;
    Ok(())
}

/// True once the replacement has been waited for longer than `timeout`.
pub fn replacement_timed_out(
    disruption: &DisruptionStatus,
    timeout: chrono::Duration,
    now: DateTime<Utc>,
) -> bool {
    disruption
        .launched_at
        .is_some_and(|launched| now - launched >= timeout)
}

/// A failed attempt is not retried until the desired spec changes.
pub fn failed_against(claim: &NodeClaim, desired_hash: &str) -> bool {
    claim
        .last_disruption_failure()
        .is_some_and(|f| f.desired_hash == desired_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_replace_walks_every_phase() {
        let mut status = NodeClaimStatus::default();
        start(&mut status, DriftReason::AMIDrift, DisruptionMethod::Replace, "abc", now()).unwrap();
        assert_eq!(status.disruption.as_ref().unwrap().phase, DisruptionPhase::Tainted);
        assert!(start(&mut status, DriftReason::AMIDrift, DisruptionMethod::Replace, "abc", now()).is_err());

        // replace cannot skip the replacement
        assert!(advance(&mut status.clone(), DisruptionPhase::Draining).is_err());

        launched(&mut status, "default-xyz", now()).unwrap();
        let disruption = status.disruption.as_ref().unwrap();
        assert_eq!(disruption.phase, DisruptionPhase::WaitingForReplacement);
        assert_eq!(disruption.replacements, vec!["default-xyz".to_owned()]);

        advance(&mut status, DisruptionPhase::Draining).unwrap();
        assert!(roll_back(&mut status.clone(), "X", "y".into(), now()).is_err());
        advance(&mut status, DisruptionPhase::Terminated).unwrap();
    }

    #[test]
    fn test_delete_skips_replacement() {
        let mut status = NodeClaimStatus::default();
        start(&mut status, DriftReason::NodePoolDrifted, DisruptionMethod::Delete, "abc", now()).unwrap();
        assert!(launched(&mut status.clone(), "x", now()).is_err());
        advance(&mut status, DisruptionPhase::Draining).unwrap();
    }

    #[test]
    fn test_roll_back_records_failure() {
        let mut status = NodeClaimStatus::default();
        start(&mut status, DriftReason::AMIDrift, DisruptionMethod::Replace, "abc", now()).unwrap();
        launched(&mut status, "default-xyz", now()).unwrap();

        let disruption = status.disruption.clone().unwrap();
        assert!(!replacement_timed_out(&disruption, chrono::Duration::minutes(10), now() + chrono::Duration::minutes(9)));
        assert!(replacement_timed_out(&disruption, chrono::Duration::minutes(10), now() + chrono::Duration::minutes(10)));

        roll_back(&mut status, "RegistrationTimeout", "never registered".into(), now()).unwrap();
        assert!(status.disruption.is_none());
        let failure = status.last_disruption_failure.unwrap();
        assert_eq!(failure.reason, "RegistrationTimeout");
        assert_eq!(failure.desired_hash, "abc");
    }
}
