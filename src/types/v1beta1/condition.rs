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

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::Display;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Display)]
pub enum ConditionType {
    #[strum(to_string = "Launched")]
    Launched,

    #[strum(to_string = "Registered")]
    Registered,

    #[strum(to_string = "Initialized")]
    Initialized,

    #[strum(to_string = "Drifted")]
    Drifted,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,

    /// "True", "False" or "Unknown"
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/// Finds a condition by type.
pub fn find(conditions: &[Condition], type_: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_true(conditions: &[Condition], type_: ConditionType) -> bool {
    find(conditions, type_).is_some_and(Condition::is_true)
}

/// Sets a condition, keeping the transition time when status is unchanged.
/// Returns true when anything changed.
pub fn set(
    conditions: &mut Vec<Condition>,
    type_: ConditionType,
    status: bool,
    reason: Option<String>,
    message: Option<String>,
    now: DateTime<Utc>,
) -> bool {
    let status = if status { "True" } else { "False" }.to_owned();

    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(existing) => {
            if existing.status == status && existing.reason == reason && existing.message == message
            {
                return false;
            }
            if existing.status != status {
                existing.last_transition_time = now;
            }
            existing.status = status;
            existing.reason = reason;
            existing.message = message;
            true
        }
        None => {
            conditions.push(Condition {
                type_,
                status,
                reason,
                message,
                last_transition_time: now,
            });
            true
        }
    }
}

/// Removes a condition. Returns true when one was present.
pub fn clear(conditions: &mut Vec<Condition>, type_: ConditionType) -> bool {
    let before = conditions.len();
    conditions.retain(|c| c.type_ != type_);
    before != conditions.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_set_keeps_transition_time_on_same_status() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let mut conditions = vec![];

        assert!(set(&mut conditions, ConditionType::Drifted, true, Some("AMIDrift".into()), None, t0));
        assert!(!set(&mut conditions, ConditionType::Drifted, true, Some("AMIDrift".into()), None, t1));
        assert_eq!(conditions[0].last_transition_time, t0);

        // reason changes but status does not
        assert!(set(&mut conditions, ConditionType::Drifted, true, Some("NodePoolDrifted".into()), None, t1));
        assert_eq!(conditions[0].last_transition_time, t0);

        assert!(clear(&mut conditions, ConditionType::Drifted));
        assert!(!is_true(&conditions, ConditionType::Drifted));
    }
}
