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

//! Conversions between Kubernetes timestamps and chrono.

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;

/// Goes through the RFC 3339 wire form so it does not depend on the time crate behind `Time`.
pub fn to_chrono(time: &metav1::Time) -> Option<DateTime<Utc>> {
    let value = serde_json::to_value(time).ok()?;
    DateTime::parse_from_rfc3339(value.as_str()?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

pub fn from_chrono(time: DateTime<Utc>) -> Option<metav1::Time> {
    serde_json::from_value(serde_json::Value::String(
        time.to_rfc3339_opts(SecondsFormat::Secs, true),
    ))
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_round_trip_at_second_precision() {
        let t = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 58).unwrap();
        let k8s = from_chrono(t).unwrap();
        assert_eq!(to_chrono(&k8s), Some(t));
    }
}
