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

//! How many nodes of a pool may be disrupted right now.

use crate::types::v1beta1::nodepool::Budget;
use chrono::{DateTime, Utc};
use snafu::{ResultExt, Snafu, ensure};

pub mod schedule;

pub use schedule::Schedule;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("invalid budget nodes value '{}'", value))]
    InvalidNodes {
        value: String,
        source: std::num::ParseIntError,
    },

    #[snafu(display("budget percentage '{}' is above 100%", value))]
    PercentageTooLarge { value: String },

    #[snafu(display("budget schedule '{}' has no duration", schedule))]
    MissingDuration { schedule: String },

    #[snafu(display("budget duration '{}' has no schedule", duration))]
    MissingSchedule { duration: String },

    #[snafu(display("invalid budget schedule '{}': {}", schedule, source))]
    InvalidSchedule {
        schedule: String,
        source: cron::error::Error,
    },

    #[snafu(display("budget schedule '{}' must have five fields", schedule))]
    ScheduleFields { schedule: String },

    #[snafu(display("invalid budget duration '{}': {}", duration, source))]
    InvalidDuration {
        duration: String,
        source: humantime::DurationError,
    },

    #[snafu(display("budget duration '{}' is out of range", duration))]
    DurationOutOfRange { duration: String },
}

/// Parsed `nodes` field of a budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeLimit {
    Count(usize),
    Percent(usize),
}

impl NodeLimit {
    pub fn parse(value: &str) -> Result<Self, Error> {
        let trimmed = value.trim();
        match trimmed.strip_suffix('%') {
            Some(percent) => {
                let percent: usize = percent
                    .trim()
                    .parse()
                    .context(InvalidNodesSnafu { value })?;
                ensure!(percent <= 100, PercentageTooLargeSnafu { value });
                Ok(NodeLimit::Percent(percent))
            }
            None => Ok(NodeLimit::Count(
                trimmed.parse().context(InvalidNodesSnafu { value })?,
            )),
        }
    }

    /// Percentages round up, so "10%" of 3 nodes still allows one.
    pub fn resolve(&self, total: usize) -> usize {
        match self {
            NodeLimit::Count(count) => *count,
            NodeLimit::Percent(percent) => total.saturating_mul(*percent).div_ceil(100),
        }
    }
}

/// A budget with its schedule window resolved.
#[derive(Clone, Debug)]
pub struct ParsedBudget {
    pub limit: NodeLimit,
    pub schedule: Option<Schedule>,
}

impl ParsedBudget {
    pub fn parse(budget: &Budget) -> Result<Self, Error> {
        let limit = NodeLimit::parse(&budget.nodes)?;

        let schedule = match (budget.schedule.as_deref(), budget.duration.as_deref()) {
            (None, None) => None,
            (Some(schedule), None) => return MissingDurationSnafu { schedule }.fail(),
            (None, Some(duration)) => return MissingScheduleSnafu { duration }.fail(),
            (Some(schedule), Some(duration)) => Some(Schedule::parse(schedule, duration)?),
        };

        Ok(Self { limit, schedule })
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.schedule.as_ref().is_none_or(|s| s.is_active(now))
    }
}

/// Most restrictive limit among the budgets active at `now`.
///
/// No budgets, or none active, means unbounded. Any misconfigured budget is an error;
/// callers treat that as zero.
pub fn allowed_disruptions(
    budgets: &[Budget],
    total: usize,
    now: DateTime<Utc>,
) -> Result<usize, Error> {
    let mut allowed = usize::MAX;
    for budget in budgets {
        let parsed = ParsedBudget::parse(budget)?;
        if parsed.is_active(now) {
            allowed = allowed.min(parsed.limit.resolve(total));
        }
    }
    Ok(allowed)
}

/// Disruptions that may still start given how many are already in flight.
pub fn remaining(allowed: usize, disrupting: usize) -> usize {
    allowed.saturating_sub(disrupting)
}

/// Checks every budget of a pool, returning the first problem.
pub fn validate(budgets: &[Budget]) -> Result<(), Error> {
    budgets.iter().try_for_each(|b| ParsedBudget::parse(b).map(|_| ()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn scheduled(nodes: &str, schedule: &str, duration: &str) -> Budget {
        Budget {
            nodes: nodes.into(),
            schedule: Some(schedule.into()),
            duration: Some(duration.into()),
        }
    }

    #[test]
    fn test_no_budgets_is_unbounded() {
        assert_eq!(allowed_disruptions(&[], 10, Utc::now()).unwrap(), usize::MAX);
    }

    #[test]
    fn test_absolute_and_percentage() {
        let now = Utc::now();
        assert_eq!(allowed_disruptions(&[Budget::nodes("3")], 10, now).unwrap(), 3);
        assert_eq!(allowed_disruptions(&[Budget::nodes("50%")], 3, now).unwrap(), 2);
        assert_eq!(allowed_disruptions(&[Budget::nodes("10%")], 3, now).unwrap(), 1);
        assert_eq!(allowed_disruptions(&[Budget::nodes("0%")], 3, now).unwrap(), 0);
        assert_eq!(allowed_disruptions(&[Budget::nodes("100%")], 7, now).unwrap(), 7);
    }

    #[test]
    fn test_most_restrictive_active_budget_wins() {
        let now = Utc::now();
        let budgets = [Budget::nodes("5"), Budget::nodes("20%"), Budget::nodes("4")];
        assert_eq!(allowed_disruptions(&budgets, 10, now).unwrap(), 2);
    }

    #[test]
    fn test_zero_blocks_everything() {
        let budgets = [Budget::nodes("100%"), Budget::nodes("0")];
        assert_eq!(allowed_disruptions(&budgets, 10, Utc::now()).unwrap(), 0);
    }

    #[test]
    fn test_inactive_schedule_does_not_restrict() {
        // weekdays 09:00-17:00 UTC
        let budgets = [
            Budget::nodes("10"),
            scheduled("0", "0 9 * * 1-5", "8h"),
        ];

        // Monday 10:00
        assert_eq!(allowed_disruptions(&budgets, 10, at(2024, 1, 8, 10, 0, 0)).unwrap(), 0);
        // Monday 17:00 is the first instant past the window
        assert_eq!(allowed_disruptions(&budgets, 10, at(2024, 1, 8, 17, 0, 0)).unwrap(), 10);
        // Saturday 10:00
        assert_eq!(allowed_disruptions(&budgets, 10, at(2024, 1, 6, 10, 0, 0)).unwrap(), 10);
    }

    #[test]
    fn test_window_boundaries_flip_one_second_apart() {
        let budgets = [scheduled("0", "0 12 * * *", "1h")];

        assert_eq!(
            allowed_disruptions(&budgets, 5, at(2024, 3, 1, 11, 59, 59)).unwrap(),
            usize::MAX
        );
        assert_eq!(allowed_disruptions(&budgets, 5, at(2024, 3, 1, 12, 0, 0)).unwrap(), 0);
        assert_eq!(allowed_disruptions(&budgets, 5, at(2024, 3, 1, 12, 59, 59)).unwrap(), 0);
        assert_eq!(
            allowed_disruptions(&budgets, 5, at(2024, 3, 1, 13, 0, 0)).unwrap(),
            usize::MAX
        );
    }

    #[test]
    fn test_misconfigured_budgets_are_errors() {
        let now = Utc::now();
        for budget in [
            Budget::nodes("abc"),
            Budget::nodes("-1"),
            Budget::nodes("150%"),
            Budget {
                nodes: "1".into(),
                schedule: Some("@daily".into()),
                duration: None,
            },
            Budget {
                nodes: "1".into(),
                schedule: None,
                duration: Some("1h".into()),
            },
            scheduled("1", "not a cron", "1h"),
            scheduled("1", "@daily", "forever"),
            scheduled("0", "@daily", "100000years"),
        ] {
            assert!(
                allowed_disruptions(&[budget.clone()], 10, now).is_err(),
                "{budget:?}"
            );
            assert!(validate(&[budget]).is_err());
        }
    }

    #[test]
    fn test_remaining_never_negative() {
        assert_eq!(remaining(2, 0), 2);
        assert_eq!(remaining(2, 2), 0);
        assert_eq!(remaining(2, 5), 0);
        assert_eq!(remaining(usize::MAX, 3), usize::MAX - 3);
    }

    proptest! {
        #[test]
        fn prop_percentage_rounds_up(total in 0usize..10_000, percent in 0usize..=100) {
            let allowed = NodeLimit::Percent(percent).resolve(total);
            prop_assert!(allowed * 100 >= total * percent);
            prop_assert!(allowed <= total);
            if percent > 0 && total > 0 {
                prop_assert!(allowed >= 1);
            }
            prop_assert!(allowed == 0 || (allowed - 1) * 100 < total * percent);
        }

        #[test]
        fn prop_zero_always_blocks(total in 0usize..10_000, other in 0usize..=100) {
            let budgets = [Budget::nodes(&format!("{other}%")), Budget::nodes("0")];
            prop_assert_eq!(allowed_disruptions(&budgets, total, Utc::now()).unwrap(), 0);
        }

        #[test]
        fn prop_minimum_of_active_budgets(total in 0usize..1_000, a in 0usize..50, b in 0usize..50) {
            let budgets = [Budget::nodes(&a.to_string()), Budget::nodes(&b.to_string())];
            prop_assert_eq!(allowed_disruptions(&budgets, total, Utc::now()).unwrap(), a.min(b));
        }
    }
}
