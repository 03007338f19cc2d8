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

//! Budget schedule windows.
//!
//! Budgets use the five-field cron syntax (minute, hour, day of month, month, day of week)
//! evaluated in UTC. The `cron` crate wants a leading seconds field and numbers days of the
//! week from Sunday = 1, so expressions are translated before parsing.

use super::{
    DurationOutOfRangeSnafu, Error, InvalidDurationSnafu, InvalidScheduleSnafu, ScheduleFieldsSnafu,
};
use chrono::{DateTime, Duration, Utc};
use snafu::{OptionExt, ResultExt, ensure};
use std::collections::BTreeSet;
use std::str::FromStr;

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Longest window a budget may hold open, in days. Searching further back finds no schedule hit.
const MAX_WINDOW_DAYS: i64 = 366;

#[derive(Clone, Debug)]
pub struct Schedule {
    cron: cron::Schedule,
    duration: Duration,
}

impl Schedule {
    pub fn parse(schedule: &str, duration: &str) -> Result<Self, Error> {
        let expression = translate(schedule)?;
        let cron = cron::Schedule::from_str(&expression).context(InvalidScheduleSnafu { schedule })?;

        let std_duration =
            humantime::parse_duration(duration.trim()).context(InvalidDurationSnafu { duration })?;
        let window = Duration::from_std(std_duration)
            .ok()
            .filter(|window| *window <= Duration::days(MAX_WINDOW_DAYS))
            .context(DurationOutOfRangeSnafu { duration })?;

        Ok(Self {
            cron,
            duration: window,
        })
    }

    /// Active from each schedule hit until `duration` has elapsed, end exclusive.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        let window_start = now - self.duration;
        self.cron
            .after(&window_start)
            .next()
            .is_some_and(|hit| hit <= now)
    }
}

fn translate(schedule: &str) -> Result<String, Error> {
    let schedule = schedule.trim();
    let expanded = match schedule {
        "@yearly" | "@annually" => "0 0 1 1 *",
        "@monthly" => "0 0 1 * *",
        "@weekly" => "0 0 * * 0",
        "@daily" | "@midnight" => "0 0 * * *",
        "@hourly" => "0 * * * *",
        other => other,
    };

    let fields: Vec<&str> = expanded.split_whitespace().collect();
    ensure!(fields.len() == 5, ScheduleFieldsSnafu { schedule });

    Ok(format!(
        "0 {} {} {} {} {}",
        fields[0],
        fields[1],
        fields[2],
        fields[3],
        day_of_week(fields[4])
    ))
}

/// Rewrites numeric days (0-7, Sunday as 0 or 7) to names. Anything unrecognised is left for
/// the cron parser to reject.
fn day_of_week(field: &str) -> String {
    field
        .split(',')
        .map(|item| {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (item, None),
            };
            // stepped numeric ranges are spelled out day by day
            if let (Some((from, to)), Some(step)) = (range.split_once('-'), step)
                && let (Some(from), Some(to), Ok(step)) =
                    (day_number(from), day_number(to), step.parse::<usize>())
                && step > 0
                && from <= to
            {
                let days: BTreeSet<usize> = (from..=to).step_by(step).map(|day| day % 7).collect();
                return days
                    .into_iter()
                    .map(|day| DAY_NAMES[day])
                    .collect::<Vec<_>>()
                    .join(",");
            }
            let range = match range.split_once('-') {
                Some((from, to)) => match (day_number(from), day_number(to)) {
                    (Some(0), Some(to)) if to >= 6 => "*".to_owned(),
                    (Some(from), Some(7)) if from > 0 => format!("{}-Sat,Sun", DAY_NAMES[from]),
                    (Some(from), Some(to)) => format!("{}-{}", DAY_NAMES[from], DAY_NAMES[to % 7]),
                    _ => range.to_owned(),
                },
                None => match day_number(range) {
                    Some(day) => DAY_NAMES[day % 7].to_owned(),
                    None => range.to_owned(),
                },
            };
            match step {
                Some(step) => format!("{range}/{step}"),
                None => range,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn day_number(token: &str) -> Option<usize> {
    token.parse::<usize>().ok().filter(|day| *day <= 7)
}
