// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Schedule expression evaluation.
//!
//! `once` fires when now reaches the timestamp and then disables the
//! task. `cron` is a 5-field expression evaluated in the task's IANA
//! timezone. `rrule` is an iCalendar RRULE body, normalized at task
//! creation to carry a `DTSTART;TZID=<tz>:` anchor when one is absent.
//!
//! After an occurrence, cron and rrule advance from the *current wall
//! time*, never from the fired instant; a task that was down for hours
//! gets one future `next_run_at`, not a back-fill storm.

use baton_core::Schedule;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use rrule::RRuleSet;
use std::str::FromStr;

use crate::error::EngineError;

/// Parse an IANA timezone name.
pub fn validate_timezone(timezone: &str) -> Result<Tz, EngineError> {
    timezone
        .parse::<Tz>()
        .map_err(|_| EngineError::Validation(format!("invalid timezone '{timezone}'")))
}

/// Validate a schedule expression (timezone-aware). Rrule expressions
/// must already be normalized via [`normalize_rrule`].
pub fn validate_schedule(schedule: &Schedule, timezone: &str) -> Result<(), EngineError> {
    validate_timezone(timezone)?;
    match schedule {
        Schedule::Once { .. } => Ok(()),
        Schedule::Cron { expr } => parse_cron(expr).map(|_| ()),
        Schedule::Rrule { expr } => parse_rrule(expr).map(|_| ()),
    }
}

/// The first `next_run_at` for a newly created (or re-enabled) task.
pub fn initial_next_run(
    schedule: &Schedule,
    timezone: &str,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, EngineError> {
    match schedule {
        Schedule::Once { at } => Ok(Some(*at)),
        Schedule::Cron { expr } => next_cron_after(expr, timezone, now),
        Schedule::Rrule { expr } => next_rrule_after(expr, now),
    }
}

/// The task's state after an occurrence fired: `(enabled, next_run_at)`.
///
/// `now` must be the current wall time, not the occurrence's
/// `scheduled_for`.
pub fn next_run_after_occurrence(
    schedule: &Schedule,
    timezone: &str,
    now: DateTime<Utc>,
) -> Result<(bool, Option<DateTime<Utc>>), EngineError> {
    match schedule {
        Schedule::Once { .. } => Ok((false, None)),
        Schedule::Cron { expr } => {
            let next = next_cron_after(expr, timezone, now)?;
            Ok((true, next))
        }
        Schedule::Rrule { expr } => match next_rrule_after(expr, now)? {
            Some(next) => Ok((true, Some(next))),
            // Expression exhausted (COUNT/UNTIL reached)
            None => Ok((false, None)),
        },
    }
}

fn parse_cron(expr: &str) -> Result<cron::Schedule, EngineError> {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() != 5 {
        return Err(EngineError::Validation(format!(
            "cron expression '{trimmed}' must have 5 fields"
        )));
    }
    // The cron crate wants a seconds field; pin it to zero.
    cron::Schedule::from_str(&format!("0 {trimmed}"))
        .map_err(|e| EngineError::Validation(format!("invalid cron expression '{trimmed}': {e}")))
}

/// Next cron firing strictly after `after`, in UTC.
pub fn next_cron_after(
    expr: &str,
    timezone: &str,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, EngineError> {
    let tz = validate_timezone(timezone)?;
    let schedule = parse_cron(expr)?;
    let local = after.with_timezone(&tz);
    Ok(schedule
        .after(&local)
        .next()
        .map(|next| next.with_timezone(&Utc)))
}

/// Normalize an RRULE body: prefix the rule line with `RRULE:` when bare
/// and inject a `DTSTART;TZID=<timezone>:<anchor>` line when absent.
pub fn normalize_rrule(
    expr: &str,
    timezone: &str,
    anchor: DateTime<Utc>,
) -> Result<String, EngineError> {
    let tz = validate_timezone(timezone)?;

    let mut lines: Vec<String> = expr
        .trim()
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .map(|line| {
            let upper = line.to_ascii_uppercase();
            if upper.starts_with("FREQ=") {
                format!("RRULE:{line}")
            } else {
                line
            }
        })
        .collect();

    let has_dtstart = lines
        .iter()
        .any(|line| line.to_ascii_uppercase().starts_with("DTSTART"));
    if !has_dtstart {
        let local = anchor.with_timezone(&tz);
        lines.insert(
            0,
            format!("DTSTART;TZID={}:{}", timezone, local.format("%Y%m%dT%H%M%S")),
        );
    }

    let normalized = lines.join("\n");
    parse_rrule(&normalized)?;
    Ok(normalized)
}

fn parse_rrule(expr: &str) -> Result<RRuleSet, EngineError> {
    expr.parse::<RRuleSet>()
        .map_err(|e| EngineError::Validation(format!("invalid rrule expression: {e}")))
}

/// Next rrule occurrence strictly after `after`, in UTC.
pub fn next_rrule_after(
    expr: &str,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, EngineError> {
    let set = parse_rrule(expr)?;
    // `after` is an inclusive bound in the rrule crate; shift by a second
    // for strictly-after semantics.
    let bound = (after + ChronoDuration::seconds(1)).with_timezone(&rrule::Tz::UTC);
    let result = set.after(bound).all(1);
    Ok(result
        .dates
        .first()
        .map(|date| date.with_timezone(&Utc)))
}

#[cfg(test)]
#[path = "schedule_tests.rs"]
mod tests;
