//! Cron schedule handling for recurring alarms.
//!
//! Alarm clocks carry standard 5-field cron expressions
//! (`minute hour day-of-month month day-of-week`, day-of-week `0` = Sunday).
//! The `cron` crate wants a leading seconds field and 1-based day-of-week
//! ordinals, so expressions are translated before parsing.  All computation is
//! in UTC and `next_occurrence` is strictly greater than its `from` argument.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::lucia::alarm::AlarmClock;

/// Translate a standard 5-field expression into the crate's 6-field form.
///
/// Returns `None` for anything that is not five whitespace-separated fields.
/// Day-of-week numbers are shifted from the standard `0-6` (Sunday-first) to
/// the crate's `1-7`; the non-standard `7` alias for Sunday maps to `1`.
fn to_crate_expression(expression: &str) -> Option<String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return None;
    }
    let dow = shift_day_of_week(fields[4])?;
    Some(format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], dow
    ))
}

/// Shift every numeric day-of-week value in a field up by one.
///
/// Handles lists, ranges, steps, and `*`; named days pass through untouched.
fn shift_day_of_week(field: &str) -> Option<String> {
    fn shift_value(value: &str) -> Option<String> {
        if value == "*" {
            return Some(value.to_string());
        }
        match value.parse::<u8>() {
            Ok(n) if n <= 6 => Some((n + 1).to_string()),
            Ok(7) => Some("1".to_string()),
            Ok(_) => None,
            // Named days (MON, tue, ...) are already 1-based in the crate.
            Err(_) => Some(value.to_string()),
        }
    }

    fn shift_range(range: &str) -> Option<String> {
        let mut bounds = range.splitn(2, '-');
        let low = shift_value(bounds.next()?)?;
        match bounds.next() {
            Some(high) => Some(format!("{}-{}", low, shift_value(high)?)),
            None => Some(low),
        }
    }

    let mut parts = Vec::new();
    for part in field.split(',') {
        let mut step_split = part.splitn(2, '/');
        let base = step_split.next()?;
        let shifted = shift_range(base)?;
        match step_split.next() {
            Some(step) => parts.push(format!("{}/{}", shifted, step)),
            None => parts.push(shifted),
        }
    }
    Some(parts.join(","))
}

fn parse(expression: &str) -> Option<Schedule> {
    let translated = to_crate_expression(expression)?;
    Schedule::from_str(&translated).ok()
}

/// Whether `expression` is a valid standard 5-field cron expression.
pub fn is_valid(expression: &str) -> bool {
    parse(expression).is_some()
}

/// The first occurrence strictly after `from` (default: now), in UTC.
pub fn next_occurrence(expression: &str, from: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    let schedule = parse(expression)?;
    let from = from.unwrap_or_else(Utc::now);
    schedule.after(&from).next()
}

/// Advance a fired alarm clock to its next occurrence.
///
/// One-shot clocks (no cron) clear `next_fire_at` and disable themselves;
/// recurring clocks derive the next fire time from the schedule.  Returns
/// whether the clock remains active.
pub fn advance_schedule(clock: &mut AlarmClock) -> bool {
    match &clock.cron_schedule {
        None => {
            clock.next_fire_at = None;
            clock.is_enabled = false;
            false
        }
        Some(expression) => match next_occurrence(expression, None) {
            Some(next) => {
                clock.next_fire_at = Some(next);
                true
            }
            None => {
                clock.next_fire_at = None;
                clock.is_enabled = false;
                false
            }
        },
    }
}

/// Set `next_fire_at` from the cron schedule when it is unset.  Idempotent;
/// one-shot clocks and already-initialised clocks are left alone.
pub fn initialize_next_fire_at(clock: &mut AlarmClock) {
    if clock.next_fire_at.is_some() {
        return;
    }
    if let Some(expression) = &clock.cron_schedule {
        clock.next_fire_at = next_occurrence(expression, None);
    }
}

/// Render a human description for the common shapes, falling back to the raw
/// expression: `"Daily at 07:00"`, `"Weekdays at 07:00"`, `"Weekends at 07:00"`.
pub fn describe(expression: &str) -> String {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() == 5 && fields[2] == "*" && fields[3] == "*" {
        let time = fields[0]
            .parse::<u32>()
            .ok()
            .filter(|m| *m < 60)
            .and_then(|minute| {
                fields[1]
                    .parse::<u32>()
                    .ok()
                    .filter(|h| *h < 24)
                    .map(|hour| format!("{:02}:{:02}", hour, minute))
            });
        if let Some(time) = time {
            match fields[4] {
                "*" => return format!("Daily at {}", time),
                "1-5" => return format!("Weekdays at {}", time),
                "0,6" | "6,0" => return format!("Weekends at {}", time),
                _ => {}
            }
        }
    }
    expression.to_string()
}
