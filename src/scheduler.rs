//! # Scheduler
//!
//! Parses the sync frequency descriptor and drives cycles on that cadence.
//!
//! Supported descriptors:
//!
//! - `@every <duration>`: fixed interval, e.g. `@every 30s`, `@every 1h30m`,
//!   `@every 00h02m00s`
//! - `@yearly`, `@annually`, `@monthly`, `@weekly`, `@daily`, `@midnight`,
//!   `@hourly`
//! - 5-field cron (`*/5 * * * 1-5`), run at second 0. Numeric days of the
//!   week use the standard numbering (0 or 7 is Sunday, 1 is Monday).
//! - 6 or 7-field cron with a leading seconds field (`0 */5 * * * *`),
//!   passed through as-is
//!
//! Cron expressions are evaluated in UTC by the `cron` crate. In 6 and
//! 7-field expressions it numbers days of the week 1-7 starting on Sunday;
//! prefer day names (`Mon-Fri`) there.

use crate::constants::SCHEDULE_EXHAUSTED_RETRY_SECS;
use crate::job::VaultCredSync;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::future::Future;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

static INTERVAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\d+(?:ms|[smhd]))+$")
        .expect("Failed to compile INTERVAL_PATTERN - this should never happen")
});

static INTERVAL_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<number>\d+)(?P<unit>ms|[smhd])")
        .expect("Failed to compile INTERVAL_PART - this should never happen")
});

/// A parsed frequency descriptor
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Fire a fixed interval after the previous cycle finished
    Every(Duration),
    /// Fire on cron boundaries
    Cron(Box<cron::Schedule>),
}

impl FromStr for Schedule {
    type Err = anyhow::Error;

    fn from_str(descriptor: &str) -> Result<Self> {
        let descriptor = descriptor.trim();
        if descriptor.is_empty() {
            return Err(anyhow::anyhow!("Schedule descriptor cannot be empty"));
        }

        if let Some(interval) = descriptor.strip_prefix("@every") {
            return parse_interval(interval.trim()).map(Schedule::Every);
        }

        let expression = match descriptor.to_lowercase().as_str() {
            "@yearly" | "@annually" => "0 0 0 1 1 *".to_string(),
            "@monthly" => "0 0 0 1 * *".to_string(),
            "@weekly" => "0 0 0 * * Sun".to_string(),
            "@daily" | "@midnight" => "0 0 0 * * *".to_string(),
            "@hourly" => "0 0 * * * *".to_string(),
            _ if descriptor.starts_with('@') => {
                return Err(anyhow::anyhow!("Unknown schedule shortcut '{descriptor}'"));
            }
            _ => match descriptor.split_whitespace().count() {
                5 => standard_cron_to_seconds(descriptor)?,
                6 | 7 => descriptor.to_string(),
                fields => {
                    return Err(anyhow::anyhow!(
                        "Cron expression '{descriptor}' has {fields} fields, expected 5, 6 or 7"
                    ));
                }
            },
        };

        let schedule = cron::Schedule::from_str(&expression)
            .with_context(|| format!("Invalid cron expression '{descriptor}'"))?;
        Ok(Schedule::Cron(Box::new(schedule)))
    }
}

impl Schedule {
    /// Next fire time strictly after `now`, or `None` if the schedule is exhausted
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Every(interval) => {
                let interval = chrono::Duration::from_std(*interval).ok()?;
                now.checked_add_signed(interval)
            }
            Schedule::Cron(schedule) => schedule.after(&now).next(),
        }
    }

    /// The next `count` fire times after `now`
    pub fn upcoming(&self, now: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = now;
        while times.len() < count {
            match self.next_after(cursor) {
                Some(next) => {
                    times.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        times
    }
}

/// Parse an `@every` interval such as `30s`, `2m`, `1h30m` or `00h02m00s`
fn parse_interval(interval: &str) -> Result<Duration> {
    let interval_lower = interval.to_lowercase();

    if !INTERVAL_PATTERN.is_match(&interval_lower) {
        return Err(anyhow::anyhow!(
            "Invalid interval '{interval}'. Expected <number><unit> groups (e.g. '30s', '2m', '1h30m')"
        ));
    }

    let mut total = Duration::ZERO;
    for captures in INTERVAL_PART.captures_iter(&interval_lower) {
        let number: u64 = captures["number"]
            .parse()
            .with_context(|| format!("Invalid number in interval '{interval}'"))?;
        let unit = match &captures["unit"] {
            "ms" => Duration::from_millis(number),
            "s" => Duration::from_secs(number),
            "m" => Duration::from_secs(number.saturating_mul(60)),
            "h" => Duration::from_secs(number.saturating_mul(3600)),
            "d" => Duration::from_secs(number.saturating_mul(86_400)),
            other => {
                return Err(anyhow::anyhow!("Invalid unit '{other}' in interval '{interval}'"));
            }
        };
        total = total.saturating_add(unit);
    }

    if total.is_zero() {
        return Err(anyhow::anyhow!(
            "Interval must be greater than 0, got '{interval}'"
        ));
    }

    Ok(total)
}

/// Rewrite a standard 5-field expression into the `cron` crate's 6-field form.
///
/// Prepends a zero seconds field and shifts numeric days of the week from
/// 0-7 (0 and 7 are Sunday) to the crate's 1-7 (1 is Sunday).
fn standard_cron_to_seconds(expression: &str) -> Result<String> {
    let mut fields: Vec<String> = expression.split_whitespace().map(str::to_string).collect();
    if let Some(day_of_week) = fields.last_mut() {
        *day_of_week = translate_day_of_week(day_of_week)
            .with_context(|| format!("Invalid day of week in cron expression '{expression}'"))?;
    }
    Ok(format!("0 {}", fields.join(" ")))
}

fn translate_day_of_week(field: &str) -> Result<String> {
    let mut translated = Vec::new();

    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => (base, Some(step)),
            None => (item, None),
        };
        let step_suffix = step.map(|s| format!("/{s}")).unwrap_or_default();

        if base == "*" || base == "?" {
            translated.push(item.to_string());
            continue;
        }

        match base.split_once('-') {
            Some((start, end)) => {
                // 7 closes a range on Sunday, which wraps in the 1-7 numbering
                if end == "7" && start != "0" {
                    if step.is_some() {
                        return Err(anyhow::anyhow!(
                            "Stepped ranges ending in 7 are not supported ('{item}')"
                        ));
                    }
                    translated.push(format!("{}-7,1", shift_day(start)?));
                } else {
                    let end = if end == "7" { "7".to_string() } else { shift_day(end)? };
                    translated.push(format!("{}-{end}{step_suffix}", shift_day(start)?));
                }
            }
            None => translated.push(format!("{}{step_suffix}", shift_day(base)?)),
        }
    }

    Ok(translated.join(","))
}

/// Shift a numeric day (0-7) by one; day names pass through unchanged
fn shift_day(day: &str) -> Result<String> {
    if !day.bytes().all(|b| b.is_ascii_digit()) || day.is_empty() {
        return Ok(day.to_string());
    }
    match day.parse::<u8>() {
        Ok(0 | 7) => Ok("1".to_string()),
        Ok(n @ 1..=6) => Ok((n + 1).to_string()),
        _ => Err(anyhow::anyhow!("Day of week '{day}' is out of range 0-7")),
    }
}

/// Run sync cycles on `schedule` until `shutdown` resolves.
///
/// Cycles are awaited inline, so a slow cycle delays the next fire time
/// instead of overlapping with it.
pub async fn run<S>(job: &mut VaultCredSync, schedule: &Schedule, shutdown: S)
where
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    info!(frequency = %job.cron_spec(), "Starting vault credential sync scheduler");

    loop {
        let now = Utc::now();
        let wait = match schedule.next_after(now) {
            Some(next) => {
                debug!("Next vault credential sync at {}", next.to_rfc3339());
                (next - now).to_std().unwrap_or(Duration::ZERO)
            }
            None => {
                warn!(
                    "Schedule '{}' has no upcoming fire time, re-checking in {}s",
                    job.cron_spec(),
                    SCHEDULE_EXHAUSTED_RETRY_SECS
                );
                tokio::select! {
                    () = &mut shutdown => break,
                    () = tokio::time::sleep(Duration::from_secs(SCHEDULE_EXHAUSTED_RETRY_SECS)) => continue,
                }
            }
        };

        tokio::select! {
            () = &mut shutdown => break,
            () = tokio::time::sleep(wait) => {
                job.run_cycle().await;
            }
        }
    }

    info!("Vault credential sync scheduler stopped");
}
