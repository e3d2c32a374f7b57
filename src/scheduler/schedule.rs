//! Five-field cron expressions evaluated in UTC.
//!
//! The `cron` crate expects a leading seconds field, numbers Sunday as 1 and
//! requires day-of-month and day-of-week to match together. Expressions are
//! accepted in the standard `minute hour day-of-month month day-of-week` form
//! and translated before parsing: weekdays are expanded to a list of names,
//! and when both day fields are restricted a day matching either one fires.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::SchedulerError;

const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// A validated cron schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    /// One schedule, or two when day-of-month and day-of-week are both
    /// restricted. The next fire time is the earliest across them.
    schedules: Vec<cron::Schedule>,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, SchedulerError> {
        let invalid = |reason: String| SchedulerError::InvalidSchedule {
            expression: expression.to_string(),
            reason,
        };

        let fields: Vec<&str> = expression.split_whitespace().collect();
        let [minute, hour, day_of_month, month, day_of_week] = fields[..] else {
            return Err(invalid(format!(
                "expected 5 fields (minute hour day-of-month month day-of-week), got {}",
                fields.len()
            )));
        };

        let weekdays = translate_weekdays(day_of_week).map_err(invalid)?;
        let build = |dom: &str, dow: &str| {
            let translated = format!("0 {minute} {hour} {dom} {month} {dow}");
            cron::Schedule::from_str(&translated).map_err(|e| invalid(e.to_string()))
        };

        let schedules = if day_of_month.starts_with('*') || day_of_week.starts_with('*') {
            vec![build(day_of_month, &weekdays)?]
        } else {
            vec![build(day_of_month, "*")?, build("*", &weekdays)?]
        };

        Ok(Self {
            expression: expression.to_string(),
            schedules,
        })
    }

    /// The expression exactly as registered.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(after).next())
            .min()
    }

    /// Next fire time from now.
    pub fn upcoming(&self) -> Option<DateTime<Utc>> {
        self.next_after(&Utc::now())
    }
}

/// Expand a day-of-week field (0-7 or names, Sunday = 0 or 7) into a
/// comma-separated list of day names. `*` alone stays `*`.
fn translate_weekdays(field: &str) -> Result<String, String> {
    if field == "*" {
        return Ok(field.to_string());
    }

    let mut days = BTreeSet::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step = step
                    .parse::<usize>()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| format!("invalid day-of-week step '{step}'"))?;
                (range, step)
            }
            None => (item, 1),
        };

        let (first, last) = match range {
            "*" => (0, 6),
            _ => match range.split_once('-') {
                Some((from, to)) => (weekday(from, false)?, weekday(to, true)?),
                None => {
                    let day = weekday(range, false)?;
                    // `5/2` means 5 through the end of the week.
                    (day, if step > 1 { day.max(6) } else { day })
                }
            },
        };
        if first > last {
            return Err(format!("day-of-week range '{range}' runs backwards"));
        }
        days.extend((first..=last).step_by(step).map(|day| day % 7));
    }

    Ok(days
        .into_iter()
        .map(|day| WEEKDAYS[day])
        .collect::<Vec<_>>()
        .join(","))
}

/// Parse one weekday as 0-7. A trailing `SUN` in a range counts as 7.
fn weekday(value: &str, range_end: bool) -> Result<usize, String> {
    if let Ok(n) = value.parse::<usize>() {
        return match n {
            0..=7 => Ok(n),
            _ => Err(format!("day-of-week {n} is out of range 0-7")),
        };
    }
    let upper = value.to_ascii_uppercase();
    let short = upper.get(..3).unwrap_or(&upper);
    match WEEKDAYS.iter().position(|name| *name == short) {
        Some(0) if range_end => Ok(7),
        Some(day) => Ok(day),
        None => Err(format!("unknown day-of-week '{value}'")),
    }
}
