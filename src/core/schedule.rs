//! Schedule parsing and next occurrence calculation.
//!
//! Supports the crontab macros (`@reboot`, `@daily`, ...), standard 5-field
//! cron and extended 6-field cron (seconds first). Every field is checked
//! against the grammar for its position before the expression is handed to
//! the `cron` crate, so rejections can name the offending field.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::collections::BTreeSet;
use std::str::FromStr;
use thiserror::Error;

/// Named macros understood by the host scheduler.
pub const MACROS: [&str; 8] = [
    "@reboot",
    "@yearly",
    "@annually",
    "@monthly",
    "@weekly",
    "@daily",
    "@midnight",
    "@hourly",
];

/// Errors that can occur when parsing or using schedules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// Empty expression.
    #[error("schedule is empty")]
    Empty,

    /// Expression spans more than one line.
    #[error("schedule must be a single line")]
    MultiLine,

    /// `@` expression that is not one of [`MACROS`].
    #[error("unknown schedule macro: {0}")]
    UnknownMacro(String),

    /// Wrong number of fields.
    #[error("expected 5 or 6 fields, got {0}")]
    FieldCount(usize),

    /// A field does not match the wildcard/range/step/list grammar.
    #[error("schedule field {index} ({field}) is malformed: {token}")]
    MalformedField {
        index: usize,
        field: &'static str,
        token: String,
    },

    /// A field value lies outside the range allowed for its position.
    #[error("schedule field {index} out of range: {value} ({field} allows {min}-{max})")]
    OutOfRange {
        index: usize,
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    /// The `cron` crate refused the normalized expression.
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    /// Invalid timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// No more occurrences.
    #[error("no more occurrences")]
    NoMoreOccurrences,
}

/// Grammar of one positional cron field.
#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    /// Symbolic names; `names[i]` stands for `min_name + i`.
    names: &'static [&'static str],
    min_name: u32,
}

const SECOND: FieldSpec = FieldSpec {
    name: "second",
    min: 0,
    max: 59,
    names: &[],
    min_name: 0,
};

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
    min_name: 0,
};

const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
    min_name: 0,
};

const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
    min_name: 0,
};

const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &[
        "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
    ],
    min_name: 1,
};

// 7 is an alias for Sunday, as in crontab(5).
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"],
    min_name: 0,
};

const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// One parsed field: `None` for an unrestricted wildcard.
#[derive(Debug, Clone)]
struct Field {
    values: Option<BTreeSet<u32>>,
}

impl Field {
    fn is_wildcard(&self) -> bool {
        self.values.is_none()
    }

    fn render(&self) -> String {
        match &self.values {
            None => "*".to_string(),
            Some(values) => join(values.iter().map(u32::to_string)),
        }
    }

    fn render_weekdays(&self) -> String {
        match &self.values {
            None => "*".to_string(),
            Some(values) => {
                let days: BTreeSet<u32> = values.iter().map(|v| v % 7).collect();
                join(days.iter().map(|d| WEEKDAY_NAMES[*d as usize].to_string()))
            }
        }
    }
}

fn join(items: impl Iterator<Item = String>) -> String {
    items.collect::<Vec<_>>().join(",")
}

#[derive(Debug, Clone)]
enum ScheduleKind {
    /// Runs once when the host scheduler starts.
    Reboot,
    /// Time-based schedule. Two entries when both day fields are restricted,
    /// since crontab fires when either day field matches.
    Cron(Vec<CronSchedule>),
}

/// A parsed schedule for a job.
#[derive(Debug, Clone)]
pub struct Schedule {
    /// The original expression string.
    expression: String,
    /// The timezone used for occurrence calculation.
    timezone: String,
    kind: ScheduleKind,
}

impl Schedule {
    /// Parse a schedule expression.
    ///
    /// Supports:
    /// - Macros: `@reboot`, `@yearly`, `@annually`, `@monthly`, `@weekly`,
    ///   `@daily`, `@midnight`, `@hourly`
    /// - Standard 5-field cron: `minute hour day month weekday`
    /// - Extended 6-field cron: `second minute hour day month weekday`
    pub fn new(expression: impl Into<String>) -> Result<Self, ScheduleError> {
        Self::with_timezone(expression, "UTC")
    }

    /// Parse a schedule evaluated in a specific timezone.
    pub fn with_timezone(
        expression: impl Into<String>,
        timezone: impl Into<String>,
    ) -> Result<Self, ScheduleError> {
        let expression = expression.into();
        let timezone = timezone.into();

        timezone
            .parse::<Tz>()
            .map_err(|_| ScheduleError::InvalidTimezone(timezone.clone()))?;

        let kind = Self::parse_expression(&expression)?;

        Ok(Self {
            expression,
            timezone,
            kind,
        })
    }

    fn parse_expression(expression: &str) -> Result<ScheduleKind, ScheduleError> {
        if expression.contains(['\n', '\r']) {
            return Err(ScheduleError::MultiLine);
        }

        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(ScheduleError::Empty);
        }

        if trimmed.starts_with('@') {
            return Self::parse_macro(trimmed);
        }

        Self::parse_cron(trimmed)
    }

    fn parse_macro(expression: &str) -> Result<ScheduleKind, ScheduleError> {
        match expression {
            "@reboot" => Ok(ScheduleKind::Reboot),
            "@yearly" | "@annually" => Self::parse_cron("0 0 1 1 *"),
            "@monthly" => Self::parse_cron("0 0 1 * *"),
            "@weekly" => Self::parse_cron("0 0 * * 0"),
            "@daily" | "@midnight" => Self::parse_cron("0 0 * * *"),
            "@hourly" => Self::parse_cron("0 * * * *"),
            _ => Err(ScheduleError::UnknownMacro(expression.to_string())),
        }
    }

    fn parse_cron(expression: &str) -> Result<ScheduleKind, ScheduleError> {
        let tokens: Vec<&str> = expression.split_whitespace().collect();

        let specs: &[FieldSpec] = match tokens.len() {
            5 => &[MINUTE, HOUR, DAY_OF_MONTH, MONTH, DAY_OF_WEEK],
            6 => &[SECOND, MINUTE, HOUR, DAY_OF_MONTH, MONTH, DAY_OF_WEEK],
            n => return Err(ScheduleError::FieldCount(n)),
        };

        let mut fields = Vec::with_capacity(tokens.len());
        for (i, (token, spec)) in tokens.iter().zip(specs).enumerate() {
            fields.push(parse_field(token, spec, i + 1)?);
        }

        // Normalize to the cron crate's seconds-first layout.
        if fields.len() == 5 {
            fields.insert(
                0,
                Field {
                    values: Some(BTreeSet::from([0])),
                },
            );
        }

        let [sec, min, hour, dom, month, dow] = <[Field; 6]>::try_from(fields)
            .map_err(|_| ScheduleError::InvalidCron(expression.to_string()))?;

        let prefix = format!(
            "{} {} {}",
            sec.render(),
            min.render(),
            hour.render()
        );
        let month = month.render();

        let mut variants = Vec::new();
        if !dom.is_wildcard() && !dow.is_wildcard() {
            variants.push(format!("{} {} {} *", prefix, dom.render(), month));
            variants.push(format!("{} * {} {}", prefix, month, dow.render_weekdays()));
        } else {
            variants.push(format!(
                "{} {} {} {}",
                prefix,
                dom.render(),
                month,
                dow.render_weekdays()
            ));
        }

        let schedules = variants
            .iter()
            .map(|expr| {
                CronSchedule::from_str(expr).map_err(|e| ScheduleError::InvalidCron(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ScheduleKind::Cron(schedules))
    }

    /// Get the next occurrence after the given time.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        self.next_n_after(after, 1)?
            .into_iter()
            .next()
            .ok_or(ScheduleError::NoMoreOccurrences)
    }

    /// Get the next occurrence from now.
    pub fn next(&self) -> Result<DateTime<Utc>, ScheduleError> {
        self.next_after(Utc::now())
    }

    /// Get the next N occurrences after the given time.
    pub fn next_n_after(
        &self,
        after: DateTime<Utc>,
        n: usize,
    ) -> Result<Vec<DateTime<Utc>>, ScheduleError> {
        let tz: Tz = self
            .timezone
            .parse()
            .map_err(|_| ScheduleError::InvalidTimezone(self.timezone.clone()))?;

        match &self.kind {
            ScheduleKind::Reboot => Ok(Vec::new()),
            ScheduleKind::Cron(schedules) => {
                let local_time = after.with_timezone(&tz);
                let mut merged: BTreeSet<DateTime<Utc>> = BTreeSet::new();
                for schedule in schedules {
                    merged.extend(
                        schedule
                            .after(&local_time)
                            .take(n)
                            .map(|dt| dt.with_timezone(&Utc)),
                    );
                }
                Ok(merged.into_iter().take(n).collect())
            }
        }
    }

    /// Get the next N occurrences from now.
    pub fn next_n(&self, n: usize) -> Result<Vec<DateTime<Utc>>, ScheduleError> {
        self.next_n_after(Utc::now(), n)
    }

    /// Whether this is the `@reboot` macro, which has no time-based occurrences.
    pub fn is_reboot(&self) -> bool {
        matches!(self.kind, ScheduleKind::Reboot)
    }

    /// Get the original expression string.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Get the timezone.
    pub fn timezone(&self) -> &str {
        &self.timezone
    }
}

/// Check a single token against the grammar for a field without building a
/// schedule. Used by the crontab importer to tell 5- and 6-field lines apart.
pub(crate) fn is_field_token(token: &str, position: usize) -> bool {
    let spec = match position {
        0 => MINUTE,
        1 => HOUR,
        2 => DAY_OF_MONTH,
        3 => MONTH,
        4 => DAY_OF_WEEK,
        _ => return false,
    };
    parse_field(token, &spec, position + 1).is_ok()
}

fn parse_field(token: &str, spec: &FieldSpec, index: usize) -> Result<Field, ScheduleError> {
    let malformed = || ScheduleError::MalformedField {
        index,
        field: spec.name,
        token: token.to_string(),
    };

    if token == "*" {
        return Ok(Field { values: None });
    }

    let mut values = BTreeSet::new();
    for item in token.split(',') {
        if item.is_empty() {
            return Err(malformed());
        }

        let (base, step) = match item.split_once('/') {
            Some((base, step)) => {
                let step: u32 = step.parse().map_err(|_| malformed())?;
                if step == 0 || step > spec.max {
                    return Err(malformed());
                }
                (base, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = if base == "*" {
            (spec.min, spec.max)
        } else if let Some((a, b)) = base.split_once('-') {
            let a = parse_value(a, spec, index, token)?;
            let b = parse_value(b, spec, index, token)?;
            if a > b {
                return Err(malformed());
            }
            (a, b)
        } else {
            let a = parse_value(base, spec, index, token)?;
            // `5/15` means "from 5 to the end of the range, every 15".
            (a, if step.is_some() { spec.max } else { a })
        };

        values.extend((start..=end).step_by(step.unwrap_or(1) as usize));
    }

    Ok(Field {
        values: Some(values),
    })
}

fn parse_value(raw: &str, spec: &FieldSpec, index: usize, token: &str) -> Result<u32, ScheduleError> {
    if let Some(pos) = spec
        .names
        .iter()
        .position(|name| name.eq_ignore_ascii_case(raw))
    {
        return Ok(spec.min_name + pos as u32);
    }

    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return Err(ScheduleError::MalformedField {
            index,
            field: spec.name,
            token: token.to_string(),
        });
    }

    let value: u32 = raw.parse().map_err(|_| ScheduleError::OutOfRange {
        index,
        field: spec.name,
        value: u32::MAX,
        min: spec.min,
        max: spec.max,
    })?;

    if value < spec.min || value > spec.max {
        return Err(ScheduleError::OutOfRange {
            index,
            field: spec.name,
            value,
            min: spec.min,
            max: spec.max,
        });
    }

    Ok(value)
}
