//! Scheduled jobs
//!
//! A job is one crontab line: a cron expression plus the command it runs.
//! crondog never runs the command. It only reads two things out of it:
//! - the service name, from a `--name <token>` argument
//! - the role, from whether the text mentions `start` or `stop`

use std::fmt;
use std::sync::OnceLock;

use chrono::NaiveDateTime;
use regex::Regex;
use serde::Serialize;

use crate::error::{EvaluationError, ParseError};
use crate::parser::CronExpression;

fn service_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"--name\s+(\w+)").unwrap())
}

/// Extract the service name from a `--name <token>` argument
pub fn extract_service_name(command: &str) -> Option<String> {
    service_name_regex()
        .captures(command)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// What a job does to its service, judged from the command text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobRole {
    Start,
    Stop,
    /// Mentions both `start` and `stop`
    Ambiguous,
    /// Mentions neither
    Unclassified,
}

impl JobRole {
    pub fn classify(command: &str) -> Self {
        match (command.contains("start"), command.contains("stop")) {
            (true, false) => JobRole::Start,
            (false, true) => JobRole::Stop,
            (true, true) => JobRole::Ambiguous,
            (false, false) => JobRole::Unclassified,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobRole::Start => "start",
            JobRole::Stop => "stop",
            JobRole::Ambiguous => "ambiguous",
            JobRole::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for JobRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One crontab entry. Read-only after load.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    expression: CronExpression,
    command: String,
    name: Option<String>,
    role: JobRole,
}

impl ScheduledJob {
    pub fn new(expression: CronExpression, command: impl Into<String>) -> Self {
        let command = command.into();
        Self {
            name: extract_service_name(&command),
            role: JobRole::classify(&command),
            expression,
            command,
        }
    }

    /// Build a job from an `(expression, command)` pair
    pub fn parse(expression: &str, command: &str) -> Result<Self, ParseError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }
        Ok(Self::new(CronExpression::parse(expression)?, command))
    }

    /// Parse a crontab line of the form `<5 cron fields> <command>` or
    /// `@macro <command>`
    pub fn from_line(line: &str) -> Result<Self, ParseError> {
        let (expression, command) = split_line(line)?;
        Self::parse(&expression, command)
    }

    pub fn expression(&self) -> &CronExpression {
        &self.expression
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Service this job belongs to; `None` leaves the job ungrouped
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn role(&self) -> JobRole {
        self.role
    }

    pub fn next_occurrence(
        &self,
        reference: NaiveDateTime,
    ) -> Result<NaiveDateTime, EvaluationError> {
        self.expression.next_occurrence(reference)
    }
}

impl fmt::Display for ScheduledJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.expression, self.command)
    }
}

/// Split a crontab line into its schedule and the untouched command text.
fn split_line(line: &str) -> Result<(String, &str), ParseError> {
    let line = line.trim();

    if line.starts_with('@') {
        let (expression, command) = line
            .split_once(char::is_whitespace)
            .unwrap_or((line, ""));
        return Ok((expression.to_string(), command));
    }

    let mut rest = line;
    let mut fields = Vec::with_capacity(5);
    while fields.len() < 5 {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        fields.push(&rest[..end]);
        rest = &rest[end..];
    }

    if fields.len() < 5 {
        return Err(ParseError::FieldCount(fields.len()));
    }

    Ok((fields.join(" "), rest))
}
