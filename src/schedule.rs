//! Per-service start/stop schedules
//!
//! A service is "inside its window" when the next boundary it will cross is
//! a stop: the earliest upcoming stop comes before the earliest upcoming
//! start. It is "starting" when a start fired recently enough that a missing
//! process is still expected boot latency.

use chrono::{Duration, NaiveDateTime};
use indexmap::IndexMap;

use crate::error::EvaluationError;
use crate::job::{JobRole, ScheduledJob};

/// How far back, in days, to look for the most recent start occurrence
pub const DEFAULT_LOOKBACK_DAYS: i64 = 7;

/// Start and stop jobs sharing one `--name`
#[derive(Debug, Clone)]
pub struct ServiceSchedule {
    name: String,
    start_jobs: Vec<ScheduledJob>,
    stop_jobs: Vec<ScheduledJob>,
    lookback: Duration,
}

impl ServiceSchedule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_jobs: Vec::new(),
            stop_jobs: Vec::new(),
            lookback: Duration::days(DEFAULT_LOOKBACK_DAYS),
        }
    }

    /// Collect the jobs tagged with `name`
    pub fn from_jobs<'a>(
        name: impl Into<String>,
        jobs: impl IntoIterator<Item = &'a ScheduledJob>,
    ) -> Self {
        let mut schedule = Self::new(name);
        for job in jobs {
            if job.name() == Some(schedule.name.as_str()) {
                schedule.push(job.clone());
            }
        }
        schedule
    }

    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    /// File a job under its role. Jobs whose role is ambiguous or missing
    /// are left out with a warning.
    pub fn push(&mut self, job: ScheduledJob) {
        match job.role() {
            JobRole::Start => self.start_jobs.push(job),
            JobRole::Stop => self.stop_jobs.push(job),
            role => {
                tracing::warn!(
                    service = %self.name,
                    job = %job,
                    %role,
                    "Excluding job: cannot tell whether it starts or stops the service"
                );
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_jobs(&self) -> &[ScheduledJob] {
        &self.start_jobs
    }

    pub fn stop_jobs(&self) -> &[ScheduledJob] {
        &self.stop_jobs
    }

    /// Earliest upcoming start over all start jobs
    pub fn next_start(&self, now: NaiveDateTime) -> Result<NaiveDateTime, EvaluationError> {
        earliest(&self.start_jobs, now, || {
            EvaluationError::NoStartJobs(self.name.clone())
        })
    }

    /// Earliest upcoming stop over all stop jobs
    pub fn next_stop(&self, now: NaiveDateTime) -> Result<NaiveDateTime, EvaluationError> {
        earliest(&self.stop_jobs, now, || {
            EvaluationError::NoStopJobs(self.name.clone())
        })
    }

    /// Whether the schedule says the service should be up at `now`
    pub fn should_run(&self, now: NaiveDateTime) -> Result<bool, EvaluationError> {
        let start = self.next_start(now)?;
        let stop = self.next_stop(now)?;
        tracing::debug!(service = %self.name, %start, %stop, "Next boundaries");
        Ok(stop < start)
    }

    /// Whether a start fired within `(start, start + grace]` of `now`
    pub fn is_starting(
        &self,
        now: NaiveDateTime,
        grace: Duration,
    ) -> Result<bool, EvaluationError> {
        if self.start_jobs.is_empty() {
            return Err(EvaluationError::NoStartJobs(self.name.clone()));
        }

        Ok(self.start_jobs.iter().any(|job| {
            job.expression()
                .last_occurrence_at_or_before(now, self.lookback)
                .is_some_and(|last| last < now && now <= last + grace)
        }))
    }

    /// Most recent start occurrence within the lookback window
    pub fn last_start(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        self.start_jobs
            .iter()
            .filter_map(|job| {
                job.expression()
                    .last_occurrence_at_or_before(now, self.lookback)
            })
            .max()
    }
}

/// Group named jobs by service, in first-seen order. Unnamed jobs are
/// ignored.
pub fn group_services(jobs: &[ScheduledJob]) -> IndexMap<String, ServiceSchedule> {
    let mut services: IndexMap<String, ServiceSchedule> = IndexMap::new();
    for job in jobs {
        if let Some(name) = job.name() {
            services
                .entry(name.to_string())
                .or_insert_with(|| ServiceSchedule::new(name))
                .push(job.clone());
        }
    }
    services
}

/// Jobs that never fire are skipped. The first such error is returned only
/// when no job fires at all.
fn earliest(
    jobs: &[ScheduledJob],
    now: NaiveDateTime,
    empty: impl FnOnce() -> EvaluationError,
) -> Result<NaiveDateTime, EvaluationError> {
    let mut earliest: Option<NaiveDateTime> = None;
    let mut failure = None;

    for job in jobs {
        match job.next_occurrence(now) {
            Ok(at) => earliest = Some(earliest.map_or(at, |e| e.min(at))),
            Err(e) => {
                failure.get_or_insert(e);
            }
        }
    }

    match (earliest, failure) {
        (Some(at), _) => Ok(at),
        (None, Some(e)) => Err(e),
        (None, None) => Err(empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 15)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    fn jobs(lines: &[&str]) -> Vec<ScheduledJob> {
        lines
            .iter()
            .map(|l| ScheduledJob::from_line(l).unwrap())
            .collect()
    }

    fn office_hours() -> ServiceSchedule {
        let jobs = jobs(&[
            "0 9 * * * app --name X start",
            "0 17 * * * app --name X stop",
        ]);
        ServiceSchedule::from_jobs("X", &jobs)
    }

    #[test]
    fn test_should_run_inside_window() {
        assert!(office_hours().should_run(at(10, 0)).unwrap());
        assert!(office_hours().should_run(at(9, 0)).unwrap());
    }

    #[test]
    fn test_should_run_outside_window() {
        assert!(!office_hours().should_run(at(18, 0)).unwrap());
        assert!(!office_hours().should_run(at(8, 59)).unwrap());
        assert!(!office_hours().should_run(at(17, 0)).unwrap());
    }

    #[test]
    fn test_should_run_overnight_window() {
        let jobs = jobs(&[
            "0 22 * * * app --name night start",
            "0 6 * * * app --name night stop",
        ]);
        let schedule = ServiceSchedule::from_jobs("night", &jobs);
        assert!(schedule.should_run(at(23, 30)).unwrap());
        assert!(schedule.should_run(at(2, 0)).unwrap());
        assert!(!schedule.should_run(at(12, 0)).unwrap());
    }

    #[test]
    fn test_should_run_uses_earliest_of_many_jobs() {
        let jobs = jobs(&[
            "0 9 * * * app --name X start",
            "0 13 * * * app --name X start",
            "0 12 * * * app --name X stop",
            "0 17 * * * app --name X stop",
        ]);
        let schedule = ServiceSchedule::from_jobs("X", &jobs);
        assert!(schedule.should_run(at(10, 0)).unwrap());
        assert!(!schedule.should_run(at(12, 30)).unwrap());
        assert!(schedule.should_run(at(14, 0)).unwrap());
    }

    #[test]
    fn test_missing_jobs_are_errors() {
        let only_start = jobs(&["0 9 * * * app --name X start"]);
        let schedule = ServiceSchedule::from_jobs("X", &only_start);
        assert_eq!(
            schedule.should_run(at(10, 0)),
            Err(EvaluationError::NoStopJobs("X".into()))
        );

        let empty = ServiceSchedule::new("Y");
        assert_eq!(
            empty.should_run(at(10, 0)),
            Err(EvaluationError::NoStartJobs("Y".into()))
        );
        assert_eq!(
            empty.is_starting(at(10, 0), Duration::minutes(5)),
            Err(EvaluationError::NoStartJobs("Y".into()))
        );
    }

    #[test]
    fn test_job_that_never_fires_is_skipped() {
        let partly = jobs(&[
            "0 0 30 2 * app --name X start",
            "0 9 * * * app --name X start",
            "0 17 * * * app --name X stop",
        ]);
        let schedule = ServiceSchedule::from_jobs("X", &partly);
        assert!(schedule.should_run(at(10, 0)).unwrap());

        let never = jobs(&[
            "0 0 30 2 * app --name Z start",
            "0 17 * * * app --name Z stop",
        ]);
        let schedule = ServiceSchedule::from_jobs("Z", &never);
        assert!(matches!(
            schedule.should_run(at(10, 0)),
            Err(EvaluationError::NoOccurrenceFound(_))
        ));
    }

    #[test]
    fn test_is_starting_grace_window() {
        let schedule = office_hours();
        let grace = Duration::minutes(5);
        assert!(!schedule.is_starting(at(9, 0), grace).unwrap());
        assert!(schedule.is_starting(at(9, 3), grace).unwrap());
        assert!(schedule.is_starting(at(9, 5), grace).unwrap());
        assert!(!schedule.is_starting(at(9, 6), grace).unwrap());
        assert!(!schedule.is_starting(at(18, 0), grace).unwrap());
    }

    #[test]
    fn test_is_starting_at_end_of_grace_with_short_lookback() {
        let grace = Duration::minutes(5);
        let schedule = office_hours().with_lookback(grace + Duration::minutes(1));
        assert!(schedule.is_starting(at(9, 5), grace).unwrap());
        assert!(!schedule.is_starting(at(9, 6), grace).unwrap());
    }

    #[test]
    fn test_last_start() {
        let schedule = office_hours();
        assert_eq!(schedule.last_start(at(10, 0)), Some(at(9, 0)));
        let yesterday = at(9, 0) - Duration::days(1);
        assert_eq!(schedule.last_start(at(8, 0)), Some(yesterday));
        assert_eq!(
            schedule
                .with_lookback(Duration::hours(1))
                .last_start(at(8, 0)),
            None
        );
    }

    #[test]
    fn test_ambiguous_and_unclassified_jobs_excluded() {
        let jobs = jobs(&[
            "0 9 * * * app --name X start",
            "0 12 * * * app --name X stop-then-start",
            "0 13 * * * app --name X status",
            "0 17 * * * app --name X stop",
        ]);
        let schedule = ServiceSchedule::from_jobs("X", &jobs);
        assert_eq!(schedule.start_jobs().len(), 1);
        assert_eq!(schedule.stop_jobs().len(), 1);
    }

    #[test]
    fn test_group_services() {
        let jobs = jobs(&[
            "0 9 * * * app --name A start",
            "*/5 * * * * backup.sh",
            "0 10 * * * app --name B start",
            "0 17 * * * app --name A stop",
        ]);
        let groups = group_services(&jobs);
        assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(groups["A"].start_jobs().len(), 1);
        assert_eq!(groups["A"].stop_jobs().len(), 1);
        assert!(groups["B"].stop_jobs().is_empty());
    }
}
