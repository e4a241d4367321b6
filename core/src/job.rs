use thiserror::Error;
use tracing::debug;

use crate::cfg::JobPeriods;

/// Name of the local time refresh job.
pub const LOCALTIME: &str = "localtime";
/// Name of the weather refresh job.
pub const WEATHER: &str = "weather";
/// Name of the clock redraw job.
pub const UPDATE_TIME: &str = "update_time";
/// Name of the status publish job.
pub const SEND_STATUS: &str = "send_status";
/// Name of the LED blink job, the only job reconfigured at runtime.
pub const LED_BLINK: &str = "led_blink";

/// Default blink period (seconds) restored by an empty blink-rate directive.
pub const LED_BLINK_DEFAULT_SECS: f64 = 60.0;

/// Jobs at or above this period get a timestamped trace line when they fire.
pub const SLOW_JOB_MS: u64 = 60_000;

/// A periodic job specification.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    /// Period between runs (milliseconds).
    pub period_ms: u64,
    /// The action to perform when the job triggers.
    pub action: Action,
}

/// Actions that a job can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Refresh the wall clock from the network.
    LocalTime,
    /// Refresh the weather display.
    Weather,
    /// Redraw clock and calendar.
    UpdateTime,
    /// Publish temperature, light and a status snapshot.
    SendStatus,
    /// Toggle the board LED.
    LedBlink,
}

/// Runtime state for a job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobState {
    /// Timestamp (ms on the loop clock) of the last run; `None` if never run.
    pub last_run_ms: Option<u64>,
    /// Successful runs count.
    pub runs: u64,
    /// Consecutive failure count.
    pub failures: u64,
    /// Retry delay (ms) overriding the period until the next run, 0 when unset.
    pub backoff_ms: u64,
}

/// One entry in the job table.
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique name.
    pub name: String,
    /// What to run and how often.
    pub spec: JobSpec,
    /// When it last ran.
    pub state: JobState,
}

impl Job {
    /// Period currently in force: the retry delay after a recoverable fault,
    /// otherwise the normal period.
    pub fn effective_period_ms(&self) -> u64 {
        if self.state.backoff_ms > 0 { self.state.backoff_ms } else { self.spec.period_ms }
    }

    /// Due when never run, or when the effective period has elapsed.
    pub fn is_due(&self, now_ms: u64) -> bool {
        match self.state.last_run_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.effective_period_ms(),
        }
    }

    /// Long-period jobs get a coarse timestamped log line when they run.
    pub fn is_slow(&self) -> bool { self.spec.period_ms >= SLOW_JOB_MS }
}

/// Job table mutation errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum JobTableError {
    /// A job with this name already exists.
    #[error("duplicate job {0}")]
    Duplicate(String),
    /// Scheduled jobs need a positive period.
    #[error("job {0} needs a positive period")]
    ZeroPeriod(String),
}

/// Fixed set of periodic jobs, evaluated in insertion order.
#[derive(Debug, Clone, Default)]
pub struct JobTable {
    jobs: Vec<Job>,
}

/// Seconds (possibly fractional) to whole milliseconds.
pub fn secs_to_ms(secs: f64) -> u64 {
    if secs.is_finite() && secs > 0.0 { (secs * 1000.0).round() as u64 } else { 0 }
}

impl JobTable {
    /// Empty table.
    pub fn new() -> Self { Self::default() }

    /// The device's standard jobs with the configured periods.
    pub fn with_defaults(periods: &JobPeriods) -> Result<Self, JobTableError> {
        let mut t = Self::new();
        t.insert(LOCALTIME, JobSpec { period_ms: secs_to_ms(periods.localtime), action: Action::LocalTime })?;
        t.insert(WEATHER, JobSpec { period_ms: secs_to_ms(periods.weather), action: Action::Weather })?;
        t.insert(UPDATE_TIME, JobSpec { period_ms: secs_to_ms(periods.update_time), action: Action::UpdateTime })?;
        t.insert(SEND_STATUS, JobSpec { period_ms: secs_to_ms(periods.send_status), action: Action::SendStatus })?;
        t.insert(LED_BLINK, JobSpec { period_ms: secs_to_ms(periods.led_blink), action: Action::LedBlink })?;
        Ok(t)
    }

    /// Append a new job.
    pub fn insert(&mut self, name: &str, spec: JobSpec) -> Result<(), JobTableError> {
        if spec.period_ms == 0 {
            return Err(JobTableError::ZeroPeriod(name.to_string()));
        }
        if self.get(name).is_some() {
            return Err(JobTableError::Duplicate(name.to_string()));
        }
        self.jobs.push(Job { name: name.to_string(), spec, state: JobState::default() });
        Ok(())
    }

    /// Install or replace `name`, keeping its position if it exists. The job
    /// starts over as never run, so it is due on the next pass.
    pub fn upsert(&mut self, name: &str, spec: JobSpec) -> Result<(), JobTableError> {
        if spec.period_ms == 0 {
            return Err(JobTableError::ZeroPeriod(name.to_string()));
        }
        match self.get_mut(name) {
            Some(job) => {
                debug!(job = name, period_ms = spec.period_ms, "job replaced");
                job.spec = spec;
                job.state = JobState::default();
                Ok(())
            }
            None => self.insert(name, spec),
        }
    }

    /// Drop `name`; returns whether it was present.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.jobs.len();
        self.jobs.retain(|j| j.name != name);
        let removed = self.jobs.len() != before;
        if removed {
            debug!(job = name, "job removed");
        }
        removed
    }

    /// Look a job up by name.
    pub fn get(&self, name: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.name == name)
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.name == name)
    }

    /// Jobs in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    /// Number of scheduled jobs.
    pub fn len(&self) -> usize { self.jobs.len() }

    /// True when nothing is scheduled.
    pub fn is_empty(&self) -> bool { self.jobs.is_empty() }

    /// Whether `name` should run at `now_ms`. Absent jobs are never due.
    pub fn is_due(&self, name: &str, now_ms: u64) -> bool {
        self.get(name).is_some_and(|j| j.is_due(now_ms))
    }

    /// Names of all due jobs, in insertion order.
    pub fn due(&self, now_ms: u64) -> Vec<String> {
        self.jobs.iter().filter(|j| j.is_due(now_ms)).map(|j| j.name.clone()).collect()
    }

    /// Record a successful run at `at_ms`.
    pub fn mark_run(&mut self, name: &str, at_ms: u64) {
        if let Some(job) = self.get_mut(name) {
            job.state.last_run_ms = Some(at_ms);
            job.state.runs = job.state.runs.saturating_add(1);
            job.state.failures = 0;
            job.state.backoff_ms = 0;
        }
    }

    /// Record a non-recoverable failure at `at_ms`; the normal period applies.
    pub fn mark_failed(&mut self, name: &str, at_ms: u64) {
        if let Some(job) = self.get_mut(name) {
            job.state.last_run_ms = Some(at_ms);
            job.state.failures = job.state.failures.saturating_add(1);
            job.state.backoff_ms = 0;
        }
    }

    /// Make `name` due again exactly `retry_delay_ms` after `now_ms`,
    /// whatever its normal period.
    pub fn reschedule_after_failure(&mut self, name: &str, now_ms: u64, retry_delay_ms: u64) {
        if let Some(job) = self.get_mut(name) {
            job.state.last_run_ms = Some(now_ms);
            job.state.failures = job.state.failures.saturating_add(1);
            job.state.backoff_ms = retry_delay_ms.max(1);
        }
    }

    /// Forget when `name` last ran so it is due on the next pass.
    pub fn clear_last_run(&mut self, name: &str) {
        if let Some(job) = self.get_mut(name) {
            job.state.last_run_ms = None;
            job.state.backoff_ms = 0;
        }
    }
}
