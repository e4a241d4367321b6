//! Fault taxonomy.
//!
//! Every failure in the device loop falls into one of these categories. Job
//! and handler faults are caught at their own boundary and turned into a
//! counter bump plus a log line; only [`FatalFault`] ends the process.

use thiserror::Error;

/// A malformed payload. Logged, counted and dropped; never propagated.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("bad input: {0}")]
pub struct InputFault(pub String);

/// A transient fault while doing work (bad sensor read, bad temporary state).
/// The job that hit it is retried after a short delay.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("runtime fault: {0}")]
pub struct RuntimeFault(pub String);

/// A bus operation failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BusFault {
    /// The service tick errored.
    #[error("service tick failed: {0}")]
    Service(String),
    /// Connecting to the broker failed.
    #[error("connect failed: {0}")]
    Connect(String),
    /// Disconnecting from the broker failed.
    #[error("disconnect failed: {0}")]
    Disconnect(String),
    /// A publish or subscribe request could not be queued.
    #[error("request failed: {0}")]
    Request(String),
}

/// One stage of the reconnection protocol failed.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("recovery stage {stage} failed: {reason}")]
pub struct RecoveryFault {
    /// Stage label, e.g. `"disconnect"`.
    pub stage: &'static str,
    /// What went wrong.
    pub reason: String,
}

/// Unrecoverable; the device must restart.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FatalFault {
    /// The very first broker connection failed.
    #[error("initial broker connect failed: {0}")]
    InitialConnect(String),
    /// The last reconnection stage failed.
    #[error("reconnect failed: {0}")]
    Reconnect(String),
}

/// Failure of a job action, by category.
#[derive(Error, Debug)]
pub enum JobError {
    /// Malformed input reached the job.
    #[error(transparent)]
    Input(#[from] InputFault),
    /// Transient runtime fault.
    #[error(transparent)]
    Runtime(#[from] RuntimeFault),
    /// A publish failed.
    #[error(transparent)]
    Bus(#[from] BusFault),
    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl JobError {
    /// True for the categories that warrant a short-delay retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, JobError::Input(_) | JobError::Runtime(_))
    }

    /// Short stable label (snake_case) for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            JobError::Input(_) => "input_fault",
            JobError::Runtime(_) => "runtime_fault",
            JobError::Bus(_) => "bus_fault",
            JobError::Other(_) => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_input_and_runtime_are_recoverable() {
        assert!(JobError::from(InputFault("x".into())).is_recoverable());
        assert!(JobError::from(RuntimeFault("x".into())).is_recoverable());
        assert!(!JobError::from(BusFault::Request("x".into())).is_recoverable());
        assert!(!JobError::Other("x".into()).is_recoverable());
    }

    #[test]
    fn messages_carry_context() {
        let e = RecoveryFault { stage: "disconnect", reason: "socket closed".into() };
        assert_eq!(e.to_string(), "recovery stage disconnect failed: socket closed");
        assert_eq!(JobError::from(BusFault::Service("eof".into())).as_label(), "bus_fault");
    }
}
