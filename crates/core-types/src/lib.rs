//! Shared primitives for the Handoff task engine.
//!
//! Every crate in the workspace speaks in these types: jobs and their actions,
//! credentials and second-factor hints, lifecycle status and the terminal result.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod action;
pub mod auth;
pub mod job;
pub mod result;

pub use action::{Action, ActionKind, ContentFormat, CODE_PLACEHOLDER};
pub use auth::{Credentials, SecondFactorConfig, TfaProvider};
pub use job::{InvalidTransition, Job, JobStatus};
pub use result::{ActionOutput, FailureKind, JobResult};

/// Opaque identity of a submitted job.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_display_parses_back() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn job_id_rejects_garbage() {
        assert!("not-a-job".parse::<JobId>().is_err());
    }
}
