//! Job record and its lifecycle state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Action, Credentials, JobId, JobResult, SecondFactorConfig};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    #[serde(rename = "waiting_for_2fa")]
    AwaitingCode,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::AwaitingCode,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// The only edges of the lifecycle graph.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Running, AwaitingCode)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (AwaitingCode, Running)
                | (AwaitingCode, Failed)
                | (AwaitingCode, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::AwaitingCode => "waiting_for_2fa",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
#[error("invalid status transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// One submitted automation job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing)]
    pub credentials: Option<Credentials>,
    #[serde(default)]
    pub two_factor_auth: SecondFactorConfig,
    pub current_action: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

impl Job {
    pub fn new(actions: Vec<Action>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            status: JobStatus::Pending,
            actions,
            credentials: None,
            two_factor_auth: SecondFactorConfig::default(),
            current_action: 0,
            result: None,
            created_at: now,
            updated_at: now,
            callback_url: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_second_factor(mut self, config: SecondFactorConfig) -> Self {
        self.two_factor_auth = config;
        self
    }

    pub fn with_callback(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves along one lifecycle edge, returning the previous status.
    ///
    /// Terminal statuses must go through [`Job::finish`] so the result is written with them.
    pub fn transition(&mut self, next: JobStatus) -> Result<JobStatus, InvalidTransition> {
        let from = self.status;
        if next.is_terminal() || !from.can_transition_to(next) {
            return Err(InvalidTransition { from, to: next });
        }
        self.status = next;
        self.touch();
        Ok(from)
    }

    /// Writes the terminal status and its result in one step.
    pub fn finish(
        &mut self,
        status: JobStatus,
        result: JobResult,
    ) -> Result<JobStatus, InvalidTransition> {
        let from = self.status;
        if !status.is_terminal() || !from.can_transition_to(status) {
            return Err(InvalidTransition { from, to: status });
        }
        self.status = status;
        self.result = Some(result);
        self.touch();
        Ok(from)
    }

    /// Records the index of the executing action; never moves backwards.
    pub fn advance_to(&mut self, index: usize) {
        if index > self.current_action {
            self.current_action = index;
            self.touch();
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
