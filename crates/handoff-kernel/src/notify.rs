//! Outbound completion callbacks.

use std::future::Future;

use chrono::{DateTime, Utc};
use handoff_core_types::{Action, Job, JobId, JobResult, JobStatus, SecondFactorConfig};
use once_cell::sync::Lazy;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::NotifyConfig;

static CALLBACK_CLIENT: Lazy<Client> = Lazy::new(Client::new);

/// Body POSTed to a job's `callback_url`. Credentials are never part of it.
#[derive(Clone, Debug, Serialize)]
pub struct CallbackPayload {
    pub id: JobId,
    pub status: JobStatus,
    pub current_action: usize,
    pub actions: Vec<Action>,
    pub two_factor_auth: SecondFactorConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Job> for CallbackPayload {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            status: job.status,
            current_action: job.current_action,
            actions: job.actions.clone(),
            two_factor_auth: job.two_factor_auth.clone(),
            result: job.result.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Notifier {
    cfg: NotifyConfig,
}

impl Notifier {
    pub fn new(cfg: NotifyConfig) -> Self {
        Self { cfg }
    }

    pub async fn deliver(
        &self,
        url: &str,
        payload: &CallbackPayload,
    ) -> Result<StatusCode, reqwest::Error> {
        let mut request = CALLBACK_CLIENT
            .post(url)
            .timeout(self.cfg.timeout)
            .json(payload);
        if let Some((user, pass)) = self.cfg.basic_auth() {
            request = request.basic_auth(user, Some(pass));
        }
        let response = request.send().await?;
        Ok(response.status())
    }

    /// The single delivery attempt for `job`, or `None` when it has no callback URL.
    /// Failures are logged, never retried.
    pub fn delivery(&self, job: &Job) -> Option<impl Future<Output = ()> + Send + 'static> {
        let url = job.callback_url.clone()?;
        let payload = CallbackPayload::from(job);
        let notifier = self.clone();
        Some(async move {
            match notifier.deliver(&url, &payload).await {
                Ok(status) if status.is_success() => {
                    debug!(job_id = %payload.id, %status, "callback delivered");
                }
                Ok(status) => {
                    warn!(job_id = %payload.id, %status, "callback endpoint rejected notification");
                }
                Err(err) => {
                    warn!(job_id = %payload.id, ?err, "failed to deliver callback");
                }
            }
        })
    }
}
