//! Per-job control loop.

use std::sync::Arc;
use std::time::Duration;

use action_primitives::translate;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use cdp_adapter::{AdapterError, CommandOutput};
use handoff_core_types::{Action, ActionOutput, FailureKind, Job, JobId, JobResult, JobStatus};
use handoff_scheduler::{PoolError, PooledSession};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::challenge::{self, Challenge};
use crate::manager::EngineShared;

/// How a loop ended, before anything is written to the registry.
enum Outcome {
    Completed(Vec<ActionOutput>),
    Failed(JobResult),
    /// Shutdown already wrote the terminal status.
    Stopped,
}

pub(crate) async fn run_job(shared: Arc<EngineShared>, id: JobId) {
    let Some(job) = shared.snapshot(id) else {
        return;
    };
    if job.is_terminal() {
        return;
    }

    let slot = match shared.pool.acquire(&shared.cancel).await {
        Ok(slot) => slot,
        Err(PoolError::Cancelled) | Err(PoolError::Closed) => {
            debug!(job_id = %id, "job stopped before acquiring a session slot");
            notify(&shared, id);
            return;
        }
        Err(err) => {
            let kind = if err.is_timeout() {
                FailureKind::Timeout
            } else {
                FailureKind::Resource
            };
            fail(
                &shared,
                id,
                JobResult::failure(kind, "no browser session available", err.to_string()),
            );
            notify(&shared, id);
            return;
        }
    };

    let session = match shared.pool.open_session(slot).await {
        Ok(session) => session,
        Err(err) => {
            fail(
                &shared,
                id,
                JobResult::failure(FailureKind::Resource, "failed to open browser session", err.to_string()),
            );
            notify(&shared, id);
            return;
        }
    };

    let outcome = match shared.transition(id, JobStatus::Running) {
        Ok(()) => {
            info!(job_id = %id, session = %session.id(), "job running");
            drive(&shared, id, &job, &session).await
        }
        Err(err) => {
            debug!(job_id = %id, %err, "job left pending before it could start");
            Outcome::Stopped
        }
    };

    // terminal status lands before the slot is handed to the next job
    match outcome {
        Outcome::Completed(outputs) => {
            let count = job.actions.len();
            let result = JobResult::success(format!("completed {count} action(s)"), outputs);
            if shared.finish(id, JobStatus::Completed, result) {
                info!(job_id = %id, "job completed");
            }
        }
        Outcome::Failed(result) => fail(&shared, id, result),
        Outcome::Stopped => debug!(job_id = %id, "job loop stopped"),
    }

    if let Err(err) = session.close().await {
        warn!(job_id = %id, %err, "failed to close browser session");
    }
    notify(&shared, id);
}

async fn drive(shared: &EngineShared, id: JobId, job: &Job, session: &PooledSession) -> Outcome {
    let mut outputs = Vec::new();
    let mut code: Option<String> = None;

    for (index, action) in job.actions.iter().enumerate() {
        if shared.cancel.is_cancelled() {
            return Outcome::Stopped;
        }
        shared.advance(id, index);

        let command = match translate(action, job.credentials.as_ref(), code.as_deref()) {
            Ok(command) => command,
            Err(err) => {
                return Outcome::Failed(
                    JobResult::failure(
                        FailureKind::Validation,
                        format!("invalid {} action", action.kind),
                        err.to_string(),
                    )
                    .at_action(index),
                )
            }
        };

        debug!(job_id = %id, action_index = index, action = %action.kind, "executing action");
        let output = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return Outcome::Stopped,
            ran = tokio::time::timeout(shared.cfg.action_timeout, session.run(&command)) => match ran {
                Ok(Ok(output)) => output,
                Ok(Err(err)) => return action_failed(action, index, err),
                Err(_) => {
                    return Outcome::Failed(
                        JobResult::failure(
                            FailureKind::Timeout,
                            format!("{} action timed out", action.kind),
                            format!("no response within {}", humantime::format_duration(shared.cfg.action_timeout)),
                        )
                        .at_action(index),
                    )
                }
            }
        };
        if let Some(collected) = to_action_output(index, output) {
            outputs.push(collected);
        }

        if !action.kind.may_trigger_challenge() {
            continue;
        }
        let probed = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return Outcome::Stopped,
            probed = tokio::time::timeout(shared.cfg.action_timeout, challenge::detect(session)) => probed,
        };
        let found = match probed {
            Ok(Some(found)) => found,
            Ok(None) => continue,
            Err(_) => {
                warn!(job_id = %id, action_index = index, "challenge probe timed out");
                continue;
            }
        };
        info!(
            job_id = %id,
            action_index = index,
            hint = %found.hint,
            evidence = %found.evidence,
            expected = job.two_factor_auth.expected,
            provider = ?job.two_factor_auth.provider,
            "second-factor challenge detected"
        );

        let delivered = match wait_for_code(shared, id).await {
            CodeWait::Delivered(code) => code,
            CodeWait::Finished => return Outcome::Stopped,
        };
        if let Err(outcome) = enter_code(shared, session, &found, &delivered, index).await {
            return outcome;
        }
        code = Some(delivered);
    }

    Outcome::Completed(outputs)
}

enum CodeWait {
    Delivered(String),
    /// The job was finished while waiting (timeout or shutdown).
    Finished,
}

async fn wait_for_code(shared: &EngineShared, id: JobId) -> CodeWait {
    let mut rx: oneshot::Receiver<String> = match shared.await_code(id) {
        Ok(rx) => rx,
        Err(err) => {
            debug!(job_id = %id, %err, "could not suspend job for a code");
            return CodeWait::Finished;
        }
    };
    let waited: Duration = shared.cfg.code_wait_timeout;

    tokio::select! {
        biased;
        _ = shared.cancel.cancelled() => CodeWait::Finished,
        received = tokio::time::timeout(waited, &mut rx) => match received {
            Ok(Ok(code)) => CodeWait::Delivered(code),
            Ok(Err(_)) => CodeWait::Finished,
            Err(_) => {
                if shared.expire_code_wait(id, waited) {
                    warn!(job_id = %id, "second-factor code wait expired");
                    return CodeWait::Finished;
                }
                match rx.try_recv() {
                    Ok(code) => CodeWait::Delivered(code),
                    Err(_) => CodeWait::Finished,
                }
            }
        }
    }
}

async fn enter_code(
    shared: &EngineShared,
    session: &PooledSession,
    found: &Challenge,
    code: &str,
    index: usize,
) -> Result<(), Outcome> {
    let limit = shared.cfg.action_timeout;
    let submitted = tokio::select! {
        biased;
        _ = shared.cancel.cancelled() => return Err(Outcome::Stopped),
        submitted = tokio::time::timeout(limit, challenge::submit_code(session, found.hint, code)) => submitted,
    };
    let (kind, error) = match submitted {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(err)) => (FailureKind::Execution, err.to_string()),
        Err(_) => (
            FailureKind::Timeout,
            format!("no response within {}", humantime::format_duration(limit)),
        ),
    };
    Err(Outcome::Failed(
        JobResult::failure(kind, "failed to submit second-factor code", error)
            .at_action(index)
            .with_custom("challenge_hint", found.hint.as_str().into()),
    ))
}

fn action_failed(action: &Action, index: usize, err: AdapterError) -> Outcome {
    let kind = if err.is_timeout() {
        FailureKind::Timeout
    } else {
        FailureKind::Execution
    };
    Outcome::Failed(
        JobResult::failure(kind, format!("failed on action {index}: {}", action.kind), err.to_string())
            .at_action(index),
    )
}

fn to_action_output(index: usize, output: CommandOutput) -> Option<ActionOutput> {
    match output {
        CommandOutput::None => None,
        CommandOutput::Text { mime_type, text } => Some(ActionOutput {
            action_index: index,
            mime_type: mime_type.to_string(),
            encoding: None,
            data: text.into(),
        }),
        CommandOutput::Image { mime_type, bytes } => Some(ActionOutput {
            action_index: index,
            mime_type: mime_type.to_string(),
            encoding: Some("base64".to_string()),
            data: BASE64.encode(bytes).into(),
        }),
        CommandOutput::Json(value) => Some(ActionOutput {
            action_index: index,
            mime_type: "application/json".to_string(),
            encoding: None,
            data: value,
        }),
    }
}

fn fail(shared: &EngineShared, id: JobId, result: JobResult) {
    let error = result.error.clone().unwrap_or_default();
    if shared.finish(id, JobStatus::Failed, result) {
        warn!(job_id = %id, %error, "job failed");
    }
}

fn notify(shared: &EngineShared, id: JobId) {
    if let Some(job) = shared.snapshot(id) {
        if job.is_terminal() {
            // tracked so shutdown waits for the attempt
            if let Some(task) = shared.notifier.delivery(&job) {
                shared.tracker.spawn(task);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screenshots_are_base64_encoded() {
        let out = to_action_output(
            3,
            CommandOutput::Image {
                mime_type: "image/jpeg",
                bytes: b"abc".to_vec(),
            },
        )
        .unwrap();
        assert_eq!(out.action_index, 3);
        assert_eq!(out.encoding.as_deref(), Some("base64"));
        assert_eq!(out.data, serde_json::json!("YWJj"));
    }

    #[test]
    fn commands_without_output_are_skipped() {
        assert!(to_action_output(0, CommandOutput::None).is_none());
    }
}
