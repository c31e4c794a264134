use std::sync::Arc;
use std::time::Duration;

use cdp_adapter::{StubDriver, StubScript};
use handoff_core_types::{
    Action, ActionKind, ContentFormat, Credentials, FailureKind, Job, JobId, JobStatus,
    CODE_PLACEHOLDER,
};
use handoff_kernel::{EngineConfig, EngineError, JobEvent, TaskManager};
use tokio::sync::broadcast;

const OTP: &str = "input[name='otp']";

fn fast_config(max_sessions: usize) -> EngineConfig {
    EngineConfig {
        max_sessions,
        acquire_timeout: Duration::from_secs(5),
        action_timeout: Duration::from_secs(5),
        code_wait_timeout: Duration::from_millis(200),
        shutdown_timeout: Duration::from_secs(2),
    }
}

fn engine(script: StubScript, max_sessions: usize) -> (Arc<StubDriver>, TaskManager) {
    let driver = Arc::new(StubDriver::new(script));
    let manager = TaskManager::new(driver.clone(), fast_config(max_sessions));
    (driver, manager)
}

async fn next_status(events: &mut broadcast::Receiver<JobEvent>, id: JobId, to: JobStatus) {
    loop {
        let event = events.recv().await.unwrap();
        if event.job_id == id && event.to == to {
            return;
        }
    }
}

/// Answers every AwaitingCode transition of `id` with `code`.
fn auto_respond(manager: &TaskManager, id: JobId, code: &'static str) {
    let mut events = manager.subscribe();
    let manager = manager.clone();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if event.job_id == id && event.to == JobStatus::AwaitingCode {
                manager.provide_code(id, code).unwrap();
            }
            if event.job_id == id && event.to.is_terminal() {
                break;
            }
        }
    });
}

#[tokio::test]
async fn empty_job_completes_without_payload() {
    let (_driver, manager) = engine(StubScript::new(), 1);
    let id = manager.submit(Job::new(Vec::new())).unwrap();
    let job = manager.wait_terminal(id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    let result = job.result.unwrap();
    assert!(result.success);
    assert!(result.data.is_none());
}

#[tokio::test]
async fn navigate_then_click_completes_on_last_index() {
    let (driver, manager) = engine(StubScript::new(), 1);
    let id = manager
        .submit(Job::new(vec![
            Action::navigate("https://x"),
            Action::click("#go"),
        ]))
        .unwrap();
    let job = manager.wait_terminal(id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.current_action, 1);
    assert!(job.result.unwrap().success);
    assert_eq!(driver.command_names(), vec!["navigate", "click"]);

    manager.shutdown(Duration::from_secs(1)).await.unwrap();
    assert_eq!(driver.open_sessions(), 0);
}

#[tokio::test]
async fn challenge_suspends_until_code_and_then_completes() {
    let (driver, manager) = engine(StubScript::new().with_challenge_selector(OTP, 0), 1);
    let mut events = manager.subscribe();
    let job = Job::new(vec![
        Action::navigate("https://x/login"),
        Action::type_text("#confirm", CODE_PLACEHOLDER),
    ]);
    let id = job.id;
    auto_respond(&manager, id, "654321");
    manager.submit(job).unwrap();

    let job = manager.wait_terminal(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let mut awaiting = 0;
    while let Ok(event) = events.try_recv() {
        if event.job_id == id && event.to == JobStatus::AwaitingCode {
            awaiting += 1;
        }
    }
    assert_eq!(awaiting, 1);
    assert_eq!(driver.submitted_codes(), vec!["654321".to_string()]);
    // the code fills the challenge field and then replaces the placeholder
    assert_eq!(
        driver.typed_values(),
        vec!["654321".to_string(), "654321".to_string()]
    );
}

#[tokio::test]
async fn challenge_without_code_fails_with_timeout() {
    let (_driver, manager) = engine(StubScript::new().with_challenge_selector(OTP, 0), 1);
    let id = manager
        .submit(Job::new(vec![
            Action::navigate("https://x/login"),
            Action::click("#next"),
        ]))
        .unwrap();
    let job = manager.wait_terminal(id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    let result = job.result.unwrap();
    assert_eq!(result.failure_kind, Some(FailureKind::Timeout));
    assert_eq!(result.failed_action, Some(0));
    assert!(!result.success);
}

#[tokio::test]
async fn text_challenge_is_detected_after_click() {
    let (driver, manager) = engine(
        StubScript::new()
            .with_page_text("Sign in")
            .with_challenge_text("Enter verification code sent to your phone", 1),
        1,
    );
    let job = Job::new(vec![
        Action::navigate("https://x/login"),
        Action::click("#submit"),
        Action::wait_visible("#dashboard"),
    ]);
    let id = job.id;
    auto_respond(&manager, id, "777000");
    manager.submit(job).unwrap();

    let job = manager.wait_terminal(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(driver.submitted_codes(), vec!["777000".to_string()]);
}

#[tokio::test]
async fn duplicate_submission_leaves_first_job_untouched() {
    let (_driver, manager) = engine(
        StubScript::new().with_latency(Duration::from_millis(20)),
        1,
    );
    let job = Job::new(vec![Action::navigate("https://x")]);
    let duplicate = job.clone();
    let id = manager.submit(job).unwrap();
    let before = manager.status(id).unwrap();

    let err = manager.submit(duplicate).unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists(dup) if dup == id));
    let after = manager.status(id).unwrap();
    assert_eq!(after.created_at, before.created_at);
    assert_eq!(after.actions, before.actions);

    let done = manager.wait_terminal(id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
}

#[tokio::test]
async fn provide_code_rejects_jobs_that_are_not_waiting() {
    let (_driver, manager) = engine(StubScript::new(), 1);
    let id = manager
        .submit(Job::new(vec![Action::navigate("https://x")]))
        .unwrap();
    manager.wait_terminal(id).await.unwrap();

    let err = manager.provide_code(id, "123456").unwrap_err();
    assert!(matches!(
        err,
        EngineError::NotAwaitingCode {
            status: JobStatus::Completed,
            ..
        }
    ));
    assert_eq!(manager.status(id).unwrap().status, JobStatus::Completed);

    let missing = manager.provide_code(JobId::new(), "1").unwrap_err();
    assert!(missing.is_not_found());
}

#[tokio::test]
async fn second_code_for_same_prompt_is_rejected() {
    let (_driver, manager) = engine(
        StubScript::new()
            .with_challenge_selector(OTP, 0)
            .with_latency(Duration::from_millis(20)),
        1,
    );
    let mut events = manager.subscribe();
    let id = manager
        .submit(Job::new(vec![Action::navigate("https://x/login")]))
        .unwrap();
    next_status(&mut events, id, JobStatus::AwaitingCode).await;

    manager.provide_code(id, "111111").unwrap();
    let err = manager.provide_code(id, "222222").unwrap_err();
    assert!(matches!(err, EngineError::NotAwaitingCode { .. }));
    assert_eq!(
        manager.wait_terminal(id).await.unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn invalid_action_is_rejected_before_registration() {
    let (_driver, manager) = engine(StubScript::new(), 1);
    let job = Job::new(vec![
        Action::navigate("https://x"),
        Action::new(ActionKind::Type).with_value("hello"),
    ]);
    let id = job.id;
    let err = manager.submit(job).unwrap_err();
    assert!(matches!(err, EngineError::Validation { index: 1, .. }));
    assert!(manager.status(id).unwrap_err().is_not_found());
    assert!(manager.list().is_empty());
}

#[tokio::test]
async fn login_without_credentials_is_rejected() {
    let (_driver, manager) = engine(StubScript::new(), 1);
    let err = manager.submit(Job::new(vec![Action::login()])).unwrap_err();
    assert!(matches!(err, EngineError::Validation { index: 0, .. }));
}

#[tokio::test]
async fn login_types_credentials_into_form() {
    let (driver, manager) = engine(StubScript::new(), 1);
    let job = Job::new(vec![Action::navigate("https://x/login"), Action::login()])
        .with_credentials(Credentials::new("alice", "pw"));
    let id = manager.submit(job).unwrap();
    let job = manager.wait_terminal(id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(
        driver.typed_values(),
        vec!["alice".to_string(), "pw".to_string()]
    );
    assert_eq!(driver.commands().len(), 7);
}

#[tokio::test]
async fn failing_action_stops_the_job() {
    let (driver, manager) = engine(StubScript::new().with_failing_selector("#missing"), 1);
    let id = manager
        .submit(Job::new(vec![
            Action::navigate("https://x"),
            Action::click("#missing"),
            Action::click("#never"),
        ]))
        .unwrap();
    let job = manager.wait_terminal(id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    let result = job.result.unwrap();
    assert_eq!(result.failure_kind, Some(FailureKind::Execution));
    assert_eq!(result.failed_action, Some(1));
    assert!(result.error.unwrap().contains("#missing"));
    assert_eq!(driver.command_names(), vec!["navigate", "click"]);
}

#[tokio::test]
async fn refused_session_fails_with_resource_kind() {
    let (_driver, manager) = engine(StubScript::new().failing_open(), 1);
    let id = manager
        .submit(Job::new(vec![Action::navigate("https://x")]))
        .unwrap();
    let job = manager.wait_terminal(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.result.unwrap().failure_kind,
        Some(FailureKind::Resource)
    );
}

#[tokio::test]
async fn extracting_actions_fill_the_payload() {
    let (_driver, manager) = engine(
        StubScript::new()
            .with_content("#price", "42.00")
            .with_script_result("document.title", serde_json::json!("Shop")),
        1,
    );
    let id = manager
        .submit(Job::new(vec![
            Action::navigate("https://x"),
            Action::extract("#price", ContentFormat::TextContent),
            Action::new(ActionKind::Screenshot),
            Action::run_script("document.title"),
        ]))
        .unwrap();
    let job = manager.wait_terminal(id).await.unwrap();

    let data = job.result.unwrap().data.unwrap();
    assert_eq!(data.len(), 3);
    assert_eq!(data[0].action_index, 1);
    assert_eq!(data[0].data, serde_json::json!("42.00"));
    assert_eq!(data[1].mime_type, "image/jpeg");
    assert_eq!(data[1].encoding.as_deref(), Some("base64"));
    assert_eq!(data[2].data, serde_json::json!("Shop"));
}

#[tokio::test]
async fn never_more_running_jobs_than_slots() {
    let (driver, manager) = engine(
        StubScript::new().with_latency(Duration::from_millis(30)),
        2,
    );
    let mut events = manager.subscribe();
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(
            manager
                .submit(Job::new(vec![
                    Action::navigate("https://x"),
                    Action::click("#a"),
                ]))
                .unwrap(),
        );
    }
    for id in &ids {
        assert_eq!(
            manager.wait_terminal(*id).await.unwrap().status,
            JobStatus::Completed
        );
    }

    let mut running = 0usize;
    let mut peak = 0usize;
    while let Ok(event) = events.try_recv() {
        if event.from == JobStatus::Pending && event.to == JobStatus::Running {
            running += 1;
            peak = peak.max(running);
        } else if event.to.is_terminal() && event.from == JobStatus::Running {
            running -= 1;
        }
    }
    assert_eq!(peak, 2);
    assert!(driver.peak_open_sessions() <= 2);
    assert_eq!(driver.sessions_opened(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slot_changes_hands_only_after_terminal_status() {
    let (_driver, manager) = engine(
        StubScript::new().with_latency(Duration::from_millis(2)),
        1,
    );
    let mut events = manager.subscribe();
    let ids: Vec<JobId> = (0..6)
        .map(|_| {
            manager
                .submit(Job::new(vec![Action::navigate("https://x")]))
                .unwrap()
        })
        .collect();
    for id in &ids {
        manager.wait_terminal(*id).await.unwrap();
    }

    let mut running = 0usize;
    let mut started = 0usize;
    while let Ok(event) = events.try_recv() {
        if event.to == JobStatus::Running && event.from == JobStatus::Pending {
            running += 1;
            started += 1;
            assert_eq!(running, 1, "{} started while another job was running", event.job_id);
        } else if event.to.is_terminal() && event.from == JobStatus::Running {
            running -= 1;
        }
    }
    assert_eq!(started, ids.len());
    assert_eq!(running, 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_code_submission() {
    let driver = Arc::new(StubDriver::new(
        StubScript::new()
            .with_challenge_selector(OTP, 0)
            .with_latency(Duration::from_secs(2)),
    ));
    let manager = TaskManager::new(
        driver.clone(),
        EngineConfig {
            max_sessions: 1,
            acquire_timeout: Duration::from_secs(5),
            action_timeout: Duration::from_secs(30),
            code_wait_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(1),
        },
    );
    let mut events = manager.subscribe();
    let id = manager
        .submit(Job::new(vec![Action::navigate("https://x/login")]))
        .unwrap();
    next_status(&mut events, id, JobStatus::AwaitingCode).await;
    manager.provide_code(id, "112233").unwrap();
    // let the loop start typing the code into the slow page
    tokio::time::sleep(Duration::from_millis(100)).await;

    manager.shutdown(Duration::from_secs(1)).await.unwrap();

    let job = manager.status(id).unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(driver.submitted_codes().is_empty());
    assert_eq!(driver.open_sessions(), 0);
}

#[tokio::test]
async fn shutdown_cancels_waiting_jobs() {
    let (driver, manager) = engine(StubScript::new().with_challenge_selector(OTP, 0), 1);
    let mut events = manager.subscribe();
    let waiting = manager
        .submit(Job::new(vec![Action::navigate("https://x/login")]))
        .unwrap();
    next_status(&mut events, waiting, JobStatus::AwaitingCode).await;

    // the only slot is held by the waiting job
    let queued = manager
        .submit(Job::new(vec![Action::navigate("https://y")]))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(manager.status(queued).unwrap().status, JobStatus::Pending);

    manager.shutdown(Duration::from_secs(2)).await.unwrap();

    for id in [waiting, queued] {
        let job = manager.status(id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(
            job.result.unwrap().failure_kind,
            Some(FailureKind::Cancelled)
        );
    }
    assert_eq!(driver.open_sessions(), 0);
    assert!(matches!(
        manager.provide_code(waiting, "1").unwrap_err(),
        EngineError::NotAwaitingCode { .. }
    ));
    assert!(matches!(
        manager.submit(Job::new(Vec::new())).unwrap_err(),
        EngineError::ShuttingDown
    ));
}

#[tokio::test]
async fn callback_url_must_be_http() {
    let (_driver, manager) = engine(StubScript::new(), 1);
    let err = manager
        .submit(Job::new(Vec::new()).with_callback("ftp://example.com/hook"))
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidCallback { .. }));
}

#[tokio::test]
async fn list_returns_every_job() {
    let (_driver, manager) = engine(StubScript::new(), 2);
    let a = manager.submit(Job::new(Vec::new())).unwrap();
    let b = manager.submit(Job::new(Vec::new())).unwrap();
    manager.wait_terminal(a).await.unwrap();
    manager.wait_terminal(b).await.unwrap();
    let listed: Vec<JobId> = manager.list().into_iter().map(|job| job.id).collect();
    assert_eq!(listed.len(), 2);
    assert!(listed.contains(&a) && listed.contains(&b));
}

#[tokio::test]
async fn completion_callback_is_posted_before_shutdown_returns() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut seen = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            seen.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&seen);
            if let Some(split) = text.find("\r\n\r\n") {
                if text[split + 4..].trim_end().ends_with('}') {
                    break;
                }
            }
        }
        socket
            .write_all(b"HTTP/1.1 204 No Content\r\ncontent-length: 0\r\n\r\n")
            .await
            .unwrap();
        String::from_utf8_lossy(&seen).into_owned()
    });

    let (_driver, manager) = engine(StubScript::new(), 1);
    let id = manager
        .submit(
            Job::new(vec![Action::navigate("https://x")])
                .with_credentials(Credentials::new("alice", "hunter2"))
                .with_callback(format!("http://{addr}/done")),
        )
        .unwrap();
    manager.wait_terminal(id).await.unwrap();
    manager.shutdown(Duration::from_secs(5)).await.unwrap();

    let request = tokio::time::timeout(Duration::from_secs(1), server)
        .await
        .unwrap()
        .unwrap();
    assert!(request.starts_with("POST /done"));
    assert!(request.contains("\"status\":\"completed\""));
    assert!(!request.contains("hunter2"));
}
