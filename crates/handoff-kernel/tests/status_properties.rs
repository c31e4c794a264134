//! Random action lists against a scripted page: the published transitions form a legal
//! chain, polled snapshots never move backwards, and a job suspends once per prompt.

use std::sync::Arc;
use std::time::Duration;

use cdp_adapter::{StubDriver, StubScript};
use handoff_core_types::{Action, FailureKind, Job, JobStatus, CODE_PLACEHOLDER};
use handoff_kernel::{EngineConfig, TaskManager};
use proptest::prelude::*;

#[derive(Clone, Copy, Debug)]
enum Step {
    Navigate,
    Click,
    Wait,
    TypeCode,
}

impl Step {
    fn action(self) -> Action {
        match self {
            Step::Navigate => Action::navigate("https://app.test"),
            Step::Click => Action::click("#next"),
            Step::Wait => Action::wait_visible("#panel"),
            Step::TypeCode => Action::type_text("#field", CODE_PLACEHOLDER),
        }
    }

    fn triggers(self) -> bool {
        matches!(self, Step::Navigate | Step::Click)
    }
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(Step::Navigate),
        Just(Step::Click),
        Just(Step::Wait),
        Just(Step::TypeCode),
    ]
}

const STATUSES: [JobStatus; 6] = [
    JobStatus::Pending,
    JobStatus::Running,
    JobStatus::AwaitingCode,
    JobStatus::Completed,
    JobStatus::Failed,
    JobStatus::Cancelled,
];

/// `to` can be reached from `from` through zero or more lifecycle edges.
fn reachable(from: JobStatus, to: JobStatus) -> bool {
    let mut seen = vec![from];
    let mut frontier = vec![from];
    while let Some(current) = frontier.pop() {
        for next in STATUSES {
            if current.can_transition_to(next) && !seen.contains(&next) {
                seen.push(next);
                frontier.push(next);
            }
        }
    }
    seen.contains(&to)
}

struct Observed {
    status: JobStatus,
    failure: Option<FailureKind>,
    current_action: usize,
    /// Every transition published for the job, in order.
    events: Vec<(JobStatus, JobStatus)>,
    /// `(status, current_action)` read back through `status()` while the job ran.
    samples: Vec<(JobStatus, usize)>,
}

async fn run(steps: Vec<Step>, challenge_after: Option<usize>, answer: bool) -> Observed {
    let mut script = StubScript::new();
    if let Some(after) = challenge_after {
        script = script.with_challenge_selector("input[name='otp']", after);
    }
    let manager = TaskManager::new(
        Arc::new(StubDriver::new(script)),
        EngineConfig {
            max_sessions: 1,
            acquire_timeout: Duration::from_secs(5),
            action_timeout: Duration::from_secs(5),
            code_wait_timeout: Duration::from_millis(30),
            shutdown_timeout: Duration::from_secs(1),
        },
    );

    let job = Job::new(steps.iter().map(|s| s.action()).collect());
    let id = job.id;
    let mut events = manager.subscribe();
    let mut watch = manager.subscribe();
    manager.submit(job).unwrap();

    let observer = manager.clone();
    let sampler = tokio::spawn(async move {
        let mut samples = Vec::new();
        loop {
            // sample on every transition and between them
            tokio::select! {
                event = watch.recv() => {
                    if let Ok(event) = event {
                        if answer && event.job_id == id && event.to == JobStatus::AwaitingCode {
                            let _ = observer.provide_code(id, "246810");
                        }
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(1)) => {}
            }
            let job = observer.status(id).unwrap();
            samples.push((job.status, job.current_action));
            if job.is_terminal() {
                break;
            }
        }
        samples
    });

    let done = manager.wait_terminal(id).await.unwrap();
    let samples = sampler.await.unwrap();

    let mut published = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.job_id == id {
            published.push((event.from, event.to));
        }
    }

    Observed {
        status: done.status,
        failure: done.result.and_then(|r| r.failure_kind),
        current_action: done.current_action,
        events: published,
        samples,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn transitions_follow_the_lifecycle(
        steps in prop::collection::vec(step(), 0..6),
        challenge_after in prop::option::of(0usize..4),
        answer in any::<bool>(),
    ) {
        let observed = tokio_test::block_on(run(steps.clone(), challenge_after, answer));
        let triggers = steps.iter().filter(|s| s.triggers()).count();
        let prompted = challenge_after.map_or(false, |after| triggers > after);

        // published transitions chain from Pending through legal edges only
        let mut previous = JobStatus::Pending;
        for (from, to) in &observed.events {
            prop_assert_eq!(*from, previous);
            prop_assert!(from.can_transition_to(*to), "{} -> {} is not a lifecycle edge", from, to);
            previous = *to;
        }
        prop_assert_eq!(previous, observed.status);

        // snapshots never move backwards in status or action index
        for pair in observed.samples.windows(2) {
            let ((before, before_index), (after, after_index)) = (pair[0], pair[1]);
            prop_assert!(
                before == after || reachable(before, after),
                "status went from {} back to {}", before, after
            );
            prop_assert!(after_index >= before_index, "index went from {} to {}", before_index, after_index);
        }

        let suspensions = observed
            .events
            .iter()
            .filter(|(_, to)| *to == JobStatus::AwaitingCode)
            .count();
        prop_assert_eq!(suspensions, usize::from(prompted));
        if prompted && !answer {
            prop_assert_eq!(observed.status, JobStatus::Failed);
            prop_assert_eq!(observed.failure, Some(FailureKind::Timeout));
        } else {
            prop_assert_eq!(observed.status, JobStatus::Completed);
            prop_assert_eq!(observed.current_action, steps.len().saturating_sub(1));
        }
    }
}
