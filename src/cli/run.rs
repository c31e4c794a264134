use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use cdp_adapter::{BrowserDriver, ChromiumDriver, StubDriver, StubScript};
use clap::Args;
use handoff_core_types::{Action, ActionKind, Credentials, Job, JobStatus, SecondFactorConfig};
use handoff_kernel::{Notifier, TaskManager};
use serde::Deserialize;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::cli::context::CliContext;

/// Selector the stub page uses for its code prompt.
const STUB_CODE_SELECTOR: &str = "input[name='otp']";

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Job file (YAML or JSON)
    pub job: PathBuf,

    /// Run against the in-memory stub driver instead of chromium
    #[arg(long)]
    pub stub: bool,

    /// Second-factor code to deliver at the first prompt instead of asking on stdin
    #[arg(long, value_name = "CODE")]
    pub code: Option<String>,
}

/// On-disk job description. JSON documents parse as YAML too.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobFile {
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub credentials: Option<Credentials>,
    #[serde(default)]
    pub two_factor_auth: SecondFactorConfig,
    #[serde(default)]
    pub callback_url: Option<String>,
}

impl JobFile {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).context("invalid job document")
    }

    pub fn into_job(self) -> Job {
        let mut job = Job::new(self.actions).with_second_factor(self.two_factor_auth);
        if let Some(credentials) = self.credentials {
            job = job.with_credentials(credentials);
        }
        if let Some(url) = self.callback_url {
            job = job.with_callback(url);
        }
        job
    }
}

/// Stub page for `--stub` runs. When the job expects a second factor the code prompt
/// shows up after its last navigate/click step.
pub fn stub_script(job: &Job) -> StubScript {
    let script = StubScript::new().with_page_text("Handoff stub page");
    if !job.two_factor_auth.expected {
        return script;
    }
    let mut triggers = 0;
    let mut prompt_after = None;
    for action in &job.actions {
        match action.kind {
            ActionKind::Navigate | ActionKind::Click => {
                prompt_after = Some(triggers);
                triggers += 1;
            }
            // the login form ends with a click
            ActionKind::Login => triggers += 1,
            _ => {}
        }
    }
    match prompt_after {
        Some(after) => script.with_challenge_selector(STUB_CODE_SELECTOR, after),
        None => script,
    }
}

pub async fn cmd_run(args: RunArgs, ctx: &CliContext) -> Result<ExitCode> {
    let raw = fs::read_to_string(&args.job)
        .await
        .with_context(|| format!("reading job file {}", args.job.display()))?;
    let job = JobFile::parse(&raw)
        .with_context(|| format!("parsing job file {}", args.job.display()))?
        .into_job();

    let config = ctx.config();
    let driver: Arc<dyn BrowserDriver> = if args.stub || config.browser.mode.is_stub() {
        info!("using the in-memory stub driver");
        Arc::new(StubDriver::new(stub_script(&job)))
    } else {
        Arc::new(ChromiumDriver::new(config.browser.cdp_config()))
    };
    let manager = TaskManager::with_notifier(
        driver,
        config.engine.clone(),
        Notifier::new(config.notify.clone()),
    );

    let mut events = manager.subscribe();
    let id = manager.submit(job)?;
    eprintln!("Submitted job {id}");

    let mut preset = args.code;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let interrupt = signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut listening = true;

    loop {
        let received = tokio::select! {
            signal = &mut interrupt, if listening => {
                listening = false;
                match signal {
                    Ok(()) => {
                        warn!(job_id = %id, "interrupt received, cancelling job");
                        break;
                    }
                    Err(err) => {
                        warn!(?err, "cannot listen for ctrl-c");
                        continue;
                    }
                }
            }
            received = events.recv() => received,
        };

        let status = match received {
            Ok(event) if event.job_id == id => {
                eprintln!(
                    "[{}] {} -> {}",
                    event.at.format("%H:%M:%S"),
                    event.from,
                    event.to
                );
                event.to
            }
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "status stream lagged");
                manager.status(id)?.status
            }
            Err(RecvError::Closed) => break,
        };

        if status.is_terminal() {
            break;
        }
        if status != JobStatus::AwaitingCode {
            continue;
        }

        let code = match preset.take() {
            Some(code) => Some(code),
            None => tokio::select! {
                signal = &mut interrupt, if listening => {
                    listening = false;
                    if signal.is_ok() {
                        warn!(job_id = %id, "interrupt received, cancelling job");
                        break;
                    }
                    None
                }
                code = prompt_code(&mut stdin) => code?,
            },
        };
        match code {
            Some(code) => {
                if let Err(err) = manager.provide_code(id, code) {
                    warn!(job_id = %id, %err, "second-factor code was not delivered");
                }
            }
            None => warn!(job_id = %id, "no code entered; the job will time out"),
        }
    }

    if let Err(err) = manager.shutdown(config.engine.shutdown_timeout).await {
        warn!(%err, "engine did not stop cleanly");
    }

    let finished = manager.status(id)?;
    println!("{}", serde_json::to_string_pretty(&finished)?);
    Ok(if finished.status == JobStatus::Completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Asks for a code on stderr and reads one line from stdin. `None` on EOF or a blank line.
async fn prompt_code(stdin: &mut Lines<BufReader<Stdin>>) -> Result<Option<String>> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(b"Enter second-factor code: ").await?;
    stderr.flush().await?;
    let line = stdin.next_line().await.context("reading code from stdin")?;
    Ok(line
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty()))
}
