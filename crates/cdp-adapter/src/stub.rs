//! In-memory driver for tests and `--stub` runs.
//!
//! A [`StubScript`] decides how the fake page behaves: which selectors fail, whether a
//! second-factor prompt appears and after how many navigations/clicks, and what text
//! the page shows. The driver records every command it receives.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::commands::{BrowserCommand, CommandOutput, ScrollTarget};
use crate::driver::BrowserDriver;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::ids::SessionId;
use crate::registry::SessionRegistry;
use handoff_core_types::ContentFormat;

/// Behaviour of the fake page.
#[derive(Clone, Debug, Default)]
pub struct StubScript {
    pub page_text: String,
    pub challenge_selectors: Vec<String>,
    pub challenge_text: Option<String>,
    /// Navigations/clicks that must happen before the challenge shows up.
    pub challenge_after: usize,
    /// How many times the challenge shows up over a session.
    pub challenge_count: usize,
    pub failing_selectors: HashSet<String>,
    pub content: HashMap<String, String>,
    pub script_results: HashMap<String, Value>,
    pub latency: Duration,
    pub fail_open: bool,
}

impl StubScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_text(mut self, text: impl Into<String>) -> Self {
        self.page_text = text.into();
        self
    }

    /// Shows a code input matching `selector` after `after` navigations/clicks.
    pub fn with_challenge_selector(mut self, selector: impl Into<String>, after: usize) -> Self {
        self.challenge_selectors.push(selector.into());
        self.challenge_after = after;
        self.challenge_count = self.challenge_count.max(1);
        self
    }

    /// Shows `text` on the page after `after` navigations/clicks.
    pub fn with_challenge_text(mut self, text: impl Into<String>, after: usize) -> Self {
        self.challenge_text = Some(text.into());
        self.challenge_after = after;
        self.challenge_count = self.challenge_count.max(1);
        self
    }

    pub fn with_challenge_count(mut self, count: usize) -> Self {
        self.challenge_count = count;
        self
    }

    pub fn with_failing_selector(mut self, selector: impl Into<String>) -> Self {
        self.failing_selectors.insert(selector.into());
        self
    }

    pub fn with_content(mut self, selector: impl Into<String>, text: impl Into<String>) -> Self {
        self.content.insert(selector.into(), text.into());
        self
    }

    pub fn with_script_result(mut self, script: impl Into<String>, value: Value) -> Self {
        self.script_results.insert(script.into(), value);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }
}

#[derive(Clone, Debug, Default)]
struct PageState {
    triggers: usize,
    challenge_active: bool,
    challenges_shown: usize,
}

#[derive(Default)]
struct Stats {
    opened: usize,
    closed: usize,
    peak_open: usize,
    log: Vec<(SessionId, BrowserCommand)>,
    submitted_codes: Vec<String>,
}

pub struct StubDriver {
    script: StubScript,
    sessions: SessionRegistry<()>,
    pages: Mutex<HashMap<SessionId, PageState>>,
    stats: Mutex<Stats>,
}

impl StubDriver {
    pub fn new(script: StubScript) -> Self {
        Self {
            script,
            sessions: SessionRegistry::new(),
            pages: Mutex::new(HashMap::new()),
            stats: Mutex::new(Stats::default()),
        }
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions_opened(&self) -> usize {
        self.stats.lock().opened
    }

    pub fn sessions_closed(&self) -> usize {
        self.stats.lock().closed
    }

    pub fn peak_open_sessions(&self) -> usize {
        self.stats.lock().peak_open
    }

    /// Every leaf command received, in order.
    pub fn commands(&self) -> Vec<(SessionId, BrowserCommand)> {
        self.stats.lock().log.clone()
    }

    pub fn command_names(&self) -> Vec<&'static str> {
        self.stats
            .lock()
            .log
            .iter()
            .map(|(_, cmd)| cmd.name())
            .collect()
    }

    /// Text typed into a field while a challenge was showing.
    pub fn submitted_codes(&self) -> Vec<String> {
        self.stats.lock().submitted_codes.clone()
    }

    pub fn typed_values(&self) -> Vec<String> {
        self.stats
            .lock()
            .log
            .iter()
            .filter_map(|(_, cmd)| match cmd {
                BrowserCommand::TypeText { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn check_selector(&self, selector: &str) -> Result<(), AdapterError> {
        if self.script.failing_selectors.contains(selector) {
            return Err(
                AdapterError::new(AdapterErrorKind::TargetNotFound).with_hint(selector.to_string())
            );
        }
        Ok(())
    }

    fn apply(
        &self,
        session: &SessionId,
        command: &BrowserCommand,
    ) -> Result<CommandOutput, AdapterError> {
        if let BrowserCommand::Sequence(steps) = command {
            let mut last = CommandOutput::None;
            for step in steps {
                last = self.apply(session, step)?;
            }
            return Ok(last);
        }

        self.stats.lock().log.push((*session, command.clone()));

        let mut pages = self.pages.lock();
        let page = pages.get_mut(session).ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::SessionNotFound).with_hint(session.to_string())
        })?;

        match command {
            BrowserCommand::Navigate { .. } => {
                self.register_trigger(page);
                Ok(CommandOutput::None)
            }
            BrowserCommand::Click { selector } => {
                self.check_selector(selector)?;
                // a click on a showing prompt confirms it
                if page.challenge_active {
                    page.challenge_active = false;
                } else {
                    self.register_trigger(page);
                }
                Ok(CommandOutput::None)
            }
            BrowserCommand::TypeText { selector, text } => {
                self.check_selector(selector)?;
                if page.challenge_active {
                    self.stats.lock().submitted_codes.push(text.clone());
                }
                Ok(CommandOutput::None)
            }
            BrowserCommand::Submit { selector } => {
                self.check_selector(selector)?;
                page.challenge_active = false;
                Ok(CommandOutput::None)
            }
            BrowserCommand::WaitVisible { selector }
            | BrowserCommand::WaitHidden { selector }
            | BrowserCommand::Clear { selector }
            | BrowserCommand::SelectOption { selector, .. } => {
                self.check_selector(selector)?;
                Ok(CommandOutput::None)
            }
            BrowserCommand::Scroll(ScrollTarget::Element(selector)) => {
                self.check_selector(selector)?;
                Ok(CommandOutput::None)
            }
            BrowserCommand::Scroll(_) | BrowserCommand::Sleep { .. } => Ok(CommandOutput::None),
            BrowserCommand::Screenshot { .. } => Ok(CommandOutput::Image {
                mime_type: "image/jpeg",
                bytes: b"stub-jpeg".to_vec(),
            }),
            BrowserCommand::ExtractContent { selector, format } => {
                self.check_selector(selector)?;
                let text = self.script.content.get(selector).cloned().unwrap_or_else(|| {
                    match format {
                        ContentFormat::TextContent => self.page_text(page),
                        _ => format!("<{selector}>{}</{selector}>", self.page_text(page)),
                    }
                });
                Ok(CommandOutput::Text {
                    mime_type: format.mime_type(),
                    text,
                })
            }
            BrowserCommand::RunScript { script } => Ok(CommandOutput::Json(
                self.script
                    .script_results
                    .get(script)
                    .cloned()
                    .unwrap_or(Value::Null),
            )),
            BrowserCommand::Sequence(_) => Ok(CommandOutput::None),
        }
    }

    fn register_trigger(&self, page: &mut PageState) {
        page.triggers += 1;
        let armed = !self.script.challenge_selectors.is_empty() || self.script.challenge_text.is_some();
        if armed
            && !page.challenge_active
            && page.challenges_shown < self.script.challenge_count
            && page.triggers > self.script.challenge_after
        {
            page.challenge_active = true;
            page.challenges_shown += 1;
        }
    }

    fn page_text(&self, page: &PageState) -> String {
        match (&self.script.challenge_text, page.challenge_active) {
            (Some(text), true) => text.clone(),
            _ => self.script.page_text.clone(),
        }
    }
}

impl Default for StubDriver {
    fn default() -> Self {
        Self::new(StubScript::default())
    }
}

#[async_trait]
impl BrowserDriver for StubDriver {
    async fn open(&self) -> Result<SessionId, AdapterError> {
        if self.script.fail_open {
            return Err(AdapterError::new(AdapterErrorKind::LaunchFailed)
                .with_hint("stub configured to refuse sessions"));
        }
        let session = SessionId::new();
        self.sessions.insert(session, ());
        self.pages.lock().insert(session, PageState::default());
        let mut stats = self.stats.lock();
        stats.opened += 1;
        stats.peak_open = stats.peak_open.max(self.sessions.len());
        Ok(session)
    }

    async fn run(
        &self,
        session: &SessionId,
        command: &BrowserCommand,
    ) -> Result<CommandOutput, AdapterError> {
        if !self.script.latency.is_zero() {
            tokio::time::sleep(self.script.latency).await;
        }
        self.apply(session, command)
    }

    async fn close(&self, session: &SessionId) -> Result<(), AdapterError> {
        if self.sessions.remove(session).is_some() {
            self.pages.lock().remove(session);
            self.stats.lock().closed += 1;
        }
        Ok(())
    }

    async fn element_present(
        &self,
        session: &SessionId,
        selector: &str,
    ) -> Result<bool, AdapterError> {
        let pages = self.pages.lock();
        let page = pages.get(session).ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::SessionNotFound).with_hint(session.to_string())
        })?;
        Ok(page.challenge_active
            && self
                .script
                .challenge_selectors
                .iter()
                .any(|candidate| candidate == selector))
    }

    async fn visible_text(&self, session: &SessionId) -> Result<String, AdapterError> {
        let pages = self.pages.lock();
        let page = pages.get(session).ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::SessionNotFound).with_hint(session.to_string())
        })?;
        Ok(self.page_text(page))
    }

    async fn shutdown(&self) {
        let drained = self.sessions.drain().len();
        self.pages.lock().clear();
        self.stats.lock().closed += drained;
    }
}
