//! Chromium driver built on chromiumoxide.
//!
//! One browser process is launched lazily on the first `open` and shared by every
//! session; each session gets its own page. Element interactions poll the DOM through
//! `Runtime.evaluate` until the configured deadline.

use std::fs;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::commands::{BrowserCommand, CommandOutput, ScrollTarget};
use crate::config::CdpConfig;
use crate::driver::BrowserDriver;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::ids::SessionId;
use crate::registry::SessionRegistry;
use handoff_core_types::ContentFormat;

struct BrowserHandle {
    browser: Mutex<Browser>,
    handler_task: JoinHandle<()>,
}

pub struct ChromiumDriver {
    cfg: CdpConfig,
    browser: OnceCell<BrowserHandle>,
    sessions: SessionRegistry<Page>,
}

impl ChromiumDriver {
    pub fn new(cfg: CdpConfig) -> Self {
        Self {
            cfg,
            browser: OnceCell::new(),
            sessions: SessionRegistry::new(),
        }
    }

    fn deadline(&self) -> Duration {
        Duration::from_millis(self.cfg.default_deadline_ms)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.cfg.poll_interval_ms.max(10))
    }

    async fn browser(&self) -> Result<&BrowserHandle, AdapterError> {
        self.browser
            .get_or_try_init(|| async { launch(&self.cfg).await })
            .await
    }

    fn page(&self, session: &SessionId) -> Result<Page, AdapterError> {
        self.sessions.handle(session).ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::SessionNotFound).with_hint(session.to_string())
        })
    }

    fn exec<'a>(
        &'a self,
        session: &'a SessionId,
        page: &'a Page,
        command: &'a BrowserCommand,
    ) -> BoxFuture<'a, Result<CommandOutput, AdapterError>> {
        async move {
            match command {
                BrowserCommand::Navigate { url } => {
                    match tokio::time::timeout(self.deadline(), page.goto(url.as_str())).await {
                        Ok(Ok(_)) => Ok(CommandOutput::None),
                        Ok(Err(err)) => Err(AdapterError::new(AdapterErrorKind::CdpIo)
                            .with_hint(format!("navigate to {url} failed: {err}"))),
                        Err(_) => Err(AdapterError::new(AdapterErrorKind::NavTimeout)
                            .with_hint(format!("navigate to {url} timed out"))),
                    }
                }
                BrowserCommand::WaitVisible { selector } => {
                    self.wait_for(page, selector, true).await?;
                    Ok(CommandOutput::None)
                }
                BrowserCommand::WaitHidden { selector } => {
                    self.wait_for(page, selector, false).await?;
                    Ok(CommandOutput::None)
                }
                BrowserCommand::Sleep { duration } => {
                    tokio::time::sleep(*duration).await;
                    Ok(CommandOutput::None)
                }
                BrowserCommand::Click { selector } => {
                    self.wait_for(page, selector, true).await?;
                    let element = page.find_element(selector.as_str()).await.map_err(|err| {
                        AdapterError::new(AdapterErrorKind::TargetNotFound)
                            .with_hint(format!("{selector}: {err}"))
                    })?;
                    element.click().await.map_err(|err| {
                        AdapterError::new(AdapterErrorKind::CdpIo)
                            .with_hint(format!("click {selector} failed: {err}"))
                    })?;
                    Ok(CommandOutput::None)
                }
                BrowserCommand::TypeText { selector, text } => {
                    self.wait_for(page, selector, true).await?;
                    let element = page.find_element(selector.as_str()).await.map_err(|err| {
                        AdapterError::new(AdapterErrorKind::TargetNotFound)
                            .with_hint(format!("{selector}: {err}"))
                    })?;
                    element
                        .click()
                        .await
                        .map_err(|err| {
                            AdapterError::new(AdapterErrorKind::CdpIo)
                                .with_hint(format!("focus {selector} failed: {err}"))
                        })?
                        .type_str(text.as_str())
                        .await
                        .map_err(|err| {
                            AdapterError::new(AdapterErrorKind::CdpIo)
                                .with_hint(format!("typing into {selector} failed: {err}"))
                        })?;
                    Ok(CommandOutput::None)
                }
                BrowserCommand::Clear { selector } => {
                    let found = self.eval_bool(page, &clear_script(selector)?).await?;
                    require_found(found, selector)?;
                    Ok(CommandOutput::None)
                }
                BrowserCommand::Submit { selector } => {
                    let found = self.eval_bool(page, &submit_script(selector)?).await?;
                    require_found(found, selector)?;
                    Ok(CommandOutput::None)
                }
                BrowserCommand::SelectOption { selector, value } => {
                    self.wait_for(page, selector, true).await?;
                    let outcome = self.eval(page, &select_script(selector, value)?).await?;
                    match outcome.as_str() {
                        Some("ok") => Ok(CommandOutput::None),
                        Some("no-option") => Err(AdapterError::new(
                            AdapterErrorKind::OptionNotFound,
                        )
                        .with_hint(format!("{selector} has no option {value}"))),
                        _ => Err(AdapterError::new(AdapterErrorKind::TargetNotFound)
                            .with_hint(selector.clone())),
                    }
                }
                BrowserCommand::Scroll(target) => {
                    let found = self.eval_bool(page, &scroll_script(target)?).await?;
                    if let ScrollTarget::Element(selector) = target {
                        require_found(found, selector)?;
                    }
                    Ok(CommandOutput::None)
                }
                BrowserCommand::Screenshot { quality } => {
                    let params = ScreenshotParams::builder()
                        .format(CaptureScreenshotFormat::Jpeg)
                        .quality(i64::from(*quality))
                        .full_page(true)
                        .build();
                    let bytes = page.screenshot(params).await.map_err(|err| {
                        AdapterError::new(AdapterErrorKind::CdpIo)
                            .with_hint(format!("screenshot failed: {err}"))
                    })?;
                    Ok(CommandOutput::Image {
                        mime_type: "image/jpeg",
                        bytes,
                    })
                }
                BrowserCommand::ExtractContent { selector, format } => {
                    let value = self.eval(page, &extract_script(selector, *format)?).await?;
                    let Some(raw) = value.as_str() else {
                        return Err(AdapterError::new(AdapterErrorKind::TargetNotFound)
                            .with_hint(selector.clone()));
                    };
                    let text = match format {
                        ContentFormat::SimplifiedHtml => simplify_html(raw),
                        _ => raw.to_string(),
                    };
                    Ok(CommandOutput::Text {
                        mime_type: format.mime_type(),
                        text,
                    })
                }
                BrowserCommand::RunScript { script } => {
                    let result = page.evaluate(script.as_str()).await.map_err(|err| {
                        AdapterError::new(AdapterErrorKind::ScriptFailed).with_hint(err.to_string())
                    })?;
                    Ok(CommandOutput::Json(
                        result.value().cloned().unwrap_or(Value::Null),
                    ))
                }
                BrowserCommand::Sequence(steps) => {
                    let mut last = CommandOutput::None;
                    for step in steps {
                        last = self.exec(session, page, step).await?;
                    }
                    Ok(last)
                }
            }
        }
        .boxed()
    }

    async fn eval(&self, page: &Page, script: &str) -> Result<Value, AdapterError> {
        let result = page.evaluate(script).await.map_err(|err| {
            AdapterError::new(AdapterErrorKind::CdpIo).with_hint(format!("evaluate failed: {err}"))
        })?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn eval_bool(&self, page: &Page, script: &str) -> Result<bool, AdapterError> {
        Ok(self.eval(page, script).await?.as_bool().unwrap_or(false))
    }

    async fn wait_for(&self, page: &Page, selector: &str, visible: bool) -> Result<(), AdapterError> {
        let script = visibility_script(selector)?;
        let started = Instant::now();
        loop {
            if self.eval_bool(page, &script).await? == visible {
                return Ok(());
            }
            if started.elapsed() >= self.deadline() {
                let state = if visible { "visible" } else { "hidden" };
                return Err(AdapterError::new(AdapterErrorKind::WaitTimeout)
                    .with_hint(format!(
                        "{selector} did not become {state} within {}ms",
                        started.elapsed().as_millis()
                    )));
            }
            tokio::time::sleep(self.poll_interval()).await;
        }
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn open(&self) -> Result<SessionId, AdapterError> {
        let handle = self.browser().await?;
        let page = {
            let browser = handle.browser.lock().await;
            browser.new_page("about:blank").await.map_err(|err| {
                AdapterError::new(AdapterErrorKind::CdpIo)
                    .with_hint(format!("failed to open page: {err}"))
            })?
        };
        let session = SessionId::new();
        self.sessions.insert(session, page);
        debug!(target: "cdp-adapter", %session, "session opened");
        Ok(session)
    }

    async fn run(
        &self,
        session: &SessionId,
        command: &BrowserCommand,
    ) -> Result<CommandOutput, AdapterError> {
        let page = self.page(session)?;
        debug!(target: "cdp-adapter", %session, command = command.name(), "running command");
        self.exec(session, &page, command).await
    }

    async fn close(&self, session: &SessionId) -> Result<(), AdapterError> {
        let Some(page) = self.sessions.remove(session) else {
            return Ok(());
        };
        page.close().await.map_err(|err| {
            AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("failed to close page: {err}"))
        })?;
        debug!(target: "cdp-adapter", %session, "session closed");
        Ok(())
    }

    async fn element_present(
        &self,
        session: &SessionId,
        selector: &str,
    ) -> Result<bool, AdapterError> {
        let page = self.page(session)?;
        let literal = js_literal(selector)?;
        self.eval_bool(&page, &format!("document.querySelector({literal}) !== null"))
            .await
    }

    async fn visible_text(&self, session: &SessionId) -> Result<String, AdapterError> {
        let page = self.page(session)?;
        let value = self
            .eval(&page, "document.body ? document.body.innerText : ''")
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn shutdown(&self) {
        for page in self.sessions.drain() {
            if let Err(err) = page.close().await {
                debug!(target: "cdp-adapter", ?err, "page close during shutdown failed");
            }
        }
        if let Some(handle) = self.browser.get() {
            let mut browser = handle.browser.lock().await;
            if let Err(err) = browser.close().await {
                warn!(target: "cdp-adapter", ?err, "browser close failed");
            }
            let _ = browser.wait().await;
            handle.handler_task.abort();
            info!(target: "cdp-adapter", "chromium stopped");
        }
    }
}

async fn launch(cfg: &CdpConfig) -> Result<BrowserHandle, AdapterError> {
    let config = browser_config(cfg)?;
    let (browser, mut handler) = Browser::launch(config).await.map_err(|err| {
        AdapterError::new(AdapterErrorKind::LaunchFailed).with_hint(err.to_string())
    })?;
    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(err) = event {
                debug!(target: "cdp-adapter", ?err, "handler event error");
            }
        }
    });
    info!(
        target: "cdp-adapter",
        executable = %cfg.executable.display(),
        headless = cfg.headless,
        "chromium launched"
    );
    Ok(BrowserHandle {
        browser: Mutex::new(browser),
        handler_task,
    })
}

fn browser_config(cfg: &CdpConfig) -> Result<BrowserConfig, AdapterError> {
    if cfg.executable.as_os_str().is_empty() || !cfg.executable.exists() {
        return Err(AdapterError::new(AdapterErrorKind::LaunchFailed)
            .with_hint(format!(
                "chrome executable not found at {}; set HANDOFF_CHROME to the full path of chrome/chromium",
                cfg.executable.display()
            )));
    }

    let mut builder = BrowserConfig::builder()
        .chrome_executable(cfg.executable.clone())
        .request_timeout(Duration::from_millis(cfg.default_deadline_ms))
        .launch_timeout(Duration::from_millis(cfg.launch_timeout_ms));

    if !cfg.headless {
        builder = builder.with_head();
    }

    if std::env::var("HANDOFF_DISABLE_SANDBOX")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
    {
        builder = builder.no_sandbox();
    }

    if let Some(dir) = &cfg.user_data_dir {
        fs::create_dir_all(dir).map_err(|err| {
            AdapterError::new(AdapterErrorKind::Internal)
                .with_hint(format!("failed to ensure user-data-dir: {err}"))
        })?;
        builder = builder.user_data_dir(dir.clone());
    }

    builder.build().map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal).with_hint(format!("browser config error: {err}"))
    })
}

fn require_found(found: bool, selector: &str) -> Result<(), AdapterError> {
    if found {
        Ok(())
    } else {
        Err(AdapterError::new(AdapterErrorKind::TargetNotFound).with_hint(selector.to_string()))
    }
}

fn js_literal(value: &str) -> Result<String, AdapterError> {
    serde_json::to_string(value).map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal)
            .with_hint(format!("failed to encode script literal: {err}"))
    })
}

fn visibility_script(selector: &str) -> Result<String, AdapterError> {
    let sel = js_literal(selector)?;
    Ok(format!(
        r#"(() => {{
            const el = document.querySelector({sel});
            if (!el) return false;
            const style = window.getComputedStyle(el);
            if (style.display === 'none' || style.visibility === 'hidden') return false;
            const rect = el.getBoundingClientRect();
            return rect.width > 0 || rect.height > 0;
        }})()"#
    ))
}

fn clear_script(selector: &str) -> Result<String, AdapterError> {
    let sel = js_literal(selector)?;
    Ok(format!(
        r#"(() => {{
            const el = document.querySelector({sel});
            if (!el) return false;
            if ('value' in el) el.value = '';
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            return true;
        }})()"#
    ))
}

fn submit_script(selector: &str) -> Result<String, AdapterError> {
    let sel = js_literal(selector)?;
    Ok(format!(
        r#"(() => {{
            const el = document.querySelector({sel});
            if (!el) return false;
            const form = el.form || el.closest('form');
            if (form) {{
                if (typeof form.requestSubmit === 'function') form.requestSubmit();
                else form.submit();
            }} else {{
                el.click();
            }}
            return true;
        }})()"#
    ))
}

fn select_script(selector: &str, value: &str) -> Result<String, AdapterError> {
    let sel = js_literal(selector)?;
    let val = js_literal(value)?;
    Ok(format!(
        r#"(() => {{
            const el = document.querySelector({sel});
            if (!el) return 'missing';
            const options = Array.from(el.options || []);
            if (!options.some((opt) => opt.value === {val})) return 'no-option';
            el.value = {val};
            el.dispatchEvent(new Event('change', {{ bubbles: true }}));
            return 'ok';
        }})()"#
    ))
}

fn scroll_script(target: &ScrollTarget) -> Result<String, AdapterError> {
    Ok(match target {
        ScrollTarget::Top => "(() => { window.scrollTo(0, 0); return true; })()".to_string(),
        ScrollTarget::Bottom => {
            "(() => { window.scrollTo(0, document.body.scrollHeight); return true; })()"
                .to_string()
        }
        ScrollTarget::Element(selector) => {
            let sel = js_literal(selector)?;
            format!(
                r#"(() => {{
                    const el = document.querySelector({sel});
                    if (!el) return false;
                    el.scrollIntoView({{ block: 'center' }});
                    return true;
                }})()"#
            )
        }
    })
}

fn extract_script(selector: &str, format: ContentFormat) -> Result<String, AdapterError> {
    let sel = js_literal(selector)?;
    let accessor = match format {
        ContentFormat::TextContent => "el.innerText",
        ContentFormat::FullHtml | ContentFormat::SimplifiedHtml => "el.outerHTML",
    };
    Ok(format!(
        r#"(() => {{
            const el = document.querySelector({sel});
            return el ? {accessor} : null;
        }})()"#
    ))
}

static NOISE_BLOCKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style|noscript|svg|iframe)\b[^>]*>.*?</(script|style|noscript|svg|iframe)>")
        .expect("noise block regex")
});
static COMMENTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment regex"));
static NOISY_ATTRS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\s(?:style|class|on[a-z]+|data-[a-z0-9_-]+)\s*=\s*(?:"[^"]*"|'[^']*')"#)
        .expect("attribute regex")
});
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").expect("whitespace regex"));

/// Strips scripts, styles, comments and presentational attributes from markup.
pub fn simplify_html(html: &str) -> String {
    let stripped = NOISE_BLOCKS.replace_all(html, "");
    let stripped = COMMENTS.replace_all(&stripped, "");
    let stripped = NOISY_ATTRS.replace_all(&stripped, "");
    WHITESPACE.replace_all(&stripped, " ").trim().to_string()
}
