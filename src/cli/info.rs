use anyhow::Result;
use cdp_adapter::detect_chrome_executable;
use handoff_scheduler::metrics;
use humantime::format_duration;

use crate::cli::context::CliContext;

pub async fn cmd_info(ctx: &CliContext) -> Result<()> {
    let config = ctx.config();

    println!("Handoff System Information");
    println!("==========================");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Build Date: {}", env!("BUILD_DATE"));
    println!("Git Commit: {} ({})", env!("GIT_HASH"), env!("GIT_BRANCH"));
    println!();

    println!("Configuration:");
    println!("- File: {}", ctx.config_path().display());
    println!("- Browser Mode: {}", config.browser.mode.as_str());
    println!("- Max Sessions: {}", config.engine.max_sessions);
    println!(
        "- Timeouts → acquire={} action={} code_wait={} shutdown={}",
        format_duration(config.engine.acquire_timeout),
        format_duration(config.engine.action_timeout),
        format_duration(config.engine.code_wait_timeout),
        format_duration(config.engine.shutdown_timeout)
    );
    println!(
        "- Callback Auth: {}",
        if config.notify.basic_auth().is_some() {
            "basic"
        } else {
            "none"
        }
    );
    println!();

    println!("Browser:");
    if !config.browser.executable.trim().is_empty() {
        println!("- Configured Executable: {}", config.browser.executable);
    }
    match detect_chrome_executable() {
        Some(path) => println!("- Detected Chromium: {}", path.display()),
        None => println!("- Detected Chromium: (not found; set HANDOFF_CHROME)"),
    }
    println!(
        "- Headless: {}",
        if config.browser.headless { "yes" } else { "no" }
    );
    println!();

    let counters = metrics::snapshot();
    println!("Session Pool Counters:");
    println!(
        "- acquired={} released={} timed_out={} cancelled={}",
        counters.acquired, counters.released, counters.timed_out, counters.cancelled
    );
    println!(
        "- sessions opened={} failed={} in_use={} peak={}",
        counters.sessions_opened, counters.sessions_failed, counters.in_use, counters.peak_in_use
    );

    Ok(())
}
