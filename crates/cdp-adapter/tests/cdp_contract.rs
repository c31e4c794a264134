//! Contract tests that drive `ChromiumDriver` against a real Chromium binary. They
//! are ignored by default because they require Chrome/Chromium on the host machine.

use std::env;

use cdp_adapter::{BrowserCommand, BrowserDriver, CdpConfig, ChromiumDriver, CommandOutput};
use handoff_core_types::ContentFormat;

const CHALLENGE_PAGE: &str = "data:text/html,<html><body><p>Enter the code we sent you</p>\
<form><input name='otp' type='text'></form></body></html>";

fn contract_enabled() -> bool {
    env::var("HANDOFF_CDP_CONTRACT")
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn driver() -> (ChromiumDriver, tempfile::TempDir) {
    let profile = tempfile::tempdir().expect("profile dir");
    let cfg = CdpConfig {
        user_data_dir: Some(profile.path().to_path_buf()),
        headless: true,
        ..CdpConfig::default()
    };
    (ChromiumDriver::new(cfg), profile)
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium; set HANDOFF_CDP_CONTRACT=1"]
async fn contract_detects_code_input_and_types() {
    if !contract_enabled() {
        eprintln!("skipping CDP contract test (HANDOFF_CDP_CONTRACT not enabled)");
        return;
    }

    let (driver, _profile) = driver();
    let session = driver.open().await.expect("open session");
    driver
        .run(
            &session,
            &BrowserCommand::Navigate {
                url: CHALLENGE_PAGE.to_string(),
            },
        )
        .await
        .expect("navigate succeeds");

    assert!(driver
        .element_present(&session, "input[name='otp']")
        .await
        .expect("probe succeeds"));
    let text = driver.visible_text(&session).await.expect("text probe");
    assert!(text.to_lowercase().contains("enter the code"));

    driver
        .run(
            &session,
            &BrowserCommand::TypeText {
                selector: "input[name='otp']".to_string(),
                text: "123456".to_string(),
            },
        )
        .await
        .expect("type succeeds");

    driver.close(&session).await.expect("close session");
    driver.shutdown().await;
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium; set HANDOFF_CDP_CONTRACT=1"]
async fn contract_extracts_and_captures() {
    if !contract_enabled() {
        eprintln!("skipping CDP contract test (HANDOFF_CDP_CONTRACT not enabled)");
        return;
    }

    let (driver, _profile) = driver();
    let session = driver.open().await.expect("open session");
    driver
        .run(
            &session,
            &BrowserCommand::Navigate {
                url: CHALLENGE_PAGE.to_string(),
            },
        )
        .await
        .expect("navigate succeeds");

    let extracted = driver
        .run(
            &session,
            &BrowserCommand::ExtractContent {
                selector: "p".to_string(),
                format: ContentFormat::TextContent,
            },
        )
        .await
        .expect("extract succeeds");
    match extracted {
        CommandOutput::Text { text, .. } => assert!(text.contains("Enter the code")),
        other => panic!("unexpected output {other:?}"),
    }

    let shot = driver
        .run(&session, &BrowserCommand::Screenshot { quality: 80 })
        .await
        .expect("screenshot succeeds");
    match shot {
        CommandOutput::Image { mime_type, bytes } => {
            assert_eq!(mime_type, "image/jpeg");
            assert!(!bytes.is_empty());
        }
        other => panic!("unexpected output {other:?}"),
    }

    driver.close(&session).await.expect("close session");
    driver.shutdown().await;
}
