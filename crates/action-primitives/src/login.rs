//! Expansion of the `login` action into concrete form steps.

use cdp_adapter::BrowserCommand;
use handoff_core_types::Credentials;

pub const USERNAME_SELECTOR: &str = "#username";
pub const PASSWORD_SELECTOR: &str = "#password";
pub const SUBMIT_SELECTOR: &str = "button[type='submit'], input[type='submit']";

/// Six steps: wait/type the username, wait/type the password, wait for and click submit.
pub fn login_sequence(credentials: &Credentials) -> BrowserCommand {
    BrowserCommand::Sequence(vec![
        BrowserCommand::WaitVisible {
            selector: USERNAME_SELECTOR.to_string(),
        },
        BrowserCommand::TypeText {
            selector: USERNAME_SELECTOR.to_string(),
            text: credentials.username.clone(),
        },
        BrowserCommand::WaitVisible {
            selector: PASSWORD_SELECTOR.to_string(),
        },
        BrowserCommand::TypeText {
            selector: PASSWORD_SELECTOR.to_string(),
            text: credentials.password.clone(),
        },
        BrowserCommand::WaitVisible {
            selector: SUBMIT_SELECTOR.to_string(),
        },
        BrowserCommand::Click {
            selector: SUBMIT_SELECTOR.to_string(),
        },
    ])
}
