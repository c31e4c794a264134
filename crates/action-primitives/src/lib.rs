//! Action translation for the Handoff engine.
//!
//! Turns declarative job actions into executable driver commands:
//! - field validation per action kind
//! - second-factor code placeholder substitution
//! - expansion of `login` into its form steps

pub mod errors;
pub mod login;
mod translate;

pub use errors::*;
pub use translate::*;
