//! Terminal output for the CLI
//!
//! Uses `cliclack` styling in an interactive terminal and falls back to
//! plain prefixed lines in CI and when output is piped.

mod context;
mod output;

pub use context::UiContext;
pub use output::{intro, key_value, remark, step_info, step_ok, step_ok_detail, step_warn_hint};
