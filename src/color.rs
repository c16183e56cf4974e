//! Terminal colouring for echoed commands and error text.
//!
//! Stateless: every function maps its input to a decorated string.

use crate::celery::CeleryScript;
use serde_json::Value;

pub const RED: &str = "\x1b[31m";
pub const GREEN: &str = "\x1b[32m";
pub const BLUE: &str = "\x1b[34m";
pub const MAGENTA: &str = "\x1b[35m";
pub const CYAN: &str = "\x1b[36m";
pub const BOLD: &str = "\x1b[1m";
pub const RESET: &str = "\x1b[0m";

/// Render a node as `{'kind': .., 'args': .., 'body': ..}` with the kind in
/// magenta, args in cyan, and body (when present) in blue.
#[must_use]
pub fn colorize_celery_script(script: &CeleryScript) -> String {
    let args = Value::Object(script.args.clone());
    let body = script.body.as_ref().map_or_else(String::new, |body| {
        let body = Value::Array(body.iter().map(CeleryScript::to_value).collect());
        format!(", 'body': {BLUE}{body}{RESET}")
    });
    format!(
        "{{'kind': '{MAGENTA}{kind}{RESET}', 'args': {CYAN}{args}{RESET}{body}}}",
        kind = script.kind
    )
}

/// Red text.
#[must_use]
pub fn error(text: &str) -> String {
    format!("{RED}{text}{RESET}")
}

/// Bold text.
#[must_use]
pub fn bold(text: &str) -> String {
    format!("{BOLD}{text}{RESET}")
}

/// Colour an HTTP status: 2xx green, 4xx red, anything else bold.
#[must_use]
pub fn colorize_response_code(status: u16) -> String {
    let color = match status {
        200..=299 => GREEN,
        400..=499 => RED,
        _ => BOLD,
    };
    format!("{color}{status}{RESET}")
}
