//! User-facing error display
//!
//! Turns a [`ProxyError`] into a short message with a suggestion where one
//! helps.

use colored::Colorize;

use crate::error::ProxyError;

fn with_suggestion(title: &str, detail: &dyn std::fmt::Display, suggestion: &str) -> String {
    format!(
        "{} {}\n  {}\n\n{}\n  {}",
        "✗".red().bold(),
        title,
        detail,
        "Suggestion:".yellow(),
        suggestion
    )
}

/// Format an error for CLI display
#[must_use]
pub fn format_error(error: &ProxyError) -> String {
    match error {
        ProxyError::Configuration { message, key } => with_suggestion(
            "Configuration error",
            message,
            match key.as_deref() {
                Some("header") => "Pass a valid --header name together with --api-key",
                Some("url") => "Use an http:// or https:// URL for the remote server",
                _ => "Run with --help to see all available options",
            },
        ),
        ProxyError::Connection { message } => with_suggestion(
            "Could not connect to the remote server",
            message,
            "Check the URL and try --sse if the server only speaks the legacy SSE transport",
        ),
        ProxyError::Transport(err) if err.is_connection_error() => with_suggestion(
            "Could not connect to the remote server",
            err,
            "Check the URL and try --sse if the server only speaks the legacy SSE transport",
        ),
        ProxyError::Resync { .. } => with_suggestion(
            "Lost track of the remote server",
            error,
            "Restart the proxy, or pass --on-resync-failure degrade to keep serving",
        ),
        ProxyError::Io(err) => with_suggestion(
            "I/O error",
            err,
            "Check file permissions and that the command exists",
        ),
        _ => format!("{} {}", "✗".red().bold(), error),
    }
}

/// Display an error to stderr and return exit code
#[must_use]
pub fn display_error(error: &ProxyError) -> i32 {
    eprintln!("{}", format_error(error));
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityKind;

    #[test]
    fn configuration_errors_get_a_keyed_suggestion() {
        colored::control::set_override(false);
        let error = ProxyError::configuration_with_key("header name missing", "header");
        let formatted = format_error(&error);
        assert!(formatted.contains("Configuration error"));
        assert!(formatted.contains("header name missing"));
        assert!(formatted.contains("--header"));
    }

    #[test]
    fn resync_failures_mention_the_policy_flag() {
        colored::control::set_override(false);
        let error = ProxyError::ConnectionClosed.resync(CapabilityKind::Tools);
        let formatted = format_error(&error);
        assert!(formatted.contains("resynchronizing tools failed"));
        assert!(formatted.contains("--on-resync-failure"));
    }

    #[test]
    fn other_errors_are_a_single_line() {
        colored::control::set_override(false);
        let formatted = format_error(&ProxyError::ConnectionClosed);
        assert_eq!(formatted, "✗ Connection closed");
        assert_eq!(display_error(&ProxyError::Cancelled), 1);
    }
}
