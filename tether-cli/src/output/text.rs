//! Text output formatting with colors.

use chrono::{DateTime, Local, Utc};
use tether_connectors::{CheckStatus, ConnectorDescriptor, ParamSpec};
use tether_core::LifecycleState;
use tether_session::SessionStats;

// ============================================================================
// ANSI Colors
// ============================================================================

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";

/// Text formatter with optional colors.
pub struct TextFormatter {
    use_colors: bool,
}

impl TextFormatter {
    /// Creates a new text formatter.
    pub fn new(use_colors: bool) -> Self {
        Self { use_colors }
    }

    /// Formats the outcome of a check: `archive  ✓ Connection working`.
    pub fn format_check(&self, label: &str, status: &CheckStatus) -> String {
        let line = format!("{:<15} {}", self.bold(label), self.format_status(status));
        match status {
            CheckStatus::TemporarilyFailed { retry_after, .. } => format!(
                "{line}\n{:<15} {}",
                "",
                self.dim(&format!("Retry after {}", format_time(*retry_after)))
            ),
            _ => line,
        }
    }

    /// Formats a status with its marker.
    pub fn format_status(&self, status: &CheckStatus) -> String {
        let text = status.to_string();
        match status {
            CheckStatus::Working => format!("{} {text}", self.green("✓")),
            CheckStatus::TemporarilyFailed { .. } => format!("{} {}", self.yellow("⚠"), self.yellow(&text)),
            CheckStatus::Failed { .. } => format!("{} {}", self.red("✗"), self.red(&text)),
            CheckStatus::Cancelled => format!("{} {}", self.dim("−"), self.dim(&text)),
        }
    }

    /// Formats the watch mode header.
    pub fn format_watch_header(&self, now: DateTime<Local>, interval_secs: u64) -> String {
        format!(
            "{} - {} (refresh: {interval_secs}s)\n{}",
            self.bold("Tether Watch Mode"),
            now.format("%H:%M:%S"),
            "─".repeat(50)
        )
    }

    /// Formats one row of the watch table.
    pub fn format_watch_line(&self, label: &str, state: LifecycleState, status: &CheckStatus) -> String {
        format!(
            "{:<15} {:<12} {}",
            label,
            self.cyan(state.label()),
            self.format_status(status)
        )
    }

    /// Formats the result of a sample fetch.
    pub fn format_sample(&self, label: &str, bin: &str, bytes: u64, stats: &SessionStats) -> String {
        [
            format!("{} {}", self.bold(label), self.dim(&format!("({bin})"))),
            format!("Read:     {}", self.green(&format_bytes(bytes))),
            format!(
                "Sessions: {} created, {} workers",
                stats.sessions_created, stats.workers_spawned
            ),
        ]
        .join("\n")
    }

    /// Formats connector list header.
    pub fn format_connectors_header(&self) -> String {
        format!(
            "{:<15} {:<10} {:<12} {}",
            self.bold("Connector"),
            self.bold("CLI"),
            self.bold("Aliases"),
            self.bold("Description")
        )
    }

    /// Formats a single connector line.
    pub fn format_connector_line(&self, desc: &ConnectorDescriptor) -> String {
        let aliases = if desc.cli.aliases.is_empty() {
            "−".to_string()
        } else {
            desc.cli.aliases.join(",")
        };
        format!(
            "{:<15} {:<10} {:<12} {}",
            desc.display_name(),
            desc.cli_name(),
            aliases,
            desc.description
        )
    }

    /// Formats a parameter line for the connector list.
    pub fn format_param_line(&self, param: &ParamSpec) -> String {
        let mut flags = Vec::new();
        if param.required {
            flags.push(self.yellow("required"));
        }
        if param.secret {
            flags.push(self.dim("secret"));
        }
        if let Some(default) = param.default {
            flags.push(self.dim(&format!("default: {default}")));
        }

        let mut line = format!("  {:<14} {}", param.name, param.description);
        if !flags.is_empty() {
            line.push_str(&format!(" ({})", flags.join(", ")));
        }
        line
    }

    /// Formats an error message.
    pub fn format_error(&self, label: &str, error: &str) -> String {
        format!("{}: {} - {}", self.bold(label), self.red("Error"), error)
    }

    // ========================================================================
    // Color/style helpers
    // ========================================================================

    fn paint(&self, color: &str, text: &str) -> String {
        if self.use_colors {
            format!("{color}{text}{RESET}")
        } else {
            text.to_string()
        }
    }

    fn bold(&self, text: &str) -> String {
        self.paint(BOLD, text)
    }

    fn dim(&self, text: &str) -> String {
        self.paint(DIM, text)
    }

    fn green(&self, text: &str) -> String {
        self.paint(GREEN, text)
    }

    fn yellow(&self, text: &str) -> String {
        self.paint(YELLOW, text)
    }

    fn red(&self, text: &str) -> String {
        self.paint(RED, text)
    }

    fn cyan(&self, text: &str) -> String {
        self.paint(CYAN, text)
    }
}

/// Formats a timestamp in local time.
fn format_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M:%S").to_string()
}

#[allow(clippy::cast_precision_loss)]
pub(super) fn format_bytes(n: u64) -> String {
    if n >= 1024 * 1024 {
        format!("{:.1} MiB", n as f64 / (1024.0 * 1024.0))
    } else if n >= 1024 {
        format!("{:.1} KiB", n as f64 / 1024.0)
    } else {
        format!("{n} bytes")
    }
}
