// The minimal console/logging contract the core consumes. The real shell,
// prompt UI, and JSON rendering are external collaborators (spec.md §1);
// this module only defines the trait boundary plus enough of an impl to
// make commands testable without a real shell.

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    None = 0,
    Error = 1,
    Warning = 2,
    Info = 3,
    Debug = 4,
    Debug2 = 5,
    Debug3 = 6,
}

/// Opaque console interface. Commands call these to surface progress and
/// prompts; the embedding shell provides the real implementation.
pub trait Console: Send + Sync {
    fn print_info(&self, msg: &str);
    fn print_warning(&self, msg: &str);
    fn print_error(&self, msg: &str);
    fn prompt(&self, msg: &str) -> Option<String>;
    fn confirm(&self, msg: &str, default_yes: bool) -> bool;
    fn select(&self, msg: &str, options: &[String]) -> Option<usize>;
}

/// Routes console output through `tracing`, the way rustydb's bins wire
/// `tracing_subscriber` at startup. Prompts/confirm/select have no
/// interactive backing and resolve to their safest default.
#[derive(Debug, Default)]
pub struct TracingConsole {
    level: AtomicU8,
}

impl TracingConsole {
    pub fn new(level: LogLevel) -> Self {
        Self { level: AtomicU8::new(level as u8) }
    }

    fn enabled(&self, level: LogLevel) -> bool {
        self.level.load(Ordering::Relaxed) >= level as u8
    }
}

impl Console for TracingConsole {
    fn print_info(&self, msg: &str) {
        if self.enabled(LogLevel::Info) {
            tracing::info!(target: "console", "{msg}");
        }
    }

    fn print_warning(&self, msg: &str) {
        if self.enabled(LogLevel::Warning) {
            tracing::warn!(target: "console", "{msg}");
        }
    }

    fn print_error(&self, msg: &str) {
        if self.enabled(LogLevel::Error) {
            tracing::error!(target: "console", "{msg}");
        }
    }

    fn prompt(&self, _msg: &str) -> Option<String> {
        None
    }

    fn confirm(&self, _msg: &str, default_yes: bool) -> bool {
        default_yes
    }

    fn select(&self, _msg: &str, _options: &[String]) -> Option<usize> {
        None
    }
}

/// A console that discards everything; useful in tests that don't care
/// about progress output.
#[derive(Debug, Default)]
pub struct NullConsole;

impl Console for NullConsole {
    fn print_info(&self, _msg: &str) {}
    fn print_warning(&self, _msg: &str) {}
    fn print_error(&self, _msg: &str) {}
    fn prompt(&self, _msg: &str) -> Option<String> {
        None
    }
    fn confirm(&self, _msg: &str, default_yes: bool) -> bool {
        default_yes
    }
    fn select(&self, _msg: &str, _options: &[String]) -> Option<usize> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracing_console_respects_level_gate() {
        let console = TracingConsole::new(LogLevel::Error);
        assert!(console.enabled(LogLevel::Error));
        assert!(!console.enabled(LogLevel::Info));
    }

    #[test]
    fn null_console_confirm_returns_default() {
        let console = NullConsole;
        assert!(console.confirm("proceed?", true));
        assert!(!console.confirm("proceed?", false));
    }
}
