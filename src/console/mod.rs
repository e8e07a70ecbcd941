//! User-facing output sink.
//!
//! Progress lines (pull status, build output, provisioning output, readiness
//! messages, the final report) are written through a [`Console`] handed to the
//! composite and its units, so tests can capture them and the binary can colour
//! them.

use std::io::Write;
use std::sync::Mutex;

/// Visual weight of a console line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Plain,
    Progress,
    Success,
    Waiting,
    Warning,
    Failure,
    Source,
    Report,
}

impl Tone {
    fn ansi(&self) -> &'static str {
        match self {
            Tone::Plain => "",
            Tone::Progress => "\x1b[34m",
            Tone::Success => "\x1b[32m",
            Tone::Waiting => "\x1b[93m",
            Tone::Warning => "\x1b[33m",
            Tone::Failure => "\x1b[31m",
            Tone::Source => "\x1b[35m",
            Tone::Report => "\x1b[36m",
        }
    }
}

pub trait Console: Send + Sync {
    fn emit(&self, tone: Tone, line: &str);

    fn plain(&self, line: &str) {
        self.emit(Tone::Plain, line);
    }

    fn progress(&self, line: &str) {
        self.emit(Tone::Progress, line);
    }

    fn success(&self, line: &str) {
        self.emit(Tone::Success, line);
    }

    fn waiting(&self, line: &str) {
        self.emit(Tone::Waiting, line);
    }

    fn warning(&self, line: &str) {
        self.emit(Tone::Warning, line);
    }

    fn failure(&self, line: &str) {
        self.emit(Tone::Failure, line);
    }
}

/// Writes lines to stdout, coloured unless disabled
#[derive(Debug, Clone)]
pub struct AnsiConsole {
    colored: bool,
}

impl AnsiConsole {
    pub fn new(colored: bool) -> Self {
        Self { colored }
    }
}

impl Default for AnsiConsole {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Console for AnsiConsole {
    fn emit(&self, tone: Tone, line: &str) {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let color = tone.ansi();
        // stdout going away mid-run is not worth failing a deployment over
        let _ = if self.colored && !color.is_empty() {
            writeln!(out, "{}{}\x1b[0m", color, line)
        } else {
            writeln!(out, "{}", line)
        };
    }
}

/// Keeps every line in memory
#[derive(Debug, Default)]
pub struct MemoryConsole {
    lines: Mutex<Vec<(Tone, String)>>,
}

impl MemoryConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(Tone, String)> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    pub fn text(&self) -> Vec<String> {
        self.lines().into_iter().map(|(_, line)| line).collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.text().iter().any(|line| line.contains(needle))
    }
}

impl Console for MemoryConsole {
    fn emit(&self, tone: Tone, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push((tone, line.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_console_keeps_order_and_tone() {
        let console = MemoryConsole::new();
        console.waiting("Waiting...");
        console.success("MySQL 5.7 is running.");

        assert_eq!(
            console.lines(),
            vec![
                (Tone::Waiting, "Waiting...".to_string()),
                (Tone::Success, "MySQL 5.7 is running.".to_string()),
            ]
        );
        assert!(console.contains("5.7"));
    }
}
