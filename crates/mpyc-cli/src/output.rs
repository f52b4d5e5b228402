//! Colored terminal output for command summaries and diagnostics.
//!
//! `NO_COLOR` disables color regardless of `--color`.

use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Color choice from the `--color` flag and the environment
pub fn resolve_color_choice(flag: Option<&str>) -> ColorChoice {
    if std::env::var_os("NO_COLOR").is_some() {
        return ColorChoice::Never;
    }
    match flag {
        Some("always") => ColorChoice::Always,
        Some("never") => ColorChoice::Never,
        _ => ColorChoice::Auto,
    }
}

/// Write `text` to `stream` in `color`; write errors on a terminal are ignored
fn paint(stream: &mut StandardStream, text: &str, color: Option<Color>, bold: bool) {
    let mut spec = ColorSpec::new();
    spec.set_fg(color).set_bold(bold);
    let _ = stream.set_color(&spec);
    let _ = write!(stream, "{}", text);
    let _ = stream.reset();
}

pub struct StyledOutput {
    stdout: StandardStream,
    stderr: StandardStream,
}

impl StyledOutput {
    pub fn new(choice: ColorChoice) -> Self {
        Self {
            stdout: StandardStream::stdout(choice),
            stderr: StandardStream::stderr(choice),
        }
    }

    pub fn success(&mut self, text: &str) {
        paint(&mut self.stdout, text, Some(Color::Green), true);
    }

    /// File paths and other secondary detail
    pub fn info(&mut self, text: &str) {
        paint(&mut self.stdout, text, Some(Color::Cyan), false);
    }

    pub fn bold(&mut self, text: &str) {
        paint(&mut self.stdout, text, None, true);
    }

    pub fn plain(&mut self, text: &str) {
        let _ = write!(self.stdout, "{}", text);
    }

    pub fn newline(&mut self) {
        let _ = writeln!(self.stdout);
    }

    /// Diagnostic label on stderr
    pub fn stderr_error(&mut self, text: &str) {
        paint(&mut self.stderr, text, Some(Color::Red), true);
    }

    pub fn stderr_plain(&mut self, text: &str) {
        let _ = write!(self.stderr, "{}", text);
    }
}
