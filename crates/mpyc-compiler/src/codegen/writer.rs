//! Indented C source writer

/// Accumulates generated C source with four-space indentation
#[derive(Debug, Default)]
pub struct CodeWriter {
    /// Generated text
    pub(crate) buffer: String,
    indent: usize,
}

impl CodeWriter {
    /// Create a new empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit one line at the current indentation
    pub fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if !text.is_empty() {
            for _ in 0..self.indent {
                self.buffer.push_str("    ");
            }
            self.buffer.push_str(text);
        }
        self.buffer.push('\n');
    }

    /// Emit several lines
    pub fn lines<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            self.line(line);
        }
    }

    pub fn blank(&mut self) {
        self.buffer.push('\n');
    }

    /// Emit `header` and indent what follows (`header` ends with `{`)
    pub fn open(&mut self, header: impl AsRef<str>) {
        self.line(header);
        self.indent += 1;
    }

    /// Dedent and emit `footer`
    pub fn close(&mut self, footer: impl AsRef<str>) {
        self.indent = self.indent.saturating_sub(1);
        self.line(footer);
    }

    pub fn indent(&mut self) {
        self.indent += 1;
    }

    pub fn dedent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    /// Append the contents of another writer at its own indentation
    pub fn append(&mut self, other: CodeWriter) {
        self.buffer.push_str(&other.buffer);
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Consume the writer and return the source text
    pub fn into_string(self) -> String {
        self.buffer
    }
}
