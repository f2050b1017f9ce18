//! Diagnostic sink: verbosity-leveled merge messages.
//!
//! Purely observational; nothing here changes a merge outcome. Messages are
//! indented two spaces per recursion depth. Depending on `buffer_output`
//! they are printed immediately (0), buffered and flushed when the merge
//! finishes (1), or retained for the caller (2).

use std::fmt::Write as _;

pub(crate) struct DiagnosticSink {
    verbosity: u8,
    buffer_output: u8,
    buf: String,
}

impl DiagnosticSink {
    pub fn new(verbosity: u8, buffer_output: u8) -> Self {
        Self {
            verbosity,
            buffer_output,
            buf: String::new(),
        }
    }

    /// Whether a message at `level` would be shown at `depth`. Inner
    /// (recursive) merges stay quiet unless verbosity is cranked to 5.
    pub fn shows(&self, depth: usize, level: u8) -> bool {
        (depth == 0 && self.verbosity >= level) || self.verbosity >= 5
    }

    /// Emit one message line.
    pub fn note(&mut self, depth: usize, level: u8, message: &str) {
        if !self.shows(depth, level) {
            return;
        }
        for _ in 0..depth * 2 {
            self.buf.push(' ');
        }
        let _ = writeln!(self.buf, "{}", message);
        if self.buffer_output == 0 {
            self.flush();
        }
    }

    /// Print and drop buffered messages unless the caller keeps them.
    pub fn flush(&mut self) {
        if self.buffer_output < 2 && !self.buf.is_empty() {
            print!("{}", self.buf);
            self.buf.clear();
        }
    }

    /// Hand the retained buffer to the caller (empty unless
    /// `buffer_output == 2`).
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.buf)
    }
}
