//! Print output plumbing for the `IO` effect.
//!
//! Implement [`PrintWriter`] to capture or redirect output from sandboxed
//! programs. The default [`StdPrint`] buffers to a thread-local and flushes
//! on drop, so error output (which goes straight to stderr) is never
//! interleaved mid-line with buffered stdout.

use std::{
    borrow::Cow,
    cell::RefCell,
    io::{self, Write as _},
};

use crate::diagnostics::Diagnostic;

/// Sink for the `print`/`println` effect operations.
pub trait PrintWriter {
    /// Writes one chunk of output, without adding any terminator.
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), Diagnostic>;

    /// Writes a single terminator character (usually `\n`).
    fn stdout_push(&mut self, end: char) -> Result<(), Diagnostic>;
}

thread_local! {
    /// Thread-local stdout buffer for [`StdPrint`].
    static STDOUT_BUFFER: RefCell<String> = const { RefCell::new(String::new()) };
}

/// Default writer: buffered stdout, flushed when the writer drops.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), Diagnostic> {
        STDOUT_BUFFER.with(|buffer| buffer.borrow_mut().push_str(&output));
        Ok(())
    }

    fn stdout_push(&mut self, end: char) -> Result<(), Diagnostic> {
        STDOUT_BUFFER.with(|buffer| buffer.borrow_mut().push(end));
        Ok(())
    }
}

impl Drop for StdPrint {
    fn drop(&mut self) {
        STDOUT_BUFFER.with(|buffer| {
            let mut buffer = buffer.borrow_mut();
            if buffer.is_empty() {
                return;
            }
            let _ = io::stdout().write_all(buffer.as_bytes());
            let _ = io::stdout().flush();
            buffer.clear();
        });
    }
}

/// Collects all output into a string. Useful for tests and embedding.
#[derive(Debug, Default)]
pub struct CollectStringPrint(String);

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self(String::new())
    }

    #[must_use]
    pub fn output(&self) -> &str {
        self.0.as_str()
    }

    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl PrintWriter for CollectStringPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), Diagnostic> {
        self.0.push_str(&output);
        Ok(())
    }

    fn stdout_push(&mut self, end: char) -> Result<(), Diagnostic> {
        self.0.push(end);
        Ok(())
    }
}

/// Discards all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn stdout_write(&mut self, _output: Cow<'_, str>) -> Result<(), Diagnostic> {
        Ok(())
    }

    fn stdout_push(&mut self, _end: char) -> Result<(), Diagnostic> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_writer_accumulates() {
        let mut writer = CollectStringPrint::new();
        writer.stdout_write("hi".into()).unwrap();
        writer.stdout_push('\n').unwrap();
        writer.stdout_write("there".into()).unwrap();
        assert_eq!(writer.output(), "hi\nthere");
    }
}
