//! Output capture for snippet stdout and stderr.

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

/// Appended to a stream that hit its capture cap.
pub const TRUNCATION_MARKER: &str = "\n[output truncated]\n";

#[derive(Debug, Default)]
struct Buffer {
    bytes: Vec<u8>,
    truncated: bool,
}

/// A writer that captures output to a bounded buffer.
///
/// Clones share the same buffer, so one handle can be given to the
/// interpreter while another reads the text back afterwards. Bytes past the
/// cap are dropped and the text gains [`TRUNCATION_MARKER`].
#[derive(Clone, Debug)]
pub struct CapturedOutput {
    buffer: Arc<Mutex<Buffer>>,
    cap: usize,
}

impl CapturedOutput {
    /// Create a new captured output buffer holding at most `cap` bytes.
    pub fn new(cap: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Buffer::default())),
            cap,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get the captured output as a string.
    pub fn to_string_lossy(&self) -> String {
        let buffer = self.lock();
        let mut text = String::from_utf8_lossy(&buffer.bytes).into_owned();
        if buffer.truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }

    /// The captured text, or `None` when nothing was written.
    pub fn non_empty(&self) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(self.to_string_lossy())
        }
    }

    /// Get the length of captured data.
    pub fn len(&self) -> usize {
        self.lock().bytes.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        let buffer = self.lock();
        buffer.bytes.is_empty() && !buffer.truncated
    }

    /// Whether any output was dropped.
    pub fn is_truncated(&self) -> bool {
        self.lock().truncated
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut buffer = self.lock();
        let room = self.cap.saturating_sub(buffer.bytes.len());
        if buf.len() > room {
            buffer.truncated = true;
        }
        let keep = buf.len().min(room);
        buffer.bytes.extend_from_slice(&buf[..keep]);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Captured streams for one execution.
#[derive(Clone, Debug)]
pub struct SandboxIo {
    /// Captured stdout.
    pub stdout: CapturedOutput,
    /// Captured stderr.
    pub stderr: CapturedOutput,
}

impl SandboxIo {
    /// Create a capture pair, each stream capped at `cap` bytes.
    pub fn new(cap: usize) -> Self {
        Self {
            stdout: CapturedOutput::new(cap),
            stderr: CapturedOutput::new(cap),
        }
    }

    /// Writers to hand to the interpreter.
    pub fn writers(&self) -> (Box<dyn Write>, Box<dyn Write>) {
        (Box::new(self.stdout.clone()), Box::new(self.stderr.clone()))
    }

    /// Get the captured stdout as a string.
    pub fn stdout_str(&self) -> String {
        self.stdout.to_string_lossy()
    }

    /// Get the captured stderr, `None` when empty.
    pub fn stderr_str(&self) -> Option<String> {
        self.stderr.non_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captured_output() {
        let mut output = CapturedOutput::new(1024);
        output.write_all(b"hello ").unwrap();
        output.write_all(b"world").unwrap();
        assert_eq!(output.to_string_lossy(), "hello world");
        assert!(!output.is_truncated());
    }

    #[test]
    fn test_cap_drops_excess_and_marks() {
        let mut output = CapturedOutput::new(4);
        output.write_all(b"abcdef").unwrap();
        output.write_all(b"gh").unwrap();
        assert_eq!(output.len(), 4);
        assert!(output.is_truncated());
        assert_eq!(output.to_string_lossy(), format!("abcd{}", TRUNCATION_MARKER));
    }

    #[test]
    fn test_clones_share_buffer() {
        let io = SandboxIo::new(64);
        let (mut out, _) = io.writers();
        out.write_all(b"42\n").unwrap();
        assert_eq!(io.stdout_str(), "42\n");
        assert!(io.stderr_str().is_none());
    }
}
