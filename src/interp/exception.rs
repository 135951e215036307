//! Exceptions raised inside the interpreter and the unwinding signal that
//! carries them up the evaluation stack.

use std::fmt;

/// The category of a snippet-level exception, named after the Python class
/// a snippet author would expect to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExcKind {
    AssertionError,
    AttributeError,
    ImportError,
    IndexError,
    KeyError,
    LinAlgError,
    MemoryError,
    NameError,
    NotImplementedError,
    OverflowError,
    RecursionError,
    RuntimeError,
    StatisticsError,
    StopIteration,
    SyntaxError,
    TypeError,
    UnboundLocalError,
    ValueError,
    ZeroDivisionError,
}

impl ExcKind {
    /// The class name shown in error messages.
    pub fn name(self) -> &'static str {
        match self {
            ExcKind::AssertionError => "AssertionError",
            ExcKind::AttributeError => "AttributeError",
            ExcKind::ImportError => "ImportError",
            ExcKind::IndexError => "IndexError",
            ExcKind::KeyError => "KeyError",
            ExcKind::LinAlgError => "LinAlgError",
            ExcKind::MemoryError => "MemoryError",
            ExcKind::NameError => "NameError",
            ExcKind::NotImplementedError => "NotImplementedError",
            ExcKind::OverflowError => "OverflowError",
            ExcKind::RecursionError => "RecursionError",
            ExcKind::RuntimeError => "RuntimeError",
            ExcKind::StatisticsError => "StatisticsError",
            ExcKind::StopIteration => "StopIteration",
            ExcKind::SyntaxError => "SyntaxError",
            ExcKind::TypeError => "TypeError",
            ExcKind::UnboundLocalError => "UnboundLocalError",
            ExcKind::ValueError => "ValueError",
            ExcKind::ZeroDivisionError => "ZeroDivisionError",
        }
    }
}

impl fmt::Display for ExcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of a traceback: the function that was running and the line it
/// was on when the exception passed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub line: usize,
    pub function: String,
}

/// An exception raised by snippet code or by a builtin on its behalf.
#[derive(Debug, Clone)]
pub struct PyException {
    pub kind: ExcKind,
    pub message: String,
    /// Outermost frame first, matching the usual traceback order.
    pub traceback: Vec<TraceFrame>,
}

impl PyException {
    pub fn new(kind: ExcKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            traceback: Vec::new(),
        }
    }

    /// `"Kind: message"`, or just `"Kind"` when there is no message.
    pub fn summary(&self) -> String {
        if self.message.is_empty() {
            self.kind.name().to_string()
        } else {
            format!("{}: {}", self.kind, self.message)
        }
    }

    /// Render the full diagnostic text, including the source line of each
    /// frame when it can be recovered from `source`.
    pub fn format_traceback(&self, source: &str) -> String {
        let lines: Vec<&str> = source.lines().collect();
        let mut out = String::from("Traceback (most recent call last):\n");
        for frame in &self.traceback {
            out.push_str(&format!(
                "  File \"<string>\", line {}, in {}\n",
                frame.line, frame.function
            ));
            if let Some(text) = frame.line.checked_sub(1).and_then(|i| lines.get(i)) {
                let text = text.trim();
                if !text.is_empty() {
                    out.push_str(&format!("    {}\n", text));
                }
            }
        }
        out.push_str(&self.summary());
        out.push('\n');
        out
    }
}

impl fmt::Display for PyException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

impl std::error::Error for PyException {}

/// Why evaluation stopped early.
///
/// `Deadline` is deliberately separate from `Raise`: snippet `try`/`except`
/// blocks only ever see `Raise`.
#[derive(Debug)]
pub enum Unwind {
    Raise(Box<PyException>),
    Deadline,
}

impl From<PyException> for Unwind {
    fn from(exc: PyException) -> Self {
        Unwind::Raise(Box::new(exc))
    }
}

pub type PyResult<T> = Result<T, Unwind>;

/// Shorthand for returning a freshly raised exception.
pub fn raise<T>(kind: ExcKind, message: impl Into<String>) -> PyResult<T> {
    Err(PyException::new(kind, message).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_with_and_without_message() {
        let exc = PyException::new(ExcKind::ZeroDivisionError, "division by zero");
        assert_eq!(exc.summary(), "ZeroDivisionError: division by zero");

        let bare = PyException::new(ExcKind::AssertionError, "");
        assert_eq!(bare.summary(), "AssertionError");
    }

    #[test]
    fn test_format_traceback_includes_frames_and_source() {
        let mut exc = PyException::new(ExcKind::NameError, "name 'y' is not defined");
        exc.traceback.push(TraceFrame {
            line: 2,
            function: "<module>".to_string(),
        });
        let text = exc.format_traceback("x = 1\nz = y + x\n");
        assert!(text.starts_with("Traceback (most recent call last):"));
        assert!(text.contains("File \"<string>\", line 2, in <module>"));
        assert!(text.contains("    z = y + x"));
        assert!(text.trim_end().ends_with("NameError: name 'y' is not defined"));
    }
}
