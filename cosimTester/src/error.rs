use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Build,
    Timeout,
    Process,
    Assertion,
    Resource,
    Run,
    Config,
    Io,
}

impl ErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Build => "build error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Process => "process error",
            ErrorKind::Assertion => "assertion failure",
            ErrorKind::Resource => "resource error",
            ErrorKind::Run => "run error",
            ErrorKind::Config => "configuration error",
            ErrorKind::Io => "i/o error",
        }
    }
}

/// Every way a single test (or the harness setup) can fail.
///
/// Variants that wrap an external invocation keep its merged stdout/stderr so
/// the report can show what the toolchain or backend printed.
#[derive(Debug, Error)]
pub enum TestError {
    #[error("build failed: {command}")]
    Build { command: String, output: String },

    #[error("{program} did not finish within {:.1}s", timeout.as_secs_f64())]
    Timeout {
        program: String,
        timeout: Duration,
        output: String,
    },

    #[error("{program} exited with status {status}")]
    Process {
        program: String,
        status: i32,
        output: String,
    },

    #[error("{message}")]
    Assertion {
        message: String,
        output: Option<String>,
    },

    #[error("{context}: {source}")]
    Resource {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("{message}")]
    Run { message: String, output: String },

    #[error("{0}")]
    Config(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl TestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TestError::Build { .. } => ErrorKind::Build,
            TestError::Timeout { .. } => ErrorKind::Timeout,
            TestError::Process { .. } => ErrorKind::Process,
            TestError::Assertion { .. } => ErrorKind::Assertion,
            TestError::Resource { .. } => ErrorKind::Resource,
            TestError::Run { .. } => ErrorKind::Run,
            TestError::Config(_) => ErrorKind::Config,
            TestError::Io { .. } => ErrorKind::Io,
        }
    }

    /// Captured external output attached to the failure, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            TestError::Build { output, .. }
            | TestError::Timeout { output, .. }
            | TestError::Process { output, .. }
            | TestError::Run { output, .. } => Some(output.as_str()),
            TestError::Assertion { output, .. } => output.as_deref(),
            TestError::Resource { .. } | TestError::Config(_) | TestError::Io { .. } => None,
        }
    }

    pub fn assertion(message: impl Into<String>) -> Self {
        TestError::Assertion {
            message: message.into(),
            output: None,
        }
    }

    pub fn assertion_with_output(message: impl Into<String>, output: &str) -> Self {
        TestError::Assertion {
            message: message.into(),
            output: Some(output.to_string()),
        }
    }

    pub fn resource(context: impl Into<String>, source: io::Error) -> Self {
        TestError::Resource {
            context: context.into(),
            source,
        }
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        TestError::Io {
            context: context.into(),
            source,
        }
    }

    /// Attaches backend output to an assertion raised without it.
    pub fn with_output(self, captured: &str) -> Self {
        match self {
            TestError::Assertion {
                message,
                output: None,
            } => TestError::Assertion {
                message,
                output: Some(captured.to_string()),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let err = TestError::Process {
            program: "emulator".to_string(),
            status: 3,
            output: "boom".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Process);
        assert_eq!(err.output(), Some("boom"));
        assert_eq!(err.to_string(), "emulator exited with status 3");
    }

    #[test]
    fn with_output_only_fills_missing_assertion_output() {
        let err = TestError::assertion("bad marker").with_output("abc");
        assert_eq!(err.output(), Some("abc"));

        let err = TestError::assertion_with_output("bad marker", "first").with_output("second");
        assert_eq!(err.output(), Some("first"));

        let err = TestError::Config("unknown test".to_string()).with_output("ignored");
        assert_eq!(err.output(), None);
    }

    #[test]
    fn timeout_message_reports_seconds() {
        let err = TestError::Timeout {
            program: "verilator_model".to_string(),
            timeout: Duration::from_millis(1500),
            output: String::new(),
        };
        assert_eq!(err.to_string(), "verilator_model did not finish within 1.5s");
        assert_eq!(err.kind().label(), "timeout");
    }
}
