use std::path::PathBuf;
use std::time::Duration;

/// Linked test image plus the flattened hex image the backends load.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub elf_path: PathBuf,
    pub hex_path: PathBuf,
}

/// Memory region a backend should write out after the run.
#[derive(Debug, Clone)]
pub struct DumpRequest {
    pub file: PathBuf,
    pub base: u32,
    pub length: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub timeout: Option<Duration>,
    pub dump: Option<DumpRequest>,
    /// Passed to the backend verbatim, e.g. `+trace=1`.
    pub extra_flags: Vec<String>,
    pub interrupt_input: Option<PathBuf>,
    pub interrupt_output: Option<PathBuf>,
}

impl RunOptions {
    pub fn with_dump(file: PathBuf, base: u32, length: u32) -> Self {
        Self {
            dump: Some(DumpRequest { file, base, length }),
            ..Self::default()
        }
    }

    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.extra_flags.push(flag.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub exit_code: i32,
    /// stdout and stderr, interleaved as the process wrote them.
    pub output: String,
    pub dump: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Passed,
    Failed,
}

impl TestStatus {
    pub fn label(&self) -> &'static str {
        match self {
            TestStatus::Passed => "PASS",
            TestStatus::Failed => "FAIL",
        }
    }
}
