use std::fs;

use crate::config::HarnessConfig;
use crate::error::TestError;
use crate::process::{self, Invocation, RunningProcess};
use crate::runners::{EmulatorBackend, VerilatorBackend};
use crate::types::{BuildResult, DumpRequest, RunOptions, RunResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Cycle-accurate RTL model.
    Verilator,
    /// Functional instruction-set emulator.
    Emulator,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Emulator, BackendKind::Verilator];

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Verilator => "verilator",
            BackendKind::Emulator => "emulator",
        }
    }

    /// Picks the backend named by a `_emulator` / `_verilator` suffix,
    /// defaulting to the simulator.
    pub fn from_test_name(name: &str) -> Self {
        if name.ends_with("_emulator") {
            BackendKind::Emulator
        } else {
            BackendKind::Verilator
        }
    }

    pub fn suffix(&self) -> String {
        format!("_{}", self.name())
    }
}

pub trait Backend {
    fn name(&self) -> &str;
    fn kind(&self) -> BackendKind;

    /// Command line that runs `image` with `options`.
    fn invocation(&self, image: &BuildResult, options: &RunOptions)
    -> Result<Invocation, TestError>;

    fn run(&self, image: &BuildResult, options: &RunOptions) -> Result<RunResult, TestError> {
        if let Some(dump) = &options.dump {
            remove_stale_dump(dump)?;
        }
        let invocation = self.invocation(image, options)?;
        let mut result = process::run(&invocation)?;
        if let Some(dump) = &options.dump {
            check_dump(dump, &result.output)?;
            result.dump = Some(dump.file.clone());
        }
        Ok(result)
    }

    /// Starts the backend without waiting, for tests that interact with it
    /// while it runs.
    fn spawn(&self, image: &BuildResult, options: &RunOptions) -> Result<RunningProcess, TestError> {
        let invocation = self.invocation(image, options)?;
        process::spawn(&invocation)
    }
}

fn remove_stale_dump(dump: &DumpRequest) -> Result<(), TestError> {
    match fs::remove_file(&dump.file) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(TestError::io(
            format!("failed to remove stale dump {}", dump.file.display()),
            err,
        )),
    }
}

fn check_dump(dump: &DumpRequest, output: &str) -> Result<(), TestError> {
    let metadata = fs::metadata(&dump.file).map_err(|e| TestError::Run {
        message: format!("backend did not write dump {}: {e}", dump.file.display()),
        output: output.to_string(),
    })?;
    if metadata.len() != u64::from(dump.length) {
        return Err(TestError::Run {
            message: format!(
                "dump {} is {} bytes, requested {}",
                dump.file.display(),
                metadata.len(),
                dump.length
            ),
            output: output.to_string(),
        });
    }
    Ok(())
}

pub struct BackendSelector {
    backends: Vec<Box<dyn Backend>>,
}

impl BackendSelector {
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        let mut selector = Self::new();
        selector.register(Box::new(VerilatorBackend::from_config(config)));
        selector.register(Box::new(EmulatorBackend::from_config(config)));
        selector
    }

    /// Later registrations replace an earlier backend of the same kind.
    pub fn register(&mut self, backend: Box<dyn Backend>) {
        self.backends.retain(|existing| existing.kind() != backend.kind());
        self.backends.push(backend);
    }

    pub fn get(&self, kind: BackendKind) -> Result<&dyn Backend, TestError> {
        self.backends
            .iter()
            .find(|backend| backend.kind() == kind)
            .map(|backend| backend.as_ref())
            .ok_or_else(|| TestError::Config(format!("no {} backend configured", kind.name())))
    }
}

impl Default for BackendSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_from_suffix() {
        assert_eq!(
            BackendKind::from_test_name("unaligned_data_fault_emulator"),
            BackendKind::Emulator
        );
        assert_eq!(
            BackendKind::from_test_name("unaligned_data_fault_verilator"),
            BackendKind::Verilator
        );
        assert_eq!(BackendKind::from_test_name("dflush"), BackendKind::Verilator);
    }

    #[test]
    fn selector_resolves_both_kinds() {
        let selector = BackendSelector::from_config(&HarnessConfig::default());
        assert_eq!(selector.get(BackendKind::Emulator).unwrap().name(), "emulator");
        assert_eq!(selector.get(BackendKind::Verilator).unwrap().name(), "verilator");
    }

    #[test]
    fn empty_selector_is_config_error() {
        let selector = BackendSelector::new();
        let err = selector.get(BackendKind::Emulator).err().expect("missing backend");
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }
}
