use std::path::PathBuf;
use std::time::Duration;

use crate::arch::{Backend, BackendKind};
use crate::config::HarnessConfig;
use crate::error::TestError;
use crate::process::Invocation;
use crate::types::{BuildResult, RunOptions};

/// Cycle-accurate RTL model. Slow, but the only backend that models the
/// cache hierarchy, so dump and trace tests run here.
pub struct VerilatorBackend {
    program: PathBuf,
    timeout: Duration,
}

impl VerilatorBackend {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.simulator_path(), config.timeout())
    }
}

impl Backend for VerilatorBackend {
    fn name(&self) -> &str {
        "verilator"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Verilator
    }

    fn invocation(
        &self,
        image: &BuildResult,
        options: &RunOptions,
    ) -> Result<Invocation, TestError> {
        if options.interrupt_input.is_some() || options.interrupt_output.is_some() {
            return Err(TestError::Run {
                message: "the verilator model has no host interrupt pipes".to_string(),
                output: String::new(),
            });
        }
        let mut invocation = Invocation::new(&self.program, options.timeout.unwrap_or(self.timeout))
            .arg(format!("+bin={}", image.hex_path.display()));
        if let Some(dump) = &options.dump {
            invocation = invocation
                .arg(format!("+memdumpfile={}", dump.file.display()))
                .arg(format!("+memdumpbase={:x}", dump.base))
                .arg(format!("+memdumplen={:x}", dump.length));
        }
        Ok(invocation.args(options.extra_flags.iter().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> BuildResult {
        BuildResult {
            elf_path: PathBuf::from("obj/program.elf"),
            hex_path: PathBuf::from("obj/program.hex"),
        }
    }

    #[test]
    fn dump_and_extra_flags() {
        let backend = VerilatorBackend::new("/opt/bin/verilator_model", Duration::from_secs(60));
        let options = RunOptions::with_dump(PathBuf::from("obj/vmem.bin"), 0x100, 4)
            .flag("+trace=1")
            .flag("+autoflushl2=1");
        let invocation = backend.invocation(&image(), &options).unwrap();
        assert_eq!(
            invocation.args,
            vec![
                "+bin=obj/program.hex",
                "+memdumpfile=obj/vmem.bin",
                "+memdumpbase=100",
                "+memdumplen=4",
                "+trace=1",
                "+autoflushl2=1",
            ]
        );
        assert_eq!(invocation.timeout, Duration::from_secs(60));
    }

    #[test]
    fn interrupt_pipes_are_rejected() {
        let backend = VerilatorBackend::new("verilator_model", Duration::from_secs(60));
        let options = RunOptions {
            interrupt_input: Some(PathBuf::from("/tmp/pipe")),
            ..RunOptions::default()
        };
        assert!(backend.invocation(&image(), &options).is_err());
    }
}
