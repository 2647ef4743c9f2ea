use std::path::PathBuf;
use std::time::Duration;

use crate::arch::{Backend, BackendKind};
use crate::config::HarnessConfig;
use crate::error::TestError;
use crate::process::Invocation;
use crate::types::{BuildResult, RunOptions};

/// Functional emulator. Supports host interrupt pipes (`-i` / `-o`).
pub struct EmulatorBackend {
    program: PathBuf,
    timeout: Duration,
}

impl EmulatorBackend {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.emulator_path(), config.timeout())
    }
}

impl Backend for EmulatorBackend {
    fn name(&self) -> &str {
        "emulator"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Emulator
    }

    fn invocation(
        &self,
        image: &BuildResult,
        options: &RunOptions,
    ) -> Result<Invocation, TestError> {
        let mut invocation =
            Invocation::new(&self.program, options.timeout.unwrap_or(self.timeout));
        if let Some(dump) = &options.dump {
            invocation = invocation.arg("-d").arg(format!(
                "{},{:x},{:x}",
                dump.file.display(),
                dump.base,
                dump.length
            ));
        }
        if let Some(pipe) = &options.interrupt_input {
            invocation = invocation.arg("-i").arg(pipe.display().to_string());
        }
        if let Some(pipe) = &options.interrupt_output {
            invocation = invocation.arg("-o").arg(pipe.display().to_string());
        }
        Ok(invocation
            .args(options.extra_flags.iter().cloned())
            .arg(image.hex_path.display().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_goes_last() {
        let backend = EmulatorBackend::new("/opt/bin/emulator", Duration::from_secs(60));
        let image = BuildResult {
            elf_path: PathBuf::from("obj/program.elf"),
            hex_path: PathBuf::from("obj/program.hex"),
        };
        let options = RunOptions {
            timeout: Some(Duration::from_secs(5)),
            dump: None,
            extra_flags: vec!["-v".to_string()],
            interrupt_input: Some(PathBuf::from("/tmp/recv")),
            interrupt_output: Some(PathBuf::from("/tmp/send")),
        };
        let invocation = backend.invocation(&image, &options).unwrap();
        assert_eq!(
            invocation.args,
            vec!["-i", "/tmp/recv", "-o", "/tmp/send", "-v", "obj/program.hex"]
        );
        assert_eq!(invocation.timeout, Duration::from_secs(5));
    }

    #[test]
    fn dump_flag_uses_hex_fields() {
        let backend = EmulatorBackend::new("emulator", Duration::from_secs(60));
        let image = BuildResult {
            elf_path: PathBuf::from("a.elf"),
            hex_path: PathBuf::from("a.hex"),
        };
        let options = RunOptions::with_dump(PathBuf::from("vmem.bin"), 0x400000, 0x40000);
        let invocation = backend.invocation(&image, &options).unwrap();
        assert_eq!(invocation.args, vec!["-d", "vmem.bin,400000,40000", "a.hex"]);
    }
}
