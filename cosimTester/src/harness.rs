use std::fs;
use std::path::{Path, PathBuf};

use crate::arch::{Backend, BackendKind, BackendSelector};
use crate::build::Toolchain;
use crate::config::HarnessConfig;
use crate::error::TestError;
use crate::interrupt::{self, InterruptPipe, PulseTrain};
use crate::types::{BuildResult, RunOptions, RunResult};

const SOURCE_EXTENSIONS: [&str; 4] = ["c", "cpp", "S", "s"];

/// Everything one test procedure may touch: its fixture directory, a
/// private work directory, the toolchain and the backends.
pub struct TestContext<'a> {
    name: String,
    config: &'a HarnessConfig,
    backends: &'a BackendSelector,
    toolchain: Toolchain,
    fixture_dir: PathBuf,
    work_dir: PathBuf,
}

impl<'a> TestContext<'a> {
    /// Prepares a fresh work directory for `name`, discarding whatever an
    /// earlier run left there.
    pub fn new(
        name: &str,
        group: &str,
        config: &'a HarnessConfig,
        backends: &'a BackendSelector,
    ) -> Result<Self, TestError> {
        let work_dir = config.work_dir.join(name);
        if work_dir.exists() {
            fs::remove_dir_all(&work_dir).map_err(|e| {
                TestError::io(format!("failed to clear {}", work_dir.display()), e)
            })?;
        }
        fs::create_dir_all(&work_dir)
            .map_err(|e| TestError::io(format!("failed to create {}", work_dir.display()), e))?;
        Ok(Self {
            name: name.to_string(),
            config,
            backends,
            toolchain: Toolchain::from_config(config),
            fixture_dir: config.fixture_dir.join(group),
            work_dir,
        })
    }

    pub fn fixture(&self, relative: &str) -> PathBuf {
        self.fixture_dir.join(relative)
    }

    pub fn work_path(&self, file: &str) -> PathBuf {
        self.work_dir.join(file)
    }

    /// Finds `<base>.c`, `.cpp`, `.S` or `.s` in the fixture directory.
    pub fn find_source(&self, base: &str) -> Result<PathBuf, TestError> {
        SOURCE_EXTENSIONS
            .iter()
            .map(|ext| self.fixture(&format!("{base}.{ext}")))
            .find(|path| path.exists())
            .ok_or_else(|| {
                TestError::Config(format!(
                    "no source for {base} in {}",
                    self.fixture_dir.display()
                ))
            })
    }

    /// FIFO path private to this test and this harness process.
    pub fn fifo_path(&self, tag: &str) -> PathBuf {
        let name = self
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect::<String>();
        self.config
            .fifo_dir
            .join(format!("cosim_{name}_{tag}_{}", std::process::id()))
    }

    pub fn compile_test(&self, sources: &[&str]) -> Result<BuildResult, TestError> {
        let sources = self.fixtures(sources);
        self.toolchain.compile(&sources, &self.work_dir)
    }

    pub fn assemble_test(&self, sources: &[&str]) -> Result<BuildResult, TestError> {
        let sources = self.fixtures(sources);
        self.toolchain.assemble(&sources, &self.work_dir)
    }

    /// Builds a single source, compiling C and assembling anything else.
    pub fn build_source(&self, source: &Path) -> Result<BuildResult, TestError> {
        let sources = [source.to_path_buf()];
        match source.extension().and_then(|ext| ext.to_str()) {
            Some("c") | Some("cpp") => self.toolchain.compile(&sources, &self.work_dir),
            _ => self.toolchain.assemble(&sources, &self.work_dir),
        }
    }

    fn fixtures(&self, sources: &[&str]) -> Vec<PathBuf> {
        sources.iter().map(|source| self.fixture(source)).collect()
    }

    pub fn backend(&self, kind: BackendKind) -> Result<&dyn Backend, TestError> {
        self.backends.get(kind)
    }

    /// Backend named by this test's suffix.
    pub fn backend_kind(&self) -> BackendKind {
        BackendKind::from_test_name(&self.name)
    }

    pub fn run_backend(
        &self,
        kind: BackendKind,
        image: &BuildResult,
        options: &RunOptions,
    ) -> Result<RunResult, TestError> {
        let backend = self.backend(kind)?;
        log::info!("{}: running on {}", self.name, backend.name());
        backend.run(image, options)
    }

    pub fn run_verilator(
        &self,
        image: &BuildResult,
        options: &RunOptions,
    ) -> Result<RunResult, TestError> {
        self.run_backend(BackendKind::Verilator, image, options)
    }

    pub fn run_emulator(
        &self,
        image: &BuildResult,
        options: &RunOptions,
    ) -> Result<RunResult, TestError> {
        self.run_backend(BackendKind::Emulator, image, options)
    }

    /// Runs `image` on the emulator while feeding it `train` through its
    /// interrupt input pipe.
    pub fn run_with_host_interrupts(
        &self,
        image: &BuildResult,
        train: &PulseTrain,
    ) -> Result<RunResult, TestError> {
        let pipe = InterruptPipe::create(self.fifo_path("recvint"))?;
        let options = RunOptions {
            interrupt_input: Some(pipe.path().to_path_buf()),
            ..RunOptions::default()
        };
        let process = self.backend(BackendKind::Emulator)?.spawn(image, &options)?;
        interrupt::deliver_to_guest(&pipe, process, train)
    }

    /// Runs `image` on the emulator and returns up to `max_bytes`
    /// interrupts it raised toward the host.
    pub fn run_with_guest_interrupts(
        &self,
        image: &BuildResult,
        max_bytes: usize,
    ) -> Result<(RunResult, Vec<u8>), TestError> {
        let pipe = InterruptPipe::create(self.fifo_path("sendint"))?;
        let reader = pipe.open_reader()?;
        let options = RunOptions {
            interrupt_output: Some(pipe.path().to_path_buf()),
            ..RunOptions::default()
        };
        let process = self.backend(BackendKind::Emulator)?.spawn(image, &options)?;
        interrupt::collect_from_guest(reader, process, max_bytes)
    }
}
