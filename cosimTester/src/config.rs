//! Harness configuration.
//!
//! Sources, lowest priority first:
//! 1. Built-in defaults
//! 2. `cosim.toml` in the working directory, or the file given with `--config`
//! 3. Environment variables (`COSIM_BIN_DIR`, `COSIM_FIXTURE_DIR`,
//!    `COSIM_WORK_DIR`, `COSIM_TIMEOUT`)
//! 4. Command-line flags, applied by the binary
//!
//! ```toml
//! bin_dir = "/opt/cosim/bin"
//! compiler = "/opt/cosim/llvm/bin/clang"
//! include_dirs = ["/opt/cosim/lib/libc/include"]
//! link_libs = ["/opt/cosim/lib/libc/libc.a"]
//! fixture_dir = "tests"
//! timeout_secs = 60
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::TestError;

const LOCAL_CONFIG: &str = "cosim.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Directory holding the simulator and emulator binaries.
    pub bin_dir: PathBuf,
    pub simulator: String,
    pub emulator: String,
    /// Compiler driver; relative paths resolve against `bin_dir`.
    pub compiler: PathBuf,
    pub cflags: Vec<String>,
    pub include_dirs: Vec<PathBuf>,
    pub link_libs: Vec<PathBuf>,
    /// Root of the fixture sources, one subdirectory per suite.
    pub fixture_dir: PathBuf,
    /// Per-test build products land in `<work_dir>/<test name>`.
    pub work_dir: PathBuf,
    /// Where interrupt FIFOs are created.
    pub fifo_dir: PathBuf,
    pub timeout_secs: u64,
    pub build_timeout_secs: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            bin_dir: PathBuf::from("bin"),
            simulator: "verilator_model".to_string(),
            emulator: "emulator".to_string(),
            compiler: PathBuf::from("clang"),
            cflags: vec!["-O3".to_string(), "-w".to_string()],
            include_dirs: Vec::new(),
            link_libs: Vec::new(),
            fixture_dir: PathBuf::from("tests"),
            work_dir: PathBuf::from("obj"),
            fifo_dir: std::env::temp_dir(),
            timeout_secs: 60,
            build_timeout_secs: 120,
        }
    }
}

impl HarnessConfig {
    /// Loads defaults, then the config file, then environment overrides.
    ///
    /// An explicitly named file must exist; the implicit `cosim.toml` is
    /// optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self, TestError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None if Path::new(LOCAL_CONFIG).exists() => Self::from_file(Path::new(LOCAL_CONFIG))?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, TestError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TestError::Config(format!("failed to read {}: {e}", path.display())))?;
        let config = Self::from_toml(&content)
            .map_err(|e| TestError::Config(format!("{}: {e}", path.display())))?;
        log::info!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("failed to parse config: {e}"))
    }

    fn apply_env_overrides(&mut self) -> Result<(), TestError> {
        if let Ok(path) = std::env::var("COSIM_BIN_DIR") {
            log::info!("using COSIM_BIN_DIR from environment: {path}");
            self.bin_dir = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("COSIM_FIXTURE_DIR") {
            log::info!("using COSIM_FIXTURE_DIR from environment: {path}");
            self.fixture_dir = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("COSIM_WORK_DIR") {
            log::info!("using COSIM_WORK_DIR from environment: {path}");
            self.work_dir = PathBuf::from(path);
        }
        if let Ok(value) = std::env::var("COSIM_TIMEOUT") {
            self.timeout_secs = value
                .parse()
                .map_err(|_| TestError::Config(format!("COSIM_TIMEOUT is not a number: {value}")))?;
        }
        Ok(())
    }

    pub fn simulator_path(&self) -> PathBuf {
        self.bin_dir.join(&self.simulator)
    }

    pub fn emulator_path(&self) -> PathBuf {
        self.bin_dir.join(&self.emulator)
    }

    pub fn compiler_path(&self) -> PathBuf {
        if self.compiler.is_absolute() {
            return self.compiler.clone();
        }
        let in_bin_dir = self.bin_dir.join(&self.compiler);
        // A bare name not present in bin_dir is looked up on PATH.
        if self.compiler.components().count() > 1 || in_bin_dir.exists() {
            in_bin_dir
        } else {
            self.compiler.clone()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.simulator_path(), PathBuf::from("bin/verilator_model"));
        assert_eq!(config.emulator_path(), PathBuf::from("bin/emulator"));
        assert_eq!(config.timeout(), Duration::from_secs(60));
        assert_eq!(config.compiler_path(), PathBuf::from("clang"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = HarnessConfig::from_toml(
            r#"
bin_dir = "/opt/cosim/bin"
timeout_secs = 5
link_libs = ["/opt/cosim/lib/libc.a"]
"#,
        )
        .expect("config should parse");
        assert_eq!(config.emulator_path(), PathBuf::from("/opt/cosim/bin/emulator"));
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.link_libs, vec![PathBuf::from("/opt/cosim/lib/libc.a")]);
        assert_eq!(config.work_dir, PathBuf::from("obj"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(HarnessConfig::from_toml("simulater = \"typo\"").is_err());
    }

    #[test]
    fn missing_explicit_file_is_config_error() {
        let err = HarnessConfig::from_file(Path::new("/nonexistent/cosim.toml")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }

    #[test]
    fn compiler_relative_to_bin_dir() {
        let config = HarnessConfig {
            compiler: PathBuf::from("llvm/bin/clang"),
            bin_dir: PathBuf::from("/opt/cosim"),
            ..HarnessConfig::default()
        };
        assert_eq!(config.compiler_path(), PathBuf::from("/opt/cosim/llvm/bin/clang"));
    }
}
