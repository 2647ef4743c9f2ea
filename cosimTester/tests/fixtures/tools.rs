//! Stand-ins for the toolchain and backends: small `sh` scripts written into
//! a scratch directory and wired into a `HarnessConfig`.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use cosim_tests::{BackendSelector, HarnessConfig};
use tempfile::TempDir;

const EMULATOR_PROLOGUE: &str = r#"#!/bin/sh
IN=""
OUT=""
DUMP=""
while [ $# -gt 1 ]; do
  case "$1" in
    -i) IN="$2"; shift 2 ;;
    -o) OUT="$2"; shift 2 ;;
    -d) DUMP="${2%%,*}"; shift 2 ;;
    *) shift ;;
  esac
done
IMAGE="$1"
"#;

const SIMULATOR_PROLOGUE: &str = r#"#!/bin/sh
DUMP=""
IMAGE=""
TRACE=""
for arg in "$@"; do
  case "$arg" in
    +bin=*) IMAGE="${arg#+bin=}" ;;
    +memdumpfile=*) DUMP="${arg#+memdumpfile=}" ;;
    +trace=1) TRACE=1 ;;
  esac
done
"#;

pub struct FakeTools {
    pub dir: TempDir,
    pub config: HarnessConfig,
}

impl FakeTools {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().to_path_buf();
        for sub in ["bin", "fixtures", "obj", "fifo"] {
            fs::create_dir_all(root.join(sub)).expect("create scratch dir");
        }
        let elf = root.join("prebuilt.elf");
        fs::write(&elf, minimal_elf()).expect("write elf");

        let config = HarnessConfig {
            bin_dir: root.join("bin"),
            compiler: root.join("bin/clang"),
            fixture_dir: root.join("fixtures"),
            work_dir: root.join("obj"),
            fifo_dir: root.join("fifo"),
            timeout_secs: 20,
            build_timeout_secs: 20,
            ..HarnessConfig::default()
        };
        let tools = Self { dir, config };
        tools.compiler(&format!("cp \"{}\" \"$OUT\"\necho linked", elf.display()));
        tools.emulator("echo emulator ran");
        tools.simulator("echo simulator ran");
        tools
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn fifo_dir(&self) -> PathBuf {
        self.config.fifo_dir.clone()
    }

    /// Compiler script body; `$OUT` holds the `-o` argument.
    pub fn compiler(&self, body: &str) {
        let script = format!(
            "#!/bin/sh\nOUT=\"\"\nwhile [ $# -gt 0 ]; do\n  case \"$1\" in\n    -o) OUT=\"$2\"; shift 2 ;;\n    *) shift ;;\n  esac\ndone\n{body}\n"
        );
        write_script(&self.config.compiler, &script);
    }

    /// Emulator script body; `$IN`, `$OUT`, `$DUMP` and `$IMAGE` are set.
    pub fn emulator(&self, body: &str) {
        write_script(
            &self.config.emulator_path(),
            &format!("{EMULATOR_PROLOGUE}{body}\n"),
        );
    }

    /// Simulator script body; `$DUMP`, `$IMAGE` and `$TRACE` are set.
    pub fn simulator(&self, body: &str) {
        write_script(
            &self.config.simulator_path(),
            &format!("{SIMULATOR_PROLOGUE}{body}\n"),
        );
    }

    pub fn fixture(&self, group: &str, name: &str, contents: &str) {
        let dir = self.config.fixture_dir.join(group);
        fs::create_dir_all(&dir).expect("create fixture dir");
        fs::write(dir.join(name), contents).expect("write fixture");
    }

    pub fn data_file(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.root().join(name);
        fs::write(&path, contents).expect("write data file");
        path
    }

    pub fn backends(&self) -> BackendSelector {
        BackendSelector::from_config(&self.config)
    }

    pub fn leftover_fifos(&self) -> Vec<PathBuf> {
        fs::read_dir(&self.config.fifo_dir)
            .expect("list fifo dir")
            .map(|entry| entry.expect("dir entry").path())
            .collect()
    }
}

pub fn write_script(path: &Path, contents: &str) {
    fs::write(path, contents).expect("write script");
    let mut perms = fs::metadata(path).expect("script metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod script");
}

/// Little-endian ELF32 executable with one loadable word.
pub fn minimal_elf() -> Vec<u8> {
    let payload = 0x0000_0013u32.to_le_bytes();
    let mut elf = Vec::new();
    elf.extend_from_slice(&[0x7f, b'E', b'L', b'F', 1, 1, 1, 0]);
    elf.extend_from_slice(&[0u8; 8]);
    elf.extend_from_slice(&2u16.to_le_bytes());
    elf.extend_from_slice(&0xf3u16.to_le_bytes());
    elf.extend_from_slice(&1u32.to_le_bytes());
    elf.extend_from_slice(&0u32.to_le_bytes());
    elf.extend_from_slice(&52u32.to_le_bytes());
    elf.extend_from_slice(&0u32.to_le_bytes());
    elf.extend_from_slice(&0u32.to_le_bytes());
    elf.extend_from_slice(&52u16.to_le_bytes());
    elf.extend_from_slice(&32u16.to_le_bytes());
    elf.extend_from_slice(&1u16.to_le_bytes());
    elf.extend_from_slice(&40u16.to_le_bytes());
    elf.extend_from_slice(&0u16.to_le_bytes());
    elf.extend_from_slice(&0u16.to_le_bytes());
    elf.extend_from_slice(&1u32.to_le_bytes());
    elf.extend_from_slice(&84u32.to_le_bytes());
    elf.extend_from_slice(&0u32.to_le_bytes());
    elf.extend_from_slice(&0u32.to_le_bytes());
    elf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    elf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    elf.extend_from_slice(&5u32.to_le_bytes());
    elf.extend_from_slice(&4u32.to_le_bytes());
    elf.extend_from_slice(&payload);
    elf
}

/// Dump contents the cache flush fixture should leave behind.
pub fn flush_dump() -> Vec<u8> {
    let mut bytes = Vec::with_capacity(0x40000);
    for index in 0..0x10000u32 {
        bytes.extend_from_slice(&(0x1f0e6231 + index / 16).to_le_bytes());
    }
    bytes
}
