use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use goblin::elf::Elf;
use goblin::elf::program_header::PT_LOAD;

use crate::config::HarnessConfig;
use crate::error::TestError;
use crate::process::{self, Invocation};
use crate::types::BuildResult;

const ELF_NAME: &str = "program.elf";
const HEX_NAME: &str = "program.hex";
const MAX_IMAGE_BYTES: u64 = 256 * 1024 * 1024;

/// Compiler driver used for both C fixtures and hand-written assembly.
#[derive(Debug, Clone)]
pub struct Toolchain {
    compiler: PathBuf,
    cflags: Vec<String>,
    include_dirs: Vec<PathBuf>,
    link_libs: Vec<PathBuf>,
    timeout: Duration,
}

impl Toolchain {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            compiler: config.compiler_path(),
            cflags: config.cflags.clone(),
            include_dirs: config.include_dirs.clone(),
            link_libs: config.link_libs.clone(),
            timeout: config.build_timeout(),
        }
    }

    /// Compiles and links C (and any accompanying assembly) against the
    /// runtime libraries.
    pub fn compile(&self, sources: &[PathBuf], out_dir: &Path) -> Result<BuildResult, TestError> {
        let elf_path = out_dir.join(ELF_NAME);
        let mut invocation = Invocation::new(&self.compiler, self.timeout)
            .allow_failure()
            .arg("-o")
            .arg(elf_path.display().to_string())
            .args(self.cflags.iter().cloned());
        for dir in &self.include_dirs {
            invocation = invocation.arg(format!("-I{}", dir.display()));
        }
        invocation = invocation.args(sources.iter().map(|s| s.display().to_string()));
        invocation = invocation.args(self.link_libs.iter().map(|l| l.display().to_string()));
        self.link(invocation, &elf_path, out_dir)
    }

    /// Assembles standalone sources; no runtime libraries are linked.
    pub fn assemble(&self, sources: &[PathBuf], out_dir: &Path) -> Result<BuildResult, TestError> {
        let elf_path = out_dir.join(ELF_NAME);
        let invocation = Invocation::new(&self.compiler, self.timeout)
            .allow_failure()
            .arg("-o")
            .arg(elf_path.display().to_string())
            .arg("-w")
            .args(sources.iter().map(|s| s.display().to_string()));
        self.link(invocation, &elf_path, out_dir)
    }

    fn link(
        &self,
        invocation: Invocation,
        elf_path: &Path,
        out_dir: &Path,
    ) -> Result<BuildResult, TestError> {
        fs::create_dir_all(out_dir)
            .map_err(|e| TestError::io(format!("failed to create {}", out_dir.display()), e))?;
        let command = invocation.command_line();
        let result = match process::run(&invocation) {
            Ok(result) => result,
            Err(TestError::Run { message, output }) => {
                return Err(TestError::Build {
                    command,
                    output: format!("{message}\n{output}"),
                });
            }
            Err(err) => return Err(err),
        };
        if result.exit_code != 0 {
            log::warn!("toolchain exited with {}: {command}", result.exit_code);
            return Err(TestError::Build {
                command,
                output: result.output,
            });
        }

        let hex_path = out_dir.join(HEX_NAME);
        write_hex_image(elf_path, &hex_path).map_err(|message| TestError::Build {
            command: command.clone(),
            output: message,
        })?;
        log::debug!("built {}", hex_path.display());
        Ok(BuildResult {
            elf_path: elf_path.to_path_buf(),
            hex_path,
        })
    }
}

/// Converts a linked ELF into the backends' hex memory format.
pub fn write_hex_image(elf_path: &Path, hex_path: &Path) -> Result<(), String> {
    let bytes = fs::read(elf_path)
        .map_err(|e| format!("failed to read elf {}: {e}", elf_path.display()))?;
    let image = flatten_elf(&bytes)?;
    fs::write(hex_path, encode_hex(&image))
        .map_err(|e| format!("failed to write {}: {e}", hex_path.display()))
}

/// Lays out every loadable segment at its physical address, zero-filling
/// gaps and bss, padded to a whole number of words.
pub fn flatten_elf(bytes: &[u8]) -> Result<Vec<u8>, String> {
    let elf = Elf::parse(bytes).map_err(|e| format!("failed to parse elf: {e}"))?;
    let segments = elf
        .program_headers
        .iter()
        .filter(|ph| ph.p_type == PT_LOAD && ph.p_memsz > 0)
        .collect::<Vec<_>>();
    if segments.is_empty() {
        return Err("elf has no loadable segments".to_string());
    }

    let mut image_end = 0u64;
    for ph in &segments {
        let end = ph
            .p_paddr
            .checked_add(ph.p_memsz)
            .ok_or_else(|| "segment end overflow".to_string())?;
        image_end = image_end.max(end);
    }
    if image_end > MAX_IMAGE_BYTES {
        return Err(format!(
            "image does not fit in memory (ends at {image_end:#x}, limit {MAX_IMAGE_BYTES:#x})"
        ));
    }

    let mut image = vec![0u8; (image_end as usize + 3) & !3];
    for ph in segments {
        if ph.p_filesz > ph.p_memsz {
            return Err(format!("segment at {:#x} has filesz > memsz", ph.p_paddr));
        }
        let file_start = ph.p_offset as usize;
        let file_end = file_start
            .checked_add(ph.p_filesz as usize)
            .ok_or_else(|| "segment file range overflow".to_string())?;
        let data = bytes.get(file_start..file_end).ok_or_else(|| {
            format!("segment data {file_start:#x}..{file_end:#x} outside of file")
        })?;
        let dest = ph.p_paddr as usize;
        image[dest..dest + data.len()].copy_from_slice(data);
    }
    Ok(image)
}

/// One word per line, eight hex digits, bytes in memory order.
pub fn encode_hex(image: &[u8]) -> String {
    let mut out = String::with_capacity(image.len() / 4 * 9);
    for word in image.chunks(4) {
        for idx in 0..4 {
            let byte = word.get(idx).copied().unwrap_or(0);
            let _ = write!(out, "{byte:02x}");
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elf_with_segment(paddr: u32, data: &[u8], memsz: u32) -> Vec<u8> {
        let mut elf = Vec::new();
        elf.extend_from_slice(&[0x7f, b'E', b'L', b'F', 1, 1, 1, 0]);
        elf.extend_from_slice(&[0u8; 8]);
        elf.extend_from_slice(&2u16.to_le_bytes());
        elf.extend_from_slice(&0xf3u16.to_le_bytes());
        elf.extend_from_slice(&1u32.to_le_bytes());
        elf.extend_from_slice(&paddr.to_le_bytes());
        elf.extend_from_slice(&52u32.to_le_bytes());
        elf.extend_from_slice(&0u32.to_le_bytes());
        elf.extend_from_slice(&0u32.to_le_bytes());
        elf.extend_from_slice(&52u16.to_le_bytes());
        elf.extend_from_slice(&32u16.to_le_bytes());
        elf.extend_from_slice(&1u16.to_le_bytes());
        elf.extend_from_slice(&40u16.to_le_bytes());
        elf.extend_from_slice(&0u16.to_le_bytes());
        elf.extend_from_slice(&0u16.to_le_bytes());
        // PT_LOAD
        elf.extend_from_slice(&1u32.to_le_bytes());
        elf.extend_from_slice(&84u32.to_le_bytes());
        elf.extend_from_slice(&paddr.to_le_bytes());
        elf.extend_from_slice(&paddr.to_le_bytes());
        elf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        elf.extend_from_slice(&memsz.to_le_bytes());
        elf.extend_from_slice(&5u32.to_le_bytes());
        elf.extend_from_slice(&4u32.to_le_bytes());
        elf.extend_from_slice(data);
        elf
    }

    #[test]
    fn flattens_segment_with_bss_padding() {
        let elf = elf_with_segment(0, &[0x11, 0x22, 0x33, 0x44, 0x55], 8);
        let image = flatten_elf(&elf).expect("valid elf");
        assert_eq!(image, vec![0x11, 0x22, 0x33, 0x44, 0x55, 0, 0, 0]);
        assert_eq!(encode_hex(&image), "11223344\n55000000\n");
    }

    #[test]
    fn segment_is_placed_at_physical_address() {
        let elf = elf_with_segment(8, &[0xde, 0xad, 0xbe, 0xef], 4);
        let image = flatten_elf(&elf).expect("valid elf");
        assert_eq!(encode_hex(&image), "00000000\n00000000\ndeadbeef\n");
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(flatten_elf(b"not an elf at all").is_err());
    }

    #[test]
    fn hex_file_is_written_next_to_elf() {
        let dir = tempfile::tempdir().unwrap();
        let elf_path = dir.path().join(ELF_NAME);
        let hex_path = dir.path().join(HEX_NAME);
        fs::write(&elf_path, elf_with_segment(0, &[1, 2, 3, 4], 4)).unwrap();
        write_hex_image(&elf_path, &hex_path).unwrap();
        assert_eq!(fs::read_to_string(&hex_path).unwrap(), "01020304\n");
    }
}
