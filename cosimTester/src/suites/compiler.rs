use std::fs;
use std::path::Path;

use crate::arch::BackendKind;
use crate::error::TestError;
use crate::suite::TestRegistry;

const VERILATOR_OPT_OUT: &str = "-noverilator";

/// Registers a generic test per C/C++ source in `dir`. Sources whose stem
/// ends in `-noverilator` only get the emulator variant.
pub fn register(registry: &mut TestRegistry, dir: &Path) -> Result<(), TestError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("no compiler fixtures at {}", dir.display());
            return Ok(());
        }
        Err(err) => {
            return Err(TestError::io(format!("failed to list {}", dir.display()), err));
        }
    };

    let mut stems = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| TestError::io(format!("failed to list {}", dir.display()), e))?
            .path();
        let is_source = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("c") | Some("cpp")
        );
        if let (true, Some(stem)) = (is_source, path.file_stem().and_then(|s| s.to_str())) {
            stems.push(stem.to_string());
        }
    }
    stems.sort();

    for stem in stems {
        if stem.ends_with(VERILATOR_OPT_OUT) {
            registry.register_generic_on(&stem, &[BackendKind::Emulator])?;
        } else {
            registry.register_generic(&stem)?;
        }
    }
    Ok(())
}
