//! The bundled fixture suites. Each module registers its tests under the
//! fixture subdirectory of the same name.

mod cache_control;
mod compiler;
mod mmu;
mod multicore;
mod trap;

use crate::config::HarnessConfig;
use crate::error::TestError;
use crate::suite::TestRegistry;

pub fn register_all(registry: &mut TestRegistry, config: &HarnessConfig) -> Result<(), TestError> {
    registry.set_group("cache_control");
    cache_control::register(registry)?;
    registry.set_group("trap");
    trap::register(registry)?;
    registry.set_group("multicore");
    multicore::register(registry)?;
    registry.set_group("mmu");
    mmu::register(registry)?;
    registry.set_group("compiler");
    compiler::register(registry, &config.fixture_dir.join("compiler"))?;
    Ok(())
}
