use crate::error::TestError;
use crate::suite::TestRegistry;

pub fn register(registry: &mut TestRegistry) -> Result<(), TestError> {
    registry.register_generic("execute_fault")?;
    registry.register_generic("io_write_fault")?;
    registry.register_generic("tlb_invalidate_all")?;
    Ok(())
}
