use crate::error::TestError;
use crate::harness::TestContext;
use crate::suite::TestRegistry;
use crate::types::RunOptions;

// Four threads take turns printing a shared counter.
const EXPECTED_SEQUENCE: &str = "012345678910111213141516171819202122232425262728293031";

fn multicore_test(ctx: &TestContext<'_>, _name: &str) -> Result<(), TestError> {
    let image = ctx.compile_test(&["multicore.c"])?;
    let result = ctx.run_verilator(&image, &RunOptions::default())?;
    let joined = result.output.replace('\n', "");
    if !joined.contains(EXPECTED_SEQUENCE) {
        return Err(TestError::assertion_with_output(
            "output mismatch",
            &result.output,
        ));
    }
    Ok(())
}

pub fn register(registry: &mut TestRegistry) -> Result<(), TestError> {
    registry.register(multicore_test, &["multicore"])
}
